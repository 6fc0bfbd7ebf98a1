// Network layer: connection state and ring, the connection pool and idle
// list, zero-copy accounting, and the epoll event loop that drives it all.

pub mod conn;
pub mod event_loop;
pub mod pool;
pub mod zerocopy;

pub use event_loop::Server;
