// minikv — in-memory key/value server.
//
// One event-loop thread serves every client over two wire protocols (a
// length-prefixed binary framing and RESP), backed by a Robin-Hood hash
// map with incremental resize, order-statistic sorted sets, a TTL heap,
// and a CRC-checked snapshot file.  The only off-thread work is dropping
// outsized sorted sets.

pub mod cache;
pub mod clock;
pub mod config;
pub mod destroyer;
pub mod display;
pub mod ds;
pub mod hashfn;
pub mod net;
pub mod snapshot;
pub mod wire;

// ─────────────────────────────────────────────────────────────────────────────
// Primary entry points.
// ─────────────────────────────────────────────────────────────────────────────

/// The keyspace: command execution, TTL eviction, snapshot save/load.
pub use cache::Cache;
/// The TCP server: binds, runs the event loop, owns the cache.
pub use net::Server;
/// Response serializer and protocol selector.
pub use wire::{OutBuf, Proto};
