// Wire layer: message identification / argument extraction on the way in,
// protocol-aware response serialization on the way out.

pub mod framer;
pub mod outbuf;

pub use framer::{identify, split_args, FrameStatus, ParseError};
pub use outbuf::{OutBuf, Proto};
