// config.rs — Compile-time configuration constants.
//
// Every tunable of the server lives here: wire-format limits, per-connection
// buffer geometry, the zero-copy threshold, eviction batch sizes, and the
// snapshot file location.  Runtime overrides (port, verbosity, snapshot path)
// come from the CLI and from the MINIKV_DB environment variable; everything
// else is fixed at build time.

/// Largest accepted request payload, in bytes.  A BIN frame whose length
/// prefix exceeds this is rejected with a too-big error; a RESP array whose
/// encoding runs past this limit is rejected the same way.  Responses are
/// bounded separately by the outbound ring capacity.
pub const MAX_MSG: usize = 64 * 1024;

/// Maximum number of arguments a single request may carry.
pub const MAX_ARGS: usize = 1024;

/// Per-connection read buffer capacity.  Must hold one complete frame:
/// the BIN header (4 bytes) plus `MAX_MSG` payload, with slack for the tail
/// of a following pipelined request.
pub const RBUF_SIZE: usize = MAX_MSG + 4096;

/// Per-connection outbound byte ring capacity.
pub const WBUF_SIZE: usize = 256 * 1024;

/// Depth of the per-connection response-slot pipeline.
pub const SLOT_COUNT: usize = 16;

/// Responses larger than this (BIN protocol only) are submitted with
/// `MSG_ZEROCOPY`; their ring slot is held until the kernel acknowledges the
/// transmit.
pub const ZEROCOPY_THRESHOLD: usize = 16 * 1024;

/// A connection idle longer than this is closed by the event loop.
pub const IDLE_TIMEOUT_US: u64 = 30_000_000;

/// Listening port when `-p` is not given.
pub const DEFAULT_PORT: u16 = 1234;

/// Old-table slots migrated per mutating or lookup call while an incremental
/// hash-map resize is in flight.
pub const REHASH_WORK: usize = 128;

/// Upper bound on entries destroyed by one active-eviction sweep, so a burst
/// of simultaneous expirations cannot stall the event loop.
pub const EVICT_MAX_PER_CALL: usize = 2_000;

/// Sorted sets with more members than this are handed to the destruction
/// worker pool instead of being freed on the event-loop thread.
pub const LARGE_CONTAINER_SIZE: usize = 10_000;

/// Smallest outbound-ring region worth reserving.  Guarantees that an error
/// frame always fits in whatever region a command was handed.
pub const MIN_RESERVE: usize = 128;

/// Default snapshot file path.
pub const DEFAULT_DB_PATH: &str = "minikv.db";

/// Environment variable overriding [`DEFAULT_DB_PATH`].
pub const DB_PATH_ENV: &str = "MINIKV_DB";

/// Returns the snapshot path, honoring the MINIKV_DB override.
pub fn db_path() -> std::path::PathBuf {
    match std::env::var_os(DB_PATH_ENV) {
        Some(p) if !p.is_empty() => std::path::PathBuf::from(p),
        _ => std::path::PathBuf::from(DEFAULT_DB_PATH),
    }
}
