// clock.rs — Monotonic microsecond clock.
//
// All TTL arithmetic and idle accounting runs on a single monotonic
// timebase anchored at first use.  `std::time::Instant` is monotonic and
// MT-safe on every supported platform.  The absolute values are meaningful
// only within one process lifetime; snapshots store them verbatim (see the
// snapshot module docs for the consequences).

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed since the process clock epoch.  Never returns 0 for
/// any instant after the very first call, so `0` remains free as the
/// "no TTL" sentinel in entry timestamps.
#[inline]
pub fn now_us() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }
}
