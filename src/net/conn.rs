// conn.rs — Per-client connection: read buffer, outbound byte ring,
// response-slot pipeline, and the send path.
//
// Responses are serialized straight into a reserved region of the ring and
// tracked by a fixed-depth slot pipeline.  Bytes leave the socket strictly
// in slot order; a slot is recycled only when it is fully sent AND the
// kernel has acknowledged any zero-copy transmits it issued.  Large BIN
// responses opt into MSG_ZEROCOPY; everything else goes through a gathered
// sendmsg batching consecutive slots.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::errno::Errno;

use crate::config::{RBUF_SIZE, SLOT_COUNT, WBUF_SIZE};
use crate::net::pool::NO_CONN;
use crate::wire::outbuf::Proto;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Active,
    /// Close once every queued byte is on the wire.
    FlushClose,
    Close,
}

/// One response in the outbound ring.
#[derive(Clone, Copy, Default)]
pub struct Slot {
    /// Start of the response's contiguous region in `wbuf`.
    pub off: usize,
    /// Total bytes to transmit (BIN length prefix included).
    pub len: usize,
    /// Bytes wasted at the buffer end when this reservation wrapped to 0.
    pub gap: usize,
    pub sent: usize,
    /// Outstanding zero-copy transmits not yet acknowledged.
    pub pending_ops: u32,
    pub zero_copy: bool,
}

/// A granted write region; turned into a slot by [`Conn::commit`].
pub struct Reservation {
    pub off: usize,
    pub avail: usize,
    pub gap: usize,
}

pub enum ReadOutcome {
    /// Read until EAGAIN; buffered data may be waiting.
    Drained,
    /// The read buffer is packed full; process before reading on.
    Full,
    /// Peer closed, or the socket failed terminally.
    Eof,
}

pub enum FlushOutcome {
    /// Nothing left to send.
    Clean,
    /// Socket send buffer is full; subscribe to writability.
    Blocked,
    /// Head slot is fully sent but awaits zero-copy acknowledgements.
    AwaitAcks,
    Fatal,
}

enum SendResult {
    Sent(usize),
    WouldBlock,
    Error,
}

pub struct Conn {
    pub fd: OwnedFd,
    pub state: ConnState,
    /// Latched from the first byte of the first request.
    pub proto: Option<Proto>,
    pub zc_enabled: bool,

    pub rbuf: Box<[u8]>,
    /// Bytes of `rbuf` holding received data.
    pub rlen: usize,
    /// Parsing cursor: bytes before this are consumed.
    pub roff: usize,

    pub wbuf: Box<[u8]>,
    whead: usize,
    wtail: usize,
    /// Live bytes in the ring, wrap gaps included.
    wlive: usize,

    slots: [Slot; SLOT_COUNT],
    read_idx: usize,
    write_idx: usize,
    depth: usize,

    pub idle_start_us: u64,
    pub idle_prev: u32,
    pub idle_next: u32,
    pub index_in_active: usize,
    /// Whether the last epoll interest included writability.
    pub want_out: bool,

    /// Scratch (offset, len) argument ranges, reused across requests.
    pub argv: Vec<(u32, u32)>,
}

impl Conn {
    pub fn new(fd: OwnedFd, zc_enabled: bool, now_us: u64) -> Conn {
        Conn {
            fd,
            state: ConnState::Active,
            proto: None,
            zc_enabled,
            rbuf: vec![0u8; RBUF_SIZE].into_boxed_slice(),
            rlen: 0,
            roff: 0,
            wbuf: vec![0u8; WBUF_SIZE].into_boxed_slice(),
            whead: 0,
            wtail: 0,
            wlive: 0,
            slots: [Slot::default(); SLOT_COUNT],
            read_idx: 0,
            write_idx: 0,
            depth: 0,
            idle_start_us: now_us,
            idle_prev: NO_CONN,
            idle_next: NO_CONN,
            index_in_active: 0,
            want_out: false,
            argv: Vec::new(),
        }
    }

    // ── read side ───────────────────────────────────────────────────────

    /// Reads from the socket until EAGAIN, end of stream, or a packed
    /// buffer.  Compacts consumed bytes to the front when room runs out.
    pub fn fill(&mut self) -> ReadOutcome {
        loop {
            if self.rlen == self.rbuf.len() {
                if self.roff > 0 {
                    self.compact();
                    continue;
                }
                return ReadOutcome::Full;
            }
            match nix::unistd::read(self.fd.as_fd(), &mut self.rbuf[self.rlen..]) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(n) => self.rlen += n,
                Err(Errno::EAGAIN) => return ReadOutcome::Drained,
                Err(Errno::EINTR) => {}
                Err(_) => return ReadOutcome::Eof,
            }
        }
    }

    pub fn compact(&mut self) {
        if self.roff == 0 {
            return;
        }
        self.rbuf.copy_within(self.roff..self.rlen, 0);
        self.rlen -= self.roff;
        self.roff = 0;
    }

    // ── outbound ring ───────────────────────────────────────────────────

    pub fn pipeline_depth(&self) -> usize {
        self.depth
    }

    pub fn can_pipeline(&self) -> bool {
        self.depth < SLOT_COUNT
    }

    /// Grants the largest contiguous free region, wrapping to offset 0 (and
    /// recording the skipped gap) when the tail region is bigger than what
    /// is left at the head.  `None` means the ring must drain first.
    pub fn reserve(&self) -> Option<Reservation> {
        if self.depth == SLOT_COUNT || self.wlive == WBUF_SIZE {
            return None;
        }
        if self.depth == 0 {
            return Some(Reservation {
                off: 0,
                avail: WBUF_SIZE,
                gap: 0,
            });
        }
        if self.whead >= self.wtail {
            let end = WBUF_SIZE - self.whead;
            let begin = self.wtail;
            if end >= begin {
                if end == 0 {
                    return None;
                }
                Some(Reservation {
                    off: self.whead,
                    avail: end,
                    gap: 0,
                })
            } else {
                Some(Reservation {
                    off: 0,
                    avail: begin,
                    gap: end,
                })
            }
        } else {
            let avail = self.wtail - self.whead;
            if avail == 0 {
                return None;
            }
            Some(Reservation {
                off: self.whead,
                avail,
                gap: 0,
            })
        }
    }

    /// [`reserve`](Self::reserve), but only when at least `min` bytes fit.
    pub fn reserve_at_least(&self, min: usize) -> Option<Reservation> {
        self.reserve().filter(|r| r.avail >= min)
    }

    /// Turns a reservation carrying `bytes_used` serialized bytes into a
    /// live slot.
    pub fn commit(&mut self, res: Reservation, bytes_used: usize, zero_copy: bool) {
        debug_assert!(bytes_used <= res.avail);
        debug_assert!(self.depth < SLOT_COUNT);
        // An empty ring is always fully reset, so the grant started at 0.
        debug_assert!(self.depth > 0 || (self.whead == 0 && self.wtail == 0 && res.off == 0));
        self.slots[self.write_idx] = Slot {
            off: res.off,
            len: bytes_used,
            gap: res.gap,
            sent: 0,
            pending_ops: 0,
            zero_copy,
        };
        self.whead = (res.off + bytes_used) % WBUF_SIZE;
        self.wlive += res.gap + bytes_used;
        self.write_idx = (self.write_idx + 1) % SLOT_COUNT;
        self.depth += 1;
    }

    fn release_head(&mut self) {
        let s = self.slots[self.read_idx];
        debug_assert!(s.sent == s.len && s.pending_ops == 0);
        if s.gap > 0 {
            self.wtail = 0;
        }
        self.wtail = (self.wtail + s.len) % WBUF_SIZE;
        self.wlive -= s.gap + s.len;
        self.slots[self.read_idx] = Slot::default();
        self.read_idx = (self.read_idx + 1) % SLOT_COUNT;
        self.depth -= 1;
        if self.depth == 0 {
            self.whead = 0;
            self.wtail = 0;
            self.wlive = 0;
            self.read_idx = 0;
            self.write_idx = 0;
        }
    }

    pub fn has_unsent(&self) -> bool {
        (0..self.depth).any(|k| {
            let s = &self.slots[(self.read_idx + k) % SLOT_COUNT];
            s.sent < s.len
        })
    }

    pub fn awaiting_acks(&self) -> bool {
        (0..self.depth).any(|k| self.slots[(self.read_idx + k) % SLOT_COUNT].pending_ops > 0)
    }

    /// Applies `count` zero-copy acknowledgements head-first, spilling into
    /// younger slots.  Surplus acknowledgements are tolerated and logged.
    pub fn apply_completions(&mut self, mut count: u32) {
        let mut k = 0;
        while count > 0 && k < self.depth {
            let s = &mut self.slots[(self.read_idx + k) % SLOT_COUNT];
            let take = count.min(s.pending_ops);
            s.pending_ops -= take;
            count -= take;
            k += 1;
        }
        if count > 0 {
            crate::notify!(4, "spurious zero-copy completions: {}\n", count);
        }
    }

    // ── send path ───────────────────────────────────────────────────────

    /// Pushes queued slots onto the wire in order.  Stops at EAGAIN, at a
    /// head slot still waiting for zero-copy acknowledgements, or when the
    /// pipeline is empty.
    pub fn flush(&mut self) -> FlushOutcome {
        loop {
            if self.depth == 0 {
                return FlushOutcome::Clean;
            }
            let head = self.slots[self.read_idx];
            if head.sent == head.len {
                if head.pending_ops == 0 {
                    self.release_head();
                    continue;
                }
                return FlushOutcome::AwaitAcks;
            }
            let result = if head.zero_copy {
                self.send_zerocopy()
            } else {
                self.send_plain()
            };
            match result {
                SendResult::Sent(0) | SendResult::Error => return FlushOutcome::Fatal,
                SendResult::Sent(_) => {}
                SendResult::WouldBlock => return FlushOutcome::Blocked,
            }
        }
    }

    /// Gathered send over consecutive non-zero-copy slots.
    fn send_plain(&mut self) -> SendResult {
        let mut iov: [libc::iovec; SLOT_COUNT] = unsafe { std::mem::zeroed() };
        let mut cnt = 0usize;
        for k in 0..self.depth {
            let s = &self.slots[(self.read_idx + k) % SLOT_COUNT];
            if s.zero_copy {
                break;
            }
            debug_assert!(s.sent < s.len);
            iov[cnt] = libc::iovec {
                iov_base: unsafe { self.wbuf.as_ptr().add(s.off + s.sent) } as *mut libc::c_void,
                iov_len: s.len - s.sent,
            };
            cnt += 1;
        }
        debug_assert!(cnt > 0);
        match self.sendmsg(&iov[..cnt], 0) {
            SendResult::Sent(n) => {
                self.advance_sent(n);
                SendResult::Sent(n)
            }
            other => other,
        }
    }

    /// One MSG_ZEROCOPY transmit of the head slot's remaining bytes.  Each
    /// accepted transmit pins the buffer and bumps `pending_ops`.
    fn send_zerocopy(&mut self) -> SendResult {
        let s = self.slots[self.read_idx];
        let iov = [libc::iovec {
            iov_base: unsafe { self.wbuf.as_ptr().add(s.off + s.sent) } as *mut libc::c_void,
            iov_len: s.len - s.sent,
        }];
        match self.sendmsg(&iov, libc::MSG_ZEROCOPY) {
            SendResult::Sent(n) => {
                let head = &mut self.slots[self.read_idx];
                head.sent += n;
                head.pending_ops += 1;
                SendResult::Sent(n)
            }
            other => other,
        }
    }

    fn sendmsg(&self, iov: &[libc::iovec], extra_flags: libc::c_int) -> SendResult {
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = iov.len() as _;
        loop {
            let ret = unsafe {
                libc::sendmsg(
                    self.fd.as_raw_fd(),
                    &msg,
                    libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL | extra_flags,
                )
            };
            if ret >= 0 {
                return SendResult::Sent(ret as usize);
            }
            match Errno::last() {
                Errno::EAGAIN => return SendResult::WouldBlock,
                Errno::EINTR => {}
                _ => return SendResult::Error,
            }
        }
    }

    fn advance_sent(&mut self, mut n: usize) {
        let mut k = 0;
        while n > 0 {
            let s = &mut self.slots[(self.read_idx + k) % SLOT_COUNT];
            let take = n.min(s.len - s.sent);
            s.sent += take;
            n -= take;
            k += 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn ring_state(&self) -> (usize, usize, usize, usize) {
        (self.whead, self.wtail, self.wlive, self.depth)
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, k: usize) -> &Slot {
        &self.slots[(self.read_idx + k) % SLOT_COUNT]
    }

    #[cfg(test)]
    pub(crate) fn force_sent(&mut self, k: usize) {
        let idx = (self.read_idx + k) % SLOT_COUNT;
        self.slots[idx].sent = self.slots[idx].len;
    }

    #[cfg(test)]
    pub(crate) fn force_pending(&mut self, k: usize, ops: u32) {
        let idx = (self.read_idx + k) % SLOT_COUNT;
        self.slots[idx].pending_ops = ops;
    }

    #[cfg(test)]
    pub(crate) fn release_completed(&mut self) {
        while self.depth > 0 {
            let head = self.slots[self.read_idx];
            if head.sent == head.len && head.pending_ops == 0 {
                self.release_head();
            } else {
                break;
            }
        }
    }
}
