// event_loop.rs — Edge-triggered event loop driving every connection.
//
// One thread, one epoll instance.  Readiness dispatch per connection:
// completions are drained on error events, reads run to EAGAIN, complete
// frames are parsed and executed straight into reserved ring regions, and
// the send path pushes slots out in order.  Between dispatches the loop
// closes idle connections and runs active TTL eviction; the wait timeout is
// the nearer of the idle head's deadline and the next expiry.

use std::io;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::cache::Cache;
use crate::clock;
use crate::config::{IDLE_TIMEOUT_US, MIN_RESERVE, ZEROCOPY_THRESHOLD};
use crate::net::conn::{Conn, ConnState, FlushOutcome, ReadOutcome};
use crate::net::pool::{ConnPool, IdleList};
use crate::net::zerocopy;
use crate::notify;
use crate::wire::outbuf::{OutBuf, Proto, ERR_2BIG, ERR_MALFORMED, ERR_UNKNOWN};
use crate::wire::{identify, split_args, FrameStatus, ParseError};

const LISTENER_TOKEN: u64 = u64::MAX;

/// Largest epoll wait, so the loop stays responsive to the stop flag even
/// with no timers pending.
const MAX_WAIT_MS: u64 = 500;

fn into_io(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

pub struct Server {
    epoll: Epoll,
    listener: TcpListener,
    pool: ConnPool,
    idle: IdleList,
    cache: Cache,
    stop: Arc<AtomicBool>,
}

impl Server {
    /// Binds the listener (port 0 picks an ephemeral port) and registers it
    /// with a fresh epoll instance.
    pub fn bind(port: u16, cache: Cache, stop: Arc<AtomicBool>) -> io::Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(into_io)?;
        epoll
            .add(
                listener.as_fd(),
                EpollEvent::new(EpollFlags::EPOLLIN | EpollFlags::EPOLLET, LISTENER_TOKEN),
            )
            .map_err(into_io)?;
        Ok(Server {
            epoll,
            listener,
            pool: ConnPool::new(),
            idle: IdleList::new(),
            cache,
            stop,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn into_cache(self) -> Cache {
        self.cache
    }

    /// Runs until the stop flag is raised.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = vec![EpollEvent::empty(); 256];
        loop {
            if self.stop.load(Ordering::Relaxed) {
                notify!(2, "stop requested, leaving event loop\n");
                return Ok(());
            }
            let timeout_ms = self.next_timeout_ms();
            let n = match self.epoll.wait(&mut events, EpollTimeout::from(timeout_ms)) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(into_io(e)),
            };
            let now = clock::now_us();
            for ev in &events[..n] {
                if ev.data() == LISTENER_TOKEN {
                    self.accept_ready(now);
                } else {
                    self.conn_ready(ev.data() as u32, ev.events(), now);
                }
            }
            let now = clock::now_us();
            self.expire_idle(now);
            self.cache.evict(now);
        }
    }

    fn next_timeout_ms(&self) -> u16 {
        let now = clock::now_us();
        let mut deadline = self.cache.next_expiry();
        if let Some(head) = self.idle.head() {
            if let Some(c) = self.pool.get(head) {
                deadline = deadline.min(c.idle_start_us + IDLE_TIMEOUT_US);
            }
        }
        if deadline == u64::MAX {
            return MAX_WAIT_MS as u16;
        }
        let ms = deadline.saturating_sub(now).div_ceil(1000);
        ms.min(MAX_WAIT_MS) as u16
    }

    // ── accept path ─────────────────────────────────────────────────────

    fn accept_ready(&mut self, now_us: u64) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.setup_conn(stream, now_us) {
                    Ok(()) => notify!(3, "accepted connection from {}\n", peer),
                    Err(e) => notify!(1, "dropping fresh connection: {}\n", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    notify!(1, "accept failed: {}\n", e);
                    break;
                }
            }
        }
    }

    fn setup_conn(&mut self, stream: TcpStream, now_us: u64) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let fd: OwnedFd = stream.into();
        let zc_enabled = zerocopy::enable(fd.as_raw_fd());
        let idx = self.pool.insert(Conn::new(fd, zc_enabled, now_us));
        let conn = self.pool.get(idx).expect("freshly inserted connection");
        let event = EpollEvent::new(
            EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLET,
            u64::from(idx),
        );
        if let Err(e) = self.epoll.add(conn.fd.as_fd(), event) {
            self.pool.remove(idx);
            return Err(into_io(e));
        }
        self.idle.push_tail(&mut self.pool, idx);
        Ok(())
    }

    // ── per-connection dispatch ─────────────────────────────────────────

    fn conn_ready(&mut self, idx: u32, flags: EpollFlags, now_us: u64) {
        if self.pool.get(idx).is_none() {
            // Stale event for a connection closed earlier in this batch.
            return;
        }
        {
            let conn = self.pool.get_mut(idx).expect("checked above");
            conn.idle_start_us = now_us;
        }
        self.idle.touch(&mut self.pool, idx);

        if flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP) {
            self.close_conn(idx);
            return;
        }
        if flags.contains(EpollFlags::EPOLLERR) {
            let conn = self.pool.get_mut(idx).expect("live connection");
            let fd = conn.fd.as_raw_fd();
            zerocopy::drain_completions(fd, |count| conn.apply_completions(count));
        }
        if flags.contains(EpollFlags::EPOLLIN) && !self.read_phase(idx, now_us) {
            return;
        }
        self.pump(idx, now_us);
    }

    /// Reads to EAGAIN, processing in place whenever the buffer packs full
    /// (pipelined peers can outpace one buffer's worth).  Returns `false`
    /// when the connection was closed.
    fn read_phase(&mut self, idx: u32, now_us: u64) -> bool {
        loop {
            let outcome = self.pool.get_mut(idx).expect("live connection").fill();
            match outcome {
                ReadOutcome::Eof => {
                    self.close_conn(idx);
                    return false;
                }
                ReadOutcome::Drained => return true,
                ReadOutcome::Full => {
                    let conn = self.pool.get_mut(idx).expect("live connection");
                    process_input(conn, &mut self.cache, now_us);
                    if conn.state == ConnState::Close {
                        self.close_conn(idx);
                        return false;
                    }
                    if conn.roff == 0 && conn.rlen == conn.rbuf.len() {
                        // Nothing consumed: the pipeline is saturated.
                        // Leave the rest in the kernel until slots drain.
                        return true;
                    }
                }
            }
        }
    }

    /// Alternates parsing and sending until neither makes progress, then
    /// refreshes epoll interest.
    fn pump(&mut self, idx: u32, now_us: u64) {
        let mut want_out = false;
        loop {
            {
                let conn = self.pool.get_mut(idx).expect("live connection");
                if conn.awaiting_acks() {
                    let fd = conn.fd.as_raw_fd();
                    zerocopy::drain_completions(fd, |count| conn.apply_completions(count));
                }
            }
            let before = {
                let conn = self.pool.get(idx).expect("live connection");
                (conn.roff, conn.rlen, conn.pipeline_depth(), conn.state)
            };
            process_input(
                self.pool.get_mut(idx).expect("live connection"),
                &mut self.cache,
                now_us,
            );
            let outcome = self.pool.get_mut(idx).expect("live connection").flush();
            let conn = self.pool.get_mut(idx).expect("live connection");
            match outcome {
                FlushOutcome::Fatal => {
                    self.close_conn(idx);
                    return;
                }
                FlushOutcome::Blocked => want_out = true,
                FlushOutcome::Clean | FlushOutcome::AwaitAcks => want_out = false,
            }
            if conn.state == ConnState::Close {
                self.close_conn(idx);
                return;
            }
            if conn.state == ConnState::FlushClose && conn.pipeline_depth() == 0 {
                self.close_conn(idx);
                return;
            }
            let after = (conn.roff, conn.rlen, conn.pipeline_depth(), conn.state);
            if after == before {
                break;
            }
        }
        self.update_interest(idx, want_out);
    }

    fn update_interest(&mut self, idx: u32, want_out: bool) {
        let conn = self.pool.get_mut(idx).expect("live connection");
        if conn.want_out == want_out {
            return;
        }
        conn.want_out = want_out;
        let mut flags = EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP | EpollFlags::EPOLLET;
        if want_out {
            flags |= EpollFlags::EPOLLOUT;
        }
        let mut event = EpollEvent::new(flags, u64::from(idx));
        if let Err(e) = self.epoll.modify(conn.fd.as_fd(), &mut event) {
            notify!(1, "epoll interest update failed: {}\n", e);
            self.close_conn(idx);
        }
    }

    fn close_conn(&mut self, idx: u32) {
        self.idle.detach(&mut self.pool, idx);
        let conn = self.pool.remove(idx);
        let _ = self.epoll.delete(conn.fd.as_fd());
        notify!(3, "closed connection fd {}\n", conn.fd.as_raw_fd());
        // Dropping the connection closes the socket and forfeits any
        // unsent bytes.
    }

    /// Closes connections whose idle deadline passed, oldest first.
    fn expire_idle(&mut self, now_us: u64) {
        while let Some(head) = self.idle.head() {
            let Some(conn) = self.pool.get(head) else { break };
            if conn.idle_start_us + IDLE_TIMEOUT_US > now_us {
                break;
            }
            notify!(3, "idle timeout on fd {}\n", conn.fd.as_raw_fd());
            self.close_conn(head);
        }
    }
}

// ── request processing ──────────────────────────────────────────────────

/// Parses and executes complete frames from the read buffer until the
/// pipeline fills, input runs dry, the ring back-pressures, or the
/// connection leaves the active state.
fn process_input(conn: &mut Conn, cache: &mut Cache, now_us: u64) {
    loop {
        if conn.state != ConnState::Active || !conn.can_pipeline() || conn.roff == conn.rlen {
            break;
        }
        // Sniff the protocol from the first byte up front so even a broken
        // first message gets its error in the right encoding.
        let sniff = if conn.rbuf[conn.roff] == b'*' {
            Proto::Resp
        } else {
            Proto::Bin
        };
        let (total, wire_proto) = match identify(&conn.rbuf[conn.roff..conn.rlen]) {
            FrameStatus::Incomplete => {
                conn.compact();
                break;
            }
            FrameStatus::TooBig => {
                conn.proto.get_or_insert(sniff);
                queue_error(conn, ERR_2BIG, "message too long");
                break;
            }
            FrameStatus::Invalid => {
                conn.proto.get_or_insert(sniff);
                queue_error(conn, ERR_MALFORMED, "protocol error");
                break;
            }
            FrameStatus::Msg { total, proto } => (total, proto),
        };
        // The first parsed message latches the reply protocol for good.
        let proto = *conn.proto.get_or_insert(wire_proto);

        let frame_start = conn.roff;
        let frame_end = frame_start + total;
        match split_args(
            &conn.rbuf[frame_start..frame_end],
            wire_proto,
            &mut conn.argv,
        ) {
            Ok(()) => {}
            Err(ParseError::TooManyArgs) => {
                queue_error(conn, ERR_2BIG, "too many arguments");
                break;
            }
            Err(ParseError::Malformed) => {
                queue_error(conn, ERR_MALFORMED, "protocol error");
                break;
            }
        }

        let Some(res) = conn.reserve_at_least(MIN_RESERVE) else {
            // Ring back-pressure: leave the frame unconsumed and retry once
            // sends drain.
            break;
        };
        let hdr = if proto == Proto::Bin { 4 } else { 0 };
        let mut overflowed = false;
        let bytes_used = {
            let frame = &conn.rbuf[frame_start..frame_end];
            let args: Vec<&[u8]> = conn
                .argv
                .iter()
                .map(|&(off, len)| &frame[off as usize..(off + len) as usize])
                .collect();
            let region = &mut conn.wbuf[res.off..res.off + res.avail];
            let mut out = OutBuf::new(&mut region[hdr..], proto);
            let mut ok = cache.execute(&args, now_us, &mut out);
            if !ok {
                // The command's output outgrew its region; replace it with
                // a structured error and flush the connection closed.
                out.reset();
                ok = out.err(ERR_UNKNOWN, "response too large");
                overflowed = true;
            }
            if !ok {
                conn.state = ConnState::Close;
                return;
            }
            let body = out.len();
            if proto == Proto::Bin {
                region[..4].copy_from_slice(&(body as u32).to_be_bytes());
            }
            hdr + body
        };
        let zero_copy = proto == Proto::Bin && conn.zc_enabled && bytes_used > ZEROCOPY_THRESHOLD;
        conn.commit(res, bytes_used, zero_copy);
        conn.roff = frame_end;
        if overflowed {
            conn.state = ConnState::FlushClose;
            break;
        }
    }
    if conn.roff == conn.rlen {
        conn.roff = 0;
        conn.rlen = 0;
    }
}

/// Queues a structured error as the connection's final response.  When not
/// even the error frame fits, the connection is abandoned outright.
fn queue_error(conn: &mut Conn, code: u32, msg: &str) {
    let proto = *conn.proto.get_or_insert(Proto::Bin);
    let Some(res) = conn.reserve_at_least(MIN_RESERVE) else {
        conn.state = ConnState::Close;
        return;
    };
    let hdr = if proto == Proto::Bin { 4 } else { 0 };
    let bytes_used = {
        let region = &mut conn.wbuf[res.off..res.off + res.avail];
        let mut out = OutBuf::new(&mut region[hdr..], proto);
        if !out.err(code, msg) {
            conn.state = ConnState::Close;
            return;
        }
        let body = out.len();
        if proto == Proto::Bin {
            region[..4].copy_from_slice(&(body as u32).to_be_bytes());
        }
        hdr + body
    };
    conn.commit(res, bytes_used, false);
    conn.state = ConnState::FlushClose;
}
