// zerocopy.rs — MSG_ZEROCOPY enablement and completion draining.
//
// A zero-copy transmit pins the user buffer until the kernel reports the
// DMA finished.  Completions arrive out-of-band on the socket error queue
// as `sock_extended_err` records carrying an inclusive range of operation
// ids `[ee_info, ee_data]`.  TCP ordering plus strictly-ordered submission
// means completions apply to ring slots head-first; the connection spreads
// each range's count across its pipeline.

use std::os::fd::RawFd;

// Stable kernel ABI values (linux/errqueue.h).
const SO_EE_ORIGIN_ZEROCOPY: u8 = 5;

/// Best-effort SO_ZEROCOPY enablement.  Failure simply downgrades the
/// connection to plain sends.
pub fn enable(fd: RawFd) -> bool {
    let one: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ZEROCOPY,
            std::ptr::addr_of!(one).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    ret == 0
}

/// Drains every queued completion notification, invoking `apply` with the
/// operation count of each zero-copy range.  Non-zero-copy error-queue
/// records are ignored.
pub fn drain_completions(fd: RawFd, mut apply: impl FnMut(u32)) {
    loop {
        let mut control = [0u8; 256];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = control.len() as _;

        let ret =
            unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT) };
        if ret < 0 {
            // EAGAIN: queue drained.  Anything else surfaces on the next
            // read or write of the socket proper.
            return;
        }

        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let hdr = unsafe { &*cmsg };
            let is_recverr = (hdr.cmsg_level == libc::SOL_IP && hdr.cmsg_type == libc::IP_RECVERR)
                || (hdr.cmsg_level == libc::SOL_IPV6 && hdr.cmsg_type == libc::IPV6_RECVERR);
            if is_recverr {
                let err = unsafe { &*(libc::CMSG_DATA(cmsg) as *const libc::sock_extended_err) };
                if err.ee_origin == SO_EE_ORIGIN_ZEROCOPY {
                    // Inclusive range of operation ids.
                    let count = err.ee_data.wrapping_sub(err.ee_info).wrapping_add(1);
                    apply(count);
                } else {
                    crate::notify!(4, "ignoring error-queue record origin {}\n", err.ee_origin);
                }
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }
    }
}
