// framer.rs — Dual-protocol message identification and argument extraction.
//
// The first byte of a connection's unread data picks the protocol: `*`
// starts a RESP array, anything else is a BIN frame with a 4-byte
// network-order length prefix.  Identification scans for one complete
// message without consuming anything; extraction records `(offset, len)`
// ranges into the read buffer, so arguments are zero-copy slices and the
// buffer is byte-identical to what arrived both during and after dispatch.

use crate::config::{MAX_ARGS, MAX_MSG};
use crate::wire::outbuf::Proto;

/// Outcome of scanning the unread region for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// More bytes are needed.
    Incomplete,
    /// The bytes cannot be a legal message; the connection is beyond repair.
    Invalid,
    /// The message (or one of its fields) exceeds the configured limits.
    TooBig,
    /// One whole message of `total` bytes, in the given protocol.
    Msg { total: usize, proto: Proto },
}

/// Argument-extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Framing that passed identification but whose payload is inconsistent.
    Malformed,
    /// More than [`MAX_ARGS`] arguments.
    TooManyArgs,
}

/// Scans `buf` (the unread region) for one complete message.
pub fn identify(buf: &[u8]) -> FrameStatus {
    match buf.first() {
        None => FrameStatus::Incomplete,
        Some(b'*') => identify_resp(buf),
        Some(_) => identify_bin(buf),
    }
}

fn identify_bin(buf: &[u8]) -> FrameStatus {
    if buf.len() < 4 {
        return FrameStatus::Incomplete;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MSG {
        return FrameStatus::TooBig;
    }
    if buf.len() < 4 + len {
        return FrameStatus::Incomplete;
    }
    FrameStatus::Msg {
        total: 4 + len,
        proto: Proto::Bin,
    }
}

enum Scan {
    Incomplete,
    Invalid,
}

/// Reads an unsigned decimal terminated by `\r\n`.  Returns the value and
/// the position just past the terminator.
fn read_decimal(buf: &[u8], mut pos: usize) -> Result<(u64, usize), Scan> {
    let start = pos;
    let mut v: u64 = 0;
    while pos < buf.len() && buf[pos].is_ascii_digit() {
        // 10 digits cover every in-range value; anything longer is garbage.
        if pos - start >= 10 {
            return Err(Scan::Invalid);
        }
        v = v * 10 + u64::from(buf[pos] - b'0');
        pos += 1;
    }
    if pos == start {
        if pos == buf.len() {
            return Err(Scan::Incomplete);
        }
        return Err(Scan::Invalid);
    }
    if pos == buf.len() {
        return Err(Scan::Incomplete);
    }
    if buf[pos] != b'\r' {
        return Err(Scan::Invalid);
    }
    if pos + 1 == buf.len() {
        return Err(Scan::Incomplete);
    }
    if buf[pos + 1] != b'\n' {
        return Err(Scan::Invalid);
    }
    Ok((v, pos + 2))
}

fn identify_resp(buf: &[u8]) -> FrameStatus {
    debug_assert_eq!(buf[0], b'*');
    let (argc, mut pos) = match read_decimal(buf, 1) {
        Ok(v) => v,
        Err(Scan::Incomplete) => return FrameStatus::Incomplete,
        Err(Scan::Invalid) => return FrameStatus::Invalid,
    };
    if argc == 0 {
        return FrameStatus::Invalid;
    }
    if argc as usize > MAX_ARGS {
        return FrameStatus::TooBig;
    }
    for _ in 0..argc {
        if pos > MAX_MSG {
            return FrameStatus::TooBig;
        }
        if pos == buf.len() {
            return FrameStatus::Incomplete;
        }
        if buf[pos] != b'$' {
            return FrameStatus::Invalid;
        }
        let (blen, next) = match read_decimal(buf, pos + 1) {
            Ok(v) => v,
            Err(Scan::Incomplete) => return FrameStatus::Incomplete,
            Err(Scan::Invalid) => return FrameStatus::Invalid,
        };
        if blen as usize > MAX_MSG {
            return FrameStatus::TooBig;
        }
        let end = next + blen as usize;
        // Whole-message cap: the encoding itself must stay within MAX_MSG.
        if end + 2 > MAX_MSG {
            return FrameStatus::TooBig;
        }
        if buf.len() < end + 2 {
            return FrameStatus::Incomplete;
        }
        if buf[end] != b'\r' || buf[end + 1] != b'\n' {
            return FrameStatus::Invalid;
        }
        pos = end + 2;
    }
    FrameStatus::Msg {
        total: pos,
        proto: Proto::Resp,
    }
}

/// Extracts the argument ranges of one identified frame.  `frame` is exactly
/// the `total` bytes reported by [`identify`]; ranges index into it.  The
/// scratch vector is cleared and reused across requests.
pub fn split_args(
    frame: &[u8],
    proto: Proto,
    argv: &mut Vec<(u32, u32)>,
) -> Result<(), ParseError> {
    argv.clear();
    match proto {
        Proto::Bin => split_bin(frame, argv),
        Proto::Resp => split_resp(frame, argv),
    }
}

fn split_bin(frame: &[u8], argv: &mut Vec<(u32, u32)>) -> Result<(), ParseError> {
    if frame.len() < 8 {
        return Err(ParseError::Malformed);
    }
    let payload_end = frame.len();
    let argc = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    if argc == 0 {
        return Err(ParseError::Malformed);
    }
    if argc > MAX_ARGS {
        return Err(ParseError::TooManyArgs);
    }
    let mut pos = 8;
    for _ in 0..argc {
        if pos + 4 > payload_end {
            return Err(ParseError::Malformed);
        }
        let alen =
            u32::from_be_bytes([frame[pos], frame[pos + 1], frame[pos + 2], frame[pos + 3]])
                as usize;
        pos += 4;
        if pos + alen > payload_end {
            return Err(ParseError::Malformed);
        }
        argv.push((pos as u32, alen as u32));
        pos += alen;
    }
    if pos != payload_end {
        // Trailing garbage inside the declared payload.
        return Err(ParseError::Malformed);
    }
    Ok(())
}

fn split_resp(frame: &[u8], argv: &mut Vec<(u32, u32)>) -> Result<(), ParseError> {
    // Identification already validated the shape; this re-walk only
    // collects offsets and re-checks cheaply.
    let (argc, mut pos) = read_decimal(frame, 1).map_err(|_| ParseError::Malformed)?;
    if argc as usize > MAX_ARGS {
        return Err(ParseError::TooManyArgs);
    }
    for _ in 0..argc {
        if frame.get(pos) != Some(&b'$') {
            return Err(ParseError::Malformed);
        }
        let (blen, next) = read_decimal(frame, pos + 1).map_err(|_| ParseError::Malformed)?;
        let end = next + blen as usize;
        if frame.len() < end + 2 {
            return Err(ParseError::Malformed);
        }
        argv.push((next as u32, blen as u32));
        pos = end + 2;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin_frame(args: &[&[u8]]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend((args.len() as u32).to_be_bytes());
        for a in args {
            payload.extend((a.len() as u32).to_be_bytes());
            payload.extend(*a);
        }
        let mut frame = Vec::new();
        frame.extend((payload.len() as u32).to_be_bytes());
        frame.extend(payload);
        frame
    }

    fn args_of<'a>(frame: &'a [u8], proto: Proto) -> Vec<&'a [u8]> {
        let mut ranges = Vec::new();
        split_args(frame, proto, &mut ranges).unwrap();
        ranges
            .iter()
            .map(|&(off, len)| &frame[off as usize..(off + len) as usize])
            .collect()
    }

    #[test]
    fn bin_roundtrip() {
        let frame = bin_frame(&[b"SET", b"foo", b"bar"]);
        match identify(&frame) {
            FrameStatus::Msg { total, proto } => {
                assert_eq!(total, frame.len());
                assert_eq!(proto, Proto::Bin);
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(args_of(&frame, Proto::Bin), [b"SET" as &[u8], b"foo", b"bar"]);
    }

    #[test]
    fn bin_incomplete_then_complete() {
        let frame = bin_frame(&[b"PING"]);
        for cut in 0..frame.len() {
            assert_eq!(identify(&frame[..cut]), FrameStatus::Incomplete, "cut {cut}");
        }
        assert!(matches!(identify(&frame), FrameStatus::Msg { .. }));
    }

    #[test]
    fn bin_length_cap() {
        // Exactly MAX_MSG parses; one more byte is rejected.
        let mut frame = vec![0u8; 4 + MAX_MSG];
        frame[..4].copy_from_slice(&(MAX_MSG as u32).to_be_bytes());
        // Interior structure: 1 arg spanning the rest.
        frame[4..8].copy_from_slice(&1u32.to_be_bytes());
        frame[8..12].copy_from_slice(&((MAX_MSG - 8) as u32).to_be_bytes());
        assert!(matches!(identify(&frame), FrameStatus::Msg { .. }));
        let mut ranges = Vec::new();
        assert!(split_args(&frame, Proto::Bin, &mut ranges).is_ok());

        let mut too_big = vec![0u8; 8];
        too_big[..4].copy_from_slice(&((MAX_MSG + 1) as u32).to_be_bytes());
        assert_eq!(identify(&too_big), FrameStatus::TooBig);
    }

    #[test]
    fn bin_payload_mismatch_is_malformed() {
        let mut frame = bin_frame(&[b"GET", b"k"]);
        // Claim one more argument than the payload carries.
        let len = frame.len();
        frame[4..8].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(identify(&frame[..len]), FrameStatus::Msg { .. }));
        let mut ranges = Vec::new();
        assert_eq!(
            split_args(&frame, Proto::Bin, &mut ranges),
            Err(ParseError::Malformed)
        );
    }

    #[test]
    fn resp_ping() {
        let frame = b"*1\r\n$4\r\nPING\r\n";
        match identify(frame) {
            FrameStatus::Msg { total, proto } => {
                assert_eq!(total, frame.len());
                assert_eq!(proto, Proto::Resp);
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(args_of(frame, Proto::Resp), [b"PING" as &[u8]]);
    }

    #[test]
    fn resp_incomplete_prefixes() {
        let frame = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        for cut in 1..frame.len() {
            assert_eq!(
                identify(&frame[..cut]),
                FrameStatus::Incomplete,
                "cut {cut}"
            );
        }
        assert!(matches!(identify(frame), FrameStatus::Msg { .. }));
    }

    #[test]
    fn resp_strict_terminators() {
        assert_eq!(identify(b"*1\r\n$4\r\nPINGxx"), FrameStatus::Invalid);
        assert_eq!(identify(b"*1\n$4\r\nPING\r\n"), FrameStatus::Invalid);
        assert_eq!(identify(b"*x\r\n"), FrameStatus::Invalid);
        assert_eq!(identify(b"*1\r\n#4\r\nPING\r\n"), FrameStatus::Invalid);
        assert_eq!(identify(b"*0\r\n"), FrameStatus::Invalid);
    }

    #[test]
    fn resp_arg_count_cap() {
        let huge = format!("*{}\r\n", MAX_ARGS + 1);
        assert_eq!(identify(huge.as_bytes()), FrameStatus::TooBig);
    }

    #[test]
    fn parse_leaves_input_untouched() {
        let frame = bin_frame(&[b"ZADD", b"lb", b"100", b"alice"]);
        let before = frame.clone();
        let mut ranges = Vec::new();
        split_args(&frame, Proto::Bin, &mut ranges).unwrap();
        assert_eq!(frame, before);

        let resp = b"*2\r\n$4\r\nPING\r\n$2\r\nhi\r\n".to_vec();
        let before = resp.clone();
        split_args(&resp, Proto::Resp, &mut ranges).unwrap();
        assert_eq!(resp, before);
    }

    #[test]
    fn first_byte_latches_protocol() {
        assert!(matches!(
            identify(b"*1\r\n$1\r\na\r\n"),
            FrameStatus::Msg {
                proto: Proto::Resp,
                ..
            }
        ));
        let frame = bin_frame(&[b"a"]);
        assert!(matches!(
            identify(&frame),
            FrameStatus::Msg {
                proto: Proto::Bin,
                ..
            }
        ));
    }
}
