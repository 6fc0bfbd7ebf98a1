//! Shared scaffolding for the end-to-end suites: an in-process server on an
//! ephemeral port, a tiny BIN-protocol client, and a response decoder.
//!
//! Included per-suite via `#[path]`, so each suite uses a subset.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use minikv::{Cache, Server};

pub struct TestServer {
    pub port: u16,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    pub fn start() -> TestServer {
        TestServer::with_cache(Cache::new())
    }

    pub fn with_cache(cache: Cache) -> TestServer {
        minikv::display::set_display_level(0);
        let stop = Arc::new(AtomicBool::new(false));
        let mut server = Server::bind(0, cache, Arc::clone(&stop)).expect("bind ephemeral port");
        let port = server.local_port();
        let handle = std::thread::spawn(move || server.run());
        TestServer {
            port,
            stop,
            handle: Some(handle),
        }
    }

    pub fn connect(&self) -> TcpStream {
        let s = TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        s.set_nodelay(true).expect("nodelay");
        s
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

// ── BIN protocol client ─────────────────────────────────────────────────

/// Encodes one BIN request frame.
pub fn bin_request(args: &[&[u8]]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend((args.len() as u32).to_be_bytes());
    for a in args {
        payload.extend((a.len() as u32).to_be_bytes());
        payload.extend(*a);
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend((payload.len() as u32).to_be_bytes());
    frame.extend(payload);
    frame
}

/// Reads one length-prefixed BIN response payload.
pub fn read_bin_response(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).expect("response header");
    let len = u32::from_be_bytes(head) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("response payload");
    payload
}

/// One round trip: send a request, decode the reply.
pub fn request(stream: &mut TcpStream, args: &[&[u8]]) -> Val {
    stream.write_all(&bin_request(args)).expect("send");
    let payload = read_bin_response(stream);
    let (val, used) = decode(&payload);
    assert_eq!(used, payload.len(), "trailing bytes in response");
    val
}

/// Decoded BIN response value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Nil,
    Err(u32, String),
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Val>),
}

pub fn decode(buf: &[u8]) -> (Val, usize) {
    match buf[0] {
        0x00 => (Val::Nil, 1),
        0x01 => {
            let code = u32::from_be_bytes(buf[1..5].try_into().unwrap());
            let len = u32::from_be_bytes(buf[5..9].try_into().unwrap()) as usize;
            let msg = String::from_utf8(buf[9..9 + len].to_vec()).unwrap();
            (Val::Err(code, msg), 9 + len)
        }
        0x02 => {
            let len = u32::from_be_bytes(buf[1..5].try_into().unwrap()) as usize;
            (Val::Str(buf[5..5 + len].to_vec()), 5 + len)
        }
        0x03 => {
            let v = i64::from_be_bytes(buf[1..9].try_into().unwrap());
            (Val::Int(v), 9)
        }
        0x04 => {
            let v = f64::from_ne_bytes(buf[1..9].try_into().unwrap());
            (Val::Dbl(v), 9)
        }
        0x05 => {
            let n = u32::from_be_bytes(buf[1..5].try_into().unwrap()) as usize;
            let mut pos = 5;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                let (v, used) = decode(&buf[pos..]);
                items.push(v);
                pos += used;
            }
            (Val::Arr(items), pos)
        }
        tag => panic!("unknown response tag {tag:#x}"),
    }
}
