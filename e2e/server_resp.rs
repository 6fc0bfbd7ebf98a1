//! End-to-end suite over RESP: raw protocol bytes against a live server,
//! asserting exact reply encodings.

use std::io::{Read, Write};
use std::net::TcpStream;

#[path = "util.rs"]
mod util;
use util::TestServer;

fn send(stream: &mut TcpStream, msg: &[u8]) {
    stream.write_all(msg).expect("send");
}

fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).expect("read");
    buf
}

fn resp_cmd(args: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for a in args {
        out.extend(format!("${}\r\n", a.len()).into_bytes());
        out.extend(*a);
        out.extend(b"\r\n");
    }
    out
}

#[test]
fn ping_pongs_exactly() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    send(&mut c, b"*1\r\n$4\r\nPING\r\n");
    assert_eq!(read_exactly(&mut c, 7), b"+PONG\r\n");
}

#[test]
fn set_acknowledges_with_ok() {
    // The SET reply differs by protocol: +OK here, NIL under BIN.
    let srv = TestServer::start();
    let mut c = srv.connect();
    send(&mut c, &resp_cmd(&[b"SET", b"foo", b"bar"]));
    assert_eq!(read_exactly(&mut c, 5), b"+OK\r\n");
    send(&mut c, &resp_cmd(&[b"GET", b"foo"]));
    assert_eq!(read_exactly(&mut c, 9), b"$3\r\nbar\r\n");
    send(&mut c, &resp_cmd(&[b"GET", b"missing"]));
    assert_eq!(read_exactly(&mut c, 5), b"$-1\r\n");
}

#[test]
fn integers_and_errors() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    send(&mut c, &resp_cmd(&[b"DEL", b"nothing"]));
    assert_eq!(read_exactly(&mut c, 4), b":0\r\n");
    send(&mut c, &resp_cmd(&[b"BOGUS"]));
    assert_eq!(read_exactly(&mut c, 22), b"-ERR unknown command\r\n");
}

#[test]
fn doubles_use_general_format() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    send(&mut c, &resp_cmd(&[b"ZADD", b"lb", b"200", b"a"]));
    assert_eq!(read_exactly(&mut c, 4), b":1\r\n");
    send(&mut c, &resp_cmd(&[b"ZSCORE", b"lb", b"a"]));
    assert_eq!(read_exactly(&mut c, 9), b"$3\r\n200\r\n");
}

#[test]
fn zquery_array_counts_up_front() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    send(&mut c, &resp_cmd(&[b"ZADD", b"z", b"1", b"alpha"]));
    read_exactly(&mut c, 4);
    send(&mut c, &resp_cmd(&[b"ZADD", b"z", b"1", b"beta"]));
    read_exactly(&mut c, 4);
    send(&mut c, &resp_cmd(&[b"ZQUERY", b"z", b"1", b"", b"0", b"10"]));
    let want = b"*4\r\n$5\r\nalpha\r\n$1\r\n1\r\n$4\r\nbeta\r\n$1\r\n1\r\n";
    assert_eq!(read_exactly(&mut c, want.len()), want);
}

#[test]
fn malformed_resp_gets_error_then_close() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    // Array header claims one bulk but the bulk terminator is wrong.
    send(&mut c, b"*1\r\n$4\r\nPINGxy");
    let mut buf = Vec::new();
    c.read_to_end(&mut buf).expect("server flushes error then closes");
    assert_eq!(&buf, b"-ERR protocol error\r\n");
}

#[test]
fn pipelined_resp_requests_answer_in_order() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    let mut batch = Vec::new();
    batch.extend(resp_cmd(&[b"SET", b"a", b"1"]));
    batch.extend(resp_cmd(&[b"SET", b"b", b"2"]));
    batch.extend(resp_cmd(&[b"GET", b"a"]));
    batch.extend(resp_cmd(&[b"GET", b"b"]));
    send(&mut c, &batch);
    let want = b"+OK\r\n+OK\r\n$1\r\n1\r\n$1\r\n2\r\n";
    assert_eq!(read_exactly(&mut c, want.len()), want);
}
