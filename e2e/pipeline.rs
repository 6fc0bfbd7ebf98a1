//! Pipelining pressure: many frames in flight, slot-ring wraparound, and
//! strict response ordering.

use std::io::Write;

#[path = "util.rs"]
mod util;
use util::{bin_request, decode, read_bin_response, TestServer, Val};

#[test]
fn fifty_pipelined_requests_answer_in_order() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    let mut batch = Vec::new();
    for i in 0..50u32 {
        let key = format!("k{i}");
        let val = format!("v{i}");
        batch.extend(bin_request(&[b"SET", key.as_bytes(), val.as_bytes()]));
        batch.extend(bin_request(&[b"GET", key.as_bytes()]));
    }
    c.write_all(&batch).expect("pipelined batch");
    for i in 0..50u32 {
        let set_reply = read_bin_response(&mut c);
        assert_eq!(decode(&set_reply).0, Val::Nil, "SET #{i}");
        let get_reply = read_bin_response(&mut c);
        assert_eq!(
            decode(&get_reply).0,
            Val::Str(format!("v{i}").into_bytes()),
            "GET #{i}"
        );
    }
}

#[test]
fn deep_pipeline_exceeding_slot_count_back_pressures_cleanly() {
    // Far more outstanding requests than response slots: parsing must pause
    // while the ring drains, and every reply must still arrive in order.
    let srv = TestServer::start();
    let mut c = srv.connect();
    let rounds = 400u32;
    let mut batch = Vec::new();
    for i in 0..rounds {
        let key = format!("deep:{i}");
        batch.extend(bin_request(&[b"SET", key.as_bytes(), b"x"]));
    }
    c.write_all(&batch).expect("deep batch");
    for i in 0..rounds {
        let reply = read_bin_response(&mut c);
        assert_eq!(decode(&reply).0, Val::Nil, "SET #{i}");
    }
    assert_eq!(
        util::request(&mut c, &[b"GET", b"deep:399"]),
        Val::Str(b"x".to_vec())
    );
}

#[test]
fn ring_wraparound_with_mixed_sizes() {
    // Alternating large and small responses force wrapped reservations and
    // gap bookkeeping while the pipeline stays busy.
    let srv = TestServer::start();
    let mut c = srv.connect();
    let big: Vec<u8> = vec![0xAB; 40_000];
    assert_eq!(util::request(&mut c, &[b"SET", b"big", &big]), Val::Nil);
    let mut batch = Vec::new();
    for _ in 0..12 {
        batch.extend(bin_request(&[b"GET", b"big"]));
        batch.extend(bin_request(&[b"PING"]));
    }
    c.write_all(&batch).expect("mixed batch");
    for _ in 0..12 {
        let reply = read_bin_response(&mut c);
        assert_eq!(decode(&reply).0, Val::Str(big.clone()));
        let pong = read_bin_response(&mut c);
        assert_eq!(decode(&pong).0, Val::Str(b"PONG".to_vec()));
    }
}

#[test]
fn interleaved_connections_do_not_cross_streams() {
    let srv = TestServer::start();
    let mut c1 = srv.connect();
    let mut c2 = srv.connect();
    assert_eq!(util::request(&mut c1, &[b"SET", b"who", b"one"]), Val::Nil);
    assert_eq!(
        util::request(&mut c2, &[b"GET", b"who"]),
        Val::Str(b"one".to_vec())
    );
    assert_eq!(util::request(&mut c2, &[b"SET", b"who", b"two"]), Val::Nil);
    assert_eq!(
        util::request(&mut c1, &[b"GET", b"who"]),
        Val::Str(b"two".to_vec())
    );
}
