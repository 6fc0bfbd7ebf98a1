//! End-to-end suite over the BIN protocol: real sockets against a live
//! event loop.

use std::io::Write;
use std::time::Duration;

#[path = "util.rs"]
mod util;
use util::{bin_request, read_bin_response, request, TestServer, Val};

#[test]
fn set_then_get_returns_value() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    assert_eq!(request(&mut c, &[b"SET", b"foo", b"bar"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"GET", b"foo"]), Val::Str(b"bar".to_vec()));
    assert_eq!(request(&mut c, &[b"GET", b"missing"]), Val::Nil);
}

#[test]
fn del_and_mget() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"MSET", b"a", b"1", b"b", b"2"]);
    assert_eq!(
        request(&mut c, &[b"MGET", b"a", b"nope", b"b"]),
        Val::Arr(vec![
            Val::Str(b"1".to_vec()),
            Val::Nil,
            Val::Str(b"2".to_vec())
        ])
    );
    assert_eq!(request(&mut c, &[b"DEL", b"a"]), Val::Int(1));
    assert_eq!(request(&mut c, &[b"DEL", b"a"]), Val::Int(0));
    assert_eq!(request(&mut c, &[b"MDEL", b"a", b"b"]), Val::Int(1));
}

#[test]
fn zadd_updates_and_scores() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    assert_eq!(request(&mut c, &[b"ZADD", b"lb", b"100", b"a"]), Val::Int(1));
    assert_eq!(request(&mut c, &[b"ZADD", b"lb", b"200", b"a"]), Val::Int(0));
    assert_eq!(request(&mut c, &[b"ZSCORE", b"lb", b"a"]), Val::Dbl(200.0));
    assert_eq!(request(&mut c, &[b"ZSCORE", b"lb", b"nobody"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"ZREM", b"lb", b"a"]), Val::Int(1));
    assert_eq!(request(&mut c, &[b"ZREM", b"lb", b"a"]), Val::Int(0));
}

#[test]
fn zquery_ties_break_lexicographically() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"ZADD", b"z", b"1", b"alpha"]);
    request(&mut c, &[b"ZADD", b"z", b"1", b"beta"]);
    let got = request(&mut c, &[b"ZQUERY", b"z", b"1", b"", b"0", b"10"]);
    assert_eq!(
        got,
        Val::Arr(vec![
            Val::Str(b"alpha".to_vec()),
            Val::Dbl(1.0),
            Val::Str(b"beta".to_vec()),
            Val::Dbl(1.0),
        ])
    );
    // Offset walks past alpha; limit clips.
    let got = request(&mut c, &[b"ZQUERY", b"z", b"1", b"", b"1", b"10"]);
    assert_eq!(
        got,
        Val::Arr(vec![Val::Str(b"beta".to_vec()), Val::Dbl(1.0)])
    );
}

#[test]
fn pexpire_and_pttl_lifecycle() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"SET", b"k", b"v"]);
    assert_eq!(request(&mut c, &[b"PTTL", b"k"]), Val::Int(-1));
    assert_eq!(request(&mut c, &[b"PEXPIRE", b"k", b"120"]), Val::Int(1));
    match request(&mut c, &[b"PTTL", b"k"]) {
        Val::Int(ms) => assert!((1..=120).contains(&ms), "pttl reported {ms}"),
        other => panic!("{other:?}"),
    }
    // Still alive well inside the window.
    assert_eq!(request(&mut c, &[b"GET", b"k"]), Val::Str(b"v".to_vec()));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(request(&mut c, &[b"GET", b"k"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"PTTL", b"k"]), Val::Int(-2));
}

#[test]
fn pexpire_negative_clears_ttl() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"SET", b"k", b"v"]);
    request(&mut c, &[b"PEXPIRE", b"k", b"5000"]);
    assert_eq!(request(&mut c, &[b"PEXPIRE", b"k", b"-1"]), Val::Int(1));
    assert_eq!(request(&mut c, &[b"PTTL", b"k"]), Val::Int(-1));
    assert_eq!(request(&mut c, &[b"PEXPIRE", b"missing", b"10"]), Val::Int(0));
}

#[test]
fn keys_glob_patterns() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"MSET", b"key:1", b"a", b"key:2", b"b", b"other", b"c"]);
    let got = request(&mut c, &[b"KEYS", b"key:*"]);
    let Val::Arr(mut items) = got else {
        panic!("expected array")
    };
    items.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    assert_eq!(
        items,
        vec![Val::Str(b"key:1".to_vec()), Val::Str(b"key:2".to_vec())]
    );
}

#[test]
fn type_errors_and_unknown_commands() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"SET", b"s", b"v"]);
    assert!(matches!(
        request(&mut c, &[b"ZADD", b"s", b"1", b"m"]),
        Val::Err(3, _)
    ));
    request(&mut c, &[b"ZADD", b"z", b"1", b"m"]);
    assert!(matches!(request(&mut c, &[b"GET", b"z"]), Val::Err(3, _)));
    assert!(matches!(
        request(&mut c, &[b"NOSUCH", b"x"]),
        Val::Err(1, _)
    ));
    assert!(matches!(request(&mut c, &[b"GET"]), Val::Err(4, _)));
    assert!(matches!(
        request(&mut c, &[b"ZADD", b"z", b"notanumber", b"m"]),
        Val::Err(4, _)
    ));
}

#[test]
fn set_overwrite_across_types_clears_ttl() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    request(&mut c, &[b"ZADD", b"k", b"1", b"m"]);
    request(&mut c, &[b"PEXPIRE", b"k", b"60000"]);
    // Replacing the zset with a string is a full replacement: TTL gone.
    assert_eq!(request(&mut c, &[b"SET", b"k", b"v"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"PTTL", b"k"]), Val::Int(-1));
    // Same-type overwrite keeps the TTL.
    request(&mut c, &[b"PEXPIRE", b"k", b"60000"]);
    request(&mut c, &[b"SET", b"k", b"v2"]);
    match request(&mut c, &[b"PTTL", b"k"]) {
        Val::Int(ms) => assert!(ms > 0, "ttl survived: {ms}"),
        other => panic!("{other:?}"),
    }
}

#[test]
fn large_response_takes_zero_copy_path() {
    // A >16 KiB BIN response flips the slot into MSG_ZEROCOPY accounting;
    // the bytes must still arrive intact and in order.
    let srv = TestServer::start();
    let mut c = srv.connect();
    let big: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(request(&mut c, &[b"SET", b"big", &big]), Val::Nil);
    assert_eq!(request(&mut c, &[b"GET", b"big"]), Val::Str(big.clone()));
    // Follow-up small requests on the same connection still work.
    assert_eq!(request(&mut c, &[b"PING"]), Val::Str(b"PONG".to_vec()));
    assert_eq!(request(&mut c, &[b"GET", b"big"]), Val::Str(big));
}

#[test]
fn oversized_zset_is_destroyed_off_thread() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    // Push 10_001 members in pipelined batches to stay ahead of RTTs.
    let mut n = 0u32;
    while n < 10_001 {
        let batch = 500.min(10_001 - n);
        let mut frames = Vec::new();
        let mut args_storage = Vec::new();
        for i in n..n + batch {
            args_storage.push((format!("{i}"), format!("member:{i:06}")));
        }
        for (score, name) in &args_storage {
            frames.extend(bin_request(&[b"ZADD", b"big", score.as_bytes(), name.as_bytes()]));
        }
        c.write_all(&frames).expect("batch send");
        for _ in 0..batch {
            let payload = read_bin_response(&mut c);
            assert_eq!(payload, [0x03, 0, 0, 0, 0, 0, 0, 0, 1], "ZADD -> 1");
        }
        n += batch;
    }
    assert_eq!(request(&mut c, &[b"DEL", b"big"]), Val::Int(1));
    // The key vanishes immediately even though the value is freed
    // asynchronously; the server keeps serving.
    assert_eq!(request(&mut c, &[b"GET", b"big"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"SET", b"after", b"ok"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"GET", b"after"]), Val::Str(b"ok".to_vec()));
}

#[test]
fn config_stub_returns_empty_array() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    assert_eq!(
        request(&mut c, &[b"CONFIG", b"GET", b"maxmemory"]),
        Val::Arr(vec![])
    );
}

#[test]
fn commands_match_case_insensitively() {
    let srv = TestServer::start();
    let mut c = srv.connect();
    assert_eq!(request(&mut c, &[b"set", b"k", b"v"]), Val::Nil);
    assert_eq!(request(&mut c, &[b"gEt", b"k"]), Val::Str(b"v".to_vec()));
}
