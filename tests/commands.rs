//! Command-level tests: drive `Cache::execute` directly with a controlled
//! clock and decode the BIN responses, no sockets involved.

use minikv::{Cache, OutBuf, Proto};

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Nil,
    Err(u32, String),
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Val>),
}

fn decode(buf: &[u8]) -> (Val, usize) {
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
        0x03 => (
            Val::Int(i64::from_be_bytes(buf[1..9].try_into().unwrap())),
            9,
        ),
        0x04 => (
            Val::Dbl(f64::from_ne_bytes(buf[1..9].try_into().unwrap())),
            9,
        ),
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
        tag => panic!("unknown tag {tag:#x}"),
    }
}

fn exec_at(cache: &mut Cache, now_us: u64, args: &[&[u8]]) -> Val {
    let mut backing = vec![0u8; 128 * 1024];
    let mut out = OutBuf::new(&mut backing, Proto::Bin);
    assert!(cache.execute(args, now_us, &mut out), "writer overflow");
    let len = out.len();
    let (v, used) = decode(&backing[..len]);
    assert_eq!(used, len, "response has trailing bytes");
    v
}

fn exec(cache: &mut Cache, args: &[&[u8]]) -> Val {
    exec_at(cache, 1_000, args)
}

fn exec_resp(cache: &mut Cache, now_us: u64, args: &[&[u8]]) -> Vec<u8> {
    let mut backing = vec![0u8; 128 * 1024];
    let mut out = OutBuf::new(&mut backing, Proto::Resp);
    assert!(cache.execute(args, now_us, &mut out), "writer overflow");
    let len = out.len();
    backing.truncate(len);
    backing
}

#[test]
fn get_set_del_basics() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"GET", b"k"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"SET", b"k", b"v"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"GET", b"k"]), Val::Str(b"v".to_vec()));
    assert_eq!(exec(&mut c, &[b"DEL", b"k"]), Val::Int(1));
    assert_eq!(exec(&mut c, &[b"DEL", b"k"]), Val::Int(0));
    assert_eq!(exec(&mut c, &[b"GET", b"k"]), Val::Nil);
}

#[test]
fn set_reply_differs_by_protocol() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"SET", b"k", b"v"]), Val::Nil);
    assert_eq!(exec_resp(&mut c, 1_000, &[b"SET", b"k", b"v"]), b"+OK\r\n");
}

#[test]
fn mset_mget_mdel() {
    let mut c = Cache::new();
    assert_eq!(
        exec(&mut c, &[b"MSET", b"a", b"1", b"b", b"2", b"c", b"3"]),
        Val::Nil
    );
    assert_eq!(
        exec(&mut c, &[b"MGET", b"a", b"x", b"c"]),
        Val::Arr(vec![
            Val::Str(b"1".to_vec()),
            Val::Nil,
            Val::Str(b"3".to_vec())
        ])
    );
    assert_eq!(exec(&mut c, &[b"MDEL", b"a", b"b", b"x"]), Val::Int(2));
    // Even argument count (pairs broken) is an arity error.
    assert!(matches!(
        exec(&mut c, &[b"MSET", b"a", b"1", b"b"]),
        Val::Err(4, _)
    ));
}

#[test]
fn ttl_lifecycle_with_synthetic_clock() {
    let mut c = Cache::new();
    let t0 = 1_000_000u64;
    exec_at(&mut c, t0, &[b"SET", b"k", b"v"]);
    assert_eq!(exec_at(&mut c, t0, &[b"PEXPIRE", b"k", b"1000"]), Val::Int(1));
    // 500 ms in: alive, PTTL counts down.
    assert_eq!(
        exec_at(&mut c, t0 + 500_000, &[b"GET", b"k"]),
        Val::Str(b"v".to_vec())
    );
    assert_eq!(
        exec_at(&mut c, t0 + 500_000, &[b"PTTL", b"k"]),
        Val::Int(500)
    );
    // 1.1 s in: passively evicted on read.
    assert_eq!(exec_at(&mut c, t0 + 1_100_000, &[b"GET", b"k"]), Val::Nil);
    assert_eq!(exec_at(&mut c, t0 + 1_100_000, &[b"PTTL", b"k"]), Val::Int(-2));
    assert_eq!(c.len(), 0);
}

#[test]
fn pttl_distinguishes_no_ttl_from_missing() {
    let mut c = Cache::new();
    exec(&mut c, &[b"SET", b"k", b"v"]);
    assert_eq!(exec(&mut c, &[b"PTTL", b"k"]), Val::Int(-1));
    assert_eq!(exec(&mut c, &[b"PTTL", b"missing"]), Val::Int(-2));
}

#[test]
fn active_eviction_honors_deadlines() {
    let mut c = Cache::new();
    let t0 = 1_000u64;
    for i in 0..5u32 {
        let key = format!("k{i}");
        exec_at(&mut c, t0, &[b"SET", key.as_bytes(), b"v"]);
        let ms = format!("{}", (i + 1) * 10);
        exec_at(&mut c, t0, &[b"PEXPIRE", key.as_bytes(), ms.as_bytes()]);
    }
    assert_eq!(c.len(), 5);
    c.evict(t0 + 25_000); // 10ms and 20ms deadlines lapse
    assert_eq!(c.len(), 3);
    assert_eq!(c.next_expiry(), t0 + 30_000);
}

#[test]
fn zset_flow() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"ZADD", b"lb", b"100", b"a"]), Val::Int(1));
    assert_eq!(exec(&mut c, &[b"ZADD", b"lb", b"200", b"a"]), Val::Int(0));
    assert_eq!(exec(&mut c, &[b"ZSCORE", b"lb", b"a"]), Val::Dbl(200.0));
    assert_eq!(exec(&mut c, &[b"ZSCORE", b"lb", b"ghost"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"ZSCORE", b"ghostkey", b"a"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"ZREM", b"lb", b"a"]), Val::Int(1));
    assert_eq!(exec(&mut c, &[b"ZREM", b"lb", b"a"]), Val::Int(0));
}

#[test]
fn zquery_pairs_offset_limit() {
    let mut c = Cache::new();
    for (score, name) in [("1", "alpha"), ("1", "beta"), ("2", "gamma"), ("3", "delta")] {
        exec(&mut c, &[b"ZADD", b"z", score.as_bytes(), name.as_bytes()]);
    }
    assert_eq!(
        exec(&mut c, &[b"ZQUERY", b"z", b"1", b"", b"0", b"10"]),
        Val::Arr(vec![
            Val::Str(b"alpha".to_vec()),
            Val::Dbl(1.0),
            Val::Str(b"beta".to_vec()),
            Val::Dbl(1.0),
            Val::Str(b"gamma".to_vec()),
            Val::Dbl(2.0),
            Val::Str(b"delta".to_vec()),
            Val::Dbl(3.0),
        ])
    );
    // Seek past the ties, then clip by limit.
    assert_eq!(
        exec(&mut c, &[b"ZQUERY", b"z", b"2", b"", b"0", b"1"]),
        Val::Arr(vec![Val::Str(b"gamma".to_vec()), Val::Dbl(2.0)])
    );
    assert_eq!(
        exec(&mut c, &[b"ZQUERY", b"z", b"1", b"", b"2", b"10"]),
        Val::Arr(vec![
            Val::Str(b"gamma".to_vec()),
            Val::Dbl(2.0),
            Val::Str(b"delta".to_vec()),
            Val::Dbl(3.0),
        ])
    );
    assert_eq!(
        exec(&mut c, &[b"ZQUERY", b"z", b"9", b"", b"0", b"10"]),
        Val::Arr(vec![])
    );
    assert_eq!(
        exec(&mut c, &[b"ZQUERY", b"missing", b"0", b"", b"0", b"10"]),
        Val::Arr(vec![])
    );
}

#[test]
fn keys_patterns() {
    let mut c = Cache::new();
    exec(&mut c, &[b"MSET", b"user:1", b"a", b"user:2", b"b", b"admin", b"c"]);
    let Val::Arr(items) = exec(&mut c, &[b"KEYS", b"user:?"]) else {
        panic!("expected array");
    };
    assert_eq!(items.len(), 2);
    let Val::Arr(all) = exec(&mut c, &[b"KEYS", b"*"]) else {
        panic!("expected array");
    };
    assert_eq!(all.len(), 3);
    let Val::Arr(none) = exec(&mut c, &[b"KEYS", b"nope*"]) else {
        panic!("expected array");
    };
    assert!(none.is_empty());
}

#[test]
fn keys_skips_expired_entries() {
    let mut c = Cache::new();
    let t0 = 1_000u64;
    exec_at(&mut c, t0, &[b"SET", b"temp", b"v"]);
    exec_at(&mut c, t0, &[b"SET", b"perm", b"v"]);
    exec_at(&mut c, t0, &[b"PEXPIRE", b"temp", b"10"]);
    let Val::Arr(items) = exec_at(&mut c, t0 + 50_000, &[b"KEYS", b"*"]) else {
        panic!("expected array");
    };
    assert_eq!(items, vec![Val::Str(b"perm".to_vec())]);
}

#[test]
fn type_mismatches() {
    let mut c = Cache::new();
    exec(&mut c, &[b"SET", b"s", b"v"]);
    exec(&mut c, &[b"ZADD", b"z", b"1", b"m"]);
    assert!(matches!(exec(&mut c, &[b"GET", b"z"]), Val::Err(3, _)));
    assert!(matches!(
        exec(&mut c, &[b"ZADD", b"s", b"1", b"m"]),
        Val::Err(3, _)
    ));
    assert!(matches!(
        exec(&mut c, &[b"ZSCORE", b"s", b"m"]),
        Val::Err(3, _)
    ));
    // MGET reports non-strings as NILs instead of failing the batch.
    assert_eq!(
        exec(&mut c, &[b"MGET", b"s", b"z"]),
        Val::Arr(vec![Val::Str(b"v".to_vec()), Val::Nil])
    );
}

#[test]
fn set_over_zset_replaces_and_clears_ttl() {
    let mut c = Cache::new();
    let t0 = 1_000u64;
    exec_at(&mut c, t0, &[b"ZADD", b"k", b"1", b"m"]);
    exec_at(&mut c, t0, &[b"PEXPIRE", b"k", b"60000"]);
    exec_at(&mut c, t0, &[b"SET", b"k", b"v"]);
    assert_eq!(exec_at(&mut c, t0, &[b"PTTL", b"k"]), Val::Int(-1));
    assert_eq!(exec_at(&mut c, t0, &[b"GET", b"k"]), Val::Str(b"v".to_vec()));
    // String-over-string keeps the TTL.
    exec_at(&mut c, t0, &[b"PEXPIRE", b"k", b"60000"]);
    exec_at(&mut c, t0, &[b"SET", b"k", b"v2"]);
    assert_eq!(exec_at(&mut c, t0, &[b"PTTL", b"k"]), Val::Int(60_000));
}

#[test]
fn arity_and_argument_errors() {
    let mut c = Cache::new();
    assert!(matches!(exec(&mut c, &[b"GET"]), Val::Err(4, _)));
    assert!(matches!(exec(&mut c, &[b"SET", b"k"]), Val::Err(4, _)));
    assert!(matches!(
        exec(&mut c, &[b"PEXPIRE", b"k", b"soon"]),
        Val::Err(4, _)
    ));
    assert!(matches!(
        exec(&mut c, &[b"ZADD", b"k", b"NaN", b"m"]),
        Val::Err(4, _)
    ));
    assert!(matches!(
        exec(&mut c, &[b"ZQUERY", b"k", b"1", b"", b"x", b"10"]),
        Val::Err(4, _)
    ));
    assert!(matches!(exec(&mut c, &[b"WHAT"]), Val::Err(1, _)));
}

#[test]
fn ping_echoes() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"PING"]), Val::Str(b"PONG".to_vec()));
    assert_eq!(exec(&mut c, &[b"PING", b"hey"]), Val::Str(b"hey".to_vec()));
    assert!(matches!(
        exec(&mut c, &[b"PING", b"a", b"b"]),
        Val::Err(4, _)
    ));
}

#[test]
fn config_stub() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"CONFIG", b"GET", b"save"]), Val::Arr(vec![]));
    assert_eq!(exec(&mut c, &[b"CONFIG"]), Val::Arr(vec![]));
}

#[test]
fn command_names_are_case_insensitive() {
    let mut c = Cache::new();
    assert_eq!(exec(&mut c, &[b"set", b"k", b"v"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"GeT", b"k"]), Val::Str(b"v".to_vec()));
    assert_eq!(exec(&mut c, &[b"pttl", b"k"]), Val::Int(-1));
}

#[test]
fn writer_overflow_fails_fast() {
    let mut c = Cache::new();
    let big = vec![b'x'; 4_096];
    exec(&mut c, &[b"SET", b"big", &big]);
    let mut tiny = vec![0u8; 64];
    let mut out = OutBuf::new(&mut tiny, Proto::Bin);
    assert!(!c.execute(&[b"GET", b"big"], 1_000, &mut out));
}

#[test]
fn large_zset_delete_is_clean() {
    // Crossing the off-thread destruction threshold must not disturb the
    // rest of the keyspace.
    let mut c = Cache::new();
    for i in 0..10_001u32 {
        let score = format!("{i}");
        let name = format!("m{i:06}");
        exec(&mut c, &[b"ZADD", b"big", score.as_bytes(), name.as_bytes()]);
    }
    exec(&mut c, &[b"SET", b"other", b"stays"]);
    assert_eq!(exec(&mut c, &[b"DEL", b"big"]), Val::Int(1));
    assert_eq!(exec(&mut c, &[b"GET", b"big"]), Val::Nil);
    assert_eq!(exec(&mut c, &[b"GET", b"other"]), Val::Str(b"stays".to_vec()));
    c.drain_destroyer();
}
