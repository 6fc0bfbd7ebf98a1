// commands.rs — Command dispatch and handlers.
//
// `execute` is the single entry point the connection layer calls per
// request.  Command names match case-insensitively; arity is enforced
// before dispatch.  Handlers return `false` only when the response no
// longer fits the reserved output region — every domain failure (unknown
// command, bad argument, wrong type) is itself a successfully-written error
// frame.

use crate::cache::entry::{Entry, Value};
use crate::cache::glob::glob_match;
use crate::cache::Cache;
use crate::ds::avl::NIL;
use crate::wire::outbuf::{OutBuf, Proto, ERR_ARG, ERR_TYPE, ERR_UNKNOWN};

fn parse_i64(b: &[u8]) -> Option<i64> {
    std::str::from_utf8(b).ok()?.parse().ok()
}

fn parse_f64(b: &[u8]) -> Option<f64> {
    let v: f64 = std::str::from_utf8(b).ok()?.parse().ok()?;
    v.is_finite().then_some(v)
}

impl Cache {
    /// Runs one command.  Returns `false` when the output region overflowed
    /// mid-response; the connection layer then swaps in a "response too
    /// large" error and flushes the connection closed.
    pub fn execute(&mut self, argv: &[&[u8]], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        debug_assert!(!argv.is_empty());
        let cmd = argv[0];
        let argc = argv.len();

        if cmd.eq_ignore_ascii_case(b"PING") {
            return match argc {
                1 => out.simple(b"PONG"),
                2 => out.str(argv[1]),
                _ => out.err(ERR_ARG, "wrong number of arguments"),
            };
        }
        if cmd.eq_ignore_ascii_case(b"CONFIG") {
            // Compatibility stub for clients that probe server settings.
            return out.arr(0);
        }
        if cmd.eq_ignore_ascii_case(b"GET") {
            if argc != 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_get(argv[1], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"MGET") {
            if argc < 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_mget(&argv[1..], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"SET") {
            if argc != 3 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            self.do_set(argv[1], argv[2], now_us);
            return out.ok();
        }
        if cmd.eq_ignore_ascii_case(b"MSET") {
            if argc < 3 || argc % 2 != 1 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            for pair in argv[1..].chunks_exact(2) {
                self.do_set(pair[0], pair[1], now_us);
            }
            return out.nil();
        }
        if cmd.eq_ignore_ascii_case(b"DEL") {
            if argc != 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return out.int(i64::from(self.do_del(argv[1], now_us)));
        }
        if cmd.eq_ignore_ascii_case(b"MDEL") {
            if argc < 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            let mut deleted: i64 = 0;
            for key in &argv[1..] {
                deleted += i64::from(self.do_del(key, now_us));
            }
            return out.int(deleted);
        }
        if cmd.eq_ignore_ascii_case(b"PEXPIRE") {
            if argc != 3 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            let Some(ms) = parse_i64(argv[2]) else {
                return out.err(ERR_ARG, "expect int");
            };
            return self.do_pexpire(argv[1], ms, now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"PTTL") {
            if argc != 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_pttl(argv[1], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"ZADD") {
            if argc != 4 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            let Some(score) = parse_f64(argv[2]) else {
                return out.err(ERR_ARG, "expect number");
            };
            return self.do_zadd(argv[1], score, argv[3], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"ZREM") {
            if argc != 3 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_zrem(argv[1], argv[2], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"ZSCORE") {
            if argc != 3 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_zscore(argv[1], argv[2], now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"ZQUERY") {
            if argc != 6 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            let Some(score) = parse_f64(argv[2]) else {
                return out.err(ERR_ARG, "expect number");
            };
            let (Some(offset), Some(limit)) = (parse_i64(argv[4]), parse_i64(argv[5])) else {
                return out.err(ERR_ARG, "expect int");
            };
            return self.do_zquery(argv[1], score, argv[3], offset, limit, now_us, out);
        }
        if cmd.eq_ignore_ascii_case(b"KEYS") {
            if argc != 2 {
                return out.err(ERR_ARG, "wrong number of arguments");
            }
            return self.do_keys(argv[1], now_us, out);
        }

        out.err(ERR_UNKNOWN, "unknown command")
    }

    fn do_get(&mut self, key: &[u8], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        match self.lookup_live(key, now_us) {
            None => out.nil(),
            Some(id) => match &self.entry(id).value {
                Value::Str(v) => out.str(v),
                Value::Sorted(_) => out.err(ERR_TYPE, "not a string"),
            },
        }
    }

    fn do_mget(&mut self, keys: &[&[u8]], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        if !out.arr(keys.len() as u32) {
            return false;
        }
        for key in keys {
            let ok = match self.lookup_live(key, now_us) {
                Some(id) => match &self.entry(id).value {
                    Value::Str(v) => out.str(v),
                    Value::Sorted(_) => out.nil(),
                },
                None => out.nil(),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// SET semantics: overwriting a string keeps its TTL; overwriting a
    /// value of another type is a full replacement and clears it.
    fn do_set(&mut self, key: &[u8], val: &[u8], now_us: u64) {
        match self.lookup_live(key, now_us) {
            Some(id) => {
                let is_str = matches!(self.entry(id).value, Value::Str(_));
                if is_str {
                    self.entry_mut(id).value = Value::Str(val.into());
                } else {
                    self.remove_entry(id);
                    self.insert_entry(Entry::new_str(key, val));
                }
            }
            None => {
                self.insert_entry(Entry::new_str(key, val));
            }
        }
    }

    fn do_del(&mut self, key: &[u8], now_us: u64) -> bool {
        match self.lookup_live(key, now_us) {
            Some(id) => {
                self.remove_entry(id);
                true
            }
            None => false,
        }
    }

    fn do_pexpire(&mut self, key: &[u8], ms: i64, now_us: u64, out: &mut OutBuf<'_>) -> bool {
        match self.lookup_live(key, now_us) {
            None => out.int(0),
            Some(id) => {
                if ms < 0 {
                    self.set_expire(id, 0);
                } else {
                    self.set_expire(id, now_us + (ms as u64) * 1000);
                }
                out.int(1)
            }
        }
    }

    fn do_pttl(&mut self, key: &[u8], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        match self.lookup_live(key, now_us) {
            None => out.int(-2),
            Some(id) => {
                let exp = self.entry(id).expire_at_us;
                if exp == 0 {
                    out.int(-1)
                } else {
                    let left_us = exp.saturating_sub(now_us);
                    out.int(left_us.div_ceil(1000) as i64)
                }
            }
        }
    }

    fn do_zadd(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        now_us: u64,
        out: &mut OutBuf<'_>,
    ) -> bool {
        let id = match self.lookup_live(key, now_us) {
            Some(id) => id,
            None => self.insert_entry(Entry::new_zset(key)),
        };
        let Value::Sorted(z) = &mut self.entry_mut(id).value else {
            return out.err(ERR_TYPE, "not a sorted set");
        };
        let added = z.add(name, score);
        out.int(i64::from(added))
    }

    fn do_zrem(&mut self, key: &[u8], name: &[u8], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        match self.lookup_live(key, now_us) {
            None => out.int(0),
            Some(id) => {
                let Value::Sorted(z) = &mut self.entry_mut(id).value else {
                    return out.err(ERR_TYPE, "not a sorted set");
                };
                let removed = z.remove(name);
                out.int(i64::from(removed))
            }
        }
    }

    fn do_zscore(&mut self, key: &[u8], name: &[u8], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        match self.lookup_live(key, now_us) {
            None => out.nil(),
            Some(id) => {
                let Value::Sorted(z) = &mut self.entry_mut(id).value else {
                    return out.err(ERR_TYPE, "not a sorted set");
                };
                match z.score(name) {
                    Some(s) => out.dbl(s),
                    None => out.nil(),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn do_zquery(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        offset: i64,
        limit: i64,
        now_us: u64,
        out: &mut OutBuf<'_>,
    ) -> bool {
        let Some(id) = self.lookup_live(key, now_us) else {
            return out.arr(0);
        };
        let Value::Sorted(z) = &self.entry(id).value else {
            return out.err(ERR_TYPE, "not a sorted set");
        };
        let mut start = z.query(score, name);
        if start != NIL && offset != 0 {
            start = z.offset(start, offset);
        }
        let count = if start == NIL || limit <= 0 {
            0
        } else {
            let remaining = z.len() as u64 - z.rank(start);
            (limit as u64).min(remaining)
        };

        // RESP arrays must know their size up front; BIN exercises the
        // reserve-then-patch pair.
        let patch_pos = match out.proto() {
            Proto::Resp => {
                if !out.arr((count * 2) as u32) {
                    return false;
                }
                None
            }
            Proto::Bin => match out.arr_begin() {
                Some(pos) => Some(pos),
                None => return false,
            },
        };

        let mut cur = start;
        for _ in 0..count {
            if !out.str(z.name_of(cur)) || !out.dbl(z.score_of(cur)) {
                return false;
            }
            cur = z.offset(cur, 1);
        }
        match patch_pos {
            Some(pos) => out.arr_end(pos, (count * 2) as u32),
            None => true,
        }
    }

    fn do_keys(&mut self, pattern: &[u8], now_us: u64, out: &mut OutBuf<'_>) -> bool {
        let mut matched: Vec<u32> = Vec::new();
        {
            let entries = &self.entries;
            self.map.scan(|id| {
                let e = entries.get(id);
                let live = e.expire_at_us == 0 || e.expire_at_us >= now_us;
                if live && glob_match(pattern, &e.key) {
                    matched.push(id);
                }
            });
        }
        if !out.arr(matched.len() as u32) {
            return false;
        }
        for id in matched {
            if !out.str(&self.entry(id).key) {
                return false;
            }
        }
        true
    }
}
