// snapshot.rs — Keyspace snapshot codec.
//
// File layout:
//
// ```text
// [4: magic "MKVS"][4: CRC32 of payload, BE][4: version, BE][payload...]
// payload  = record*
// record   = [8: expire_at_us BE][4: klen BE][key][1: type tag][value]
// STR  (0x02) value = [4: vlen BE][bytes]
// ZSET (0x05) value = [4: count BE] ([8: score f64 raw][1: 0x02][4: nlen BE][name])*
// ```
//
// Scores and the type/marker tags reuse the wire value tags.  Score bytes
// are raw host-order IEEE-754, so a snapshot is only portable between
// machines of the same endianness — same constraint as BIN doubles on the
// wire.
//
// Saving writes `<path>.tmp`, patches the CRC into the header, fsyncs, and
// renames over `path`, so a crash never leaves a torn file behind.  The CRC
// covers the payload only and is recomputed record-by-record on load; a
// mismatch, a bad magic, or an unknown version fails the load.  A missing
// file is an empty start, not an error.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::cache::entry::Value;
use crate::cache::Cache;
use crate::config::MAX_MSG;
use crate::ds::zset::ZSet;
use crate::wire::outbuf::{TAG_ARR, TAG_STR};

pub const MAGIC: [u8; 4] = *b"MKVS";
pub const VERSION: u32 = 1;

fn bad(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

// ── save ────────────────────────────────────────────────────────────────

struct PayloadWriter<W: Write> {
    inner: W,
    crc: crc32fast::Hasher,
}

impl<W: Write> PayloadWriter<W> {
    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.crc.update(bytes);
        self.inner.write_all(bytes)
    }
}

fn write_record<W: Write>(
    w: &mut PayloadWriter<W>,
    key: &[u8],
    value: &Value,
    expire_at_us: u64,
) -> io::Result<()> {
    w.put(&expire_at_us.to_be_bytes())?;
    w.put(&(key.len() as u32).to_be_bytes())?;
    w.put(key)?;
    match value {
        Value::Str(v) => {
            w.put(&[TAG_STR])?;
            w.put(&(v.len() as u32).to_be_bytes())?;
            w.put(v)?;
        }
        Value::Sorted(z) => {
            w.put(&[TAG_ARR])?;
            w.put(&(z.len() as u32).to_be_bytes())?;
            let mut res = Ok(());
            z.for_each_inorder(|name, score| {
                if res.is_ok() {
                    res = (|| {
                        w.put(&score.to_ne_bytes())?;
                        w.put(&[TAG_STR])?;
                        w.put(&(name.len() as u32).to_be_bytes())?;
                        w.put(name)
                    })();
                }
            });
            res?;
        }
    }
    Ok(())
}

/// Writes the whole keyspace to `path`.  Returns the entry count.
pub fn save(cache: &Cache, path: &Path) -> io::Result<usize> {
    let tmp = tmp_path(path);
    let file = File::create(&tmp)?;
    let mut head = BufWriter::new(file);
    head.write_all(&MAGIC)?;
    head.write_all(&0u32.to_be_bytes())?; // CRC placeholder
    head.write_all(&VERSION.to_be_bytes())?;

    let mut w = PayloadWriter {
        inner: head,
        crc: crc32fast::Hasher::new(),
    };
    let mut res = Ok(());
    let mut count = 0usize;
    cache.for_each_entry(|e| {
        if res.is_ok() {
            res = write_record(&mut w, &e.key, &e.value, e.expire_at_us);
            count += 1;
        }
    });
    res?;

    let crc = w.crc.finalize();
    w.inner.flush()?;
    let mut file = w.inner.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&crc.to_be_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(count)
}

// ── load ────────────────────────────────────────────────────────────────

struct PayloadReader<R: Read> {
    inner: R,
    crc: crc32fast::Hasher,
}

impl<R: Read> PayloadReader<R> {
    fn get(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.crc.update(buf);
        Ok(())
    }

    fn get_u32(&mut self) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.get(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Reads the leading u64 of a record, or reports a clean end of file.
    fn get_u64_or_eof(&mut self) -> io::Result<Option<u64>> {
        let mut b = [0u8; 8];
        let mut filled = 0;
        while filled < 8 {
            let n = self.inner.read(&mut b[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(bad("truncated record"));
            }
            filled += n;
        }
        self.crc.update(&b);
        Ok(Some(u64::from_be_bytes(b)))
    }
}

fn read_value<R: Read>(r: &mut PayloadReader<R>) -> io::Result<Value> {
    let mut tag = [0u8; 1];
    r.get(&mut tag)?;
    match tag[0] {
        TAG_STR => {
            let vlen = r.get_u32()? as usize;
            if vlen > MAX_MSG {
                return Err(bad("oversized string value"));
            }
            let mut v = vec![0u8; vlen];
            r.get(&mut v)?;
            Ok(Value::Str(v.into_boxed_slice()))
        }
        TAG_ARR => {
            let count = r.get_u32()?;
            let mut z = ZSet::new();
            for _ in 0..count {
                let mut score = [0u8; 8];
                r.get(&mut score)?;
                let mut marker = [0u8; 1];
                r.get(&mut marker)?;
                if marker[0] != TAG_STR {
                    return Err(bad("bad member marker"));
                }
                let nlen = r.get_u32()? as usize;
                if nlen > MAX_MSG {
                    return Err(bad("oversized member name"));
                }
                let mut name = vec![0u8; nlen];
                r.get(&mut name)?;
                z.add(&name, f64::from_ne_bytes(score));
            }
            Ok(Value::Sorted(Box::new(z)))
        }
        _ => Err(bad("unknown value tag")),
    }
}

/// Loads `path` into `cache`.  `Ok(None)` means the file does not exist;
/// `Ok(Some(n))` reports how many entries were restored.
pub fn load(cache: &mut Cache, path: &Path) -> io::Result<Option<usize>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut head = BufReader::new(file);

    let mut magic = [0u8; 4];
    head.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(bad("bad magic"));
    }
    let mut b4 = [0u8; 4];
    head.read_exact(&mut b4)?;
    let expected_crc = u32::from_be_bytes(b4);
    head.read_exact(&mut b4)?;
    if u32::from_be_bytes(b4) != VERSION {
        return Err(bad("unsupported snapshot version"));
    }

    let mut r = PayloadReader {
        inner: head,
        crc: crc32fast::Hasher::new(),
    };
    let mut count = 0usize;
    while let Some(expire_at_us) = r.get_u64_or_eof()? {
        let klen = r.get_u32()? as usize;
        if klen > MAX_MSG {
            return Err(bad("oversized key"));
        }
        let mut key = vec![0u8; klen];
        r.get(&mut key)?;
        let value = read_value(&mut r)?;
        cache.restore_entry(key.into_boxed_slice(), value, expire_at_us);
        count += 1;
    }
    if r.crc.finalize() != expected_crc {
        return Err(bad("checksum mismatch"));
    }
    Ok(Some(count))
}
