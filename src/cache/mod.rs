// Keyspace: the entry slab, the hash map over it, the TTL heap, and the
// destruction pool.  Command dispatch lives in `commands.rs`; the snapshot
// codec drives `for_each_entry` / `restore_entry` from the snapshot module.
//
// Everything here runs on the event-loop thread.  The only work that leaves
// it is dropping outsized sorted sets, which are fully detached before they
// are handed to the pool.

pub mod commands;
pub mod entry;
pub mod glob;

use std::path::Path;

use crate::config::{EVICT_MAX_PER_CALL, LARGE_CONTAINER_SIZE};
use crate::ds::heap::{HeapItem, TtlHeap, NOT_IN_HEAP};
use crate::ds::hmap::HMap;
use crate::destroyer::DestroyPool;
use crate::hashfn::key_hash;
use crate::snapshot;
use entry::{Entry, EntrySlab, Value};

pub struct Cache {
    map: HMap,
    entries: EntrySlab,
    ttl: TtlHeap,
    destroyer: DestroyPool,
}

impl Default for Cache {
    fn default() -> Self {
        Cache::new()
    }
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            map: HMap::new(),
            entries: EntrySlab::new(),
            ttl: TtlHeap::new(),
            destroyer: DestroyPool::with_defaults().expect("destroyer pool"),
        }
    }

    /// Number of live keys (expired-but-unevicted entries included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest TTL deadline, or `u64::MAX` when nothing expires.
    pub fn next_expiry(&self) -> u64 {
        self.ttl.peek().map_or(u64::MAX, |item| item.at_us)
    }

    /// Active eviction: pops expired entries off the heap top, bounded per
    /// call so a mass expiry cannot stall the loop.
    pub fn evict(&mut self, now_us: u64) {
        let mut evicted = 0;
        while evicted < EVICT_MAX_PER_CALL {
            let Some(top) = self.ttl.peek() else { break };
            if top.at_us >= now_us {
                break;
            }
            self.remove_entry(top.entry);
            evicted += 1;
        }
        if evicted > 0 {
            crate::notify!(4, "evicted {} expired entries\n", evicted);
        }
    }

    /// Serializes the whole keyspace to `path`.  Logs and returns `false`
    /// on failure.
    pub fn save(&self, path: &Path) -> bool {
        match snapshot::save(self, path) {
            Ok(n) => {
                crate::notify!(2, "snapshot: wrote {} entries to {}\n", n, path.display());
                true
            }
            Err(e) => {
                crate::notify!(1, "snapshot save failed: {}\n", e);
                false
            }
        }
    }

    /// Loads a snapshot into this (empty) cache.  A missing file is a clean
    /// empty start; a corrupt or mismatched file fails.
    pub fn load(&mut self, path: &Path) -> bool {
        match snapshot::load(self, path) {
            Ok(Some(n)) => {
                crate::notify!(2, "snapshot: loaded {} entries from {}\n", n, path.display());
                true
            }
            Ok(None) => true,
            Err(e) => {
                crate::notify!(1, "snapshot load failed: {}\n", e);
                false
            }
        }
    }

    /// Blocks until the destruction pool has freed everything handed to it.
    pub fn drain_destroyer(&self) {
        self.destroyer.drain();
    }

    // ── keyspace internals ──────────────────────────────────────────────

    /// Looks a key up without expiry handling.
    fn lookup_any(&mut self, key: &[u8]) -> Option<u32> {
        let hash = key_hash(key);
        let entries = &self.entries;
        self.map.lookup(hash, |id| &*entries.get(id).key == key)
    }

    /// Looks a key up, passively evicting it when its TTL has lapsed.
    pub(crate) fn lookup_live(&mut self, key: &[u8], now_us: u64) -> Option<u32> {
        let id = self.lookup_any(key)?;
        let exp = self.entries.get(id).expire_at_us;
        if exp != 0 && exp < now_us {
            self.remove_entry(id);
            return None;
        }
        Some(id)
    }

    pub(crate) fn entry(&self, id: u32) -> &Entry {
        self.entries.get(id)
    }

    pub(crate) fn entry_mut(&mut self, id: u32) -> &mut Entry {
        self.entries.get_mut(id)
    }

    /// Inserts a fresh entry into the slab and the map.  The caller
    /// guarantees the key is absent.
    pub(crate) fn insert_entry(&mut self, entry: Entry) -> u32 {
        let hash = key_hash(&entry.key);
        let expire = entry.expire_at_us;
        let id = self.entries.insert(entry);
        let entries = &self.entries;
        self.map
            .insert(hash, id, |cand| entries.get(cand).key == entries.get(id).key);
        if expire != 0 {
            let entries = &mut self.entries;
            self.ttl.add(
                HeapItem {
                    at_us: expire,
                    entry: id,
                },
                |e, i| entries.get_mut(e).heap_idx = i,
            );
        }
        id
    }

    /// Unlinks an entry from the map and the heap, then disposes of its
    /// value (off-thread when it is an outsized sorted set).
    pub(crate) fn remove_entry(&mut self, id: u32) {
        let hash = key_hash(&self.entries.get(id).key);
        self.map.pop(hash, |cand| cand == id);
        let hidx = self.entries.get(id).heap_idx;
        if hidx != NOT_IN_HEAP {
            let entries = &mut self.entries;
            self.ttl.remove(hidx, |e, i| entries.get_mut(e).heap_idx = i);
        }
        let entry = self.entries.remove(id);
        self.dispose(entry);
    }

    /// Sets or clears an entry's TTL, keeping the heap back-reference
    /// invariant intact.  `at_us == 0` clears.
    pub(crate) fn set_expire(&mut self, id: u32, at_us: u64) {
        let hidx = self.entries.get(id).heap_idx;
        if at_us == 0 {
            if hidx != NOT_IN_HEAP {
                let entries = &mut self.entries;
                self.ttl.remove(hidx, |e, i| entries.get_mut(e).heap_idx = i);
                self.entries.get_mut(id).heap_idx = NOT_IN_HEAP;
            }
            self.entries.get_mut(id).expire_at_us = 0;
        } else {
            self.entries.get_mut(id).expire_at_us = at_us;
            let entries = &mut self.entries;
            if hidx == NOT_IN_HEAP {
                self.ttl.add(
                    HeapItem {
                        at_us,
                        entry: id,
                    },
                    |e, i| entries.get_mut(e).heap_idx = i,
                );
            } else {
                self.ttl
                    .reschedule(hidx, at_us, |e, i| entries.get_mut(e).heap_idx = i);
            }
        }
    }

    fn dispose(&mut self, entry: Entry) {
        match entry.value {
            Value::Sorted(z) if z.len() > LARGE_CONTAINER_SIZE => {
                crate::notify!(4, "off-loading destruction of {}-member set\n", z.len());
                self.destroyer.discard(z);
            }
            _ => {}
        }
    }

    /// Visits every entry, expired ones included, in map order.
    pub(crate) fn for_each_entry(&self, mut visit: impl FnMut(&Entry)) {
        let entries = &self.entries;
        self.map.scan(|id| visit(entries.get(id)));
    }

    /// Re-creates an entry from snapshot data, TTL timestamp verbatim.
    pub(crate) fn restore_entry(&mut self, key: Box<[u8]>, value: Value, expire_at_us: u64) {
        self.insert_entry(Entry {
            key,
            value,
            expire_at_us,
            heap_idx: NOT_IN_HEAP,
        });
    }
}
