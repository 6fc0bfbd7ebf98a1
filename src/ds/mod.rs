// Storage structures: the keyspace hash map, the sorted-set tree, and the
// TTL heap.  All three address their records through u32 arena ids rather
// than pointers; the arenas live with their owners (cache, zset).

pub mod avl;
pub mod heap;
pub mod hmap;
pub mod zset;
