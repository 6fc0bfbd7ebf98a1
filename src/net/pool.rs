// pool.rs — Connection pool: a slab with a free list, a dense array of
// active indices for iteration, and a sparse fd-to-index map, plus the
// process-wide idle list threaded through the connections themselves.

use std::os::fd::{AsRawFd, RawFd};

use crate::net::conn::Conn;

/// Null connection index (free-list terminator, idle-list end, unmapped fd).
pub const NO_CONN: u32 = u32::MAX;

enum PoolSlot {
    Vacant { next: u32 },
    Occupied(Box<Conn>),
}

pub struct ConnPool {
    slots: Vec<PoolSlot>,
    free_head: u32,
    active: Vec<u32>,
    by_fd: Vec<u32>,
}

impl Default for ConnPool {
    fn default() -> Self {
        ConnPool::new()
    }
}

impl ConnPool {
    pub fn new() -> ConnPool {
        ConnPool {
            slots: Vec::new(),
            free_head: NO_CONN,
            active: Vec::new(),
            by_fd: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn insert(&mut self, mut conn: Conn) -> u32 {
        let fd = conn.fd.as_raw_fd();
        conn.index_in_active = self.active.len();
        let idx = if self.free_head != NO_CONN {
            let idx = self.free_head;
            match self.slots[idx as usize] {
                PoolSlot::Vacant { next } => self.free_head = next,
                PoolSlot::Occupied(_) => unreachable!("free list into occupied pool slot"),
            }
            self.slots[idx as usize] = PoolSlot::Occupied(Box::new(conn));
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(PoolSlot::Occupied(Box::new(conn)));
            idx
        };
        self.active.push(idx);
        let fd = fd as usize;
        if fd >= self.by_fd.len() {
            self.by_fd.resize(fd + 1, NO_CONN);
        }
        self.by_fd[fd] = idx;
        idx
    }

    /// Detaches a connection from the pool; dropping the returned box
    /// closes the socket.
    pub fn remove(&mut self, idx: u32) -> Box<Conn> {
        let slot = std::mem::replace(
            &mut self.slots[idx as usize],
            PoolSlot::Vacant {
                next: self.free_head,
            },
        );
        let conn = match slot {
            PoolSlot::Occupied(c) => c,
            PoolSlot::Vacant { .. } => unreachable!("remove of vacant pool slot"),
        };
        self.free_head = idx;
        // Dense-array removal: swap the tail into the vacated position.
        let pos = conn.index_in_active;
        self.active.swap_remove(pos);
        if let Some(&moved) = self.active.get(pos) {
            self.conn_mut(moved).index_in_active = pos;
        }
        let fd = conn.fd.as_raw_fd() as usize;
        if fd < self.by_fd.len() {
            self.by_fd[fd] = NO_CONN;
        }
        conn
    }

    pub fn get(&self, idx: u32) -> Option<&Conn> {
        match self.slots.get(idx as usize) {
            Some(PoolSlot::Occupied(c)) => Some(c),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: u32) -> Option<&mut Conn> {
        match self.slots.get_mut(idx as usize) {
            Some(PoolSlot::Occupied(c)) => Some(c),
            _ => None,
        }
    }

    fn conn_mut(&mut self, idx: u32) -> &mut Conn {
        self.get_mut(idx).expect("live connection index")
    }

    pub fn idx_by_fd(&self, fd: RawFd) -> Option<u32> {
        match self.by_fd.get(fd as usize) {
            Some(&idx) if idx != NO_CONN => Some(idx),
            _ => None,
        }
    }

    pub fn active(&self) -> &[u32] {
        &self.active
    }
}

/// Idle list: least-recently-active connection at the head, fresh activity
/// pushed to the tail.  Links are intrusive (`idle_prev` / `idle_next` on
/// the connection), so all operations are O(1).
pub struct IdleList {
    head: u32,
    tail: u32,
}

impl Default for IdleList {
    fn default() -> Self {
        IdleList::new()
    }
}

impl IdleList {
    pub fn new() -> IdleList {
        IdleList {
            head: NO_CONN,
            tail: NO_CONN,
        }
    }

    pub fn head(&self) -> Option<u32> {
        (self.head != NO_CONN).then_some(self.head)
    }

    pub fn detach(&mut self, pool: &mut ConnPool, idx: u32) {
        let (prev, next) = {
            let c = pool.conn_mut(idx);
            let links = (c.idle_prev, c.idle_next);
            c.idle_prev = NO_CONN;
            c.idle_next = NO_CONN;
            links
        };
        if prev != NO_CONN {
            pool.conn_mut(prev).idle_next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NO_CONN {
            pool.conn_mut(next).idle_prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
    }

    pub fn push_tail(&mut self, pool: &mut ConnPool, idx: u32) {
        let old_tail = self.tail;
        {
            let c = pool.conn_mut(idx);
            c.idle_prev = old_tail;
            c.idle_next = NO_CONN;
        }
        if old_tail != NO_CONN {
            pool.conn_mut(old_tail).idle_next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }

    /// Marks fresh activity: move to the most-recently-active end.
    pub fn touch(&mut self, pool: &mut ConnPool, idx: u32) {
        if self.tail == idx {
            return;
        }
        self.detach(pool, idx);
        self.push_tail(pool, idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_conn() -> Conn {
        let (a, b) = nix::sys::socket::socketpair(
            nix::sys::socket::AddressFamily::Unix,
            nix::sys::socket::SockType::Stream,
            None,
            nix::sys::socket::SockFlag::SOCK_NONBLOCK,
        )
        .expect("socketpair");
        std::mem::forget(b);
        Conn::new(a, false, 0)
    }

    #[test]
    fn insert_remove_recycles_and_remaps() {
        let mut pool = ConnPool::new();
        let a = pool.insert(dummy_conn());
        let b = pool.insert(dummy_conn());
        let c = pool.insert(dummy_conn());
        assert_eq!(pool.len(), 3);
        let fd_b = pool.get(b).unwrap().fd.as_raw_fd();
        assert_eq!(pool.idx_by_fd(fd_b), Some(b));

        let removed = pool.remove(a);
        let fd_a = removed.fd.as_raw_fd();
        drop(removed);
        assert_eq!(pool.idx_by_fd(fd_a), None);
        assert_eq!(pool.len(), 2);
        // The swapped-in connection's dense index was fixed up.
        for &idx in pool.active() {
            let pos = pool.get(idx).unwrap().index_in_active;
            assert_eq!(pool.active()[pos], idx);
        }
        // Freed slot index is reused.
        let d = pool.insert(dummy_conn());
        assert_eq!(d, a);
        let _ = c;
    }

    #[test]
    fn idle_list_orders_by_activity() {
        let mut pool = ConnPool::new();
        let mut idle = IdleList::new();
        let a = pool.insert(dummy_conn());
        let b = pool.insert(dummy_conn());
        let c = pool.insert(dummy_conn());
        idle.push_tail(&mut pool, a);
        idle.push_tail(&mut pool, b);
        idle.push_tail(&mut pool, c);
        assert_eq!(idle.head(), Some(a));
        // Activity on the head moves it behind everyone else.
        idle.touch(&mut pool, a);
        assert_eq!(idle.head(), Some(b));
        idle.detach(&mut pool, b);
        assert_eq!(idle.head(), Some(c));
        idle.detach(&mut pool, c);
        assert_eq!(idle.head(), Some(a));
        idle.detach(&mut pool, a);
        assert_eq!(idle.head(), None);
    }
}
