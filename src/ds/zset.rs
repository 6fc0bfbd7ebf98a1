// zset.rs — Sorted set: a by-name hash index plus an order-statistic AVL
// tree keyed by (score, name).
//
// Members live in one arena; the same u32 id is stored by the hash side and
// threaded through the tree's link fields, so each member carries exactly one
// allocation for its name and nothing else.  Tree order is (score, name)
// with scores closer than [`SCORE_EPS`] treated as ties and broken by byte
// comparison of the names (a strict prefix sorts first).

use crate::ds::avl::{self, AvlNode, AvlStore, NIL};
use crate::ds::hmap::HMap;
use crate::hashfn::key_hash;

/// Scores closer than this compare as equal and fall through to the name
/// tie-break.
pub const SCORE_EPS: f64 = 1e-9;

/// Strict (score, name) ordering used by the tree.
#[inline]
pub fn zless(a_score: f64, a_name: &[u8], b_score: f64, b_name: &[u8]) -> bool {
    if (a_score - b_score).abs() >= SCORE_EPS {
        return a_score < b_score;
    }
    a_name < b_name
}

pub struct ZNode {
    pub score: f64,
    pub name: Box<[u8]>,
    avl: AvlNode,
}

enum NodeSlot {
    Vacant { next: u32 },
    Occupied(ZNode),
}

pub struct ZSet {
    nodes: Vec<NodeSlot>,
    free_head: u32,
    root: u32,
    by_name: HMap,
}

impl AvlStore for ZSet {
    fn avl(&self, i: u32) -> &AvlNode {
        match &self.nodes[i as usize] {
            NodeSlot::Occupied(n) => &n.avl,
            NodeSlot::Vacant { .. } => unreachable!("avl link into vacant slot"),
        }
    }
    fn avl_mut(&mut self, i: u32) -> &mut AvlNode {
        match &mut self.nodes[i as usize] {
            NodeSlot::Occupied(n) => &mut n.avl,
            NodeSlot::Vacant { .. } => unreachable!("avl link into vacant slot"),
        }
    }
}

impl Default for ZSet {
    fn default() -> Self {
        ZSet::new()
    }
}

impl ZSet {
    pub fn new() -> ZSet {
        ZSet {
            nodes: Vec::new(),
            free_head: NIL,
            root: NIL,
            by_name: HMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn znode(&self, i: u32) -> &ZNode {
        match &self.nodes[i as usize] {
            NodeSlot::Occupied(n) => n,
            NodeSlot::Vacant { .. } => unreachable!("reference into vacant slot"),
        }
    }

    fn znode_mut(&mut self, i: u32) -> &mut ZNode {
        match &mut self.nodes[i as usize] {
            NodeSlot::Occupied(n) => n,
            NodeSlot::Vacant { .. } => unreachable!("reference into vacant slot"),
        }
    }

    pub fn name_of(&self, i: u32) -> &[u8] {
        &self.znode(i).name
    }

    pub fn score_of(&self, i: u32) -> f64 {
        self.znode(i).score
    }

    fn alloc(&mut self, node: ZNode) -> u32 {
        if self.free_head != NIL {
            let idx = self.free_head;
            match self.nodes[idx as usize] {
                NodeSlot::Vacant { next } => self.free_head = next,
                NodeSlot::Occupied(_) => unreachable!("free list into occupied slot"),
            }
            self.nodes[idx as usize] = NodeSlot::Occupied(node);
            idx
        } else {
            let idx = self.nodes.len() as u32;
            self.nodes.push(NodeSlot::Occupied(node));
            idx
        }
    }

    fn release(&mut self, idx: u32) {
        self.nodes[idx as usize] = NodeSlot::Vacant {
            next: self.free_head,
        };
        self.free_head = idx;
    }

    fn tree_insert(&mut self, idx: u32) {
        if self.root == NIL {
            self.root = idx;
            return;
        }
        let mut cur = self.root;
        loop {
            let go_left = {
                let new = self.znode(idx);
                let resident = self.znode(cur);
                zless(new.score, &new.name, resident.score, &resident.name)
            };
            let next = if go_left {
                self.avl(cur).left
            } else {
                self.avl(cur).right
            };
            if next == NIL {
                if go_left {
                    self.avl_mut(cur).left = idx;
                } else {
                    self.avl_mut(cur).right = idx;
                }
                self.avl_mut(idx).parent = cur;
                break;
            }
            cur = next;
        }
        self.root = avl::fix(self, idx);
    }

    fn tree_detach(&mut self, idx: u32) {
        self.root = avl::delete(self, idx);
        *self.avl_mut(idx) = AvlNode::solo();
    }

    fn find(&mut self, name: &[u8]) -> Option<u32> {
        let hash = key_hash(name);
        let nodes = &self.nodes;
        self.by_name.lookup(hash, |id| {
            match &nodes[id as usize] {
                NodeSlot::Occupied(n) => &*n.name == name,
                NodeSlot::Vacant { .. } => false,
            }
        })
    }

    /// Inserts a member or updates its score.  Returns `true` when the
    /// member is new.  A score change smaller than [`SCORE_EPS`] does not
    /// move the member within the tree.
    pub fn add(&mut self, name: &[u8], score: f64) -> bool {
        if let Some(idx) = self.find(name) {
            let old = self.znode(idx).score;
            if (score - old).abs() < SCORE_EPS {
                self.znode_mut(idx).score = score;
            } else {
                self.tree_detach(idx);
                self.znode_mut(idx).score = score;
                self.tree_insert(idx);
            }
            return false;
        }
        let idx = self.alloc(ZNode {
            score,
            name: name.into(),
            avl: AvlNode::solo(),
        });
        self.tree_insert(idx);
        let hash = key_hash(name);
        let nodes = &self.nodes;
        self.by_name.insert(hash, idx, |id| {
            match &nodes[id as usize] {
                NodeSlot::Occupied(n) => &*n.name == name,
                NodeSlot::Vacant { .. } => false,
            }
        });
        true
    }

    /// Member score, if present.
    pub fn score(&mut self, name: &[u8]) -> Option<f64> {
        self.find(name).map(|idx| self.znode(idx).score)
    }

    /// Removes a member.  Returns `true` when it existed.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        let hash = key_hash(name);
        let nodes = &self.nodes;
        let popped = self.by_name.pop(hash, |id| {
            match &nodes[id as usize] {
                NodeSlot::Occupied(n) => &*n.name == name,
                NodeSlot::Vacant { .. } => false,
            }
        });
        match popped {
            Some(idx) => {
                self.tree_detach(idx);
                self.release(idx);
                true
            }
            None => false,
        }
    }

    /// First member with `(score, name) >=` the given key, or NIL.
    pub fn query(&self, score: f64, name: &[u8]) -> u32 {
        let mut found = NIL;
        let mut cur = self.root;
        while cur != NIL {
            let n = self.znode(cur);
            if zless(n.score, &n.name, score, name) {
                cur = self.avl(cur).right;
            } else {
                found = cur;
                cur = self.avl(cur).left;
            }
        }
        found
    }

    /// Walks `k` positions through the rank order from `idx`.
    pub fn offset(&self, idx: u32, k: i64) -> u32 {
        if idx == NIL {
            return NIL;
        }
        avl::offset(self, idx, k)
    }

    /// Number of members ranked before `idx`.
    pub fn rank(&self, idx: u32) -> u64 {
        avl::rank(self, idx)
    }

    /// Visits every member in rank order.
    pub fn for_each_inorder(&self, mut visit: impl FnMut(&[u8], f64)) {
        let mut cur = avl::leftmost(self, self.root);
        while cur != NIL {
            let n = self.znode(cur);
            visit(&n.name, n.score);
            cur = avl::offset(self, cur, 1);
        }
    }
}
