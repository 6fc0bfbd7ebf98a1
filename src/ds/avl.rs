// avl.rs — Order-statistic AVL tree over arena indices.
//
// Nodes live in an arena owned by the caller (the sorted set); the tree code
// only manipulates link fields reached through the [`AvlStore`] accessor
// trait.  Each node carries its subtree height (`depth`) and size (`cnt`),
// so rank and offset-by-rank queries run in O(log n).
//
// Comparison is the caller's business: insertion walks the tree in caller
// code and attaches a prepared node; this module restores balance afterward.

/// Null link.
pub const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Debug)]
pub struct AvlNode {
    pub left: u32,
    pub right: u32,
    pub parent: u32,
    pub depth: u32,
    pub cnt: u32,
}

impl AvlNode {
    /// A detached single-node subtree.
    pub fn solo() -> AvlNode {
        AvlNode {
            left: NIL,
            right: NIL,
            parent: NIL,
            depth: 1,
            cnt: 1,
        }
    }
}

/// Arena accessor.  Implementors guarantee that every index handed to the
/// tree functions resolves to a live node.
pub trait AvlStore {
    fn avl(&self, i: u32) -> &AvlNode;
    fn avl_mut(&mut self, i: u32) -> &mut AvlNode;
}

#[inline]
pub fn depth<S: AvlStore>(s: &S, i: u32) -> u32 {
    if i == NIL { 0 } else { s.avl(i).depth }
}

#[inline]
pub fn cnt<S: AvlStore>(s: &S, i: u32) -> u32 {
    if i == NIL { 0 } else { s.avl(i).cnt }
}

/// Recomputes `depth` and `cnt` from the children.
pub fn update<S: AvlStore>(s: &mut S, i: u32) {
    let (l, r) = {
        let n = s.avl(i);
        (n.left, n.right)
    };
    let d = 1 + depth(s, l).max(depth(s, r));
    let c = 1 + cnt(s, l) + cnt(s, r);
    let n = s.avl_mut(i);
    n.depth = d;
    n.cnt = c;
}

/// Reattaches `child` in place of `node` under `parent` (either side), or
/// leaves `child` as a root when `parent` is NIL.
fn replace_child<S: AvlStore>(s: &mut S, parent: u32, node: u32, child: u32) {
    if parent == NIL {
        return;
    }
    let p = s.avl_mut(parent);
    if p.left == node {
        p.left = child;
    } else {
        debug_assert_eq!(p.right, node);
        p.right = child;
    }
}

fn rot_left<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let parent = s.avl(node).parent;
    let new_node = s.avl(node).right;
    let inner = s.avl(new_node).left;
    debug_assert_ne!(new_node, NIL);

    s.avl_mut(node).right = inner;
    if inner != NIL {
        s.avl_mut(inner).parent = node;
    }
    s.avl_mut(new_node).parent = parent;
    replace_child(s, parent, node, new_node);
    s.avl_mut(new_node).left = node;
    s.avl_mut(node).parent = new_node;

    update(s, node);
    update(s, new_node);
    new_node
}

fn rot_right<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let parent = s.avl(node).parent;
    let new_node = s.avl(node).left;
    let inner = s.avl(new_node).right;
    debug_assert_ne!(new_node, NIL);

    s.avl_mut(node).left = inner;
    if inner != NIL {
        s.avl_mut(inner).parent = node;
    }
    s.avl_mut(new_node).parent = parent;
    replace_child(s, parent, node, new_node);
    s.avl_mut(new_node).right = node;
    s.avl_mut(node).parent = new_node;

    update(s, node);
    update(s, new_node);
    new_node
}

/// Left subtree is two levels deeper: rotate right, with an inner pre-spin
/// for the left-right shape.
fn fix_left<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let l = s.avl(node).left;
    if depth(s, s.avl(l).left) < depth(s, s.avl(l).right) {
        rot_left(s, l);
    }
    rot_right(s, node)
}

fn fix_right<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let r = s.avl(node).right;
    if depth(s, s.avl(r).right) < depth(s, s.avl(r).left) {
        rot_right(s, r);
    }
    rot_left(s, node)
}

/// Rebalances from `node` up to the root.  Returns the (possibly new) root.
pub fn fix<S: AvlStore>(s: &mut S, mut node: u32) -> u32 {
    loop {
        update(s, node);
        let (l, r) = {
            let n = s.avl(node);
            (n.left, n.right)
        };
        let (dl, dr) = (depth(s, l), depth(s, r));
        let mut fixed = node;
        if dl == dr + 2 {
            fixed = fix_left(s, node);
        } else if dl + 2 == dr {
            fixed = fix_right(s, node);
        }
        let parent = s.avl(fixed).parent;
        if parent == NIL {
            return fixed;
        }
        node = parent;
    }
}

/// Detaches a node with at most one child.  Returns the new root (NIL when
/// the tree becomes empty).  The node itself is left dangling for the caller
/// to recycle.
fn delete_easy<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let (l, r, parent) = {
        let n = s.avl(node);
        (n.left, n.right, n.parent)
    };
    debug_assert!(l == NIL || r == NIL);
    let child = if l != NIL { l } else { r };
    if child != NIL {
        s.avl_mut(child).parent = parent;
    }
    if parent == NIL {
        return child;
    }
    replace_child(s, parent, node, child);
    fix(s, parent)
}

/// Detaches `node` from the tree, using successor replacement when it has
/// two children.  Returns the new root.  Frees nothing.
pub fn delete<S: AvlStore>(s: &mut S, node: u32) -> u32 {
    let (l, r) = {
        let n = s.avl(node);
        (n.left, n.right)
    };
    if l == NIL || r == NIL {
        return delete_easy(s, node);
    }
    // In-order successor: leftmost of the right subtree.
    let mut victim = r;
    while s.avl(victim).left != NIL {
        victim = s.avl(victim).left;
    }
    let root = delete_easy(s, victim);
    // Graft the successor into the node's position, links and all.
    let grafted = *s.avl(node);
    *s.avl_mut(victim) = grafted;
    let (vl, vr, vp) = {
        let n = s.avl(victim);
        (n.left, n.right, n.parent)
    };
    if vl != NIL {
        s.avl_mut(vl).parent = victim;
    }
    if vr != NIL {
        s.avl_mut(vr).parent = victim;
    }
    if vp == NIL {
        victim
    } else {
        replace_child(s, vp, node, victim);
        root
    }
}

/// Walks `k` positions through the in-order sequence (negative `k` walks
/// backward).  Returns NIL when the walk leaves the tree.
pub fn offset<S: AvlStore>(s: &S, mut node: u32, k: i64) -> u32 {
    let mut pos: i64 = 0;
    while pos != k {
        let n = s.avl(node);
        if pos < k && pos + cnt(s, n.right) as i64 >= k {
            // Target is inside the right subtree.
            node = n.right;
            pos += cnt(s, s.avl(node).left) as i64 + 1;
        } else if pos > k && pos - (cnt(s, n.left) as i64) <= k {
            // Target is inside the left subtree.
            node = n.left;
            pos -= cnt(s, s.avl(node).right) as i64 + 1;
        } else {
            let parent = n.parent;
            if parent == NIL {
                return NIL;
            }
            if s.avl(parent).right == node {
                pos -= cnt(s, n.left) as i64 + 1;
            } else {
                pos += cnt(s, n.right) as i64 + 1;
            }
            node = parent;
        }
    }
    node
}

/// Number of nodes strictly before `node` in the in-order sequence.
pub fn rank<S: AvlStore>(s: &S, node: u32) -> u64 {
    let mut r = cnt(s, s.avl(node).left) as u64;
    let mut cur = node;
    loop {
        let parent = s.avl(cur).parent;
        if parent == NIL {
            return r;
        }
        if s.avl(parent).right == cur {
            r += cnt(s, s.avl(parent).left) as u64 + 1;
        }
        cur = parent;
    }
}

/// Leftmost node of the subtree rooted at `node` (NIL in, NIL out).
pub fn leftmost<S: AvlStore>(s: &S, mut node: u32) -> u32 {
    if node == NIL {
        return NIL;
    }
    while s.avl(node).left != NIL {
        node = s.avl(node).left;
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    // A plain arena of integers; tree order == numeric order.
    struct IntTree {
        vals: Vec<i64>,
        nodes: Vec<AvlNode>,
        root: u32,
    }

    impl AvlStore for IntTree {
        fn avl(&self, i: u32) -> &AvlNode {
            &self.nodes[i as usize]
        }
        fn avl_mut(&mut self, i: u32) -> &mut AvlNode {
            &mut self.nodes[i as usize]
        }
    }

    impl IntTree {
        fn new() -> IntTree {
            IntTree {
                vals: Vec::new(),
                nodes: Vec::new(),
                root: NIL,
            }
        }

        fn insert(&mut self, v: i64) -> u32 {
            let idx = self.vals.len() as u32;
            self.vals.push(v);
            self.nodes.push(AvlNode::solo());
            if self.root == NIL {
                self.root = idx;
                return idx;
            }
            let mut cur = self.root;
            loop {
                let next = if v < self.vals[cur as usize] {
                    self.avl(cur).left
                } else {
                    self.avl(cur).right
                };
                if next == NIL {
                    if v < self.vals[cur as usize] {
                        self.avl_mut(cur).left = idx;
                    } else {
                        self.avl_mut(cur).right = idx;
                    }
                    self.avl_mut(idx).parent = cur;
                    break;
                }
                cur = next;
            }
            self.root = fix(self, idx);
            idx
        }

        fn remove(&mut self, idx: u32) {
            self.root = delete(self, idx);
        }

        fn check(&self, i: u32) -> (u32, u32) {
            if i == NIL {
                return (0, 0);
            }
            let n = self.avl(i);
            let (dl, cl) = self.check(n.left);
            let (dr, cr) = self.check(n.right);
            assert!(dl.abs_diff(dr) <= 1, "imbalance at {i}");
            assert_eq!(n.depth, 1 + dl.max(dr));
            assert_eq!(n.cnt, 1 + cl + cr);
            if n.left != NIL {
                assert_eq!(self.avl(n.left).parent, i);
                assert!(self.vals[n.left as usize] <= self.vals[i as usize]);
            }
            if n.right != NIL {
                assert_eq!(self.avl(n.right).parent, i);
                assert!(self.vals[n.right as usize] >= self.vals[i as usize]);
            }
            (n.depth, n.cnt)
        }

        fn inorder(&self) -> Vec<i64> {
            let mut out = Vec::new();
            let mut cur = leftmost(self, self.root);
            while cur != NIL {
                out.push(self.vals[cur as usize]);
                cur = offset(self, cur, 1);
            }
            out
        }
    }

    #[test]
    fn stays_balanced_under_sequential_insert() {
        let mut t = IntTree::new();
        for v in 0..512 {
            t.insert(v);
            t.check(t.root);
        }
        assert_eq!(t.inorder(), (0..512).collect::<Vec<_>>());
    }

    #[test]
    fn stays_balanced_under_scrambled_insert_and_delete() {
        let mut t = IntTree::new();
        let mut ids = Vec::new();
        // Deterministic scramble, no RNG dependency.
        let mut v = 1i64;
        for _ in 0..400 {
            v = (v * 1103515245 + 12345) % 1000;
            ids.push((t.insert(v), v));
        }
        t.check(t.root);
        for (idx, _) in ids.iter().step_by(3) {
            t.remove(*idx);
            t.check(t.root);
        }
        // Remaining in-order sequence is still sorted.
        let seq = t.inorder();
        assert!(seq.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn offset_walks_both_ways() {
        let mut t = IntTree::new();
        for v in 0..100 {
            t.insert(v);
        }
        let first = leftmost(&t, t.root);
        assert_eq!(t.vals[first as usize], 0);
        let fifth = offset(&t, first, 5);
        assert_eq!(t.vals[fifth as usize], 5);
        let back = offset(&t, fifth, -3);
        assert_eq!(t.vals[back as usize], 2);
        assert_eq!(offset(&t, first, 100), NIL);
        assert_eq!(offset(&t, first, -1), NIL);
    }

    #[test]
    fn rank_matches_offset() {
        let mut t = IntTree::new();
        for v in 0..64 {
            t.insert(v);
        }
        let first = leftmost(&t, t.root);
        for k in 0..64i64 {
            let n = offset(&t, first, k);
            assert_eq!(rank(&t, n), k as u64);
        }
    }
}
