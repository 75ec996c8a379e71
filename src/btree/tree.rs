use std::{env, fmt, marker::PhantomData};

use itertools::Itertools;
use log::debug;

use crate::{
    btree::{
        indexed::Indexed,
        node::{InteriorNode, LeafNode},
    },
    error::RailError,
    io::{Decodeable, DiskSize, Encodeable},
    storage::{
        buffer_pool::BufferPool,
        config::{ConfigStore, Slot},
        handle::Handle,
    },
    types::{Pod, RailResult},
    utils::HandyRwLock,
};

/// One step of a descent: the interior node passed through and the child
/// position taken out of it. Rebalancing consumes the stack bottom-up, which
/// is why nodes never store a parent handle.
type StackFrame = (Handle, usize);

/// B+ Tree
///
/// A persistent ordered multimap from `K` to `V`. Duplicate keys are
/// allowed and kept ordered by value; exact `(key, value)` pairs address
/// removals. Nodes live in buffer pool pages, one node per page; the root
/// bookkeeping (height, size, root handle) lives in three config slots
/// handed over by the caller, so several trees can share one config store.
///
/// Interior separators store `(key, id)` where `id` is the value's
/// `Indexed` projection; leaves store full values.
///
/// Pin budget: an operation pins at most 3 pages at any moment (a parent
/// plus two of its children during a split, borrow or merge), so any pool
/// with at least 3 frames can serve the tree regardless of its height.
pub struct BPlusTree<K, V: Indexed> {
    pool: Pod<BufferPool>,

    height: Slot<u32>,
    tree_size: Slot<u64>,
    root: Slot<Handle>,

    leaf_capacity: usize,
    interior_capacity: usize,

    _marker: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Encodeable + Decodeable + DiskSize + Ord + Clone,
    V: Encodeable + Decodeable + DiskSize + Ord + Clone + Indexed,
{
    /// Build a tree over `pool` whose root bookkeeping lives in the three
    /// given slots. Node capacities are derived from the page size.
    pub fn new(
        pool: Pod<BufferPool>,
        height: Slot<u32>,
        tree_size: Slot<u64>,
        root: Slot<Handle>,
    ) -> Self {
        let page_size = BufferPool::get_page_size();

        // size + sibling in front of the pairs
        let leaf_entry = K::DISK_SIZE + V::DISK_SIZE;
        let leaf_capacity = (page_size - 8) / leaf_entry;

        // layer + size in front of the separators
        let interior_entry = K::DISK_SIZE + <V::Id as DiskSize>::DISK_SIZE + Handle::DISK_SIZE;
        let interior_capacity = (page_size - 8) / interior_entry;

        assert!(
            leaf_capacity >= 4 && interior_capacity >= 4,
            "page size {} cannot hold 4 entries per node",
            page_size
        );

        Self {
            pool,
            height,
            tree_size,
            root,
            leaf_capacity,
            interior_capacity,
            _marker: PhantomData,
        }
    }

    /// Track the three root slots in `config` (height, size, root, in that
    /// order) and build the tree from them. Callers opening several trees
    /// must call this in the same order on every run.
    pub fn open(pool: Pod<BufferPool>, config: &ConfigStore) -> Result<Self, RailError> {
        let height = config.track::<u32>(0)?;
        let tree_size = config.track::<u64>(0)?;
        let root = config.track::<Handle>(Handle::null())?;
        Ok(Self::new(pool, height, tree_size, root))
    }

    /// Clamp both node capacities, so tests can exercise deep trees with a
    /// handful of pairs.
    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        assert!(
            capacity >= 4 && capacity <= self.leaf_capacity && capacity <= self.interior_capacity,
            "node capacity {} out of range",
            capacity
        );
        self.leaf_capacity = capacity;
        self.interior_capacity = capacity;
        self
    }

    pub fn size(&self) -> u64 {
        self.tree_size.val
    }

    pub fn height(&self) -> u32 {
        self.height.val
    }

    fn leaf_split_threshold(&self) -> usize {
        self.leaf_capacity * 3 / 4
    }

    fn leaf_merge_threshold(&self) -> usize {
        self.leaf_capacity / 4
    }

    fn interior_split_threshold(&self) -> usize {
        self.interior_capacity * 3 / 4
    }

    fn interior_merge_threshold(&self) -> usize {
        self.interior_capacity / 4
    }

    /// Walk from the root to the leaf that should hold `target`, recording
    /// the `(node, child position)` pairs of every interior step.
    fn descend_to_leaf(
        &self,
        target: &(K, V::Id),
    ) -> Result<(Handle, Vec<StackFrame>), RailError> {
        let mut handle = self.root.val;
        let mut stack: Vec<StackFrame> = Vec::new();

        for _ in 1..self.height.val {
            let next;
            // hold the interior node
            {
                let node = handle.read::<InteriorNode<K, V::Id>>(&self.pool)?;
                let child_pos = node.child_for_pair(target);
                stack.push((handle, child_pos));
                next = node.children[child_pos];
            }
            // release the interior node before pinning the child
            assert!(!next.is_null(), "interior node with a null child");
            handle = next;
        }

        Ok((handle, stack))
    }

    /// Register a key-value pair, keeping duplicates ordered by value.
    pub fn insert(&mut self, key: &K, value: &V) -> RailResult {
        self.tree_size.val += 1;

        if self.height.val == 0 {
            // create the first leaf and make it the root
            let handle = self.pool.wl().allocate()?;
            let mut leaf: LeafNode<K, V> = LeafNode::new();
            leaf.entries.push((key.clone(), value.clone()));
            handle.write_init(&self.pool, leaf)?;

            self.root.val = handle;
            self.height.val = 1;
            return Ok(());
        }

        let target = (key.clone(), value.id());
        let (leaf_handle, stack) = self.descend_to_leaf(&target)?;

        let leaf_size;
        // hold the leaf
        {
            let mut leaf = leaf_handle.write::<LeafNode<K, V>>(&self.pool)?;
            let pair = (key.clone(), value.clone());
            let pos = leaf.lower_bound_pair(&pair);
            leaf.entries.insert(pos, pair);
            leaf_size = leaf.entries.len();
        }
        // release the leaf

        // propagate splits bottom-up along the descent stack
        let mut cursor = stack.len() as isize - 1;
        let mut go_on = false;
        if leaf_size >= self.leaf_split_threshold() && cursor >= 0 {
            go_on = self.split_leaf_child(&stack[cursor as usize])?;
            cursor -= 1;
        }
        while cursor >= 0 && go_on {
            go_on = self.split_interior_child(&stack[cursor as usize])?;
            cursor -= 1;
        }

        // the root has no stack frame; check it separately
        if self.height.val == 1 {
            let root_size = self
                .root
                .val
                .read::<LeafNode<K, V>>(&self.pool)?
                .entries
                .len();
            if root_size >= self.leaf_split_threshold() {
                self.split_root(true)?;
            }
        } else {
            let root_size = self
                .root
                .val
                .read::<InteriorNode<K, V::Id>>(&self.pool)?
                .entries
                .len();
            if root_size >= self.interior_split_threshold() {
                self.split_root(false)?;
            }
        }

        Ok(())
    }

    /// Split the leaf at `frame`'s child position: move the upper half of
    /// its pairs into a fresh right sibling and file the new separator in
    /// the parent.
    ///
    /// Returns whether the parent itself crossed the split threshold.
    fn split_leaf_child(&mut self, frame: &StackFrame) -> Result<bool, RailError> {
        let (parent_handle, child_pos) = *frame;
        let new_handle = self.pool.wl().allocate()?;

        let mut parent = parent_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
        let child_handle = parent.children[child_pos];

        let separator;
        // hold the old leaf
        {
            let mut child = child_handle.write::<LeafNode<K, V>>(&self.pool)?;
            let move_count = child.entries.len() / 2;
            let keep_count = child.entries.len() - move_count;

            let mut new_leaf: LeafNode<K, V> = LeafNode::new();
            new_leaf.entries = child.entries.split_off(keep_count);
            new_leaf.sibling = child.sibling;
            child.sibling = new_handle;

            // the parent separator carries the projection, not the raw pair
            let first = &new_leaf.entries[0];
            separator = (first.0.clone(), first.1.id());

            new_handle.write_init(&self.pool, new_leaf)?;
        }
        // release the old leaf

        parent.entries.insert(child_pos + 1, separator);
        parent.children.insert(child_pos + 1, new_handle);

        Ok(parent.entries.len() >= self.interior_split_threshold())
    }

    /// Split the interior node at `frame`'s child position, the same way a
    /// leaf splits except that no sibling links are involved.
    fn split_interior_child(&mut self, frame: &StackFrame) -> Result<bool, RailError> {
        let (parent_handle, child_pos) = *frame;
        let new_handle = self.pool.wl().allocate()?;

        let mut parent = parent_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
        let child_handle = parent.children[child_pos];

        let separator;
        // hold the old node
        {
            let mut child = child_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
            let move_count = child.entries.len() / 2;
            let keep_count = child.entries.len() - move_count;

            let mut new_node: InteriorNode<K, V::Id> = InteriorNode::new(child.layer);
            new_node.entries = child.entries.split_off(keep_count);
            new_node.children = child.children.split_off(keep_count);
            separator = new_node.entries[0].clone();

            new_handle.write_init(&self.pool, new_node)?;
        }
        // release the old node

        parent.entries.insert(child_pos + 1, separator);
        parent.children.insert(child_pos + 1, new_handle);

        Ok(parent.entries.len() >= self.interior_split_threshold())
    }

    /// Put a fresh interior node above the overflowing root, then split the
    /// old root as that node's sole child. Raises the height by one.
    fn split_root(&mut self, root_is_leaf: bool) -> RailResult {
        let old_root = self.root.val;
        let new_root_handle = self.pool.wl().allocate()?;

        let mut new_root: InteriorNode<K, V::Id> = InteriorNode::new(self.height.val - 1);
        let separator = if root_is_leaf {
            let leaf = old_root.read::<LeafNode<K, V>>(&self.pool)?;
            let first = &leaf.entries[0];
            (first.0.clone(), first.1.id())
        } else {
            let node = old_root.read::<InteriorNode<K, V::Id>>(&self.pool)?;
            node.entries[0].clone()
        };
        new_root.entries.push(separator);
        new_root.children.push(old_root);
        new_root_handle.write_init(&self.pool, new_root)?;

        self.root.val = new_root_handle;
        self.height.val += 1;

        debug!(
            "root split, new root {}, height {}",
            new_root_handle, self.height.val
        );

        if root_is_leaf {
            self.split_leaf_child(&(new_root_handle, 0))?;
        } else {
            self.split_interior_child(&(new_root_handle, 0))?;
        }
        Ok(())
    }

    /// Remove one exact `(key, value)` pair.
    ///
    /// Returns whether a matching pair existed. Underflow propagates
    /// bottom-up: borrow from the left sibling, else from the right, else
    /// merge (rightward when possible).
    pub fn remove(&mut self, key: &K, value: &V) -> Result<bool, RailError> {
        if self.height.val == 0 {
            return Ok(false);
        }

        let target = (key.clone(), value.id());
        let (leaf_handle, stack) = self.descend_to_leaf(&target)?;

        let pair = (key.clone(), value.clone());
        let pos;
        // a read pin suffices to learn the pair is absent
        {
            let leaf = leaf_handle.read::<LeafNode<K, V>>(&self.pool)?;
            pos = leaf.lower_bound_pair(&pair);
            if pos >= leaf.entries.len() || leaf.entries[pos] != pair {
                return Ok(false);
            }
        }

        let leaf_size;
        {
            let mut leaf = leaf_handle.write::<LeafNode<K, V>>(&self.pool)?;
            leaf.entries.remove(pos);
            leaf_size = leaf.entries.len();
        }
        self.tree_size.val -= 1;

        // propagate underflow bottom-up along the descent stack
        let mut cursor = stack.len() as isize - 1;
        let mut go_on = false;
        if leaf_size <= self.leaf_merge_threshold() && cursor >= 0 {
            go_on = self.rebalance_leaf_child(&stack[cursor as usize])?;
            cursor -= 1;
        }
        while cursor >= 0 && go_on {
            go_on = self.rebalance_interior_child(&stack[cursor as usize])?;
            cursor -= 1;
        }

        if self.height.val == 1 {
            // the root leaf is exempt from the occupancy rules, but once it
            // runs empty the page is returned and the tree vanishes
            if leaf_size == 0 {
                let old_root = self.root.val;
                self.pool.wl().free(old_root)?;
                self.root.val = Handle::null();
                self.height.val = 0;
            }
        } else if go_on {
            let root_size = self
                .root
                .val
                .read::<InteriorNode<K, V::Id>>(&self.pool)?
                .entries
                .len();
            if root_size <= 1 {
                self.shrink_root()?;
            }
        }

        Ok(true)
    }

    /// Promote the sole child of the root, lowering the height by one.
    fn shrink_root(&mut self) -> RailResult {
        let old_root = self.root.val;
        let child;
        {
            let node = old_root.read::<InteriorNode<K, V::Id>>(&self.pool)?;
            child = node.children[0];
        }
        self.pool.wl().free(old_root)?;
        self.root.val = child;
        self.height.val -= 1;

        debug!("root shrunk, new root {}, height {}", child, self.height.val);
        Ok(())
    }

    /// Bring the underflowing leaf at `frame`'s child position back above
    /// the merge threshold.
    ///
    /// Returns whether the parent fell to the merge threshold in turn.
    fn rebalance_leaf_child(&mut self, frame: &StackFrame) -> Result<bool, RailError> {
        let (parent_handle, child_pos) = *frame;
        let mut parent = parent_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
        let child_handle = parent.children[child_pos];
        let merge_threshold = self.leaf_merge_threshold();

        // A1. borrow from the left sibling
        if child_pos > 0 {
            let left_handle = parent.children[child_pos - 1];
            let left_size = left_handle
                .read::<LeafNode<K, V>>(&self.pool)?
                .entries
                .len();
            if left_size > merge_threshold + 1 {
                let moved;
                {
                    let mut left = left_handle.write::<LeafNode<K, V>>(&self.pool)?;
                    moved = left.entries.pop().unwrap();
                }
                let separator = (moved.0.clone(), moved.1.id());
                {
                    let mut child = child_handle.write::<LeafNode<K, V>>(&self.pool)?;
                    child.entries.insert(0, moved);
                }
                parent.entries[child_pos] = separator;
                return Ok(false);
            }
        }

        // A2. borrow from the right sibling
        if child_pos + 1 < parent.children.len() {
            let right_handle = parent.children[child_pos + 1];
            let right_size = right_handle
                .read::<LeafNode<K, V>>(&self.pool)?
                .entries
                .len();
            if right_size > merge_threshold + 1 {
                let moved;
                let separator;
                {
                    let mut right = right_handle.write::<LeafNode<K, V>>(&self.pool)?;
                    moved = right.entries.remove(0);
                    let first = &right.entries[0];
                    separator = (first.0.clone(), first.1.id());
                }
                {
                    let mut child = child_handle.write::<LeafNode<K, V>>(&self.pool)?;
                    child.entries.push(moved);
                }
                parent.entries[child_pos + 1] = separator;
                return Ok(false);
            }
        }

        // B. merge, preferring the right sibling
        if child_pos + 1 < parent.children.len() {
            self.merge_leaf_with_right(&mut parent, child_pos)?;
        } else {
            self.merge_leaf_with_right(&mut parent, child_pos - 1)?;
        }

        Ok(parent.entries.len() <= self.interior_merge_threshold())
    }

    /// Concatenate the leaf at `node_pos + 1` into the one at `node_pos`,
    /// re-link the sibling chain, drop the separator and free the page.
    fn merge_leaf_with_right(
        &mut self,
        parent: &mut InteriorNode<K, V::Id>,
        node_pos: usize,
    ) -> RailResult {
        let left_handle = parent.children[node_pos];
        let right_handle = parent.children[node_pos + 1];

        // hold the left leaf
        {
            let mut left = left_handle.write::<LeafNode<K, V>>(&self.pool)?;
            let mut moved_entries;
            let moved_sibling;
            {
                let right = right_handle.read::<LeafNode<K, V>>(&self.pool)?;
                moved_entries = right.entries.clone();
                moved_sibling = right.sibling;
            }
            left.entries.append(&mut moved_entries);
            left.sibling = moved_sibling;
        }
        // release the left leaf

        parent.entries.remove(node_pos + 1);
        parent.children.remove(node_pos + 1);

        self.pool.wl().free(right_handle)?;
        Ok(())
    }

    /// The interior twin of `rebalance_leaf_child`; borrowed entries carry
    /// their child handles along.
    fn rebalance_interior_child(&mut self, frame: &StackFrame) -> Result<bool, RailError> {
        let (parent_handle, child_pos) = *frame;
        let mut parent = parent_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
        let child_handle = parent.children[child_pos];
        let merge_threshold = self.interior_merge_threshold();

        // A1. borrow from the left sibling
        if child_pos > 0 {
            let left_handle = parent.children[child_pos - 1];
            let left_size = left_handle
                .read::<InteriorNode<K, V::Id>>(&self.pool)?
                .entries
                .len();
            if left_size > merge_threshold + 1 {
                let moved_entry;
                let moved_child;
                {
                    let mut left = left_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
                    moved_entry = left.entries.pop().unwrap();
                    moved_child = left.children.pop().unwrap();
                }
                {
                    let mut child = child_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
                    child.entries.insert(0, moved_entry.clone());
                    child.children.insert(0, moved_child);
                }
                parent.entries[child_pos] = moved_entry;
                return Ok(false);
            }
        }

        // A2. borrow from the right sibling
        if child_pos + 1 < parent.children.len() {
            let right_handle = parent.children[child_pos + 1];
            let right_size = right_handle
                .read::<InteriorNode<K, V::Id>>(&self.pool)?
                .entries
                .len();
            if right_size > merge_threshold + 1 {
                let moved_entry;
                let moved_child;
                let separator;
                {
                    let mut right = right_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
                    moved_entry = right.entries.remove(0);
                    moved_child = right.children.remove(0);
                    separator = right.entries[0].clone();
                }
                {
                    let mut child = child_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
                    child.entries.push(moved_entry);
                    child.children.push(moved_child);
                }
                parent.entries[child_pos + 1] = separator;
                return Ok(false);
            }
        }

        // B. merge, preferring the right sibling
        if child_pos + 1 < parent.children.len() {
            self.merge_interior_with_right(&mut parent, child_pos)?;
        } else {
            self.merge_interior_with_right(&mut parent, child_pos - 1)?;
        }

        Ok(parent.entries.len() <= self.interior_merge_threshold())
    }

    fn merge_interior_with_right(
        &mut self,
        parent: &mut InteriorNode<K, V::Id>,
        node_pos: usize,
    ) -> RailResult {
        let left_handle = parent.children[node_pos];
        let right_handle = parent.children[node_pos + 1];

        // hold the left node
        {
            let mut left = left_handle.write::<InteriorNode<K, V::Id>>(&self.pool)?;
            let mut moved_entries;
            let mut moved_children;
            {
                let right = right_handle.read::<InteriorNode<K, V::Id>>(&self.pool)?;
                moved_entries = right.entries.clone();
                moved_children = right.children.clone();
            }
            left.entries.append(&mut moved_entries);
            left.children.append(&mut moved_children);
        }
        // release the left node

        parent.entries.remove(node_pos + 1);
        parent.children.remove(node_pos + 1);

        self.pool.wl().free(right_handle)?;
        Ok(())
    }

    /// Remove every pair filed under `key`; returns how many there were.
    pub fn remove_all(&mut self, key: &K) -> Result<usize, RailError> {
        let values = self.find_all(key)?;
        for value in &values {
            self.remove(key, value)?;
        }
        Ok(values.len())
    }

    /// All values filed under `key`, ascending.
    pub fn find_all(&self, key: &K) -> Result<Vec<V>, RailError> {
        let mut ret = Vec::new();
        self.find_all_do(key, |value| ret.push(value.clone()))?;
        Ok(ret)
    }

    /// Visit every value filed under `key` in ascending order, without
    /// materialising them into a vector.
    pub fn find_all_do<F>(&self, key: &K, mut visit: F) -> RailResult
    where
        F: FnMut(&V),
    {
        if self.height.val == 0 {
            return Ok(());
        }

        let mut handle = self.root.val;
        for _ in 1..self.height.val {
            let next;
            {
                let node = handle.read::<InteriorNode<K, V::Id>>(&self.pool)?;
                let child_pos = node.child_for_key(key);
                next = node.children[child_pos];
            }
            assert!(!next.is_null(), "interior node with a null child");
            handle = next;
        }

        let mut leaf = handle.read::<LeafNode<K, V>>(&self.pool)?;
        let mut cursor = leaf.lower_bound_key(key);
        loop {
            while cursor < leaf.entries.len() {
                if leaf.entries[cursor].0 != *key {
                    return Ok(());
                }
                visit(&leaf.entries[cursor].1);
                cursor += 1;
            }

            let sibling = leaf.sibling;
            if sibling.is_null() {
                return Ok(());
            }
            // release the current leaf before pinning its sibling
            drop(leaf);
            leaf = sibling.read::<LeafNode<K, V>>(&self.pool)?;
            cursor = 0;
        }
    }
}

// Inspection helpers; they want printable keys and values.
impl<K, V> BPlusTree<K, V>
where
    K: Encodeable + Decodeable + DiskSize + Ord + Clone + fmt::Debug,
    V: Encodeable + Decodeable + DiskSize + Ord + Clone + Indexed + fmt::Debug,
    V::Id: fmt::Debug,
{
    /// checks the integrity of the tree:
    /// - separator invariants (each separator equals its subtree minimum).
    /// - ordering within nodes and along the whole leaf chain.
    /// - equal depth of all leaves, and layer numbering.
    /// - sibling chain equals the in-order leaf sequence.
    /// - size bookkeeping.
    /// - occupancy invariants. (if enabled)
    ///
    /// panic on any error found.
    pub fn check_integrity(&self, check_occupancy: bool) {
        if self.height.val == 0 {
            assert!(self.root.val.is_null(), "empty tree with a live root");
            assert_eq!(0, self.tree_size.val, "empty tree with a non-zero size");
            return;
        }

        let mut reachable: Vec<u32> = Vec::new();
        let mut leaves: Vec<Handle> = Vec::new();
        self.check_sub_tree(self.root.val, 0, check_occupancy, &mut reachable, &mut leaves);

        // the sibling chain must spell out exactly the in-order leaf walk
        let mut chain: Vec<Handle> = Vec::new();
        let mut total: u64 = 0;
        let mut prev: Option<(K, V)> = None;
        let mut handle = leaves[0];
        while !handle.is_null() {
            chain.push(handle);
            let leaf = handle.read::<LeafNode<K, V>>(&self.pool).unwrap();
            for pair in &leaf.entries {
                if let Some(p) = &prev {
                    assert!(
                        p <= pair,
                        "leaf chain out of order: {:?} before {:?}",
                        p,
                        pair
                    );
                }
                prev = Some(pair.clone());
                total += 1;
            }
            handle = leaf.sibling;
        }
        assert_eq!(leaves, chain, "sibling chain diverges from the leaf walk");
        assert_eq!(
            self.tree_size.val, total,
            "tree size does not match the leaf chain"
        );
    }

    /// Recursive part of `check_integrity`; returns the minimum `(key, id)`
    /// of the subtree.
    fn check_sub_tree(
        &self,
        handle: Handle,
        level: u32,
        check_occupancy: bool,
        reachable: &mut Vec<u32>,
        leaves: &mut Vec<Handle>,
    ) -> (K, V::Id) {
        assert!(!handle.is_null(), "null handle inside the tree");
        reachable.push(handle.page_id());

        let is_root = level == 0;

        if level == self.height.val - 1 {
            // leaf level
            let leaf = handle.read::<LeafNode<K, V>>(&self.pool).unwrap();
            assert!(!leaf.entries.is_empty(), "empty leaf {}", handle);
            assert!(
                leaf.entries.len() < self.leaf_split_threshold(),
                "leaf {} holds {} pairs, split threshold is {}",
                handle,
                leaf.entries.len(),
                self.leaf_split_threshold()
            );
            if check_occupancy && !is_root {
                assert!(
                    leaf.entries.len() > self.leaf_merge_threshold(),
                    "leaf {} below the merge threshold",
                    handle
                );
            }
            for (a, b) in leaf.entries.iter().tuple_windows() {
                assert!(a <= b, "leaf {} out of order: {:?} before {:?}", handle, a, b);
            }

            leaves.push(handle);
            let first = &leaf.entries[0];
            return (first.0.clone(), first.1.id());
        }

        // interior level; copy the node out so no pin is held across the
        // recursion (the checker itself must stay within the pin budget)
        let (layer, entries, children) = {
            let node = handle.read::<InteriorNode<K, V::Id>>(&self.pool).unwrap();
            (node.layer, node.entries.clone(), node.children.clone())
        };

        assert_eq!(
            self.height.val - 2 - level,
            layer,
            "interior {} carries the wrong layer",
            handle
        );
        assert_eq!(
            entries.len(),
            children.len(),
            "interior {} separator/child count mismatch",
            handle
        );
        assert!(
            entries.len() >= if is_root { 2 } else { 1 },
            "interior {} too small",
            handle
        );
        assert!(
            entries.len() < self.interior_split_threshold(),
            "interior {} holds {} entries, split threshold is {}",
            handle,
            entries.len(),
            self.interior_split_threshold()
        );
        if check_occupancy && !is_root {
            assert!(
                entries.len() > self.interior_merge_threshold(),
                "interior {} below the merge threshold",
                handle
            );
        }
        for (a, b) in entries.iter().tuple_windows() {
            assert!(
                a <= b,
                "interior {} out of order: {:?} before {:?}",
                handle,
                a,
                b
            );
        }

        for i in 0..entries.len() {
            let child_min =
                self.check_sub_tree(children[i], level + 1, check_occupancy, reachable, leaves);
            assert_eq!(
                entries[i], child_min,
                "separator {} of interior {} is not its subtree minimum",
                i, handle
            );
        }

        entries[0].clone()
    }

    /// Verify that the free stack plus the pages reachable from the root
    /// account for every allocated page. Only meaningful when this tree is
    /// the sole client of its buffer pool.
    pub fn check_page_accounting(&self) {
        use bit_vec::BitVec;

        let mut reachable: Vec<u32> = Vec::new();
        if self.height.val > 0 {
            let mut leaves = Vec::new();
            self.check_sub_tree(self.root.val, 0, false, &mut reachable, &mut leaves);
        }

        let bp = self.pool.rl();
        let mut seen = BitVec::from_elem(bp.pages_on_disk() as usize, false);
        for &pid in &reachable {
            assert!(!seen[pid as usize], "page {} reachable twice", pid);
            seen.set(pid as usize, true);
        }
        for &pid in bp.free_pages() {
            assert!(
                !seen[pid as usize],
                "page {} is both free and reachable",
                pid
            );
            seen.set(pid as usize, true);
        }
        assert!(
            seen.all(),
            "some pages are neither reachable from the root nor free"
        );
    }

    pub fn draw_tree(&self, max_level: i32) {
        // return if the log level is not debug
        if env::var("RUST_LOG").unwrap_or_default() != "debug" {
            return;
        }

        let mut depiction = "".to_string();

        depiction.push_str("\n\n----- PRINT TREE STRUCTURE START -----\n\n");
        depiction.push_str(&format!(
            "size: {}, height: {}, root: {}\n",
            self.tree_size.val, self.height.val, self.root.val
        ));

        if !self.root.val.is_null() {
            depiction.push_str(&self.draw_subtree(self.root.val, 0, max_level));
        }

        depiction.push_str("\n----- PRINT TREE STRUCTURE END   -----\n");

        debug!("{}", depiction);
    }

    fn draw_subtree(&self, handle: Handle, level: u32, max_level: i32) -> String {
        if level == self.height.val - 1 {
            return self.draw_leaf_node(handle, level);
        }

        let mut depiction = "".to_string();
        let prefix = "   ".repeat(level as usize);

        // copy the node out so the recursion below runs unpinned
        let (layer, entries, children) = {
            let node = handle.read::<InteriorNode<K, V::Id>>(&self.pool).unwrap();
            (node.layer, node.entries.clone(), node.children.clone())
        };

        depiction.push_str(&format!(
            "{} interior: {} ({}/{} entries) (layer {})\n",
            prefix,
            handle,
            entries.len(),
            self.interior_capacity,
            layer,
        ));
        if max_level != -1 && level as i32 == max_level {
            return depiction;
        }

        for i in 0..entries.len() {
            depiction.push_str(&format!("{} separator: {:?}\n", prefix, entries[i]));
            depiction.push_str(&self.draw_subtree(children[i], level + 1, max_level));
        }

        depiction
    }

    fn draw_leaf_node(&self, handle: Handle, level: u32) -> String {
        let mut depiction = "".to_string();
        let prefix = "   ".repeat(level as usize);
        let leaf = handle.read::<LeafNode<K, V>>(&self.pool).unwrap();

        depiction.push_str(&format!(
            "{} leaf: {} ({}/{} pairs) (sibling: {})\n",
            prefix,
            handle,
            leaf.entries.len(),
            self.leaf_capacity,
            leaf.sibling,
        ));

        let inner_prefix = "   ".repeat(level as usize + 1);
        if let Some(first) = leaf.entries.first() {
            depiction.push_str(&format!("{} first pair: {:?}\n", inner_prefix, first));
        }
        if let Some(last) = leaf.entries.last() {
            depiction.push_str(&format!("{} last pair:  {:?}\n", inner_prefix, last));
        }

        depiction
    }
}
