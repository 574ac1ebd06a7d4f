//! AVL tree whose nodes are records of an index's own record space.
//!
//! Record 0 holds the tree header; every other record is one tree node
//! holding a key and the sorted set of node keys filed under it. Records are
//! read and written through [`RecordStore`]/[`RecordStoreMut`], so the tree
//! inherits whatever versioning the record space has: a write transaction's
//! overlay stages the changed nodes and commit stores them copy-on-write.
//!
//! Removing the last node key of an entry leaves the tree node in place with
//! an empty set; lookups skip such nodes and a later insert of the same key
//! reuses it.

use std::cmp::Ordering;
use std::ops::Bound;

use arbor_error::{ArborError, Result};
use arbor_types::NodeKey;
use arbor_types::cx::Cx;
use arbor_types::encoding::{ByteReader, ByteWriter};

use crate::key::IndexKey;

/// Read access to a record space.
pub trait RecordStore {
    fn read_record(&mut self, cx: &Cx, key: u64) -> Result<Option<Vec<u8>>>;
}

/// Write access to a record space.
pub trait RecordStoreMut: RecordStore {
    fn write_record(&mut self, cx: &Cx, key: u64, data: Vec<u8>) -> Result<()>;
}

impl<T: RecordStore + ?Sized> RecordStore for &mut T {
    fn read_record(&mut self, cx: &Cx, key: u64) -> Result<Option<Vec<u8>>> {
        (**self).read_record(cx, key)
    }
}

impl<T: RecordStoreMut + ?Sized> RecordStoreMut for &mut T {
    fn write_record(&mut self, cx: &Cx, key: u64, data: Vec<u8>) -> Result<()> {
        (**self).write_record(cx, key, data)
    }
}

const HEADER_KEY: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    root: Option<u64>,
    next_key: u64,
    entries: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            root: None,
            next_key: HEADER_KEY + 1,
            entries: 0,
        }
    }
}

impl Header {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(16);
        w.put_opt_varint(self.root);
        w.put_varint(self.next_key);
        w.put_varint(self.entries);
        w.into_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let header = Self {
            root: r.get_opt_varint()?,
            next_key: r.get_varint()?,
            entries: r.get_varint()?,
        };
        if !r.is_exhausted() {
            return Err(ArborError::corrupt("trailing bytes after index tree header"));
        }
        Ok(header)
    }
}

#[derive(Debug, Clone)]
struct AvlNode {
    key: IndexKey,
    refs: Vec<NodeKey>,
    left: Option<u64>,
    right: Option<u64>,
    height: u8,
}

impl AvlNode {
    fn leaf(key: IndexKey, node: NodeKey) -> Self {
        Self {
            key,
            refs: vec![node],
            left: None,
            right: None,
            height: 1,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.key.encode(&mut w);
        w.put_varint(self.refs.len() as u64);
        for r in &self.refs {
            w.put_varint(r.get());
        }
        w.put_opt_varint(self.left);
        w.put_opt_varint(self.right);
        w.put_u8(self.height);
        w.into_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let key = IndexKey::decode(&mut r)?;
        let n = r.get_varint()?;
        if n > r.remaining() as u64 {
            return Err(ArborError::corrupt(format!(
                "index tree node claims {n} references"
            )));
        }
        let mut refs = Vec::new();
        for _ in 0..n {
            refs.push(NodeKey::new(r.get_varint()?));
        }
        let node = Self {
            key,
            refs,
            left: r.get_opt_varint()?,
            right: r.get_opt_varint()?,
            height: r.get_u8()?,
        };
        if !r.is_exhausted() {
            return Err(ArborError::corrupt("trailing bytes after index tree node"));
        }
        Ok(node)
    }
}

/// An ordered multimap from [`IndexKey`] to node keys.
#[derive(Debug)]
pub struct AvlTree<S> {
    store: S,
}

impl<S: RecordStore> AvlTree<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn header(&mut self, cx: &Cx) -> Result<Header> {
        match self.store.read_record(cx, HEADER_KEY)? {
            Some(bytes) => Header::decode(&bytes),
            None => Ok(Header::default()),
        }
    }

    fn load(&mut self, cx: &Cx, id: u64) -> Result<AvlNode> {
        let bytes = self.store.read_record(cx, id)?.ok_or_else(|| {
            ArborError::corrupt(format!("index tree node {id} is missing"))
        })?;
        AvlNode::decode(&bytes)
    }

    fn height_of(&mut self, cx: &Cx, id: Option<u64>) -> Result<u8> {
        match id {
            Some(id) => Ok(self.load(cx, id)?.height),
            None => Ok(0),
        }
    }

    /// Number of `(key, node)` entries.
    pub fn len(&mut self, cx: &Cx) -> Result<u64> {
        Ok(self.header(cx)?.entries)
    }

    pub fn is_empty(&mut self, cx: &Cx) -> Result<bool> {
        Ok(self.len(cx)? == 0)
    }

    /// Node keys filed under exactly `key`, ascending.
    pub fn get(&mut self, cx: &Cx, key: &IndexKey) -> Result<Vec<NodeKey>> {
        let mut at = self.header(cx)?.root;
        while let Some(id) = at {
            cx.checkpoint()?;
            let node = self.load(cx, id)?;
            at = match key.cmp(&node.key) {
                Ordering::Equal => return Ok(node.refs),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        Ok(Vec::new())
    }

    /// Entries with keys inside the bounds, in key order.
    pub fn range(
        &mut self,
        cx: &Cx,
        lower: Bound<&IndexKey>,
        upper: Bound<&IndexKey>,
    ) -> Result<Vec<(IndexKey, Vec<NodeKey>)>> {
        let root = self.header(cx)?.root;
        let mut out = Vec::new();
        self.collect_range(cx, root, lower, upper, &mut out)?;
        Ok(out)
    }

    fn collect_range(
        &mut self,
        cx: &Cx,
        at: Option<u64>,
        lower: Bound<&IndexKey>,
        upper: Bound<&IndexKey>,
        out: &mut Vec<(IndexKey, Vec<NodeKey>)>,
    ) -> Result<()> {
        let Some(id) = at else {
            return Ok(());
        };
        cx.checkpoint()?;
        let node = self.load(cx, id)?;
        let go_left = match lower {
            Bound::Unbounded => true,
            Bound::Included(k) | Bound::Excluded(k) => node.key > *k,
        };
        let go_right = match upper {
            Bound::Unbounded => true,
            Bound::Included(k) | Bound::Excluded(k) => node.key < *k,
        };
        let above = match lower {
            Bound::Unbounded => true,
            Bound::Included(k) => node.key >= *k,
            Bound::Excluded(k) => node.key > *k,
        };
        let below = match upper {
            Bound::Unbounded => true,
            Bound::Included(k) => node.key <= *k,
            Bound::Excluded(k) => node.key < *k,
        };
        if go_left {
            self.collect_range(cx, node.left, lower, upper, out)?;
        }
        if above && below && !node.refs.is_empty() {
            out.push((node.key, node.refs));
        }
        if go_right {
            self.collect_range(cx, node.right, lower, upper, out)?;
        }
        Ok(())
    }
}

impl<S: RecordStoreMut> AvlTree<S> {
    fn store_node(&mut self, cx: &Cx, id: u64, node: &AvlNode) -> Result<()> {
        self.store.write_record(cx, id, node.encode())
    }

    /// File `node` under `key`. Returns `false` if it was already there.
    pub fn insert(&mut self, cx: &Cx, key: &IndexKey, node: NodeKey) -> Result<bool> {
        let mut header = self.header(cx)?;
        let (root, added) = self.insert_at(cx, header.root, key, node, &mut header)?;
        if added || header.root != Some(root) {
            header.root = Some(root);
            if added {
                header.entries += 1;
            }
            self.store.write_record(cx, HEADER_KEY, header.encode())?;
        }
        Ok(added)
    }

    /// Remove `node` from `key`. Returns `false` if it was not filed there.
    pub fn remove(&mut self, cx: &Cx, key: &IndexKey, node: NodeKey) -> Result<bool> {
        let mut header = self.header(cx)?;
        let mut at = header.root;
        while let Some(id) = at {
            let mut current = self.load(cx, id)?;
            at = match key.cmp(&current.key) {
                Ordering::Less => current.left,
                Ordering::Greater => current.right,
                Ordering::Equal => {
                    let Ok(pos) = current.refs.binary_search(&node) else {
                        return Ok(false);
                    };
                    current.refs.remove(pos);
                    self.store_node(cx, id, &current)?;
                    header.entries = header.entries.saturating_sub(1);
                    self.store.write_record(cx, HEADER_KEY, header.encode())?;
                    return Ok(true);
                }
            };
        }
        Ok(false)
    }

    fn insert_at(
        &mut self,
        cx: &Cx,
        at: Option<u64>,
        key: &IndexKey,
        node_key: NodeKey,
        header: &mut Header,
    ) -> Result<(u64, bool)> {
        let Some(id) = at else {
            let id = header.next_key;
            header.next_key += 1;
            self.store_node(cx, id, &AvlNode::leaf(key.clone(), node_key))?;
            return Ok((id, true));
        };
        let mut node = self.load(cx, id)?;
        match key.cmp(&node.key) {
            Ordering::Equal => {
                return match node.refs.binary_search(&node_key) {
                    Ok(_) => Ok((id, false)),
                    Err(pos) => {
                        node.refs.insert(pos, node_key);
                        self.store_node(cx, id, &node)?;
                        Ok((id, true))
                    }
                };
            }
            Ordering::Less => {
                let (child, added) = self.insert_at(cx, node.left, key, node_key, header)?;
                if !added {
                    return Ok((id, false));
                }
                node.left = Some(child);
            }
            Ordering::Greater => {
                let (child, added) = self.insert_at(cx, node.right, key, node_key, header)?;
                if !added {
                    return Ok((id, false));
                }
                node.right = Some(child);
            }
        }
        Ok((self.rebalance(cx, id, node)?, true))
    }

    fn fix_height(&mut self, cx: &Cx, node: &mut AvlNode) -> Result<()> {
        let l = self.height_of(cx, node.left)?;
        let r = self.height_of(cx, node.right)?;
        node.height = 1 + l.max(r);
        Ok(())
    }

    fn rebalance(&mut self, cx: &Cx, id: u64, mut node: AvlNode) -> Result<u64> {
        let lh = self.height_of(cx, node.left)?;
        let rh = self.height_of(cx, node.right)?;
        if lh > rh + 1 {
            let left_id = node.left.ok_or_else(|| missing_child(id))?;
            let left = self.load(cx, left_id)?;
            if self.height_of(cx, left.right)? > self.height_of(cx, left.left)? {
                node.left = Some(self.rotate_left(cx, left_id, left)?);
            }
            return self.rotate_right(cx, id, node);
        }
        if rh > lh + 1 {
            let right_id = node.right.ok_or_else(|| missing_child(id))?;
            let right = self.load(cx, right_id)?;
            if self.height_of(cx, right.left)? > self.height_of(cx, right.right)? {
                node.right = Some(self.rotate_right(cx, right_id, right)?);
            }
            return self.rotate_left(cx, id, node);
        }
        node.height = 1 + lh.max(rh);
        self.store_node(cx, id, &node)?;
        Ok(id)
    }

    fn rotate_right(&mut self, cx: &Cx, id: u64, mut node: AvlNode) -> Result<u64> {
        let pivot_id = node.left.ok_or_else(|| missing_child(id))?;
        let mut pivot = self.load(cx, pivot_id)?;
        node.left = pivot.right;
        self.fix_height(cx, &mut node)?;
        self.store_node(cx, id, &node)?;
        pivot.right = Some(id);
        pivot.height = 1 + self.height_of(cx, pivot.left)?.max(node.height);
        self.store_node(cx, pivot_id, &pivot)?;
        Ok(pivot_id)
    }

    fn rotate_left(&mut self, cx: &Cx, id: u64, mut node: AvlNode) -> Result<u64> {
        let pivot_id = node.right.ok_or_else(|| missing_child(id))?;
        let mut pivot = self.load(cx, pivot_id)?;
        node.right = pivot.left;
        self.fix_height(cx, &mut node)?;
        self.store_node(cx, id, &node)?;
        pivot.left = Some(id);
        pivot.height = 1 + self.height_of(cx, pivot.right)?.max(node.height);
        self.store_node(cx, pivot_id, &pivot)?;
        Ok(pivot_id)
    }
}

fn missing_child(id: u64) -> ArborError {
    ArborError::corrupt(format!("index tree node {id} lost a child during rebalance"))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use arbor_types::AtomicValue;
    use proptest::prelude::*;

    use super::*;

    #[derive(Default)]
    struct MapStore {
        records: BTreeMap<u64, Vec<u8>>,
        writes: usize,
    }

    impl RecordStore for MapStore {
        fn read_record(&mut self, _cx: &Cx, key: u64) -> Result<Option<Vec<u8>>> {
            Ok(self.records.get(&key).cloned())
        }
    }

    impl RecordStoreMut for MapStore {
        fn write_record(&mut self, _cx: &Cx, key: u64, data: Vec<u8>) -> Result<()> {
            self.writes += 1;
            self.records.insert(key, data);
            Ok(())
        }
    }

    fn k(i: i64) -> IndexKey {
        IndexKey::Value(AtomicValue::Int(i))
    }

    fn n(i: u64) -> NodeKey {
        NodeKey::new(i)
    }

    /// Returns the subtree height, asserting AVL balance and key order.
    fn check_balanced(tree: &mut AvlTree<MapStore>, cx: &Cx, at: Option<u64>) -> u8 {
        let Some(id) = at else { return 0 };
        let node = tree.load(cx, id).unwrap();
        let lh = check_balanced(tree, cx, node.left);
        let rh = check_balanced(tree, cx, node.right);
        assert!(lh.abs_diff(rh) <= 1, "node {id} unbalanced: {lh} vs {rh}");
        assert_eq!(node.height, 1 + lh.max(rh));
        if let Some(l) = node.left {
            assert!(tree.load(cx, l).unwrap().key < node.key);
        }
        if let Some(r) = node.right {
            assert!(tree.load(cx, r).unwrap().key > node.key);
        }
        node.height
    }

    #[test]
    fn ascending_inserts_stay_balanced() {
        let cx = Cx::new();
        let mut tree = AvlTree::new(MapStore::default());
        for i in 0..200 {
            assert!(tree.insert(&cx, &k(i), n(1000 + i as u64)).unwrap());
        }
        let root = tree.header(&cx).unwrap().root;
        let h = check_balanced(&mut tree, &cx, root);
        assert!(h <= 10, "height {h} too large for 200 keys");
        assert_eq!(tree.len(&cx).unwrap(), 200);
        assert_eq!(tree.get(&cx, &k(57)).unwrap(), vec![n(1057)]);
    }

    #[test]
    fn duplicate_insert_writes_nothing() {
        let cx = Cx::new();
        let mut tree = AvlTree::new(MapStore::default());
        tree.insert(&cx, &k(1), n(1)).unwrap();
        let writes = tree.store.writes;
        assert!(!tree.insert(&cx, &k(1), n(1)).unwrap());
        assert_eq!(tree.store.writes, writes);
    }

    #[test]
    fn several_nodes_under_one_key() {
        let cx = Cx::new();
        let mut tree = AvlTree::new(MapStore::default());
        tree.insert(&cx, &k(5), n(9)).unwrap();
        tree.insert(&cx, &k(5), n(3)).unwrap();
        assert_eq!(tree.get(&cx, &k(5)).unwrap(), vec![n(3), n(9)]);
        assert!(tree.remove(&cx, &k(5), n(9)).unwrap());
        assert!(!tree.remove(&cx, &k(5), n(9)).unwrap());
        assert_eq!(tree.get(&cx, &k(5)).unwrap(), vec![n(3)]);
    }

    #[test]
    fn emptied_entries_are_hidden_from_ranges() {
        let cx = Cx::new();
        let mut tree = AvlTree::new(MapStore::default());
        for i in 0..5 {
            tree.insert(&cx, &k(i), n(i as u64)).unwrap();
        }
        tree.remove(&cx, &k(2), n(2)).unwrap();
        let keys: Vec<_> = tree
            .range(&cx, Bound::Included(&k(1)), Bound::Excluded(&k(4)))
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![k(1), k(3)]);
        assert!(tree.get(&cx, &k(2)).unwrap().is_empty());
        assert_eq!(tree.len(&cx).unwrap(), 4);
    }

    #[test]
    fn empty_tree_lookups() {
        let cx = Cx::new();
        let mut tree = AvlTree::new(MapStore::default());
        assert!(tree.is_empty(&cx).unwrap());
        assert!(tree.get(&cx, &k(1)).unwrap().is_empty());
        assert!(
            tree.range(&cx, Bound::Unbounded, Bound::Unbounded)
                .unwrap()
                .is_empty()
        );
        assert!(!tree.remove(&cx, &k(1), n(1)).unwrap());
    }

    proptest! {
        #[test]
        fn prop_tree_matches_model(
            ops in proptest::collection::vec((any::<bool>(), -20i64..20, 0u64..6), 1..120),
            lo in -25i64..25,
            span in 0i64..30,
        ) {
            let cx = Cx::new();
            let mut tree = AvlTree::new(MapStore::default());
            let mut model: BTreeMap<i64, BTreeSet<u64>> = BTreeMap::new();
            for (insert, key, node) in ops {
                if insert {
                    let added = model.entry(key).or_default().insert(node);
                    prop_assert_eq!(tree.insert(&cx, &k(key), n(node)).unwrap(), added);
                } else {
                    let removed = model.get_mut(&key).is_some_and(|s| s.remove(&node));
                    prop_assert_eq!(tree.remove(&cx, &k(key), n(node)).unwrap(), removed);
                }
            }
            let root = tree.header(&cx).unwrap().root;
            check_balanced(&mut tree, &cx, root);
            let total: usize = model.values().map(BTreeSet::len).sum();
            prop_assert_eq!(tree.len(&cx).unwrap(), total as u64);

            let hi = lo + span;
            let expected: Vec<(i64, Vec<u64>)> = model
                .range(lo..=hi)
                .filter(|(_, s)| !s.is_empty())
                .map(|(&key, s)| (key, s.iter().copied().collect()))
                .collect();
            let got: Vec<(i64, Vec<u64>)> = tree
                .range(&cx, Bound::Included(&k(lo)), Bound::Included(&k(hi)))
                .unwrap()
                .into_iter()
                .map(|(key, refs)| {
                    let IndexKey::Value(AtomicValue::Int(i)) = key else { unreachable!() };
                    (i, refs.into_iter().map(NodeKey::get).collect())
                })
                .collect();
            prop_assert_eq!(got, expected);
        }
    }
}
