// Copyright 2015 The etcd Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::mvcc::key_index::{KeyIndex, KeyIndexError};
use crate::mvcc::revision::Revision;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Included};

// TreeIndex holds the KeyIndex of every key, ordered by the raw key bytes.
// It has no locking of its own: the store serializes writers against
// each other and against readers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeIndex {
    tree: BTreeMap<Bytes, KeyIndex>,
}

impl TreeIndex {
    pub fn new() -> Self {
        TreeIndex { tree: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    // put records a write of key at rev, creating its KeyIndex on first sight.
    pub fn put(&mut self, key: &[u8], rev: Revision) {
        self.tree
            .entry(Bytes::copy_from_slice(key))
            .or_insert_with(|| KeyIndex::new(Bytes::copy_from_slice(key)))
            .put(rev.main, rev.sub);
    }

    // tombstone records a delete of key at rev.
    pub fn tombstone(&mut self, key: &[u8], rev: Revision) -> Result<(), KeyIndexError> {
        let ki = self.tree.get_mut(key).ok_or(KeyIndexError::RevisionNotFound)?;
        ki.tombstone(rev.main, rev.sub);
        Ok(())
    }

    pub fn get(&self, key: &[u8], at_rev: i64) -> Result<Revision, KeyIndexError> {
        self.tree.get(key).ok_or(KeyIndexError::RevisionNotFound)?.get(at_rev)
    }

    // range returns the keys in [key, end) visible at at_rev together with the
    // revision each one resolves to. An empty end means only key itself.
    pub fn range(&self, key: &[u8], end: &[u8], at_rev: i64) -> (Vec<Bytes>, Vec<Revision>) {
        if end.is_empty() {
            return match self.tree.get_key_value(key) {
                Some((k, ki)) => match ki.get(at_rev) {
                    Ok(rev) => (vec![k.clone()], vec![rev]),
                    Err(_) => (vec![], vec![]),
                },
                None => (vec![], vec![]),
            };
        }
        if key >= end {
            return (vec![], vec![]);
        }

        let mut keys = Vec::new();
        let mut revs = Vec::new();
        for (k, ki) in self.tree.range::<[u8], _>((Included(key), Excluded(end))) {
            if let Ok(rev) = ki.get(at_rev) {
                keys.push(k.clone());
                revs.push(rev);
            }
        }
        (keys, revs)
    }

    // compact compacts every KeyIndex at rev and returns the revisions the
    // backend must keep. Keys left with nothing visible are removed.
    pub fn compact(&mut self, rev: i64) -> HashSet<Revision> {
        let mut available = HashSet::new();
        let before = self.tree.len();
        info!("store.index: compact {}", rev);
        for ki in self.tree.values_mut() {
            ki.compact(rev, &mut available);
        }
        self.tree.retain(|_, ki| !ki.is_empty());
        info!(
            "store.index: compact {} finished, removed {} key(s), {} revision(s) available",
            rev,
            before - self.tree.len(),
            available.len()
        );
        available
    }

    // keep returns what compact(rev) would keep, without compacting.
    pub fn keep(&self, rev: i64) -> HashSet<Revision> {
        let mut available = HashSet::new();
        for ki in self.tree.values() {
            ki.keep(rev, &mut available);
        }
        available
    }

    // visit invokes the supplied closure for every KeyIndex in key order.
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(&KeyIndex),
    {
        for ki in self.tree.values() {
            f(ki);
        }
    }

    pub fn equal(&self, other: &TreeIndex) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use crate::mvcc::index::TreeIndex;
    use crate::mvcc::key_index::{KeyIndexError, KeyOrder};
    use crate::mvcc::revision::Revision;
    use bytes::Bytes;
    use std::collections::HashSet;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn rev(main: i64) -> Revision {
        Revision::new(main, 0)
    }

    #[test]
    fn it_get() -> anyhow::Result<()> {
        init();
        let mut ti = TreeIndex::new();
        ti.put(b"foo", rev(2));
        ti.put(b"foo", rev(4));
        ti.tombstone(b"foo", rev(6))?;

        // (at_rev, w_rev)
        let tests = vec![(0, None), (1, None), (2, Some(2)), (3, Some(2)), (4, Some(4)), (5, Some(4)), (6, Some(6)), (7, None)];
        for (at_rev, w) in tests {
            let w = w.map(rev).ok_or(KeyIndexError::RevisionNotFound);
            assert_eq!(ti.get(b"foo", at_rev), w, "get({})", at_rev);
        }
        assert_eq!(ti.get(b"bar", 6), Err(KeyIndexError::RevisionNotFound));
        Ok(())
    }

    #[test]
    fn it_tombstone_unknown_key() {
        init();
        let mut ti = TreeIndex::new();
        assert_eq!(ti.tombstone(b"foo", rev(1)), Err(KeyIndexError::RevisionNotFound));
        assert!(ti.is_empty());
    }

    #[test]
    fn it_range() -> anyhow::Result<()> {
        init();
        let mut ti = TreeIndex::new();
        ti.put(b"foo", rev(1));
        ti.put(b"foo1", rev(2));
        ti.put(b"foo2", rev(3));
        ti.tombstone(b"foo1", rev(4))?;

        // (key, end, at_rev, w_keys, w_revs)
        let tests: Vec<(&str, &str, i64, Vec<&str>, Vec<i64>)> = vec![
            // single key
            ("foo", "", 4, vec!["foo"], vec![1]),
            ("foo1", "", 3, vec!["foo1"], vec![2]),
            ("foo3", "", 4, vec![], vec![]),
            // deleted before at_rev
            ("foo1", "", 5, vec![], vec![]),
            // [foo, foo2)
            ("foo", "foo2", 3, vec!["foo", "foo1"], vec![1, 2]),
            ("foo", "foo2", 5, vec!["foo"], vec![1]),
            // [foo, fop)
            ("foo", "fop", 3, vec!["foo", "foo1", "foo2"], vec![1, 2, 3]),
            ("foo", "fop", 1, vec!["foo"], vec![1]),
            // nothing in range
            ("foo3", "fop", 3, vec![], vec![]),
            ("fop", "foo", 3, vec![], vec![]),
        ];
        for (key, end, at_rev, w_keys, w_revs) in tests {
            let (keys, revs) = ti.range(key.as_bytes(), end.as_bytes(), at_rev);
            let w_keys: Vec<Bytes> = w_keys.into_iter().map(Bytes::from).collect();
            let w_revs: Vec<Revision> = w_revs.into_iter().map(rev).collect();
            assert_eq!(keys, w_keys, "range({}, {}, {})", key, end, at_rev);
            assert_eq!(revs, w_revs, "range({}, {}, {})", key, end, at_rev);
        }
        Ok(())
    }

    #[test]
    fn it_compact() -> anyhow::Result<()> {
        init();
        let mut ti = TreeIndex::new();
        ti.put(b"foo", rev(1));
        ti.put(b"foo", rev(2));
        ti.tombstone(b"foo", rev(3))?;
        ti.put(b"bar", rev(4));
        ti.put(b"bar", rev(5));

        let kept = ti.keep(4);
        let available = ti.compact(4);
        assert_eq!(kept, available);
        // foo was deleted at 3, bar's latest at 4 is 4
        let w: HashSet<Revision> = vec![rev(4)].into_iter().collect();
        assert_eq!(available, w);
        assert_eq!(ti.len(), 1);
        assert_eq!(ti.get(b"bar", 4)?, rev(4));
        assert_eq!(ti.get(b"bar", 5)?, rev(5));
        assert_eq!(ti.get(b"foo", 4), Err(KeyIndexError::RevisionNotFound));

        // compacting again changes nothing
        let snapshot = ti.clone();
        assert_eq!(ti.compact(4), w);
        assert!(ti.equal(&snapshot));

        // a removed key comes back on a new put
        ti.put(b"foo", rev(6));
        assert_eq!(ti.get(b"foo", 6)?, rev(6));
        assert_eq!(ti.len(), 2);
        Ok(())
    }

    #[test]
    fn it_visit_in_key_order() {
        init();
        let mut ti = TreeIndex::default();
        for (i, key) in ["foo", "bar", "fo", "\u{ff}", "baz"].iter().enumerate() {
            ti.put(key.as_bytes(), rev(i as i64 + 1));
        }
        let mut visited = Vec::new();
        ti.visit(|ki| visited.push(ki.clone()));
        for pair in visited.windows(2) {
            assert!(pair[0].less(&pair[1]));
        }
        assert_eq!(visited.len(), 5);
        assert_eq!(visited[0].key(), &Bytes::from("bar"));
    }
}
