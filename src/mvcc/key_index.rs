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

use crate::mvcc::revision::Revision;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIndexError {
    // RevisionNotFound is returned when no revision of the key is visible
    // at the requested point in time.
    #[error("mvcc: revision not found")]
    RevisionNotFound,
}

// KeyOrder is the ordering an ordered container needs to place a key index:
// byte-wise lexicographic comparison of the raw key.
pub trait KeyOrder {
    fn order_key(&self) -> &[u8];

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.order_key().cmp(other.order_key())
    }

    fn less(&self, other: &Self) -> bool {
        self.cmp_key(other) == Ordering::Less
    }
}

// KeyIndex stores the revisions of a key in the backend.
// Each KeyIndex has at least one key generation.
// Each generation might have several key versions.
// Tombstone on a key appends an tombstone version at the end
// of the current generation and creates a new empty generation.
// Each version of a key has an index pointing to the backend.
//
// For example: put(1.0);put(2.0);tombstone(3.0);put(4.0);tombstone(5.0) on key "foo"
// generate a KeyIndex:
// key:     "foo"
// rev: 5
// generations:
//    {empty}
//    {4.0, 5.0(t)}
//    {1.0, 2.0, 3.0(t)}
//
// Compact a KeyIndex removes the versions with smaller or equal to
// rev except the largest one. If the generations becomes empty
// during compaction, it will be removed. if all the generations get
// removed, the KeyIndex should be removed.
//
// For example:
// compact(2) on the previous example
// generations:
//    {empty}
//    {4.0, 5.0(t)}
//    {2.0, 3.0(t)}
//
// compact(4)
// generations:
//    {empty}
//    {4.0, 5.0(t)}
//
// compact(5):
// generations:
//    {empty} -> key SHOULD be removed.
//
// compact(6):
// generations:
//    {empty} -> key SHOULD be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIndex {
    key: Bytes,
    // the main revision of the last put or tombstone applied to the key.
    modified: i64,
    // oldest first; the last one is the current generation.
    generations: Vec<Generation>,
}

impl KeyIndex {
    pub fn new<K: Into<Bytes>>(key: K) -> Self {
        KeyIndex {
            key: key.into(),
            modified: 0,
            generations: Vec::new(),
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn modified(&self) -> i64 {
        self.modified
    }

    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    // put puts a revision to the KeyIndex.
    pub fn put(&mut self, main: i64, sub: i64) {
        if main < self.modified {
            panic!(
                "store.keyindex: put with unexpected smaller revision [{} / {}] on key {}",
                main,
                self.modified,
                self.key_str()
            );
        }
        if self.generations.is_empty() {
            self.generations.push(Generation::default());
        }
        let cur = self.generations.len() - 1;
        let g = &mut self.generations[cur];
        g.revs.push(Revision::new(main, sub));
        g.ver += 1;
        self.modified = main;
    }

    // tombstone puts a revision, pointing to a tombstone, to the KeyIndex.
    // It also creates a new empty generation in the KeyIndex.
    pub fn tombstone(&mut self, main: i64, sub: i64) {
        if self.is_unpopulated() {
            panic!("store.keyindex: unexpected tombstone on empty keyIndex {}", self.key_str());
        }
        self.put(main, sub);
        self.generations.push(Generation::default());
    }

    // get gets the latest revision of the key whose main revision is smaller
    // than or equal to the given at_rev. A read exactly at a tombstone returns
    // the tombstone; a read after it finds nothing.
    pub fn get(&self, at_rev: i64) -> Result<Revision, KeyIndexError> {
        if self.is_unpopulated() {
            panic!("store.keyindex: unexpected get on empty keyIndex {}", self.key_str());
        }
        let gi = self.find_generation(at_rev).ok_or(KeyIndexError::RevisionNotFound)?;
        let g = &self.generations[gi];
        if gi != self.generations.len() - 1 {
            if let Some(tomb) = g.revs.last() {
                if tomb.main < at_rev {
                    return Err(KeyIndexError::RevisionNotFound);
                }
            }
        }
        g.walk(|rev| rev.main > at_rev)
            .map(|n| g.revs[n])
            .ok_or(KeyIndexError::RevisionNotFound)
    }

    // since returns revisions since the given rev, in ascending order. Only the
    // revision with the largest sub revision is kept for each main revision.
    pub fn since(&self, rev: i64) -> Vec<Revision> {
        if self.is_unpopulated() {
            panic!("store.keyindex: unexpected since on empty keyIndex {}", self.key_str());
        }
        let since = Revision::new(rev, 0);
        // find the generations to start checking
        let mut gi = self.generations.len() - 1;
        while gi > 0 {
            if let Some(created) = self.generations[gi].revs.first() {
                if since.greater_than(created) {
                    break;
                }
            }
            gi -= 1;
        }

        let mut revs: Vec<Revision> = Vec::new();
        let mut last = None;
        for g in &self.generations[gi..] {
            for r in &g.revs {
                if since.greater_than(r) {
                    continue;
                }
                if last == Some(r.main) {
                    // the lower sub revision is never seen from outside
                    if let Some(prev) = revs.last_mut() {
                        *prev = *r;
                    }
                    continue;
                }
                revs.push(*r);
                last = Some(r.main);
            }
        }
        revs
    }

    // compact compacts a KeyIndex by removing the versions with smaller or equal
    // revision than the given at_rev except the largest one (If the largest one is
    // a tombstone, it will not be kept).
    // If a generation becomes empty during compaction, it will be removed.
    pub fn compact(&mut self, at_rev: i64, available: &mut HashSet<Revision>) {
        if self.is_unpopulated() {
            warn!("store.keyindex: compact({}) on empty keyIndex {}, ignored", at_rev, self.key_str());
            return;
        }
        let (mut gi, n) = match self.compaction_point(at_rev, available) {
            Some(point) => point,
            None => return,
        };

        let last = self.generations.len() - 1;
        let g = &mut self.generations[gi];
        // remove the previous contents.
        g.revs.drain(..n);
        // remove any tombstone
        if g.revs.len() == 1 && gi != last {
            available.remove(&g.revs[0]);
            gi += 1;
        }
        // remove the previous generations.
        self.generations.drain(..gi);
        debug!(
            "store.keyindex: compacted key {} at {}, dropped {} generation(s)",
            self.key_str(),
            at_rev,
            gi
        );
    }

    // keep finds the revisions to be kept if compact is called at given at_rev.
    // The KeyIndex itself is left untouched.
    pub fn keep(&self, at_rev: i64, available: &mut HashSet<Revision>) {
        if self.is_unpopulated() {
            return;
        }
        if let Some((gi, n)) = self.compaction_point(at_rev, available) {
            let g = &self.generations[gi];
            if n == g.revs.len() - 1 && gi != self.generations.len() - 1 {
                available.remove(&g.revs[n]);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generations.len() == 1 && self.generations[0].is_empty()
    }

    // find_generation finds out the generation of the KeyIndex that the
    // given rev belongs to, returning its position.
    pub fn find_generation(&self, rev: i64) -> Option<usize> {
        self.generations
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, g)| !g.is_empty())
            .find(|(_, g)| g.revs[0].main <= rev)
            .map(|(gi, _)| gi)
    }

    pub fn equal(&self, other: &KeyIndex) -> bool {
        self == other
    }

    // compaction_point walks the generation at_rev belongs to until reaching the
    // first revision smaller than or equal to at_rev, adds it to available and
    // returns (generation position, revision position).
    fn compaction_point(
        &self,
        at_rev: i64,
        available: &mut HashSet<Revision>,
    ) -> Option<(usize, usize)> {
        let gi = self.find_generation(at_rev)?;
        let g = &self.generations[gi];
        let n = g.walk(|rev| rev.main > at_rev)?;
        available.insert(g.revs[n]);
        Some((gi, n))
    }

    // true when no revision was ever recorded, or everything got compacted.
    fn is_unpopulated(&self) -> bool {
        self.generations.is_empty() || self.is_empty()
    }

    fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

impl KeyOrder for KeyIndex {
    fn order_key(&self) -> &[u8] {
        &self.key
    }
}

impl Display for KeyIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for g in &self.generations {
            write!(f, "{}", g)?;
        }
        Ok(())
    }
}

// Generation is one create->delete lifetime of a key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Generation {
    // number of puts in the generation
    ver: i64,
    // oldest first
    revs: Vec<Revision>,
}

impl Generation {
    pub fn version(&self) -> i64 {
        self.ver
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revs
    }

    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    // walk walks through the revisions in the generation in descending order.
    // It passes the revision to the given closure.
    // walk returns until: 1. it finishes walking all revisions 2. the closure returns false.
    // walk returns the position at where it stopped. If it stopped after
    // finishing walking, None will be returned.
    pub(crate) fn walk<F>(&self, mut f: F) -> Option<usize>
    where
        F: FnMut(&Revision) -> bool,
    {
        self.revs.iter().rposition(|rev| !f(rev))
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let revs: Vec<String> = self.revs.iter().map(|rev| rev.to_string()).collect();
        writeln!(f, "g: ver[{}], revs [{}]", self.ver, revs.join(", "))
    }
}
