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

use std::fmt::{self, Display, Formatter};

// A revision indicates modification of the key-value space.
// The set of changes that share same main revision changes the key-value space atomically.
//
// Field order matters: the derived ordering compares main first, then sub.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    // main is the main revision of a set of changes that happen atomically.
    pub main: i64,
    // sub is the sub revision of a change in a set of changes that happen
    // atomically. Each change has different increasing sub revision in that
    // set.
    pub sub: i64,
}

impl Revision {
    pub const fn new(main: i64, sub: i64) -> Self {
        Revision { main, sub }
    }

    pub fn greater_than(&self, b: &Revision) -> bool {
        if self.main > b.main {
            return true;
        }
        if self.main < b.main {
            return false;
        }
        self.sub > b.sub
    }
}

impl From<(i64, i64)> for Revision {
    fn from((main, sub): (i64, i64)) -> Self {
        Revision { main, sub }
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.main, self.sub)
    }
}
