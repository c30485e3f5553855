#[macro_use]
extern crate log;

pub mod mvcc;

pub use crate::mvcc::{Generation, KeyIndex, KeyIndexError, KeyOrder, Revision, TreeIndex};
