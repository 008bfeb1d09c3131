//! Crossfilter-style incremental index for Analyst.
//!
//! This crate focuses on:
//! - A row store keyed by any number of dimensions, each with an optional [`Filter`].
//! - Grouped and global folds maintained incrementally through add/remove/initial triples.
//! - Multi-dimensional filtering where a group ignores only its own dimension's filter.
//!
//! Everything here is single-threaded: filters may hold `Rc` closures, so an
//! [`IndexedDataset`] is neither `Send` nor `Sync`.

#![forbid(unsafe_code)]

mod bitmap;
mod filter;
mod index;
mod key;

pub use crate::bitmap::BitVec;
pub use crate::filter::Filter;
pub use crate::index::{
    DimensionId, EmptyGroups, Fold, GroupId, IndexError, IndexOptions, IndexResult,
    IndexedDataset, KeyFn,
};
pub use crate::key::{cmp_key, Key};
