// SPDX-License-Identifier: Apache-2.0

//! Semantic-difference analyzer core: decides, for pairs of corresponding
//! functions in two versions of a module, whether they are semantically
//! equivalent under a configurable set of known-benign syntactic
//! transformations, and reports the differing objects when they are not.

pub mod callgraph;
pub mod config;
pub mod correspondence;
pub mod diff_comparator;
pub mod fn_comparator;
pub mod module_comparator;
pub mod pattern;
pub mod pattern_matcher;
pub mod result;
pub mod unused_returns;
