// SPDX-License-Identifier: Apache-2.0

//! Functionality that is purely related to the CFG IR compared by the
//! semantic-diff engine: parsing, representing, querying/manipulating, and
//! the simplification/inlining collaborators.

pub mod dce;
pub mod debug_info;
pub mod inline;
pub mod ir;
pub mod ir_parser;
pub mod ir_utils;
