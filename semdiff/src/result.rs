// SPDX-License-Identifier: Apache-2.0

//! Representation of comparison results: per-pair verdicts, function call
//! information, and the non-function differences (macro/asm text, aggregate
//! layouts) discovered during a walk.

use serde::Serialize;

/// Possible results of comparing a pair of functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Equal,
    AssumedEqual,
    NotEqual,
    Unknown,
}

/// One function call: the callee and the call location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CallInfo {
    pub function: String,
    pub file: String,
    pub line: usize,
}

/// Ordered sequence of calls tracing how an object was reached from the
/// top-level compared function.
pub type CallStack = Vec<CallInfo>;

/// Information about a single compared function: its name, definition
/// location, and outgoing calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub file: String,
    pub line: usize,
    pub calls: Vec<CallInfo>,
}

/// Syntactic difference between objects that cannot be compared as IR: a
/// macro expansion or an inline-assembly fragment.
#[derive(Debug, Clone, Serialize)]
pub struct SyntaxDifference {
    pub name: String,
    pub body_left: String,
    pub body_right: String,
    pub stack_left: CallStack,
    pub stack_right: CallStack,
    /// The compared function in which the difference was found.
    pub function: String,
}

/// Difference between two aggregate type definitions.
#[derive(Debug, Clone, Serialize)]
pub struct TypeDifference {
    pub name: String,
    pub file_left: String,
    pub line_left: usize,
    pub file_right: String,
    pub line_right: usize,
    pub stack_left: CallStack,
    pub stack_right: CallStack,
    pub function: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NonFunctionDifference {
    Syntax(SyntaxDifference),
    Type(TypeDifference),
}

impl NonFunctionDifference {
    pub fn name(&self) -> &str {
        match self {
            NonFunctionDifference::Syntax(d) => &d.name,
            NonFunctionDifference::Type(d) => &d.name,
        }
    }
}

/// Result of comparing one pair of functions.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub kind: Verdict,
    pub left: FunctionInfo,
    pub right: FunctionInfo,
    pub differing_objects: Vec<NonFunctionDifference>,
}

impl ComparisonResult {
    pub fn new(left_name: &str, right_name: &str) -> Self {
        Self {
            kind: Verdict::Unknown,
            left: FunctionInfo {
                name: left_name.to_string(),
                ..FunctionInfo::default()
            },
            right: FunctionInfo {
                name: right_name.to_string(),
                ..FunctionInfo::default()
            },
            differing_objects: Vec::new(),
        }
    }
}

/// A callee that existed only as a declaration when inlining was attempted.
/// At least one side is populated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MissingDef {
    pub left: Option<String>,
    pub right: Option<String>,
}

/// The overall outcome: results for all compared pairs plus the missing
/// definitions encountered along the way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverallResult {
    pub function_results: Vec<ComparisonResult>,
    pub missing_defs: Vec<MissingDef>,
}
