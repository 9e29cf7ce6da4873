// SPDX-License-Identifier: Apache-2.0

//! The pattern catalogue: user-supplied IR fragment pairs declaring that a
//! given difference is semantics-preserving. Loaded once at startup from the
//! pattern configuration file; immutable afterwards.

use std::collections::HashSet;

use semdiff_ir::debug_info::DebugInfoIndex;
use semdiff_ir::ir::{ConstValue, Function, InstPayload, InstRef, Module, Operand};
use semdiff_ir::ir_parser;

use crate::config::{OnParseFailure, PatternConfig};

/// Prefix of the new side of a difference pattern.
pub const NEW_PREFIX: &str = "new_";
/// Prefix of the old side of a difference pattern.
pub const OLD_PREFIX: &str = "old_";
/// Reserved name of the function encoding the final value mapping.
pub const MAPPING_FN_NAME: &str = "mapping";
/// Reserved callee name used inside the mapping function; each call
/// contributes one (new-value, old-value) constraint.
pub const MAPPING_PAIR_CALLEE: &str = "pair";

#[derive(Debug)]
pub struct PatternLoadError {
    msg: String,
}

impl PatternLoadError {
    fn new(msg: String) -> Self {
        Self { msg }
    }
}

impl std::fmt::Display for PatternLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternLoadError: {}", self.msg)
    }
}

impl std::error::Error for PatternLoadError {}

/// One side of a difference pattern, fully indexed for matching.
#[derive(Debug, Clone)]
pub struct PatternSide {
    /// Name of the side's function inside the pattern module.
    pub fn_name: String,
    /// The first differing instruction (comparison entry point).
    pub start: InstRef,
    /// Instructions marked as the last differing one. May be empty, in
    /// which case the side matches only when walked to exhaustion.
    pub ends: HashSet<usize>,
    /// Depth bound for the walk, from `bb-limit` metadata.
    pub basic_block_limit: Option<usize>,
}

/// A named pair of IR fragments drawn from a pattern module.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    module_index: usize,
    pub new_side: PatternSide,
    pub old_side: PatternSide,
    /// Final (new-value-name, old-value-name) mapping constraints.
    pub final_mapping: Vec<(String, String)>,
}

/// Process-wide collection of patterns plus the modules that own them and
/// their debug-info indexes.
#[derive(Debug, Default)]
pub struct PatternSet {
    modules: Vec<Module>,
    indexes: Vec<DebugInfoIndex>,
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    pub fn module_of(&self, pattern: &Pattern) -> &Module {
        &self.modules[pattern.module_index]
    }

    pub fn index_of(&self, pattern: &Pattern) -> &DebugInfoIndex {
        &self.indexes[pattern.module_index]
    }

    pub fn side_fn<'s>(&'s self, pattern: &Pattern, side: &PatternSide) -> &'s Function {
        self.module_of(pattern)
            .get_fn(&side.fn_name)
            .expect("pattern side function exists in its module")
    }

    /// Loads the catalogue described by `config`. Malformed pattern modules
    /// are skipped with a warning or abort loading, per `on-parse-failure`.
    pub fn load(config: &PatternConfig) -> Result<Self, PatternLoadError> {
        let mut set = PatternSet::default();
        for path in config.patterns.iter() {
            match load_pattern_module(std::path::Path::new(path)) {
                Ok((module, patterns)) => set.add_module(module, patterns),
                Err(e) => match config.on_parse_failure {
                    OnParseFailure::Warn => {
                        log::warn!("skipping pattern module {}: {}", path, e);
                    }
                    OnParseFailure::Abort => {
                        return Err(PatternLoadError::new(format!("{}: {}", path, e)))
                    }
                },
            }
        }
        Ok(set)
    }

    /// Loads a single pattern module from text. Used by tests and by hosts
    /// that assemble catalogues programmatically.
    pub fn add_module_text(&mut self, text: &str) -> Result<(), PatternLoadError> {
        let mut parser = ir_parser::Parser::new(text);
        let module = parser
            .parse_module()
            .map_err(|e| PatternLoadError::new(e.to_string()))?;
        let patterns = patterns_of_module(&module).map_err(PatternLoadError::new)?;
        self.add_module(module, patterns);
        Ok(())
    }

    fn add_module(&mut self, module: Module, mut patterns: Vec<Pattern>) {
        let index = self.modules.len();
        self.indexes.push(DebugInfoIndex::build(&module));
        self.modules.push(module);
        for p in patterns.iter_mut() {
            p.module_index = index;
        }
        self.patterns.extend(patterns);
    }
}

fn load_pattern_module(path: &std::path::Path) -> Result<(Module, Vec<Pattern>), String> {
    let module = ir_parser::parse_path_to_module(path).map_err(|e| e.to_string())?;
    let patterns = patterns_of_module(&module)?;
    Ok((module, patterns))
}

fn side_of_fn(func: &Function) -> Result<PatternSide, String> {
    let mut starts: Vec<InstRef> = Vec::new();
    let mut ends: HashSet<usize> = HashSet::new();
    let mut basic_block_limit: Option<usize> = None;
    for (index, inst) in func.insts.iter().enumerate() {
        let Some(meta) = &inst.pattern_meta else {
            continue;
        };
        if meta.pattern_start {
            starts.push(InstRef { index });
        }
        if meta.pattern_end {
            ends.insert(index);
        }
        if let Some(limit) = meta.basic_block_limit {
            basic_block_limit = Some(limit);
        }
    }
    if starts.len() != 1 {
        return Err(format!(
            "pattern side {} must carry exactly one pattern-start, found {}",
            func.name,
            starts.len()
        ));
    }
    Ok(PatternSide {
        fn_name: func.name.clone(),
        start: starts[0],
        ends,
        basic_block_limit,
    })
}

/// Extracts the final mapping constraints from the reserved `mapping`
/// function: each `call(pair, "<new>", "<old>")` contributes one pair.
fn final_mapping_of(module: &Module) -> Result<Vec<(String, String)>, String> {
    let Some(func) = module.get_fn(MAPPING_FN_NAME) else {
        return Ok(Vec::new());
    };
    let mut mapping = Vec::new();
    for inst in func.insts.iter() {
        let InstPayload::Call { callee, args } = &inst.payload else {
            continue;
        };
        if callee != MAPPING_PAIR_CALLEE {
            continue;
        }
        match args.as_slice() {
            [Operand::Const(ConstValue::Str(new_name)), Operand::Const(ConstValue::Str(old_name))] => {
                mapping.push((new_name.clone(), old_name.clone()));
            }
            _ => {
                return Err(format!(
                    "mapping pair in {} must take two string constants",
                    module.name
                ))
            }
        }
    }
    Ok(mapping)
}

fn patterns_of_module(module: &Module) -> Result<Vec<Pattern>, String> {
    let final_mapping = final_mapping_of(module)?;
    let mut patterns = Vec::new();
    for func in module.functions.iter() {
        let Some(name) = func.name.strip_prefix(NEW_PREFIX) else {
            continue;
        };
        let old_name = format!("{}{}", OLD_PREFIX, name);
        let Some(old_fn) = module.get_fn(&old_name) else {
            return Err(format!(
                "pattern {} has a new side but no function named {}",
                name, old_name
            ));
        };
        if func.is_declaration() || old_fn.is_declaration() {
            return Err(format!("pattern {} sides must have bodies", name));
        }
        patterns.push(Pattern {
            name: name.to_string(),
            module_index: 0,
            new_side: side_of_fn(func)?,
            old_side: side_of_fn(old_fn)?,
            final_mapping: final_mapping.clone(),
        });
    }
    if patterns.is_empty() {
        return Err(format!(
            "module {} defines no {}/{} pattern pair",
            module.name, NEW_PREFIX, OLD_PREFIX
        ));
    }
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIFT_PATTERN: &str = r#"module shift_pattern

fn new_shift(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = shl(x, 1, id=1, meta=[pattern-start, pattern-end])
  ret.2: void = ret(r, id=2)
}

fn old_shift(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = mul(x, 2, id=1, meta=[pattern-start, pattern-end])
  ret.2: void = ret(r, id=2)
}

fn mapping() -> void {
entry:
  call.1: void = call(pair, "r", "r", id=1)
  ret.2: void = ret(id=2)
}
"#;

    #[test]
    fn loads_a_well_formed_pattern() {
        let mut set = PatternSet::empty();
        set.add_module_text(SHIFT_PATTERN).unwrap();
        assert_eq!(set.len(), 1);
        let p = set.iter().next().unwrap();
        assert_eq!(p.name, "shift");
        assert_eq!(p.final_mapping, vec![("r".to_string(), "r".to_string())]);
        let new_fn = set.side_fn(p, &p.new_side);
        assert_eq!(new_fn.name, "new_shift");
    }

    #[test]
    fn rejects_side_without_start() {
        let text = r#"module bad

fn new_p(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(x, 1, id=1)
  ret.2: void = ret(r, id=2)
}

fn old_p(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(x, 1, id=1, meta=[pattern-start])
  ret.2: void = ret(r, id=2)
}
"#;
        let mut set = PatternSet::empty();
        assert!(set.add_module_text(text).is_err());
    }

    #[test]
    fn rejects_missing_old_side() {
        let text = r#"module bad

fn new_p(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(x, 1, id=1, meta=[pattern-start])
  ret.2: void = ret(r, id=2)
}
"#;
        let mut set = PatternSet::empty();
        assert!(set.add_module_text(text).is_err());
    }

    #[test]
    fn loading_the_same_pattern_twice_keeps_both_entries() {
        let mut set = PatternSet::empty();
        set.add_module_text(SHIFT_PATTERN).unwrap();
        set.add_module_text(SHIFT_PATTERN).unwrap();
        assert_eq!(set.len(), 2);
    }
}
