// SPDX-License-Identifier: Apache-2.0

//! Per-module debug-info indexes consumed by the comparator: aggregate
//! definition sites, the size-to-aggregate-names map, and macro records.

use std::collections::{BTreeSet, HashMap};

use crate::ir::{Function, Inst, Module};

#[derive(Debug, Clone, Default)]
pub struct DebugInfoIndex {
    struct_sites: HashMap<String, (String, usize)>,
    size_to_structs: HashMap<usize, BTreeSet<String>>,
    macro_by_name: HashMap<String, String>,
}

impl DebugInfoIndex {
    pub fn build(module: &Module) -> Self {
        let mut index = DebugInfoIndex::default();
        for def in module.structs.iter() {
            if let Some(pos) = &def.pos {
                if let Some(path) = module.file_table.id_to_path.get(&pos.fileno) {
                    index
                        .struct_sites
                        .insert(def.name.clone(), (path.clone(), pos.lineno));
                }
            }
            index
                .size_to_structs
                .entry(def.byte_size(module))
                .or_default()
                .insert(def.name.clone());
        }
        for m in module.macros.iter() {
            index.macro_by_name.insert(m.name.clone(), m.value.clone());
        }
        index
    }

    /// Definition site of a named aggregate, when debug info recorded one.
    pub fn struct_location(&self, name: &str) -> Option<(&str, usize)> {
        self.struct_sites
            .get(name)
            .map(|(file, line)| (file.as_str(), *line))
    }

    /// Names of aggregates with the given byte size.
    pub fn structs_of_size(&self, size: usize) -> Option<&BTreeSet<String>> {
        self.size_to_structs.get(&size)
    }

    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macro_by_name.get(name).map(|v| v.as_str())
    }

    /// Name of a macro whose recorded expansion equals `value`, if any.
    /// Lookup is deterministic: the lexicographically first match wins.
    pub fn macro_for_value(&self, value: &str) -> Option<&str> {
        let mut names: Vec<&String> = self
            .macro_by_name
            .iter()
            .filter(|(_, v)| v.as_str() == value)
            .map(|(n, _)| n)
            .collect();
        names.sort();
        names.first().map(|n| n.as_str())
    }

    /// Like [`macro_for_value`], for integer expansions.
    pub fn macro_for_int(&self, value: i128) -> Option<&str> {
        self.macro_for_value(&value.to_string())
    }
}

/// Source location of an instruction, resolved through the module's file
/// table.
pub fn inst_location(module: &Module, inst: &Inst) -> Option<(String, usize)> {
    let pos = inst.pos.as_ref()?;
    let path = module.file_table.id_to_path.get(&pos.fileno)?;
    Some((path.clone(), pos.lineno))
}

/// Source location of a function definition.
pub fn fn_location(module: &Module, func: &Function) -> (String, usize) {
    match &func.pos {
        Some(pos) => (
            module
                .file_table
                .id_to_path
                .get(&pos.fileno)
                .cloned()
                .unwrap_or_default(),
            pos.lineno,
        ),
        None => (String::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    #[test]
    fn indexes_structs_and_macros() {
        let text = r#"module m

file_number 0 "fs/inode.c"

macro BLOCK_SIZE = "4096"
macro PAGE_SIZE = "4096"

struct inode = { bits[64], bits[64] } pos=(0,33)
struct dentry = { bits[64], bits[64] }
"#;
        let mut parser = Parser::new(text);
        let module = parser.parse_module().unwrap();
        let index = DebugInfoIndex::build(&module);
        assert_eq!(index.struct_location("inode"), Some(("fs/inode.c", 33)));
        assert_eq!(index.struct_location("dentry"), None);
        let same_size = index.structs_of_size(16).unwrap();
        assert!(same_size.contains("inode") && same_size.contains("dentry"));
        assert_eq!(index.macro_value("BLOCK_SIZE"), Some("4096"));
        // Deterministic tie-break between equal-valued macros.
        assert_eq!(index.macro_for_int(4096), Some("BLOCK_SIZE"));
    }
}
