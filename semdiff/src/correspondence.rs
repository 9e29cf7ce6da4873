// SPDX-License-Identifier: Apache-2.0

//! The value/type correspondence: an incrementally built partial bijection
//! between the two sides of a comparison, covering instruction results,
//! arguments, basic blocks, globals, and aggregate types.

use std::collections::HashMap;
use std::hash::Hash;

use semdiff_ir::debug_info::DebugInfoIndex;
use semdiff_ir::ir::{ArrayTypeData, BlockRef, InstRef, Module, Operand, Type};
use semdiff_ir::ir_utils::base_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Consistent,
    Conflict,
}

/// Options controlling how aggregate types are allowed to correspond.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCmpOptions {
    /// Allow two aggregates with different names to correspond when their
    /// byte sizes agree (renamed-struct tolerance).
    pub allow_renamed_structs: bool,
}

/// Everything [`Correspondence::relate_types`] needs besides the two types:
/// the modules owning the aggregate definitions, their debug-info indexes
/// (consulted for the size/name lookup behind the renamed-struct
/// tolerance), and the comparison options.
#[derive(Clone, Copy)]
pub struct TypeRelateCtx<'a> {
    pub left_module: &'a Module,
    pub right_module: &'a Module,
    pub di_left: &'a DebugInfoIndex,
    pub di_right: &'a DebugInfoIndex,
    pub opts: TypeCmpOptions,
}

fn relate_in<K: Eq + Hash + Clone>(
    l2r: &mut HashMap<K, K>,
    r2l: &mut HashMap<K, K>,
    l: K,
    r: K,
) -> Consistency {
    match (l2r.get(&l), r2l.get(&r)) {
        (None, None) => {
            l2r.insert(l.clone(), r.clone());
            r2l.insert(r, l);
            Consistency::Consistent
        }
        (Some(bound_r), Some(bound_l)) if *bound_r == r && *bound_l == l => {
            Consistency::Consistent
        }
        _ => Consistency::Conflict,
    }
}

/// A partial bijection at all times: any attempt to extend it with a
/// conflicting pair reports [`Consistency::Conflict`] and leaves the maps
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct Correspondence {
    inst_l2r: HashMap<usize, usize>,
    inst_r2l: HashMap<usize, usize>,
    arg_l2r: HashMap<usize, usize>,
    arg_r2l: HashMap<usize, usize>,
    block_l2r: HashMap<usize, usize>,
    block_r2l: HashMap<usize, usize>,
    global_l2r: HashMap<String, String>,
    global_r2l: HashMap<String, String>,
    struct_l2r: HashMap<String, String>,
    struct_r2l: HashMap<String, String>,
    /// One-sided value aliases installed when a benign rule erases an
    /// instruction (e.g. a width-preserving cast): the erased result stands
    /// for the aliased operand during later operand comparison.
    alias_left: HashMap<usize, Operand>,
    alias_right: HashMap<usize, Operand>,
}

impl Correspondence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relate_insts(&mut self, l: InstRef, r: InstRef) -> Consistency {
        relate_in(&mut self.inst_l2r, &mut self.inst_r2l, l.index, r.index)
    }

    pub fn relate_args(&mut self, l: usize, r: usize) -> Consistency {
        relate_in(&mut self.arg_l2r, &mut self.arg_r2l, l, r)
    }

    pub fn relate_blocks(&mut self, l: BlockRef, r: BlockRef) -> Consistency {
        relate_in(&mut self.block_l2r, &mut self.block_r2l, l.index, r.index)
    }

    pub fn relate_globals(&mut self, l: &str, r: &str) -> Consistency {
        relate_in(
            &mut self.global_l2r,
            &mut self.global_r2l,
            l.to_string(),
            r.to_string(),
        )
    }

    pub fn relate_structs(&mut self, l: &str, r: &str) -> Consistency {
        relate_in(
            &mut self.struct_l2r,
            &mut self.struct_r2l,
            l.to_string(),
            r.to_string(),
        )
    }

    pub fn lookup_inst_left(&self, l: InstRef) -> Option<InstRef> {
        self.inst_l2r.get(&l.index).map(|i| InstRef { index: *i })
    }

    pub fn lookup_inst_right(&self, r: InstRef) -> Option<InstRef> {
        self.inst_r2l.get(&r.index).map(|i| InstRef { index: *i })
    }

    pub fn lookup_block_left(&self, l: BlockRef) -> Option<BlockRef> {
        self.block_l2r.get(&l.index).map(|i| BlockRef { index: *i })
    }

    pub fn lookup_block_right(&self, r: BlockRef) -> Option<BlockRef> {
        self.block_r2l.get(&r.index).map(|i| BlockRef { index: *i })
    }

    pub fn lookup_struct_left(&self, l: &str) -> Option<&str> {
        self.struct_l2r.get(l).map(|s| s.as_str())
    }

    /// Instruction pairs currently related, left index to right index.
    pub fn inst_pairs(&self) -> impl Iterator<Item = (InstRef, InstRef)> + '_ {
        self.inst_l2r
            .iter()
            .map(|(l, r)| (InstRef { index: *l }, InstRef { index: *r }))
    }

    pub fn add_alias_left(&mut self, inst: InstRef, target: Operand) {
        self.alias_left.insert(inst.index, target);
    }

    pub fn add_alias_right(&mut self, inst: InstRef, target: Operand) {
        self.alias_right.insert(inst.index, target);
    }

    fn resolve_with(aliases: &HashMap<usize, Operand>, op: &Operand) -> Operand {
        let mut cur = op.clone();
        let mut steps = 0usize;
        while let Operand::Inst(ir) = &cur {
            match aliases.get(&ir.index) {
                Some(next) if steps < aliases.len() + 1 => {
                    cur = next.clone();
                    steps += 1;
                }
                _ => break,
            }
        }
        cur
    }

    pub fn resolve_left(&self, op: &Operand) -> Operand {
        Self::resolve_with(&self.alias_left, op)
    }

    pub fn resolve_right(&self, op: &Operand) -> Operand {
        Self::resolve_with(&self.alias_right, op)
    }

    /// Structural recursion over type constructors. Named aggregates are
    /// related through the struct map: same base name always corresponds;
    /// different names correspond only under
    /// [`TypeCmpOptions::allow_renamed_structs`] when each side's size/name
    /// index lists the other candidate under the observed byte size. Pairs
    /// of corresponding aggregates whose definitions nevertheless differ
    /// are appended to `differing` (once per pair).
    pub fn relate_types(
        &mut self,
        tl: &Type,
        tr: &Type,
        ctx: &TypeRelateCtx,
        differing: &mut Vec<(String, String)>,
    ) -> Result<(), String> {
        match (tl, tr) {
            (Type::Void, Type::Void) | (Type::Ptr, Type::Ptr) => Ok(()),
            (Type::Bits(wl), Type::Bits(wr)) => {
                if wl == wr {
                    Ok(())
                } else {
                    Err(format!("bit width mismatch: {} vs {}", wl, wr))
                }
            }
            (
                Type::Array(ArrayTypeData {
                    element_type: el,
                    element_count: nl,
                }),
                Type::Array(ArrayTypeData {
                    element_type: er,
                    element_count: nr,
                }),
            ) => {
                if nl != nr {
                    return Err(format!("array count mismatch: {} vs {}", nl, nr));
                }
                self.relate_types(el, er, ctx, differing)
            }
            (Type::Struct(nl), Type::Struct(nr)) => {
                self.relate_struct_types(nl, nr, ctx, differing)
            }
            _ => Err(format!("type constructor mismatch: {} vs {}", tl, tr)),
        }
    }

    fn relate_struct_types(
        &mut self,
        nl: &str,
        nr: &str,
        ctx: &TypeRelateCtx,
        differing: &mut Vec<(String, String)>,
    ) -> Result<(), String> {
        if let Some(bound) = self.struct_l2r.get(nl) {
            return if bound == nr {
                Ok(())
            } else {
                Err(format!(
                    "aggregate {} already corresponds to {}, not {}",
                    nl, bound, nr
                ))
            };
        }
        if self.struct_r2l.contains_key(nr) {
            return Err(format!("aggregate {} is already bound on the right", nr));
        }
        let (ml, mr) = (ctx.left_module, ctx.right_module);
        let same_base = base_name(nl) == base_name(nr);
        if !same_base {
            if !ctx.opts.allow_renamed_structs {
                return Err(format!("aggregate name mismatch: {} vs {}", nl, nr));
            }
            // Renamed aggregates correspond only when each side's size/name
            // index lists the other name under the observed byte size.
            let size_l = ml.get_struct(nl).map(|d| d.byte_size(ml));
            let size_r = mr.get_struct(nr).map(|d| d.byte_size(mr));
            let listed = match (size_l, size_r) {
                (Some(sl), Some(sr)) => {
                    ctx.di_right
                        .structs_of_size(sl)
                        .map_or(false, |names| names.contains(nr))
                        && ctx
                            .di_left
                            .structs_of_size(sr)
                            .map_or(false, |names| names.contains(nl))
                }
                _ => false,
            };
            if !listed {
                return Err(format!(
                    "renamed aggregates {} and {} differ in size",
                    nl, nr
                ));
            }
        }
        // Install before recursing so self-referential aggregates terminate.
        self.struct_l2r.insert(nl.to_string(), nr.to_string());
        self.struct_r2l.insert(nr.to_string(), nl.to_string());

        let mut defs_differ = false;
        match (ml.get_struct(nl), mr.get_struct(nr)) {
            (Some(dl), Some(dr)) => {
                if dl.fields.len() != dr.fields.len() || dl.align != dr.align {
                    defs_differ = true;
                } else {
                    for (fl, fr) in dl.fields.iter().zip(dr.fields.iter()) {
                        if self.relate_types(fl, fr, ctx, differing).is_err() {
                            defs_differ = true;
                        }
                    }
                }
            }
            (None, None) => {}
            _ => defs_differ = true,
        }
        if defs_differ {
            let pair = (nl.to_string(), nr.to_string());
            if !differing.contains(&pair) {
                differing.push(pair);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdiff_ir::ir_parser::Parser;

    fn parse_module(text: &str) -> Module {
        let mut parser = Parser::new(text);
        parser.parse_module().unwrap()
    }

    #[test]
    fn relate_is_a_partial_bijection() {
        let mut corr = Correspondence::new();
        let a = InstRef { index: 1 };
        let b = InstRef { index: 2 };
        let c = InstRef { index: 3 };
        assert_eq!(corr.relate_insts(a, b), Consistency::Consistent);
        assert_eq!(corr.relate_insts(a, b), Consistency::Consistent);
        assert_eq!(corr.relate_insts(a, c), Consistency::Conflict);
        assert_eq!(corr.relate_insts(c, b), Consistency::Conflict);
        assert_eq!(corr.lookup_inst_left(a), Some(b));
        assert_eq!(corr.lookup_inst_right(b), Some(a));
    }

    fn relate_ctx<'a>(
        ml: &'a Module,
        mr: &'a Module,
        di_l: &'a DebugInfoIndex,
        di_r: &'a DebugInfoIndex,
        opts: TypeCmpOptions,
    ) -> TypeRelateCtx<'a> {
        TypeRelateCtx {
            left_module: ml,
            right_module: mr,
            di_left: di_l,
            di_right: di_r,
            opts,
        }
    }

    #[test]
    fn same_base_structs_with_differing_layout_are_recorded() {
        let ml = parse_module("module a\n\nstruct s = { bits[32], bits[32] }\n");
        let mr = parse_module("module b\n\nstruct s = { bits[32], bits[64] }\n");
        let (di_l, di_r) = (DebugInfoIndex::build(&ml), DebugInfoIndex::build(&mr));
        let mut corr = Correspondence::new();
        let mut differing = Vec::new();
        corr.relate_types(
            &Type::Struct("s".to_string()),
            &Type::Struct("s".to_string()),
            &relate_ctx(&ml, &mr, &di_l, &di_r, TypeCmpOptions::default()),
            &mut differing,
        )
        .unwrap();
        assert_eq!(differing, vec![("s".to_string(), "s".to_string())]);
    }

    #[test]
    fn renamed_structs_require_the_tolerance_and_equal_sizes() {
        let ml = parse_module("module a\n\nstruct old_name = { bits[64] }\n");
        let mr = parse_module("module b\n\nstruct new_name = { bits[64] }\n");
        let (di_l, di_r) = (DebugInfoIndex::build(&ml), DebugInfoIndex::build(&mr));
        let mut corr = Correspondence::new();
        let mut differing = Vec::new();
        let strict = corr.relate_types(
            &Type::Struct("old_name".to_string()),
            &Type::Struct("new_name".to_string()),
            &relate_ctx(&ml, &mr, &di_l, &di_r, TypeCmpOptions::default()),
            &mut differing,
        );
        assert!(strict.is_err());
        let lenient = corr.relate_types(
            &Type::Struct("old_name".to_string()),
            &Type::Struct("new_name".to_string()),
            &relate_ctx(
                &ml,
                &mr,
                &di_l,
                &di_r,
                TypeCmpOptions {
                    allow_renamed_structs: true,
                },
            ),
            &mut differing,
        );
        assert!(lenient.is_ok());
        assert!(differing.is_empty());
    }

    #[test]
    fn renamed_structs_of_different_sizes_never_correspond() {
        let ml = parse_module("module a\n\nstruct old_name = { bits[64] }\n");
        let mr = parse_module("module b\n\nstruct new_name = { bits[64], bits[64] }\n");
        let (di_l, di_r) = (DebugInfoIndex::build(&ml), DebugInfoIndex::build(&mr));
        let mut corr = Correspondence::new();
        let mut differing = Vec::new();
        let result = corr.relate_types(
            &Type::Struct("old_name".to_string()),
            &Type::Struct("new_name".to_string()),
            &relate_ctx(
                &ml,
                &mr,
                &di_l,
                &di_r,
                TypeCmpOptions {
                    allow_renamed_structs: true,
                },
            ),
            &mut differing,
        );
        assert!(result.is_err());
    }

    #[test]
    fn suffixed_struct_names_share_identity() {
        let ml = parse_module("module a\n\nstruct s = { bits[32] }\n");
        let mr = parse_module("module b\n\nstruct s.7 = { bits[32] }\n");
        let (di_l, di_r) = (DebugInfoIndex::build(&ml), DebugInfoIndex::build(&mr));
        let mut corr = Correspondence::new();
        let mut differing = Vec::new();
        corr.relate_types(
            &Type::Struct("s".to_string()),
            &Type::Struct("s.7".to_string()),
            &relate_ctx(&ml, &mr, &di_l, &di_r, TypeCmpOptions::default()),
            &mut differing,
        )
        .unwrap();
        assert!(differing.is_empty());
    }
}
