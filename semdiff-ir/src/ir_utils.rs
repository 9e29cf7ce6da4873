// SPDX-License-Identifier: Apache-2.0

//! Utility queries over the CFG IR: operand lists, use counts, side-effect
//! predicates, and function-name suffix handling.

use std::collections::HashSet;

use crate::ir::{BlockRef, Function, InstPayload, InstRef, Module, Operand};

/// Returns the list of value operands for the provided payload, in a stable
/// order. Block references are not included; see [`successor_blocks`].
pub fn operands(payload: &InstPayload) -> Vec<Operand> {
    use InstPayload::*;

    match payload {
        Binop(_, a, b) => vec![a.clone(), b.clone()],
        Icmp { lhs, rhs, .. } => vec![lhs.clone(), rhs.clone()],
        Select {
            cond,
            on_true,
            on_false,
        } => vec![cond.clone(), on_true.clone(), on_false.clone()],
        Load { ptr, .. } => vec![ptr.clone()],
        Store { value, ptr, .. } => vec![value.clone(), ptr.clone()],
        Alloca { .. } => vec![],
        FieldAddr { base, .. } => vec![base.clone()],
        Cast(_, arg) => vec![arg.clone()],
        Call { args, .. } => args.clone(),
        Asm { args, .. } => args.clone(),
        Phi { incoming } => incoming.iter().map(|(v, _)| v.clone()).collect(),
        Ret(Some(v)) => vec![v.clone()],
        Ret(None) => vec![],
        Br(_) => vec![],
        BrIf { cond, .. } => vec![cond.clone()],
        Switch { value, .. } => vec![value.clone()],
    }
}

/// Rebuilds a payload with every value operand passed through `f`.
pub fn remap_operands<F>(payload: &InstPayload, mut f: F) -> InstPayload
where
    F: FnMut(&Operand) -> Operand,
{
    use InstPayload::*;

    match payload {
        Binop(op, a, b) => Binop(*op, f(a), f(b)),
        Icmp { pred, lhs, rhs } => Icmp {
            pred: *pred,
            lhs: f(lhs),
            rhs: f(rhs),
        },
        Select {
            cond,
            on_true,
            on_false,
        } => Select {
            cond: f(cond),
            on_true: f(on_true),
            on_false: f(on_false),
        },
        Load { ptr, align } => Load {
            ptr: f(ptr),
            align: *align,
        },
        Store { value, ptr, align } => Store {
            value: f(value),
            ptr: f(ptr),
            align: *align,
        },
        Alloca { allocated_ty, align } => Alloca {
            allocated_ty: allocated_ty.clone(),
            align: *align,
        },
        FieldAddr {
            base,
            struct_name,
            index,
        } => FieldAddr {
            base: f(base),
            struct_name: struct_name.clone(),
            index: *index,
        },
        Cast(kind, arg) => Cast(*kind, f(arg)),
        Call { callee, args } => Call {
            callee: callee.clone(),
            args: args.iter().map(&mut f).collect(),
        },
        Asm { body, args } => Asm {
            body: body.clone(),
            args: args.iter().map(&mut f).collect(),
        },
        Phi { incoming } => Phi {
            incoming: incoming.iter().map(|(v, b)| (f(v), *b)).collect(),
        },
        Ret(v) => Ret(v.as_ref().map(&mut f)),
        Br(dest) => Br(*dest),
        BrIf {
            cond,
            then_blk,
            else_blk,
        } => BrIf {
            cond: f(cond),
            then_blk: *then_blk,
            else_blk: *else_blk,
        },
        Switch {
            value,
            default,
            cases,
        } => Switch {
            value: f(value),
            default: *default,
            cases: cases.clone(),
        },
    }
}

/// Rebuilds a payload with every block reference passed through `f`.
pub fn remap_blocks<F>(payload: &InstPayload, mut f: F) -> InstPayload
where
    F: FnMut(BlockRef) -> BlockRef,
{
    use InstPayload::*;

    match payload {
        Phi { incoming } => Phi {
            incoming: incoming.iter().map(|(v, b)| (v.clone(), f(*b))).collect(),
        },
        Br(dest) => Br(f(*dest)),
        BrIf {
            cond,
            then_blk,
            else_blk,
        } => BrIf {
            cond: cond.clone(),
            then_blk: f(*then_blk),
            else_blk: f(*else_blk),
        },
        Switch {
            value,
            default,
            cases,
        } => Switch {
            value: value.clone(),
            default: f(*default),
            cases: cases.iter().map(|(k, b)| (*k, f(*b))).collect(),
        },
        other => other.clone(),
    }
}

/// Returns, for every instruction in the arena, the number of operand slots
/// that reference its result.
pub fn use_counts(f: &Function) -> Vec<usize> {
    let mut counts = vec![0usize; f.insts.len()];
    for inst in f.insts.iter() {
        for op in operands(&inst.payload) {
            if let Operand::Inst(ir) = op {
                counts[ir.index] += 1;
            }
        }
    }
    counts
}

/// An instruction has a side effect if removing it could change observable
/// behavior: stores, calls, inline asm, and all terminators qualify.
pub fn inst_has_side_effect(payload: &InstPayload) -> bool {
    matches!(
        payload,
        InstPayload::Store { .. } | InstPayload::Call { .. } | InstPayload::Asm { .. }
    ) || payload.is_terminator()
}

fn fn_has_side_effect_rec(module: &Module, name: &str, visited: &mut HashSet<String>) -> bool {
    let Some(func) = module.get_fn(name) else {
        return true;
    };
    if func.is_declaration() {
        return true;
    }
    visited.insert(name.to_string());
    for inst in func.insts.iter() {
        match &inst.payload {
            InstPayload::Store { .. } | InstPayload::Asm { .. } => return true,
            InstPayload::Call { callee, .. } => {
                if visited.contains(callee) {
                    continue;
                }
                if fn_has_side_effect_rec(module, callee, visited) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Whether a function (transitively) has a side effect: it stores, executes
/// inline asm, or calls something that does. Declarations are assumed to.
pub fn fn_has_side_effect(module: &Module, name: &str) -> bool {
    let mut visited = HashSet::new();
    fn_has_side_effect_rec(module, name, &mut visited)
}

/// Checks whether the substring behind the last dot contains only digits,
/// i.e. the name carries a numeric suffix introduced by a transformation.
pub fn has_suffix(name: &str) -> bool {
    match name.rfind('.') {
        Some(dot) => {
            let tail = &name[dot + 1..];
            !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Removes everything behind the last dot. Assumes [`has_suffix`] holds.
pub fn drop_suffix(name: &str) -> &str {
    &name[..name.rfind('.').unwrap()]
}

/// The identity of a function across transformation-introduced renames.
pub fn base_name(name: &str) -> &str {
    if has_suffix(name) {
        drop_suffix(name)
    } else {
        name
    }
}

/// All direct calls in a function, as (call site, callee name) pairs in
/// arena order.
pub fn called_functions(f: &Function) -> Vec<(InstRef, String)> {
    let mut calls = Vec::new();
    for (index, inst) in f.insts.iter().enumerate() {
        if let InstPayload::Call { callee, .. } = &inst.payload {
            calls.push((InstRef { index }, callee.clone()));
        }
    }
    calls
}

/// Per-block predecessor lists, derived from terminator successors.
pub fn block_predecessors(f: &Function) -> Vec<Vec<BlockRef>> {
    let mut preds: Vec<Vec<BlockRef>> = vec![Vec::new(); f.blocks.len()];
    for (index, block) in f.blocks.iter().enumerate() {
        let Some(term) = block.terminator() else {
            continue;
        };
        for succ in f.get_inst(term).payload.successors() {
            let this = BlockRef { index };
            if !preds[succ.index].contains(&this) {
                preds[succ.index].push(this);
            }
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    fn parse_module(text: &str) -> Module {
        let mut parser = Parser::new(text);
        parser.parse_module().unwrap()
    }

    #[test]
    fn suffix_detection_requires_digits() {
        assert!(has_suffix("foo.42"));
        assert!(has_suffix("foo.bar.7"));
        assert!(!has_suffix("foo"));
        assert!(!has_suffix("foo.void"));
        assert!(!has_suffix("foo."));
        assert_eq!(base_name("foo.42"), "foo");
        assert_eq!(base_name("foo.bar.7"), "foo.bar");
        assert_eq!(base_name("foo"), "foo");
    }

    #[test]
    fn use_counts_cover_all_operand_slots() {
        let module = parse_module(
            r#"module m

fn f(x: bits[8]) -> bits[8] {
entry:
  a: bits[8] = add(x, x, id=1)
  b: bits[8] = add(a, a, id=2)
  c: bits[8] = add(x, 1, id=3)
  ret.4: void = ret(b, id=4)
}
"#,
        );
        let f = module.get_fn("f").unwrap();
        let counts = use_counts(f);
        // `a` feeds both slots of `b`; `c` is unused.
        assert_eq!(counts[0], 2);
        assert_eq!(counts[1], 1);
        assert_eq!(counts[2], 0);
    }

    #[test]
    fn side_effects_propagate_through_calls() {
        let module = parse_module(
            r#"module m

global sink: bits[32]

fn writer(v: bits[32]) -> void {
entry:
  store.1: void = store(v, @sink, align=4, id=1)
  ret.2: void = ret(id=2)
}

fn pure_add(v: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(v, 1, id=1)
  ret.2: void = ret(r, id=2)
}

fn caller(v: bits[32]) -> void {
entry:
  call.1: void = call(writer, v, id=1)
  ret.2: void = ret(id=2)
}
"#,
        );
        assert!(fn_has_side_effect(&module, "writer"));
        assert!(fn_has_side_effect(&module, "caller"));
        assert!(!fn_has_side_effect(&module, "pure_add"));
        assert!(fn_has_side_effect(&module, "undefined"));
    }
}
