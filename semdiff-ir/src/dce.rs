// SPDX-License-Identifier: Apache-2.0

//! Function simplification: dead-instruction elimination and CFG
//! normalization (unreachable-block removal, straight-line block merging).
//! Signatures are never changed.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ir::{Block, BlockRef, Function, InstPayload, InstRef, Operand};
use crate::ir_utils::{block_predecessors, inst_has_side_effect, operands, remap_blocks,
    remap_operands};

/// Simplifies a function in place: drops unreachable blocks, merges
/// straight-line block chains, and removes instructions whose results are
/// unused and that have no side effects. No observable behavior change; the
/// signature is untouched. Declarations are left as-is.
pub fn simplify_function(f: &mut Function) {
    if f.is_declaration() {
        return;
    }
    loop {
        let mut changed = remove_unreachable_blocks(f);
        changed |= merge_straightline_blocks(f);
        if !changed {
            break;
        }
    }
    remove_dead_insts(f);
}

/// Drops blocks not reachable from the entry block. Phi operands flowing in
/// from removed blocks are dropped with them. Returns whether anything
/// changed.
pub fn remove_unreachable_blocks(f: &mut Function) -> bool {
    let n = f.blocks.len();
    if n == 0 {
        return false;
    }
    let mut reachable = vec![false; n];
    let mut queue: VecDeque<usize> = VecDeque::new();
    reachable[0] = true;
    queue.push_back(0);
    while let Some(b) = queue.pop_front() {
        let Some(term) = f.blocks[b].terminator() else {
            continue;
        };
        for succ in f.get_inst(term).payload.successors() {
            if !reachable[succ.index] {
                reachable[succ.index] = true;
                queue.push_back(succ.index);
            }
        }
    }
    if reachable.iter().all(|r| *r) {
        return false;
    }

    // Compact the block list and remap references.
    let mut mapping: Vec<Option<usize>> = vec![None; n];
    let mut kept: Vec<Block> = Vec::new();
    for (i, block) in f.blocks.iter().enumerate() {
        if reachable[i] {
            mapping[i] = Some(kept.len());
            kept.push(block.clone());
        }
    }
    f.blocks = kept;
    // Only instructions still placed in a block are remapped; orphans keep
    // stale references and are collected by remove_dead_insts.
    let mut in_kept = vec![false; f.insts.len()];
    for block in f.blocks.iter() {
        for ir in block.insts.iter() {
            in_kept[ir.index] = true;
        }
    }
    for (i, inst) in f.insts.iter_mut().enumerate() {
        if !in_kept[i] {
            continue;
        }
        if let InstPayload::Phi { incoming } = &mut inst.payload {
            incoming.retain(|(_, b)| reachable[b.index]);
        }
        inst.payload = remap_blocks(&inst.payload, |b| BlockRef {
            index: mapping[b.index].expect("reachable block may not branch to a removed block"),
        });
    }
    true
}

/// Merges `a -> b` block pairs where `a` ends in an unconditional branch and
/// `b` has `a` as its only predecessor. Single-source phis in `b` collapse to
/// their incoming value. Returns whether anything changed.
pub fn merge_straightline_blocks(f: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let preds = block_predecessors(f);
        let mut merge_pair: Option<(usize, usize)> = None;
        for (a, block) in f.blocks.iter().enumerate() {
            let Some(term) = block.terminator() else {
                continue;
            };
            if let InstPayload::Br(b) = f.get_inst(term).payload {
                if b.index != a && b.index != 0 && preds[b.index].len() == 1 {
                    merge_pair = Some((a, b.index));
                    break;
                }
            }
        }
        let Some((a, b)) = merge_pair else {
            break;
        };

        // Collapse single-source phis of `b` into aliases.
        let mut aliases: HashMap<usize, Operand> = HashMap::new();
        let mut mergeable = true;
        for ir in f.blocks[b].insts.iter() {
            if let InstPayload::Phi { incoming } = &f.get_inst(*ir).payload {
                if incoming.len() == 1 {
                    aliases.insert(ir.index, incoming[0].0.clone());
                } else {
                    mergeable = false;
                }
            }
        }
        if !mergeable {
            break;
        }
        let resolve = |op: &Operand| -> Operand {
            let mut cur = op.clone();
            while let Operand::Inst(ir) = &cur {
                match aliases.get(&ir.index) {
                    Some(next) => cur = next.clone(),
                    None => break,
                }
            }
            cur
        };
        for inst in f.insts.iter_mut() {
            inst.payload = remap_operands(&inst.payload, &resolve);
        }

        // Splice `b` into `a`: drop a's branch, append b's non-phi
        // instructions, and redirect phi edges in b's successors.
        f.blocks[a].insts.pop();
        let moved: Vec<InstRef> = f.blocks[b]
            .insts
            .iter()
            .copied()
            .filter(|ir| !matches!(f.get_inst(*ir).payload, InstPayload::Phi { .. }))
            .collect();
        f.blocks[a].insts.extend(moved);
        f.blocks[b].insts.clear();
        let from = BlockRef { index: b };
        let to = BlockRef { index: a };
        for inst in f.insts.iter_mut() {
            if let InstPayload::Phi { incoming } = &mut inst.payload {
                for (_, src) in incoming.iter_mut() {
                    if *src == from {
                        *src = to;
                    }
                }
            }
        }
        remove_unreachable_blocks(f);
        changed = true;
    }
    changed
}

/// Removes instructions that are not listed by any block or whose results
/// are unused and side-effect free, then compacts the instruction arena.
pub fn remove_dead_insts(f: &mut Function) {
    let n = f.insts.len();
    let mut in_blocks = vec![false; n];
    for block in f.blocks.iter() {
        for ir in block.insts.iter() {
            in_blocks[ir.index] = true;
        }
    }

    // Seed liveness with side-effecting instructions that are still placed
    // in a block, then propagate through operands.
    let mut live = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    for (i, inst) in f.insts.iter().enumerate() {
        if in_blocks[i] && inst_has_side_effect(&inst.payload) {
            live[i] = true;
            stack.push(i);
        }
    }
    while let Some(i) = stack.pop() {
        for op in operands(&f.insts[i].payload) {
            if let Operand::Inst(ir) = op {
                if !live[ir.index] {
                    live[ir.index] = true;
                    stack.push(ir.index);
                }
            }
        }
    }

    let removed: HashSet<usize> = (0..n).filter(|i| !live[*i]).collect();
    if removed.is_empty() {
        return;
    }

    let mut mapping: Vec<Option<usize>> = vec![None; n];
    let mut new_insts = Vec::with_capacity(n - removed.len());
    for (i, inst) in f.insts.iter().enumerate() {
        if live[i] {
            mapping[i] = Some(new_insts.len());
            new_insts.push(inst.clone());
        }
    }
    for inst in new_insts.iter_mut() {
        inst.payload = remap_operands(&inst.payload, |op| match op {
            Operand::Inst(ir) => Operand::Inst(InstRef {
                index: mapping[ir.index].expect("live instruction references a dead operand"),
            }),
            other => other.clone(),
        });
    }
    f.insts = new_insts;
    for block in f.blocks.iter_mut() {
        block.insts = block
            .insts
            .iter()
            .filter_map(|ir| mapping[ir.index].map(|index| InstRef { index }))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;
    use crate::ir::Module;

    fn parse_module(text: &str) -> Module {
        let mut parser = Parser::new(text);
        parser.parse_module().unwrap()
    }

    #[test]
    fn dead_add_is_removed_but_store_stays() {
        let module = parse_module(
            r#"module m

global sink: bits[32]

fn f(x: bits[32]) -> bits[32] {
entry:
  unused: bits[32] = add(x, 7, id=1)
  store.2: void = store(x, @sink, align=4, id=2)
  r: bits[32] = add(x, 1, id=3)
  ret.4: void = ret(r, id=4)
}
"#,
        );
        let mut f = module.get_fn("f").unwrap().clone();
        simplify_function(&mut f);
        assert_eq!(f.blocks[0].insts.len(), 3);
        assert!(f.insts.iter().all(|i| i.text_id != 1));
    }

    #[test]
    fn straightline_chain_merges_into_one_block() {
        let module = parse_module(
            r#"module m

fn f(x: bits[32]) -> bits[32] {
entry:
  a: bits[32] = add(x, 1, id=1)
  br.2: void = br(mid, id=2)
mid:
  b: bits[32] = add(a, 1, id=3)
  br.4: void = br(tail, id=4)
tail:
  ret.5: void = ret(b, id=5)
}
"#,
        );
        let mut f = module.get_fn("f").unwrap().clone();
        simplify_function(&mut f);
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].insts.len(), 3);
    }

    #[test]
    fn single_source_phi_collapses_during_merge() {
        let module = parse_module(
            r#"module m

fn f(x: bits[32]) -> bits[32] {
entry:
  a: bits[32] = add(x, 1, id=1)
  br.2: void = br(tail, id=2)
tail:
  p: bits[32] = phi([a, entry], id=3)
  ret.4: void = ret(p, id=4)
}
"#,
        );
        let mut f = module.get_fn("f").unwrap().clone();
        simplify_function(&mut f);
        assert_eq!(f.blocks.len(), 1);
        // ret now consumes `a` directly.
        let ret = f.blocks[0].insts.last().unwrap();
        let ops = operands(&f.get_inst(*ret).payload);
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], Operand::Inst(_)));
        assert!(!f
            .insts
            .iter()
            .any(|i| matches!(i.payload, InstPayload::Phi { .. })));
    }

    #[test]
    fn unreachable_block_is_dropped() {
        let module = parse_module(
            r#"module m

fn f(x: bits[32]) -> bits[32] {
entry:
  ret.1: void = ret(x, id=1)
orphan:
  dead: bits[32] = add(x, 1, id=2)
  ret.3: void = ret(dead, id=3)
}
"#,
        );
        let mut f = module.get_fn("f").unwrap().clone();
        simplify_function(&mut f);
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.insts.len(), 1);
    }
}
