// SPDX-License-Identifier: Apache-2.0

//! Force-inlining of a single direct call site: the call's block is split,
//! the callee's blocks are cloned into the caller with fresh ids, and
//! returned values are funneled through a phi in the continuation block.

use std::collections::HashMap;

use crate::ir::{
    Block, BlockRef, Function, Inst, InstPayload, InstRef, Operand, Type,
};
use crate::ir_utils::{remap_blocks, remap_operands};

fn unique_block_name(caller: &Function, base: &str) -> String {
    if caller.find_block_by_name(base).is_none() {
        return base.to_string();
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{}.{}", base, n);
        if caller.find_block_by_name(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

/// Replaces the direct call at `site` in `caller` with the body of `callee`.
///
/// The callee must be a definition and the call must name it. Instructions
/// made dead by the rewrite (the call itself, collapsed phis) are left for
/// the simplifier to collect.
pub fn inline_call(caller: &mut Function, site: InstRef, callee: &Function) -> Result<(), String> {
    if callee.is_declaration() {
        return Err(format!(
            "inline_call: callee '{}' has no body",
            callee.name
        ));
    }
    let call_args = match &caller.get_inst(site).payload {
        InstPayload::Call { callee: name, args } if *name == callee.name => args.clone(),
        other => {
            return Err(format!(
                "inline_call: site is not a call to '{}' (found {})",
                callee.name,
                other.get_operator()
            ))
        }
    };
    if call_args.len() != callee.params.len() {
        return Err(format!(
            "inline_call: call passes {} args, callee '{}' takes {}",
            call_args.len(),
            callee.name,
            callee.params.len()
        ));
    }
    let call_block = caller
        .block_of_inst(site)
        .ok_or_else(|| "inline_call: call site is not placed in a block".to_string())?;
    let call_ty = caller.get_inst(site).ty.clone();

    let mut next_id = caller.next_text_id().max(callee.next_text_id());

    // Split the call block: everything after the call moves to a fresh
    // continuation block.
    let split_pos = caller.blocks[call_block.index]
        .insts
        .iter()
        .position(|ir| *ir == site)
        .expect("block_of_inst listed the call block");
    let tail: Vec<InstRef> = caller.blocks[call_block.index]
        .insts
        .split_off(split_pos + 1);
    caller.blocks[call_block.index].insts.pop();
    let cont_name = unique_block_name(caller, &format!("{}.cont", caller.blocks[call_block.index].name));
    let cont = BlockRef {
        index: caller.blocks.len(),
    };
    caller.blocks.push(Block {
        name: cont_name,
        insts: tail,
    });

    // The call block's outgoing edges now originate from the continuation.
    for inst in caller.insts.iter_mut() {
        if let InstPayload::Phi { incoming } = &mut inst.payload {
            for (_, src) in incoming.iter_mut() {
                if *src == call_block {
                    *src = cont;
                }
            }
        }
    }

    // Clone callee blocks into the caller with fresh ids and remapped
    // references.
    let mut block_map: HashMap<usize, BlockRef> = HashMap::new();
    for (i, b) in callee.blocks.iter().enumerate() {
        let name = unique_block_name(caller, &format!("{}.{}", callee.name, b.name));
        block_map.insert(
            i,
            BlockRef {
                index: caller.blocks.len(),
            },
        );
        caller.blocks.push(Block {
            name,
            insts: Vec::new(),
        });
    }
    // Assign cloned arena slots in block-walk order; orphaned callee
    // instructions are not carried over.
    let mut inst_map: HashMap<usize, InstRef> = HashMap::new();
    let mut next_slot = caller.insts.len();
    for b in callee.blocks.iter() {
        for ir in b.insts.iter() {
            inst_map.insert(ir.index, InstRef { index: next_slot });
            next_slot += 1;
        }
    }
    let mut ret_edges: Vec<(BlockRef, Option<Operand>)> = Vec::new();
    for (bi, b) in callee.blocks.iter().enumerate() {
        let new_block = block_map[&bi];
        for ir in b.insts.iter() {
            let src = callee.get_inst(*ir);
            let mut payload = remap_operands(&src.payload, |op| match op {
                Operand::Inst(r) => Operand::Inst(inst_map[&r.index]),
                Operand::Arg(i) => call_args[*i].clone(),
                other => other.clone(),
            });
            payload = remap_blocks(&payload, |b| block_map[&b.index]);
            // Returns become branches to the continuation block.
            if let InstPayload::Ret(value) = &payload {
                ret_edges.push((new_block, value.clone()));
                payload = InstPayload::Br(cont);
            }
            let new_ref = inst_map[&ir.index];
            let inst = Inst {
                text_id: next_id,
                name: src
                    .name
                    .as_ref()
                    .map(|n| format!("{}.{}", n, next_id)),
                ty: src.ty.clone(),
                payload,
                pos: src.pos.clone(),
                macro_hint: src.macro_hint.clone(),
                pattern_meta: None,
            };
            next_id += 1;
            debug_assert_eq!(new_ref.index, caller.insts.len());
            caller.insts.push(inst);
            caller.blocks[new_block.index].insts.push(new_ref);
        }
    }

    // Route the split block into the inlined entry.
    let entry_clone = block_map[&0];
    let br_ref = InstRef {
        index: caller.insts.len(),
    };
    caller.insts.push(Inst {
        text_id: next_id,
        name: None,
        ty: Type::Void,
        payload: InstPayload::Br(entry_clone),
        pos: None,
        macro_hint: None,
        pattern_meta: None,
    });
    next_id += 1;
    caller.blocks[call_block.index].insts.push(br_ref);

    // Funnel returned values into the continuation through a phi and replace
    // the call's uses with it.
    if !call_ty.is_void() {
        let incoming: Vec<(Operand, BlockRef)> = ret_edges
            .iter()
            .filter_map(|(b, v)| v.clone().map(|v| (v, *b)))
            .collect();
        if incoming.is_empty() {
            return Err(format!(
                "inline_call: callee '{}' never returns a value but the call result has type {}",
                callee.name, call_ty
            ));
        }
        let phi_ref = InstRef {
            index: caller.insts.len(),
        };
        caller.insts.push(Inst {
            text_id: next_id,
            name: None,
            ty: call_ty,
            payload: InstPayload::Phi { incoming },
            pos: None,
            macro_hint: None,
            pattern_meta: None,
        });
        caller.blocks[cont.index].insts.insert(0, phi_ref);
        for (index, inst) in caller.insts.iter_mut().enumerate() {
            if index == phi_ref.index {
                continue;
            }
            inst.payload = remap_operands(&inst.payload, |op| match op {
                Operand::Inst(r) if *r == site => Operand::Inst(phi_ref),
                other => other.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dce::simplify_function;
    use crate::ir::Module;
    use crate::ir_parser::Parser;

    fn parse_module(text: &str) -> Module {
        let mut parser = Parser::new(text);
        parser.parse_module().unwrap()
    }

    #[test]
    fn inline_single_block_callee() {
        let module = parse_module(
            r#"module m

fn twice(v: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(v, v, id=1)
  ret.2: void = ret(r, id=2)
}

fn caller(x: bits[32]) -> bits[32] {
entry:
  y: bits[32] = call(twice, x, id=1)
  z: bits[32] = add(y, 1, id=2)
  ret.3: void = ret(z, id=3)
}
"#,
        );
        let callee = module.get_fn("twice").unwrap().clone();
        let mut caller = module.get_fn("caller").unwrap().clone();
        let site = caller.find_inst_by_name("y").unwrap();
        inline_call(&mut caller, site, &callee).unwrap();
        simplify_function(&mut caller);
        // No calls remain; semantics folded into straight-line code.
        assert!(!caller
            .insts
            .iter()
            .any(|i| matches!(i.payload, InstPayload::Call { .. })));
        assert_eq!(caller.blocks.len(), 1);
    }

    #[test]
    fn inline_branching_callee_builds_phi() {
        let module = parse_module(
            r#"module m

fn clamp(v: bits[32]) -> bits[32] {
entry:
  neg: bits[1] = icmp(slt, v, 0, id=1)
  br_if.2: void = br_if(neg, lo, hi, id=2)
lo:
  ret.3: void = ret(0, id=3)
hi:
  ret.4: void = ret(v, id=4)
}

fn caller(x: bits[32]) -> bits[32] {
entry:
  y: bits[32] = call(clamp, x, id=1)
  ret.2: void = ret(y, id=2)
}
"#,
        );
        let callee = module.get_fn("clamp").unwrap().clone();
        let mut caller = module.get_fn("caller").unwrap().clone();
        let site = caller.find_inst_by_name("y").unwrap();
        inline_call(&mut caller, site, &callee).unwrap();
        simplify_function(&mut caller);
        assert!(caller
            .insts
            .iter()
            .any(|i| matches!(i.payload, InstPayload::Phi { .. })));
        assert!(!caller
            .insts
            .iter()
            .any(|i| matches!(i.payload, InstPayload::Call { .. })));
    }

    #[test]
    fn declarations_are_rejected() {
        let module = parse_module(
            r#"module m

decl helper(bits[32]) -> bits[32]

fn caller(x: bits[32]) -> bits[32] {
entry:
  y: bits[32] = call(helper, x, id=1)
  ret.2: void = ret(y, id=2)
}
"#,
        );
        let callee = module.get_fn("helper").unwrap().clone();
        let mut caller = module.get_fn("caller").unwrap().clone();
        let site = caller.find_inst_by_name("y").unwrap();
        assert!(inline_call(&mut caller, site, &callee).is_err());
    }
}
