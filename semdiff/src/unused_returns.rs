// SPDX-License-Identifier: Apache-2.0

//! Pre-pass rewriting functions whose return value is never used: when the
//! counterpart in the other module returns void and every call site
//! discards the result, the function is rewritten to a void-returning
//! variant under its original name. The original body survives as a
//! numeric-suffixed clone for non-call uses.

use semdiff_ir::dce::simplify_function;
use semdiff_ir::ir::{InstPayload, Module, Operand, Type};
use semdiff_ir::ir_utils::{base_name, remap_operands, use_counts};

use crate::module_comparator::is_abstraction;

/// True when every call to `name` inside `module` discards its result, and
/// at least one such call exists.
fn all_call_sites_discard(module: &Module, name: &str) -> bool {
    let mut sites = 0usize;
    for f in module.functions.iter() {
        let counts = use_counts(f);
        for (index, inst) in f.insts.iter().enumerate() {
            let InstPayload::Call { callee, .. } = &inst.payload else {
                continue;
            };
            if callee != name {
                continue;
            }
            sites += 1;
            if counts[index] != 0 {
                return false;
            }
        }
    }
    sites > 0
}

/// Runs the rewrite over `module`, using `other` to identify counterparts
/// that already return void. Returns the names of rewritten functions.
pub fn rewrite_unused_return_values(module: &mut Module, other: &Module) -> Vec<String> {
    let candidates: Vec<String> = module
        .functions
        .iter()
        .filter(|f| !f.ret_ty.is_void())
        .filter(|f| !f.is_declaration())
        .filter(|f| !is_abstraction(&f.name))
        .map(|f| f.name.clone())
        .collect();

    let mut rewritten = Vec::new();
    for name in candidates {
        let base = base_name(&name).to_string();
        let counterpart_is_void = other
            .get_fn(&base)
            .map(|f| f.ret_ty.is_void())
            .unwrap_or(false);
        if !counterpart_is_void || !all_call_sites_discard(module, &name) {
            continue;
        }

        log::debug!(
            "creating void-returning variant of {} in {}",
            name,
            module.name
        );
        // The original body survives under a fresh numeric suffix; non-call
        // uses are redirected to it.
        let clone_name = module.unique_fn_name(&base);
        let mut clone_fn = module.get_fn(&name).expect("candidate exists").clone();
        clone_fn.name = clone_name.clone();
        module.functions.push(clone_fn);

        let func = module.get_fn_mut(&name).expect("candidate exists");
        func.ret_ty = Type::Void;
        for inst in func.insts.iter_mut() {
            if matches!(inst.payload, InstPayload::Ret(Some(_))) {
                inst.payload = InstPayload::Ret(None);
            }
        }
        simplify_function(func);

        for f in module.functions.iter_mut() {
            for inst in f.insts.iter_mut() {
                if matches!(&inst.payload, InstPayload::Call { callee, .. } if *callee == name) {
                    inst.ty = Type::Void;
                }
                inst.payload = remap_operands(&inst.payload, |op| match op {
                    Operand::Global(n) if *n == name => Operand::Global(clone_name.clone()),
                    other_op => other_op.clone(),
                });
            }
        }
        rewritten.push(name);
    }
    rewritten
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
    fn rewrites_discarded_nonvoid_function_to_void() {
        let mut left = parse_module(
            r#"module new_version

global log_buf: bits[64]

fn record(v: bits[32]) -> bits[32] {
entry:
  store.1: void = store(v, @log_buf, align=4, id=1)
  r: bits[32] = add(v, 1, id=2)
  ret.3: void = ret(r, id=3)
}

fn driver(v: bits[32]) -> void {
entry:
  call.1: bits[32] = call(record, v, id=1)
  ret.2: void = ret(id=2)
}
"#,
        );
        let right = parse_module(
            r#"module old_version

global log_buf: bits[64]

fn record(v: bits[32]) -> void {
entry:
  store.1: void = store(v, @log_buf, align=4, id=1)
  ret.2: void = ret(id=2)
}

fn driver(v: bits[32]) -> void {
entry:
  call.1: void = call(record, v, id=1)
  ret.2: void = ret(id=2)
}
"#,
        );
        let rewritten = rewrite_unused_return_values(&mut left, &right);
        assert_eq!(rewritten, vec!["record".to_string()]);
        let record = left.get_fn("record").unwrap();
        assert!(record.ret_ty.is_void());
        // The add feeding the old return value is gone.
        assert!(!record
            .insts
            .iter()
            .any(|i| matches!(i.payload, InstPayload::Binop(..))));
        // The original body survives under a numeric suffix.
        let clone = left.get_fn("record.1").unwrap();
        assert!(!clone.ret_ty.is_void());
        // The discarding call site now has a void result type.
        let driver = left.get_fn("driver").unwrap();
        assert!(driver
            .insts
            .iter()
            .any(|i| matches!(&i.payload, InstPayload::Call { callee, .. } if callee == "record")
                && i.ty.is_void()));
    }

    #[test]
    fn used_results_block_the_rewrite() {
        let mut left = parse_module(
            r#"module new_version

fn compute(v: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(v, 1, id=1)
  ret.2: void = ret(r, id=2)
}

fn driver(v: bits[32]) -> bits[32] {
entry:
  x: bits[32] = call(compute, v, id=1)
  ret.2: void = ret(x, id=2)
}
"#,
        );
        let right = parse_module(
            r#"module old_version

fn compute(v: bits[32]) -> void {
entry:
  ret.1: void = ret(id=1)
}
"#,
        );
        assert!(rewrite_unused_return_values(&mut left, &right).is_empty());
        assert!(!left.get_fn("compute").unwrap().ret_ty.is_void());
    }
}
