// SPDX-License-Identifier: Apache-2.0

//! Call-stack reconstruction: depth-first search for a call path from one
//! function to another, used to locate non-function differences relative to
//! the top-level compared function.

use std::collections::HashSet;

use semdiff_ir::debug_info::{fn_location, inst_location};
use semdiff_ir::ir::{InstPayload, Module, Operand};

use crate::result::{CallInfo, CallStack};

fn search_rec(
    module: &Module,
    src: &str,
    dest: &str,
    stack: &mut CallStack,
    visited: &mut HashSet<String>,
) -> bool {
    visited.insert(src.to_string());
    let Some(func) = module.get_fn(src) else {
        return false;
    };
    let (src_file, _) = fn_location(module, func);
    for inst in func.insts.iter() {
        // A function is followed whether it is called or passed as an
        // operand.
        let mut callees: Vec<String> = Vec::new();
        if let InstPayload::Call { callee, .. } = &inst.payload {
            callees.push(callee.clone());
        }
        for op in semdiff_ir::ir_utils::operands(&inst.payload) {
            if let Operand::Global(name) = op {
                if module.get_fn(&name).is_some() {
                    callees.push(name);
                }
            }
        }
        for callee in callees {
            if visited.contains(&callee) {
                continue;
            }
            let line = inst_location(module, inst).map(|(_, l)| l).unwrap_or(0);
            stack.push(CallInfo {
                function: callee.clone(),
                file: src_file.clone(),
                line,
            });
            if callee == dest || search_rec(module, &callee, dest, stack, visited) {
                return true;
            }
            stack.pop();
        }
    }
    false
}

/// Returns the call stack leading from `src` to `dest` inside `module`, or
/// an empty stack when `dest` is `src` itself or unreachable.
pub fn get_call_stack(module: &Module, src: &str, dest: &str) -> CallStack {
    let mut stack = CallStack::new();
    if src == dest {
        return stack;
    }
    let mut visited = HashSet::new();
    search_rec(module, src, dest, &mut stack, &mut visited);
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use semdiff_ir::ir_parser::Parser;

    #[test]
    fn finds_transitive_path_with_locations() {
        let text = r#"module m

file_number 0 "lib/a.c"

fn c() -> void {
entry:
  ret.1: void = ret(id=1)
}

fn b() -> void {
entry:
  call.1: void = call(c, id=1, pos=(0,20,1))
  ret.2: void = ret(id=2)
}

fn a() -> void {
entry:
  call.1: void = call(b, id=1, pos=(0,10,1))
  ret.2: void = ret(id=2)
}
"#;
        let mut parser = Parser::new(text);
        let module = parser.parse_module().unwrap();
        let stack = get_call_stack(&module, "a", "c");
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[0].function, "b");
        assert_eq!(stack[0].line, 10);
        assert_eq!(stack[1].function, "c");
        assert_eq!(stack[1].line, 20);
        assert!(get_call_stack(&module, "c", "a").is_empty());
    }
}
