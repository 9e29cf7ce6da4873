// SPDX-License-Identifier: Apache-2.0

//! The differential function comparator: the lockstep walker specialized
//! with the catalogue of known-benign syntactic transformations. Divergences
//! the catalogue cannot resolve are deferred to the pattern matcher, and
//! call-site divergences surface as an inline request for the module
//! comparator's feedback loop.

use semdiff_ir::debug_info::DebugInfoIndex;
use semdiff_ir::ir::{BlockRef, ConstValue, Function, InstPayload, InstRef, Module, Operand, Type};
use semdiff_ir::ir_utils::{base_name, inst_has_side_effect, use_counts};

use crate::config::BuiltinPatterns;
use crate::correspondence::{Consistency, TypeCmpOptions};
use crate::fn_comparator::{
    default_cmp_basic_blocks, default_cmp_operations, default_cmp_signatures, default_cmp_values,
    default_walk_block_graph, op_diff, FunctionWalk, Side, WalkDiff, WalkState,
};
use crate::pattern::PatternSet;
use crate::pattern_matcher::try_match_patterns;

/// Diagnostic/print functions whose string, file-name, line-number, and
/// macro-sourced arguments are benign under `kernel-prints`.
pub const PRINT_FUNCTIONS: &[&str] = &[
    "printk", "dev_info", "dev_warn", "dev_err", "printf", "sprintf", "snprintf", "panic",
    "warn",
];

/// A macro or inline-asm difference observed during the walk, prior to call
/// stack attachment.
#[derive(Debug, Clone)]
pub struct RawSyntaxDiff {
    pub name: String,
    pub body_left: String,
    pub body_right: String,
}

pub struct DifferentialFunctionComparator<'a> {
    state: WalkState<'a>,
    opts: &'a BuiltinPatterns,
    patterns: &'a PatternSet,
    use_counts_left: Vec<usize>,
    use_counts_right: Vec<usize>,
    /// Set while comparing the argument list of a diagnostic print call.
    in_print_call: bool,
    asm_diff_count: usize,
    /// Macro/asm differences found during the walk.
    pub syntax_diffs: Vec<RawSyntaxDiff>,
    /// Callee pairs with matching base names encountered during the walk,
    /// to be compared by the module comparator on its own worklist.
    pub discovered_calls: Vec<(String, String)>,
}

impl<'a> DifferentialFunctionComparator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left_fn: &'a Function,
        right_fn: &'a Function,
        left_module: &'a Module,
        right_module: &'a Module,
        opts: &'a BuiltinPatterns,
        patterns: &'a PatternSet,
        di_left: &'a DebugInfoIndex,
        di_right: &'a DebugInfoIndex,
    ) -> Self {
        let mut state = WalkState::new(
            left_fn,
            right_fn,
            left_module,
            right_module,
            di_left,
            di_right,
        );
        state.type_opts = TypeCmpOptions {
            allow_renamed_structs: true,
        };
        Self {
            state,
            opts,
            patterns,
            use_counts_left: use_counts(left_fn),
            use_counts_right: use_counts(right_fn),
            in_print_call: false,
            asm_diff_count: 0,
            syntax_diffs: Vec::new(),
            discovered_calls: Vec::new(),
        }
    }

    /// Corresponding aggregate pairs whose definitions differ, for
    /// type-difference reporting.
    pub fn type_diffs(&self) -> &[(String, String)] {
        &self.state.type_diffs
    }

    fn record_syntax_diff(&mut self, name: &str, body_left: &str, body_right: &str) {
        let exists = self.syntax_diffs.iter().any(|d| {
            d.name == name && d.body_left == body_left && d.body_right == body_right
        });
        if !exists {
            self.syntax_diffs.push(RawSyntaxDiff {
                name: name.to_string(),
                body_left: body_left.to_string(),
                body_right: body_right.to_string(),
            });
        }
    }

    fn finish_pair(&mut self, il: InstRef, ir: InstRef) -> bool {
        if self.state.corr.relate_insts(il, ir) == Consistency::Conflict {
            return false;
        }
        self.state.consumed_left.insert(il.index);
        self.state.consumed_right.insert(ir.index);
        true
    }

    fn is_dead(&self, side: Side, inst: InstRef) -> bool {
        let f = self.state.fn_of(side);
        let counts = match side {
            Side::Left => &self.use_counts_left,
            Side::Right => &self.use_counts_right,
        };
        !inst_has_side_effect(&f.get_inst(inst).payload) && counts[inst.index] == 0
    }

    fn is_print_call_pair(&self, il: InstRef, ir: InstRef) -> bool {
        let (lp, rp) = (
            &self.state.left_fn.get_inst(il).payload,
            &self.state.right_fn.get_inst(ir).payload,
        );
        match (lp, rp) {
            (InstPayload::Call { callee: c1, .. }, InstPayload::Call { callee: c2, .. }) => {
                base_name(c1) == base_name(c2) && PRINT_FUNCTIONS.contains(&base_name(c1))
            }
            _ => false,
        }
    }

    fn rule_struct_alignment(&mut self, il: InstRef, ir: InstRef) -> bool {
        if !self.opts.struct_alignment {
            return false;
        }
        let lp = self.state.left_fn.get_inst(il).payload.clone();
        let rp = self.state.right_fn.get_inst(ir).payload.clone();
        let operands_ok = match (&lp, &rp) {
            (InstPayload::Load { ptr: p1, .. }, InstPayload::Load { ptr: p2, .. }) => {
                self.cmp_values(il, ir, p1, p2).is_ok()
            }
            (
                InstPayload::Store {
                    value: v1, ptr: p1, ..
                },
                InstPayload::Store {
                    value: v2, ptr: p2, ..
                },
            ) => {
                self.cmp_values(il, ir, v1, v2).is_ok()
                    && self.cmp_values(il, ir, p1, p2).is_ok()
            }
            (
                InstPayload::Alloca {
                    allocated_ty: t1, ..
                },
                InstPayload::Alloca {
                    allocated_ty: t2, ..
                },
            ) => crate::fn_comparator::cmp_types(self, t1, t2).is_ok(),
            _ => return false,
        };
        operands_ok && self.finish_pair(il, ir)
    }

    fn rule_unused_return_types(&mut self, il: InstRef, ir: InstRef) -> bool {
        if !self.opts.unused_return_types {
            return false;
        }
        let li = self.state.left_fn.get_inst(il).clone();
        let ri = self.state.right_fn.get_inst(ir).clone();
        match (&li.payload, &ri.payload) {
            (
                InstPayload::Call {
                    callee: c1,
                    args: a1,
                },
                InstPayload::Call {
                    callee: c2,
                    args: a2,
                },
            ) => {
                if base_name(c1) != base_name(c2) || a1.len() != a2.len() {
                    return false;
                }
                let discarded_vs_void = (li.ty.is_void()
                    && !ri.ty.is_void()
                    && self.use_counts_right[ir.index] == 0)
                    || (ri.ty.is_void()
                        && !li.ty.is_void()
                        && self.use_counts_left[il.index] == 0);
                if !discarded_vs_void {
                    return false;
                }
                let (c1, c2) = (c1.clone(), c2.clone());
                if self.cmp_global_values(&c1, &c2).is_err() {
                    return false;
                }
                for (x, y) in a1.iter().zip(a2.iter()) {
                    if self.cmp_values(il, ir, x, y).is_err() {
                        return false;
                    }
                }
                self.finish_pair(il, ir)
            }
            (InstPayload::Ret(Some(_)), InstPayload::Ret(None)) => {
                self.state.right_fn.ret_ty.is_void() && self.finish_pair(il, ir)
            }
            (InstPayload::Ret(None), InstPayload::Ret(Some(_))) => {
                self.state.left_fn.ret_ty.is_void() && self.finish_pair(il, ir)
            }
            _ => false,
        }
    }

    fn rule_dead_code(&mut self, il: InstRef, ir: InstRef) -> bool {
        if !self.opts.dead_code {
            return false;
        }
        if self.is_dead(Side::Left, il) {
            self.state.consumed_left.insert(il.index);
            return true;
        }
        if self.is_dead(Side::Right, ir) {
            self.state.consumed_right.insert(ir.index);
            return true;
        }
        false
    }

    fn operand_type(&self, side: Side, op: &Operand) -> Option<Type> {
        let (f, module) = match side {
            Side::Left => (self.state.left_fn, self.state.left_module),
            Side::Right => (self.state.right_fn, self.state.right_module),
        };
        match op {
            Operand::Inst(ir) => Some(f.get_inst(*ir).ty.clone()),
            Operand::Arg(i) => f.params.get(*i).map(|p| p.ty.clone()),
            Operand::Global(name) => module.get_global(name).map(|_| Type::Ptr),
            Operand::Const(_) => None,
        }
    }

    fn rule_type_casts(&mut self, il: InstRef, ir: InstRef) -> bool {
        if !self.opts.type_casts {
            return false;
        }
        fn bit_width(ty: &Type) -> Option<usize> {
            match ty {
                Type::Bits(w) => Some(*w),
                Type::Ptr => Some(64),
                _ => None,
            }
        }
        let li = self.state.left_fn.get_inst(il).clone();
        let ri = self.state.right_fn.get_inst(ir).clone();
        match (&li.payload, &ri.payload) {
            // Both sides cast with differing kinds; equal when widths agree.
            (InstPayload::Cast(_, a1), InstPayload::Cast(_, a2)) => {
                let widths_ok = bit_width(&li.ty).is_some() && bit_width(&li.ty) == bit_width(&ri.ty);
                widths_ok
                    && self.cmp_values(il, ir, a1, a2).is_ok()
                    && self.finish_pair(il, ir)
            }
            // One-sided width-preserving cast: erase it, aliasing its result
            // to the casted operand.
            (InstPayload::Cast(_, arg), _) => {
                let src = self.operand_type(Side::Left, arg).as_ref().and_then(bit_width);
                if src.is_some() && src == bit_width(&li.ty) {
                    self.state.corr.add_alias_left(il, arg.clone());
                    self.state.consumed_left.insert(il.index);
                    true
                } else {
                    false
                }
            }
            (_, InstPayload::Cast(_, arg)) => {
                let src = self
                    .operand_type(Side::Right, arg)
                    .as_ref()
                    .and_then(bit_width);
                if src.is_some() && src == bit_width(&ri.ty) {
                    self.state.corr.add_alias_right(ir, arg.clone());
                    self.state.consumed_right.insert(ir.index);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Records an inline-asm difference and its sequence number.
    fn note_asm_diff(&mut self, il: InstRef, ir: InstRef) {
        let lp = &self.state.left_fn.get_inst(il).payload;
        let rp = &self.state.right_fn.get_inst(ir).payload;
        if let (InstPayload::Asm { body: b1, .. }, InstPayload::Asm { body: b2, .. }) = (lp, rp) {
            if b1 != b2 {
                self.asm_diff_count += 1;
                let name = format!("assembly code #{}", self.asm_diff_count);
                let (b1, b2) = (b1.clone(), b2.clone());
                self.record_syntax_diff(&name, &b1, &b2);
            }
        }
    }

    fn try_resolve_divergence(
        &mut self,
        il: InstRef,
        ir: InstRef,
        diff: WalkDiff,
    ) -> Result<(), WalkDiff> {
        self.note_asm_diff(il, ir);
        if self.rule_struct_alignment(il, ir)
            || self.rule_unused_return_types(il, ir)
            || self.rule_dead_code(il, ir)
            || self.rule_type_casts(il, ir)
        {
            return Ok(());
        }
        {
            let patterns = self.patterns;
            if try_match_patterns(patterns, &mut self.state, il, ir) {
                return Ok(());
            }
        }
        if self.opts.function_splits {
            let l_call = match &self.state.left_fn.get_inst(il).payload {
                InstPayload::Call { .. } => Some(self.state.left_fn.get_inst(il).text_id),
                _ => None,
            };
            let r_call = match &self.state.right_fn.get_inst(ir).payload {
                InstPayload::Call { .. } => Some(self.state.right_fn.get_inst(ir).text_id),
                _ => None,
            };
            if l_call.is_some() || r_call.is_some() {
                return Err(WalkDiff::InlineAt {
                    left: l_call,
                    right: r_call,
                });
            }
        }
        Err(diff)
    }

    /// Control-flow-only comparison of one instruction pair: terminator
    /// kinds and successor shape; all data is ignored.
    fn cfo_cmp_operations(&mut self, il: InstRef, ir: InstRef) -> Result<(), WalkDiff> {
        let lp = self.state.left_fn.get_inst(il).payload.clone();
        let rp = self.state.right_fn.get_inst(ir).payload.clone();
        if !lp.is_terminator() || !rp.is_terminator() {
            if !lp.is_terminator() {
                self.state.consumed_left.insert(il.index);
            }
            if !rp.is_terminator() {
                self.state.consumed_right.insert(ir.index);
            }
            return Ok(());
        }
        if lp.get_operator() != rp.get_operator() {
            return Err(op_diff(il, ir, "terminator kind mismatch"));
        }
        let (succs_l, succs_r) = (lp.successors(), rp.successors());
        if succs_l.len() != succs_r.len() {
            return Err(op_diff(il, ir, "successor count mismatch"));
        }
        for (sl, sr) in succs_l.iter().zip(succs_r.iter()) {
            if self.state.corr.relate_blocks(*sl, *sr) == Consistency::Conflict {
                return Err(op_diff(il, ir, "successor block correspondence conflict"));
            }
            self.state.queue.push_back((*sl, *sr));
        }
        self.state.consumed_left.insert(il.index);
        self.state.consumed_right.insert(ir.index);
        Ok(())
    }

    fn preconsume_data_insts(&mut self, bl: BlockRef, br: BlockRef) {
        let lf = self.state.left_fn;
        let rf = self.state.right_fn;
        let left: Vec<usize> = lf
            .get_block(bl)
            .insts
            .iter()
            .filter(|i| !lf.get_inst(**i).payload.is_terminator())
            .map(|i| i.index)
            .collect();
        let right: Vec<usize> = rf
            .get_block(br)
            .insts
            .iter()
            .filter(|i| !rf.get_inst(**i).payload.is_terminator())
            .map(|i| i.index)
            .collect();
        self.state.consumed_left.extend(left);
        self.state.consumed_right.extend(right);
    }
}

impl<'a> FunctionWalk<'a> for DifferentialFunctionComparator<'a> {
    fn walk(&mut self) -> &mut WalkState<'a> {
        &mut self.state
    }

    fn cmp_global_values(&mut self, l: &str, r: &str) -> Result<(), WalkDiff> {
        if base_name(l) != base_name(r) {
            return Err(WalkDiff::Globals {
                left: l.to_string(),
                right: r.to_string(),
            });
        }
        if self.state.corr.relate_globals(l, r) == Consistency::Conflict {
            return Err(WalkDiff::Globals {
                left: l.to_string(),
                right: r.to_string(),
            });
        }
        // Function pairs sharing a base name get their own comparison on
        // the module comparator's worklist; for the enclosing walk they are
        // equal-for-now.
        if self.state.left_module.get_fn(l).is_some()
            && self.state.right_module.get_fn(r).is_some()
        {
            let pair = (l.to_string(), r.to_string());
            if !self.discovered_calls.contains(&pair) {
                self.discovered_calls.push(pair);
            }
        }
        Ok(())
    }

    fn cmp_values(
        &mut self,
        il: InstRef,
        ir: InstRef,
        l: &Operand,
        r: &Operand,
    ) -> Result<(), WalkDiff> {
        let diff = match default_cmp_values(self, il, ir, l, r) {
            Ok(()) => return Ok(()),
            Err(d) => d,
        };
        let lv = self.state.corr.resolve_left(l);
        let rv = self.state.corr.resolve_right(r);
        match (&lv, &rv) {
            (Operand::Const(ConstValue::Int(a)), Operand::Const(ConstValue::Int(b))) => {
                // Line-number arguments of diagnostic calls.
                if self.in_print_call && self.opts.kernel_prints {
                    let line_l = self.state.left_fn.get_inst(il).pos.as_ref().map(|p| p.lineno);
                    let line_r = self.state.right_fn.get_inst(ir).pos.as_ref().map(|p| p.lineno);
                    if Some(*a) == line_l.map(|x| x as i128)
                        && Some(*b) == line_r.map(|x| x as i128)
                    {
                        return Ok(());
                    }
                }
                if !(self.opts.numerical_macros
                    || (self.in_print_call && self.opts.kernel_prints))
                {
                    return Err(diff);
                }
                // Macro provenance: the instruction-level hint wins,
                // otherwise both values must resolve to one macro name.
                let hint_l = self.state.left_fn.get_inst(il).macro_hint.clone();
                let hint_r = self.state.right_fn.get_inst(ir).macro_hint.clone();
                let macro_name = match (hint_l, hint_r) {
                    (Some(hl), Some(hr)) if hl == hr => Some(hl),
                    _ => match (
                        self.state.di_left.macro_for_int(*a),
                        self.state.di_right.macro_for_int(*b),
                    ) {
                        (Some(ml), Some(mr)) if ml == mr => Some(ml.to_string()),
                        _ => None,
                    },
                };
                match macro_name {
                    Some(name) => {
                        self.record_syntax_diff(&name, &a.to_string(), &b.to_string());
                        Ok(())
                    }
                    None => Err(diff),
                }
            }
            (Operand::Const(ConstValue::Str(a)), Operand::Const(ConstValue::Str(b))) => {
                if !(self.in_print_call && self.opts.kernel_prints) {
                    return Err(diff);
                }
                let (a, b) = (a.clone(), b.clone());
                if let (Some(ml), Some(mr)) = (
                    self.state.di_left.macro_for_value(&a),
                    self.state.di_right.macro_for_value(&b),
                ) {
                    if ml == mr {
                        let name = ml.to_string();
                        self.record_syntax_diff(&name, &a, &b);
                        return Ok(());
                    }
                }
                // Strings printed by diagnostic functions do not change
                // semantics.
                Ok(())
            }
            _ => Err(diff),
        }
    }

    fn cmp_operations_with_operands(&mut self, il: InstRef, ir: InstRef) -> Result<(), WalkDiff> {
        if self.opts.control_flow_only {
            return self.cfo_cmp_operations(il, ir);
        }
        self.in_print_call = self.is_print_call_pair(il, ir);
        let result = default_cmp_operations(self, il, ir);
        self.in_print_call = false;
        match result {
            Ok(()) => Ok(()),
            Err(diff) => self.try_resolve_divergence(il, ir, diff),
        }
    }

    fn cmp_basic_blocks(&mut self, bl: BlockRef, br: BlockRef) -> Result<(), WalkDiff> {
        if self.opts.control_flow_only {
            self.preconsume_data_insts(bl, br);
        }
        loop {
            match default_cmp_basic_blocks(self, bl, br) {
                Ok(()) => return Ok(()),
                Err(WalkDiff::BlockLength {
                    extra: Some((side, inst)),
                    ..
                }) if self.opts.dead_code && self.is_dead(side, inst) => {
                    self.state.consumed_of(side).insert(inst.index);
                }
                Err(d) => return Err(d),
            }
        }
    }

    fn compare(&mut self) -> Result<(), WalkDiff> {
        let tolerate_void_returns = self.opts.unused_return_types;
        default_cmp_signatures(self, tolerate_void_returns)?;
        default_walk_block_graph(self)
    }
}
