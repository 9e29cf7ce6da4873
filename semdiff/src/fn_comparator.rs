// SPDX-License-Identifier: Apache-2.0

//! The generic function comparator: a lockstep structural walk of two
//! functions' basic-block graphs. Specializations (differential comparison,
//! pattern matching) override the hook points `cmp_operations_with_operands`,
//! `cmp_basic_blocks`, `cmp_global_values`, and the operand-level
//! `cmp_values`; every override must preserve the bijectivity of the
//! correspondence.

use std::collections::{HashSet, VecDeque};

use semdiff_ir::debug_info::DebugInfoIndex;
use semdiff_ir::ir::{BlockRef, Function, InstPayload, InstRef, Module, Operand, Type};
use semdiff_ir::ir_utils::base_name;

use crate::correspondence::{Consistency, Correspondence, TypeCmpOptions, TypeRelateCtx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A structural divergence that terminates a walk.
#[derive(Debug, Clone)]
pub enum WalkDiff {
    /// Function signatures do not agree.
    Signature(String),
    /// A block pair cannot correspond.
    Blocks {
        left: BlockRef,
        right: BlockRef,
        detail: String,
    },
    /// An instruction pair diverges.
    Operations {
        left: InstRef,
        right: InstRef,
        detail: String,
    },
    /// One block ran out of instructions before the other; `extra` is the
    /// first unmatched instruction on the longer side.
    BlockLength {
        left: BlockRef,
        right: BlockRef,
        extra: Option<(Side, InstRef)>,
    },
    /// Two global symbols of different identity.
    Globals { left: String, right: String },
    /// Not equal, but the divergence pinpoints a call-site pair that may be
    /// reducible by inlining. Call sites are identified by instruction text
    /// id so the handle survives later rewrites.
    InlineAt {
        left: Option<usize>,
        right: Option<usize>,
    },
}

impl WalkDiff {
    pub fn describe(&self) -> String {
        match self {
            WalkDiff::Signature(d) => format!("signature: {}", d),
            WalkDiff::Blocks { detail, .. } => format!("blocks: {}", detail),
            WalkDiff::Operations { detail, .. } => format!("operations: {}", detail),
            WalkDiff::BlockLength { .. } => "block length mismatch".to_string(),
            WalkDiff::Globals { left, right } => {
                format!("globals: {} vs {}", left, right)
            }
            WalkDiff::InlineAt { .. } => "call pair needs inlining".to_string(),
        }
    }
}

pub(crate) fn op_diff(left: InstRef, right: InstRef, detail: &str) -> WalkDiff {
    WalkDiff::Operations {
        left,
        right,
        detail: detail.to_string(),
    }
}

/// Mutable state of one walk: the correspondence, the block-pair worklist,
/// and the sets of instructions already consumed on each side.
pub struct WalkState<'a> {
    pub left_fn: &'a Function,
    pub right_fn: &'a Function,
    pub left_module: &'a Module,
    pub right_module: &'a Module,
    pub di_left: &'a DebugInfoIndex,
    pub di_right: &'a DebugInfoIndex,
    pub corr: Correspondence,
    pub queue: VecDeque<(BlockRef, BlockRef)>,
    pub visited: HashSet<(usize, usize)>,
    pub consumed_left: HashSet<usize>,
    pub consumed_right: HashSet<usize>,
    pub type_opts: TypeCmpOptions,
    /// Corresponding aggregate pairs whose definitions differ, in discovery
    /// order.
    pub type_diffs: Vec<(String, String)>,
}

impl<'a> WalkState<'a> {
    pub fn new(
        left_fn: &'a Function,
        right_fn: &'a Function,
        left_module: &'a Module,
        right_module: &'a Module,
        di_left: &'a DebugInfoIndex,
        di_right: &'a DebugInfoIndex,
    ) -> Self {
        Self {
            left_fn,
            right_fn,
            left_module,
            right_module,
            di_left,
            di_right,
            corr: Correspondence::new(),
            queue: VecDeque::new(),
            visited: HashSet::new(),
            consumed_left: HashSet::new(),
            consumed_right: HashSet::new(),
            type_opts: TypeCmpOptions::default(),
            type_diffs: Vec::new(),
        }
    }

    pub fn fn_of(&self, side: Side) -> &'a Function {
        match side {
            Side::Left => self.left_fn,
            Side::Right => self.right_fn,
        }
    }

    pub fn consumed_of(&mut self, side: Side) -> &mut HashSet<usize> {
        match side {
            Side::Left => &mut self.consumed_left,
            Side::Right => &mut self.consumed_right,
        }
    }
}

/// The lockstep walker. The provided `compare` drives the walk; overrides
/// hook in at the named comparison points.
pub trait FunctionWalk<'a> {
    fn walk(&mut self) -> &mut WalkState<'a>;

    /// Compares two global symbols. Globals correspond by name (modulo
    /// numeric suffixes), never by position.
    fn cmp_global_values(&mut self, l: &str, r: &str) -> Result<(), WalkDiff>
    where
        Self: Sized,
    {
        default_cmp_global_values(self, l, r)
    }

    /// Compares one operand pair in the context of the instruction pair
    /// `(il, ir)`, extending the correspondence as needed.
    fn cmp_values(
        &mut self,
        il: InstRef,
        ir: InstRef,
        l: &Operand,
        r: &Operand,
    ) -> Result<(), WalkDiff>
    where
        Self: Sized,
    {
        default_cmp_values(self, il, ir, l, r)
    }

    /// Compares an instruction pair with its operands; on success at least
    /// one of the two instructions must have been consumed.
    fn cmp_operations_with_operands(&mut self, il: InstRef, ir: InstRef) -> Result<(), WalkDiff>
    where
        Self: Sized,
    {
        default_cmp_operations(self, il, ir)
    }

    /// Compares a block pair instruction by instruction.
    fn cmp_basic_blocks(&mut self, bl: BlockRef, br: BlockRef) -> Result<(), WalkDiff>
    where
        Self: Sized,
    {
        default_cmp_basic_blocks(self, bl, br)
    }

    /// Runs the walk to completion. `Ok(())` means structurally equal
    /// modulo the accumulated correspondence.
    fn compare(&mut self) -> Result<(), WalkDiff>
    where
        Self: Sized,
    {
        default_compare(self)
    }
}

/// Relates two result/operand types through the correspondence.
pub fn cmp_types<'a, W: FunctionWalk<'a> + ?Sized>(
    w: &mut W,
    tl: &Type,
    tr: &Type,
) -> Result<(), String> {
    let st = w.walk();
    let ctx = TypeRelateCtx {
        left_module: st.left_module,
        right_module: st.right_module,
        di_left: st.di_left,
        di_right: st.di_right,
        opts: st.type_opts,
    };
    st.corr.relate_types(tl, tr, &ctx, &mut st.type_diffs)
}

pub fn default_cmp_global_values<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    l: &str,
    r: &str,
) -> Result<(), WalkDiff> {
    if base_name(l) != base_name(r) {
        return Err(WalkDiff::Globals {
            left: l.to_string(),
            right: r.to_string(),
        });
    }
    match w.walk().corr.relate_globals(l, r) {
        Consistency::Consistent => Ok(()),
        Consistency::Conflict => Err(WalkDiff::Globals {
            left: l.to_string(),
            right: r.to_string(),
        }),
    }
}

pub fn default_cmp_values<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    il: InstRef,
    ir: InstRef,
    l: &Operand,
    r: &Operand,
) -> Result<(), WalkDiff> {
    let l = w.walk().corr.resolve_left(l);
    let r = w.walk().corr.resolve_right(r);
    match (&l, &r) {
        (Operand::Inst(a), Operand::Inst(b)) => match w.walk().corr.relate_insts(*a, *b) {
            Consistency::Consistent => Ok(()),
            Consistency::Conflict => Err(op_diff(il, ir, "value correspondence conflict")),
        },
        (Operand::Arg(a), Operand::Arg(b)) => match w.walk().corr.relate_args(*a, *b) {
            Consistency::Consistent => Ok(()),
            Consistency::Conflict => Err(op_diff(il, ir, "argument correspondence conflict")),
        },
        (Operand::Const(a), Operand::Const(b)) => {
            if a == b {
                Ok(())
            } else {
                Err(op_diff(il, ir, "constant operand mismatch"))
            }
        }
        (Operand::Global(a), Operand::Global(b)) => {
            let (a, b) = (a.clone(), b.clone());
            w.cmp_global_values(&a, &b)
        }
        _ => Err(op_diff(il, ir, "operand kind mismatch")),
    }
}

fn enqueue_successor_pair<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    il: InstRef,
    ir: InstRef,
    bl: BlockRef,
    br: BlockRef,
) -> Result<(), WalkDiff> {
    let st = w.walk();
    match st.corr.relate_blocks(bl, br) {
        Consistency::Consistent => {
            st.queue.push_back((bl, br));
            Ok(())
        }
        Consistency::Conflict => Err(op_diff(il, ir, "successor block correspondence conflict")),
    }
}

pub fn default_cmp_operations<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    il: InstRef,
    ir: InstRef,
) -> Result<(), WalkDiff> {
    let li = w.walk().left_fn.get_inst(il).clone();
    let ri = w.walk().right_fn.get_inst(ir).clone();
    if li.payload.get_operator() != ri.payload.get_operator() {
        return Err(op_diff(
            il,
            ir,
            &format!(
                "operator mismatch: {} vs {}",
                li.payload.get_operator(),
                ri.payload.get_operator()
            ),
        ));
    }
    cmp_types(w, &li.ty, &ri.ty).map_err(|e| op_diff(il, ir, &format!("result type: {}", e)))?;

    use InstPayload::*;
    match (&li.payload, &ri.payload) {
        (Binop(_, a1, b1), Binop(_, a2, b2)) => {
            w.cmp_values(il, ir, a1, a2)?;
            w.cmp_values(il, ir, b1, b2)?;
        }
        (
            Icmp {
                pred: p1,
                lhs: a1,
                rhs: b1,
            },
            Icmp {
                pred: p2,
                lhs: a2,
                rhs: b2,
            },
        ) => {
            if p1 != p2 {
                return Err(op_diff(il, ir, "compare predicate mismatch"));
            }
            w.cmp_values(il, ir, a1, a2)?;
            w.cmp_values(il, ir, b1, b2)?;
        }
        (
            Select {
                cond: c1,
                on_true: t1,
                on_false: f1,
            },
            Select {
                cond: c2,
                on_true: t2,
                on_false: f2,
            },
        ) => {
            w.cmp_values(il, ir, c1, c2)?;
            w.cmp_values(il, ir, t1, t2)?;
            w.cmp_values(il, ir, f1, f2)?;
        }
        (Load { ptr: p1, align: a1 }, Load { ptr: p2, align: a2 }) => {
            if a1 != a2 {
                return Err(op_diff(il, ir, "alignment mismatch"));
            }
            w.cmp_values(il, ir, p1, p2)?;
        }
        (
            Store {
                value: v1,
                ptr: p1,
                align: a1,
            },
            Store {
                value: v2,
                ptr: p2,
                align: a2,
            },
        ) => {
            if a1 != a2 {
                return Err(op_diff(il, ir, "alignment mismatch"));
            }
            w.cmp_values(il, ir, v1, v2)?;
            w.cmp_values(il, ir, p1, p2)?;
        }
        (
            Alloca {
                allocated_ty: t1,
                align: a1,
            },
            Alloca {
                allocated_ty: t2,
                align: a2,
            },
        ) => {
            cmp_types(w, t1, t2)
                .map_err(|e| op_diff(il, ir, &format!("allocated type: {}", e)))?;
            if a1 != a2 {
                return Err(op_diff(il, ir, "alignment mismatch"));
            }
        }
        (
            FieldAddr {
                base: b1,
                struct_name: s1,
                index: i1,
            },
            FieldAddr {
                base: b2,
                struct_name: s2,
                index: i2,
            },
        ) => {
            cmp_types(
                w,
                &Type::Struct(s1.clone()),
                &Type::Struct(s2.clone()),
            )
            .map_err(|e| op_diff(il, ir, &format!("aggregate: {}", e)))?;
            if i1 != i2 {
                return Err(op_diff(il, ir, "field index mismatch"));
            }
            w.cmp_values(il, ir, b1, b2)?;
        }
        (Cast(_, a1), Cast(_, a2)) => {
            // Cast kinds already agree through the operator comparison.
            w.cmp_values(il, ir, a1, a2)?;
        }
        (
            Call {
                callee: c1,
                args: a1,
            },
            Call {
                callee: c2,
                args: a2,
            },
        ) => {
            w.cmp_global_values(c1, c2)?;
            if a1.len() != a2.len() {
                return Err(op_diff(il, ir, "call argument count mismatch"));
            }
            for (x, y) in a1.iter().zip(a2.iter()) {
                w.cmp_values(il, ir, x, y)?;
            }
        }
        (Asm { body: b1, args: a1 }, Asm { body: b2, args: a2 }) => {
            if b1 != b2 {
                return Err(op_diff(il, ir, "asm body mismatch"));
            }
            if a1.len() != a2.len() {
                return Err(op_diff(il, ir, "asm argument count mismatch"));
            }
            for (x, y) in a1.iter().zip(a2.iter()) {
                w.cmp_values(il, ir, x, y)?;
            }
        }
        (Phi { incoming: in1 }, Phi { incoming: in2 }) => {
            if in1.len() != in2.len() {
                return Err(op_diff(il, ir, "phi incoming count mismatch"));
            }
            for ((v1, b1), (v2, b2)) in in1.iter().zip(in2.iter()) {
                w.cmp_values(il, ir, v1, v2)?;
                if w.walk().corr.relate_blocks(*b1, *b2) == Consistency::Conflict {
                    return Err(op_diff(il, ir, "phi block correspondence conflict"));
                }
            }
        }
        (Ret(v1), Ret(v2)) => match (v1, v2) {
            (Some(a), Some(b)) => w.cmp_values(il, ir, a, b)?,
            (None, None) => {}
            _ => return Err(op_diff(il, ir, "return value presence mismatch")),
        },
        (Br(d1), Br(d2)) => {
            enqueue_successor_pair(w, il, ir, *d1, *d2)?;
        }
        (
            BrIf {
                cond: c1,
                then_blk: t1,
                else_blk: e1,
            },
            BrIf {
                cond: c2,
                then_blk: t2,
                else_blk: e2,
            },
        ) => {
            w.cmp_values(il, ir, c1, c2)?;
            enqueue_successor_pair(w, il, ir, *t1, *t2)?;
            enqueue_successor_pair(w, il, ir, *e1, *e2)?;
        }
        (
            Switch {
                value: v1,
                default: d1,
                cases: c1,
            },
            Switch {
                value: v2,
                default: d2,
                cases: c2,
            },
        ) => {
            w.cmp_values(il, ir, v1, v2)?;
            if c1.len() != c2.len() {
                return Err(op_diff(il, ir, "switch case count mismatch"));
            }
            enqueue_successor_pair(w, il, ir, *d1, *d2)?;
            for ((k1, b1), (k2, b2)) in c1.iter().zip(c2.iter()) {
                if k1 != k2 {
                    return Err(op_diff(il, ir, "switch case value mismatch"));
                }
                enqueue_successor_pair(w, il, ir, *b1, *b2)?;
            }
        }
        _ => return Err(op_diff(il, ir, "operator mismatch")),
    }

    if w.walk().corr.relate_insts(il, ir) == Consistency::Conflict {
        return Err(op_diff(il, ir, "result correspondence conflict"));
    }
    w.walk().consumed_left.insert(il.index);
    w.walk().consumed_right.insert(ir.index);
    Ok(())
}

pub(crate) fn next_unconsumed(
    f: &Function,
    b: BlockRef,
    consumed: &HashSet<usize>,
) -> Option<InstRef> {
    f.get_block(b)
        .insts
        .iter()
        .copied()
        .find(|ir| !consumed.contains(&ir.index))
}

pub fn default_cmp_basic_blocks<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    bl: BlockRef,
    br: BlockRef,
) -> Result<(), WalkDiff> {
    if w.walk().corr.relate_blocks(bl, br) == Consistency::Conflict {
        return Err(WalkDiff::Blocks {
            left: bl,
            right: br,
            detail: "block correspondence conflict".to_string(),
        });
    }
    loop {
        let st = w.walk();
        let nl = next_unconsumed(st.left_fn, bl, &st.consumed_left);
        let nr = next_unconsumed(st.right_fn, br, &st.consumed_right);
        match (nl, nr) {
            (None, None) => return Ok(()),
            (Some(il), Some(ir)) => {
                let before = (st.consumed_left.len(), st.consumed_right.len());
                w.cmp_operations_with_operands(il, ir)?;
                let st = w.walk();
                let after = (st.consumed_left.len(), st.consumed_right.len());
                if before == after {
                    return Err(op_diff(il, ir, "comparison made no progress"));
                }
            }
            (Some(il), None) => {
                return Err(WalkDiff::BlockLength {
                    left: bl,
                    right: br,
                    extra: Some((Side::Left, il)),
                })
            }
            (None, Some(ir)) => {
                return Err(WalkDiff::BlockLength {
                    left: bl,
                    right: br,
                    extra: Some((Side::Right, ir)),
                })
            }
        }
    }
}

/// Signature comparison: argument count and types, return type, vararg
/// flag, calling convention. Arguments are related positionally.
pub fn default_cmp_signatures<'a, W: FunctionWalk<'a>>(
    w: &mut W,
    tolerate_void_returns: bool,
) -> Result<(), WalkDiff> {
    let st = w.walk();
    let (lf, rf) = (st.left_fn, st.right_fn);
    if lf.is_declaration() || rf.is_declaration() {
        return Err(WalkDiff::Signature(
            "cannot walk a declaration without a body".to_string(),
        ));
    }
    if lf.params.len() != rf.params.len() {
        return Err(WalkDiff::Signature(format!(
            "argument count mismatch: {} vs {}",
            lf.params.len(),
            rf.params.len()
        )));
    }
    if lf.is_vararg != rf.is_vararg {
        return Err(WalkDiff::Signature("vararg flag mismatch".to_string()));
    }
    if lf.calling_conv != rf.calling_conv {
        return Err(WalkDiff::Signature("calling convention mismatch".to_string()));
    }
    let void_tolerated =
        tolerate_void_returns && (lf.ret_ty.is_void() || rf.ret_ty.is_void());
    if !void_tolerated {
        cmp_types(w, &lf.ret_ty, &rf.ret_ty)
            .map_err(|e| WalkDiff::Signature(format!("return type: {}", e)))?;
    }
    for i in 0..lf.params.len() {
        cmp_types(w, &lf.params[i].ty, &rf.params[i].ty)
            .map_err(|e| WalkDiff::Signature(format!("argument {}: {}", i, e)))?;
        w.walk().corr.relate_args(i, i);
    }
    Ok(())
}

/// Worklist walk over the reachable block-pair graph, seeded with the entry
/// pair.
pub fn default_walk_block_graph<'a, W: FunctionWalk<'a>>(w: &mut W) -> Result<(), WalkDiff> {
    let st = w.walk();
    let entry_l = st.left_fn.entry_block().expect("definition has an entry block");
    let entry_r = st.right_fn.entry_block().expect("definition has an entry block");
    st.queue.push_back((entry_l, entry_r));
    while let Some((bl, br)) = w.walk().queue.pop_front() {
        if !w.walk().visited.insert((bl.index, br.index)) {
            continue;
        }
        w.cmp_basic_blocks(bl, br)?;
    }
    Ok(())
}

pub fn default_compare<'a, W: FunctionWalk<'a>>(w: &mut W) -> Result<(), WalkDiff> {
    default_cmp_signatures(w, /* tolerate_void_returns= */ false)?;
    default_walk_block_graph(w)
}

/// The plain structural comparator with no overrides.
pub struct FunctionComparator<'a> {
    state: WalkState<'a>,
}

impl<'a> FunctionComparator<'a> {
    pub fn new(
        left_fn: &'a Function,
        right_fn: &'a Function,
        left_module: &'a Module,
        right_module: &'a Module,
        di_left: &'a DebugInfoIndex,
        di_right: &'a DebugInfoIndex,
    ) -> Self {
        Self {
            state: WalkState::new(left_fn, right_fn, left_module, right_module, di_left, di_right),
        }
    }

    pub fn state(&self) -> &WalkState<'a> {
        &self.state
    }
}

impl<'a> FunctionWalk<'a> for FunctionComparator<'a> {
    fn walk(&mut self) -> &mut WalkState<'a> {
        &mut self.state
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

    fn compare_named(ml: &Module, mr: &Module, name: &str) -> Result<(), WalkDiff> {
        let di_l = DebugInfoIndex::build(ml);
        let di_r = DebugInfoIndex::build(mr);
        let lf = ml.get_fn(name).unwrap();
        let rf = mr.get_fn(name).unwrap();
        let mut cmp = FunctionComparator::new(lf, rf, ml, mr, &di_l, &di_r);
        cmp.compare()
    }

    const LOOPY: &str = r#"module m

fn count(n: bits[32]) -> bits[32] {
entry:
  br.1: void = br(loop, id=1)
loop:
  i: bits[32] = phi([0, entry], [next, loop], id=2)
  next: bits[32] = add(i, 1, id=3)
  done: bits[1] = icmp(uge, next, n, id=4)
  br_if.5: void = br_if(done, exit, loop, id=5)
exit:
  ret.6: void = ret(i, id=6)
}
"#;

    #[test]
    fn compare_is_reflexive_for_cyclic_graphs() {
        let ml = parse_module(LOOPY);
        let mr = parse_module(LOOPY);
        assert!(compare_named(&ml, &mr, "count").is_ok());
    }

    #[test]
    fn renamed_locals_still_compare_equal() {
        let ml = parse_module(
            r#"module a

fn f(x: bits[32]) -> bits[32] {
entry:
  tmp: bits[32] = add(x, 1, id=7)
  ret.8: void = ret(tmp, id=8)
}
"#,
        );
        let mr = parse_module(
            r#"module b

fn f(x: bits[32]) -> bits[32] {
entry:
  other_name: bits[32] = add(x, 1, id=99)
  ret.100: void = ret(other_name, id=100)
}
"#,
        );
        assert!(compare_named(&ml, &mr, "f").is_ok());
    }

    #[test]
    fn constant_difference_is_detected() {
        let ml = parse_module(
            r#"module a

fn f(x: bits[32]) -> bits[32] {
entry:
  t: bits[32] = add(x, 1, id=1)
  ret.2: void = ret(t, id=2)
}
"#,
        );
        let mr = parse_module(
            r#"module b

fn f(x: bits[32]) -> bits[32] {
entry:
  t: bits[32] = add(x, 2, id=1)
  ret.2: void = ret(t, id=2)
}
"#,
        );
        assert!(matches!(
            compare_named(&ml, &mr, "f"),
            Err(WalkDiff::Operations { .. })
        ));
    }

    #[test]
    fn swapped_branch_successors_are_not_equal() {
        let ml = parse_module(
            r#"module a

fn f(c: bits[1]) -> bits[32] {
entry:
  br_if.1: void = br_if(c, yes, no, id=1)
yes:
  ret.2: void = ret(1, id=2)
no:
  ret.3: void = ret(2, id=3)
}
"#,
        );
        let mr = parse_module(
            r#"module b

fn f(c: bits[1]) -> bits[32] {
entry:
  br_if.1: void = br_if(c, no, yes, id=1)
yes:
  ret.2: void = ret(1, id=2)
no:
  ret.3: void = ret(2, id=3)
}
"#,
        );
        // The "then" successor on the left must correspond to the "then"
        // successor on the right; the bodies then disagree.
        assert!(compare_named(&ml, &mr, "f").is_err());
    }

    #[test]
    fn extra_instruction_reports_block_length() {
        let ml = parse_module(
            r#"module a

global sink: bits[32]

fn f(x: bits[32]) -> void {
entry:
  store.1: void = store(x, @sink, align=4, id=1)
  store.2: void = store(x, @sink, align=4, id=2)
  ret.3: void = ret(id=3)
}
"#,
        );
        let mr = parse_module(
            r#"module b

global sink: bits[32]

fn f(x: bits[32]) -> void {
entry:
  store.1: void = store(x, @sink, align=4, id=1)
  ret.2: void = ret(id=2)
}
"#,
        );
        // The differing pair is (store.2, ret.2): an operator mismatch, not
        // a length mismatch, because the walk is lockstep.
        assert!(compare_named(&ml, &mr, "f").is_err());
    }

    #[test]
    fn signature_mismatch_is_reported_before_any_walk() {
        let ml = parse_module(
            r#"module a

fn f(x: bits[32]) -> bits[32] {
entry:
  ret.1: void = ret(x, id=1)
}
"#,
        );
        let mr = parse_module(
            r#"module b

fn f(x: bits[64]) -> bits[64] {
entry:
  ret.1: void = ret(x, id=1)
}
"#,
        );
        assert!(matches!(
            compare_named(&ml, &mr, "f"),
            Err(WalkDiff::Signature(_))
        ));
    }
}
