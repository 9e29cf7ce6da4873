// SPDX-License-Identifier: Apache-2.0

//! Matching of difference patterns against live module instructions. Each
//! side of a pattern is walked from its `pattern-start` instruction against
//! one module, with a per-match correspondence in which pattern arguments
//! (and values defined before the start) bind to arbitrary module values.

use std::collections::{HashMap, HashSet, VecDeque};

use semdiff_ir::debug_info::DebugInfoIndex;
use semdiff_ir::ir::{BlockRef, Function, InstRef, Module, Operand};
use semdiff_ir::ir_utils::base_name;

use crate::correspondence::Consistency;
use crate::fn_comparator::{
    default_cmp_operations, op_diff, FunctionWalk, WalkDiff, WalkState,
};
use crate::pattern::{Pattern, PatternSet, PatternSide};

/// Outcome of matching one pattern side against one module function.
struct SideMatch {
    /// Module instructions consumed by the match, as arena indices.
    consumed: HashSet<usize>,
    /// Resolution of pattern values to module values: walked instructions
    /// through the match correspondence, free values through bindings.
    resolution: HashMap<Operand, Operand>,
}

impl SideMatch {
    fn resolve(&self, pattern_value: &Operand) -> Option<Operand> {
        self.resolution.get(pattern_value).cloned()
    }
}

/// Walker for one pattern side: `left` is the module function, `right` the
/// pattern function.
struct SideMatcher<'w> {
    state: WalkState<'w>,
    /// Free pattern values (arguments and values defined before
    /// `pattern-start`) bound to module values on first use.
    bindings: HashMap<Operand, Operand>,
    ends: HashSet<usize>,
    limit: Option<usize>,
    reached_end: bool,
}

impl<'w> FunctionWalk<'w> for SideMatcher<'w> {
    fn walk(&mut self) -> &mut WalkState<'w> {
        &mut self.state
    }

    fn cmp_global_values(&mut self, l: &str, r: &str) -> Result<(), WalkDiff> {
        // Globals correspond by name; the pattern module does not define
        // them, so no relation is installed.
        if base_name(l) == base_name(r) {
            Ok(())
        } else {
            Err(WalkDiff::Globals {
                left: l.to_string(),
                right: r.to_string(),
            })
        }
    }

    fn cmp_values(
        &mut self,
        il: InstRef,
        ir: InstRef,
        l: &Operand,
        r: &Operand,
    ) -> Result<(), WalkDiff> {
        match r {
            Operand::Const(_) => {
                if l == r {
                    Ok(())
                } else {
                    Err(op_diff(il, ir, "pattern constant mismatch"))
                }
            }
            Operand::Global(g) => match l {
                Operand::Global(m) => self.cmp_global_values(m, g),
                _ => Err(op_diff(il, ir, "pattern global operand mismatch")),
            },
            Operand::Inst(b) if self.state.corr.lookup_inst_right(*b).is_some() => {
                let bound = self.state.corr.lookup_inst_right(*b).unwrap();
                if *l == Operand::Inst(bound) {
                    Ok(())
                } else {
                    Err(op_diff(il, ir, "pattern value correspondence conflict"))
                }
            }
            // Pattern arguments and pre-start values match arbitrary module
            // values, consistently across the match.
            _ => match self.bindings.get(r) {
                Some(bound) => {
                    if bound == l {
                        Ok(())
                    } else {
                        Err(op_diff(il, ir, "pattern binding conflict"))
                    }
                }
                None => {
                    self.bindings.insert(r.clone(), l.clone());
                    Ok(())
                }
            },
        }
    }
}

impl<'w> SideMatcher<'w> {
    fn new(
        module_fn: &'w Function,
        module: &'w Module,
        module_di: &'w DebugInfoIndex,
        pattern_fn: &'w Function,
        pattern_module: &'w Module,
        pattern_di: &'w DebugInfoIndex,
        side: &PatternSide,
    ) -> Self {
        Self {
            state: WalkState::new(
                module_fn,
                pattern_fn,
                module,
                pattern_module,
                module_di,
                pattern_di,
            ),
            bindings: HashMap::new(),
            ends: side.ends.clone(),
            limit: side.basic_block_limit,
            reached_end: false,
        }
    }

    /// Runs the bounded sub-walk. Returns the match result when the walk
    /// reaches `pattern-end` (or exhausts an end-less pattern) without
    /// conflict.
    fn run(mut self, mod_start: InstRef, pat_start: InstRef) -> Option<SideMatch> {
        let mf = self.state.left_fn;
        let pf = self.state.right_fn;
        let mb = mf.block_of_inst(mod_start)?;
        let pb = pf.block_of_inst(pat_start)?;
        if self.state.corr.relate_blocks(mb, pb) == Consistency::Conflict {
            return None;
        }
        let m_off = mf.get_block(mb).insts.iter().position(|i| *i == mod_start)?;
        let p_off = pf.get_block(pb).insts.iter().position(|i| *i == pat_start)?;

        let mut queue: VecDeque<(BlockRef, BlockRef, usize, usize, usize)> = VecDeque::new();
        queue.push_back((mb, pb, m_off, p_off, 0));
        while let Some((mb, pb, m_off, p_off, depth)) = queue.pop_front() {
            if !self.state.visited.insert((mb.index, pb.index)) {
                continue;
            }
            if !self.match_block(mb, pb, m_off, p_off, depth, &mut queue) {
                return None;
            }
            if self.reached_end {
                break;
            }
        }
        if !self.reached_end && !self.ends.is_empty() {
            return None;
        }

        // Fold the walked correspondence and the free bindings into one
        // pattern-value resolution map.
        let mut resolution: HashMap<Operand, Operand> = self.bindings.clone();
        for (module_inst, pattern_inst) in self.state.corr.inst_pairs() {
            resolution.insert(Operand::Inst(pattern_inst), Operand::Inst(module_inst));
        }
        Some(SideMatch {
            consumed: self.state.consumed_left.clone(),
            resolution,
        })
    }

    /// Matches one block pair from the given offsets. Returns false on
    /// structural conflict; sets `reached_end` when the side's end marker
    /// is consumed.
    fn match_block(
        &mut self,
        mb: BlockRef,
        pb: BlockRef,
        m_off: usize,
        p_off: usize,
        depth: usize,
        queue: &mut VecDeque<(BlockRef, BlockRef, usize, usize, usize)>,
    ) -> bool {
        let mf = self.state.left_fn;
        let pf = self.state.right_fn;
        let mut mi = m_off;
        let mut pi = p_off;
        loop {
            let m_inst = mf.get_block(mb).insts.get(mi).copied();
            let p_inst = pf.get_block(pb).insts.get(pi).copied();
            match (m_inst, p_inst) {
                (None, None) => return true,
                (Some(m), Some(p)) => {
                    let enqueued_before = self.state.queue.len();
                    if default_cmp_operations(self, m, p).is_err() {
                        return false;
                    }
                    // Successor pairs enqueued by the comparison are bounded
                    // by the side's block limit and halted by bb-limit-end.
                    let new_pairs: Vec<(BlockRef, BlockRef)> = self
                        .state
                        .queue
                        .drain(enqueued_before..)
                        .collect();
                    let meta = pf.get_inst(p).pattern_meta.clone().unwrap_or_default();
                    let within_limit = match self.limit {
                        Some(limit) => depth + 1 <= limit,
                        None => true,
                    };
                    if !meta.basic_block_limit_end && within_limit {
                        for (sb_m, sb_p) in new_pairs {
                            queue.push_back((sb_m, sb_p, 0, 0, depth + 1));
                        }
                    }
                    if self.ends.contains(&p.index) {
                        self.reached_end = true;
                        return true;
                    }
                    mi += 1;
                    pi += 1;
                }
                // One side ran out before the other without reaching the
                // end marker.
                _ => return false,
            }
        }
    }
}

fn resolve_name_in(f: &Function, name: &str) -> Option<Operand> {
    if let Some(ir) = f.find_inst_by_name(name) {
        return Some(Operand::Inst(ir));
    }
    f.params
        .iter()
        .position(|p| p.name == name)
        .map(Operand::Arg)
}

/// Installs the final-mapping constraint of a successful match into the
/// main correspondence. Returns false on any conflict.
fn apply_final_mapping(
    pattern: &Pattern,
    set: &PatternSet,
    old_match: &SideMatch,
    new_match: &SideMatch,
    main: &mut WalkState,
) -> bool {
    let old_fn = set.side_fn(pattern, &pattern.old_side);
    let new_fn = set.side_fn(pattern, &pattern.new_side);
    for (new_name, old_name) in pattern.final_mapping.iter() {
        let Some(pat_old) = resolve_name_in(old_fn, old_name) else {
            return false;
        };
        let Some(pat_new) = resolve_name_in(new_fn, new_name) else {
            return false;
        };
        let Some(mod_left) = old_match.resolve(&pat_old) else {
            return false;
        };
        let Some(mod_right) = new_match.resolve(&pat_new) else {
            return false;
        };
        let consistent = match (&mod_left, &mod_right) {
            (Operand::Inst(a), Operand::Inst(b)) => {
                main.corr.relate_insts(*a, *b) == Consistency::Consistent
            }
            (Operand::Arg(a), Operand::Arg(b)) => {
                main.corr.relate_args(*a, *b) == Consistency::Consistent
            }
            (Operand::Global(a), Operand::Global(b)) => {
                base_name(a) == base_name(b)
                    && main.corr.relate_globals(a, b) == Consistency::Consistent
            }
            (Operand::Const(a), Operand::Const(b)) => a == b,
            _ => false,
        };
        if !consistent {
            return false;
        }
    }
    true
}

/// Attempts to resolve the divergence `(il, ir)` of the main walk with any
/// loaded pattern. On success the instructions consumed by the match are
/// added to the main walk's consumed sets and true is returned.
///
/// The left module holds the old version, so the old side of each pattern
/// is matched against it; the new side runs against the right module.
pub fn try_match_patterns(
    patterns: &PatternSet,
    main: &mut WalkState,
    il: InstRef,
    ir: InstRef,
) -> bool {
    for pattern in patterns.iter() {
        let pattern_module = patterns.module_of(pattern);
        let pattern_di = patterns.index_of(pattern);
        let old_fn = patterns.side_fn(pattern, &pattern.old_side);
        let new_fn = patterns.side_fn(pattern, &pattern.new_side);

        // Cheap shape check before attempting a sub-walk.
        let old_start_op = old_fn
            .get_inst(pattern.old_side.start)
            .payload
            .get_operator();
        let new_start_op = new_fn
            .get_inst(pattern.new_side.start)
            .payload
            .get_operator();
        if main.left_fn.get_inst(il).payload.get_operator() != old_start_op
            || main.right_fn.get_inst(ir).payload.get_operator() != new_start_op
        {
            continue;
        }

        let old_matcher = SideMatcher::new(
            main.left_fn,
            main.left_module,
            main.di_left,
            old_fn,
            pattern_module,
            pattern_di,
            &pattern.old_side,
        );
        let Some(old_match) = old_matcher.run(il, pattern.old_side.start) else {
            continue;
        };
        let new_matcher = SideMatcher::new(
            main.right_fn,
            main.right_module,
            main.di_right,
            new_fn,
            pattern_module,
            pattern_di,
            &pattern.new_side,
        );
        let Some(new_match) = new_matcher.run(ir, pattern.new_side.start) else {
            continue;
        };
        if !apply_final_mapping(pattern, patterns, &old_match, &new_match, main) {
            continue;
        }
        log::debug!(
            "pattern {} resolved divergence at ({}, {})",
            pattern.name,
            main.left_fn.get_inst(il).text_id,
            main.right_fn.get_inst(ir).text_id
        );
        main.consumed_left.extend(old_match.consumed.iter().copied());
        main.consumed_right.extend(new_match.consumed.iter().copied());
        return true;
    }
    false
}
