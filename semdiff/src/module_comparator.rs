// SPDX-License-Identifier: Apache-2.0

//! The module comparator: drives per-pair comparison over a seed list,
//! handles the declaration fast path, runs the inlining feedback loop when
//! a divergence pinpoints a call-site pair, and aggregates non-function
//! differences into the overall result.

use std::collections::{HashMap, HashSet, VecDeque};

use semdiff_ir::dce::simplify_function;
use semdiff_ir::debug_info::{fn_location, inst_location, DebugInfoIndex};
use semdiff_ir::inline::inline_call;
use semdiff_ir::ir::{InstPayload, Module};
use semdiff_ir::ir_utils::base_name;

use crate::callgraph::get_call_stack;
use crate::config::BuiltinPatterns;
use crate::diff_comparator::{DifferentialFunctionComparator, RawSyntaxDiff};
use crate::fn_comparator::{FunctionWalk, WalkDiff};
use crate::pattern::PatternSet;
use crate::result::{
    CallInfo, ComparisonResult, FunctionInfo, MissingDef, NonFunctionDifference, OverallResult,
    SyntaxDifference, TypeDifference, Verdict,
};
use crate::unused_returns::rewrite_unused_return_values;

/// Name prefix of helpers synthesized by pre-passes (field access,
/// inline-asm outlining). They are never reported as missing definitions.
pub const ABSTRACTION_PREFIX: &str = "__abstraction_";
/// Prefix of field-access abstractions, which are inlined last so that
/// aggregate-type correspondence survives the walk.
pub const FIELD_ACCESS_PREFIX: &str = "__abstraction_field_access_";
/// Prefix of compiler intrinsics; they are never inlined.
pub const INTRINSIC_PREFIX: &str = "__builtin_";

pub fn is_abstraction(name: &str) -> bool {
    name.starts_with(ABSTRACTION_PREFIX)
}

pub fn is_field_access_abstraction(name: &str) -> bool {
    name.starts_with(FIELD_ACCESS_PREFIX)
}

pub fn is_intrinsic(name: &str) -> bool {
    name.starts_with(INTRINSIC_PREFIX)
}

const MAX_INLINE_ITERATIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheEntry {
    /// Comparison in progress (or between inlining iterations); a reentry
    /// is optimistically assumed equal and contributes no bijection claim.
    Pending,
    Done(Verdict),
}

/// One call site scheduled for inlining, resolved lazily by instruction
/// text id so the handle survives function rewrites.
#[derive(Debug, Clone)]
struct InlineSite {
    caller: String,
    call_id: usize,
    callee: String,
}

pub struct ModuleComparator<'p> {
    pub left: Module,
    pub right: Module,
    opts: BuiltinPatterns,
    patterns: &'p PatternSet,
    cache: HashMap<(String, String), CacheEntry>,
    results: Vec<ComparisonResult>,
    pub missing_defs: Vec<MissingDef>,
    /// Functions whose bodies were absorbed by inlining during a
    /// comparison that ended equal; their standalone reports are
    /// suppressed.
    pub covered: HashSet<String>,
    worklist: VecDeque<(String, String, String, String)>,
}

impl<'p> ModuleComparator<'p> {
    pub fn new(
        mut left: Module,
        mut right: Module,
        opts: BuiltinPatterns,
        patterns: &'p PatternSet,
    ) -> Self {
        // The unused-return-value rewriter runs once per module before any
        // comparison begins.
        let rewritten = rewrite_unused_return_values(&mut left, &right);
        if !rewritten.is_empty() {
            log::debug!("rewrote unused return values in {}: {:?}", left.name, rewritten);
        }
        let rewritten = rewrite_unused_return_values(&mut right, &left);
        if !rewritten.is_empty() {
            log::debug!(
                "rewrote unused return values in {}: {:?}",
                right.name,
                rewritten
            );
        }
        Self {
            left,
            right,
            opts,
            patterns,
            cache: HashMap::new(),
            results: Vec::new(),
            missing_defs: Vec::new(),
            covered: HashSet::new(),
            worklist: VecDeque::new(),
        }
    }

    /// Compares every seed pair (and every function pair discovered during
    /// the walks) and returns the aggregate result. Unresolved seed symbols
    /// are an input error; comparison is not attempted.
    pub fn compare_pairs(&mut self, seeds: &[(String, String)]) -> Result<OverallResult, String> {
        for (l, r) in seeds.iter() {
            if self.left.get_fn(l).is_none() {
                return Err(format!("seed function '{}' not found in {}", l, self.left.name));
            }
            if self.right.get_fn(r).is_none() {
                return Err(format!(
                    "seed function '{}' not found in {}",
                    r,
                    self.right.name
                ));
            }
        }
        let seed_set: HashSet<(String, String)> = seeds.iter().cloned().collect();
        for (l, r) in seeds.iter() {
            self.worklist
                .push_back((l.clone(), r.clone(), l.clone(), r.clone()));
        }
        while let Some((l, r, seed_l, seed_r)) = self.worklist.pop_front() {
            let is_seed = seed_set.contains(&(l.clone(), r.clone()));
            if !is_seed && (self.covered.contains(&l) || self.covered.contains(&r)) {
                continue;
            }
            self.compare_functions(&l, &r, &seed_l, &seed_r);
        }
        Ok(OverallResult {
            function_results: self.results.clone(),
            missing_defs: self.missing_defs.clone(),
        })
    }

    /// Compares one function pair, consulting and updating the result
    /// cache. Every distinct pair is compared at most once.
    pub fn compare_functions(
        &mut self,
        l_name: &str,
        r_name: &str,
        seed_l: &str,
        seed_r: &str,
    ) -> Verdict {
        let key = (l_name.to_string(), r_name.to_string());
        match self.cache.get(&key) {
            Some(CacheEntry::Done(v)) => return *v,
            Some(CacheEntry::Pending) => return Verdict::AssumedEqual,
            None => {}
        }
        log::debug!("comparing {} and {}", l_name, r_name);
        self.cache.insert(key.clone(), CacheEntry::Pending);

        let (lf_is_decl, rf_is_decl) = match (self.left.get_fn(l_name), self.right.get_fn(r_name))
        {
            (Some(lf), Some(rf)) => (lf.is_declaration(), rf.is_declaration()),
            _ => {
                // A discovered callee can be absent from one module
                // entirely; treat like a missing definition.
                self.missing_defs.push(MissingDef {
                    left: self.left.get_fn(l_name).is_none().then(|| l_name.to_string()),
                    right: self
                        .right
                        .get_fn(r_name)
                        .is_none()
                        .then(|| r_name.to_string()),
                });
                self.cache.insert(key, CacheEntry::Done(Verdict::Unknown));
                return Verdict::Unknown;
            }
        };

        // Declaration fast path.
        if lf_is_decl || rf_is_decl {
            let names_match = base_name(l_name) == base_name(r_name);
            let verdict = if !names_match {
                Verdict::NotEqual
            } else if self.opts.control_flow_only {
                // A single declaration on either side suffices here.
                Verdict::Equal
            } else if lf_is_decl && rf_is_decl {
                Verdict::Equal
            } else {
                // Exactly one side has a body; the host is expected to
                // supply the missing definition.
                self.missing_defs.push(MissingDef {
                    left: lf_is_decl.then(|| l_name.to_string()),
                    right: rf_is_decl.then(|| r_name.to_string()),
                });
                Verdict::Unknown
            };
            log::debug!(
                "declaration fast path for ({}, {}): {:?}",
                l_name,
                r_name,
                verdict
            );
            self.cache.insert(key, CacheEntry::Done(verdict));
            let mut result = ComparisonResult::new(l_name, r_name);
            result.kind = verdict;
            self.fill_function_infos(&mut result, l_name, r_name);
            self.results.push(result);
            return verdict;
        }

        let verdict = self.run_comparison_loop(l_name, r_name, seed_l, seed_r);
        self.cache.insert(key, CacheEntry::Done(verdict));
        verdict
    }

    /// One full comparison, re-invoked after each successful inlining
    /// iteration. Each iteration strictly reduces the number of
    /// non-inlinable call instructions, bounding the loop.
    fn run_comparison_loop(
        &mut self,
        l_name: &str,
        r_name: &str,
        seed_l: &str,
        seed_r: &str,
    ) -> Verdict {
        let mut result = ComparisonResult::new(l_name, r_name);
        let mut inlined_pairs: Vec<(Option<String>, Option<String>)> = Vec::new();
        // Backstop against mutually recursive inlining chains that never
        // reduce the divergence.
        let mut iterations = 0usize;
        let verdict = loop {
            iterations += 1;
            if iterations > MAX_INLINE_ITERATIONS {
                log::warn!(
                    "giving up on ({}, {}) after {} inlining iterations",
                    l_name,
                    r_name,
                    MAX_INLINE_ITERATIONS
                );
                break Verdict::NotEqual;
            }
            let (walk, syntax_diffs, type_diffs, discovered) = {
                let di_left = DebugInfoIndex::build(&self.left);
                let di_right = DebugInfoIndex::build(&self.right);
                let lf = self.left.get_fn(l_name).expect("checked by caller");
                let rf = self.right.get_fn(r_name).expect("checked by caller");
                let mut cmp = DifferentialFunctionComparator::new(
                    lf,
                    rf,
                    &self.left,
                    &self.right,
                    &self.opts,
                    self.patterns,
                    &di_left,
                    &di_right,
                );
                let walk = cmp.compare();
                (
                    walk,
                    cmp.syntax_diffs.clone(),
                    cmp.type_diffs().to_vec(),
                    cmp.discovered_calls.clone(),
                )
            };
            self.attach_diffs(&mut result, l_name, r_name, seed_l, seed_r, &syntax_diffs, &type_diffs);
            for (cl, cr) in discovered {
                if !self.cache.contains_key(&(cl.clone(), cr.clone())) {
                    self.worklist
                        .push_back((cl, cr, seed_l.to_string(), seed_r.to_string()));
                }
            }
            match walk {
                Ok(()) => break Verdict::Equal,
                Err(WalkDiff::InlineAt { left, right }) => {
                    log::debug!(
                        "comparison of ({}, {}) split at call sites {:?}/{:?}",
                        l_name,
                        r_name,
                        left,
                        right
                    );
                    match self.inline_step(l_name, r_name, left, right) {
                        Some(pair) => inlined_pairs.push(pair),
                        None => break Verdict::NotEqual,
                    }
                }
                Err(diff) => {
                    log::debug!(
                        "functions {} and {} are not equal: {}",
                        l_name,
                        r_name,
                        diff.describe()
                    );
                    break Verdict::NotEqual;
                }
            }
        };

        if verdict == Verdict::Equal {
            self.discard_inlined_callee_verdicts(&inlined_pairs);
        }
        result.kind = verdict;
        self.fill_function_infos(&mut result, l_name, r_name);
        self.results.push(result);
        verdict
    }

    /// The functions absorbed by inlining are no longer reachable through
    /// this path; their standalone verdicts are discarded.
    fn discard_inlined_callee_verdicts(&mut self, pairs: &[(Option<String>, Option<String>)]) {
        for (cl, cr) in pairs.iter() {
            if let (Some(cl), Some(cr)) = (cl, cr) {
                let key = (cl.clone(), cr.clone());
                if let Some(CacheEntry::Done(old)) = self.cache.get(&key) {
                    log::warn!(
                        "reclassifying inlined pair ({}, {}): pre-inline verdict was {:?}",
                        cl,
                        cr,
                        old
                    );
                }
                self.cache.remove(&key);
                self.results
                    .retain(|r| !(r.left.name == *cl && r.right.name == *cr));
            }
            if let Some(cl) = cl {
                self.covered.insert(cl.clone());
            }
            if let Some(cr) = cr {
                self.covered.insert(cr.clone());
            }
        }
    }

    fn resolve_inline_site(&self, side_left: bool, caller: &str, call_id: usize) -> Option<InlineSite> {
        let module = if side_left { &self.left } else { &self.right };
        let func = module.get_fn(caller)?;
        let site = func.find_inst_by_id(call_id)?;
        match &func.get_inst(site).payload {
            InstPayload::Call { callee, .. } => Some(InlineSite {
                caller: caller.to_string(),
                call_id,
                callee: callee.clone(),
            }),
            _ => None,
        }
    }

    /// One iteration of the inlining feedback loop. Returns the callee pair
    /// that was inlined, or None when nothing could be inlined (the
    /// comparison then terminates with NotEqual).
    fn inline_step(
        &mut self,
        l_name: &str,
        r_name: &str,
        left_id: Option<usize>,
        right_id: Option<usize>,
    ) -> Option<(Option<String>, Option<String>)> {
        let mut left_site =
            left_id.and_then(|id| self.resolve_inline_site(true, l_name, id));
        let mut right_site =
            right_id.and_then(|id| self.resolve_inline_site(false, r_name, id));

        // Postpone inlining a field-access abstraction until the other side
        // has been inlined: aggregate-type difference detection relies on
        // the abstractions staying visible.
        if let (Some(ls), Some(rs)) = (&left_site, &right_site) {
            if is_field_access_abstraction(&ls.callee)
                && !is_field_access_abstraction(&rs.callee)
            {
                left_site = None;
            }
        }
        if let (Some(ls), Some(rs)) = (&left_site, &right_site) {
            if is_field_access_abstraction(&rs.callee)
                && !is_field_access_abstraction(&ls.callee)
            {
                right_site = None;
            }
        }

        let mut missing = MissingDef::default();
        let mut inlined_left: Option<String> = None;
        let mut inlined_right: Option<String> = None;

        if let Some(site) = left_site {
            match self.inline_one(true, &site) {
                InlineOutcome::Inlined => inlined_left = Some(site.callee),
                InlineOutcome::MissingDef => missing.left = Some(site.callee),
                InlineOutcome::Skipped => {}
            }
        }
        if let Some(site) = right_site {
            match self.inline_one(false, &site) {
                InlineOutcome::Inlined => inlined_right = Some(site.callee),
                InlineOutcome::MissingDef => missing.right = Some(site.callee),
                InlineOutcome::Skipped => {}
            }
        }
        if missing.left.is_some() || missing.right.is_some() {
            self.missing_defs.push(missing);
        }
        if inlined_left.is_none() && inlined_right.is_none() {
            return None;
        }

        if let Some(f) = self.left.get_fn_mut(l_name) {
            simplify_function(f);
        }
        if let Some(f) = self.right.get_fn_mut(r_name) {
            simplify_function(f);
        }
        Some((inlined_left, inlined_right))
    }

    fn inline_one(&mut self, side_left: bool, site: &InlineSite) -> InlineOutcome {
        let module = if side_left { &self.left } else { &self.right };
        log::debug!(
            "trying to inline {} in {}",
            site.callee,
            if side_left { "left" } else { "right" }
        );
        let Some(callee) = module.get_fn(&site.callee) else {
            return InlineOutcome::MissingDef;
        };
        if callee.is_declaration() {
            if !is_intrinsic(&site.callee) && !is_abstraction(&site.callee) {
                log::debug!("missing definition for {}", site.callee);
                return InlineOutcome::MissingDef;
            }
            return InlineOutcome::Skipped;
        }
        let callee_clone = callee.clone();
        let module = if side_left {
            &mut self.left
        } else {
            &mut self.right
        };
        let Some(caller) = module.get_fn_mut(&site.caller) else {
            return InlineOutcome::Skipped;
        };
        let Some(inst) = caller.find_inst_by_id(site.call_id) else {
            return InlineOutcome::Skipped;
        };
        match inline_call(caller, inst, &callee_clone) {
            Ok(()) => InlineOutcome::Inlined,
            Err(e) => {
                log::warn!("inlining {} failed: {}", site.callee, e);
                InlineOutcome::Skipped
            }
        }
    }

    fn function_info(&self, side_left: bool, name: &str) -> FunctionInfo {
        let module = if side_left { &self.left } else { &self.right };
        let Some(func) = module.get_fn(name) else {
            return FunctionInfo {
                name: name.to_string(),
                ..FunctionInfo::default()
            };
        };
        let (file, line) = fn_location(module, func);
        let mut calls: Vec<CallInfo> = Vec::new();
        for inst in func.insts.iter() {
            if let InstPayload::Call { callee, .. } = &inst.payload {
                let call_line = inst_location(module, inst).map(|(_, l)| l).unwrap_or(0);
                let info = CallInfo {
                    function: callee.clone(),
                    file: file.clone(),
                    line: call_line,
                };
                if !calls.contains(&info) {
                    calls.push(info);
                }
            }
        }
        calls.sort();
        FunctionInfo {
            name: name.to_string(),
            file,
            line,
            calls,
        }
    }

    fn fill_function_infos(&self, result: &mut ComparisonResult, l_name: &str, r_name: &str) {
        result.left = self.function_info(true, l_name);
        result.right = self.function_info(false, r_name);
    }

    fn attach_diffs(
        &self,
        result: &mut ComparisonResult,
        l_name: &str,
        r_name: &str,
        seed_l: &str,
        seed_r: &str,
        syntax_diffs: &[RawSyntaxDiff],
        type_diffs: &[(String, String)],
    ) {
        let stack_left = get_call_stack(&self.left, seed_l, l_name);
        let stack_right = get_call_stack(&self.right, seed_r, r_name);
        for d in syntax_diffs.iter() {
            let duplicate = result.differing_objects.iter().any(|existing| {
                existing.name() == d.name
                    && matches!(existing, NonFunctionDifference::Syntax(s)
                        if s.body_left == d.body_left && s.body_right == d.body_right)
            });
            if duplicate {
                continue;
            }
            result
                .differing_objects
                .push(NonFunctionDifference::Syntax(SyntaxDifference {
                    name: d.name.clone(),
                    body_left: d.body_left.clone(),
                    body_right: d.body_right.clone(),
                    stack_left: stack_left.clone(),
                    stack_right: stack_right.clone(),
                    function: l_name.to_string(),
                }));
        }
        let di_left = DebugInfoIndex::build(&self.left);
        let di_right = DebugInfoIndex::build(&self.right);
        for (nl, nr) in type_diffs.iter() {
            let name = base_name(nl).to_string();
            let duplicate = result.differing_objects.iter().any(|existing| {
                matches!(existing, NonFunctionDifference::Type(_)) && existing.name() == name
            });
            if duplicate {
                continue;
            }
            let (file_left, line_left) = di_left
                .struct_location(nl)
                .map(|(f, l)| (f.to_string(), l))
                .unwrap_or_default();
            let (file_right, line_right) = di_right
                .struct_location(nr)
                .map(|(f, l)| (f.to_string(), l))
                .unwrap_or_default();
            result
                .differing_objects
                .push(NonFunctionDifference::Type(TypeDifference {
                    name,
                    file_left,
                    line_left,
                    file_right,
                    line_right,
                    stack_left: stack_left.clone(),
                    stack_right: stack_right.clone(),
                    function: l_name.to_string(),
                }));
        }
    }
}

enum InlineOutcome {
    Inlined,
    MissingDef,
    Skipped,
}
