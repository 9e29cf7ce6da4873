// SPDX-License-Identifier: Apache-2.0

//! End-to-end comparison scenarios driven through the module comparator.

use semdiff::config::BuiltinPatterns;
use semdiff::module_comparator::ModuleComparator;
use semdiff::pattern::PatternSet;
use semdiff::result::{NonFunctionDifference, OverallResult, Verdict};
use semdiff_ir::ir_parser::Parser;

fn parse_module(text: &str) -> semdiff_ir::ir::Module {
    let mut parser = Parser::new(text);
    parser.parse_module().unwrap()
}

fn compare_with(
    left: &str,
    right: &str,
    opts: BuiltinPatterns,
    patterns: &PatternSet,
    seeds: &[(&str, &str)],
) -> OverallResult {
    let left = parse_module(left);
    let right = parse_module(right);
    let seeds: Vec<(String, String)> = seeds
        .iter()
        .map(|(l, r)| (l.to_string(), r.to_string()))
        .collect();
    let mut comparator = ModuleComparator::new(left, right, opts, patterns);
    comparator.compare_pairs(&seeds).unwrap()
}

fn verdict_of(result: &OverallResult, l: &str, r: &str) -> Verdict {
    result
        .function_results
        .iter()
        .find(|fr| fr.left.name == l && fr.right.name == r)
        .unwrap_or_else(|| panic!("no result for ({}, {})", l, r))
        .kind
}

const ALIGN_LEFT: &str = r#"module old_version

fn init(p: ptr) -> void {
entry:
  v: bits[64] = add(7, 1, id=1)
  store.2: void = store(v, p, align=4, id=2)
  ret.3: void = ret(id=3)
}
"#;

const ALIGN_RIGHT: &str = r#"module new_version

fn init(p: ptr) -> void {
entry:
  v: bits[64] = add(7, 1, id=1)
  store.2: void = store(v, p, align=8, id=2)
  ret.3: void = ret(id=3)
}
"#;

#[test]
fn alignment_only_diff_is_equal_when_tolerated() {
    let result = compare_with(
        ALIGN_LEFT,
        ALIGN_RIGHT,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("init", "init")],
    );
    assert_eq!(verdict_of(&result, "init", "init"), Verdict::Equal);
}

#[test]
fn alignment_only_diff_surfaces_when_flag_is_off() {
    let opts = BuiltinPatterns {
        struct_alignment: false,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(
        ALIGN_LEFT,
        ALIGN_RIGHT,
        opts,
        &PatternSet::empty(),
        &[("init", "init")],
    );
    assert_eq!(verdict_of(&result, "init", "init"), Verdict::NotEqual);
}

#[test]
fn flag_monotonicity_alignment_never_degrades() {
    // Turning the flag on flips NotEqual to Equal, never the reverse.
    for (flag, expected) in [(false, Verdict::NotEqual), (true, Verdict::Equal)] {
        let opts = BuiltinPatterns {
            struct_alignment: flag,
            ..BuiltinPatterns::default()
        };
        let result = compare_with(
            ALIGN_LEFT,
            ALIGN_RIGHT,
            opts,
            &PatternSet::empty(),
            &[("init", "init")],
        );
        assert_eq!(verdict_of(&result, "init", "init"), expected);
    }
}

const SPLIT_INLINED: &str = r#"module inlined_version

fn compute(x: bits[32]) -> bits[32] {
entry:
  t1: bits[32] = add(x, 1, id=1)
  t2: bits[32] = mul(t1, 2, id=2)
  r: bits[32] = sub(t2, 3, id=3)
  ret.4: void = ret(r, id=4)
}
"#;

const SPLIT_FACTORED: &str = r#"module factored_version

fn helper(v: bits[32]) -> bits[32] {
entry:
  h1: bits[32] = add(v, 1, id=1)
  h2: bits[32] = mul(h1, 2, id=2)
  ret.3: void = ret(h2, id=3)
}

fn compute(x: bits[32]) -> bits[32] {
entry:
  t: bits[32] = call(helper, x, id=1)
  r: bits[32] = sub(t, 3, id=2)
  ret.3: void = ret(r, id=3)
}
"#;

#[test]
fn function_split_resolves_through_inlining() {
    let result = compare_with(
        SPLIT_INLINED,
        SPLIT_FACTORED,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("compute", "compute")],
    );
    assert_eq!(verdict_of(&result, "compute", "compute"), Verdict::Equal);
    // The factored-out helper is not reported as not-equal on its own.
    assert!(!result
        .function_results
        .iter()
        .any(|fr| fr.right.name == "helper" && fr.kind == Verdict::NotEqual));
}

#[test]
fn function_split_is_symmetric() {
    let result = compare_with(
        SPLIT_FACTORED,
        SPLIT_INLINED,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("compute", "compute")],
    );
    assert_eq!(verdict_of(&result, "compute", "compute"), Verdict::Equal);
}

#[test]
fn function_split_not_equal_when_loop_is_disabled() {
    let opts = BuiltinPatterns {
        function_splits: false,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(
        SPLIT_INLINED,
        SPLIT_FACTORED,
        opts,
        &PatternSet::empty(),
        &[("compute", "compute")],
    );
    assert_eq!(verdict_of(&result, "compute", "compute"), Verdict::NotEqual);
}

#[test]
fn suffix_renamed_declarations_are_equal() {
    let left = r#"module a

decl foo(bits[32]) -> void
"#;
    let right = r#"module b

decl foo.17(bits[32]) -> void
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("foo", "foo.17")],
    );
    assert_eq!(verdict_of(&result, "foo", "foo.17"), Verdict::Equal);
}

const PRINT_LEFT: &str = r#"module old_version

macro __LINE__ = "at line 42"

decl printk(ptr, ...) -> void

fn report() -> void {
entry:
  call.1: void = call(printk, "at line 42", id=1)
  ret.2: void = ret(id=2)
}
"#;

const PRINT_RIGHT: &str = r#"module new_version

macro __LINE__ = "at line 57"

decl printk(ptr, ...) -> void

fn report() -> void {
entry:
  call.1: void = call(printk, "at line 57", id=1)
  ret.2: void = ret(id=2)
}
"#;

#[test]
fn macro_sourced_print_diff_is_equal_with_attached_syntax_difference() {
    let result = compare_with(
        PRINT_LEFT,
        PRINT_RIGHT,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("report", "report")],
    );
    assert_eq!(verdict_of(&result, "report", "report"), Verdict::Equal);
    let report = result
        .function_results
        .iter()
        .find(|fr| fr.left.name == "report")
        .unwrap();
    let syntax: Vec<_> = report
        .differing_objects
        .iter()
        .filter_map(|d| match d {
            NonFunctionDifference::Syntax(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(syntax.len(), 1);
    assert_eq!(syntax[0].name, "__LINE__");
    assert_eq!(syntax[0].body_left, "at line 42");
    assert_eq!(syntax[0].body_right, "at line 57");
}

#[test]
fn missing_definition_surfaces_from_declaration_pair() {
    let left = r#"module old_version

decl b() -> void

fn a() -> void {
entry:
  call.1: void = call(b, id=1)
  ret.2: void = ret(id=2)
}
"#;
    let right = r#"module new_version

fn b() -> void {
entry:
  ret.1: void = ret(id=1)
}

fn a() -> void {
entry:
  call.1: void = call(b, id=1)
  ret.2: void = ret(id=2)
}
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("a", "a")],
    );
    assert_eq!(verdict_of(&result, "a", "a"), Verdict::Equal);
    assert_eq!(verdict_of(&result, "b", "b"), Verdict::Unknown);
    assert!(result
        .missing_defs
        .iter()
        .any(|md| md.left.as_deref() == Some("b") && md.right.is_none()));
}

const CFO_LEFT: &str = r#"module old_version

fn classify(x: bits[32]) -> bits[32] {
entry:
  c: bits[1] = icmp(slt, x, 10, id=1)
  br_if.2: void = br_if(c, small, big, id=2)
small:
  a: bits[32] = add(x, 1, id=3)
  ret.4: void = ret(a, id=4)
big:
  b: bits[32] = mul(x, 3, id=5)
  ret.6: void = ret(b, id=6)
}
"#;

const CFO_RIGHT: &str = r#"module new_version

fn classify(x: bits[32]) -> bits[32] {
entry:
  c: bits[1] = icmp(slt, x, 99, id=1)
  br_if.2: void = br_if(c, small, big, id=2)
small:
  a: bits[32] = add(x, 7, id=3)
  ret.4: void = ret(a, id=4)
big:
  b: bits[32] = mul(x, 5, id=5)
  ret.6: void = ret(b, id=6)
}
"#;

#[test]
fn control_flow_only_ignores_data_differences() {
    let opts = BuiltinPatterns {
        control_flow_only: true,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(
        CFO_LEFT,
        CFO_RIGHT,
        opts,
        &PatternSet::empty(),
        &[("classify", "classify")],
    );
    assert_eq!(verdict_of(&result, "classify", "classify"), Verdict::Equal);
}

#[test]
fn data_differences_matter_without_control_flow_only() {
    let result = compare_with(
        CFO_LEFT,
        CFO_RIGHT,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("classify", "classify")],
    );
    assert_eq!(
        verdict_of(&result, "classify", "classify"),
        Verdict::NotEqual
    );
}

#[test]
fn compare_is_reflexive() {
    let result = compare_with(
        CFO_LEFT,
        CFO_LEFT,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("classify", "classify")],
    );
    assert_eq!(verdict_of(&result, "classify", "classify"), Verdict::Equal);
}

#[test]
fn verdicts_are_symmetric() {
    let cases = [
        (CFO_LEFT, CFO_RIGHT, "classify"),
        (ALIGN_LEFT, ALIGN_RIGHT, "init"),
    ];
    for (l, r, name) in cases {
        let a = compare_with(
            l,
            r,
            BuiltinPatterns::default(),
            &PatternSet::empty(),
            &[(name, name)],
        );
        let b = compare_with(
            r,
            l,
            BuiltinPatterns::default(),
            &PatternSet::empty(),
            &[(name, name)],
        );
        assert_eq!(verdict_of(&a, name, name), verdict_of(&b, name, name));
    }
}

#[test]
fn dead_code_differences_are_tolerated() {
    let left = r#"module old_version

global sink: bits[32]

fn f(x: bits[32]) -> void {
entry:
  unused: bits[32] = add(x, 5, id=1)
  store.2: void = store(x, @sink, align=4, id=2)
  ret.3: void = ret(id=3)
}
"#;
    let right = r#"module new_version

global sink: bits[32]

fn f(x: bits[32]) -> void {
entry:
  store.1: void = store(x, @sink, align=4, id=1)
  ret.2: void = ret(id=2)
}
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("f", "f")],
    );
    assert_eq!(verdict_of(&result, "f", "f"), Verdict::Equal);

    let opts = BuiltinPatterns {
        dead_code: false,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(left, right, opts, &PatternSet::empty(), &[("f", "f")]);
    assert_eq!(verdict_of(&result, "f", "f"), Verdict::NotEqual);
}

#[test]
fn numerical_macro_change_is_equal_with_diff_attached() {
    let left = r#"module old_version

macro BUF_SIZE = "64"

fn size_of(x: bits[32]) -> bits[32] {
entry:
  t: bits[32] = add(x, 64, id=1)
  ret.2: void = ret(t, id=2)
}
"#;
    let right = r#"module new_version

macro BUF_SIZE = "128"

fn size_of(x: bits[32]) -> bits[32] {
entry:
  t: bits[32] = add(x, 128, id=1)
  ret.2: void = ret(t, id=2)
}
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("size_of", "size_of")],
    );
    assert_eq!(verdict_of(&result, "size_of", "size_of"), Verdict::Equal);
    let fr = &result.function_results[0];
    assert!(fr.differing_objects.iter().any(|d| matches!(
        d,
        NonFunctionDifference::Syntax(s) if s.name == "BUF_SIZE"
    )));

    let opts = BuiltinPatterns {
        numerical_macros: false,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(
        left,
        right,
        opts,
        &PatternSet::empty(),
        &[("size_of", "size_of")],
    );
    assert_eq!(
        verdict_of(&result, "size_of", "size_of"),
        Verdict::NotEqual
    );
}

#[test]
fn width_preserving_cast_is_tolerated_only_when_enabled() {
    let left = r#"module old_version

fn f(x: bits[32]) -> bits[32] {
entry:
  y: bits[32] = bitcast(x, id=1)
  r: bits[32] = add(y, 1, id=2)
  ret.3: void = ret(r, id=3)
}
"#;
    let right = r#"module new_version

fn f(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(x, 1, id=1)
  ret.2: void = ret(r, id=2)
}
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("f", "f")],
    );
    assert_eq!(verdict_of(&result, "f", "f"), Verdict::NotEqual);

    let opts = BuiltinPatterns {
        type_casts: true,
        ..BuiltinPatterns::default()
    };
    let result = compare_with(left, right, opts, &PatternSet::empty(), &[("f", "f")]);
    assert_eq!(verdict_of(&result, "f", "f"), Verdict::Equal);
}

const SHIFT_PATTERN: &str = r#"module shift_pattern

fn new_shift(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = shl(x, 1, id=1, meta=[pattern-start, pattern-end])
  ret.2: void = ret(r, id=2)
}

fn old_shift(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = mul(x, 2, id=1, meta=[pattern-start, pattern-end])
  ret.2: void = ret(r, id=2)
}

fn mapping() -> void {
entry:
  call.1: void = call(pair, "r", "r", id=1)
  ret.2: void = ret(id=2)
}
"#;

const MUL_LEFT: &str = r#"module old_version

fn double(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = mul(x, 2, id=1)
  ret.2: void = ret(r, id=2)
}
"#;

const SHL_RIGHT: &str = r#"module new_version

fn double(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = shl(x, 1, id=1)
  ret.2: void = ret(r, id=2)
}
"#;

#[test]
fn user_pattern_suppresses_known_equivalent_diff() {
    let result = compare_with(
        MUL_LEFT,
        SHL_RIGHT,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("double", "double")],
    );
    assert_eq!(verdict_of(&result, "double", "double"), Verdict::NotEqual);

    let mut patterns = PatternSet::empty();
    patterns.add_module_text(SHIFT_PATTERN).unwrap();
    let result = compare_with(
        MUL_LEFT,
        SHL_RIGHT,
        BuiltinPatterns::default(),
        &patterns,
        &[("double", "double")],
    );
    assert_eq!(verdict_of(&result, "double", "double"), Verdict::Equal);
}

#[test]
fn loading_a_pattern_twice_does_not_change_verdicts() {
    let mut once = PatternSet::empty();
    once.add_module_text(SHIFT_PATTERN).unwrap();
    let mut twice = PatternSet::empty();
    twice.add_module_text(SHIFT_PATTERN).unwrap();
    twice.add_module_text(SHIFT_PATTERN).unwrap();

    let a = compare_with(
        MUL_LEFT,
        SHL_RIGHT,
        BuiltinPatterns::default(),
        &once,
        &[("double", "double")],
    );
    let b = compare_with(
        MUL_LEFT,
        SHL_RIGHT,
        BuiltinPatterns::default(),
        &twice,
        &[("double", "double")],
    );
    assert_eq!(
        verdict_of(&a, "double", "double"),
        verdict_of(&b, "double", "double")
    );
}

#[test]
fn differing_aggregate_layout_reports_a_type_difference() {
    let left = r#"module old_version

file_number 0 "include/pair.h"

struct pair = { bits[32], bits[64] } pos=(0,12)

fn first(p: ptr) -> bits[32] {
entry:
  f: ptr = field_addr(p, struct=pair, index=0, id=1)
  v: bits[32] = load(f, align=4, id=2)
  ret.3: void = ret(v, id=3)
}
"#;
    let right = r#"module new_version

file_number 0 "include/pair.h"

struct pair = { bits[32], bits[32] } pos=(0,14)

fn first(p: ptr) -> bits[32] {
entry:
  f: ptr = field_addr(p, struct=pair, index=0, id=1)
  v: bits[32] = load(f, align=4, id=2)
  ret.3: void = ret(v, id=3)
}
"#;
    let result = compare_with(
        left,
        right,
        BuiltinPatterns::default(),
        &PatternSet::empty(),
        &[("first", "first")],
    );
    let fr = &result.function_results[0];
    let type_diffs: Vec<_> = fr
        .differing_objects
        .iter()
        .filter_map(|d| match d {
            NonFunctionDifference::Type(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(type_diffs.len(), 1);
    assert_eq!(type_diffs[0].name, "pair");
    assert_eq!(type_diffs[0].file_left, "include/pair.h");
    assert_eq!(type_diffs[0].line_left, 12);
    assert_eq!(type_diffs[0].line_right, 14);
}
