// SPDX-License-Identifier: Apache-2.0

//! Command line driver for the semantic-diff engine.
//!
//! Usage:
//!
//! ```text
//! semdiff-driver --first old.ir --second new.ir [--fn name[:name]]...
//! ```
//!
//! `--first` holds the old version of the module, `--second` the new one.
//! Without `--fn`, every function name present in both modules is compared.
//! Builtin benign patterns can be toggled individually; a TOML catalogue of
//! custom patterns is loaded via `--pattern-config`.

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction};

use semdiff::config::{BuiltinPatterns, PatternConfig};
use semdiff::module_comparator::ModuleComparator;
use semdiff::pattern::PatternSet;
use semdiff::result::{NonFunctionDifference, OverallResult, Verdict};
use semdiff_ir::ir_parser;

trait AppExt {
    fn add_bool_arg(self, long: &'static str, help: &'static str) -> Self;
}

impl AppExt for clap::Command {
    fn add_bool_arg(self, long: &'static str, help: &'static str) -> Self {
        (self as clap::Command).arg(
            Arg::new(long)
                .long(long)
                .help(help)
                .action(ArgAction::SetTrue),
        )
    }
}

fn build_command() -> clap::Command {
    clap::Command::new("semdiff-driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compares two versions of an IR module for semantic equivalence")
        .arg(
            Arg::new("first")
                .long("first")
                .value_name("FIRST_IR_FILE")
                .help("The old version of the module")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("second")
                .long("second")
                .value_name("SECOND_IR_FILE")
                .help("The new version of the module")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("fn")
                .long("fn")
                .value_name("NAME[:NAME]")
                .help("Function pair to compare; repeatable. Defaults to all shared names")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("pattern_config")
                .long("pattern-config")
                .value_name("TOML_FILE")
                .help("Pattern catalogue configuration file")
                .action(ArgAction::Set),
        )
        .add_bool_arg("type-casts", "Treat width-preserving casts as equal")
        .add_bool_arg(
            "control-flow-only",
            "Compare block-graph shape and terminator kinds only",
        )
        .add_bool_arg("no-struct-alignment", "Report alignment-only differences")
        .add_bool_arg("no-function-splits", "Disable the inlining feedback loop")
        .add_bool_arg(
            "no-unused-return-types",
            "Report unused-return-type differences",
        )
        .add_bool_arg("no-kernel-prints", "Report diagnostic print differences")
        .add_bool_arg("no-dead-code", "Report dead-code differences")
        .add_bool_arg("no-numerical-macros", "Report numerical macro differences")
        .add_bool_arg("print-callstacks", "Print call stacks for differences")
        .add_bool_arg("json", "Emit the overall result as JSON")
}

fn patterns_from_matches(matches: &clap::ArgMatches) -> BuiltinPatterns {
    let mut opts = BuiltinPatterns::default();
    opts.struct_alignment = !matches.get_flag("no-struct-alignment");
    opts.function_splits = !matches.get_flag("no-function-splits");
    opts.unused_return_types = !matches.get_flag("no-unused-return-types");
    opts.kernel_prints = !matches.get_flag("no-kernel-prints");
    opts.dead_code = !matches.get_flag("no-dead-code");
    opts.numerical_macros = !matches.get_flag("no-numerical-macros");
    opts.type_casts = matches.get_flag("type-casts");
    opts.control_flow_only = matches.get_flag("control-flow-only");
    opts
}

fn parse_seed(spec: &str) -> (String, String) {
    match spec.split_once(':') {
        Some((l, r)) => (l.to_string(), r.to_string()),
        None => (spec.to_string(), spec.to_string()),
    }
}

fn print_human(result: &OverallResult, print_callstacks: bool) {
    for fr in result.function_results.iter() {
        let kind = match fr.kind {
            Verdict::Equal => "equal",
            Verdict::AssumedEqual => "assumed-equal",
            Verdict::NotEqual => "not-equal",
            Verdict::Unknown => "unknown",
        };
        println!("{} <-> {}: {}", fr.left.name, fr.right.name, kind);
        for obj in fr.differing_objects.iter() {
            match obj {
                NonFunctionDifference::Syntax(d) => {
                    println!("  syntax difference in {}: {:?} vs {:?}", d.name, d.body_left, d.body_right);
                    if print_callstacks {
                        for c in d.stack_left.iter() {
                            println!("    left:  {} ({}:{})", c.function, c.file, c.line);
                        }
                        for c in d.stack_right.iter() {
                            println!("    right: {} ({}:{})", c.function, c.file, c.line);
                        }
                    }
                }
                NonFunctionDifference::Type(d) => {
                    println!(
                        "  type difference in {}: {}:{} vs {}:{}",
                        d.name, d.file_left, d.line_left, d.file_right, d.line_right
                    );
                }
            }
        }
    }
    for md in result.missing_defs.iter() {
        match (&md.left, &md.right) {
            (Some(l), None) => println!("missing definition on the left: {}", l),
            (None, Some(r)) => println!("missing definition on the right: {}", r),
            (Some(l), Some(r)) => println!("missing definitions: {} / {}", l, r),
            (None, None) => {}
        }
    }
}

fn run() -> Result<()> {
    let matches = build_command().get_matches();

    let first = matches.get_one::<String>("first").unwrap();
    let second = matches.get_one::<String>("second").unwrap();
    let left = ir_parser::parse_path_to_module(std::path::Path::new(first))
        .with_context(|| format!("failed to parse {}", first))?;
    let right = ir_parser::parse_path_to_module(std::path::Path::new(second))
        .with_context(|| format!("failed to parse {}", second))?;
    log::info!(
        "comparing {} ({} functions) against {} ({} functions)",
        left.name,
        left.functions.len(),
        right.name,
        right.functions.len()
    );

    let patterns = match matches.get_one::<String>("pattern_config") {
        Some(path) => {
            let config = PatternConfig::from_path(std::path::Path::new(path))
                .map_err(|e| anyhow!(e))?;
            let set = PatternSet::load(&config)?;
            log::info!("loaded {} patterns", set.len());
            set
        }
        None => PatternSet::empty(),
    };

    let seeds: Vec<(String, String)> = match matches.get_many::<String>("fn") {
        Some(values) => values.map(|s| parse_seed(s)).collect(),
        None => {
            // All function names defined in both modules, in left order.
            left.functions
                .iter()
                .filter(|f| right.get_fn(&f.name).is_some())
                .map(|f| (f.name.clone(), f.name.clone()))
                .collect()
        }
    };
    if seeds.is_empty() {
        return Err(anyhow!("no function pairs to compare"));
    }

    let opts = patterns_from_matches(&matches);
    let mut comparator = ModuleComparator::new(left, right, opts, &patterns);
    let result = comparator
        .compare_pairs(&seeds)
        .map_err(|e| anyhow!(e))?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_human(&result, matches.get_flag("print-callstacks"));
    }
    Ok(())
}

fn main() {
    let _ = env_logger::try_init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
