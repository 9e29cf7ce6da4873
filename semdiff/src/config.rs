// SPDX-License-Identifier: Apache-2.0

//! Configuration of the comparison engine: the builtin benign-pattern flags
//! and the pattern-catalogue file.

use serde::Deserialize;

/// Independently toggled builtin patterns of syntactic change that are
/// treated as semantically equal.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuiltinPatterns {
    /// Changes in aggregate alignment on loads, stores, and allocas.
    pub struct_alignment: bool,
    /// Splitting code into functions (drives the inlining feedback loop).
    pub function_splits: bool,
    /// Changing unused return values to void.
    pub unused_return_types: bool,
    /// Changes in calls to diagnostic print functions whose differing
    /// arguments are strings, file names, line numbers, or macro-sourced.
    pub kernel_prints: bool,
    /// Changes in dead code.
    pub dead_code: bool,
    /// Changed numerical value of a macro.
    pub numerical_macros: bool,
    /// Bit-width-preserving pointer/integer casts.
    pub type_casts: bool,
    /// Ignore all data differences; compare block-graph shape and
    /// terminator kinds only.
    pub control_flow_only: bool,
}

impl Default for BuiltinPatterns {
    fn default() -> Self {
        Self {
            struct_alignment: true,
            function_splits: true,
            unused_return_types: true,
            kernel_prints: true,
            dead_code: true,
            numerical_macros: true,
            type_casts: false,
            control_flow_only: false,
        }
    }
}

/// Behavior when a configured pattern module fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnParseFailure {
    Warn,
    Abort,
}

impl Default for OnParseFailure {
    fn default() -> Self {
        OnParseFailure::Warn
    }
}

/// The pattern-catalogue configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct PatternConfig {
    #[serde(default)]
    pub on_parse_failure: OnParseFailure,
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl PatternConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read pattern config {}: {}", path.display(), e))?;
        Self::from_toml_str(&text).map_err(|e| format!("malformed pattern config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_catalogue() {
        let p = BuiltinPatterns::default();
        assert!(p.struct_alignment);
        assert!(p.function_splits);
        assert!(p.unused_return_types);
        assert!(p.kernel_prints);
        assert!(p.dead_code);
        assert!(p.numerical_macros);
        assert!(!p.type_casts);
        assert!(!p.control_flow_only);
    }

    #[test]
    fn pattern_config_parses_kebab_case_keys() {
        let cfg = PatternConfig::from_toml_str(
            r#"
on-parse-failure = "abort"
patterns = ["patterns/shift.ir", "patterns/clamp.ir"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.on_parse_failure, OnParseFailure::Abort);
        assert_eq!(cfg.patterns.len(), 2);
    }

    #[test]
    fn pattern_config_defaults_to_warn() {
        let cfg = PatternConfig::from_toml_str("patterns = []").unwrap();
        assert_eq!(cfg.on_parse_failure, OnParseFailure::Warn);
    }
}
