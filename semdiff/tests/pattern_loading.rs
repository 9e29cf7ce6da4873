// SPDX-License-Identifier: Apache-2.0

//! Loading the pattern catalogue from a configuration file on disk.

use std::io::Write;

use semdiff::config::PatternConfig;
use semdiff::pattern::PatternSet;

const GOOD_PATTERN: &str = r#"module shift_pattern

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
"#;

const BAD_PATTERN: &str = r#"module broken

fn new_p(x: bits[32]) -> bits[32] {
entry:
  r: bits[32] = add(x, 1, id=1, meta=[pattern-start])
  ret.2: void = ret(r, id=2)
}
"#;

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn loads_patterns_listed_in_config() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_file(&dir, "shift.ir", GOOD_PATTERN);
    let config = PatternConfig::from_toml_str(&format!("patterns = [{:?}]", good)).unwrap();
    let set = PatternSet::load(&config).unwrap();
    assert_eq!(set.len(), 1);
}

#[test]
fn warn_skips_malformed_pattern_modules() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_file(&dir, "shift.ir", GOOD_PATTERN);
    let bad = write_file(&dir, "broken.ir", BAD_PATTERN);
    let config = PatternConfig::from_toml_str(&format!(
        "on-parse-failure = \"warn\"\npatterns = [{:?}, {:?}]",
        bad, good
    ))
    .unwrap();
    let set = PatternSet::load(&config).unwrap();
    assert_eq!(set.len(), 1);
}

#[test]
fn abort_fails_loading_on_malformed_pattern_modules() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write_file(&dir, "broken.ir", BAD_PATTERN);
    let config = PatternConfig::from_toml_str(&format!(
        "on-parse-failure = \"abort\"\npatterns = [{:?}]",
        bad
    ))
    .unwrap();
    assert!(PatternSet::load(&config).is_err());
}

#[test]
fn missing_pattern_file_is_subject_to_the_same_policy() {
    let config =
        PatternConfig::from_toml_str("patterns = [\"/nonexistent/nowhere.ir\"]").unwrap();
    let set = PatternSet::load(&config).unwrap();
    assert!(set.is_empty());
}
