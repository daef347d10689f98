use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use runtime::{CompilerConfig, DriveConfig, JitCompiler, RuntimeEvent, SimulationReport, simulate};
use wod::loader::Loader;

use crate::settings::Settings;

const SCENARIO_SUFFIX: &str = ".test.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedWarning {
    /// Substring that must appear in the warning message.
    pub contains: String,

    /// If set, the warning's span must start on this 1-based source line.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Replaces the `[compiler]` settings for this scenario.
    #[serde(default)]
    pub compiler: Option<CompilerConfig>,

    /// Replaces the `[drive]` settings for this scenario.
    #[serde(default)]
    pub drive: Option<DriveConfig>,

    /// Load or compile must fail with a message containing this substring.
    #[serde(default)]
    pub expect_error: Option<String>,

    /// Round start times in whole seconds, in emission order.
    #[serde(default)]
    pub expect_rounds: Option<Vec<u64>>,

    /// Restrict `expect_rounds` to the block with this label.
    #[serde(default)]
    pub rounds_block: Option<String>,

    /// Cue identifiers in emission order.
    #[serde(default)]
    pub expect_cues: Option<Vec<String>>,

    /// Expected warnings. If present (even empty), warning count and content are checked.
    #[serde(default)]
    pub expect_warnings: Option<Vec<ExpectedWarning>>,

    /// Clock reading, in seconds, when the workout finished.
    #[serde(default)]
    pub expect_end_secs: Option<u64>,
}

/// A scenario is a workout document with an extra `[test]` table.
/// The loader ignores the table, so the same text serves both.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    test: TestConfig,
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

/// A warning from either the loader or the runtime.
struct Warning {
    message: String,
    span: Option<Range<usize>>,
}

fn run_single_test(path: &Path, settings: &Settings) -> TestResult {
    let fail = |description: Option<String>, reason: String| TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(reason),
    };

    let source = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return fail(None, format!("cannot read file: {}", e)),
    };

    let config = match toml::from_str::<ScenarioFile>(&source) {
        Ok(file) => file.test,
        Err(e) => return fail(None, format!("[test] table error: {}", e.message())),
    };
    let description = config.description.clone();

    let outcome = match evaluate(&source, &config, settings) {
        Ok(()) => TestOutcome::Pass,
        Err(reason) => TestOutcome::Fail(reason),
    };
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome,
    }
}

/// Load, compile and simulate one scenario. Returns the first mismatch.
fn evaluate(source: &str, config: &TestConfig, settings: &Settings) -> Result<(), String> {
    let loaded = match Loader::new(source.to_string(), 0).load() {
        Ok(loaded) => loaded,
        Err(errors) => {
            let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
            return match &config.expect_error {
                Some(expected) if messages.iter().any(|m| m.contains(expected.as_str())) => Ok(()),
                Some(expected) => Err(format!(
                    "expected error containing \"{}\", got load errors: {}",
                    expected,
                    messages.join("; ")
                )),
                None => Err(format!("unexpected load error: {}", messages.join("; "))),
            };
        }
    };

    let compiler_config = config.compiler.clone().unwrap_or_else(|| settings.compiler.clone());
    let compiled = JitCompiler::new(compiler_config).compile_workout(&loaded.workout);
    let tree = match (compiled, &config.expect_error) {
        (Err(err), Some(expected)) => {
            let message = err.to_string();
            return if message.contains(expected.as_str()) {
                Ok(())
            } else {
                Err(format!("expected error containing \"{}\", got: {}", expected, message))
            };
        }
        (Err(err), None) => return Err(format!("unexpected compile error: {}", err)),
        (Ok(_), Some(expected)) => {
            return Err(format!(
                "expected error containing \"{}\", but the workout compiled",
                expected
            ));
        }
        (Ok(tree), None) => tree,
    };

    let rounds_block = match &config.rounds_block {
        Some(label) => Some(
            tree.find_by_label(label)
                .ok_or_else(|| format!("no block labelled \"{}\"", label))?,
        ),
        None => None,
    };

    let drive = config.drive.clone().unwrap_or_else(|| settings.drive.clone());
    let report = simulate(tree, &drive);
    if !report.completed {
        return Err(format!("workout still running at {} (max_secs reached)", report.end));
    }

    if let Some(expected) = &config.expect_rounds {
        let actual = round_start_secs(&report, rounds_block);
        if &actual != expected {
            return Err(format!(
                "round starts mismatch\n  expected: {:?}\n  actual:   {:?}",
                expected, actual
            ));
        }
    }

    if let Some(expected) = &config.expect_cues {
        let actual: Vec<String> = report.cues.iter().map(|c| c.cue.id()).collect();
        if &actual != expected {
            return Err(format!(
                "cue mismatch\n  expected: {}\n  actual:   {}",
                expected.join(", "),
                actual.join(", ")
            ));
        }
    }

    if let Some(expected) = &config.expect_warnings {
        let mut warnings: Vec<Warning> = loaded
            .warnings
            .iter()
            .map(|w| Warning {
                message: w.message.clone(),
                span: w.span.clone(),
            })
            .collect();
        warnings.extend(report.warnings().into_iter().map(|w| Warning {
            message: w.to_string(),
            span: None,
        }));
        if let Some(reason) = check_warnings(source, &warnings, expected) {
            return Err(reason);
        }
    }

    if let Some(expected) = config.expect_end_secs {
        let actual = report.end.as_millis();
        if actual != expected.saturating_mul(1000) {
            return Err(format!("expected to finish at {}s, finished at {}", expected, report.end));
        }
    }

    Ok(())
}

/// Whole seconds of each round start, optionally for one block only.
fn round_start_secs(report: &SimulationReport, block: Option<runtime::BlockId>) -> Vec<u64> {
    report
        .events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::RoundStarted { block: b, at, .. } if block.is_none_or(|want| want == *b) => {
                Some(at.as_millis() / 1000)
            }
            _ => None,
        })
        .collect()
}

/// Convert a byte offset in `source` to a 1-based line number.
fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

/// Check that actual warnings match expectations. Returns `Some(reason)` on mismatch.
fn check_warnings(source: &str, actual: &[Warning], expected: &[ExpectedWarning]) -> Option<String> {
    if actual.len() != expected.len() {
        let actual_msgs: Vec<String> = actual.iter().map(|w| format!("  - {}", w.message)).collect();
        return Some(format!(
            "expected {} warning(s), got {}\n  actual warnings:\n{}",
            expected.len(),
            actual.len(),
            if actual_msgs.is_empty() {
                "    (none)".to_string()
            } else {
                actual_msgs.join("\n")
            }
        ));
    }

    for (i, (actual, expected)) in actual.iter().zip(expected.iter()).enumerate() {
        if !actual.message.contains(&expected.contains) {
            return Some(format!(
                "warning[{}]: expected message containing \"{}\", got: {}",
                i, expected.contains, actual.message
            ));
        }

        if let Some(expected_line) = expected.line {
            match &actual.span {
                Some(span) => {
                    let actual_line = byte_offset_to_line(source, span.start);
                    if actual_line != expected_line {
                        return Some(format!(
                            "warning[{}]: expected on line {}, but span is on line {}",
                            i, expected_line, actual_line
                        ));
                    }
                }
                None => {
                    return Some(format!(
                        "warning[{}]: expected on line {}, but warning has no span",
                        i, expected_line
                    ));
                }
            }
        }
    }

    None
}

/// Discover scenario files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(SCENARIO_SUFFIX) {
                let category = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.entry(category).or_default().push(path);
            }
        }
    }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no {} files found in {}", SCENARIO_SUFFIX, path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn test_label<'a>(result: &'a TestResult) -> &'a str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.trim_end_matches(SCENARIO_SUFFIX))
            .unwrap_or("?")
    })
}

fn print_failures(failures: &[TestResult]) {
    eprintln!();
    eprintln!("failures:");
    for f in failures {
        eprintln!();
        eprintln!("  --- {} ---", f.path.display());
        if let TestOutcome::Fail(reason) = &f.outcome {
            for line in reason.lines() {
                eprintln!("  {}", line);
            }
        }
    }
}

/// Run every scenario under `path` (or a single file).
/// If `categories` is non-empty, only run scenarios in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String], settings: &Settings) -> i32 {
    let run_categories: BTreeMap<String, Vec<PathBuf>> = if path.is_file() {
        BTreeMap::from([(String::new(), vec![path.to_path_buf()])])
    } else {
        let all_categories = discover_categorized(path);
        if all_categories.is_empty() {
            eprintln!("no {} files found in {}", SCENARIO_SUFFIX, path.display());
            return 1;
        }
        select_categories(all_categories, categories)
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        if !path.is_file() {
            let header = if cat.is_empty() { "(root)" } else { cat.as_str() };
            eprintln!();
            eprintln!("{}", bold(header, no_color));
        }

        for file in files {
            let result = run_single_test(file, settings);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", pass_label(no_color), test_label(&result));
                }
                TestOutcome::Fail(_) => {
                    eprintln!("  {}  {}", fail_label(no_color), test_label(&result));
                    failures.push(result);
                }
            }
        }
    }

    if !failures.is_empty() {
        print_failures(&failures);
    }

    eprintln!();
    let failed = failures.len();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let verdict = if no_color { "FAILED" } else { "\x1b[31mFAILED\x1b[0m" };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            verdict,
            passed,
            failed,
            passed + failed
        );
        1
    }
}

fn select_categories(
    all_categories: BTreeMap<String, Vec<PathBuf>>,
    requested: &[String],
) -> BTreeMap<String, Vec<PathBuf>> {
    if requested.is_empty() {
        return all_categories;
    }
    let mut filtered = BTreeMap::new();
    for req in requested {
        let req = req.trim_matches('/');
        let mut found = false;
        for (cat, files) in &all_categories {
            if cat == req || cat.starts_with(&format!("{}/", req)) {
                filtered.insert(cat.clone(), files.clone());
                found = true;
            }
        }
        if !found {
            eprintln!(
                "warning: category '{}' not found (available: {})",
                req,
                all_categories
                    .keys()
                    .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
    filtered
}
