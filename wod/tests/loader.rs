use std::io::Write;

use wod::loader::Loader;
use wod::{Fragment, RoundsValue, TimerDirection, TimerValue, Workout, hints};

fn load(source: &str) -> Workout {
    Loader::new(source.to_string(), 0)
        .load()
        .expect("load failed")
        .workout
}

const CINDY: &str = r#"
title = "Cindy"

[[statement]]
hints = ["behavior.time_bound"]
fragments = [
    { kind = "timer", duration = "20:00" },
    { kind = "action", value = "AMRAP" },
]

    [[statement.children]]
    fragments = [{ kind = "rep", value = 5 }, { kind = "effort", value = "Pullups" }]

    [[statement.children]]
    fragments = [{ kind = "rep", value = 10 }, { kind = "effort", value = "Pushups" }]

    [[statement.children]]
    fragments = [{ kind = "rep", value = 15 }, { kind = "effort", value = "Air Squats" }]
"#;

#[test]
fn loads_nested_statements() {
    let workout = load(CINDY);
    assert_eq!(workout.title.as_deref(), Some("Cindy"));
    assert_eq!(workout.statements.len(), 1);

    let amrap = &workout.statements[0];
    assert!(amrap.has_hint(hints::TIME_BOUND));
    assert_eq!(amrap.timer(), Some(&TimerValue::countdown_secs(1200)));
    assert_eq!(amrap.children.len(), 3);
    assert_eq!(
        amrap.children[1].fragments,
        vec![Fragment::Rep(10), Fragment::Effort("Pushups".into())]
    );
}

#[test]
fn statements_carry_source_spans() {
    let workout = load(CINDY);
    let amrap = &workout.statements[0];
    let span = amrap.span.clone().expect("top-level span");
    let child_span = amrap.children[0].span.clone().expect("child span");
    assert!(span.start < span.end);
    assert!(child_span.start < child_span.end);
    assert!(span.start < child_span.start);
}

#[test]
fn timer_durations_accept_seconds_and_direction() {
    let workout = load(
        r#"
[[statement]]
fragments = [{ kind = "timer", duration = 90, direction = "up" }]
"#,
    );
    assert_eq!(
        workout.statements[0].timer(),
        Some(&TimerValue {
            millis: 90_000,
            direction: TimerDirection::Up
        })
    );
}

#[test]
fn non_positive_durations_survive_loading() {
    let workout = load(
        r#"
[[statement]]
fragments = [{ kind = "timer", duration = 0 }]
"#,
    );
    assert_eq!(workout.statements[0].timer().map(|t| t.millis), Some(0));
}

#[test]
fn rep_scheme_infers_count() {
    let workout = load(
        r#"
[[statement]]
fragments = [{ kind = "rounds", scheme = [21, 15, 9] }]
"#,
    );
    assert_eq!(
        workout.statements[0].rounds(),
        Some(&RoundsValue::scheme(vec![21, 15, 9]))
    );
}

#[test]
fn invalid_clock_text_is_an_error() {
    let result = Loader::new(
        r#"
[[statement]]
fragments = [{ kind = "timer", duration = "soon" }]
"#
        .to_string(),
        3,
    )
    .load();
    let errors = result.expect_err("expected load error");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("invalid timer duration"));
    assert_eq!(errors[0].file_id, 3);
}

#[test]
fn toml_syntax_errors_are_located() {
    let errors = Loader::new("[[statement]\n".to_string(), 0)
        .load()
        .expect_err("expected syntax error");
    assert!(!errors[0].is_warning());
}

#[test]
fn unknown_hints_are_warnings() {
    let loaded = Loader::new(
        r#"
[[statement]]
hints = ["behavior.mystery"]
fragments = [{ kind = "effort", value = "Burpees" }]
"#
        .to_string(),
        0,
    )
    .load()
    .expect("load failed");
    assert_eq!(loaded.warnings.len(), 1);
    assert!(loaded.warnings[0].is_warning());
    assert!(loaded.workout.statements[0].has_hint("behavior.mystery"));
}

#[test]
fn load_file_reads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CINDY.as_bytes()).expect("write");
    let loaded = Workout::load_file(file.path(), 0).expect("load failed");
    assert_eq!(loaded.workout.statements[0].children.len(), 3);
}

#[test]
fn load_file_reports_missing_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let errors = Workout::load_file(dir.path().join("missing.toml"), 0)
        .expect_err("expected read error");
    assert!(errors[0].message.contains("cannot read"));
}

#[test]
fn errors_name_the_offending_key() {
    let errors = Loader::new(
        r#"
[[statement]]
fragments = [{ kind = "action", value = "Warm-up" }]

[[statement]]
fragments = [{ kind = "rounds", count = 3 }]

    [[statement.children]]
    fragments = [{ kind = "effort", value = "Row" }, { kind = "timer", duration = "later" }]
"#
        .to_string(),
        0,
    )
    .load()
    .expect_err("expected load error");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].key_path.as_deref(),
        Some("statement[1].children[0].fragments[1]")
    );
    assert!(errors[0].span.is_some());
    assert!(errors[0].help.as_deref().is_some_and(|h| h.contains("1:30")));
}

#[test]
fn unknown_hint_warnings_point_at_the_hint() {
    let loaded = Loader::new(
        r#"
[[statement]]
hints = ["behavior.effort", "behavior.tabata"]
fragments = [{ kind = "effort", value = "Situps" }]
"#
        .to_string(),
        0,
    )
    .load()
    .expect("load failed");
    assert_eq!(loaded.warnings[0].key_path.as_deref(), Some("statement[0].hints[1]"));
}
