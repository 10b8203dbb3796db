//! CLI integration tests
//!
//! Runs the tumblerctl binary with HOME pointed at a scratch directory so no
//! user config is picked up.

use std::path::Path;
use std::process::{Command, Output};

const BARS: &str = r#"
[[sources]]
name = "ticks"
topic = "fx.ticks"
shape = "stream"
partitions = 3
fields = [
    { name = "Symbol", type = "VARCHAR", is_key = true },
    { name = "Bid", type = "DOUBLE" },
]

[[queries]]
name = "bar"
windows = ["1m", "5m"]
base_unit_seconds = 1
grace_seconds = 0

[[queries.sources]]
name = "ticks"
param = "t"

[[queries.group_by]]
kind = "column"
param = "t"
name = "Symbol"

[[queries.projection]]
alias = "Symbol"
expr = { kind = "column", param = "t", name = "Symbol" }

[[queries.projection]]
alias = "BucketStart"
expr = { kind = "window_start" }

[[queries.projection]]
alias = "High"
expr = { kind = "aggregate", func = "max", arg = { kind = "column", param = "t", name = "Bid" } }
"#;

fn tumblerctl(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tumblerctl"))
        .args(args)
        .env("HOME", home)
        .env_remove("TUMBLER_KSQL_URL")
        .env_remove("TUMBLER_REST_PROXY_URL")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute tumblerctl")
}

fn write_bars(dir: &Path) -> String {
    let path = dir.join("bars.toml");
    std::fs::write(&path, BARS).unwrap();
    path.to_str().unwrap().to_string()
}

// ============================================================================
// Argument handling
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    let output = tumblerctl(home.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["plan", "apply", "queries", "config"] {
        assert!(stdout.contains(command), "help should list '{}'", command);
    }
}

#[test]
fn test_invalid_subcommand_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = tumblerctl(home.path(), &["nonexistent-command"]);
    assert!(!output.status.success());
}

#[test]
fn test_plan_requires_a_file() {
    let home = tempfile::tempdir().unwrap();
    let output = tumblerctl(home.path(), &["plan"]);
    assert!(!output.status.success());
}

// ============================================================================
// plan
// ============================================================================

#[test]
fn test_plan_prints_entities_and_ddl() {
    let home = tempfile::tempdir().unwrap();
    let file = write_bars(home.path());
    let output = tumblerctl(home.path(), &["plan", &file, "--no-color"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("bar_1s_final_s"));
    assert!(stdout.contains("bar_5m_live"));
    assert!(stdout.contains("CREATE TABLE bar_1s_final"));
    assert!(stdout.contains("GRACE PERIOD 1 SECONDS"));
}

#[test]
fn test_plan_json_output() {
    let home = tempfile::tempdir().unwrap();
    let file = write_bars(home.path());
    let output = tumblerctl(home.path(), &["plan", &file, "--format", "json"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let plans: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entities = plans[0]["entities"].as_array().unwrap();
    assert_eq!(plans[0]["query"], "bar");
    assert_eq!(entities.len(), 4);
    assert_eq!(entities[0]["entity"]["role"], "hub_table");
    assert_eq!(entities[3]["ddl"]["entity"], "bar_5m_live");
}

#[test]
fn test_plan_unknown_query_name_fails() {
    let home = tempfile::tempdir().unwrap();
    let file = write_bars(home.path());
    let output = tumblerctl(home.path(), &["plan", &file, "--query", "missing"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing"));
}

#[test]
fn test_plan_reports_validation_errors() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("bad.toml");
    std::fs::write(&path, BARS.replace("base_unit_seconds = 1", "base_unit_seconds = 7")).unwrap();
    let output = tumblerctl(home.path(), &["plan", path.to_str().unwrap()]);

    assert!(!output.status.success());
}

// ============================================================================
// apply --dry-run
// ============================================================================

#[test]
fn test_apply_dry_run_initializes_every_entity() {
    let home = tempfile::tempdir().unwrap();
    let file = write_bars(home.path());
    let output = tumblerctl(home.path(), &["apply", &file, "--dry-run", "--format", "json"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let outcomes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let results = outcomes[0]["results"].as_array().unwrap();
    let entities: Vec<&str> = results.iter().map(|r| r["entity"].as_str().unwrap()).collect();
    assert_eq!(entities, ["bar_1s_final", "bar_1s_final_s", "bar_1m_live", "bar_5m_live"]);
    assert_eq!(results[2]["query"]["stabilized"], true);
    assert_eq!(results[2]["query"]["partitions"], 3);
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let output = tumblerctl(home.path(), &["config", "init"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(home.path().join(".tumbler").join("config.toml").exists());

    let again = tumblerctl(home.path(), &["config", "init"]);
    assert!(!again.status.success());

    let output = tumblerctl(home.path(), &["config", "show", "--ksql-url", "http://ksql:8088"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("http://ksql:8088"));
}
