// Integration tests for the countyval binary.
//
// Run with: cargo test -p countyval-cli --test cli_tests -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use httpmock::prelude::*;

fn countyval() -> Command {
    Command::new(env!("CARGO_BIN_EXE_countyval"))
}

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../recon/tests/fixtures")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "stderr: {}",
        stderr(output)
    );
}

/// Copy the fixture config into a fresh workspace with every raw snapshot
/// already cached, so no source is fetched.
fn seeded_workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("county.countyval.toml");
    fs::copy(fixtures().join("county.countyval.toml"), &config).unwrap();

    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw).unwrap();
    for name in [
        "raw_1p3a.csv",
        "nyt_cases.csv",
        "usa_facts_cases.csv",
        "usa_facts_deaths.csv",
    ] {
        fs::copy(fixtures().join(name), raw.join(name)).unwrap();
    }
    (dir, config)
}

fn write_grid(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

// ===========================================================================
// countyval validate
// ===========================================================================

#[test]
fn validate_accepts_fixture_config() {
    let output = countyval()
        .args(["validate"])
        .arg(fixtures().join("county.countyval.toml"))
        .output()
        .expect("countyval validate");

    assert_exit(&output, 0);
    let err = stderr(&output);
    assert!(err.contains("valid: 'County Validation Fixture' with 4 source(s)"), "{err}");
    assert!(err.contains("cases, deaths"), "{err}");
}

#[test]
fn validate_rejects_window_ending_before_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_grid(
        dir.path(),
        "bad.countyval.toml",
        r#"
name = "bad"
epoch = "2020-03-10"
end = "2020-03-01"

[sources.nyt]
url = "https://example.test/nyt.csv"
raw = "nyt.csv"
[sources.nyt.layout]
kind = "wide"
metric = "cases"
county = "county"
state = "state"
"#,
    );

    let output = countyval().arg("validate").arg(&config).output().unwrap();
    assert_exit(&output, 3);
    assert!(stderr(&output).starts_with("error: "));
}

#[test]
fn validate_missing_file_is_config_error() {
    let output = countyval()
        .args(["validate", "/nonexistent/county.countyval.toml"])
        .output()
        .unwrap();
    assert_exit(&output, 3);
}

#[test]
fn missing_subcommand_is_usage_error() {
    let output = countyval().output().unwrap();
    assert_exit(&output, 2);
}

// ===========================================================================
// countyval run
// ===========================================================================

#[test]
fn run_from_fresh_cache_writes_artifacts() {
    let (dir, config) = seeded_workspace();

    let output = countyval().arg("run").arg(&config).output().unwrap();
    assert_exit(&output, 0);
    assert!(output.stdout.is_empty(), "stdout should be empty without --json");
    let err = stderr(&output);
    assert!(err.contains("(0 fetched, 4 cached)"));
    assert!(err.contains("cases: 3 source(s), 2 regions: "), "{err}");
    assert!(!err.contains('\u{2014}'), "summary should be plain ASCII punctuation: {err}");

    let out = dir.path().join("validation");
    for name in [
        "cases_wide.csv",
        "cases_valid.csv",
        "cases_1p3a.csv",
        "cases_nyt_cases.csv",
        "cases_usa_facts_cases.csv",
        "deaths_wide.csv",
        "deaths_valid.csv",
        "deaths_1p3a.csv",
        "deaths_usa_facts_deaths.csv",
        "summary.json",
    ] {
        assert!(out.join(name).exists(), "missing {name}");
    }

    let consensus = fs::read_to_string(out.join("cases_wide.csv")).unwrap();
    assert!(consensus.starts_with(
        "County,State,2020-03-10,2020-03-11,2020-03-12,2020-03-13,2020-03-14,2020-03-15,2020-03-16,2020-03-17,2020-03-18\n"
    ));
    assert!(consensus.contains("\nIsland,WA,1,1,3,6,6,6,7,,\n"));
}

#[test]
fn run_json_prints_single_summary_document() {
    let (_dir, config) = seeded_workspace();

    let output = countyval().arg("run").arg(&config).arg("--json").output().unwrap();
    assert_exit(&output, 0);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(stdout.trim()).expect("stdout is JSON");
    assert_eq!(json["meta"]["config_name"], "County Validation Fixture");
    assert_eq!(json["meta"]["region_policy"], "union");
    assert_eq!(json["metrics"]["cases"]["summary"]["unknown_cells"], 4);
    assert_eq!(json["metrics"]["deaths"]["sources"][1], "usa_facts_deaths");
}

#[test]
fn run_end_flag_overrides_config() {
    let (_dir, config) = seeded_workspace();

    let output = countyval()
        .arg("run")
        .arg(&config)
        .args(["--end", "2020-03-14", "--json"])
        .output()
        .unwrap();
    assert_exit(&output, 0);

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["meta"]["end"], "2020-03-14");
    // 2 regions x 5 days, every source reported through 03-14
    assert_eq!(json["metrics"]["cases"]["summary"]["cells"], 10);
    assert_eq!(json["metrics"]["cases"]["summary"]["unknown_cells"], 0);
}

#[test]
fn run_with_bad_end_date_is_usage_error() {
    let (_dir, config) = seeded_workspace();
    let output = countyval()
        .arg("run")
        .arg(&config)
        .args(["--end", "March 18"])
        .output()
        .unwrap();
    assert_exit(&output, 2);
}

#[test]
fn run_end_before_epoch_is_config_error() {
    let (_dir, config) = seeded_workspace();
    let output = countyval()
        .arg("run")
        .arg(&config)
        .args(["--end", "2020-03-01"])
        .output()
        .unwrap();
    assert_exit(&output, 3);
}

#[test]
fn run_with_corrupt_snapshot_is_format_error() {
    let (dir, config) = seeded_workspace();
    fs::write(
        dir.path().join("raw").join("nyt_cases.csv"),
        "county,state,2020-03-10\nIsland,WA,one\n",
    )
    .unwrap();

    let output = countyval().arg("run").arg(&config).output().unwrap();
    assert_exit(&output, 4);
    assert!(stderr(&output).contains("nyt_cases"));
}

#[test]
fn run_fetches_stale_source_over_http() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/nyt.csv");
        then.status(200)
            .body("county,state,2020-03-10,2020-03-11\nKing,WA,8,9\n");
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_grid(
        dir.path(),
        "nyt.countyval.toml",
        &format!(
            r#"
name = "nyt only"
epoch = "2020-03-10"
end = "2020-03-11"
output_dir = "out"

[sources.nyt]
url = "{}"
raw = "nyt.csv"
[sources.nyt.layout]
kind = "wide"
metric = "cases"
county = "county"
state = "state"
"#,
            server.url("/nyt.csv")
        ),
    );

    let output = countyval().arg("run").arg(&config).output().unwrap();
    assert_exit(&output, 0);
    mock.assert();

    assert_eq!(
        fs::read_to_string(dir.path().join("raw").join("nyt.csv")).unwrap(),
        "county,state,2020-03-10,2020-03-11\nKing,WA,8,9\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("out").join("cases_valid.csv")).unwrap(),
        "County,State,2020-03-10,2020-03-11\nKing,WA,1,1\n"
    );
}

#[test]
fn run_reports_upstream_failure() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/gone.csv");
        then.status(404);
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_grid(
        dir.path(),
        "gone.countyval.toml",
        &format!(
            r#"
name = "gone"

[sources.nyt]
url = "{}"
raw = "nyt.csv"
[sources.nyt.layout]
kind = "wide"
metric = "cases"
county = "county"
state = "state"
"#,
            server.url("/gone.csv")
        ),
    );

    let output = countyval().arg("run").arg(&config).output().unwrap();
    assert_exit(&output, 51);
    assert!(!dir.path().join("raw").join("nyt.csv").exists());
}

// ===========================================================================
// countyval watch
// ===========================================================================

#[test]
fn watch_stops_after_max_cycles() {
    let (dir, config) = seeded_workspace();

    let output = countyval()
        .arg("watch")
        .arg(&config)
        .args(["--max-cycles", "1"])
        .output()
        .unwrap();
    assert_exit(&output, 0);
    assert!(stderr(&output).contains("1 cycle(s): 1 ok, 0 failed"));
    assert!(dir.path().join("validation").join("summary.json").exists());
}

#[test]
fn watch_rejects_zero_cycles() {
    let (_dir, config) = seeded_workspace();
    let output = countyval()
        .arg("watch")
        .arg(&config)
        .args(["--max-cycles", "0"])
        .output()
        .unwrap();
    assert_exit(&output, 2);
}

// ===========================================================================
// countyval reconcile
// ===========================================================================

#[test]
fn reconcile_writes_consensus_and_validity() {
    let dir = tempfile::tempdir().unwrap();
    let header = "County,State,2020-03-15,2020-03-16\n";
    let a = write_grid(dir.path(), "a.csv", &format!("{header}King,WA,5,3\nPierce,WA,1,\n"));
    let b = write_grid(dir.path(), "b.csv", &format!("{header}King,WA,5,7\nPierce,WA,1,2\n"));
    let c = write_grid(dir.path(), "c.csv", &format!("{header}King,WA,9,5\nPierce,WA,1,2\n"));
    let out = dir.path().join("consensus.csv");
    let valid = dir.path().join("valid.csv");

    let output = countyval()
        .arg("reconcile")
        .args([&a, &b, &c])
        .arg("--out")
        .arg(&out)
        .arg("--validity")
        .arg(&valid)
        .output()
        .unwrap();
    assert_exit(&output, 0);

    assert_eq!(
        fs::read_to_string(&out).unwrap(),
        format!("{header}King,WA,5,5\nPierce,WA,1,\n")
    );
    let validity = fs::read_to_string(&valid).unwrap();
    let king: Vec<&str> = validity.lines().nth(1).unwrap().split(',').collect();
    assert_eq!(king[0], "King");
    assert!((king[2].parse::<f64>().unwrap() - 2.0 / 3.0).abs() < 1e-12);
    assert!((king[3].parse::<f64>().unwrap() - 1.0 / 3.0).abs() < 1e-12);
    assert!(validity.ends_with("Pierce,WA,1,\n"));
}

#[test]
fn reconcile_honors_unknown_marker() {
    let dir = tempfile::tempdir().unwrap();
    let header = "County,State,2020-03-15\n";
    let a = write_grid(dir.path(), "a.csv", &format!("{header}King,WA,NA\n"));
    let b = write_grid(dir.path(), "b.csv", &format!("{header}King,WA,4\n"));
    let out = dir.path().join("consensus.csv");
    let valid = dir.path().join("valid.csv");

    let output = countyval()
        .arg("reconcile")
        .args([&a, &b])
        .arg("--out")
        .arg(&out)
        .arg("--validity")
        .arg(&valid)
        .args(["--unknown-marker", "NA"])
        .output()
        .unwrap();
    assert_exit(&output, 0);
    assert_eq!(fs::read_to_string(&out).unwrap(), format!("{header}King,WA,NA\n"));
}

#[test]
fn reconcile_rejects_misaligned_grids() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_grid(dir.path(), "a.csv", "County,State,2020-03-15\nKing,WA,5\n");
    let b = write_grid(dir.path(), "b.csv", "County,State,2020-03-16\nKing,WA,5\n");
    let out = dir.path().join("consensus.csv");

    let output = countyval()
        .arg("reconcile")
        .args([&a, &b])
        .arg("--out")
        .arg(&out)
        .arg("--validity")
        .arg(dir.path().join("valid.csv"))
        .output()
        .unwrap();
    assert_exit(&output, 6);
    assert!(stderr(&output).contains("hint:"));
    assert!(!out.exists());
}

#[test]
fn reconcile_missing_input_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = countyval()
        .args(["reconcile", "/nonexistent/a.csv", "--out"])
        .arg(dir.path().join("c.csv"))
        .arg("--validity")
        .arg(dir.path().join("v.csv"))
        .output()
        .unwrap();
    assert_exit(&output, 2);
}
