//! Integration tests for the wattrib binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

mod utils;

use predicates::prelude::*;
use utils::Pass;

#[test]
fn test_run_with_prefix_prints_summary() {
    let pass = Pass::standard(4);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("run").arg("--prefix").arg(&pass.prefix);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "ATTRIB mean: pkg_total=40.000, dram_total=8.000, pkg_attr=16.000, dram_attr=2.000",
        ));
    assert!(pass.attrib_path().exists());
}

#[test]
fn test_run_with_explicit_files_and_out() {
    let pass = Pass::standard(4);
    let out = pass.dir.path().join("custom_attrib.csv");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("run")
        .arg("--power")
        .arg(pass.power_path())
        .arg("--mbm")
        .arg(pass.file("_pqos.csv"))
        .arg("--out")
        .arg(&out);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("pkg_attr=0.000"))
        .stdout(predicate::str::contains("mbm_workload_MBps=100.000"));
    assert!(out.exists());
}

#[test]
fn test_report_json_written() {
    let pass = Pass::standard(3);
    let report = pass.dir.path().join("report.json");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("--quiet")
        .arg("run")
        .arg("--prefix")
        .arg(&pass.prefix)
        .arg("--report-json")
        .arg(&report);
    cmd.assert().success();

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(parsed["samples"], 3);
    assert_eq!(parsed["audit"]["passed"], true);
    assert!(parsed["sources"].is_array());
    assert!(parsed["summary_line"]
        .as_str()
        .unwrap()
        .starts_with("ATTRIB mean:"));
}

#[test]
fn test_missing_power_table_fails() {
    let pass = Pass::new();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("run").arg("--prefix").arg(&pass.prefix);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("anchor power table unusable"));
    assert!(!pass.attrib_path().exists());
}

#[test]
fn test_env_overrides_tolerance() {
    let pass = Pass::standard(3);
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.env("WATTRIB_ALIGN_TOLERANCE_SEC", "0.1")
        .env("WATTRIB_STALE_TOLERANCE_SEC", "0.05")
        .arg("run")
        .arg("--prefix")
        .arg(&pass.prefix);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("stale_tolerance_sec"));
}

#[test]
fn test_check_config_prints_toml() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("check-config").arg("--align-tolerance-sec").arg("0.3");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("align_tolerance_sec = 0.3"))
        .stdout(predicate::str::contains("time_base = \"elapsed\""))
        .stdout(predicate::str::contains("workload_cpus = [0]"));
}

#[test]
fn test_check_config_reads_file() {
    let pass = Pass::new();
    let path = pass.dir.path().join("wattrib.toml");
    pass.write(&path, "epsilon = 0.001\nworkload_cpus = [2, 3]\n");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("check-config").arg("--config").arg(&path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("epsilon = 0.001"));
}

#[test]
fn test_run_requires_input() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("wattrib");
    cmd.arg("run");
    cmd.assert().failure();
}
