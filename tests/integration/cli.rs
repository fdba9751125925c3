use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const MANIFEST: &str = r#"
services:
  _store:
    image: "gilliam/etcd:2"
    ports: [4001]
  api:
    image: "gilliam/api:1"
  _bootstrap:
    image: "gilliam/bootstrap:1"
"#;

fn gsched() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gsched"));
    cmd.env_remove("RELEASE");
    cmd.env_remove("GILLIAM_SERVICE_REGISTRY");
    cmd.env_remove("GILLIAM_FORMATION");
    cmd
}

#[test]
fn help_names_the_subcommands() {
    gsched()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("bootstrap"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn check_accepts_a_valid_manifest() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("release.yml");
    fs::write(&path, MANIFEST).expect("write manifest");

    gsched()
        .arg("check")
        .arg("--manifest")
        .arg(path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("manifest OK: 3 services"))
        .stdout(predicate::str::contains("gilliam/api:1"));
}

#[test]
fn check_rejects_a_manifest_without_services() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("release.yml");
    fs::write(&path, "services: {}\n").expect("write manifest");

    gsched()
        .arg("check")
        .arg("--manifest")
        .arg(path.to_str().unwrap())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no services"));
}

#[test]
fn check_fails_on_a_missing_file() {
    gsched()
        .arg("check")
        .arg("--manifest")
        .arg("/nonexistent/release.yml")
        .assert()
        .failure();
}

#[test]
fn check_prefers_the_inline_release_env() {
    gsched()
        .arg("check")
        .arg("--manifest")
        .arg("/nonexistent/release.yml")
        .env("RELEASE", MANIFEST)
        .assert()
        .success()
        .stdout(predicate::str::contains("manifest OK: 3 services"));
}

#[test]
fn rejects_an_invalid_log_level() {
    gsched()
        .arg("--log-level")
        .arg("loud")
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid log level"));
}
