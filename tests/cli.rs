//! Black-box tests for the `list`, `init`, and `version` convenience
//! subcommands, plus global flag parsing that doesn't require a live SSH
//! target.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn ops_cmd() -> Command {
    Command::cargo_bin("ops").unwrap()
}

#[test]
fn version_prints_the_crate_version() {
    ops_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ops"));
}

#[test]
fn init_writes_a_stub_manifest() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("init")
        .assert()
        .success();

    assert!(opsfile.exists());
    let contents = fs::read_to_string(&opsfile).unwrap();
    assert!(contents.contains("tasks:"));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(&opsfile, "tasks: {}\n").unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("init")
        .assert()
        .failure();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("init")
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn list_renders_servers_and_tasks_as_json() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(
        &opsfile,
        r#"
servers:
  web1:
    host: 203.0.113.10
    user: deploy
    tags: [prod]
tasks:
  hello:
    desc: "say hello"
    local: true
    command: echo hi
"#,
    )
    .unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("list")
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"web1\""))
        .stdout(predicate::str::contains("\"hello\""));
}

#[test]
fn list_renders_servers_and_tasks_as_a_table_by_default() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(
        &opsfile,
        r#"
servers:
  web1:
    host: 203.0.113.10
    user: deploy
tasks:
  hello:
    local: true
    command: echo hi
"#,
    )
    .unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("SERVERS"))
        .stdout(predicate::str::contains("TASKS"))
        .stdout(predicate::str::contains("web1"))
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn missing_opsfile_is_a_clean_failure_not_a_panic() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("does-not-exist.yml");

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("run")
        .arg("anything")
        .assert()
        .failure();
}
