//! Black-box transfer-task integration tests, driven through the actual
//! binary against a `local: true` receiving task (no SSH fixture needed to
//! exercise the packer → stdin → `tar -x` pipeline end to end).
//!
//! These only cover manifest-load rejection and `--dry-run`, since a real
//! (non-dry-run) transfer always materializes with `local: false` (it needs
//! a remote-shaped connector on the other end) and this binary has no
//! in-process fixture for one. The non-dry-run path — packer, stdin, and
//! stdout/stderr draining running concurrently rather than deadlocking — is
//! covered directly against the executor in `src/executor.rs`'s test module,
//! using a `cat`-backed connector double instead of a real SSH session.

use assert_cmd::Command;
use std::fs;
use tempfile::TempDir;

fn ops_cmd() -> Command {
    Command::cargo_bin("ops").unwrap()
}

#[test]
fn transfer_task_rejects_command_field_combination_at_load() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(
        &opsfile,
        r#"
tasks:
  bad:
    local: true
    command: echo hi
    transfer: "./pkg -> /tmp/out"
"#,
    )
    .unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("run")
        .arg("bad")
        .assert()
        .failure();
}

#[test]
fn transfer_task_rejects_malformed_grammar_at_load() {
    let dir = TempDir::new().unwrap();
    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(
        &opsfile,
        r#"
tasks:
  bad:
    local: true
    transfer: "./pkg /tmp/out"
"#,
    )
    .unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("run")
        .arg("bad")
        .assert()
        .failure();
}

#[test]
fn dry_run_does_not_touch_the_filesystem_when_no_server_matches_a_transfer_task() {
    let dir = TempDir::new().unwrap();
    let pkg = dir.path().join("pkg");
    fs::create_dir(&pkg).unwrap();
    fs::write(pkg.join("a.txt"), b"hello").unwrap();
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let opsfile = dir.path().join("Opsfile.yml");
    fs::write(
        &opsfile,
        format!(
            r#"
tasks:
  ship:
    transfer: "{} -> {}"
"#,
            pkg.display(),
            out.display()
        ),
    )
    .unwrap();

    ops_cmd()
        .arg("-f")
        .arg(&opsfile)
        .arg("run")
        .arg("ship")
        .arg("--dry-run")
        .assert()
        .success();

    assert!(fs::read_dir(&out).unwrap().next().is_none());
}
