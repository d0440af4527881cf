//! End-to-end CLI behavior: validate/run/resume against the `tag` binary.

use assert_cmd::Command;
use predicates::str::contains;

fn write_pipeline(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn validate_accepts_a_well_formed_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(
        dir.path(),
        "ok.yaml",
        r#"
id: ok
steps:
  - name: a
    plugin: echo
  - name: b
    plugin: upper
    depends_on: [a]
    connections:
      text: "a.out"
"#,
    );

    Command::cargo_bin("tag")
        .unwrap()
        .arg("validate")
        .arg(&pipeline)
        .assert()
        .success()
        .stdout(contains("is valid"));
}

#[test]
fn validate_rejects_an_unknown_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(
        dir.path(),
        "bad.yaml",
        r#"
id: bad
steps:
  - name: a
    plugin: does_not_exist
"#,
    );

    Command::cargo_bin("tag")
        .unwrap()
        .arg("validate")
        .arg(&pipeline)
        .assert()
        .failure();
}

#[test]
fn run_executes_a_linear_pipeline_to_completion() {
    let home = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(
        home.path(),
        "linear.yaml",
        r#"
id: linear
steps:
  - name: a
    plugin: echo
    config:
      msg: "hi"
  - name: b
    plugin: upper
    depends_on: [a]
    connections:
      text: "a.out"
"#,
    );

    Command::cargo_bin("tag")
        .unwrap()
        .env("TAG_BASE_DIR", home.path())
        .arg("run")
        .arg(&pipeline)
        .arg("--task-id")
        .arg("cli-linear")
        .assert()
        .success()
        .stdout(contains("completed"));
}

#[test]
fn run_reports_failure_exit_code_for_a_failing_step() {
    let home = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(
        home.path(),
        "failing.yaml",
        r#"
id: failing
steps:
  - name: a
    plugin: fail
"#,
    );

    Command::cargo_bin("tag")
        .unwrap()
        .env("TAG_BASE_DIR", home.path())
        .arg("run")
        .arg(&pipeline)
        .arg("--task-id")
        .arg("cli-failing")
        .assert()
        .failure();
}

#[test]
fn run_then_resume_completes_a_suspended_task() {
    let home = tempfile::tempdir().unwrap();
    let pipeline = write_pipeline(
        home.path(),
        "suspendy.yaml",
        r#"
id: suspendy
steps:
  - name: ask_user
    plugin: ask_user
"#,
    );

    Command::cargo_bin("tag")
        .unwrap()
        .env("TAG_BASE_DIR", home.path())
        .arg("run")
        .arg(&pipeline)
        .arg("--task-id")
        .arg("cli-suspend")
        .assert()
        .success()
        .stdout(contains("suspended"));

    Command::cargo_bin("tag")
        .unwrap()
        .env("TAG_BASE_DIR", home.path())
        .arg("resume")
        .arg(&pipeline)
        .arg("cli-suspend")
        .assert()
        .success();
}
