use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn sling_requires_target() {
    let mut cmd = Command::cargo_bin("gt").unwrap();
    cmd.arg("sling").arg("gt-task-1");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn unknown_subcommand_fails() {
    let mut cmd = Command::cargo_bin("gt").unwrap();
    cmd.arg("frobnicate");
    cmd.assert().failure();
}

#[test]
fn commands_fail_cleanly_outside_a_town() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("gt").unwrap();
    cmd.arg("rig")
        .arg("list")
        .arg("--town-root")
        .arg(tmp.path())
        .env_remove("GT_TOWN_ROOT");
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no town"));
}

#[test]
fn init_then_rig_list_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();

    let mut init = Command::cargo_bin("gt").unwrap();
    init.arg("init")
        .arg("testtown")
        .arg("--dir")
        .arg(tmp.path());
    init.assert()
        .success()
        .stdout(predicate::str::contains("initialized town testtown"));

    let mut list = Command::cargo_bin("gt").unwrap();
    list.arg("rig")
        .arg("list")
        .arg("--json")
        .arg("--town-root")
        .arg(tmp.path());
    list.assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn rig_add_validates_names() {
    let tmp = tempfile::tempdir().unwrap();
    let mut init = Command::cargo_bin("gt").unwrap();
    init.arg("init")
        .arg("testtown")
        .arg("--dir")
        .arg(tmp.path());
    init.assert().success();

    let mut add = Command::cargo_bin("gt").unwrap();
    add.arg("rig")
        .arg("add")
        .arg("Bad-Name")
        .arg("--url")
        .arg("git@example.com:org/repo.git")
        .arg("--prefix")
        .arg("bn-")
        .arg("--town-root")
        .arg(tmp.path());
    add.assert()
        .failure()
        .stderr(predicate::str::contains("lowercase"));
}

#[test]
fn seance_outside_a_rig_is_silent_success() {
    let tmp = tempfile::tempdir().unwrap();
    let mut init = Command::cargo_bin("gt").unwrap();
    init.arg("init").arg("t").arg("--dir").arg(tmp.path());
    init.assert().success();

    // No GT_RIG and no --rig: seance fails open with no output.
    let mut seance = Command::cargo_bin("gt").unwrap();
    seance
        .arg("seance")
        .arg("--town-root")
        .arg(tmp.path())
        .env_remove("GT_RIG")
        .env_remove("GT_ROLE");
    seance.assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn events_append_and_tail() {
    let tmp = tempfile::tempdir().unwrap();
    let mut init = Command::cargo_bin("gt").unwrap();
    init.arg("init").arg("t").arg("--dir").arg(tmp.path());
    init.assert().success();

    let mut append = Command::cargo_bin("gt").unwrap();
    append
        .arg("events")
        .arg("append")
        .arg("session_start")
        .arg("--source")
        .arg("gastown")
        .arg("--actor")
        .arg("gt-gastown-crew-max")
        .arg("--town-root")
        .arg(tmp.path());
    append.assert().success();

    let mut tail = Command::cargo_bin("gt").unwrap();
    tail.arg("events")
        .arg("tail")
        .arg("--source")
        .arg("gastown")
        .arg("--town-root")
        .arg(tmp.path());
    tail.assert()
        .success()
        .stdout(predicate::str::contains("session_start"));
}

#[test]
fn events_append_rejects_bad_payload() {
    let tmp = tempfile::tempdir().unwrap();
    let mut init = Command::cargo_bin("gt").unwrap();
    init.arg("init").arg("t").arg("--dir").arg(tmp.path());
    init.assert().success();

    let mut append = Command::cargo_bin("gt").unwrap();
    append
        .arg("events")
        .arg("append")
        .arg("sling")
        .arg("--payload")
        .arg("{not json")
        .arg("--town-root")
        .arg(tmp.path());
    append
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad payload JSON"));
}
