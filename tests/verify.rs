mod common;

use common::{generate_manifest, kekkai_cmd, verify_cmd};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Manifest lives outside the tree so it never shows up as an added file.
fn setup() -> (TempDir, TempDir) {
    (TempDir::new().unwrap(), TempDir::new().unwrap())
}

#[test]
fn verify_success_when_clean() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);

    verify_cmd(tree.path(), &manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Integrity check passed"))
        .stdout(predicate::str::contains("Verified 1 files"));
}

#[test]
fn verify_fails_on_modified_file() {
    let (tree, aux) = setup();
    let target = tree.path().join("app.bin");
    fs::write(&target, "original").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);
    fs::write(&target, "tampered").unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Integrity check failed"))
        .stderr(predicate::str::contains("Modified files (1):"))
        .stderr(predicate::str::contains("app.bin (hash)"));
}

#[test]
fn verify_fails_on_deleted_file() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();
    fs::write(tree.path().join("config.json"), "{}").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);
    fs::remove_file(tree.path().join("config.json")).unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Deleted files (1):"))
        .stderr(predicate::str::contains("config.json"));
}

#[test]
fn verify_fails_on_added_file() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);
    fs::write(tree.path().join("rogue.txt"), "planted").unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Added files (1):"))
        .stderr(predicate::str::contains("rogue.txt"));
}

#[test]
fn verify_ignores_changes_to_excluded_files() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.go"), "package main").unwrap();
    fs::write(tree.path().join("debug.log"), "line 1").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &["*.log"]);

    // Both mutating an excluded file and adding a new one are invisible.
    fs::write(tree.path().join("debug.log"), "line 1\nline 2").unwrap();
    fs::write(tree.path().join("new.log"), "fresh").unwrap();

    verify_cmd(tree.path(), &manifest).assert().success();
}

#[test]
fn verify_reports_added_tracked_file_next_to_excluded_one() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.go"), "package main").unwrap();
    fs::write(tree.path().join("debug.log"), "noise").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &["*.log"]);
    fs::write(tree.path().join("new.log"), "still ignored").unwrap();
    fs::write(tree.path().join("new.go"), "tracked").unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Added files (1):"))
        .stderr(predicate::str::contains("new.go"));
}

#[test]
#[cfg(unix)]
fn verify_detects_symlink_retarget() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("config.json"), r#"{"k":1}"#).unwrap();
    std::os::unix::fs::symlink("config.json", tree.path().join("link")).unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);

    fs::remove_file(tree.path().join("link")).unwrap();
    std::os::unix::fs::symlink("sensitive.txt", tree.path().join("link")).unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Modified files (1):"))
        .stderr(predicate::str::contains("link (hash)"));
}

#[test]
#[cfg(unix)]
fn verify_detects_file_replaced_by_symlink() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.cfg"), "symlink:target").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);

    fs::remove_file(tree.path().join("app.cfg")).unwrap();
    std::os::unix::fs::symlink("target", tree.path().join("app.cfg")).unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "app.cfg (type file\u{2192}symlink)",
        ));
}

#[test]
fn verify_json_format_carries_details() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "original").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);
    fs::write(tree.path().join("app.bin"), "tampered").unwrap();
    fs::write(tree.path().join("rogue.txt"), "planted").unwrap();

    let output = verify_cmd(tree.path(), &manifest)
        .arg("--format")
        .arg("json")
        .assert()
        .code(1)
        .get_output()
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["details"]["modified_files"][0], "app.bin (hash)");
    assert_eq!(report["details"]["added_files"][0], "rogue.txt");
}

#[test]
fn verify_success_json_format() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);

    let output = verify_cmd(tree.path(), &manifest)
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["details"]["verified_files"], 1);
}

#[test]
fn verify_rejects_negative_rate_limit() {
    let (tree, aux) = setup();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();
    let manifest = aux.path().join("manifest.json");

    generate_manifest(tree.path(), &manifest, &[]);

    verify_cmd(tree.path(), &manifest)
        .arg("--rate-limit")
        .arg("-512")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("rate-limit cannot be negative"));
}

#[test]
fn verify_requires_a_manifest_source() {
    let tree = TempDir::new().unwrap();

    kekkai_cmd()
        .arg("verify")
        .arg("--target")
        .arg(tree.path())
        .assert()
        .code(255)
        .stderr(predicate::str::contains(
            "either --manifest or --store-dir",
        ));
}

#[test]
fn verify_from_store() {
    let (tree, _) = setup();
    let store = TempDir::new().unwrap();
    fs::write(tree.path().join("app.bin"), "binary").unwrap();

    kekkai_cmd()
        .arg("generate")
        .arg("--target")
        .arg(tree.path())
        .arg("--store-dir")
        .arg(store.path())
        .arg("--base-path")
        .arg("production")
        .arg("--app-name")
        .arg("web")
        .assert()
        .success();

    kekkai_cmd()
        .arg("verify")
        .arg("--store-dir")
        .arg(store.path())
        .arg("--base-path")
        .arg("production")
        .arg("--app-name")
        .arg("web")
        .arg("--target")
        .arg(tree.path())
        .assert()
        .success();
}

#[test]
fn verify_corrupt_manifest_fails_with_config_error() {
    let (tree, aux) = setup();
    let manifest = aux.path().join("manifest.json");
    fs::write(&manifest, "{not json").unwrap();

    verify_cmd(tree.path(), &manifest)
        .assert()
        .code(255)
        .stderr(predicate::str::contains("Integrity check failed"));
}

#[test]
#[cfg(unix)]
fn verify_through_root_symlink() {
    // A `current -> release` deployment link verifies against a manifest
    // generated from the release directory itself.
    let (tree, aux) = setup();
    let release = tree.path().join("releases/20240101");
    fs::create_dir_all(&release).unwrap();
    fs::write(release.join("app.bin"), "binary").unwrap();

    let current = tree.path().join("current");
    std::os::unix::fs::symlink(&release, &current).unwrap();

    let manifest = aux.path().join("manifest.json");
    generate_manifest(&release, &manifest, &[]);

    kekkai_cmd()
        .arg("verify")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--target")
        .arg(&current)
        .assert()
        .success();
}
