use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::path::Path;

pub fn kekkai_cmd() -> Command {
    cargo_bin_cmd!("kekkai")
}

/// Generates a manifest for `root` into `manifest_path`, asserting success.
pub fn generate_manifest(root: &Path, manifest_path: &Path, excludes: &[&str]) {
    let mut cmd = kekkai_cmd();
    cmd.arg("generate")
        .arg("--target")
        .arg(root)
        .arg("--output")
        .arg(manifest_path);
    for pattern in excludes {
        cmd.arg("--exclude").arg(pattern);
    }
    cmd.assert().success();
}

// Each integration test file is compiled as its own crate; not every crate
// exercises verification, so this helper is intentionally unused there.
#[allow(dead_code)]
pub fn verify_cmd(root: &Path, manifest_path: &Path) -> Command {
    let mut cmd = kekkai_cmd();
    cmd.arg("verify")
        .arg("--manifest")
        .arg(manifest_path)
        .arg("--target")
        .arg(root);
    cmd
}
