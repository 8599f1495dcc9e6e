//! Integration tests for the Ghostable CLI.
//!
//! These tests exercise the binary end-to-end using `assert_cmd`.  The
//! in-memory key store keeps nothing between invocations, so each test
//! checks a single command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper: a Command for the ghostable binary, run inside `dir`.
fn ghostable(dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("ghostable").expect("binary should exist");
    cmd.current_dir(dir.path())
        .env_remove("GHOSTABLE_KEY_STORE")
        .env_remove("GHOSTABLE_LOG");
    cmd
}

#[test]
fn help_flag_shows_usage() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Zero-knowledge secrets client"))
        .stdout(predicate::str::contains("device"))
        .stdout(predicate::str::contains("token"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn version_flag_shows_version() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ghostable"));
}

#[test]
fn version_command_lists_algorithms() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains("xchacha20-poly1305"))
        .stdout(predicate::str::contains("Ed25519"));
}

#[test]
fn no_args_shows_help() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn token_keygen_json_has_all_fields() {
    let tmp = TempDir::new().unwrap();
    let output = ghostable(&tmp)
        .args(["token", "keygen", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for field in ["seed", "publicKey", "fingerprint"] {
        assert!(value[field].is_string(), "missing {field}");
    }
    assert_eq!(value["fingerprint"].as_str().unwrap().len(), 64);
}

#[test]
fn token_keygen_generates_fresh_keys() {
    let tmp = TempDir::new().unwrap();
    let run = || {
        let out = ghostable(&tmp)
            .args(["token", "keygen", "--json"])
            .output()
            .unwrap();
        serde_json::from_slice::<serde_json::Value>(&out.stdout).unwrap()["publicKey"].clone()
    };
    assert_ne!(run(), run());
}

#[test]
fn device_show_without_identity_fails() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .args(["--key-store", "memory", "device", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No device identity"));
}

#[test]
fn device_link_prints_public_keys() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .args([
            "--key-store",
            "memory",
            "device",
            "link",
            "--name",
            "ci-box",
            "--device-id",
            "dev_42",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Linked device 'ci-box' (dev_42)"))
        .stdout(predicate::str::contains("Ed25519"))
        .stderr(predicate::str::contains("in-memory key store"));
}

#[test]
fn key_store_can_come_from_environment() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .env("GHOSTABLE_KEY_STORE", "memory")
        .args(["device", "unlink", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No device identity"));
}

#[test]
fn key_store_can_come_from_config_file() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join(".ghostable.toml"), "key_store = \"memory\"\n").unwrap();

    ghostable(&tmp)
        .args(["cache", "clear", "--project", "proj_1", "-e", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached key for 'proj_1/production'"));
}

#[test]
fn malformed_config_file_is_reported() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join(".ghostable.toml"), "key_store = [").unwrap();

    ghostable(&tmp)
        .args(["device", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(".ghostable.toml"));
}

#[cfg(not(feature = "keyring-store"))]
#[test]
fn keyring_without_support_does_not_fall_back() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .args(["device", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Key store unavailable"));
}

#[test]
fn unknown_key_store_is_rejected() {
    let tmp = TempDir::new().unwrap();
    ghostable(&tmp)
        .args(["--key-store", "floppy", "device", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("floppy"));
}
