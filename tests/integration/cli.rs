//! Binary-level argument handling

use assert_cmd::Command;
use tempfile::TempDir;

fn binary(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("airtable-backup").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("AIRTABLE_API_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = binary(&dir).arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["backup", "dry-run", "verify"] {
        assert!(stdout.contains(command), "{command} missing from help");
    }
}

#[test]
fn test_backup_without_token_fails_before_writing() {
    let dir = TempDir::new().unwrap();
    let output = binary(&dir)
        .args(["backup", "--output", "out"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing API token"), "{stderr}");
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_unknown_format_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let output = binary(&dir)
        .args(["backup", "--formats", "json,xml"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("xml"));
}
