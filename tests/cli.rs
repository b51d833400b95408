use std::fs;

use assert_cmd::Command;

fn onboard() -> Command {
    let mut cmd = Command::cargo_bin("onboard").unwrap();
    cmd.env_remove("ONBOARD_PORT")
        .env_remove("ONBOARD_DEFAULT_EMAIL")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn info_prints_the_wizard_tree() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("onboard.yaml");
    fs::write(&config, "start_delay_ms: 0\n").unwrap();

    let output = onboard()
        .args(["--config", config.to_str().unwrap(), "info"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Onboard System Information"));
    assert!(stdout.contains("- download-and-whitelist (parallel)"));
    assert!(stdout.contains("- termination (branch)"));
}

#[test]
fn config_validate_rejects_bad_values() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("onboard.yaml");
    fs::write(&config, "installer:\n  download_chunks: 0\n").unwrap();

    onboard()
        .args(["--config", config.to_str().unwrap(), "config", "validate"])
        .assert()
        .failure();

    fs::write(&config, "installer:\n  download_chunks: 2\n").unwrap();
    onboard()
        .args(["--config", config.to_str().unwrap(), "config", "validate"])
        .assert()
        .success();
}

#[test]
fn config_get_reads_nested_keys_with_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("onboard.yaml");
    fs::write(&config, "server:\n  port: 9000\n").unwrap();

    let output = onboard()
        .env("ONBOARD_PORT", "9100")
        .args(["--config", config.to_str().unwrap(), "config", "get", "server.port"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("9100"));
}

#[test]
fn run_drives_the_wizard_from_a_script() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("onboard.yaml");
    fs::write(
        &config,
        format!(
            "installer:\n  download_chunks: 2\n  chunk_delay_ms: 0\n  whitelist_path: {}\n",
            dir.path().display()
        ),
    )
    .unwrap();
    let script = dir.path().join("events.yaml");
    fs::write(
        &script,
        "- event: did-submit-email\n  fields:\n    email: newcomer@example.com\n- event: did-whitelist\n",
    )
    .unwrap();

    let output = onboard()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "--events",
            script.to_str().unwrap(),
            "--timeout",
            "10s",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r#""status": "completed""#));
    assert!(stdout.contains("install/termination/end"));
}
