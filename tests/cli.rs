use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Inference disabled: the question stage fails immediately and the run
    // completes offline with the placeholder answer.
    let config_content = format!(
        r#"[db]
path = "{}/data/cmpl.sqlite"

[inference]
provider = "disabled"

[[documents]]
id = "ley-19913"
title = "Ley 19.913"
url = "https://docs.test/ley-19913.pdf"
"#,
        root.display()
    );

    let config_path = config_dir.join("cmpl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cmpl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_cmpl"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run cmpl binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_cmpl(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/cmpl.sqlite").exists());

    // Idempotent.
    let (_, stderr, ok) = run_cmpl(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ask_then_status() {
    let (_tmp, config) = setup_test_env();
    run_cmpl(&config, &["init"]);

    let (stdout, stderr, ok) = run_cmpl(&config, &["ask", "¿Qué exige la Ley 19.913?"]);
    assert!(ok, "ask failed: {}", stderr);
    assert!(stdout.contains("Status: completed"));
    assert!(stdout.contains("No answer could be produced"));

    let run_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Run ").and_then(|r| r.strip_suffix(" started")))
        .expect("run id printed")
        .to_string();

    let (stdout, stderr, ok) = run_cmpl(&config, &["status", &run_id]);
    assert!(ok, "status failed: {}", stderr);
    let record: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["reasoning"][1]["stage"], "question-agent-error");

    let (stdout, _, ok) = run_cmpl(&config, &["runs"]);
    assert!(ok);
    assert!(stdout.contains(&run_id));
    assert!(stdout.contains("completed"));
}

#[test]
fn test_status_unknown_run_fails() {
    let (_tmp, config) = setup_test_env();
    run_cmpl(&config, &["init"]);
    let (_, stderr, ok) = run_cmpl(&config, &["status", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_read_commands_on_fresh_database() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_cmpl(&config, &["runs"]);
    assert!(ok, "runs failed: {}", stderr);
    assert!(stdout.contains("No runs."));
    assert!(tmp.path().join("data/cmpl.sqlite").exists());

    let (_, stderr, ok) = run_cmpl(&config, &["status", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("run nope not found"), "unexpected error: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("cmpl.toml");
    fs::write(&path, "[db]\npath = \"x.sqlite\"\n").unwrap();
    let (_, stderr, ok) = run_cmpl(&path, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("[[documents]]"));
}
