use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docgraph_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docgraph"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("archive")).unwrap();
    fs::write(
        files_dir.join("statement.txt"),
        "Account A-100 is an IRA held at Fidelity.\n\nThe account holds 10 shares of AAPL.",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes.md"),
        "# Trades\n\nBought 5 shares of MSFT on 2024-03-01.",
    )
    .unwrap();
    fs::write(files_dir.join("archive/old.txt"), "Closed account A-7.").unwrap();
    fs::write(files_dir.join("logo.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/docgraph.sqlite"

[retry]
max_attempts = 1
initial_delay_ms = 1

[submit]
include_globs = ["**/*.txt", "**/*.md"]
exclude_globs = ["archive/**"]
"#,
        root.display()
    );

    let config_path = config_dir.join("docgraph.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docgraph(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docgraph_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docgraph binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

/// Submit one file and return its document id.
fn submit_one(config_path: &Path, name: &str) -> String {
    let path = files_dir(config_path).join(name);
    let (stdout, stderr, success) = run_docgraph(config_path, &["submit", path.to_str().unwrap()]);
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    stdout.split_whitespace().next().unwrap().to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docgraph(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_docgraph(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_docgraph(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_submit_directory_applies_globs() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);

    let dir = files_dir(&config_path);
    let (stdout, stderr, success) = run_docgraph(&config_path, &["submit", dir.to_str().unwrap()]);
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("statement.txt"));
    assert!(stdout.contains("notes.md"));
    assert!(!stdout.contains("old.txt"));
    assert!(!stdout.contains("logo.png"));
    assert_eq!(stdout.matches("(submitted)").count(), 2);
}

#[test]
fn test_resubmit_returns_existing_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);

    let first = submit_one(&config_path, "statement.txt");
    let path = files_dir(&config_path).join("statement.txt");
    let (stdout, _, success) = run_docgraph(&config_path, &["submit", path.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains(&first));
    assert!(stdout.contains("already submitted"));
}

#[test]
fn test_submit_unsupported_file_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);

    let path = files_dir(&config_path).join("logo.png");
    let (_, stderr, success) = run_docgraph(&config_path, &["submit", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported file type"));
}

#[test]
fn test_status_of_submitted_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);
    let id = submit_one(&config_path, "statement.txt");

    let (stdout, stderr, success) = run_docgraph(&config_path, &["status", &id]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("statement.txt"));
    assert!(stdout.contains("uploaded"));
}

#[test]
fn test_status_missing_document() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);

    let (_, stderr, success) = run_docgraph(&config_path, &["status", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_list_filters_by_status() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);
    submit_one(&config_path, "statement.txt");
    submit_one(&config_path, "notes.md");

    let (stdout, _, success) = run_docgraph(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("statement.txt"));
    assert!(stdout.contains("notes.md"));

    let (stdout, _, success) = run_docgraph(&config_path, &["list", "--status", "completed"]);
    assert!(success);
    assert!(stdout.contains("No documents."));

    let (_, _, success) = run_docgraph(&config_path, &["list", "--status", "bogus"]);
    assert!(!success);
}

#[test]
fn test_process_without_generator_records_error() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);
    let id = submit_one(&config_path, "statement.txt");

    let (stdout, _, success) = run_docgraph(&config_path, &["process", &id]);
    assert!(!success, "process should fail with generation disabled");
    assert!(stdout.contains("failed"));
    assert!(stdout.contains("extract_schema"));

    let (stdout, _, success) = run_docgraph(&config_path, &["status", &id]);
    assert!(success);
    assert!(stdout.contains("error"));
    assert!(stdout.contains("text generation is disabled"));

    // The parsed text was kept; only schema extraction has to run again.
    let (stdout, _, success) = run_docgraph(&config_path, &["process", "--all"]);
    assert!(!success);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("extract_schema"));
    assert!(!stdout.contains("  parse "));
}

#[test]
fn test_process_requires_id_or_all() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);

    let (_, stderr, success) = run_docgraph(&config_path, &["process"]);
    assert!(!success);
    assert!(stderr.contains("--all"));
}

#[test]
fn test_stats_after_submit() {
    let (_tmp, config_path) = setup_test_env();
    run_docgraph(&config_path, &["init"]);
    submit_one(&config_path, "statement.txt");

    let (stdout, stderr, success) = run_docgraph(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Documents:   1"));
    assert!(stdout.contains("uploaded"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_docgraph(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
