use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn stash_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("stash");
    path
}

fn run_stash(data_dir: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = stash_binary();
    let output = Command::new(&binary)
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run stash binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("data");
    let files_dir = tmp.path().join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("cat.png"), b"\x89PNG\r\n\x1a\ncat-bytes").unwrap();
    fs::write(files_dir.join("dog.jpg"), b"\xff\xd8\xffdog-bytes").unwrap();
    (tmp, data_dir)
}

#[test]
fn test_init_creates_layout() {
    let (_tmp, data_dir) = setup_test_env();
    let (stdout, stderr, ok) = run_stash(&data_dir, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    assert!(data_dir.join("config.json").exists());
    assert!(data_dir.join("index.json").exists());
    assert!(data_dir.join("aliases.json").exists());
    assert!(data_dir.join("raw").is_dir());
    assert!(data_dir.join("categories").join("其它").is_dir());

    // idempotent
    let (_, stderr, ok) = run_stash(&data_dir, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_status_and_send() {
    let (tmp, data_dir) = setup_test_env();
    let cat = tmp.path().join("files/cat.png");
    let dog = tmp.path().join("files/dog.jpg");

    let (stdout, stderr, ok) = run_stash(
        &data_dir,
        &["ingest", cat.to_str().unwrap(), dog.to_str().unwrap()],
    );
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("ingested: 2"), "got: {}", stdout);
    // inputs are left in place
    assert!(cat.exists());
    assert!(dog.exists());

    let (stdout, _, ok) = run_stash(&data_dir, &["status"]);
    assert!(ok);
    assert!(stdout.contains("current_count:    2"), "got: {}", stdout);
    assert!(stdout.contains("max_count:        100"), "got: {}", stdout);

    let (stdout, _, ok) = run_stash(&data_dir, &["emotions"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "其它");

    let (stdout, _, ok) = run_stash(&data_dir, &["send"]);
    assert!(ok);
    assert!(stdout.trim().contains("其它"), "got: {}", stdout);

    let (_, stderr, ok) = run_stash(&data_dir, &["send", "火星"]);
    assert!(!ok);
    assert!(stderr.contains("category does not exist"), "got: {}", stderr);
}

#[test]
fn test_emotion_not_found_fails() {
    let (_tmp, data_dir) = setup_test_env();
    let (_, stderr, ok) = run_stash(&data_dir, &["emotion", "开心"]);
    assert!(!ok);
    assert!(stderr.contains("not found"), "got: {}", stderr);
}

#[test]
fn test_alias_commands() {
    let (_tmp, data_dir) = setup_test_env();

    let (_, _, ok) = run_stash(&data_dir, &["alias", "bind", "home", "group:1"]);
    assert!(ok);
    let (stdout, _, ok) = run_stash(&data_dir, &["alias", "list"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "home\tgroup:1");

    let (_, _, ok) = run_stash(&data_dir, &["alias", "unbind", "home"]);
    assert!(ok);
    let (_, stderr, ok) = run_stash(&data_dir, &["alias", "unbind", "home"]);
    assert!(!ok);
    assert!(stderr.contains("alias does not exist"));
}

#[test]
fn test_toggles_persist_in_config() {
    let (_tmp, data_dir) = setup_test_env();

    let (_, _, ok) = run_stash(&data_dir, &["off"]);
    assert!(ok);
    let (_, _, ok) = run_stash(&data_dir, &["set-vision", "gpt-4o"]);
    assert!(ok);

    let config: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(data_dir.join("config.json")).unwrap()).unwrap();
    assert_eq!(config["enabled"], false);
    assert_eq!(config["vision_provider_id"], "gpt-4o");

    let (stdout, _, ok) = run_stash(&data_dir, &["providers"]);
    assert!(ok);
    assert!(stdout.contains("vision: gpt-4o"));
    assert!(stdout.contains("text:   (conversation)"));
}

#[test]
fn test_scan_skipped_when_disabled() {
    let (_tmp, data_dir) = setup_test_env();
    run_stash(&data_dir, &["off"]);
    let (stdout, _, ok) = run_stash(&data_dir, &["scan"]);
    assert!(ok);
    assert!(stdout.contains("scan skipped"));
}
