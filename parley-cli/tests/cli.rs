//! End-to-end tests for the `parley` binary

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn parley(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_parley"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("PARLEY_JOURNAL_ENABLED")
        .env_remove("PARLEY_JOURNAL_PATH")
        .output()
        .expect("failed to run parley")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "parley failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn journal_config(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let journal = dir.path().join("parley.journal");
    let config = dir.path().join("parley.toml");
    std::fs::write(
        &config,
        format!("[journal]\nenabled = true\npath = {:?}\n", journal.display().to_string()),
    )
    .unwrap();
    (config, journal)
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_demo_prints_inbox() {
    let report = stdout_json(&parley(&["demo"]));

    assert_eq!(report["viewer"], "alice");
    assert_eq!(report["totalUnread"], 3);

    let conversations = report["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    // Pinned first
    assert_eq!(conversations[0]["subject"], "Release 1.2");
    assert_eq!(conversations[0]["pinned"], true);
    assert_eq!(conversations[0]["unreadCount"], 2);
    assert_eq!(conversations[1]["subject"], "Lunch");
    assert_eq!(conversations[1]["unreadCount"], 1);
    assert_eq!(conversations[1]["lastMessage"]["preview"], "Tacos, noon works");
}

#[test]
fn test_demo_for_other_viewer() {
    let report = stdout_json(&parley(&["demo", "--viewer", "bob"]));

    let conversations = report["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(report["totalUnread"], 1);
    assert_eq!(conversations[0]["pinned"], false);
}

#[test]
fn test_replay_matches_demo() {
    let dir = TempDir::new().unwrap();
    let (config, journal) = journal_config(&dir);

    let live = stdout_json(&parley(&["--config", path_arg(&config), "demo"]));
    assert!(journal.exists());

    let replayed = stdout_json(&parley(&[
        "replay",
        "--journal",
        path_arg(&journal),
        "--viewer",
        "alice",
    ]));

    // Pins are per-viewer state and are not journaled
    assert_eq!(replayed["totalUnread"], live["totalUnread"]);
    let unread: Vec<_> = replayed["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["unreadCount"].as_u64().unwrap())
        .collect();
    assert_eq!(unread.iter().sum::<u64>(), 3);

    let matched = stdout_json(&parley(&[
        "replay",
        "--journal",
        path_arg(&journal),
        "--viewer",
        "alice",
        "--query",
        "LUNCH",
    ]));
    assert_eq!(matched["conversations"].as_array().unwrap().len(), 1);
}

#[test]
fn test_history_pages() {
    let dir = TempDir::new().unwrap();
    let (config, journal) = journal_config(&dir);
    let live = stdout_json(&parley(&["--config", path_arg(&config), "demo"]));

    let lunch = live["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["subject"] == "Lunch")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let page = stdout_json(&parley(&[
        "history",
        "--journal",
        path_arg(&journal),
        "--conversation",
        &lunch,
        "--limit",
        "2",
    ]));
    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["seq"], 1);
    assert_eq!(messages[0]["deliveryState"], "read");
    assert_eq!(page["hasMore"], true);
    assert_eq!(page["nextCursor"], 2);
}

#[test]
fn test_config_prints_toml() {
    let output = parley(&["config"]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("[engine]"));
    assert!(stdout.contains("preview_chars = 80"));
    assert!(stdout.contains("[journal]"));
}

#[test]
fn test_invalid_log_level_fails() {
    let output = parley(&["--log-level", "loud", "config"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_journal_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.journal");
    let output = parley(&["replay", "--journal", path_arg(&missing), "--viewer", "alice"]);
    assert!(!output.status.success());
}
