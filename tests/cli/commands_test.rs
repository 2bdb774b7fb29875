//! CLI contract tests: each subcommand prints JSON and shares one database.

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;

const ALICE: &str = "00000000-0000-0000-0000-00000000000a";
const BOB: &str = "00000000-0000-0000-0000-00000000000b";

fn duet(dir: &Path, acting: &str, args: &[&str]) -> Value {
    let output = Command::cargo_bin("duet")
        .expect("binary should build")
        .env("DUET_CONFIG_PATH", dir.join("missing.toml"))
        .env("DUET_DATABASE_PATH", dir.join("duet.db"))
        .env("RUST_LOG", "warn")
        .arg("--as")
        .arg(acting)
        .args(args)
        .output()
        .expect("binary should run");
    assert!(
        output.status.success(),
        "duet {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn invite_accept_and_send_through_the_cli() {
    let tmp = tempfile::tempdir().expect("should create temp dir");

    let invited = duet(tmp.path(), ALICE, &["invite", "--to", BOB, "--message", "hello"]);
    assert_eq!(invited["conversation"]["status"], "pending");
    let invitation_id = invited["invitation"]["id"].to_string();
    let conversation_id = invited["conversation"]["id"].to_string();

    let pending = duet(tmp.path(), BOB, &["pending"]);
    assert_eq!(pending.as_array().map(Vec::len), Some(1));

    let accepted = duet(tmp.path(), BOB, &["accept", &invitation_id]);
    assert_eq!(accepted["conversation"]["status"], "active");

    let sent = duet(tmp.path(), BOB, &["send", &conversation_id, "hi alice"]);
    assert_eq!(sent["body"]["content"], "hi alice");

    let history = duet(tmp.path(), ALICE, &["history", &conversation_id]);
    assert_eq!(history.as_array().map(Vec::len), Some(2));

    let list = duet(tmp.path(), ALICE, &["list"]);
    assert_eq!(list[0]["counterpart"], BOB);
}

#[test]
fn missing_acting_party_fails() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    Command::cargo_bin("duet")
        .expect("binary should build")
        .env("DUET_CONFIG_PATH", tmp.path().join("missing.toml"))
        .env("DUET_DATABASE_PATH", tmp.path().join("duet.db"))
        .arg("pending")
        .assert()
        .failure();
}

#[test]
fn refused_send_exits_with_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let invited = duet(tmp.path(), ALICE, &["invite", "--to", BOB]);
    let conversation_id = invited["conversation"]["id"].to_string();

    Command::cargo_bin("duet")
        .expect("binary should build")
        .env("DUET_CONFIG_PATH", tmp.path().join("missing.toml"))
        .env("DUET_DATABASE_PATH", tmp.path().join("duet.db"))
        .args(["--as", ALICE, "send", &conversation_id, "too early"])
        .assert()
        .failure();
}
