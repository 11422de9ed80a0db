#![allow(missing_docs)]

//! End-to-end tests for the `dsnap` snapshot tool.

use std::fs;
use std::io::Write;

use assert_cmd::Command;
use tempfile::tempdir;

const SEED: &str = r#"
[[resource]]
path = "/app/a/x"
kind = "input"
type = "numeric"
units = "count"
ts = 1.0
value = 42.0

[[resource]]
path = "/app/msg"
kind = "output"
type = "string"
value = "hello"
"#;

fn write_seed(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("seed.toml");
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(SEED.as_bytes()).unwrap();
    path
}

#[test]
fn snapshot_to_stdout() {
    let dir = tempdir().unwrap();
    let seed = write_seed(&dir);

    let output = Command::cargo_bin("dsnap")
        .unwrap()
        .arg("--seed")
        .arg(&seed)
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(parsed["root"], "/");
    assert_eq!(parsed["upserted"]["app"]["a"]["x"]["value"], 42.0);
    assert_eq!(parsed["upserted"]["app"]["msg"]["value"], "hello");
}

#[test]
fn snapshot_to_file_with_subtree_path() {
    let dir = tempdir().unwrap();
    let seed = write_seed(&dir);
    let out = dir.path().join("snap.json");

    Command::cargo_bin("dsnap")
        .unwrap()
        .arg("--seed")
        .arg(&seed)
        .arg("-p")
        .arg("/app/a")
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(parsed["root"], "/app/a");
    assert_eq!(parsed["upserted"]["x"]["type"], 2);
    assert!(parsed["upserted"].get("msg").is_none());
}

#[test]
fn since_in_the_future_yields_bare_tree() {
    let dir = tempdir().unwrap();
    let seed = write_seed(&dir);

    let output = Command::cargo_bin("dsnap")
        .unwrap()
        .arg("--seed")
        .arg(&seed)
        .arg("-s")
        .arg("99999999999")
        .output()
        .unwrap();

    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    // Everything is new, so the created entries still appear, but without
    // value fields (nothing is timely).
    assert!(parsed["upserted"]["app"]["a"]["x"].is_object());
    assert!(parsed["upserted"]["app"]["a"]["x"].get("value").is_none());
}

#[test]
fn unknown_format_fails() {
    Command::cargo_bin("dsnap")
        .unwrap()
        .arg("-f")
        .arg("xml")
        .assert()
        .failure();
}

#[test]
fn missing_snapshot_path_fails() {
    Command::cargo_bin("dsnap")
        .unwrap()
        .arg("-p")
        .arg("/no/such/path")
        .assert()
        .failure();
}

#[test]
fn bad_seed_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[[resource]]\npath = \"/x\"\ntype = \"float\"\n").unwrap();

    Command::cargo_bin("dsnap")
        .unwrap()
        .arg("--seed")
        .arg(&path)
        .assert()
        .failure();
}
