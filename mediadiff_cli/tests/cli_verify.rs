use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn run_cli(args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_mediadiff");
    let config_dir = TempDir::new().expect("config dir");
    Command::new(exe)
        .args(args)
        .env("XDG_CONFIG_HOME", config_dir.path())
        .env("APPDATA", config_dir.path())
        .env("HOME", config_dir.path())
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run mediadiff")
}

fn run_cli_json(args: &[&str], expected_code: i32) -> Value {
    let output = run_cli(args);
    assert_eq!(
        output.status.code(),
        Some(expected_code),
        "unexpected exit status {}\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout not utf-8");
    serde_json::from_str(&stdout).expect("invalid json output")
}

fn dat(rows: &[[&str; 3]]) -> String {
    let mut content = String::from("þBATESþ\u{14}þPATHþ\u{14}þMD5SUMþ\r\n");
    for row in rows {
        let quoted: Vec<String> = row.iter().map(|f| format!("þ{}þ", f)).collect();
        content.push_str(&quoted.join("\u{14}"));
        content.push_str("\r\n");
    }
    content
}

fn production(root: &Path) -> (String, String) {
    let media = root.join("media");
    fs::create_dir_all(media.join("NATIVES")).unwrap();
    fs::write(media.join("NATIVES/A1.tif"), b"").unwrap();
    let load_file = root.join("PROD.dat");
    (
        load_file.to_string_lossy().into_owned(),
        media.to_string_lossy().into_owned(),
    )
}

fn kinds(report: &Value) -> Vec<String> {
    report["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["kind"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_disk_clean_production_exits_zero() {
    let temp = TempDir::new().unwrap();
    let (load_file, media) = production(temp.path());
    fs::write(&load_file, dat(&[["A1", "NATIVES\\A1.tif", EMPTY_MD5]])).unwrap();

    let report = run_cli_json(&["disk", &load_file, &media, "--json"], 0);

    assert_eq!(kinds(&report), vec!["MATCH"]);
    assert_eq!(report["complete"], true);
    assert_eq!(report["summary"]["matched"], 1);
    assert_eq!(
        report["results"][0]["manifest_entry"]["relative_path"],
        "NATIVES/A1.tif"
    );
}

#[test]
fn test_disk_discrepancies_exit_two() {
    let temp = TempDir::new().unwrap();
    let (load_file, media) = production(temp.path());
    fs::write(Path::new(&media).join("NATIVES/EXTRA.tif"), b"x").unwrap();
    fs::write(
        &load_file,
        dat(&[
            ["A1", "NATIVES\\A1.tif", "ffffffffffffffffffffffffffffffff"],
            ["A2", "NATIVES\\A2.tif", EMPTY_MD5],
        ]),
    )
    .unwrap();

    let report = run_cli_json(&["disk", &load_file, &media, "--json", "--diff-only"], 2);

    assert_eq!(
        kinds(&report),
        vec!["HASH_MISMATCH", "MISSING_ON_DISK", "MISSING_IN_MANIFEST"]
    );
    assert_eq!(report["summary"]["total"], 3);
}

#[test]
fn test_manifest_mode_with_csv_dialect() {
    let temp = TempDir::new().unwrap();
    let left = temp.path().join("left.csv");
    let right = temp.path().join("right.csv");
    fs::write(
        &left,
        format!("DOCID,FILE,SHA1\nD1,a.pdf,{}\n", "da39a3ee5e6b4b0d3255bfef95601890afd80709"),
    )
    .unwrap();
    fs::write(
        &right,
        format!("DOCID,FILE,SHA1\nD1,a.pdf,{}\n", "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709"),
    )
    .unwrap();

    let report = run_cli_json(
        &[
            "manifest",
            left.to_str().unwrap(),
            right.to_str().unwrap(),
            "--delimiter",
            ",",
            "--quote",
            "\"",
            "--id-column",
            "DOCID",
            "--path-column",
            "FILE",
            "--hash-column",
            "sha1=SHA1",
            "--json",
        ],
        0,
    );

    assert_eq!(kinds(&report), vec!["MATCH"]);
    assert_eq!(report["header_diff"]["left_only"].as_array().unwrap().len(), 0);
}

#[test]
fn test_missing_column_is_fatal() {
    let temp = TempDir::new().unwrap();
    let (load_file, media) = production(temp.path());
    fs::write(&load_file, "þBATESþ\u{14}þFILEþ\r\nþA1þ\u{14}þa.tifþ\r\n").unwrap();

    let output = run_cli(&["disk", &load_file, &media, "--json"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("PATH"));
}

#[test]
fn test_unknown_algorithm_fails_before_scanning() {
    let temp = TempDir::new().unwrap();
    let (load_file, media) = production(temp.path());
    fs::write(&load_file, dat(&[["A1", "NATIVES\\A1.tif", EMPTY_MD5]])).unwrap();

    let output = run_cli(&["disk", &load_file, &media, "--algorithm", "crc64"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("crc64"));
}

#[test]
fn test_csv_output() {
    let temp = TempDir::new().unwrap();
    let (load_file, media) = production(temp.path());
    fs::write(&load_file, dat(&[["A1", "NATIVES\\A1.tif", EMPTY_MD5]])).unwrap();

    let output = run_cli(&["disk", &load_file, &media, "--csv"]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("kind,identifier,path,counterpart,detail"));
    assert_eq!(
        lines.next(),
        Some("MATCH,A1,NATIVES/A1.tif,NATIVES/A1.tif,verified MD5")
    );
}

#[test]
fn test_inventory_reports_column_differences() {
    let temp = TempDir::new().unwrap();
    let left = temp.path().join("left.dat");
    let right = temp.path().join("right.dat");
    fs::write(&left, dat(&[["A1", "a.tif", EMPTY_MD5], ["A2", "b.tif", ""]])).unwrap();
    fs::write(
        &right,
        "þBATESþ\u{14}þPATHþ\u{14}þMD5SUMþ\u{14}þAUTHORþ\r\nþA1þ\u{14}þa.tifþ\u{14}þþ\u{14}þLeeþ\r\nþA2þ\u{14}þb.tifþ\u{14}þþ\u{14}þþ\r\n",
    )
    .unwrap();

    let diff = run_cli_json(
        &["inventory", left.to_str().unwrap(), right.to_str().unwrap(), "--json"],
        2,
    );

    assert_eq!(diff["left_rows"], 2);
    assert_eq!(diff["header"]["right_only"][0], "AUTHOR");
    assert_eq!(diff["count_mismatches"][0]["column"], "MD5SUM");
    assert_eq!(diff["count_mismatches"][0]["left"], 1);
    assert_eq!(diff["count_mismatches"][0]["right"], 0);
}

#[test]
fn test_inventory_value_counts_and_file_digests() {
    let temp = TempDir::new().unwrap();
    let left = temp.path().join("left.dat");
    let right = temp.path().join("right.dat");
    fs::write(&left, dat(&[["A1", "a.tif", ""], ["A2", "a.tif", ""], ["A3", "b.tif", ""]])).unwrap();
    fs::write(&right, dat(&[["A1", "a.tif", ""], ["A2", "c.tif", ""], ["A3", "b.tif", ""]])).unwrap();

    let diff = run_cli_json(
        &[
            "inventory",
            left.to_str().unwrap(),
            right.to_str().unwrap(),
            "--column",
            "PATH",
            "--file-digest",
            "--json",
        ],
        2,
    );

    assert!(diff["count_mismatches"].as_array().unwrap().is_empty());
    assert_eq!(diff["values"]["column"], "PATH");
    assert_eq!(diff["values"]["count_mismatches"][0]["value"], "a.tif");
    assert_eq!(diff["values"]["count_mismatches"][0]["left"], 2);
    assert_eq!(diff["values"]["right_only"][0]["value"], "c.tif");
    assert_eq!(diff["file_digests"]["algorithm"], "MD5");
    assert_ne!(diff["file_digests"]["left"], diff["file_digests"]["right"]);

    let same = run_cli_json(
        &[
            "inventory",
            left.to_str().unwrap(),
            left.to_str().unwrap(),
            "--column",
            "PATH",
            "--file-digest",
            "sha1",
            "--json",
        ],
        0,
    );
    assert_eq!(same["file_digests"]["algorithm"], "SHA1");
    assert_eq!(same["file_digests"]["left"], same["file_digests"]["right"]);
}
