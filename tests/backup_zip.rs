#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn write_sqlite(path: &Path, marker: &str) -> Vec<u8> {
    {
        let conn = rusqlite::Connection::open(path).expect("create sqlite file");
        conn.execute("CREATE TABLE marker(value TEXT NOT NULL)", [])
            .expect("create table");
        conn.execute("INSERT INTO marker(value) VALUES(?)", [marker])
            .expect("insert marker");
    }
    std::fs::read(path).expect("read sqlite file")
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("campus-backup-src");
    let workspace2 = temp_dir("campus-backup-dst");
    let out_dir = temp_dir("campus-backup-out");

    let db_src = workspace.join("campus.sqlite3");
    let bytes = write_sqlite(&db_src, "bundle");

    let bundle_path = out_dir.join("workspace.campus.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.sha256));
    archive
        .by_name("db/campus.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("campus.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entry_is_rejected() {
    let out_dir = temp_dir("campus-backup-tamper");
    let workspace = temp_dir("campus-backup-tamper-dst");

    let bundle_path = out_dir.join("tampered.campus.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT_V1,
                "dbSha256": "00".repeat(32),
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/campus.sqlite3", opts).expect("db entry");
        zip.write_all(b"not what the manifest promised")
            .expect("write db");
        zip.finish().expect("finish zip");
    }

    let res = backup::import_workspace_bundle(&bundle_path, &workspace);
    assert!(res.is_err());
    assert!(!workspace.join("campus.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_sqlite_import_is_supported() {
    let out_dir = temp_dir("campus-backup-legacy");
    let workspace = temp_dir("campus-backup-legacy-dst");

    let legacy_file = out_dir.join("legacy.sqlite3");
    let bytes = write_sqlite(&legacy_file, "legacy");

    let import =
        backup::import_workspace_bundle(&legacy_file, &workspace).expect("import legacy sqlite");
    assert_eq!(import.bundle_format_detected, backup::LEGACY_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.join("campus.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_sqlite_file_is_rejected_and_keeps_existing_database() {
    let out_dir = temp_dir("campus-backup-not-db");
    let workspace = temp_dir("campus-backup-not-db-dst");

    let existing = write_sqlite(&workspace.join("campus.sqlite3"), "keep me");
    let notes = out_dir.join("notes.txt");
    std::fs::write(&notes, b"hello, not a database").expect("write notes");

    let res = backup::import_workspace_bundle(&notes, &workspace);
    assert!(res.is_err());
    let after = std::fs::read(workspace.join("campus.sqlite3")).expect("read workspace db");
    assert_eq!(after, existing);
    assert!(!workspace.join("campus.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_with_non_sqlite_database_entry_is_rejected() {
    let out_dir = temp_dir("campus-backup-bad-entry");
    let workspace = temp_dir("campus-backup-bad-entry-dst");

    let bundle_path = out_dir.join("bad-entry.campus.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            serde_json::json!({ "format": backup::BUNDLE_FORMAT_V1 })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/campus.sqlite3", opts).expect("db entry");
        zip.write_all(b"plain text").expect("write db");
        zip.finish().expect("finish zip");
    }

    let res = backup::import_workspace_bundle(&bundle_path, &workspace);
    assert!(res.is_err());
    assert!(!workspace.join("campus.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
