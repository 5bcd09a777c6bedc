use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("campus-router-smoke");
    let bundle_out = workspace.join("smoke-backup.campus.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, "2", "permissions.open", json!({}));
    assert_eq!(error_code(&early), Some("no_workspace"));

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let not_open = request(&mut stdin, &mut reader, "4", "permissions.get", json!({}));
    assert_eq!(error_code(&not_open), Some("not_open"));

    let _ = request(&mut stdin, &mut reader, "5", "permissions.open", json!({}));
    let _ = request(&mut stdin, &mut reader, "6", "permissions.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "permissions.toggle",
        json!({ "module": "Library", "role": "Parent", "flag": "view" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "permissions.check",
        json!({ "module": "Library", "role": "Parent", "flag": "view" }),
    );
    let _ = request(&mut stdin, &mut reader, "9", "permissions.export", json!({}));
    let _ = request(&mut stdin, &mut reader, "10", "permissions.discard", json!({}));
    let _ = request(&mut stdin, &mut reader, "11", "permissions.save", json!({}));
    let _ = request(&mut stdin, &mut reader, "12", "permissions.history", json!({}));
    let _ = request(&mut stdin, &mut reader, "13", "setup.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "setup.update",
        json!({ "section": "permissions", "patch": { "historyLimit": 10 } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );

    writeln!(stdin, "{}", json!({ "id": "17", "method": "grades.list", "params": {} }))
        .expect("write unknown method");
    stdin.flush().expect("flush");
    let unknown = read_response(&mut reader);
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    writeln!(stdin, "this is not json").expect("write garbage");
    stdin.flush().expect("flush");
    let garbage = read_response(&mut reader);
    assert_eq!(garbage["ok"], false);
    assert_eq!(error_code(&garbage), Some("bad_json"));

    // The loop keeps serving after a bad line.
    let again = request(&mut stdin, &mut reader, "18", "health", json!({}));
    assert_eq!(again["ok"], true);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
