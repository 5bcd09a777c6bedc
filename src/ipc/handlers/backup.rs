use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

/// Explicit `workspacePath`, else the selected workspace.
fn workspace_param(state: &AppState, req: &Request) -> Option<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_param(state, req) else {
        return err(&req.id, "bad_params", "missing workspacePath", None);
    };
    let Some(out_path) = req.params.get("outPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };

    match backup::export_workspace_bundle(&workspace, &PathBuf::from(out_path)) {
        Ok(summary) => {
            tracing::info!(out = out_path, sha256 = %summary.sha256, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path,
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                    "sha256": summary.sha256,
                }),
            )
        }
        Err(e) => err(&req.id, "backup_failed", format!("{e:#}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = workspace_param(state, req) else {
        return err(&req.id, "bad_params", "missing workspacePath", None);
    };
    let Some(in_path) = req.params.get("inPath").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };

    let is_current = state.workspace.as_deref() == Some(workspace.as_path());
    // Release the connection before the database file is replaced. The editor
    // is set aside and only dropped once the restore succeeds.
    let editor = if is_current {
        state.db = None;
        state.editor.take()
    } else {
        None
    };

    let summary = match backup::import_workspace_bundle(&PathBuf::from(in_path), &workspace) {
        Ok(s) => s,
        Err(e) => {
            if is_current {
                match db::open_db(&workspace) {
                    Ok(conn) => {
                        state.db = Some(conn);
                        state.editor = editor;
                    }
                    Err(reopen) => {
                        tracing::error!(error = %format!("{reopen:#}"), "workspace reopen failed");
                    }
                }
            }
            tracing::warn!(error = %format!("{e:#}"), "workspace bundle import rejected");
            return err(&req.id, "backup_failed", format!("{e:#}"), None);
        }
    };

    if is_current {
        if editor.as_ref().is_some_and(|e| e.is_dirty()) {
            tracing::warn!("restored bundle replaces unsaved permission edits");
        }
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:#}"), None),
        }
    }
    tracing::info!(
        workspace = %workspace.display(),
        format = %summary.bundle_format_detected,
        "workspace bundle imported"
    );

    ok(
        &req.id,
        json!({
            "ok": true,
            "workspacePath": workspace.to_string_lossy(),
            "bundleFormatDetected": summary.bundle_format_detected,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        _ => None,
    }
}
