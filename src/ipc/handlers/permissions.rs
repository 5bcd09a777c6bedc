use crate::db;
use crate::fixture;
use crate::ipc::error::{err, ok, perm_err};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::perms::{MatrixEditor, Notice, PermissionFlag, PermissionMatrix};
use serde_json::json;

fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// (module, role, flag) triple shared by toggle and check.
fn cell_params(req: &Request) -> Result<(&str, &str, PermissionFlag), serde_json::Value> {
    let module = str_param(req, "module")?;
    let role = str_param(req, "role")?;
    let flag = str_param(req, "flag")?
        .parse::<PermissionFlag>()
        .map_err(|e| perm_err(&req.id, &e))?;
    Ok((module, role, flag))
}

fn not_open(req: &Request) -> serde_json::Value {
    err(
        &req.id,
        "not_open",
        "open the permission editor first",
        None,
    )
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (matrix, source) = match db::load_matrix(conn) {
        Ok(Some(m)) => (m, "saved"),
        Ok(None) => (fixture::seed_matrix(), "seed"),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if state.editor.as_ref().is_some_and(|e| e.is_dirty()) {
        tracing::warn!("reopening permission editor drops unsaved edits");
    }
    tracing::info!(source, cells = matrix.cell_count(), "permission editor opened");

    let editor = MatrixEditor::new(matrix);
    let result = json!({
        "catalog": editor.matrix().catalog().to_json(),
        "matrix": editor.matrix().to_json(),
        "dirty": editor.is_dirty(),
        "source": source,
    });
    state.editor = Some(editor);
    ok(&req.id, result)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(editor) = state.editor.as_ref() else {
        return not_open(req);
    };
    ok(
        &req.id,
        json!({
            "catalog": editor.matrix().catalog().to_json(),
            "matrix": editor.matrix().to_json(),
            "dirty": editor.is_dirty(),
            "changedCells": editor.changed_cells(),
        }),
    )
}

fn handle_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (module, role, flag) = match cell_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(editor) = state.editor.as_mut() else {
        return not_open(req);
    };
    match editor.toggle(module, role, flag) {
        Ok(perms) => {
            tracing::debug!(module, role, %flag, "permission toggled");
            ok(
                &req.id,
                json!({
                    "module": module,
                    "role": role,
                    "permissions": perms.to_json(),
                    "dirty": editor.is_dirty(),
                }),
            )
        }
        Err(e) => perm_err(&req.id, &e),
    }
}

fn handle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (module, role, flag) = match cell_params(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(editor) = state.editor.as_ref() else {
        return not_open(req);
    };
    match editor.allows(module, role, flag) {
        Ok(allowed) => ok(&req.id, json!({ "allowed": allowed })),
        Err(e) => perm_err(&req.id, &e),
    }
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(editor) = state.editor.as_mut() else {
        return not_open(req);
    };

    let record = match editor.save(|matrix, changed| db::save_matrix(conn, matrix, changed)) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "permission save failed; edits kept");
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "dirty": editor.is_dirty(), "retryable": true })),
            );
        }
    };

    let message = match setup::save_notice(conn) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to default save notice");
            Some(setup::DEFAULT_SAVE_NOTICE.to_string())
        }
    };
    let notice = message.map(|message| Notice {
        level: "success",
        message,
    });
    tracing::info!(
        save_id = %record.id,
        changed = record.changed_count,
        "permissions saved"
    );

    ok(
        &req.id,
        json!({
            "saveId": record.id,
            "savedAt": record.saved_at,
            "changedCells": record.changed_count,
            "dirty": editor.is_dirty(),
            "notice": notice,
        }),
    )
}

fn handle_discard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(editor) = state.editor.as_mut() else {
        return not_open(req);
    };
    editor.discard();
    ok(
        &req.id,
        json!({
            "matrix": editor.matrix().to_json(),
            "dirty": editor.is_dirty(),
        }),
    )
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(editor) = state.editor.as_ref() else {
        return not_open(req);
    };
    ok(
        &req.id,
        json!({
            "catalog": editor.matrix().catalog().to_json(),
            "matrix": editor.matrix().to_json(),
        }),
    )
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(editor) = state.editor.as_mut() else {
        return not_open(req);
    };
    let Some(raw) = req.params.get("matrix") else {
        return err(&req.id, "bad_params", "missing matrix", None);
    };
    let catalog = editor.matrix().catalog().clone();
    let imported = match PermissionMatrix::from_json(catalog, raw) {
        Ok(m) => m,
        Err(e) => return perm_err(&req.id, &e),
    };
    if let Err(e) = editor.replace(imported) {
        return perm_err(&req.id, &e);
    }
    ok(
        &req.id,
        json!({
            "dirty": editor.is_dirty(),
            "changedCells": editor.changed_cells(),
        }),
    )
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let configured = match setup::history_limit(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => configured,
        Some(v) => match v.as_i64() {
            Some(n) if n >= 1 => n.min(configured),
            _ => return err(&req.id, "bad_params", "limit must be a positive integer", None),
        },
    };
    match db::list_saves(conn, limit as usize) {
        Ok(saves) => ok(&req.id, json!({ "saves": saves })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "permissions.open" => Some(handle_open(state, req)),
        "permissions.get" => Some(handle_get(state, req)),
        "permissions.toggle" => Some(handle_toggle(state, req)),
        "permissions.check" => Some(handle_check(state, req)),
        "permissions.save" => Some(handle_save(state, req)),
        "permissions.discard" => Some(handle_discard(state, req)),
        "permissions.export" => Some(handle_export(state, req)),
        "permissions.import" => Some(handle_import(state, req)),
        "permissions.history" => Some(handle_history(state, req)),
        _ => None,
    }
}
