use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

pub const DEFAULT_SAVE_NOTICE: &str = "Permissions updated successfully";
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Clone, Copy)]
enum SetupSection {
    Notifications,
    Permissions,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "notifications" => Some(Self::Notifications),
            "permissions" => Some(Self::Permissions),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Notifications => "setup.notifications",
            Self::Permissions => "setup.permissions",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Notifications => json!({
            "showSaveNotice": true,
            "saveNotice": DEFAULT_SAVE_NOTICE
        }),
        SetupSection::Permissions => json!({
            "historyLimit": DEFAULT_HISTORY_LIMIT
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Notifications => match k.as_str() {
                "showSaveNotice" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "saveNotice" => {
                    let s = parse_string_max(v, k, 120)?;
                    if s.is_empty() {
                        return Err("saveNotice must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown notifications field: {}", k)),
            },
            SetupSection::Permissions => match k.as_str() {
                "historyLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 500)?));
                }
                _ => return Err(format!("unknown permissions field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), %msg, "ignoring stored setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Message to show after a successful save, or `None` when notices are off.
pub fn save_notice(conn: &rusqlite::Connection) -> anyhow::Result<Option<String>> {
    let n = load_section(conn, SetupSection::Notifications)?;
    if !n.get("showSaveNotice").and_then(|v| v.as_bool()).unwrap_or(true) {
        return Ok(None);
    }
    Ok(Some(
        n.get("saveNotice")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SAVE_NOTICE)
            .to_string(),
    ))
}

pub fn history_limit(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let p = load_section(conn, SetupSection::Permissions)?;
    Ok(p
        .get("historyLimit")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_HISTORY_LIMIT))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let notifications = match load_section(conn, SetupSection::Notifications) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let permissions = match load_section(conn, SetupSection::Permissions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "notifications": notifications,
            "permissions": permissions
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
