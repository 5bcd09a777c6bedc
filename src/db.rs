use crate::perms::{Catalog, PermissionMatrix, PermissionSet};
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "campus.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permission_modules(
            name TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS permission_roles(
            name TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS permission_cells(
            module TEXT NOT NULL,
            role TEXT NOT NULL,
            flags INTEGER NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(module, role),
            FOREIGN KEY(module) REFERENCES permission_modules(name),
            FOREIGN KEY(role) REFERENCES permission_roles(name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permission_cells_role ON permission_cells(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permission_saves(
            id TEXT PRIMARY KEY,
            saved_at TEXT NOT NULL,
            cell_count INTEGER NOT NULL,
            changed_count INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permission_saves_saved_at ON permission_saves(saved_at)",
        [],
    )?;

    // Workspaces created before save history tracked diffs lack changed_count.
    ensure_saves_changed_count(&conn)?;

    Ok(conn)
}

fn ensure_saves_changed_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "permission_saves", "changed_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE permission_saves ADD COLUMN changed_count INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Load the last saved matrix, or `None` if this workspace never saved one.
pub fn load_matrix(conn: &Connection) -> anyhow::Result<Option<PermissionMatrix>> {
    let modules = names_in_order(conn, "permission_modules")?;
    let roles = names_in_order(conn, "permission_roles")?;
    if modules.is_empty() || roles.is_empty() {
        return Ok(None);
    }
    let catalog = Catalog::new(modules, roles).context("stored catalog is invalid")?;
    let mut matrix = PermissionMatrix::empty(catalog);

    let mut stmt = conn.prepare("SELECT module, role, flags FROM permission_cells")?;
    let cells = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (module, role, bits) in cells {
        let perms = u8::try_from(bits)
            .ok()
            .and_then(PermissionSet::from_bits)
            .ok_or_else(|| anyhow!("invalid flags {} for {}/{}", bits, module, role))?;
        matrix.set(&module, &role, perms)?;
    }
    Ok(Some(matrix))
}

fn names_in_order(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let sql = format!("SELECT name FROM {} ORDER BY sort_order, name", table);
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub id: String,
    pub saved_at: String,
    pub cell_count: i64,
    pub changed_count: i64,
}

/// Replace the stored catalog and every cell in one transaction, then log the save.
pub fn save_matrix(
    conn: &Connection,
    matrix: &PermissionMatrix,
    changed_count: usize,
) -> anyhow::Result<SaveRecord> {
    let saved_at = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;

    // Cells first: they reference the catalog tables.
    tx.execute("DELETE FROM permission_cells", [])?;
    tx.execute("DELETE FROM permission_modules", [])?;
    tx.execute("DELETE FROM permission_roles", [])?;

    let catalog = matrix.catalog();
    for (i, name) in catalog.modules().iter().enumerate() {
        tx.execute(
            "INSERT INTO permission_modules(name, sort_order) VALUES(?, ?)",
            (name, i as i64),
        )?;
    }
    for (i, name) in catalog.roles().iter().enumerate() {
        tx.execute(
            "INSERT INTO permission_roles(name, sort_order) VALUES(?, ?)",
            (name, i as i64),
        )?;
    }
    {
        let mut stmt = tx.prepare(
            "INSERT INTO permission_cells(module, role, flags, updated_at) VALUES(?, ?, ?, ?)",
        )?;
        for (module, role, perms) in matrix.iter() {
            stmt.execute((module, role, perms.bits() as i64, &saved_at))?;
        }
    }

    let record = SaveRecord {
        id: Uuid::new_v4().to_string(),
        saved_at,
        cell_count: matrix.cell_count() as i64,
        changed_count: changed_count as i64,
    };
    tx.execute(
        "INSERT INTO permission_saves(id, saved_at, cell_count, changed_count) VALUES(?, ?, ?, ?)",
        (
            &record.id,
            &record.saved_at,
            record.cell_count,
            record.changed_count,
        ),
    )?;
    tx.commit()?;
    Ok(record)
}

/// Newest first.
pub fn list_saves(conn: &Connection, limit: usize) -> anyhow::Result<Vec<SaveRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, saved_at, cell_count, changed_count
         FROM permission_saves
         ORDER BY saved_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(SaveRecord {
                id: row.get(0)?,
                saved_at: row.get(1)?,
                cell_count: row.get(2)?,
                changed_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
