use bitflags::bitflags;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("unknown permission flag: {0}")]
    UnknownFlag(String),
    #[error("matrix is missing cell {module}/{role}")]
    IncompleteMatrix { module: String, role: String },
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
}

impl PermissionError {
    /// Wire error code used by the IPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownModule(_) => "unknown_module",
            Self::UnknownRole(_) => "unknown_role",
            Self::UnknownFlag(_) => "unknown_flag",
            Self::IncompleteMatrix { .. } | Self::InvalidCatalog(_) => "bad_params",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionFlag {
    View,
    Create,
    Edit,
    Approve,
}

impl PermissionFlag {
    pub const ALL: [PermissionFlag; 4] = [
        PermissionFlag::View,
        PermissionFlag::Create,
        PermissionFlag::Edit,
        PermissionFlag::Approve,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Approve => "approve",
        }
    }

    fn bit(self) -> PermissionSet {
        match self {
            Self::View => PermissionSet::VIEW,
            Self::Create => PermissionSet::CREATE,
            Self::Edit => PermissionSet::EDIT,
            Self::Approve => PermissionSet::APPROVE,
        }
    }
}

impl fmt::Display for PermissionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionFlag {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "approve" => Ok(Self::Approve),
            _ => Err(PermissionError::UnknownFlag(s.to_string())),
        }
    }
}

bitflags! {
    /// Flags granted to one (module, role) cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PermissionSet: u8 {
        const VIEW = 0b0001;
        const CREATE = 0b0010;
        const EDIT = 0b0100;
        const APPROVE = 0b1000;
    }
}

impl PermissionSet {
    pub fn of(flags: &[PermissionFlag]) -> Self {
        flags.iter().fold(Self::empty(), |acc, f| acc | f.bit())
    }

    pub fn has(self, flag: PermissionFlag) -> bool {
        self.contains(flag.bit())
    }

    pub fn toggled(self, flag: PermissionFlag) -> Self {
        self.symmetric_difference(flag.bit())
    }

    /// Flags in canonical order (View, Create, Edit, Approve).
    pub fn flags(self) -> Vec<PermissionFlag> {
        PermissionFlag::ALL
            .into_iter()
            .filter(|f| self.has(*f))
            .collect()
    }

    pub fn to_json(self) -> Value {
        Value::Array(
            self.flags()
                .into_iter()
                .map(|f| Value::String(f.as_str().to_string()))
                .collect(),
        )
    }

    pub fn from_json(v: &Value) -> Result<Self, PermissionError> {
        let Some(items) = v.as_array() else {
            return Err(PermissionError::UnknownFlag(v.to_string()));
        };
        let mut set = Self::empty();
        for item in items {
            let Some(name) = item.as_str() else {
                return Err(PermissionError::UnknownFlag(item.to_string()));
            };
            set |= name.parse::<PermissionFlag>()?.bit();
        }
        Ok(set)
    }
}

/// Fixed module and role enumerations a matrix is laid out against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    modules: Vec<String>,
    roles: Vec<String>,
}

impl Catalog {
    pub fn new(modules: Vec<String>, roles: Vec<String>) -> Result<Self, PermissionError> {
        check_names("module", &modules)?;
        check_names("role", &roles)?;
        Ok(Self { modules, roles })
    }

    /// Build from compiled-in lists that are known to be unique and non-blank.
    pub(crate) fn from_static(modules: &[&str], roles: &[&str]) -> Self {
        let modules: Vec<String> = modules.iter().map(|s| s.to_string()).collect();
        let roles: Vec<String> = roles.iter().map(|s| s.to_string()).collect();
        debug_assert!(check_names("module", &modules).is_ok());
        debug_assert!(check_names("role", &roles).is_ok());
        Self { modules, roles }
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    fn module_index(&self, module: &str) -> Result<usize, PermissionError> {
        self.modules
            .iter()
            .position(|m| m == module)
            .ok_or_else(|| PermissionError::UnknownModule(module.to_string()))
    }

    fn role_index(&self, role: &str) -> Result<usize, PermissionError> {
        self.roles
            .iter()
            .position(|r| r == role)
            .ok_or_else(|| PermissionError::UnknownRole(role.to_string()))
    }

    pub fn to_json(&self) -> Value {
        json!({
            "modules": self.modules,
            "roles": self.roles,
            "flags": PermissionFlag::ALL.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
        })
    }
}

fn check_names(kind: &str, names: &[String]) -> Result<(), PermissionError> {
    if names.is_empty() {
        return Err(PermissionError::InvalidCatalog(format!(
            "{} list must not be empty",
            kind
        )));
    }
    let mut seen = HashSet::new();
    for n in names {
        if n.trim().is_empty() {
            return Err(PermissionError::InvalidCatalog(format!(
                "{} names must not be blank",
                kind
            )));
        }
        if !seen.insert(n.as_str()) {
            return Err(PermissionError::InvalidCatalog(format!(
                "duplicate {}: {}",
                kind, n
            )));
        }
    }
    Ok(())
}

/// Dense module x role grid of permission sets. Every catalog pair has a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    catalog: Catalog,
    // row-major by module
    cells: Vec<PermissionSet>,
}

impl PermissionMatrix {
    pub fn empty(catalog: Catalog) -> Self {
        let n = catalog.modules.len() * catalog.roles.len();
        Self {
            catalog,
            cells: vec![PermissionSet::empty(); n],
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn index(&self, module: &str, role: &str) -> Result<usize, PermissionError> {
        let m = self.catalog.module_index(module)?;
        let r = self.catalog.role_index(role)?;
        Ok(m * self.catalog.roles.len() + r)
    }

    pub fn get(&self, module: &str, role: &str) -> Result<PermissionSet, PermissionError> {
        Ok(self.cells[self.index(module, role)?])
    }

    pub fn set(
        &mut self,
        module: &str,
        role: &str,
        perms: PermissionSet,
    ) -> Result<(), PermissionError> {
        let i = self.index(module, role)?;
        self.cells[i] = perms;
        Ok(())
    }

    /// Flip one flag in one cell and return the cell's new set.
    pub fn toggle(
        &mut self,
        module: &str,
        role: &str,
        flag: PermissionFlag,
    ) -> Result<PermissionSet, PermissionError> {
        let i = self.index(module, role)?;
        self.cells[i] = self.cells[i].toggled(flag);
        Ok(self.cells[i])
    }

    /// All cells as (module, role, set), in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, PermissionSet)> + '_ {
        let roles = self.catalog.roles.len();
        self.cells.iter().enumerate().map(move |(i, p)| {
            (
                self.catalog.modules[i / roles].as_str(),
                self.catalog.roles[i % roles].as_str(),
                *p,
            )
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of cells whose sets differ. Matrices over different catalogs
    /// count every cell as changed.
    pub fn diff_count(&self, other: &PermissionMatrix) -> usize {
        if self.catalog != other.catalog {
            return self.cells.len();
        }
        self.cells
            .iter()
            .zip(other.cells.iter())
            .filter(|(a, b)| a != b)
            .count()
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (module, role, perms) in self.iter() {
            let row = out
                .entry(module.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(row) = row.as_object_mut() {
                row.insert(role.to_string(), perms.to_json());
            }
        }
        Value::Object(out)
    }

    /// Parse a full `{module: {role: [flags]}}` object against `catalog`.
    /// Every catalog cell must be present; extra keys are rejected.
    pub fn from_json(catalog: Catalog, v: &Value) -> Result<Self, PermissionError> {
        let Some(rows) = v.as_object() else {
            return Err(PermissionError::InvalidCatalog(
                "matrix must be an object".to_string(),
            ));
        };
        for (module, row) in rows {
            catalog.module_index(module)?;
            if let Some(row) = row.as_object() {
                for role in row.keys() {
                    catalog.role_index(role)?;
                }
            }
        }

        let mut matrix = Self::empty(catalog);
        let roles = matrix.catalog.roles.clone();
        let modules = matrix.catalog.modules.clone();
        for module in &modules {
            for role in &roles {
                let Some(cell) = rows.get(module).and_then(|r| r.get(role)) else {
                    return Err(PermissionError::IncompleteMatrix {
                        module: module.clone(),
                        role: role.clone(),
                    });
                };
                matrix.set(module, role, PermissionSet::from_json(cell)?)?;
            }
        }
        Ok(matrix)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub level: &'static str,
    pub message: String,
}

/// Owns the matrix being edited plus the unsaved-changes flag.
#[derive(Debug, Clone)]
pub struct MatrixEditor {
    matrix: PermissionMatrix,
    baseline: PermissionMatrix,
    dirty: bool,
}

impl MatrixEditor {
    pub fn new(matrix: PermissionMatrix) -> Self {
        Self {
            baseline: matrix.clone(),
            matrix,
            dirty: false,
        }
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn changed_cells(&self) -> usize {
        self.matrix.diff_count(&self.baseline)
    }

    pub fn toggle(
        &mut self,
        module: &str,
        role: &str,
        flag: PermissionFlag,
    ) -> Result<PermissionSet, PermissionError> {
        let next = self.matrix.toggle(module, role, flag)?;
        self.dirty = true;
        Ok(next)
    }

    pub fn allows(
        &self,
        module: &str,
        role: &str,
        flag: PermissionFlag,
    ) -> Result<bool, PermissionError> {
        Ok(self.matrix.get(module, role)?.has(flag))
    }

    /// Replace the whole matrix. The catalog must match the open one.
    pub fn replace(&mut self, matrix: PermissionMatrix) -> Result<(), PermissionError> {
        if matrix.catalog != self.matrix.catalog {
            return Err(PermissionError::InvalidCatalog(
                "imported matrix uses a different catalog".to_string(),
            ));
        }
        self.matrix = matrix;
        self.dirty = true;
        Ok(())
    }

    pub fn discard(&mut self) {
        self.matrix = self.baseline.clone();
        self.dirty = false;
    }

    /// Persist through `write`; on success the current matrix becomes the
    /// baseline and the dirty flag clears. On failure nothing changes.
    pub fn save<T, F>(&mut self, write: F) -> anyhow::Result<T>
    where
        F: FnOnce(&PermissionMatrix, usize) -> anyhow::Result<T>,
    {
        let changed = self.changed_cells();
        let out = write(&self.matrix, changed)?;
        self.baseline = self.matrix.clone();
        self.dirty = false;
        Ok(out)
    }
}
