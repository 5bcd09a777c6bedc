use crate::perms::{Catalog, PermissionFlag, PermissionMatrix, PermissionSet};

pub const MODULES: [&str; 9] = [
    "Students",
    "Teachers",
    "Departments",
    "Admissions",
    "Library",
    "Fees",
    "Examinations",
    "Announcements",
    "Learning",
];

pub const ROLES: [&str; 6] = [
    "Admin",
    "Teacher",
    "Accountant",
    "Librarian",
    "Student",
    "Parent",
];

pub fn seed_catalog() -> Catalog {
    Catalog::from_static(&MODULES, &ROLES)
}

fn seed_cell(module: &str, role: &str) -> PermissionSet {
    use PermissionFlag::*;

    match (role, module) {
        ("Admin", _) => PermissionSet::all(),
        ("Teacher", "Examinations" | "Announcements" | "Learning") => {
            PermissionSet::of(&[View, Create, Edit])
        }
        ("Teacher", _) => PermissionSet::of(&[View]),
        ("Accountant", "Fees") => PermissionSet::all(),
        ("Accountant", "Students") => PermissionSet::of(&[View]),
        ("Librarian", "Library") => PermissionSet::of(&[View, Create, Edit]),
        ("Librarian", "Students") => PermissionSet::of(&[View]),
        ("Student", "Library" | "Examinations" | "Announcements" | "Learning") => {
            PermissionSet::of(&[View])
        }
        ("Parent", "Fees" | "Examinations" | "Announcements") => PermissionSet::of(&[View]),
        _ => PermissionSet::empty(),
    }
}

/// Matrix the editor starts from when the workspace has nothing saved.
pub fn seed_matrix() -> PermissionMatrix {
    let catalog = seed_catalog();
    let mut matrix = PermissionMatrix::empty(catalog);
    for module in MODULES {
        for role in ROLES {
            let _ = matrix.set(module, role, seed_cell(module, role));
        }
    }
    matrix
}
