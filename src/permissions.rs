//! Effective permission computation from static and dynamic ACLs.
//!
//! Static rights come from the catalog model. A `None` right is undecidable
//! until query time (row-level ACLs apply) and is treated as optimistically
//! allowed here; the row-rights summary machinery (TRS/TCRS) decides whether
//! asking the server for per-row rights is worthwhile.

use crate::column::VisibleColumn;
use crate::model::{Catalog, Table, TableKind};
use crate::types::Context;

/// Outcome of a coarse permission check, with the reason for a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

impl Permission {
    fn allow() -> Self {
        Permission {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Permission {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// A null static right cannot be decided without the server; assume allowed.
pub fn check_permission(right: Option<bool>) -> bool {
    right.unwrap_or(true)
}

/// Whether rows can be created through this table.
pub fn can_create(table: &Table, entry_create_columns: &[VisibleColumn]) -> Permission {
    if table.kind == TableKind::View {
        return Permission::deny("table is a view");
    }
    if table.is_generated() {
        return Permission::deny("table generated");
    }
    if !check_permission(table.rights.insert) {
        return Permission::deny("no create permission");
    }
    if all_disabled(table, entry_create_columns, Context::EntryCreate) {
        return Permission::deny("disabled columns");
    }
    Permission::allow()
}

/// Whether rows can be updated through this table.
pub fn can_update(table: &Table, entry_edit_columns: &[VisibleColumn]) -> Permission {
    if table.kind == TableKind::View {
        return Permission::deny("table is a view");
    }
    if table.is_generated() && !table.is_marked_mutable() {
        return Permission::deny("table generated");
    }
    if table.is_immutable() {
        return Permission::deny("table immutable");
    }
    if !check_permission(table.rights.update) {
        return Permission::deny("no update permission");
    }
    if all_disabled(table, entry_edit_columns, Context::EntryEdit) {
        return Permission::deny("disabled columns");
    }
    Permission::allow()
}

/// Whether rows can be deleted through this table.
pub fn can_delete(table: &Table) -> Permission {
    if table.kind == TableKind::View {
        return Permission::deny("table is a view");
    }
    if table.is_non_deletable() {
        return Permission::deny("table non-deletable");
    }
    if !check_permission(table.rights.delete) {
        return Permission::deny("no delete permission");
    }
    Permission::allow()
}

/// Whether requesting the table-level row-rights summary is worthwhile:
/// the catalog supports it, the table has an identity column, and at least
/// one of update/delete is statically undecided yet coarsely allowed.
pub fn can_use_trs(
    catalog: &Catalog,
    table: &Table,
    can_update: Permission,
    can_delete: Permission,
) -> bool {
    catalog.features.trs
        && table.identity_column().is_some()
        && ((table.rights.update.is_none() && can_update.allowed)
            || (table.rights.delete.is_none() && can_delete.allowed))
}

/// Whether requesting the table-and-column row-rights summary is worthwhile.
/// Column-level summaries only matter for updates.
pub fn can_use_tcrs(catalog: &Catalog, table: &Table, can_update: Permission) -> bool {
    catalog.features.tcrs
        && table.identity_column().is_some()
        && table.rights.update.is_none()
        && can_update.allowed
}

fn all_disabled(table: &Table, columns: &[VisibleColumn], context: Context) -> bool {
    !columns.is_empty()
        && columns
            .iter()
            .all(|column| column.is_input_disabled(context, table))
}
