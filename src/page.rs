//! Row containers produced by read and consumed by update/delete.

use serde_json::Value;

use crate::column::VisibleColumn;
use crate::location::Paging;
use crate::types::{Row, SortKey};

/// Row-rights summary field names injected by the server when requested.
pub const TRS_FIELD: &str = "trs";
pub const TCRS_FIELD: &str = "tcrs";

/// One page of rows with paging probes and the response version token.
#[derive(Debug, Clone)]
pub struct Page {
    tuples: Vec<Tuple>,
    sort: Vec<SortKey>,
    paging: Option<Paging>,
    pub has_next: bool,
    pub has_previous: bool,
    /// Opaque version token from the response, for optimistic concurrency
    /// bookkeeping.
    pub etag: Option<String>,
}

impl Page {
    pub(crate) fn new(
        tuples: Vec<Tuple>,
        sort: Vec<SortKey>,
        paging: Option<Paging>,
        has_previous: bool,
        has_next: bool,
        etag: Option<String>,
    ) -> Self {
        Page {
            tuples,
            sort,
            paging,
            has_next,
            has_previous,
            etag,
        }
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    /// Sort specification the page was read with.
    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    /// Paging state the page was read with.
    pub fn paging(&self) -> Option<&Paging> {
        self.paging.as_ref()
    }

    pub fn tuples_mut(&mut self) -> &mut [Tuple] {
        &mut self.tuples
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Paging spec addressing the page right before this one.
    pub fn previous_paging(&self) -> Option<Paging> {
        let first = self.tuples.first()?;
        Some(Paging::Before(first.sort_values(&self.sort)))
    }

    /// Paging spec addressing the page right after this one.
    pub fn next_paging(&self) -> Option<Paging> {
        let last = self.tuples.last()?;
        Some(Paging::After(last.sort_values(&self.sort)))
    }
}

/// One row: current data, the snapshot it was read with, and per-row
/// mutation eligibility.
#[derive(Debug, Clone)]
pub struct Tuple {
    data: Row,
    snapshot: Row,
    /// Rows joined in by the main read, keyed by outbound alias.
    linked: serde_json::Map<String, Value>,
    can_update: bool,
    can_delete: bool,
    /// Columns the row-rights summary reports as non-updatable.
    frozen_columns: Vec<String>,
}

impl Tuple {
    /// Build a tuple from a raw response row.
    ///
    /// `table_can_update`/`table_can_delete` are the coarse reference-level
    /// permissions; row-rights summary fields in the row refine them.
    pub(crate) fn from_row(
        mut data: Row,
        linked: serde_json::Map<String, Value>,
        table_can_update: bool,
        table_can_delete: bool,
    ) -> Self {
        let mut can_update = table_can_update;
        let mut can_delete = table_can_delete;
        let mut frozen_columns = Vec::new();

        if let Some(trs) = data.remove(TRS_FIELD) {
            if let Some(ops) = trs.as_array() {
                can_update = ops.iter().any(|v| v == "update");
                can_delete = ops.iter().any(|v| v == "delete");
            }
        }
        if let Some(tcrs) = data.remove(TCRS_FIELD) {
            if let Some(by_column) = tcrs.as_object() {
                for (column, ops) in by_column {
                    let updatable = ops
                        .as_array()
                        .map(|ops| ops.iter().any(|v| v == "update"))
                        .unwrap_or(false);
                    if !updatable {
                        frozen_columns.push(column.clone());
                    }
                }
            }
        }

        let snapshot = data.clone();
        Tuple {
            data,
            snapshot,
            linked,
            can_update,
            can_delete,
            frozen_columns,
        }
    }

    pub fn data(&self) -> &Row {
        &self.data
    }

    /// Data as read from the server, before any local edits.
    pub fn snapshot(&self) -> &Row {
        &self.snapshot
    }

    /// Stage a new value for a column. The snapshot keeps the prior value;
    /// the update diff is computed from the difference.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.data.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    pub fn can_update(&self) -> bool {
        self.can_update
    }

    pub fn can_delete(&self) -> bool {
        self.can_delete
    }

    /// Whether one column of this row may be updated.
    pub fn can_update_column(&self, column: &str) -> bool {
        self.can_update && !self.frozen_columns.iter().any(|c| c == column)
    }

    /// Linked row fetched through an outbound join, by alias.
    pub fn linked(&self, alias: &str) -> Option<&Value> {
        self.linked.get(alias)
    }

    /// Present one value per visible column, in column order.
    ///
    /// Path-backed and inbound columns render as null until their secondary
    /// requests are merged in.
    pub fn values(&self, columns: &[VisibleColumn]) -> Vec<Value> {
        columns
            .iter()
            .map(|column| match column {
                VisibleColumn::Plain(c) => {
                    self.data.get(&c.column.name).cloned().unwrap_or(Value::Null)
                }
                VisibleColumn::Asset(c) => {
                    self.data.get(&c.column.name).cloned().unwrap_or(Value::Null)
                }
                VisibleColumn::Key(c) => {
                    let parts: Vec<Value> = c
                        .key
                        .unique_columns
                        .iter()
                        .map(|name| self.data.get(name).cloned().unwrap_or(Value::Null))
                        .collect();
                    if parts.len() == 1 {
                        parts.into_iter().next().unwrap_or(Value::Null)
                    } else {
                        Value::Array(parts)
                    }
                }
                VisibleColumn::ForeignKey(c) => self
                    .linked
                    .get(&c.name)
                    .cloned()
                    .or_else(|| {
                        // Fall back to the raw local value of a simple FK.
                        c.fk.from_column_names()
                            .first()
                            .and_then(|name| self.data.get(name).cloned())
                    })
                    .unwrap_or(Value::Null),
                VisibleColumn::InboundForeignKey(_) | VisibleColumn::Virtual(_) => self
                    .linked
                    .get(&column.name())
                    .cloned()
                    .unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Merge a secondary-request result under the given alias.
    pub(crate) fn merge_linked(&mut self, alias: &str, value: Value) {
        self.linked.insert(alias.to_string(), value);
    }

    /// Values of the sort columns, used as page keys.
    fn sort_values(&self, sort: &[SortKey]) -> Vec<Value> {
        sort.iter()
            .map(|key| self.data.get(&key.column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn trs_field_refines_row_permissions() {
        let tuple = Tuple::from_row(
            row(json!({"id": 1, "trs": ["update"]})),
            serde_json::Map::new(),
            true,
            true,
        );
        assert!(tuple.can_update());
        assert!(!tuple.can_delete());
        // The summary field never leaks into data.
        assert!(tuple.data().get(TRS_FIELD).is_none());
    }

    #[test]
    fn tcrs_field_freezes_columns() {
        let tuple = Tuple::from_row(
            row(json!({"id": 1, "name": "a", "tcrs": {"id": [], "name": ["update"]}})),
            serde_json::Map::new(),
            true,
            true,
        );
        assert!(tuple.can_update_column("name"));
        assert!(!tuple.can_update_column("id"));
    }

    #[test]
    fn set_keeps_snapshot() {
        let mut tuple = Tuple::from_row(
            row(json!({"id": 1, "name": "a"})),
            serde_json::Map::new(),
            true,
            true,
        );
        tuple.set("name", json!("b"));
        assert_eq!(tuple.get("name"), Some(&json!("b")));
        assert_eq!(tuple.snapshot().get("name"), Some(&json!("a")));
    }

    #[test]
    fn page_keys_follow_sort() {
        let tuples = vec![
            Tuple::from_row(row(json!({"id": 1})), serde_json::Map::new(), true, true),
            Tuple::from_row(row(json!({"id": 2})), serde_json::Map::new(), true, true),
        ];
        let page = Page::new(tuples, vec![SortKey::asc("id")], None, false, true, None);
        assert_eq!(page.previous_paging(), Some(Paging::Before(vec![json!(1)])));
        assert_eq!(page.next_paging(), Some(Paging::After(vec![json!(2)])));
    }
}
