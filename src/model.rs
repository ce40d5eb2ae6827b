//! Catalog model: schemas, tables, columns, keys, foreign keys, rights.
//!
//! The model is deserialized from the catalog service's schema document
//! (`GET <service>/catalog/<id>/schema`) and is read-only afterwards.
//! Behavior is annotation-driven: tables and columns carry a free-form
//! annotation map keyed by the short names in [`annotation`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ReferenceError;
use crate::transport::{RequestContext, Transport};
use crate::types::Context;

/// Annotation keys understood by the engine. Unknown keys are carried but
/// ignored.
pub mod annotation {
    /// Display overrides (`name`, `markdown_name`) for tables and columns.
    pub const DISPLAY: &str = "display";
    /// Table presentation options, notably `row_order`.
    pub const TABLE_DISPLAY: &str = "table-display";
    /// Per-context visible column lists.
    pub const VISIBLE_COLUMNS: &str = "visible-columns";
    /// Per-context inbound foreign key lists for the related section.
    pub const VISIBLE_FOREIGN_KEYS: &str = "visible-foreign-keys";
    /// Named source path definitions referenced by `wait_for` lists.
    pub const SOURCE_DEFINITIONS: &str = "source-definitions";
    /// Citation templates with their wait-for dependencies.
    pub const CITATION: &str = "citation";
    /// Marks a column as an asset (URL plus metadata columns).
    pub const ASSET: &str = "asset";
    /// Marks a table or column as populated by the system.
    pub const GENERATED: &str = "generated";
    /// Marks a table or column as never updatable. An explicit `false`
    /// re-enables updates on a generated table.
    pub const IMMUTABLE: &str = "immutable";
    /// Marks a table as never deletable.
    pub const NON_DELETABLE: &str = "non-deletable";
    /// Configures the bulk-create foreign key heuristic.
    pub const BULK_CREATE_FOREIGN_KEY: &str = "bulk-create-foreign-key";
    /// Export template override.
    pub const EXPORT: &str = "export";
}

/// Columns maintained by the catalog itself on every table.
pub const SYSTEM_COLUMNS: &[&str] = &["RID", "RCT", "RMT", "RCB", "RMB"];

/// The per-row identity column required for row-rights summaries.
pub const IDENTITY_COLUMN: &str = "RID";

pub type Annotations = serde_json::Map<String, Value>;

/// Static access rights as reported by the catalog. `None` means the right
/// depends on dynamic (row-level) ACLs and cannot be decided statically.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rights {
    #[serde(default)]
    pub select: Option<bool>,
    #[serde(default)]
    pub insert: Option<bool>,
    #[serde(default)]
    pub update: Option<bool>,
    #[serde(default)]
    pub delete: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
}

impl Default for TableKind {
    fn default() -> Self {
        TableKind::Table
    }
}

/// Column type descriptor. Only the type name is interpreted client-side.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnType {
    pub typename: String,
}

impl ColumnType {
    pub fn is_datetime(&self) -> bool {
        matches!(self.typename.as_str(), "timestamp" | "timestamptz" | "date")
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.typename.as_str(),
            "int2" | "int4" | "int8" | "serial2" | "serial4" | "serial8"
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullok: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub rights: Rights,
    #[serde(default)]
    pub annotations: Annotations,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn is_system(&self) -> bool {
        SYSTEM_COLUMNS.contains(&self.name.as_str())
    }

    pub fn is_generated(&self) -> bool {
        annotation_marker(&self.annotations, annotation::GENERATED)
    }

    pub fn is_immutable(&self) -> bool {
        annotation_marker(&self.annotations, annotation::IMMUTABLE)
    }

    pub fn is_asset(&self) -> bool {
        self.annotations.contains_key(annotation::ASSET)
    }

    pub fn displayname(&self) -> &str {
        display_override(&self.annotations).unwrap_or(&self.name)
    }

    /// Whether a form in the given context should refuse input for this
    /// column. System columns are always disabled; generated columns take no
    /// input when creating, immutable and generated columns take none when
    /// editing; a statically denied insert/update right also disables.
    pub fn is_input_disabled(&self, context: Context) -> bool {
        if !context.is_entry() {
            return false;
        }
        if self.is_system() {
            return true;
        }
        match context {
            Context::EntryCreate => self.is_generated() || self.rights.insert == Some(false),
            Context::EntryEdit => {
                self.is_generated() || self.is_immutable() || self.rights.update == Some(false)
            }
            _ => {
                self.is_generated()
                    || self.is_immutable()
                    || self.rights.insert == Some(false)
                    || self.rights.update == Some(false)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Key {
    /// Constraint names, `[schema, name]` pairs; may be empty for views.
    #[serde(default)]
    pub names: Vec<[String; 2]>,
    pub unique_columns: Vec<String>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Key {
    /// Primary qualified constraint name, `schema:name`.
    pub fn name(&self) -> String {
        match self.names.first() {
            Some([schema, name]) => format!("{}:{}", schema, name),
            None => self.unique_columns.join(","),
        }
    }

    /// True when any constraint name matches `schema:name`.
    pub fn has_name(&self, qualified: &str) -> bool {
        self.names
            .iter()
            .any(|[s, n]| format!("{}:{}", s, n) == qualified)
    }
}

/// One endpoint of a foreign key column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnRef {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForeignKey {
    /// Constraint names, `[schema, name]` pairs. The first entry is the
    /// primary name used for aliasing and deduplication.
    pub names: Vec<[String; 2]>,
    pub foreign_key_columns: Vec<ColumnRef>,
    pub referenced_columns: Vec<ColumnRef>,
    #[serde(default)]
    pub rights: Rights,
    #[serde(default)]
    pub annotations: Annotations,
}

impl ForeignKey {
    /// Primary qualified constraint name, `schema:name`.
    pub fn name(&self) -> String {
        match self.names.first() {
            Some([schema, name]) => format!("{}:{}", schema, name),
            None => String::new(),
        }
    }

    /// True when any constraint name matches `schema:name`.
    pub fn has_name(&self, qualified: &str) -> bool {
        self.names
            .iter()
            .any(|[s, n]| format!("{}:{}", s, n) == qualified)
    }

    /// Source-side column names, in declaration order.
    pub fn from_column_names(&self) -> Vec<String> {
        self.foreign_key_columns
            .iter()
            .map(|c| c.column_name.clone())
            .collect()
    }

    /// Referenced-side column names, in declaration order.
    pub fn to_column_names(&self) -> Vec<String> {
        self.referenced_columns
            .iter()
            .map(|c| c.column_name.clone())
            .collect()
    }

    /// Qualified `schema:table` of the referenced table.
    pub fn to_table(&self) -> String {
        match self.referenced_columns.first() {
            Some(c) => format!("{}:{}", c.schema_name, c.table_name),
            None => String::new(),
        }
    }

    /// Qualified `schema:table` of the referring table.
    pub fn from_table(&self) -> String {
        match self.foreign_key_columns.first() {
            Some(c) => format!("{}:{}", c.schema_name, c.table_name),
            None => String::new(),
        }
    }

    /// A simple foreign key covers exactly one column.
    pub fn is_simple(&self) -> bool {
        self.foreign_key_columns.len() == 1
    }

    /// True when no source column is a system column.
    pub fn is_non_system(&self) -> bool {
        self.foreign_key_columns
            .iter()
            .all(|c| !SYSTEM_COLUMNS.contains(&c.column_name.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub schema_name: String,
    #[serde(rename = "table_name")]
    pub name: String,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(rename = "column_definitions")]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub rights: Rights,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Table {
    /// Qualified `schema:table` name.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.schema_name, self.name)
    }

    pub fn displayname(&self) -> &str {
        display_override(&self.annotations).unwrap_or(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column in declaration order, used for deterministic
    /// ordering of related references.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, ReferenceError> {
        self.column(name).ok_or_else(|| ReferenceError::ColumnNotFound {
            table: self.qualified_name(),
            name: name.to_string(),
        })
    }

    /// Shortest key: fewest columns, ties broken by all-integer keys first,
    /// then lexically on the joined column names so the choice is stable.
    pub fn shortest_key(&self) -> Option<&Key> {
        self.keys.iter().min_by_key(|k| {
            let all_int = k
                .unique_columns
                .iter()
                .all(|c| self.column(c).map(|c| c.column_type.is_integer()).unwrap_or(false));
            (k.unique_columns.len(), !all_int, k.unique_columns.join(","))
        })
    }

    /// The per-row identity column, when the table exposes one.
    pub fn identity_column(&self) -> Option<&Column> {
        self.column(IDENTITY_COLUMN)
    }

    pub fn is_generated(&self) -> bool {
        annotation_marker(&self.annotations, annotation::GENERATED)
    }

    pub fn is_immutable(&self) -> bool {
        annotation_marker(&self.annotations, annotation::IMMUTABLE)
    }

    /// Generated tables deny updates unless immutability was explicitly
    /// switched off (`"immutable": false`).
    pub fn is_marked_mutable(&self) -> bool {
        matches!(
            self.annotations.get(annotation::IMMUTABLE),
            Some(Value::Bool(false))
        )
    }

    pub fn is_non_deletable(&self) -> bool {
        annotation_marker(&self.annotations, annotation::NON_DELETABLE)
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    /// Look up a context-keyed annotation value, walking the context
    /// fallback chain down to the `*` default.
    pub fn annotation_for_context(&self, key: &str, context: Context) -> Option<&Value> {
        let by_context = self.annotations.get(key)?.as_object()?;
        for name in context.fallback_chain() {
            if let Some(value) = by_context.get(*name) {
                // A string value is an alias for another context entry.
                if let Some(alias) = value.as_str() {
                    if let Some(target) = by_context.get(alias) {
                        return Some(target);
                    }
                }
                return Some(value);
            }
        }
        None
    }

    /// Default row order from the `table-display` annotation, if present.
    pub fn row_order(&self, context: Context) -> Vec<crate::types::SortKey> {
        let Some(display) = self.annotation_for_context(annotation::TABLE_DISPLAY, context) else {
            return Vec::new();
        };
        let Some(order) = display.get("row_order").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        order
            .iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(crate::types::SortKey::asc(name.clone())),
                Value::Object(spec) => {
                    let column = spec.get("column")?.as_str()?.to_string();
                    let descending = spec
                        .get("descending")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    Some(crate::types::SortKey { column, descending })
                }
                _ => None,
            })
            .collect()
    }
}

/// Catalog feature advertisement relevant to this engine.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CatalogFeatures {
    /// Table-level row-rights summary.
    #[serde(default)]
    pub trs: bool,
    /// Table-and-column-level row-rights summary.
    #[serde(default)]
    pub tcrs: bool,
}

/// An entire catalog model: identity plus every table of every schema.
#[derive(Debug)]
pub struct Catalog {
    pub service: String,
    pub id: String,
    pub features: CatalogFeatures,
    tables: BTreeMap<String, Arc<Table>>,
}

impl Catalog {
    /// Build a catalog from a schema document.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceError::InvalidServerResponse` when the document
    /// does not have the expected `schemas/<name>/tables/<name>` shape.
    pub fn from_schema_document(
        service: impl Into<String>,
        id: impl Into<String>,
        document: &Value,
    ) -> Result<Self, ReferenceError> {
        let schemas = document
            .get("schemas")
            .and_then(|v| v.as_object())
            .ok_or_else(|| ReferenceError::InvalidServerResponse {
                message: "schema document has no \"schemas\" object".to_string(),
            })?;

        let features = document
            .get("features")
            .map(|v| {
                serde_json::from_value::<CatalogFeatures>(v.clone()).map_err(|e| {
                    ReferenceError::InvalidServerResponse {
                        message: format!("invalid features block: {}", e),
                    }
                })
            })
            .transpose()?
            .unwrap_or_default();

        let mut tables = BTreeMap::new();
        for (schema_name, schema) in schemas {
            let Some(table_map) = schema.get("tables").and_then(|v| v.as_object()) else {
                continue;
            };
            for (table_name, table_doc) in table_map {
                let mut table: Table =
                    serde_json::from_value(table_doc.clone()).map_err(|e| {
                        ReferenceError::InvalidServerResponse {
                            message: format!(
                                "invalid table document {}:{}: {}",
                                schema_name, table_name, e
                            ),
                        }
                    })?;
                table.schema_name = schema_name.clone();
                tables.insert(table.qualified_name(), Arc::new(table));
            }
        }

        Ok(Catalog {
            service: service.into(),
            id: id.into(),
            features,
            tables,
        })
    }

    /// Fetch and parse the catalog's schema document.
    pub fn fetch(
        transport: &Transport,
        service: &str,
        id: &str,
    ) -> Result<Self, ReferenceError> {
        let url = format!("{}/catalog/{}/schema", service.trim_end_matches('/'), id);
        let context = RequestContext::new(id, "", "model/fetch");
        let (document, _etag) = transport.get(&url, &context)?;
        Catalog::from_schema_document(service.trim_end_matches('/'), id, &document)
    }

    /// Base URL for data requests, `<service>/catalog/<id>`.
    pub fn base_url(&self) -> String {
        format!("{}/catalog/{}", self.service, self.id)
    }

    pub fn table(&self, schema: &str, name: &str) -> Result<&Arc<Table>, ReferenceError> {
        let qualified = format!("{}:{}", schema, name);
        self.tables
            .get(&qualified)
            .ok_or_else(|| ReferenceError::InvalidInput {
                message: format!("unknown table {}", qualified),
            })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    /// Find a foreign key anywhere in the catalog by qualified constraint
    /// name. Returned as `(source table, index into its foreign_keys)`.
    pub fn foreign_key(&self, qualified: &str) -> Option<(Arc<Table>, usize)> {
        for source in self.tables.values() {
            for (idx, fk) in source.foreign_keys.iter().enumerate() {
                if fk.has_name(qualified) {
                    return Some((Arc::clone(source), idx));
                }
            }
        }
        None
    }

    /// All foreign keys, catalog-wide, that reference the given table.
    /// Returned as `(source table, index into its foreign_keys)`.
    pub fn inbound_foreign_keys(&self, table: &Table) -> Vec<(Arc<Table>, usize)> {
        let target = table.qualified_name();
        let mut found = Vec::new();
        for source in self.tables.values() {
            for (idx, fk) in source.foreign_keys.iter().enumerate() {
                if fk.to_table() == target {
                    found.push((Arc::clone(source), idx));
                }
            }
        }
        found
    }
}

fn annotation_marker(annotations: &Annotations, key: &str) -> bool {
    match annotations.get(key) {
        None | Some(Value::Bool(false)) => false,
        Some(_) => true,
    }
}

fn display_override(annotations: &Annotations) -> Option<&str> {
    let display = annotations.get(annotation::DISPLAY)?;
    display
        .get("name")
        .or_else(|| display.get("markdown_name"))
        .and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> Table {
        serde_json::from_value(json!({
            "table_name": "dataset",
            "kind": "table",
            "column_definitions": [
                {"name": "RID", "type": {"typename": "text"}, "nullok": false},
                {"name": "id", "type": {"typename": "int4"}, "nullok": false},
                {"name": "name", "type": {"typename": "text"}},
                {
                    "name": "released",
                    "type": {"typename": "timestamptz"},
                    "annotations": {"generated": null}
                }
            ],
            "keys": [
                {"unique_columns": ["id"]},
                {"unique_columns": ["RID"]},
                {"unique_columns": ["name", "released"]}
            ],
            "rights": {"insert": true, "update": null, "delete": false}
        }))
        .unwrap()
    }

    #[test]
    fn shortest_key_prefers_integer() {
        let mut table = sample_table();
        table.schema_name = "isa".to_string();
        let key = table.shortest_key().unwrap();
        assert_eq!(key.unique_columns, vec!["id"]);
    }

    #[test]
    fn system_and_generated_columns_disable_input() {
        let table = sample_table();
        let rid = table.column("RID").unwrap();
        assert!(rid.is_input_disabled(Context::EntryCreate));
        assert!(!rid.is_input_disabled(Context::Detailed));

        let released = table.column("released").unwrap();
        assert!(released.is_generated());
        assert!(released.is_input_disabled(Context::EntryCreate));
        assert!(released.is_input_disabled(Context::EntryEdit));

        let name = table.column("name").unwrap();
        assert!(!name.is_input_disabled(Context::EntryCreate));
    }

    #[test]
    fn annotation_context_fallback() {
        let mut table = sample_table();
        table.annotations = json!({
            "visible-columns": {
                "compact": ["id"],
                "entry": ["name"],
                "*": ["id", "name"]
            }
        })
        .as_object()
        .unwrap()
        .clone();

        let entry_create = table
            .annotation_for_context(annotation::VISIBLE_COLUMNS, Context::EntryCreate)
            .unwrap();
        assert_eq!(entry_create, &json!(["name"]));

        let detailed = table
            .annotation_for_context(annotation::VISIBLE_COLUMNS, Context::Detailed)
            .unwrap();
        assert_eq!(detailed, &json!(["id", "name"]));
    }

    #[test]
    fn annotation_context_alias() {
        let mut table = sample_table();
        table.annotations = json!({
            "visible-columns": {
                "compact": ["id"],
                "detailed": "compact"
            }
        })
        .as_object()
        .unwrap()
        .clone();

        let detailed = table
            .annotation_for_context(annotation::VISIBLE_COLUMNS, Context::Detailed)
            .unwrap();
        assert_eq!(detailed, &json!(["id"]));
    }

    #[test]
    fn catalog_from_schema_document() {
        let doc = json!({
            "features": {"trs": true},
            "schemas": {
                "isa": {
                    "tables": {
                        "dataset": {
                            "table_name": "dataset",
                            "column_definitions": [
                                {"name": "id", "type": {"typename": "int4"}}
                            ],
                            "keys": [{"unique_columns": ["id"]}]
                        }
                    }
                }
            }
        });
        let catalog = Catalog::from_schema_document("http://example.org", "7", &doc).unwrap();
        assert!(catalog.features.trs);
        assert!(!catalog.features.tcrs);
        let table = catalog.table("isa", "dataset").unwrap();
        assert_eq!(table.qualified_name(), "isa:dataset");
        assert!(catalog.table("isa", "missing").is_err());
    }

    #[test]
    fn inbound_foreign_keys_found() {
        let doc = json!({
            "schemas": {
                "s": {
                    "tables": {
                        "parent": {
                            "table_name": "parent",
                            "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                            "keys": [{"unique_columns": ["id"]}]
                        },
                        "child": {
                            "table_name": "child",
                            "column_definitions": [
                                {"name": "id", "type": {"typename": "int4"}},
                                {"name": "parent_id", "type": {"typename": "int4"}}
                            ],
                            "keys": [{"unique_columns": ["id"]}],
                            "foreign_keys": [{
                                "names": [["s", "child_parent_fk"]],
                                "foreign_key_columns": [
                                    {"schema_name": "s", "table_name": "child", "column_name": "parent_id"}
                                ],
                                "referenced_columns": [
                                    {"schema_name": "s", "table_name": "parent", "column_name": "id"}
                                ]
                            }]
                        }
                    }
                }
            }
        });
        let catalog = Catalog::from_schema_document("http://example.org", "1", &doc).unwrap();
        let parent = Arc::clone(catalog.table("s", "parent").unwrap());
        let inbound = catalog.inbound_foreign_keys(&parent);
        assert_eq!(inbound.len(), 1);
        let (source, idx) = &inbound[0];
        assert_eq!(source.name, "child");
        assert_eq!(source.foreign_keys[*idx].name(), "s:child_parent_fk");
    }
}
