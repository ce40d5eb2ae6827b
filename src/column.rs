//! Visible columns: the tagged union of column variants a context exposes,
//! plus generation from the `visible-columns` annotation or the fallback
//! heuristic.
//!
//! Every variant answers the same capability questions (name, wait-for list,
//! aggregate, input eligibility); branch behavior is explicit per variant
//! rather than spread over boolean flags.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::model::{annotation, Catalog, Column, ForeignKey, Key, Table};
use crate::types::Context;

/// Aggregate functions a path column may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Max,
    Cnt,
    CntDistinct,
    Array,
    ArrayDistinct,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Cnt => "cnt",
            Aggregate::CntDistinct => "cnt_d",
            Aggregate::Array => "array",
            Aggregate::ArrayDistinct => "array_d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "min" => Some(Aggregate::Min),
            "max" => Some(Aggregate::Max),
            "cnt" => Some(Aggregate::Cnt),
            "cnt_d" => Some(Aggregate::CntDistinct),
            "array" => Some(Aggregate::Array),
            "array_d" => Some(Aggregate::ArrayDistinct),
            _ => None,
        }
    }
}

/// One hop of a source path, identified by qualified constraint name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Outbound(String),
    Inbound(String),
}

impl PathStep {
    pub fn constraint(&self) -> &str {
        match self {
            PathStep::Outbound(name) | PathStep::Inbound(name) => name,
        }
    }
}

/// A derived column source: a join path ending in one leaf column, possibly
/// aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePath {
    pub steps: Vec<PathStep>,
    pub column: String,
    pub aggregate: Option<Aggregate>,
    /// Entity mode: present the referenced row rather than the scalar leaf.
    pub entity: bool,
    /// The path is filtered down to at most one row.
    pub unique: bool,
}

impl SourcePath {
    /// Direct column access, no joins.
    pub fn is_local(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every hop leaves the base table via an outbound foreign key and no
    /// aggregate is applied, so the path can ride along the main read as a
    /// left join.
    pub fn is_all_outbound(&self) -> bool {
        !self.steps.is_empty()
            && self.aggregate.is_none()
            && self
                .steps
                .iter()
                .all(|s| matches!(s, PathStep::Outbound(_)))
    }

    pub fn has_inbound(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, PathStep::Inbound(_)))
    }

    /// Deterministic generated name for unnamed path columns.
    pub fn generated_name(&self) -> String {
        let mut parts: Vec<String> = self
            .steps
            .iter()
            .map(|s| match s {
                PathStep::Outbound(c) => format!(">{}", c),
                PathStep::Inbound(c) => format!("<{}", c),
            })
            .collect();
        parts.push(self.column.clone());
        let mut name = parts.join("/");
        if let Some(agg) = self.aggregate {
            name.push_str(&format!(";{}", agg.as_str()));
        }
        name
    }

    /// Parse a source definition object:
    /// `{"source": [{"outbound": [s, c]}, ..., "col"], "aggregate": ...}`.
    pub fn parse(spec: &Value) -> Option<SourcePath> {
        let source = spec.get("source")?;
        let mut steps = Vec::new();
        let mut column = None;

        match source {
            Value::String(name) => column = Some(name.clone()),
            Value::Array(entries) => {
                for entry in entries {
                    match entry {
                        Value::String(name) => column = Some(name.clone()),
                        Value::Object(hop) => {
                            if let Some(constraint) = constraint_name(hop.get("outbound")) {
                                steps.push(PathStep::Outbound(constraint));
                            } else if let Some(constraint) = constraint_name(hop.get("inbound")) {
                                steps.push(PathStep::Inbound(constraint));
                            } else {
                                return None;
                            }
                        }
                        _ => return None,
                    }
                }
            }
            _ => return None,
        }

        Some(SourcePath {
            steps,
            column: column?,
            aggregate: spec
                .get("aggregate")
                .and_then(|v| v.as_str())
                .and_then(Aggregate::parse),
            entity: spec.get("entity").and_then(|v| v.as_bool()).unwrap_or(true),
            unique: spec.get("unique").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }
}

fn constraint_name(value: Option<&Value>) -> Option<String> {
    let pair = value?.as_array()?;
    match pair.as_slice() {
        [Value::String(schema), Value::String(name)] => Some(format!("{}:{}", schema, name)),
        _ => None,
    }
}

/// Parse the table's `source-definitions` annotation into named paths.
pub fn parse_source_definitions(table: &Table) -> BTreeMap<String, SourcePath> {
    let mut definitions = BTreeMap::new();
    let Some(sources) = table
        .annotation(annotation::SOURCE_DEFINITIONS)
        .and_then(|v| v.get("sources"))
        .and_then(|v| v.as_object())
    else {
        return definitions;
    };
    for (name, spec) in sources {
        match SourcePath::parse(spec) {
            Some(path) => {
                definitions.insert(name.clone(), path);
            }
            None => debug!(source = %name, "skipping unparsable source definition"),
        }
    }
    definitions
}

#[derive(Debug, Clone)]
pub struct PlainColumn {
    pub column: Column,
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct KeyColumn {
    pub name: String,
    pub key: Key,
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ForeignKeyColumn {
    pub name: String,
    pub display_name: String,
    /// First-hop foreign key; carries rights and display annotations.
    pub fk: ForeignKey,
    pub source: SourcePath,
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InboundForeignKeyColumn {
    pub name: String,
    pub display_name: String,
    /// The inbound foreign key of the first hop.
    pub fk: ForeignKey,
    pub source: SourcePath,
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AssetColumn {
    pub column: Column,
    /// Sibling columns holding filename, byte count and checksum.
    pub metadata_columns: Vec<String>,
    pub wait_for: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VirtualColumn {
    pub name: String,
    pub display_name: String,
    pub source: Option<SourcePath>,
    pub wait_for: Vec<String>,
}

/// A visible logical column in some context.
#[derive(Debug, Clone)]
pub enum VisibleColumn {
    Plain(PlainColumn),
    Key(KeyColumn),
    ForeignKey(ForeignKeyColumn),
    InboundForeignKey(InboundForeignKeyColumn),
    Asset(AssetColumn),
    Virtual(VirtualColumn),
}

impl VisibleColumn {
    /// Unique name within one visible-column list.
    pub fn name(&self) -> String {
        match self {
            VisibleColumn::Plain(c) => c.column.name.clone(),
            VisibleColumn::Key(c) => c.name.clone(),
            VisibleColumn::ForeignKey(c) => c.name.clone(),
            VisibleColumn::InboundForeignKey(c) => c.name.clone(),
            VisibleColumn::Asset(c) => c.column.name.clone(),
            VisibleColumn::Virtual(c) => c.name.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            VisibleColumn::Plain(c) => c.column.displayname().to_string(),
            VisibleColumn::Key(c) => c.name.clone(),
            VisibleColumn::ForeignKey(c) => c.display_name.clone(),
            VisibleColumn::InboundForeignKey(c) => c.display_name.clone(),
            VisibleColumn::Asset(c) => c.column.displayname().to_string(),
            VisibleColumn::Virtual(c) => c.display_name.clone(),
        }
    }

    /// Names of source definitions this column waits on before rendering.
    pub fn wait_for(&self) -> &[String] {
        match self {
            VisibleColumn::Plain(c) => &c.wait_for,
            VisibleColumn::Key(c) => &c.wait_for,
            VisibleColumn::ForeignKey(c) => &c.wait_for,
            VisibleColumn::InboundForeignKey(c) => &c.wait_for,
            VisibleColumn::Asset(c) => &c.wait_for,
            VisibleColumn::Virtual(c) => &c.wait_for,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        !matches!(self, VisibleColumn::Plain(_))
    }

    pub fn is_key(&self) -> bool {
        matches!(self, VisibleColumn::Key(_))
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self, VisibleColumn::ForeignKey(_))
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, VisibleColumn::InboundForeignKey(_))
    }

    pub fn is_asset(&self) -> bool {
        matches!(self, VisibleColumn::Asset(_))
    }

    /// Backed by a join path rather than local columns.
    pub fn is_path_column(&self) -> bool {
        self.source().map(|s| !s.is_local()).unwrap_or(false)
    }

    pub fn has_aggregate(&self) -> bool {
        self.source().map(|s| s.aggregate.is_some()).unwrap_or(false)
    }

    pub fn source(&self) -> Option<&SourcePath> {
        match self {
            VisibleColumn::ForeignKey(c) => Some(&c.source),
            VisibleColumn::InboundForeignKey(c) => Some(&c.source),
            VisibleColumn::Virtual(c) => c.source.as_ref(),
            _ => None,
        }
    }

    /// Physical columns this logical column reads and writes on the base
    /// table. Empty for path-backed and virtual columns.
    pub fn physical_columns(&self) -> Vec<String> {
        match self {
            VisibleColumn::Plain(c) => vec![c.column.name.clone()],
            VisibleColumn::Key(c) => c.key.unique_columns.clone(),
            VisibleColumn::ForeignKey(c) => {
                if c.source.steps.len() == 1 {
                    c.fk.from_column_names()
                } else {
                    Vec::new()
                }
            }
            VisibleColumn::Asset(c) => {
                let mut cols = vec![c.column.name.clone()];
                cols.extend(c.metadata_columns.iter().cloned());
                cols
            }
            VisibleColumn::InboundForeignKey(_) | VisibleColumn::Virtual(_) => Vec::new(),
        }
    }

    /// Whether a form in the given context refuses input for this column.
    pub fn is_input_disabled(&self, context: Context, table: &Table) -> bool {
        match self {
            VisibleColumn::Plain(c) => c.column.is_input_disabled(context),
            VisibleColumn::Asset(c) => c.column.is_input_disabled(context),
            VisibleColumn::Key(c) => c
                .key
                .unique_columns
                .iter()
                .any(|name| column_disabled(table, name, context)),
            VisibleColumn::ForeignKey(c) => c
                .fk
                .from_column_names()
                .iter()
                .any(|name| column_disabled(table, name, context)),
            VisibleColumn::InboundForeignKey(_) | VisibleColumn::Virtual(_) => true,
        }
    }
}

fn column_disabled(table: &Table, name: &str, context: Context) -> bool {
    table
        .column(name)
        .map(|c| c.is_input_disabled(context))
        .unwrap_or(true)
}

/// Generate the visible-column list for one context.
///
/// Driven by the `visible-columns` annotation when present; otherwise a
/// heuristic over physical columns with simple outbound foreign keys lifted
/// into foreign-key pseudo-columns. Entries with duplicate names or unknown
/// references are skipped.
pub fn generate_visible_columns(
    catalog: &Catalog,
    table: &Table,
    context: Context,
) -> Vec<VisibleColumn> {
    let definitions = parse_source_definitions(table);
    let mut seen: HashSet<String> = HashSet::new();
    let mut visible = Vec::new();

    let annotated = table
        .annotation_for_context(annotation::VISIBLE_COLUMNS, context)
        .and_then(|v| v.as_array())
        .cloned();

    match annotated {
        Some(entries) => {
            for entry in &entries {
                let Some(column) = build_from_entry(catalog, table, entry, &definitions) else {
                    debug!(table = %table.qualified_name(), ?entry, "skipping visible-column entry");
                    continue;
                };
                if !seen.insert(column.name()) {
                    debug!(name = %column.name(), "skipping duplicate visible column");
                    continue;
                }
                visible.push(column);
            }
        }
        None => {
            heuristic_columns(table, context, &mut seen, &mut visible);
        }
    }

    visible
}

fn build_from_entry(
    catalog: &Catalog,
    table: &Table,
    entry: &Value,
    definitions: &BTreeMap<String, SourcePath>,
) -> Option<VisibleColumn> {
    match entry {
        Value::String(name) => {
            let column = table.column(name)?;
            Some(plain_or_asset(table, column, Vec::new()))
        }
        Value::Array(_) => {
            let constraint = constraint_name(Some(entry))?;
            build_from_constraint(catalog, table, &constraint)
        }
        Value::Object(spec) => {
            let wait_for = parse_wait_for(entry);
            let markdown_name = spec
                .get("markdown_name")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            // A sourcekey-backed column keeps the definition name, so its
            // request bucket collapses with wait-fors naming the same key.
            let source_key = spec
                .get("sourcekey")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let source = match &source_key {
                Some(key) => Some(definitions.get(key)?.clone()),
                None => SourcePath::parse(entry),
            };

            match source {
                None => {
                    // Virtual column: display only, driven by wait-fors.
                    let name = markdown_name?;
                    Some(VisibleColumn::Virtual(VirtualColumn {
                        display_name: name.clone(),
                        name,
                        source: None,
                        wait_for,
                    }))
                }
                Some(path) if path.is_local() => {
                    let column = table.column(&path.column)?;
                    Some(plain_or_asset(table, column, wait_for))
                }
                Some(path) if path.aggregate.is_some() => {
                    let name = source_key.unwrap_or_else(|| path.generated_name());
                    Some(VisibleColumn::Virtual(VirtualColumn {
                        display_name: markdown_name.unwrap_or_else(|| name.clone()),
                        name,
                        source: Some(path),
                        wait_for,
                    }))
                }
                Some(path) if path.is_all_outbound() && path.entity => {
                    let first = path.steps.first()?;
                    let (source_table, idx) = catalog.foreign_key(first.constraint())?;
                    if source_table.qualified_name() != table.qualified_name() {
                        return None;
                    }
                    let fk = source_table.foreign_keys[idx].clone();
                    let name = source_key.unwrap_or_else(|| path.generated_name());
                    Some(VisibleColumn::ForeignKey(ForeignKeyColumn {
                        display_name: markdown_name.unwrap_or_else(|| fk_display_name(catalog, &fk)),
                        name,
                        fk,
                        source: path,
                        wait_for,
                    }))
                }
                Some(path) if path.has_inbound() => {
                    let first = path.steps.first()?;
                    let (fk_table, idx) = catalog.foreign_key(first.constraint())?;
                    let fk = fk_table.foreign_keys[idx].clone();
                    let name = source_key.unwrap_or_else(|| path.generated_name());
                    Some(VisibleColumn::InboundForeignKey(InboundForeignKeyColumn {
                        display_name: markdown_name
                            .unwrap_or_else(|| fk_table.displayname().to_string()),
                        name,
                        fk,
                        source: path,
                        wait_for,
                    }))
                }
                Some(path) => {
                    // Scalar outbound path column.
                    let name = source_key.unwrap_or_else(|| path.generated_name());
                    Some(VisibleColumn::Virtual(VirtualColumn {
                        display_name: markdown_name.unwrap_or_else(|| name.clone()),
                        name,
                        source: Some(path),
                        wait_for,
                    }))
                }
            }
        }
        _ => None,
    }
}

fn build_from_constraint(
    catalog: &Catalog,
    table: &Table,
    constraint: &str,
) -> Option<VisibleColumn> {
    if let Some(key) = table.keys.iter().find(|k| k.has_name(constraint)) {
        return Some(VisibleColumn::Key(KeyColumn {
            name: key.name(),
            key: key.clone(),
            wait_for: Vec::new(),
        }));
    }

    if let Some(fk) = table.foreign_keys.iter().find(|fk| fk.has_name(constraint)) {
        return Some(VisibleColumn::ForeignKey(ForeignKeyColumn {
            name: fk.name(),
            display_name: fk_display_name(catalog, fk),
            fk: fk.clone(),
            source: SourcePath {
                steps: vec![PathStep::Outbound(fk.name())],
                column: fk.to_column_names().first()?.clone(),
                aggregate: None,
                entity: true,
                unique: false,
            },
            wait_for: Vec::new(),
        }));
    }

    // Inbound reference to this table.
    let (source_table, idx) = catalog.foreign_key(constraint)?;
    let fk = source_table.foreign_keys[idx].clone();
    if fk.to_table() != table.qualified_name() {
        return None;
    }
    Some(VisibleColumn::InboundForeignKey(InboundForeignKeyColumn {
        name: fk.name(),
        display_name: source_table.displayname().to_string(),
        fk: fk.clone(),
        source: SourcePath {
            steps: vec![PathStep::Inbound(fk.name())],
            column: fk.from_column_names().first()?.clone(),
            aggregate: None,
            entity: true,
            unique: false,
        },
        wait_for: Vec::new(),
    }))
}

fn heuristic_columns(
    table: &Table,
    context: Context,
    seen: &mut HashSet<String>,
    visible: &mut Vec<VisibleColumn>,
) {
    for column in &table.columns {
        if context.is_entry() && column.is_system() {
            continue;
        }

        // A column covered by a simple outbound foreign key is presented as
        // the foreign key itself, once.
        let simple_fk = table
            .foreign_keys
            .iter()
            .find(|fk| fk.is_simple() && fk.foreign_key_columns[0].column_name == column.name);
        if let Some(fk) = simple_fk {
            if seen.insert(fk.name()) {
                visible.push(VisibleColumn::ForeignKey(ForeignKeyColumn {
                    name: fk.name(),
                    display_name: column.displayname().to_string(),
                    fk: fk.clone(),
                    source: SourcePath {
                        steps: vec![PathStep::Outbound(fk.name())],
                        column: fk
                            .to_column_names()
                            .first()
                            .cloned()
                            .unwrap_or_default(),
                        aggregate: None,
                        entity: true,
                        unique: false,
                    },
                    wait_for: Vec::new(),
                }));
            }
            continue;
        }

        if seen.insert(column.name.clone()) {
            visible.push(plain_or_asset(table, column, Vec::new()));
        }
    }
}

fn plain_or_asset(table: &Table, column: &Column, wait_for: Vec<String>) -> VisibleColumn {
    if let Some(asset) = column.annotations.get(annotation::ASSET) {
        let metadata_columns = ["filename_column", "byte_count_column", "md5_column"]
            .iter()
            .filter_map(|key| asset.get(*key).and_then(|v| v.as_str()))
            .filter(|name| table.column(name).is_some())
            .map(str::to_string)
            .collect();
        return VisibleColumn::Asset(AssetColumn {
            column: column.clone(),
            metadata_columns,
            wait_for,
        });
    }
    VisibleColumn::Plain(PlainColumn {
        column: column.clone(),
        wait_for,
    })
}

fn fk_display_name(catalog: &Catalog, fk: &ForeignKey) -> String {
    let to_table = fk.to_table();
    if let Some((schema, name)) = to_table.split_once(':') {
        if let Ok(table) = catalog.table(schema, name) {
            return table.displayname().to_string();
        }
    }
    fk.name()
}

pub(crate) fn parse_wait_for(entry: &Value) -> Vec<String> {
    match entry.get("wait_for") {
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Some(Value::String(name)) => vec![name.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Catalog {
        let doc = json!({
            "schemas": {
                "s": {
                    "tables": {
                        "dataset": {
                            "table_name": "dataset",
                            "column_definitions": [
                                {"name": "RID", "type": {"typename": "text"}},
                                {"name": "id", "type": {"typename": "int4"}},
                                {"name": "owner_id", "type": {"typename": "int4"}},
                                {"name": "title", "type": {"typename": "text"}},
                                {
                                    "name": "thumbnail",
                                    "type": {"typename": "text"},
                                    "annotations": {
                                        "asset": {"filename_column": "thumb_name"}
                                    }
                                },
                                {"name": "thumb_name", "type": {"typename": "text"}}
                            ],
                            "keys": [
                                {"names": [["s", "dataset_id_key"]], "unique_columns": ["id"]}
                            ],
                            "foreign_keys": [{
                                "names": [["s", "dataset_owner_fk"]],
                                "foreign_key_columns": [
                                    {"schema_name": "s", "table_name": "dataset", "column_name": "owner_id"}
                                ],
                                "referenced_columns": [
                                    {"schema_name": "s", "table_name": "person", "column_name": "id"}
                                ]
                            }],
                            "annotations": {
                                "source-definitions": {
                                    "sources": {
                                        "experiment-count": {
                                            "source": [
                                                {"inbound": ["s", "experiment_dataset_fk"]},
                                                "RID"
                                            ],
                                            "aggregate": "cnt_d"
                                        }
                                    }
                                }
                            }
                        },
                        "person": {
                            "table_name": "person",
                            "column_definitions": [
                                {"name": "id", "type": {"typename": "int4"}},
                                {"name": "name", "type": {"typename": "text"}}
                            ],
                            "keys": [{"unique_columns": ["id"]}]
                        },
                        "experiment": {
                            "table_name": "experiment",
                            "column_definitions": [
                                {"name": "RID", "type": {"typename": "text"}},
                                {"name": "dataset_id", "type": {"typename": "int4"}}
                            ],
                            "keys": [{"unique_columns": ["RID"]}],
                            "foreign_keys": [{
                                "names": [["s", "experiment_dataset_fk"]],
                                "foreign_key_columns": [
                                    {"schema_name": "s", "table_name": "experiment", "column_name": "dataset_id"}
                                ],
                                "referenced_columns": [
                                    {"schema_name": "s", "table_name": "dataset", "column_name": "id"}
                                ]
                            }]
                        }
                    }
                }
            }
        });
        Catalog::from_schema_document("http://example.org", "1", &doc).unwrap()
    }

    #[test]
    fn heuristic_lifts_simple_foreign_keys() {
        let catalog = catalog();
        let table = catalog.table("s", "dataset").unwrap();
        let visible = generate_visible_columns(&catalog, table, Context::Compact);

        let names: Vec<String> = visible.iter().map(|c| c.name()).collect();
        assert!(names.contains(&"s:dataset_owner_fk".to_string()));
        assert!(!names.contains(&"owner_id".to_string()));
        assert!(names.contains(&"title".to_string()));

        let fk = visible
            .iter()
            .find(|c| c.name() == "s:dataset_owner_fk")
            .unwrap();
        assert!(fk.is_foreign_key());
        assert_eq!(fk.physical_columns(), vec!["owner_id"]);
    }

    #[test]
    fn heuristic_skips_system_columns_in_entry() {
        let catalog = catalog();
        let table = catalog.table("s", "dataset").unwrap();
        let visible = generate_visible_columns(&catalog, table, Context::EntryCreate);
        assert!(visible.iter().all(|c| c.name() != "RID"));
    }

    #[test]
    fn asset_annotation_produces_asset_column() {
        let catalog = catalog();
        let table = catalog.table("s", "dataset").unwrap();
        let visible = generate_visible_columns(&catalog, table, Context::Detailed);
        let asset = visible.iter().find(|c| c.name() == "thumbnail").unwrap();
        assert!(asset.is_asset());
        assert_eq!(asset.physical_columns(), vec!["thumbnail", "thumb_name"]);
    }

    #[test]
    fn annotated_list_with_sourcekey_aggregate() {
        let catalog = catalog();
        let table_arc = catalog.table("s", "dataset").unwrap().clone();
        let mut table = (*table_arc).clone();
        table.annotations.insert(
            annotation::VISIBLE_COLUMNS.to_string(),
            json!({
                "detailed": [
                    "title",
                    ["s", "dataset_owner_fk"],
                    {"sourcekey": "experiment-count", "markdown_name": "# of experiments"}
                ]
            }),
        );

        let visible = generate_visible_columns(&catalog, &table, Context::Detailed);
        assert_eq!(visible.len(), 3);
        assert!(matches!(visible[0], VisibleColumn::Plain(_)));
        assert!(visible[1].is_foreign_key());
        assert!(visible[2].has_aggregate());
        assert_eq!(visible[2].display_name(), "# of experiments");
    }

    #[test]
    fn duplicate_entries_are_dropped() {
        let catalog = catalog();
        let table_arc = catalog.table("s", "dataset").unwrap().clone();
        let mut table = (*table_arc).clone();
        table.annotations.insert(
            annotation::VISIBLE_COLUMNS.to_string(),
            json!({"*": ["title", "title", "missing"]}),
        );
        let visible = generate_visible_columns(&catalog, &table, Context::Compact);
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn source_path_classification() {
        let all_out = SourcePath {
            steps: vec![PathStep::Outbound("s:a".into()), PathStep::Outbound("s:b".into())],
            column: "id".into(),
            aggregate: None,
            entity: true,
            unique: false,
        };
        assert!(all_out.is_all_outbound());
        assert!(!all_out.has_inbound());

        let agg = SourcePath {
            aggregate: Some(Aggregate::Cnt),
            ..all_out.clone()
        };
        assert!(!agg.is_all_outbound());

        let inbound = SourcePath {
            steps: vec![PathStep::Inbound("s:a".into())],
            column: "id".into(),
            aggregate: None,
            entity: true,
            unique: false,
        };
        assert!(inbound.has_inbound());
        assert_eq!(inbound.generated_name(), "<s:a/id");
    }

    #[test]
    fn key_constraint_entry() {
        let catalog = catalog();
        let table_arc = catalog.table("s", "dataset").unwrap().clone();
        let mut table = (*table_arc).clone();
        table.annotations.insert(
            annotation::VISIBLE_COLUMNS.to_string(),
            json!({"compact": [["s", "dataset_id_key"], "title"]}),
        );
        let visible = generate_visible_columns(&catalog, &table, Context::Compact);
        assert!(visible[0].is_key());
        assert_eq!(visible[0].physical_columns(), vec!["id"]);
    }
}
