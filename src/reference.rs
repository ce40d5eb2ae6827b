//! The Reference: an immutable, context-dependent projection of a relation.
//!
//! A reference is never mutated after construction except through its own
//! memoization cells; every transform returns a new reference with fresh
//! cells. `set_new_table` is the only operation that discards all caches at
//! once.

use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::active_list::{self, ActiveList, PlannerInput};
use crate::column::{
    generate_visible_columns, parse_source_definitions, PathStep, SourcePath, VisibleColumn,
};
use crate::error::ReferenceError;
use crate::location::{FacetFilter, Location};
use crate::model::{annotation, Catalog, Table};
use crate::page::Page;
use crate::permissions::{self, Permission};
use crate::related::{self, RelatedReference};
use crate::transport::Transport;
use crate::types::{Context, SortKey};

/// Citation descriptor computed from the `citation` annotation. Template
/// strings are carried verbatim; rendering happens elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub journal: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub url: Option<String>,
    pub wait_for: Vec<String>,
}

/// One facet offered for filtering, with its current selection state.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetColumn {
    pub source: String,
    pub display_name: String,
    pub choices: Vec<Value>,
    pub hidden: bool,
}

/// Result of the bulk-create foreign-key heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCreateForeignKey {
    /// Constraint name of the prefilled (main) foreign key.
    pub main: String,
    /// Constraint name of the complementary (leaf) foreign key.
    pub leaf: String,
}

#[derive(Default)]
struct Cells {
    columns: OnceCell<Vec<VisibleColumn>>,
    source_definitions: OnceCell<BTreeMap<String, SourcePath>>,
    related: OnceCell<Vec<RelatedReference>>,
    facet_columns: OnceCell<Vec<FacetColumn>>,
    active_list: OnceCell<ActiveList>,
    citation: OnceCell<Option<Citation>>,
    can_create: OnceCell<Permission>,
    can_update: OnceCell<Permission>,
    can_delete: OnceCell<Permission>,
    read_path: OnceCell<String>,
    export_template: OnceCell<Value>,
}

/// An immutable, contextualized projection over one relation.
pub struct Reference {
    location: Location,
    catalog: Arc<Catalog>,
    table: Arc<Table>,
    context: Context,
    display_override: Option<String>,
    comment_override: Option<String>,
    /// Name of the pseudo-column this reference materializes, when it was
    /// built from a source path.
    pseudo_name: Option<String>,
    /// Facet definitions carried over from a parent reference so transforms
    /// do not re-run the heuristics.
    carried_facets: Option<Vec<FacetColumn>>,
    cells: Cells,
    bulk_fk: RefCell<Option<Option<BulkCreateForeignKey>>>,
}

impl Reference {
    /// Construct a reference from a parsed location against a catalog model.
    pub fn new(location: Location, catalog: Arc<Catalog>) -> Result<Self, ReferenceError> {
        let table = Arc::clone(catalog.table(&location.schema_name, &location.table_name)?);
        Ok(Reference {
            location,
            catalog,
            table,
            context: Context::Compact,
            display_override: None,
            comment_override: None,
            pseudo_name: None,
            carried_facets: None,
            cells: Cells::default(),
            bulk_fk: RefCell::new(None),
        })
    }

    /// Resolve a data URI: parse the location, fetch the catalog model, and
    /// build the reference.
    pub fn resolve(transport: &Transport, uri: &str) -> Result<Self, ReferenceError> {
        let location = Location::parse(uri)?;
        let catalog = Catalog::fetch(transport, &location.service, &location.catalog_id)?;
        Reference::new(location, Arc::new(catalog))
    }

    fn fork(&self) -> Reference {
        Reference {
            location: self.location.clone(),
            catalog: Arc::clone(&self.catalog),
            table: Arc::clone(&self.table),
            context: self.context,
            display_override: self.display_override.clone(),
            comment_override: self.comment_override.clone(),
            pseudo_name: self.pseudo_name.clone(),
            // A computed facet-column list survives the transform; only its
            // filter state is rebuilt.
            carried_facets: self
                .cells
                .facet_columns
                .get()
                .cloned()
                .or_else(|| self.carried_facets.clone()),
            cells: Cells::default(),
            bulk_fk: RefCell::new(None),
        }
    }

    /// Internal constructor for related references rooted elsewhere.
    pub(crate) fn for_related(
        location: Location,
        catalog: Arc<Catalog>,
        table: Arc<Table>,
        context: Context,
        pseudo_name: Option<String>,
    ) -> Self {
        Reference {
            location,
            catalog,
            table,
            context,
            display_override: None,
            comment_override: None,
            pseudo_name,
            carried_facets: None,
            cells: Cells::default(),
            bulk_fk: RefCell::new(None),
        }
    }

    // --- identity ---

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn display_name(&self) -> &str {
        self.display_override
            .as_deref()
            .unwrap_or_else(|| self.table.displayname())
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment_override.as_deref()
    }

    /// Name of the backing pseudo-column, for references materialized from
    /// a source path.
    pub fn pseudo_name(&self) -> Option<&str> {
        self.pseudo_name.as_deref()
    }

    /// Full data URI of this reference.
    pub fn uri(&self) -> String {
        format!(
            "{}/entity/{}",
            self.location.catalog_base(),
            self.location.entity_path()
        )
    }

    // --- transforms; each returns a new reference ---

    /// Same projection under another context.
    pub fn contextualize(&self, context: Context) -> Reference {
        let mut next = self.fork();
        next.context = context;
        next
    }

    /// Clone, substituting any explicitly-provided override.
    pub fn copy(
        &self,
        display_name: Option<String>,
        comment: Option<String>,
        pseudo_name: Option<String>,
    ) -> Reference {
        let mut next = self.fork();
        if display_name.is_some() {
            next.display_override = display_name;
        }
        if comment.is_some() {
            next.comment_override = comment;
        }
        if pseudo_name.is_some() {
            next.pseudo_name = pseudo_name;
        }
        next
    }

    /// Apply a full-text search term; `None` clears the search.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceError::InvalidInput` for an empty term.
    pub fn search(&self, term: Option<&str>) -> Result<Reference, ReferenceError> {
        if let Some(term) = term {
            if term.trim().is_empty() {
                return Err(ReferenceError::invalid_input("search term must not be empty"));
            }
        }
        let mut next = self.fork();
        next.location = self.location.with_search(term.map(str::to_string));
        Ok(next)
    }

    /// Apply a sort specification.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceError::ColumnNotFound` when a key names neither a
    /// physical column nor a visible column.
    pub fn sort(&self, keys: Vec<SortKey>) -> Result<Reference, ReferenceError> {
        for key in &keys {
            let known = self.table.column(&key.column).is_some()
                || self.columns().iter().any(|c| c.name() == key.column);
            if !known {
                return Err(ReferenceError::ColumnNotFound {
                    table: self.table.qualified_name(),
                    name: key.column.clone(),
                });
            }
        }
        let mut next = self.fork();
        next.location = self.location.with_sort(keys);
        Ok(next)
    }

    /// Add facet filters, replacing any existing facet on the same source.
    pub fn add_facets(&self, facets: Vec<FacetFilter>) -> Reference {
        let mut merged = self.location.facets.clone();
        for facet in facets {
            match merged.iter_mut().find(|f| f.source == facet.source) {
                Some(existing) => *existing = facet,
                None => merged.push(facet),
            }
        }
        let mut next = self.fork();
        next.location = self.location.with_facets(merged);
        next
    }

    /// Mark the named facets hidden; they keep filtering.
    pub fn hide_facets(&self, sources: &[&str]) -> Reference {
        let mut facets = self.location.facets.clone();
        for facet in &mut facets {
            if sources.contains(&facet.source.as_str()) {
                facet.hidden = true;
            }
        }
        let mut next = self.fork();
        next.location = self.location.with_facets(facets);
        next
    }

    /// Drop every facet selection while keeping the facet definitions.
    pub fn remove_all_facet_filters(&self) -> Reference {
        let mut facets = self.location.facets.clone();
        for facet in &mut facets {
            facet.choices.clear();
        }
        let mut next = self.fork();
        next.location = self.location.with_facets(facets);
        next
    }

    /// Adopt the sort and paging state a page was read with.
    pub fn set_same_paging(&self, page: &Page) -> Reference {
        let mut next = self.fork();
        next.location = self
            .location
            .with_sort(page.sort().to_vec())
            .with_paging(page.paging().cloned());
        next
    }

    /// Swap the entire backing table, discarding every cache at once. The
    /// only operation that invalidates memoized state.
    pub fn set_new_table(&mut self, table: Arc<Table>) {
        debug!(table = %table.qualified_name(), "swapping reference table");
        self.location.schema_name = table.schema_name.clone();
        self.location.table_name = table.name.clone();
        self.location.filters.clear();
        self.location.facets.clear();
        self.location.sort.clear();
        self.location.paging = None;
        self.table = table;
        self.cells = Cells::default();
        self.carried_facets = None;
        *self.bulk_fk.borrow_mut() = None;
    }

    // --- derived state, computed once per reference ---

    /// Visible columns for this reference's context.
    pub fn columns(&self) -> &[VisibleColumn] {
        self.cells
            .columns
            .get_or_init(|| generate_visible_columns(&self.catalog, &self.table, self.context))
    }

    /// Named source definitions declared on the table.
    pub fn source_definitions(&self) -> &BTreeMap<String, SourcePath> {
        self.cells
            .source_definitions
            .get_or_init(|| parse_source_definitions(&self.table))
    }

    /// Related references derived from inbound foreign keys.
    pub fn related(&self) -> &[RelatedReference] {
        self.cells
            .related
            .get_or_init(|| related::build_related(self, None))
    }

    /// Related references anchored to one row; not memoized because the
    /// anchor varies per call.
    pub fn related_with_anchor(&self, anchor: &crate::page::Tuple) -> Vec<RelatedReference> {
        related::build_related(self, Some(anchor))
    }

    /// Citation descriptor, when the table is annotated with one.
    pub fn citation(&self) -> Option<&Citation> {
        self.cells
            .citation
            .get_or_init(|| {
                let spec = self.table.annotation(annotation::CITATION)?;
                let field = |key: &str| {
                    spec.get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Some(Citation {
                    journal: field("journal_pattern"),
                    author: field("author_pattern"),
                    title: field("title_pattern"),
                    year: field("year_pattern"),
                    url: field("url_pattern"),
                    wait_for: match spec.get("wait_for") {
                        Some(Value::Array(names)) => names
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(str::to_string)
                            .collect(),
                        _ => Vec::new(),
                    },
                })
            })
            .as_ref()
    }

    /// The deduplicated secondary-request plan for one page.
    pub fn active_list(&self) -> &ActiveList {
        self.cells.active_list.get_or_init(|| {
            let citation_wait_for = self
                .citation()
                .map(|c| c.wait_for.clone())
                .unwrap_or_default();
            let related_wait_for: Vec<Vec<String>> = if self.context == Context::Detailed {
                self.related()
                    .iter()
                    .map(|r| r.wait_for.clone())
                    .collect()
            } else {
                Vec::new()
            };
            active_list::compute(&PlannerInput {
                context: self.context,
                table: &self.table,
                columns: self.columns(),
                definitions: self.source_definitions(),
                citation_wait_for: &citation_wait_for,
                related_wait_for: &related_wait_for,
            })
        })
    }

    /// Facet columns: definitions plus current selection state.
    ///
    /// # Errors
    ///
    /// Propagates `ReferenceError::UnsupportedFilters` from definitions this
    /// engine cannot express as filters.
    pub fn facet_columns(&self) -> Result<&[FacetColumn], ReferenceError> {
        if let Some(columns) = self.cells.facet_columns.get() {
            return Ok(columns);
        }
        let computed = self.compute_facet_columns()?;
        Ok(self.cells.facet_columns.get_or_init(|| computed))
    }

    fn compute_facet_columns(&self) -> Result<Vec<FacetColumn>, ReferenceError> {
        // Carried definitions are reused; only filter state is rebuilt.
        if let Some(carried) = &self.carried_facets {
            return Ok(carried
                .iter()
                .map(|def| {
                    let state = self.location.facets.iter().find(|f| f.source == def.source);
                    FacetColumn {
                        source: def.source.clone(),
                        display_name: def.display_name.clone(),
                        choices: state.map(|f| f.choices.clone()).unwrap_or_default(),
                        hidden: state.map(|f| f.hidden).unwrap_or(def.hidden),
                    }
                })
                .collect());
        }

        let mut facets = Vec::new();
        let annotated = self
            .table
            .annotation_for_context(annotation::VISIBLE_COLUMNS, Context::Filter)
            .and_then(|v| v.get("and"))
            .and_then(|v| v.as_array())
            .cloned();

        match annotated {
            Some(entries) => {
                for entry in &entries {
                    let Some(spec) = entry.as_object() else {
                        return Err(ReferenceError::UnsupportedFilters {
                            message: format!("facet entry is {}", crate::types::json_type_name(entry)),
                        });
                    };
                    let Some(source) = spec.get("source").and_then(|v| v.as_str()) else {
                        return Err(ReferenceError::UnsupportedFilters {
                            message: "facet entry without a plain column source".to_string(),
                        });
                    };
                    let column = self.table.require_column(source)?;
                    let state = self.location.facets.iter().find(|f| f.source == source);
                    facets.push(FacetColumn {
                        source: source.to_string(),
                        display_name: spec
                            .get("markdown_name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_else(|| column.displayname())
                            .to_string(),
                        choices: state.map(|f| f.choices.clone()).unwrap_or_default(),
                        hidden: spec
                            .get("hidden")
                            .and_then(|v| v.as_bool())
                            .or(state.map(|f| f.hidden))
                            .unwrap_or(false),
                    });
                }
            }
            None => {
                for column in &self.table.columns {
                    if column.is_system() {
                        continue;
                    }
                    let state = self
                        .location
                        .facets
                        .iter()
                        .find(|f| f.source == column.name);
                    facets.push(FacetColumn {
                        source: column.name.clone(),
                        display_name: column.displayname().to_string(),
                        choices: state.map(|f| f.choices.clone()).unwrap_or_default(),
                        hidden: state.map(|f| f.hidden).unwrap_or(false),
                    });
                }
            }
        }
        Ok(facets)
    }

    // --- permissions ---

    pub fn can_create(&self) -> Permission {
        *self.cells.can_create.get_or_init(|| {
            let columns =
                generate_visible_columns(&self.catalog, &self.table, Context::EntryCreate);
            permissions::can_create(&self.table, &columns)
        })
    }

    pub fn can_update(&self) -> Permission {
        *self.cells.can_update.get_or_init(|| {
            let columns = generate_visible_columns(&self.catalog, &self.table, Context::EntryEdit);
            permissions::can_update(&self.table, &columns)
        })
    }

    pub fn can_delete(&self) -> Permission {
        *self
            .cells
            .can_delete
            .get_or_init(|| permissions::can_delete(&self.table))
    }

    pub fn can_use_trs(&self) -> bool {
        permissions::can_use_trs(&self.catalog, &self.table, self.can_update(), self.can_delete())
    }

    pub fn can_use_tcrs(&self) -> bool {
        permissions::can_use_tcrs(&self.catalog, &self.table, self.can_update())
    }

    // --- read path ---

    /// The path the main read uses: a plain entity path when nothing joins
    /// in, otherwise an attribute-group path with one left-join alias per
    /// all-outbound entry.
    pub fn read_path(&self) -> &str {
        self.cells.read_path.get_or_init(|| self.render_read_path())
    }

    fn render_read_path(&self) -> String {
        let outbounds = &self.active_list().all_outbounds;
        let want_trs = self.can_use_trs();
        let want_tcrs = self.can_use_tcrs();

        if outbounds.is_empty() && !want_trs && !want_tcrs {
            return format!("entity/{}", self.location.data_path());
        }

        let mut path = format!("M:={}", self.location.data_path());
        let mut aliases = Vec::new();
        for (i, entry) in outbounds.iter().enumerate() {
            let alias = format!("F{}", i + 1);
            let mut rendered = Vec::new();
            for (hop, step) in entry.source.steps.iter().enumerate() {
                let Some(join) = self.render_join(step) else {
                    continue;
                };
                if hop == entry.source.steps.len() - 1 {
                    rendered.push(format!("{}:={}", alias, join));
                } else {
                    rendered.push(join);
                }
            }
            if rendered.is_empty() {
                continue;
            }
            path.push('/');
            path.push_str(&rendered.join("/"));
            path.push_str("/$M");
            aliases.push(alias);
        }

        let key_columns: Vec<String> = self
            .table
            .shortest_key()
            .map(|k| k.unique_columns.clone())
            .unwrap_or_else(|| vec![crate::model::IDENTITY_COLUMN.to_string()]);

        let mut projection: Vec<String> = key_columns
            .iter()
            .map(|c| crate::location::encode(c))
            .collect();
        let mut values = vec!["M:=array(M:*)".to_string()];
        for alias in &aliases {
            values.push(format!("{0}:=array({0}:*)", alias));
        }
        if want_trs {
            values.push(format!("trs:=trs({})", crate::model::IDENTITY_COLUMN));
        }
        if want_tcrs {
            values.push(format!("tcrs:=tcrs({})", crate::model::IDENTITY_COLUMN));
        }
        projection.push(values.join(","));

        format!("attributegroup/{}/{}", path, projection.join(";"))
    }

    /// Render one join hop as `left(cols)=(schema:table:cols)`.
    pub(crate) fn render_join(&self, step: &PathStep) -> Option<String> {
        let (source_table, idx) = self.catalog.foreign_key(step.constraint())?;
        let fk = &source_table.foreign_keys[idx];
        let (from, to) = match step {
            // Outbound: from the referring columns to the referenced ones.
            PathStep::Outbound(_) => (fk.from_column_names(), fk.referenced_columns.clone()),
            // Inbound: enter the referring table through its fk columns.
            PathStep::Inbound(_) => (fk.to_column_names(), fk.foreign_key_columns.clone()),
        };
        let to_schema = &to.first()?.schema_name;
        let to_table = &to.first()?.table_name;
        let from_cols: Vec<String> = from.iter().map(|c| crate::location::encode(c)).collect();
        let to_cols: Vec<String> = to
            .iter()
            .map(|c| crate::location::encode(&c.column_name))
            .collect();
        Some(format!(
            "left({})=({}:{}:{})",
            from_cols.join(","),
            crate::location::encode(to_schema),
            crate::location::encode(to_table),
            to_cols.join(",")
        ))
    }

    // --- export ---

    /// Export template: the `export` annotation verbatim when present,
    /// otherwise a default of one CSV entry for this reference plus one per
    /// related reference.
    pub fn export_template(&self) -> &Value {
        self.cells.export_template.get_or_init(|| {
            if let Some(spec) = self.table.annotation(annotation::EXPORT) {
                return spec.clone();
            }
            let mut outputs = vec![json!({
                "destination": {
                    "name": self.table.name,
                    "type": "csv"
                },
                "source": {"api": "entity"}
            })];
            for related in self.related() {
                outputs.push(json!({
                    "destination": {
                        "name": related.reference.table().name,
                        "type": "csv"
                    },
                    "source": {
                        "api": "entity",
                        "path": related.compressed_path
                    }
                }));
            }
            json!({"templates": [{"displayname": "BDBag", "outputs": outputs}]})
        })
    }

    // --- bulk-create foreign key heuristic ---

    /// Resolve the main/leaf foreign key pair for bulk-create prefill.
    ///
    /// Advisory: returns `None` whenever the heuristic does not apply. The
    /// result is memoized; call [`Reference::reset_bulk_create_foreign_key`]
    /// before evaluating a new prefill input.
    pub fn bulk_create_foreign_key(&self, prefill: &Value) -> Option<BulkCreateForeignKey> {
        if let Some(memoized) = self.bulk_fk.borrow().as_ref() {
            return memoized.clone();
        }
        let computed = self.compute_bulk_create_foreign_key(prefill);
        *self.bulk_fk.borrow_mut() = Some(computed.clone());
        computed
    }

    /// Drop the memoized bulk-create result so the next call recomputes.
    pub fn reset_bulk_create_foreign_key(&self) {
        *self.bulk_fk.borrow_mut() = None;
    }

    fn compute_bulk_create_foreign_key(&self, prefill: &Value) -> Option<BulkCreateForeignKey> {
        let spec = self.table.annotation(annotation::BULK_CREATE_FOREIGN_KEY);
        // Explicit opt-out.
        if let Some(Value::Bool(false)) = spec {
            return None;
        }

        let main_name = match prefill {
            Value::String(name) => name.clone(),
            Value::Object(map) => map.get("constraint")?.as_str()?.to_string(),
            _ => return None,
        };

        // Candidates among visible, non-system, simple foreign keys in the
        // create context.
        let entry_columns =
            generate_visible_columns(&self.catalog, &self.table, Context::EntryCreate);
        let simple_fks: Vec<&crate::model::ForeignKey> = entry_columns
            .iter()
            .filter_map(|c| match c {
                VisibleColumn::ForeignKey(fkc) => Some(&fkc.fk),
                _ => None,
            })
            .filter(|fk| fk.is_simple() && fk.is_non_system())
            .collect();

        let main = simple_fks.iter().find(|fk| fk.has_name(&main_name))?;

        // Leaf from annotation-provided candidates, tried in order.
        let candidates: Vec<String> = match spec {
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if !candidates.is_empty() {
            for candidate in &candidates {
                if let Some(leaf) = simple_fks
                    .iter()
                    .find(|fk| fk.has_name(candidate) && !fk.has_name(&main_name))
                {
                    return Some(BulkCreateForeignKey {
                        main: main.name(),
                        leaf: leaf.name(),
                    });
                }
            }
            return None;
        }

        // No explicit leaf: require exactly two simple foreign keys and
        // pick the other one.
        if simple_fks.len() != 2 {
            return None;
        }
        let leaf = simple_fks.iter().find(|fk| !fk.has_name(&main_name))?;
        Some(BulkCreateForeignKey {
            main: main.name(),
            leaf: leaf.name(),
        })
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("uri", &self.uri())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Arc<Catalog> {
        let doc = json!({
            "schemas": {
                "s": {
                    "tables": {
                        "dataset": {
                            "table_name": "dataset",
                            "column_definitions": [
                                {"name": "RID", "type": {"typename": "text"}},
                                {"name": "id", "type": {"typename": "int4"}},
                                {"name": "title", "type": {"typename": "text"}},
                                {"name": "owner_id", "type": {"typename": "int4"}},
                                {"name": "keyword_id", "type": {"typename": "int4"}}
                            ],
                            "keys": [{"unique_columns": ["id"]}],
                            "foreign_keys": [
                                {
                                    "names": [["s", "dataset_owner_fk"]],
                                    "foreign_key_columns": [
                                        {"schema_name": "s", "table_name": "dataset", "column_name": "owner_id"}
                                    ],
                                    "referenced_columns": [
                                        {"schema_name": "s", "table_name": "person", "column_name": "id"}
                                    ]
                                },
                                {
                                    "names": [["s", "dataset_keyword_fk"]],
                                    "foreign_key_columns": [
                                        {"schema_name": "s", "table_name": "dataset", "column_name": "keyword_id"}
                                    ],
                                    "referenced_columns": [
                                        {"schema_name": "s", "table_name": "keyword", "column_name": "id"}
                                    ]
                                }
                            ]
                        },
                        "person": {
                            "table_name": "person",
                            "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                            "keys": [{"unique_columns": ["id"]}]
                        },
                        "keyword": {
                            "table_name": "keyword",
                            "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                            "keys": [{"unique_columns": ["id"]}]
                        }
                    }
                }
            }
        });
        Arc::new(Catalog::from_schema_document("http://example.org", "1", &doc).unwrap())
    }

    fn reference() -> Reference {
        let location = Location::new("http://example.org", "1", "s", "dataset");
        Reference::new(location, catalog()).unwrap()
    }

    #[test]
    fn cached_getters_return_identical_values() {
        let reference = reference();
        let first = reference.columns().as_ptr();
        let second = reference.columns().as_ptr();
        assert_eq!(first, second);

        let first = reference.active_list() as *const ActiveList;
        let second = reference.active_list() as *const ActiveList;
        assert_eq!(first, second);
    }

    #[test]
    fn transforms_leave_receiver_untouched() {
        let reference = reference();
        let before = reference.uri();

        let sorted = reference.sort(vec![SortKey::asc("id")]).unwrap();
        assert_eq!(reference.uri(), before);
        assert_ne!(sorted.uri(), before);

        let searched = reference.search(Some("liver")).unwrap();
        assert_eq!(reference.uri(), before);
        assert!(searched.uri().contains("ciregexp"));

        let faceted = reference.add_facets(vec![FacetFilter {
            source: "title".to_string(),
            choices: vec![json!("a")],
            hidden: false,
        }]);
        assert_eq!(reference.uri(), before);
        assert!(faceted.uri().contains("title=a"));

        let cleared = faceted.remove_all_facet_filters();
        assert!(faceted.uri().contains("title=a"));
        assert!(!cleared.uri().contains("title=a"));
    }

    #[test]
    fn sort_rejects_unknown_columns() {
        let reference = reference();
        let err = reference.sort(vec![SortKey::asc("nope")]).unwrap_err();
        assert!(matches!(err, ReferenceError::ColumnNotFound { .. }));
    }

    #[test]
    fn search_rejects_empty_terms() {
        let reference = reference();
        let err = reference.search(Some("  ")).unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidInput { .. }));
    }

    #[test]
    fn contextualize_changes_context_only() {
        let reference = reference();
        let detailed = reference.contextualize(Context::Detailed);
        assert_eq!(detailed.context(), Context::Detailed);
        assert_eq!(reference.context(), Context::Compact);
        assert_eq!(detailed.uri(), reference.uri());
    }

    #[test]
    fn copy_substitutes_only_provided_overrides() {
        let reference = reference();
        let copy = reference.copy(Some("Datasets".to_string()), None, None);
        assert_eq!(copy.display_name(), "Datasets");
        assert_eq!(reference.display_name(), "dataset");
        assert!(copy.comment().is_none());
    }

    #[test]
    fn set_new_table_discards_caches() {
        let mut reference = reference();
        let _ = reference.columns();
        let person = Arc::clone(reference.catalog().table("s", "person").unwrap());
        reference.set_new_table(person);
        assert_eq!(reference.table().name, "person");
        assert!(reference.uri().contains("s:person"));
        // Columns are recomputed against the new table.
        assert!(reference.columns().iter().all(|c| c.name() != "title"));
    }

    #[test]
    fn facet_columns_carry_forward_across_transforms() {
        let reference = reference();
        let originals = reference.facet_columns().unwrap().to_vec();
        assert!(!originals.is_empty());

        let faceted = reference.add_facets(vec![FacetFilter {
            source: "title".to_string(),
            choices: vec![json!("x")],
            hidden: false,
        }]);
        let rebuilt = faceted.facet_columns().unwrap();
        // Same definitions, new filter state.
        assert_eq!(rebuilt.len(), originals.len());
        let title = rebuilt.iter().find(|f| f.source == "title").unwrap();
        assert_eq!(title.choices, vec![json!("x")]);
    }

    #[test]
    fn bulk_create_foreign_key_two_fk_rule() {
        let reference = reference();
        let result = reference
            .bulk_create_foreign_key(&json!({"constraint": "s:dataset_owner_fk"}))
            .unwrap();
        assert_eq!(result.main, "s:dataset_owner_fk");
        assert_eq!(result.leaf, "s:dataset_keyword_fk");
    }

    #[test]
    fn bulk_create_foreign_key_memoizes_until_reset() {
        let reference = reference();
        let first = reference.bulk_create_foreign_key(&json!({"constraint": "s:dataset_owner_fk"}));
        assert!(first.is_some());
        // Memoized: a different prefill still returns the cached answer.
        let stale = reference.bulk_create_foreign_key(&json!({"constraint": "s:missing"}));
        assert_eq!(stale, first);

        reference.reset_bulk_create_foreign_key();
        let fresh = reference.bulk_create_foreign_key(&json!({"constraint": "s:missing"}));
        assert!(fresh.is_none());
    }

    #[test]
    fn set_same_paging_adopts_page_state_without_mutating_receiver() {
        use crate::location::Paging;
        use crate::page::{Page, Tuple};

        let reference = reference();
        let tuple = Tuple::from_row(
            json!({"id": 9}).as_object().unwrap().clone(),
            serde_json::Map::new(),
            true,
            true,
        );
        let page = Page::new(
            vec![tuple],
            vec![SortKey::asc("id")],
            Some(Paging::After(vec![json!(3)])),
            true,
            false,
            None,
        );

        let paged = reference.set_same_paging(&page);
        assert_eq!(paged.location().sort, vec![SortKey::asc("id")]);
        assert_eq!(paged.location().paging, Some(Paging::After(vec![json!(3)])));
        assert!(reference.location().sort.is_empty());
        assert!(reference.location().paging.is_none());
    }

    #[test]
    fn read_path_plain_when_nothing_joins() {
        let doc = json!({
            "schemas": {"s": {"tables": {"t": {
                "table_name": "t",
                "column_definitions": [
                    {"name": "id", "type": {"typename": "int4"}},
                    {"name": "col_6", "type": {"typename": "text"}}
                ],
                "keys": [{"unique_columns": ["id"]}]
            }}}}
        });
        let catalog = Arc::new(
            Catalog::from_schema_document("http://example.org", "1", &doc).unwrap(),
        );
        let reference =
            Reference::new(Location::new("http://example.org", "1", "s", "t"), catalog).unwrap();
        assert_eq!(reference.read_path(), "entity/s:t");
    }

    #[test]
    fn read_path_joins_all_outbounds() {
        let reference = reference();
        let path = reference.read_path();
        assert!(path.starts_with("attributegroup/M:=s:dataset"));
        assert!(path.contains("F1:=left(owner_id)=(s:person:id)"));
        assert!(path.contains("F2:=left(keyword_id)=(s:keyword:id)"));
        assert!(path.contains("id;M:=array(M:*),F1:=array(F1:*),F2:=array(F2:*)"));
        // Cached.
        assert_eq!(reference.read_path() as *const str, path as *const str);
    }
}
