//! Related references: inbound and associative relationships resolved into
//! references rooted at the current reference.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::column::{PathStep, SourcePath};
use crate::location::{Filter, JoinClause, Location, PathRoot};
use crate::model::{annotation, Catalog, ForeignKey, Table};
use crate::page::Tuple;
use crate::reference::Reference;

/// An association table hop between the base table and the far table.
#[derive(Debug, Clone)]
pub struct Association {
    /// Qualified name of the association table.
    pub table: String,
    /// The foreign key leading from the association table to the far table.
    pub to_fk: ForeignKey,
}

/// A reference reached through an inbound (or associative) relationship.
#[derive(Debug)]
pub struct RelatedReference {
    pub reference: Reference,
    /// The inbound foreign key this relationship originates from.
    pub origin_fk: ForeignKey,
    /// Present when the relationship runs through a pure association table.
    pub association: Option<Association>,
    /// Compressed rendering of the join path, for logs and export.
    pub compressed_path: String,
    /// Wait-for names carried from a pseudo-column definition.
    pub wait_for: Vec<String>,
    /// False when the order came from the annotation; true when the
    /// deterministic comparator produced it.
    pub heuristically_ordered: bool,
}

impl RelatedReference {
    pub fn display_name(&self) -> &str {
        self.reference.display_name()
    }
}

/// Build the related list for a reference, optionally anchored to one row.
///
/// Uses the `visible-foreign-keys` annotation order when present; otherwise
/// every inbound foreign key, deterministically ordered. Relationships whose
/// generated name collides with an inline visible column are skipped: a
/// relationship already shown inline must not also appear as related.
pub(crate) fn build_related(reference: &Reference, anchor: Option<&Tuple>) -> Vec<RelatedReference> {
    let catalog = reference.catalog();
    let table = reference.table();

    let inline_names: Vec<String> = reference
        .columns()
        .iter()
        .map(|column| column.name())
        .collect();

    let annotated = table
        .annotation_for_context(annotation::VISIBLE_FOREIGN_KEYS, reference.context())
        .and_then(|v| v.as_array())
        .cloned();

    let mut related = Vec::new();

    match annotated {
        Some(entries) => {
            for entry in &entries {
                let Some(built) = build_entry(reference, catalog, table, entry, anchor) else {
                    debug!(?entry, "skipping visible-foreign-keys entry");
                    continue;
                };
                push_unless_inline(&mut related, built, &inline_names);
            }
        }
        None => {
            for (source_table, idx) in catalog.inbound_foreign_keys(table) {
                let fk = &source_table.foreign_keys[idx];
                if is_alternate_self_link(table, fk) {
                    continue;
                }
                let Some(built) =
                    build_from_fk(reference, catalog, table, &source_table, fk, anchor, true)
                else {
                    continue;
                };
                push_unless_inline(&mut related, built, &inline_names);
            }
            sort_related(reference, &mut related);
        }
    }

    related
}

fn push_unless_inline(
    related: &mut Vec<RelatedReference>,
    built: RelatedReference,
    inline_names: &[String],
) {
    let name = built.origin_fk.name();
    if inline_names.iter().any(|n| *n == name) {
        debug!(fk = %name, "relationship already shown inline");
        return;
    }
    if related.iter().any(|r| r.origin_fk.name() == name) {
        return;
    }
    related.push(built);
}

/// An inbound foreign key from the table to itself that re-maps one of its
/// own keys: the alternate-table pattern, not a real relationship.
fn is_alternate_self_link(table: &Table, fk: &ForeignKey) -> bool {
    if fk.from_table() != fk.to_table() || fk.to_table() != table.qualified_name() {
        return false;
    }
    let mut from = fk.from_column_names();
    from.sort();
    table.keys.iter().any(|key| {
        let mut key_cols = key.unique_columns.clone();
        key_cols.sort();
        key_cols == from
    })
}

fn build_entry(
    reference: &Reference,
    catalog: &Arc<Catalog>,
    table: &Arc<Table>,
    entry: &Value,
    anchor: Option<&Tuple>,
) -> Option<RelatedReference> {
    match entry {
        // [schema, constraint] naming an inbound foreign key.
        Value::Array(pair) => {
            let constraint = match pair.as_slice() {
                [Value::String(schema), Value::String(name)] => format!("{}:{}", schema, name),
                _ => return None,
            };
            let (source_table, idx) = catalog.foreign_key(&constraint)?;
            let fk = source_table.foreign_keys[idx].clone();
            if fk.to_table() != table.qualified_name() {
                return None;
            }
            build_from_fk(reference, catalog, table, &source_table, &fk, anchor, false)
        }
        // Source-path definition: materialize the pseudo-column and take its
        // backing reference.
        Value::Object(spec) => {
            let source = match spec.get("sourcekey").and_then(|v| v.as_str()) {
                Some(key) => reference.source_definitions().get(key).cloned()?,
                None => SourcePath::parse(entry)?,
            };
            build_from_source(reference, catalog, table, &source, entry, anchor)
        }
        _ => None,
    }
}

fn build_from_fk(
    reference: &Reference,
    catalog: &Arc<Catalog>,
    table: &Arc<Table>,
    source_table: &Arc<Table>,
    fk: &ForeignKey,
    anchor: Option<&Tuple>,
    heuristically_ordered: bool,
) -> Option<RelatedReference> {
    // A pure binary association forwards to the far table.
    if let Some((to_fk, far_table)) = association_leap(catalog, source_table, fk) {
        let joins = vec![
            inbound_join(fk),
            outbound_join(&to_fk),
        ];
        let location = rooted_location(reference, table, anchor, &far_table, joins);
        let compressed_path = location.data_path();
        return Some(RelatedReference {
            reference: Reference::for_related(
                location,
                Arc::clone(catalog),
                far_table,
                reference.context(),
                None,
            ),
            origin_fk: fk.clone(),
            association: Some(Association {
                table: source_table.qualified_name(),
                to_fk,
            }),
            compressed_path,
            wait_for: Vec::new(),
            heuristically_ordered,
        });
    }

    let joins = vec![inbound_join(fk)];
    let location = rooted_location(reference, table, anchor, source_table, joins);
    let compressed_path = location.data_path();
    Some(RelatedReference {
        reference: Reference::for_related(
            location,
            Arc::clone(catalog),
            Arc::clone(source_table),
            reference.context(),
            None,
        ),
        origin_fk: fk.clone(),
        association: None,
        compressed_path,
        wait_for: Vec::new(),
        heuristically_ordered,
    })
}

fn build_from_source(
    reference: &Reference,
    catalog: &Arc<Catalog>,
    table: &Arc<Table>,
    source: &SourcePath,
    entry: &Value,
    anchor: Option<&Tuple>,
) -> Option<RelatedReference> {
    let first = source.steps.first()?;
    let PathStep::Inbound(constraint) = first else {
        return None;
    };
    let (source_table, idx) = catalog.foreign_key(constraint)?;
    let fk = source_table.foreign_keys[idx].clone();
    if fk.to_table() != table.qualified_name() {
        return None;
    }

    // Resolve every hop so multi-step sources land on the right table.
    let mut joins = vec![inbound_join(&fk)];
    let mut end_table = Arc::clone(&source_table);
    for step in &source.steps[1..] {
        let (step_table, step_idx) = catalog.foreign_key(step.constraint())?;
        let step_fk = &step_table.foreign_keys[step_idx];
        match step {
            PathStep::Outbound(_) => {
                joins.push(outbound_join(step_fk));
                let to = step_fk.to_table();
                let (schema, name) = to.split_once(':')?;
                end_table = Arc::clone(catalog.table(schema, name).ok()?);
            }
            PathStep::Inbound(_) => {
                joins.push(inbound_join(step_fk));
                end_table = step_table;
            }
        }
    }

    let location = rooted_location(reference, table, anchor, &end_table, joins);
    let compressed_path = location.data_path();
    Some(RelatedReference {
        reference: Reference::for_related(
            location,
            Arc::clone(catalog),
            end_table,
            reference.context(),
            Some(source.generated_name()),
        ),
        origin_fk: fk,
        association: None,
        compressed_path,
        wait_for: crate::column::parse_wait_for(entry),
        heuristically_ordered: false,
    })
}

/// Detect the pure binary association pattern: the referring table's key is
/// covered by exactly two non-system simple foreign keys, one of which is
/// the inbound one. Returns the other fk and the far table.
fn association_leap(
    catalog: &Arc<Catalog>,
    source_table: &Arc<Table>,
    inbound: &ForeignKey,
) -> Option<(ForeignKey, Arc<Table>)> {
    let non_system: Vec<&ForeignKey> = source_table
        .foreign_keys
        .iter()
        .filter(|fk| fk.is_non_system())
        .collect();
    if non_system.len() != 2 {
        return None;
    }

    let other = non_system
        .iter()
        .find(|fk| fk.name() != inbound.name())
        .copied()?;

    // The two fk column sets together must form a key of the table.
    let mut covered: Vec<String> = inbound.from_column_names();
    covered.extend(other.from_column_names());
    covered.sort();
    let is_association = source_table.keys.iter().any(|key| {
        let mut key_cols = key.unique_columns.clone();
        key_cols.sort();
        key_cols == covered
    });
    if !is_association {
        return None;
    }

    let to = other.to_table();
    let (schema, name) = to.split_once(':')?;
    let far_table = Arc::clone(catalog.table(schema, name).ok()?);
    Some((other.clone(), far_table))
}

/// Enter the referring table through the inbound fk's referenced columns.
fn inbound_join(fk: &ForeignKey) -> JoinClause {
    let first = fk.foreign_key_columns.first();
    JoinClause {
        from_columns: fk.to_column_names(),
        to_schema: first.map(|c| c.schema_name.clone()).unwrap_or_default(),
        to_table: first.map(|c| c.table_name.clone()).unwrap_or_default(),
        to_columns: fk.from_column_names(),
    }
}

/// Leave the current table along an outbound fk.
fn outbound_join(fk: &ForeignKey) -> JoinClause {
    let first = fk.referenced_columns.first();
    JoinClause {
        from_columns: fk.from_column_names(),
        to_schema: first.map(|c| c.schema_name.clone()).unwrap_or_default(),
        to_table: first.map(|c| c.table_name.clone()).unwrap_or_default(),
        to_columns: fk.to_column_names(),
    }
}

fn rooted_location(
    reference: &Reference,
    table: &Arc<Table>,
    anchor: Option<&Tuple>,
    end_table: &Arc<Table>,
    joins: Vec<JoinClause>,
) -> Location {
    let base = reference.location();
    let mut filters = base.filters.clone();
    if let Some(tuple) = anchor {
        if let Some(key) = table.shortest_key() {
            filters = key
                .unique_columns
                .iter()
                .map(|column| {
                    Filter::eq(
                        column.clone(),
                        tuple.get(column).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect();
        }
    }

    let mut location = Location::new(
        base.service.clone(),
        base.catalog_id.clone(),
        end_table.schema_name.clone(),
        end_table.name.clone(),
    );
    location.root = Some(PathRoot {
        schema: base.schema_name.clone(),
        table: base.table_name.clone(),
        filters,
        joins,
    });
    location
}

/// Deterministic order for heuristically-discovered relationships:
/// displayname, then referenced key column positions, then foreign key
/// column positions. Exact ties keep their discovery order; the comparator
/// never reports two relationships as equal. That final arbitrary-but-stable
/// ordering is accepted behavior.
fn sort_related(reference: &Reference, related: &mut Vec<RelatedReference>) {
    let table = reference.table();
    let mut keyed: Vec<(String, Vec<usize>, Vec<usize>, usize, RelatedReference)> = related
        .drain(..)
        .enumerate()
        .map(|(index, r)| {
            let name = r.display_name().to_string();
            let key_positions: Vec<usize> = r
                .origin_fk
                .to_column_names()
                .iter()
                .filter_map(|c| table.column_position(c))
                .collect();
            let fk_positions: Vec<usize> = {
                let source_table = r.origin_fk.from_table();
                let positions = source_table
                    .split_once(':')
                    .and_then(|(schema, name)| reference.catalog().table(schema, name).ok())
                    .map(|source| {
                        r.origin_fk
                            .from_column_names()
                            .iter()
                            .filter_map(|c| source.column_position(c))
                            .collect()
                    });
                positions.unwrap_or_default()
            };
            (name, key_positions, fk_positions, index, r)
        })
        .collect();

    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
            // Strict final tie-break on discovery order.
            .then_with(|| a.3.cmp(&b.3))
    });

    related.extend(keyed.into_iter().map(|(.., r)| r));
}
