//! Active-list planner: the deduplicated plan of secondary requests needed
//! to materialize one page.
//!
//! Inputs are processed in a fixed order — citation, non-aggregate inline
//! columns, aggregate inline columns, related references, leftover outbound
//! foreign keys — because consumer indices and bucket order are part of the
//! contract with the substitution step.

use std::collections::BTreeMap;

use tracing::debug;

use crate::column::{SourcePath, VisibleColumn};
use crate::model::Table;
use crate::types::Context;

/// What a secondary request fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Entry-context prefill of an outbound foreign key value.
    FirstOutbound,
    /// A path filtered down to a single row.
    Entity,
    /// An aggregate over a joined path.
    Aggregate,
    /// A related row set; only meaningful in detailed context.
    EntitySet,
}

/// Which part of the page consumes a request's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    Citation,
    Column,
    Related,
}

/// One consumption site of a secondary request result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    /// Visible-column or related-reference index; none for the citation.
    pub index: Option<usize>,
    /// True when the site needs the value as a wait-for dependency rather
    /// than as its own content.
    pub is_wait_for: bool,
    pub kind: ConsumerKind,
}

/// One deduplicated secondary request with every site that needs it.
#[derive(Debug, Clone)]
pub struct SecondaryRequest {
    pub kind: RequestKind,
    /// Backing column name; the bucket key.
    pub column_name: String,
    pub source: SourcePath,
    pub consumers: Vec<Consumer>,
}

/// An outbound join riding along the main read.
#[derive(Debug, Clone)]
pub struct OutboundEntry {
    pub name: String,
    pub source: SourcePath,
}

/// The computed plan for one page.
#[derive(Debug, Clone, Default)]
pub struct ActiveList {
    pub requests: Vec<SecondaryRequest>,
    pub all_outbounds: Vec<OutboundEntry>,
    /// Key pseudo-column names rendered as self links.
    pub self_links: Vec<String>,
}

impl ActiveList {
    pub fn request(&self, column_name: &str) -> Option<&SecondaryRequest> {
        self.requests.iter().find(|r| r.column_name == column_name)
    }

    /// Total number of consumption sites across all buckets.
    pub fn consumer_count(&self) -> usize {
        self.requests.iter().map(|r| r.consumers.len()).sum()
    }

    fn add(&mut self, kind: RequestKind, name: &str, source: &SourcePath, consumer: Consumer) {
        if let Some(existing) = self
            .requests
            .iter_mut()
            .find(|r| r.column_name == name && r.kind == kind)
        {
            if !existing.consumers.contains(&consumer) {
                existing.consumers.push(consumer);
            }
            return;
        }
        self.requests.push(SecondaryRequest {
            kind,
            column_name: name.to_string(),
            source: source.clone(),
            consumers: vec![consumer],
        });
    }

    fn add_outbound(&mut self, name: &str, source: &SourcePath) {
        if self.all_outbounds.iter().any(|o| o.name == name) {
            return;
        }
        self.all_outbounds.push(OutboundEntry {
            name: name.to_string(),
            source: source.clone(),
        });
    }

    fn add_self_link(&mut self, name: &str) {
        if !self.self_links.iter().any(|n| n == name) {
            self.self_links.push(name.to_string());
        }
    }
}

/// Everything the planner needs about one reference.
pub(crate) struct PlannerInput<'a> {
    pub context: Context,
    pub table: &'a Table,
    pub columns: &'a [VisibleColumn],
    /// Named source definitions wait-fors resolve against.
    pub definitions: &'a BTreeMap<String, SourcePath>,
    /// Citation wait-for names; consulted in detailed context only.
    pub citation_wait_for: &'a [String],
    /// Wait-for names per related reference, in related order.
    pub related_wait_for: &'a [Vec<String>],
}

/// Compute the active list for one reference.
pub(crate) fn compute(input: &PlannerInput<'_>) -> ActiveList {
    let mut list = ActiveList::default();

    // 1. Citation dependencies, detailed context only.
    if input.context == Context::Detailed {
        for name in input.citation_wait_for {
            add_wait_for(
                &mut list,
                input,
                name,
                Consumer {
                    index: None,
                    is_wait_for: true,
                    kind: ConsumerKind::Citation,
                },
            );
        }
    }

    // 2. Non-aggregate inline columns and their wait-fors.
    for (index, column) in input.columns.iter().enumerate() {
        if column.has_aggregate() {
            continue;
        }
        add_column(&mut list, input, index, column);
    }

    // 3. Aggregate-bearing inline columns and their wait-fors.
    for (index, column) in input.columns.iter().enumerate() {
        if !column.has_aggregate() {
            continue;
        }
        add_column(&mut list, input, index, column);
    }

    // 4. Related references, detailed context only.
    if input.context == Context::Detailed {
        for (index, wait_for) in input.related_wait_for.iter().enumerate() {
            for name in wait_for {
                add_wait_for(
                    &mut list,
                    input,
                    name,
                    Consumer {
                        index: Some(index),
                        is_wait_for: true,
                        kind: ConsumerKind::Related,
                    },
                );
            }
        }
    }

    // 5. Any outbound foreign key not covered yet, as a synthetic entry.
    for fk in &input.table.foreign_keys {
        let name = fk.name();
        if list.all_outbounds.iter().any(|o| o.name == name) {
            continue;
        }
        let source = SourcePath {
            steps: vec![crate::column::PathStep::Outbound(name.clone())],
            column: fk.to_column_names().first().cloned().unwrap_or_default(),
            aggregate: None,
            entity: true,
            unique: false,
        };
        list.all_outbounds.push(OutboundEntry { name, source });
    }

    debug!(
        requests = list.requests.len(),
        outbounds = list.all_outbounds.len(),
        self_links = list.self_links.len(),
        "computed active list"
    );
    list
}

fn add_column(
    list: &mut ActiveList,
    input: &PlannerInput<'_>,
    index: usize,
    column: &VisibleColumn,
) {
    let consumer = Consumer {
        index: Some(index),
        is_wait_for: false,
        kind: ConsumerKind::Column,
    };

    match column {
        VisibleColumn::Key(_) => list.add_self_link(&column.name()),
        VisibleColumn::ForeignKey(c) => list.add_outbound(&c.name, &c.source),
        VisibleColumn::InboundForeignKey(c) => {
            if input.context == Context::Detailed {
                list.add(RequestKind::EntitySet, &c.name, &c.source, consumer);
            }
            // Entity sets are meaningless outside detailed; dropped.
        }
        VisibleColumn::Virtual(c) => {
            if let Some(source) = &c.source {
                classify(list, input.context, &c.name, source, consumer);
            }
        }
        VisibleColumn::Plain(_) | VisibleColumn::Asset(_) => {}
    }

    for name in column.wait_for() {
        add_wait_for(
            list,
            input,
            name,
            Consumer {
                index: Some(index),
                is_wait_for: true,
                kind: ConsumerKind::Column,
            },
        );
    }
}

fn add_wait_for(list: &mut ActiveList, input: &PlannerInput<'_>, name: &str, consumer: Consumer) {
    let Some(source) = input.definitions.get(name) else {
        debug!(source = %name, "wait-for names an unknown source definition");
        return;
    };
    classify(list, input.context, name, source, consumer);
}

/// Classification ladder for one dependency source; first matching rule
/// wins.
fn classify(
    list: &mut ActiveList,
    context: Context,
    name: &str,
    source: &SourcePath,
    consumer: Consumer,
) {
    if context.is_entry() && source.is_all_outbound() {
        list.add(RequestKind::FirstOutbound, name, source, consumer);
    } else if source.unique {
        list.add(RequestKind::Entity, name, source, consumer);
    } else if source.aggregate.is_some() {
        list.add(RequestKind::Aggregate, name, source, consumer);
    } else if source.has_inbound() {
        if context == Context::Detailed {
            list.add(RequestKind::EntitySet, name, source, consumer);
        }
        // Silently dropped outside detailed.
    } else if source.is_all_outbound() {
        list.add_outbound(name, source);
    }
    // Local sources need no secondary request; the row already has them.
}
