//! catref — client-side reference engine for relational catalog services.
//!
//! Given a parsed resource location and a catalog model, this library builds
//! a [`Reference`]: an immutable, context-dependent projection of a relation
//! that can be read, mutated, and reshaped (search/sort/facet) without
//! re-resolving from scratch. The engine plans the minimal deduplicated set
//! of secondary requests for one page, speaks the catalog's attribute-group
//! protocol for updates, and composes static and dynamic ACLs into effective
//! permissions.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use catref::{Catalog, Context, Location, Reference};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "schemas": {
//!         "isa": {
//!             "tables": {
//!                 "dataset": {
//!                     "table_name": "dataset",
//!                     "column_definitions": [
//!                         {"name": "id", "type": {"typename": "int4"}, "nullok": false},
//!                         {"name": "title", "type": {"typename": "text"}}
//!                     ],
//!                     "keys": [{"unique_columns": ["id"]}]
//!                 }
//!             }
//!         }
//!     }
//! });
//! let catalog = Catalog::from_schema_document("https://example.org/api", "1", &schema).unwrap();
//! let location = Location::new("https://example.org/api", "1", "isa", "dataset");
//!
//! let reference = Reference::new(location, Arc::new(catalog)).unwrap();
//! let detailed = reference.contextualize(Context::Detailed);
//!
//! assert_eq!(detailed.columns().len(), 2);
//! assert!(detailed.can_create().allowed);
//! assert_eq!(detailed.uri(), "https://example.org/api/catalog/1/entity/isa:dataset");
//! ```
//!
//! Network-facing entry points ([`Reference::resolve`], [`Reference::read`],
//! create/update/delete) take a [`Transport`] built over a blocking HTTP
//! client; everything else is computable offline from the model.

mod active_list;
mod column;
mod error;
mod location;
mod model;
mod mutation;
mod page;
mod permissions;
mod reference;
mod related;
mod transport;
mod types;

pub use active_list::{
    ActiveList, Consumer, ConsumerKind, OutboundEntry, RequestKind, SecondaryRequest,
};
pub use column::{
    Aggregate, AssetColumn, ForeignKeyColumn, InboundForeignKeyColumn, KeyColumn, PathStep,
    PlainColumn, SourcePath, VirtualColumn, VisibleColumn,
};
pub use error::{ReferenceError, TransportError};
pub use location::{FacetFilter, Filter, FilterOp, JoinClause, Location, Paging, PathRoot};
pub use model::{
    annotation, Catalog, CatalogFeatures, Column, ColumnRef, ColumnType, ForeignKey, Key, Rights,
    Table, TableKind, IDENTITY_COLUMN, SYSTEM_COLUMNS,
};
pub use mutation::{
    CreateOptions, DeleteOutcome, ReadOptions, UpdateOutcome, URL_LENGTH_BUDGET,
};
pub use page::{Page, Tuple};
pub use permissions::Permission;
pub use reference::{BulkCreateForeignKey, Citation, FacetColumn, Reference};
pub use related::{Association, RelatedReference};
pub use transport::{RequestContext, Transport, CONTEXT_HEADER};
pub use types::{Context, Row, SortKey};
