//! Core shared types: presentation contexts, sort keys, row payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single data row as exchanged with the catalog service.
///
/// Key order is preserved so that projections survive a round trip.
pub type Row = serde_json::Map<String, Value>;

/// Named presentation mode controlling visible columns and behavior.
///
/// Contexts form a fallback hierarchy: an annotation that has no entry for
/// `entry/create` is looked up under `entry`, then under the `*` default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Compact,
    #[serde(rename = "compact/brief")]
    CompactBrief,
    #[serde(rename = "compact/select")]
    CompactSelect,
    Detailed,
    Entry,
    #[serde(rename = "entry/create")]
    EntryCreate,
    #[serde(rename = "entry/edit")]
    EntryEdit,
    Filter,
    Export,
}

impl Context {
    /// Annotation key for this context.
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Compact => "compact",
            Context::CompactBrief => "compact/brief",
            Context::CompactSelect => "compact/select",
            Context::Detailed => "detailed",
            Context::Entry => "entry",
            Context::EntryCreate => "entry/create",
            Context::EntryEdit => "entry/edit",
            Context::Filter => "filter",
            Context::Export => "export",
        }
    }

    /// Parse a context name.
    ///
    /// Returns `None` for unknown values (caller should error).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compact" => Some(Context::Compact),
            "compact/brief" => Some(Context::CompactBrief),
            "compact/select" => Some(Context::CompactSelect),
            "detailed" => Some(Context::Detailed),
            "entry" => Some(Context::Entry),
            "entry/create" => Some(Context::EntryCreate),
            "entry/edit" => Some(Context::EntryEdit),
            "filter" => Some(Context::Filter),
            "export" => Some(Context::Export),
            _ => None,
        }
    }

    /// Lookup chain for context-keyed annotations, most specific first,
    /// always ending with the `*` default.
    pub fn fallback_chain(&self) -> &'static [&'static str] {
        match self {
            Context::Compact => &["compact", "*"],
            Context::CompactBrief => &["compact/brief", "compact", "*"],
            Context::CompactSelect => &["compact/select", "compact", "*"],
            Context::Detailed => &["detailed", "*"],
            Context::Entry => &["entry", "*"],
            Context::EntryCreate => &["entry/create", "entry", "*"],
            Context::EntryEdit => &["entry/edit", "entry", "*"],
            Context::Filter => &["filter", "compact", "*"],
            Context::Export => &["export", "detailed", "*"],
        }
    }

    /// True for any of the entry (input form) contexts.
    pub fn is_entry(&self) -> bool {
        matches!(self, Context::Entry | Context::EntryCreate | Context::EntryEdit)
    }
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: true,
        }
    }
}

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
