//! Parsed resource location: identity, filters, facets, sort, paging, and
//! wire path rendering.
//!
//! A `Location` is a value object. Transform methods return modified clones;
//! the reference layer relies on that to stay immutable.

use serde_json::Value;

use crate::error::ReferenceError;
use crate::types::SortKey;

/// Binary filter operators supported in entity paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Null,
}

/// One `column=value` (or `column::null::`) path filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Filter {
            column: column.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn null(column: impl Into<String>) -> Self {
        Filter {
            column: column.into(),
            op: FilterOp::Null,
            value: Value::Null,
        }
    }

    fn render(&self) -> String {
        match self.op {
            FilterOp::Eq => format!("{}={}", encode(&self.column), encode_value(&self.value)),
            FilterOp::Null => format!("{}::null::", encode(&self.column)),
        }
    }
}

/// One facet with its current filter state.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetFilter {
    /// Backing column name.
    pub source: String,
    /// Selected choices; empty means the facet contributes no filter.
    pub choices: Vec<Value>,
    /// Hidden facets keep filtering but are not offered for display.
    pub hidden: bool,
}

impl FacetFilter {
    fn render(&self) -> Option<String> {
        if self.choices.is_empty() {
            return None;
        }
        let disjuncts: Vec<String> = self
            .choices
            .iter()
            .map(|choice| match choice {
                Value::Null => format!("{}::null::", encode(&self.source)),
                other => format!("{}={}", encode(&self.source), encode_value(other)),
            })
            .collect();
        Some(format!("({})", disjuncts.join(";")))
    }
}

/// Page boundary: key values of the row to page away from.
#[derive(Debug, Clone, PartialEq)]
pub enum Paging {
    Before(Vec<Value>),
    After(Vec<Value>),
}

impl Paging {
    pub fn is_before(&self) -> bool {
        matches!(self, Paging::Before(_))
    }
}

/// Join clause `(c1,c2)=(schema:table:d1,d2)` used when a location is rooted
/// in another table (related references).
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub from_columns: Vec<String>,
    pub to_schema: String,
    pub to_table: String,
    pub to_columns: Vec<String>,
}

impl JoinClause {
    fn render(&self) -> String {
        let from: Vec<String> = self.from_columns.iter().map(|c| encode(c)).collect();
        let to: Vec<String> = self.to_columns.iter().map(|c| encode(c)).collect();
        format!(
            "({})=({}:{}:{})",
            from.join(","),
            encode(&self.to_schema),
            encode(&self.to_table),
            to.join(",")
        )
    }
}

/// Path prefix for locations reached by joining away from an origin table.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRoot {
    pub schema: String,
    pub table: String,
    pub filters: Vec<Filter>,
    /// Joins from the root towards the location's own table, in order.
    pub joins: Vec<JoinClause>,
}

/// A fully parsed resource location.
#[derive(Debug, Clone)]
pub struct Location {
    /// Service root without a trailing slash.
    pub service: String,
    pub catalog_id: String,
    pub schema_name: String,
    pub table_name: String,
    /// Optional origin path for joined (related) locations.
    pub root: Option<PathRoot>,
    pub filters: Vec<Filter>,
    pub facets: Vec<FacetFilter>,
    pub search_term: Option<String>,
    pub sort: Vec<SortKey>,
    pub paging: Option<Paging>,
}

impl Location {
    pub fn new(
        service: impl Into<String>,
        catalog_id: impl Into<String>,
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        let service = service.into();
        Location {
            service: service.trim_end_matches('/').to_string(),
            catalog_id: catalog_id.into(),
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            root: None,
            filters: Vec::new(),
            facets: Vec::new(),
            search_term: None,
            sort: Vec::new(),
            paging: None,
        }
    }

    /// Parse a data URI of the form
    /// `<service>/catalog/<id>/entity/<schema>:<table>[/col=value...]`.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceError::InvalidInput` for anything that does not
    /// match that shape.
    pub fn parse(uri: &str) -> Result<Self, ReferenceError> {
        let url = url::Url::parse(uri)
            .map_err(|e| ReferenceError::invalid_input(format!("invalid uri {}: {}", uri, e)))?;

        let path = url.path();
        let marker = "/catalog/";
        let idx = path
            .find(marker)
            .ok_or_else(|| ReferenceError::invalid_input(format!("no /catalog/ segment in {}", uri)))?;

        let service_path = &path[..idx];
        let rest = &path[idx + marker.len()..];
        let mut segments = rest.split('/');

        let catalog_id = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReferenceError::invalid_input("missing catalog id"))?;

        let api = segments.next().unwrap_or_default();
        if api != "entity" {
            return Err(ReferenceError::invalid_input(format!(
                "expected entity api, found \"{}\"",
                api
            )));
        }

        let table_ref = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReferenceError::invalid_input("missing schema:table segment"))?;
        let (schema_name, table_name) = table_ref
            .split_once(':')
            .ok_or_else(|| ReferenceError::invalid_input("table segment must be schema:table"))?;

        let mut service = String::new();
        service.push_str(url.scheme());
        service.push_str("://");
        if let Some(host) = url.host_str() {
            service.push_str(host);
        }
        if let Some(port) = url.port() {
            service.push_str(&format!(":{}", port));
        }
        service.push_str(service_path);

        let mut location = Location::new(
            service,
            catalog_id,
            decode(schema_name)?,
            decode(table_name)?,
        );

        for segment in segments {
            if segment.is_empty() {
                continue;
            }
            if let Some(column) = segment.strip_suffix("::null::") {
                location.filters.push(Filter::null(decode(column)?));
                continue;
            }
            let (column, value) = segment.split_once('=').ok_or_else(|| {
                ReferenceError::invalid_input(format!("unsupported filter segment \"{}\"", segment))
            })?;
            location
                .filters
                .push(Filter::eq(decode(column)?, Value::String(decode(value)?)));
        }

        Ok(location)
    }

    /// `<service>/catalog/<id>`.
    pub fn catalog_base(&self) -> String {
        format!("{}/catalog/{}", self.service, self.catalog_id)
    }

    /// The data path after the api segment: root joins, table, filters,
    /// facets and search, without sort/paging suffixes.
    pub fn data_path(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(root) = &self.root {
            parts.push(format!("{}:{}", encode(&root.schema), encode(&root.table)));
            for filter in &root.filters {
                parts.push(filter.render());
            }
            for join in &root.joins {
                parts.push(join.render());
            }
        } else {
            parts.push(format!(
                "{}:{}",
                encode(&self.schema_name),
                encode(&self.table_name)
            ));
        }

        for filter in &self.filters {
            parts.push(filter.render());
        }
        for facet in &self.facets {
            if let Some(rendered) = facet.render() {
                parts.push(rendered);
            }
        }
        if let Some(term) = &self.search_term {
            parts.push(format!("*::ciregexp::{}", encode(term)));
        }

        parts.join("/")
    }

    /// Full entity path including sort and paging suffixes.
    pub fn entity_path(&self) -> String {
        format!("{}{}", self.data_path(), self.suffix())
    }

    /// `@sort(...)` plus `@before(...)`/`@after(...)` suffix.
    pub fn suffix(&self) -> String {
        let mut out = String::new();
        if !self.sort.is_empty() {
            let keys: Vec<String> = self
                .sort
                .iter()
                .map(|k| {
                    if k.descending {
                        format!("{}::desc::", encode(&k.column))
                    } else {
                        encode(&k.column)
                    }
                })
                .collect();
            out.push_str(&format!("@sort({})", keys.join(",")));
        }
        match &self.paging {
            Some(Paging::Before(values)) => {
                out.push_str(&format!("@before({})", render_page_values(values)));
            }
            Some(Paging::After(values)) => {
                out.push_str(&format!("@after({})", render_page_values(values)));
            }
            None => {}
        }
        out
    }

    // --- transforms; each returns a modified clone ---

    pub fn with_search(&self, term: Option<String>) -> Self {
        let mut next = self.clone();
        next.search_term = term;
        next.paging = None;
        next
    }

    pub fn with_sort(&self, sort: Vec<SortKey>) -> Self {
        let mut next = self.clone();
        next.sort = sort;
        next.paging = None;
        next
    }

    pub fn with_paging(&self, paging: Option<Paging>) -> Self {
        let mut next = self.clone();
        next.paging = paging;
        next
    }

    pub fn with_facets(&self, facets: Vec<FacetFilter>) -> Self {
        let mut next = self.clone();
        next.facets = facets;
        next.paging = None;
        next
    }
}

fn render_page_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::Null => "::null::".to_string(),
            other => encode_value(other),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Percent-encode one path component.
pub fn encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => encode(s),
        other => encode(&other.to_string()),
    }
}

fn decode(raw: &str) -> Result<String, ReferenceError> {
    url::form_urlencoded::parse(format!("x={}", raw).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| ReferenceError::invalid_input(format!("undecodable segment \"{}\"", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_minimal_uri() {
        let loc =
            Location::parse("https://example.org/api/catalog/42/entity/isa:dataset").unwrap();
        assert_eq!(loc.service, "https://example.org/api");
        assert_eq!(loc.catalog_id, "42");
        assert_eq!(loc.schema_name, "isa");
        assert_eq!(loc.table_name, "dataset");
        assert!(loc.filters.is_empty());
    }

    #[test]
    fn parse_uri_with_filters() {
        let loc = Location::parse(
            "https://example.org/api/catalog/1/entity/isa:dataset/id=3/status::null::",
        )
        .unwrap();
        assert_eq!(loc.filters.len(), 2);
        assert_eq!(loc.filters[0], Filter::eq("id", json!("3")));
        assert_eq!(loc.filters[1], Filter::null("status"));
    }

    #[test]
    fn parse_rejects_non_entity_api() {
        let err = Location::parse("https://example.org/api/catalog/1/attribute/isa:dataset")
            .unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidInput { .. }));
    }

    #[test]
    fn entity_path_renders_filters_facets_and_search() {
        let mut loc = Location::new("https://example.org/api", "1", "isa", "dataset");
        loc.filters.push(Filter::eq("id", json!(3)));
        loc.facets.push(FacetFilter {
            source: "status".to_string(),
            choices: vec![json!("ok"), Value::Null],
            hidden: false,
        });
        loc.search_term = Some("liver".to_string());
        assert_eq!(
            loc.entity_path(),
            "isa:dataset/id=3/(status=ok;status::null::)/*::ciregexp::liver"
        );
    }

    #[test]
    fn facet_without_choices_contributes_no_filter() {
        let mut loc = Location::new("https://example.org/api", "1", "isa", "dataset");
        loc.facets.push(FacetFilter {
            source: "status".to_string(),
            choices: Vec::new(),
            hidden: false,
        });
        assert_eq!(loc.entity_path(), "isa:dataset");
    }

    #[test]
    fn sort_and_paging_suffix() {
        let mut loc = Location::new("https://example.org/api", "1", "isa", "dataset");
        loc.sort = vec![SortKey::desc("released"), SortKey::asc("id")];
        loc.paging = Some(Paging::After(vec![json!("2024-01-01"), json!(17)]));
        assert_eq!(
            loc.suffix(),
            "@sort(released::desc::,id)@after(2024-01-01,17)"
        );

        loc.paging = Some(Paging::Before(vec![Value::Null, json!(4)]));
        assert_eq!(loc.suffix(), "@sort(released::desc::,id)@before(::null::,4)");
    }

    #[test]
    fn rooted_path_renders_join_chain() {
        let mut loc = Location::new("https://example.org/api", "1", "s", "experiment");
        loc.root = Some(PathRoot {
            schema: "s".to_string(),
            table: "dataset".to_string(),
            filters: vec![Filter::eq("RID", json!("1-X"))],
            joins: vec![JoinClause {
                from_columns: vec!["id".to_string()],
                to_schema: "s".to_string(),
                to_table: "experiment".to_string(),
                to_columns: vec!["dataset_id".to_string()],
            }],
        });
        assert_eq!(
            loc.data_path(),
            "s:dataset/RID=1-X/(id)=(s:experiment:dataset_id)"
        );
    }

    #[test]
    fn transforms_do_not_mutate_receiver() {
        let loc = Location::new("https://example.org/api", "1", "isa", "dataset");
        let sorted = loc.with_sort(vec![SortKey::asc("id")]);
        assert!(loc.sort.is_empty());
        assert_eq!(sorted.sort.len(), 1);

        let searched = loc.with_search(Some("x".to_string()));
        assert!(loc.search_term.is_none());
        assert_eq!(searched.search_term.as_deref(), Some("x"));
    }

    #[test]
    fn encode_escapes_reserved_characters() {
        assert_eq!(encode("a b/c"), "a+b%2Fc");
        assert_eq!(encode("plain"), "plain");
    }
}
