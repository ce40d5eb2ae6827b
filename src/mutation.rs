//! Read, create, update and delete against the catalog's wire protocol.
//!
//! Reads go through the entity or attribute-group api with a `limit+1`
//! probe; creates send a `defaults=` projection instead of nulls; updates
//! speak the attribute-group protocol with old/new key aliasing and
//! diff-based column projection; tuple-set deletes run one filter group at a
//! time so each outcome is attributed independently.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::active_list::RequestKind;
use crate::error::{ReferenceError, TransportError};
use crate::location::{encode, Paging};
use crate::model::Column;
use crate::page::{Page, Tuple, TCRS_FIELD, TRS_FIELD};
use crate::reference::Reference;
use crate::transport::{RequestContext, Transport};
use crate::types::{Context, Row, SortKey};

/// Default ceiling for generated filter URLs.
pub const URL_LENGTH_BUDGET: usize = 2000;

/// Options for [`Reference::read_with_options`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Action label for the request context; defaults to `read`.
    pub action: Option<String>,
}

/// Options for [`Reference::create_with_options`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Ask the server to skip rows that collide with existing keys instead
    /// of failing the batch.
    pub skip_on_conflict: bool,
}

/// Result partitions of an update call.
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Rows the server confirmed.
    pub successful: Page,
    /// Rows submitted but not confirmed: the server updated fewer rows than
    /// requested without an explanation. Weaker than an explicit error.
    pub failed: Option<Page>,
    /// Rows never submitted for lack of per-row update permission.
    pub disabled: Option<Page>,
}

/// Accumulated result of a tuple-set delete.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Number of rows submitted in successful delete requests.
    pub deleted: usize,
    /// Human-readable failure notes, one per failed filter group.
    pub failures: Vec<String>,
    /// Displaynames of rows never submitted for lack of permission.
    pub disabled: Vec<String>,
}

impl DeleteOutcome {
    /// One-line summary of the outcome.
    pub fn message(&self) -> String {
        let mut parts = vec![format!("{} row(s) deleted", self.deleted)];
        if !self.disabled.is_empty() {
            parts.push(format!(
                "{} row(s) not deletable: {}",
                self.disabled.len(),
                self.disabled.join(", ")
            ));
        }
        if !self.failures.is_empty() {
            parts.push(format!("{} request(s) failed", self.failures.len()));
        }
        parts.join("; ")
    }
}

impl Reference {
    fn request_context(&self, action: &str) -> RequestContext {
        RequestContext::new(
            self.location().catalog_id.clone(),
            self.table().qualified_name(),
            action,
        )
    }

    /// Sort keys a read actually uses: the explicit location sort, else the
    /// annotated row order, always extended with shortest-key columns so
    /// paging is total-ordered.
    fn effective_sort(&self) -> Vec<SortKey> {
        let mut sort = if self.location().sort.is_empty() {
            self.table().row_order(self.context())
        } else {
            self.location().sort.clone()
        };
        if let Some(key) = self.table().shortest_key() {
            for column in &key.unique_columns {
                if !sort.iter().any(|k| &k.column == column) {
                    sort.push(SortKey::asc(column.clone()));
                }
            }
        }
        sort
    }

    /// Read one page of at most `limit` rows.
    ///
    /// Requests `limit+1` rows so has-next/has-previous need no second round
    /// trip. A backward-paged read that comes up short is retried exactly
    /// once without the backward modifier; the retried request cannot
    /// recurse because it can no longer be backward-paged.
    ///
    /// # Errors
    ///
    /// `ReferenceError::InvalidInput` for a zero limit;
    /// `ReferenceError::InvalidServerResponse` for a non-array payload.
    pub fn read(&self, transport: &Transport, limit: usize) -> Result<Page, ReferenceError> {
        self.read_with_options(transport, limit, &ReadOptions::default())
    }

    pub fn read_with_options(
        &self,
        transport: &Transport,
        limit: usize,
        options: &ReadOptions,
    ) -> Result<Page, ReferenceError> {
        if limit == 0 {
            return Err(ReferenceError::invalid_input("limit must be positive"));
        }
        let action = options.action.clone().unwrap_or_else(|| "read".to_string());
        let sort = self.effective_sort();
        self.read_attempt(
            transport,
            limit,
            &sort,
            self.location().paging.clone(),
            &action,
            true,
        )
    }

    fn read_attempt(
        &self,
        transport: &Transport,
        limit: usize,
        sort: &[SortKey],
        paging: Option<Paging>,
        action: &str,
        allow_reload: bool,
    ) -> Result<Page, ReferenceError> {
        let backward = paging.as_ref().map(Paging::is_before).unwrap_or(false);
        let suffix = self
            .location()
            .with_sort(sort.to_vec())
            .with_paging(paging.clone())
            .suffix();
        let url = format!(
            "{}/{}{}?limit={}",
            self.location().catalog_base(),
            self.read_path(),
            suffix,
            limit + 1
        );

        let context = self.request_context(action);
        let (value, etag) = transport.get(&url, &context)?;
        let mut rows = self.parse_read_rows(value)?;

        // The only automatic retry: a backward page that came up short is
        // reloaded from the start, relabeled so logs show what happened.
        if backward && rows.len() < limit && allow_reload {
            warn!(
                rows = rows.len(),
                limit, "backward page came up short, reloading without paging"
            );
            let action = format!("{}/auto-reload", action);
            return self.read_attempt(transport, limit, sort, None, &action, false);
        }

        let extra = rows.len() > limit;
        let (has_previous, has_next) = if backward {
            if extra {
                rows.remove(0);
            }
            (extra, true)
        } else {
            if extra {
                rows.pop();
            }
            (paging.is_some(), extra)
        };

        let can_update = self.can_update().allowed;
        let can_delete = self.can_delete().allowed;
        let tuples = rows
            .into_iter()
            .map(|(data, linked)| Tuple::from_row(data, linked, can_update, can_delete))
            .collect();

        debug!(action, limit, has_next, has_previous, "read complete");
        Ok(Page::new(
            tuples,
            sort.to_vec(),
            paging,
            has_previous,
            has_next,
            etag,
        ))
    }

    /// Split raw response rows into main-row data plus linked rows by alias.
    fn parse_read_rows(
        &self,
        value: Value,
    ) -> Result<Vec<(Row, serde_json::Map<String, Value>)>, ReferenceError> {
        let raw_rows = match value {
            Value::Array(rows) => rows,
            other => {
                return Err(ReferenceError::InvalidServerResponse {
                    message: format!(
                        "expected a row array, got {}",
                        crate::types::json_type_name(&other)
                    ),
                })
            }
        };

        let grouped = self.read_path().starts_with("attributegroup/");
        let mut rows = Vec::with_capacity(raw_rows.len());

        for raw in raw_rows {
            let Value::Object(mut raw) = raw else {
                return Err(ReferenceError::InvalidServerResponse {
                    message: "row is not an object".to_string(),
                });
            };

            if !grouped {
                rows.push((raw, serde_json::Map::new()));
                continue;
            }

            let mut data = match raw.remove("M") {
                Some(Value::Array(mut main)) if !main.is_empty() => match main.remove(0) {
                    Value::Object(row) => row,
                    other => {
                        return Err(ReferenceError::InvalidServerResponse {
                            message: format!(
                                "main row is {}",
                                crate::types::json_type_name(&other)
                            ),
                        })
                    }
                },
                _ => {
                    return Err(ReferenceError::InvalidServerResponse {
                        message: "grouped row without main alias".to_string(),
                    })
                }
            };

            let mut linked = serde_json::Map::new();
            for (index, entry) in self.active_list().all_outbounds.iter().enumerate() {
                let alias = format!("F{}", index + 1);
                let value = match raw.remove(&alias) {
                    Some(Value::Array(mut joined)) if !joined.is_empty() => joined.remove(0),
                    _ => Value::Null,
                };
                linked.insert(entry.name.clone(), value);
            }

            // Row-rights summaries ride along the grouped row.
            if let Some(trs) = raw.remove(TRS_FIELD) {
                data.insert(TRS_FIELD.to_string(), trs);
            }
            if let Some(tcrs) = raw.remove(TCRS_FIELD) {
                data.insert(TCRS_FIELD.to_string(), tcrs);
            }

            rows.push((data, linked));
        }
        Ok(rows)
    }

    /// Create a batch of rows. The batch is atomic: it fully succeeds or
    /// the call fails.
    ///
    /// Columns the caller lacks insert rights on, or whose value is absent
    /// across every row, are sent as a `defaults=` parameter instead of
    /// nulls.
    ///
    /// # Errors
    ///
    /// `ReferenceError::InvalidInput` outside entry/create context or for an
    /// empty batch.
    pub fn create(&self, transport: &Transport, rows: &[Row]) -> Result<Page, ReferenceError> {
        self.create_with_options(transport, rows, &CreateOptions::default())
    }

    pub fn create_with_options(
        &self,
        transport: &Transport,
        rows: &[Row],
        options: &CreateOptions,
    ) -> Result<Page, ReferenceError> {
        if self.context() != Context::EntryCreate {
            return Err(ReferenceError::invalid_input(
                "create requires the entry/create context",
            ));
        }
        if rows.is_empty() {
            return Err(ReferenceError::invalid_input("create requires at least one row"));
        }

        let defaults = self.default_columns(rows);
        let mut url = format!(
            "{}/entity/{}:{}",
            self.location().catalog_base(),
            encode(&self.location().schema_name),
            encode(&self.location().table_name),
        );
        let mut params = Vec::new();
        if !defaults.is_empty() {
            params.push(format!(
                "defaults={}",
                defaults
                    .iter()
                    .map(|c| encode(c))
                    .collect::<Vec<_>>()
                    .join(",")
            ));
        }
        if options.skip_on_conflict {
            params.push("onconflict=skip".to_string());
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }

        let body = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        let context = self.request_context("create");
        info!(rows = rows.len(), defaults = defaults.len(), "create");
        let (value, etag) = transport.post(&url, &body, &context)?;

        let Value::Array(created) = value else {
            return Err(ReferenceError::InvalidServerResponse {
                message: "create did not return a row array".to_string(),
            });
        };
        let tuples = created
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(row) => Some(Tuple::from_row(
                    row,
                    serde_json::Map::new(),
                    self.can_update().allowed,
                    self.can_delete().allowed,
                )),
                _ => None,
            })
            .collect();
        Ok(Page::new(tuples, Vec::new(), None, false, false, etag))
    }

    /// Columns to request server defaults for: no insert right, or absent
    /// in every row of the batch. Servers reject explicit nulls on not-null
    /// columns unless defaulted, including columns a trigger will populate.
    fn default_columns(&self, rows: &[Row]) -> Vec<String> {
        let mut defaults = Vec::new();
        for column in &self.table().columns {
            if column.is_system() {
                continue;
            }
            let no_insert = column.rights.insert == Some(false) || column.is_generated();
            let absent_everywhere = rows.iter().all(|row| !row.contains_key(&column.name));
            if no_insert || absent_everywhere {
                defaults.push(column.name.clone());
            }
        }
        defaults
    }

    /// Update rows through the attribute-group protocol.
    ///
    /// Rows without per-row update permission are partitioned out, never
    /// submitted. The projection is the union of changed columns across the
    /// whole batch plus the shortest-key columns, aliased `o<i>` (old) and
    /// `n<i>` (new).
    ///
    /// # Errors
    ///
    /// `ReferenceError::InvalidInput` outside entry/edit context;
    /// `ReferenceError::NoDataChanged` when nothing differs;
    /// `ReferenceError::Forbidden` when the server rejects the batch as
    /// unauthorized.
    pub fn update(
        &self,
        transport: &Transport,
        tuples: &[Tuple],
    ) -> Result<UpdateOutcome, ReferenceError> {
        if self.context() != Context::EntryEdit {
            return Err(ReferenceError::invalid_input(
                "update requires the entry/edit context",
            ));
        }

        let key_columns = self
            .table()
            .shortest_key()
            .map(|k| k.unique_columns.clone())
            .ok_or_else(|| ReferenceError::invalid_input("table has no key to update through"))?;

        // Partition out rows the row-rights summary says we cannot touch.
        let (candidates, disabled): (Vec<&Tuple>, Vec<&Tuple>) =
            tuples.iter().partition(|t| t.can_update());

        let changed = self.changed_columns(&candidates);
        if changed.is_empty() {
            return Err(ReferenceError::NoDataChanged);
        }

        // Rows whose changed columns are frozen per-column join the
        // disabled bucket rather than poisoning the batch.
        let (candidates, frozen): (Vec<&Tuple>, Vec<&Tuple>) = candidates
            .into_iter()
            .partition(|t| changed.iter().all(|c| t.can_update_column(c)));
        let disabled: Vec<&Tuple> = disabled.into_iter().chain(frozen).collect();
        if candidates.is_empty() {
            return Err(ReferenceError::NoDataChanged);
        }

        // Path: o<i> aliases locate rows by old key; n<i> aliases carry the
        // new values.
        let old_parts: Vec<String> = key_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("o{}:={}", i, encode(c)))
            .collect();
        let new_parts: Vec<String> = changed
            .iter()
            .enumerate()
            .map(|(i, c)| format!("n{}:={}", i, encode(c)))
            .collect();
        let url = format!(
            "{}/attributegroup/{}:{}/{};{}",
            self.location().catalog_base(),
            encode(&self.location().schema_name),
            encode(&self.location().table_name),
            old_parts.join(","),
            new_parts.join(","),
        );

        let body: Vec<Value> = candidates
            .iter()
            .map(|tuple| {
                let mut row = serde_json::Map::new();
                for (i, column) in key_columns.iter().enumerate() {
                    row.insert(
                        format!("o{}", i),
                        tuple.snapshot().get(column).cloned().unwrap_or(Value::Null),
                    );
                }
                for (i, column) in changed.iter().enumerate() {
                    row.insert(
                        format!("n{}", i),
                        tuple.get(column).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(row)
            })
            .collect();

        let context = self.request_context("update");
        info!(
            rows = candidates.len(),
            disabled = disabled.len(),
            columns = changed.len(),
            "update"
        );
        let (value, etag) = match transport.put(&url, &Value::Array(body), &context) {
            Ok(result) => result,
            Err(TransportError::Status { status, message, .. })
                if status == 401 || status == 403 =>
            {
                return Err(ReferenceError::Forbidden { message });
            }
            Err(err) => return Err(err.into()),
        };

        let Value::Array(confirmed) = value else {
            return Err(ReferenceError::InvalidServerResponse {
                message: "update did not return a row array".to_string(),
            });
        };

        // Response order is not guaranteed; correlate by aliased key values.
        let key_changed_at: Vec<Option<usize>> = key_columns
            .iter()
            .map(|k| changed.iter().position(|c| c == k))
            .collect();
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for tuple in &candidates {
            let matched = confirmed.iter().find(|row| {
                key_columns.iter().enumerate().all(|(i, column)| {
                    let old_matches = row
                        .get(format!("o{}", i))
                        .map(|v| {
                            loose_eq(
                                v,
                                tuple.snapshot().get(column).unwrap_or(&Value::Null),
                            )
                        })
                        .unwrap_or(false);
                    // A changed key is matched through its new alias too.
                    let new_matches = key_changed_at[i]
                        .and_then(|j| row.get(format!("n{}", j)))
                        .map(|v| loose_eq(v, tuple.get(column).unwrap_or(&Value::Null)))
                        .unwrap_or(false);
                    old_matches || new_matches
                })
            });

            match matched {
                Some(row) => {
                    // Un-alias and back-fill with submitted data the server
                    // omitted.
                    let mut data = tuple.data().clone();
                    for (i, column) in changed.iter().enumerate() {
                        if let Some(value) = row.get(format!("n{}", i)) {
                            data.insert(column.clone(), value.clone());
                        }
                    }
                    for (i, column) in key_columns.iter().enumerate() {
                        if key_changed_at[i].is_none() {
                            if let Some(value) = row.get(format!("o{}", i)) {
                                data.insert(column.clone(), value.clone());
                            }
                        }
                    }
                    successful.push(Tuple::from_row(
                        data,
                        serde_json::Map::new(),
                        true,
                        tuple.can_delete(),
                    ));
                }
                None => failed.push((*tuple).clone()),
            }
        }

        if !failed.is_empty() {
            warn!(
                submitted = candidates.len(),
                confirmed = successful.len(),
                "server confirmed fewer rows than submitted"
            );
        }

        let disabled_tuples: Vec<Tuple> = disabled.into_iter().cloned().collect();
        Ok(UpdateOutcome {
            successful: Page::new(successful, Vec::new(), None, false, false, etag),
            failed: (!failed.is_empty())
                .then(|| Page::new(failed, Vec::new(), None, false, false, None)),
            disabled: (!disabled_tuples.is_empty())
                .then(|| Page::new(disabled_tuples, Vec::new(), None, false, false, None)),
        })
    }

    /// Union of columns whose value differs from the snapshot anywhere in
    /// the batch. Composite pseudo-columns expand to their physical
    /// constituents; datetime columns compare as instants, not strings.
    fn changed_columns(&self, tuples: &[&Tuple]) -> Vec<String> {
        let mut changed = Vec::new();
        for visible in self.columns() {
            for physical in visible.physical_columns() {
                if changed.contains(&physical) {
                    continue;
                }
                let column = self.table().column(&physical);
                let touched = tuples.iter().any(|tuple| {
                    let old = tuple.snapshot().get(&physical).unwrap_or(&Value::Null);
                    let new = tuple.get(&physical).unwrap_or(&Value::Null);
                    value_changed(column, old, new)
                });
                if touched {
                    changed.push(physical);
                }
            }
        }
        changed
    }

    /// Delete rows.
    ///
    /// Without tuples, one delete request removes everything this reference
    /// filters to. With tuples, rows are partitioned by per-row delete
    /// permission, grouped into filter expressions under the URL budget, and
    /// deleted one request at a time: a single failure never aborts the
    /// batch.
    pub fn delete(
        &self,
        transport: &Transport,
        tuples: Option<&[Tuple]>,
    ) -> Result<DeleteOutcome, ReferenceError> {
        self.delete_with_budget(transport, tuples, URL_LENGTH_BUDGET)
    }

    pub fn delete_with_budget(
        &self,
        transport: &Transport,
        tuples: Option<&[Tuple]>,
        budget: usize,
    ) -> Result<DeleteOutcome, ReferenceError> {
        let context = self.request_context("delete");

        let Some(tuples) = tuples else {
            // Whole-reference mode: everything the current filters select.
            let url = format!(
                "{}/entity/{}",
                self.location().catalog_base(),
                self.location().data_path()
            );
            info!(url = %url, "delete reference");
            transport.delete(&url, &context)?;
            return Ok(DeleteOutcome::default());
        };

        let key_columns = self
            .table()
            .shortest_key()
            .map(|k| k.unique_columns.clone())
            .ok_or_else(|| ReferenceError::invalid_input("table has no key to delete through"))?;

        let mut outcome = DeleteOutcome::default();
        let mut filters: Vec<(String, String)> = Vec::new();

        for tuple in tuples {
            let name = tuple_display_name(tuple, &key_columns);
            if !tuple.can_delete() {
                outcome.disabled.push(name);
                continue;
            }
            let conjuncts: Vec<String> = key_columns
                .iter()
                .map(|column| {
                    let value = tuple.get(column).cloned().unwrap_or(Value::Null);
                    match value {
                        Value::Null => format!("{}::null::", encode(column)),
                        Value::String(s) => format!("{}={}", encode(column), encode(&s)),
                        other => format!("{}={}", encode(column), encode(&other.to_string())),
                    }
                })
                .collect();
            let filter = if conjuncts.len() == 1 {
                conjuncts.into_iter().next().unwrap_or_default()
            } else {
                format!("({})", conjuncts.join("&"))
            };
            filters.push((filter, name));
        }

        let base = format!(
            "{}/entity/{}:{}/",
            self.location().catalog_base(),
            encode(&self.location().schema_name),
            encode(&self.location().table_name),
        );
        let groups = group_filters(filters, base.len(), budget)?;

        // Sequential on purpose: bounded load, and each filter's outcome is
        // attributed without canceling siblings.
        for group in groups {
            let path: Vec<&str> = group.iter().map(|(f, _)| f.as_str()).collect();
            let url = format!("{}{}", base, path.join(";"));
            match transport.delete(&url, &context) {
                Ok(()) => outcome.deleted += group.len(),
                Err(err) => {
                    let names: Vec<&str> = group.iter().map(|(_, n)| n.as_str()).collect();
                    warn!(error = %err, rows = group.len(), "delete group failed");
                    outcome
                        .failures
                        .push(format!("could not delete {}: {}", names.join(", "), err));
                }
            }
        }

        info!(
            deleted = outcome.deleted,
            failed = outcome.failures.len(),
            disabled = outcome.disabled.len(),
            "delete complete"
        );
        Ok(outcome)
    }

    /// Execute the active list's secondary requests for one page and merge
    /// the results into its tuples.
    ///
    /// All request URLs fire concurrently and merge only after every one
    /// resolves. First-outbound requests are form-prefill concerns with no
    /// page to merge into; they are skipped here.
    pub fn fetch_secondary(
        &self,
        transport: &Transport,
        page: &mut Page,
    ) -> Result<(), ReferenceError> {
        let key_columns = match self.table().shortest_key() {
            Some(key) => key.unique_columns.clone(),
            None => return Ok(()),
        };
        let key = match key_columns.first() {
            Some(first) if key_columns.len() == 1 => first.clone(),
            // Composite keys cannot be grouped into a flat disjunction.
            _ => return Ok(()),
        };

        let key_values: Vec<Value> = page
            .tuples()
            .iter()
            .filter_map(|t| t.get(&key).cloned())
            .collect();
        if key_values.is_empty() {
            return Ok(());
        }
        let disjunction: Vec<String> = key_values
            .iter()
            .map(|v| match v {
                Value::String(s) => format!("{}={}", encode(&key), encode(s)),
                other => format!("{}={}", encode(&key), encode(&other.to_string())),
            })
            .collect();

        let mut urls = Vec::new();
        let mut names = Vec::new();
        for request in &self.active_list().requests {
            if request.kind == RequestKind::FirstOutbound {
                debug!(column = %request.column_name, "skipping prefill request during page fetch");
                continue;
            }
            let mut joins = Vec::new();
            for (i, step) in request.source.steps.iter().enumerate() {
                let Some(join) = self.render_join(step) else {
                    continue;
                };
                if i == request.source.steps.len() - 1 {
                    joins.push(format!("A:={}", join));
                } else {
                    joins.push(join);
                }
            }
            if joins.is_empty() {
                continue;
            }
            let projection = match request.kind {
                RequestKind::Aggregate => {
                    let aggregate = request
                        .source
                        .aggregate
                        .map(|a| a.as_str())
                        .unwrap_or("array");
                    format!(
                        "{};v:={}(A:{})",
                        encode(&key),
                        aggregate,
                        encode(&request.source.column)
                    )
                }
                _ => format!("{};v:=array(A:*)", encode(&key)),
            };
            let url = format!(
                "{}/attributegroup/M:={}:{}/{}/{}/$M/{}",
                self.location().catalog_base(),
                encode(&self.location().schema_name),
                encode(&self.location().table_name),
                disjunction.join(";"),
                joins.join("/"),
                projection,
            );
            if url.len() > URL_LENGTH_BUDGET {
                return Err(ReferenceError::invalid_input(format!(
                    "aggregate request for {} overflows the URL budget",
                    request.column_name
                )));
            }
            urls.push(url);
            names.push(request.column_name.clone());
        }

        if urls.is_empty() {
            return Ok(());
        }

        let context = self.request_context("read/secondary");
        let results = transport.get_many(&urls, &context);

        for (name, result) in names.into_iter().zip(results) {
            let value = result?;
            let Value::Array(rows) = value else {
                return Err(ReferenceError::InvalidServerResponse {
                    message: format!("secondary request {} returned a non-array", name),
                });
            };
            let mut by_key: BTreeMap<String, Value> = BTreeMap::new();
            for row in rows {
                if let Value::Object(mut row) = row {
                    if let (Some(k), Some(v)) = (row.remove(&key), row.remove("v")) {
                        by_key.insert(k.to_string(), v);
                    }
                }
            }
            for tuple in page.tuples_mut() {
                let Some(tuple_key) = tuple.get(&key).cloned() else {
                    continue;
                };
                if let Some(value) = by_key.get(&tuple_key.to_string()) {
                    tuple.merge_linked(&name, value.clone());
                }
            }
        }
        Ok(())
    }
}

fn tuple_display_name(tuple: &Tuple, key_columns: &[String]) -> String {
    let parts: Vec<String> = key_columns
        .iter()
        .map(|column| match tuple.get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        })
        .collect();
    parts.join(":")
}

/// Group per-row filters into `;`-joined batches that keep each URL under
/// the budget.
///
/// # Errors
///
/// `ReferenceError::InvalidInput` when a single filter cannot fit.
fn group_filters(
    filters: Vec<(String, String)>,
    base_length: usize,
    budget: usize,
) -> Result<Vec<Vec<(String, String)>>, ReferenceError> {
    let mut groups: Vec<Vec<(String, String)>> = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();
    let mut current_length = base_length;

    for (filter, name) in filters {
        if base_length + filter.len() > budget {
            return Err(ReferenceError::invalid_input(format!(
                "delete filter for {} overflows the URL budget",
                name
            )));
        }
        let extra = filter.len() + usize::from(!current.is_empty());
        if current_length + extra > budget && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current_length = base_length;
        }
        current_length += filter.len() + usize::from(!current.is_empty());
        current.push((filter, name));
    }
    if !current.is_empty() {
        groups.push(current);
    }
    Ok(groups)
}

/// Loose equality for key correlation: numbers by numeric value, strings by
/// string value. A number never matches a string; that coercion edge is
/// pinned by tests, not widened.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().zip(y.as_f64()).map(|(x, y)| x == y).unwrap_or(false)
        }
        _ => a == b,
    }
}

/// Change detection for one column. Datetime columns compare calendar-aware:
/// `2024-01-01T05:00:00+01:00` equals `2024-01-01T04:00:00Z`.
fn value_changed(column: Option<&Column>, old: &Value, new: &Value) -> bool {
    if let Some(column) = column {
        if column.column_type.is_datetime() {
            if let (Value::String(old), Value::String(new)) = (old, new) {
                if let (Ok(old), Ok(new)) = (
                    DateTime::parse_from_rfc3339(old),
                    DateTime::parse_from_rfc3339(new),
                ) {
                    return old != new;
                }
            }
        }
    }
    !loose_eq(old, new)
}
