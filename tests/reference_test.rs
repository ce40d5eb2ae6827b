//! Integration tests for reference construction, transforms, the active
//! list, and permissions. No network involved: everything here is computed
//! from the catalog model.

use std::sync::Arc;

use catref::{
    Catalog, Context, FacetFilter, Location, Reference, ReferenceError, RequestKind, SortKey,
};
use serde_json::json;

/// A catalog with a dataset table, an outbound owner fk, one inbound
/// experiment fk, and source definitions for aggregates.
fn fixture_catalog() -> Arc<Catalog> {
    let doc = json!({
        "features": {"trs": true, "tcrs": true},
        "schemas": {
            "s": {
                "tables": {
                    "dataset": {
                        "table_name": "dataset",
                        "column_definitions": [
                            {"name": "RID", "type": {"typename": "text"}, "nullok": false},
                            {"name": "id", "type": {"typename": "int4"}, "nullok": false},
                            {"name": "title", "type": {"typename": "text"}},
                            {"name": "owner_id", "type": {"typename": "int4"}}
                        ],
                        "keys": [
                            {"names": [["s", "dataset_RID_key"]], "unique_columns": ["RID"]},
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
                            },
                            "citation": {
                                "journal_pattern": "{{title}}",
                                "wait_for": ["experiment-count"]
                            },
                            "visible-columns": {
                                "detailed": [
                                    {"source": "title", "wait_for": ["experiment-count"]},
                                    {"sourcekey": "experiment-count", "markdown_name": "experiments"},
                                    ["s", "dataset_id_key"],
                                    ["s", "dataset_owner_fk"]
                                ]
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
    Arc::new(Catalog::from_schema_document("https://example.org/api", "7", &doc).unwrap())
}

fn fixture_reference() -> Reference {
    Reference::new(
        Location::new("https://example.org/api", "7", "s", "dataset"),
        fixture_catalog(),
    )
    .unwrap()
}

// === Caching ===

mod caching {
    use super::*;

    #[test]
    fn getters_are_computed_once() {
        let reference = fixture_reference().contextualize(Context::Detailed);

        let columns_a = reference.columns().as_ptr();
        let columns_b = reference.columns().as_ptr();
        assert_eq!(columns_a, columns_b);

        let related_a = reference.related().as_ptr();
        let related_b = reference.related().as_ptr();
        assert_eq!(related_a, related_b);

        let list_a = reference.active_list() as *const _;
        let list_b = reference.active_list() as *const _;
        assert_eq!(list_a, list_b);

        let path_a = reference.read_path().as_ptr();
        let path_b = reference.read_path().as_ptr();
        assert_eq!(path_a, path_b);
    }

    #[test]
    fn permissions_are_stable() {
        let reference = fixture_reference();
        assert_eq!(reference.can_create(), reference.can_create());
        assert_eq!(reference.can_update(), reference.can_update());
        assert_eq!(reference.can_delete(), reference.can_delete());
    }
}

// === Transforms ===

mod transforms {
    use super::*;

    #[test]
    fn every_transform_returns_a_new_reference() {
        let reference = fixture_reference().contextualize(Context::Detailed);
        let uri_before = reference.uri();
        let columns_before = reference.columns().len();

        let _ = reference.sort(vec![SortKey::asc("id")]).unwrap();
        let _ = reference.search(Some("term")).unwrap();
        let _ = reference.add_facets(vec![FacetFilter {
            source: "title".to_string(),
            choices: vec![json!("x")],
            hidden: false,
        }]);
        let _ = reference.hide_facets(&["title"]);
        let _ = reference.remove_all_facet_filters();
        let _ = reference.copy(Some("other".to_string()), None, None);
        let _ = reference.contextualize(Context::Compact);

        assert_eq!(reference.uri(), uri_before);
        assert_eq!(reference.columns().len(), columns_before);
    }

    #[test]
    fn sort_unknown_column_is_not_found() {
        let reference = fixture_reference();
        let err = reference.sort(vec![SortKey::asc("ghost")]).unwrap_err();
        match err {
            ReferenceError::ColumnNotFound { table, name } => {
                assert_eq!(table, "s:dataset");
                assert_eq!(name, "ghost");
            }
            other => panic!("expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn facet_state_round_trips_through_transforms() {
        let reference = fixture_reference();
        let faceted = reference.add_facets(vec![FacetFilter {
            source: "title".to_string(),
            choices: vec![json!("a"), json!("b")],
            hidden: false,
        }]);
        assert!(faceted.uri().contains("(title=a;title=b)"));

        let hidden = faceted.hide_facets(&["title"]);
        let facet_columns = hidden.facet_columns().unwrap();
        let title = facet_columns.iter().find(|f| f.source == "title").unwrap();
        assert!(title.hidden);
        // Hidden facets keep filtering.
        assert!(hidden.uri().contains("(title=a;title=b)"));

        let cleared = hidden.remove_all_facet_filters();
        assert!(!cleared.uri().contains("title=a"));
    }
}

// === Active list ===

mod active_list {
    use super::*;

    #[test]
    fn totality_and_dedup() {
        let reference = fixture_reference().contextualize(Context::Detailed);
        let list = reference.active_list();

        // One aggregate bucket, consumed by the citation wait-for, the
        // title wait-for, and the pseudo-column itself: three sites, one
        // request.
        let aggregate = list.request("experiment-count").unwrap();
        assert_eq!(aggregate.kind, RequestKind::Aggregate);
        assert_eq!(aggregate.consumers.len(), 3);
        assert_eq!(list.requests.len(), 1);
        assert_eq!(list.consumer_count(), 3);

        // The key pseudo-column is a self link; the owner fk is an
        // all-outbound join.
        assert_eq!(list.self_links, vec!["s:dataset_id_key"]);
        assert!(list
            .all_outbounds
            .iter()
            .any(|o| o.name.contains("dataset_owner_fk")));
    }

    #[test]
    fn citation_consumer_dropped_outside_detailed() {
        let reference = fixture_reference().contextualize(Context::Compact);
        let list = reference.active_list();
        assert!(list
            .request("experiment-count")
            .map(|r| r
                .consumers
                .iter()
                .all(|c| c.kind != catref::ConsumerKind::Citation))
            .unwrap_or(true));
    }

    #[test]
    fn read_path_carries_joins_and_rights_summary() {
        let reference = fixture_reference().contextualize(Context::Detailed);
        let path = reference.read_path();
        assert!(path.starts_with("attributegroup/M:=s:dataset"));
        assert!(path.contains("left(owner_id)=(s:person:id)"));
        // trs/tcrs are requested: the catalog advertises them, rights are
        // undecided, and the table has an identity column.
        assert!(path.contains("trs:=trs(RID)"));
        assert!(path.contains("tcrs:=tcrs(RID)"));
    }
}

// === Permissions ===

mod permissions {
    use super::*;

    #[test]
    fn fixture_allows_everything_optimistically() {
        let reference = fixture_reference();
        assert!(reference.can_create().allowed);
        assert!(reference.can_update().allowed);
        assert!(reference.can_delete().allowed);
        assert!(reference.can_use_trs());
        assert!(reference.can_use_tcrs());
    }

    #[test]
    fn non_deletable_annotation_denies_delete() {
        let doc = json!({
            "schemas": {"s": {"tables": {"t": {
                "table_name": "t",
                "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                "keys": [{"unique_columns": ["id"]}],
                "annotations": {"non-deletable": null}
            }}}}
        });
        let catalog =
            Arc::new(Catalog::from_schema_document("https://example.org/api", "7", &doc).unwrap());
        let reference = Reference::new(
            Location::new("https://example.org/api", "7", "s", "t"),
            catalog,
        )
        .unwrap();
        let permission = reference.can_delete();
        assert!(!permission.allowed);
        assert_eq!(permission.reason, Some("table non-deletable"));
    }
}

// === Related references ===

mod related {
    use super::*;

    #[test]
    fn related_list_present_in_detailed() {
        let reference = fixture_reference().contextualize(Context::Detailed);
        let related = reference.related();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].reference.table().name, "experiment");
        assert_eq!(
            related[0].compressed_path,
            "s:dataset/(id)=(s:experiment:dataset_id)"
        );
    }

    #[test]
    fn inline_relationship_not_repeated_as_related() {
        // Add the inbound fk to the detailed visible columns; the related
        // list must then skip it.
        let doc = json!({
            "schemas": {
                "s": {
                    "tables": {
                        "dataset": {
                            "table_name": "dataset",
                            "column_definitions": [
                                {"name": "id", "type": {"typename": "int4"}}
                            ],
                            "keys": [{"unique_columns": ["id"]}],
                            "annotations": {
                                "visible-columns": {
                                    "detailed": [
                                        "id",
                                        ["s", "experiment_dataset_fk"]
                                    ]
                                }
                            }
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
        let catalog =
            Arc::new(Catalog::from_schema_document("https://example.org/api", "7", &doc).unwrap());
        let reference = Reference::new(
            Location::new("https://example.org/api", "7", "s", "dataset"),
            catalog,
        )
        .unwrap()
        .contextualize(Context::Detailed);

        assert!(reference
            .columns()
            .iter()
            .any(|c| c.name() == "s:experiment_dataset_fk"));
        assert!(reference.related().is_empty());
    }
}

// === Citation and export ===

mod citation {
    use super::*;

    #[test]
    fn citation_comes_from_annotation() {
        let reference = fixture_reference();
        let citation = reference.citation().unwrap();
        assert_eq!(citation.journal.as_deref(), Some("{{title}}"));
        assert_eq!(citation.wait_for, vec!["experiment-count"]);
    }

    #[test]
    fn absent_annotation_means_no_citation() {
        let doc = json!({
            "schemas": {"s": {"tables": {"t": {
                "table_name": "t",
                "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                "keys": [{"unique_columns": ["id"]}]
            }}}}
        });
        let catalog =
            Arc::new(Catalog::from_schema_document("https://example.org/api", "7", &doc).unwrap());
        let reference = Reference::new(
            Location::new("https://example.org/api", "7", "s", "t"),
            catalog,
        )
        .unwrap();
        assert!(reference.citation().is_none());
    }

    #[test]
    fn default_export_template_lists_reference_and_related() {
        let reference = fixture_reference().contextualize(Context::Detailed);
        let template = reference.export_template();
        let outputs = template["templates"][0]["outputs"].as_array().unwrap();
        // One for the dataset itself, one for the related experiment.
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0]["destination"]["name"], "dataset");
        assert_eq!(outputs[1]["destination"]["name"], "experiment");
    }
}
