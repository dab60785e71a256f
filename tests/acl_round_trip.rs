//! End-to-end flow against the scripted client: plan and execute an
//! upsert, page through the written entities with cursors, and map the
//! bindings, all against scripted responses.

use std::sync::Arc;

use sf_rdf_acl::client::stub::ScriptedClient;
use sf_rdf_acl::pagination::{self, CursorPage};
use sf_rdf_acl::{
    BindingCell, ClearCondition, GraphNaming, GraphRef, MergeStrategy, NamedGraphManager,
    QueryDsl, QueryType, RdfClient, ResultMapper, SparqlQueryBuilder, TransactionManager, Triple,
    UpsertKey, UpsertRequest,
};

const GRAPH: &str = "urn:sf:graph:demo:v1:dev";

fn upsert_request(triples: Vec<Triple>) -> UpsertRequest {
    UpsertRequest {
        graph: GraphRef::named(GRAPH),
        triples,
        upsert_key: UpsertKey::SubjectPredicate,
        custom_key_fields: None,
        merge_strategy: MergeStrategy::Replace,
        provenance: None,
    }
}

#[tokio::test]
async fn upsert_then_paginate_then_map() {
    let client = Arc::new(ScriptedClient::new());

    // -- write: 24 entities, replace on (s, p) -------------------------
    let triples: Vec<Triple> = (0..24)
        .map(|i| {
            Triple::new(
                format!("http://example.org/e{i:03}"),
                "rdfs:label",
                format!("entity {i}"),
            )
        })
        .collect();
    let manager = TransactionManager::new(client.clone(), GraphNaming::default());
    let outcome = manager
        .upsert(&upsert_request(triples), "trace-e2e", Some("tester"))
        .await
        .expect("upsert should succeed");

    assert_eq!(outcome.applied, 24);
    assert_eq!(outcome.statements, 24); // one replace group per subject+predicate
    assert!(outcome.conflicts.is_empty());

    let updates = client.update_texts();
    // Snapshot COPY plus one statement per group.
    assert_eq!(updates.len(), 25);
    assert!(updates[0].starts_with("COPY SILENT GRAPH"));
    assert!(updates.iter().skip(1).all(|u| u.contains("DELETE {")));

    // A second identical request must hash identically.
    let triples: Vec<Triple> = (0..24)
        .map(|i| {
            Triple::new(
                format!("http://example.org/e{i:03}"),
                "rdfs:label",
                format!("entity {i}"),
            )
        })
        .collect();
    let replay = manager
        .upsert(&upsert_request(triples), "trace-e2e-2", None)
        .await
        .expect("replay should succeed");
    assert_eq!(replay.request_hash, outcome.request_hash);

    // -- read: cursor pagination over the 24 subjects ------------------
    let subjects: Vec<String> = (0..24).map(|i| format!("http://example.org/e{i:03}")).collect();
    let page_size = 2usize;

    // Script the store's answers: each page returns up to size+1 rows in
    // lexical subject order, starting after the cursor value.
    {
        let mut after = String::new();
        loop {
            let window: Vec<_> = subjects
                .iter()
                .filter(|s| s.as_str() > after.as_str())
                .take(page_size + 1)
                .collect();
            if window.is_empty() {
                break;
            }
            client.push_select_column(
                "s",
                window.iter().map(|s| BindingCell::uri(s.as_str())).collect(),
            );
            if window.len() <= page_size {
                break;
            }
            after = window[page_size - 1].clone();
        }
    }

    let builder = SparqlQueryBuilder::new();
    let dsl = QueryDsl::new(QueryType::Raw);
    let mut cursor: Option<String> = None;
    let mut collected = Vec::new();
    let mut pages = 0usize;

    loop {
        let page = CursorPage {
            cursor: cursor.clone(),
            size: page_size,
        };
        let query = builder
            .build_select_with_cursor(&dsl, &page, None, Some(GRAPH))
            .expect("cursor query builds");
        assert!(query.contains(&format!("LIMIT {}", page_size + 1)));

        let response = client
            .select(&query, None, Some("trace-e2e"))
            .await
            .expect("select succeeds");
        let result =
            pagination::page_from_bindings(response.bindings, page_size, "?s").expect("page parses");
        collected.extend(result.results.iter().map(|row| row["s"].value.clone()));
        pages += 1;
        assert!(pages <= 24, "pagination failed to terminate");
        if !result.has_more {
            break;
        }
        cursor = result.next_cursor;
    }

    assert_eq!(pages, 12);
    assert_eq!(collected.len(), 24);
    let mut unique = collected.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 24, "no subject may appear twice");

    // -- map: normalise one page of bindings ---------------------------
    let mapper = ResultMapper::new();
    let vars = vec!["s".to_string()];
    let row = {
        let mut row = sf_rdf_acl::BindingRow::new();
        row.insert("s".to_string(), BindingCell::uri(&collected[0]));
        row
    };
    let mapped = mapper.map_bindings(&vars, &[row]);
    let cell = mapped[0]["s"].as_ref().expect("bound variable");
    assert_eq!(cell.cell_type, "uri");
    assert_eq!(cell.raw, collected[0]);
}

#[tokio::test]
async fn dry_run_clear_touches_nothing() {
    let client = Arc::new(ScriptedClient::new());
    client.push_select_column(
        "count",
        vec![BindingCell::typed_literal(
            "3",
            "http://www.w3.org/2001/XMLSchema#integer",
        )],
    );
    client.push_select_column("s", vec![BindingCell::uri("http://example.org/e000")]);

    let manager = NamedGraphManager::new(client.clone(), GraphNaming::default());
    let result = manager
        .conditional_clear(
            &GraphRef::named(GRAPH),
            &ClearCondition::default(),
            true,
            10,
            "trace-dry",
        )
        .await
        .expect("dry run succeeds");

    match result {
        sf_rdf_acl::ClearResult::DryRun(dry) => {
            assert_eq!(dry.estimated_deletes, 3);
            assert_eq!(dry.sample_triples.len(), 1);
        }
        other => panic!("expected dry-run, got {other:?}"),
    }
    assert!(client.update_texts().is_empty());
}
