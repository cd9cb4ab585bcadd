//! End-to-end searches over the in-memory post fixtures.

// Tests are allowed to use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use resource_search::descriptor::{Boolean, FilterLeaf, FilterNode, SearchRequest};
use resource_search::directive::Operator;
use resource_search::paginate::Page;
use resource_search::{
    BasicSearchAdapter, SeaQuery, SearchConfig, SearchError, ValidationReport,
};
use resource_search_test_utils::assert::{has_key, ids, page_ids};
use resource_search_test_utils::{execute, execute_basic, post_search, posts_dataset, posts_query};
use serde_json::{Value, json};

fn run_with(config: SearchConfig, payload: Value) -> Result<Page<Value>, SearchError> {
    let data = Arc::new(posts_dataset());
    let search = post_search(config).unwrap();
    execute(&search, posts_query(&data), &payload)
}

fn run(payload: Value) -> Result<Page<Value>, SearchError> {
    run_with(SearchConfig::default(), payload)
}

fn basic(query: &str) -> Result<Page<Value>, SearchError> {
    let data = Arc::new(posts_dataset());
    let search = post_search(SearchConfig::default()).unwrap();
    let input = BasicSearchAdapter::new().parse_query_string(query);
    execute_basic(&search, posts_query(&data), &input)
}

fn rejected(result: Result<Page<Value>, SearchError>) -> ValidationReport {
    match result {
        Err(SearchError::Validation(report)) => report,
        Err(other) => panic!("expected a validation failure, got {other:?}"),
        Ok(page) => panic!("expected a validation failure, got rows {:?}", ids(&page)),
    }
}

fn published_with_dates() -> Value {
    json!({"field": "publish_at", "operator": "!=", "value": null})
}

#[test]
fn empty_search_returns_everything_in_key_order() {
    let page = run(json!({})).unwrap();
    page_ids(&page, &[1, 2, 3, 4, 5, 6, 7]);
    assert!(!page.meta.has_more);
    assert_eq!(page.meta.per_page, 30);
    assert!(page.meta.total.is_none());
}

#[test]
fn scopes_narrow_the_results() {
    let page = run(json!({"scopes": [{"name": "published"}]})).unwrap();
    page_ids(&page, &[3, 4, 5, 6]);
}

#[test]
fn scope_parameters_reach_the_handler() {
    let page = run(json!({
        "scopes": [{"name": "published_before", "parameters": ["2024-01-01 00:00:00"]}]
    }))
    .unwrap();
    page_ids(&page, &[5, 6]);
}

#[test]
fn unknown_scopes_are_rejected() {
    let report = rejected(run(json!({"scopes": [{"name": "drafts"}]})));
    assert!(report.contains("scopes.0.name"));
}

#[test]
fn filters_combine_with_scopes() {
    let page = run(json!({
        "scopes": [{"name": "published"}],
        "filters": [
            {"field": "title", "operator": "like", "value": "%special%"},
            {"field": "title", "operator": "like", "value": "%very%"}
        ]
    }))
    .unwrap();
    page_ids(&page, &[5, 6]);
}

#[test]
fn or_filters_and_groups() {
    let page = run(json!({
        "filters": [
            {"field": "title", "value": "draft title"},
            {"type": "or", "nested": [
                {"field": "title", "operator": "like", "value": "very%"},
                {"field": "publish_at", "operator": ">", "value": "2023-06-01 12:00:00"}
            ]}
        ]
    }))
    .unwrap();
    page_ids(&page, &[6, 7]);
}

#[test]
fn sorts_order_the_results() {
    let page = run(json!({
        "scopes": [{"name": "published"}],
        "filters": [{"field": "title", "operator": "like", "value": "%special%"}],
        "sort": [{"field": "publish_at"}]
    }))
    .unwrap();
    page_ids(&page, &[5, 6, 3, 4]);
    assert_eq!(page.data[0]["title"], "very special title");
}

#[test]
fn descending_sorts_put_nulls_first() {
    let page = run(json!({"sort": [{"field": "publish_at", "direction": "desc"}]})).unwrap();
    page_ids(&page, &[1, 2, 7, 4, 3, 6, 5]);
}

#[test]
fn full_text_search_is_case_insensitive_by_default() {
    let page = run(json!({
        "scopes": [{"name": "published"}],
        "filters": [{"field": "title", "operator": "like", "value": "%special%"}],
        "search": {"value": "VERY"},
        "sort": [{"field": "publish_at"}]
    }))
    .unwrap();
    page_ids(&page, &[5, 6]);

    let page = run(json!({"search": {"value": "VERY", "case_sensitive": true}})).unwrap();
    page_ids(&page, &[]);
}

#[test]
fn filters_through_relations() {
    let page = run(json!({"filters": [{"field": "author", "value": "Ann"}]})).unwrap();
    page_ids(&page, &[1, 3, 5, 7]);

    let page = run(json!({"filters": [{"field": "tag", "value": "rust"}]})).unwrap();
    page_ids(&page, &[3, 5]);

    let page = run(json!({
        "filters": [{"field": "tag", "operator": "in", "value": ["rust", "sql"]}]
    }))
    .unwrap();
    page_ids(&page, &[3, 4, 5]);

    let page = run(json!({
        "filters": [
            {"field": "tag", "value": "sql"},
            {"field": "author", "value": "Ann", "type": "or"}
        ]
    }))
    .unwrap();
    page_ids(&page, &[1, 3, 4, 5, 7]);
}

#[test]
fn sorting_through_a_relation_uses_page_numbers() {
    let page = run(json!({
        "sort": [{"field": "author", "direction": "desc"}],
        "page": {"number": 1}
    }))
    .unwrap();
    page_ids(&page, &[2, 4, 6, 1, 3, 5, 7]);
}

#[test]
fn cursor_pages_cannot_order_by_related_columns() {
    let err = run(json!({"sort": [{"field": "author"}]})).unwrap_err();
    assert!(matches!(err, SearchError::InvalidRelation { .. }));
}

#[test]
fn empty_values_match_missing_dates() {
    let page = run(json!({"filters": [{"field": "publish_at", "value": ""}]})).unwrap();
    page_ids(&page, &[1, 2]);

    let search = post_search(SearchConfig::default()).unwrap();
    let request = search
        .validate(&json!({"filters": [{"field": "publish_at", "value": ""}]}))
        .unwrap();
    let mut query = SeaQuery::new("posts");
    search.compile(&mut query, &request).unwrap();
    let sql = query.to_sql();
    assert!(sql.contains(r#""posts"."publish_at" IS NULL"#), "{sql}");
    assert!(!sql.contains("''"), "{sql}");
}

#[test]
fn ordering_operators_need_a_value() {
    let report = rejected(run(json!({"filters": [
        {"field": "publish_at", "operator": ">"},
        {"field": "nope"}
    ]})));
    assert!(report.contains("filters.0.value"));
    assert!(report.contains("filters.1.field"));

    let report = rejected(run(json!({"filters": [{"field": "publish_at", "operator": "<", "value": ""}]})));
    assert!(report.contains("filters.0.value"));
}

#[test]
fn null_in_a_set_matches_missing_dates() {
    let page = run(json!({
        "filters": [{"field": "publish_at", "operator": "in", "value": [null, "2024-01-01"]}]
    }))
    .unwrap();
    page_ids(&page, &[1, 2, 3, 4]);

    let page = run(json!({
        "filters": [{"field": "publish_at", "operator": "not in", "value": [null, "2024-01-01"]}]
    }))
    .unwrap();
    page_ids(&page, &[5, 6, 7]);
}

#[test]
fn midnight_dates_match_the_whole_day() {
    let page = run(json!({"filters": [{"field": "publish_at", "value": "2024-01-01"}]})).unwrap();
    page_ids(&page, &[3, 4]);

    let page = run(json!({
        "filters": [{"field": "publish_at", "operator": "<", "value": "2024-01-01 06:00:00"}]
    }))
    .unwrap();
    page_ids(&page, &[3, 5, 6]);
}

#[test]
fn in_and_not_in_partition_non_null_rows() {
    let sets = [
        json!(["special title"]),
        json!(["special title", "draft title"]),
        json!(["very special title", "less special title", "nothing"]),
        json!(["nothing"]),
    ];

    for set in sets {
        let inside = run(json!({"filters": [{"field": "title", "operator": "in", "value": set}]}))
            .unwrap();
        let outside = run(json!({
            "filters": [{"field": "title", "operator": "not in", "value": set}]
        }))
        .unwrap();

        let mut all = ids(&inside);
        all.extend(ids(&outside));
        all.sort_unstable();
        assert_eq!(all, vec![1, 2, 3, 4, 5, 6, 7], "partition of {set}");
    }
}

#[test]
fn basic_filters_in_query_strings() {
    page_ids(&basic("filter[title]=*").unwrap(), &[1, 2, 3, 4, 5, 6, 7]);
    page_ids(&basic("filter[title]=*very*").unwrap(), &[5, 6]);
    page_ids(&basic("filter[title]=less+special+title").unwrap(), &[3, 4]);
    page_ids(&basic("filter[title]=*very*,*less*").unwrap(), &[3, 4, 5, 6]);
    page_ids(&basic("filter[publish_at]=").unwrap(), &[1, 2]);
    page_ids(&basic("filter[publish_at]=*").unwrap(), &[3, 4, 5, 6, 7]);
    page_ids(
        &basic("filter[publish_at]=*&filter[title]=*very*").unwrap(),
        &[5, 6],
    );

    assert!(rejected(basic("filter[foobar]=")).contains("filters.0.field"));
    assert!(rejected(basic("filter[publish_at]=123")).contains("filters.0.value"));
}

#[test]
fn basic_sorts_and_search() {
    let page = basic("sort=-publish_at,title&filter[publish_at]=*").unwrap();
    page_ids(&page, &[7, 4, 3, 6, 5]);

    let page = basic("q=very").unwrap();
    page_ids(&page, &[5, 6]);
    assert_eq!(page.data[0]["title"], "very special title");
}

#[test]
fn page_sizes() {
    assert_eq!(run(json!({"page": {"size": 1}})).unwrap().data.len(), 1);
    assert_eq!(run(json!({"page": {"size": 10}})).unwrap().data.len(), 7);
    assert_eq!(basic("page[size]=2").unwrap().data.len(), 2);

    let config = SearchConfig {
        pagination: resource_search::config::PaginationConfig {
            max_size: 10,
            default_size: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let page = run_with(config.clone(), json!({})).unwrap();
    assert_eq!(page.data.len(), 5);
    assert!(page.meta.has_more);

    let report = rejected(run_with(config, json!({"page": {"size": 11}})));
    assert!(report.contains("page.size"));
}

#[test]
fn offset_pages_cover_every_row_once() {
    let page_of = |number: u64| {
        run(json!({
            "filters": [published_with_dates()],
            "page": {"size": 2, "number": number}
        }))
        .unwrap()
    };

    let first = page_of(1);
    page_ids(&first, &[3, 4]);
    assert_eq!(first.meta.current_page, Some(1));
    assert_eq!(
        first.links.next.as_deref(),
        Some(
            "?page%5Bnumber%5D=2&page%5Bsize%5D=2\
             &filters%5B0%5D%5Bfield%5D=publish_at&filters%5B0%5D%5Boperator%5D=%21%3D"
        )
    );
    assert!(first.links.prev.is_none());

    page_ids(&page_of(2), &[5, 6]);

    let last = page_of(3);
    page_ids(&last, &[7]);
    assert!(!last.meta.has_more);
    assert!(last.links.next.is_none());

    page_ids(&page_of(4), &[]);
}

#[test]
fn page_links_keep_basic_filters() {
    let first = basic("filter[title]=*special*&sort=-title&page[size]=2&page[number]=1").unwrap();
    page_ids(&first, &[5, 6]);
    let next = first.links.next.clone().unwrap();
    assert_eq!(
        next,
        "?page%5Bnumber%5D=2&page%5Bsize%5D=2&filter%5Btitle%5D=%2Aspecial%2A&sort=-title"
    );

    let second = basic(&next).unwrap();
    page_ids(&second, &[1, 2]);
    let third = basic(&second.links.next.clone().unwrap()).unwrap();
    page_ids(&third, &[3, 4]);
    assert!(!third.meta.has_more);
    assert_eq!(
        third.links.prev.as_deref(),
        Some("?page%5Bnumber%5D=2&page%5Bsize%5D=2&filter%5Btitle%5D=%2Aspecial%2A&sort=-title")
    );

    let cursor = basic("filter[title]=*very*&page[size]=1").unwrap();
    assert!(cursor.links.next.unwrap().ends_with("&filter%5Btitle%5D=%2Avery%2A"));
}

#[test]
fn cursor_chain_matches_offset_pages() {
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    loop {
        let mut page = json!({"size": 2});
        if let Some(cursor) = &cursor {
            page["cursor"] = json!(cursor);
        }
        let result = run(json!({"filters": [published_with_dates()], "page": page})).unwrap();
        assert!(result.meta.current_page.is_none());
        seen.push(ids(&result));
        pages += 1;

        match result.meta.next_cursor {
            Some(next) => {
                assert!(result.meta.has_more);
                assert!(result.links.next.is_some());
                cursor = Some(next);
            }
            None => break,
        }
        assert!(pages < 10, "cursor chain did not terminate");
    }

    assert_eq!(seen, vec![vec![3, 4], vec![5, 6], vec![7]]);
}

#[test]
fn descending_cursor_chain() {
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..3 {
        let mut page = json!({"size": 2});
        if let Some(cursor) = &cursor {
            page["cursor"] = json!(cursor);
        }
        let result = run(json!({
            "scopes": [{"name": "published"}],
            "sort": [{"field": "publish_at", "direction": "desc"}],
            "page": page
        }))
        .unwrap();
        seen.extend(ids(&result));
        cursor = result.meta.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    assert_eq!(seen, vec![4, 3, 6, 5]);
    assert!(cursor.is_none());
}

/// Follow `next_cursor` from the first page until the chain ends.
fn cursor_chain(payload: Value, size: u64) -> Vec<Vec<i64>> {
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..10 {
        let mut request = payload.clone();
        request["page"] = json!({"size": size});
        if let Some(cursor) = &cursor {
            request["page"]["cursor"] = json!(cursor);
        }
        let result = run(request).unwrap();
        seen.push(ids(&result));
        cursor = result.meta.next_cursor;
        if cursor.is_none() {
            return seen;
        }
    }
    panic!("cursor chain did not terminate: {seen:?}");
}

#[test]
fn cursor_chain_keeps_null_sort_values() {
    let ascending = cursor_chain(json!({"sort": [{"field": "publish_at"}]}), 2);
    assert_eq!(ascending, vec![vec![5, 6], vec![3, 4], vec![7, 1], vec![2]]);

    let descending = cursor_chain(
        json!({"sort": [{"field": "publish_at", "direction": "desc"}]}),
        2,
    );
    assert_eq!(descending, vec![vec![1, 2], vec![7, 4], vec![3, 6], vec![5]]);

    // A page boundary between the two null rows.
    let single = cursor_chain(json!({"sort": [{"field": "publish_at"}]}), 1);
    assert_eq!(single.concat(), vec![5, 6, 3, 4, 7, 1, 2]);
}

#[test]
fn invalid_cursors_are_rejected() {
    let err = run(json!({"page": {"size": 2, "cursor": "not a cursor"}})).unwrap_err();
    assert!(matches!(err, SearchError::InvalidCursor));
}

#[test]
fn exact_totals_on_request() {
    let page = run(json!({
        "filters": [published_with_dates()],
        "page": {"size": 2, "include_total_count": true}
    }))
    .unwrap();
    page_ids(&page, &[3, 4]);
    assert_eq!(page.meta.total, Some(5));

    let page = run(json!({
        "filters": [published_with_dates()],
        "page": {"size": 2, "number": 2, "include_total_count": true}
    }))
    .unwrap();
    page_ids(&page, &[5, 6]);
    assert_eq!(page.meta.total, Some(5));

    let page = run(json!({"filters": [published_with_dates()], "page": {"size": 2}})).unwrap();
    assert!(page.meta.total.is_none());
    let envelope = serde_json::to_value(&page).unwrap();
    assert!(envelope["meta"].get("total").is_none());
}

#[test]
fn includes_load_only_whitelisted_relations() {
    let page = run(json!({"include": "user,tags", "page": {"size": 1}})).unwrap();
    let row = &page.data[0];
    has_key(row, "user");
    assert_eq!(row["user"]["name"], "Ann");
    assert!(row.get("tags").is_none());

    let page = run(json!({"page": {"size": 1}})).unwrap();
    assert!(page.data[0].get("user").is_none());
}

#[test]
fn depth_limit_counts_group_levels() {
    fn nested(depth: usize) -> Value {
        let mut node = json!({"field": "title", "operator": "like", "value": "%title%"});
        for _ in 0..depth {
            node = json!({"nested": [node]});
        }
        json!({"filters": [node]})
    }
    let config = SearchConfig {
        max_nested_depth: 2,
        ..Default::default()
    };

    let page = run_with(config.clone(), nested(2)).unwrap();
    assert_eq!(page.data.len(), 7);

    let err = run_with(config, nested(3)).unwrap_err();
    assert!(matches!(err, SearchError::MaxDepthExceeded { max: 2 }));
}

#[test]
fn compiler_enforces_operator_allow_list_without_validation() {
    let data = Arc::new(posts_dataset());
    let search = post_search(SearchConfig::default()).unwrap();

    let request = SearchRequest::new().filter(FilterLeaf::new("publish_at", Operator::Like, "2024%"));
    let err = search
        .prepare_request(&mut posts_query(&data), request)
        .unwrap_err();
    assert!(matches!(err, SearchError::OperatorNotAllowed { .. }));

    let request = SearchRequest::new().filter(FilterNode::group(
        Boolean::Or,
        vec![FilterNode::leaf("secret", Operator::Eq, "x")],
    ));
    let err = search
        .prepare_request(&mut posts_query(&data), request)
        .unwrap_err();
    assert!(matches!(err, SearchError::UnknownField(field) if field == "secret"));
}

#[test]
fn compilation_is_deterministic() {
    let search = post_search(SearchConfig::default()).unwrap();
    let request = search
        .validate(&json!({
            "filters": [
                {"field": "title", "operator": "ilike", "value": "%Very%"},
                {"type": "or", "nested": [
                    {"field": "tag", "operator": "in", "value": ["rust", "sql"]},
                    {"field": "publish_at", "operator": "in", "value": [null, "2024-01-01"]}
                ]}
            ],
            "search": {"value": "special"},
            "sort": [{"field": "author", "direction": "desc"}, {"field": "title"}]
        }))
        .unwrap();

    let compile = || {
        let mut query = SeaQuery::new("posts");
        search.compile(&mut query, &request).unwrap();
        query.to_sql()
    };

    let sql = compile();
    assert_eq!(sql, compile());
    assert!(sql.contains("EXISTS"));
    assert!(sql.contains(r#"LEFT JOIN "users""#));
}
