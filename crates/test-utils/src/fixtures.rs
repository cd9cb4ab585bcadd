//! Posts, users and tags to search over.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use resource_search::compile::{Comparison, Operand, Predicate, ScopeHandlers};
use resource_search::descriptor::Boolean;
use resource_search::directive::{AllowedFilter, AllowedScope, AllowedSort, Directive};
use resource_search::paginate::Page;
use resource_search::schema::{Column, EntityMeta, RelationDef, RelationKind};
use resource_search::resource::PreparedSearch;
use resource_search::{QueryTarget, ResourceSearch, Schema, SearchConfig, SearchError, SearchableResource};
use serde_json::{Value, json};

use crate::memory::{Dataset, MemoryQuery, field, loose_eq};

/// The post resource: title and publish date filters and sorts, full-text
/// search over titles, and a `published` scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostResource;

impl SearchableResource for PostResource {
    fn entity(&self) -> &str {
        "post"
    }

    fn searchable_by(&self) -> Vec<String> {
        vec!["title".to_string()]
    }

    fn allowed_scopes(&self) -> Vec<Directive> {
        vec![
            AllowedScope::name("published").into(),
            AllowedScope::name("published_before").into(),
        ]
    }

    fn allowed_sorts(&self) -> Vec<Directive> {
        vec![
            AllowedSort::field("title").into(),
            AllowedSort::field("publish_at").into(),
            AllowedSort::field("author").internal("user.name").into(),
        ]
    }

    fn allowed_filters(&self) -> Vec<Directive> {
        vec![
            AllowedFilter::string("title").into(),
            AllowedFilter::timestamp("publish_at").into(),
            AllowedFilter::string("author").internal("user.name").into(),
            AllowedFilter::string("tag").internal("tags.name").into(),
        ]
    }

    fn allowed_includes(&self) -> Vec<String> {
        vec!["user".to_string()]
    }

    fn allows_exact_totals(&self) -> bool {
        true
    }
}

/// Posts belong to a user and carry tags through `post_tag`.
pub fn post_schema() -> Schema {
    Schema::new()
        .with_entity(
            EntityMeta::new("post", "posts")
                .with_dates(["publish_at"])
                .with_relation(RelationDef::to_one("user", "user", "user_id", "id"))
                .with_relation(RelationDef::pivot_through(
                    "tags", "tag", "post_tag", "post_id", "tag_id",
                )),
        )
        .with_entity(EntityMeta::new("user", "users"))
        .with_entity(EntityMeta::new("tag", "tags"))
}

/// `published`: `publish_at` is in the past. `published_before(ts)`:
/// `publish_at` is before `ts`.
pub fn post_scopes() -> ScopeHandlers<MemoryQuery> {
    ScopeHandlers::new()
        .register("published", |query: &mut MemoryQuery, _: &[Value]| {
            let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
            let predicate = before(query.table(), json!(now));
            query.apply(predicate, Boolean::And);
            Ok(())
        })
        .register("published_before", |query: &mut MemoryQuery, arguments: &[Value]| {
            let Some(cutoff) = arguments.first().filter(|value| value.is_string()) else {
                return Err(SearchError::InvalidValue {
                    field: "published_before".to_string(),
                    reason: "a timestamp argument is required".to_string(),
                });
            };
            let predicate = before(query.table(), cutoff.clone());
            query.apply(predicate, Boolean::And);
            Ok(())
        })
}

fn before(table: &str, cutoff: Value) -> Predicate {
    Predicate::Compare {
        operand: Operand::Column(Column::new(table, "publish_at")),
        op: Comparison::Lt,
        value: cutoff,
    }
}

/// Seven posts by two users:
///
/// | id | title              | publish_at          | user |
/// |----|--------------------|---------------------|------|
/// | 1  | special title      | null                | 1    |
/// | 2  | special title      | null                | 2    |
/// | 3  | less special title | 2024-01-01 00:00:00 | 1    |
/// | 4  | less special title | 2024-01-01 12:00:00 | 2    |
/// | 5  | very special title | 2023-06-01 09:00:00 | 1    |
/// | 6  | very special title | 2023-06-02 09:00:00 | 2    |
/// | 7  | draft title        | 2099-01-01 00:00:00 | 1    |
///
/// Posts 3 and 5 are tagged `rust`; posts 4 and 5 are tagged `sql`.
pub fn posts_dataset() -> Dataset {
    let post = |id: i64, title: &str, publish_at: Option<&str>, user_id: i64| {
        json!({"id": id, "title": title, "publish_at": publish_at, "user_id": user_id})
    };

    Dataset::new()
        .with_table(
            "posts",
            vec![
                post(1, "special title", None, 1),
                post(2, "special title", None, 2),
                post(3, "less special title", Some("2024-01-01 00:00:00"), 1),
                post(4, "less special title", Some("2024-01-01 12:00:00"), 2),
                post(5, "very special title", Some("2023-06-01 09:00:00"), 1),
                post(6, "very special title", Some("2023-06-02 09:00:00"), 2),
                post(7, "draft title", Some("2099-01-01 00:00:00"), 1),
            ],
        )
        .with_table(
            "users",
            vec![json!({"id": 1, "name": "Ann"}), json!({"id": 2, "name": "Bob"})],
        )
        .with_table(
            "tags",
            vec![json!({"id": 1, "name": "rust"}), json!({"id": 2, "name": "sql"})],
        )
        .with_table(
            "post_tag",
            vec![
                json!({"post_id": 3, "tag_id": 1}),
                json!({"post_id": 5, "tag_id": 1}),
                json!({"post_id": 4, "tag_id": 2}),
                json!({"post_id": 5, "tag_id": 2}),
            ],
        )
}

/// Search over posts with `config`.
pub fn post_search(config: SearchConfig) -> Result<ResourceSearch, SearchError> {
    ResourceSearch::new(&PostResource, Arc::new(post_schema()), Arc::new(config))
}

/// A fresh query over the posts table with the post scopes registered.
pub fn posts_query(data: &Arc<Dataset>) -> MemoryQuery {
    MemoryQuery::new(Arc::clone(data), "posts").with_scopes(Arc::new(post_scopes()))
}

/// Validate, compile, run and paginate `payload` over `query`, loading the
/// direct relations the request asked for.
pub fn execute(
    search: &ResourceSearch,
    mut query: MemoryQuery,
    payload: &Value,
) -> Result<Page<Value>, SearchError> {
    let prepared = search.prepare(&mut query, payload)?;
    run(search, &query, &prepared)
}

/// [`execute`] for basic query-string input.
pub fn execute_basic(
    search: &ResourceSearch,
    mut query: MemoryQuery,
    input: &Value,
) -> Result<Page<Value>, SearchError> {
    let prepared = search.prepare_basic(&mut query, input)?;
    run(search, &query, &prepared)
}

fn run(
    search: &ResourceSearch,
    query: &MemoryQuery,
    prepared: &PreparedSearch<MemoryQuery>,
) -> Result<Page<Value>, SearchError> {
    let total = prepared.count_query.as_ref().map(MemoryQuery::count);

    let mut rows = query.rows();
    attach(search, query.dataset(), &prepared.relations, &mut rows)?;

    search.finish(prepared, rows, total)
}

fn attach(
    search: &ResourceSearch,
    data: &Dataset,
    relations: &BTreeSet<String>,
    rows: &mut [Value],
) -> Result<(), SearchError> {
    let entity = search.entity()?;
    for name in relations {
        let Some(relation) = entity.relation(name) else {
            continue;
        };
        let Some(joins) = search.schema().join_keys(entity, relation) else {
            continue;
        };
        let [join] = joins.as_slice() else {
            continue;
        };

        for row in rows.iter_mut() {
            let local = field(row, &join.local.name).clone();
            let related: Vec<Value> = data
                .rows(&join.table)
                .iter()
                .filter(|candidate| loose_eq(field(candidate, &join.foreign.name), &local))
                .cloned()
                .collect();
            let value = match relation.kind {
                RelationKind::ToOne => related.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Array(related),
            };
            if let Some(object) = row.as_object_mut() {
                object.insert(name.clone(), value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn post_schema_is_consistent() {
        assert!(post_schema().validated().is_ok());
    }

    #[test]
    fn published_scope_excludes_future_and_unpublished() {
        let data = Arc::new(posts_dataset());
        let mut query = posts_query(&data);
        query.apply_scope("published", &[]).unwrap();
        let ids: Vec<i64> = query.rows().iter().map(|row| row["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn published_before_needs_a_cutoff() {
        let data = Arc::new(posts_dataset());
        let mut query = posts_query(&data);
        let err = query.apply_scope("published_before", &[]).unwrap_err();
        assert!(matches!(err, SearchError::InvalidValue { .. }));
    }
}
