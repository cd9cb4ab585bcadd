//! PostgreSQL execution of compiled searches.
//!
//! Resources are registered once with their scope implementations. Each
//! search runs its count, page and include queries inside one transaction
//! with a statement timeout.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use sea_query::{Alias, Asterisk, Expr, PostgresQueryBuilder, Query};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, warn};

use crate::compile::sea::sql_value;
use crate::compile::{ScopeHandlers, SeaQuery};
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::paginate::Page;
use crate::relation::PIVOT;
use crate::resource::{ResourceSearch, SearchableResource};
use crate::schema::{EntityMeta, JoinKeys, RelationDef, RelationKind, Schema};

/// Nested include levels loaded per request.
const MAX_INCLUDE_DEPTH: u8 = 5;

/// Key under which pivot-through children carry their parent reference.
const PARENT_REFERENCE: &str = "__parent_reference";

struct RegisteredResource {
    search: ResourceSearch,
    scopes: Arc<ScopeHandlers<SeaQuery>>,
}

/// Runs searches for registered resources against PostgreSQL.
pub struct PgSearchService {
    pool: PgPool,
    schema: Arc<Schema>,
    config: Arc<SearchConfig>,
    resources: DashMap<String, Arc<RegisteredResource>>,
}

impl PgSearchService {
    pub fn new(pool: PgPool, schema: Arc<Schema>, config: Arc<SearchConfig>) -> Self {
        Self {
            pool,
            schema,
            config,
            resources: DashMap::new(),
        }
    }

    /// Register a resource under `name`, replacing any previous registration.
    ///
    /// Every whitelisted scope must have a handler.
    pub fn register(
        &self,
        name: impl Into<String>,
        resource: &dyn SearchableResource,
        scopes: ScopeHandlers<SeaQuery>,
    ) -> Result<(), SearchError> {
        let search =
            ResourceSearch::new(resource, Arc::clone(&self.schema), Arc::clone(&self.config))?;

        if let Some(missing) = search
            .registries()
            .scopes
            .iter()
            .find(|scope| !scopes.contains(scope.internal_name()))
        {
            return Err(SearchError::InvalidDirective(format!(
                "scope '{}' has no registered handler for '{}'",
                missing.external_name(),
                missing.internal_name()
            )));
        }

        let name = name.into();
        debug!(resource = %name, entity = %resource.entity(), "registered searchable resource");
        self.resources.insert(
            name,
            Arc::new(RegisteredResource {
                search,
                scopes: Arc::new(scopes),
            }),
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    fn resource(&self, name: &str) -> Result<Arc<RegisteredResource>, SearchError> {
        self.resources
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SearchError::InvalidModel(format!("no searchable resource named '{name}'")))
    }

    /// Search with a structured payload.
    pub async fn search(&self, name: &str, payload: &Value) -> Result<Page<Value>, SearchError> {
        self.run(name, payload, Input::Advanced).await
    }

    /// Search with basic query-string input (`filter[..]`, `sort`, `q`).
    pub async fn basic_search(&self, name: &str, input: &Value) -> Result<Page<Value>, SearchError> {
        self.run(name, input, Input::Basic).await
    }

    async fn run(&self, name: &str, input: &Value, kind: Input) -> Result<Page<Value>, SearchError> {
        let resource = self.resource(name)?;
        let search = &resource.search;
        let entity = search.entity()?;

        let mut query = SeaQuery::new(entity.table.clone()).with_scopes(Arc::clone(&resource.scopes));
        let prepared = match kind {
            Input::Advanced => search.prepare(&mut query, input),
            Input::Basic => search.prepare_basic(&mut query, input),
        };
        let prepared = prepared.inspect_err(|err| {
            if err.is_client_error() {
                warn!(resource = %name, error = %err, "search request rejected");
            }
        })?;

        let mut tx = self.pool.begin().await.inspect_err(|err| {
            error!(error = %err, "failed to begin search transaction");
        })?;

        sqlx::query(&statement_timeout(&self.config))
            .execute(&mut *tx)
            .await
            .inspect_err(|err| error!(error = %err, "failed to set statement timeout"))?;

        let total = match &prepared.count_query {
            Some(count_query) => {
                let count_sql = count_query.to_count_sql();
                let total: i64 = sqlx::query_scalar(&count_sql)
                    .fetch_one(&mut *tx)
                    .await
                    .inspect_err(|err| error!(error = %err, "failed to execute count query"))?;
                Some(total.unsigned_abs())
            }
            None => None,
        };

        let main_sql = query.to_sql();
        let mut rows: Vec<Value> =
            sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({main_sql}) t"))
                .fetch_all(&mut *tx)
                .await
                .inspect_err(|err| error!(error = %err, "failed to execute search query"))?;

        if !prepared.relations.is_empty() {
            let tree = include_tree(&prepared.relations);
            load_relations(&mut *tx, search.schema(), entity, &mut rows, &tree, 0).await?;
        }

        tx.commit()
            .await
            .inspect_err(|err| error!(error = %err, "failed to commit search transaction"))?;

        debug!(resource = %name, rows = rows.len(), total = ?total, "search executed");
        search.finish(&prepared, rows, total)
    }
}

#[derive(Debug, Clone, Copy)]
enum Input {
    Advanced,
    Basic,
}

fn statement_timeout(config: &SearchConfig) -> String {
    format!("SET LOCAL statement_timeout = {}", config.statement_timeout_ms)
}

/// Requested include paths keyed by their first relation.
type IncludeTree = BTreeMap<String, BTreeSet<String>>;

fn include_tree(paths: &BTreeSet<String>) -> IncludeTree {
    let mut tree = IncludeTree::new();
    for path in paths {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path.as_str(), None),
        };
        let children = tree.entry(head.to_string()).or_default();
        if let Some(rest) = rest.filter(|rest| !rest.is_empty()) {
            children.insert(rest.to_string());
        }
    }
    tree
}

/// Batch-load requested relations into `rows`, one query per relation.
fn load_relations<'a>(
    conn: &'a mut PgConnection,
    schema: &'a Schema,
    entity: &'a EntityMeta,
    rows: &'a mut [Value],
    tree: &'a IncludeTree,
    depth: u8,
) -> Pin<Box<dyn Future<Output = Result<(), SearchError>> + Send + 'a>> {
    Box::pin(async move {
        if depth >= MAX_INCLUDE_DEPTH {
            warn!(depth, "include depth limit reached, skipping nested includes");
            return Ok(());
        }

        for (name, nested) in tree {
            let Some(relation) = entity.relation(name) else {
                debug!(relation = %name, entity = %entity.name, "skipping unknown include");
                continue;
            };
            let (Some(related), Some(joins)) =
                (schema.related(relation), schema.join_keys(entity, relation))
            else {
                debug!(relation = %name, "skipping polymorphic include");
                continue;
            };

            let local = match joins.first() {
                Some(first) => first.local.name.clone(),
                None => continue,
            };
            let keys = distinct_values(rows, &local);
            if keys.is_empty() {
                attach(rows, relation, &local, Vec::new());
                continue;
            }

            let sql = relation_sql(&joins, keys);
            let mut children: Vec<Value> =
                sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
                    .fetch_all(&mut *conn)
                    .await
                    .inspect_err(|err| {
                        error!(error = %err, relation = %name, "failed to load include");
                    })?;

            if !nested.is_empty() {
                load_relations(
                    &mut *conn,
                    schema,
                    related,
                    &mut children,
                    &include_tree(nested),
                    depth + 1,
                )
                .await?;
            }

            attach(rows, relation, &local, children);
        }
        Ok(())
    })
}

/// `SELECT related.* FROM related [JOIN pivot] WHERE key IN (..)`.
///
/// Pivot-through children also carry the pivot row and the parent key.
fn relation_sql(joins: &[JoinKeys], keys: Vec<Value>) -> String {
    let values = keys.into_iter().map(sql_value);
    let mut select = Query::select();

    match joins {
        [to_pivot, to_related] => {
            let pivot = &to_pivot.table;
            select
                .column((Alias::new(&to_related.table), Asterisk))
                .expr_as(
                    Expr::cust(format!("row_to_json(\"{pivot}\")")),
                    Alias::new(PIVOT),
                )
                .expr_as(
                    Expr::col((Alias::new(pivot), Alias::new(&to_pivot.foreign.name))),
                    Alias::new(PARENT_REFERENCE),
                )
                .from(Alias::new(&to_related.table))
                .inner_join(
                    Alias::new(pivot),
                    Expr::col((
                        Alias::new(&to_related.foreign.table),
                        Alias::new(&to_related.foreign.name),
                    ))
                    .equals((
                        Alias::new(&to_related.local.table),
                        Alias::new(&to_related.local.name),
                    )),
                )
                .and_where(
                    Expr::col((Alias::new(pivot), Alias::new(&to_pivot.foreign.name))).is_in(values),
                );
        }
        joins => {
            if let Some(direct) = joins.first() {
                select
                    .column((Alias::new(&direct.table), Asterisk))
                    .from(Alias::new(&direct.table))
                    .and_where(
                        Expr::col((
                            Alias::new(&direct.foreign.table),
                            Alias::new(&direct.foreign.name),
                        ))
                        .is_in(values),
                    );
            }
        }
    }

    select.to_string(PostgresQueryBuilder)
}

/// Non-null values of `column` across `rows`, first occurrence order.
fn distinct_values(rows: &[Value], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| !value.is_null())
        .filter(|value| seen.insert(value.to_string()))
        .cloned()
        .collect()
}

/// Distribute loaded children onto their parents.
///
/// To-one relations get an object or null, the others an array.
fn attach(rows: &mut [Value], relation: &RelationDef, local: &str, children: Vec<Value>) {
    let reference = match &relation.kind {
        RelationKind::PivotThrough { .. } => PARENT_REFERENCE,
        _ => relation.related_column.as_str(),
    };

    let mut by_parent: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for mut child in children {
        let Some(key) = child.get(reference).map(Value::to_string) else {
            continue;
        };
        if reference == PARENT_REFERENCE
            && let Some(object) = child.as_object_mut()
        {
            object.remove(PARENT_REFERENCE);
        }
        by_parent.entry(key).or_default().push(child);
    }

    for row in rows {
        let Some(object) = row.as_object_mut() else {
            continue;
        };
        let matched = object
            .get(local)
            .and_then(|key| by_parent.get(&key.to_string()))
            .cloned()
            .unwrap_or_default();

        let value = match relation.kind {
            RelationKind::ToOne => matched.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(matched),
        };
        object.insert(relation.name.clone(), value);
    }
}
