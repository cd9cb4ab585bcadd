//! Query compilation.
//!
//! [`QueryCompiler`] walks a [`SearchRequest`] and drives a [`QueryTarget`]:
//! scopes first, then filters, search and sort. Allow-lists are checked again
//! here so a request that skipped validation still cannot reach anything the
//! resource did not whitelist.

pub mod predicate;
pub mod sea;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SearchConfig;
use crate::descriptor::{
    Boolean, FilterLeaf, FilterNode, ScopeDescriptor, SearchDescriptor, SearchRequest,
    SortDescriptor, SortDirection,
};
use crate::directive::Registries;
use crate::error::SearchError;
use crate::relation::{RelationPath, RelationsResolver, ResolvedStep};
use crate::schema::{Column, EntityMeta, JoinKeys};

pub use predicate::{Comparison, Compiled, Operand, Predicate};
pub use sea::SeaQuery;

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: Column,
    pub direction: SortDirection,
}

/// The relational query object a search is compiled into.
///
/// Conditions chain in call order: each one joins everything before it with
/// its [`Boolean`], with AND binding tighter than OR as in SQL.
pub trait QueryTarget: Sized {
    /// Table the query selects from.
    fn table(&self) -> &str;

    /// Join table, when this query runs over a pivot-through relation.
    fn pivot_table(&self) -> Option<&str>;

    fn apply(&mut self, predicate: Predicate, boolean: Boolean);

    /// Parenthesised group built by `build` on a query over the same table.
    fn group<F>(&mut self, boolean: Boolean, build: F) -> Result<(), SearchError>
    where
        F: FnOnce(&mut Self) -> Result<(), SearchError>;

    /// Correlated existence check over the related rows of `step`, with
    /// `build` adding conditions to a query over the related table.
    fn where_has<F>(
        &mut self,
        step: &ResolvedStep<'_>,
        boolean: Boolean,
        build: F,
    ) -> Result<(), SearchError>
    where
        F: FnOnce(&mut Self) -> Result<(), SearchError>;

    /// Invoke a named scope with its full argument list.
    fn apply_scope(&mut self, name: &str, arguments: &[Value]) -> Result<(), SearchError>;

    fn has_join(&self, table: &str) -> bool;

    fn left_join(&mut self, join: &JoinKeys);

    fn order_by(&mut self, column: Column, direction: SortDirection);

    fn orderings(&self) -> &[OrderBy];

    fn limit(&mut self, limit: u64);

    fn offset(&mut self, offset: u64);
}

/// Scope implementation for a query type.
pub type ScopeFn<Q> = Arc<dyn Fn(&mut Q, &[Value]) -> Result<(), SearchError> + Send + Sync>;

/// Named scope implementations, keyed by the directive's internal name.
pub struct ScopeHandlers<Q> {
    handlers: HashMap<String, ScopeFn<Q>>,
}

impl<Q> Default for ScopeHandlers<Q> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Q> Clone for ScopeHandlers<Q> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<Q> std::fmt::Debug for ScopeHandlers<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ScopeHandlers").field("names", &names).finish()
    }
}

impl<Q> ScopeHandlers<Q> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scope. Re-registering a name replaces the handler.
    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Q, &[Value]) -> Result<(), SearchError> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<ScopeFn<Q>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Error for a whitelisted scope with no implementation behind it.
pub(crate) fn missing_scope(name: &str) -> SearchError {
    SearchError::InvalidDirective(format!("scope '{name}' has no registered handler"))
}

/// Compiles requests for one resource.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler<'a> {
    entity: &'a EntityMeta,
    resolver: RelationsResolver<'a>,
    registries: &'a Registries,
    searchable_by: &'a [String],
    config: &'a SearchConfig,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        entity: &'a EntityMeta,
        resolver: RelationsResolver<'a>,
        registries: &'a Registries,
        searchable_by: &'a [String],
        config: &'a SearchConfig,
    ) -> Self {
        Self {
            entity,
            resolver,
            registries,
            searchable_by,
            config,
        }
    }

    /// Apply scopes, filters, search and sort to `query`, in that order.
    pub fn compile<Q: QueryTarget>(
        &self,
        query: &mut Q,
        request: &SearchRequest,
    ) -> Result<(), SearchError> {
        self.apply_scopes(query, &request.scopes)?;
        self.apply_filters(query, &request.filters)?;
        self.apply_search(query, request.search.as_ref())?;
        self.apply_sort(query, &request.sort)?;

        debug!(
            entity = %self.entity.name,
            scopes = request.scopes.len(),
            filters = request.filters.len(),
            sorts = request.sort.len(),
            "search compiled"
        );
        Ok(())
    }

    pub fn apply_scopes<Q: QueryTarget>(
        &self,
        query: &mut Q,
        scopes: &[ScopeDescriptor],
    ) -> Result<(), SearchError> {
        for scope in scopes {
            let directive = self
                .registries
                .scopes
                .get(&scope.name)
                .ok_or_else(|| SearchError::UnknownField(scope.name.clone()))?;

            let arguments = directive.arguments_with(&scope.parameters);
            query.apply_scope(directive.internal_name(), &arguments)?;
        }
        Ok(())
    }

    pub fn apply_filters<Q: QueryTarget>(
        &self,
        query: &mut Q,
        nodes: &[FilterNode],
    ) -> Result<(), SearchError> {
        for node in nodes {
            match node {
                FilterNode::Group(group) => {
                    query.group(group.boolean, |nested| {
                        self.apply_filters(nested, &group.nested)
                    })?;
                }
                FilterNode::Leaf(leaf) => self.apply_leaf(query, leaf)?,
            }
        }
        Ok(())
    }

    fn apply_leaf<Q: QueryTarget>(&self, query: &mut Q, leaf: &FilterLeaf) -> Result<(), SearchError> {
        let filter = self
            .registries
            .filters
            .get(&leaf.field)
            .ok_or_else(|| SearchError::UnknownField(leaf.field.clone()))?;

        if !filter.allows(leaf.operator) {
            return Err(SearchError::OperatorNotAllowed {
                field: leaf.field.clone(),
                operator: leaf.operator.to_string(),
            });
        }

        let path = self.resolver.resolve(self.entity, filter.internal_name())?;
        match &path {
            RelationPath::Local { field } => {
                let compiled = predicate::build(
                    &leaf.field,
                    self.entity.column(field.clone()),
                    self.entity.is_date_column(field),
                    leaf.operator,
                    &leaf.value,
                )?;
                apply_compiled(query, compiled, leaf.boolean)
            }
            RelationPath::Pivot { field } => {
                let column = pivot_column(query, field, filter.internal_name())?;
                let compiled =
                    predicate::build(&leaf.field, column, false, leaf.operator, &leaf.value)?;
                apply_compiled(query, compiled, leaf.boolean)
            }
            RelationPath::Related { steps, field } => {
                let target = related_target(&path, filter.internal_name())?;
                let compiled = predicate::build(
                    &leaf.field,
                    target.column(field.clone()),
                    target.is_date_column(field),
                    leaf.operator,
                    &leaf.value,
                )?;
                through(query, steps, leaf.boolean, |related| {
                    apply_compiled(related, compiled, Boolean::And)
                })
            }
        }
    }

    /// OR together a substring match over every searchable field.
    pub fn apply_search<Q: QueryTarget>(
        &self,
        query: &mut Q,
        search: Option<&SearchDescriptor>,
    ) -> Result<(), SearchError> {
        let Some(needle) = search
            .and_then(|search| search.value.as_deref())
            .filter(|value| !value.is_empty())
        else {
            return Ok(());
        };
        if self.searchable_by.is_empty() {
            return Ok(());
        }

        let case_sensitive = search
            .and_then(|search| search.case_sensitive)
            .unwrap_or(self.config.search.case_sensitive_default);

        query.group(Boolean::And, |any| {
            for searchable in self.searchable_by {
                let path = self.resolver.resolve(self.entity, searchable)?;
                match &path {
                    RelationPath::Local { field } => any.apply(
                        predicate::contains_text(
                            self.entity.column(field.clone()),
                            needle,
                            case_sensitive,
                        ),
                        Boolean::Or,
                    ),
                    RelationPath::Pivot { field } => {
                        let column = pivot_column(any, field, searchable)?;
                        any.apply(
                            predicate::contains_text(column, needle, case_sensitive),
                            Boolean::Or,
                        );
                    }
                    RelationPath::Related { steps, field } => {
                        let column = related_target(&path, searchable)?.column(field.clone());
                        through(any, steps, Boolean::Or, |related| {
                            related.apply(
                                predicate::contains_text(column, needle, case_sensitive),
                                Boolean::And,
                            );
                            Ok(())
                        })?;
                    }
                }
            }
            Ok(())
        })
    }

    pub fn apply_sort<Q: QueryTarget>(
        &self,
        query: &mut Q,
        sorts: &[SortDescriptor],
    ) -> Result<(), SearchError> {
        for sort in sorts {
            let directive = self
                .registries
                .sorts
                .get(&sort.field)
                .ok_or_else(|| SearchError::UnknownField(sort.field.clone()))?;

            let path = self.resolver.resolve(self.entity, directive.internal_name())?;
            match &path {
                RelationPath::Local { field } => {
                    query.order_by(self.entity.column(field.clone()), sort.direction);
                }
                RelationPath::Pivot { field } => {
                    let column = pivot_column(query, field, directive.internal_name())?;
                    query.order_by(column, sort.direction);
                }
                RelationPath::Related { .. } if path.is_polymorphic() => {
                    debug!(
                        field = %sort.field,
                        "skipping sort through a polymorphic relation"
                    );
                }
                RelationPath::Related { steps, .. } => {
                    for join in steps.iter().flat_map(|step| &step.joins) {
                        if !query.has_join(&join.table) {
                            query.left_join(join);
                        }
                    }
                    if let Some(column) = path.related_column() {
                        query.order_by(column, sort.direction);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Apply one leaf's predicates with the leaf's boolean.
pub(crate) fn apply_compiled<Q: QueryTarget>(
    query: &mut Q,
    compiled: Compiled,
    boolean: Boolean,
) -> Result<(), SearchError> {
    match compiled {
        Compiled::One(predicate) => {
            query.apply(predicate, boolean);
            Ok(())
        }
        Compiled::All(predicates) => query.group(boolean, |all| {
            for predicate in predicates {
                all.apply(predicate, Boolean::And);
            }
            Ok(())
        }),
        Compiled::Any(predicates) => query.group(boolean, |any| {
            for predicate in predicates {
                any.apply(predicate, Boolean::Or);
            }
            Ok(())
        }),
    }
}

/// Nest `build` inside one existence check per relation step.
fn through<Q, F>(
    query: &mut Q,
    steps: &[ResolvedStep<'_>],
    boolean: Boolean,
    build: F,
) -> Result<(), SearchError>
where
    Q: QueryTarget,
    F: FnOnce(&mut Q) -> Result<(), SearchError>,
{
    match steps.split_first() {
        None => build(query),
        Some((step, rest)) => query.where_has(step, boolean, |related| {
            through(related, rest, Boolean::And, build)
        }),
    }
}

fn pivot_column<Q: QueryTarget>(query: &Q, field: &str, path: &str) -> Result<Column, SearchError> {
    query
        .pivot_table()
        .map(|table| Column::new(table, field))
        .ok_or_else(|| SearchError::InvalidRelation {
            path: path.to_string(),
            reason: "the query does not run over a pivot relation".to_string(),
        })
}

fn related_target<'s>(path: &RelationPath<'s>, name: &str) -> Result<&'s EntityMeta, SearchError> {
    if path.is_polymorphic() {
        return Err(SearchError::InvalidRelation {
            path: name.to_string(),
            reason: "the target of a polymorphic relation cannot be determined".to_string(),
        });
    }
    path.target().ok_or_else(|| SearchError::InvalidRelation {
        path: name.to_string(),
        reason: "the relation has no target entity".to_string(),
    })
}
