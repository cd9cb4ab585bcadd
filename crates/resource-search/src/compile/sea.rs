//! SeaQuery-backed query object rendering PostgreSQL.

use std::sync::Arc;

use sea_query::{
    Alias, Asterisk, Cond, Condition, Expr, ExprTrait, Func, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr,
};
use serde_json::Value;

use super::{OrderBy, QueryTarget, ScopeHandlers, missing_scope};
use crate::compile::predicate::{Comparison, Operand, Predicate};
use crate::descriptor::{Boolean, SortDirection};
use crate::error::SearchError;
use crate::relation::ResolvedStep;
use crate::schema::{Column, JoinKeys};

/// A SELECT over one table, built up by the compiler.
#[derive(Debug, Clone)]
pub struct SeaQuery {
    table: String,
    pivot: Option<String>,
    conditions: Vec<(Boolean, SimpleExpr)>,
    joins: Vec<JoinKeys>,
    orderings: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    scopes: Arc<ScopeHandlers<SeaQuery>>,
}

impl SeaQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            pivot: None,
            conditions: Vec::new(),
            joins: Vec::new(),
            orderings: Vec::new(),
            limit: None,
            offset: None,
            scopes: Arc::new(ScopeHandlers::new()),
        }
    }

    /// Scope implementations available to `apply_scope`.
    pub fn with_scopes(mut self, scopes: Arc<ScopeHandlers<SeaQuery>>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Run over a pivot-through relation whose join table is `pivot`.
    ///
    /// The pivot table is not joined here; add it with
    /// [`QueryTarget::left_join`] before compiling `pivot.*` fields.
    pub fn with_pivot(mut self, pivot: impl Into<String>) -> Self {
        self.pivot = Some(pivot.into());
        self
    }

    /// Add a raw condition, for scope implementations.
    pub fn and_where(&mut self, condition: SimpleExpr) {
        self.conditions.push((Boolean::And, condition));
    }

    /// The accumulated WHERE clause, AND runs joined by OR.
    pub fn condition(&self) -> Option<Condition> {
        fold_conditions(&self.conditions)
    }

    /// The page SELECT.
    pub fn statement(&self) -> SelectStatement {
        let mut select = self.base();
        select.column((Alias::new(&self.table), Asterisk));

        for ordering in &self.orderings {
            let order = match ordering.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            select.order_by(
                (
                    Alias::new(&ordering.column.table),
                    Alias::new(&ordering.column.name),
                ),
                order,
            );
        }
        if let Some(limit) = self.limit {
            select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select.offset(offset);
        }
        select
    }

    /// `SELECT COUNT(*)` over the same rows, without ordering or window.
    pub fn count_statement(&self) -> SelectStatement {
        let mut select = self.base();
        select.expr(Expr::col(Asterisk).count());
        select
    }

    pub fn to_sql(&self) -> String {
        self.statement().to_string(PostgresQueryBuilder)
    }

    pub fn to_count_sql(&self) -> String {
        self.count_statement().to_string(PostgresQueryBuilder)
    }

    fn base(&self) -> SelectStatement {
        let mut select = Query::select();
        select.from(Alias::new(&self.table));
        for join in &self.joins {
            select.left_join(Alias::new(&join.table), join_on(join));
        }
        if let Some(condition) = self.condition() {
            select.cond_where(condition);
        }
        select
    }

    fn child(&self, table: &str, pivot: Option<&str>) -> Self {
        Self {
            table: table.to_string(),
            pivot: pivot.map(str::to_string),
            scopes: Arc::clone(&self.scopes),
            ..Self::new(String::new())
        }
    }
}

impl QueryTarget for SeaQuery {
    fn table(&self) -> &str {
        &self.table
    }

    fn pivot_table(&self) -> Option<&str> {
        self.pivot.as_deref()
    }

    fn apply(&mut self, predicate: Predicate, boolean: Boolean) {
        self.conditions.push((boolean, predicate_expr(predicate)));
    }

    fn group<F>(&mut self, boolean: Boolean, build: F) -> Result<(), SearchError>
    where
        F: FnOnce(&mut Self) -> Result<(), SearchError>,
    {
        let mut nested = self.child(&self.table, self.pivot.as_deref());
        build(&mut nested)?;
        if let Some(condition) = nested.condition() {
            self.conditions.push((boolean, condition.into()));
        }
        Ok(())
    }

    fn where_has<F>(
        &mut self,
        step: &ResolvedStep<'_>,
        boolean: Boolean,
        build: F,
    ) -> Result<(), SearchError>
    where
        F: FnOnce(&mut Self) -> Result<(), SearchError>,
    {
        let Some(table) = step.table() else {
            return Err(SearchError::InvalidRelation {
                path: step.relation.name.clone(),
                reason: "the target of a polymorphic relation cannot be determined".to_string(),
            });
        };

        let mut related = self.child(table, step.pivot_table());
        build(&mut related)?;

        let mut exists = Query::select();
        exists.expr(Expr::val(1)).from(Alias::new(table));

        let mut condition = Cond::all();
        match step.joins.as_slice() {
            [direct] => condition = condition.add(join_on(direct)),
            [to_pivot, to_related] => {
                exists.inner_join(Alias::new(&to_pivot.table), join_on(to_related));
                condition = condition.add(join_on(to_pivot));
            }
            _ => {
                return Err(SearchError::InvalidRelation {
                    path: step.relation.name.clone(),
                    reason: "the relation has no join keys".to_string(),
                });
            }
        }
        if let Some(inner) = related.condition() {
            condition = condition.add(inner);
        }
        exists.cond_where(condition);

        self.conditions.push((boolean, Expr::exists(exists)));
        Ok(())
    }

    fn apply_scope(&mut self, name: &str, arguments: &[Value]) -> Result<(), SearchError> {
        let handler = self.scopes.get(name).ok_or_else(|| missing_scope(name))?;
        handler(self, arguments)
    }

    fn has_join(&self, table: &str) -> bool {
        self.joins.iter().any(|join| join.table == table)
    }

    fn left_join(&mut self, join: &JoinKeys) {
        self.joins.push(join.clone());
    }

    fn order_by(&mut self, column: Column, direction: SortDirection) {
        self.orderings.push(OrderBy { column, direction });
    }

    fn orderings(&self) -> &[OrderBy] {
        &self.orderings
    }

    fn limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    fn offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }
}

fn column_expr(column: &Column) -> Expr {
    Expr::col((Alias::new(&column.table), Alias::new(&column.name)))
}

/// `joined.foreign = present.local`.
fn join_on(join: &JoinKeys) -> SimpleExpr {
    column_expr(&join.foreign).equals((Alias::new(&join.local.table), Alias::new(&join.local.name)))
}

fn operand_expr(operand: &Operand) -> SimpleExpr {
    match operand {
        Operand::Column(column) => column_expr(column).into(),
        Operand::Lower(column) => Func::lower(column_expr(column)).into(),
        Operand::Date(column) => Func::cust(Alias::new("DATE"))
            .arg(column_expr(column))
            .into(),
    }
}

fn predicate_expr(predicate: Predicate) -> SimpleExpr {
    match predicate {
        Predicate::Compare { operand, op, value } => {
            let lhs = operand_expr(&operand);
            let value = sql_value(value);
            match op {
                Comparison::Eq => lhs.eq(value),
                Comparison::NotEq => lhs.ne(value),
                Comparison::Gt => lhs.gt(value),
                Comparison::Gte => lhs.gte(value),
                Comparison::Lt => lhs.lt(value),
                Comparison::Lte => lhs.lte(value),
            }
        }
        Predicate::Pattern {
            operand,
            pattern,
            negated,
        } => {
            let lhs = operand_expr(&operand);
            if negated {
                lhs.not_like(pattern)
            } else {
                lhs.like(pattern)
            }
        }
        Predicate::SetMembership {
            operand,
            values,
            negated,
        } => {
            let lhs = operand_expr(&operand);
            let values = values.into_iter().map(sql_value);
            if negated {
                lhs.is_not_in(values)
            } else {
                lhs.is_in(values)
            }
        }
        Predicate::Null { column, negated } => {
            if negated {
                column_expr(&column).is_not_null()
            } else {
                column_expr(&column).is_null()
            }
        }
        Predicate::JsonContains { column, value } => Expr::cust_with_values(
            format!("\"{}\".\"{}\" @> $1::jsonb", column.table, column.name),
            [containment_document(value)],
        ),
    }
}

/// JSON document for `@>`: scalars are wrapped so they match array elements.
fn containment_document(value: Value) -> String {
    match value {
        Value::Array(_) => value.to_string(),
        scalar => Value::Array(vec![scalar]).to_string(),
    }
}

pub(crate) fn sql_value(value: Value) -> sea_query::Value {
    match value {
        Value::Null => sea_query::Value::String(None),
        Value::Bool(flag) => flag.into(),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                integer.into()
            } else if let Some(unsigned) = number.as_u64() {
                unsigned.into()
            } else {
                number.as_f64().unwrap_or_default().into()
            }
        }
        Value::String(text) => text.into(),
        other => other.to_string().into(),
    }
}

/// Fold a chain into runs of AND joined by OR.
fn fold_conditions(chain: &[(Boolean, SimpleExpr)]) -> Option<Condition> {
    let mut runs: Vec<Condition> = Vec::new();
    let mut current: Option<Condition> = None;

    for (boolean, expr) in chain {
        current = Some(match (current.take(), boolean) {
            (None, _) => Cond::all().add(expr.clone()),
            (Some(run), Boolean::And) => run.add(expr.clone()),
            (Some(run), Boolean::Or) => {
                runs.push(run);
                Cond::all().add(expr.clone())
            }
        });
    }
    runs.extend(current);

    match runs.len() {
        0 => None,
        1 => runs.pop(),
        _ => Some(runs.into_iter().fold(Cond::any(), Condition::add)),
    }
}
