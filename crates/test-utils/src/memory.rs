//! In-memory query target.
//!
//! [`MemoryQuery`] records what the compiler asks for and evaluates it over
//! JSON rows with PostgreSQL semantics where they matter: NULL never matches
//! a comparison or a pattern, AND binds tighter than OR, and NULLs sort last
//! ascending and first descending.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use resource_search::compile::{Comparison, OrderBy, Operand, Predicate, ScopeHandlers};
use resource_search::descriptor::{Boolean, SortDirection, parse_timestamp};
use resource_search::relation::ResolvedStep;
use resource_search::schema::{Column, JoinKeys};
use resource_search::{QueryTarget, SearchError};
use serde_json::Value;

/// Tables of JSON rows keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: HashMap<String, Vec<Value>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, rows: Vec<Value>) -> Self {
        self.tables.insert(table.into(), rows);
        self
    }

    pub fn rows(&self, table: &str) -> &[Value] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Predicate(Predicate),
    Group(Vec<(Boolean, Condition)>),
    Exists {
        joins: Vec<JoinKeys>,
        inner: Vec<(Boolean, Condition)>,
    },
}

static NULL: Value = Value::Null;

/// Rows visible while evaluating a condition, innermost last.
type Frames<'a> = Vec<(&'a str, &'a Value)>;

/// Query over a [`Dataset`].
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    data: Arc<Dataset>,
    table: String,
    pivot: Option<String>,
    conditions: Vec<(Boolean, Condition)>,
    joins: Vec<JoinKeys>,
    orderings: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    scopes: Arc<ScopeHandlers<MemoryQuery>>,
}

impl MemoryQuery {
    pub fn new(data: Arc<Dataset>, table: impl Into<String>) -> Self {
        Self {
            data,
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

    pub fn with_scopes(mut self, scopes: Arc<ScopeHandlers<MemoryQuery>>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn dataset(&self) -> &Dataset {
        &self.data
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Matching rows, ordered and windowed.
    pub fn rows(&self) -> Vec<Value> {
        let mut matched: Vec<(Frames<'_>, &Value)> = self
            .data
            .rows(&self.table)
            .iter()
            .filter_map(|row| {
                let frames = self.joined(row);
                holds(&self.data, &self.conditions, &frames).then_some((frames, row))
            })
            .collect();

        matched.sort_by(|(left, _), (right, _)| {
            self.orderings
                .iter()
                .map(|ordering| {
                    let a = lookup(left, &ordering.column);
                    let b = lookup(right, &ordering.column);
                    order_nulls(&a, &b, ordering.direction)
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let skip = self
            .offset
            .map_or(0, |offset| usize::try_from(offset).unwrap_or(usize::MAX));
        let take = self
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Matching rows, ignoring order and window.
    pub fn count(&self) -> u64 {
        let count = self
            .data
            .rows(&self.table)
            .iter()
            .filter(|row| holds(&self.data, &self.conditions, &self.joined(row)))
            .count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    /// The row plus the first match of every left join, or NULL.
    fn joined<'a>(&'a self, row: &'a Value) -> Frames<'a> {
        let mut frames: Frames<'a> = vec![(self.table.as_str(), row)];
        for join in &self.joins {
            let local = lookup(&frames, &join.local);
            let found = self
                .data
                .rows(&join.table)
                .iter()
                .find(|candidate| loose_eq(field(candidate, &join.foreign.name), &local))
                .unwrap_or(&NULL);
            frames.push((join.table.as_str(), found));
        }
        frames
    }

    fn child(&self, table: &str, pivot: Option<&str>) -> Self {
        Self {
            pivot: pivot.map(str::to_string),
            scopes: Arc::clone(&self.scopes),
            ..Self::new(Arc::clone(&self.data), table)
        }
    }
}

impl QueryTarget for MemoryQuery {
    fn table(&self) -> &str {
        &self.table
    }

    fn pivot_table(&self) -> Option<&str> {
        self.pivot.as_deref()
    }

    fn apply(&mut self, predicate: Predicate, boolean: Boolean) {
        self.conditions.push((boolean, Condition::Predicate(predicate)));
    }

    fn group<F>(&mut self, boolean: Boolean, build: F) -> Result<(), SearchError>
    where
        F: FnOnce(&mut Self) -> Result<(), SearchError>,
    {
        let mut nested = self.child(&self.table, self.pivot.as_deref());
        build(&mut nested)?;
        if !nested.conditions.is_empty() {
            self.conditions
                .push((boolean, Condition::Group(nested.conditions)));
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
                reason: "polymorphic".to_string(),
            });
        };
        let mut related = self.child(table, step.pivot_table());
        build(&mut related)?;
        self.conditions.push((
            boolean,
            Condition::Exists {
                joins: step.joins.clone(),
                inner: related.conditions,
            },
        ));
        Ok(())
    }

    fn apply_scope(&mut self, name: &str, arguments: &[Value]) -> Result<(), SearchError> {
        let handler = self.scopes.get(name).ok_or_else(|| {
            SearchError::InvalidDirective(format!("scope '{name}' has no registered handler"))
        })?;
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

/// AND runs joined by OR; the first boolean is ignored.
fn holds(data: &Dataset, conditions: &[(Boolean, Condition)], frames: &Frames<'_>) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let mut any = false;
    let mut run = true;
    for (position, (boolean, condition)) in conditions.iter().enumerate() {
        if position > 0 && *boolean == Boolean::Or {
            any |= run;
            run = true;
        }
        run = run && condition.holds(data, frames);
    }
    any || run
}

impl Condition {
    fn holds(&self, data: &Dataset, frames: &Frames<'_>) -> bool {
        match self {
            Condition::Predicate(predicate) => evaluate(predicate, frames),
            Condition::Group(nested) => holds(data, nested, frames),
            Condition::Exists { joins, inner } => match joins.as_slice() {
                [direct] => {
                    let local = lookup(frames, &direct.local);
                    data.rows(&direct.table).iter().any(|related| {
                        loose_eq(field(related, &direct.foreign.name), &local) && {
                            let mut nested = frames.clone();
                            nested.push((direct.table.as_str(), related));
                            holds(data, inner, &nested)
                        }
                    })
                }
                [to_pivot, to_related] => {
                    let local = lookup(frames, &to_pivot.local);
                    data.rows(&to_pivot.table)
                        .iter()
                        .filter(|pivot| loose_eq(field(pivot, &to_pivot.foreign.name), &local))
                        .any(|pivot| {
                            let through = field(pivot, &to_related.local.name);
                            data.rows(&to_related.table).iter().any(|related| {
                                loose_eq(field(related, &to_related.foreign.name), through) && {
                                    let mut nested = frames.clone();
                                    nested.push((to_pivot.table.as_str(), pivot));
                                    nested.push((to_related.table.as_str(), related));
                                    holds(data, inner, &nested)
                                }
                            })
                        })
                }
                _ => false,
            },
        }
    }
}

fn evaluate(predicate: &Predicate, frames: &Frames<'_>) -> bool {
    match predicate {
        Predicate::Compare { operand, op, value } => {
            let actual = operand_value(operand, frames);
            match compare(&actual, value) {
                Some(ordering) => match op {
                    Comparison::Eq => ordering.is_eq(),
                    Comparison::NotEq => ordering.is_ne(),
                    Comparison::Gt => ordering.is_gt(),
                    Comparison::Gte => ordering.is_ge(),
                    Comparison::Lt => ordering.is_lt(),
                    Comparison::Lte => ordering.is_le(),
                },
                None => false,
            }
        }
        Predicate::Pattern {
            operand,
            pattern,
            negated,
        } => match text(&operand_value(operand, frames)) {
            Some(haystack) => like(&haystack, pattern) != *negated,
            None => false,
        },
        Predicate::SetMembership {
            operand,
            values,
            negated,
        } => {
            let actual = operand_value(operand, frames);
            if actual.is_null() {
                return false;
            }
            values.iter().any(|value| loose_eq(&actual, value)) != *negated
        }
        Predicate::Null { column, negated } => lookup(frames, column).is_null() != *negated,
        Predicate::JsonContains { column, value } => match lookup(frames, column) {
            Value::Array(items) => items.iter().any(|item| loose_eq(item, value)),
            _ => false,
        },
    }
}

fn operand_value(operand: &Operand, frames: &Frames<'_>) -> Value {
    match operand {
        Operand::Column(column) => lookup(frames, column),
        Operand::Lower(column) => {
            text(&lookup(frames, column)).map_or(Value::Null, |raw| Value::String(raw.to_lowercase()))
        }
        Operand::Date(column) => text(&lookup(frames, column))
            .and_then(|raw| parse_timestamp(&raw))
            .map_or(Value::Null, |timestamp| {
                Value::String(timestamp.date().format("%Y-%m-%d").to_string())
            }),
    }
}

/// Value of `column` in the innermost frame over its table.
fn lookup(frames: &Frames<'_>, column: &Column) -> Value {
    frames
        .iter()
        .rev()
        .find(|(table, _)| *table == column.table)
        .map_or(Value::Null, |(_, row)| field(row, &column.name).clone())
}

pub(crate) fn field<'a>(row: &'a Value, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&NULL)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric when both sides are numbers, then timestamps, then text.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    if let (Some(a), Some(b)) = (number(left), number(right)) {
        return a.partial_cmp(&b);
    }
    let (a, b) = (text(left)?, text(right)?);
    if let (Some(a), Some(b)) = (parse_timestamp(&a), parse_timestamp(&b)) {
        return Some(a.cmp(&b));
    }
    Some(a.cmp(&b))
}

pub(crate) fn loose_eq(left: &Value, right: &Value) -> bool {
    compare(left, right).is_some_and(Ordering::is_eq)
}

fn order_nulls(left: &Value, right: &Value, direction: SortDirection) -> Ordering {
    match (left.is_null(), right.is_null(), direction) {
        (true, true, _) => Ordering::Equal,
        (true, false, SortDirection::Asc) | (false, true, SortDirection::Desc) => Ordering::Greater,
        (false, true, SortDirection::Asc) | (true, false, SortDirection::Desc) => Ordering::Less,
        (false, false, SortDirection::Asc) => compare(left, right).unwrap_or(Ordering::Equal),
        (false, false, SortDirection::Desc) => compare(right, left).unwrap_or(Ordering::Equal),
    }
}

/// SQL `LIKE`: `%` matches any run, `_` a single character.
pub fn like(haystack: &str, pattern: &str) -> bool {
    let text: Vec<char> = haystack.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matches[j]: pattern[..i] matches text[..j]
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for token in &pattern {
        let mut next = vec![false; text.len() + 1];
        match token {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= matches[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1];
                }
            }
            literal => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1] && text[j - 1] == *literal;
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}
