//! Predicates handed to a [`QueryTarget`](super::QueryTarget).
//!
//! Every filter leaf becomes one predicate, or a small conjunction or
//! disjunction of them, built here from the leaf's operator and value.

use serde::Serialize;
use serde_json::Value;

use crate::descriptor::midnight_date;
use crate::directive::Operator;
use crate::error::SearchError;
use crate::schema::Column;

/// Left-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum Operand {
    /// The column as stored.
    Column(Column),
    /// `lower(column)`, matched against a lower-cased value.
    Lower(Column),
    /// `DATE(column)`, matched against a `YYYY-MM-DD` value.
    Date(Column),
}

impl Operand {
    pub fn column(&self) -> &Column {
        match self {
            Operand::Column(column) | Operand::Lower(column) | Operand::Date(column) => column,
        }
    }
}

/// Scalar comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn from_operator(operator: Operator) -> Option<Self> {
        match operator {
            Operator::Eq => Some(Comparison::Eq),
            Operator::NotEq => Some(Comparison::NotEq),
            Operator::Gt => Some(Comparison::Gt),
            Operator::Gte => Some(Comparison::Gte),
            Operator::Lt => Some(Comparison::Lt),
            Operator::Lte => Some(Comparison::Lte),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::NotEq => "<>",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// A single condition on one operand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "predicate", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        operand: Operand,
        op: Comparison,
        value: Value,
    },
    /// SQL `LIKE` with `%` and `_` wildcards.
    Pattern {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    SetMembership {
        operand: Operand,
        values: Vec<Value>,
        negated: bool,
    },
    Null {
        column: Column,
        negated: bool,
    },
    /// The JSON array in `column` contains `value`.
    JsonContains {
        column: Column,
        value: Value,
    },
}

impl Predicate {
    pub fn column(&self) -> &Column {
        match self {
            Predicate::Compare { operand, .. }
            | Predicate::Pattern { operand, .. }
            | Predicate::SetMembership { operand, .. } => operand.column(),
            Predicate::Null { column, .. } | Predicate::JsonContains { column, .. } => column,
        }
    }
}

/// Predicates produced by one filter leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Compiled {
    One(Predicate),
    /// Every predicate must hold.
    All(Vec<Predicate>),
    /// At least one predicate must hold.
    Any(Vec<Predicate>),
}

/// Build the predicates for `column <operator> value`.
///
/// `is_date` marks timestamp columns: values at midnight compare against the
/// whole day. `field` names the filter in errors.
pub fn build(
    field: &str,
    column: Column,
    is_date: bool,
    operator: Operator,
    value: &Value,
) -> Result<Compiled, SearchError> {
    match operator {
        Operator::In | Operator::NotIn => {
            Ok(membership(column, is_date, as_list(value), operator == Operator::NotIn))
        }
        Operator::Eq | Operator::NotEq if value.is_array() => {
            Ok(membership(column, is_date, as_list(value), operator == Operator::NotEq))
        }
        Operator::Eq | Operator::NotEq if value.is_null() => Ok(Compiled::One(Predicate::Null {
            column,
            negated: operator == Operator::NotEq,
        })),
        Operator::AllIn | Operator::AnyIn => {
            let contains = |value: Value| Predicate::JsonContains {
                column: column.clone(),
                value,
            };
            Ok(match value {
                Value::Array(items) => {
                    let predicates = items.iter().cloned().map(contains).collect();
                    if operator == Operator::AllIn {
                        Compiled::All(predicates)
                    } else {
                        Compiled::Any(predicates)
                    }
                }
                scalar => Compiled::One(contains(scalar.clone())),
            })
        }
        Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike => {
            let pattern = match value {
                Value::String(pattern) => pattern.clone(),
                Value::Number(number) => number.to_string(),
                _ => return Err(invalid(field, operator, "a string pattern is required")),
            };
            let insensitive = matches!(operator, Operator::ILike | Operator::NotILike);
            Ok(Compiled::One(Predicate::Pattern {
                operand: if insensitive {
                    Operand::Lower(column)
                } else {
                    Operand::Column(column)
                },
                pattern: if insensitive {
                    pattern.to_lowercase()
                } else {
                    pattern
                },
                negated: operator.is_negated(),
            }))
        }
        Operator::Eq | Operator::NotEq | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if value.is_null() || value.is_array() || value.is_object() {
                return Err(invalid(field, operator, "a scalar value is required"));
            }
            let Some(op) = Comparison::from_operator(operator) else {
                return Err(invalid(field, operator, "not a comparison"));
            };

            let predicate = match midnight_date(value).filter(|_| is_date) {
                Some(date) => Predicate::Compare {
                    operand: Operand::Date(column),
                    op,
                    value: Value::String(date.format("%Y-%m-%d").to_string()),
                },
                None => Predicate::Compare {
                    operand: Operand::Column(column),
                    op,
                    value: value.clone(),
                },
            };
            Ok(Compiled::One(predicate))
        }
    }
}

/// Substring match used by full-text search.
pub fn contains_text(column: Column, needle: &str, case_sensitive: bool) -> Predicate {
    let pattern = format!("%{needle}%");
    if case_sensitive {
        Predicate::Pattern {
            operand: Operand::Column(column),
            pattern,
            negated: false,
        }
    } else {
        Predicate::Pattern {
            operand: Operand::Lower(column),
            pattern: pattern.to_lowercase(),
            negated: false,
        }
    }
}

/// `IN` / `NOT IN`, splitting out nulls into an `IS [NOT] NULL` check.
///
/// `in [null, a, b]` is `IS NULL OR IN (a, b)`; `not in [null, a]` is
/// `IS NOT NULL AND NOT IN (a)`.
fn membership(column: Column, is_date: bool, values: Vec<Value>, negated: bool) -> Compiled {
    let has_null = values.iter().any(Value::is_null);
    let rest: Vec<Value> = values.into_iter().filter(|value| !value.is_null()).collect();

    let null = Predicate::Null {
        column: column.clone(),
        negated,
    };
    if has_null && rest.is_empty() {
        return Compiled::One(null);
    }

    let dates: Option<Vec<Value>> = if is_date {
        rest.iter()
            .map(|value| midnight_date(value).map(|d| Value::String(d.format("%Y-%m-%d").to_string())))
            .collect()
    } else {
        None
    };
    let set = match dates {
        Some(values) => Predicate::SetMembership {
            operand: Operand::Date(column),
            values,
            negated,
        },
        None => Predicate::SetMembership {
            operand: Operand::Column(column),
            values: rest,
            negated,
        },
    };

    match (has_null, negated) {
        (false, _) => Compiled::One(set),
        (true, false) => Compiled::Any(vec![null, set]),
        (true, true) => Compiled::All(vec![null, set]),
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    }
}

fn invalid(field: &str, operator: Operator, reason: &str) -> SearchError {
    SearchError::InvalidValue {
        field: field.to_string(),
        reason: format!("{reason} for the '{operator}' operator"),
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column() -> Column {
        Column::new("posts", "publish_at")
    }

    #[test]
    fn in_with_null_is_null_or_set() {
        let compiled = build(
            "publish_at",
            column(),
            false,
            Operator::In,
            &json!([null, "a", "b"]),
        )
        .unwrap();

        let Compiled::Any(predicates) = compiled else {
            panic!("expected a disjunction");
        };
        assert_eq!(
            predicates[0],
            Predicate::Null {
                column: column(),
                negated: false
            }
        );
        assert!(matches!(
            &predicates[1],
            Predicate::SetMembership { values, negated: false, .. } if values.len() == 2
        ));
    }

    #[test]
    fn not_in_with_null_is_not_null_and_not_in() {
        let compiled = build("f", column(), false, Operator::NotIn, &json!([null, 1])).unwrap();
        let Compiled::All(predicates) = compiled else {
            panic!("expected a conjunction");
        };
        assert!(matches!(predicates[0], Predicate::Null { negated: true, .. }));
        assert!(matches!(
            predicates[1],
            Predicate::SetMembership { negated: true, .. }
        ));
    }

    #[test]
    fn only_null_is_a_null_check() {
        let compiled = build("f", column(), false, Operator::Eq, &json!([null])).unwrap();
        assert!(matches!(
            compiled,
            Compiled::One(Predicate::Null { negated: false, .. })
        ));
    }

    #[test]
    fn midnight_dates_compare_by_day() {
        let compiled = build(
            "publish_at",
            column(),
            true,
            Operator::Eq,
            &json!("2024-01-01 00:00:00"),
        )
        .unwrap();
        assert_eq!(
            compiled,
            Compiled::One(Predicate::Compare {
                operand: Operand::Date(column()),
                op: Comparison::Eq,
                value: json!("2024-01-01"),
            })
        );

        let compiled = build(
            "publish_at",
            column(),
            true,
            Operator::Gt,
            &json!("2024-01-01 10:00:00"),
        )
        .unwrap();
        assert!(matches!(
            compiled,
            Compiled::One(Predicate::Compare {
                operand: Operand::Column(_),
                ..
            })
        ));
    }

    #[test]
    fn midnight_dates_in_sets() {
        let compiled = build(
            "publish_at",
            column(),
            true,
            Operator::In,
            &json!([null, "2024-01-01"]),
        )
        .unwrap();
        let Compiled::Any(predicates) = compiled else {
            panic!("expected a disjunction");
        };
        assert_eq!(
            predicates[1],
            Predicate::SetMembership {
                operand: Operand::Date(column()),
                values: vec![json!("2024-01-01")],
                negated: false,
            }
        );
    }

    #[test]
    fn ilike_lowercases_both_sides() {
        let compiled = build("title", column(), false, Operator::ILike, &json!("%Very%")).unwrap();
        assert_eq!(
            compiled,
            Compiled::One(Predicate::Pattern {
                operand: Operand::Lower(column()),
                pattern: "%very%".into(),
                negated: false,
            })
        );
    }

    #[test]
    fn json_containment() {
        let all = build("tags", column(), false, Operator::AllIn, &json!(["a", "b"])).unwrap();
        assert!(matches!(all, Compiled::All(ref p) if p.len() == 2));

        let any = build("tags", column(), false, Operator::AnyIn, &json!(["a", "b"])).unwrap();
        assert!(matches!(any, Compiled::Any(ref p) if p.len() == 2));

        let one = build("tags", column(), false, Operator::AllIn, &json!("a")).unwrap();
        assert!(matches!(one, Compiled::One(Predicate::JsonContains { .. })));
    }

    #[test]
    fn comparisons_reject_null() {
        let err = build("votes", column(), false, Operator::Gt, &Value::Null).unwrap_err();
        assert!(matches!(err, SearchError::InvalidValue { .. }));
    }
}
