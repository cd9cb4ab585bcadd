//! Directives: the server-side allow-list for a searchable resource.
//!
//! A directive maps the external name a client uses to the internal field,
//! relation path or scope it stands for:
//! - [`AllowedFilter`]: filterable field with its operators and value rules
//! - [`AllowedSort`]: sortable field
//! - [`AllowedScope`]: named, pre-vetted query modifier with fixed arguments

pub(crate) mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub use registry::{
    FilterRegistry, Registered, Registries, Registry, ScopeRegistry, SortRegistry,
};

/// External/internal name pair shared by every directive kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Name the client uses.
    pub name: String,

    /// Real field, relation path or scope name (defaults to `name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    internal_name: Option<String>,
}

impl Alias {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_name: None,
        }
    }

    pub fn with_internal(name: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            internal_name: Some(internal.into()),
        }
    }

    /// External name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal name, falling back to the external one.
    pub fn internal_name(&self) -> &str {
        self.internal_name.as_deref().unwrap_or(&self.name)
    }
}

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    AllIn,
    AnyIn,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Eq,
        Operator::NotEq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Like,
        Operator::NotLike,
        Operator::ILike,
        Operator::NotILike,
        Operator::In,
        Operator::NotIn,
        Operator::AllIn,
        Operator::AnyIn,
    ];

    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::AllIn => "all in",
            Operator::AnyIn => "any in",
        }
    }

    /// Membership operators take an array value.
    pub fn is_membership(self) -> bool {
        matches!(
            self,
            Operator::In | Operator::NotIn | Operator::AllIn | Operator::AnyIn
        )
    }

    /// Pattern operators (`like` family).
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike
        )
    }

    /// Whether the operator negates its match.
    pub fn is_negated(self) -> bool {
        matches!(
            self,
            Operator::NotEq | Operator::NotLike | Operator::NotILike | Operator::NotIn
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for operator spellings that are not part of the operator set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl fmt::Display for UnknownOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operator '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperator {}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "=" => Operator::Eq,
            "!=" => Operator::NotEq,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "like" => Operator::Like,
            "not like" | "not-like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" | "not-ilike" => Operator::NotILike,
            "in" => Operator::In,
            "not in" | "not-in" => Operator::NotIn,
            "all in" | "all-in" => Operator::AllIn,
            "any in" | "any-in" => Operator::AnyIn,
            other => return Err(UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Rules a filter value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRule {
    String,
    Integer,
    Numeric,
    Date,
    Boolean,
    Uuid,
    Nullable,
}

/// A whitelisted filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedFilter {
    #[serde(flatten)]
    pub alias: Alias,

    /// Operators a client may use against this field.
    #[serde(default)]
    pub operators: Vec<Operator>,

    /// Value rules, applied per element for membership operators.
    #[serde(default)]
    pub rules: Vec<ValueRule>,
}

impl AllowedFilter {
    pub fn new(
        name: impl Into<String>,
        operators: impl IntoIterator<Item = Operator>,
        rules: impl IntoIterator<Item = ValueRule>,
    ) -> Self {
        Self {
            alias: Alias::new(name),
            operators: operators.into_iter().collect(),
            rules: rules.into_iter().collect(),
        }
    }

    /// String field: comparisons, set membership and pattern matching.
    pub fn string(name: impl Into<String>) -> Self {
        use Operator::*;
        Self::new(
            name,
            [Eq, NotEq, In, NotIn, Gt, Gte, Lt, Lte, Like, NotLike, ILike, NotILike],
            [ValueRule::String, ValueRule::Nullable],
        )
    }

    /// Numeric field.
    pub fn number(name: impl Into<String>) -> Self {
        use Operator::*;
        Self::new(
            name,
            [Eq, NotEq, In, NotIn, Gt, Gte, Lt, Lte],
            [ValueRule::Integer, ValueRule::Numeric, ValueRule::Nullable],
        )
    }

    /// Timestamp or date field.
    pub fn timestamp(name: impl Into<String>) -> Self {
        use Operator::*;
        Self::new(
            name,
            [Eq, NotEq, In, NotIn, Gt, Gte, Lt, Lte],
            [ValueRule::Date, ValueRule::Nullable],
        )
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(
            name,
            [Operator::Eq, Operator::NotEq],
            [ValueRule::Boolean, ValueRule::Nullable],
        )
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        use Operator::*;
        Self::new(
            name,
            [Eq, NotEq, In, NotIn],
            [ValueRule::Uuid, ValueRule::Nullable],
        )
    }

    /// JSON array column matched by containment.
    pub fn json_array(name: impl Into<String>) -> Self {
        Self::new(
            name,
            [Operator::AllIn, Operator::AnyIn],
            [ValueRule::String, ValueRule::Nullable],
        )
    }

    /// Point the directive at a different internal field or relation path.
    pub fn internal(mut self, internal: impl Into<String>) -> Self {
        self.alias = Alias::with_internal(self.alias.name, internal);
        self
    }

    pub fn name(&self) -> &str {
        self.alias.name()
    }

    pub fn internal_name(&self) -> &str {
        self.alias.internal_name()
    }

    pub fn allows(&self, operator: Operator) -> bool {
        self.operators.contains(&operator)
    }

    pub fn has_rule(&self, rule: ValueRule) -> bool {
        self.rules.contains(&rule)
    }
}

/// A whitelisted sort field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedSort {
    #[serde(flatten)]
    pub alias: Alias,
}

impl AllowedSort {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            alias: Alias::new(name),
        }
    }

    pub fn internal(mut self, internal: impl Into<String>) -> Self {
        self.alias = Alias::with_internal(self.alias.name, internal);
        self
    }

    pub fn name(&self) -> &str {
        self.alias.name()
    }

    pub fn internal_name(&self) -> &str {
        self.alias.internal_name()
    }
}

/// A whitelisted scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedScope {
    #[serde(flatten)]
    pub alias: Alias,

    /// Arguments bound at definition time, always passed first.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl AllowedScope {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            alias: Alias::new(name),
            arguments: Vec::new(),
        }
    }

    pub fn internal(mut self, internal: impl Into<String>) -> Self {
        self.alias = Alias::with_internal(self.alias.name, internal);
        self
    }

    pub fn with_arguments(mut self, arguments: impl IntoIterator<Item = Value>) -> Self {
        self.arguments = arguments.into_iter().collect();
        self
    }

    pub fn external_name(&self) -> &str {
        self.alias.name()
    }

    pub fn internal_name(&self) -> &str {
        self.alias.internal_name()
    }

    /// Fixed arguments followed by the caller's parameters.
    pub fn arguments_with(&self, supplied: &[Value]) -> Vec<Value> {
        self.arguments.iter().chain(supplied).cloned().collect()
    }
}

/// Any directive, as returned by a resource's configuration methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    Filter(AllowedFilter),
    Sort(AllowedSort),
    Scope(AllowedScope),
}

impl Directive {
    /// Capability name used in error messages.
    pub fn capability(&self) -> &'static str {
        match self {
            Directive::Filter(_) => "filter",
            Directive::Sort(_) => "sort",
            Directive::Scope(_) => "scope",
        }
    }

    pub fn external_name(&self) -> &str {
        match self {
            Directive::Filter(f) => f.name(),
            Directive::Sort(s) => s.name(),
            Directive::Scope(s) => s.external_name(),
        }
    }
}

impl From<AllowedFilter> for Directive {
    fn from(filter: AllowedFilter) -> Self {
        Directive::Filter(filter)
    }
}

impl From<AllowedSort> for Directive {
    fn from(sort: AllowedSort) -> Self {
        Directive::Sort(sort)
    }
}

impl From<AllowedScope> for Directive {
    fn from(scope: AllowedScope) -> Self {
        Directive::Scope(scope)
    }
}
