//! Validated request descriptors.
//!
//! A [`SearchRequest`] is what the validator produces from a raw payload and
//! what the compiler consumes. It can also be built directly; the compiler
//! re-checks every allow-list either way.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directive::Operator;

/// How a node joins its preceding siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl Boolean {
    pub fn as_str(self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "and" => Some(Boolean::And),
            "or" => Some(Boolean::Or),
            _ => None,
        }
    }
}

fn default_operator() -> Operator {
    Operator::Eq
}

fn is_and(boolean: &Boolean) -> bool {
    *boolean == Boolean::And
}

/// A single predicate against one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLeaf {
    /// External field name, possibly a dotted relation path.
    pub field: String,

    #[serde(default = "default_operator")]
    pub operator: Operator,

    #[serde(default)]
    pub value: Value,

    #[serde(rename = "type", default, skip_serializing_if = "is_and")]
    pub boolean: Boolean,
}

impl FilterLeaf {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            boolean: Boolean::And,
        }
    }

    /// Join the preceding siblings with OR instead of AND.
    pub fn or(mut self) -> Self {
        self.boolean = Boolean::Or;
        self
    }
}

/// A parenthesised group of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    #[serde(rename = "type", default, skip_serializing_if = "is_and")]
    pub boolean: Boolean,

    pub nested: Vec<FilterNode>,
}

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Leaf(FilterLeaf),
}

impl FilterNode {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        FilterNode::Leaf(FilterLeaf::new(field, operator, value))
    }

    pub fn group(boolean: Boolean, nested: Vec<FilterNode>) -> Self {
        FilterNode::Group(FilterGroup { boolean, nested })
    }

    pub fn boolean(&self) -> Boolean {
        match self {
            FilterNode::Leaf(leaf) => leaf.boolean,
            FilterNode::Group(group) => group.boolean,
        }
    }

    /// Number of group levels from this node down to its deepest leaf.
    pub fn depth(&self) -> usize {
        match self {
            FilterNode::Leaf(_) => 0,
            FilterNode::Group(group) => {
                1 + group.nested.iter().map(FilterNode::depth).max().unwrap_or(0)
            }
        }
    }
}

impl From<FilterLeaf> for FilterNode {
    fn from(leaf: FilterLeaf) -> Self {
        FilterNode::Leaf(leaf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,

    #[serde(default)]
    pub direction: SortDirection,
}

impl SortDescriptor {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Full-text search across the resource's searchable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDescriptor {
    #[serde(default)]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
}

impl SearchDescriptor {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            case_sensitive: None,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<Value>,
}

impl ScopeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Value>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }
}

/// Requested page. `number` and `cursor` are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_total_count: Option<bool>,
}

impl PageRequest {
    pub fn size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_total(mut self) -> Self {
        self.include_total_count = Some(true);
        self
    }
}

/// A complete, typed search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub scopes: Vec<ScopeDescriptor>,
    pub filters: Vec<FilterNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchDescriptor>,
    pub sort: Vec<SortDescriptor>,
    pub page: PageRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, node: impl Into<FilterNode>) -> Self {
        self.filters.push(node.into());
        self
    }

    pub fn scope(mut self, scope: ScopeDescriptor) -> Self {
        self.scopes.push(scope);
        self
    }

    pub fn search(mut self, search: SearchDescriptor) -> Self {
        self.search = Some(search);
        self
    }

    pub fn sort(mut self, sort: SortDescriptor) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn include(mut self, include: impl Into<String>) -> Self {
        self.include = Some(include.into());
        self
    }

    /// Deepest group nesting across all filters.
    pub fn filter_depth(&self) -> usize {
        self.filters.iter().map(FilterNode::depth).max().unwrap_or(0)
    }
}

/// Parse a filter value as a timestamp.
///
/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// RFC 3339. RFC 3339 values keep their wall-clock time so a midnight in
/// any offset is still recognised as a whole day.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(timestamp);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.naive_local())
}

/// The calendar day of a timestamp value whose time of day is zero.
pub fn midnight_date(value: &Value) -> Option<NaiveDate> {
    let timestamp = parse_timestamp(value.as_str()?)?;
    (timestamp.time() == NaiveTime::MIN).then(|| timestamp.date())
}
