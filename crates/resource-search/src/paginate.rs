//! Pagination strategy selection and page assembly.
//!
//! [`PaginationSelector::resolve`] turns a page request into a [`PagePlan`].
//! The plan windows the query (offset or keyset), and after execution turns
//! the fetched rows into a [`Page`] with `has_more`, an optional exact total,
//! the next cursor and navigation links.
//!
//! Both modes fetch one row more than the page size; the extra row only
//! signals that another page exists and is never returned.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::compile::{Comparison, Operand, OrderBy, Predicate, QueryTarget};
use crate::config::{PaginationConfig, PaginationMethod};
use crate::descriptor::{Boolean, PageRequest, SortDirection};
use crate::error::SearchError;
use crate::schema::Column;

/// How a resource paginates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// Page numbers, `LIMIT`/`OFFSET`.
    Offset,
    /// Opaque cursors over the ordering columns.
    Cursor,
    /// Offset when the client supplies a page number, cursor otherwise.
    #[default]
    Auto,
}

impl From<PaginationMethod> for PaginationMode {
    fn from(method: PaginationMethod) -> Self {
        match method {
            PaginationMethod::Combined => PaginationMode::Auto,
            PaginationMethod::Paginate => PaginationMode::Offset,
            PaginationMethod::Cursor => PaginationMode::Cursor,
        }
    }
}

/// Per-resource pagination options layered over the global config.
#[derive(Debug, Clone)]
pub struct PaginationOptions<'a> {
    pub config: &'a PaginationConfig,
    pub mode: PaginationMode,
    pub allow_exact_totals: bool,
    pub include_exact_total_by_default: bool,
    /// Final tie-breaking ordering for cursor pages.
    pub key: Column,
    /// Prefix for absolute links; ignored when the config asks for relative ones.
    pub base_url: Option<String>,
}

impl<'a> PaginationOptions<'a> {
    pub fn new(config: &'a PaginationConfig, key: Column) -> Self {
        Self {
            config,
            mode: config.method.into(),
            allow_exact_totals: false,
            include_exact_total_by_default: false,
            key,
            base_url: None,
        }
    }

    pub fn exact_totals(mut self, allowed: bool, by_default: bool) -> Self {
        self.allow_exact_totals = allowed;
        self.include_exact_total_by_default = by_default;
        self
    }

    pub fn mode(mut self, mode: PaginationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

pub struct PaginationSelector;

impl PaginationSelector {
    /// Pick the page size, mode and total policy for one request.
    pub fn resolve(request: &PageRequest, options: &PaginationOptions<'_>) -> PagePlan {
        let config = options.config;
        let default_size = config.default_size.clamp(1, config.max_size.max(1));

        let size = match request.size {
            None | Some(0) => default_size,
            Some(requested) if requested > config.max_size => {
                warn!(
                    requested = requested,
                    capped = config.max_size,
                    "page size exceeds maximum, capping"
                );
                config.max_size.max(1)
            }
            Some(requested) => requested,
        };

        let mode = match options.mode {
            PaginationMode::Auto if request.number.is_some() => PaginationMode::Offset,
            PaginationMode::Auto => PaginationMode::Cursor,
            explicit => explicit,
        };

        let want_exact_total = options.allow_exact_totals
            && request
                .include_total_count
                .unwrap_or(options.include_exact_total_by_default);

        let base = if config.use_relative_urls {
            String::new()
        } else {
            options.base_url.clone().unwrap_or_default()
        };

        PagePlan {
            mode,
            size,
            number: request.number.unwrap_or(1).max(1),
            cursor: request.cursor.clone(),
            want_exact_total,
            key: options.key.clone(),
            keys: Vec::new(),
            links: LinkBuilder {
                base,
                page: config.pagination_parameter.clone(),
                number: config.number_parameter.clone(),
                size: config.size_parameter.clone(),
                cursor: config.cursor_parameter.clone(),
                query: Vec::new(),
            },
        }
    }
}

/// A resolved pagination decision for one request.
#[derive(Debug, Clone)]
pub struct PagePlan {
    mode: PaginationMode,
    size: u64,
    number: u64,
    cursor: Option<String>,
    want_exact_total: bool,
    key: Column,
    keys: Vec<OrderBy>,
    links: LinkBuilder,
}

impl PagePlan {
    /// `Offset` or `Cursor`, never `Auto`.
    pub fn mode(&self) -> PaginationMode {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn want_exact_total(&self) -> bool {
        self.want_exact_total
    }

    /// Ordering columns a cursor is built from, once applied.
    pub fn cursor_keys(&self) -> &[OrderBy] {
        &self.keys
    }

    /// Carry the request's other parameters into the page links.
    ///
    /// `input` is the request as received; its page number, size and cursor
    /// are left out since every link sets its own.
    pub fn keep_query(&mut self, input: &Value) {
        let own = [&self.links.number, &self.links.size, &self.links.cursor]
            .map(|key| format!("{}[{key}]", self.links.page));
        let mut pairs = Vec::new();
        flatten_query(input, String::new(), &mut pairs);
        pairs.retain(|(key, _)| !own.contains(key));
        self.links.query = pairs;
    }

    /// Window `query` to this page.
    pub fn apply<Q: QueryTarget>(&mut self, query: &mut Q) -> Result<(), SearchError> {
        match self.mode {
            PaginationMode::Cursor => self.apply_cursor(query)?,
            _ => {
                query.offset((self.number - 1).saturating_mul(self.size));
            }
        }
        query.limit(self.size.saturating_add(1));
        Ok(())
    }

    fn apply_cursor<Q: QueryTarget>(&mut self, query: &mut Q) -> Result<(), SearchError> {
        if let Some(foreign) = query
            .orderings()
            .iter()
            .find(|ordering| ordering.column.table != query.table())
        {
            return Err(SearchError::InvalidRelation {
                path: foreign.column.qualified(),
                reason: "cursor pagination can only order by columns of the queried table"
                    .to_string(),
            });
        }

        if !query
            .orderings()
            .iter()
            .any(|ordering| ordering.column == self.key)
        {
            query.order_by(self.key.clone(), SortDirection::Asc);
        }
        self.keys = query.orderings().to_vec();

        let Some(cursor) = self.cursor.as_deref().filter(|cursor| !cursor.is_empty()) else {
            return Ok(());
        };
        let values = decode_cursor(cursor, self.keys.len())?;
        debug!(keys = self.keys.len(), "applying cursor");

        // Ascending keys sort nulls last, descending keys nulls first. A null
        // cursor value on an ascending key leaves nothing after it on that key.
        let keys = self.keys.clone();
        if keys
            .iter()
            .zip(&values)
            .all(|(ordering, value)| value.is_null() && ordering.direction == SortDirection::Asc)
        {
            return Err(SearchError::InvalidCursor);
        }

        query.group(Boolean::And, |any| {
            for (position, ordering) in keys.iter().enumerate() {
                let value = &values[position];
                if value.is_null() && ordering.direction == SortDirection::Asc {
                    continue;
                }
                any.group(Boolean::Or, |all| {
                    for (previous, value) in keys.iter().zip(&values).take(position) {
                        all.apply(same(&previous.column, value), Boolean::And);
                    }
                    match (ordering.direction, value.is_null()) {
                        (SortDirection::Desc, true) => {
                            all.apply(null(&ordering.column, true), Boolean::And);
                        }
                        (SortDirection::Desc, false) => {
                            let before = compare(&ordering.column, Comparison::Lt, value);
                            all.apply(before, Boolean::And);
                        }
                        (SortDirection::Asc, _) => {
                            all.group(Boolean::And, |after| {
                                let later = compare(&ordering.column, Comparison::Gt, value);
                                after.apply(later, Boolean::And);
                                after.apply(null(&ordering.column, false), Boolean::Or);
                                Ok(())
                            })?;
                        }
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }

    /// Assemble the page from the fetched rows.
    ///
    /// `rows` may hold the look-ahead row; `total` is the exact count when one
    /// was computed.
    pub fn finish(&self, mut rows: Vec<Value>, total: Option<u64>) -> Page<Value> {
        let window = usize::try_from(self.size).unwrap_or(usize::MAX);
        let has_more = rows.len() > window;
        rows.truncate(window);

        let total = total.filter(|_| self.want_exact_total);
        let (next_cursor, current_page, links) = match self.mode {
            PaginationMode::Cursor => {
                let next_cursor = rows
                    .last()
                    .filter(|_| has_more)
                    .map(|row| encode_cursor(row, &self.keys));
                let links = PageLinks {
                    next: next_cursor
                        .as_deref()
                        .map(|cursor| self.links.cursor(cursor, self.size)),
                    prev: None,
                };
                (next_cursor, None, links)
            }
            _ => {
                let links = PageLinks {
                    next: has_more.then(|| self.links.number(self.number + 1, self.size)),
                    prev: (self.number > 1).then(|| self.links.number(self.number - 1, self.size)),
                };
                (None, Some(self.number), links)
            }
        };

        Page {
            data: rows,
            meta: PageMeta {
                per_page: self.size,
                has_more,
                next_cursor,
                current_page,
                total,
            },
            links,
        }
    }
}

fn compare(column: &Column, op: Comparison, value: &Value) -> Predicate {
    Predicate::Compare {
        operand: Operand::Column(column.clone()),
        op,
        value: value.clone(),
    }
}

/// `column IS NULL` when `value` is null, `column = value` otherwise.
fn same(column: &Column, value: &Value) -> Predicate {
    if value.is_null() {
        null(column, false)
    } else {
        compare(column, Comparison::Eq, value)
    }
}

fn null(column: &Column, negated: bool) -> Predicate {
    Predicate::Null {
        column: column.clone(),
        negated,
    }
}

/// Cursor for the row after `row`: base64url JSON of its ordering values.
fn encode_cursor(row: &Value, keys: &[OrderBy]) -> String {
    let values: Vec<Value> = keys
        .iter()
        .map(|key| row.get(&key.column.name).cloned().unwrap_or(Value::Null))
        .collect();
    URL_SAFE_NO_PAD.encode(Value::Array(values).to_string())
}

fn decode_cursor(cursor: &str, expected: usize) -> Result<Vec<Value>, SearchError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| SearchError::InvalidCursor)?;
    let values: Vec<Value> =
        serde_json::from_slice(&bytes).map_err(|_| SearchError::InvalidCursor)?;
    if values.len() != expected {
        return Err(SearchError::InvalidCursor);
    }
    Ok(values)
}

/// `{"filter": {"title": "a"}}` becomes `("filter[title]", "a")`. Nulls are
/// dropped.
fn flatten_query(value: &Value, key: String, pairs: &mut Vec<(String, String)>) {
    let nested = |child: &str| {
        if key.is_empty() {
            child.to_string()
        } else {
            format!("{key}[{child}]")
        }
    };
    match value {
        Value::Null => {}
        Value::Object(object) => {
            for (child, value) in object {
                flatten_query(value, nested(child), pairs);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_query(value, nested(&index.to_string()), pairs);
            }
        }
        Value::String(raw) => pairs.push((key, raw.clone())),
        scalar => pairs.push((key, scalar.to_string())),
    }
}

#[derive(Debug, Clone)]
struct LinkBuilder {
    base: String,
    page: String,
    number: String,
    size: String,
    cursor: String,
    /// Other request parameters, already flattened.
    query: Vec<(String, String)>,
}

impl LinkBuilder {
    fn number(&self, number: u64, size: u64) -> String {
        let link = format!(
            "{}?{}={number}&{}={size}",
            self.base,
            self.param(&self.number),
            self.param(&self.size)
        );
        self.with_query(link)
    }

    fn cursor(&self, cursor: &str, size: u64) -> String {
        let link = format!(
            "{}?{}={}&{}={size}",
            self.base,
            self.param(&self.cursor),
            urlencoding::encode(cursor),
            self.param(&self.size)
        );
        self.with_query(link)
    }

    fn with_query(&self, mut link: String) -> String {
        for (key, value) in &self.query {
            link.push('&');
            link.push_str(&urlencoding::encode(key));
            link.push('=');
            link.push_str(&urlencoding::encode(value));
        }
        link
    }

    /// `page[number]`, percent-encoded.
    fn param(&self, key: &str) -> String {
        urlencoding::encode(&format!("{}[{key}]", self.page)).into_owned()
    }
}

/// Response envelope: `{ data, meta, links }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
    pub links: PageLinks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub per_page: u64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    pub next: Option<String>,
    pub prev: Option<String>,
}
