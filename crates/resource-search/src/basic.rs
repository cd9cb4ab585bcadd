//! Basic (query-string) search.
//!
//! Converts the compact form used in URLs into the structured payload the
//! validator expects:
//!
//! - `sort=-published_at,title` becomes descending/ascending sort descriptors
//! - `q=text` becomes `search.value`
//! - `filter[field]=a,b*` becomes filter leaves, with `*` as the wildcard
//!
//! Every other key passes through untouched.

use serde_json::{Map, Value, json};

/// Stateless converter from basic to structured search input.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSearchAdapter;

impl BasicSearchAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Convert basic input into a structured payload.
    pub fn to_advanced(&self, input: &Value) -> Value {
        let Some(object) = input.as_object() else {
            return input.clone();
        };
        let mut output = object.clone();

        if let Some(Value::String(sort)) = object.get("sort") {
            output.insert("sort".to_string(), adapt_sort(sort));
        }
        if let Some(Value::String(q)) = object.get("q") {
            output.insert("search".to_string(), json!({ "value": q }));
        }
        if let Some(Value::Object(filters)) = object.get("filter") {
            output.insert("filters".to_string(), adapt_filters(filters));
        }

        Value::Object(output)
    }

    /// Parse a raw query string, folding `key[sub]=value` pairs into objects.
    ///
    /// Values stay strings; the validator accepts numeric and boolean strings.
    pub fn parse_query_string(&self, raw: &str) -> Value {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut output = Map::new();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let value = Value::String(value.into_owned());
            match split_bracketed(&key) {
                Some((outer, inner)) => {
                    let entry = output
                        .entry(outer.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    if let Some(nested) = entry.as_object_mut() {
                        nested.insert(inner.to_string(), value);
                    }
                }
                None => {
                    output.insert(key.into_owned(), value);
                }
            }
        }

        Value::Object(output)
    }
}

/// `page[size]` → `("page", "size")`.
fn split_bracketed(key: &str) -> Option<(&str, &str)> {
    let (outer, rest) = key.split_once('[')?;
    let inner = rest.strip_suffix(']')?;
    (!outer.is_empty() && !inner.is_empty() && !inner.contains(['[', ']'])).then_some((outer, inner))
}

fn adapt_sort(sorts: &str) -> Value {
    sorts
        .split(',')
        .map(|sort| match sort.strip_prefix('-') {
            Some(field) => json!({ "field": field, "direction": "desc" }),
            None => json!({ "field": sort, "direction": "asc" }),
        })
        .collect()
}

fn adapt_filters(filters: &Map<String, Value>) -> Value {
    filters
        .iter()
        .filter_map(|(field, raw)| {
            let raw = match raw {
                Value::String(raw) => raw.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            Some(adapt_filter(field, &raw))
        })
        .collect()
}

fn adapt_filter(field: &str, raw: &str) -> Value {
    let values: Vec<String> = raw.split(',').map(|value| value.replace('*', "%")).collect();

    // `filter[field]=*` asks for any non-null value.
    if let [only] = values.as_slice()
        && only == "%"
    {
        return json!({ "field": field, "operator": "!=", "value": null });
    }

    if values.len() > 1 && values.iter().any(|value| value.contains('%')) {
        let nested: Vec<Value> = values
            .iter()
            .map(|value| {
                json!({
                    "field": field,
                    "operator": "like",
                    "value": filter_value(value),
                    "type": "or",
                })
            })
            .collect();
        return json!({ "type": "and", "nested": nested });
    }

    match values.as_slice() {
        [only] => {
            let operator = if only.contains('%') { "like" } else { "=" };
            json!({ "field": field, "operator": operator, "value": filter_value(only) })
        }
        _ => json!({
            "field": field,
            "operator": "in",
            "value": values.iter().map(|value| filter_value(value)).collect::<Vec<_>>(),
        }),
    }
}

/// Empty strings mean null.
fn filter_value(value: &str) -> Value {
    if value.is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn adapt(input: Value) -> Value {
        BasicSearchAdapter::new().to_advanced(&input)
    }

    #[test]
    fn sort_prefix_sets_direction() {
        let output = adapt(json!({"sort": "-published_at,title"}));
        assert_eq!(
            output["sort"],
            json!([
                {"field": "published_at", "direction": "desc"},
                {"field": "title", "direction": "asc"}
            ])
        );
    }

    #[test]
    fn q_becomes_search_value() {
        assert_eq!(adapt(json!({"q": "rust"}))["search"], json!({"value": "rust"}));
    }

    #[test]
    fn wildcard_list_becomes_or_group_of_likes() {
        let output = adapt(json!({"filter": {"title": "*very*,*less*"}}));
        assert_eq!(
            output["filters"],
            json!([{
                "type": "and",
                "nested": [
                    {"field": "title", "operator": "like", "value": "%very%", "type": "or"},
                    {"field": "title", "operator": "like", "value": "%less%", "type": "or"}
                ]
            }])
        );
    }

    #[test]
    fn single_values() {
        let output = adapt(json!({"filter": {"a": "*", "b": "x*", "c": "x", "d": ""}}));
        assert_eq!(
            output["filters"],
            json!([
                {"field": "a", "operator": "!=", "value": null},
                {"field": "b", "operator": "like", "value": "x%"},
                {"field": "c", "operator": "=", "value": "x"},
                {"field": "d", "operator": "=", "value": null}
            ])
        );
    }

    #[test]
    fn plain_list_becomes_in() {
        let output = adapt(json!({"filter": {"status": "draft,,live"}}));
        assert_eq!(
            output["filters"],
            json!([{"field": "status", "operator": "in", "value": ["draft", null, "live"]}])
        );
    }

    #[test]
    fn other_keys_pass_through() {
        let output = adapt(json!({"page": {"size": "2"}, "include": "user"}));
        assert_eq!(output["page"], json!({"size": "2"}));
        assert_eq!(output["include"], "user");
        assert!(output.get("filters").is_none());
    }

    #[test]
    fn query_strings_fold_brackets() {
        let parsed = BasicSearchAdapter::new()
            .parse_query_string("?filter%5Btitle%5D=*very*&page[size]=2&page[number]=1&q=a+b&sort=-title");
        assert_eq!(
            parsed,
            json!({
                "filter": {"title": "*very*"},
                "page": {"size": "2", "number": "1"},
                "q": "a b",
                "sort": "-title"
            })
        );
    }
}
