//! Testing helpers for resource-search.
//!
//! [`MemoryQuery`] runs compiled searches over in-memory JSON rows so result
//! sets can be checked without a database. The post fixtures mirror a small
//! blog: posts with a publish date, their authors and tags.

pub mod fixtures;
pub mod memory;

pub use fixtures::{
    PostResource, execute, execute_basic, post_schema, post_scopes, post_search, posts_dataset,
    posts_query,
};
pub use memory::{Dataset, MemoryQuery, like};

/// Assertion helpers for search responses.
pub mod assert {
    use resource_search::paginate::Page;
    use serde_json::Value;

    /// The `id` of every row on the page, in order.
    pub fn ids(page: &Page<Value>) -> Vec<i64> {
        page.data
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .collect()
    }

    /// Assert that a page holds exactly the rows with `expected` ids.
    pub fn page_ids(page: &Page<Value>, expected: &[i64]) {
        assert_eq!(
            ids(page),
            expected,
            "unexpected page rows: {}",
            serde_json::to_string(&page.data).unwrap_or_default()
        );
    }

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }
}
