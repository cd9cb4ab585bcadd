//! Search configuration loaded from environment variables or TOML.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level search configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum allowed depth of nested filter groups (default: 15).
    pub max_nested_depth: usize,

    /// Pagination settings.
    pub pagination: PaginationConfig,

    /// Full-text search settings.
    pub search: SearchSettings,

    /// PostgreSQL statement timeout per search, in milliseconds (default: 10000).
    pub statement_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_nested_depth: 15,
            pagination: PaginationConfig::default(),
            search: SearchSettings::default(),
            statement_timeout_ms: 10_000,
        }
    }
}

/// Pagination method used when the resource does not override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMethod {
    /// Page-number pagination when a page number is supplied, cursor otherwise.
    #[default]
    Combined,
    /// Always page-number (offset) pagination.
    Paginate,
    /// Always cursor pagination.
    Cursor,
}

impl FromStr for PaginationMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "combined" => Ok(Self::Combined),
            "paginate" => Ok(Self::Paginate),
            "cursor" | "cursorPaginate" => Ok(Self::Cursor),
            other => anyhow::bail!("unknown pagination method '{other}'"),
        }
    }
}

/// Pagination configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Largest page size a client may request (default: 30).
    pub max_size: u64,

    /// Page size when the client does not ask for one (default: 30).
    pub default_size: u64,

    /// Name of the pagination payload key (default: "page").
    pub pagination_parameter: String,

    /// Key of the page number inside the pagination object (default: "number").
    pub number_parameter: String,

    /// Key of the page size inside the pagination object (default: "size").
    pub size_parameter: String,

    /// Key of the cursor inside the pagination object (default: "cursor").
    pub cursor_parameter: String,

    /// Default pagination method (default: combined).
    pub method: PaginationMethod,

    /// Emit relative pagination links (default: true).
    pub use_relative_urls: bool,

    /// Include exact totals unless the client opts out (default: false).
    pub include_total_count_by_default: bool,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_size: 30,
            default_size: 30,
            pagination_parameter: "page".to_string(),
            number_parameter: "number".to_string(),
            size_parameter: "size".to_string(),
            cursor_parameter: "cursor".to_string(),
            method: PaginationMethod::Combined,
            use_relative_urls: true,
            include_total_count_by_default: false,
        }
    }
}

/// Full-text search settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Whether search is case sensitive when the client does not say (default: false).
    pub case_sensitive_default: bool,
}

impl SearchConfig {
    /// Load configuration from `RESOURCE_SEARCH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let pagination = defaults.pagination;

        let max_nested_depth = parse_var("RESOURCE_SEARCH_MAX_NESTED_DEPTH", defaults.max_nested_depth)?;

        let max_size = parse_var("RESOURCE_SEARCH_PAGE_MAX_SIZE", pagination.max_size)?;
        let default_size = parse_var("RESOURCE_SEARCH_PAGE_DEFAULT_SIZE", pagination.default_size)?;
        let method = parse_var("RESOURCE_SEARCH_PAGE_METHOD", pagination.method)?;
        let use_relative_urls =
            parse_var("RESOURCE_SEARCH_PAGE_RELATIVE_URLS", pagination.use_relative_urls)?;
        let include_total_count_by_default = parse_var(
            "RESOURCE_SEARCH_PAGE_INCLUDE_TOTAL_COUNT",
            pagination.include_total_count_by_default,
        )?;

        let pagination_parameter = env::var("RESOURCE_SEARCH_PAGE_PARAMETER")
            .unwrap_or(pagination.pagination_parameter);
        let number_parameter = env::var("RESOURCE_SEARCH_PAGE_NUMBER_PARAMETER")
            .unwrap_or(pagination.number_parameter);
        let size_parameter =
            env::var("RESOURCE_SEARCH_PAGE_SIZE_PARAMETER").unwrap_or(pagination.size_parameter);
        let cursor_parameter = env::var("RESOURCE_SEARCH_PAGE_CURSOR_PARAMETER")
            .unwrap_or(pagination.cursor_parameter);

        let case_sensitive_default = parse_var(
            "RESOURCE_SEARCH_CASE_SENSITIVE",
            defaults.search.case_sensitive_default,
        )?;

        let statement_timeout_ms = parse_var(
            "RESOURCE_SEARCH_STATEMENT_TIMEOUT_MS",
            defaults.statement_timeout_ms,
        )?;

        let config = Self {
            max_nested_depth,
            pagination: PaginationConfig {
                max_size,
                default_size,
                pagination_parameter,
                number_parameter,
                size_parameter,
                cursor_parameter,
                method,
                use_relative_urls,
                include_total_count_by_default,
            },
            search: SearchSettings {
                case_sensitive_default,
            },
            statement_timeout_ms,
        };
        config.check()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).context("invalid search configuration")?;
        config.check()?;
        Ok(config)
    }

    /// Reject configurations that would make every request fail.
    fn check(&self) -> Result<()> {
        if self.pagination.max_size == 0 {
            anyhow::bail!("pagination.max_size must be at least 1");
        }
        if self.statement_timeout_ms == 0 {
            anyhow::bail!("statement_timeout_ms must be at least 1");
        }
        if self.pagination.default_size == 0 {
            anyhow::bail!("pagination.default_size must be at least 1");
        }
        for name in [
            &self.pagination.pagination_parameter,
            &self.pagination.number_parameter,
            &self.pagination.size_parameter,
            &self.pagination.cursor_parameter,
        ] {
            if name.is_empty() {
                anyhow::bail!("pagination parameter names must not be empty");
            }
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{name} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}
