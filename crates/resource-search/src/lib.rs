//! Declarative, allow-listed search over relational resources.
//!
//! A resource owner whitelists filters, sorts and scopes; untrusted request
//! payloads are validated against that allow-list, compiled onto a relational
//! query object and paginated. The `resource-search` binary explains and
//! runs searches from YAML resource files.

pub mod basic;
pub mod compile;
pub mod config;
pub mod descriptor;
pub mod directive;
pub mod error;
pub mod paginate;
pub mod relation;
pub mod resource;
pub mod schema;
pub mod service;
pub mod validate;

pub use basic::BasicSearchAdapter;
pub use compile::{QueryCompiler, QueryTarget, ScopeHandlers, SeaQuery};
pub use config::SearchConfig;
pub use descriptor::SearchRequest;
pub use error::{SearchError, SearchResult, ValidationReport};
pub use paginate::{Page, PagePlan, PaginationMode, PaginationSelector};
pub use resource::{DeclaredResource, ResourceFile, ResourceSearch, SearchableResource};
pub use schema::Schema;
pub use service::PgSearchService;
