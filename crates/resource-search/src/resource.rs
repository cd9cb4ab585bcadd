//! Searchable resources and per-resource orchestration.
//!
//! A [`SearchableResource`] is the owner's declaration of what may be queried.
//! [`ResourceSearch`] is built from it once, checked against the schema, and
//! then drives validate → compile → paginate for every request.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::basic::BasicSearchAdapter;
use crate::compile::{QueryCompiler, QueryTarget};
use crate::config::{PaginationMethod, SearchConfig};
use crate::descriptor::SearchRequest;
use crate::directive::{Directive, Registries};
use crate::error::SearchError;
use crate::paginate::{Page, PagePlan, PaginationOptions, PaginationSelector};
use crate::relation::{RelationsResolver, requested_relations};
use crate::schema::{EntityMeta, Schema};
use crate::validate::DescriptorValidator;

/// What a resource exposes for searching.
pub trait SearchableResource: Send + Sync {
    /// Schema entity the resource reads.
    fn entity(&self) -> &str;

    /// Fields matched by full-text search; may be relation paths.
    fn searchable_by(&self) -> Vec<String> {
        Vec::new()
    }

    fn allowed_scopes(&self) -> Vec<Directive> {
        Vec::new()
    }

    fn allowed_sorts(&self) -> Vec<Directive> {
        Vec::new()
    }

    fn allowed_filters(&self) -> Vec<Directive> {
        Vec::new()
    }

    /// Relations a client may ask to load. `orders.*` admits anything below `orders`.
    fn allowed_includes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Relations loaded on every request.
    fn always_include(&self) -> Vec<String> {
        Vec::new()
    }

    fn allows_exact_totals(&self) -> bool {
        false
    }

    /// Only honoured when [`Self::allows_exact_totals`] is true.
    fn includes_exact_total_count_by_default(&self) -> bool {
        false
    }

    /// Overrides the configured pagination method.
    fn pagination_method(&self) -> Option<PaginationMethod> {
        None
    }
}

/// A resource declared in YAML or JSON rather than in code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaredResource {
    pub entity: String,
    pub searchable_by: Vec<String>,
    pub scopes: Vec<Directive>,
    pub sorts: Vec<Directive>,
    pub filters: Vec<Directive>,
    pub allowed_includes: Vec<String>,
    pub always_include: Vec<String>,
    pub allows_exact_totals: bool,
    pub includes_exact_total_count_by_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMethod>,
}

impl SearchableResource for DeclaredResource {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn searchable_by(&self) -> Vec<String> {
        self.searchable_by.clone()
    }

    fn allowed_scopes(&self) -> Vec<Directive> {
        self.scopes.clone()
    }

    fn allowed_sorts(&self) -> Vec<Directive> {
        self.sorts.clone()
    }

    fn allowed_filters(&self) -> Vec<Directive> {
        self.filters.clone()
    }

    fn allowed_includes(&self) -> Vec<String> {
        self.allowed_includes.clone()
    }

    fn always_include(&self) -> Vec<String> {
        self.always_include.clone()
    }

    fn allows_exact_totals(&self) -> bool {
        self.allows_exact_totals
    }

    fn includes_exact_total_count_by_default(&self) -> bool {
        self.includes_exact_total_count_by_default
    }

    fn pagination_method(&self) -> Option<PaginationMethod> {
        self.pagination
    }
}

/// A schema and one resource over it, as loaded by the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceFile {
    pub schema: Schema,
    pub resource: DeclaredResource,
}

impl ResourceFile {
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let file: Self = serde_yml::from_str(source).context("failed to parse resource file")?;
        Ok(Self {
            schema: file.schema.validated()?,
            resource: file.resource,
        })
    }
}

/// Everything a request compiled to, before execution.
#[derive(Debug, Clone)]
pub struct PreparedSearch<Q> {
    pub request: SearchRequest,
    pub plan: PagePlan,
    /// Relations to load and keep in the response.
    pub relations: BTreeSet<String>,
    /// The filtered query without its page window, for an exact total.
    pub count_query: Option<Q>,
}

/// One resource, checked and ready to serve searches.
#[derive(Debug, Clone)]
pub struct ResourceSearch {
    entity: String,
    schema: Arc<Schema>,
    config: Arc<SearchConfig>,
    registries: Registries,
    searchable_by: Vec<String>,
    allowed_includes: Vec<String>,
    always_include: Vec<String>,
    allows_exact_totals: bool,
    includes_exact_total_by_default: bool,
    pagination: Option<PaginationMethod>,
}

impl ResourceSearch {
    /// Build registries and check every path the resource names.
    ///
    /// Fails with `InvalidModel` when the entity or a searchable path does not
    /// exist, and with `InvalidDirective` for malformed or unresolvable
    /// directives.
    pub fn new(
        resource: &dyn SearchableResource,
        schema: Arc<Schema>,
        config: Arc<SearchConfig>,
    ) -> Result<Self, SearchError> {
        let registries = Registries::new(
            resource.allowed_filters(),
            resource.allowed_sorts(),
            resource.allowed_scopes(),
        )?;

        let entity = schema.require(resource.entity())?;
        let resolver = RelationsResolver::new(&schema);

        let searchable_by = resource.searchable_by();
        for path in &searchable_by {
            resolver.resolve(entity, path).map_err(|err| {
                SearchError::InvalidModel(format!(
                    "searchable field '{path}' of '{}': {err}",
                    entity.name
                ))
            })?;
        }

        let directive_paths = registries
            .filters
            .iter()
            .map(|filter| ("filter", filter.name(), filter.internal_name()))
            .chain(
                registries
                    .sorts
                    .iter()
                    .map(|sort| ("sort", sort.name(), sort.internal_name())),
            );
        for (capability, name, internal) in directive_paths {
            resolver.resolve(entity, internal).map_err(|err| {
                SearchError::InvalidDirective(format!("{capability} '{name}': {err}"))
            })?;
        }

        Ok(Self {
            entity: entity.name.clone(),
            schema: Arc::clone(&schema),
            config,
            registries,
            searchable_by,
            allowed_includes: resource.allowed_includes(),
            always_include: resource.always_include(),
            allows_exact_totals: resource.allows_exact_totals(),
            includes_exact_total_by_default: resource.includes_exact_total_count_by_default(),
            pagination: resource.pagination_method(),
        })
    }

    pub fn entity(&self) -> Result<&EntityMeta, SearchError> {
        self.schema.require(&self.entity)
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn validate(&self, payload: &Value) -> Result<SearchRequest, SearchError> {
        DescriptorValidator::new(&self.registries, &self.config).validate(payload)
    }

    /// Apply scopes, filters, search and sort; no pagination.
    pub fn compile<Q: QueryTarget>(
        &self,
        query: &mut Q,
        request: &SearchRequest,
    ) -> Result<(), SearchError> {
        let entity = self.entity()?;
        QueryCompiler::new(
            entity,
            RelationsResolver::new(&self.schema),
            &self.registries,
            &self.searchable_by,
            &self.config,
        )
        .compile(query, request)
    }

    pub fn pagination_options(&self) -> Result<PaginationOptions<'_>, SearchError> {
        let key = self.entity()?.key_column();
        let mut options = PaginationOptions::new(&self.config.pagination, key)
            .exact_totals(self.allows_exact_totals, self.includes_exact_total_by_default);
        if let Some(method) = self.pagination {
            options = options.mode(method.into());
        }
        Ok(options)
    }

    /// Validate a raw payload and prepare `query` for execution.
    pub fn prepare<Q>(&self, query: &mut Q, payload: &Value) -> Result<PreparedSearch<Q>, SearchError>
    where
        Q: QueryTarget + Clone,
    {
        let request = self.validate(payload)?;
        let mut prepared = self.prepare_request(query, request)?;
        prepared.plan.keep_query(payload);
        Ok(prepared)
    }

    /// Like [`prepare`](Self::prepare) for basic query-string input; page
    /// links repeat the basic parameters.
    pub fn prepare_basic<Q>(&self, query: &mut Q, input: &Value) -> Result<PreparedSearch<Q>, SearchError>
    where
        Q: QueryTarget + Clone,
    {
        let payload = BasicSearchAdapter::new().to_advanced(input);
        let mut prepared = self.prepare(query, &payload)?;
        prepared.plan.keep_query(input);
        Ok(prepared)
    }

    /// Prepare `query` from an already typed request.
    pub fn prepare_request<Q>(
        &self,
        query: &mut Q,
        request: SearchRequest,
    ) -> Result<PreparedSearch<Q>, SearchError>
    where
        Q: QueryTarget + Clone,
    {
        self.compile(query, &request)?;

        let mut plan = PaginationSelector::resolve(&request.page, &self.pagination_options()?);
        let count_query = plan.want_exact_total().then(|| query.clone());
        plan.apply(query)?;

        let relations = requested_relations(
            request.include.as_deref(),
            &self.allowed_includes,
            &self.always_include,
        );

        Ok(PreparedSearch {
            request,
            plan,
            relations,
            count_query,
        })
    }

    /// Build the response page from executed rows.
    ///
    /// Relations present on the rows but not requested are stripped.
    pub fn finish<Q>(
        &self,
        prepared: &PreparedSearch<Q>,
        mut rows: Vec<Value>,
        total: Option<u64>,
    ) -> Result<Page<Value>, SearchError> {
        let entity = self.entity()?;
        RelationsResolver::new(&self.schema).guard_loaded_relations_for_collection(
            entity,
            &mut rows,
            &prepared.relations,
        );
        Ok(prepared.plan.finish(rows, total))
    }
}
