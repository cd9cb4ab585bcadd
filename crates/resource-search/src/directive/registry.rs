//! Directive registries keyed by external name.
//!
//! Registries are built once per resource definition and shared read-only
//! across requests. Lookups of unknown names return `None`: a client naming
//! something it has no authority to use is an expected outcome, not a fault.

use std::collections::HashMap;

use super::{AllowedFilter, AllowedScope, AllowedSort, Directive};
use crate::error::SearchError;

/// A directive kind that can live in a [`Registry`].
pub trait Registered: Sized {
    /// Capability name used in error messages.
    const CAPABILITY: &'static str;

    /// Take the directive if it has this capability, hand it back otherwise.
    fn from_directive(directive: Directive) -> Result<Self, Directive>;

    fn external_name(&self) -> &str;

    fn internal_name(&self) -> &str;
}

impl Registered for AllowedFilter {
    const CAPABILITY: &'static str = "filter";

    fn from_directive(directive: Directive) -> Result<Self, Directive> {
        match directive {
            Directive::Filter(filter) => Ok(filter),
            other => Err(other),
        }
    }

    fn external_name(&self) -> &str {
        self.name()
    }

    fn internal_name(&self) -> &str {
        AllowedFilter::internal_name(self)
    }
}

impl Registered for AllowedSort {
    const CAPABILITY: &'static str = "sort";

    fn from_directive(directive: Directive) -> Result<Self, Directive> {
        match directive {
            Directive::Sort(sort) => Ok(sort),
            other => Err(other),
        }
    }

    fn external_name(&self) -> &str {
        self.name()
    }

    fn internal_name(&self) -> &str {
        AllowedSort::internal_name(self)
    }
}

impl Registered for AllowedScope {
    const CAPABILITY: &'static str = "scope";

    fn from_directive(directive: Directive) -> Result<Self, Directive> {
        match directive {
            Directive::Scope(scope) => Ok(scope),
            other => Err(other),
        }
    }

    fn external_name(&self) -> &str {
        AllowedScope::external_name(self)
    }

    fn internal_name(&self) -> &str {
        AllowedScope::internal_name(self)
    }
}

/// Immutable lookup of directives of one capability.
#[derive(Debug, Clone)]
pub struct Registry<D> {
    by_name: HashMap<String, usize>,
    directives: Vec<D>,
}

pub type FilterRegistry = Registry<AllowedFilter>;
pub type SortRegistry = Registry<AllowedSort>;
pub type ScopeRegistry = Registry<AllowedScope>;

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            by_name: HashMap::new(),
            directives: Vec::new(),
        }
    }
}

impl<D: Registered> Registry<D> {
    /// Build a registry from a resource's declared directives.
    ///
    /// Fails with [`SearchError::InvalidDirective`] when a directive has the
    /// wrong capability, an external name is declared twice, or a name is not
    /// a safe identifier path.
    pub fn register<I, T>(directives: I) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Directive>,
    {
        let mut registry = Self::default();

        for directive in directives {
            let directive = D::from_directive(directive.into()).map_err(|other| {
                SearchError::InvalidDirective(format!(
                    "allowed {}s must be {} directives, got a {} directive '{}'",
                    D::CAPABILITY,
                    D::CAPABILITY,
                    other.capability(),
                    other.external_name()
                ))
            })?;

            let name = directive.external_name().to_string();
            if name.is_empty() {
                return Err(SearchError::InvalidDirective(format!(
                    "{} directive names must not be empty",
                    D::CAPABILITY
                )));
            }
            if !is_valid_path(directive.internal_name()) {
                return Err(SearchError::InvalidDirective(format!(
                    "{} '{}' has an invalid internal name '{}'",
                    D::CAPABILITY,
                    name,
                    directive.internal_name()
                )));
            }
            if registry.by_name.contains_key(&name) {
                return Err(SearchError::InvalidDirective(format!(
                    "{} '{}' is declared more than once",
                    D::CAPABILITY,
                    name
                )));
            }

            registry.by_name.insert(name, registry.directives.len());
            registry.directives.push(directive);
        }

        Ok(registry)
    }

    /// Look up a directive by the name the client used.
    pub fn get(&self, external_name: &str) -> Option<&D> {
        self.by_name
            .get(external_name)
            .map(|&index| &self.directives[index])
    }

    pub fn contains(&self, external_name: &str) -> bool {
        self.by_name.contains_key(external_name)
    }

    /// External names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.directives.iter().map(|d| d.external_name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.directives.iter()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// The three registries of one resource.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub filters: FilterRegistry,
    pub sorts: SortRegistry,
    pub scopes: ScopeRegistry,
}

impl Registries {
    pub fn new(
        filters: Vec<Directive>,
        sorts: Vec<Directive>,
        scopes: Vec<Directive>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            filters: Registry::register(filters)?,
            sorts: Registry::register(sorts)?,
            scopes: Registry::register(scopes)?,
        })
    }
}

/// Identifier path: dot-separated segments of `[A-Za-z0-9_]`, each starting
/// with a letter or underscore.
pub(crate) fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_valid_identifier)
}

pub(crate) fn is_valid_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 64
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && segment.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = FilterRegistry::register([
            AllowedFilter::string("title"),
            AllowedFilter::timestamp("publish_at"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("title").unwrap().name(), "title");
        assert!(registry.get("colour").is_none());
        assert_eq!(registry.names(), vec!["title", "publish_at"]);
    }

    #[test]
    fn wrong_capability_is_rejected() {
        let directives: Vec<Directive> = vec![
            AllowedFilter::string("title").into(),
            AllowedSort::field("title").into(),
        ];
        let err = FilterRegistry::register(directives).unwrap_err();
        assert!(matches!(err, SearchError::InvalidDirective(_)));
        assert!(err.to_string().contains("got a sort directive"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = SortRegistry::register([AllowedSort::field("title"), AllowedSort::field("title")])
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn unsafe_internal_names_are_rejected() {
        let err = FilterRegistry::register([
            AllowedFilter::string("title").internal("title; DROP TABLE posts")
        ])
        .unwrap_err();
        assert!(matches!(err, SearchError::InvalidDirective(_)));
    }

    #[test]
    fn identifier_paths() {
        assert!(is_valid_path("user.name"));
        assert!(is_valid_path("pivot.created_at"));
        assert!(!is_valid_path("user..name"));
        assert!(!is_valid_path("1user"));
        assert!(!is_valid_path(""));
    }
}
