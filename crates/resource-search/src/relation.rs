//! Relation path resolution and include handling.
//!
//! Filter, search and sort fields may be dotted paths (`user.name`,
//! `user.company.name`, `pivot.created_at`). Every segment but the last names
//! a relation; the last names a column on the entity reached by walking them.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::directive::registry::is_valid_identifier;
use crate::error::SearchError;
use crate::schema::{Column, EntityMeta, JoinKeys, RelationDef, Schema};

/// Segment addressing the join table of the relation being queried.
pub const PIVOT: &str = "pivot";

/// One relation hop of a resolved path.
#[derive(Debug, Clone)]
pub struct ResolvedStep<'s> {
    pub relation: &'s RelationDef,

    /// Related entity; `None` for polymorphic relations.
    pub target: Option<&'s EntityMeta>,

    /// Joins from the parent to the target, qualified. Empty when polymorphic.
    pub joins: Vec<JoinKeys>,
}

impl ResolvedStep<'_> {
    pub fn is_polymorphic(&self) -> bool {
        self.relation.is_polymorphic()
    }

    /// Table the step lands on.
    pub fn table(&self) -> Option<&str> {
        self.target.map(|entity| entity.table.as_str())
    }

    /// Join table of a pivot-through relation.
    pub fn pivot_table(&self) -> Option<&str> {
        self.relation.pivot_table()
    }
}

/// A field reference resolved against the schema.
#[derive(Debug, Clone)]
pub enum RelationPath<'s> {
    /// Column of the entity itself.
    Local { field: String },

    /// Column of the join table of the relation currently being queried.
    Pivot { field: String },

    /// Column reached through one or more relations.
    Related {
        steps: Vec<ResolvedStep<'s>>,
        field: String,
    },
}

impl<'s> RelationPath<'s> {
    pub fn field(&self) -> &str {
        match self {
            RelationPath::Local { field }
            | RelationPath::Pivot { field }
            | RelationPath::Related { field, .. } => field,
        }
    }

    pub fn is_pivot(&self) -> bool {
        matches!(self, RelationPath::Pivot { .. })
    }

    /// Whether any hop crosses a polymorphic relation.
    pub fn is_polymorphic(&self) -> bool {
        match self {
            RelationPath::Related { steps, .. } => steps.iter().any(ResolvedStep::is_polymorphic),
            _ => false,
        }
    }

    /// Entity owning the final column, for related paths.
    pub fn target(&self) -> Option<&'s EntityMeta> {
        match self {
            RelationPath::Related { steps, .. } => steps.last().and_then(|step| step.target),
            _ => None,
        }
    }

    /// Qualified column of a related path.
    pub fn related_column(&self) -> Option<Column> {
        self.target().map(|entity| entity.column(self.field()))
    }
}

/// Resolves dotted paths and relation includes against a schema.
#[derive(Debug, Clone, Copy)]
pub struct RelationsResolver<'s> {
    schema: &'s Schema,
}

impl<'s> RelationsResolver<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    /// Resolve `path` starting from `entity`.
    ///
    /// `pivot.<column>` addresses the join table of the relation being
    /// queried. Walking stops at the first polymorphic relation: whatever
    /// follows cannot be known statically and is kept verbatim as the field.
    pub fn resolve(
        &self,
        entity: &'s EntityMeta,
        path: &str,
    ) -> Result<RelationPath<'s>, SearchError> {
        let segments: Vec<&str> = path.split('.').collect();

        if segments.iter().any(|segment| !is_valid_identifier(segment)) {
            return Err(invalid(path, "not a valid field path"));
        }

        let Some((field, relations)) = segments.split_last() else {
            return Err(invalid(path, "empty field path"));
        };

        if relations.is_empty() {
            return Ok(RelationPath::Local {
                field: (*field).to_string(),
            });
        }

        if relations == [PIVOT] {
            return Ok(RelationPath::Pivot {
                field: (*field).to_string(),
            });
        }

        let mut steps = Vec::with_capacity(relations.len());
        let mut current = entity;

        for (index, name) in relations.iter().enumerate() {
            let relation = current.relation(name).ok_or_else(|| {
                invalid(
                    path,
                    format!("'{name}' is not a relation of '{}'", current.name),
                )
            })?;

            if relation.is_polymorphic() {
                steps.push(ResolvedStep {
                    relation,
                    target: None,
                    joins: Vec::new(),
                });
                return Ok(RelationPath::Related {
                    steps,
                    field: segments[index + 1..].join("."),
                });
            }

            let target = self.schema.related(relation).ok_or_else(|| {
                invalid(
                    path,
                    format!("relation '{name}' targets unknown entity '{}'", relation.entity),
                )
            })?;
            let joins = self
                .schema
                .join_keys(current, relation)
                .unwrap_or_default();

            steps.push(ResolvedStep {
                relation,
                target: Some(target),
                joins,
            });
            current = target;
        }

        Ok(RelationPath::Related {
            steps,
            field: (*field).to_string(),
        })
    }

    /// Strip relations from a serialized row that the client did not request.
    ///
    /// Only keys naming a relation of `entity` are considered; plain columns
    /// and the `pivot` object are always kept. Nested relation objects and
    /// arrays are guarded with the requested sub-paths.
    pub fn guard_loaded_relations(
        &self,
        entity: &EntityMeta,
        row: &mut Value,
        requested: &BTreeSet<String>,
    ) {
        let tree = IncludeTree::from_paths(requested);
        self.guard_row(entity, row, &tree);
    }

    /// [`Self::guard_loaded_relations`] applied to every row.
    pub fn guard_loaded_relations_for_collection(
        &self,
        entity: &EntityMeta,
        rows: &mut [Value],
        requested: &BTreeSet<String>,
    ) {
        let tree = IncludeTree::from_paths(requested);
        for row in rows {
            self.guard_row(entity, row, &tree);
        }
    }

    fn guard_row(&self, entity: &EntityMeta, row: &mut Value, tree: &IncludeTree) {
        let Some(object) = row.as_object_mut() else {
            return;
        };

        for (name, relation) in &entity.relations {
            if name == PIVOT || !object.contains_key(name) {
                continue;
            }

            let Some(subtree) = tree.children.get(name) else {
                object.remove(name);
                continue;
            };

            let Some(related) = self.schema.related(relation) else {
                continue;
            };

            match object.get_mut(name) {
                Some(Value::Array(items)) => {
                    for item in items {
                        self.guard_row(related, item, subtree);
                    }
                }
                Some(nested) if nested.is_object() => self.guard_row(related, nested, subtree),
                _ => {}
            }
        }
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> SearchError {
    SearchError::InvalidRelation {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Requested include paths folded into a tree keyed by relation name.
#[derive(Debug, Default)]
struct IncludeTree {
    children: BTreeMap<String, IncludeTree>,
}

impl IncludeTree {
    fn from_paths(paths: &BTreeSet<String>) -> Self {
        let mut root = Self::default();
        for path in paths {
            let mut node = &mut root;
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                node = node.children.entry(segment.to_string()).or_default();
            }
        }
        root
    }
}

/// Relations to load for a request.
///
/// `include` is the client's comma-separated list. A requested path is kept
/// when it appears in `allowed` or `always`, or when `allowed` holds a
/// wildcard for one of its prefixes (`orders.*` admits `orders.items` and
/// anything deeper). Relations in `always` are added regardless.
pub fn requested_relations(
    include: Option<&str>,
    allowed: &[String],
    always: &[String],
) -> BTreeSet<String> {
    let permitted: BTreeSet<&str> = allowed
        .iter()
        .chain(always)
        .map(String::as_str)
        .collect();

    let mut relations: BTreeSet<String> = include
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|requested| !requested.is_empty())
        .filter(|requested| {
            if permitted.contains(requested) {
                return true;
            }
            if !requested.contains('.') {
                return false;
            }

            let mut prefix = String::new();
            requested.split('.').any(|segment| {
                prefix.push_str(segment);
                prefix.push('.');
                permitted.contains(format!("{prefix}*").as_str())
            })
        })
        .map(str::to_string)
        .collect();

    relations.extend(always.iter().cloned());
    relations
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                EntityMeta::new("post", "posts")
                    .with_relation(RelationDef::to_one("user", "user", "user_id", "id"))
                    .with_relation(RelationDef::to_many("comments", "comment", "id", "post_id"))
                    .with_relation(RelationDef::polymorphic("subject", "subject_id")),
            )
            .with_entity(
                EntityMeta::new("user", "users")
                    .with_relation(RelationDef::to_one("company", "company", "company_id", "id")),
            )
            .with_entity(EntityMeta::new("company", "companies"))
            .with_entity(
                EntityMeta::new("comment", "comments")
                    .with_relation(RelationDef::to_one("user", "user", "user_id", "id")),
            )
    }

    #[test]
    fn local_field() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let post = schema.entity("post").unwrap();

        let path = resolver.resolve(post, "title").unwrap();
        assert!(matches!(path, RelationPath::Local { ref field } if field == "title"));
    }

    #[test]
    fn pivot_field() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let path = resolver
            .resolve(schema.entity("post").unwrap(), "pivot.created_at")
            .unwrap();
        assert!(path.is_pivot());
        assert_eq!(path.field(), "created_at");
    }

    #[test]
    fn multi_step_relation() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let path = resolver
            .resolve(schema.entity("post").unwrap(), "user.company.name")
            .unwrap();

        let RelationPath::Related { steps, field } = &path else {
            panic!("expected a related path");
        };
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].table(), Some("users"));
        assert_eq!(steps[1].joins[0].local.qualified(), "users.company_id");
        assert_eq!(field, "name");
        assert_eq!(path.related_column().unwrap().qualified(), "companies.name");
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let err = resolver
            .resolve(schema.entity("post").unwrap(), "author.name")
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidRelation { .. }));
    }

    #[test]
    fn polymorphic_relation_is_flagged() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let path = resolver
            .resolve(schema.entity("post").unwrap(), "subject.title")
            .unwrap();
        assert!(path.is_polymorphic());
        assert!(path.target().is_none());
    }

    #[test]
    fn unsafe_segments_are_rejected() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        assert!(
            resolver
                .resolve(schema.entity("post").unwrap(), "title)--")
                .is_err()
        );
    }

    #[test]
    fn requested_relations_honour_wildcards() {
        let allowed = vec!["user".to_string(), "comments.*".to_string()];
        let always = vec!["tags".to_string()];

        let relations = requested_relations(
            Some("user,comments.user,secrets,comments.user.company"),
            &allowed,
            &always,
        );

        assert_eq!(
            relations.into_iter().collect::<Vec<_>>(),
            vec!["comments.user", "comments.user.company", "tags", "user"]
        );
    }

    #[test]
    fn requested_relations_without_include_is_always() {
        let relations = requested_relations(None, &[], &["user".to_string()]);
        assert_eq!(relations.len(), 1);
        assert!(relations.contains("user"));
    }

    #[test]
    fn guard_strips_unrequested_relations() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let post = schema.entity("post").unwrap();

        let mut row = json!({
            "id": 1,
            "title": "hello",
            "user": {"id": 2, "company": {"id": 3}},
            "comments": [{"id": 4, "user": {"id": 5}}],
            "pivot": {"post_id": 1},
        });
        let requested: BTreeSet<String> = ["comments".to_string()].into_iter().collect();

        resolver.guard_loaded_relations(post, &mut row, &requested);

        assert!(row.get("user").is_none());
        assert!(row["comments"][0].get("user").is_none());
        assert_eq!(row["title"], "hello");
        assert_eq!(row["pivot"]["post_id"], 1);
    }

    #[test]
    fn guard_keeps_nested_requested_relations() {
        let schema = schema();
        let resolver = RelationsResolver::new(&schema);
        let post = schema.entity("post").unwrap();

        let mut rows = vec![json!({
            "id": 1,
            "user": {"id": 2, "company": {"id": 3}},
        })];
        let requested: BTreeSet<String> = ["user.company".to_string()].into_iter().collect();

        resolver.guard_loaded_relations_for_collection(post, &mut rows, &requested);
        assert_eq!(rows[0]["user"]["company"]["id"], 3);
    }
}
