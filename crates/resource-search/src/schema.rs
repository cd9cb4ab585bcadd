//! Entity relation metadata.
//!
//! The schema describes each searchable entity's table, primary key, date
//! columns and relations. Relation paths in directives are resolved against
//! it, and join keys for sub-queries and sort joins come from it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::directive::registry::is_valid_identifier;
use crate::error::SearchError;

/// How a relation connects two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelationKind {
    /// At most one related row.
    ToOne,
    /// Any number of related rows.
    ToMany,
    /// Many-to-many through a join table.
    PivotThrough {
        /// Join (pivot) table.
        table: String,
        /// Pivot column referencing the parent's `parent_column`.
        parent_key: String,
        /// Pivot column referencing the related entity's `related_column`.
        related_key: String,
    },
    /// Target entity depends on row data and cannot be known statically.
    Polymorphic,
}

/// A named relation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation name as used in dotted paths.
    #[serde(default)]
    pub name: String,

    /// Related entity name (ignored for polymorphic relations).
    #[serde(default)]
    pub entity: String,

    #[serde(flatten)]
    pub kind: RelationKind,

    /// Column on the parent table taking part in the join.
    pub parent_column: String,

    /// Column on the related table taking part in the join.
    #[serde(default = "default_key")]
    pub related_column: String,
}

impl RelationDef {
    /// Parent `user_id` → related `users.id`.
    pub fn to_one(
        name: impl Into<String>,
        entity: impl Into<String>,
        parent_column: impl Into<String>,
        related_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            kind: RelationKind::ToOne,
            parent_column: parent_column.into(),
            related_column: related_column.into(),
        }
    }

    /// Parent `id` → related `comments.post_id`.
    pub fn to_many(
        name: impl Into<String>,
        entity: impl Into<String>,
        parent_column: impl Into<String>,
        related_column: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::ToMany,
            ..Self::to_one(name, entity, parent_column, related_column)
        }
    }

    /// Parent `id` → `pivot.parent_key`, `pivot.related_key` → related `id`.
    pub fn pivot_through(
        name: impl Into<String>,
        entity: impl Into<String>,
        pivot_table: impl Into<String>,
        parent_key: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            kind: RelationKind::PivotThrough {
                table: pivot_table.into(),
                parent_key: parent_key.into(),
                related_key: related_key.into(),
            },
            parent_column: default_key(),
            related_column: default_key(),
        }
    }

    pub fn polymorphic(name: impl Into<String>, parent_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: String::new(),
            kind: RelationKind::Polymorphic,
            parent_column: parent_column.into(),
            related_column: default_key(),
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self.kind, RelationKind::Polymorphic)
    }

    pub fn pivot_table(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::PivotThrough { table, .. } => Some(table),
            _ => None,
        }
    }
}

/// A qualified `table.column` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Column {
    pub table: String,
    pub name: String,
}

impl Column {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
        }
    }

    /// `table.column`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.table, self.name)
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

/// Qualified columns joining a parent table to a related (or pivot) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinKeys {
    /// Table being joined in.
    pub table: String,
    /// Column on the already-present side.
    pub local: Column,
    /// Column on the joined table.
    pub foreign: Column,
}

/// Metadata for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Entity name.
    #[serde(default)]
    pub name: String,

    /// Backing table.
    pub table: String,

    /// Primary key column (default: "id").
    #[serde(default = "default_key")]
    pub key: String,

    /// Columns holding dates or timestamps.
    #[serde(default)]
    pub date_columns: BTreeSet<String>,

    /// Relations keyed by name.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDef>,
}

fn default_key() -> String {
    "id".to_string()
}

impl EntityMeta {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key: default_key(),
            date_columns: BTreeSet::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_dates<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.get(name)
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.date_columns.contains(column)
    }

    pub fn column(&self, name: impl Into<String>) -> Column {
        Column::new(self.table.clone(), name)
    }

    pub fn key_column(&self) -> Column {
        self.column(self.key.clone())
    }
}

/// All entities known to a search deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    entities: HashMap<String, EntityMeta>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityMeta) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntityMeta> {
        self.entities.get(name)
    }

    /// Look up an entity or fail with a construction-time error.
    pub fn require(&self, name: &str) -> Result<&EntityMeta, SearchError> {
        self.entity(name).ok_or_else(|| {
            SearchError::InvalidModel(format!("entity '{name}' is not defined in the schema"))
        })
    }

    /// Entity and table for the related side of a relation.
    pub fn related(&self, relation: &RelationDef) -> Option<&EntityMeta> {
        if relation.is_polymorphic() {
            return None;
        }
        self.entity(&relation.entity)
    }

    /// Fill in names from map keys and check identifiers and relation targets.
    ///
    /// Entities and relations are keyed by name; a schema loaded from YAML
    /// may leave the inner `name` fields blank.
    pub fn validated(mut self) -> Result<Self, SearchError> {
        for (entity_name, entity) in &mut self.entities {
            if entity.name.is_empty() {
                entity.name = entity_name.clone();
            }
            for (relation_name, relation) in &mut entity.relations {
                if relation.name.is_empty() {
                    relation.name = relation_name.clone();
                }
            }
        }

        for entity in self.entities.values() {
            check_identifier(&entity.name, "table", &entity.table)?;
            check_identifier(&entity.name, "key", &entity.key)?;
            for column in &entity.date_columns {
                check_identifier(&entity.name, "date column", column)?;
            }

            for relation in entity.relations.values() {
                check_identifier(&entity.name, "relation", &relation.name)?;
                check_identifier(&entity.name, "join column", &relation.parent_column)?;
                check_identifier(&entity.name, "join column", &relation.related_column)?;

                if let RelationKind::PivotThrough {
                    table,
                    parent_key,
                    related_key,
                } = &relation.kind
                {
                    check_identifier(&entity.name, "pivot table", table)?;
                    check_identifier(&entity.name, "pivot key", parent_key)?;
                    check_identifier(&entity.name, "pivot key", related_key)?;
                }

                if !relation.is_polymorphic() && !self.entities.contains_key(&relation.entity) {
                    return Err(SearchError::InvalidModel(format!(
                        "relation '{}.{}' targets unknown entity '{}'",
                        entity.name, relation.name, relation.entity
                    )));
                }
            }
        }

        Ok(self)
    }

    /// Join keys for traversing `relation` from `parent`.
    ///
    /// Pivot-through relations yield two joins: parent → pivot, pivot → related.
    pub fn join_keys(&self, parent: &EntityMeta, relation: &RelationDef) -> Option<Vec<JoinKeys>> {
        let related = self.related(relation)?;

        let joins = match &relation.kind {
            RelationKind::ToOne | RelationKind::ToMany => vec![JoinKeys {
                table: related.table.clone(),
                local: parent.column(relation.parent_column.clone()),
                foreign: related.column(relation.related_column.clone()),
            }],
            RelationKind::PivotThrough {
                table,
                parent_key,
                related_key,
            } => vec![
                JoinKeys {
                    table: table.clone(),
                    local: parent.column(relation.parent_column.clone()),
                    foreign: Column::new(table.clone(), parent_key.clone()),
                },
                JoinKeys {
                    table: related.table.clone(),
                    local: Column::new(table.clone(), related_key.clone()),
                    foreign: related.column(relation.related_column.clone()),
                },
            ],
            RelationKind::Polymorphic => return None,
        };

        Some(joins)
    }

    /// Parse a schema from YAML.
    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let schema: Self = serde_yml::from_str(source)?;
        Ok(schema.validated()?)
    }
}

fn check_identifier(entity: &str, what: &str, value: &str) -> Result<(), SearchError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(SearchError::InvalidModel(format!(
            "entity '{entity}' has an invalid {what} '{value}'"
        )))
    }
}
