//! Relation metadata and resolution.
//!
//! A relation is declared on a parent [`Scheme`] and points at the scheme of a
//! related model. Resolving it by name yields the correlation predicate that
//! links a related row to the current parent row, plus the relation-level
//! filters that every query over the relation must carry.
//!
//! # Key conventions
//!
//! Keys that are not declared explicitly follow these defaults:
//!
//! | Kind | Foreign key | Local / owner key |
//! |---|---|---|
//! | `HasOne`, `HasMany` | `<parent model>_<parent pk>` on the related table | parent pk |
//! | `BelongsTo` | `<relation name>_<related pk>` on the parent table | related pk |
//! | `BelongsToMany` | pivot `<parent model>_<parent pk>` / `<related model>_<related pk>` | both pks |

mod expression;

pub use expression::RelationExpression;

use crate::error::{Error, Result};
use crate::{to_snake_case, Scheme};

/// Kind of relationship between a parent model and a related model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany {
        pivot_table: Option<String>,
        foreign_pivot_key: Option<String>,
        related_pivot_key: Option<String>,
    },
}

/// A named relation declared on a model.
///
/// # Example
///
/// ```ignore
/// RelationDefinition::has_many("posts", <Post as Model>::scheme)
///     .foreign_key("author_id")
///     .filter("published = TRUE")
/// ```
#[derive(Debug, Clone)]
pub struct RelationDefinition {
    pub name: String,
    pub kind: RelationKind,
    pub related: fn() -> &'static Scheme,
    pub foreign_key: Option<String>,
    pub local_key: Option<String>,
    pub filters: Vec<String>,
}

impl RelationDefinition {
    fn new(name: &str, kind: RelationKind, related: fn() -> &'static Scheme) -> Self {
        Self {
            name: name.to_string(),
            kind,
            related,
            foreign_key: None,
            local_key: None,
            filters: Vec::new(),
        }
    }

    pub fn has_one(name: &str, related: fn() -> &'static Scheme) -> Self {
        Self::new(name, RelationKind::HasOne, related)
    }

    pub fn has_many(name: &str, related: fn() -> &'static Scheme) -> Self {
        Self::new(name, RelationKind::HasMany, related)
    }

    pub fn belongs_to(name: &str, related: fn() -> &'static Scheme) -> Self {
        Self::new(name, RelationKind::BelongsTo, related)
    }

    pub fn belongs_to_many(name: &str, related: fn() -> &'static Scheme) -> Self {
        Self::new(
            name,
            RelationKind::BelongsToMany {
                pivot_table: None,
                foreign_pivot_key: None,
                related_pivot_key: None,
            },
            related,
        )
    }

    /// Foreign key column. Lives on the related table for `HasOne`/`HasMany`
    /// and on the parent table for `BelongsTo`.
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    /// Local key on the parent (`HasOne`/`HasMany`/`BelongsToMany`) or owner
    /// key on the related table (`BelongsTo`).
    pub fn local_key(mut self, column: &str) -> Self {
        self.local_key = Some(column.to_string());
        self
    }

    /// Pivot table of a `BelongsToMany` relation. Ignored for other kinds.
    pub fn pivot(mut self, table: &str) -> Self {
        if let RelationKind::BelongsToMany { pivot_table, .. } = &mut self.kind {
            *pivot_table = Some(table.to_string());
        }
        self
    }

    /// Pivot column referencing the parent. Ignored outside `BelongsToMany`.
    pub fn foreign_pivot_key(mut self, column: &str) -> Self {
        if let RelationKind::BelongsToMany { foreign_pivot_key, .. } = &mut self.kind {
            *foreign_pivot_key = Some(column.to_string());
        }
        self
    }

    /// Pivot column referencing the related model. Ignored outside `BelongsToMany`.
    pub fn related_pivot_key(mut self, column: &str) -> Self {
        if let RelationKind::BelongsToMany { related_pivot_key, .. } = &mut self.kind {
            *related_pivot_key = Some(column.to_string());
        }
        self
    }

    /// Adds a raw SQL condition applied to every query over this relation.
    pub fn filter(mut self, condition: &str) -> Self {
        self.filters.push(condition.to_string());
        self
    }

    /// Resolves this definition against its parent scheme, applying key conventions.
    pub fn resolve(&self, parent: &'static Scheme) -> ResolvedRelation {
        let related = (self.related)();

        let correlation = match &self.kind {
            RelationKind::HasOne | RelationKind::HasMany => Correlation::Direct {
                parent_column: self.local_key.clone().unwrap_or_else(|| parent.id_field.clone()),
                related_column: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", parent.model_name, parent.id_field)),
            },
            RelationKind::BelongsTo => Correlation::Direct {
                parent_column: self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", to_snake_case(&self.name), related.id_field)),
                related_column: self.local_key.clone().unwrap_or_else(|| related.id_field.clone()),
            },
            RelationKind::BelongsToMany { pivot_table, foreign_pivot_key, related_pivot_key } => {
                Correlation::Pivot {
                    pivot_table: pivot_table
                        .clone()
                        .unwrap_or_else(|| joining_table(&parent.model_name, &related.model_name)),
                    foreign_pivot_key: foreign_pivot_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_{}", parent.model_name, parent.id_field)),
                    related_pivot_key: related_pivot_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_{}", related.model_name, related.id_field)),
                    parent_key: self.local_key.clone().unwrap_or_else(|| parent.id_field.clone()),
                    related_key: related.id_field.clone(),
                }
            }
        };

        ResolvedRelation {
            name: self.name.clone(),
            parent,
            related,
            correlation,
            filters: self.filters.clone(),
        }
    }
}

/// Default pivot table name: both model names in alphabetical order.
fn joining_table(a: &str, b: &str) -> String {
    let mut models = [a, b];
    models.sort_unstable();
    models.join("_")
}

/// How a related row is linked to the current parent row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// `parent.parent_column = related.related_column`
    Direct { parent_column: String, related_column: String },
    /// Related rows reached through a pivot table.
    Pivot {
        pivot_table: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
        parent_key: String,
        related_key: String,
    },
}

/// A relation resolved against a concrete parent scheme.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub name: String,
    pub parent: &'static Scheme,
    pub related: &'static Scheme,
    pub correlation: Correlation,
    pub filters: Vec<String>,
}

impl ResolvedRelation {
    /// Looks up `name` on `parent` and resolves it.
    pub fn find(parent: &'static Scheme, name: &str) -> Result<Self> {
        parent
            .find_relation(name)
            .map(|definition| definition.resolve(parent))
            .ok_or_else(|| Error::RelationNotFound {
                model: parent.model_name.clone(),
                relation: name.to_string(),
            })
    }

    /// True when parent and related rows live in the same table, in which case
    /// the subquery needs its own table alias.
    pub fn is_self_relation(&self) -> bool {
        self.parent.table_name == self.related.table_name
    }
}
