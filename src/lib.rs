pub mod aggregate;
pub mod error;
pub mod query;
pub mod relation;
pub mod traits;

pub use sqlx_with_aggregate_macros::Model;
pub use aggregate::{AggregateFunction, RelationQuery};
pub use error::{Error, Result};
pub use query::{IntoRelations, ModelQuery, RelationSet, SelectExpr};
pub use relation::{RelationDefinition, RelationExpression, RelationKind, ResolvedRelation};
pub use traits::Model;

// Items referenced by code generated from `#[derive(Model)]`.
#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::Lazy;
}

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

#[cfg(all(feature = "postgres", feature = "mysql"))]
compile_error!("Cannot enable both 'postgres' and 'mysql' features simultaneously. Please choose one database backend.");

#[cfg(all(feature = "postgres", feature = "sqlite"))]
compile_error!("Cannot enable both 'postgres' and 'sqlite' features simultaneously. Please choose one database backend.");

#[cfg(all(feature = "mysql", feature = "sqlite"))]
compile_error!("Cannot enable both 'mysql' and 'sqlite' features simultaneously. Please choose one database backend.");

/// The sqlx database selected by the enabled backend feature.
#[cfg(feature = "postgres")]
pub type Db = sqlx::Postgres;

#[cfg(all(feature = "mysql", not(feature = "postgres")))]
pub type Db = sqlx::MySql;

#[cfg(all(feature = "sqlite", not(feature = "postgres"), not(feature = "mysql")))]
pub type Db = sqlx::Sqlite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
enum DbType {
    PostgreSQL,
    MySQL,
    SQLite,
}

#[cfg(feature = "postgres")]
fn get_db() -> DbType {
    DbType::PostgreSQL
}

#[cfg(all(feature = "mysql", not(feature = "postgres"), not(feature = "sqlite")))]
fn get_db() -> DbType {
    DbType::MySQL
}

#[cfg(all(feature = "sqlite", not(feature = "postgres"), not(feature = "mysql")))]
fn get_db() -> DbType {
    DbType::SQLite
}

#[cfg(not(any(feature = "postgres", feature = "mysql", feature = "sqlite")))]
fn get_db() -> DbType {
    compile_error!("You must enable one of the database features: postgres, mysql, or sqlite")
}

/// Translates a parameter placeholder to the database-specific format.
///
/// - PostgreSQL: Returns the parameter as-is (e.g., "$1", "$2")
/// - MySQL/SQLite: Returns "?" for all parameters
fn param_trans(p: String) -> String {
    match get_db() {
        DbType::PostgreSQL => p,
        DbType::MySQL | DbType::SQLite => "?".to_string(),
    }
}

/// Number of `{}` placeholders in a clause template.
pub(crate) fn placeholder_count(clause: &str) -> usize {
    clause.matches("{}").count()
}

/// Prepares a WHERE clause by replacing "{}" placeholders with database-specific parameter markers.
///
/// # Arguments
///
/// * `w` - The clause template with "{}" placeholders
/// * `field_count` - The starting parameter number for PostgreSQL
///
/// # Example
///
/// ```ignore
/// prepare_where("name = {} AND age = {}", 1);
/// // PostgreSQL: "name = $1 AND age = $2"
/// // MySQL/SQLite: "name = ? AND age = ?"
/// ```
pub(crate) fn prepare_where(w: &str, field_count: usize) -> String {
    let mut where_sql = w.to_string();

    for i in 0..placeholder_count(w) {
        let param = param_trans(format!("${}", i + field_count));
        if let Some(pos) = where_sql.find("{}") {
            where_sql.replace_range(pos..pos + 2, &param);
        }
    }

    where_sql
}

/// Quotes an identifier for the current database type.
///
/// Dotted identifiers are quoted segment by segment and a `*` segment is left
/// bare, so `users.*` becomes `"users".*` on PostgreSQL.
pub fn quote_identifier(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|segment| {
            if segment == "*" {
                return segment.to_string();
            }
            match get_db() {
                DbType::MySQL => format!("`{}`", segment.replace('`', "``")),
                DbType::PostgreSQL | DbType::SQLite => format!("\"{}\"", segment.replace('"', "\"\"")),
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Quotes an output alias as a single identifier. Dots are part of the name.
pub fn quote_alias(alias: &str) -> String {
    match get_db() {
        DbType::MySQL => format!("`{}`", alias.replace('`', "``")),
        DbType::PostgreSQL | DbType::SQLite => format!("\"{}\"", alias.replace('"', "\"\"")),
    }
}

/// Converts a CamelCase or camelCase name to snake_case.
///
/// An uppercase letter after an underscore does not add a second one. The
/// derive macro follows the same rule for model and table names.
///
/// ```ignore
/// to_snake_case("MyTable");  // "my_table"
/// to_snake_case("recentPosts");  // "recent_posts"
/// ```
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 2);

    for (i, c) in s.char_indices() {
        if i > 0 && c.is_uppercase() && !result.ends_with('_') {
            result.push('_');
        }
        result.extend(c.to_lowercase());
    }

    result
}

// Global SQL cache. Entries are leaked once and never removed, so handing out
// `&'static str` is sound.
static SQL_CACHE: Lazy<Mutex<HashMap<String, &'static str>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Get SQL from cache or compute and store it, returning &'static str.
fn get_or_insert_sql(key: String, gen_fn: impl FnOnce() -> String) -> &'static str {
    let mut cache = SQL_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *cache
        .entry(key)
        .or_insert_with(|| Box::leak(gen_fn().into_boxed_str()))
}

/// Table metadata for a model.
///
/// Usually produced by `#[derive(Model)]`, but can be built by hand:
///
/// ```ignore
/// let scheme = Scheme::new("users", "id")
///     .model_name("user")
///     .soft_delete("deleted_at")
///     .relation(RelationDefinition::has_many("posts", post_scheme));
/// ```
///
/// # Fields
///
/// * `table_name` - Name of the database table
/// * `model_name` - snake_case model name, used for key conventions
/// * `id_field` - Name of the primary key column
/// * `soft_delete` - Column marking soft-deleted rows, if the model uses them
/// * `relations` - Relations reachable from this model by name
#[derive(Debug)]
pub struct Scheme {
    pub table_name: String,
    pub model_name: String,
    pub id_field: String,
    pub soft_delete: Option<String>,
    pub relations: Vec<RelationDefinition>,
}

impl Scheme {
    /// Creates a scheme with the model name defaulting to the table name.
    pub fn new(table_name: &str, id_field: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            model_name: table_name.to_string(),
            id_field: id_field.to_string(),
            soft_delete: None,
            relations: Vec::new(),
        }
    }

    pub fn model_name(mut self, model_name: &str) -> Self {
        self.model_name = model_name.to_string();
        self
    }

    pub fn soft_delete(mut self, column: &str) -> Self {
        self.soft_delete = Some(column.to_string());
        self
    }

    pub fn relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    /// Looks up a relation definition by its exact name.
    pub fn find_relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Returns `table.column`, leaving already-qualified columns and `*` alone.
    pub fn qualify_column(&self, column: &str) -> String {
        qualify(&self.table_name, column)
    }
}

pub(crate) fn qualify(table: &str, column: &str) -> String {
    if column == "*" || column.contains('.') {
        column.to_string()
    } else {
        format!("{}.{}", table, column)
    }
}
