use crate::aggregate::AggregateFunction;
use crate::error::Result;
use crate::query::{IntoRelations, ModelQuery};
use crate::{Db, Scheme};

/// A struct mapped to a table, with named relations to other models.
///
/// Implemented by `#[derive(Model)]`:
///
/// ```ignore
/// #[derive(Model, sqlx::FromRow)]
/// #[table_name = "users"]
/// #[relation(name = "posts", has_many = "Post")]
/// #[relation(name = "roles", belongs_to_many = "Role", pivot = "role_user")]
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// let sql = User::with_sum("posts:amount")?.build();
/// ```
pub trait Model {
    /// Table metadata, built once per process.
    fn scheme() -> &'static Scheme;

    /// Starts a query over this model's table.
    fn query() -> ModelQuery<Db>
    where
        Self: Sized,
    {
        ModelQuery::new(Self::scheme())
    }

    /// Shorthand for `Self::query().with_aggregate(relations, function)`.
    fn with_aggregate<'r, R: IntoRelations<'r>>(relations: R, function: AggregateFunction) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_aggregate(relations, function)
    }

    /// Shorthand for `Self::query().with_sum(relations)`.
    fn with_sum<'r, R: IntoRelations<'r>>(relations: R) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_sum(relations)
    }

    /// Shorthand for `Self::query().with_avg(relations)`.
    fn with_avg<'r, R: IntoRelations<'r>>(relations: R) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_avg(relations)
    }

    /// Shorthand for `Self::query().with_min(relations)`.
    fn with_min<'r, R: IntoRelations<'r>>(relations: R) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_min(relations)
    }

    /// Shorthand for `Self::query().with_max(relations)`.
    fn with_max<'r, R: IntoRelations<'r>>(relations: R) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_max(relations)
    }

    /// Shorthand for `Self::query().with_count(relations)`.
    fn with_count<'r, R: IntoRelations<'r>>(relations: R) -> Result<ModelQuery<Db>>
    where
        Self: Sized,
    {
        Self::query().with_count(relations)
    }
}
