use thiserror::Error;

/// Result type for query building and execution.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while attaching relation aggregates or running a query.
#[derive(Debug, Error)]
pub enum Error {
    /// The model has no relation with this name
    #[error("Relation '{relation}' is not defined on model '{model}'")]
    RelationNotFound { model: String, relation: String },

    /// Aggregate function outside SUM, AVG, MIN, MAX, COUNT
    #[error("Unsupported aggregate function '{0}'")]
    UnsupportedAggregate(String),

    /// Relation expression with an empty name, alias or column
    #[error("Invalid relation expression '{0}'")]
    InvalidRelationExpression(String),

    /// Database error while executing the query
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
