//! Aggregate functions and the correlated subqueries that compute them.
//!
//! Every relation aggregate attached to a [`ModelQuery`](crate::ModelQuery)
//! becomes a [`RelationQuery`]: a scalar `SELECT <AGG>(column) FROM related
//! WHERE <correlation> ...` subquery selected as an extra column.

mod query_builder;

pub use query_builder::RelationQuery;
pub(crate) use query_builder::Condition;

use crate::error::Error;
use std::str::FromStr;

/// The aggregate functions that may be attached to a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Sum,
        AggregateFunction::Avg,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Count,
    ];

    /// SQL keyword, e.g. `SUM`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count => "COUNT",
        }
    }

    /// Lowercase name used as the output column suffix, e.g. `sum`.
    pub fn as_suffix(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Count => "count",
        }
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

impl FromStr for AggregateFunction {
    type Err = Error;

    /// Case-insensitive; anything outside the fixed set is rejected so that a
    /// caller-supplied name never reaches the generated SQL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregateFunction::ALL
            .into_iter()
            .find(|function| function.as_sql().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnsupportedAggregate(s.to_string()))
    }
}
