//! Fluent builder for correlated aggregate subqueries.
//!
//! A [`RelationQuery`] is created for each relation aggregate and handed to
//! the caller's constraint callback, which may narrow it further before it is
//! compiled into the parent's select list.

use super::AggregateFunction;
use crate::relation::{Correlation, ResolvedRelation};
use crate::{placeholder_count, prepare_where, qualify, quote_identifier};

/// A `{}`-templated SQL condition and the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Condition {
    pub sql: String,
    pub params: Vec<String>,
}

impl Condition {
    pub fn new(sql: &str, params: &[&str]) -> Self {
        let placeholders = placeholder_count(sql);
        if placeholders != params.len() {
            tracing::warn!(
                clause = sql,
                placeholders,
                params = params.len(),
                "placeholder count does not match bound parameters"
            );
        }
        Self {
            sql: sql.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Represents the pivot table join of a many-to-many aggregate.
#[derive(Debug, Clone, PartialEq)]
struct PivotJoin {
    table: String,
    condition: String,
}

/// Correlated scalar subquery computing one aggregate over a relation.
///
/// # Example
///
/// ```ignore
/// let users = User::query().with_sum(
///     RelationSet::new().constrain("posts:amount as published", |q| {
///         q.where_("published = {}", &["true"]).where_null("archived_at")
///     }),
/// )?;
/// ```
///
/// Compiles to something like:
///
/// ```sql
/// SELECT SUM("posts"."amount") FROM "posts"
/// WHERE "users"."id" = "posts"."user_id" AND (published = $1) AND "posts"."archived_at" IS NULL
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RelationQuery {
    function: AggregateFunction,
    column: String,
    table: String,
    table_alias: Option<String>,
    pivot_join: Option<PivotJoin>,
    correlation: String,
    filters: Vec<String>,
    soft_delete: Option<String>,
    include_trashed: bool,
    conditions: Vec<Condition>,
}

impl RelationQuery {
    /// Creates the aggregate subquery for a resolved relation.
    ///
    /// # Arguments
    ///
    /// * `relation` - The relation being aggregated
    /// * `function` - Aggregate function to apply
    /// * `column` - Column of the related table, or `*`
    /// * `table_alias` - Alias for the related table, needed for self relations
    pub fn new(
        relation: &ResolvedRelation,
        function: AggregateFunction,
        column: &str,
        table_alias: Option<String>,
    ) -> Self {
        let table = relation.related.table_name.clone();
        let table_ref = table_alias.clone().unwrap_or_else(|| table.clone());
        let parent_table = &relation.parent.table_name;

        let (correlation, pivot_join) = match &relation.correlation {
            Correlation::Direct { parent_column, related_column } => (
                format!(
                    "{} = {}",
                    quote_identifier(&qualify(parent_table, parent_column)),
                    quote_identifier(&qualify(&table_ref, related_column))
                ),
                None,
            ),
            Correlation::Pivot { pivot_table, foreign_pivot_key, related_pivot_key, parent_key, related_key } => (
                format!(
                    "{} = {}",
                    quote_identifier(&qualify(parent_table, parent_key)),
                    quote_identifier(&qualify(pivot_table, foreign_pivot_key))
                ),
                Some(PivotJoin {
                    table: pivot_table.clone(),
                    condition: format!(
                        "{} = {}",
                        quote_identifier(&qualify(&table_ref, related_key)),
                        quote_identifier(&qualify(pivot_table, related_pivot_key))
                    ),
                }),
            ),
        };

        Self {
            function,
            column: qualify(&table_ref, column),
            table,
            table_alias,
            pivot_join,
            correlation,
            filters: relation.filters.clone(),
            soft_delete: relation.related.soft_delete.clone(),
            include_trashed: false,
            conditions: Vec::new(),
        }
    }

    /// Name to reference the related table by inside this subquery: its alias
    /// for self relations, otherwise the table name.
    pub fn table_ref(&self) -> &str {
        self.table_alias.as_deref().unwrap_or(&self.table)
    }

    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    /// The aggregated column, qualified with [`table_ref`](Self::table_ref) unless it is `*`.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Adds a condition with "{}" parameter placeholders. Conditions are
    /// combined with AND.
    ///
    /// `params` must hold one value per placeholder. A mismatch is only logged
    /// as a warning when the condition is added, and the database rejects the
    /// statement when it is executed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// q.where_("status = {} AND amount > {}", &["active", "100"])
    /// ```
    pub fn where_(mut self, clause: &str, params: &[&str]) -> Self {
        self.conditions.push(Condition::new(clause, params));
        self
    }

    /// Requires `column` of the related table to be NULL.
    pub fn where_null(mut self, column: &str) -> Self {
        let column = quote_identifier(&qualify(self.table_ref(), column));
        self.conditions.push(Condition::new(&format!("{} IS NULL", column), &[]));
        self
    }

    /// Requires `column` of the related table to be NOT NULL.
    pub fn where_not_null(mut self, column: &str) -> Self {
        let column = quote_identifier(&qualify(self.table_ref(), column));
        self.conditions.push(Condition::new(&format!("{} IS NOT NULL", column), &[]));
        self
    }

    /// Includes soft-deleted related rows in the aggregate.
    pub fn with_trashed(mut self) -> Self {
        self.include_trashed = true;
        self
    }

    /// Values bound to this subquery's placeholders, in order.
    pub fn params(&self) -> impl Iterator<Item = &String> {
        self.conditions.iter().flat_map(|c| c.params.iter())
    }

    /// Number of placeholders this subquery renders.
    pub(crate) fn placeholder_count(&self) -> usize {
        self.conditions.iter().map(|c| placeholder_count(&c.sql)).sum()
    }

    /// Compiles the subquery, numbering placeholders from `param_offset`.
    pub(crate) fn to_sql(&self, param_offset: usize) -> String {
        let from_clause = match &self.table_alias {
            Some(alias) => format!("{} AS {}", quote_identifier(&self.table), quote_identifier(alias)),
            None => quote_identifier(&self.table),
        };

        let mut sql = format!(
            "SELECT {}({}) FROM {}",
            self.function.as_sql(),
            quote_identifier(&self.column),
            from_clause
        );

        if let Some(join) = &self.pivot_join {
            sql.push_str(&format!(" INNER JOIN {} ON {}", quote_identifier(&join.table), join.condition));
        }

        // Correlation first, then relation-level constraints, then the caller's.
        let mut where_parts = vec![self.correlation.clone()];
        if let (Some(column), false) = (&self.soft_delete, self.include_trashed) {
            where_parts.push(format!("{} IS NULL", quote_identifier(&qualify(self.table_ref(), column))));
        }
        for filter in &self.filters {
            where_parts.push(format!("({})", filter));
        }

        let mut offset = param_offset;
        for condition in &self.conditions {
            where_parts.push(format!("({})", prepare_where(&condition.sql, offset)));
            offset += placeholder_count(&condition.sql);
        }

        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
        sql
    }
}
