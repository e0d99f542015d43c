//! Model queries with relation aggregates.
//!
//! [`ModelQuery`] is a small SELECT builder over one model's table. Its
//! `with_*` methods attach relation aggregates as extra columns, each computed
//! by a correlated subquery, so one statement returns the parent rows together
//! with per-row totals, averages, extremes or counts over their relations.
//!
//! # Example
//!
//! ```ignore
//! use sqlx_with_aggregate::{Model, RelationSet};
//!
//! let users: Vec<UserWithTotals> = User::query()
//!     .where_("active = {}", &["true"])
//!     .with_sum("posts:amount")?
//!     .with_count(["posts", "comments as replies"])?
//!     .with_max(RelationSet::new().constrain("posts:amount as best", |q| q.where_("published = {}", &["true"])))?
//!     .order_by("posts__amount_sum", "DESC")
//!     .fetch_all(&pool)
//!     .await?;
//!
//! // Columns: users.*, posts__amount_sum, posts__all_count, replies__all_count, best__amount_max
//! ```

mod execute;
mod relations;

pub use relations::{Constraint, IntoRelations, RelationEntry, RelationSet};

use crate::aggregate::{AggregateFunction, Condition, RelationQuery};
use crate::error::Result;
use crate::relation::{RelationExpression, ResolvedRelation};
use crate::{get_or_insert_sql, placeholder_count, prepare_where, quote_alias, quote_identifier, Scheme};
use sqlx::Database;
use std::marker::PhantomData;

/// An item of the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    /// Column identifier, quoted when compiled.
    Column(String),
    /// Raw SQL expression, emitted as-is.
    Raw(String),
    /// Scalar subquery selected under an alias.
    Subquery { query: RelationQuery, alias: String },
}

/// Fluent SELECT builder for a single model.
///
/// Without an explicit select list the query selects `*`. Attaching a
/// relation aggregate first pins the list to `<table>.*` so the subquery is
/// added next to the model columns instead of replacing them.
pub struct ModelQuery<DB: Database> {
    scheme: &'static Scheme,
    columns: Option<Vec<SelectExpr>>,
    conditions: Vec<Condition>,
    order_by: Vec<(String, &'static str)>,
    limit: Option<usize>,
    offset: Option<usize>,
    include_trashed: bool,
    _phantom: PhantomData<DB>,
}

impl<DB: Database> ModelQuery<DB> {
    /// Creates a query over the table described by `scheme`.
    pub fn new(scheme: &'static Scheme) -> Self {
        Self {
            scheme,
            columns: None,
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            include_trashed: false,
            _phantom: PhantomData,
        }
    }

    pub fn scheme(&self) -> &'static Scheme {
        self.scheme
    }

    /// The explicit select list, or `None` when the query selects `*`.
    pub fn columns(&self) -> Option<&[SelectExpr]> {
        self.columns.as_deref()
    }

    /// Replaces the select list with the given columns.
    ///
    /// Call this before any `with_*` method: it discards previously attached
    /// aggregates.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| SelectExpr::Column(c.to_string())).collect());
        self
    }

    /// Appends a raw SQL expression to the select list.
    pub fn select_raw(mut self, expression: &str) -> Self {
        self.default_columns();
        self.push_column(SelectExpr::Raw(expression.to_string()));
        self
    }

    /// Appends a scalar subquery to the select list under `alias`.
    pub fn select_sub(mut self, query: RelationQuery, alias: &str) -> Self {
        self.default_columns();
        self.push_column(SelectExpr::Subquery { query, alias: alias.to_string() });
        self
    }

    /// Adds a WHERE condition with "{}" parameter placeholders. Conditions are
    /// combined with AND.
    ///
    /// `params` must hold one value per placeholder. A mismatch is only logged
    /// as a warning when the condition is added, and the database rejects the
    /// statement when it is executed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// .where_("status = {} AND region = {}", &["active", "north"])
    /// ```
    pub fn where_(mut self, clause: &str, params: &[&str]) -> Self {
        self.conditions.push(Condition::new(clause, params));
        self
    }

    /// Adds an ORDER BY term. `direction` is "ASC" or "DESC" (case-insensitive);
    /// anything else means ASC.
    ///
    /// A name equal to an aggregate alias is quoted as one identifier, dots
    /// included. Anything else is treated as a column reference.
    ///
    /// # Example
    ///
    /// ```ignore
    /// .order_by("posts__amount_sum", "DESC")
    /// ```
    pub fn order_by(mut self, column: &str, direction: &str) -> Self {
        let dir = if direction.eq_ignore_ascii_case("DESC") { "DESC" } else { "ASC" };
        self.order_by.push((column.to_string(), dir));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Includes soft-deleted rows of this model.
    pub fn with_trashed(mut self) -> Self {
        self.include_trashed = true;
        self
    }

    /// Attaches one aggregate column per relation expression.
    ///
    /// Expressions are processed in order. Each one is parsed, resolved
    /// against this model's relations and compiled into a correlated
    /// subquery selected as `<name or alias>__<column or "all">_<function>`.
    /// An empty set returns the query untouched.
    ///
    /// Without a `:column` suffix COUNT counts all rows, while SUM, AVG, MIN
    /// and MAX aggregate the related primary key. Name the column for those.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidRelationExpression`](crate::Error::InvalidRelationExpression) for an empty name, alias or column
    /// * [`Error::RelationNotFound`](crate::Error::RelationNotFound) for an unknown relation
    pub fn with_aggregate<'r, R>(mut self, relations: R, function: AggregateFunction) -> Result<Self>
    where
        R: IntoRelations<'r>,
    {
        let relations = relations.into_relations();
        if relations.is_empty() {
            return Ok(self);
        }

        self.default_columns();

        for entry in relations.into_entries() {
            let expression = RelationExpression::parse(entry.expression())?;
            let relation = ResolvedRelation::find(self.scheme, &expression.relation_name)?;
            let column = expression.column_or_default(function, &relation.related.id_field);

            let table_alias = relation
                .is_self_relation()
                .then(|| format!("{}_agg_{}", relation.related.table_name, self.column_count()));

            let query = entry.apply(RelationQuery::new(&relation, function, &column, table_alias));
            let alias = expression.output_column(&column, function);

            tracing::debug!(
                model = %self.scheme.model_name,
                relation = %relation.name,
                function = %function,
                alias = %alias,
                "attaching relation aggregate"
            );

            self.push_column(SelectExpr::Subquery { query, alias });
        }

        Ok(self)
    }

    /// Like [`with_aggregate`](Self::with_aggregate), with the function given
    /// by name. The name is matched case-insensitively against SUM, AVG, MIN,
    /// MAX and COUNT.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedAggregate`](crate::Error::UnsupportedAggregate) for any other name.
    pub fn with_aggregate_named<'r, R>(self, relations: R, function: &str) -> Result<Self>
    where
        R: IntoRelations<'r>,
    {
        let function = function.parse::<AggregateFunction>()?;
        self.with_aggregate(relations, function)
    }

    /// Attaches `SUM` aggregates. See [`with_aggregate`](Self::with_aggregate).
    pub fn with_sum<'r, R: IntoRelations<'r>>(self, relations: R) -> Result<Self> {
        self.with_aggregate(relations, AggregateFunction::Sum)
    }

    /// Attaches `AVG` aggregates. See [`with_aggregate`](Self::with_aggregate).
    pub fn with_avg<'r, R: IntoRelations<'r>>(self, relations: R) -> Result<Self> {
        self.with_aggregate(relations, AggregateFunction::Avg)
    }

    /// Attaches `MIN` aggregates. See [`with_aggregate`](Self::with_aggregate).
    pub fn with_min<'r, R: IntoRelations<'r>>(self, relations: R) -> Result<Self> {
        self.with_aggregate(relations, AggregateFunction::Min)
    }

    /// Attaches `MAX` aggregates. See [`with_aggregate`](Self::with_aggregate).
    pub fn with_max<'r, R: IntoRelations<'r>>(self, relations: R) -> Result<Self> {
        self.with_aggregate(relations, AggregateFunction::Max)
    }

    /// Attaches `COUNT` aggregates, named `<relation>__all_count` unless a
    /// column is given. See [`with_aggregate`](Self::with_aggregate).
    pub fn with_count<'r, R: IntoRelations<'r>>(self, relations: R) -> Result<Self> {
        self.with_aggregate(relations, AggregateFunction::Count)
    }

    fn default_columns(&mut self) {
        if self.columns.is_none() {
            let all = format!("{}.*", self.scheme.table_name);
            self.columns = Some(vec![SelectExpr::Column(all)]);
        }
    }

    fn push_column(&mut self, expr: SelectExpr) {
        self.columns.get_or_insert_with(Vec::new).push(expr);
    }

    fn column_count(&self) -> usize {
        self.columns.as_ref().map_or(0, Vec::len)
    }

    /// Values bound to the compiled statement, in placeholder order: select
    /// list subqueries first, then WHERE conditions.
    pub fn params(&self) -> Vec<&str> {
        let subquery_params = self.columns.iter().flatten().flat_map(|column| match column {
            SelectExpr::Subquery { query, .. } => query.params().collect::<Vec<_>>(),
            _ => Vec::new(),
        });
        let where_params = self.conditions.iter().flat_map(|c| c.params.iter());

        subquery_params.chain(where_params).map(String::as_str).collect()
    }

    /// Compiles the statement without touching the SQL cache.
    pub fn to_sql(&self) -> String {
        let mut param_offset = 1;

        let select_clause = match &self.columns {
            None => "*".to_string(),
            Some(columns) => {
                let mut parts = Vec::with_capacity(columns.len());
                for column in columns {
                    parts.push(match column {
                        SelectExpr::Column(name) => quote_identifier(name),
                        SelectExpr::Raw(expression) => expression.clone(),
                        SelectExpr::Subquery { query, alias } => {
                            let sql = format!("({}) AS {}", query.to_sql(param_offset), quote_alias(alias));
                            param_offset += query.placeholder_count();
                            sql
                        }
                    });
                }
                parts.join(", ")
            }
        };

        let mut sql = format!("SELECT {} FROM {}", select_clause, quote_identifier(&self.scheme.table_name));

        let mut where_parts = Vec::new();
        if let (Some(column), false) = (&self.scheme.soft_delete, self.include_trashed) {
            where_parts.push(format!("{} IS NULL", quote_identifier(&self.scheme.qualify_column(column))));
        }
        for condition in &self.conditions {
            where_parts.push(prepare_where(&condition.sql, param_offset));
            param_offset += placeholder_count(&condition.sql);
        }
        if !where_parts.is_empty() {
            let combined = if where_parts.len() == 1 {
                where_parts.remove(0)
            } else {
                where_parts.iter().map(|part| format!("({})", part)).collect::<Vec<_>>().join(" AND ")
            };
            sql.push_str(" WHERE ");
            sql.push_str(&combined);
        }

        if !self.order_by.is_empty() {
            let aliases: Vec<&str> = self
                .columns
                .iter()
                .flatten()
                .filter_map(|column| match column {
                    SelectExpr::Subquery { alias, .. } => Some(alias.as_str()),
                    _ => None,
                })
                .collect();

            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, dir)| {
                    let target = if aliases.contains(&column.as_str()) {
                        quote_alias(column)
                    } else {
                        quote_identifier(column)
                    };
                    format!("{} {}", target, dir)
                })
                .collect();

            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        sql
    }

    /// Builds the query and returns a cached SQL string.
    ///
    /// The cache is keyed by the compiled text, so queries that differ only in
    /// bound values share one entry.
    pub fn build(&self) -> &'static str {
        let compiled = self.to_sql();
        let sql = get_or_insert_sql(compiled.clone(), || compiled);

        #[cfg(feature = "log_sql")]
        tracing::info!(sql, "[SQLxWithAggregate] compiled model query");

        #[cfg(not(feature = "log_sql"))]
        tracing::trace!(sql, "compiled model query");

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::RelationDefinition;
    use crate::{Db, Error};
    use once_cell::sync::Lazy;

    static USERS: Lazy<Scheme> = Lazy::new(|| {
        Scheme::new("users", "id")
            .model_name("user")
            .relation(RelationDefinition::has_many("posts", posts))
            .relation(RelationDefinition::has_many("children", users).foreign_key("parent_id"))
    });
    static POSTS: Lazy<Scheme> = Lazy::new(|| Scheme::new("posts", "uuid").model_name("post"));
    static ARCHIVED: Lazy<Scheme> = Lazy::new(|| Scheme::new("archived_users", "id").soft_delete("deleted_at"));

    fn users() -> &'static Scheme {
        &USERS
    }
    fn posts() -> &'static Scheme {
        &POSTS
    }

    fn query() -> ModelQuery<Db> {
        ModelQuery::new(users())
    }

    fn aliases(query: &ModelQuery<Db>) -> Vec<&str> {
        query
            .columns()
            .unwrap_or_default()
            .iter()
            .filter_map(|c| match c {
                SelectExpr::Subquery { alias, .. } => Some(alias.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_query_selects_star() {
        let query = query();
        assert!(query.columns().is_none());

        #[cfg(feature = "postgres")]
        assert_eq!(query.to_sql(), "SELECT * FROM \"users\"");
    }

    #[test]
    fn test_empty_relations_leave_query_untouched() {
        let empty: [&str; 0] = [];
        let query = query().with_sum(empty).unwrap();
        assert!(query.columns().is_none());

        let selected = self::query().select(&["id", "name"]).with_count(RelationSet::new()).unwrap();
        assert_eq!(selected.columns().unwrap().len(), 2);
    }

    #[test]
    fn test_one_column_per_expression() {
        let query = query().with_count(["posts", "posts as p2", "posts:title"]).unwrap();
        let columns = query.columns().unwrap();

        // users.* plus three subqueries
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0], SelectExpr::Column("users.*".to_string()));
        assert_eq!(aliases(&query), vec!["posts__all_count", "p2__all_count", "posts__title_count"]);
    }

    #[test]
    fn test_default_column_uses_related_primary_key() {
        let query = query().with_sum("posts as p").unwrap();
        assert_eq!(aliases(&query), vec!["p__uuid_sum"]);

        match &query.columns().unwrap()[1] {
            SelectExpr::Subquery { query, .. } => assert_eq!(query.column(), "posts.uuid"),
            other => panic!("unexpected select item {:?}", other),
        }
    }

    #[test]
    fn test_explicit_select_list_is_kept() {
        let query = query().select(&["id", "name"]).with_avg("posts:score").unwrap();
        assert_eq!(query.columns().unwrap().len(), 3);

        #[cfg(feature = "postgres")]
        assert_eq!(
            query.to_sql(),
            "SELECT \"id\", \"name\", (SELECT AVG(\"posts\".\"score\") FROM \"posts\" WHERE \"users\".\"id\" = \"posts\".\"user_id\") AS \"posts__score_avg\" FROM \"users\""
        );
    }

    #[test]
    fn test_full_statement_numbering() {
        let query = query()
            .where_("active = {}", &["true"])
            .with_sum(
                RelationSet::new()
                    .constrain("posts:amount as total", |q| q.where_("status = {}", &["paid"]))
                    .constrain("posts:amount as recent", |q| q.where_("created_at > {}", &["2024-01-01"])),
            )
            .unwrap()
            .order_by("total__amount_sum", "desc")
            .limit(10)
            .offset(20);

        assert_eq!(query.params(), vec!["paid", "2024-01-01", "true"]);

        #[cfg(feature = "postgres")]
        assert_eq!(
            query.to_sql(),
            "SELECT \"users\".*, \
             (SELECT SUM(\"posts\".\"amount\") FROM \"posts\" WHERE \"users\".\"id\" = \"posts\".\"user_id\" AND (status = $1)) AS \"total__amount_sum\", \
             (SELECT SUM(\"posts\".\"amount\") FROM \"posts\" WHERE \"users\".\"id\" = \"posts\".\"user_id\" AND (created_at > $2)) AS \"recent__amount_sum\" \
             FROM \"users\" WHERE active = $3 ORDER BY \"total__amount_sum\" DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_same_relation_different_constraints() {
        let query = query()
            .with_count(
                RelationSet::new()
                    .constrain("posts as total", |q| q)
                    .constrain("posts as recent", |q| q.where_("created_at > {}", &["2024-01-01"])),
            )
            .unwrap();

        let subqueries: Vec<&RelationQuery> = query
            .columns()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                SelectExpr::Subquery { query, .. } => Some(query),
                _ => None,
            })
            .collect();

        assert_eq!(subqueries.len(), 2);
        assert_eq!(subqueries[0].params().count(), 0);
        assert_eq!(subqueries[1].params().count(), 1);
        assert_eq!(aliases(&query), vec!["total__all_count", "recent__all_count"]);
    }

    #[test]
    fn test_self_relation_gets_table_alias() {
        let query = query().with_count("children").unwrap();
        let sql = query.to_sql();

        #[cfg(feature = "postgres")]
        assert!(sql.contains(
            "(SELECT COUNT(*) FROM \"users\" AS \"users_agg_1\" WHERE \"users\".\"id\" = \"users_agg_1\".\"parent_id\") AS \"children__all_count\""
        ));

        assert!(sql.contains("users_agg_1"));
    }

    #[test]
    fn test_named_function() {
        let query = query().with_aggregate_named("posts:amount", "mAx").unwrap();
        assert_eq!(aliases(&query), vec!["posts__amount_max"]);

        let err = self::query().with_aggregate_named("posts:amount", "median").err().unwrap();
        assert!(matches!(err, Error::UnsupportedAggregate(name) if name == "median"));
    }

    #[test]
    fn test_unknown_relation_is_an_error() {
        let err = query().with_sum("comments:likes").err().unwrap();
        assert!(matches!(err, Error::RelationNotFound { relation, .. } if relation == "comments"));

        // Four segments is not an alias, so the whole text is looked up.
        let err = self::query().with_sum("posts as p extra").err().unwrap();
        assert!(matches!(err, Error::RelationNotFound { relation, .. } if relation == "posts as p extra"));
    }

    #[test]
    fn test_soft_deleted_base_rows_are_filtered() {
        let query: ModelQuery<Db> = ModelQuery::new(&ARCHIVED).where_("id > {}", &["5"]);

        #[cfg(feature = "postgres")]
        {
            assert_eq!(
                query.to_sql(),
                "SELECT * FROM \"archived_users\" WHERE (\"archived_users\".\"deleted_at\" IS NULL) AND (id > $1)"
            );
            assert_eq!(query.with_trashed().to_sql(), "SELECT * FROM \"archived_users\" WHERE id > $1");
        }

        #[cfg(not(feature = "postgres"))]
        assert!(query.to_sql().contains("IS NULL"));
    }

    #[test]
    fn test_build_is_cached() {
        let first = query().with_min("posts:amount").unwrap();
        let second = query().with_min("posts:amount").unwrap();
        assert!(std::ptr::eq(first.build(), second.build()));
        assert_eq!(first.build(), first.to_sql());
    }

    #[test]
    fn test_build_cache_ignores_bound_values() {
        let first = query()
            .where_("id = {}", &["1"])
            .with_sum(RelationSet::new().constrain("posts:amount", |q| q.where_("status = {}", &["paid"])))
            .unwrap();
        let second = query()
            .where_("id = {}", &["2"])
            .with_sum(RelationSet::new().constrain("posts:amount", |q| q.where_("status = {}", &["draft"])))
            .unwrap();

        assert_ne!(first.params(), second.params());
        assert!(std::ptr::eq(first.build(), second.build()));
    }

    #[test]
    fn test_dotted_column_alias_is_one_identifier() {
        let query = query().with_sum("posts:posts.amount").unwrap().order_by("posts__posts.amount_sum", "DESC");
        assert_eq!(aliases(&query), vec!["posts__posts.amount_sum"]);

        #[cfg(feature = "postgres")]
        assert_eq!(
            query.to_sql(),
            "SELECT \"users\".*, (SELECT SUM(\"posts\".\"amount\") FROM \"posts\" WHERE \"users\".\"id\" = \"posts\".\"user_id\") \
             AS \"posts__posts.amount_sum\" FROM \"users\" ORDER BY \"posts__posts.amount_sum\" DESC"
        );
    }

    #[test]
    fn test_dotted_user_alias_and_column_order() {
        let query = query().with_count("posts as a.b").unwrap().order_by("users.id", "asc");
        assert_eq!(aliases(&query), vec!["a.b__all_count"]);

        #[cfg(feature = "postgres")]
        {
            let sql = query.to_sql();
            assert!(sql.contains("AS \"a.b__all_count\""));
            assert!(sql.ends_with("ORDER BY \"users\".\"id\" ASC"));
        }
    }

    #[test]
    fn test_select_sub_and_raw() {
        let relation = ResolvedRelation::find(users(), "posts").unwrap();
        let sub = RelationQuery::new(&relation, AggregateFunction::Max, "created_at", None);
        let query = query().select_raw("1 AS one").select_sub(sub, "latest_post");

        let columns = query.columns().unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[1], SelectExpr::Raw("1 AS one".to_string()));
        assert_eq!(aliases(&query), vec!["latest_post"]);
    }
}
