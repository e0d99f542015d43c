//! Execution of model queries through sqlx, one impl per enabled backend.

use super::ModelQuery;
use crate::error::Result;

macro_rules! impl_fetch {
    ($db:ty, $row:ty) => {
        impl ModelQuery<$db> {
            /// Executes the query and fetches all rows.
            ///
            /// # Example
            ///
            /// ```ignore
            /// #[derive(sqlx::FromRow)]
            /// struct UserTotals {
            ///     id: i64,
            ///     #[sqlx(rename = "posts__amount_sum")]
            ///     amount_sum: Option<i64>,
            /// }
            ///
            /// let rows: Vec<UserTotals> = User::query()
            ///     .with_sum("posts:amount")?
            ///     .fetch_all(&pool)
            ///     .await?;
            /// ```
            pub async fn fetch_all<O>(&self, pool: &sqlx::Pool<$db>) -> Result<Vec<O>>
            where
                O: for<'r> sqlx::FromRow<'r, $row> + Send + Unpin,
            {
                let sql = self.build();
                let params = self.params();
                tracing::debug!(table = %self.scheme.table_name, params = params.len(), "fetch_all");

                let mut query = sqlx::query_as::<$db, O>(sql);
                for param in params {
                    query = query.bind(param);
                }

                Ok(query.fetch_all(pool).await?)
            }

            /// Executes the query and fetches exactly one row.
            ///
            /// Fails with `sqlx::Error::RowNotFound` when there is none.
            pub async fn fetch_one<O>(&self, pool: &sqlx::Pool<$db>) -> Result<O>
            where
                O: for<'r> sqlx::FromRow<'r, $row> + Send + Unpin,
            {
                let sql = self.build();
                let params = self.params();
                tracing::debug!(table = %self.scheme.table_name, params = params.len(), "fetch_one");

                let mut query = sqlx::query_as::<$db, O>(sql);
                for param in params {
                    query = query.bind(param);
                }

                Ok(query.fetch_one(pool).await?)
            }

            /// Executes the query and fetches at most one row.
            pub async fn fetch_optional<O>(&self, pool: &sqlx::Pool<$db>) -> Result<Option<O>>
            where
                O: for<'r> sqlx::FromRow<'r, $row> + Send + Unpin,
            {
                let sql = self.build();
                let params = self.params();
                tracing::debug!(table = %self.scheme.table_name, params = params.len(), "fetch_optional");

                let mut query = sqlx::query_as::<$db, O>(sql);
                for param in params {
                    query = query.bind(param);
                }

                Ok(query.fetch_optional(pool).await?)
            }
        }
    };
}

#[cfg(feature = "postgres")]
impl_fetch!(sqlx::Postgres, sqlx::postgres::PgRow);

#[cfg(all(feature = "mysql", not(feature = "postgres")))]
impl_fetch!(sqlx::MySql, sqlx::mysql::MySqlRow);

#[cfg(all(feature = "sqlite", not(feature = "postgres"), not(feature = "mysql")))]
impl_fetch!(sqlx::Sqlite, sqlx::sqlite::SqliteRow);
