//! PostgreSQL row store.
//!
//! Every insert opens its own connection, runs one statement and closes the
//! connection again, whether or not the statement succeeded. Nothing is
//! pooled or shared between messages.
//!
//! Parameter types follow the extracted scalar type:
//!
//! | Bind value  | PostgreSQL type |
//! |-------------|-----------------|
//! | `Int`       | `INT8`          |
//! | `Float`     | `FLOAT8`        |
//! | `Bool`      | `BOOL`          |
//! | `Text`      | `TEXT`          |
//! | `Timestamp` | `TIMESTAMP`     |

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Connection, Postgres};

use crate::error::{PipelineError, Result};
use crate::template::BindValue;
use crate::traits::RowStore;

/// Bind positional values onto `sql` in order.
fn bind_values<'q>(sql: &'q str, values: &'q [BindValue]) -> Query<'q, Postgres, PgArguments> {
    values
        .iter()
        .fold(sqlx::query(sql), |query, value| match value {
            BindValue::Int(v) => query.bind(*v),
            BindValue::Float(v) => query.bind(*v),
            BindValue::Bool(v) => query.bind(*v),
            BindValue::Text(v) => query.bind(v.as_str()),
            BindValue::Timestamp(v) => query.bind(*v),
        })
}

/// Inserts rows over a fresh connection per call.
pub struct PostgresRowStore {
    options: PgConnectOptions,
}

impl PostgresRowStore {
    /// Parse the connection string. Nothing is connected until the first insert.
    pub fn new(connection_string: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(connection_string).map_err(|e| {
            PipelineError::Config(format!("invalid POSTGRESQL_CONNECTION_STRING: {}", e))
        })?;
        Ok(Self::with_options(options))
    }

    pub fn with_options(options: PgConnectOptions) -> Self {
        // Statements are logged by the collector with their outcome.
        Self {
            options: options.disable_statement_logging(),
        }
    }

    async fn connect(&self) -> Result<PgConnection> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| PipelineError::Persistence(format!("failed to connect to PostgreSQL: {}", e)))
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    async fn insert(&self, sql: &str, values: &[BindValue]) -> Result<u64> {
        let mut conn = self.connect().await?;

        let result = bind_values(sql, values).execute(&mut conn).await;

        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "failed to close PostgreSQL connection cleanly");
        }

        result
            .map(|done| done.rows_affected())
            .map_err(|e| PipelineError::Persistence(e.to_string()))
    }
}
