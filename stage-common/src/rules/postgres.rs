use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool};
use tokio::time::timeout;
use tracing::{error, info};

use super::{Rule, RuleSource};
use crate::error::FetchError;

/// Build a lazily connecting pool: a database that is down at startup must not
/// keep the stage from consuming, the first refresh just fails and is retried.
pub fn get_pool(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .test_before_acquire(true)
        .connect_lazy(url)
}

/// Loads rule rows of type `R` from Postgres with a fixed query.
///
/// The query takes a single `BIGINT` parameter, the stage id to scope the
/// rules to, or `NULL` to load every row. It must order its rows by rule id.
pub struct PostgresRuleSource<R> {
    pool: PgPool,
    query: &'static str,
    stage_id: Option<i64>,
    fetch_timeout: Duration,
    _rule: PhantomData<fn() -> R>,
}

impl<R> PostgresRuleSource<R> {
    pub fn new(pool: PgPool, query: &'static str, stage_id: Option<i64>, fetch_timeout: Duration) -> Self {
        Self {
            pool,
            query,
            stage_id,
            fetch_timeout,
            _rule: PhantomData,
        }
    }
}

#[async_trait]
impl<R> RuleSource<R> for PostgresRuleSource<R>
where
    R: Rule + for<'r> FromRow<'r, PgRow> + Unpin,
{
    async fn fetch_rules(&self) -> Result<Vec<R>, FetchError> {
        let query = sqlx::query_as::<_, R>(self.query)
            .bind(self.stage_id)
            .fetch_all(&self.pool);

        match timeout(self.fetch_timeout, query).await {
            Ok(Ok(rules)) => Ok(rules),
            Ok(Err(e)) => {
                error!("Failed to fetch rules: {}", e);
                Err(FetchError::from(e))
            }
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Rule database pool closed");
    }
}
