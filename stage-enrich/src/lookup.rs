use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use stage_common::{json_text, LookupError};
use tokio::time::timeout;
use tracing::{error, info};

/// Document store queried by field equality.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// Most recently inserted document whose `field` equals `value`.
    async fn find_latest(&self, field: &str, value: &str) -> Result<Option<Value>, LookupError>;

    async fn close(&self) {}
}

fn is_valid_table_name(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Documents kept as JSONB rows of `table (id BIGSERIAL, document JSONB)`.
pub struct PgDocumentLookup {
    pool: PgPool,
    query: String,
    lookup_timeout: Duration,
}

impl PgDocumentLookup {
    pub fn new(pool: PgPool, table: &str, lookup_timeout: Duration) -> Result<Self, LookupError> {
        if !is_valid_table_name(table) {
            return Err(LookupError::Unavailable(format!(
                "invalid documents table name: {table}"
            )));
        }

        Ok(Self {
            pool,
            query: format!(
                "SELECT document FROM {table} WHERE document ->> $1 = $2 ORDER BY id DESC LIMIT 1"
            ),
            lookup_timeout,
        })
    }
}

#[async_trait]
impl DocumentLookup for PgDocumentLookup {
    async fn find_latest(&self, field: &str, value: &str) -> Result<Option<Value>, LookupError> {
        let query = sqlx::query_scalar::<_, Value>(&self.query)
            .bind(field)
            .bind(value)
            .fetch_optional(&self.pool);

        match timeout(self.lookup_timeout, query).await {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(sqlx::Error::PoolTimedOut)) => Err(LookupError::Timeout),
            Ok(Err(e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)))) => {
                Err(LookupError::Decode(e.to_string()))
            }
            Ok(Err(e)) => {
                error!("Document lookup failed: {}", e);
                Err(LookupError::Unavailable(e.to_string()))
            }
            Err(_) => Err(LookupError::Timeout),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Documents pool closed");
    }
}

/// In-process document list, newest last.
#[derive(Default)]
pub struct MemoryDocumentLookup {
    documents: Mutex<Vec<Value>>,
}

impl MemoryDocumentLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Value) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.push(document);
        }
    }
}

#[async_trait]
impl DocumentLookup for MemoryDocumentLookup {
    async fn find_latest(&self, field: &str, value: &str) -> Result<Option<Value>, LookupError> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| LookupError::Unavailable("document lock poisoned".to_string()))?;

        Ok(documents
            .iter()
            .rev()
            .find(|doc| doc.get(field).is_some_and(|v| json_text(v) == value))
            .cloned())
    }
}
