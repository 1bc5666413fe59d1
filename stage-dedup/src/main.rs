use std::sync::Arc;

use anyhow::Context;
use stage_common::rules::postgres::{get_pool, PostgresRuleSource};
use stage_common::service::{run_stage, setup_tracing};
use tracing::info;

use stage_dedup::config::{Config, DedupBackend};
use stage_dedup::engine::DedupEngine;
use stage_dedup::rules::{DedupRule, DEDUP_RULES_QUERY};
use stage_dedup::store::{DedupStore, MemoryDedupStore, RedisDedupStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting dedup stage...");

    let config = Config::init_with_defaults().context("failed to load configuration")?;

    let store: Arc<dyn DedupStore> = match config.dedup_backend {
        DedupBackend::Redis => Arc::new(
            RedisDedupStore::new(&config.redis_url, config.redis_response_timeout())
                .await
                .context("failed to connect to redis")?,
        ),
        DedupBackend::Memory => Arc::new(MemoryDedupStore::new()),
    };

    let rules_config = &config.stage.rules;
    let pool = get_pool(
        &rules_config.database_url,
        rules_config.max_pg_connections,
        rules_config.fetch_timeout(),
    )
    .context("invalid rules database url")?;
    let rule_source = PostgresRuleSource::<DedupRule>::new(
        pool,
        DEDUP_RULES_QUERY,
        rules_config.rules_stage_id,
        rules_config.fetch_timeout(),
    );

    let summary = run_stage(&config.stage, DedupEngine::new(store), Arc::new(rule_source)).await?;
    info!(?summary, "Dedup stage stopped");

    Ok(())
}
