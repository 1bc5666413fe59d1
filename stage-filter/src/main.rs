use std::sync::Arc;

use anyhow::Context;
use stage_common::rules::postgres::{get_pool, PostgresRuleSource};
use stage_common::service::{run_stage, setup_tracing};
use tracing::info;

use stage_filter::config::Config;
use stage_filter::engine::FilterEngine;
use stage_filter::rules::{FilterRule, FILTER_RULES_QUERY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting filter stage...");

    let config = Config::init_with_defaults().context("failed to load configuration")?;

    let rules_config = &config.stage.rules;
    let pool = get_pool(
        &rules_config.database_url,
        rules_config.max_pg_connections,
        rules_config.fetch_timeout(),
    )
    .context("invalid rules database url")?;
    let rule_source = PostgresRuleSource::<FilterRule>::new(
        pool,
        FILTER_RULES_QUERY,
        rules_config.rules_stage_id,
        rules_config.fetch_timeout(),
    );

    let summary = run_stage(&config.stage, FilterEngine::new(), Arc::new(rule_source)).await?;
    info!(?summary, "Filter stage stopped");

    Ok(())
}
