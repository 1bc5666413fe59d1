use std::sync::Arc;

use anyhow::Context;
use stage_common::rules::postgres::{get_pool, PostgresRuleSource};
use stage_common::service::{run_stage, setup_tracing};
use tracing::info;

use stage_enrich::config::Config;
use stage_enrich::engine::EnrichEngine;
use stage_enrich::lookup::PgDocumentLookup;
use stage_enrich::rules::{EnrichRule, ENRICH_RULES_QUERY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("Starting enrichment stage...");

    let config = Config::init_with_defaults().context("failed to load configuration")?;

    let documents_pool = get_pool(
        config.documents_database_url(),
        config.documents_max_pg_connections,
        config.lookup_timeout(),
    )
    .context("invalid documents database url")?;
    let lookup = PgDocumentLookup::new(documents_pool, &config.documents_table, config.lookup_timeout())
        .context("invalid documents table")?;

    let rules_config = &config.stage.rules;
    let pool = get_pool(
        &rules_config.database_url,
        rules_config.max_pg_connections,
        rules_config.fetch_timeout(),
    )
    .context("invalid rules database url")?;
    let rule_source = PostgresRuleSource::<EnrichRule>::new(
        pool,
        ENRICH_RULES_QUERY,
        rules_config.rules_stage_id,
        rules_config.fetch_timeout(),
    );

    let engine = EnrichEngine::new(Arc::new(lookup), config.enrichment_lookup_error_policy);
    let summary = run_stage(&config.stage, engine, Arc::new(rule_source)).await?;
    info!(?summary, "Enrichment stage stopped");

    Ok(())
}
