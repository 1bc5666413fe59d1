use std::sync::Arc;

use anyhow::{anyhow, Context};
use common_kafka::kafka_consumer::RecordConsumer;
use common_kafka::kafka_producer::{create_kafka_producer, RecordProducer};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::bus::{KafkaBusSink, KafkaBusSource};
use crate::config::StageConfig;
use crate::engine::RuleEngine;
use crate::orchestrator::{StageOrchestrator, StageSummary};
use crate::rules::{RuleSource, RuleStore};
use crate::server::{router, serve, setup_metrics_routes};

/// Install the global subscriber. `RUST_LOG` controls the filter and
/// `LOG_FORMAT=json` switches to structured output.
pub fn setup_tracing() {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if let Ok(directive) = "rdkafka=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Wire a stage to Kafka and its rule source, serve the probes, and run it
/// until SIGINT/SIGTERM or a fatal bus error.
pub async fn run_stage<E: RuleEngine>(
    config: &StageConfig,
    engine: E,
    rule_source: Arc<dyn RuleSource<E::Rule>>,
) -> anyhow::Result<StageSummary> {
    let stage = engine.name();
    info!(stage, "Starting stage");

    let rules = RuleStore::new(stage, rule_source, config.rules.settings());

    let consumer = RecordConsumer::new(&config.kafka, &config.consumer)
        .context("failed to create kafka consumer")?;
    let producer = create_kafka_producer(&config.kafka)
        .await
        .context("failed to create kafka producer")?;
    let producer = RecordProducer::new(
        producer,
        &config.kafka.kafka_producer_topic,
        config.kafka.message_timeout(),
    );

    let orchestrator = StageOrchestrator::new(
        rules,
        Arc::new(engine),
        Box::new(KafkaBusSource::new(consumer)),
        Box::new(KafkaBusSink::new(producer, config.producer_flush_timeout())),
    );

    let app = setup_metrics_routes(router(orchestrator.status()))
        .context("failed to install metrics recorder")?;
    let bind = config.bind();
    let server = tokio::spawn(async move {
        if let Err(e) = serve(app, &bind).await {
            error!("Failed to serve probes on {}: {}", bind, e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut stage_task = tokio::spawn(orchestrator.run(shutdown_rx));

    let joined = tokio::select! {
        joined = &mut stage_task => joined,
        _ = shutdown_signal() => {
            info!(stage, "Received shutdown signal, draining");
            let _ = shutdown_tx.send(true);
            match timeout(config.shutdown_timeout(), &mut stage_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    stage_task.abort();
                    server.abort();
                    return Err(anyhow!(
                        "stage did not drain within {:?}",
                        config.shutdown_timeout()
                    ));
                }
            }
        }
    };
    server.abort();

    let summary = joined.context("stage task panicked")??;
    info!(stage, ?summary, "Stage exited");
    Ok(summary)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
