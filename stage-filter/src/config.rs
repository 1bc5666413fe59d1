use common_kafka::config::ConsumerConfig;
use envconfig::Envconfig;
use stage_common::config::StageConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub stage: StageConfig,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("stage-filter", "events_enriched");
        Self::init_from_env()
    }
}
