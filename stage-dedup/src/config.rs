use std::str::FromStr;
use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use envconfig::Envconfig;
use stage_common::config::StageConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub stage: StageConfig,

    #[envconfig(default = "redis")]
    pub dedup_backend: DedupBackend,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: u64,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("stage-dedup", "events_raw");
        Self::init_from_env()
    }

    pub fn redis_response_timeout(&self) -> Option<Duration> {
        match self.redis_response_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Where seen keys are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupBackend {
    Redis,
    Memory,
}

impl FromStr for DedupBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(DedupBackend::Redis),
            "memory" => Ok(DedupBackend::Memory),
            _ => Err(format!("unknown dedup backend: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("redis".parse::<DedupBackend>(), Ok(DedupBackend::Redis));
        assert_eq!("Memory".parse::<DedupBackend>(), Ok(DedupBackend::Memory));
        assert!("mongo".parse::<DedupBackend>().is_err());
    }

    #[test]
    fn test_config_from_env() {
        let env: HashMap<String, String> = [
            ("KAFKA_CONSUMER_GROUP", "dedup"),
            ("KAFKA_CONSUMER_TOPIC", "events"),
            ("DEDUP_BACKEND", "memory"),
            ("REDIS_RESPONSE_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.dedup_backend, DedupBackend::Memory);
        assert_eq!(config.redis_response_timeout(), None);
        assert_eq!(config.stage.consumer.kafka_consumer_group, "dedup");
    }
}
