use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use envconfig::Envconfig;
use stage_common::config::StageConfig;

use crate::engine::LookupErrorPolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub stage: StageConfig,

    // Falls back to the rules database when unset
    pub documents_database_url: Option<String>,

    #[envconfig(default = "enrichment_documents")]
    pub documents_table: String,

    #[envconfig(default = "4")]
    pub documents_max_pg_connections: u32,

    #[envconfig(default = "1000")]
    pub documents_lookup_timeout_ms: u64,

    #[envconfig(default = "skip")]
    pub enrichment_lookup_error_policy: LookupErrorPolicy,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        ConsumerConfig::set_defaults("stage-enrich", "events_deduplicated");
        Self::init_from_env()
    }

    pub fn documents_database_url(&self) -> &str {
        self.documents_database_url
            .as_deref()
            .unwrap_or(&self.stage.rules.database_url)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.documents_lookup_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Config {
        let mut env: HashMap<String, String> = [
            ("KAFKA_CONSUMER_GROUP", "enrich"),
            ("KAFKA_CONSUMER_TOPIC", "events"),
            ("DATABASE_URL", "postgres://localhost/rules"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        env.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_documents_database_defaults_to_rules_database() {
        let config = load(&[]);
        assert_eq!(config.documents_database_url(), "postgres://localhost/rules");
        assert_eq!(config.enrichment_lookup_error_policy, LookupErrorPolicy::Skip);

        let config = load(&[
            ("DOCUMENTS_DATABASE_URL", "postgres://localhost/docs"),
            ("ENRICHMENT_LOOKUP_ERROR_POLICY", "default"),
        ]);
        assert_eq!(config.documents_database_url(), "postgres://localhost/docs");
        assert_eq!(config.enrichment_lookup_error_policy, LookupErrorPolicy::Default);
    }
}
