use stage_common::Rule;

pub const ENRICH_RULES_QUERY: &str = r#"
    SELECT rule_id, field_name, field_name_enrichment, field_value, field_value_default
    FROM enrichment_rules
    WHERE ($1::BIGINT IS NULL OR enrichment_id = $1)
    ORDER BY rule_id
"#;

/// Set `field_name` to the latest document whose `field_name_enrichment`
/// equals `field_value`, or to `field_value_default` when there is none.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EnrichRule {
    pub rule_id: i64,
    pub field_name: String,
    pub field_name_enrichment: String,
    pub field_value: String,
    pub field_value_default: String,
}

impl Rule for EnrichRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}
