use stage_common::Rule;

/// Every row of the stage, active or not: deactivated rules still ship with
/// the snapshot and are skipped when the key is built.
pub const DEDUP_RULES_QUERY: &str = r#"
    SELECT rule_id, field_name, time_to_live_sec, is_active
    FROM deduplication_rules
    WHERE ($1::BIGINT IS NULL OR deduplication_id = $1)
    ORDER BY rule_id
"#;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DedupRule {
    pub rule_id: i64,
    pub field_name: String,
    pub time_to_live_sec: i64,
    pub is_active: bool,
}

impl DedupRule {
    pub fn new(rule_id: i64, field_name: &str, time_to_live_sec: i64, is_active: bool) -> Self {
        Self {
            rule_id,
            field_name: field_name.to_string(),
            time_to_live_sec,
            is_active,
        }
    }
}

impl Rule for DedupRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}
