pub const RECORDS_RECEIVED: &str = "stage_records_received_total";
pub const RECORD_OUTCOMES: &str = "stage_record_outcomes_total";
pub const RECORD_PROCESSING_ERRORS: &str = "stage_record_processing_errors_total";
pub const RECORD_PROCESSING_TIME: &str = "stage_record_processing_duration_seconds";
pub const PUBLISH_FAILURES: &str = "stage_publish_failures_total";
pub const BUS_POLL_ERRORS: &str = "stage_bus_poll_errors_total";
pub const STAGE_STATE: &str = "stage_state";

pub const RULES_REFRESH: &str = "stage_rules_refresh_total";
pub const RULES_REFRESH_TIME: &str = "stage_rules_refresh_duration_seconds";
pub const RULES_ACTIVE: &str = "stage_rules_active";
pub const RULES_GENERATION: &str = "stage_rules_generation";
