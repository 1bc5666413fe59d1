use stage_common::{ConfigError, Rule};

pub const FILTER_RULES_QUERY: &str = r#"
    SELECT rule_id, field_name, filter_function_name, filter_value
    FROM filter_rules
    WHERE ($1::BIGINT IS NULL OR filter_id = $1)
    ORDER BY rule_id
"#;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FilterRule {
    pub rule_id: i64,
    pub field_name: String,
    pub filter_function_name: String,
    pub filter_value: String,
}

impl FilterRule {
    pub fn new(rule_id: i64, field_name: &str, function: &str, filter_value: &str) -> Self {
        Self {
            rule_id,
            field_name: field_name.to_string(),
            filter_function_name: function.to_string(),
            filter_value: filter_value.to_string(),
        }
    }

    pub fn function(&self) -> Result<FilterFunction, ConfigError> {
        FilterFunction::from_name(&self.filter_function_name).ok_or_else(|| {
            ConfigError::UnsupportedFilterFunction {
                rule_id: self.rule_id,
                name: self.filter_function_name.clone(),
            }
        })
    }
}

impl Rule for FilterRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterFunction {
    Equals,
    Contains,
    NotEquals,
    NotContains,
}

impl FilterFunction {
    /// Function names are matched case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "equals" => Some(FilterFunction::Equals),
            "contains" => Some(FilterFunction::Contains),
            "not_equals" => Some(FilterFunction::NotEquals),
            "not_contains" => Some(FilterFunction::NotContains),
            _ => None,
        }
    }

    pub fn evaluate(&self, actual: &str, expected: &str) -> bool {
        match self {
            FilterFunction::Equals => actual == expected,
            FilterFunction::Contains => actual.contains(expected),
            FilterFunction::NotEquals => actual != expected,
            FilterFunction::NotContains => !actual.contains(expected),
        }
    }
}
