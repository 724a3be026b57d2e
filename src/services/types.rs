use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Scalar comparison operator evaluated by the CEP engine against a rule's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self {
            CompareOp::Gt => value > threshold,
            CompareOp::Gte => value >= threshold,
            CompareOp::Lt => value < threshold,
            CompareOp::Lte => value <= threshold,
            CompareOp::Eq => value == threshold,
            CompareOp::Ne => value != threshold,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Alert,
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertConfig {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProcessConfig {
    pub process_name: String,
    #[serde(default)]
    pub process_params: JsonValue,
}

/// A registered rule: the CRUD-visible fields plus the CEP-side predicate the
/// registry derives from `natural_language_condition` (or explicit overrides).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: String,
    pub natural_language_condition: String,
    pub sql: String,
    pub check_interval_minutes: u32,
    pub condition_threshold: String,
    pub action_type: ActionKind,
    #[serde(default)]
    pub alert_config: Option<AlertConfig>,
    #[serde(default)]
    pub process_config: Option<ProcessConfig>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,

    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub window_minutes: u32,
    pub duration_minutes: u32,

    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
}

impl Rule {
    /// `window_minutes = max(30, duration_minutes * 2)`, matching the natural-language parser.
    pub fn default_window_minutes(duration_minutes: u32) -> u32 {
        (duration_minutes * 2).max(30)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub event_type: String,
    pub data: HashMap<String, JsonValue>,
}

impl Event {
    pub fn numeric_field(&self, field_name: &str) -> Option<f64> {
        let value = self.data.get(field_name)?;
        match value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TriggerResult {
    pub rule_id: String,
    pub rule_name: String,
    pub triggered_at: DateTime<Utc>,
    pub condition_met_duration_seconds: i64,
    pub matching_events: Vec<Event>,
    pub action_type: ActionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Notification {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub action_type: ActionKind,
    pub matching_event_count: usize,
    #[serde(default)]
    pub action_result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EventTemplate {
    pub id: String,
    pub category: String,
    pub name: String,
    pub description: String,
    pub rule_description: String,
    pub sample_sql: String,
    pub default_interval_minutes: u32,
    pub default_threshold: String,
    pub recommended_action: ActionKind,
    pub diagnostic_questions: Vec<String>,
    pub simple_questions: Vec<String>,
    pub action_questions: Vec<String>,
    #[serde(default)]
    pub suggested_process: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_op_display_round_trips_through_serde() {
        let value: CompareOp = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(value, CompareOp::Gte);
        assert_eq!(value.to_string(), ">=");
    }

    #[test]
    fn nan_never_satisfies_any_operator() {
        for op in [
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
            CompareOp::Eq,
            CompareOp::Ne,
        ] {
            assert!(!op.evaluate(f64::NAN, 1.0));
        }
    }

    #[test]
    fn default_window_minutes_floors_at_thirty() {
        assert_eq!(Rule::default_window_minutes(0), 30);
        assert_eq!(Rule::default_window_minutes(10), 30);
        assert_eq!(Rule::default_window_minutes(60), 120);
    }
}
