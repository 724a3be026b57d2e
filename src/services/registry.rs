use crate::services::cep::{CepEngine, RuleSpec};
use crate::services::error::{EventError, EventResult};
use crate::services::rule_sync::RuleSyncClient;
use crate::services::sql_guard;
use crate::services::templates;
use crate::services::types::{ActionKind, AlertConfig, CompareOp, ProcessConfig, Rule};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use uuid::Uuid;

/// Hook for a caller to persist the registry's rules outside the process.
/// No concrete backend ships with this crate; a database- or file-backed
/// implementation can be plugged in without the registry knowing about it.
pub trait RegistrySnapshot: Send + Sync {
    fn save(&self, rules: &[Rule]);
    fn load(&self) -> Vec<Rule>;
}

#[derive(Debug, Clone)]
pub struct NewRuleInput {
    pub name: String,
    pub description: String,
    pub natural_language_condition: String,
    pub sql: String,
    pub check_interval_minutes: u32,
    pub condition_threshold: String,
    pub action_type: ActionKind,
    pub alert_config: Option<AlertConfig>,
    pub process_config: Option<ProcessConfig>,
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
    pub window_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct NaturalLanguageRuleInput {
    pub name: String,
    pub description: String,
    pub natural_language_condition: String,
    pub sql: String,
    pub check_interval_minutes: u32,
    pub condition_threshold: String,
    pub action_type: ActionKind,
    pub alert_config: Option<AlertConfig>,
    pub process_config: Option<ProcessConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateOverrides {
    pub name: Option<String>,
    pub check_interval_minutes: Option<u32>,
    pub alert_config: Option<AlertConfig>,
    pub process_config: Option<ProcessConfig>,
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub natural_language_condition: Option<String>,
    pub sql: Option<String>,
    pub check_interval_minutes: Option<u32>,
    pub condition_threshold: Option<String>,
    pub action_type: Option<ActionKind>,
    pub alert_config: Option<Option<AlertConfig>>,
    pub process_config: Option<Option<ProcessConfig>>,
    pub field_name: Option<String>,
    pub operator: Option<CompareOp>,
    pub threshold: Option<f64>,
    pub duration_minutes: Option<u32>,
    pub window_minutes: Option<u32>,
}

/// Owns the CRUD-visible set of rules, keeps the in-process `CepEngine` in
/// sync with every change, and mirrors writes to the external CEP service on
/// a best-effort basis (a sync failure is logged, never propagated).
pub struct RuleRegistry {
    rules: Mutex<HashMap<String, Rule>>,
    cep: Arc<CepEngine>,
    sync: Arc<RuleSyncClient>,
    snapshot: Option<Arc<dyn RegistrySnapshot>>,
}

impl RuleRegistry {
    pub fn new(cep: Arc<CepEngine>, sync: Arc<RuleSyncClient>) -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
            cep,
            sync,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Arc<dyn RegistrySnapshot>) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Loads rules from the configured snapshot (if any) and arms the CEP
    /// engine with each one. Intended to run once at startup.
    pub fn restore(&self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let loaded = snapshot.load();
        let mut rules = self.rules.lock().expect("rule registry lock poisoned");
        for rule in loaded {
            self.cep.register(rule_spec(&rule));
            rules.insert(rule.id.clone(), rule);
        }
    }

    pub fn list(&self) -> Vec<Rule> {
        self.rules
            .lock()
            .expect("rule registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, rule_id: &str) -> Option<Rule> {
        self.rules
            .lock()
            .expect("rule registry lock poisoned")
            .get(rule_id)
            .cloned()
    }

    pub async fn create(&self, input: NewRuleInput) -> EventResult<Rule> {
        let (validated_sql, _) = sql_guard::validate(&input.sql)?;

        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            description: input.description,
            natural_language_condition: input.natural_language_condition,
            sql: validated_sql,
            check_interval_minutes: input.check_interval_minutes.max(1),
            condition_threshold: input.condition_threshold,
            action_type: input.action_type,
            alert_config: input.alert_config,
            process_config: input.process_config,
            is_active: true,
            created_at: Utc::now(),
            field_name: input.field_name,
            operator: input.operator,
            threshold: input.threshold,
            window_minutes: input.window_minutes.max(1),
            duration_minutes: input.duration_minutes,
            last_triggered_at: None,
            trigger_count: 0,
        };

        self.cep.register(rule_spec(&rule));
        {
            let mut rules = self.rules.lock().expect("rule registry lock poisoned");
            rules.insert(rule.id.clone(), rule.clone());
        }
        self.persist();

        if self.sync.is_enabled() {
            if let Err(err) = self.sync.create_rule(&rule).await {
                tracing::warn!(rule_id = %rule.id, error = %err, "rule sync create failed");
            }
        }

        Ok(rule)
    }

    pub async fn create_from_natural_language(
        &self,
        input: NaturalLanguageRuleInput,
    ) -> EventResult<Rule> {
        let parsed = parse_natural_language_condition(&input.natural_language_condition);
        let window_minutes = Rule::default_window_minutes(parsed.duration_minutes);
        self.create(NewRuleInput {
            name: input.name,
            description: input.description,
            natural_language_condition: input.natural_language_condition,
            sql: input.sql,
            check_interval_minutes: input.check_interval_minutes,
            condition_threshold: input.condition_threshold,
            action_type: input.action_type,
            alert_config: input.alert_config,
            process_config: input.process_config,
            field_name: parsed.field_name,
            operator: parsed.operator,
            threshold: parsed.threshold,
            duration_minutes: parsed.duration_minutes,
            window_minutes,
        })
        .await
    }

    pub async fn create_from_template(
        &self,
        template_id: &str,
        overrides: TemplateOverrides,
    ) -> EventResult<Rule> {
        let template = templates::get(template_id)
            .ok_or_else(|| EventError::TemplateNotFound(template_id.to_string()))?;

        self.create(NewRuleInput {
            name: overrides.name.unwrap_or_else(|| template.name.clone()),
            description: template.description.clone(),
            natural_language_condition: template.rule_description.clone(),
            sql: template.sample_sql.clone(),
            check_interval_minutes: overrides
                .check_interval_minutes
                .unwrap_or(template.default_interval_minutes),
            condition_threshold: template.default_threshold.clone(),
            action_type: template.recommended_action,
            alert_config: overrides.alert_config,
            process_config: overrides.process_config,
            field_name: overrides.field_name,
            operator: overrides.operator,
            threshold: overrides.threshold,
            duration_minutes: overrides.duration_minutes,
            window_minutes: Rule::default_window_minutes(overrides.duration_minutes),
        })
        .await
    }

    pub async fn update(&self, rule_id: &str, update: RuleUpdate) -> EventResult<Rule> {
        let mut rule = self
            .get(rule_id)
            .ok_or_else(|| EventError::RuleNotFound(rule_id.to_string()))?;

        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(description) = update.description {
            rule.description = description;
        }
        if let Some(nl) = update.natural_language_condition {
            rule.natural_language_condition = nl;
        }
        if let Some(sql) = update.sql {
            let (validated, _) = sql_guard::validate(&sql)?;
            rule.sql = validated;
        }
        if let Some(interval) = update.check_interval_minutes {
            rule.check_interval_minutes = interval.max(1);
        }
        if let Some(threshold_expr) = update.condition_threshold {
            rule.condition_threshold = threshold_expr;
        }
        if let Some(action_type) = update.action_type {
            rule.action_type = action_type;
        }
        if let Some(alert_config) = update.alert_config {
            rule.alert_config = alert_config;
        }
        if let Some(process_config) = update.process_config {
            rule.process_config = process_config;
        }
        if let Some(field_name) = update.field_name {
            rule.field_name = field_name;
        }
        if let Some(operator) = update.operator {
            rule.operator = operator;
        }
        if let Some(threshold) = update.threshold {
            rule.threshold = threshold;
        }
        if let Some(duration_minutes) = update.duration_minutes {
            rule.duration_minutes = duration_minutes;
        }
        if let Some(window_minutes) = update.window_minutes {
            rule.window_minutes = window_minutes.max(1);
        }

        self.cep.update_spec(rule_spec(&rule));
        {
            let mut rules = self.rules.lock().expect("rule registry lock poisoned");
            rules.insert(rule_id.to_string(), rule.clone());
        }
        self.persist();

        if self.sync.is_enabled() {
            if let Err(err) = self.sync.update_rule(rule_id, &rule).await {
                tracing::warn!(rule_id, error = %err, "rule sync update failed");
            }
        }

        Ok(rule)
    }

    pub async fn delete(&self, rule_id: &str) -> EventResult<()> {
        let removed = {
            let mut rules = self.rules.lock().expect("rule registry lock poisoned");
            rules.remove(rule_id)
        };
        if removed.is_none() {
            return Err(EventError::RuleNotFound(rule_id.to_string()));
        }
        self.cep.unregister(rule_id);
        self.persist();

        if self.sync.is_enabled() {
            if let Err(err) = self.sync.delete_rule(rule_id).await {
                tracing::warn!(rule_id, error = %err, "rule sync delete failed");
            }
        }

        Ok(())
    }

    pub async fn toggle(&self, rule_id: &str) -> EventResult<Rule> {
        let rule = {
            let mut rules = self.rules.lock().expect("rule registry lock poisoned");
            let rule = rules
                .get_mut(rule_id)
                .ok_or_else(|| EventError::RuleNotFound(rule_id.to_string()))?;
            rule.is_active = !rule.is_active;
            rule.clone()
        };
        self.cep.set_active(rule_id, rule.is_active);
        self.persist();

        if self.sync.is_enabled() {
            if let Err(err) = self.sync.toggle_rule(rule_id).await {
                tracing::warn!(rule_id, error = %err, "rule sync toggle failed");
            }
        }

        Ok(rule)
    }

    /// Records that a rule fired, for display in the rule list. Called by
    /// whatever wires a `CepEngine` trigger callback back into the registry.
    pub fn record_trigger(&self, rule_id: &str, triggered_at: DateTime<Utc>) {
        let mut rules = self.rules.lock().expect("rule registry lock poisoned");
        if let Some(rule) = rules.get_mut(rule_id) {
            rule.last_triggered_at = Some(triggered_at);
            rule.trigger_count += 1;
        }
    }

    fn persist(&self) {
        if let Some(snapshot) = &self.snapshot {
            let rules: Vec<Rule> = self
                .rules
                .lock()
                .expect("rule registry lock poisoned")
                .values()
                .cloned()
                .collect();
            snapshot.save(&rules);
        }
    }
}

fn rule_spec(rule: &Rule) -> RuleSpec {
    RuleSpec {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        field_name: rule.field_name.clone(),
        operator: rule.operator,
        threshold: rule.threshold,
        window_minutes: rule.window_minutes,
        duration_minutes: rule.duration_minutes,
        action_type: rule.action_type,
        is_active: rule.is_active,
    }
}

struct ParsedCondition {
    field_name: String,
    field_recognized: bool,
    operator: CompareOp,
    operator_recognized: bool,
    threshold: f64,
    threshold_recognized: bool,
    duration_minutes: u32,
}

/// Read-only view of what `create_from_natural_language` would derive from a
/// given condition string, for an authoring UI to show before committing.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct NaturalLanguagePreview {
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub duration_minutes: u32,
    pub window_minutes: u32,
    /// True once field, operator, and threshold were all confidently
    /// extracted. A missing duration does not block confirmation — it just
    /// defaults to 0 and the rule fires on the very first sample over.
    pub ready_to_confirm: bool,
}

pub fn preview_natural_language_condition(text: &str) -> NaturalLanguagePreview {
    let parsed = parse_natural_language_condition(text);
    NaturalLanguagePreview {
        window_minutes: Rule::default_window_minutes(parsed.duration_minutes),
        ready_to_confirm: parsed.field_recognized
            && parsed.operator_recognized
            && parsed.threshold_recognized,
        field_name: parsed.field_name,
        operator: parsed.operator,
        threshold: parsed.threshold,
        duration_minutes: parsed.duration_minutes,
    }
}

fn threshold_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:m|미터|%|도)?").expect("valid regex"))
}

fn duration_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*(분|시간).{0,5}(지속|이상)").expect("valid regex"))
}

/// Ports the field/operator/threshold/duration extraction used to turn a
/// Korean natural-language condition into CEP predicate parameters. Anything
/// it can't find falls back to a conservative default rather than erroring,
/// since the caller can always edit the rule afterward.
fn parse_natural_language_condition(text: &str) -> ParsedCondition {
    let field_recognized = text.contains("수위") || text.contains("유량") || text.contains("탁도");
    let field_name = if text.contains("수위") {
        "water_level"
    } else if text.contains("유량") {
        "flow_rate"
    } else if text.contains("탁도") {
        "turbidity"
    } else {
        "value"
    }
    .to_string();

    let operator_recognized =
        text.contains("초과") || text.contains("미만") || text.contains("이하");
    let operator = if text.contains("초과") {
        CompareOp::Gt
    } else if text.contains("미만") {
        CompareOp::Lt
    } else if text.contains("이하") {
        CompareOp::Lte
    } else {
        CompareOp::Gte
    };

    let threshold_match = threshold_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let threshold_recognized = threshold_match.is_some();
    let threshold = threshold_match.unwrap_or(0.0);

    let duration_minutes = duration_pattern()
        .captures(text)
        .map(|c| {
            let value: u32 = c[1].parse().unwrap_or(0);
            if &c[2] == "시간" {
                value * 60
            } else {
                value
            }
        })
        .unwrap_or(0);

    ParsedCondition {
        field_name,
        field_recognized,
        operator,
        operator_recognized,
        threshold,
        threshold_recognized,
        duration_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(
            Arc::new(CepEngine::new()),
            Arc::new(RuleSyncClient::new("http://localhost:8088".to_string(), false)),
        )
    }

    #[test]
    fn parses_water_level_exceeds_with_duration() {
        let parsed = parse_natural_language_condition("정수지 수위가 3.5m 초과 상태로 12분 이상 지속되면 알림");
        assert_eq!(parsed.field_name, "water_level");
        assert_eq!(parsed.operator, CompareOp::Gt);
        assert_eq!(parsed.threshold, 3.5);
        assert_eq!(parsed.duration_minutes, 12);
    }

    #[test]
    fn parses_hour_duration_as_minutes() {
        let parsed = parse_natural_language_condition("유량이 100 미만으로 1시간 이상 지속");
        assert_eq!(parsed.field_name, "flow_rate");
        assert_eq!(parsed.operator, CompareOp::Lt);
        assert_eq!(parsed.threshold, 100.0);
        assert_eq!(parsed.duration_minutes, 60);
    }

    #[test]
    fn unrecognized_field_and_duration_fall_back_to_defaults() {
        let parsed = parse_natural_language_condition("값이 5 이하일 때");
        assert_eq!(parsed.field_name, "value");
        assert_eq!(parsed.operator, CompareOp::Lte);
        assert_eq!(parsed.threshold, 5.0);
        assert_eq!(parsed.duration_minutes, 0);
    }

    #[test]
    fn preview_is_ready_to_confirm_once_field_operator_and_threshold_are_recognized() {
        let preview = preview_natural_language_condition("수위가 3.5m 초과 상태로 지속되면 알림");
        assert!(preview.ready_to_confirm);
        assert_eq!(preview.duration_minutes, 0);
    }

    #[test]
    fn preview_is_not_ready_to_confirm_when_field_is_unrecognized() {
        let preview = preview_natural_language_condition("값이 5 이하일 때");
        assert!(!preview.ready_to_confirm);
    }

    #[tokio::test]
    async fn create_from_natural_language_derives_predicate_and_window() {
        let registry = registry();
        let rule = registry
            .create_from_natural_language(NaturalLanguageRuleInput {
                name: "수위 경보".to_string(),
                description: "정수지 수위 경보".to_string(),
                natural_language_condition: "수위가 3.5m 초과 상태로 12분 이상 지속".to_string(),
                sql: "SELECT water_level FROM water_tank_levels".to_string(),
                check_interval_minutes: 5,
                condition_threshold: "rows > 0".to_string(),
                action_type: ActionKind::Alert,
                alert_config: None,
                process_config: None,
            })
            .await
            .expect("should create");

        assert_eq!(rule.field_name, "water_level");
        assert_eq!(rule.operator, CompareOp::Gt);
        assert_eq!(rule.threshold, 3.5);
        assert_eq!(rule.duration_minutes, 12);
        assert_eq!(rule.window_minutes, 30);
        assert!(rule.is_active);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_unsafe_sql() {
        let registry = registry();
        let err = registry
            .create(NewRuleInput {
                name: "bad".to_string(),
                description: "bad".to_string(),
                natural_language_condition: String::new(),
                sql: "DELETE FROM water_tank_levels".to_string(),
                check_interval_minutes: 5,
                condition_threshold: "rows > 0".to_string(),
                action_type: ActionKind::Alert,
                alert_config: None,
                process_config: None,
                field_name: "water_level".to_string(),
                operator: CompareOp::Gt,
                threshold: 1.0,
                duration_minutes: 0,
                window_minutes: 30,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::UnsafeSql(_)));
    }

    #[tokio::test]
    async fn create_from_template_uses_template_defaults() {
        let registry = registry();
        let rule = registry
            .create_from_template(
                "gac-turbidity-rise",
                TemplateOverrides {
                    field_name: "turbidity".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 1.0,
                    duration_minutes: 10,
                    ..Default::default()
                },
            )
            .await
            .expect("should create");

        assert_eq!(rule.name, "여과지 탁도 상승");
        assert_eq!(rule.action_type, ActionKind::Alert);
        assert_eq!(rule.check_interval_minutes, 10);
    }

    #[tokio::test]
    async fn create_from_template_rejects_unknown_template() {
        let registry = registry();
        let err = registry
            .create_from_template("does-not-exist", TemplateOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn toggle_flips_active_flag() {
        let registry = registry();
        let rule = registry
            .create_from_template(
                "gac-turbidity-rise",
                TemplateOverrides {
                    field_name: "turbidity".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 1.0,
                    duration_minutes: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(rule.is_active);

        let toggled = registry.toggle(&rule.id).await.unwrap();
        assert!(!toggled.is_active);
        assert_eq!(registry.get(&rule.id).unwrap().is_active, false);
    }

    #[tokio::test]
    async fn delete_removes_rule_and_errors_on_repeat() {
        let registry = registry();
        let rule = registry
            .create_from_template(
                "gac-turbidity-rise",
                TemplateOverrides {
                    field_name: "turbidity".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 1.0,
                    duration_minutes: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        registry.delete(&rule.id).await.unwrap();
        assert!(registry.get(&rule.id).is_none());
        let err = registry.delete(&rule.id).await.unwrap_err();
        assert!(matches!(err, EventError::RuleNotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_unsafe_sql_and_keeps_existing_rule() {
        let registry = registry();
        let rule = registry
            .create_from_template(
                "gac-turbidity-rise",
                TemplateOverrides {
                    field_name: "turbidity".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 1.0,
                    duration_minutes: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = registry
            .update(
                &rule.id,
                RuleUpdate {
                    sql: Some("DROP TABLE filter_readings".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::UnsafeSql(_)));
        assert_eq!(registry.get(&rule.id).unwrap().sql, rule.sql);
    }

    #[tokio::test]
    async fn record_trigger_updates_last_triggered_and_count() {
        let registry = registry();
        let rule = registry
            .create_from_template(
                "gac-turbidity-rise",
                TemplateOverrides {
                    field_name: "turbidity".to_string(),
                    operator: CompareOp::Gt,
                    threshold: 1.0,
                    duration_minutes: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let now = Utc::now();
        registry.record_trigger(&rule.id, now);
        let updated = registry.get(&rule.id).unwrap();
        assert_eq!(updated.trigger_count, 1);
        assert_eq!(updated.last_triggered_at, Some(now));
    }
}
