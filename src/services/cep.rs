use crate::services::types::{ActionKind, CompareOp, Event, TriggerResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// The predicate parameters the engine needs to evaluate a rule; deliberately
/// decoupled from the registry's full `Rule` so the engine never has to reach
/// back into registry state to do its job.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub rule_id: String,
    pub rule_name: String,
    pub field_name: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub window_minutes: u32,
    pub duration_minutes: u32,
    pub action_type: ActionKind,
    pub is_active: bool,
}

struct RuleBucket {
    spec: RuleSpec,
    buffer: Vec<Event>,
    // rule_id -> source_id -> first_condition_met_at
    condition_state: HashMap<String, DateTime<Utc>>,
}

type TriggerCallback = Box<dyn Fn(&TriggerResult) + Send + Sync>;

/// In-process complex event processor. One bucket per registered rule, each
/// holding its own sliding event buffer and per-source condition latch.
pub struct CepEngine {
    rules: Mutex<HashMap<String, RuleBucket>>,
    callbacks: Mutex<Vec<TriggerCallback>>,
}

impl Default for CepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CepEngine {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, spec: RuleSpec) {
        let rule_id = spec.rule_id.clone();
        let mut rules = self.rules.lock().expect("cep rules lock poisoned");
        rules.insert(
            rule_id,
            RuleBucket {
                spec,
                buffer: Vec::new(),
                condition_state: HashMap::new(),
            },
        );
    }

    pub fn unregister(&self, rule_id: &str) {
        let mut rules = self.rules.lock().expect("cep rules lock poisoned");
        rules.remove(rule_id);
    }

    /// Updates the active flag and predicate parameters of an already
    /// registered rule without touching its buffer or latch state.
    pub fn update_spec(&self, spec: RuleSpec) {
        let mut rules = self.rules.lock().expect("cep rules lock poisoned");
        if let Some(bucket) = rules.get_mut(&spec.rule_id) {
            bucket.spec = spec;
        } else {
            drop(rules);
            self.register(spec);
        }
    }

    pub fn set_active(&self, rule_id: &str, is_active: bool) {
        let mut rules = self.rules.lock().expect("cep rules lock poisoned");
        if let Some(bucket) = rules.get_mut(rule_id) {
            bucket.spec.is_active = is_active;
        }
    }

    pub fn add_trigger_callback<F>(&self, callback: F)
    where
        F: Fn(&TriggerResult) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .expect("cep callbacks lock poisoned")
            .push(Box::new(callback));
    }

    /// Routes one event through every active rule's buffer/latch, returning
    /// every trigger it caused. Never panics on a malformed event: a missing
    /// or non-numeric field is simply a no-op for that rule.
    pub fn submit(&self, event: Event) -> Vec<TriggerResult> {
        let mut results = Vec::new();
        let mut rules = self.rules.lock().expect("cep rules lock poisoned");

        for bucket in rules.values_mut() {
            if !bucket.spec.is_active {
                continue;
            }

            bucket.buffer.push(event.clone());
            let cutoff = event.timestamp - chrono::Duration::minutes(bucket.spec.window_minutes as i64);
            bucket.buffer.retain(|e| e.timestamp >= cutoff);

            if let Some(result) = evaluate_rule(bucket, &event) {
                results.push(result);
            }
        }

        drop(rules);

        let callbacks = self.callbacks.lock().expect("cep callbacks lock poisoned");
        for result in &results {
            for callback in callbacks.iter() {
                callback(result);
            }
        }

        results
    }

    /// Sorts by timestamp ascending, then submits one by one. Guarantees the
    /// same outcome as submitting the events individually in that order.
    pub fn submit_batch(&self, mut events: Vec<Event>) -> Vec<TriggerResult> {
        events.sort_by_key(|e| e.timestamp);
        events.into_iter().flat_map(|e| self.submit(e)).collect()
    }

    pub fn status(&self) -> CepStatus {
        let rules = self.rules.lock().expect("cep rules lock poisoned");
        let active_rules = rules.values().filter(|b| b.spec.is_active).count();
        let buffered_events = rules.values().map(|b| b.buffer.len()).sum();
        CepStatus {
            total_rules: rules.len(),
            active_rules,
            buffered_events,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CepStatus {
    pub total_rules: usize,
    pub active_rules: usize,
    pub buffered_events: usize,
}

fn evaluate_rule(bucket: &mut RuleBucket, latest_event: &Event) -> Option<TriggerResult> {
    let field_value = latest_event.numeric_field(&bucket.spec.field_name)?;
    let condition_met = bucket.spec.operator.evaluate(field_value, bucket.spec.threshold);
    let source_id = latest_event.source_id.clone();

    if !condition_met {
        bucket.condition_state.remove(&source_id);
        return None;
    }

    let first_met_at = *bucket
        .condition_state
        .entry(source_id.clone())
        .or_insert(latest_event.timestamp);

    let duration = latest_event.timestamp - first_met_at;
    let required = chrono::Duration::minutes(bucket.spec.duration_minutes as i64);

    if duration < required {
        return None;
    }

    let matching_events: Vec<Event> = bucket
        .buffer
        .iter()
        .filter(|e| e.source_id == source_id && e.timestamp >= first_met_at)
        .cloned()
        .collect();

    bucket.condition_state.remove(&source_id);

    Some(TriggerResult {
        rule_id: bucket.spec.rule_id.clone(),
        rule_name: bucket.spec.rule_name.clone(),
        triggered_at: latest_event.timestamp,
        condition_met_duration_seconds: duration.num_seconds(),
        matching_events,
        action_type: bucket.spec.action_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;

    fn spec(duration_minutes: u32, window_minutes: u32, op: CompareOp, threshold: f64) -> RuleSpec {
        RuleSpec {
            rule_id: "r1".to_string(),
            rule_name: "test rule".to_string(),
            field_name: "water_level".to_string(),
            operator: op,
            threshold,
            window_minutes,
            duration_minutes,
            action_type: ActionKind::Alert,
            is_active: true,
        }
    }

    fn event_at(minute_offset: i64, source_id: &str, value: f64) -> Event {
        let base = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut data = StdHashMap::new();
        data.insert("water_level".to_string(), json!(value));
        Event {
            timestamp: base + chrono::Duration::minutes(minute_offset),
            source_id: source_id.to_string(),
            event_type: "water_level".to_string(),
            data,
        }
    }

    #[test]
    fn fires_after_twelve_minutes_at_three_point_five_meters() {
        let engine = CepEngine::new();
        engine.register(spec(10, 30, CompareOp::Gte, 3.0));

        let mut triggers = Vec::new();
        for minute in 0..13 {
            triggers.extend(engine.submit(event_at(minute, "S1", 3.5)));
        }

        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].matching_events.len(), 11);
        assert_eq!(triggers[0].condition_met_duration_seconds, 600);
    }

    #[test]
    fn no_fire_on_short_duration() {
        let engine = CepEngine::new();
        engine.register(spec(10, 30, CompareOp::Gte, 3.0));

        let mut triggers = Vec::new();
        for minute in 0..5 {
            triggers.extend(engine.submit(event_at(minute, "S1", 3.5)));
        }
        assert!(triggers.is_empty());
    }

    #[test]
    fn interrupt_resets_latch() {
        let engine = CepEngine::new();
        engine.register(spec(10, 30, CompareOp::Gte, 3.0));

        let mut triggers = Vec::new();
        for minute in 0..8 {
            triggers.extend(engine.submit(event_at(minute, "S1", 3.5)));
        }
        for minute in 8..11 {
            triggers.extend(engine.submit(event_at(minute, "S1", 2.0)));
        }
        for minute in 11..19 {
            triggers.extend(engine.submit(event_at(minute, "S1", 3.5)));
        }
        assert!(triggers.is_empty());
    }

    #[test]
    fn per_source_independence() {
        let engine = CepEngine::new();
        engine.register(spec(10, 30, CompareOp::Gte, 3.0));

        let mut triggers = Vec::new();
        for minute in 0..12 {
            triggers.extend(engine.submit(event_at(minute, "S1", 3.5)));
        }
        for minute in 0..15 {
            triggers.extend(engine.submit(event_at(minute, "S2", 2.0)));
        }
        for minute in 0..11 {
            triggers.extend(engine.submit(event_at(minute, "S3", 4.0)));
        }

        let fired: Vec<&str> = triggers.iter().map(|t| t.rule_id.as_str()).collect();
        assert_eq!(triggers.len(), 2);
        assert!(fired.contains(&"r1"));
    }

    #[test]
    fn threshold_miss_never_fires() {
        let engine = CepEngine::new();
        engine.register(spec(10, 30, CompareOp::Gte, 3.0));

        let mut triggers = Vec::new();
        for minute in 0..15 {
            triggers.extend(engine.submit(event_at(minute, "S1", 2.5)));
        }
        assert!(triggers.is_empty());
    }

    #[test]
    fn zero_duration_rule_fires_on_first_satisfying_event() {
        let engine = CepEngine::new();
        engine.register(spec(0, 30, CompareOp::Gt, 2.0));

        let triggers = engine.submit(event_at(0, "S1", 2.1));
        assert_eq!(triggers.len(), 1);
    }

    #[test]
    fn missing_field_is_a_no_op() {
        let engine = CepEngine::new();
        engine.register(spec(0, 30, CompareOp::Gt, 2.0));

        let mut event = event_at(0, "S1", 2.1);
        event.data.clear();
        assert!(engine.submit(event).is_empty());
    }

    #[test]
    fn unregister_stops_future_triggers() {
        let engine = CepEngine::new();
        engine.register(spec(0, 30, CompareOp::Gt, 2.0));
        engine.unregister("r1");

        assert!(engine.submit(event_at(0, "S1", 2.1)).is_empty());
    }

    #[test]
    fn submit_batch_matches_sequential_submission_order() {
        let engine_batch = CepEngine::new();
        engine_batch.register(spec(10, 30, CompareOp::Gte, 3.0));
        let mut events: Vec<Event> = (0..13).map(|m| event_at(12 - m, "S1", 3.5)).collect();
        events.reverse();
        let batch_triggers = engine_batch.submit_batch(events);

        let engine_seq = CepEngine::new();
        engine_seq.register(spec(10, 30, CompareOp::Gte, 3.0));
        let mut seq_triggers = Vec::new();
        for minute in 0..13 {
            seq_triggers.extend(engine_seq.submit(event_at(minute, "S1", 3.5)));
        }

        assert_eq!(batch_triggers.len(), seq_triggers.len());
        assert_eq!(batch_triggers.len(), 1);
    }
}
