use crate::services::error::{EventError, EventResult};
use crate::services::remote_process::RemoteProcessClient;
use crate::services::types::{ActionKind, AlertConfig, Notification, ProcessConfig, TriggerResult};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// An outbound alert channel. `platform` (the in-process notification log
/// itself) needs no adapter; `email` and `webhook` are modeled here so a real
/// integration can replace the logging stand-in without touching the
/// dispatcher's bookkeeping.
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, trigger: &TriggerResult, message: &str) -> Result<(), String>;
}

struct LoggingChannel {
    name: &'static str,
}

impl AlertChannel for LoggingChannel {
    fn name(&self) -> &str {
        self.name
    }

    fn send(&self, trigger: &TriggerResult, message: &str) -> Result<(), String> {
        tracing::warn!(
            channel = self.name,
            rule_id = %trigger.rule_id,
            "{message}"
        );
        Ok(())
    }
}

/// Fans a trigger out to its configured alert channels or remote process, and
/// keeps a capacity-bounded log of what it did. The log evicts the oldest
/// acknowledged notification first; once none remain acknowledged it falls
/// back to evicting the oldest notification overall.
pub struct ActionDispatcher {
    remote_process: Arc<RemoteProcessClient>,
    channels: Vec<Box<dyn AlertChannel>>,
    capacity: usize,
    notifications: Mutex<VecDeque<Notification>>,
}

impl ActionDispatcher {
    pub fn new(remote_process: Arc<RemoteProcessClient>, capacity: usize) -> Self {
        Self {
            remote_process,
            channels: vec![
                Box::new(LoggingChannel { name: "email" }),
                Box::new(LoggingChannel { name: "webhook" }),
            ],
            capacity: capacity.max(1),
            notifications: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn dispatch(
        &self,
        trigger: &TriggerResult,
        alert_config: Option<&AlertConfig>,
        process_config: Option<&ProcessConfig>,
    ) -> Notification {
        let mut action_result = None;

        match trigger.action_type {
            ActionKind::Alert => self.send_alert(trigger, alert_config),
            ActionKind::Process => {
                action_result = Some(self.run_process(trigger, process_config).await);
            }
        }

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            rule_id: trigger.rule_id.clone(),
            rule_name: trigger.rule_name.clone(),
            created_at: trigger.triggered_at,
            acknowledged: false,
            action_type: trigger.action_type,
            matching_event_count: trigger.matching_events.len(),
            action_result,
        };

        self.record(notification.clone());
        notification
    }

    fn send_alert(&self, trigger: &TriggerResult, alert_config: Option<&AlertConfig>) {
        let Some(config) = alert_config else {
            return;
        };
        let message = config
            .message
            .as_deref()
            .unwrap_or(trigger.rule_name.as_str());

        for channel_name in &config.channels {
            if channel_name == "platform" {
                continue;
            }
            match self.channels.iter().find(|c| c.name() == channel_name) {
                Some(channel) => {
                    if let Err(err) = channel.send(trigger, message) {
                        tracing::warn!(channel = %channel_name, error = %err, "alert delivery failed");
                    }
                }
                None => tracing::warn!(channel = %channel_name, "unknown alert channel"),
            }
        }
    }

    async fn run_process(
        &self,
        trigger: &TriggerResult,
        process_config: Option<&ProcessConfig>,
    ) -> String {
        let Some(config) = process_config else {
            return "no process configured for this rule".to_string();
        };

        let context = json!({
            "source": "event-detection",
            "rule_id": trigger.rule_id,
            "event_data": trigger.matching_events.last(),
        });
        let arguments = json!({
            "process_name": config.process_name,
            "parameters": config.process_params,
            "context": context,
        });

        match self.remote_process.call_tool("execute_process", arguments).await {
            Ok(result) => result.to_string(),
            Err(err) => format!("process dispatch failed: {err}"),
        }
    }

    fn record(&self, notification: Notification) {
        let mut log = self.notifications.lock().expect("notification log poisoned");
        if log.len() >= self.capacity {
            let evict_at = log.iter().position(|n| n.acknowledged).unwrap_or(0);
            log.remove(evict_at);
        }
        log.push_back(notification);
    }

    pub fn list_notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .expect("notification log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn acknowledge(&self, notification_id: &str) -> EventResult<()> {
        let mut log = self.notifications.lock().expect("notification log poisoned");
        let notification = log
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| EventError::NotificationNotFound(notification_id.to_string()))?;
        notification.acknowledged = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::types::Event;
    use chrono::Utc;
    use std::collections::HashMap;

    fn trigger(rule_id: &str, action_type: ActionKind) -> TriggerResult {
        TriggerResult {
            rule_id: rule_id.to_string(),
            rule_name: format!("{rule_id}-name"),
            triggered_at: Utc::now(),
            condition_met_duration_seconds: 600,
            matching_events: vec![Event {
                timestamp: Utc::now(),
                source_id: "S1".to_string(),
                event_type: "water_level".to_string(),
                data: HashMap::new(),
            }],
            action_type,
        }
    }

    #[tokio::test]
    async fn alert_without_config_is_logged_only() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 10);
        let notification = dispatcher.dispatch(&trigger("r1", ActionKind::Alert), None, None).await;
        assert!(!notification.acknowledged);
        assert!(notification.action_result.is_none());
        assert_eq!(dispatcher.list_notifications().len(), 1);
    }

    #[tokio::test]
    async fn process_without_remote_configured_records_failure_message() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 10);
        let config = ProcessConfig {
            process_name: "restart_pump".to_string(),
            process_params: json!({}),
        };
        let notification = dispatcher
            .dispatch(&trigger("r2", ActionKind::Process), None, Some(&config))
            .await;
        assert!(notification.action_result.unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn acknowledge_marks_matching_notification() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 10);
        let notification = dispatcher.dispatch(&trigger("r3", ActionKind::Alert), None, None).await;
        dispatcher.acknowledge(&notification.id).unwrap();
        assert!(dispatcher.list_notifications()[0].acknowledged);
    }

    #[tokio::test]
    async fn acknowledge_unknown_id_errors() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 10);
        let err = dispatcher.acknowledge("missing").unwrap_err();
        assert!(matches!(err, EventError::NotificationNotFound(_)));
    }

    #[tokio::test]
    async fn log_evicts_acknowledged_before_unacknowledged() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 2);
        let n1 = dispatcher.dispatch(&trigger("r1", ActionKind::Alert), None, None).await;
        let _n2 = dispatcher.dispatch(&trigger("r2", ActionKind::Alert), None, None).await;
        dispatcher.acknowledge(&n1.id).unwrap();

        let n3 = dispatcher.dispatch(&trigger("r3", ActionKind::Alert), None, None).await;

        let remaining: Vec<String> = dispatcher
            .list_notifications()
            .into_iter()
            .map(|n| n.rule_id)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&n1.rule_id));
        assert!(remaining.contains(&"r2".to_string()));
        assert!(remaining.contains(&n3.rule_id));
    }

    #[tokio::test]
    async fn log_evicts_oldest_overall_when_none_acknowledged() {
        let dispatcher = ActionDispatcher::new(Arc::new(RemoteProcessClient::new(None)), 2);
        dispatcher.dispatch(&trigger("r1", ActionKind::Alert), None, None).await;
        dispatcher.dispatch(&trigger("r2", ActionKind::Alert), None, None).await;
        dispatcher.dispatch(&trigger("r3", ActionKind::Alert), None, None).await;

        let remaining: Vec<String> = dispatcher
            .list_notifications()
            .into_iter()
            .map(|n| n.rule_id)
            .collect();
        assert_eq!(remaining, vec!["r2".to_string(), "r3".to_string()]);
    }
}
