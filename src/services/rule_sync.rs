use crate::services::error::{EventError, EventResult};
use crate::services::types::Rule;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

/// Client for the external Esper CEP microservice. Every method degrades to a
/// clearly-labeled "unavailable" outcome rather than propagating a transport
/// error, since rule sync is best-effort: the in-process `CepEngine` is the
/// source of truth and this is a mirror.
pub struct RuleSyncClient {
    http: Client,
    base_url: String,
    enabled: bool,
}

impl RuleSyncClient {
    pub fn new(base_url: String, enabled: bool) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn create_rule(&self, rule: &Rule) -> EventResult<JsonValue> {
        self.request(reqwest::Method::POST, "/api/rules", Some(cep_rule_payload(rule)), &[])
            .await
    }

    pub async fn update_rule(&self, rule_id: &str, rule: &Rule) -> EventResult<JsonValue> {
        self.request(
            reqwest::Method::PUT,
            &format!("/api/rules/{rule_id}"),
            Some(cep_rule_payload(rule)),
            &[],
        )
        .await
    }

    pub async fn delete_rule(&self, rule_id: &str) -> EventResult<JsonValue> {
        self.request(reqwest::Method::DELETE, &format!("/api/rules/{rule_id}"), None, &[])
            .await
    }

    pub async fn toggle_rule(&self, rule_id: &str) -> EventResult<JsonValue> {
        self.request(
            reqwest::Method::POST,
            &format!("/api/rules/{rule_id}/toggle"),
            None,
            &[],
        )
        .await
    }

    pub async fn get_rules(&self) -> EventResult<JsonValue> {
        self.request(reqwest::Method::GET, "/api/rules", None, &[]).await
    }

    pub async fn get_active_rules(&self) -> EventResult<JsonValue> {
        self.request(reqwest::Method::GET, "/api/rules/active", None, &[]).await
    }

    pub async fn sync_rules(&self, rules: &[Rule]) -> EventResult<JsonValue> {
        let payload: Vec<JsonValue> = rules.iter().map(cep_rule_payload).collect();
        self.request(reqwest::Method::POST, "/api/rules/sync", Some(json!(payload)), &[])
            .await
    }

    pub async fn send_event(&self, event_type: &str, event_data: JsonValue) -> EventResult<JsonValue> {
        self.request(
            reqwest::Method::POST,
            "/api/events/send",
            Some(event_data),
            &[("eventType", event_type)],
        )
        .await
    }

    pub async fn send_bulk_events(&self, event_type: &str, events: JsonValue) -> EventResult<JsonValue> {
        self.request(
            reqwest::Method::POST,
            "/api/events/send/bulk",
            Some(events),
            &[("eventType", event_type)],
        )
        .await
    }

    /// Never errors: an unreachable CEP service is reported as a status, not a failure.
    pub async fn get_status(&self) -> JsonValue {
        self.request(reqwest::Method::GET, "/api/events/status", None, &[])
            .await
            .unwrap_or_else(|_| json!({ "status": "unavailable", "activeRules": 0 }))
    }

    pub async fn get_triggers(&self, rule_id: Option<&str>, page: u32, size: u32) -> EventResult<JsonValue> {
        let page = page.to_string();
        let size = size.to_string();
        let mut query = vec![("page", page.as_str()), ("size", size.as_str())];
        if let Some(rule_id) = rule_id {
            query.push(("ruleId", rule_id));
        }
        self.request(reqwest::Method::GET, "/api/events/triggers", None, &query)
            .await
    }

    pub async fn is_available(&self) -> bool {
        self.get_status().await.get("status").and_then(|v| v.as_str()) == Some("running")
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<JsonValue>,
        query: &[(&str, &str)],
    ) -> EventResult<JsonValue> {
        if !self.enabled {
            return Err(EventError::RemoteUnavailable(
                "CEP rule sync is disabled".to_string(),
            ));
        }

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|err| {
            EventError::RemoteUnavailable(format!("CEP service unavailable: {err}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EventError::Transport(format!("CEP API error: {status}")));
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|err| EventError::Transport(format!("failed to decode CEP response: {err}")))
    }
}

fn cep_rule_payload(rule: &Rule) -> JsonValue {
    json!({
        "id": rule.id,
        "name": rule.name,
        "description": rule.description,
        "naturalLanguageCondition": rule.natural_language_condition,
        "checkIntervalMinutes": rule.check_interval_minutes,
        "actionType": rule.action_type,
        "alertConfig": rule.alert_config,
        "processConfig": rule.process_config,
        "isActive": rule.is_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_never_makes_a_request() {
        let client = RuleSyncClient::new("http://localhost:8088".to_string(), false);
        let err = client.get_rules().await.unwrap_err();
        assert!(matches!(err, EventError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn get_status_degrades_to_unavailable_on_error() {
        let client = RuleSyncClient::new("http://localhost:8088".to_string(), false);
        let status = client.get_status().await;
        assert_eq!(status.get("status").and_then(|v| v.as_str()), Some("unavailable"));
    }
}
