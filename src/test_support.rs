use crate::auth::AuthManager;
use crate::config::CoreConfig;
use crate::db;
use crate::services;
use crate::state::AppState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn test_config() -> CoreConfig {
    CoreConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        bind_host: "127.0.0.1".to_string(),
        bind_port: 0,
        event_poll_min_interval_seconds: 5,
        sql_query_timeout_seconds: 10,
        cep_service_url: "http://127.0.0.1:8088".to_string(),
        cep_service_enabled: false,
        remote_process: None,
        notification_log_capacity: 1_000,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let pool = db::connect_lazy(&config.database_url).expect("connect_lazy");
    let auth = Arc::new(AuthManager::new(24));
    let http = reqwest::Client::new();

    let cep = Arc::new(services::cep::CepEngine::new());
    let remote_process = Arc::new(services::remote_process::RemoteProcessClient::new(
        config.remote_process.clone(),
    ));
    let rule_sync = Arc::new(services::rule_sync::RuleSyncClient::new(
        config.cep_service_url.clone(),
        config.cep_service_enabled,
    ));
    let dispatcher = Arc::new(services::dispatcher::ActionDispatcher::new(
        remote_process.clone(),
        config.notification_log_capacity,
    ));
    let registry = Arc::new(services::registry::RuleRegistry::new(
        cep.clone(),
        rule_sync.clone(),
    ));
    let (poller, _outcomes) = services::poller::EventPoller::new(
        pool.clone(),
        cep.clone(),
        Duration::from_secs(config.event_poll_min_interval_seconds),
        Duration::from_secs(config.sql_query_timeout_seconds),
    );

    AppState {
        config,
        db: pool,
        auth,
        http,
        registry,
        cep,
        poller: Arc::new(poller),
        dispatcher,
        remote_process,
        rule_sync,
    }
}

pub fn test_user_with_caps(caps: &[&str]) -> crate::auth::AuthenticatedUser {
    let capabilities: HashSet<String> = caps.iter().map(|cap| cap.to_string()).collect();
    crate::auth::AuthenticatedUser {
        id: Uuid::new_v4().to_string(),
        email: "test-user@example.com".to_string(),
        role: "view".to_string(),
        capabilities,
        source: "test".to_string(),
    }
}
