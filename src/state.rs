use crate::auth::AuthManager;
use crate::config::CoreConfig;
use crate::services::cep::CepEngine;
use crate::services::dispatcher::ActionDispatcher;
use crate::services::poller::EventPoller;
use crate::services::registry::RuleRegistry;
use crate::services::remote_process::RemoteProcessClient;
use crate::services::rule_sync::RuleSyncClient;
use axum::extract::FromRef;
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: CoreConfig,
    pub db: PgPool,
    pub auth: Arc<AuthManager>,
    pub http: Client,
    pub registry: Arc<RuleRegistry>,
    pub cep: Arc<CepEngine>,
    pub poller: Arc<EventPoller>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub remote_process: Arc<RemoteProcessClient>,
    pub rule_sync: Arc<RuleSyncClient>,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Arc<AuthManager> {
        state.auth.clone()
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.db.clone()
    }
}
