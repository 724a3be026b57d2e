use anyhow::{Context, Result};
use clap::Parser;
use core_server_rs::{auth, cli, config, db, openapi, routes, services, state};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind core-server-rs listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind core-server-rs listener on {addr}"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if args.print_openapi {
        println!(
            "{}",
            serde_json::to_string_pretty(&openapi::openapi_json())?
        );
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::CoreConfig::from_env(args.host, args.port)?;
    let pool = db::connect_lazy(&config.database_url)?;

    let auth = Arc::new(auth::AuthManager::new(24));
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
    registry.restore();

    let (poller, mut outcomes) = services::poller::EventPoller::new(
        pool.clone(),
        cep.clone(),
        Duration::from_secs(config.event_poll_min_interval_seconds),
        Duration::from_secs(config.sql_query_timeout_seconds),
    );
    let poller = Arc::new(poller);

    // Every trigger that reaches the dashboard, whether the CEP engine's
    // latch fired off a polled row or a synthetic `/events/simulate` event,
    // comes through this one callback.
    let cep_trigger_registry = registry.clone();
    let cep_trigger_dispatcher = dispatcher.clone();
    cep.add_trigger_callback(move |trigger| {
        cep_trigger_registry.record_trigger(&trigger.rule_id, trigger.triggered_at);
        let dispatcher = cep_trigger_dispatcher.clone();
        let rule = cep_trigger_registry.get(&trigger.rule_id);
        let trigger = trigger.clone();
        tokio::spawn(async move {
            let (alert_config, process_config) = rule
                .as_ref()
                .map(|r| (r.alert_config.clone(), r.process_config.clone()))
                .unwrap_or((None, None));
            dispatcher
                .dispatch(&trigger, alert_config.as_ref(), process_config.as_ref())
                .await;
        });
    });

    // The poller's own outcome channel only carries poll health (row counts,
    // SQL errors); actual triggers already reached the dispatcher through the
    // CEP callback above, so this loop just logs what needs attention.
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            if let Some(error) = &outcome.error {
                tracing::warn!(rule_id = %outcome.rule_id, %error, "scheduled rule poll failed");
            }
        }
    });

    for rule in registry.list() {
        if rule.is_active && rule.check_interval_minutes > 0 {
            poller.register_polling_rule(services::poller::PollingRule {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                sql: rule.sql.clone(),
                field_name: rule.field_name.clone(),
                check_interval_minutes: rule.check_interval_minutes,
                action_type: rule.action_type,
            });
        }
    }

    let state = state::AppState {
        config: config.clone(),
        db: pool,
        auth,
        http,
        registry,
        cep,
        poller,
        dispatcher,
        remote_process,
        rule_sync,
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(60)
            .methods(vec![
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .use_headers()
            .finish()
            .context("failed to build rate limiter config")?,
    );

    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = routes::router(state).layer(GovernorLayer::new(governor_conf));
    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = bind_listener(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;
    use anyhow::Result;

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        if err.to_string().to_lowercase().contains("operation not permitted") {
            return Ok(());
        }
        let message = err.to_string().to_lowercase();

        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));
        assert!(message.contains("--port"));

        drop(listener);
        Ok(())
    }
}
