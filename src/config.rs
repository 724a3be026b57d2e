use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RemoteProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub call_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub database_url: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub event_poll_min_interval_seconds: u64,
    pub sql_query_timeout_seconds: u64,
    pub cep_service_url: String,
    pub cep_service_enabled: bool,
    pub remote_process: Option<RemoteProcessConfig>,
    pub notification_log_capacity: usize,
}

impl CoreConfig {
    pub fn from_env(cli_host: Option<String>, cli_port: Option<u16>) -> Result<Self> {
        let database_url = env_optional_string("CORE_DATABASE_URL")
            .context("CORE_DATABASE_URL must be set for the event-detection runtime")?;
        let database_url = normalize_database_url(database_url);
        if database_url.trim().is_empty() {
            anyhow::bail!("CORE_DATABASE_URL resolved to an empty value");
        }

        let bind_host = cli_host.unwrap_or_else(|| env_string("CORE_BIND_HOST", "127.0.0.1"));
        let bind_port = cli_port.unwrap_or_else(|| env_u16("CORE_BIND_PORT", 8080));

        let event_poll_min_interval_seconds =
            env_u64("CORE_EVENT_POLL_MIN_INTERVAL_SECONDS", 5).max(1);
        let sql_query_timeout_seconds = env_u64("CORE_SQL_QUERY_TIMEOUT_SECONDS", 10).max(1);

        let cep_service_url = env_string("CORE_CEP_SERVICE_URL", "http://localhost:8088");
        let cep_service_enabled = env_bool("CORE_CEP_SERVICE_ENABLED", false);

        let remote_process_command = env_optional_string("CORE_REMOTE_PROCESS_COMMAND");
        let remote_process = remote_process_command.map(|command| {
            let args = env_optional_string("CORE_REMOTE_PROCESS_ARGS")
                .map(|raw| {
                    raw.split_whitespace()
                        .map(|part| part.to_string())
                        .collect()
                })
                .unwrap_or_default();
            let mut env = Vec::new();
            if let Some(url) = env_optional_string("CORE_REMOTE_PROCESS_SUPABASE_URL") {
                env.push(("SUPABASE_URL".to_string(), url));
            }
            if let Some(key) = env_optional_string("CORE_REMOTE_PROCESS_SUPABASE_KEY") {
                env.push(("SUPABASE_ANON_KEY".to_string(), key));
            }
            let call_timeout_seconds =
                env_u64("CORE_REMOTE_PROCESS_CALL_TIMEOUT_SECONDS", 30).max(1);
            RemoteProcessConfig {
                command,
                args,
                env,
                call_timeout_seconds,
            }
        });

        let notification_log_capacity =
            env_u64("CORE_NOTIFICATION_LOG_CAPACITY", 10_000).max(1) as usize;

        Ok(Self {
            database_url,
            bind_host,
            bind_port,
            event_poll_min_interval_seconds,
            sql_query_timeout_seconds,
            cep_service_url,
            cep_service_enabled,
            remote_process,
            notification_log_capacity,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[allow(dead_code)]
fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_psycopg_and_asyncpg_prefixes() {
        assert_eq!(
            normalize_database_url("postgresql+psycopg://u:p@host/db".to_string()),
            "postgresql://u:p@host/db"
        );
        assert_eq!(
            normalize_database_url("postgresql+asyncpg://u:p@host/db".to_string()),
            "postgresql://u:p@host/db"
        );
        assert_eq!(
            normalize_database_url("postgresql://u:p@host/db".to_string()),
            "postgresql://u:p@host/db"
        );
    }
}
