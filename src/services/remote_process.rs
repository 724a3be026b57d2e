use crate::config::RemoteProcessConfig;
use crate::services::error::{EventError, EventResult};
use serde_json::{json, Value as JsonValue};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "core-server-rs-event-detection";
const CLIENT_VERSION: &str = "1.0.0";
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

struct ConnectedProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl ConnectedProcess {
    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Talks JSON-RPC 2.0 to a long-lived subprocess over stdio, the same framing
/// an MCP server speaks. The child is started lazily on first call and kept
/// alive across calls; only one request is in flight at a time.
pub struct RemoteProcessClient {
    config: Option<RemoteProcessConfig>,
    connection: Mutex<Option<ConnectedProcess>>,
}

impl RemoteProcessClient {
    pub fn new(config: Option<RemoteProcessConfig>) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: JsonValue) -> EventResult<JsonValue> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EventError::RemoteUnavailable("no remote process configured".to_string()))?;

        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(spawn_and_initialize(config).await?);
        }

        let timeout = Duration::from_secs(config.call_timeout_seconds);
        let result = tokio::time::timeout(timeout, async {
            let connected = guard.as_mut().expect("just populated above");
            let id = connected.next_request_id();
            let request = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": tool_name, "arguments": arguments },
            });
            send_request(connected, &request).await
        })
        .await;

        match result {
            Ok(Ok(response)) => extract_tool_result(response),
            Ok(Err(err)) => {
                *guard = None;
                Err(err)
            }
            Err(_) => {
                *guard = None;
                Err(EventError::Timeout)
            }
        }
    }

    /// Closes stdin to ask the child to exit cleanly, waits up to five
    /// seconds, then force-kills it if it hasn't.
    pub async fn disconnect(&self) {
        let mut guard = self.connection.lock().await;
        let Some(mut connected) = guard.take() else {
            return;
        };
        drop(connected.stdin);
        if tokio::time::timeout(DISCONNECT_GRACE, connected.child.wait())
            .await
            .is_err()
        {
            let _ = connected.child.kill().await;
        }
    }
}

async fn spawn_and_initialize(config: &RemoteProcessConfig) -> EventResult<ConnectedProcess> {
    let mut command = tokio::process::Command::new(&config.command);
    command
        .args(&config.args)
        .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|err| EventError::RemoteUnavailable(format!("failed to spawn remote process: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| EventError::RemoteUnavailable("remote process has no stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EventError::RemoteUnavailable("remote process has no stdout".to_string()))?;

    let mut connected = ConnectedProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
        next_id: 0,
    };

    let id = connected.next_request_id();
    let init_request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        },
    });
    send_request(&mut connected, &init_request).await?;

    let id = connected.next_request_id();
    let list_request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/list",
        "params": {},
    });
    send_request(&mut connected, &list_request).await?;

    Ok(connected)
}

async fn send_request(connected: &mut ConnectedProcess, request: &JsonValue) -> EventResult<JsonValue> {
    let mut line = serde_json::to_string(request)
        .map_err(|err| EventError::Transport(format!("failed to encode request: {err}")))?;
    line.push('\n');

    connected
        .stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|err| EventError::Transport(format!("failed to write to remote process: {err}")))?;
    connected
        .stdin
        .flush()
        .await
        .map_err(|err| EventError::Transport(format!("failed to flush remote process stdin: {err}")))?;

    let mut response_line = String::new();
    let bytes_read = connected
        .stdout
        .read_line(&mut response_line)
        .await
        .map_err(|err| EventError::Transport(format!("failed to read from remote process: {err}")))?;
    if bytes_read == 0 {
        return Err(EventError::Transport(
            "remote process closed its stdout".to_string(),
        ));
    }

    let response: JsonValue = serde_json::from_str(response_line.trim())
        .map_err(|err| EventError::Transport(format!("malformed JSON-RPC response: {err}")))?;

    if let Some(error) = response.get("error") {
        return Err(EventError::Transport(format!("remote process error: {error}")));
    }

    response
        .get("result")
        .cloned()
        .ok_or_else(|| EventError::Transport("JSON-RPC response had no result".to_string()))
}

/// Mirrors the result-unwrapping the MCP client uses: prefer the first
/// `{type:"text", text:"..."}` content item, parsed as JSON when possible,
/// falling back to the raw string.
fn extract_tool_result(result: JsonValue) -> EventResult<JsonValue> {
    let Some(content) = result.get("content").and_then(|c| c.as_array()) else {
        return Ok(result);
    };
    let Some(first) = content.first() else {
        return Ok(result);
    };
    let Some(text) = first.get("text").and_then(|t| t.as_str()) else {
        return Ok(result);
    };

    Ok(serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tool_result_parses_json_text_content() {
        let result = json!({ "content": [{ "type": "text", "text": "{\"success\":true}" }] });
        let parsed = extract_tool_result(result).unwrap();
        assert_eq!(parsed, json!({ "success": true }));
    }

    #[test]
    fn extract_tool_result_falls_back_to_raw_text() {
        let result = json!({ "content": [{ "type": "text", "text": "not json" }] });
        let parsed = extract_tool_result(result).unwrap();
        assert_eq!(parsed, json!("not json"));
    }

    #[test]
    fn extract_tool_result_passes_through_when_shape_is_unexpected() {
        let result = json!({ "status": "ok" });
        let parsed = extract_tool_result(result.clone()).unwrap();
        assert_eq!(parsed, result);
    }
}
