// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Plugin execution: spawn a child process on command from a router, poll
//! it without blocking, and report its exit status and captured stdout.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Payload of a plugin-exec command.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginExecRequest {
    pub plugin_path: String,
    #[serde(default)]
    pub plugin_args: Vec<String>,
    /// Report name; defaults to the executable path.
    #[serde(default)]
    pub plugin: Option<String>,
}

impl PluginExecRequest {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    pub fn name(&self) -> &str {
        self.plugin.as_deref().unwrap_or(&self.plugin_path)
    }
}

/// A running plugin process. Kept in the agent's plugin table until the
/// reaping pass observes its exit.
pub struct PluginHandle {
    pub name: String,
    pub pid: u32,
    child: Child,
}

#[derive(Debug)]
pub struct PluginResult {
    pub name: String,
    pub pid: u32,
    /// Process exit code; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
}

impl PluginHandle {
    /// Spawn the requested plugin with stdout captured. The child is killed
    /// if the handle is dropped before it exits.
    pub fn spawn(request: &PluginExecRequest) -> std::io::Result<Self> {
        let mut child = Command::new(&request.plugin_path)
            .args(&request.plugin_args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().unwrap_or(0);
        Ok(PluginHandle {
            name: request.name().to_string(),
            pid,
            child,
        })
    }

    /// Non-blocking exit check. `Ok(None)` while the plugin is still
    /// running; on exit, drains captured stdout and returns the result.
    pub async fn try_finish(&mut self) -> std::io::Result<Option<PluginResult>> {
        let Some(status) = self.child.try_wait()? else {
            return Ok(None);
        };

        let mut captured = String::new();
        if let Some(mut stdout) = self.child.stdout.take() {
            stdout.read_to_string(&mut captured).await?;
        }
        let stdout = captured.lines().map(str::to_string).collect();

        Ok(Some(PluginResult {
            name: self.name.clone(),
            pid: self.pid,
            exit_code: status.code(),
            stdout,
        }))
    }
}

impl PluginResult {
    /// Completion report payload, carried by a heartbeat-kind message.
    pub fn to_payload(&self, timestamp_us: u64) -> Value {
        json!({
            "name": format!("plugin.{}", self.name),
            "pid": self.pid,
            "exit_code": self.exit_code,
            "stdout": self.stdout,
            "timestamp": timestamp_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_parsing() {
        let req = PluginExecRequest::from_payload(&json!({
            "plugin_path": "/bin/true",
            "plugin_args": ["-x"],
            "plugin": "truth",
        }))
        .unwrap();
        assert_eq!(req.plugin_path, "/bin/true");
        assert_eq!(req.name(), "truth");

        // name falls back to the path; args default to empty
        let req = PluginExecRequest::from_payload(&json!({"plugin_path": "/bin/true"})).unwrap();
        assert_eq!(req.name(), "/bin/true");
        assert!(req.plugin_args.is_empty());

        assert!(PluginExecRequest::from_payload(&json!({"plugin": "pathless"})).is_none());
    }

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let req = PluginExecRequest {
            plugin_path: "/bin/echo".to_string(),
            plugin_args: vec!["ping".to_string()],
            plugin: Some("echo".to_string()),
        };
        let mut handle = PluginHandle::spawn(&req).unwrap();

        let mut result = None;
        for _ in 0..100 {
            if let Some(r) = handle.try_finish().await.unwrap() {
                result = Some(r);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let result = result.expect("plugin did not exit");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, vec!["ping".to_string()]);

        let payload = result.to_payload(7);
        assert_eq!(payload["name"], "plugin.echo");
        assert_eq!(payload["timestamp"], 7);
    }
}
