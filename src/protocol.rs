//! Task protocol types shared with the build/run server.
//!
//! A task request is answered by zero or more events followed by exactly one
//! terminal outcome. Lookups (main-class discovery, default main class) use the
//! same request/response pair with a `GenericResponse` envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Wire-level names used by the server.
pub mod wire {
    /// Event carrying a log record in `entry`.
    pub const LOG_EVENT: &str = "LogEvent";
    /// A fresh server process was started for this request.
    pub const STARTED: &str = "Started";
    /// The application's HTTP endpoint is listening (`params.port`).
    pub const APP_SERVER_STARTED: &str = "playServerStarted";
    /// The supervisory console is reachable (`params.uri`).
    pub const CONSOLE_STARTED: &str = "atmosStarted";

    /// The only response envelope the console understands.
    pub const GENERIC_RESPONSE: &str = "GenericResponse";

    pub const TASK_DISCOVER_MAIN_CLASSES: &str = "discovered-main-classes";
    pub const TASK_DEFAULT_MAIN_CLASS: &str = "main-class";
    pub const TASK_RUN: &str = "run";
    pub const TASK_RUN_MAIN: &str = "run-main";
    pub const PARAM_MAIN_CLASS: &str = "mainClass";

    /// Prefix that wraps a task kind for console-mode execution.
    pub const CONSOLE_PREFIX: &str = "atmos:";
}

/// Opaque identifier of one in-flight server task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Wrap the task kind for console-mode execution.
    pub fn in_console(mut self) -> Self {
        self.task = format!("{}{}", wire::CONSOLE_PREFIX, self.task);
        self
    }

    #[cfg(test)]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// A log line as produced by the server (`{"type": "stdout", "message": "..."}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub level: String,
    #[serde(default)]
    pub message: String,
}

impl LogRecord {
    #[cfg(test)]
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
        }
    }

    /// Raw program output rather than a diagnostic log line.
    pub fn is_output(&self) -> bool {
        matches!(self.level.as_str(), "stdout" | "stderr")
    }
}

/// One event from a running task.
///
/// Kept loosely typed: the router classifies by `kind`/`id` and anything it does
/// not recognise is still shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<LogRecord>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl TaskEvent {
    #[cfg(test)]
    pub fn log(record: LogRecord) -> Self {
        Self {
            kind: wire::LOG_EVENT.to_string(),
            id: None,
            entry: Some(record),
            params: Value::Null,
        }
    }

    #[cfg(test)]
    pub fn started() -> Self {
        Self {
            kind: wire::STARTED.to_string(),
            id: None,
            entry: None,
            params: Value::Null,
        }
    }

    #[cfg(test)]
    pub fn generic(id: &str, params: Value) -> Self {
        Self {
            kind: "GenericEvent".to_string(),
            id: Some(id.to_string()),
            entry: None,
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

/// Response envelope for a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskResponse {
    #[cfg(test)]
    pub fn generic(params: Map<String, Value>) -> Self {
        Self {
            kind: wire::GENERIC_RESPONSE.to_string(),
            params,
        }
    }

    pub fn is_generic(&self) -> bool {
        self.kind == wire::GENERIC_RESPONSE
    }
}

/// A task request that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TaskFailure {
    /// HTTP-style status when the server reported one.
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl TaskFailure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn disconnected() -> Self {
        Self::transport("connection closed before task completed")
    }
}

pub type TaskOutcome = Result<TaskResponse, TaskFailure>;

/// Everything a task stream can carry. `Finished` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMessage {
    Event(TaskEvent),
    Finished(TaskOutcome),
}

pub type TaskStream = mpsc::UnboundedReceiver<TaskMessage>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let plain = serde_json::to_value(TaskRequest::new(wire::TASK_RUN)).unwrap();
        assert_eq!(plain, json!({ "task": "run" }));

        let with_class = TaskRequest::new(wire::TASK_RUN_MAIN)
            .with_param(wire::PARAM_MAIN_CLASS, "com.example.Main")
            .in_console();
        assert_eq!(
            serde_json::to_value(&with_class).unwrap(),
            json!({ "task": "atmos:run-main", "params": { "mainClass": "com.example.Main" } })
        );
        assert_eq!(
            with_class.param_str(wire::PARAM_MAIN_CLASS),
            Some("com.example.Main")
        );
    }

    #[test]
    fn test_event_deserialization() {
        let event: TaskEvent = serde_json::from_value(json!({
            "type": "LogEvent",
            "entry": { "type": "stdout", "message": "hello" }
        }))
        .unwrap();
        assert_eq!(event.kind, wire::LOG_EVENT);
        assert!(event.entry.as_ref().unwrap().is_output());

        let event: TaskEvent = serde_json::from_value(json!({
            "type": "GenericEvent",
            "id": "playServerStarted",
            "params": { "port": 9000 }
        }))
        .unwrap();
        assert_eq!(event.id.as_deref(), Some(wire::APP_SERVER_STARTED));
        assert_eq!(event.param("port"), Some(&json!(9000)));
    }

    #[test]
    fn test_response_envelope() {
        let response: TaskResponse =
            serde_json::from_value(json!({ "type": "GenericResponse" })).unwrap();
        assert!(response.is_generic());
        assert!(response.params.is_empty());

        let response: TaskResponse =
            serde_json::from_value(json!({ "type": "ErrorResponse", "params": {} })).unwrap();
        assert!(!response.is_generic());
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(TaskFailure::new(500, "boom").to_string(), "500: boom");
        assert_eq!(
            TaskFailure::disconnected().to_string(),
            "connection closed before task completed"
        );
    }
}
