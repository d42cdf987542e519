//! Event router: sorts a running task's events into the console's log streams.

use crate::log::LogStreams;
use crate::protocol::{wire, LogRecord, TaskEvent};
use serde_json::Value;
use tracing::{debug, warn};

/// Links to the running application, known only while a task is live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppLinks {
    pub app_url: Option<String>,
    pub console_url: Option<String>,
}

impl AppLinks {
    pub fn clear(&mut self) {
        self.app_url = None;
        self.console_url = None;
    }
}

/// Where a single event goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route<'a> {
    Output(&'a LogRecord),
    Primary(&'a LogRecord),
    /// A fresh server process was witnessed; buffered output was its startup noise.
    FreshServer,
    AppReady { port: u16 },
    ConsoleReady { uri: &'a str },
    Leftover,
}

pub fn classify(event: &TaskEvent) -> Route<'_> {
    if event.kind == wire::LOG_EVENT {
        if let Some(record) = event.entry.as_ref() {
            return if record.is_output() {
                Route::Output(record)
            } else {
                Route::Primary(record)
            };
        }
        return Route::Leftover;
    }
    if event.kind == wire::STARTED {
        return Route::FreshServer;
    }
    match event.id.as_deref() {
        Some(wire::APP_SERVER_STARTED) => match event.param("port").and_then(parse_port) {
            Some(port) => Route::AppReady { port },
            None => {
                warn!(?event, "app server started without a usable port");
                Route::Leftover
            }
        },
        Some(wire::CONSOLE_STARTED) => match event.param("uri").and_then(Value::as_str) {
            Some(uri) => Route::ConsoleReady { uri },
            None => {
                warn!(?event, "console started without a uri");
                Route::Leftover
            }
        },
        _ => Route::Leftover,
    }
}

fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn app_url_for_port(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Apply one event to the streams and links, in arrival order.
pub fn route_event(event: &TaskEvent, logs: &mut LogStreams, links: &mut AppLinks) {
    match classify(event) {
        Route::Output(record) => logs.output.record(record),
        Route::Primary(record) => logs.primary.record(record),
        Route::FreshServer => {
            if !logs.output.is_empty() {
                debug!(moved = logs.output.len(), "fresh server started, folding output into log");
                logs.fold_output_into_primary();
            }
        }
        Route::AppReady { port } => links.app_url = Some(app_url_for_port(port)),
        Route::ConsoleReady { uri } => links.console_url = Some(uri.to_string()),
        Route::Leftover => logs.primary.leftover(event),
    }
}
