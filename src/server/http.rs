use crate::model::ConsoleConfig;
use crate::protocol::{
    TaskEvent, TaskFailure, TaskHandle, TaskMessage, TaskOutcome, TaskRequest, TaskResponse,
    TaskStream,
};
use crate::server::TaskClient;
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Task submission body: the client picks the id so it can return it at once.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSubmission<'a> {
    task_id: &'a TaskHandle,
    request: &'a TaskRequest,
}

/// One newline-delimited JSON frame of a task's response body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
enum ServerFrame {
    Event {
        event: TaskEvent,
    },
    Response {
        response: TaskResponse,
    },
    Failure {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        message: String,
    },
}

/// Splits a byte stream into JSON frames, one per line.
#[derive(Debug, Default)]
struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Result<Option<ServerFrame>, serde_json::Error> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_slice(trimmed).map(Some);
        }
    }

    /// A final frame without a trailing newline.
    fn finish(&mut self) -> Result<Option<ServerFrame>, serde_json::Error> {
        let rest = std::mem::take(&mut self.buf);
        let trimmed = rest.trim_ascii();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(trimmed).map(Some)
    }
}

/// Generate a random task id.
fn gen_task_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Talks to the server over HTTP, streaming task frames as NDJSON.
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTaskClient {
    pub fn new(cfg: &ConsoleConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.connect_timeout)
            .user_agent(format!("run-console/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.server_url.trim_end_matches('/').to_string(),
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}/api/tasks", self.base_url)
    }

    fn kill_url(&self, handle: &TaskHandle) -> String {
        format!("{}/api/tasks/{}/kill", self.base_url, handle)
    }
}

impl TaskClient for HttpTaskClient {
    fn run_task(&self, request: TaskRequest) -> (TaskHandle, TaskStream) {
        let handle = TaskHandle::new(gen_task_id());
        let (tx, rx) = mpsc::unbounded_channel();
        let http = self.http.clone();
        let url = self.tasks_url();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            let outcome = stream_task(&http, &url, &task_handle, &request, &tx).await;
            if let Err(failure) = &outcome {
                debug!(task = %task_handle, error = %failure, "task request failed");
            }
            let _ = tx.send(TaskMessage::Finished(outcome));
        });

        (handle, rx)
    }

    fn kill_task(
        &self,
        handle: &TaskHandle,
    ) -> impl Future<Output = Result<(), TaskFailure>> + Send + 'static {
        let http = self.http.clone();
        let url = self.kill_url(handle);
        async move {
            let resp = http
                .post(&url)
                .send()
                .await
                .map_err(|e| TaskFailure::transport(e.to_string()))?;
            let status = resp.status();
            if status.is_success() {
                return Ok(());
            }
            let body = resp.text().await.unwrap_or_default();
            Err(TaskFailure::new(status.as_u16(), body))
        }
    }
}

async fn stream_task(
    http: &reqwest::Client,
    url: &str,
    handle: &TaskHandle,
    request: &TaskRequest,
    tx: &mpsc::UnboundedSender<TaskMessage>,
) -> TaskOutcome {
    let resp = http
        .post(url)
        .json(&TaskSubmission {
            task_id: handle,
            request,
        })
        .send()
        .await
        .map_err(|e| TaskFailure::transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TaskFailure::new(status.as_u16(), body));
    }

    let mut decoder = FrameDecoder::default();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TaskFailure::transport(e.to_string()))?;
        decoder.push(&chunk);
        while let Some(frame) = decoder.next_frame().map_err(malformed)? {
            if let Some(outcome) = deliver(frame, tx) {
                return outcome;
            }
        }
    }
    if let Some(frame) = decoder.finish().map_err(malformed)? {
        if let Some(outcome) = deliver(frame, tx) {
            return outcome;
        }
    }
    Err(TaskFailure::disconnected())
}

/// Forward an event frame, or return the outcome carried by a terminal frame.
fn deliver(frame: ServerFrame, tx: &mpsc::UnboundedSender<TaskMessage>) -> Option<TaskOutcome> {
    match frame {
        ServerFrame::Event { event } => {
            let _ = tx.send(TaskMessage::Event(event));
            None
        }
        ServerFrame::Response { response } => Some(Ok(response)),
        ServerFrame::Failure { status, message } => Some(Err(TaskFailure { status, message })),
    }
}

fn malformed(e: serde_json::Error) -> TaskFailure {
    warn!(error = %e, "malformed frame from server");
    TaskFailure::transport(format!("malformed frame from server: {e}"))
}
