//! Client side of the build/run server's task protocol.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpTaskClient;

use crate::protocol::{TaskFailure, TaskHandle, TaskRequest, TaskStream};
use std::future::Future;

/// Issues task requests against a build/run server.
///
/// `run_task` hands back the handle immediately; events and the terminal
/// outcome arrive on the returned stream, events first.
pub trait TaskClient: Clone + Send + Sync + 'static {
    fn run_task(&self, request: TaskRequest) -> (TaskHandle, TaskStream);

    /// Ask the server to terminate a task. Success only means the request was
    /// accepted; the task's own stream still reports how it ended.
    fn kill_task(
        &self,
        handle: &TaskHandle,
    ) -> impl Future<Output = Result<(), TaskFailure>> + Send + 'static;
}
