//! Task lifecycle: the single active run task, its stop requests, and restart intent.

use crate::protocol::{wire, TaskFailure, TaskHandle, TaskMessage, TaskRequest, TaskStream};
use crate::server::TaskClient;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Running,
    StoppingForRestart,
    StoppingFinal,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("task {0} is still running")]
    AlreadyRunning(TaskHandle),
}

/// Something the lifecycle needs the controller to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Task {
        handle: TaskHandle,
        message: TaskMessage,
    },
    KillFinished {
        handle: TaskHandle,
        result: Result<(), TaskFailure>,
    },
}

/// How a finished task left the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// A restart was requested while the task was running.
    pub restart: bool,
}

struct ActiveTask {
    handle: TaskHandle,
    stream: TaskStream,
    kill_in_flight: bool,
}

/// Build the run request for the current selection and mode.
pub fn run_request(main_class: Option<&str>, in_console: bool) -> TaskRequest {
    let request = match main_class {
        Some(class) => {
            TaskRequest::new(wire::TASK_RUN_MAIN).with_param(wire::PARAM_MAIN_CLASS, class)
        }
        None => TaskRequest::new(wire::TASK_RUN),
    };
    if in_console {
        request.in_console()
    } else {
        request
    }
}

/// Owns at most one live task handle.
///
/// Kill results come back through an internal channel so everything the
/// controller reacts to arrives through [`TaskLifecycle::next_event`].
pub struct TaskLifecycle<C> {
    client: C,
    active: Option<ActiveTask>,
    restart_pending: bool,
    kill_tx: mpsc::UnboundedSender<(TaskHandle, Result<(), TaskFailure>)>,
    kill_rx: mpsc::UnboundedReceiver<(TaskHandle, Result<(), TaskFailure>)>,
}

impl<C: TaskClient> TaskLifecycle<C> {
    pub fn new(client: C) -> Self {
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        Self {
            client,
            active: None,
            restart_pending: false,
            kill_tx,
            kill_rx,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match &self.active {
            None => LifecycleState::Idle,
            Some(task) if !task.kill_in_flight => LifecycleState::Running,
            Some(_) if self.restart_pending => LifecycleState::StoppingForRestart,
            Some(_) => LifecycleState::StoppingFinal,
        }
    }

    pub fn handle(&self) -> Option<&TaskHandle> {
        self.active.as_ref().map(|t| &t.handle)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    /// Issue a run request. Refused while a task is live.
    pub fn start(&mut self, request: TaskRequest) -> Result<TaskHandle, LifecycleError> {
        if let Some(task) = &self.active {
            return Err(LifecycleError::AlreadyRunning(task.handle.clone()));
        }
        self.restart_pending = false;
        let (handle, stream) = self.client.run_task(request);
        info!(task = %handle, "run task started");
        self.active = Some(ActiveTask {
            handle: handle.clone(),
            stream,
            kill_in_flight: false,
        });
        Ok(handle)
    }

    /// Ask the server to kill the live task. Returns whether a kill was issued.
    pub fn stop(&mut self) -> bool {
        let Some(task) = self.active.as_mut() else {
            return false;
        };
        if task.kill_in_flight {
            debug!(task = %task.handle, "kill already requested");
            return false;
        }
        task.kill_in_flight = true;
        let handle = task.handle.clone();
        info!(task = %handle, restart = self.restart_pending, "stopping run task");

        let kill = self.client.kill_task(&handle);
        let tx = self.kill_tx.clone();
        tokio::spawn(async move {
            let result = kill.await;
            let _ = tx.send((handle, result));
        });
        true
    }

    /// Drop a pending restart; an explicit stop means stop.
    pub fn cancel_restart(&mut self) {
        self.restart_pending = false;
    }

    /// Mark that the task should start again once it stops, and stop it.
    ///
    /// Returns `false` when nothing is running, in which case the caller starts directly.
    pub fn request_restart(&mut self) -> bool {
        self.restart_pending = true;
        if self.active.is_none() {
            return false;
        }
        self.stop();
        true
    }

    /// Record that `handle` ended. Stale handles are ignored.
    pub fn complete(&mut self, handle: &TaskHandle) -> Option<Completion> {
        if self.handle() != Some(handle) {
            debug!(task = %handle, "completion for a task that is not active");
            return None;
        }
        self.active = None;
        info!(task = %handle, restart = self.restart_pending, "run task finished");
        Some(Completion {
            restart: self.restart_pending,
        })
    }

    /// The server refused or never received the kill; the task is still considered live.
    ///
    /// Returns whether `handle` is the active task.
    pub fn kill_failed(&mut self, handle: &TaskHandle) -> bool {
        match self.active.as_mut() {
            Some(task) if &task.handle == handle => {
                task.kill_in_flight = false;
                true
            }
            _ => false,
        }
    }

    /// Wait for the next task message or kill result.
    ///
    /// A task stream that closes without a terminal message is reported as a failure.
    pub async fn next_event(&mut self) -> LifecycleEvent {
        let active = &mut self.active;
        let kill_rx = &mut self.kill_rx;
        tokio::select! {
            Some((handle, result)) = kill_rx.recv() => LifecycleEvent::KillFinished { handle, result },
            (handle, message) = async {
                match active.as_mut() {
                    Some(task) => {
                        let message = task
                            .stream
                            .recv()
                            .await
                            .unwrap_or(TaskMessage::Finished(Err(TaskFailure::disconnected())));
                        (task.handle.clone(), message)
                    }
                    None => futures::future::pending().await,
                }
            } => LifecycleEvent::Task { handle, message },
        }
    }
}
