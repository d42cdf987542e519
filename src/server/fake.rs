//! In-memory `TaskClient` that records requests and lets tests drive task streams.

use crate::protocol::{
    TaskFailure, TaskHandle, TaskMessage, TaskOutcome, TaskRequest, TaskStream,
};
use crate::server::TaskClient;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Run { handle: TaskHandle, request: TaskRequest },
    Kill(TaskHandle),
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    calls: Vec<Call>,
    open: HashMap<TaskHandle, mpsc::UnboundedSender<TaskMessage>>,
    scripted: HashMap<String, VecDeque<TaskOutcome>>,
    kill_failure: Option<TaskFailure>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete the next request for `task` immediately with `outcome`.
    pub fn script(&self, task: &str, outcome: TaskOutcome) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(task.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Make every subsequent kill request fail.
    pub fn fail_kills(&self, failure: TaskFailure) {
        self.state.lock().unwrap().kill_failure = Some(failure);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn runs(&self) -> Vec<TaskRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Run { request, .. } => Some(request),
                Call::Kill(_) => None,
            })
            .collect()
    }

    pub fn kills(&self) -> Vec<TaskHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Kill(h) => Some(h),
                Call::Run { .. } => None,
            })
            .collect()
    }

    pub fn emit(&self, handle: &TaskHandle, message: TaskMessage) {
        let state = self.state.lock().unwrap();
        let tx = state.open.get(handle).expect("no open stream for handle");
        tx.send(message).expect("stream receiver dropped");
    }

    pub fn finish(&self, handle: &TaskHandle, outcome: TaskOutcome) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .open
            .remove(handle)
            .expect("no open stream for handle");
        tx.send(TaskMessage::Finished(outcome))
            .expect("stream receiver dropped");
    }

    /// Drop the sender without a terminal message, as a broken connection would.
    pub fn disconnect(&self, handle: &TaskHandle) {
        self.state.lock().unwrap().open.remove(handle);
    }
}

impl TaskClient for FakeClient {
    fn run_task(&self, request: TaskRequest) -> (TaskHandle, TaskStream) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let handle = TaskHandle::new(format!("task-{}", state.next_id));
        let (tx, rx) = mpsc::unbounded_channel();
        state.calls.push(Call::Run {
            handle: handle.clone(),
            request: request.clone(),
        });
        let scripted = state
            .scripted
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => {
                let _ = tx.send(TaskMessage::Finished(outcome));
            }
            None => {
                state.open.insert(handle.clone(), tx);
            }
        }
        (handle, rx)
    }

    fn kill_task(
        &self,
        handle: &TaskHandle,
    ) -> impl Future<Output = Result<(), TaskFailure>> + Send + 'static {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Kill(handle.clone()));
        let result = match &state.kill_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        };
        async move { result }
    }
}
