//! Run console controller.
//!
//! Owns start/stop/restart orchestration for the run task, reacts to build
//! notifications and preference changes, and publishes a [`ConsoleView`]
//! snapshot for presentation layers after every change.

use crate::log::{LogEntry, LogStreams, ScrollState};
use crate::model::{BuildEvent, ConsoleConfig, Preferences};
use crate::orchestrator::lifecycle::{run_request, LifecycleEvent, LifecycleState, TaskLifecycle};
use crate::orchestrator::main_class::{self, MainClassInfo, MainClassSet};
use crate::orchestrator::router::{route_event, AppLinks};
use crate::protocol::{TaskFailure, TaskHandle, TaskMessage, TaskOutcome};
use crate::server::TaskClient;
use anyhow::Result;
use std::ops::ControlFlow;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

const STATUS_STOPPED: &str = "Application is stopped.";

/// Which of the two log views a command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamId {
    Log,
    Output,
}

/// Commands emitted by UI layers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UiCommand {
    /// The start/stop button.
    StartStop,
    Start,
    Stop,
    Restart,
    /// Empty string clears the selection.
    SelectMainClass(String),
    /// The view is about to be hidden.
    Deactivate,
    /// The view was shown again.
    Activate,
    Scroll { stream: StreamId, offset: usize },
    Quit,
}

#[derive(Debug)]
pub(crate) enum ConsoleInput {
    Command(UiCommand),
    MainClassesResolved(Result<MainClassInfo, TaskFailure>),
}

/// A log entry published once, when it first appears in a view.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ViewEntry {
    pub stream: StreamId,
    pub entry: LogEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartTrigger {
    Build,
    User,
}

/// Everything a presentation layer needs to draw the console.
///
/// Log contents are not part of the view; new entries go out as [`ViewEntry`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleView {
    pub title: String,
    pub status: String,
    pub state: LifecycleState,
    pub task: Option<TaskHandle>,
    pub start_stop_label: &'static str,
    pub restart_enabled: bool,
    pub app_url: Option<String>,
    pub console_url: Option<String>,
    pub app_started: bool,
    pub console_available: bool,
    pub main_classes: Vec<String>,
    pub current_main_class: Option<String>,
    pub default_main_class: Option<String>,
    pub log_len: usize,
    pub output_len: usize,
    pub log_scroll: ScrollState,
    pub output_scroll: ScrollState,
    pub visible: bool,
}

fn start_stop_label(task_active: bool) -> &'static str {
    if task_active {
        "Stop"
    } else {
        "Start"
    }
}

/// The app counts as started once it is running and has announced its endpoint.
fn app_started(task_active: bool, links: &AppLinks) -> bool {
    task_active && links.app_url.as_deref().is_some_and(|url| !url.is_empty())
}

pub struct RunConsole<C: TaskClient> {
    config: ConsoleConfig,
    client: C,
    lifecycle: TaskLifecycle<C>,
    logs: LogStreams,
    links: AppLinks,
    main_classes: MainClassSet,
    status: String,
    prefs: watch::Receiver<Preferences>,
    inbox_tx: mpsc::UnboundedSender<ConsoleInput>,
    inbox_rx: mpsc::UnboundedReceiver<ConsoleInput>,
    view_tx: watch::Sender<ConsoleView>,
    entries_tx: Option<mpsc::UnboundedSender<ViewEntry>>,
    /// Highest entry id already handed to `entries_tx`.
    published_up_to: u64,
    visible: bool,
    log_scroll: ScrollState,
    output_scroll: ScrollState,
    quit_pending: bool,
}

impl<C: TaskClient> RunConsole<C> {
    pub fn new(config: ConsoleConfig, client: C, prefs: watch::Receiver<Preferences>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(ConsoleView::default());
        let logs = LogStreams::new(config.max_log_entries);
        let log_scroll = logs.primary.scroll_state();
        let output_scroll = logs.output.scroll_state();
        let mut console = Self {
            lifecycle: TaskLifecycle::new(client.clone()),
            config,
            client,
            logs,
            links: AppLinks::default(),
            main_classes: MainClassSet::default(),
            status: STATUS_STOPPED.to_string(),
            prefs,
            inbox_tx,
            inbox_rx,
            view_tx,
            entries_tx: None,
            published_up_to: 0,
            visible: true,
            log_scroll,
            output_scroll,
            quit_pending: false,
        };
        console.publish();
        console
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<ConsoleInput> {
        self.inbox_tx.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsoleView> {
        self.view_tx.subscribe()
    }

    /// Receive each log entry once, in creation order. Replaces any earlier subscriber.
    pub(crate) fn subscribe_entries(&mut self) -> mpsc::UnboundedReceiver<ViewEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries_tx = Some(tx);
        rx
    }

    pub fn view(&self) -> ConsoleView {
        let task_active = self.lifecycle.is_active();
        ConsoleView {
            title: self.config.title.clone(),
            status: self.status.clone(),
            state: self.lifecycle.state(),
            task: self.lifecycle.handle().cloned(),
            start_stop_label: start_stop_label(task_active),
            restart_enabled: task_active,
            app_url: self.links.app_url.clone(),
            console_url: self.links.console_url.clone(),
            app_started: app_started(task_active, &self.links),
            console_available: self.config.console_available,
            main_classes: self.main_classes.names().to_vec(),
            current_main_class: self.main_classes.current().map(str::to_string),
            default_main_class: self.main_classes.default_name().map(str::to_string),
            log_len: self.logs.primary.len(),
            output_len: self.logs.output.len(),
            log_scroll: self.logs.primary.scroll_state(),
            output_scroll: self.logs.output.scroll_state(),
            visible: self.visible,
        }
    }

    fn publish(&mut self) {
        let watermark = self.published_up_to;
        let mut fresh: Vec<ViewEntry> = self
            .logs
            .primary
            .newer_than(watermark)
            .map(|entry| (StreamId::Log, entry))
            .chain(
                self.logs
                    .output
                    .newer_than(watermark)
                    .map(|entry| (StreamId::Output, entry)),
            )
            .map(|(stream, entry)| ViewEntry {
                stream,
                entry: entry.clone(),
            })
            .collect();
        fresh.sort_by_key(|e| e.entry.id);
        if let Some(last) = fresh.last() {
            self.published_up_to = last.entry.id;
        }
        if let Some(tx) = self.entries_tx.as_ref() {
            for entry in fresh {
                if tx.send(entry).is_err() {
                    self.entries_tx = None;
                    break;
                }
            }
        }
        self.view_tx.send_replace(self.view());
    }

    /// Orchestrate the console until quit, reacting to UI input, the running
    /// task, build notifications, and preference changes.
    pub async fn run(mut self, mut builds: broadcast::Receiver<BuildEvent>) -> Result<()> {
        let mut builds_open = true;
        let mut prefs_open = true;
        let mut run_in_console = self.prefs.borrow().run_in_console;

        loop {
            let flow = tokio::select! {
                Some(input) = self.inbox_rx.recv() => self.handle_input(input),
                event = self.lifecycle.next_event() => self.handle_lifecycle_event(event),
                build = builds.recv(), if builds_open => {
                    match build {
                        Ok(event) if event.is_compile_success() => self.on_compile_succeeded(),
                        Ok(BuildEvent::CompileFailed { message }) => {
                            debug!(%message, "compile failed, keeping the current run");
                        }
                        Ok(event) => debug!(?event, "ignoring build event"),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "build event bus lagged");
                        }
                        Err(RecvError::Closed) => builds_open = false,
                    }
                    ControlFlow::Continue(())
                }
                changed = self.prefs.changed(), if prefs_open => {
                    if changed.is_err() {
                        prefs_open = false;
                    } else {
                        let now = self.prefs.borrow_and_update().run_in_console;
                        if now != run_in_console {
                            run_in_console = now;
                            info!(run_in_console, "run mode changed");
                            self.on_run_mode_changed();
                        }
                    }
                    ControlFlow::Continue(())
                }
            };
            self.publish();
            if flow.is_break() {
                break;
            }
        }

        Ok(())
    }

    pub(crate) fn handle_input(&mut self, input: ConsoleInput) -> ControlFlow<()> {
        match input {
            ConsoleInput::Command(command) => self.handle_command(command),
            ConsoleInput::MainClassesResolved(result) => {
                self.on_main_classes_resolved(result);
                ControlFlow::Continue(())
            }
        }
    }

    fn handle_command(&mut self, command: UiCommand) -> ControlFlow<()> {
        debug!(?command, "ui command");
        match command {
            UiCommand::StartStop => self.start_stop(),
            UiCommand::Start => {
                if !self.lifecycle.is_active() {
                    self.start(StartTrigger::User);
                } else {
                    warn!("start ignored, a task is already running");
                }
            }
            UiCommand::Stop => {
                self.lifecycle.cancel_restart();
                self.stop();
            }
            UiCommand::Restart => self.restart(),
            UiCommand::SelectMainClass(name) => {
                if !self.main_classes.select(&name) {
                    warn!(%name, "not a known main class");
                }
            }
            UiCommand::Deactivate => self.deactivate(),
            UiCommand::Activate => self.activate(),
            UiCommand::Scroll { stream, offset } => match stream {
                StreamId::Log => self.logs.primary.scroll_to(offset),
                StreamId::Output => self.logs.output.scroll_to(offset),
            },
            UiCommand::Quit => {
                self.quit_pending = true;
                if !self.lifecycle.is_active() {
                    return ControlFlow::Break(());
                }
                info!("quit requested, stopping the running task first");
                self.lifecycle.cancel_restart();
                self.stop();
            }
        }
        ControlFlow::Continue(())
    }

    pub(crate) fn handle_lifecycle_event(&mut self, event: LifecycleEvent) -> ControlFlow<()> {
        match event {
            LifecycleEvent::Task {
                message: TaskMessage::Event(event),
                ..
            } => {
                route_event(&event, &mut self.logs, &mut self.links);
                ControlFlow::Continue(())
            }
            LifecycleEvent::Task {
                handle,
                message: TaskMessage::Finished(outcome),
            } => self.on_task_finished(&handle, outcome),
            LifecycleEvent::KillFinished { handle, result } => {
                self.on_kill_finished(&handle, result);
                ControlFlow::Continue(())
            }
        }
    }

    /// Reload main classes and, if wanted, run the freshly built app.
    pub(crate) fn on_compile_succeeded(&mut self) {
        info!("compile succeeded, reloading main class information");
        let client = self.client.clone();
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = main_class::resolve(client).await;
            let _ = tx.send(ConsoleInput::MainClassesResolved(result));
        });
    }

    fn on_main_classes_resolved(&mut self, result: Result<MainClassInfo, TaskFailure>) {
        match result {
            Ok(mut resolved) => {
                if !self.config.app_kind.supports_main_class_selection() {
                    debug!(app_kind = ?self.config.app_kind, "dropping main class info");
                    resolved = MainClassInfo::default();
                }
                self.main_classes.apply(resolved);
            }
            Err(failure) => {
                warn!(error = %failure, "failed to load main classes");
                self.status = "Unable to load main classes".to_string();
                self.logs
                    .primary
                    .error(format!("Failed to load main classes: {failure}"));
            }
        }

        // Run even without main class metadata.
        let rerun_on_build = self.prefs.borrow().rerun_on_build;
        if rerun_on_build && !self.lifecycle.is_active() {
            self.start(StartTrigger::Build);
        }
    }

    /// Console wrapping changed; the running app must be relaunched to pick it up.
    pub(crate) fn on_run_mode_changed(&mut self) {
        self.restart();
    }

    fn start(&mut self, trigger: StartTrigger) {
        if let Some(handle) = self.lifecycle.handle() {
            warn!(task = %handle, "start ignored, a task is already running");
            return;
        }

        self.logs.clear();
        let message = match trigger {
            StartTrigger::Build => "Build succeeded, running...",
            StartTrigger::User if self.lifecycle.restart_pending() => "Restarting...",
            StartTrigger::User => "Running...",
        };
        self.logs.primary.info(message);
        self.status = message.to_string();

        let in_console = self.prefs.borrow().run_in_console;
        let request = run_request(self.main_classes.current(), in_console);
        if let Err(e) = self.lifecycle.start(request) {
            warn!(error = %e, "run task not started");
        }
    }

    fn stop(&mut self) {
        if self.lifecycle.stop() {
            self.status = "Stopping...".to_string();
        }
    }

    fn start_stop(&mut self) {
        if self.lifecycle.is_active() {
            self.lifecycle.cancel_restart();
            self.stop();
        } else {
            self.start(StartTrigger::User);
        }
    }

    fn restart(&mut self) {
        if self.lifecycle.request_restart() {
            self.status = "Restarting...".to_string();
        } else {
            self.start(StartTrigger::User);
        }
    }

    fn on_task_finished(&mut self, handle: &TaskHandle, outcome: TaskOutcome) -> ControlFlow<()> {
        match outcome {
            Ok(response) if response.is_generic() => {
                self.logs.primary.info("Run complete.");
                self.status = "Run complete".to_string();
            }
            Ok(response) => {
                let text = serde_json::to_string(&response).unwrap_or_else(|_| response.kind.clone());
                warn!(task = %handle, reply = %text, "unexpected reply to run task");
                self.logs.primary.error(format!("Unexpected reply: {text}"));
                self.status = "Unexpected reply".to_string();
            }
            Err(failure) => {
                warn!(task = %handle, error = %failure, "run task failed");
                self.status = "Run failed".to_string();
                self.logs.primary.error(format!("Failed: {failure}"));
            }
        }
        self.after_run(handle)
    }

    fn after_run(&mut self, handle: &TaskHandle) -> ControlFlow<()> {
        let Some(done) = self.lifecycle.complete(handle) else {
            return ControlFlow::Continue(());
        };
        self.links.clear();
        if self.quit_pending {
            return ControlFlow::Break(());
        }
        if done.restart {
            self.start(StartTrigger::User);
        }
        ControlFlow::Continue(())
    }

    fn on_kill_finished(&mut self, handle: &TaskHandle, result: Result<(), TaskFailure>) {
        match result {
            Ok(()) => debug!(task = %handle, "kill request accepted"),
            Err(failure) => {
                if !self.lifecycle.kill_failed(handle) {
                    debug!(task = %handle, error = %failure, "kill failed for a finished task");
                    return;
                }
                warn!(task = %handle, error = %failure, "kill request failed");
                self.status = "Unable to stop".to_string();
                self.logs
                    .primary
                    .error(format!("Request to kill task failed: {}", failure.message));
            }
        }
    }

    fn deactivate(&mut self) {
        if !self.visible {
            debug!("console already hidden");
            return;
        }
        self.visible = false;
        self.log_scroll = self.logs.primary.scroll_state();
        self.output_scroll = self.logs.output.scroll_state();
    }

    fn activate(&mut self) {
        if self.visible {
            debug!("console already visible");
            return;
        }
        self.visible = true;
        self.logs.primary.apply_scroll_state(self.log_scroll);
        self.logs.output.apply_scroll_state(self.output_scroll);
    }
}
