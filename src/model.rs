use std::time::Duration;

/// Kind of application the server builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AppKind {
    #[default]
    Plain,
    /// Web framework apps where `run-main` is known not to work.
    Play,
}

impl AppKind {
    /// Whether an explicit main class can be passed to the run task.
    pub fn supports_main_class_selection(self) -> bool {
        !matches!(self, AppKind::Play)
    }
}

/// Static settings fixed for the lifetime of a console.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub app_kind: AppKind,
    /// Whether the server offers a supervisory console for running apps.
    pub console_available: bool,
    pub max_log_entries: usize,
    pub title: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8888".to_string(),
            connect_timeout: Duration::from_secs(5),
            app_kind: AppKind::Plain,
            console_available: false,
            max_log_entries: 5000,
            title: "Run".to_string(),
        }
    }
}

/// Preferences owned outside the console that may change while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    /// Wrap run tasks for console-mode execution.
    pub run_in_console: bool,
    /// Start the app automatically after every successful compile.
    pub rerun_on_build: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            run_in_console: false,
            rerun_on_build: true,
        }
    }
}

/// Notifications published on the build event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    CompileSucceeded,
    CompileFailed { message: String },
    ProjectReloaded,
}

impl BuildEvent {
    /// Whether the console reacts to this notification.
    pub fn is_compile_success(&self) -> bool {
        matches!(self, BuildEvent::CompileSucceeded)
    }
}
