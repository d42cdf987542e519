use crate::model::{AppKind, BuildEvent, ConsoleConfig, Preferences};
use crate::orchestrator::{ConsoleInput, ConsoleView, RunConsole, StreamId, UiCommand, ViewEntry};
use crate::server::HttpTaskClient;
use crate::text_view::{self, TextRenderer};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Read stdin lines on a dedicated thread.
///
/// The thread is detached: a blocked read must not hold up runtime shutdown.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    });
    rx
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "run-console",
    version,
    about = "Terminal run console for a remote build/run server"
)]
pub struct Cli {
    /// Base URL of the build/run server
    #[arg(long, default_value = "http://localhost:8888")]
    pub server_url: String,

    /// Connect timeout for requests to the server
    #[arg(long, default_value = "5s")]
    pub connect_timeout: humantime::Duration,

    /// Kind of application the server builds
    #[arg(long, value_enum, default_value_t = AppKind::Plain)]
    pub app_kind: AppKind,

    /// The server offers a supervisory console for running apps
    #[arg(long)]
    pub console_available: bool,

    /// Run the app wrapped for console-mode execution
    #[arg(long)]
    pub console_mode: bool,

    /// Use --rerun-on-build true or --rerun-on-build false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub rerun_on_build: bool,

    /// Start the app as soon as the console launches
    #[arg(long)]
    pub start_on_launch: bool,

    /// Maximum entries kept in each log view
    #[arg(long, default_value_t = 5000)]
    pub max_log_entries: usize,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Build a `ConsoleConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ConsoleConfig {
    ConsoleConfig {
        server_url: args.server_url.clone(),
        connect_timeout: Duration::from(args.connect_timeout),
        app_kind: args.app_kind,
        console_available: args.console_available,
        max_log_entries: args.max_log_entries.max(1),
        ..ConsoleConfig::default()
    }
}

pub fn initial_preferences(args: &Cli) -> Preferences {
    Preferences {
        run_in_console: args.console_mode,
        rerun_on_build: args.rerun_on_build,
    }
}

/// One line typed at the console prompt.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleLine {
    Ui(UiCommand),
    /// Publish a build notification on the bus.
    Build(BuildEvent),
    Console(bool),
    Rerun(bool),
    Status,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CommandError {
    #[error("unknown command `{0}`, try: start, stop, restart, main, compiled, compile-failed, reloaded, console, rerun, hide, show, scroll, status, quit")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

fn parse_switch(arg: Option<&str>, usage: &'static str) -> Result<bool, CommandError> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(CommandError::Usage(usage)),
    }
}

fn parse_line(line: &str) -> Result<ConsoleLine, CommandError> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(ConsoleLine::Ui(UiCommand::StartStop));
    };
    let arg = words.next();
    let parsed = match cmd {
        "toggle" => ConsoleLine::Ui(UiCommand::StartStop),
        "start" => ConsoleLine::Ui(UiCommand::Start),
        "stop" => ConsoleLine::Ui(UiCommand::Stop),
        "restart" => ConsoleLine::Ui(UiCommand::Restart),
        "main" => match arg {
            Some("-") => ConsoleLine::Ui(UiCommand::SelectMainClass(String::new())),
            Some(name) => ConsoleLine::Ui(UiCommand::SelectMainClass(name.to_string())),
            None => return Err(CommandError::Usage("main <class> | main -")),
        },
        "compiled" => ConsoleLine::Build(BuildEvent::CompileSucceeded),
        "compile-failed" => {
            let rest: Vec<&str> = arg.into_iter().chain(words.by_ref()).collect();
            ConsoleLine::Build(BuildEvent::CompileFailed {
                message: rest.join(" "),
            })
        }
        "reloaded" => ConsoleLine::Build(BuildEvent::ProjectReloaded),
        "console" => ConsoleLine::Console(parse_switch(arg, "console on|off")?),
        "rerun" => ConsoleLine::Rerun(parse_switch(arg, "rerun on|off")?),
        "hide" => ConsoleLine::Ui(UiCommand::Deactivate),
        "show" => ConsoleLine::Ui(UiCommand::Activate),
        "scroll" => {
            const USAGE: &str = "scroll log|output <offset>";
            let stream = match arg {
                Some("log") => StreamId::Log,
                Some("output") => StreamId::Output,
                _ => return Err(CommandError::Usage(USAGE)),
            };
            let offset = words
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::Usage(USAGE))?;
            ConsoleLine::Ui(UiCommand::Scroll { stream, offset })
        }
        "status" => ConsoleLine::Status,
        "quit" | "exit" => ConsoleLine::Ui(UiCommand::Quit),
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(parsed)
}

fn emit(out: &mpsc::UnboundedSender<OutputLine>, lines: impl IntoIterator<Item = String>) {
    for line in lines {
        let _ = out.send(OutputLine::Stdout(line));
    }
}

/// Print view changes and new log entries until the console goes away.
async fn render_views(
    mut views: watch::Receiver<ConsoleView>,
    mut entries: mpsc::UnboundedReceiver<ViewEntry>,
    out: mpsc::UnboundedSender<OutputLine>,
) {
    let mut renderer = TextRenderer::default();
    emit(&out, renderer.render(&views.borrow_and_update()));
    loop {
        tokio::select! {
            biased;
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let lines = renderer.render(&views.borrow_and_update());
                emit(&out, lines);
            }
            Some(entry) = entries.recv() => emit(&out, renderer.entry(entry)),
        }
    }
    while let Ok(entry) = entries.try_recv() {
        emit(&out, renderer.entry(entry));
    }
}

/// Turn typed lines into console inputs, build events, and preference updates.
///
/// End of input quits the console.
async fn dispatch_commands(
    mut lines: mpsc::UnboundedReceiver<String>,
    inbox: mpsc::UnboundedSender<ConsoleInput>,
    builds: broadcast::Sender<BuildEvent>,
    prefs: watch::Sender<Preferences>,
    views: watch::Receiver<ConsoleView>,
    out: mpsc::UnboundedSender<OutputLine>,
) {
    while let Some(line) = lines.recv().await {
        match parse_line(&line) {
            Ok(ConsoleLine::Ui(command)) => {
                if inbox.send(ConsoleInput::Command(command)).is_err() {
                    return;
                }
            }
            Ok(ConsoleLine::Build(event)) => {
                if builds.send(event).is_err() {
                    debug!("no build listeners");
                }
            }
            Ok(ConsoleLine::Console(on)) => prefs.send_modify(|p| p.run_in_console = on),
            Ok(ConsoleLine::Rerun(on)) => prefs.send_modify(|p| p.rerun_on_build = on),
            Ok(ConsoleLine::Status) => {
                let summary = text_view::summary(&views.borrow());
                for text in summary {
                    let _ = out.send(OutputLine::Stdout(text));
                }
            }
            Err(e) => {
                let _ = out.send(OutputLine::Stderr(e.to_string()));
            }
        }
    }
    let _ = inbox.send(ConsoleInput::Command(UiCommand::Quit));
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    debug!(?cfg, "console configuration");
    let client = HttpTaskClient::new(&cfg).context("failed to create server client")?;

    let (prefs_tx, prefs_rx) = watch::channel(initial_preferences(&args));
    let (bus_tx, builds) = broadcast::channel::<BuildEvent>(64);
    let mut console = RunConsole::new(cfg, client, prefs_rx);
    let inbox = console.sender();
    let views = console.subscribe();
    let entries = console.subscribe_entries();

    let (out_tx, out_handle) = spawn_output_writer();
    let render_handle = tokio::spawn(render_views(views.clone(), entries, out_tx.clone()));
    let dispatch_handle = tokio::spawn(dispatch_commands(
        spawn_input_reader(),
        inbox.clone(),
        bus_tx,
        prefs_tx,
        views,
        out_tx.clone(),
    ));

    if args.start_on_launch {
        let _ = inbox.send(ConsoleInput::Command(UiCommand::Start));
    }
    drop(inbox);

    let result = console.run(builds).await;

    dispatch_handle.abort();
    let _ = dispatch_handle.await;
    let _ = render_handle.await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}
