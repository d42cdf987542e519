//! Text rendering of console views for terminal output.
//!
//! Each render emits only what changed since the previous view: status, links,
//! main-class choices, and visibility. Log entries arrive on their own channel
//! and are held back while the view is hidden.

use crate::log::{LogEntry, LogKind};
use crate::orchestrator::{ConsoleView, StreamId, ViewEntry};
use time::format_description::FormatItem;
use time::macros::format_description;

const CLOCK: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

fn format_entry(stream: StreamId, entry: &LogEntry) -> String {
    let at = entry.at.format(CLOCK).unwrap_or_default();
    let tag = match stream {
        StreamId::Log => "log",
        StreamId::Output => "out",
    };
    match entry.kind {
        LogKind::Stdout | LogKind::Stderr => format!("{at} [{tag}] {}", entry.message),
        kind => format!("{at} [{tag}] {:<5} {}", kind.label(), entry.message),
    }
}

fn format_main_classes(names: &[String], current: Option<&str>) -> String {
    if names.is_empty() {
        return "main classes: (none)".to_string();
    }
    let names: Vec<String> = names
        .iter()
        .map(|name| {
            if current == Some(name.as_str()) {
                format!("*{name}")
            } else {
                name.clone()
            }
        })
        .collect();
    format!("main classes: {}", names.join(", "))
}

/// Remembers what has already been printed.
#[derive(Debug, Default)]
pub(crate) struct TextRenderer {
    started: bool,
    status: String,
    visible: bool,
    app_url: Option<String>,
    console_url: Option<String>,
    main_classes: Vec<String>,
    current_main_class: Option<String>,
    /// Entries that arrived while the view was hidden.
    deferred: Vec<ViewEntry>,
}

impl TextRenderer {
    /// Lines describing what changed since the previous view.
    pub fn render(&mut self, view: &ConsoleView) -> Vec<String> {
        let mut lines = Vec::new();

        if !self.started {
            self.started = true;
            self.visible = view.visible;
            lines.push(format!("== {} ==", view.title));
            lines.push(format!("status: {}", view.status));
            self.status.clone_from(&view.status);
        } else if self.status != view.status {
            lines.push(format!("status: {}", view.status));
            self.status.clone_from(&view.status);
        }

        if self.visible != view.visible {
            self.visible = view.visible;
            if view.visible {
                lines.push(format!(
                    "view shown (log at {}, output at {})",
                    view.log_scroll.offset, view.output_scroll.offset
                ));
                lines.extend(
                    self.deferred
                        .drain(..)
                        .map(|e| format_entry(e.stream, &e.entry)),
                );
            } else {
                lines.push("view hidden".to_string());
            }
        }

        if let Some(url) = view.app_url.as_deref() {
            if self.app_url.as_deref() != Some(url) {
                lines.push(format!("app: {url}"));
            }
        }
        self.app_url.clone_from(&view.app_url);

        if let Some(url) = view.console_url.as_deref() {
            if view.console_available && self.console_url.as_deref() != Some(url) {
                lines.push(format!("console: {url}"));
            }
        }
        self.console_url.clone_from(&view.console_url);

        if self.main_classes != view.main_classes
            || self.current_main_class != view.current_main_class
        {
            self.main_classes.clone_from(&view.main_classes);
            self.current_main_class.clone_from(&view.current_main_class);
            lines.push(format_main_classes(
                &self.main_classes,
                self.current_main_class.as_deref(),
            ));
        }

        lines
    }

    /// The line for a newly published entry, or `None` while the view is hidden.
    pub fn entry(&mut self, entry: ViewEntry) -> Option<String> {
        if self.started && !self.visible {
            self.deferred.push(entry);
            return None;
        }
        Some(format_entry(entry.stream, &entry.entry))
    }
}

/// A full description of the current view, for the `status` command.
pub(crate) fn summary(view: &ConsoleView) -> Vec<String> {
    let mut lines = vec![
        format!("status: {}", view.status),
        format!(
            "task: {} ({:?}) [{}]",
            view.task.as_ref().map_or("-", |t| t.as_str()),
            view.state,
            view.start_stop_label
        ),
        format_main_classes(&view.main_classes, view.current_main_class.as_deref()),
    ];
    if let Some(name) = view.default_main_class.as_deref() {
        lines.push(format!("default main class: {name}"));
    }
    if view.app_started {
        if let Some(url) = view.app_url.as_deref() {
            lines.push(format!("app: {url}"));
        }
    }
    if view.console_available {
        lines.push(format!(
            "console: {}",
            view.console_url.as_deref().unwrap_or("(not running)")
        ));
    }
    lines.push(format!(
        "log: {} entries, output: {} entries",
        view.log_len, view.output_len
    ));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogBuffer;
    use crate::orchestrator::LifecycleState;
    use crate::protocol::{LogRecord, TaskHandle};

    fn base_view() -> ConsoleView {
        ConsoleView {
            title: "Run".to_string(),
            status: "Application is stopped.".to_string(),
            start_stop_label: "Start",
            visible: true,
            ..ConsoleView::default()
        }
    }

    fn view_entry(stream: StreamId, buf: &LogBuffer) -> ViewEntry {
        ViewEntry {
            stream,
            entry: buf.entries().back().cloned().unwrap(),
        }
    }

    #[test]
    fn test_first_render_has_header_and_status() {
        let mut renderer = TextRenderer::default();
        let lines = renderer.render(&base_view());
        assert_eq!(lines, vec!["== Run ==", "status: Application is stopped."]);
        assert!(renderer.render(&base_view()).is_empty());
    }

    #[test]
    fn test_entries_are_tagged_by_stream() {
        let mut renderer = TextRenderer::default();
        renderer.render(&base_view());

        let mut output = LogBuffer::new(10);
        output.record(&LogRecord::new("stdout", "boot"));
        let line = renderer.entry(view_entry(StreamId::Output, &output)).unwrap();
        assert!(line.ends_with("[out] boot"));

        let mut primary = LogBuffer::new(10);
        primary.info("next");
        let line = renderer.entry(view_entry(StreamId::Log, &primary)).unwrap();
        assert!(line.ends_with("[log] INFO  next"));
    }

    #[test]
    fn test_links_and_main_classes() {
        let mut renderer = TextRenderer::default();
        renderer.render(&base_view());

        let mut view = base_view();
        view.app_url = Some("http://localhost:9000".to_string());
        view.console_url = Some("http://localhost:9900".to_string());
        view.main_classes = vec!["a.Main".to_string(), "b.Main".to_string()];
        view.current_main_class = Some("b.Main".to_string());
        let lines = renderer.render(&view);
        assert_eq!(
            lines,
            vec!["app: http://localhost:9000", "main classes: a.Main, *b.Main"]
        );

        view.console_available = true;
        view.console_url = Some("http://localhost:9901".to_string());
        assert_eq!(renderer.render(&view), vec!["console: http://localhost:9901"]);
        assert!(renderer.render(&view).is_empty());
    }

    #[test]
    fn test_hidden_view_defers_entries() {
        let mut renderer = TextRenderer::default();
        renderer.render(&base_view());

        let mut view = base_view();
        view.visible = false;
        assert_eq!(renderer.render(&view), vec!["view hidden"]);

        let mut buf = LogBuffer::new(10);
        buf.info("while hidden");
        assert_eq!(renderer.entry(view_entry(StreamId::Log, &buf)), None);

        view.visible = true;
        let lines = renderer.render(&view);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("view shown"));
        assert!(lines[1].ends_with("while hidden"));
        assert!(renderer.render(&view).is_empty());
    }

    #[test]
    fn test_summary() {
        let mut view = base_view();
        view.task = Some(TaskHandle::new("abc"));
        view.state = LifecycleState::Running;
        view.start_stop_label = "Stop";
        view.log_len = 4;
        let lines = summary(&view);
        assert_eq!(lines[1], "task: abc (Running) [Stop]");
        assert_eq!(lines[2], "main classes: (none)");
        assert_eq!(lines.last().unwrap(), "log: 4 entries, output: 0 entries");
    }
}
