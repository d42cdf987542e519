//! Append-only log buffers backing the two console views.

use crate::protocol::{LogRecord, TaskEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warn,
    Error,
    Debug,
    Success,
    Trace,
    Stdout,
    Stderr,
    /// An event nothing else knew how to route.
    Leftover,
}

impl LogKind {
    /// Map a server log record type onto a kind. Unknown types read as info.
    pub fn from_level(level: &str) -> Self {
        match level {
            "stdout" => LogKind::Stdout,
            "stderr" => LogKind::Stderr,
            "warn" => LogKind::Warn,
            "error" => LogKind::Error,
            "debug" => LogKind::Debug,
            "success" => LogKind::Success,
            "trace" => LogKind::Trace,
            _ => LogKind::Info,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LogKind::Info => "INFO",
            LogKind::Warn => "WARN",
            LogKind::Error => "ERROR",
            LogKind::Debug => "DEBUG",
            LogKind::Success => "OK",
            LogKind::Trace => "TRACE",
            LogKind::Stdout => "OUT",
            LogKind::Stderr => "ERR",
            LogKind::Leftover => "EVENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Process-unique, increasing in creation order. Survives moves between buffers.
    pub id: u64,
    pub at: OffsetDateTime,
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    fn new(kind: LogKind, message: String) -> Self {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            at: OffsetDateTime::now_utc(),
            kind,
            message,
        }
    }
}

/// Snapshot of where a viewer was looking in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub offset: usize,
    /// Viewer was following the newest entries.
    pub at_tail: bool,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            offset: 0,
            at_tail: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    scroll: ScrollState,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            scroll: ScrollState::default(),
        }
    }

    pub fn entries(&self) -> &VecDeque<LogEntry> {
        &self.entries
    }

    /// Entries with an id above `watermark`, oldest first.
    ///
    /// Only the tail is scanned: entries are appended in id order, and entries
    /// moved in from another buffer are assumed to be at or below the watermark.
    pub fn newer_than(&self, watermark: u64) -> impl Iterator<Item = &LogEntry> {
        let fresh = self
            .entries
            .iter()
            .rev()
            .take_while(|e| e.id > watermark)
            .count();
        self.entries.range(self.entries.len() - fresh..)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Info, message.into()));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogEntry::new(LogKind::Error, message.into()));
    }

    pub fn record(&mut self, record: &LogRecord) {
        self.push(LogEntry::new(
            LogKind::from_level(&record.level),
            record.message.clone(),
        ));
    }

    /// Keep an unrecognised event visible as its JSON text.
    pub fn leftover(&mut self, event: &TaskEvent) {
        let text = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        self.push(LogEntry::new(LogKind::Leftover, text));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.scroll = ScrollState::default();
    }

    /// Append every entry of `other`, in order, and leave `other` empty.
    pub fn move_from(&mut self, other: &mut LogBuffer) {
        let moved = std::mem::take(&mut other.entries);
        other.scroll = ScrollState::default();
        for entry in moved {
            self.push(entry);
        }
    }

    /// Record where the viewer is now looking.
    pub fn scroll_to(&mut self, offset: usize) {
        let offset = offset.min(self.entries.len());
        self.scroll = ScrollState {
            offset,
            at_tail: offset >= self.entries.len(),
        };
    }

    pub fn scroll_state(&self) -> ScrollState {
        self.scroll
    }

    pub fn apply_scroll_state(&mut self, state: ScrollState) {
        self.scroll = if state.at_tail {
            ScrollState {
                offset: self.entries.len(),
                at_tail: true,
            }
        } else {
            ScrollState {
                offset: state.offset.min(self.entries.len()),
                at_tail: false,
            }
        };
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
            self.scroll.offset = self.scroll.offset.saturating_sub(excess);
        }
        if self.scroll.at_tail {
            self.scroll.offset = self.entries.len();
        }
    }
}

/// The primary (diagnostic) log and the raw program output, side by side.
#[derive(Debug, Clone)]
pub struct LogStreams {
    pub primary: LogBuffer,
    pub output: LogBuffer,
}

impl LogStreams {
    pub fn new(max_entries: usize) -> Self {
        Self {
            primary: LogBuffer::new(max_entries),
            output: LogBuffer::new(max_entries),
        }
    }

    pub fn clear(&mut self) {
        self.primary.clear();
        self.output.clear();
    }

    /// Output seen so far belongs with the diagnostics.
    pub fn fold_output_into_primary(&mut self) {
        self.primary.move_from(&mut self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(buf: &LogBuffer) -> Vec<&str> {
        buf.entries().iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_kind_from_level() {
        assert_eq!(LogKind::from_level("stdout"), LogKind::Stdout);
        assert_eq!(LogKind::from_level("stderr"), LogKind::Stderr);
        assert_eq!(LogKind::from_level("error"), LogKind::Error);
        assert_eq!(LogKind::from_level("something-new"), LogKind::Info);
    }

    #[test]
    fn test_move_from_preserves_order() {
        let mut primary = LogBuffer::new(100);
        let mut output = LogBuffer::new(100);
        primary.info("first");
        output.record(&LogRecord::new("stdout", "a"));
        output.record(&LogRecord::new("stderr", "b"));

        let ids: Vec<u64> = output.entries().iter().map(|e| e.id).collect();
        primary.move_from(&mut output);

        assert_eq!(messages(&primary), vec!["first", "a", "b"]);
        assert!(output.is_empty());
        let moved: Vec<u64> = primary.entries().iter().skip(1).map(|e| e.id).collect();
        assert_eq!(moved, ids);
    }

    #[test]
    fn test_entry_ids_increase() {
        let mut buf = LogBuffer::new(10);
        buf.info("one");
        buf.error("two");
        let e = buf.entries();
        assert!(e[0].id < e[1].id);
        assert_eq!(e[1].kind, LogKind::Error);
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut buf = LogBuffer::new(3);
        for i in 0..5 {
            buf.info(format!("line {i}"));
        }
        assert_eq!(messages(&buf), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_newer_than_reads_only_the_tail() {
        let mut primary = LogBuffer::new(100);
        let mut output = LogBuffer::new(100);
        primary.info("seen");
        output.record(&LogRecord::new("stdout", "seen too"));
        let watermark = output.entries()[0].id;

        primary.move_from(&mut output);
        assert_eq!(primary.newer_than(watermark).count(), 0);

        primary.info("fresh 1");
        primary.error("fresh 2");
        let fresh: Vec<&str> = primary
            .newer_than(watermark)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(fresh, vec!["fresh 1", "fresh 2"]);
    }

    #[test]
    fn test_newer_than_after_trim() {
        let mut buf = LogBuffer::new(2);
        buf.info("a");
        let watermark = buf.entries()[0].id;
        buf.info("b");
        buf.info("c");
        buf.info("d");
        let fresh: Vec<&str> = buf.newer_than(watermark).map(|e| e.message.as_str()).collect();
        assert_eq!(fresh, vec!["c", "d"]);
    }

    #[test]
    fn test_scroll_state_round_trip() {
        let mut buf = LogBuffer::new(100);
        for i in 0..10 {
            buf.info(format!("line {i}"));
        }
        assert!(buf.scroll_state().at_tail);

        buf.scroll_to(4);
        let saved = buf.scroll_state();
        assert_eq!(saved, ScrollState { offset: 4, at_tail: false });

        // Viewer moves elsewhere, then the saved position comes back.
        buf.scroll_to(0);
        buf.info("more");
        buf.apply_scroll_state(saved);
        assert_eq!(buf.scroll_state().offset, 4);
    }

    #[test]
    fn test_scroll_tail_follows_new_entries() {
        let mut buf = LogBuffer::new(100);
        buf.info("a");
        let saved = buf.scroll_state();
        buf.info("b");
        buf.info("c");
        buf.apply_scroll_state(saved);
        assert_eq!(buf.scroll_state(), ScrollState { offset: 3, at_tail: true });
    }

    #[test]
    fn test_apply_clamps_offset() {
        let mut buf = LogBuffer::new(100);
        buf.info("a");
        buf.apply_scroll_state(ScrollState { offset: 40, at_tail: false });
        assert_eq!(buf.scroll_state().offset, 1);
    }

    #[test]
    fn test_clear_streams() {
        let mut streams = LogStreams::new(10);
        streams.primary.info("x");
        streams.output.record(&LogRecord::new("stdout", "y"));
        streams.clear();
        assert!(streams.primary.is_empty());
        assert!(streams.output.is_empty());
    }
}
