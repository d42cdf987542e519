//! Application-level orchestration for the run console.
//!
//! This module owns the run task lifecycle (start/stop/restart), main-class
//! negotiation with the server, and routing of task events into log views. UI/CLI
//! layers talk to it through [`UiCommand`]s and observe [`ConsoleView`] snapshots.

mod controller;
mod lifecycle;
mod main_class;
mod router;

pub(crate) use controller::{ConsoleInput, ConsoleView, RunConsole, StreamId, UiCommand, ViewEntry};
#[cfg(test)]
pub(crate) use lifecycle::LifecycleState;
