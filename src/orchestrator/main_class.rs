//! Main-class negotiation with the server and the console's selection policy.

use crate::protocol::{wire, TaskFailure, TaskMessage, TaskOutcome, TaskRequest, TaskResponse};
use crate::server::TaskClient;
use serde_json::Value;
use tracing::{debug, warn};

/// What the server told us about entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainClassInfo {
    /// Explicitly configured default, if any.
    pub default: Option<String>,
    /// Discovered entry points in server order.
    pub names: Vec<String>,
}

/// Discover entry points, then look up the configured default.
///
/// A failed discovery fails the whole negotiation. A failed default lookup only
/// means there is no default.
pub async fn resolve<C: TaskClient>(client: C) -> Result<MainClassInfo, TaskFailure> {
    let discovered = run_lookup(&client, wire::TASK_DISCOVER_MAIN_CLASSES).await?;
    let names = extract_names(&discovered);

    let default = match run_lookup(&client, wire::TASK_DEFAULT_MAIN_CLASS).await {
        Ok(response) => extract_default(&response),
        Err(failure) => {
            debug!(error = %failure, "default main class lookup failed, treating as unset");
            None
        }
    };

    Ok(MainClassInfo { default, names })
}

async fn run_lookup<C: TaskClient>(client: &C, task: &str) -> TaskOutcome {
    let (handle, mut stream) = client.run_task(TaskRequest::new(task));
    while let Some(message) = stream.recv().await {
        match message {
            TaskMessage::Event(event) => debug!(task, %handle, ?event, "lookup event"),
            TaskMessage::Finished(outcome) => return outcome,
        }
    }
    Err(TaskFailure::disconnected())
}

fn extract_names(response: &TaskResponse) -> Vec<String> {
    if !response.is_generic() {
        warn!(kind = %response.kind, "unexpected reply to main class discovery");
        return Vec::new();
    }
    response
        .params
        .get("names")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `name` is absent when no default is configured.
fn extract_default(response: &TaskResponse) -> Option<String> {
    if !response.is_generic() {
        warn!(kind = %response.kind, "unexpected reply to default main class lookup");
        return None;
    }
    response
        .params
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Available entry points plus the one the next run will use.
///
/// A non-empty current selection is always one of `names`; the default is
/// inserted into `names` when it was not discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainClassSet {
    names: Vec<String>,
    default: Option<String>,
    current: String,
}

impl MainClassSet {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// The selected main class, `None` when the plain run task should be used.
    pub fn current(&self) -> Option<&str> {
        if self.current.is_empty() {
            None
        } else {
            Some(&self.current)
        }
    }

    /// Merge a fresh negotiation result, keeping the user's choice when still valid.
    pub fn apply(&mut self, info: MainClassInfo) {
        let MainClassInfo { default, mut names } = info;
        if let Some(default) = default.as_ref() {
            if !names.contains(default) {
                names.push(default.clone());
            }
        }

        let previous = std::mem::take(&mut self.current);
        let current = if !previous.is_empty() && names.contains(&previous) {
            previous
        } else if let Some(default) = default.as_ref() {
            default.clone()
        } else {
            names.first().cloned().unwrap_or_default()
        };

        debug!(?names, ?default, %current, "main classes updated");
        self.names = names;
        self.default = default;
        self.current = current;
    }

    /// Select a main class by name; an empty name clears the selection.
    pub fn select(&mut self, name: &str) -> bool {
        if name.is_empty() || self.names.iter().any(|n| n == name) {
            self.current = name.to_string();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::fake::FakeClient;
    use serde_json::json;

    fn set_with_current(current: &str) -> MainClassSet {
        MainClassSet {
            names: vec![current.to_string()],
            default: None,
            current: current.to_string(),
        }
    }

    fn info(default: &str, names: &[&str]) -> MainClassInfo {
        MainClassInfo {
            default: (!default.is_empty()).then(|| default.to_string()),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn generic(params: serde_json::Value) -> TaskOutcome {
        let serde_json::Value::Object(map) = params else {
            panic!("params must be an object");
        };
        Ok(TaskResponse::generic(map))
    }

    #[test]
    fn test_missing_current_falls_back_to_default() {
        let mut set = set_with_current("C");
        set.apply(info("B", &["A", "B"]));
        assert_eq!(set.current(), Some("B"));
        assert_eq!(set.names(), ["A", "B"]);
    }

    #[test]
    fn test_existing_current_is_kept() {
        let mut set = set_with_current("A");
        set.apply(info("", &["A", "B"]));
        assert_eq!(set.current(), Some("A"));
    }

    #[test]
    fn test_nothing_known_leaves_empty_selection() {
        let mut set = MainClassSet::default();
        set.apply(info("", &[]));
        assert_eq!(set.current(), None);
        assert!(set.names().is_empty());
    }

    #[test]
    fn test_first_name_without_default() {
        let mut set = MainClassSet::default();
        set.apply(info("", &["X", "Y"]));
        assert_eq!(set.current(), Some("X"));
    }

    #[test]
    fn test_default_inserted_when_not_discovered() {
        let mut set = MainClassSet::default();
        set.apply(info("Configured", &["A"]));
        assert_eq!(set.names(), ["A", "Configured"]);
        assert_eq!(set.current(), Some("Configured"));
        assert_eq!(set.default_name(), Some("Configured"));
    }

    #[test]
    fn test_select() {
        let mut set = MainClassSet::default();
        set.apply(info("", &["A", "B"]));
        assert!(set.select("B"));
        assert_eq!(set.current(), Some("B"));
        assert!(!set.select("Nope"));
        assert_eq!(set.current(), Some("B"));
        assert!(set.select(""));
        assert_eq!(set.current(), None);
    }

    #[tokio::test]
    async fn test_resolve_discovery_and_default() {
        let client = FakeClient::new();
        client.script(
            wire::TASK_DISCOVER_MAIN_CLASSES,
            generic(json!({ "names": ["a.Main", "b.Main"] })),
        );
        client.script(wire::TASK_DEFAULT_MAIN_CLASS, generic(json!({ "name": "b.Main" })));

        let info = resolve(client.clone()).await.unwrap();
        assert_eq!(info.names, vec!["a.Main", "b.Main"]);
        assert_eq!(info.default.as_deref(), Some("b.Main"));

        let tasks: Vec<String> = client.runs().into_iter().map(|r| r.task).collect();
        assert_eq!(
            tasks,
            vec![wire::TASK_DISCOVER_MAIN_CLASSES, wire::TASK_DEFAULT_MAIN_CLASS]
        );
    }

    #[tokio::test]
    async fn test_resolve_default_failure_is_no_default() {
        let client = FakeClient::new();
        client.script(
            wire::TASK_DISCOVER_MAIN_CLASSES,
            generic(json!({ "names": ["a.Main"] })),
        );
        client.script(
            wire::TASK_DEFAULT_MAIN_CLASS,
            Err(TaskFailure::new(500, "no such setting")),
        );

        let info = resolve(client).await.unwrap();
        assert_eq!(info.names, vec!["a.Main"]);
        assert_eq!(info.default, None);
    }

    #[tokio::test]
    async fn test_resolve_unset_default() {
        let client = FakeClient::new();
        client.script(wire::TASK_DISCOVER_MAIN_CLASSES, generic(json!({ "names": [] })));
        client.script(wire::TASK_DEFAULT_MAIN_CLASS, generic(json!({})));

        let info = resolve(client).await.unwrap();
        assert_eq!(info, MainClassInfo::default());
    }

    #[tokio::test]
    async fn test_resolve_discovery_failure_aborts() {
        let client = FakeClient::new();
        client.script(
            wire::TASK_DISCOVER_MAIN_CLASSES,
            Err(TaskFailure::new(503, "busy")),
        );

        let err = resolve(client.clone()).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(client.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unexpected_envelope_is_empty() {
        let client = FakeClient::new();
        client.script(
            wire::TASK_DISCOVER_MAIN_CLASSES,
            Ok(TaskResponse {
                kind: "ErrorResponse".to_string(),
                params: Default::default(),
            }),
        );
        client.script(wire::TASK_DEFAULT_MAIN_CLASS, generic(json!({ "name": "" })));

        let info = resolve(client).await.unwrap();
        assert!(info.names.is_empty());
        assert_eq!(info.default, None);
    }
}
