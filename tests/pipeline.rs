//! End-to-end runs against a scripted model and an in-memory page.
//!
//! No browser or network needed.

use async_trait::async_trait;
use eoka_pilot::{
    ActionStatus, Diagnostics, Error, OutputConfig, PageDriver, Pilot, RunStatus, Settings,
    TraceEvent, Transport,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays responses in order and records the prompts it receives.
#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            prompts: Mutex::default(),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedModel {
    async fn complete(&self, prompt: &str) -> eoka_pilot::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| Error::Transport("script exhausted".into()))
    }
}

/// Static page: selectors map to element texts, some waits are slow.
#[derive(Default)]
struct StaticPage {
    elements: HashMap<String, Vec<String>>,
    slow_waits: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl StaticPage {
    fn new() -> Self {
        Self::default()
    }

    fn with(mut self, selector: &str, texts: &[&str]) -> Self {
        self.elements.insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    fn slow(mut self, selector: &str, delay: Duration) -> Self {
        self.slow_waits.insert(selector.to_string(), delay);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, selector: &str) -> eoka_pilot::Result<&Vec<String>> {
        self.elements
            .get(selector)
            .ok_or_else(|| Error::ActionFailed(format!("no element matches '{}'", selector)))
    }
}

#[async_trait(?Send)]
impl PageDriver for StaticPage {
    async fn goto(&self, url: &str) -> eoka_pilot::Result<()> {
        self.record(format!("goto {}", url));
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout_ms: u64) -> eoka_pilot::Result<()> {
        self.record(format!("wait {}", selector));
        if let Some(delay) = self.slow_waits.get(selector) {
            tokio::time::sleep(*delay).await;
        }
        self.find(selector).map(|_| ())
    }

    async fn click(&self, selector: &str) -> eoka_pilot::Result<()> {
        self.record(format!("click {}", selector));
        self.find(selector).map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> eoka_pilot::Result<()> {
        self.record(format!("fill {} {}", selector, value));
        self.find(selector).map(|_| ())
    }

    async fn eval(&self, _script: &str) -> eoka_pilot::Result<Value> {
        Ok(Value::Null)
    }

    async fn execute(&self, _script: &str) -> eoka_pilot::Result<()> {
        Ok(())
    }

    async fn screenshot(&self, _selector: Option<&str>) -> eoka_pilot::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn text_contents(&self, selector: &str) -> eoka_pilot::Result<Vec<String>> {
        self.record(format!("extract {}", selector));
        Ok(self.elements.get(selector).cloned().unwrap_or_default())
    }

    async fn title(&self) -> eoka_pilot::Result<String> {
        Ok("Static".into())
    }

    async fn url(&self) -> eoka_pilot::Result<String> {
        Ok("https://static.test/".into())
    }

    async fn text(&self) -> eoka_pilot::Result<String> {
        Ok("Hello World".into())
    }
}

fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.run.summarize = false;
    settings.output = OutputConfig {
        dir: dir.to_path_buf(),
        ..Default::default()
    };
    settings
}

fn read_diagnostics(dir: &Path) -> Diagnostics {
    let bytes = std::fs::read(dir.join("diagnostics.json")).expect("diagnostics written");
    serde_json::from_slice(&bytes).expect("diagnostics parse")
}

#[tokio::test]
async fn test_fenced_done_list_completes_with_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&["```json\n[{\"type\":\"done\"}]\n```"]);
    let page = StaticPage::new();
    let pilot = Pilot::new(model.clone(), settings(dir.path()));

    let report = pilot
        .run(&page, "https://static.test", "nothing to do")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.results.is_empty());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, ActionStatus::Succeeded);
    assert_eq!(report.outcomes[0].description, "done");
    assert_eq!(model.prompts().len(), 1);
    assert!(dir.path().join("model_raw.txt").exists());
    assert!(!read_diagnostics(dir.path()).trace.is_empty());
}

#[tokio::test]
async fn test_incomplete_envelope_retried_twice_then_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r#"{"response":"","done":false}"#,
        r#"{"response":"","done":false}"#,
        r#"{"response":"[{\"type\":\"extract\",\"selector\":\"h1\",\"name\":\"title\"}]","done":true}"#,
    ]);
    let page = StaticPage::new().with("h1", &["Hello", "World"]);
    let pilot = Pilot::new(model.clone(), settings(dir.path()));

    let report = pilot
        .run(&page, "https://static.test", "get all headings")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.retries, 2);
    assert_eq!(report.results.get("title"), Some(&json!(["Hello", "World"])));

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("Return ONLY the JSON array"));
    assert!(prompts[2].contains("Return ONLY the JSON array"));
}

#[tokio::test]
async fn test_unknown_action_type_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r#"[{"type":"scroll"},{"type":"extract","selector":"h1","name":"title"}]"#,
    ]);
    let page = StaticPage::new().with("h1", &["Hello"]);
    let pilot = Pilot::new(model, settings(dir.path()));

    let report = pilot
        .run(&page, "https://static.test", "scroll then read")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(matches!(report.outcomes[0].status, ActionStatus::Skipped(_)));
    assert_eq!(report.outcomes[1].status, ActionStatus::Succeeded);
    assert_eq!(report.results.get("title"), Some(&json!(["Hello"])));
    assert!(report
        .trace
        .iter()
        .any(|e| matches!(e, TraceEvent::Anomaly { index: 0, .. })));
}

#[tokio::test]
async fn test_failing_selector_does_not_stop_later_actions() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r##"[{"type":"click","selector":"#gone"},{"type":"fill","selector":"#q","value":"rust"},{"type":"done"}]"##,
    ]);
    let page = StaticPage::new().with("#q", &[""]);
    let pilot = Pilot::new(model, settings(dir.path()));

    let report = pilot.run(&page, "https://static.test", "search").await.unwrap();

    assert_eq!(report.count("failed"), 1);
    assert_eq!(report.count("succeeded"), 2);
    assert!(page.calls().contains(&"fill #q rust".to_string()));
}

#[tokio::test]
async fn test_budget_exceeded_aborts_remaining_actions() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r##"[
            {"type":"extract","selector":"h1","name":"title"},
            {"type":"waitForSelector","selector":"#late"},
            {"type":"extract","selector":"p"},
            {"type":"done"}
        ]"##,
    ]);
    let page = StaticPage::new()
        .with("h1", &["Hello"])
        .with("#late", &[""])
        .with("p", &["body"])
        .slow("#late", Duration::from_millis(600));
    let pilot = Pilot::new(model, settings(dir.path()))
        .with_timeouts(Duration::from_millis(100), Duration::from_secs(10));

    let diagnostics_path = dir.path().join("diagnostics.json");
    let check = async {
        // budget has expired, the slow wait is still in flight
        tokio::time::sleep(Duration::from_millis(350)).await;
        diagnostics_path.exists()
    };
    let (report, written_during_grace) =
        tokio::join!(pilot.run(&page, "https://static.test", "read everything"), check);
    let report = report.unwrap();

    assert!(written_during_grace);
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.outcomes[0].status, ActionStatus::Succeeded);
    assert_eq!(report.outcomes[1].status, ActionStatus::Succeeded);
    assert_eq!(report.outcomes[2].status, ActionStatus::Aborted);
    assert_eq!(report.outcomes[3].status, ActionStatus::Aborted);
    assert!(!page.calls().contains(&"extract p".to_string()));
    assert_eq!(report.results.get("title"), Some(&json!(["Hello"])));

    let diagnostics = read_diagnostics(dir.path());
    assert!(diagnostics
        .trace
        .iter()
        .any(|e| matches!(e, TraceEvent::Abort { .. })));
    assert!(diagnostics.last_raw_model_text.is_some());
}

#[tokio::test]
async fn test_hung_action_is_force_terminated() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r##"[{"type":"extract","selector":"h1","name":"title"},{"type":"waitForSelector","selector":"#never"}]"##,
    ]);
    let page = StaticPage::new()
        .with("h1", &["Hello"])
        .slow("#never", Duration::from_secs(30));
    let pilot = Pilot::new(model, settings(dir.path()))
        .with_timeouts(Duration::from_millis(50), Duration::from_millis(100));

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        pilot.run(&page, "https://static.test", "wait forever"),
    )
    .await
    .expect("forced termination did not interrupt the hung action")
    .unwrap();

    assert_eq!(report.status, RunStatus::ForceTerminated);
    assert_eq!(report.results.get("title"), Some(&json!(["Hello"])));
    assert_eq!(report.outcomes.len(), 1);
    assert!(read_diagnostics(dir.path()).trace.iter().any(|e| matches!(
        e,
        TraceEvent::Abort { reason } if reason.contains("forced")
    )));
}

#[tokio::test]
async fn test_non_array_output_is_fatal_before_any_action() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[r#"{"response":"I am not sure what you mean.","done":true}"#]);
    let page = StaticPage::new();
    let pilot = Pilot::new(model, settings(dir.path()));

    let err = pilot
        .run(&page, "https://static.test", "???")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ActionListMalformed { .. }));
    assert_eq!(err.raw_text(), Some("I am not sure what you mean."));
    assert_eq!(page.calls(), vec!["goto https://static.test".to_string()]);
}

#[tokio::test]
async fn test_transport_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[]);
    let page = StaticPage::new();
    let pilot = Pilot::new(model, settings(dir.path()));

    let err = pilot.run(&page, "https://static.test", "go").await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn test_summary_pass_stores_summary() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[
        r#"[{"type":"extract","selector":"h1","name":"title"}]"#,
        r#"{"response":"The page title is Hello.","done":true}"#,
    ]);
    let page = StaticPage::new().with("h1", &["Hello"]);
    let mut settings = settings(dir.path());
    settings.run.summarize = true;
    let pilot = Pilot::new(model.clone(), settings);

    let report = pilot.run(&page, "https://static.test", "what is the title").await.unwrap();

    assert_eq!(report.summary.as_deref(), Some("The page title is Hello."));
    assert_eq!(report.results.get("summary"), Some(&json!("The page title is Hello.")));
    assert!(model.prompts()[1].contains("\"title\""));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("summary.txt")).unwrap(),
        "The page title is Hello."
    );
}

#[tokio::test]
async fn test_plain_text_summary_keeps_bracketed_prose() {
    let dir = tempfile::tempdir().unwrap();
    let prose = r#"Found two headings: ["Alpha", "Beta"]. Both are visible."#;
    let model = ScriptedModel::new(&[
        r#"[{"type":"extract","selector":"h1","name":"headings"}]"#,
        prose,
    ]);
    let page = StaticPage::new().with("h1", &["Alpha", "Beta"]);
    let mut settings = settings(dir.path());
    settings.run.summarize = true;
    let pilot = Pilot::new(model.clone(), settings);

    let report = pilot.run(&page, "https://static.test", "list the headings").await.unwrap();

    assert_eq!(report.summary.as_deref(), Some(prose));
}
