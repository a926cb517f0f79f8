use super::console::ConsoleCapture;
use super::page::PageDriver;
use super::trace::{Trace, TraceEvent};
use super::watchdog::RunToken;
use crate::config::actions::{Action, ActionEntry, ActionList, ScreenshotAction};
use crate::config::{OutputConfig, Settings};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Key under which `eval` stores its value.
pub const EVAL_KEY: &str = "eval";
/// Key recording that a screenshot was requested while capture is disabled.
pub const SCREENSHOT_SKIPPED_KEY: &str = "screenshot_skipped";
/// Key under which an enabled screenshot stores the file it wrote.
pub const SCREENSHOT_KEY: &str = "screenshot";

const DEFAULT_SCREENSHOT_PATH: &str = "screenshot.png";

/// Values produced by a run, keyed by extraction name or one of the fixed
/// keys above.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Results(BTreeMap<String, Value>);

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// How a single list element ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Succeeded,
    /// The page rejected the action; the run carried on.
    Failed(String),
    /// Not attempted: invalid element or a disabled capability.
    Skipped(String),
    /// Not attempted because the run was aborted first.
    Aborted,
}

impl ActionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) | Self::Skipped(reason) => {
                write!(f, "{}: {}", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// Position in the action list.
    pub index: usize,
    pub description: String,
    pub status: ActionStatus,
    pub elapsed: Duration,
}

/// What the executor has produced so far. Lives outside the executing future
/// so a forced stop keeps everything recorded up to that point.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub outcomes: Vec<ActionOutcome>,
    pub results: Results,
}

impl Execution {
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.label() == label)
            .count()
    }
}

/// Capability switches for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorPolicy {
    /// When false, `screenshot` records a skip marker instead of capturing.
    pub screenshots_enabled: bool,
    pub screenshot_timeout: Duration,
    /// Drain page console output into the trace after each action.
    pub capture_console: bool,
    /// Where relative screenshot paths land.
    pub output: OutputConfig,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            screenshots_enabled: false,
            screenshot_timeout: Duration::from_millis(15_000),
            capture_console: true,
            output: OutputConfig::default(),
        }
    }
}

impl ExecutorPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            screenshots_enabled: settings.run.screenshots_enabled,
            screenshot_timeout: settings.run.screenshot_timeout(),
            capture_console: true,
            output: settings.output.clone(),
        }
    }
}

/// Runs an action list against one page, in order, one action at a time.
pub struct Executor<'a, P: ?Sized> {
    page: &'a P,
    policy: ExecutorPolicy,
    token: RunToken,
    trace: Trace,
}

impl<'a, P: PageDriver + ?Sized> Executor<'a, P> {
    pub fn new(page: &'a P, policy: ExecutorPolicy, token: RunToken, trace: Trace) -> Self {
        Self {
            page,
            policy,
            token,
            trace,
        }
    }

    /// Execute `list`, recording into `out`.
    ///
    /// Never fails: page errors are recorded per action, and an abort request
    /// stops the loop before the next action starts.
    pub async fn execute(&self, list: &ActionList, out: &mut Execution) {
        let total = list.len();
        let mut capture = self.attach_capture().await;

        for (index, entry) in list.entries().iter().enumerate() {
            if self.token.is_abort_requested() {
                self.abort_remaining(list, index, out);
                break;
            }

            let started = Instant::now();
            let (description, status) = match entry {
                ActionEntry::Anomaly(anomaly) => {
                    warn!("Skipping invalid action {}", anomaly);
                    self.trace.push(TraceEvent::Anomaly {
                        index,
                        reason: anomaly.reason.clone(),
                    });
                    let description = match &anomaly.kind {
                        Some(kind) => format!("invalid '{}'", kind),
                        None => "invalid element".to_string(),
                    };
                    (description, ActionStatus::Skipped(anomaly.reason.clone()))
                }
                ActionEntry::Action(action) => {
                    let description = action.describe();
                    info!("[{}/{}] {}", index + 1, total, description);
                    let status = match self.dispatch(action, &mut out.results).await {
                        Ok(status) => status,
                        Err(e) => {
                            warn!("Action #{} failed: {}: {}", index + 1, description, e);
                            ActionStatus::Failed(e.to_string())
                        }
                    };
                    (description, status)
                }
            };

            if let Some(ref mut capture) = capture {
                if let Err(e) = capture.collect(self.page, &self.trace).await {
                    debug!("console collection failed: {}", e);
                }
            }

            self.trace.push(TraceEvent::Action {
                index,
                description: description.clone(),
                status: status.to_string(),
            });
            out.outcomes.push(ActionOutcome {
                index,
                description,
                status,
                elapsed: started.elapsed(),
            });
        }

        if let Some(capture) = capture {
            if let Err(e) = capture.detach(self.page, &self.trace).await {
                debug!("console detach failed: {}", e);
            }
        }
    }

    async fn attach_capture(&self) -> Option<ConsoleCapture> {
        if !self.policy.capture_console {
            return None;
        }
        match ConsoleCapture::attach(self.page).await {
            Ok(capture) => Some(capture),
            Err(e) => {
                debug!("console capture unavailable: {}", e);
                None
            }
        }
    }

    fn abort_remaining(&self, list: &ActionList, from: usize, out: &mut Execution) {
        let remaining = list.len() - from;
        warn!("Abort requested, skipping {} remaining action(s)", remaining);
        self.trace.push(TraceEvent::Abort {
            reason: format!("skipped {} remaining action(s) from #{}", remaining, from + 1),
        });
        for (index, entry) in list.entries().iter().enumerate().skip(from) {
            let description = match entry {
                ActionEntry::Action(a) => a.describe(),
                ActionEntry::Anomaly(a) => a.to_string(),
            };
            out.outcomes.push(ActionOutcome {
                index,
                description,
                status: ActionStatus::Aborted,
                elapsed: Duration::ZERO,
            });
        }
    }

    async fn dispatch(&self, action: &Action, results: &mut Results) -> Result<ActionStatus> {
        match action {
            Action::Goto(a) => {
                self.page.goto(&a.url).await?;
            }
            Action::WaitForSelector(a) => {
                self.page.wait_for_selector(&a.selector, a.timeout_ms).await?;
            }
            Action::Click(a) => {
                self.page.click(&a.selector).await?;
            }
            Action::Fill(a) => {
                self.page.fill(&a.selector, &a.value).await?;
            }
            Action::Eval(a) => {
                let value = self.page.eval(&a.script).await?;
                debug!("eval -> {}", value);
                results.insert(EVAL_KEY, value);
            }
            Action::Screenshot(a) => return self.screenshot(a, results).await,
            Action::Extract(a) => {
                let texts = self.page.text_contents(&a.selector).await?;
                debug!("extract '{}': {} match(es)", a.selector, texts.len());
                results.insert(
                    a.key(),
                    Value::Array(texts.into_iter().map(Value::String).collect()),
                );
            }
            Action::Done(_) => {
                info!("Model marked the list as done");
            }
        }
        Ok(ActionStatus::Succeeded)
    }

    async fn screenshot(&self, a: &ScreenshotAction, results: &mut Results) -> Result<ActionStatus> {
        if !self.policy.screenshots_enabled {
            debug!("screenshots disabled, recording skip marker");
            results.insert(SCREENSHOT_SKIPPED_KEY, Value::Bool(true));
            return Ok(ActionStatus::Skipped("screenshots disabled".into()));
        }

        let path = self
            .policy
            .output
            .resolve(a.path.as_deref().unwrap_or(DEFAULT_SCREENSHOT_PATH));
        let capture = self.page.screenshot(a.selector.as_deref());
        let data = tokio::time::timeout(self.policy.screenshot_timeout, capture)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "screenshot exceeded {}ms",
                    self.policy.screenshot_timeout.as_millis()
                ))
            })??;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        info!("Saved screenshot to {}", path.display());
        results.insert(SCREENSHOT_KEY, Value::String(path.display().to_string()));
        Ok(ActionStatus::Succeeded)
    }
}
