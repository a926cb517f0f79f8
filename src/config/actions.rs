use crate::interpret::{balanced_fragment, sanitize_literals};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An action to execute in the browser, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "goto")]
    Goto(GotoAction),
    #[serde(rename = "waitForSelector")]
    WaitForSelector(WaitForSelectorAction),
    #[serde(rename = "click")]
    Click(ClickAction),
    #[serde(rename = "fill")]
    Fill(FillAction),
    #[serde(rename = "eval")]
    Eval(EvalAction),
    #[serde(rename = "screenshot")]
    Screenshot(ScreenshotAction),
    #[serde(rename = "extract")]
    Extract(ExtractAction),
    #[serde(rename = "done")]
    Done(DoneAction),
}

impl Action {
    /// Wire name of the action type, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Goto(_) => "goto",
            Self::WaitForSelector(_) => "waitForSelector",
            Self::Click(_) => "click",
            Self::Fill(_) => "fill",
            Self::Eval(_) => "eval",
            Self::Screenshot(_) => "screenshot",
            Self::Extract(_) => "extract",
            Self::Done(_) => "done",
        }
    }

    /// One-line human description including the action's main argument.
    pub fn describe(&self) -> String {
        match self {
            Self::Goto(a) => format!("goto {}", a.url),
            Self::WaitForSelector(a) => {
                format!("waitForSelector '{}' ({}ms)", a.selector, a.timeout_ms)
            }
            Self::Click(a) => format!("click '{}'", a.selector),
            Self::Fill(a) => format!("fill '{}' = '{}'", a.selector, a.value),
            Self::Eval(a) => format!("eval {}", truncate(&a.script, 60)),
            Self::Screenshot(a) => match (&a.path, &a.selector) {
                (_, Some(sel)) => format!("screenshot of '{}'", sel),
                (Some(path), None) => format!("screenshot -> {}", path),
                (None, None) => "screenshot".to_string(),
            },
            Self::Extract(a) => format!("extract '{}' as '{}'", a.selector, a.key()),
            Self::Done(_) => "done".to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Every `type` tag the schema recognises.
pub(crate) const ACTION_NAMES: &[&str] = &[
    "goto",
    "waitForSelector",
    "click",
    "fill",
    "eval",
    "screenshot",
    "extract",
    "done",
];

// --- Action payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GotoAction {
    pub url: String,
}

pub(crate) fn default_wait_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitForSelectorAction {
    pub selector: String,
    #[serde(rename = "timeout", default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickAction {
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillAction {
    pub selector: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalAction {
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenshotAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractAction {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ExtractAction {
    /// Results key: the explicit name, else the selector itself.
    pub fn key(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.selector)
    }
}

/// Terminal marker. Any fields the model adds are tolerated and ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DoneAction {}

/// A list element that is not a valid action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// Position in the list.
    pub index: usize,
    /// The `type` tag, if the element had one.
    pub kind: Option<String>,
    /// Why the element was rejected.
    pub reason: String,
    /// The element as the model produced it.
    pub raw: Value,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "#{} '{}': {}", self.index, kind, self.reason),
            None => write!(f, "#{}: {}", self.index, self.reason),
        }
    }
}

/// One element of the action list, in model order.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEntry {
    Action(Action),
    Anomaly(Anomaly),
}

/// Ordered action list. Insertion order is execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionList {
    entries: Vec<ActionEntry>,
}

impl ActionList {
    /// Parse model text into an action list.
    ///
    /// The text is sanitized first. If it still is not valid JSON, the first
    /// balanced fragment of the unsanitized text is located and only that
    /// fragment is sanitized, so apostrophes in surrounding prose never open
    /// a literal. Anything other than a JSON array is
    /// [`Error::ActionListMalformed`].
    pub fn parse(text: &str) -> Result<Self> {
        let sanitized = sanitize_literals(text);

        let value: Value = match serde_json::from_str(sanitized.trim()) {
            Ok(v) => v,
            Err(first) => {
                let fragment = balanced_fragment(text).ok_or_else(|| {
                    Error::ActionListMalformed {
                        reason: format!("invalid JSON: {}", first),
                        raw: text.to_string(),
                    }
                })?;
                serde_json::from_str(&sanitize_literals(fragment)).map_err(|e| {
                    Error::ActionListMalformed {
                        reason: format!("invalid JSON: {}", e),
                        raw: text.to_string(),
                    }
                })?
            }
        };

        match value {
            Value::Array(items) => Ok(Self::from_values(items)),
            other => Err(Error::ActionListMalformed {
                reason: format!("expected a JSON array, got {}", json_kind(&other)),
                raw: text.to_string(),
            }),
        }
    }

    /// Classify already-parsed elements.
    pub fn from_values(items: Vec<Value>) -> Self {
        let entries = items
            .into_iter()
            .enumerate()
            .map(|(index, raw)| classify(index, raw))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ActionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Valid actions only, in order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.entries.iter().filter_map(|e| match e {
            ActionEntry::Action(a) => Some(a),
            ActionEntry::Anomaly(_) => None,
        })
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.entries.iter().filter_map(|e| match e {
            ActionEntry::Anomaly(a) => Some(a),
            ActionEntry::Action(_) => None,
        })
    }
}

impl From<Vec<Action>> for ActionList {
    fn from(actions: Vec<Action>) -> Self {
        Self {
            entries: actions.into_iter().map(ActionEntry::Action).collect(),
        }
    }
}

fn classify(index: usize, raw: Value) -> ActionEntry {
    let kind = raw.get("type").and_then(Value::as_str).map(str::to_string);

    let reason = match kind.as_deref() {
        None if !raw.is_object() => format!("expected an object, got {}", json_kind(&raw)),
        None => "missing 'type' tag".to_string(),
        Some(k) if !ACTION_NAMES.contains(&k) => "unrecognized action type".to_string(),
        Some(_) => match serde_json::from_value::<Action>(raw.clone()) {
            Ok(action) => return ActionEntry::Action(action),
            Err(e) => e.to_string(),
        },
    };

    ActionEntry::Anomaly(Anomaly {
        index,
        kind,
        reason,
        raw,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
