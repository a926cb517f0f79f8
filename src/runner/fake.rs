//! In-memory page for executor and pilot unit tests.

use super::page::PageDriver;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    url: String,
    /// Page-side console buffer; `None` until the hook is installed.
    capture: Option<Vec<Value>>,
}

#[derive(Default)]
pub(crate) struct FakePage {
    state: RefCell<State>,
    elements: HashMap<String, Vec<String>>,
    evals: HashMap<String, Value>,
    wait_delay: Duration,
    screenshot_delay: Duration,
    console_on: Vec<(String, String)>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                url: "about:blank".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_elements(mut self, selector: &str, texts: &[&str]) -> Self {
        self.elements.insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_eval(mut self, script: &str, value: Value) -> Self {
        self.evals.insert(script.to_string(), value);
        self
    }

    pub fn with_wait_delay(mut self, delay: Duration) -> Self {
        self.wait_delay = delay;
        self
    }

    pub fn with_screenshot_delay(mut self, delay: Duration) -> Self {
        self.screenshot_delay = delay;
        self
    }

    /// Log `text` to the page console whenever operation `op` runs.
    pub fn with_console_on(mut self, op: &str, text: &str) -> Self {
        self.console_on.push((op.to_string(), text.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    fn record(&self, op: &str, arg: &str) {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("{} {}", op, arg));
        if let Some(buffer) = state.capture.as_mut() {
            for (on, text) in &self.console_on {
                if on == op {
                    buffer.push(json!({"kind": "console", "level": "log", "text": text}));
                }
            }
        }
    }

    fn require(&self, selector: &str) -> Result<()> {
        if self.elements.contains_key(selector) {
            Ok(())
        } else {
            Err(Error::ActionFailed(format!("no element matches '{}'", selector)))
        }
    }
}

#[async_trait(?Send)]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.record("goto", url);
        let mut state = self.state.borrow_mut();
        state.url = url.to_string();
        state.capture = None;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.record("wait", selector);
        tokio::time::sleep(self.wait_delay).await;
        self.require(selector).map_err(|_| {
            Error::ActionFailed(format!("'{}' not found within {}ms", selector, timeout_ms))
        })
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.record("click", selector);
        self.require(selector)
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.record("fill", &format!("{}={}", selector, value));
        self.require(selector)
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        if script.contains("__pilotCapture") {
            let mut state = self.state.borrow_mut();
            return Ok(match state.capture.as_mut() {
                Some(buffer) => Value::Array(std::mem::take(buffer)),
                None => Value::Null,
            });
        }
        self.record("eval", script);
        Ok(self.evals.get(script).cloned().unwrap_or(Value::Null))
    }

    async fn execute(&self, script: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if script.contains("delete window.__pilotCapture") {
            state.capture = None;
        } else if script.contains("window.__pilotCapture =") {
            state.capture.get_or_insert_with(Vec::new);
        } else {
            state.calls.push(format!("execute {}", script));
        }
        Ok(())
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>> {
        self.record("screenshot", selector.unwrap_or(""));
        tokio::time::sleep(self.screenshot_delay).await;
        Ok(b"\x89PNG".to_vec())
    }

    async fn text_contents(&self, selector: &str) -> Result<Vec<String>> {
        self.record("text_contents", selector);
        Ok(self.elements.get(selector).cloned().unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok("Fake Page".into())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state.borrow().url.clone())
    }

    async fn text(&self) -> Result<String> {
        let mut all: Vec<&str> = self
            .elements
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        Ok(all.join(" "))
    }
}
