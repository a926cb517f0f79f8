//! # eoka-pilot
//!
//! Instruction-driven browser automation. Ask a text-generation endpoint for a
//! JSON action list, recover it from whatever envelope the provider wraps it in,
//! then execute it against a live page under a watchdog.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_pilot::{BrowserSession, HttpTransport, Pilot, Settings};
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_pilot::Result<()> {
//! let settings = Settings::from_env()?;
//! let transport = HttpTransport::new(&settings.model)?;
//! let session = BrowserSession::launch(&settings.browser).await?;
//! let pilot = Pilot::new(transport, settings);
//! let report = pilot
//!     .run(session.page(), "https://example.com", "extract the main heading")
//!     .await?;
//! println!("{:?}: {}", report.status, report.results);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod interpret;
mod runner;

pub use config::{
    Action, ActionEntry, ActionList, Anomaly, BrowserConfig, ClickAction, DoneAction, EvalAction,
    ExtractAction, FillAction, GotoAction, ModelConfig, OutputConfig, RunConfig,
    ScreenshotAction, Settings, Viewport, WaitForSelectorAction,
};
pub use interpret::{
    balanced_fragment, sanitize_literals, unwrap_envelope, HttpTransport, Interpretation,
    Interpreter, Message, Prompt, Role, Transport, Unwrapped, DEFAULT_MAX_RETRIES,
};
pub use runner::{
    ActionOutcome, ActionStatus, BrowserSession, ConsoleCapture, Diagnostics, Execution,
    Executor, ExecutorPolicy, PageDriver, Pilot, Plan, Results, RunReport, RunStatus, RunToken,
    Trace, TraceEvent, Watchdog, EVAL_KEY, SCREENSHOT_KEY, SCREENSHOT_SKIPPED_KEY, SUMMARY_KEY,
};

/// Result type for eoka-pilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting model output or driving the page.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("transport error: {0}")]
    Transport(String),

    /// The model's final text is not a JSON array of actions. Fatal for the run.
    #[error("malformed action list: {reason}")]
    ActionListMalformed { reason: String, raw: String },

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// The offending model text, for errors that carry one.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::ActionListMalformed { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
