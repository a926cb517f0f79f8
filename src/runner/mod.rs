mod console;
mod executor;
#[cfg(test)]
mod fake;
mod page;
mod trace;
mod watchdog;

pub use console::ConsoleCapture;
pub use executor::{
    ActionOutcome, ActionStatus, Execution, Executor, ExecutorPolicy, Results, EVAL_KEY,
    SCREENSHOT_KEY, SCREENSHOT_SKIPPED_KEY,
};
pub use page::{BrowserSession, PageDriver};
pub use trace::{Diagnostics, Trace, TraceEvent};
pub use watchdog::{RunToken, Watchdog};

use crate::config::{ActionList, Settings};
use crate::interpret::{Interpretation, Interpreter, Prompt, Transport};
use crate::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Key under which the summary pass stores its text.
pub const SUMMARY_KEY: &str = "summary";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every action was attempted.
    Completed,
    /// The watchdog fired and the run stopped between actions.
    Aborted,
    /// The run was still busy after the grace period and was dropped.
    ForceTerminated,
}

/// A validated action list and the interpretation it came from.
#[derive(Debug, Clone)]
pub struct Plan {
    pub actions: ActionList,
    pub interpretation: Interpretation,
}

/// Result of one run.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    /// The action list, when planning finished.
    pub actions: ActionList,
    pub outcomes: Vec<ActionOutcome>,
    pub results: Results,
    pub trace: Vec<TraceEvent>,
    pub summary: Option<String>,
    /// Follow-up requests the interpretation needed.
    pub retries: usize,
    pub duration: Duration,
}

impl RunReport {
    pub fn count(&self, status_label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.label() == status_label)
            .count()
    }
}

/// Turns instructions into an action list and runs it under a watchdog.
pub struct Pilot<T> {
    interpreter: Interpreter<T>,
    settings: Settings,
    budget: Duration,
    grace: Duration,
}

impl<T: Transport> Pilot<T> {
    pub fn new(transport: T, settings: Settings) -> Self {
        let interpreter = Interpreter::new(transport).with_max_retries(settings.model.max_retries);
        Self {
            interpreter,
            budget: settings.run.budget(),
            grace: settings.run.grace(),
            settings,
        }
    }

    /// Override the run budget and grace period from the settings.
    pub fn with_timeouts(mut self, budget: Duration, grace: Duration) -> Self {
        self.budget = budget;
        self.grace = grace;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ask the model for an action list without executing it.
    pub async fn plan<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        start_url: &str,
        instructions: &str,
    ) -> Result<Plan> {
        self.plan_with(page, start_url, instructions, &Trace::new())
            .await
    }

    /// Plan and execute under the watchdog.
    ///
    /// `Err` means nothing was executed: the transport failed or the model's
    /// text was not an action list. Diagnostics are written either way.
    pub async fn run<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        start_url: &str,
        instructions: &str,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let trace = Trace::new();
        let token = RunToken::new();
        let diagnostics_path = self.settings.output.diagnostics_path();

        info!("Starting run (budget: {:?}, grace: {:?})", self.budget, self.grace);
        let watchdog = Watchdog::start(
            self.budget,
            self.grace,
            token.clone(),
            trace.clone(),
            diagnostics_path.clone(),
        );

        let mut planned = None;
        let mut execution = Execution::default();
        let work = self.drive(
            page,
            start_url,
            instructions,
            &trace,
            &token,
            &mut planned,
            &mut execution,
        );

        let finished = tokio::select! {
            res = work => Some(res),
            _ = token.force_terminated() => None,
        };
        // joins any diagnostics write the watchdog has in flight
        watchdog.cancel().await;

        let status = match finished {
            Some(Err(e)) => {
                self.persist_diagnostics(&trace, &diagnostics_path).await;
                return Err(e);
            }
            Some(Ok(())) if token.is_abort_requested() => RunStatus::Aborted,
            Some(Ok(())) => RunStatus::Completed,
            None => {
                trace.push(TraceEvent::Abort {
                    reason: "forced termination after grace period".into(),
                });
                RunStatus::ForceTerminated
            }
        };

        trace.push(TraceEvent::Results {
            results: execution.results.to_json(),
        });
        self.persist_diagnostics(&trace, &diagnostics_path).await;

        let (actions, retries) = match planned {
            Some(plan) => (plan.actions, plan.interpretation.retries),
            None => (ActionList::default(), 0),
        };
        let summary = execution
            .results
            .get(SUMMARY_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        let report = RunReport {
            status,
            actions,
            outcomes: execution.outcomes,
            results: execution.results,
            trace: trace.events(),
            summary,
            retries,
            duration: started.elapsed(),
        };
        info!(
            "Run {:?} in {}ms ({} succeeded, {} failed)",
            report.status,
            report.duration.as_millis(),
            report.count("succeeded"),
            report.count("failed")
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        start_url: &str,
        instructions: &str,
        trace: &Trace,
        token: &RunToken,
        planned: &mut Option<Plan>,
        out: &mut Execution,
    ) -> Result<()> {
        let plan = planned.insert(self.plan_with(page, start_url, instructions, trace).await?);

        let executor = Executor::new(
            page,
            ExecutorPolicy::from_settings(&self.settings),
            token.clone(),
            trace.clone(),
        );
        executor.execute(&plan.actions, out).await;

        if self.settings.run.summarize && !token.is_abort_requested() && !out.results.is_empty() {
            match self.summarize(instructions, &out.results).await {
                Ok(summary) => {
                    out.results.insert(SUMMARY_KEY, Value::String(summary));
                }
                Err(e) => warn!("Summary pass failed: {}", e),
            }
        }
        Ok(())
    }

    async fn plan_with<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        start_url: &str,
        instructions: &str,
        trace: &Trace,
    ) -> Result<Plan> {
        info!("Navigating to: {}", start_url);
        if let Err(e) = page.goto(start_url).await {
            warn!("Failed to open start URL {}: {}", start_url, e);
        }

        let prompt = self.action_prompt(page, start_url, instructions).await;
        let interpretation = self.interpreter.interpret(&prompt).await?;
        trace.set_last_raw_model_text(interpretation.raw());
        self.persist_raw(&interpretation).await;

        let actions = ActionList::parse(&interpretation.text)?;
        info!(
            "Model planned {} action(s) ({} invalid)",
            actions.len(),
            actions.anomalies().count()
        );
        Ok(Plan {
            actions,
            interpretation,
        })
    }

    async fn action_prompt<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        start_url: &str,
        instructions: &str,
    ) -> Prompt {
        let current_url = page.url().await.unwrap_or_else(|e| {
            debug!("url unavailable: {}", e);
            start_url.to_string()
        });
        let title = page.title().await.unwrap_or_default();

        let limit = self.settings.run.page_context_chars;
        let page_text = if limit == 0 {
            String::new()
        } else {
            match page.text().await {
                Ok(text) => text.chars().take(limit).collect(),
                Err(e) => {
                    debug!("page text unavailable: {}", e);
                    String::new()
                }
            }
        };

        Prompt::for_actions(start_url, &current_url, &title, &page_text, instructions)
    }

    async fn summarize(&self, instructions: &str, results: &Results) -> Result<String> {
        info!("Summarizing {} result(s)", results.len());
        let prompt = Prompt::for_summary(instructions, &results.to_string());
        let interpretation = self.interpreter.interpret(&prompt).await?;
        let summary = interpretation.prose().trim().to_string();
        if summary.is_empty() {
            return Err(Error::Transport("model returned an empty summary".into()));
        }

        let path = self.settings.output.summary_path();
        write_file(&path, summary.as_bytes()).await?;
        debug!("Wrote summary to {}", path.display());
        Ok(summary)
    }

    async fn persist_raw(&self, interpretation: &Interpretation) {
        let path = self.settings.output.raw_path();
        let dump = match interpretation.responses.as_slice() {
            [only] => only.clone(),
            all => all
                .iter()
                .enumerate()
                .map(|(i, r)| format!("--- response {} ---\n{}", i + 1, r))
                .collect::<Vec<_>>()
                .join("\n\n"),
        };
        if let Err(e) = write_file(&path, dump.as_bytes()).await {
            warn!("Failed to write raw model text to {}: {}", path.display(), e);
        }
    }

    async fn persist_diagnostics(&self, trace: &Trace, path: &Path) {
        if let Err(e) = trace.write_diagnostics(path).await {
            warn!("Failed to write diagnostics to {}: {}", path.display(), e);
        }
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}
