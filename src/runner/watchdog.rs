use super::trace::{Trace, TraceEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Two-stage stop signal for one run.
///
/// `abort` is cooperative: the executor checks it between actions. `terminate`
/// is forced: the run future is dropped wherever it is suspended. Neither
/// resets once set.
#[derive(Debug, Clone, Default)]
pub struct RunToken {
    abort: CancellationToken,
    terminate: CancellationToken,
}

impl RunToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.abort.cancel();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Force termination. Implies abort.
    pub fn force_terminate(&self) {
        self.abort.cancel();
        self.terminate.cancel();
    }

    pub fn is_force_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once termination is forced.
    pub async fn force_terminated(&self) {
        self.terminate.cancelled().await
    }
}

/// Run-budget timer.
///
/// After `budget` it requests abort, marks the trace and writes diagnostics;
/// after a further `grace` it forces termination. Cancelling (or dropping)
/// the watchdog before either stage stops it.
///
/// The task is spawned on the caller's runtime. The binary runs a
/// current-thread runtime, so the watchdog shares the run's event loop.
pub struct Watchdog {
    stop: CancellationToken,
    token: RunToken,
    task: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the countdown. Must be called inside a tokio runtime.
    pub fn start(
        budget: Duration,
        grace: Duration,
        token: RunToken,
        trace: Trace,
        diagnostics_path: PathBuf,
    ) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => return,
                _ = tokio::time::sleep(budget) => {}
            }

            warn!("Run exceeded its {:?} budget, aborting", budget);
            task_token.request_abort();
            trace.push(TraceEvent::Abort {
                reason: format!("run exceeded its {}ms budget", budget.as_millis()),
            });
            if let Err(e) = trace.write_diagnostics(&diagnostics_path).await {
                error!(
                    "Failed to write diagnostics to {}: {}",
                    diagnostics_path.display(),
                    e
                );
            }

            tokio::select! {
                _ = stopped.cancelled() => {
                    debug!("Run stopped within the grace period");
                    return;
                }
                _ = tokio::time::sleep(grace) => {}
            }

            error!("Run still busy {:?} after abort, forcing termination", grace);
            task_token.force_terminate();
        });

        Self {
            stop,
            token,
            task: Some(task),
        }
    }

    /// True once the budget expired.
    pub fn fired(&self) -> bool {
        self.token.is_abort_requested()
    }

    /// Stop the countdown and wait for the task to exit.
    ///
    /// A diagnostics write already in flight completes before this returns,
    /// so the caller's own write always lands last. Has no effect on a token
    /// that was already set.
    pub async fn cancel(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Watchdog task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
