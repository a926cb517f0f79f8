//! Page console and error capture.
//!
//! A small script wraps `console.*` and listens for `error` /
//! `unhandledrejection`, buffering entries in the page. The executor drains
//! the buffer into the [`Trace`] after every action. Navigation discards the
//! page-side state, so a drain that finds no buffer reinstalls the hook.

use super::page::PageDriver;
use super::trace::{Trace, TraceEvent};
use crate::Result;
use serde_json::Value;
use tracing::{debug, warn};

const INSTALL_JS: &str = r#"(() => {
    if (window.__pilotCapture) return false;
    const cap = window.__pilotCapture = { events: [], restore: [] };
    const show = a => {
        if (typeof a === 'string') return a;
        try { return JSON.stringify(a); } catch (e) { return String(a); }
    };
    for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
        const orig = console[level];
        console[level] = function (...args) {
            cap.events.push({ kind: 'console', level, text: args.map(show).join(' ') });
            return orig.apply(this, args);
        };
        cap.restore.push(() => { console[level] = orig; });
    }
    const onError = e => cap.events.push({ kind: 'page_error', message: String(e.message || e) });
    const onRejection = e => cap.events.push({ kind: 'page_error', message: 'unhandled rejection: ' + String(e.reason) });
    window.addEventListener('error', onError);
    window.addEventListener('unhandledrejection', onRejection);
    cap.restore.push(() => {
        window.removeEventListener('error', onError);
        window.removeEventListener('unhandledrejection', onRejection);
    });
    return true;
})()"#;

const DRAIN_JS: &str =
    "window.__pilotCapture ? window.__pilotCapture.events.splice(0) : null";

const REMOVE_JS: &str = r#"(() => {
    const cap = window.__pilotCapture;
    if (cap) { cap.restore.forEach(f => f()); delete window.__pilotCapture; }
})()"#;

/// Handle for an installed capture hook. Dropping it leaves the hook in
/// place; call [`ConsoleCapture::detach`] to remove it.
#[derive(Debug)]
pub struct ConsoleCapture {
    reinstalls: usize,
}

impl ConsoleCapture {
    /// Install the hook on `page`.
    pub async fn attach<P: PageDriver + ?Sized>(page: &P) -> Result<Self> {
        page.execute(INSTALL_JS).await?;
        debug!("console capture attached");
        Ok(Self { reinstalls: 0 })
    }

    /// Move buffered page events into `trace`. Returns how many were moved.
    pub async fn collect<P: PageDriver + ?Sized>(
        &mut self,
        page: &P,
        trace: &Trace,
    ) -> Result<usize> {
        let drained = page.eval(DRAIN_JS).await?;
        let Value::Array(items) = drained else {
            // buffer gone: the page navigated since the last drain
            self.reinstalls += 1;
            debug!("console capture lost, reinstalling");
            page.execute(INSTALL_JS).await?;
            return Ok(0);
        };

        let mut moved = 0;
        for item in items {
            match serde_json::from_value::<TraceEvent>(item) {
                Ok(event) => {
                    trace.push(event);
                    moved += 1;
                }
                Err(e) => warn!("dropping malformed page event: {}", e),
            }
        }
        Ok(moved)
    }

    /// Times the hook had to be reinstalled after a navigation.
    pub fn reinstalls(&self) -> usize {
        self.reinstalls
    }

    /// Drain what is left and remove the hook.
    pub async fn detach<P: PageDriver + ?Sized>(mut self, page: &P, trace: &Trace) -> Result<()> {
        self.collect(page, trace).await?;
        page.execute(REMOVE_JS).await?;
        debug!("console capture detached");
        Ok(())
    }
}
