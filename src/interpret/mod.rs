//! Response interpretation: turn whatever the provider sent back into the
//! model's intended text, retrying when the provider reports it is still
//! generating.

mod envelope;
mod extract;
mod prompt;
mod sanitize;
mod transport;

pub use envelope::{unwrap_envelope, Unwrapped};
pub use extract::balanced_fragment;
pub use prompt::{Message, Prompt, Role};
pub use sanitize::sanitize_literals;
pub use transport::{HttpTransport, Transport};

use crate::Result;
use tracing::{debug, info, warn};

/// Follow-up attempts allowed after an incomplete payload.
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Outcome of one interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    /// Best available text: a nested JSON fragment, else the unwrapped
    /// payload, else the raw response verbatim.
    pub text: String,
    /// The unwrapped payload, when an envelope was recognised.
    pub payload: Option<String>,
    /// Every raw response body, in request order.
    pub responses: Vec<String>,
    /// Follow-up requests issued.
    pub retries: usize,
    /// False when the retry budget ran out on an incomplete payload.
    pub complete: bool,
}

impl Interpretation {
    /// The last raw response body.
    pub fn raw(&self) -> &str {
        self.responses.last().map(String::as_str).unwrap_or("")
    }

    /// Plain payload text, for callers that want prose rather than JSON.
    ///
    /// Without a recognised envelope this is the raw response, never a JSON
    /// fragment pulled out of it.
    pub fn prose(&self) -> &str {
        self.payload.as_deref().unwrap_or_else(|| self.raw())
    }
}

/// Drives the transport and unwraps responses, with a bounded retry when the
/// provider flags an incomplete payload.
pub struct Interpreter<T> {
    transport: T,
    max_retries: usize,
}

impl<T: Transport> Interpreter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Request `prompt` and return the model's intended text.
    ///
    /// Only transport failures are errors. Malformed provider output degrades
    /// to returning the raw text for the caller to reject.
    pub async fn interpret(&self, prompt: &Prompt) -> Result<Interpretation> {
        let mut responses = vec![self.transport.complete(&prompt.render()).await?];
        let mut retries = 0;

        loop {
            let raw = responses.last().map(String::as_str).unwrap_or("");

            let Some(fragment) = balanced_fragment(raw) else {
                debug!("no JSON fragment in response ({} chars), using raw text", raw.len());
                return Ok(Self::verbatim(responses, retries));
            };

            let unwrapped = match unwrap_envelope(fragment) {
                Ok(u) => u,
                Err(e) => {
                    debug!("envelope parse failed ({}), using raw text", e);
                    return Ok(Self::verbatim(responses, retries));
                }
            };

            if unwrapped.is_incomplete() {
                if retries < self.max_retries {
                    retries += 1;
                    warn!(
                        "payload incomplete (done=false), retrying with strict prompt ({}/{})",
                        retries, self.max_retries
                    );
                    let strict = prompt.strict();
                    responses.push(self.transport.complete(&strict.render()).await?);
                    continue;
                }
                warn!(
                    "payload still incomplete after {} retries, accepting it",
                    retries
                );
            }

            info!(
                "interpreted response (payload: {} chars, retries: {})",
                unwrapped.payload.len(),
                retries
            );
            let complete = !unwrapped.is_incomplete();
            return Ok(Interpretation {
                text: unwrapped.best().to_string(),
                payload: unwrapped.envelope.then_some(unwrapped.payload),
                responses,
                retries,
                complete,
            });
        }
    }

    fn verbatim(responses: Vec<String>, retries: usize) -> Interpretation {
        Interpretation {
            text: responses.last().cloned().unwrap_or_default(),
            payload: None,
            responses,
            retries,
            complete: true,
        }
    }
}
