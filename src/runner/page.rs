use crate::config::BrowserConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use eoka::{Browser, Page};
use serde_json::Value;
use tracing::{debug, warn};

/// Page operations the executor needs. Implemented for [`eoka::Page`];
/// tests substitute an in-memory page.
#[async_trait(?Send)]
pub trait PageDriver {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Evaluate a script and return its value. Multi-statement scripts yield
    /// the value of their last expression; `undefined` becomes `null`.
    async fn eval(&self, script: &str) -> Result<Value>;

    /// Run a script for its side effects only.
    async fn execute(&self, script: &str) -> Result<()>;

    /// PNG capture of the viewport, after scrolling `selector` into view when
    /// given.
    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>>;

    /// Trimmed text content of every element matching `selector`.
    async fn text_contents(&self, selector: &str) -> Result<Vec<String>>;

    async fn title(&self) -> Result<String>;

    async fn url(&self) -> Result<String>;

    /// Visible text of the whole page.
    async fn text(&self) -> Result<String>;
}

fn js_string(s: &str) -> Result<String> {
    Ok(serde_json::to_string(s)?)
}

#[async_trait(?Send)]
impl PageDriver for Page {
    async fn goto(&self, url: &str) -> Result<()> {
        Page::goto(self, url).await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.wait_for(selector, timeout_ms).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        Page::click(self, selector).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        Page::fill(self, selector, value).await?;
        Ok(())
    }

    async fn eval(&self, script: &str) -> Result<Value> {
        let js = format!(
            "(() => {{ const v = eval({}); return v === undefined ? null : JSON.stringify(v); }})()",
            js_string(script)?
        );
        let json: Option<String> = self.evaluate(&js).await?;
        match json {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(Value::Null),
        }
    }

    async fn execute(&self, script: &str) -> Result<()> {
        Page::execute(self, script).await?;
        Ok(())
    }

    async fn screenshot(&self, selector: Option<&str>) -> Result<Vec<u8>> {
        if let Some(sel) = selector {
            let js = format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollIntoView({{block:'center'}}); return true; }})()",
                js_string(sel)?
            );
            let found: bool = self.evaluate(&js).await?;
            if !found {
                return Err(Error::ActionFailed(format!(
                    "screenshot target '{}' not found",
                    sel
                )));
            }
            self.wait(200).await;
        }
        Ok(Page::screenshot(self).await?)
    }

    async fn text_contents(&self, selector: &str) -> Result<Vec<String>> {
        let js = format!(
            "Array.from(document.querySelectorAll({})).map(e => (e.textContent || '').trim())",
            js_string(selector)?
        );
        Ok(self.evaluate(&js).await?)
    }

    async fn title(&self) -> Result<String> {
        Ok(Page::title(self).await?)
    }

    async fn url(&self) -> Result<String> {
        Ok(Page::url(self).await?)
    }

    async fn text(&self) -> Result<String> {
        Ok(Page::text(self).await?)
    }
}

/// One browser and the page a run drives. Owned by the caller and lent to
/// the pilot; nothing else holds the browser.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
}

impl BrowserSession {
    /// Launch a browser from `config` and open a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        // eoka builds its own Chrome command line
        if !config.extra_args.is_empty() {
            warn!(
                "extra browser args are not supported by the launcher, ignoring: {:?}",
                config.extra_args
            );
        }
        if config.ignore_tls_errors {
            warn!("ignore_tls_errors is not supported by the launcher, ignoring");
        }

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self { browser, page })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}
