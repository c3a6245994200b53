//! The controlled browser session a scrape run drives.
//!
//! Drivers implement [`Browser`]; every call returns once the page has
//! finished loading, so callers never see a half-loaded page.

mod chrome;
mod http;

pub use chrome::ChromeBrowser;
pub use http::HttpBrowser;

use async_trait::async_trait;
use scraper::Html;
use url::Url;

use crate::config::Settings;
use crate::extract::create_selector;
use crate::site::DriverKind;
use crate::Result;

#[async_trait]
pub trait Browser: Send {
    /// Driver name, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Loads `url` and waits for the load to finish.
    async fn open(&mut self, url: &Url) -> Result<()>;

    /// Clicks the first element matching `selector`, waiting for any
    /// navigation it triggers.
    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Runs a script against the loaded DOM and returns its value.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Current url and serialized DOM.
    async fn snapshot(&mut self) -> Result<PageHandle>;

    /// Releases the session. Called exactly once per run, on success or failure.
    async fn close(&mut self) -> Result<()>;
}

/// A snapshot of a loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle {
    pub url: Url,
    pub html: String,
}

impl PageHandle {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }

    /// Whether anything on the page matches `selector`.
    pub fn contains(&self, selector: &str) -> Result<bool> {
        let selector = create_selector(selector)?;
        Ok(self.document().select(&selector).next().is_some())
    }
}

/// Starts a session with the requested driver.
pub async fn launch(kind: DriverKind, settings: &Settings) -> Result<Box<dyn Browser>> {
    let browser: Box<dyn Browser> = match kind {
        DriverKind::Http => Box::new(HttpBrowser::new(
            &settings.user_agent,
            settings.action_timeout(),
        )?),
        DriverKind::Chrome => Box::new(ChromeBrowser::launch(settings).await?),
    };
    tracing::debug!(driver = browser.name(), "browser session started");
    Ok(browser)
}
