use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{EventFrameStartedLoading, EventLoadEventFired};
use chromiumoxide::{Browser as Chromium, BrowserConfig, Page};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

use super::{Browser, PageHandle};
use crate::config::Settings;
use crate::{Error, Result};

const DRIVER: &str = "chrome";
/// How long a click gets to start a navigation before it counts as in-page.
const NAVIGATION_START: Duration = Duration::from_millis(1_000);

/// Headless Chrome over the DevTools protocol, for registers rendered by script.
pub struct ChromeBrowser {
    chromium: Chromium,
    page: Page,
    handler: JoinHandle<()>,
    /// Attached to someone else's Chrome: close our tab, not the browser.
    remote: bool,
}

impl ChromeBrowser {
    /// Launches a local headless Chrome, or attaches to the instance at
    /// `chrome_remote_url` / `CHROMIUM_REMOTE_DEBUGGING_URL`.
    pub async fn launch(settings: &Settings) -> Result<Self> {
        let remote_url = settings
            .chrome_remote_url
            .clone()
            .or_else(|| std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL").ok());

        let (chromium, mut handler) = if let Some(ref url) = remote_url {
            tracing::info!("Connecting to remote Chrome instance at: {}", url);
            Chromium::connect(url.as_str()).await?
        } else {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(settings.action_timeout())
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .build()
                .map_err(Error::Browser)?;
            Chromium::launch(config).await?
        };

        // The handler stream drives the CDP connection; it ends when the browser goes away.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = chromium.new_page("about:blank").await?;
        page.set_user_agent(SetUserAgentOverrideParams::new(settings.user_agent.clone()))
            .await?;

        Ok(Self {
            chromium,
            page,
            handler,
            remote: remote_url.is_some(),
        })
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    fn name(&self) -> &'static str {
        DRIVER
    }

    async fn open(&mut self, url: &Url) -> Result<()> {
        // goto resolves once the load event fired.
        self.page.goto(url.as_str()).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        // Subscribe first: the page may start loading before `click` returns.
        let main = self.page.mainframe().await?;
        let started = self
            .page
            .event_listener::<EventFrameStartedLoading>()
            .await?
            .map(move |ev| main.as_ref().map_or(true, |id| *id == ev.frame_id));
        let loaded = self.page.event_listener::<EventLoadEventFired>().await?;

        self.page.find_element(selector).await?.click().await?;

        let navigated = await_click_load(started, loaded, NAVIGATION_START).await;
        tracing::debug!(selector, navigated, "click settled");
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn snapshot(&mut self) -> Result<PageHandle> {
        let html = self.page.content().await?;
        let url = self.page.url().await?.ok_or(Error::NoPage)?;
        Ok(PageHandle::new(Url::parse(&url)?, html))
    }

    async fn close(&mut self) -> Result<()> {
        if self.remote {
            self.page.clone().close().await?;
        } else {
            self.chromium.close().await?;
            self.chromium.wait().await?;
        }
        self.handler.abort();
        Ok(())
    }
}

/// Waits for the load a click started, if it started one.
///
/// `started` yields whether each frame that starts loading is the main
/// frame. Returns `false` when no main frame load starts within `grace`;
/// otherwise returns once the next load event fires.
async fn await_click_load<S, L>(mut started: S, mut loaded: L, grace: Duration) -> bool
where
    S: Stream<Item = bool> + Unpin,
    L: Stream + Unpin,
{
    let main_started = timeout(grace, async {
        while let Some(is_main) = started.next().await {
            if is_main {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if main_started {
        loaded.next().await;
    }
    main_started
}
