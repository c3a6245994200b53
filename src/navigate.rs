//! Drives a browser session through a site's navigation script.
//!
//! The script runs as a small state machine ticked by the poll interval:
//! one step is in flight at a time and a step only starts once the previous
//! one has finished loading. Any step that fails or overruns the action
//! timeout fails the run.

use std::time::Duration;

use regex::Captures;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use url::Url;

use crate::browser::{Browser, PageHandle};
use crate::config::Settings;
use crate::extract::{compile, create_selector, element_text};
use crate::site::{expand_url, Action, DetailLinks, SiteConfig, Wait};
use crate::{Error, Result};

/// Where the script currently is.
#[derive(Debug)]
pub enum StepState {
    Pending(usize),
    Done,
    Failed(Error),
}

pub struct Navigator<'a> {
    script: &'a [Action],
    details: Option<&'a DetailLinks>,
    variant: Option<String>,
    action_timeout: Duration,
    poll: Duration,
}

impl<'a> Navigator<'a> {
    pub fn new(site: &'a SiteConfig, variant: Option<&str>, settings: &Settings) -> Self {
        Self {
            script: &site.script,
            details: site.details.as_ref(),
            variant: variant.map(str::to_string),
            action_timeout: settings.action_timeout(),
            poll: settings.poll_interval(),
        }
    }

    /// Runs the script and returns the pages holding records: the page the
    /// script ends on, or every detail page it links to.
    pub async fn navigate(&self, browser: &mut dyn Browser) -> Result<Vec<PageHandle>> {
        self.run_script(browser).await?;
        let listing = browser.snapshot().await?;

        let Some(details) = self.details else {
            return Ok(vec![listing]);
        };
        let urls = list_detail_pages(&listing, details)?;
        tracing::info!(count = urls.len(), url = %listing.url, "detail pages found");

        let mut pages = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let step = self.script.len() + i;
            self.bounded(step, browser.open(url)).await?;
            pages.push(browser.snapshot().await?);
        }
        Ok(pages)
    }

    async fn run_script(&self, browser: &mut dyn Browser) -> Result<()> {
        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = StepState::Pending(0);

        loop {
            state = match state {
                StepState::Pending(step) => match self.script.get(step) {
                    None => StepState::Done,
                    Some(action) => {
                        ticker.tick().await;
                        match self.perform(step, action, browser).await {
                            Ok(()) => StepState::Pending(step + 1),
                            Err(err) => StepState::Failed(err),
                        }
                    }
                },
                StepState::Done => return Ok(()),
                StepState::Failed(err) => return Err(err),
            };
        }
    }

    async fn perform(&self, step: usize, action: &Action, browser: &mut dyn Browser) -> Result<()> {
        tracing::debug!(step, ?action, "navigation step");
        match action {
            Action::Open { url } => {
                let url = Url::parse(&expand_url(url, self.variant.as_deref()))
                    .map_err(|err| Error::Navigation {
                        step,
                        reason: err.to_string(),
                    })?;
                self.bounded(step, browser.open(&url)).await
            }
            Action::Click { selector } => self.bounded(step, browser.click(selector)).await,
            Action::WaitFor { until } => {
                let poll = self.poll;
                self.bounded(step, wait_for(browser, until, poll)).await
            }
        }
    }

    /// Runs one step under the action timeout; every failure is a navigation failure.
    async fn bounded<F>(&self, step: usize, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match timeout(self.action_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err @ Error::Navigation { .. })) => Err(err),
            Ok(Err(err)) => Err(Error::Navigation {
                step,
                reason: err.to_string(),
            }),
            Err(_) => Err(Error::NavigationTimeout {
                step,
                timeout_ms: self.action_timeout.as_millis() as u64,
            }),
        }
    }
}

async fn wait_for(browser: &mut dyn Browser, until: &Wait, poll: Duration) -> Result<()> {
    match until {
        Wait::DelayMs(ms) => {
            sleep(Duration::from_millis(*ms)).await;
            Ok(())
        }
        Wait::Selector(selector) => {
            // Fail fast on a bad selector instead of polling until the timeout.
            create_selector(selector)?;
            loop {
                if browser.snapshot().await?.contains(selector)? {
                    return Ok(());
                }
                sleep(poll).await;
            }
        }
        Wait::Script(script) => loop {
            if truthy(&browser.evaluate(script).await?) {
                return Ok(());
            }
            sleep(poll).await;
        },
    }
}

fn truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Expands a listing page into the detail page urls it links to, in
/// document order.
///
/// Links go through the optional capture pattern and url template, so
/// `javascript:Dettagli(10651,'')` can become a real url. Without a
/// selector the pattern runs over the page source.
pub fn list_detail_pages(page: &PageHandle, details: &DetailLinks) -> Result<Vec<Url>> {
    let pattern = details.pattern.as_deref().map(compile).transpose()?;

    let candidates: Vec<String> = match &details.selector {
        Some(selector) => {
            let sel = create_selector(selector)?;
            let doc = page.document();
            let found = doc
                .select(&sel)
                .filter_map(|el| match &details.attribute {
                    Some(attr) => el.value().attr(attr).map(str::to_string),
                    None => Some(element_text(el)),
                })
                .collect();
            found
        }
        None => match &pattern {
            Some(re) => re.find_iter(&page.html).map(|m| m.as_str().to_string()).collect(),
            None => Vec::new(),
        },
    };

    let mut urls = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let link = match (&pattern, &details.template) {
            (None, _) => candidate,
            (Some(re), template) => {
                let Some(caps) = re.captures(&candidate) else {
                    tracing::warn!(%candidate, "detail link doesn't match the pattern, skipped");
                    continue;
                };
                match template {
                    Some(template) => fill_template(template, &caps),
                    None => caps
                        .get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            }
        };
        let link = link.trim();
        if link.is_empty() || link.starts_with("javascript:") {
            tracing::warn!(%link, "detail link can't be opened, skipped");
            continue;
        }
        match page.url.join(link) {
            Ok(url) => urls.push(url),
            Err(err) => tracing::warn!(%link, "detail link is malformed, skipped: {err}"),
        }
    }
    Ok(urls)
}

/// Substitutes `{1}`, `{2}`... with the capture groups.
fn fill_template(template: &str, caps: &Captures) -> String {
    let mut out = template.to_string();
    // Highest group first so `{1}` never eats the start of `{12}`.
    for i in (1..caps.len()).rev() {
        let value = caps.get(i).map(|m| m.as_str()).unwrap_or_default();
        out = out.replace(&format!("{{{i}}}"), value);
    }
    out
}
