use std::io::Write;
use std::sync::Arc;

use chrono::Local;

use crate::browser::{self, Browser};
use crate::config::Settings;
use crate::extract::extract_page;
use crate::navigate::Navigator;
use crate::normalize::normalize_all;
use crate::record::PublicationRecord;
use crate::site::SiteConfig;
use crate::{info_time, Result};

/// Scrapes one register with a fresh browser session.
///
/// The session is released whatever the outcome of the run.
pub async fn process_site(
    site: Arc<SiteConfig>,
    variant: Option<&str>,
    settings: &Settings,
) -> Result<Vec<PublicationRecord>> {
    let variant = site.resolve_variant(variant)?;
    let driver = settings.driver.unwrap_or(site.driver);

    let mut browser = browser::launch(driver, settings).await?;
    let result = scrape(browser.as_mut(), site.clone(), variant.as_deref(), settings).await;
    if let Err(err) = browser.close().await {
        tracing::warn!(site = %site.key, "couldn't close the browser session: {err}");
    }
    result
}

/// Navigator -> Extractor -> Normalizer over an already open session.
///
/// Navigation failures abort the run. A page without records and a
/// malformed record are logged and skipped.
pub async fn scrape(
    browser: &mut dyn Browser,
    site: Arc<SiteConfig>,
    variant: Option<&str>,
    settings: &Settings,
) -> Result<Vec<PublicationRecord>> {
    let start_time = Local::now();
    info_time!("Started scraping {}", site.key);

    let pages = Navigator::new(&site, variant, settings)
        .navigate(browser)
        .await?;
    info_time!(start_time, "Navigation done, {} page(s) to read", pages.len());

    let mut records = Vec::new();
    for page in pages {
        let url = page.url.clone();
        let raws = extract_page(page, site.clone()).await?;
        if raws.is_empty() {
            tracing::warn!(site = %site.key, %url, "no records found on page");
            continue;
        }
        records.extend(normalize_all(raws, &site));
    }

    info_time!(start_time, "Finished scraping {}: {} record(s)", site.key, records.len());
    Ok(records)
}

/// Writes the whole run as one JSON array followed by a newline.
pub fn write_records<W: Write>(mut out: W, records: &[PublicationRecord], pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut out, records)?;
    } else {
        serde_json::to_writer(&mut out, records)?;
    }
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
