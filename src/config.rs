use std::time::Duration;

use ::config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::site::DriverKind;
use crate::{Result, DEFAULT_ACTION_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_USER_AGENT};

/// Runtime settings shared by every site.
///
/// Layered from built-in defaults, an optional `regscrape.{toml,json,yaml}`
/// (or the file named by `REGSCRAPE_CONFIG`) and `REGSCRAPE_*` environment
/// variables, in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upper bound for a single navigation step.
    pub action_timeout_ms: u64,
    /// Tick of the navigation scheduler and of selector/script polling.
    pub poll_interval_ms: u64,
    pub user_agent: String,
    /// Overrides the driver the site descriptor asks for.
    #[serde(default)]
    pub driver: Option<DriverKind>,
    /// Attach to a running Chrome instead of launching one.
    #[serde(default)]
    pub chrome_remote_url: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self> {
        let path = std::env::var("REGSCRAPE_CONFIG").unwrap_or_else(|_| "regscrape".to_string());
        let settings = defaults()?
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("REGSCRAPE").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            driver: None,
            chrome_remote_url: None,
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    let builder = Config::builder()
        .set_default("action_timeout_ms", DEFAULT_ACTION_TIMEOUT_MS)?
        .set_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
        .set_default("user_agent", DEFAULT_USER_AGENT)?;
    Ok(builder)
}
