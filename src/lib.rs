//! REGISTER SCRAPER
//! Reads public publication registers (albi pretori, regional bulletins)
//! through a controlled browser session and normalizes them into
//! `PublicationRecord`s.

mod error;
mod macros;

pub mod browser;
pub mod config;
pub mod extract;
pub mod navigate;
pub mod normalize;
pub mod process;
pub mod record;
pub mod site;
pub mod sites;
pub mod telemetry;

pub use error::{Error, RecordError, Result};

/// Upper bound for one navigation step.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 30_000;
/// Scheduler tick and polling period for dynamic content.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X)";
/// Splits `TYPE - subject` subjects.
const SUBJECT_TYPE_SEPARATOR: &str = " - ";
