use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that abort a whole scrape run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Navigation failed at step {step}: {reason}")]
    Navigation { step: usize, reason: String },
    #[error("Step {step} did not complete within {timeout_ms} ms")]
    NavigationTimeout { step: usize, timeout_ms: u64 },

    #[error("Invalid CSS selector: {0}")]
    ParseMissingSelector(String),
    #[error("Invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Browser error: {0}")]
    Browser(String),
    #[error("The {driver} driver can't {action}")]
    Unsupported {
        driver: &'static str,
        action: String,
    },
    #[error("No page has been opened yet")]
    NoPage,

    #[error("No site given")]
    MissingSite,
    #[error("Unknown site: {0}")]
    UnknownSite(String),
    #[error("Site {site} expects one of {expected:?} as variant, got {got:?}")]
    InvalidVariant {
        site: String,
        expected: Vec<String>,
        got: Option<String>,
    },

    #[error("Config Error: {0}")]
    Config(#[from] ::config::ConfigError),
    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Usage errors are reported with the command line help instead of a log line.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::MissingSite | Error::UnknownSite(_) | Error::InvalidVariant { .. }
        )
    }
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(value: chromiumoxide::error::CdpError) -> Self {
        Error::Browser(value.to_string())
    }
}

/// Errors that drop a single record; the run keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("malformed date {0:?}, expected dd-mm-yyyy")]
    MalformedDate(String),
    #[error("found {found} date(s), {required} required")]
    MissingDates { found: usize, required: usize },
    #[error("required field `{0}` is empty")]
    MissingField(&'static str),
    #[error("date_start {start} is after date_end {end}")]
    DateOrder { start: String, end: String },
    #[error("attachment url {0:?} is not absolute")]
    RelativeUrl(String),
}
