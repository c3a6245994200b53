//! The canonical output unit of a scrape run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::RecordError;

/// A document attached to a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// JSON keys of the canonical fields; `extra` must never reuse them.
pub const RECORD_KEYS: &[&str] = &[
    "source",
    "publisher",
    "number",
    "date_start",
    "date_end",
    "subject",
    "type",
    "url",
    "attachments",
];

/// One entry of a register, normalized.
///
/// Labels the site dictionary doesn't know end up lower-cased in `extra`,
/// which is flattened into the JSON object next to the canonical fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub source: String,
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_end: Option<String>,
    pub subject: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub pub_type: Option<String>,
    pub url: String,
    pub attachments: Vec<Attachment>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl PublicationRecord {
    /// Checks the per-record invariants: required text fields are non-empty,
    /// the publication window is ordered and every attachment link is absolute.
    pub fn validate(&self) -> Result<(), RecordError> {
        let required = [
            ("source", &self.source),
            ("publisher", &self.publisher),
            ("subject", &self.subject),
            ("url", &self.url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RecordError::MissingField(name));
            }
        }

        // ISO dates compare correctly as strings.
        if let (Some(start), Some(end)) = (&self.date_start, &self.date_end) {
            if start > end {
                return Err(RecordError::DateOrder {
                    start: start.clone(),
                    end: end.clone(),
                });
            }
        }

        for attachment in &self.attachments {
            if Url::parse(&attachment.url).is_err() {
                return Err(RecordError::RelativeUrl(attachment.url.clone()));
            }
        }
        Ok(())
    }
}
