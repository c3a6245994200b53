//! Data-driven description of one register.
//!
//! A [`SiteConfig`] carries everything that differs between registers:
//! the navigation script, how detail pages are discovered, the extraction
//! shape, the label dictionary and the attachment rules. The pipeline in
//! [`crate::process`] is the same for all of them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Short name used on the command line.
    pub key: String,
    /// Name of the register, copied into every record.
    pub source: String,
    /// Publisher used when the page doesn't name one.
    #[serde(default)]
    pub publisher: Option<String>,
    /// Accepted values of the positional variant argument. Empty means the
    /// site takes no variant.
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub driver: DriverKind,
    pub script: Vec<Action>,
    #[serde(default)]
    pub details: Option<DetailLinks>,
    pub extraction: Extraction,
    #[serde(default)]
    pub labels: LabelMap,
    #[serde(default)]
    pub attachments: AttachmentRules,
    /// Number of dates a record must carry to be kept.
    #[serde(default)]
    pub dates_required: usize,
    /// Copy the part of the subject before " - " into `type`.
    #[serde(default)]
    pub type_from_subject: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Http,
    Chrome,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(DriverKind::Http),
            "chrome" => Ok(DriverKind::Chrome),
            other => Err(format!("unknown driver `{other}`, expected http or chrome")),
        }
    }
}

/// One step of a navigation script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// `{variant}` in the url is replaced by the selected variant.
    Open { url: String },
    Click { selector: String },
    WaitFor { until: Wait },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wait {
    DelayMs(u64),
    /// Poll until the selector matches something on the current page.
    Selector(String),
    /// Poll until the script evaluates to a truthy value.
    Script(String),
}

/// How a listing page expands into detail page urls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailLinks {
    /// Elements carrying the links. Without one, `pattern` is matched
    /// against the raw page source.
    #[serde(default)]
    pub selector: Option<String>,
    /// Attribute holding the link; the element text is used when unset.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Pattern whose capture groups are substituted into `template` as
    /// `{1}`, `{2}`... Matches that fail the pattern are skipped.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Extraction {
    /// Repeated containers holding label and value elements, paired by position.
    LabelValue {
        containers: Vec<String>,
        label: String,
        value: String,
    },
    /// One record per row, fixed column positions.
    Table {
        rows: String,
        #[serde(default)]
        skip_header: bool,
        columns: Vec<Column>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub index: usize,
    /// Falls back to the header cell text when the header row is skipped.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub read: CellRead,
    /// Look for attachments inside this cell.
    #[serde(default)]
    pub attachments: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRead {
    #[default]
    Text,
    /// Text outside of anchors, with line breaks and size annotations cleaned up.
    TextWithoutLinks,
    /// Every `dd-mm-yyyy` shaped substring, in order.
    Dates,
    Skip,
}

/// Canonical record fields a label can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Publisher,
    Number,
    Subject,
    #[serde(rename = "type")]
    Type,
    DateStart,
    DateEnd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatch {
    #[default]
    Exact,
    /// First entry whose label occurs in the page label wins.
    Contains,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelMap {
    #[serde(default)]
    pub matching: LabelMatch,
    /// Upper-case page labels before lookup.
    #[serde(default)]
    pub upper_case: bool,
    #[serde(default)]
    pub entries: Vec<(String, Field)>,
}

/// Where a page label ends up in the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Field(Field),
    Extra(String),
}

impl LabelMap {
    pub fn new(entries: &[(&str, Field)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(label, field)| (label.to_string(), *field))
                .collect(),
            ..Default::default()
        }
    }

    /// Maps a page label to a record key. Unknown labels are lower-cased,
    /// never dropped.
    pub fn resolve(&self, label: &str) -> Key {
        let cleaned = label.replace('\u{a0}', "");
        let cleaned = cleaned.trim();
        let lookup = if self.upper_case {
            cleaned.to_uppercase()
        } else {
            cleaned.to_string()
        };

        let found = self.entries.iter().find(|(known, _)| match self.matching {
            LabelMatch::Exact => *known == lookup,
            LabelMatch::Contains => lookup.contains(known.as_str()),
        });
        match found {
            Some((_, field)) => Key::Field(*field),
            None => Key::Extra(cleaned.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentRules {
    #[serde(default)]
    pub source: AttachmentSource,
    /// Relative links are resolved against this url instead of the page url.
    #[serde(default)]
    pub base: Option<String>,
    /// Remove parenthesized size annotations such as `(34KB)` from names.
    #[serde(default)]
    pub strip_sizes: bool,
    /// Leading marker removed from names, e.g. `- `.
    #[serde(default)]
    pub strip_prefix: Option<String>,
    /// Names matching this pattern are dropped.
    #[serde(default)]
    pub exclude: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Every matching anchor: visible text is the name.
    Anchors {
        selector: String,
        #[serde(default)]
        link: LinkSource,
    },
    /// One attachment per row: name cell text, anchor in the link cell.
    Rows {
        rows: String,
        name_cell: usize,
        link_cell: usize,
    },
    /// Alternating name and link cells; the last anchor of the link cell wins.
    CellPairs { cells: String },
    /// Anchors of the rows whose first cell contains `label`, ignoring case.
    LabelledRows {
        rows: String,
        label: String,
        selector: String,
        #[serde(default)]
        link: LinkSource,
    },
}

impl Default for AttachmentSource {
    fn default() -> Self {
        AttachmentSource::Anchors {
            selector: "a".into(),
            link: LinkSource::Href,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    #[default]
    Href,
    /// The first capture group of `pattern` applied to the `onclick` attribute.
    Onclick { pattern: String },
}

impl SiteConfig {
    /// Validates the variant argument against the accepted ones.
    pub fn resolve_variant(&self, variant: Option<&str>) -> Result<Option<String>> {
        let invalid = || Error::InvalidVariant {
            site: self.key.clone(),
            expected: self.variants.clone(),
            got: variant.map(str::to_string),
        };
        match (self.variants.is_empty(), variant) {
            (true, None) => Ok(None),
            (true, Some(_)) => Err(invalid()),
            (false, Some(v)) if self.variants.iter().any(|known| known == v) => {
                Ok(Some(v.to_string()))
            }
            (false, _) => Err(invalid()),
        }
    }

    /// Usage line printed on a bad invocation.
    pub fn usage(&self) -> String {
        if self.variants.is_empty() {
            format!("regscrape {}", self.key)
        } else {
            format!("regscrape {} <{}>", self.key, self.variants.join("|"))
        }
    }
}

/// Replaces `{variant}` in a url template.
pub fn expand_url(template: &str, variant: Option<&str>) -> String {
    template.replace("{variant}", variant.unwrap_or_default())
}

/// Reads a JSON array of site descriptors.
pub fn load_sites(path: &Path) -> Result<Vec<SiteConfig>> {
    let raw = std::fs::read_to_string(path)?;
    let sites = serde_json::from_str(&raw)?;
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_labels_map_and_unknown_ones_lowercase() {
        let map = LabelMap::new(&[("N.Reg", Field::Number), ("al", Field::DateEnd)]);
        assert_eq!(map.resolve("N.Reg"), Key::Field(Field::Number));
        assert_eq!(map.resolve(" al "), Key::Field(Field::DateEnd));
        assert_eq!(map.resolve("Protocollo"), Key::Extra("protocollo".into()));
        // Exact matching is case sensitive.
        assert_eq!(map.resolve("AL"), Key::Extra("al".into()));
    }

    #[test]
    fn contains_matching_uses_upper_cased_label() {
        let map = LabelMap {
            matching: LabelMatch::Contains,
            upper_case: true,
            entries: vec![
                ("NUMERO PUBBLICAZIONE".into(), Field::Number),
                ("MITTENTE".into(), Field::Publisher),
            ],
        };
        assert_eq!(
            map.resolve("Numero pubblicazione\u{a0}"),
            Key::Field(Field::Number)
        );
        assert_eq!(map.resolve("Ente mittente"), Key::Field(Field::Publisher));
        assert_eq!(map.resolve("Note"), Key::Extra("note".into()));
    }

    #[test]
    fn variant_is_checked() {
        let mut site = crate::sites::defilis();
        assert_eq!(site.resolve_variant(None).unwrap(), None);
        assert!(site.resolve_variant(Some("1")).is_err());

        site.variants = vec!["1".into(), "2".into()];
        assert_eq!(site.resolve_variant(Some("2")).unwrap(), Some("2".into()));
        assert!(site.resolve_variant(Some("4")).is_err());
        assert!(site.resolve_variant(None).unwrap_err().is_usage());
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let json = r##"[{
            "key": "test",
            "source": "Test register",
            "publisher": "Comune",
            "script": [
                {"action": "open", "url": "http://example.org/list?p={variant}"},
                {"action": "click", "selector": "#all"},
                {"action": "wait_for", "until": {"delay_ms": 500}}
            ],
            "extraction": {
                "shape": "table",
                "rows": "tr",
                "skip_header": true,
                "columns": [
                    {"index": 0},
                    {"index": 1, "read": "text_without_links", "attachments": true}
                ]
            },
            "labels": {"entries": [["N.Reg", "number"], ["Tipologia", "type"]]},
            "attachments": {
                "source": {"kind": "anchors", "selector": "a", "link": {"onclick": {"pattern": "open\\('(.*?)'\\)"}}},
                "strip_sizes": true
            },
            "dates_required": 2
        }]"##;
        let sites: Vec<SiteConfig> = serde_json::from_str(json).unwrap();
        let site = &sites[0];
        assert_eq!(site.driver, DriverKind::Http);
        assert_eq!(
            site.script[2],
            Action::WaitFor {
                until: Wait::DelayMs(500)
            }
        );
        assert_eq!(site.labels.resolve("Tipologia"), Key::Field(Field::Type));
        assert!(matches!(
            &site.attachments.source,
            AttachmentSource::Anchors { link: LinkSource::Onclick { .. }, .. }
        ));
        assert_eq!(
            expand_url("http://example.org/list?p={variant}", Some("3")),
            "http://example.org/list?p=3"
        );
    }
}
