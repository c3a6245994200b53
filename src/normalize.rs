//! Raw extracted records to [`PublicationRecord`]s.

use std::collections::BTreeMap;

use crate::extract::RawRecord;
use crate::record::{PublicationRecord, RECORD_KEYS};
use crate::site::{Field, Key, SiteConfig};
use crate::{RecordError, SUBJECT_TYPE_SEPARATOR};

/// `dd-mm-yyyy` (any non-digit separators) to `yyyy-mm-dd`, by position.
pub fn normalize_date(local: &str) -> Result<String, RecordError> {
    let malformed = || RecordError::MalformedDate(local.to_string());
    let chars: Vec<char> = local.trim().chars().collect();
    if chars.len() != 10 {
        return Err(malformed());
    }
    for (i, c) in chars.iter().enumerate() {
        let separator = i == 2 || i == 5;
        if separator == c.is_ascii_digit() {
            return Err(malformed());
        }
    }
    let day: String = chars[0..2].iter().collect();
    let month: String = chars[3..5].iter().collect();
    let year: String = chars[6..10].iter().collect();
    Ok(format!("{year}-{month}-{day}"))
}

/// Inverse of [`normalize_date`]: `yyyy-mm-dd` to `dd{sep}mm{sep}yyyy`.
pub fn date_to_local(iso: &str, sep: char) -> Result<String, RecordError> {
    let malformed = || RecordError::MalformedDate(iso.to_string());
    let bytes = iso.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(malformed());
    }
    let digits = [&iso[0..4], &iso[5..7], &iso[8..10]];
    if !digits.iter().all(|d| d.bytes().all(|b| b.is_ascii_digit())) {
        return Err(malformed());
    }
    Ok(format!("{}{sep}{}{sep}{}", digits[2], digits[1], digits[0]))
}

/// Applies the site dictionary and date rules to one raw record.
pub fn normalize(raw: RawRecord, site: &SiteConfig) -> Result<PublicationRecord, RecordError> {
    let mut publisher = None;
    let mut number = None;
    let mut subject = None;
    let mut pub_type = None;
    let mut date_start = None;
    let mut date_end = None;
    let mut extra = BTreeMap::new();

    // Later occurrences of a label win, as on the page.
    for (label, value) in raw.fields {
        let value = value.trim().to_string();
        match site.labels.resolve(&label) {
            Key::Field(Field::Publisher) => publisher = Some(value),
            Key::Field(Field::Number) => number = Some(value),
            Key::Field(Field::Subject) => subject = Some(value),
            Key::Field(Field::Type) => pub_type = Some(value),
            Key::Field(Field::DateStart) => date_start = Some(value),
            Key::Field(Field::DateEnd) => date_end = Some(value),
            Key::Extra(key) if key.is_empty() => {}
            Key::Extra(key) => {
                extra.insert(extra_key(key), value);
            }
        }
    }

    let mut discovered = raw.dates.into_iter();
    if date_start.is_none() {
        date_start = discovered.next();
    }
    if date_end.is_none() {
        date_end = discovered.next();
    }
    let date_start = date_start.filter(|d| !d.is_empty());
    let date_end = date_end.filter(|d| !d.is_empty());

    let found = date_start.iter().count() + date_end.iter().count();
    if found < site.dates_required {
        return Err(RecordError::MissingDates {
            found,
            required: site.dates_required,
        });
    }
    let date_start = date_start.as_deref().map(normalize_date).transpose()?;
    let date_end = date_end.as_deref().map(normalize_date).transpose()?;

    let subject = subject.unwrap_or_default();
    if site.type_from_subject && pub_type.is_none() {
        pub_type = subject_type(&subject);
    }

    let record = PublicationRecord {
        source: site.source.clone(),
        publisher: publisher
            .filter(|p| !p.is_empty())
            .or_else(|| site.publisher.clone())
            .unwrap_or_default(),
        number: number.filter(|n| !n.is_empty()),
        date_start,
        date_end,
        subject,
        pub_type,
        url: raw.url.map(|u| u.to_string()).unwrap_or_default(),
        attachments: raw.attachments,
        extra,
    };
    record.validate()?;
    Ok(record)
}

/// Moves unmapped labels that shadow a canonical field to `<label>_label`.
fn extra_key(key: String) -> String {
    if RECORD_KEYS.contains(&key.as_str()) {
        let renamed = format!("{key}_label");
        tracing::warn!(label = %key, %renamed, "label clashes with a record field, renamed");
        renamed
    } else {
        key
    }
}

/// Leading segment of `TYPE - subject`, when there is one.
pub fn subject_type(subject: &str) -> Option<String> {
    let (head, _) = subject.split_once(SUBJECT_TYPE_SEPARATOR)?;
    let head = head.trim();
    (!head.is_empty()).then(|| head.to_string())
}

/// Normalizes a page worth of raw records, dropping the malformed ones.
pub fn normalize_all(raws: Vec<RawRecord>, site: &SiteConfig) -> Vec<PublicationRecord> {
    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
        let url = raw.url.clone();
        match normalize(raw, site) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(site = %site.key, url = ?url.map(|u| u.to_string()), "record dropped: {err}")
            }
        }
    }
    records
}
