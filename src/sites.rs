//! Built-in register descriptors.

use crate::site::{
    Action, AttachmentRules, AttachmentSource, CellRead, Column, DetailLinks, DriverKind,
    Extraction, Field, LabelMap, LabelMatch, LinkSource, SiteConfig, Wait,
};

const ACQUASPARTA_BASE: &str = "http://asp.urbi.it/urbi/progs/urp/";
const ACQUASPARTA_START: &str = "http://asp.urbi.it/urbi/progs/urp/ur1ME002.sto?DB_NAME=n1201560";
const DEFILIS_START: &str = "http://www.defilisterni.gov.it/wp/wp-includes/albo_pretorio.php";
const UMBRIA_BASE: &str = "http://www2.regione.umbria.it/bollettini/";
const MONTECASTRILLI_BASE: &str = "http://halleyweb.com/c055017/mc/";

/// All built-in sites, in the order `--list` shows them.
pub fn builtin() -> Vec<SiteConfig> {
    vec![acquasparta(), defilis(), montecastrilli(), umbria()]
}

/// Built-in sites with `extra` layered on top; an extra site replaces a
/// built-in one with the same key.
pub fn registry(extra: Vec<SiteConfig>) -> Vec<SiteConfig> {
    let mut sites = builtin();
    for site in extra {
        match sites.iter_mut().find(|s| s.key == site.key) {
            Some(slot) => *slot = site,
            None => sites.push(site),
        }
    }
    sites
}

pub fn find<'a>(sites: &'a [SiteConfig], key: &str) -> Option<&'a SiteConfig> {
    sites.iter().find(|s| s.key.eq_ignore_ascii_case(key))
}

/// Albo Pretorio of the Comune di Acquasparta: listing behind a search form,
/// one detail page per publication.
pub fn acquasparta() -> SiteConfig {
    SiteConfig {
        key: "acquasparta".into(),
        source: "Albo Pretorio del Comune di Acquasparta".into(),
        publisher: None,
        variants: Vec::new(),
        driver: DriverKind::Chrome,
        script: vec![
            Action::Open {
                url: ACQUASPARTA_START.into(),
            },
            Action::Click {
                selector: "fieldset.generica:nth-child(3) > div:nth-child(2) > div:nth-child(2) > input:nth-child(1)".into(),
            },
            Action::WaitFor {
                until: Wait::DelayMs(500),
            },
            Action::Click {
                selector: ".pulsante".into(),
            },
        ],
        details: Some(DetailLinks {
            selector: Some("a.bottoneprova".into()),
            attribute: Some("href".into()),
            pattern: Some(r"Dettagli\((\d+)\s*,\s*'([^']*)'".into()),
            template: Some(format!(
                "{ACQUASPARTA_START}&StwEvent=102&IdMePubblica={{1}}&Archivio={{2}}"
            )),
        }),
        extraction: Extraction::LabelValue {
            containers: vec![".testata".into(), ".dettaglio".into()],
            label: ".infolabel".into(),
            value: ".infodato".into(),
        },
        labels: LabelMap::new(&[
            ("Ente Mittente", Field::Publisher),
            ("In Pubblicazione dal", Field::DateStart),
            ("al", Field::DateEnd),
            ("N.Reg", Field::Number),
            ("Oggetto", Field::Subject),
            ("Tipologia", Field::Type),
        ]),
        attachments: AttachmentRules {
            source: AttachmentSource::Rows {
                rows: "tr".into(),
                name_cell: 0,
                link_cell: 1,
            },
            base: Some(ACQUASPARTA_BASE.into()),
            ..Default::default()
        },
        dates_required: 1,
        type_from_subject: false,
    }
}

/// Albo Pretorio of the I. C. "A. De Filis", Terni: a script-filled table,
/// one publication per row.
pub fn defilis() -> SiteConfig {
    SiteConfig {
        key: "defilis".into(),
        source: "Albo Pretorio dell'I. C. \"A. De Filis\", Terni".into(),
        publisher: Some("I. C. \"A. De Filis\", Terni".into()),
        variants: Vec::new(),
        driver: DriverKind::Chrome,
        script: vec![
            Action::Open {
                url: DEFILIS_START.into(),
            },
            Action::WaitFor {
                until: Wait::DelayMs(500),
            },
        ],
        details: None,
        extraction: Extraction::Table {
            rows: "tr".into(),
            skip_header: true,
            columns: vec![
                Column {
                    index: 0,
                    label: Some("N.Reg".into()),
                    read: CellRead::Text,
                    attachments: false,
                },
                Column {
                    index: 2,
                    label: Some("Oggetto".into()),
                    read: CellRead::TextWithoutLinks,
                    attachments: true,
                },
                Column {
                    index: 3,
                    label: None,
                    read: CellRead::Dates,
                    attachments: false,
                },
            ],
        },
        labels: LabelMap::new(&[("N.Reg", Field::Number), ("Oggetto", Field::Subject)]),
        attachments: AttachmentRules {
            strip_sizes: true,
            ..Default::default()
        },
        dates_required: 2,
        type_from_subject: true,
    }
}

/// Bollettino ufficiale della Regione Umbria. The variant picks the series:
/// 1 general, 2 notices and contests, 3 communications.
pub fn umbria() -> SiteConfig {
    SiteConfig {
        key: "umbria".into(),
        source: "Bollettino ufficiale della Regione Umbria".into(),
        publisher: Some("Regione Umbria".into()),
        variants: vec!["1".into(), "2".into(), "3".into()],
        driver: DriverKind::Chrome,
        script: vec![
            Action::Open {
                url: format!("{UMBRIA_BASE}consultazione.aspx?parte={{variant}}"),
            },
            Action::Click {
                selector: "#cphBody_SelezionaMese".into(),
            },
        ],
        details: None,
        extraction: Extraction::Table {
            rows: "#cphBody_PannelloRisultati table > tbody > tr".into(),
            skip_header: false,
            columns: vec![Column {
                index: 0,
                label: Some("Oggetto".into()),
                read: CellRead::Text,
                attachments: true,
            }],
        },
        labels: LabelMap::new(&[("Oggetto", Field::Subject)]),
        attachments: AttachmentRules {
            source: AttachmentSource::CellPairs {
                cells: "table td".into(),
            },
            base: Some(UMBRIA_BASE.into()),
            strip_sizes: false,
            strip_prefix: Some("- ".into()),
            exclude: Some("(?i)firmato(.*)digitalmente".into()),
        },
        dates_required: 0,
        type_from_subject: false,
    }
}

/// Wedding register of the Comune di Montecastrilli: a grid feed listing
/// detail pages, plain HTML otherwise.
pub fn montecastrilli() -> SiteConfig {
    SiteConfig {
        key: "montecastrilli".into(),
        source: "Matrimoni del Comune di Montecastrilli".into(),
        publisher: None,
        variants: Vec::new(),
        driver: DriverKind::Http,
        script: vec![Action::Open {
            url: format!("{MONTECASTRILLI_BASE}mc_matri_gridev_messi_datigrid.php?x=1"),
        }],
        details: Some(DetailLinks {
            selector: None,
            attribute: None,
            pattern: Some(r"visualizza_dettaglio\((\d*?)\s*,\s*(\d*),\s*(\d*)\)".into()),
            template: Some(format!(
                "{MONTECASTRILLI_BASE}mc_matri_gridev_dettaglio.php?x=1&id_pubbl={{1}}&interno={{2}}"
            )),
        }),
        extraction: Extraction::LabelValue {
            containers: vec!["tr".into()],
            label: "td:nth-child(1)".into(),
            value: "td:nth-child(2)".into(),
        },
        labels: LabelMap {
            matching: LabelMatch::Contains,
            upper_case: true,
            entries: vec![
                ("NUMERO PUBBLICAZIONE".into(), Field::Number),
                ("MITTENTE".into(), Field::Publisher),
                ("TIPO ATTO".into(), Field::Type),
                ("OGGETTO ATTO".into(), Field::Subject),
                ("DATA INIZIO PUBBLICAZIONE".into(), Field::DateStart),
                ("DATA FINE PUBBLICAZIONE".into(), Field::DateEnd),
            ],
        },
        attachments: AttachmentRules {
            source: AttachmentSource::LabelledRows {
                rows: "tr".into(),
                label: "DOCUMENT".into(),
                selector: "a[onclick]".into(),
                link: LinkSource::Onclick {
                    pattern: r"window.open\('(.*?)'\)".into(),
                },
            },
            base: Some(MONTECASTRILLI_BASE.into()),
            ..Default::default()
        },
        dates_required: 1,
        type_from_subject: false,
    }
}
