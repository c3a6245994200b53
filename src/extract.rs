use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tokio::task::spawn_blocking;
use url::Url;

use crate::browser::PageHandle;
use crate::record::Attachment;
use crate::site::{AttachmentRules, AttachmentSource, CellRead, Column, Extraction, LinkSource, SiteConfig};
use crate::{Error, Result};

/// `dd-mm-yyyy` with any single non-digit separator.
static DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2}\D\d{2}\D\d{4}").unwrap());
/// Size annotations such as `(34KB)`.
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([0-9a-zA-Z]+\)").unwrap());

/// Label/value pairs and attachments read from one page or table row,
/// before any site dictionary is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// Page the record was read from.
    pub url: Option<Url>,
    /// Page labels and their values, in document order.
    pub fields: Vec<(String, String)>,
    /// Dates found by pattern, left to right.
    pub dates: Vec<String>,
    /// Cleaned names, absolute links.
    pub attachments: Vec<Attachment>,
}

/// Parses the page off the runtime and extracts its raw records.
pub async fn extract_page(page: PageHandle, site: Arc<SiteConfig>) -> Result<Vec<RawRecord>> {
    let records = spawn_blocking(move || extract(&page, &site)).await??;
    Ok(records)
}

/// Extracts the raw records of a page. A page without the expected
/// structure yields no records.
pub fn extract(page: &PageHandle, site: &SiteConfig) -> Result<Vec<RawRecord>> {
    let doc = page.document();
    let base = attachment_base(page, &site.attachments)?;

    match &site.extraction {
        Extraction::LabelValue {
            containers,
            label,
            value,
        } => {
            let mut fields = Vec::new();
            for container in containers {
                fields.extend(label_value_pairs(&doc, container, label, value)?);
            }
            if fields.is_empty() {
                return Ok(Vec::new());
            }
            let attachments = attachments(doc.root_element(), &site.attachments, &base)?;
            Ok(vec![RawRecord {
                url: Some(page.url.clone()),
                fields,
                dates: Vec::new(),
                attachments,
            }])
        }
        Extraction::Table {
            rows,
            skip_header,
            columns,
        } => table_rows(&doc, page, site, &base, rows, *skip_header, columns),
    }
}

fn label_value_pairs(
    doc: &Html,
    container: &str,
    label: &str,
    value: &str,
) -> Result<Vec<(String, String)>> {
    let container_sel = create_selector(container)?;
    let label_sel = create_selector(label)?;
    let value_sel = create_selector(value)?;

    let mut pairs = Vec::new();
    for node in doc.select(&container_sel) {
        let labels = node.select(&label_sel).map(element_text);
        let values = node.select(&value_sel).map(element_text);
        pairs.extend(labels.zip(values).filter(|(label, _)| !label.is_empty()));
    }
    Ok(pairs)
}

fn table_rows(
    doc: &Html,
    page: &PageHandle,
    site: &SiteConfig,
    base: &Url,
    rows: &str,
    skip_header: bool,
    columns: &[Column],
) -> Result<Vec<RawRecord>> {
    let row_sel = create_selector(rows)?;
    let matched: Vec<ElementRef> = doc.select(&row_sel).collect();

    // Rows of tables nested inside a matched row belong to that row.
    let ids: HashSet<_> = matched.iter().map(|row| row.id()).collect();
    let mut rows = matched
        .into_iter()
        .filter(|row| !row.ancestors().any(|a| ids.contains(&a.id())));

    let header: Vec<String> = if skip_header {
        match rows.next() {
            Some(row) => cells(row).into_iter().map(element_text).collect(),
            None => return Ok(Vec::new()),
        }
    } else {
        Vec::new()
    };

    let mut records = Vec::new();
    for (n, row) in rows.enumerate() {
        let cells = cells(row);
        let mut raw = RawRecord {
            url: Some(page.url.clone()),
            ..Default::default()
        };
        let mut complete = true;

        for column in columns {
            let Some(cell) = cells.get(column.index).copied() else {
                tracing::warn!(row = n, column = column.index, url = %page.url, "row is missing a column, skipped");
                complete = false;
                break;
            };
            let label = column
                .label
                .clone()
                .or_else(|| header.get(column.index).cloned())
                .unwrap_or_else(|| format!("column{}", column.index));

            match column.read {
                CellRead::Text => raw.fields.push((label, element_text(cell))),
                CellRead::TextWithoutLinks => raw.fields.push((label, text_without_links(cell))),
                CellRead::Dates => raw.dates.extend(find_dates(&spaced_text(cell))),
                CellRead::Skip => {}
            }
            if column.attachments {
                raw.attachments
                    .extend(attachments(cell, &site.attachments, base)?);
            }
        }
        if complete {
            records.push(raw);
        }
    }
    Ok(records)
}

/// Direct `td`/`th` children of a row.
fn cells(row: ElementRef) -> Vec<ElementRef> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

fn attachment_base(page: &PageHandle, rules: &AttachmentRules) -> Result<Url> {
    match &rules.base {
        Some(base) => Ok(Url::parse(base)?),
        None => Ok(page.url.clone()),
    }
}

/// Collects `(name, link)` pairs inside `scope` in document order, then
/// cleans names and drops excluded or empty entries.
fn attachments(scope: ElementRef, rules: &AttachmentRules, base: &Url) -> Result<Vec<Attachment>> {
    let mut found: Vec<(String, String)> = Vec::new();

    match &rules.source {
        AttachmentSource::Anchors { selector, link } => {
            anchor_links(scope, selector, link, &mut found)?;
        }
        AttachmentSource::LabelledRows {
            rows,
            label,
            selector,
            link,
        } => {
            let row_sel = create_selector(rows)?;
            let label = label.to_uppercase();
            for row in scope.select(&row_sel) {
                let labelled = cells(row)
                    .first()
                    .is_some_and(|cell| element_text(*cell).to_uppercase().contains(&label));
                if labelled {
                    anchor_links(row, selector, link, &mut found)?;
                }
            }
        }
        AttachmentSource::Rows {
            rows,
            name_cell,
            link_cell,
        } => {
            let row_sel = create_selector(rows)?;
            let a_sel = create_selector("a[href]")?;
            for row in scope.select(&row_sel) {
                let cells = cells(row);
                let (Some(name), Some(link)) = (cells.get(*name_cell), cells.get(*link_cell)) else {
                    continue;
                };
                let href = link.select(&a_sel).next().and_then(|a| a.value().attr("href"));
                if let Some(href) = href {
                    found.push((element_text(*name), href.to_string()));
                }
            }
        }
        AttachmentSource::CellPairs { cells } => {
            let cell_sel = create_selector(cells)?;
            let a_sel = create_selector("a[href]")?;
            let cells: Vec<ElementRef> = scope.select(&cell_sel).collect();
            for pair in cells.chunks(2) {
                let [name, link] = pair else {
                    continue;
                };
                let href = link.select(&a_sel).last().and_then(|a| a.value().attr("href"));
                if let Some(href) = href {
                    found.push((element_text(*name), href.to_string()));
                }
            }
        }
    }

    let exclude = rules.exclude.as_deref().map(compile).transpose()?;
    let mut attachments = Vec::with_capacity(found.len());
    for (name, href) in found {
        let Some(name) = clean_attachment_name(&name, rules, exclude.as_ref()) else {
            continue;
        };
        let href = href.trim();
        if href.starts_with("javascript:") {
            tracing::warn!(%name, %href, "attachment behind a script link, skipped");
            continue;
        }
        let url = match base.join(href) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(%name, %href, "attachment link is malformed, skipped: {err}");
                continue;
            }
        };
        attachments.push(Attachment {
            name,
            url: url.to_string(),
        });
    }
    Ok(attachments)
}

/// `(name, link)` of every anchor matching `selector` inside `scope`.
fn anchor_links(
    scope: ElementRef,
    selector: &str,
    link: &LinkSource,
    found: &mut Vec<(String, String)>,
) -> Result<()> {
    let sel = create_selector(selector)?;
    let onclick = match link {
        LinkSource::Href => None,
        LinkSource::Onclick { pattern } => Some(compile(pattern)?),
    };
    for anchor in scope.select(&sel) {
        let attrs = anchor.value();
        let href = match &onclick {
            None => attrs.attr("href").map(str::to_string),
            Some(re) => attrs
                .attr("onclick")
                .and_then(|js| re.captures(js))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
        };
        if let Some(href) = href {
            found.push((element_text(anchor), href));
        }
    }
    Ok(())
}

/// Returns `None` when the entry must be dropped.
pub fn clean_attachment_name(
    name: &str,
    rules: &AttachmentRules,
    exclude: Option<&Regex>,
) -> Option<String> {
    let mut name = name.trim().to_string();
    if let Some(prefix) = &rules.strip_prefix {
        if let Some(rest) = name.strip_prefix(prefix.as_str()) {
            name = rest.to_string();
        }
    }
    if rules.strip_sizes {
        name = SIZE_RE.replace_all(&name, "").into_owned();
    }
    let name = collapse_ws(&name);

    if name.is_empty() || exclude.is_some_and(|re| re.is_match(&name)) {
        return None;
    }
    Some(name)
}

/// Every `dd-mm-yyyy` shaped substring, left to right.
pub fn find_dates(text: &str) -> Vec<String> {
    DATE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Text of a cell ignoring its anchors, read without touching the DOM.
///
/// `<br>` and block elements break lines; size annotations are removed;
/// the first line break becomes ` - ` and the rest collapse into spaces.
pub fn text_without_links(cell: ElementRef) -> String {
    let mut raw = String::new();
    collect_text(cell, &mut raw);
    let raw = SIZE_RE.replace_all(&raw, "");

    let lines: Vec<String> = raw
        .split('\n')
        .map(collapse_ws)
        .filter(|line| !line.is_empty())
        .collect();
    match lines.split_first() {
        None => String::new(),
        Some((first, [])) => first.clone(),
        Some((first, rest)) => format!("{first} - {}", rest.join(" ")),
    }
}

fn collect_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&text.replace('\n', " ")),
            Node::Element(e) => match e.name() {
                "a" => {}
                "br" => out.push('\n'),
                name => {
                    let block = matches!(name, "p" | "div" | "li");
                    if block {
                        out.push('\n');
                    }
                    if let Some(child) = ElementRef::wrap(child) {
                        collect_text(child, out);
                    }
                    if block {
                        out.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

/// Whitespace collapsed text of an element.
pub(crate) fn element_text(el: ElementRef) -> String {
    collapse_ws(&el.text().collect::<String>())
}

/// Text nodes joined with spaces, so adjacent values don't run together.
fn spaced_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[inline]
pub(crate) fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites;

    fn page(url: &str, html: &str) -> PageHandle {
        PageHandle::new(Url::parse(url).unwrap(), html)
    }

    fn first_cell(html: &str) -> String {
        let doc = Html::parse_fragment(html);
        let td = doc.select(&create_selector("td").unwrap()).next().unwrap();
        text_without_links(td)
    }

    #[test]
    fn dates_are_found_in_order() {
        assert_eq!(
            find_dates("dal 11-02-2016<br>al 31/12/2019 (n. 12345)"),
            vec!["11-02-2016", "31/12/2019"]
        );
        assert!(find_dates("nessuna data").is_empty());
    }

    #[test]
    fn subject_skips_links_and_sizes() {
        let html = r#"<table><tr><td>ALBO PRETORIO SITO WEB<br>DECRETO DI AGGIUDICAZIONE
            DEFINITIVA<br>
            <a href="f.pdf">20160211184907.pdf</a> (34KB)</td></tr></table>"#;
        assert_eq!(
            first_cell(html),
            "ALBO PRETORIO SITO WEB - DECRETO DI AGGIUDICAZIONE DEFINITIVA"
        );
    }

    #[test]
    fn subject_extraction_leaves_the_page_intact() {
        let html = r#"<table><tr><td>Gara <a href="a.pdf">a.pdf</a></td></tr></table>"#;
        let doc = Html::parse_fragment(html);
        let td = doc.select(&create_selector("td").unwrap()).next().unwrap();
        assert_eq!(text_without_links(td), "Gara");
        assert_eq!(element_text(td), "Gara a.pdf");
    }

    #[test]
    fn signed_and_empty_names_are_dropped() {
        let rules = sites::umbria().attachments;
        let exclude = compile(rules.exclude.as_deref().unwrap()).unwrap();
        assert_eq!(
            clean_attachment_name(" - Parte prima ", &rules, Some(&exclude)),
            Some("Parte prima".into())
        );
        assert_eq!(
            clean_attachment_name("- Bollettino firmato digitalmente", &rules, Some(&exclude)),
            None
        );
        assert_eq!(clean_attachment_name("  ", &rules, Some(&exclude)), None);
    }

    #[test]
    fn sizes_are_stripped_when_asked() {
        let rules = sites::defilis().attachments;
        assert_eq!(
            clean_attachment_name("decreto.pdf (34KB)", &rules, None),
            Some("decreto.pdf".into())
        );
    }

    #[test]
    fn table_rows_skip_header_and_read_columns() {
        let site = sites::defilis();
        let html = r#"<html><body><table>
            <tr><th>N.Reg</th><th>Data</th><th>Oggetto</th><th>Date</th></tr>
            <tr><td>42</td><td>11-02-2016</td>
                <td>BANDO<br>Affidamento servizio<br><a href="/doc/a.pdf">a.pdf</a> (12KB) <a href="b.pdf">b.pdf</a></td>
                <td>11-02-2016<br>31-12-2019</td></tr>
            <tr><td>43</td></tr>
        </table></body></html>"#;
        let records = extract(&page("http://scuola.example/albo/list.php", html), &site).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(
            rec.fields,
            vec![
                ("N.Reg".to_string(), "42".to_string()),
                ("Oggetto".to_string(), "BANDO - Affidamento servizio".to_string()),
            ]
        );
        assert_eq!(rec.dates, vec!["11-02-2016", "31-12-2019"]);
        let names: Vec<_> = rec.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert_eq!(rec.attachments[0].url, "http://scuola.example/doc/a.pdf");
        assert_eq!(rec.attachments[1].url, "http://scuola.example/albo/b.pdf");
    }

    #[test]
    fn malformed_attachment_link_is_skipped() {
        let site = sites::defilis();
        let html = r#"<html><body><table>
            <tr><th>N.Reg</th><th>Data</th><th>Oggetto</th><th>Date</th></tr>
            <tr><td>1</td><td></td><td>Primo <a href="ok.pdf">ok.pdf</a></td><td>01-01-2020 02-01-2020</td></tr>
            <tr><td>2</td><td></td><td>Secondo <a href="http://">rotto.pdf</a></td><td>01-01-2020 02-01-2020</td></tr>
        </table></body></html>"#;
        let records = extract(&page("http://scuola.example/albo/list.php", html), &site).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attachments[0].url, "http://scuola.example/albo/ok.pdf");
        assert!(records[1].attachments.is_empty());
    }

    #[test]
    fn nested_rows_are_part_of_their_outer_row() {
        let site = sites::umbria();
        let html = r#"<html><body><div id="cphBody_PannelloRisultati"><table>
            <tr><td>Serie generale n. 1
                <table>
                    <tr><td>- Parte prima</td><td><a href="x.pdf">pdf</a><a href="p1.pdf">pdf</a></td></tr>
                    <tr><td>- Firmato digitalmente</td><td><a href="s.p7m">p7m</a></td></tr>
                    <tr><td></td><td><a href="e.pdf">pdf</a></td></tr>
                </table>
            </td></tr>
            <tr><td>Serie generale n. 2</td></tr>
        </table></div></body></html>"#;
        let records = extract(
            &page("http://www2.regione.umbria.it/bollettini/consultazione.aspx?parte=1", html),
            &site,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attachments.len(), 1);
        assert_eq!(records[0].attachments[0].name, "Parte prima");
        assert_eq!(
            records[0].attachments[0].url,
            "http://www2.regione.umbria.it/bollettini/p1.pdf"
        );
        assert!(records[1].attachments.is_empty());
        assert_eq!(records[1].fields[0].1, "Serie generale n. 2");
    }

    #[test]
    fn label_value_containers_build_one_record() {
        let site = sites::acquasparta();
        let html = r#"<html><body>
            <div class="testata"><span class="infolabel">Ente Mittente</span><span class="infodato">Comune</span></div>
            <div class="dettaglio">
                <span class="infolabel">N.Reg</span><span class="infodato">101</span>
                <span class="infolabel">Oggetto</span><span class="infodato">Avviso</span>
            </div>
            <table>
                <tr><th>Allegato</th><th></th></tr>
                <tr><td>avviso.pdf</td><td><a href="ur1ME002.sto?file=1">scarica</a></td></tr>
            </table>
        </body></html>"#;
        let records = extract(&page("http://asp.urbi.it/urbi/progs/urp/detail", html), &site).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.fields.len(), 3);
        assert_eq!(rec.fields[0], ("Ente Mittente".into(), "Comune".into()));
        assert_eq!(
            rec.attachments,
            vec![Attachment {
                name: "avviso.pdf".into(),
                url: "http://asp.urbi.it/urbi/progs/urp/ur1ME002.sto?file=1".into(),
            }]
        );
    }

    #[test]
    fn page_without_structure_yields_nothing() {
        let html = "<html><body><p>Manutenzione in corso</p></body></html>";
        for site in [sites::acquasparta(), sites::defilis(), sites::umbria()] {
            let records = extract(&page("http://example.org/", html), &site).unwrap();
            assert!(records.is_empty(), "{} found records", site.key);
        }
    }

    #[test]
    fn onclick_links_are_read_from_the_documents_row() {
        let site = sites::montecastrilli();
        let html = r##"<html><body><table>
            <tr><td>Numero pubblicazione</td><td>7</td></tr>
            <tr><td>Documenti</td><td><a href="#" onclick="window.open('docs/atto.pdf')">atto.pdf</a></td></tr>
            <tr><td>Stampa</td><td><a href="#" onclick="window.open('stampa.php')">stampa</a></td></tr>
        </table></body></html>"##;
        let records = extract(&page("http://halleyweb.com/c055017/mc/detail.php", html), &site).unwrap();
        assert_eq!(
            records[0].attachments,
            vec![Attachment {
                name: "atto.pdf".into(),
                url: "http://halleyweb.com/c055017/mc/docs/atto.pdf".into(),
            }]
        );
    }
}
