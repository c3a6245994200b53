use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regscrape::browser::{Browser, PageHandle};
use regscrape::config::Settings;
use regscrape::process::{scrape, write_records};
use regscrape::site::{Action, SiteConfig, Wait};
use regscrape::{sites, Error, Result};
use url::Url;

/// In-memory browser: urls map to fixed pages, clicks map to the page they lead to.
#[derive(Default)]
struct FakeBrowser {
    pages: HashMap<String, String>,
    clicks: HashMap<String, String>,
    current: Option<PageHandle>,
    opened: Vec<String>,
    /// Snapshots served before `late` replaces the current page.
    late: Option<(usize, String)>,
    snapshots: usize,
    hang_on_click: bool,
}

impl FakeBrowser {
    fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    fn click_to(mut self, selector: &str, url: &str) -> Self {
        self.clicks.insert(selector.to_string(), url.to_string());
        self
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn open(&mut self, url: &Url) -> Result<()> {
        let html = self
            .pages
            .get(url.as_str())
            .ok_or_else(|| Error::Browser(format!("404 {url}")))?;
        self.current = Some(PageHandle::new(url.clone(), html.clone()));
        self.opened.push(url.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        if self.hang_on_click {
            std::future::pending::<()>().await;
        }
        let target = self
            .clicks
            .get(selector)
            .cloned()
            .ok_or_else(|| Error::Browser(format!("no element matches `{selector}`")))?;
        self.open(&Url::parse(&target)?).await
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Bool(true))
    }

    async fn snapshot(&mut self) -> Result<PageHandle> {
        self.snapshots += 1;
        let mut page = self.current.clone().ok_or(Error::NoPage)?;
        if let Some((after, html)) = &self.late {
            if self.snapshots > *after {
                page.html = html.clone();
            }
        }
        Ok(page)
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}

const LIST_URL: &str = "http://albo.example/list";

/// A table register: number, subject, dates and attachments in fixed columns.
fn table_site() -> SiteConfig {
    serde_json::from_str(
        r#"{
            "key": "table",
            "source": "Albo di prova",
            "publisher": "Comune di Prova",
            "script": [{"action": "open", "url": "http://albo.example/list"}],
            "extraction": {
                "shape": "table",
                "rows": "tr",
                "skip_header": true,
                "columns": [
                    {"index": 0},
                    {"index": 1, "read": "text_without_links"},
                    {"index": 2, "read": "dates"},
                    {"index": 3, "read": "skip", "attachments": true}
                ]
            },
            "labels": {"entries": [["N.Reg", "number"], ["Oggetto", "subject"]]},
            "dates_required": 2,
            "type_from_subject": true
        }"#,
    )
    .unwrap()
}

fn settings() -> Settings {
    Settings {
        action_timeout_ms: 1_000,
        poll_interval_ms: 50,
        ..Default::default()
    }
}

#[tokio::test]
async fn table_rows_become_records() {
    let html = r#"<html><body><table>
        <tr><th>N.Reg</th><th>Oggetto</th><th>Date</th><th>Allegati</th></tr>
        <tr><td>123</td><td>Gara appalto</td><td>01-01-2020 al 31-01-2020</td><td><a href="files/doc.pdf">doc.pdf</a></td></tr>
        <tr><td>124</td><td>BANDO - Affidamento servizio</td><td>02-01-2020</td><td></td></tr>
        <tr><td>125</td><td>AVVISO - Chiusura uffici</td><td>03-01-2020<br>10-01-2020</td><td></td></tr>
    </table></body></html>"#;
    let mut browser = FakeBrowser::default().page(LIST_URL, html);

    let records = scrape(&mut browser, Arc::new(table_site()), None, &settings())
        .await
        .unwrap();

    // The row with a single date is dropped, its siblings stay in page order.
    assert_eq!(records.len(), 2);
    let first = &records[0];
    assert_eq!(first.number.as_deref(), Some("123"));
    assert!(first.subject.contains("Gara appalto"));
    assert_eq!(first.date_start.as_deref(), Some("2020-01-01"));
    assert_eq!(first.date_end.as_deref(), Some("2020-01-31"));
    assert_eq!(first.attachments.len(), 1);
    assert_eq!(first.attachments[0].name, "doc.pdf");
    assert_eq!(first.attachments[0].url, "http://albo.example/files/doc.pdf");
    assert_eq!(first.url, LIST_URL);
    assert_eq!(first.publisher, "Comune di Prova");

    let second = &records[1];
    assert_eq!(second.number.as_deref(), Some("125"));
    assert_eq!(second.pub_type.as_deref(), Some("AVVISO"));
    assert_eq!(second.subject, "AVVISO - Chiusura uffici");
}

#[tokio::test]
async fn broken_attachment_link_keeps_the_run_going() {
    let html = r#"<html><body><table>
        <tr><th>N.Reg</th><th>Oggetto</th><th>Date</th><th>Allegati</th></tr>
        <tr><td>1</td><td>Primo</td><td>01-01-2020 02-01-2020</td><td><a href="ok.pdf">ok.pdf</a></td></tr>
        <tr><td>2</td><td>Secondo</td><td>01-01-2020 02-01-2020</td><td><a href="http://">rotto.pdf</a></td></tr>
    </table></body></html>"#;
    let mut browser = FakeBrowser::default().page(LIST_URL, html);

    let records = scrape(&mut browser, Arc::new(table_site()), None, &settings())
        .await
        .unwrap();

    let subjects: Vec<_> = records.iter().map(|r| r.subject.as_str()).collect();
    assert_eq!(subjects, vec!["Primo", "Secondo"]);
    assert_eq!(records[0].attachments[0].url, "http://albo.example/ok.pdf");
    assert!(records[1].attachments.is_empty());
}

#[tokio::test]
async fn empty_listing_gives_an_empty_array() {
    let mut browser = FakeBrowser::default().page(LIST_URL, "<html><body><p>Nessun atto</p></body></html>");

    let records = scrape(&mut browser, Arc::new(table_site()), None, &settings())
        .await
        .unwrap();
    assert!(records.is_empty());

    let mut out = Vec::new();
    write_records(&mut out, &records, false).unwrap();
    assert_eq!(out, b"[]\n");
}

#[tokio::test]
async fn detail_pages_are_followed_in_order() {
    let site = sites::acquasparta();
    let start = "http://asp.urbi.it/urbi/progs/urp/ur1ME002.sto?DB_NAME=n1201560";
    let results = "http://asp.urbi.it/urbi/progs/urp/results";
    let detail = |id: &str| format!("{start}&StwEvent=102&IdMePubblica={id}&Archivio=");
    let detail_html = |reg: &str, subject: &str| {
        format!(
            r#"<html><body>
            <div class="testata"><span class="infolabel">Ente Mittente</span><span class="infodato">Comune di Acquasparta</span></div>
            <div class="dettaglio">
                <span class="infolabel">N.Reg</span><span class="infodato">{reg}</span>
                <span class="infolabel">Oggetto</span><span class="infodato">{subject}</span>
                <span class="infolabel">In Pubblicazione dal</span><span class="infodato">01/03/2020</span>
                <span class="infolabel">al</span><span class="infodato">16/03/2020</span>
                <span class="infolabel">Protocollo</span><span class="infodato">P-{reg}</span>
            </div>
            <table><tr><td>atto-{reg}.pdf</td><td><a href="ur1ME002.sto?doc={reg}">scarica</a></td></tr></table>
            </body></html>"#
        )
    };

    let mut browser = FakeBrowser::default()
        .page(start, "<html><body><form></form></body></html>")
        .page(
            results,
            r#"<a class="bottoneprova" href="javascript:Dettagli(7,'');">7</a>
               <a class="bottoneprova" href="javascript:Dettagli(3,'');">3</a>"#,
        )
        .page(&detail("7"), &detail_html("7", "Ordinanza viabilità"))
        .page(&detail("3"), &detail_html("3", "Avviso pubblico"))
        .click_to(".pulsante", results);
    // The radio button click only changes form state.
    if let Action::Click { selector } = &site.script[1] {
        browser = browser.click_to(selector, start);
    }

    let records = scrape(&mut browser, Arc::new(site), None, &settings())
        .await
        .unwrap();

    let numbers: Vec<_> = records.iter().map(|r| r.number.as_deref().unwrap()).collect();
    assert_eq!(numbers, vec!["7", "3"]);
    assert_eq!(records[0].url, detail("7"));
    assert_eq!(records[0].date_start.as_deref(), Some("2020-03-01"));
    assert_eq!(records[0].extra.get("protocollo").map(String::as_str), Some("P-7"));
    assert_eq!(
        records[1].attachments[0].url,
        "http://asp.urbi.it/urbi/progs/urp/ur1ME002.sto?doc=3"
    );
    assert_eq!(browser.opened.last().map(String::as_str), Some(detail("3").as_str()));
}

#[tokio::test]
async fn variant_is_substituted_into_the_start_url() {
    let mut site = sites::umbria();
    site.script.truncate(1);
    let url = "http://www2.regione.umbria.it/bollettini/consultazione.aspx?parte=2";
    let mut browser = FakeBrowser::default().page(url, "<html></html>");

    let records = scrape(&mut browser, Arc::new(site), Some("2"), &settings())
        .await
        .unwrap();
    assert!(records.is_empty());
    assert_eq!(browser.opened, vec![url.to_string()]);
}

#[tokio::test]
async fn unreachable_page_fails_the_run() {
    let mut browser = FakeBrowser::default();
    let err = scrape(&mut browser, Arc::new(table_site()), None, &settings())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Navigation { step: 0, .. }), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn hanging_step_times_out() {
    let mut site = table_site();
    site.script.push(Action::Click {
        selector: "#never".into(),
    });
    let mut browser = FakeBrowser {
        hang_on_click: true,
        ..Default::default()
    }
    .page(LIST_URL, "<html></html>");

    let err = scrape(&mut browser, Arc::new(site), None, &settings())
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::NavigationTimeout { step: 1, timeout_ms: 1_000 }),
        "{err:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn wait_for_selector_polls_until_content_appears() {
    let mut site = table_site();
    site.script.push(Action::WaitFor {
        until: Wait::Selector("table tr td".into()),
    });
    let rendered = r#"<html><body><table>
        <tr><th>N.Reg</th><th>Oggetto</th><th>Date</th><th>Allegati</th></tr>
        <tr><td>9</td><td>Avviso</td><td>01-01-2020 31-01-2020</td><td></td></tr>
    </table></body></html>"#;
    let mut browser = FakeBrowser {
        late: Some((3, rendered.to_string())),
        ..Default::default()
    }
    .page(LIST_URL, "<html><body>Caricamento...</body></html>");

    let records = scrape(&mut browser, Arc::new(site), None, &settings())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].number.as_deref(), Some("9"));
    assert!(browser.snapshots > 3);
}

#[tokio::test(start_paused = true)]
async fn wait_for_selector_gives_up_after_the_timeout() {
    let mut site = table_site();
    site.script.push(Action::WaitFor {
        until: Wait::Selector("table".into()),
    });
    let mut browser = FakeBrowser::default().page(LIST_URL, "<html></html>");

    let err = scrape(&mut browser, Arc::new(site), None, &settings())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NavigationTimeout { step: 1, .. }), "{err:?}");
}
