use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use scraper::ElementRef;
use url::Url;

use super::{Browser, PageHandle};
use crate::extract::create_selector;
use crate::{Error, Result};

const DRIVER: &str = "http";

/// A browser without a script engine: pages are fetched with reqwest and
/// clicks are replayed as link follows or HTML form submissions.
pub struct HttpBrowser {
    client: Client,
    current: Option<PageHandle>,
    /// Radio and checkbox state changed by clicks since the last load.
    toggled: Vec<(String, String)>,
}

/// What clicking an element amounts to without running scripts.
#[derive(Debug, PartialEq, Eq)]
enum ClickTarget {
    Follow(Url),
    Submit {
        method: Method,
        action: Url,
        fields: Vec<(String, String)>,
    },
    Toggle {
        name: String,
        value: String,
    },
}

impl HttpBrowser {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            current: None,
            toggled: Vec::new(),
        })
    }

    async fn load(&mut self, request: RequestBuilder) -> Result<()> {
        let res = request.send().await?.error_for_status()?;
        let url = res.url().clone();
        let html = res.text().await?;
        tracing::debug!(%url, bytes = html.len(), "page loaded");
        self.current = Some(PageHandle::new(url, html));
        self.toggled.clear();
        Ok(())
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    fn name(&self) -> &'static str {
        DRIVER
    }

    async fn open(&mut self, url: &Url) -> Result<()> {
        let request = self.client.get(url.clone());
        self.load(request).await
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let page = self.current.as_ref().ok_or(Error::NoPage)?;
        let target = click_target(page, selector, &self.toggled)?;
        match target {
            ClickTarget::Follow(url) => self.open(&url).await,
            ClickTarget::Submit {
                method,
                action,
                fields,
            } => {
                let request = if method == Method::POST {
                    self.client.post(action).form(&fields)
                } else {
                    self.client.get(action).query(&fields)
                };
                self.load(request).await
            }
            ClickTarget::Toggle { name, value } => {
                self.toggled.retain(|(n, _)| *n != name);
                self.toggled.push((name, value));
                Ok(())
            }
        }
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value> {
        Err(Error::Unsupported {
            driver: DRIVER,
            action: "evaluate scripts".into(),
        })
    }

    async fn snapshot(&mut self) -> Result<PageHandle> {
        self.current.clone().ok_or(Error::NoPage)
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}

fn click_target(
    page: &PageHandle,
    selector: &str,
    toggled: &[(String, String)],
) -> Result<ClickTarget> {
    let doc = page.document();
    let sel = create_selector(selector)?;
    let element = doc
        .select(&sel)
        .next()
        .ok_or_else(|| Error::Browser(format!("no element matches `{selector}`")))?;
    let attrs = element.value();

    if attrs.name() == "a" {
        let href = attrs.attr("href").unwrap_or_default().trim();
        if href.is_empty() || href.starts_with("javascript:") {
            return Err(Error::Unsupported {
                driver: DRIVER,
                action: format!("follow script link `{selector}`"),
            });
        }
        return Ok(ClickTarget::Follow(page.url.join(href)?));
    }

    let input_type = attrs
        .attr("type")
        .unwrap_or_default()
        .to_ascii_lowercase();
    if attrs.name() == "input" && matches!(input_type.as_str(), "radio" | "checkbox") {
        let name = attrs.attr("name").ok_or_else(|| {
            Error::Browser(format!("`{selector}` has no name to toggle"))
        })?;
        return Ok(ClickTarget::Toggle {
            name: name.to_string(),
            value: attrs.attr("value").unwrap_or("on").to_string(),
        });
    }

    let form = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .ok_or_else(|| Error::Unsupported {
            driver: DRIVER,
            action: format!("click `{selector}` outside of a form"),
        })?;

    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    };
    let action = match form.value().attr("action") {
        Some(a) if !a.trim().is_empty() => page.url.join(a.trim())?,
        _ => page.url.clone(),
    };

    let mut fields = form_fields(form, toggled)?;
    if let Some(name) = attrs.attr("name") {
        fields.push((
            name.to_string(),
            attrs.attr("value").unwrap_or_default().to_string(),
        ));
    }
    Ok(ClickTarget::Submit {
        method,
        action,
        fields,
    })
}

/// The successful controls of a form, as a browser would submit them.
fn form_fields(
    form: ElementRef,
    toggled: &[(String, String)],
) -> Result<Vec<(String, String)>> {
    let controls = create_selector("input[name], select[name], textarea[name]")?;
    let options = create_selector("option")?;
    let mut fields = Vec::new();

    for control in form.select(&controls) {
        let attrs = control.value();
        let Some(name) = attrs.attr("name") else {
            continue;
        };
        if attrs.attr("disabled").is_some() {
            continue;
        }
        match attrs.name() {
            "select" => {
                let chosen = control
                    .select(&options)
                    .find(|o| o.value().attr("selected").is_some())
                    .or_else(|| control.select(&options).next());
                if let Some(option) = chosen {
                    let value = option
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
                    fields.push((name.to_string(), value));
                }
            }
            "textarea" => fields.push((name.to_string(), control.text().collect())),
            _ => {
                let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
                let value = attrs.attr("value").unwrap_or_default();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => {}
                    "radio" | "checkbox" => {
                        let checked = match toggled.iter().find(|(n, _)| n == name) {
                            Some((_, v)) => v == value || (value.is_empty() && v == "on"),
                            None => attrs.attr("checked").is_some(),
                        };
                        if checked {
                            let value = if value.is_empty() { "on" } else { value };
                            fields.push((name.to_string(), value.to_string()));
                        }
                    }
                    _ => fields.push((name.to_string(), value.to_string())),
                }
            }
        }
    }
    Ok(fields)
}
