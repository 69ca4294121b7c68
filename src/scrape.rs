//! Page scraping: fetch a URL and reduce its HTML to plain text.
//!
//! HTML is walked with `quick-xml` in a lenient configuration (mismatched
//! and unmatched end tags tolerated). `<script>`, `<style>` and `<noscript>`
//! contents are dropped and whitespace is collapsed to single spaces.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed with status {status}")]
    Fetch { status: u16 },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Source of article text for a URL.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String, ScrapeError>;
}

/// Require an `http`/`https` scheme and a non-empty host.
pub fn validate_url(raw: &str) -> Result<Url, ScrapeError> {
    let url = Url::parse(raw).map_err(|_| ScrapeError::InvalidUrl(raw.to_string()))?;
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    if !matches!(url.scheme(), "http" | "https") || !has_host {
        return Err(ScrapeError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pagewise/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<String, ScrapeError> {
        let url = validate_url(url)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Fetch {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        Ok(html_to_text(&body))
    }
}

const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Remove raw-text elements whose bodies are not markup (`<script>` may
/// contain a bare `<`, which would derail the event reader).
fn strip_raw_blocks(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    'scan: while pos < html.len() {
        let next = SKIPPED_ELEMENTS
            .iter()
            .filter_map(|tag| {
                lower[pos..]
                    .find(&format!("<{}", tag))
                    .map(|i| (pos + i, *tag))
            })
            .min_by_key(|(i, _)| *i);

        let Some((start, tag)) = next else {
            break 'scan;
        };
        out.push_str(&html[pos..start]);

        let close = format!("</{}", tag);
        match lower[start..].find(&close) {
            Some(rel) => {
                let close_start = start + rel;
                pos = match lower[close_start..].find('>') {
                    Some(gt) => close_start + gt + 1,
                    None => html.len(),
                };
                out.push(' ');
            }
            None => {
                pos = html.len();
            }
        }
    }

    if pos < html.len() {
        out.push_str(&html[pos..]);
    }
    out
}

/// Extract visible text from an HTML document.
pub fn html_to_text(html: &str) -> String {
    let cleaned = strip_raw_blocks(html);
    let mut reader = quick_xml::Reader::from_str(&cleaned);
    {
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if is_skipped(name.as_ref()) {
                    skip_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if is_skipped(name.as_ref()) {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
            Ok(Event::Text(t)) if skip_depth == 0 => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                pieces.push(text);
            }
            Ok(Event::CData(t)) if skip_depth == 0 => {
                pieces.push(String::from_utf8_lossy(&t).into_owned());
            }
            Ok(Event::Eof) => break,
            // Malformed markup past this point; keep what was read.
            Err(_) => break,
            _ => {}
        }
    }

    pieces
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_skipped(name: &[u8]) -> bool {
    SKIPPED_ELEMENTS
        .iter()
        .any(|tag| name.eq_ignore_ascii_case(tag.as_bytes()))
}
