//! Extraction service: discovering, downloading and parsing articles.
//!
//! The orchestration layer only talks to the [`Extractor`] trait. The
//! production implementation, [`HttpExtractor`], follows a two-phase pattern:
//!
//! 1. **Discovery**: fetch the outlet's listing page or feed and collect
//!    article links
//! 2. **Extraction**: download each article and pull out title, body text,
//!    publish date and authors
//!
//! Listing pages may be HTML (links are read from `a[href]`) or RSS/Atom feeds
//! (links are read from `<item><link>` and `<entry><link href>`).

use crate::config::HttpSettings;
use crate::error::{ExtractionError, ValidationError};
use crate::models::{ContentFormat, Extracted, Outlet, RawContent, RawResource};
use crate::utils::collapse_whitespace;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Discovery, download and parsing of outlet content.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// List the article resources currently linked from an outlet.
    async fn discover(&self, outlet: &Outlet) -> Result<Vec<RawResource>, ExtractionError>;

    /// Download one resource.
    async fn fetch(&self, resource: &RawResource) -> Result<RawContent, ExtractionError>;

    /// Turn downloaded content into structured fields.
    fn normalize(&self, content: &RawContent) -> Result<Extracted, ValidationError>;
}

/// [`Extractor`] backed by `reqwest` and `scraper`.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl HttpExtractor {
    /// Build a client carrying the configured user agent, headers and timeout.
    ///
    /// Header entries that are not valid HTTP headers are logged and skipped.
    pub fn new(settings: &HttpSettings) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Ignoring invalid request header"),
            }
        }
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.timeout())
            .build()?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<(String, Option<String>), ExtractionError> {
        let http_err = |source| ExtractionError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(http_err)?;
        Ok((body, content_type))
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    #[instrument(level = "info", skip_all, fields(outlet = %outlet.name, url = %outlet.url))]
    async fn discover(&self, outlet: &Outlet) -> Result<Vec<RawResource>, ExtractionError> {
        let base = Url::parse(outlet.url.trim()).map_err(|source| ExtractionError::Url {
            url: outlet.url.clone(),
            source,
        })?;
        let (body, content_type) = self.get_text(base.as_str()).await?;

        let links = if looks_like_feed(content_type.as_deref(), &body) {
            feed_links(&body).map_err(|reason| ExtractionError::Parse {
                url: outlet.url.clone(),
                reason,
            })?
        } else {
            page_links(&body)
        };
        let resources = article_resources(&base, links);

        info!(count = resources.len(), "Discovered outlet articles");
        debug!(urls = ?resources.iter().map(|r| &r.url).collect::<Vec<_>>(), "Discovered URLs");
        Ok(resources)
    }

    #[instrument(level = "debug", skip_all, fields(url = %resource.url))]
    async fn fetch(&self, resource: &RawResource) -> Result<RawContent, ExtractionError> {
        let (body, _) = self.get_text(&resource.url).await?;
        debug!(bytes = body.len(), "Fetched article");
        Ok(RawContent {
            url: resource.url.clone(),
            body,
            format: ContentFormat::Html,
        })
    }

    fn normalize(&self, content: &RawContent) -> Result<Extracted, ValidationError> {
        match content.format {
            ContentFormat::Html => normalize_html(&content.body),
            ContentFormat::PlainText => normalize_plain_text(&content.body),
        }
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static H1: Lazy<Selector> = Lazy::new(|| selector("h1"));
static ARTICLE_PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("article p"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("p"));
static PUBLISHED_META: Lazy<Selector> = Lazy::new(|| {
    selector(r#"meta[property="article:published_time"], meta[name="pubdate"], meta[itemprop="datePublished"]"#)
});
static TIME_DATETIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static AUTHOR_META: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[name="author"], meta[property="article:author"]"#));

fn looks_like_feed(content_type: Option<&str>, body: &str) -> bool {
    let by_type = content_type.is_some_and(|ct| {
        ct.contains("rss") || ct.contains("atom") || ct.contains("/xml")
    });
    let head = body.trim_start();
    by_type || head.starts_with("<?xml") || head.starts_with("<rss") || head.starts_with("<feed")
}

fn page_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Links from RSS `<item><link>text</link>` and Atom `<entry><link href=".."/>`.
fn feed_links(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut links = Vec::new();
    let mut in_entry = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => in_entry = true,
                b"link" if in_entry => {
                    if let Some(href) = link_href(&e) {
                        links.push(href);
                        continue;
                    }
                    let span = reader.read_to_end(e.name()).map_err(|e| e.to_string())?;
                    let raw = &xml[span.start as usize..span.end as usize];
                    links.push(unescape_text(raw));
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if in_entry && e.local_name().as_ref() == b"link" => {
                if let Some(href) = link_href(&e) {
                    links.push(href);
                }
            }
            Ok(Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"item" | b"entry") {
                    in_entry = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("feed error at byte {}: {e}", reader.buffer_position())),
            _ => {}
        }
    }
    Ok(links)
}

fn link_href(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    let attr = e.try_get_attribute("href").ok().flatten()?;
    let raw = std::str::from_utf8(&attr.value).ok()?;
    Some(unescape_text(raw))
}

fn unescape_text(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(raw);
    quick_xml::escape::unescape(raw)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Resolve links against the outlet, keep same-host article-like paths, drop
/// fragments and duplicates.
fn article_resources(base: &Url, links: Vec<String>) -> Vec<RawResource> {
    links
        .into_iter()
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .filter(|u| u.host_str() == base.host_str())
        .map(|mut u| {
            u.set_fragment(None);
            u
        })
        .filter(|u| u.path() != base.path() && is_article_path(u))
        .map(|u| u.to_string())
        .unique()
        .map(RawResource::new)
        .collect()
}

fn is_article_path(url: &Url) -> bool {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    match segments.last() {
        None => false,
        Some(last) => segments.len() >= 2 || last.contains('-'),
    }
}

fn normalize_html(html: &str) -> Result<Extracted, ValidationError> {
    let document = Html::parse_document(html);

    let title = document
        .select(&OG_TITLE)
        .filter_map(|m| m.value().attr("content"))
        .map(str::to_string)
        .chain(document.select(&TITLE).map(|t| t.text().collect::<String>()))
        .chain(document.select(&H1).map(|h| h.text().collect::<String>()))
        .map(|t| collapse_whitespace(&t))
        .find(|t| !t.is_empty())
        .ok_or(ValidationError::MissingTitle)?;

    let mut paragraphs: Vec<String> = document
        .select(&ARTICLE_PARAGRAPH)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        paragraphs = document
            .select(&PARAGRAPH)
            .map(|p| collapse_whitespace(&p.text().collect::<String>()))
            .filter(|p| !p.is_empty())
            .collect();
    }
    if paragraphs.is_empty() {
        return Err(ValidationError::MissingText);
    }

    let publish_date = document
        .select(&PUBLISHED_META)
        .filter_map(|m| m.value().attr("content"))
        .chain(document.select(&TIME_DATETIME).filter_map(|t| t.value().attr("datetime")))
        .find_map(parse_date)
        .or_else(|| json_ld_date(&document));

    let authors = document
        .select(&AUTHOR_META)
        .filter_map(|m| m.value().attr("content"))
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unique()
        .collect();

    Ok(Extracted {
        title,
        text: paragraphs.join("\n\n"),
        publish_date,
        authors,
    })
}

fn json_ld_date(document: &Html) -> Option<DateTime<Utc>> {
    document.select(&JSON_LD).find_map(|script| {
        let raw = script.text().collect::<String>();
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        let candidates = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        candidates
            .iter()
            .filter_map(|v| v.get("datePublished").and_then(|d| d.as_str()))
            .find_map(parse_date)
    })
}

/// Plain text: the first non-empty line is the title, the whole text is the body.
fn normalize_plain_text(text: &str) -> Result<Extracted, ValidationError> {
    let text = collapse_whitespace(text);
    if text.is_empty() {
        return Err(ValidationError::MissingText);
    }
    let title = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(ValidationError::MissingTitle)?
        .to_string();
    Ok(Extracted {
        title,
        text,
        publish_date: None,
        authors: Vec::new(),
    })
}

/// RFC 3339 timestamps or bare `YYYY-MM-DD` dates.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|d| d.and_utc())
        })
}
