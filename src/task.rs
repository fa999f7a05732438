//! The per-resource unit of work.
//!
//! An [`ItemTask`] turns one discovered resource into a validated [`Article`]:
//!
//! 1. fetch and normalize through the [`Extractor`]
//! 2. if normalizing fails, strip the page to plain text and normalize once more
//! 3. require more than [`MIN_TEXT_LEN`] characters of text
//! 4. fingerprint the content and tag it with outlet and category
//!
//! There are no retries beyond the single plain-text fallback.

use crate::error::{ExtractionError, TaskError, ValidationError};
use crate::extract::Extractor;
use crate::models::{Article, ContentFormat, Extracted, RawContent, RawResource, MIN_TEXT_LEN};
use crate::utils::{collapse_whitespace, truncate_for_log};
use scraper::Html;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct ItemTask {
    extractor: Arc<dyn Extractor>,
    outlet_name: Arc<str>,
}

impl ItemTask {
    pub fn new(extractor: Arc<dyn Extractor>, outlet_name: &str) -> Self {
        Self {
            extractor,
            outlet_name: Arc::from(outlet_name),
        }
    }

    #[instrument(level = "debug", skip_all, fields(outlet = %self.outlet_name, url = %resource.url))]
    pub async fn execute(&self, resource: &RawResource) -> Result<Article, TaskError> {
        let content = self.extractor.fetch(resource).await?;
        let extracted = self.normalize_with_fallback(&content)?;
        validate_text(&extracted.text)?;

        let article = Article::from_extracted(extracted, &resource.url, &self.outlet_name);
        debug!(id = %article.id, title = %truncate_for_log(&article.title, 40), "Built article");
        Ok(article)
    }

    fn normalize_with_fallback(&self, content: &RawContent) -> Result<Extracted, ExtractionError> {
        match self.extractor.normalize(content) {
            Ok(extracted) => Ok(extracted),
            Err(e) => {
                warn!(url = %content.url, error = %e, "Normalize failed; retrying on plain text");
                let stripped = strip_to_plain_text(content);
                self.extractor
                    .normalize(&stripped)
                    .map_err(|source| ExtractionError::Fallback {
                        url: content.url.clone(),
                        source,
                    })
            }
        }
    }
}

pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    let len = text.chars().count();
    if len > MIN_TEXT_LEN {
        Ok(())
    } else {
        Err(ValidationError::TextTooShort {
            len,
            min: MIN_TEXT_LEN,
        })
    }
}

/// Replace markup with the document's visible text, one block per line.
pub fn strip_to_plain_text(content: &RawContent) -> RawContent {
    let text = match content.format {
        ContentFormat::PlainText => content.body.clone(),
        ContentFormat::Html => {
            let document = Html::parse_document(&content.body);
            document
                .root_element()
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    RawContent {
        url: content.url.clone(),
        body: collapse_whitespace(&text),
        format: ContentFormat::PlainText,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted extractor shared by the task, pool, orchestrator and runner tests.

    use super::*;
    use crate::models::Outlet;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// What the scripted extractor does for one URL.
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Serve a page that normalizes to this title and text.
        Article { title: String, text: String },
        /// Serve a page that only the plain-text fallback can read.
        NeedsFallback(String),
        /// Fail the download.
        FetchError,
        /// Serve a page that normalizes to nothing, even after the fallback.
        Garbage,
        /// Panic inside the worker.
        Panic,
    }

    pub fn article(title: &str, text: &str) -> Script {
        Script::Article {
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    #[derive(Default)]
    pub struct ScriptedExtractor {
        pub listings: HashMap<String, Result<Vec<String>, String>>,
        pub pages: HashMap<String, Script>,
        pub delays: HashMap<String, Duration>,
        pub fetched: Mutex<Vec<String>>,
        pub panic_on_discover: bool,
    }

    impl ScriptedExtractor {
        pub fn with_listing(mut self, outlet_url: &str, pages: Vec<(&str, Script)>) -> Self {
            self.listings.insert(
                outlet_url.to_string(),
                Ok(pages.iter().map(|(u, _)| u.to_string()).collect()),
            );
            for (url, script) in pages {
                self.pages.insert(url.to_string(), script);
            }
            self
        }

        pub fn with_failing_listing(mut self, outlet_url: &str) -> Self {
            self.listings
                .insert(outlet_url.to_string(), Err("listing unavailable".to_string()));
            self
        }

        pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        async fn discover(&self, outlet: &Outlet) -> Result<Vec<RawResource>, ExtractionError> {
            if self.panic_on_discover {
                panic!("discovery exploded");
            }
            match self.listings.get(&outlet.url) {
                Some(Ok(urls)) => Ok(urls.iter().map(RawResource::new).collect()),
                Some(Err(reason)) => Err(ExtractionError::Parse {
                    url: outlet.url.clone(),
                    reason: reason.clone(),
                }),
                None => Err(ExtractionError::Parse {
                    url: outlet.url.clone(),
                    reason: "no listing".to_string(),
                }),
            }
        }

        async fn fetch(&self, resource: &RawResource) -> Result<RawContent, ExtractionError> {
            if let Some(delay) = self.delays.get(&resource.url) {
                tokio::time::sleep(*delay).await;
            }
            self.fetched.lock().unwrap().push(resource.url.clone());
            let body = match self.pages.get(&resource.url) {
                Some(Script::Article { title, text }) => {
                    format!("<html><head><title>{title}</title></head><body><p>{text}</p></body></html>")
                }
                Some(Script::NeedsFallback(text)) => format!("<html><body><div>{text}</div></body></html>"),
                Some(Script::Garbage) => String::new(),
                Some(Script::Panic) => panic!("worker exploded"),
                Some(Script::FetchError) | None => {
                    return Err(ExtractionError::Parse {
                        url: resource.url.clone(),
                        reason: "connection reset".to_string(),
                    });
                }
            };
            Ok(RawContent {
                url: resource.url.clone(),
                body,
                format: ContentFormat::Html,
            })
        }

        fn normalize(&self, content: &RawContent) -> Result<Extracted, ValidationError> {
            match content.format {
                ContentFormat::Html => {
                    let document = Html::parse_document(&content.body);
                    let title = document
                        .select(&scraper::Selector::parse("title").unwrap())
                        .map(|t| t.text().collect::<String>())
                        .next()
                        .ok_or(ValidationError::MissingTitle)?;
                    let text = document
                        .select(&scraper::Selector::parse("p").unwrap())
                        .map(|p| p.text().collect::<String>())
                        .next()
                        .ok_or(ValidationError::MissingText)?;
                    Ok(Extracted {
                        title,
                        text,
                        ..Extracted::default()
                    })
                }
                ContentFormat::PlainText => {
                    if content.body.trim().is_empty() {
                        return Err(ValidationError::MissingText);
                    }
                    Ok(Extracted {
                        title: "Recovered".to_string(),
                        text: content.body.clone(),
                        ..Extracted::default()
                    })
                }
            }
        }
    }
}
