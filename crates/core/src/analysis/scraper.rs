//! # Reference Scraper
//!
//! Fetches stage reference URLs and reduces each page to a title plus
//! readable text. A failed fetch never blocks an analysis: it becomes an
//! inline placeholder in the prompt instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

/// Characters of page text kept per URL
pub const MAX_SCRAPED_CHARS: usize = 15_000;

/// Resolves a reference URL to prompt-ready text
#[async_trait]
pub trait ReferenceFetcher: Send + Sync {
    /// Always returns text; failures are reported inline
    async fn fetch(&self, url: &str) -> String;
}

/// Placeholder inserted in place of a page that could not be fetched
pub fn failure_placeholder(url: &str, error: &str) -> String {
    format!("[FAILED TO SCRAPE URL: {} - Error: {}]", url, error)
}

static NOISE_BLOCKS: OnceLock<Regex> = OnceLock::new();
static TAGS: OnceLock<Regex> = OnceLock::new();
static WHITESPACE: OnceLock<Regex> = OnceLock::new();
static TITLE: OnceLock<Regex> = OnceLock::new();

/// Page title and collapsed body text
pub fn extract_readable(html: &str) -> (Option<String>, String) {
    let title = TITLE
        .get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap())
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|t| !t.is_empty());

    let without_noise = NOISE_BLOCKS
        .get_or_init(|| {
            Regex::new(r"(?is)<(script|style|noscript|svg|head|nav|footer)\b[^>]*>.*?</(script|style|noscript|svg|head|nav|footer)>").unwrap()
        })
        .replace_all(html, " ");
    let text = TAGS
        .get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap())
        .replace_all(&without_noise, " ");
    let text = decode_entities(&text);
    let text = WHITESPACE
        .get_or_init(|| Regex::new(r"\s+").unwrap())
        .replace_all(&text, " ")
        .trim()
        .to_string();

    (title, text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Prompt block for a successfully scraped page
pub fn format_page(url: &str, title: Option<&str>, text: &str) -> String {
    let content: String = text.chars().take(MAX_SCRAPED_CHARS).collect();
    format!(
        "URL: {}\nTITLE: {}\n\nCONTENT:\n{}",
        url,
        title.unwrap_or("No Title"),
        content
    )
}

/// HTTP scraper with a 10 second timeout
pub struct WebScraper {
    client: reqwest::Client,
}

impl WebScraper {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("discovery-workbench/0.1")
            .build()
            .context("Failed to build scraper HTTP client")?;
        Ok(Self { client })
    }

    async fn try_fetch(&self, url: &str) -> Result<String> {
        let html = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if html.trim().is_empty() {
            anyhow::bail!("No content returned");
        }
        let (title, text) = extract_readable(&html);
        Ok(format_page(url, title.as_deref(), &text))
    }
}

#[async_trait]
impl ReferenceFetcher for WebScraper {
    async fn fetch(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Scraping failed");
                failure_placeholder(url, &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_readable_strips_markup() {
        let html = r#"<html><head><title> Acme &amp; Co </title><style>body{}</style></head>
            <body><nav>Menu</nav><script>var x = 1;</script>
            <h1>Pricing</h1><p>Plans   start at
            &lt;$10&gt;.</p></body></html>"#;
        let (title, text) = extract_readable(html);

        assert_eq!(title.as_deref(), Some("Acme & Co"));
        assert_eq!(text, "Pricing Plans start at <$10>.");
    }

    #[test]
    fn test_format_page_truncates() {
        let long = "x".repeat(MAX_SCRAPED_CHARS + 50);
        let page = format_page("https://a.example", None, &long);
        assert!(page.starts_with("URL: https://a.example\nTITLE: No Title\n\nCONTENT:\n"));
        let (_, content) = page.split_once("CONTENT:\n").unwrap();
        assert_eq!(content.chars().count(), MAX_SCRAPED_CHARS);
        assert!(content.chars().all(|c| c == 'x'));
    }

    #[test]
    fn test_failure_placeholder() {
        assert_eq!(
            failure_placeholder("https://a.example", "timed out"),
            "[FAILED TO SCRAPE URL: https://a.example - Error: timed out]"
        );
    }

    #[tokio::test]
    async fn test_unreachable_url_becomes_placeholder() {
        let scraper = WebScraper::new().unwrap();
        let text = scraper.fetch("http://127.0.0.1:9/unreachable").await;
        assert!(text.starts_with("[FAILED TO SCRAPE URL: http://127.0.0.1:9/unreachable - Error:"));
    }
}
