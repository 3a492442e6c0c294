use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single headline fed into the decision context
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NewsItem {
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "publishedAt")]
    pub published_at: Option<String>,
}

/// Auxiliary headline feed. Callers treat any error as "no news".
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<NewsItem>>;
}

/// Used when no feed is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNews;

#[async_trait]
impl NewsSource for NoNews {
    async fn latest(&self, _symbol: &str, _limit: usize) -> Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NewsPayload {
    Bare(Vec<NewsItem>),
    Wrapped { items: Vec<NewsItem> },
}

/// Fetches a JSON array of headlines (or `{"items": [...]}`) from a URL
#[derive(Clone)]
pub struct HttpNewsSource {
    client: Client,
    url: String,
}

impl HttpNewsSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NewsSource for HttpNewsSource {
    async fn latest(&self, symbol: &str, limit: usize) -> Result<Vec<NewsItem>> {
        let limit_param = limit.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("symbol", symbol), ("limit", limit_param.as_str())])
            .send()
            .await
            .context("News request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("News feed returned HTTP {}", status);
        }

        let payload: NewsPayload = response
            .json()
            .await
            .context("Failed to parse news payload")?;

        let mut items = match payload {
            NewsPayload::Bare(items) => items,
            NewsPayload::Wrapped { items } => items,
        };
        items.retain(|item| !item.title.trim().is_empty());
        items.truncate(limit);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shapes() {
        let bare: NewsPayload =
            serde_json::from_str(r#"[{"title":"ETF inflows rise","source":"wire"}]"#).unwrap();
        assert!(matches!(bare, NewsPayload::Bare(ref items) if items.len() == 1));

        let wrapped: NewsPayload = serde_json::from_str(
            r#"{"items":[{"title":"Funding flips negative","publishedAt":"2024-05-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        match wrapped {
            NewsPayload::Wrapped { items } => {
                assert_eq!(items[0].published_at.as_deref(), Some("2024-05-01T00:00:00Z"));
            }
            NewsPayload::Bare(_) => panic!("expected wrapped payload"),
        }
    }

    #[tokio::test]
    async fn test_no_news_is_empty() {
        assert!(NoNews.latest("BTCUSDT", 5).await.unwrap().is_empty());
    }
}
