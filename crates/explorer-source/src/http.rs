use crate::parse_feed;
use anyhow::{Context, Result};
use explorer_core::{chain::TransactionSource, Transaction};
use reqwest::Client;
use tracing::{debug, info};

/// Feed served as a JSON array by an HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpSource {
    http: Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TransactionSource for HttpSource {
    async fn fetch_all(&self) -> Result<Vec<Transaction>> {
        debug!("GET {}", self.url);
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {} failed", self.url))?;
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("reading body of {}", self.url))?;
        let transactions = parse_feed(&body)?;
        info!("fetched {} transactions from {}", transactions.len(), self.url);
        Ok(transactions)
    }
}
