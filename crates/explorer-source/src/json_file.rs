use crate::parse_feed;
use anyhow::{Context, Result};
use explorer_core::{chain::TransactionSource, Transaction};
use std::path::{Path, PathBuf};
use tracing::info;

/// Feed stored as a JSON array in a file. Re-read on every fetch.
#[derive(Clone, Debug)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionSource for JsonFileSource {
    async fn fetch_all(&self) -> Result<Vec<Transaction>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading feed file {}", self.path.display()))?;
        let transactions = parse_feed(&bytes)
            .with_context(|| format!("parsing feed file {}", self.path.display()))?;
        info!(
            "loaded {} transactions from {}",
            transactions.len(),
            self.path.display()
        );
        Ok(transactions)
    }
}
