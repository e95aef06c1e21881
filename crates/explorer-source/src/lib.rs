pub mod http;
pub mod json_file;

pub use http::HttpSource;
pub use json_file::JsonFileSource;

use anyhow::{Context, Result};
use explorer_core::Transaction;

/// Parse a feed document: a JSON array of transactions.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Transaction>> {
    serde_json::from_slice(bytes).context("feed is not a JSON array of transactions")
}
