use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod builder;
pub mod config;
pub mod constants;
pub mod error;
pub mod mine;
pub mod search;

pub use builder::{BuildOutcome, BuildSession, BuildStatus, ChainBuilder, ChainState};
pub use config::BuildConfig;
pub use error::{BuildError, ChainError, ConfigError, DigestError, MineError};

use constants::GENESIS_PREVIOUS_HASH;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    OnChain,
    News,
    SocialSentiment,
    Rumor,
    ProjectUpdate,
}

impl SignalType {
    pub fn label(&self) -> &'static str {
        match self {
            SignalType::OnChain => "On-Chain",
            SignalType::News => "News",
            SignalType::SocialSentiment => "Social Sentiment",
            SignalType::Rumor => "Rumor",
            SignalType::ProjectUpdate => "Project Update",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub name: String,
    pub handle: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_bot: bool,
}

/// A post carried as a block payload. Never mutated once fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SignalType,
    pub author: Author,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl Transaction {
    pub fn display_text(&self) -> &str {
        if self.title.is_empty() {
            &self.content
        } else {
            &self.title
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub previous_hash: String,
    pub hash: String,
    /// Set only on the placeholder published while the nonce search runs.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_mining: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Block {
    pub fn template(&self) -> BlockTemplate {
        BlockTemplate {
            index: self.index,
            previous_hash: self.previous_hash.clone(),
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
        }
    }

    /// Recompute the digest over this block's fields and stored nonce.
    pub fn compute_hash<H: BlockHasher + ?Sized>(&self, hasher: &H) -> Result<String, MineError> {
        let input = self.template().hash_input(self.nonce)?;
        Ok(hasher.hex_digest(input.as_bytes())?)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// The fields of a block that stay fixed while its nonce is searched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockTemplate {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    pub fn new(index: u64, previous_hash: impl Into<String>, transactions: Vec<Transaction>) -> Self {
        Self {
            index,
            previous_hash: previous_hash.into(),
            timestamp: now_millis(),
            transactions,
        }
    }

    /// `index ++ previous_hash ++ timestamp ++ json(transactions)`, the part of
    /// the hash input that does not depend on the nonce.
    pub fn hash_prefix(&self) -> Result<String, serde_json::Error> {
        let txs = serde_json::to_string(&self.transactions)?;
        let mut out = format!("{}{}{}", self.index, self.previous_hash, self.timestamp);
        out.push_str(&txs);
        Ok(out)
    }

    pub fn hash_input(&self, nonce: u64) -> Result<String, serde_json::Error> {
        let mut out = self.hash_prefix()?;
        out.push_str(&nonce.to_string());
        Ok(out)
    }

    pub fn pending(&self) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            nonce: 0,
            previous_hash: self.previous_hash.clone(),
            hash: String::new(),
            is_mining: true,
        }
    }

    pub fn finalize(self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            nonce,
            previous_hash: self.previous_hash,
            hash,
            is_mining: false,
        }
    }
}

/// Digest primitive used for every block hash.
pub trait BlockHasher: Send + Sync {
    /// Lowercase hex digest of `data`.
    fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl BlockHasher for Sha256Hasher {
    fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Ok(hex::encode(hasher.finalize()))
    }
}

pub mod pow {
    /// Number of leading `'0'` hex characters in `hash`.
    pub fn count_leading_zero_hex(hash: &str) -> u32 {
        hash.bytes().take_while(|b| *b == b'0').count() as u32
    }

    /// True when the first `difficulty` hex characters of `hash` are all `'0'`.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let wanted = difficulty as usize;
        hash.len() >= wanted && hash.as_bytes()[..wanted].iter().all(|b| *b == b'0')
    }

    pub fn difficulty_prefix(difficulty: u32) -> String {
        "0".repeat(difficulty as usize)
    }
}

pub mod chain {
    use super::*;
    use anyhow::Result;
    use std::future::Future;

    /// Read-only supplier of every known transaction. Lives in the core so
    /// adapters can depend on it without a cycle.
    pub trait TransactionSource: Send + Sync {
        fn fetch_all(&self) -> impl Future<Output = Result<Vec<Transaction>>> + Send;
    }

    /// Fixed list of transactions held in memory.
    #[derive(Clone, Debug, Default)]
    pub struct MemorySource {
        transactions: Vec<Transaction>,
    }

    impl MemorySource {
        pub fn new(transactions: Vec<Transaction>) -> Self {
            Self { transactions }
        }
    }

    impl TransactionSource for MemorySource {
        async fn fetch_all(&self) -> Result<Vec<Transaction>> {
            Ok(self.transactions.clone())
        }
    }

    /// Index 0, no transactions, zero sentinel predecessor. The hash is taken
    /// as-is; genesis is never mined against a difficulty target.
    pub fn genesis_block<H: BlockHasher + ?Sized>(hasher: &H) -> Result<Block, MineError> {
        let template = BlockTemplate::new(0, GENESIS_PREVIOUS_HASH, vec![]);
        let input = template.hash_input(0)?;
        let hash = hasher.hex_digest(input.as_bytes())?;
        Ok(template.finalize(0, hash))
    }

    /// Drops bot-authored transactions, keeping order.
    pub fn human_transactions(transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions
            .into_iter()
            .filter(|tx| !tx.author.is_bot)
            .collect()
    }

    pub fn chunk_transactions(transactions: &[Transaction], chunk_size: usize) -> Vec<Vec<Transaction>> {
        transactions
            .chunks(chunk_size.max(1))
            .map(<[Transaction]>::to_vec)
            .collect()
    }

    /// Check genesis shape, contiguous indices, hash linkage, stored hashes
    /// and the difficulty of every mined block.
    pub fn verify_chain<H: BlockHasher + ?Sized>(
        blocks: &[Block],
        difficulty: u32,
        hasher: &H,
    ) -> std::result::Result<(), ChainError> {
        let genesis = blocks.first().ok_or(ChainError::EmptyChain)?;
        if genesis.index != 0
            || genesis.nonce != 0
            || !genesis.transactions.is_empty()
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
        {
            return Err(ChainError::InvalidGenesis);
        }

        for (position, block) in blocks.iter().enumerate() {
            if block.is_mining {
                return Err(ChainError::StillMining { index: block.index });
            }
            if block.index != position as u64 {
                return Err(ChainError::IndexGap {
                    expected: position as u64,
                    found: block.index,
                });
            }
            if block.compute_hash(hasher)? != block.hash {
                return Err(ChainError::HashMismatch { index: block.index });
            }
            if position == 0 {
                continue;
            }
            if block.previous_hash != blocks[position - 1].hash {
                return Err(ChainError::BrokenLink { index: block.index });
            }
            if !pow::meets_difficulty(&block.hash, difficulty) {
                return Err(ChainError::DifficultyNotMet { index: block.index });
            }
        }
        Ok(())
    }
}
