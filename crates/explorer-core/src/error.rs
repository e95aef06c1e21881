//! Error types for chain building, mining and verification.

use thiserror::Error;

/// The hash primitive failed or is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("digest failed: {0}")]
pub struct DigestError(pub String);

#[derive(Debug, Error)]
pub enum MineError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("could not serialize block transactions: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Terminal failures of a build. A fresh build is the only recovery.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to fetch transactions: {0:#}")]
    SourceFetch(#[source] anyhow::Error),

    #[error("failed to hash genesis block: {0}")]
    Genesis(#[source] MineError),

    #[error("failed to mine block #{index}: {source}")]
    Mine {
        index: u64,
        #[source]
        source: MineError,
    },

    #[error("snapshot consumer went away")]
    Cancelled,

    #[error("build task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain has no blocks")]
    EmptyChain,

    #[error("genesis block has the wrong shape")]
    InvalidGenesis,

    #[error("expected block index {expected}, found {found}")]
    IndexGap { expected: u64, found: u64 },

    #[error("block #{index} does not link to its predecessor")]
    BrokenLink { index: u64 },

    #[error("block #{index} stored hash does not match its contents")]
    HashMismatch { index: u64 },

    #[error("block #{index} hash does not meet the difficulty target")]
    DifficultyNotMet { index: u64 },

    #[error("block #{index} is still being mined")]
    StillMining { index: u64 },

    #[error("could not recompute block hash: {0}")]
    Digest(#[from] MineError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("snapshot channel capacity must be at least 1")]
    InvalidChannelCapacity,
}
