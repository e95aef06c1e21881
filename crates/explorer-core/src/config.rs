use crate::constants::{
    BLOCK_PAUSE_MS, DEFAULT_CHUNK_SIZE, DEFAULT_DIFFICULTY, GENESIS_PAUSE_MS,
    SNAPSHOT_CHANNEL_CAPACITY, YIELD_EVERY_ATTEMPTS,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Knobs for a single chain build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Required number of leading `'0'` hex characters in a mined hash.
    pub difficulty: u32,
    /// Transactions per block.
    pub chunk_size: usize,
    /// Nonce attempts between cooperative yields; 0 never yields.
    pub yield_every: u64,
    pub genesis_pause_ms: u64,
    pub block_pause_ms: u64,
    pub channel_capacity: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            yield_every: YIELD_EVERY_ATTEMPTS,
            genesis_pause_ms: GENESIS_PAUSE_MS,
            block_pause_ms: BLOCK_PAUSE_MS,
            channel_capacity: SNAPSHOT_CHANNEL_CAPACITY,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }
        Ok(())
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn without_pauses(mut self) -> Self {
        self.genesis_pause_ms = 0;
        self.block_pause_ms = 0;
        self
    }

    pub fn genesis_pause(&self) -> Duration {
        Duration::from_millis(self.genesis_pause_ms)
    }

    pub fn block_pause(&self) -> Duration {
        Duration::from_millis(self.block_pause_ms)
    }
}
