pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
pub const DEFAULT_DIFFICULTY: u32 = 2;
pub const DEFAULT_CHUNK_SIZE: usize = 3;
pub const YIELD_EVERY_ATTEMPTS: u64 = 1000;
pub const GENESIS_PAUSE_MS: u64 = 300;
pub const BLOCK_PAUSE_MS: u64 = 200;
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;
