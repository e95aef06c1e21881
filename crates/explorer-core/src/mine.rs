use crate::{error::MineError, pow::meets_difficulty, BlockHasher, BlockTemplate};
use tracing::{info, trace};

/// Winning nonce for a block template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinedNonce {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

/// Searches nonces upward from 0 until the block hash has at least
/// `difficulty` leading hex zeros. Returns the smallest such nonce.
///
/// Every `yield_every` attempts the task yields back to the tokio scheduler
/// so other tasks on the same worker keep running; this never changes which
/// nonce wins. A `yield_every` of 0 disables yielding.
pub async fn mine<H: BlockHasher + ?Sized>(
    template: &BlockTemplate,
    difficulty: u32,
    hasher: &H,
    yield_every: u64,
) -> Result<MinedNonce, MineError> {
    let prefix = template.hash_prefix()?;
    let mut input = String::with_capacity(prefix.len() + 20);
    let mut nonce = 0u64;

    loop {
        input.clear();
        input.push_str(&prefix);
        input.push_str(&nonce.to_string());
        let hash = hasher.hex_digest(input.as_bytes())?;

        if meets_difficulty(&hash, difficulty) {
            info!(
                "Mined block {} with nonce {} and hash {}",
                template.index, nonce, hash
            );
            return Ok(MinedNonce {
                nonce,
                hash,
                attempts: nonce + 1,
            });
        }

        nonce += 1;
        if yield_every > 0 && nonce % yield_every == 0 {
            trace!(index = template.index, nonce, "yielding during nonce search");
            tokio::task::yield_now().await;
        }
    }
}
