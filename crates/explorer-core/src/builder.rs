//! Chain building: genesis, source selection, chunking and sequential mining,
//! with every intermediate chain published as an immutable snapshot.

use crate::{
    chain::{chunk_transactions, genesis_block, human_transactions, TransactionSource},
    config::BuildConfig,
    error::{BuildError, ConfigError},
    mine::mine,
    pow::difficulty_prefix,
    Block, BlockHasher, BlockTemplate, Sha256Hasher,
};
use std::fmt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildStatus {
    Initializing,
    CreatingGenesis,
    Fetching,
    Processing { first: usize, last: usize },
    Mining { index: u64, difficulty: u32 },
    UpToDate,
    NoTransactions,
    Failed(String),
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::UpToDate | BuildStatus::NoTransactions | BuildStatus::Failed(_)
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BuildStatus::Failed(_))
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Initializing => write!(f, "Initializing chain..."),
            BuildStatus::CreatingGenesis => write!(f, "Creating genesis block..."),
            BuildStatus::Fetching => write!(f, "Fetching transaction history..."),
            BuildStatus::Processing { first, last } => {
                write!(f, "Processing transactions {first} to {last}...")
            }
            BuildStatus::Mining { index, difficulty } => write!(
                f,
                "Mining block #{index}... (difficulty: {})",
                difficulty_prefix(*difficulty)
            ),
            BuildStatus::UpToDate => write!(f, "Chain is up to date."),
            BuildStatus::NoTransactions => {
                write!(f, "No user transactions found to build the chain.")
            }
            BuildStatus::Failed(reason) => write!(f, "Build failed: {reason}"),
        }
    }
}

/// One published view of the chain. Finalized blocks never change between
/// snapshots; only a trailing `is_mining` placeholder is replaced.
///
/// `blocks[0]` is always the genesis block, with one exception: the single
/// `Failed` snapshot of a build whose genesis could not be hashed is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    pub blocks: Vec<Block>,
    pub status: BuildStatus,
    pub finished: bool,
}

impl ChainState {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Most recent finalized block.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.iter().rev().find(|b| !b.is_mining)
    }

    pub fn mining_block(&self) -> Option<&Block> {
        self.blocks.last().filter(|b| b.is_mining)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub blocks: Vec<Block>,
    pub status: BuildStatus,
}

struct Publisher {
    snapshots: mpsc::Sender<ChainState>,
}

impl Publisher {
    async fn publish(&self, blocks: &[Block], status: BuildStatus) -> Result<(), BuildError> {
        self.send(blocks, status, false).await
    }

    async fn finish(&self, blocks: &[Block], status: BuildStatus) -> Result<(), BuildError> {
        self.send(blocks, status, true).await
    }

    async fn send(
        &self,
        blocks: &[Block],
        status: BuildStatus,
        finished: bool,
    ) -> Result<(), BuildError> {
        debug!(len = blocks.len(), %status, finished, "publishing chain snapshot");
        self.snapshots
            .send(ChainState {
                blocks: blocks.to_vec(),
                status,
                finished,
            })
            .await
            .map_err(|_| BuildError::Cancelled)
    }
}

async fn pause(duration: std::time::Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Builds a fresh chain from a transaction source. Each run is independent
/// and owns its chain exclusively.
pub struct ChainBuilder<S, H = Sha256Hasher> {
    source: S,
    hasher: H,
    config: BuildConfig,
}

impl<S: TransactionSource> ChainBuilder<S, Sha256Hasher> {
    pub fn new(source: S, config: BuildConfig) -> Result<Self, ConfigError> {
        Self::with_hasher(source, Sha256Hasher, config)
    }
}

impl<S: TransactionSource, H: BlockHasher> ChainBuilder<S, H> {
    pub fn with_hasher(source: S, hasher: H, config: BuildConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            hasher,
            config,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Runs one build to completion, sending snapshots in strict order.
    ///
    /// Returns [`BuildError::Cancelled`] as soon as a snapshot cannot be
    /// delivered because the receiver was dropped; nothing further is
    /// published after that.
    pub async fn run(&self, snapshots: mpsc::Sender<ChainState>) -> Result<BuildOutcome, BuildError> {
        let publisher = Publisher { snapshots };
        let config = &self.config;
        let mut chain: Vec<Block> = Vec::new();

        // Genesis exists before anything is published so every snapshot
        // starts with it.
        let genesis = match genesis_block(&self.hasher) {
            Ok(genesis) => genesis,
            Err(err) => {
                error!("genesis hashing failed: {err}");
                publisher
                    .finish(&chain, BuildStatus::Failed(err.to_string()))
                    .await?;
                return Err(BuildError::Genesis(err));
            }
        };
        info!("Created genesis block with hash {}", genesis.hash);
        chain.push(genesis);
        publisher.publish(&chain, BuildStatus::Initializing).await?;
        publisher.publish(&chain, BuildStatus::CreatingGenesis).await?;
        pause(config.genesis_pause()).await;

        publisher.publish(&chain, BuildStatus::Fetching).await?;
        let fetched = match self.source.fetch_all().await {
            Ok(fetched) => fetched,
            Err(err) => {
                error!("transaction source failed: {err:#}");
                publisher
                    .finish(&chain, BuildStatus::Failed(format!("{err:#}")))
                    .await?;
                return Err(BuildError::SourceFetch(err));
            }
        };
        let fetched_count = fetched.len();
        let transactions = human_transactions(fetched);
        debug!(
            fetched = fetched_count,
            human = transactions.len(),
            "filtered bot-authored transactions"
        );

        if transactions.is_empty() {
            warn!("no human-authored transactions; chain stops at genesis");
            publisher.finish(&chain, BuildStatus::NoTransactions).await?;
            return Ok(BuildOutcome {
                blocks: chain,
                status: BuildStatus::NoTransactions,
            });
        }

        let total = transactions.len();
        let chunks = chunk_transactions(&transactions, config.chunk_size);
        info!(
            transactions = total,
            blocks = chunks.len(),
            difficulty = config.difficulty,
            "mining chain"
        );

        let mut previous_hash = chain[0].hash.clone();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let first = i * config.chunk_size + 1;
            let last = ((i + 1) * config.chunk_size).min(total);
            publisher
                .publish(&chain, BuildStatus::Processing { first, last })
                .await?;

            let index = i as u64 + 1;
            let template = BlockTemplate::new(index, previous_hash.clone(), chunk);
            let mining = BuildStatus::Mining {
                index,
                difficulty: config.difficulty,
            };
            chain.push(template.pending());
            publisher.publish(&chain, mining.clone()).await?;

            let mined = match mine(&template, config.difficulty, &self.hasher, config.yield_every).await {
                Ok(mined) => mined,
                Err(source) => {
                    error!("mining block #{index} failed: {source}");
                    chain.pop();
                    publisher
                        .finish(&chain, BuildStatus::Failed(source.to_string()))
                        .await?;
                    return Err(BuildError::Mine { index, source });
                }
            };

            previous_hash = mined.hash.clone();
            if let Some(slot) = chain.last_mut() {
                *slot = template.finalize(mined.nonce, mined.hash);
            }
            publisher.publish(&chain, mining).await?;
            pause(config.block_pause()).await;
        }

        info!(len = chain.len(), "chain is up to date");
        publisher.finish(&chain, BuildStatus::UpToDate).await?;
        Ok(BuildOutcome {
            blocks: chain,
            status: BuildStatus::UpToDate,
        })
    }
}

impl<S, H> ChainBuilder<S, H>
where
    S: TransactionSource + 'static,
    H: BlockHasher + 'static,
{
    /// Starts the build on a tokio task and hands back the session observing it.
    pub fn spawn(self) -> BuildSession {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let handle = tokio::spawn(async move { self.run(tx).await });
        BuildSession {
            snapshots: rx,
            handle,
        }
    }
}

/// A running build and the receiving end of its snapshots. Dropping the
/// session aborts the build at its next await point; the nonce search only
/// has one every `yield_every` attempts.
pub struct BuildSession {
    snapshots: mpsc::Receiver<ChainState>,
    handle: JoinHandle<Result<BuildOutcome, BuildError>>,
}

impl BuildSession {
    pub async fn next(&mut self) -> Option<ChainState> {
        self.snapshots.recv().await
    }

    /// Non-blocking poll for the next snapshot.
    pub fn try_next(&mut self) -> Option<ChainState> {
        self.snapshots.try_recv().ok()
    }

    /// Drains all remaining snapshots and returns them with the build result.
    pub async fn collect(mut self) -> (Vec<ChainState>, Result<BuildOutcome, BuildError>) {
        let mut states = Vec::new();
        while let Some(state) = self.snapshots.recv().await {
            states.push(state);
        }
        let result = match (&mut self.handle).await {
            Ok(result) => result,
            Err(err) => Err(BuildError::Task(err)),
        };
        (states, result)
    }

    pub async fn finish(self) -> Result<BuildOutcome, BuildError> {
        self.collect().await.1
    }

    /// Stops the build; no further snapshots are produced.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for BuildSession {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("build session dropped, aborting build task");
            self.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{verify_chain, MemorySource};
    use crate::constants::GENESIS_PREVIOUS_HASH;
    use crate::error::{DigestError, MineError};
    use crate::test_support::{human_txs, tx};
    use crate::{search, Transaction};
    use anyhow::anyhow;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };
    use std::time::Duration;

    fn fast_config() -> BuildConfig {
        BuildConfig::default().without_pauses()
    }

    async fn build(transactions: Vec<Transaction>, config: BuildConfig) -> (Vec<ChainState>, BuildOutcome) {
        let session = ChainBuilder::new(MemorySource::new(transactions), config)
            .unwrap()
            .spawn();
        let (states, result) = session.collect().await;
        (states, result.unwrap())
    }

    #[tokio::test]
    async fn seven_transactions_make_three_blocks() {
        let txs = human_txs(7);
        let (states, outcome) = build(txs.clone(), fast_config()).await;
        let chain = &outcome.blocks;

        assert_eq!(outcome.status, BuildStatus::UpToDate);
        assert_eq!(chain.len(), 4);
        let sizes: Vec<_> = chain.iter().map(|b| b.transactions.len()).collect();
        assert_eq!(sizes, vec![0, 3, 3, 1]);
        assert_eq!(chain[3].previous_hash, chain[2].hash);
        assert_eq!(chain[2].previous_hash, chain[1].hash);
        assert_eq!(chain[1].previous_hash, chain[0].hash);

        let covered: Vec<_> = chain.iter().flat_map(|b| b.transactions.clone()).collect();
        assert_eq!(covered, txs);

        let last = states.last().unwrap();
        assert!(last.finished);
        assert_eq!(last.blocks, outcome.blocks);
        assert_eq!(last.status.to_string(), "Chain is up to date.");
    }

    #[tokio::test]
    async fn completed_chain_satisfies_invariants() {
        let config = fast_config();
        let (_, outcome) = build(human_txs(10), config.clone()).await;
        let chain = &outcome.blocks;

        for (i, block) in chain.iter().enumerate() {
            assert_eq!(block.index, i as u64);
            assert!(!block.is_mining);
            assert_eq!(block.compute_hash(&Sha256Hasher).unwrap(), block.hash);
            if i > 0 {
                assert!(block.hash.starts_with("00"));
                assert_eq!(block.previous_hash, chain[i - 1].hash);
            }
        }
        assert_eq!(chain[0].previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(chain[0].transactions.is_empty());
        verify_chain(chain, config.difficulty, &Sha256Hasher).unwrap();
    }

    #[tokio::test]
    async fn snapshots_are_strictly_ordered() {
        let (states, _) = build(human_txs(4), fast_config()).await;
        let statuses: Vec<_> = states.iter().map(|s| s.status.clone()).collect();
        let mining = |index| BuildStatus::Mining { index, difficulty: 2 };
        assert_eq!(
            statuses,
            vec![
                BuildStatus::Initializing,
                BuildStatus::CreatingGenesis,
                BuildStatus::Fetching,
                BuildStatus::Processing { first: 1, last: 3 },
                mining(1),
                mining(1),
                BuildStatus::Processing { first: 4, last: 4 },
                mining(2),
                mining(2),
                BuildStatus::UpToDate,
            ]
        );

        // pending placeholder then its finalized counterpart
        let pending = &states[4];
        assert_eq!(pending.len(), 2);
        let placeholder = pending.mining_block().unwrap();
        assert_eq!(placeholder.index, 1);
        assert_eq!(placeholder.hash, "");
        assert_eq!(placeholder.nonce, 0);
        let done = &states[5];
        assert!(done.mining_block().is_none());
        assert_eq!(done.tip().map(|b| b.index), Some(1));
        assert_eq!(pending.tip().map(|b| b.index), Some(0));
        assert_eq!(done.blocks[1].timestamp, placeholder.timestamp);
        assert_eq!(done.blocks[1].transactions, placeholder.transactions);

        // genesis leads every snapshot, from the very first one
        let genesis = &states[0].blocks[0];
        assert!(genesis.is_genesis());
        assert!(states.iter().all(|s| s.blocks.first() == Some(genesis)));

        // finalized blocks never change in later snapshots
        let mut finalized: Vec<Block> = Vec::new();
        for state in &states {
            for (i, block) in state.blocks.iter().enumerate() {
                if block.is_mining {
                    assert_eq!(i, state.len() - 1, "placeholder must be last");
                    continue;
                }
                match finalized.get(i) {
                    Some(seen) => assert_eq!(seen, block),
                    None => finalized.push(block.clone()),
                }
            }
            assert_eq!(state.finished, state.status.is_terminal());
        }
    }

    #[tokio::test]
    async fn bots_only_source_stops_at_genesis() {
        let txs = vec![tx("s1", "NewsBot", true), tx("s2", "NewsBot", true)];
        let (states, outcome) = build(txs, fast_config()).await;
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.status, BuildStatus::NoTransactions);
        let last = states.last().unwrap();
        assert!(last.finished);
        assert!(!last.status.is_error());
        assert_eq!(
            last.status.to_string(),
            "No user transactions found to build the chain."
        );
    }

    #[tokio::test]
    async fn bot_transactions_are_skipped() {
        let txs = vec![
            tx("s1", "Alice", false),
            tx("s2", "NewsBot", true),
            tx("s3", "Bob", false),
        ];
        let (_, outcome) = build(txs, fast_config().with_chunk_size(1)).await;
        let ids: Vec<_> = outcome
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|t| t.id.clone()))
            .collect();
        assert_eq!(ids, vec!["s1", "s3"]);
    }

    struct BrokenSource;

    impl TransactionSource for BrokenSource {
        async fn fetch_all(&self) -> anyhow::Result<Vec<Transaction>> {
            Err(anyhow!("feed unreachable"))
        }
    }

    #[tokio::test]
    async fn source_failure_leaves_only_genesis() {
        let session = ChainBuilder::new(BrokenSource, fast_config()).unwrap().spawn();
        let (states, result) = session.collect().await;
        assert!(matches!(result, Err(BuildError::SourceFetch(_))));

        let last = states.last().unwrap();
        assert!(last.finished);
        assert!(last.status.is_error());
        assert_eq!(last.len(), 1);
        assert!(states.iter().all(|s| s.len() == 1));
    }

    /// Succeeds for the first `budget` digests, then fails.
    struct FlakyHasher {
        calls: AtomicU64,
        budget: u64,
    }

    impl BlockHasher for FlakyHasher {
        fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.budget {
                return Err(DigestError("hardware gone".into()));
            }
            Sha256Hasher.hex_digest(data)
        }
    }

    #[tokio::test]
    async fn digest_failure_keeps_finalized_blocks_only() {
        let hasher = FlakyHasher {
            calls: AtomicU64::new(0),
            budget: 1,
        };
        let config = fast_config().with_difficulty(1);
        let builder =
            ChainBuilder::with_hasher(MemorySource::new(human_txs(3)), hasher, config).unwrap();
        let (states, result) = builder.spawn().collect().await;

        match result {
            Err(BuildError::Mine {
                index: 1,
                source: MineError::Digest(_),
            }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        let last = states.last().unwrap();
        assert!(last.status.is_error());
        assert_eq!(last.len(), 1);
        assert!(last.mining_block().is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_build() {
        let builder = ChainBuilder::new(MemorySource::new(human_txs(3)), fast_config()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = builder.run(tx).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    /// Never produces a leading zero, so the nonce search cannot end.
    struct EndlessHasher {
        calls: Arc<AtomicU64>,
    }

    impl BlockHasher for EndlessHasher {
        fn hex_digest(&self, data: &[u8]) -> Result<String, DigestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Sha256Hasher
                .hex_digest(data)
                .map(|h| format!("f{}", &h[1..]))
        }
    }

    /// Starts a build and returns once block #1 is being mined.
    async fn session_stuck_mining() -> (BuildSession, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let hasher = EndlessHasher {
            calls: calls.clone(),
        };
        let config = BuildConfig {
            yield_every: 16,
            ..fast_config().with_difficulty(1)
        };
        let mut session =
            ChainBuilder::with_hasher(MemorySource::new(human_txs(3)), hasher, config)
                .unwrap()
                .spawn();
        while let Some(state) = session.next().await {
            if state.mining_block().is_some() {
                break;
            }
        }
        // let the search get going
        while calls.load(Ordering::SeqCst) < 100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (session, calls)
    }

    async fn assert_hashing_stopped(calls: &AtomicU64) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn dropping_session_stops_mining() {
        let (session, calls) = session_stuck_mining().await;
        drop(session);
        assert_hashing_stopped(&calls).await;
    }

    #[tokio::test]
    async fn cancelling_session_stops_mining() {
        let (session, calls) = session_stuck_mining().await;
        session.cancel();
        assert_hashing_stopped(&calls).await;
    }

    #[tokio::test]
    async fn genesis_failure_publishes_a_single_empty_snapshot() {
        let hasher = FlakyHasher {
            calls: AtomicU64::new(0),
            budget: 0,
        };
        let source = MemorySource::new(human_txs(3));
        let builder = ChainBuilder::with_hasher(source, hasher, fast_config()).unwrap();
        let (states, result) = builder.spawn().collect().await;

        assert!(matches!(result, Err(BuildError::Genesis(MineError::Digest(_)))));
        assert_eq!(states.len(), 1);
        assert!(states[0].finished);
        assert!(states[0].status.is_error());
        assert!(states[0].is_empty());
    }

    #[tokio::test]
    async fn each_run_starts_from_a_fresh_genesis() {
        let builder = ChainBuilder::new(MemorySource::new(human_txs(2)), fast_config()).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let first = builder.run(tx.clone()).await.unwrap();
        let second = builder.run(tx).await.unwrap();
        drain.await.unwrap();

        assert_eq!(first.blocks.len(), 2);
        assert_eq!(second.blocks.len(), 2);
        assert_eq!(second.blocks[0].index, 0);
        assert_eq!(second.blocks[1].transactions, first.blocks[1].transactions);
    }

    #[tokio::test]
    async fn search_finds_block_by_hash_fragment() {
        // block 2 is the tip, so no later previous_hash repeats its hash
        let (_, outcome) = build(human_txs(6), fast_config()).await;
        let chain = &outcome.blocks;
        assert_eq!(chain.len(), 3);
        let target = &chain[2];
        // a fragment of block 2's hash that no other hash field contains
        let fragment = (0..=target.hash.len() - 8)
            .map(|start| &target.hash[start..start + 8])
            .find(|frag| {
                chain.iter().enumerate().all(|(i, b)| {
                    (i == 2 || !b.hash.contains(frag)) && !b.previous_hash.contains(frag)
                })
            })
            .unwrap();

        let found = search::filter_chain(chain, &fragment.to_uppercase());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 2);
        assert_eq!(search::filter_chain(chain, "").len(), chain.len());
    }

    #[test]
    fn zero_chunk_size_is_rejected_up_front() {
        let config = fast_config().with_chunk_size(0);
        assert!(ChainBuilder::new(MemorySource::default(), config).is_err());
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            BuildStatus::Mining { index: 3, difficulty: 2 }.to_string(),
            "Mining block #3... (difficulty: 00)"
        );
        assert_eq!(
            BuildStatus::Processing { first: 1, last: 3 }.to_string(),
            "Processing transactions 1 to 3..."
        );
        assert!(BuildStatus::Failed("x".into()).is_terminal());
        assert!(!BuildStatus::Fetching.is_terminal());
    }
}
