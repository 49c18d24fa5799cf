use std::sync::Arc;

use log::{debug, warn};
use ndarray::Array2;

use super::corpus::Corpus;
use crate::error::{Result, WorkerErr};

/// Inputs and next-token targets, both `[B, T]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub inputs: Array2<u32>,
    pub targets: Array2<u32>,
}

/// Streams `[B, T]` windows of one split, interleaved across ranks.
///
/// Rank `r` starts at token `r·B·T` and strides by `B·T·world_size`, so in any
/// round the ranks read disjoint windows of the same shard. When this rank's
/// next window would run past the shard the loader moves to the next shard,
/// circularly, dropping the tail. A failed switch leaves the loader on its
/// current shard and is retried by the next fetch.
#[derive(Debug)]
pub struct ShardedLoader {
    corpus: Corpus,
    batch_size: usize,
    seq_len: usize,
    rank: usize,
    world_size: usize,
    shard_idx: usize,
    tokens: Arc<[u32]>,
    cursor: usize,
}

impl ShardedLoader {
    /// Creates a loader positioned at the rank's base offset of the first shard.
    ///
    /// # Errors
    /// `Config` on zero sizes or a rank outside the world, `ShardTooShort` if
    /// the first shard cannot hold one window for this rank.
    pub fn new(
        corpus: Corpus,
        batch_size: usize,
        seq_len: usize,
        rank: usize,
        world_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 || seq_len == 0 {
            return Err(WorkerErr::Config(format!(
                "loader needs positive sizes, got B={batch_size} T={seq_len}"
            )));
        }
        if rank >= world_size {
            return Err(WorkerErr::Config(format!(
                "rank {rank} is outside a world of size {world_size}"
            )));
        }

        let mut loader = Self {
            corpus,
            batch_size,
            seq_len,
            rank,
            world_size,
            shard_idx: 0,
            tokens: Arc::from(Vec::new()),
            cursor: 0,
        };
        loader.load_shard(0)?;

        Ok(loader)
    }

    fn window(&self) -> usize {
        self.batch_size * self.seq_len
    }

    fn base(&self) -> usize {
        self.rank * self.window()
    }

    fn load_shard(&mut self, idx: usize) -> Result<()> {
        let Some(shard) = self.corpus.shard(idx) else {
            return Err(WorkerErr::NoShards {
                dir: "<corpus>".into(),
                split: self.corpus.split().to_string(),
            });
        };

        let tokens = if idx == self.shard_idx && !self.tokens.is_empty() {
            Arc::clone(&self.tokens)
        } else {
            shard.load()?
        };

        let needed = self.base() + self.window() + 1;
        if tokens.len() < needed {
            return Err(WorkerErr::ShardTooShort {
                shard: shard.name().to_string(),
                len: tokens.len(),
                needed,
            });
        }

        self.tokens = tokens;
        self.shard_idx = idx;
        self.cursor = self.base();
        Ok(())
    }

    /// Whether one more window fits at the cursor.
    fn fits(&self) -> bool {
        self.cursor + self.window() + 1 <= self.tokens.len()
    }

    fn next_shard(&self) -> usize {
        (self.shard_idx + 1) % self.corpus.len()
    }

    /// Returns the next window and advances.
    ///
    /// # Errors
    /// `ShardTooShort` or a read error when the loader has to move to a shard
    /// that cannot serve this rank.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if !self.fits() {
            self.load_shard(self.next_shard())?;
        }

        let (b, t) = (self.batch_size, self.seq_len);
        let window = self.window();
        let buf = &self.tokens[self.cursor..self.cursor + window + 1];

        let inputs = Array2::from_shape_vec((b, t), buf[..window].to_vec())
            .map_err(machine_learning::MlErr::from)?;
        let targets = Array2::from_shape_vec((b, t), buf[1..].to_vec())
            .map_err(machine_learning::MlErr::from)?;

        self.cursor += window * self.world_size;
        if !self.fits() {
            let next = self.next_shard();
            debug!(split = self.corpus.split(), shard = next; "switching shard");
            if let Err(err) = self.load_shard(next) {
                warn!(split = self.corpus.split(), shard = next; "cannot switch shard: {err}");
            }
        }

        Ok(Batch { inputs, targets })
    }

    /// Rewinds to the first shard at this rank's base offset.
    pub fn reset(&mut self) -> Result<()> {
        self.load_shard(0)
    }

    /// `(shard index, cursor)`.
    pub fn position(&self) -> (usize, usize) {
        (self.shard_idx, self.cursor)
    }

    pub fn tokens_per_batch(&self) -> usize {
        self.window()
    }
}
