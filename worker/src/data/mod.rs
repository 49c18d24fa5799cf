pub mod corpus;
pub mod dataloader;
pub mod shard;

pub use corpus::{Corpus, ShardRef};
pub use dataloader::{Batch, ShardedLoader};
pub use shard::read_shard;
