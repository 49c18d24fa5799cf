use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;

use super::shard::read_shard;
use crate::error::{Result, WorkerErr};

#[derive(Debug, Clone)]
enum Backing {
    File(PathBuf),
    Memory(Arc<[u32]>),
}

/// One shard of a split. File backed shards are read on `load`.
#[derive(Debug, Clone)]
pub struct ShardRef {
    name: String,
    backing: Backing,
}

impl ShardRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shard's tokens, read from disk if needed.
    pub fn load(&self) -> Result<Arc<[u32]>> {
        match &self.backing {
            Backing::File(path) => {
                let tokens = read_shard(path)?;
                debug!(shard = self.name.as_str(), tokens = tokens.len(); "loaded shard");
                Ok(tokens.into())
            }
            Backing::Memory(tokens) => Ok(Arc::clone(tokens)),
        }
    }
}

/// The ordered shards of one split.
#[derive(Debug, Clone)]
pub struct Corpus {
    split: String,
    shards: Vec<ShardRef>,
}

impl Corpus {
    /// Lists the files in `dir` whose name contains `split`, sorted by name.
    ///
    /// # Errors
    /// `NoShards` when nothing matches.
    pub fn discover(dir: impl AsRef<Path>, split: &str) -> Result<Self> {
        let dir = dir.as_ref();

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains(split) {
                names.push(name);
            }
        }

        if names.is_empty() {
            return Err(WorkerErr::NoShards {
                dir: dir.to_path_buf(),
                split: split.to_string(),
            });
        }

        names.sort();
        let shards = names
            .into_iter()
            .map(|name| ShardRef {
                backing: Backing::File(dir.join(&name)),
                name,
            })
            .collect();

        Ok(Self {
            split: split.to_string(),
            shards,
        })
    }

    /// An in-memory corpus, mostly for tests.
    pub fn from_memory(split: &str, shards: Vec<Vec<u32>>) -> Result<Self> {
        if shards.is_empty() {
            return Err(WorkerErr::NoShards {
                dir: PathBuf::from("<memory>"),
                split: split.to_string(),
            });
        }

        let shards = shards
            .into_iter()
            .enumerate()
            .map(|(i, tokens)| ShardRef {
                name: format!("{split}_{i:06}"),
                backing: Backing::Memory(tokens.into()),
            })
            .collect();

        Ok(Self {
            split: split.to_string(),
            shards,
        })
    }

    pub fn split(&self) -> &str {
        &self.split
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shards(&self) -> &[ShardRef] {
        &self.shards
    }

    pub fn shard(&self, index: usize) -> Option<&ShardRef> {
        self.shards.get(index)
    }
}
