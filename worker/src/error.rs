use std::{error::Error, fmt, io, path::PathBuf};

use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Ml(MlErr),
    Json(serde_json::Error),
    Config(String),
    IndivisibleBatch {
        total: usize,
        micro: usize,
        world: usize,
    },
    NoShards {
        dir: PathBuf,
        split: String,
    },
    ShardTooShort {
        shard: String,
        len: usize,
        needed: usize,
    },
    Shard {
        shard: String,
        detail: String,
    },
    UnexpectedMessage {
        step: usize,
        got: &'static str,
    },
    PayloadLengthMismatch {
        step: usize,
        got: usize,
        expected: usize,
    },
    PeerError {
        rank: usize,
        detail: String,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Ml(e) => write!(f, "model error: {e}"),
            WorkerErr::Json(e) => write!(f, "config parse error: {e}"),
            WorkerErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            WorkerErr::IndivisibleBatch { total, micro, world } => write!(
                f,
                "total batch of {total} tokens is not divisible by {micro} tokens per micro-batch times {world} workers"
            ),
            WorkerErr::NoShards { dir, split } => {
                write!(f, "no shards found for split {split} in {}", dir.display())
            }
            WorkerErr::ShardTooShort { shard, len, needed } => write!(
                f,
                "shard {shard} holds {len} tokens but one window needs {needed}"
            ),
            WorkerErr::Shard { shard, detail } => write!(f, "unreadable shard {shard}: {detail}"),
            WorkerErr::UnexpectedMessage { step, got } => {
                write!(f, "unexpected message at step {step}: got {got}")
            }
            WorkerErr::PayloadLengthMismatch {
                step,
                got,
                expected,
            } => write!(
                f,
                "payload length mismatch at step {step}: got {got}, expected {expected}"
            ),
            WorkerErr::PeerError { rank, detail } => write!(f, "rank {rank} failed: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
