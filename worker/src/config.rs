use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use machine_learning::{GptConfig, optimization::LrSchedule, sampling::SampleSpec};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerErr};

/// Environment variable holding the path of a JSON `TrainingConfig`.
pub const CONFIG_VAR: &str = "TRAIN_CONFIG";

/// The model shape as written in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub block_size: usize,
    pub vocab_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
}

impl Default for ModelSpec {
    fn default() -> Self {
        GptConfig::default().into()
    }
}

impl From<GptConfig> for ModelSpec {
    fn from(config: GptConfig) -> Self {
        Self {
            block_size: config.block_size,
            vocab_size: config.vocab_size,
            n_layer: config.n_layer,
            n_head: config.n_head,
            n_embd: config.n_embd,
        }
    }
}

impl From<ModelSpec> for GptConfig {
    fn from(spec: ModelSpec) -> Self {
        Self {
            block_size: spec.block_size,
            vocab_size: spec.vocab_size,
            n_layer: spec.n_layer,
            n_head: spec.n_head,
            n_embd: spec.n_embd,
        }
    }
}

/// Periodic top-k sampling. An `interval` of zero turns it off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval: usize,
    pub num_sequences: usize,
    pub max_length: usize,
    pub top_k: usize,
    /// Each rank seeds its generator with `seed + rank`.
    pub seed: u64,
    pub prompt: Vec<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: 100,
            num_sequences: 4,
            max_length: 32,
            top_k: 50,
            seed: 42,
            // "Hello, I'm a language model,"
            prompt: vec![15496, 11, 314, 1101, 257, 3303, 2746, 11],
        }
    }
}

impl SamplingConfig {
    pub fn spec(&self) -> SampleSpec {
        SampleSpec {
            num_sequences: self.num_sequences,
            max_length: self.max_length,
            top_k: self.top_k,
        }
    }
}

/// Everything a training run needs besides the process group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub train_split: String,
    pub val_split: String,
    /// Tokens consumed by one optimizer step across all workers.
    pub total_batch_tokens: usize,
    /// Sequences per micro-batch (B).
    pub micro_batch: usize,
    /// Tokens per sequence (T).
    pub seq_len: usize,
    pub max_lr: f32,
    pub warmup_steps: usize,
    pub max_steps: usize,
    pub weight_decay: f32,
    pub grad_clip: f32,
    /// Validation cadence in steps, zero turns it off.
    pub eval_interval: usize,
    pub val_steps: usize,
    pub seed: u64,
    pub model: ModelSpec,
    pub sampling: SamplingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("edu_fineweb10B"),
            train_split: "train".into(),
            val_split: "val".into(),
            total_batch_tokens: 524_288,
            micro_batch: 32,
            seq_len: 1024,
            max_lr: 6e-4,
            warmup_steps: 715,
            max_steps: 19073,
            weight_decay: 0.1,
            grad_clip: 1.0,
            eval_interval: 100,
            val_steps: 20,
            seed: 1337,
            model: ModelSpec::default(),
            sampling: SamplingConfig::default(),
        }
    }
}

/// The derived quantities of a validated config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingPlan {
    pub accumulation_steps: NonZeroUsize,
    pub schedule: LrSchedule,
    /// Tokens a single micro-batch holds on one worker.
    pub micro_tokens: usize,
}

impl TrainingConfig {
    /// Parses a JSON config file. Missing fields take their default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Loads the file named by `TRAIN_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match env::var(CONFIG_VAR) {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn gpt_config(&self) -> GptConfig {
        self.model.into()
    }

    /// Validates the config against a process group of `world_size` workers.
    ///
    /// # Returns
    /// The accumulation window and learning rate schedule, or the first
    /// configuration error found.
    pub fn plan(&self, world_size: usize) -> Result<TrainingPlan> {
        let sizes = [
            ("micro_batch", self.micro_batch),
            ("seq_len", self.seq_len),
            ("total_batch_tokens", self.total_batch_tokens),
            ("world_size", world_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(WorkerErr::Config(format!("{name} must be greater than zero")));
        }

        let model = self.gpt_config();
        model
            .validate()
            .map_err(|e| WorkerErr::Config(e.to_string()))?;

        if self.seq_len > model.block_size {
            return Err(WorkerErr::Config(format!(
                "seq_len {} exceeds the block size {}",
                self.seq_len, model.block_size
            )));
        }

        let micro_tokens = self.micro_batch * self.seq_len;
        let per_round = micro_tokens * world_size;
        if self.total_batch_tokens % per_round != 0 {
            return Err(WorkerErr::IndivisibleBatch {
                total: self.total_batch_tokens,
                micro: micro_tokens,
                world: world_size,
            });
        }

        let accumulation_steps = NonZeroUsize::new(self.total_batch_tokens / per_round)
            .ok_or_else(|| {
                WorkerErr::Config(format!(
                    "total_batch_tokens {} is smaller than one round of {per_round}",
                    self.total_batch_tokens
                ))
            })?;

        let schedule = LrSchedule::new(self.max_lr, self.warmup_steps, self.max_steps)
            .map_err(|e| WorkerErr::Config(e.to_string()))?;

        if self.eval_interval > 0 && self.val_steps == 0 {
            return Err(WorkerErr::Config("val_steps must be greater than zero".into()));
        }

        Ok(TrainingPlan {
            accumulation_steps,
            schedule,
            micro_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let config = TrainingConfig::default();
        let plan = config.plan(1).unwrap();
        assert_eq!(plan.accumulation_steps.get(), 16);

        let plan = config.plan(8).unwrap();
        assert_eq!(plan.accumulation_steps.get(), 2);
        assert_eq!(plan.micro_tokens, 32 * 1024);
    }

    #[test]
    fn indivisible_batch_is_rejected() {
        let config = TrainingConfig::default();
        let err = config.plan(3).unwrap_err();
        assert!(matches!(
            err,
            WorkerErr::IndivisibleBatch {
                total: 524_288,
                micro: 32768,
                world: 3
            }
        ));
    }

    #[test]
    fn sequence_longer_than_block_is_rejected() {
        let config = TrainingConfig {
            seq_len: 2048,
            total_batch_tokens: 32 * 2048,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.plan(1), Err(WorkerErr::Config(_))));
    }

    #[test]
    fn bad_model_and_schedule_are_config_errors() {
        let mut config = TrainingConfig::default();
        config.model.n_head = 7;
        assert!(matches!(config.plan(1), Err(WorkerErr::Config(_))));

        let config = TrainingConfig {
            warmup_steps: 10,
            max_steps: 5,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.plan(1), Err(WorkerErr::Config(_))));

        let config = TrainingConfig {
            micro_batch: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.plan(1), Err(WorkerErr::Config(_))));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{ "micro_batch": 4, "model": { "n_layer": 2 }, "sampling": { "interval": 0 } }"#,
        )
        .unwrap();

        assert_eq!(config.micro_batch, 4);
        assert_eq!(config.seq_len, 1024);
        assert_eq!(config.model.n_layer, 2);
        assert_eq!(config.model.n_embd, 768);
        assert_eq!(config.sampling.interval, 0);
        assert_eq!(config.sampling.top_k, 50);
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(&path, r#"{ "max_steps": 50, "warmup_steps": 5 }"#).unwrap();

        let config = TrainingConfig::load(&path).unwrap();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.plan(1).unwrap().schedule.warmup_steps(), 5);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(TrainingConfig::load(&path), Err(WorkerErr::Json(_))));
    }
}
