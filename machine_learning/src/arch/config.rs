use crate::{MlErr, Result};

/// Hyper parameters of a GPT-2 style decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptConfig {
    pub block_size: usize,
    pub vocab_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
}

impl Default for GptConfig {
    /// GPT-2 small with the vocabulary padded to a multiple of 64.
    fn default() -> Self {
        Self {
            block_size: 1024,
            vocab_size: 50304,
            n_layer: 12,
            n_head: 12,
            n_embd: 768,
        }
    }
}

impl GptConfig {
    /// The published GPT-2 sizes.
    ///
    /// # Arguments
    /// * `model_type` - One of `gpt2`, `gpt2-medium`, `gpt2-large` or `gpt2-xl`.
    ///
    /// # Returns
    /// The configuration or `UnknownModelType`.
    pub fn pretrained(model_type: &str) -> Result<Self> {
        let (n_layer, n_head, n_embd) = match model_type {
            "gpt2" => (12, 12, 768),
            "gpt2-medium" => (24, 16, 1024),
            "gpt2-large" => (36, 20, 1280),
            "gpt2-xl" => (48, 25, 1600),
            other => return Err(MlErr::UnknownModelType(other.to_string())),
        };

        Ok(Self {
            block_size: 1024,
            vocab_size: 50257,
            n_layer,
            n_head,
            n_embd,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("block_size", self.block_size),
            ("vocab_size", self.vocab_size),
            ("n_layer", self.n_layer),
            ("n_head", self.n_head),
            ("n_embd", self.n_embd),
        ];

        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(MlErr::Config(format!("{name} must be greater than zero")));
        }

        if self.n_embd % self.n_head != 0 {
            return Err(MlErr::Config(format!(
                "n_embd {} is not divisible by n_head {}",
                self.n_embd, self.n_head
            )));
        }

        Ok(())
    }

    pub fn head_size(&self) -> usize {
        self.n_embd / self.n_head
    }
}
