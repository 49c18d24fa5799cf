use log::info;
use ndarray::{Array2, Array3, ArrayView2};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Block, GptConfig,
    layers::{Embedding, LayerNorm, Linear},
    loss::CrossEntropy,
};
use crate::{
    MlErr, Result,
    initialization::init_params,
    params::{ParamStore, ParamStoreBuilder},
};

pub const WTE: &str = "transformer.wte.weight";
pub const WPE: &str = "transformer.wpe.weight";
pub const LM_HEAD: &str = "lm_head.weight";

/// Whether a forward pass may be followed by a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A GPT-2 decoder whose parameters live in one `ParamStore`.
///
/// The output head is an alias of the token embedding table, both usages read
/// the same slot and backward adds both contributions into one gradient.
#[derive(Debug, Clone)]
pub struct Gpt {
    config: GptConfig,
    store: ParamStore,
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    loss: CrossEntropy,
    mode: Mode,
    pending: Option<(usize, usize)>,
}

impl Gpt {
    /// Builds a model with freshly initialized parameters.
    ///
    /// # Arguments
    /// * `config` - The architecture.
    /// * `seed` - Seed of the initialization rng, every replica must use the same one.
    pub fn new(config: GptConfig, seed: u64) -> Result<Self> {
        let mut model = Self::zeroed(config)?;
        init_params(
            &mut model.store,
            config.n_layer,
            StdRng::seed_from_u64(seed),
        )?;

        info!(params = model.num_params(); "built gpt model");
        Ok(model)
    }

    /// Lays out every tensor of the architecture with all parameters at zero.
    pub(crate) fn zeroed(config: GptConfig) -> Result<Self> {
        config.validate()?;

        let GptConfig {
            block_size,
            vocab_size,
            n_layer,
            n_embd,
            ..
        } = config;

        let mut builder = ParamStoreBuilder::new();
        let wte = Embedding::declare(&mut builder, WTE, vocab_size, n_embd)?;
        let wpe = Embedding::declare(&mut builder, WPE, block_size, n_embd)?;
        let blocks = (0..n_layer)
            .map(|i| Block::declare(&mut builder, &format!("transformer.h.{i}"), &config))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = LayerNorm::declare(&mut builder, "transformer.ln_f", n_embd)?;
        let head = builder.alias(LM_HEAD, WTE)?;
        let lm_head = Linear::new(n_embd, vocab_size, head, None);

        Ok(Self {
            config,
            store: builder.build(),
            wte,
            wpe,
            blocks,
            ln_f,
            lm_head,
            loss: CrossEntropy::default(),
            mode: Mode::Train,
            pending: None,
        })
    }

    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    /// Number of trainable scalars, the tied embedding counted once.
    pub fn num_params(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParamStore {
        &mut self.store
    }

    pub fn params(&self) -> &[f32] {
        self.store.params()
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        self.store.params_mut()
    }

    pub fn grad(&self) -> &[f32] {
        self.store.grad()
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        self.store.grad_mut()
    }

    pub fn zero_grad(&mut self) {
        self.store.zero_grad();
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn train(&mut self) {
        self.mode = Mode::Train;
    }

    /// Switches to inference, a later `backward` fails until `train` is called.
    pub fn eval(&mut self) {
        self.mode = Mode::Eval;
        self.pending = None;
    }

    /// Runs the model over a batch of token ids.
    ///
    /// # Arguments
    /// * `tokens` - Ids of shape `[b, t]` with `t <= block_size`.
    /// * `targets` - Optional next token ids of the same shape.
    ///
    /// # Returns
    /// Logits of shape `[b, t, vocab_size]` and, if targets were given, the mean
    /// cross entropy over every position.
    pub fn forward(
        &mut self,
        tokens: ArrayView2<u32>,
        targets: Option<ArrayView2<u32>>,
    ) -> Result<(Array3<f32>, Option<f32>)> {
        let (b, t) = tokens.dim();
        self.pending = None;

        if t > self.config.block_size {
            return Err(MlErr::SequenceTooLong {
                got: t,
                max: self.config.block_size,
            });
        }
        if tokens.is_empty() {
            return Err(MlErr::Config("cannot forward an empty batch".to_string()));
        }

        let ids = self.checked_ids(tokens)?;
        let targets = targets
            .map(|targets| {
                if targets.dim() != tokens.dim() {
                    return Err(MlErr::SizeMismatch {
                        what: "targets",
                        got: targets.len(),
                        expected: tokens.len(),
                    });
                }
                self.checked_ids(targets)
            })
            .transpose()?;
        let positions: Vec<usize> = (0..b).flat_map(|_| 0..t).collect();

        let params = self.store.params();
        let mut x = self.wte.forward(params, &ids)? + &self.wpe.forward(params, &positions)?;

        for block in &mut self.blocks {
            x = block.forward(params, x, (b, t))?;
        }

        let x = self.ln_f.forward(params, x.view())?;
        let logits = self.lm_head.forward(params, x.view())?;

        let loss = match targets {
            Some(targets) => Some(self.loss.forward(logits.view(), &targets)?),
            None => None,
        };

        if loss.is_some() && self.mode == Mode::Train {
            self.pending = Some((b, t));
        }

        let logits = logits.into_shape_with_order((b, t, self.config.vocab_size))?;
        Ok((logits, loss))
    }

    /// Forward with targets, returning only the loss.
    pub fn loss(&mut self, tokens: ArrayView2<u32>, targets: ArrayView2<u32>) -> Result<f32> {
        let (_, loss) = self.forward(tokens, Some(targets))?;
        loss.ok_or(MlErr::NoPendingBackward)
    }

    /// Backpropagates `loss_scale * loss` of the last training forward.
    ///
    /// Gradients are added to whatever the gradient buffer already holds, call
    /// `zero_grad` to start a new accumulation.
    pub fn backward(&mut self, loss_scale: f32) -> Result<()> {
        if self.pending.take().is_none() {
            return Err(MlErr::NoPendingBackward);
        }

        let (params, grad) = self.store.buffers_mut();
        let params = &*params;

        let d = self.loss.backward(loss_scale)?;
        let d = self.lm_head.backward(params, grad, d.view())?;
        let mut d = self.ln_f.backward(params, grad, d.view())?;

        for block in self.blocks.iter_mut().rev() {
            d = block.backward(params, grad, d)?;
        }

        self.wte.backward(grad, d.view())?;
        self.wpe.backward(grad, d.view())?;
        Ok(())
    }

    fn checked_ids(&self, tokens: ArrayView2<u32>) -> Result<Vec<usize>> {
        let vocab_size = self.config.vocab_size;

        tokens
            .iter()
            .map(|&token| {
                let id = token as usize;
                if id >= vocab_size {
                    return Err(MlErr::TokenOutOfRange { token, vocab_size });
                }
                Ok(id)
            })
            .collect()
    }
}
