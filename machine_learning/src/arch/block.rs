use ndarray::Array2;

use super::{CausalSelfAttention, GptConfig, Mlp, layers::LayerNorm};
use crate::{Result, params::ParamStoreBuilder};

/// A pre-norm transformer block.
#[derive(Debug, Clone)]
pub struct Block {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    pub fn declare(
        builder: &mut ParamStoreBuilder,
        prefix: &str,
        config: &GptConfig,
    ) -> Result<Self> {
        let c = config.n_embd;

        Ok(Self {
            ln_1: LayerNorm::declare(builder, &format!("{prefix}.ln_1"), c)?,
            attn: CausalSelfAttention::declare(
                builder,
                &format!("{prefix}.attn"),
                c,
                config.n_head,
            )?,
            ln_2: LayerNorm::declare(builder, &format!("{prefix}.ln_2"), c)?,
            mlp: Mlp::declare(builder, &format!("{prefix}.mlp"), c)?,
        })
    }

    /// `x + attn(ln_1(x))`, then `x + mlp(ln_2(x))`.
    pub fn forward(
        &mut self,
        params: &[f32],
        x: Array2<f32>,
        shape: (usize, usize),
    ) -> Result<Array2<f32>> {
        let h = self.ln_1.forward(params, x.view())?;
        let x = x + &self.attn.forward(params, h.view(), shape)?;

        let h = self.ln_2.forward(params, x.view())?;
        Ok(x + &self.mlp.forward(params, h.view())?)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let dh = self.mlp.backward(params, grad, d.view())?;
        let d = d + &self.ln_2.backward(params, grad, dh.view())?;

        let dh = self.attn.backward(params, grad, d.view())?;
        Ok(d + &self.ln_1.backward(params, grad, dh.view())?)
    }
}
