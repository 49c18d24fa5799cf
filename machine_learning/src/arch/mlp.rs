use ndarray::{Array2, ArrayView2};

use super::layers::{Gelu, Linear};
use crate::{
    Result,
    params::{ParamRole, ParamStoreBuilder},
};

/// Position wise feed forward: expand ×4, GELU, contract.
#[derive(Debug, Clone)]
pub struct Mlp {
    c_fc: Linear,
    gelu: Gelu,
    c_proj: Linear,
}

impl Mlp {
    pub fn declare(builder: &mut ParamStoreBuilder, prefix: &str, n_embd: usize) -> Result<Self> {
        let hidden = 4 * n_embd;

        Ok(Self {
            c_fc: Linear::declare(
                builder,
                &format!("{prefix}.c_fc"),
                (n_embd, hidden),
                true,
                ParamRole::Standard,
            )?,
            gelu: Gelu::default(),
            c_proj: Linear::declare(
                builder,
                &format!("{prefix}.c_proj"),
                (hidden, n_embd),
                true,
                ParamRole::ResidualProjection,
            )?,
        })
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let h = self.c_fc.forward(params, x)?;
        let h = self.gelu.forward(h.view());
        self.c_proj.forward(params, h.view())
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let d = self.c_proj.backward(params, grad, d)?;
        let d = self.gelu.backward(d.view())?;
        self.c_fc.backward(params, grad, d.view())
    }
}
