use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

use super::linear::check_cols;
use crate::{
    MlErr, Result,
    params::{ParamKind, ParamRole, ParamStoreBuilder, Slot},
};

pub const LN_EPS: f32 = 1e-5;

/// Layer normalization over the last axis with a learned scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    dim: usize,
    weight: Slot,
    bias: Slot,

    // Forward metadata
    x_hat: Array2<f32>,
    rstd: Array1<f32>,
}

impl LayerNorm {
    pub fn new(dim: usize, weight: Slot, bias: Slot) -> Self {
        Self {
            dim,
            weight,
            bias,
            x_hat: Array2::zeros((0, dim)),
            rstd: Array1::zeros(0),
        }
    }

    /// Reserves `{prefix}.weight` and `{prefix}.bias` in the store.
    pub fn declare(builder: &mut ParamStoreBuilder, prefix: &str, dim: usize) -> Result<Self> {
        let weight = builder.push(
            format!("{prefix}.weight"),
            &[dim],
            ParamKind::NormScale,
            ParamRole::Standard,
        )?;
        let bias = builder.push(
            format!("{prefix}.bias"),
            &[dim],
            ParamKind::NormShift,
            ParamRole::Standard,
        )?;

        Ok(Self::new(dim, weight, bias))
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_cols("layer norm input", x.ncols(), self.dim)?;

        let n = self.dim as f32;
        let mut x_hat = Array2::zeros(x.raw_dim());
        let mut rstd = Array1::zeros(x.nrows());

        for ((row, mut out), r) in x
            .outer_iter()
            .zip(x_hat.outer_iter_mut())
            .zip(rstd.iter_mut())
        {
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            let s = 1.0 / (var + LN_EPS).sqrt();

            out.zip_mut_with(&row, |o, &v| *o = (v - mean) * s);
            *r = s;
        }

        let y = &x_hat * &self.weight.view1(params)? + &self.bias.view1(params)?;

        self.x_hat = x_hat;
        self.rstd = rstd;
        Ok(y)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.x_hat.dim() {
            return Err(MlErr::SizeMismatch {
                what: "layer norm delta",
                got: d.len(),
                expected: self.x_hat.len(),
            });
        }

        let mut dw = self.weight.view1_mut(grad)?;
        dw += &(&self.x_hat * &d).sum_axis(Axis(0));
        let mut db = self.bias.view1_mut(grad)?;
        db += &d.sum_axis(Axis(0));

        let n = self.dim as f32;
        let dnorm = &d * &self.weight.view1(params)?;
        let mut dx = Array2::zeros(d.raw_dim());

        for (((dn, xh), mut out), &s) in dnorm
            .outer_iter()
            .zip(self.x_hat.outer_iter())
            .zip(dx.outer_iter_mut())
            .zip(self.rstd.iter())
        {
            let mean_dn = dn.sum() / n;
            let mean_dn_xh = dn.dot(&xh) / n;

            Zip::from(&mut out)
                .and(&dn)
                .and(&xh)
                .for_each(|o, &g, &h| *o = s * (g - mean_dn - h * mean_dn_xh));
        }

        Ok(dx)
    }
}
