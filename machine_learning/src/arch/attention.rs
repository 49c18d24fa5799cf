use ndarray::{Array2, Array4, ArrayView2, Axis, s};

use super::layers::Linear;
use crate::{
    MlErr, Result,
    params::{ParamRole, ParamStoreBuilder},
};

/// Multi-head causal self-attention.
///
/// One projection produces `[q | k | v]` for every head, each head attends only
/// to positions at or before its own, and a second projection mixes the
/// concatenated heads back into the residual stream.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    n_head: usize,
    n_embd: usize,
    c_attn: Linear,
    c_proj: Linear,

    // Forward metadata
    qkv: Array2<f32>,
    att: Array4<f32>,
    shape: (usize, usize),
}

impl CausalSelfAttention {
    pub fn declare(
        builder: &mut ParamStoreBuilder,
        prefix: &str,
        n_embd: usize,
        n_head: usize,
    ) -> Result<Self> {
        if n_head == 0 || n_embd % n_head != 0 {
            return Err(MlErr::Config(format!(
                "n_embd {n_embd} is not divisible by n_head {n_head}"
            )));
        }

        let c_attn = Linear::declare(
            builder,
            &format!("{prefix}.c_attn"),
            (n_embd, 3 * n_embd),
            true,
            ParamRole::Standard,
        )?;
        let c_proj = Linear::declare(
            builder,
            &format!("{prefix}.c_proj"),
            (n_embd, n_embd),
            true,
            ParamRole::ResidualProjection,
        )?;

        Ok(Self {
            n_head,
            n_embd,
            c_attn,
            c_proj,
            qkv: Array2::zeros((0, 3 * n_embd)),
            att: Array4::zeros((0, n_head, 0, 0)),
            shape: (0, 0),
        })
    }

    /// # Arguments
    /// * `params` - The model's parameter buffer.
    /// * `x` - Activations of shape `[b * t, n_embd]`, batch major.
    /// * `(b, t)` - Batch size and sequence length folded into `x`'s rows.
    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView2<f32>,
        (b, t): (usize, usize),
    ) -> Result<Array2<f32>> {
        if x.nrows() != b * t {
            return Err(MlErr::SizeMismatch {
                what: "attention rows",
                got: x.nrows(),
                expected: b * t,
            });
        }

        let qkv = self.c_attn.forward(params, x)?;
        let c = self.n_embd;
        let hs = c / self.n_head;
        let scale = 1.0 / (hs as f32).sqrt();

        let mut y = Array2::zeros((b * t, c));
        let mut att = Array4::zeros((b, self.n_head, t, t));

        for bi in 0..b {
            let rows = bi * t..(bi + 1) * t;

            for h in 0..self.n_head {
                let q = qkv.slice(s![rows.clone(), h * hs..(h + 1) * hs]);
                let k = qkv.slice(s![rows.clone(), c + h * hs..c + (h + 1) * hs]);
                let v = qkv.slice(s![rows.clone(), 2 * c + h * hs..2 * c + (h + 1) * hs]);

                let mut scores = q.dot(&k.t()) * scale;
                causal_softmax(&mut scores);

                y.slice_mut(s![rows.clone(), h * hs..(h + 1) * hs])
                    .assign(&scores.dot(&v));
                att.slice_mut(s![bi, h, .., ..]).assign(&scores);
            }
        }

        self.qkv = qkv;
        self.att = att;
        self.shape = (b, t);

        self.c_proj.forward(params, y.view())
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let dy = self.c_proj.backward(params, grad, d)?;

        let (b, t) = self.shape;
        let c = self.n_embd;
        let hs = c / self.n_head;
        let scale = 1.0 / (hs as f32).sqrt();
        let mut dqkv = Array2::zeros(self.qkv.raw_dim());

        for bi in 0..b {
            let rows = bi * t..(bi + 1) * t;

            for h in 0..self.n_head {
                let (qc, kc, vc) = (h * hs, c + h * hs, 2 * c + h * hs);
                let q = self.qkv.slice(s![rows.clone(), qc..qc + hs]);
                let k = self.qkv.slice(s![rows.clone(), kc..kc + hs]);
                let v = self.qkv.slice(s![rows.clone(), vc..vc + hs]);
                let att = self.att.slice(s![bi, h, .., ..]);
                let dy_h = dy.slice(s![rows.clone(), qc..qc + hs]);

                let datt = dy_h.dot(&v.t());
                let dv = att.t().dot(&dy_h);

                // softmax jacobian, row wise: a * (da - <a, da>)
                let mut dscores = &att * &datt;
                let row_dot = dscores.sum_axis(Axis(1)).insert_axis(Axis(1));
                dscores -= &(&att * &row_dot);
                dscores *= scale;

                dqkv.slice_mut(s![rows.clone(), qc..qc + hs])
                    .assign(&dscores.dot(&k));
                dqkv.slice_mut(s![rows.clone(), kc..kc + hs])
                    .assign(&dscores.t().dot(&q));
                dqkv.slice_mut(s![rows.clone(), vc..vc + hs]).assign(&dv);
            }
        }

        self.c_attn.backward(params, grad, dqkv.view())
    }
}

/// Row wise softmax where row `i` only sees columns `0..=i`, the rest are set to
/// exactly zero.
fn causal_softmax(scores: &mut Array2<f32>) {
    for (i, mut row) in scores.outer_iter_mut().enumerate() {
        let max = row
            .iter()
            .take(i + 1)
            .fold(f32::NEG_INFINITY, |m, &v| m.max(v));

        let mut sum = 0.0;
        for (j, v) in row.iter_mut().enumerate() {
            if j <= i {
                *v = (*v - max).exp();
                sum += *v;
            } else {
                *v = 0.0;
            }
        }

        row /= sum;
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn causal_softmax_masks_the_future() {
        let mut scores = array![[1.0f32, 50.0, 50.0], [0.0, 0.0, 50.0], [1.0, 2.0, 3.0]];
        causal_softmax(&mut scores);

        assert_eq!(scores[[0, 0]], 1.0);
        assert_eq!(scores[[0, 1]], 0.0);
        assert_eq!(scores[[0, 2]], 0.0);
        assert!((scores[[1, 0]] - 0.5).abs() < 1e-6);
        assert_eq!(scores[[1, 2]], 0.0);
        assert!((scores.row(2).sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn heads_must_divide_embedding() {
        let mut builder = ParamStoreBuilder::new();
        assert!(matches!(
            CausalSelfAttention::declare(&mut builder, "attn", 10, 4),
            Err(MlErr::Config(_))
        ));
    }
}
