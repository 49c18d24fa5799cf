use ndarray::{Array2, ArrayView2, Axis, linalg};

use crate::{
    MlErr, Result,
    params::{ParamKind, ParamRole, ParamStoreBuilder, Slot},
};

/// A fully connected layer, `y = x·Wᵀ + b` with `W` stored as `[out, in]`.
///
/// The layer only knows where its weights live, the values are passed in on every
/// call. Backward accumulates into the gradient buffer instead of overwriting it.
#[derive(Debug, Clone)]
pub struct Linear {
    in_dim: usize,
    out_dim: usize,
    weight: Slot,
    bias: Option<Slot>,

    // Forward metadata
    x: Array2<f32>,
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, weight: Slot, bias: Option<Slot>) -> Self {
        Self {
            in_dim,
            out_dim,
            weight,
            bias,
            x: Array2::zeros((0, in_dim)),
        }
    }

    /// Reserves `{prefix}.weight` and, if requested, `{prefix}.bias` in the store.
    pub fn declare(
        builder: &mut ParamStoreBuilder,
        prefix: &str,
        (in_dim, out_dim): (usize, usize),
        bias: bool,
        role: ParamRole,
    ) -> Result<Self> {
        let weight = builder.push(
            format!("{prefix}.weight"),
            &[out_dim, in_dim],
            ParamKind::Weight,
            role,
        )?;

        let bias = if bias {
            Some(builder.push(
                format!("{prefix}.bias"),
                &[out_dim],
                ParamKind::Bias,
                ParamRole::Standard,
            )?)
        } else {
            None
        };

        Ok(Self::new(in_dim, out_dim, weight, bias))
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_cols("linear input", x.ncols(), self.in_dim)?;

        let w = self.weight.view2(params, (self.out_dim, self.in_dim))?;
        let mut z = Array2::zeros((x.nrows(), self.out_dim));
        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut z);

        if let Some(bias) = self.bias {
            z += &bias.view1(params)?;
        }

        self.x = x.to_owned();
        Ok(z)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        check_cols("linear delta", d.ncols(), self.out_dim)?;
        if d.nrows() != self.x.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "linear delta rows",
                got: d.nrows(),
                expected: self.x.nrows(),
            });
        }

        let mut dw = self.weight.view2_mut(grad, (self.out_dim, self.in_dim))?;
        linalg::general_mat_mul(1.0, &d.t(), &self.x, 1.0, &mut dw);

        if let Some(bias) = self.bias {
            let mut db = bias.view1_mut(grad)?;
            db += &d.sum_axis(Axis(0));
        }

        let w = self.weight.view2(params, (self.out_dim, self.in_dim))?;
        let mut dx = Array2::zeros((d.nrows(), self.in_dim));
        linalg::general_mat_mul(1.0, &d, &w, 0.0, &mut dx);

        Ok(dx)
    }
}

pub(crate) fn check_cols(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got,
            expected,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn forward_and_accumulating_backward() {
        // W = [[1, 2], [3, 4], [5, 6]], b = [0.5, -0.5, 1]
        let params = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.5, -0.5, 1.0];
        let mut grad = [0.0; 9];
        let mut linear = Linear::new(2, 3, Slot::new(0, 6), Some(Slot::new(6, 3)));

        let x = array![[1.0f32, -1.0], [2.0, 0.0]];
        let y = linear.forward(&params, x.view()).unwrap();
        assert_eq!(y, array![[-0.5f32, -1.5, 0.0], [2.5, 5.5, 11.0]]);

        let d = array![[1.0f32, 0.0, 0.0], [0.0, 1.0, 1.0]];
        let dx = linear.backward(&params, &mut grad, d.view()).unwrap();
        assert_eq!(dx, array![[1.0f32, 2.0], [8.0, 10.0]]);
        assert_eq!(grad, [1.0, -1.0, 2.0, 0.0, 2.0, 0.0, 1.0, 1.0, 1.0]);

        linear.backward(&params, &mut grad, d.view()).unwrap();
        assert_eq!(grad[0], 2.0);
        assert_eq!(grad[8], 2.0);
    }

    #[test]
    fn wrong_input_width_is_an_error() {
        let params = [0.0; 6];
        let mut linear = Linear::new(2, 3, Slot::new(0, 6), None);
        let x = Array2::<f32>::zeros((1, 3));

        assert!(matches!(
            linear.forward(&params, x.view()),
            Err(MlErr::SizeMismatch { .. })
        ));
    }
}
