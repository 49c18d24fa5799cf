use std::f32::consts::{FRAC_1_SQRT_2, FRAC_2_SQRT_PI};

use ndarray::{Array2, ArrayView2, Zip};

use crate::{MlErr, Result};

// sqrt(2 / pi)
const GELU_SCALE: f32 = FRAC_2_SQRT_PI * FRAC_1_SQRT_2;
const GELU_CUBIC: f32 = 0.044715;

/// The tanh approximation of GELU.
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (GELU_SCALE * (x + GELU_CUBIC * x * x * x)).tanh())
}

pub fn gelu_prime(x: f32) -> f32 {
    let t = (GELU_SCALE * (x + GELU_CUBIC * x * x * x)).tanh();
    let sech2 = 1.0 - t * t;
    0.5 * (1.0 + t) + 0.5 * x * sech2 * GELU_SCALE * (1.0 + 3.0 * GELU_CUBIC * x * x)
}

#[derive(Debug, Clone, Default)]
pub struct Gelu {
    x: Array2<f32>,
}

impl Gelu {
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        self.x = x.to_owned();
        x.mapv(gelu)
    }

    pub fn backward(&self, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        if d.dim() != self.x.dim() {
            return Err(MlErr::SizeMismatch {
                what: "gelu delta",
                got: d.len(),
                expected: self.x.len(),
            });
        }

        Ok(Zip::from(&self.x)
            .and(&d)
            .map_collect(|&x, &g| g * gelu_prime(x)))
    }
}
