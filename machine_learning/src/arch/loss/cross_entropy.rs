use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1};

use crate::{MlErr, Result};

/// Softmax cross entropy averaged over rows.
///
/// Keeps the probabilities of the last forward so that backward is
/// `(p - onehot(y)) · scale / N`.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropy {
    probs: Array2<f32>,
    targets: Vec<usize>,
}

impl CrossEntropy {
    pub fn forward(&mut self, logits: ArrayView2<f32>, targets: &[usize]) -> Result<f32> {
        check_targets(logits, targets)?;

        let mut probs = Array2::zeros(logits.raw_dim());
        let mut total = 0.0f64;

        for ((row, out), &y) in logits.outer_iter().zip(probs.outer_iter_mut()).zip(targets) {
            let lse = softmax_into(row, out);
            total += f64::from(lse - row[y]);
        }

        self.probs = probs;
        self.targets = targets.to_vec();
        Ok((total / targets.len() as f64) as f32)
    }

    /// Gradient of `scale * loss` with respect to the logits of the last forward.
    pub fn backward(&self, scale: f32) -> Result<Array2<f32>> {
        if self.targets.is_empty() {
            return Err(MlErr::NoPendingBackward);
        }

        let mut d = self.probs.clone();
        for (mut row, &y) in d.outer_iter_mut().zip(&self.targets) {
            row[y] -= 1.0;
        }

        d *= scale / self.targets.len() as f32;
        Ok(d)
    }
}

/// Per row cross entropy, without reduction.
pub fn token_losses(logits: ArrayView2<f32>, targets: &[usize]) -> Result<Array1<f32>> {
    check_targets(logits, targets)?;

    let mut scratch = Array1::zeros(logits.ncols());
    Ok(logits
        .outer_iter()
        .zip(targets)
        .map(|(row, &y)| softmax_into(row, scratch.view_mut()) - row[y])
        .collect())
}

/// Writes `softmax(row)` into `out` and returns `logsumexp(row)`.
pub(crate) fn softmax_into(row: ArrayView1<f32>, mut out: ArrayViewMut1<f32>) -> f32 {
    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));

    out.zip_mut_with(&row, |o, &v| *o = (v - max).exp());
    let sum = out.sum();
    out /= sum;

    max + sum.ln()
}

fn check_targets(logits: ArrayView2<f32>, targets: &[usize]) -> Result<()> {
    if logits.nrows() != targets.len() {
        return Err(MlErr::SizeMismatch {
            what: "targets",
            got: targets.len(),
            expected: logits.nrows(),
        });
    }

    if let Some(&bad) = targets.iter().find(|&&y| y >= logits.ncols()) {
        return Err(MlErr::TokenOutOfRange {
            token: bad as u32,
            vocab_size: logits.ncols(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn uniform_logits_give_log_vocab() {
        let logits = Array2::<f32>::zeros((3, 8));
        let mut ce = CrossEntropy::default();
        let loss = ce.forward(logits.view(), &[0, 5, 7]).unwrap();
        assert!((loss - 8f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn backward_is_probs_minus_onehot_over_n() {
        let logits = array![[0.0f32, 0.0], [100.0, 0.0]];
        let mut ce = CrossEntropy::default();
        ce.forward(logits.view(), &[1, 0]).unwrap();

        let d = ce.backward(2.0).unwrap();
        assert!((d[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((d[[0, 1]] + 0.5).abs() < 1e-6);
        assert!(d[[1, 0]].abs() < 1e-6);
        assert!(d[[1, 1]].abs() < 1e-6);
    }

    #[test]
    fn token_losses_are_stable_for_large_logits() {
        let logits = array![[1000.0f32, 0.0], [0.0, 1000.0]];
        let losses = token_losses(logits.view(), &[1, 1]).unwrap();
        assert!((losses[0] - 1000.0).abs() < 1e-3);
        assert!(losses[1].abs() < 1e-6);
    }
}
