//! Multiple choice scoring: every candidate continuation is scored by the loss
//! the model assigns to its completion tokens, the lowest loss wins.

use ndarray::{ArrayView2, s};

use crate::{MlErr, Result, arch::Gpt, arch::loss::token_losses};

/// Outcome of scoring one example.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Index of the candidate with the lowest summed loss.
    pub pred: usize,
    /// Index of the candidate with the lowest mean loss.
    pub pred_norm: usize,
    pub sum_losses: Vec<f32>,
    pub avg_losses: Vec<f32>,
}

/// Scores `k` candidates padded to a common length.
///
/// # Arguments
/// * `model` - The model, only its forward pass is used.
/// * `tokens` - Candidate token ids of shape `[k, n]`.
/// * `mask` - `1` where a position belongs to the completion, same shape.
///
/// # Returns
/// The prediction or `EmptyCompletion` if a candidate has no masked position
/// after the first one.
pub fn score_candidates(
    model: &mut Gpt,
    tokens: ArrayView2<u32>,
    mask: ArrayView2<u8>,
) -> Result<Prediction> {
    if mask.dim() != tokens.dim() {
        return Err(MlErr::SizeMismatch {
            what: "completion mask",
            got: mask.len(),
            expected: tokens.len(),
        });
    }

    let (k, n) = tokens.dim();
    let (logits, _) = model.forward(tokens, None)?;

    let mut sum_losses = Vec::with_capacity(k);
    let mut avg_losses = Vec::with_capacity(k);

    for candidate in 0..k {
        // position i predicts token i + 1
        let shift_logits = logits.slice(s![candidate, ..n.saturating_sub(1), ..]);
        let shift_targets: Vec<usize> = tokens
            .slice(s![candidate, 1..])
            .iter()
            .map(|&t| t as usize)
            .collect();
        let losses = token_losses(shift_logits, &shift_targets)?;

        let shift_mask = mask.slice(s![candidate, 1..]);
        let (sum, count) = losses
            .iter()
            .zip(shift_mask)
            .filter(|(_, m)| **m != 0)
            .fold((0.0f32, 0usize), |(sum, count), (l, _)| (sum + l, count + 1));

        if count == 0 {
            return Err(MlErr::EmptyCompletion { candidate });
        }

        sum_losses.push(sum);
        avg_losses.push(sum / count as f32);
    }

    Ok(Prediction {
        pred: argmin(&sum_losses),
        pred_norm: argmin(&avg_losses),
        sum_losses,
        avg_losses,
    })
}

fn argmin(xs: &[f32]) -> usize {
    xs.iter()
        .enumerate()
        .fold((0, f32::INFINITY), |(best, min), (i, &x)| {
            if x < min { (i, x) } else { (best, min) }
        })
        .0
}

/// Running accuracy over scored examples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub correct: usize,
    pub correct_norm: usize,
}

impl Tally {
    pub fn record(&mut self, prediction: &Prediction, label: usize) {
        self.total += 1;
        self.correct += usize::from(prediction.pred == label);
        self.correct_norm += usize::from(prediction.pred_norm == label);
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.correct, self.total)
    }

    pub fn accuracy_norm(&self) -> f32 {
        ratio(self.correct_norm, self.total)
    }
}

fn ratio(a: usize, b: usize) -> f32 {
    if b == 0 { 0.0 } else { a as f32 / b as f32 }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::arch::GptConfig;

    fn model() -> Gpt {
        let config = GptConfig {
            block_size: 8,
            vocab_size: 7,
            n_layer: 1,
            n_head: 2,
            n_embd: 4,
        };
        Gpt::new(config, 3).unwrap()
    }

    #[test]
    fn argmin_picks_first_minimum() {
        assert_eq!(argmin(&[3.0, 1.0, 1.0, 2.0]), 1);
    }

    #[test]
    fn scores_match_manual_masked_losses() {
        let mut model = model();
        let tokens = Array2::from_shape_vec((2, 5), vec![1, 2, 3, 4, 0, 1, 2, 5, 6, 6]).unwrap();
        let mask = Array2::from_shape_vec((2, 5), vec![0, 0, 1, 1, 0, 0, 0, 1, 1, 1]).unwrap();

        let prediction = score_candidates(&mut model, tokens.view(), mask.view()).unwrap();

        let (logits, _) = model.forward(tokens.view(), None).unwrap();
        let row = logits.slice(s![1, ..4, ..]);
        let losses = token_losses(row, &[2, 5, 6, 6]).unwrap();
        let expected = losses[1] + losses[2] + losses[3];

        assert!((prediction.sum_losses[1] - expected).abs() < 1e-5);
        assert!((prediction.avg_losses[1] - expected / 3.0).abs() < 1e-5);
        assert_eq!(prediction.pred, argmin(&prediction.sum_losses));
        assert_eq!(prediction.pred_norm, argmin(&prediction.avg_losses));
    }

    #[test]
    fn empty_completion_is_an_error() {
        let mut model = model();
        let tokens = Array2::<u32>::zeros((1, 3));
        let mask = Array2::from_shape_vec((1, 3), vec![1u8, 0, 0]).unwrap();

        assert!(matches!(
            score_candidates(&mut model, tokens.view(), mask.view()),
            Err(MlErr::EmptyCompletion { candidate: 0 })
        ));
    }

    #[test]
    fn tally_counts_both_accuracies() {
        let prediction = Prediction {
            pred: 0,
            pred_norm: 1,
            sum_losses: vec![1.0, 2.0],
            avg_losses: vec![1.0, 0.5],
        };

        let mut tally = Tally::default();
        tally.record(&prediction, 1);
        tally.record(&prediction, 0);

        assert_eq!(tally.total, 2);
        assert_eq!(tally.accuracy(), 0.5);
        assert_eq!(tally.accuracy_norm(), 0.5);
    }
}
