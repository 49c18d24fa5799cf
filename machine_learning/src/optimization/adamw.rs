use std::ops::Range;

use log::info;

use super::Optimizer;
use crate::{
    MlErr, Result,
    params::{ParamStore, ParamTensor},
};

/// A set of buffer ranges sharing one weight decay coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub ranges: Vec<Range<usize>>,
    pub weight_decay: f32,
}

impl ParamGroup {
    pub fn numel(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// Splits the store into the decayed group (matrices and embeddings) and the
/// non decayed one (biases and normalization parameters).
pub fn decay_groups(store: &ParamStore, weight_decay: f32) -> [ParamGroup; 2] {
    let (decay, no_decay): (Vec<_>, Vec<_>) = store.tensors().iter().partition(|t| t.decays());

    info!(
        "num decayed parameter tensors: {}, with {} parameters",
        decay.len(),
        decay.iter().map(|t| t.numel()).sum::<usize>()
    );
    info!(
        "num non-decayed parameter tensors: {}, with {} parameters",
        no_decay.len(),
        no_decay.iter().map(|t| t.numel()).sum::<usize>()
    );

    let ranges = |tensors: Vec<&ParamTensor>| -> Vec<Range<usize>> {
        tensors.into_iter().map(|t| t.slot.range()).collect()
    };

    [
        ParamGroup {
            ranges: ranges(decay),
            weight_decay,
        },
        ParamGroup {
            ranges: ranges(no_decay),
            weight_decay: 0.0,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamWConfig {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 6e-4,
            beta1: 0.9,
            beta2: 0.95,
            eps: 1e-8,
        }
    }
}

/// Adam with decoupled weight decay and bias corrected moments.
#[derive(Debug)]
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    eps: f32,
    groups: Vec<ParamGroup>,
    m: Box<[f32]>,
    v: Box<[f32]>,
    step: u64,
}

impl AdamW {
    /// Creates the optimizer state for a buffer of `len` parameters.
    ///
    /// # Returns
    /// A `Config` error if a group range falls outside `0..len`.
    pub fn new(len: usize, groups: Vec<ParamGroup>, config: AdamWConfig) -> Result<Self> {
        if let Some(r) = groups.iter().flat_map(|g| &g.ranges).find(|r| r.end > len) {
            return Err(MlErr::Config(format!(
                "parameter group range {r:?} exceeds the {len} parameters"
            )));
        }

        let AdamWConfig {
            lr,
            beta1,
            beta2,
            eps,
        } = config;

        Ok(Self {
            lr,
            beta1,
            beta2,
            beta1_t: 1.0,
            beta2_t: 1.0,
            eps,
            groups,
            m: vec![0.0; len].into_boxed_slice(),
            v: vec![0.0; len].into_boxed_slice(),
            step: 0,
        })
    }

    /// Optimizer steps taken so far.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn learning_rate(&self) -> f32 {
        self.lr
    }
}

impl Optimizer for AdamW {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        let len = self.m.len();
        for (what, got) in [("gradient", grad.len()), ("parameters", params.len())] {
            if got != len {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: len,
                });
            }
        }

        let Self {
            lr,
            beta1: b1,
            beta2: b2,
            eps,
            ..
        } = *self;

        self.step += 1;
        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let step_size = lr / (1.0 - self.beta1_t);
        let bc2_sqrt = (1.0 - self.beta2_t).sqrt();

        for group in &self.groups {
            let decay = 1.0 - lr * group.weight_decay;

            for range in &group.ranges {
                params[range.clone()]
                    .iter_mut()
                    .zip(&grad[range.clone()])
                    .zip(&mut self.m[range.clone()])
                    .zip(&mut self.v[range.clone()])
                    .for_each(|(((p, &g), m), v)| {
                        *p *= decay;
                        *m = b1 * *m + (1.0 - b1) * g;
                        *v = b2 * *v + (1.0 - b2) * g * g;
                        *p -= step_size * *m / (v.sqrt() / bc2_sqrt + eps);
                    });
            }
        }

        Ok(())
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamKind, ParamRole, ParamStoreBuilder};

    fn store() -> ParamStore {
        let mut builder = ParamStoreBuilder::new();
        builder
            .push("w", &[2, 2], ParamKind::Weight, ParamRole::Standard)
            .unwrap();
        builder
            .push("b", &[2], ParamKind::Bias, ParamRole::Standard)
            .unwrap();
        builder
            .push("ln.weight", &[2], ParamKind::NormScale, ParamRole::Standard)
            .unwrap();
        builder.build()
    }

    #[test]
    fn groups_split_by_rank() {
        let [decay, no_decay] = decay_groups(&store(), 0.1);
        assert_eq!(decay.ranges, vec![0..4]);
        assert_eq!(decay.weight_decay, 0.1);
        assert_eq!(no_decay.ranges, vec![4..6, 6..8]);
        assert_eq!(no_decay.weight_decay, 0.0);
        assert_eq!(decay.numel() + no_decay.numel(), 8);
    }

    #[test]
    fn zero_gradient_only_decays_the_decay_group() {
        let store = store();
        let groups = decay_groups(&store, 0.1).to_vec();
        let config = AdamWConfig {
            lr: 0.5,
            ..AdamWConfig::default()
        };
        let mut adamw = AdamW::new(store.len(), groups, config).unwrap();

        let mut params = [1.0; 8];
        adamw.update_params(&[0.0; 8], &mut params).unwrap();

        assert!(params[..4].iter().all(|&p| (p - 0.95).abs() < 1e-6));
        assert!(params[4..].iter().all(|&p| p == 1.0));
        assert_eq!(adamw.step(), 1);
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        let groups = vec![ParamGroup {
            ranges: vec![0..3],
            weight_decay: 0.0,
        }];
        let mut adamw = AdamW::new(3, groups, AdamWConfig::default()).unwrap();
        adamw.set_learning_rate(0.01);

        let mut params = [0.0, 0.0, 0.0];
        adamw.update_params(&[2.0, -0.5, 0.0], &mut params).unwrap();

        // bias corrected m / sqrt(v) is sign(g) on the first step
        assert!((params[0] + 0.01).abs() < 1e-6);
        assert!((params[1] - 0.01).abs() < 1e-6);
        assert_eq!(params[2], 0.0);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut adamw = AdamW::new(2, Vec::new(), AdamWConfig::default()).unwrap();
        let mut params = [0.0; 3];

        assert!(matches!(
            adamw.update_params(&[0.0; 3], &mut params),
            Err(MlErr::SizeMismatch { .. })
        ));
        assert!(AdamW::new(
            2,
            vec![ParamGroup {
                ranges: vec![1..3],
                weight_decay: 0.0
            }],
            AdamWConfig::default()
        )
        .is_err());
    }
}
