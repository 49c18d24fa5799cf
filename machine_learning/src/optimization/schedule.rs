use std::f32::consts::PI;

use crate::{MlErr, Result};

/// Linear warmup followed by a cosine decay down to a tenth of the peak.
///
/// The rate is a pure function of the step, nothing else is tracked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrSchedule {
    max_lr: f32,
    min_lr: f32,
    warmup_steps: usize,
    max_steps: usize,
}

impl LrSchedule {
    /// # Returns
    /// A `Config` error if `max_lr` is not positive, `max_steps` is zero or the
    /// warmup is longer than the whole run.
    pub fn new(max_lr: f32, warmup_steps: usize, max_steps: usize) -> Result<Self> {
        if !(max_lr > 0.0 && max_lr.is_finite()) {
            return Err(MlErr::Config(format!("max_lr must be positive, got {max_lr}")));
        }
        if max_steps == 0 || warmup_steps > max_steps {
            return Err(MlErr::Config(format!(
                "invalid schedule: warmup {warmup_steps} steps over {max_steps} steps"
            )));
        }

        Ok(Self {
            max_lr,
            min_lr: 0.1 * max_lr,
            warmup_steps,
            max_steps,
        })
    }

    pub fn max_lr(&self) -> f32 {
        self.max_lr
    }

    pub fn min_lr(&self) -> f32 {
        self.min_lr
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn lr(&self, step: usize) -> f32 {
        if step < self.warmup_steps {
            return self.max_lr * (step + 1) as f32 / self.warmup_steps as f32;
        }
        if step >= self.max_steps {
            return self.min_lr;
        }

        let ratio = (step - self.warmup_steps) as f32 / (self.max_steps - self.warmup_steps) as f32;
        let coeff = 0.5 * (1.0 + (PI * ratio).cos());

        // written from the top so that a zero ratio lands exactly on max_lr
        self.max_lr - (1.0 - coeff) * (self.max_lr - self.min_lr)
    }
}
