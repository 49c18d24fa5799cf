use std::num::NonZeroUsize;

/// Groups micro-steps into one optimizer step.
#[derive(Debug, Clone, Copy)]
pub struct AccumulationWindow {
    micro_steps: NonZeroUsize,
}

impl AccumulationWindow {
    pub fn new(micro_steps: NonZeroUsize) -> Self {
        Self { micro_steps }
    }

    pub fn micro_steps(&self) -> usize {
        self.micro_steps.get()
    }

    /// Factor applied to each micro-step's loss so the window sums to a mean.
    #[inline]
    pub fn loss_scale(&self) -> f32 {
        1.0 / self.micro_steps.get() as f32
    }

    /// Returns true if this micro-step closes the window, i.e. gradients must be
    /// synchronized now.
    #[inline]
    pub fn should_sync(&self, micro_step: usize) -> bool {
        (micro_step + 1) % self.micro_steps.get() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_of_three() {
        let w = AccumulationWindow::new(NonZeroUsize::new(3).unwrap());
        assert!(!w.should_sync(0));
        assert!(!w.should_sync(1));
        assert!(w.should_sync(2));
        assert!(!w.should_sync(3));
        assert!(!w.should_sync(4));
        assert!(w.should_sync(5));
        assert!((w.loss_scale() - 1.0 / 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn window_of_one_syncs_every_step() {
        let w = AccumulationWindow::new(NonZeroUsize::MIN);
        assert!((0..5).all(|i| w.should_sync(i)));
        assert_eq!(w.loss_scale(), 1.0);
    }
}
