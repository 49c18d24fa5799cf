use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::ParamGen;
use crate::Result;

/// Draws values from `distribution`.
///
/// Every tensor of a model holds the same rng, so initialization consumes one
/// deterministic stream in storage order.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
    remaining: usize,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    /// # Arguments
    /// * `rng` - The model wide rng.
    /// * `distribution` - What to draw from.
    /// * `limit` - How many values to draw in total.
    pub fn new(rng: Rc<RefCell<R>>, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// `N(mean, std_dev)`, as used for every weight matrix and embedding.
    ///
    /// # Returns
    /// An `Init` error if `std_dev` is negative or not finite.
    pub fn normal(rng: Rc<RefCell<R>>, limit: usize, mean: f32, std_dev: f32) -> Result<Self> {
        Ok(Self::new(rng, Normal::new(mean, std_dev)?, limit))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn fill(&mut self, dst: &mut [f32]) -> usize {
        let n = dst.len().min(self.remaining);
        self.remaining -= n;

        let mut rng = self.rng.borrow_mut();
        for x in &mut dst[..n] {
            *x = self.distribution.sample(&mut *rng);
        }
        n
    }
}
