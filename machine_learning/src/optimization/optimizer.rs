use crate::Result;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates `params` in place using `grad`.
    ///
    /// # Arguments
    /// * `grad` - The model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Sets the learning rate used by the next update.
    fn set_learning_rate(&mut self, lr: f32);
}
