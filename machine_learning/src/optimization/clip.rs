/// L2 norm of the whole buffer, accumulated in `f64`.
pub fn global_norm(grad: &[f32]) -> f32 {
    grad.iter()
        .map(|&g| f64::from(g) * f64::from(g))
        .sum::<f64>()
        .sqrt() as f32
}

/// Rescales `grad` so that its global norm is at most `max_norm`.
///
/// # Returns
/// The norm before clipping.
pub fn clip_grad_norm(grad: &mut [f32], max_norm: f32) -> f32 {
    let norm = global_norm(grad);
    let coef = max_norm / (norm + 1e-6);

    if coef < 1.0 {
        grad.iter_mut().for_each(|g| *g *= coef);
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_gradients_are_scaled_down() {
        let mut grad = [3.0, 4.0];
        let norm = clip_grad_norm(&mut grad, 1.0);

        assert_eq!(norm, 5.0);
        assert!((global_norm(&grad) - 1.0).abs() < 1e-5);
        assert!((grad[0] / grad[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let mut grad = [0.3, -0.4];
        let norm = clip_grad_norm(&mut grad, 1.0);

        assert!((norm - 0.5).abs() < 1e-6);
        assert_eq!(grad, [0.3, -0.4]);
    }
}
