mod constant;
mod param_gen;
mod random;

use std::{cell::RefCell, rc::Rc};

use log::debug;
use rand::Rng;

pub use constant::ConstParamGen;
pub use param_gen::ParamGen;
pub use random::RandParamGen;

use crate::{
    MlErr, Result,
    params::{ParamKind, ParamRole, ParamStore, ParamTensor},
};

/// Standard deviation of every normally initialized tensor.
pub const INIT_STD: f32 = 0.02;

/// Picks the generator for one tensor.
///
/// # Arguments
/// * `tensor` - The tensor to fill.
/// * `n_layer` - Depth of the model, scales residual projections.
/// * `rng` - The random number generator shared by every tensor of the model.
///
/// # Returns
/// A generator that yields exactly `tensor.numel()` values.
pub fn param_gen_for<R: Rng + 'static>(
    tensor: &ParamTensor,
    n_layer: usize,
    rng: &Rc<RefCell<R>>,
) -> Result<Box<dyn ParamGen>> {
    let n = tensor.numel();

    let param_gen: Box<dyn ParamGen> = match tensor.kind {
        ParamKind::Bias | ParamKind::NormShift => Box::new(ConstParamGen::new(0.0, n)),
        ParamKind::NormScale => Box::new(ConstParamGen::new(1.0, n)),
        ParamKind::Weight | ParamKind::Embedding => {
            let std = match tensor.role {
                ParamRole::Standard => INIT_STD,
                ParamRole::ResidualProjection => INIT_STD * (2.0 * n_layer as f32).powf(-0.5),
            };
            Box::new(RandParamGen::normal(rng.clone(), n, 0.0, std)?)
        }
    };

    Ok(param_gen)
}

/// Fills every tensor of `store` in storage order from a single rng stream.
pub fn init_params<R: Rng + 'static>(store: &mut ParamStore, n_layer: usize, rng: R) -> Result<()> {
    let rng = Rc::new(RefCell::new(rng));
    let tensors = store.tensors().to_vec();

    for tensor in &tensors {
        let mut param_gen = param_gen_for(tensor, n_layer, &rng)?;

        let dst = tensor.slot.get_mut(store.params_mut())?;
        let written = param_gen.fill(dst);
        if written != dst.len() {
            return Err(MlErr::SizeMismatch {
                what: "initial values",
                got: written,
                expected: dst.len(),
            });
        }
    }

    debug!(tensors = tensors.len(), params = store.len(); "initialized parameters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::params::ParamStoreBuilder;

    fn stats(xs: &[f32]) -> (f32, f32) {
        let n = xs.len() as f32;
        let mean = xs.iter().sum::<f32>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn roles_and_kinds_pick_their_distribution() {
        let mut builder = ParamStoreBuilder::new();
        builder
            .push("w", &[200, 100], ParamKind::Weight, ParamRole::Standard)
            .unwrap();
        builder
            .push("proj", &[200, 100], ParamKind::Weight, ParamRole::ResidualProjection)
            .unwrap();
        builder
            .push("b", &[100], ParamKind::Bias, ParamRole::Standard)
            .unwrap();
        builder
            .push("g", &[100], ParamKind::NormScale, ParamRole::Standard)
            .unwrap();
        let mut store = builder.build();

        init_params(&mut store, 8, StdRng::seed_from_u64(1337)).unwrap();

        let (mean, std) = stats(store.get("w").unwrap());
        assert!(mean.abs() < 1e-3);
        assert!((std - 0.02).abs() < 1e-3);

        let (_, std) = stats(store.get("proj").unwrap());
        assert!((std - 0.005).abs() < 3e-4);

        assert!(store.get("b").unwrap().iter().all(|&b| b == 0.0));
        assert!(store.get("g").unwrap().iter().all(|&g| g == 1.0));
    }

    #[test]
    fn same_seed_gives_same_parameters() {
        let build = || {
            let mut builder = ParamStoreBuilder::new();
            builder
                .push("w", &[8, 8], ParamKind::Weight, ParamRole::Standard)
                .unwrap();
            let mut store = builder.build();
            init_params(&mut store, 2, StdRng::seed_from_u64(7)).unwrap();
            store
        };

        assert_eq!(build().params(), build().params());
    }
}
