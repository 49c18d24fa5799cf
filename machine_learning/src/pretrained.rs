//! Import of published GPT-2 checkpoints.
//!
//! Fetching the arrays is left to a `WeightSource`. This module only checks that
//! the bundle describes exactly the model's parameters and copies them in,
//! transposing the projections that checkpoints store as `[in, out]`.

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::{
    MlErr, Result,
    arch::{Gpt, GptConfig},
    params::ParamStore,
};

/// Checkpoint names ending like this are stored `[in, out]`.
const TRANSPOSED: [&str; 4] = [
    "attn.c_attn.weight",
    "attn.c_proj.weight",
    "mlp.c_fc.weight",
    "mlp.c_proj.weight",
];

/// Non parameter buffers some checkpoints carry along.
const IGNORED: [&str; 2] = [".attn.bias", ".attn.masked_bias"];

/// A dense row major array.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named arrays of one checkpoint.
pub type WeightBundle = BTreeMap<String, WeightArray>;

/// Something able to hand out the checkpoint of a model size.
pub trait WeightSource {
    fn fetch(&self, model_type: &str) -> Result<WeightBundle>;
}

impl Gpt {
    /// Builds one of the published GPT-2 sizes and loads its weights.
    ///
    /// # Arguments
    /// * `model_type` - One of `gpt2`, `gpt2-medium`, `gpt2-large` or `gpt2-xl`.
    /// * `source` - Where to fetch the checkpoint from.
    pub fn from_pretrained<S: WeightSource + ?Sized>(model_type: &str, source: &S) -> Result<Self> {
        let config = GptConfig::pretrained(model_type)?;
        info!("loading weights from pretrained gpt: {model_type}");

        let mut model = Self::zeroed(config)?;
        let bundle = source.fetch(model_type)?;
        import_weights(model.store_mut(), bundle)?;

        Ok(model)
    }
}

/// Copies `bundle` into `store`.
///
/// # Errors
/// `WeightMismatch` if, ignoring buffers, the names differ from the store's
/// logical names or any shape differs from the expected one.
pub fn import_weights(store: &mut ParamStore, mut bundle: WeightBundle) -> Result<()> {
    bundle.retain(|name, _| !IGNORED.iter().any(|suffix| name.ends_with(suffix)));

    let expected: BTreeSet<&str> = store.logical_names().collect();
    let got: BTreeSet<&str> = bundle.keys().map(String::as_str).collect();

    if expected != got {
        let missing: Vec<_> = expected.difference(&got).collect();
        let unexpected: Vec<_> = got.difference(&expected).collect();
        return Err(MlErr::WeightMismatch(format!(
            "missing {missing:?}, unexpected {unexpected:?}"
        )));
    }

    for (name, array) in bundle {
        let tensor = store
            .tensor(&name)
            .ok_or_else(|| MlErr::UnknownParam(name.clone()))?
            .clone();

        let transposed = TRANSPOSED.iter().any(|suffix| name.ends_with(suffix));
        let stored_shape: Vec<usize> = if transposed {
            tensor.shape.iter().rev().copied().collect()
        } else {
            tensor.shape.clone()
        };

        if array.shape != stored_shape || array.data.len() != tensor.numel() {
            return Err(MlErr::WeightMismatch(format!(
                "{name}: checkpoint shape {:?}, expected {stored_shape:?}",
                array.shape
            )));
        }

        // an alias shares its storage with the tensor it names
        if tensor.name != name {
            continue;
        }

        let dst = tensor.slot.get_mut(store.params_mut())?;
        if transposed {
            let (rows, cols) = (stored_shape[0], stored_shape[1]);
            for r in 0..rows {
                for c in 0..cols {
                    dst[c * rows + r] = array.data[r * cols + c];
                }
            }
        } else {
            dst.copy_from_slice(&array.data);
        }
    }

    Ok(())
}
