//! Flat parameter storage.
//!
//! Every tensor of the model lives in one contiguous `f32` buffer, with a
//! parallel gradient buffer of the same length. Layers only hold `Slot`s into
//! those buffers, so two layers holding the same slot share one storage and
//! accumulate into one gradient.

mod store;
mod tensor;

pub use store::{ParamStore, ParamStoreBuilder};
pub use tensor::{ParamKind, ParamRole, ParamTensor, Slot};
