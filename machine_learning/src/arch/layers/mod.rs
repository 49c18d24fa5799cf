mod embedding;
mod gelu;
mod layer_norm;
mod linear;

pub use embedding::Embedding;
pub use gelu::Gelu;
pub use layer_norm::{LN_EPS, LayerNorm};
pub use linear::Linear;
