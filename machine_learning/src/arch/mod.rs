mod attention;
mod block;
mod config;
mod gpt;
pub mod layers;
pub mod loss;
mod mlp;

pub use attention::CausalSelfAttention;
pub use block::Block;
pub use config::GptConfig;
pub use gpt::{Gpt, Mode};
pub use mlp::Mlp;
