pub mod arch;
pub mod error;
pub mod eval;
pub mod initialization;
pub mod optimization;
pub mod params;
pub mod pretrained;
pub mod sampling;

pub use arch::{Gpt, GptConfig, Mode};
pub use error::{MlErr, Result};
