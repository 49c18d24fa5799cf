mod adamw;
mod clip;
mod optimizer;
mod schedule;

pub use adamw::{AdamW, AdamWConfig, ParamGroup, decay_groups};
pub use clip::{clip_grad_norm, global_norm};
pub use optimizer::Optimizer;
pub use schedule::LrSchedule;
