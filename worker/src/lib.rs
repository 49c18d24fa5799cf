pub mod accumulation;
pub mod builder;
pub mod comm;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod metrics;
pub mod trainer;

pub use builder::TrainerBuilder;
pub use config::{TrainingConfig, TrainingPlan};
pub use context::RuntimeContext;
pub use error::{Result, WorkerErr};
pub use trainer::{StepReport, Trainer};
