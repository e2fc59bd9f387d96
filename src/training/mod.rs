//! Model training
//!
//! The [`trainer::Trainer`] owns the optimization loop for a single model;
//! [`supervised::run_training`] drives it end to end, from metadata to run
//! artifacts. Learning rate schedules live in [`scheduler`].

pub mod scheduler;
pub mod supervised;
pub mod trainer;

pub use scheduler::LrSchedule;
pub use supervised::run_training;
pub use trainer::{
    BestUpdate, Criterion, EpochStats, Trainer, TrainingState, LABEL_SMOOTHING, WEIGHT_DECAY,
};
