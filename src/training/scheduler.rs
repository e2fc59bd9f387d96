//! Learning rate schedules
//!
//! Schedules are plain serializable values queried once per epoch; the
//! trainer passes the resulting rate straight into the optimizer step.

use serde::{Deserialize, Serialize};

/// Per-epoch learning rate schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LrSchedule {
    /// Fixed learning rate
    Constant { lr: f64 },
    /// Multiply by `decay_factor` every `step_size` epochs
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        step_size: usize,
    },
}

impl LrSchedule {
    pub fn constant(lr: f64) -> Self {
        LrSchedule::Constant { lr }
    }

    pub fn step_decay(initial_lr: f64, decay_factor: f64, step_size: usize) -> Self {
        LrSchedule::StepDecay {
            initial_lr,
            decay_factor,
            step_size,
        }
    }

    /// Learning rate for the given zero-based epoch.
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            LrSchedule::Constant { lr } => *lr,
            LrSchedule::StepDecay {
                initial_lr,
                decay_factor,
                step_size,
            } => {
                let steps = epoch / (*step_size).max(1);
                initial_lr * decay_factor.powi(steps as i32)
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            LrSchedule::Constant { lr } => format!("constant lr {}", lr),
            LrSchedule::StepDecay {
                initial_lr,
                decay_factor,
                step_size,
            } => format!(
                "step decay from {} by {} every {} epochs",
                initial_lr, decay_factor, step_size
            ),
        }
    }
}

impl Default for LrSchedule {
    fn default() -> Self {
        LrSchedule::step_decay(1e-3, 0.5, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_schedule() {
        let schedule = LrSchedule::constant(0.01);
        assert!((schedule.get_lr(0) - 0.01).abs() < 1e-12);
        assert!((schedule.get_lr(100) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_step_decay_schedule() {
        let schedule = LrSchedule::step_decay(1e-3, 0.5, 20);
        assert!((schedule.get_lr(0) - 1e-3).abs() < 1e-12);
        assert!((schedule.get_lr(19) - 1e-3).abs() < 1e-12);
        assert!((schedule.get_lr(20) - 5e-4).abs() < 1e-12);
        assert!((schedule.get_lr(39) - 5e-4).abs() < 1e-12);
        assert!((schedule.get_lr(40) - 2.5e-4).abs() < 1e-12);
    }

    #[test]
    fn test_step_decay_zero_step_size() {
        let schedule = LrSchedule::step_decay(1e-3, 0.5, 0);
        // Degenerate step size behaves like a step size of one.
        assert!((schedule.get_lr(1) - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn test_default_schedule() {
        let schedule = LrSchedule::default();
        assert_eq!(schedule, LrSchedule::step_decay(1e-3, 0.5, 20));
        assert!(schedule.description().contains("every 20 epochs"));
    }

    #[test]
    fn test_schedule_serialization() {
        let schedule = LrSchedule::step_decay(1e-3, 0.5, 20);
        let json = serde_json::to_string(&schedule).unwrap();
        let parsed: LrSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule);
    }
}
