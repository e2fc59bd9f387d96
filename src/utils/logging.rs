//! Logging utilities built on the tracing ecosystem
//!
//! Sets up the global tracing subscriber and provides small helper loggers
//! for long-running operations and the per-epoch training loop.

use std::time::Instant;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Configuration for the global tracing subscriber.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level that gets emitted
    pub level: LogLevel,
    /// Include the event target (module path) in output
    pub include_target: bool,
    /// Include thread ids in output
    pub include_thread_ids: bool,
    /// Use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose configuration used with the `--verbose` flag.
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Warnings and errors only.
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Warn,
            ..Self::default()
        }
    }
}

/// Log level selection, convertible to a tracing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Install the global tracing subscriber.
///
/// Returns an error if a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set global logging subscriber: {}", e))
}

/// Install the default subscriber (info level, no targets).
pub fn init_default_logging() -> Result<(), String> {
    init_logging(&LogConfig::default())
}

/// Install the verbose subscriber (debug level with targets).
pub fn init_verbose_logging() -> Result<(), String> {
    init_logging(&LogConfig::verbose())
}

/// Periodic progress reporting for long-running loops.
///
/// Emits an info event every `log_interval` items with percentage, rate and
/// an ETA estimate.
pub struct ProgressLogger {
    operation: String,
    total: usize,
    current: usize,
    log_interval: usize,
    start_time: Instant,
}

impl ProgressLogger {
    pub fn new(operation: impl Into<String>, total: usize) -> Self {
        let log_interval = (total / 10).max(1);
        Self {
            operation: operation.into(),
            total,
            current: 0,
            log_interval,
            start_time: Instant::now(),
        }
    }

    pub fn with_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    pub fn update(&mut self, current: usize) {
        self.current = current;
        if current % self.log_interval == 0 || current == self.total {
            let pct = if self.total > 0 {
                current as f64 / self.total as f64 * 100.0
            } else {
                0.0
            };
            let elapsed = self.start_time.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                current as f64 / elapsed
            } else {
                0.0
            };
            let eta = if rate > 0.0 {
                (self.total - current) as f64 / rate
            } else {
                0.0
            };
            tracing::info!(
                "{}: {}/{} ({:.1}%) - {:.1} items/s - ETA {:.0}s",
                self.operation,
                current,
                self.total,
                pct,
                rate,
                eta
            );
        }
    }

    pub fn increment(&mut self) {
        self.update(self.current + 1);
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        tracing::info!(
            "{}: completed {} items in {:.1}s",
            self.operation,
            self.total,
            elapsed
        );
    }
}

/// Structured epoch reporting for the training loop.
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    pub fn end_epoch(&self, train_loss: f64, val_accuracy: f64, val_f1: f64, learning_rate: f64) {
        let epoch_time = self.epoch_start.elapsed().as_secs_f64();
        let elapsed = self.training_start.elapsed().as_secs_f64();
        let epochs_done = self.epoch + 1;
        let eta = if epochs_done > 0 {
            elapsed / epochs_done as f64 * (self.total_epochs - epochs_done) as f64
        } else {
            0.0
        };
        tracing::info!(
            "Epoch {}/{} done in {:.1}s - loss {:.4}, val acc {:.2}%, val f1 {:.4}, lr {:.2e} - ETA {:.0}s",
            epochs_done,
            self.total_epochs,
            epoch_time,
            train_loss,
            val_accuracy * 100.0,
            val_f1,
            learning_rate,
            eta
        );
    }

    pub fn log_new_best(&self, metric_name: &str, value: f64) {
        tracing::info!(
            "New best {} at epoch {}: {:.4}",
            metric_name,
            self.epoch + 1,
            value
        );
    }

    pub fn log_complete(&self, best_accuracy: f64, best_f1: f64) {
        let total_time = self.training_start.elapsed().as_secs_f64();
        tracing::info!(
            "Training completed in {:.1}s - best val acc {:.2}%, best val f1 {:.4}",
            total_time,
            best_accuracy * 100.0,
            best_f1
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("nope"), None);
    }

    #[test]
    fn test_log_config_presets() {
        let verbose = LogConfig::verbose();
        assert_eq!(verbose.level, LogLevel::Debug);
        assert!(verbose.include_target);

        let quiet = LogConfig::quiet();
        assert_eq!(quiet.level, LogLevel::Warn);
    }

    #[test]
    fn test_progress_logger_state() {
        let mut progress = ProgressLogger::new("loading", 100).with_interval(10);
        progress.update(10);
        progress.increment();
        assert_eq!(progress.current, 11);
    }
}
