/// A queue could not be constructed from the given [Options](crate::queue::Options).
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The rate must be finite and positive, and give a non-zero interval between tasks.
    #[error("Invalid rate limit: {0} calls per second")]
    InvalidRate(f64),
    /// No runtime handle was given, and there is no current tokio runtime to use.
    #[error("No tokio runtime available to schedule tasks on")]
    NoRuntime,
}
