//! Error types for osj_svd

use thiserror::Error;

/// Result type alias using the crate's `SvdError`
pub type Result<T> = std::result::Result<T, SvdError>;

/// Errors that can occur while decomposing, solving or persisting factors.
///
/// Near-zero singular values are not errors: normalization and the
/// pseudo-inverse substitute zero for them silently.
#[derive(Error, Debug)]
pub enum SvdError {
    /// An operand does not have the shape the engine was declared with
    #[error("Shape mismatch for {operand}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Which operand was rejected ("G", "h", ...)
        operand: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// Any other malformed argument (zero-size shape, non-finite input, bad config)
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the problem
        reason: String,
    },

    /// Factors were requested before a successful `decomp`
    #[error("No decomposition available: call decomp() successfully first")]
    NotDecomposed,

    /// The sweep cap was exhausted before every column pair converged
    #[error("Jacobi iteration did not converge within {sweeps} sweeps")]
    DidNotConverge {
        /// Number of sweeps that were run
        sweeps: usize,
    },

    /// The worker pool of the multithreaded engine could not be built
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Writing a diagnostic dump or accessing a factor file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding persisted factors failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SvdError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SvdError::InvalidArgument {
            reason: reason.into(),
        }
    }
}
