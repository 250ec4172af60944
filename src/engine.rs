// src/engine.rs

use crate::diagnostics::SelftestResiduals;
use crate::error::Result;
use crate::jacobi::{JacobiFactors, JacobiSvdConfig, SequentialJacobiSvd};
use crate::parallel::ParallelJacobiSvd;
use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::io::Write;

/// Common interface of the SVD engines.
///
/// An engine is bound to the `(rows, cols)` shape it was created with. Every
/// `decomp` call resets the engine's internal state first, so one engine can be
/// reused for any number of matrices of that shape.
pub trait SvdEngine: Send {
    /// Declared number of rows of G.
    fn rows(&self) -> usize;

    /// Declared number of columns of G.
    fn cols(&self) -> usize;

    /// Decomposes `g` and returns the number of sweeps it took.
    ///
    /// # Errors
    /// `ShapeMismatch` if `g` is not `rows × cols`, `InvalidArgument` if it holds
    /// non-finite values, `DidNotConverge` if the sweep cap was reached. After an
    /// error the engine has no usable factors.
    fn decomp(&mut self, g: &ArrayView2<f64>) -> Result<usize>;

    /// Minimum-norm least-squares solution `x` (length `cols`) of `G·x ≈ h`
    /// (length `rows`) through the pseudo-inverse of the last decomposition.
    fn solve(&self, h: &ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Reconstruction and orthogonality residuals of the current factors against `g`.
    fn residuals(&self, g: &ArrayView2<f64>) -> Result<SelftestResiduals>;

    /// Computes the residuals, writes a human-readable dump of all intermediate
    /// matrices to `sink`, and reports whether every residual is within tolerance.
    fn selftest(&self, g: &ArrayView2<f64>, sink: &mut dyn Write) -> Result<bool>;

    /// Factors of the last successful decomposition, if any.
    fn factors(&self) -> Option<&JacobiFactors>;
}

/// Creates an engine for `rows × cols` inputs with the default configuration.
///
/// `None` or `Some(0)` threads selects the sequential engine; `Some(n)` with
/// `n > 0` selects the multithreaded engine with `n` workers.
pub fn create_svd_engine(
    rows: usize,
    cols: usize,
    num_threads: Option<usize>,
) -> Result<Box<dyn SvdEngine>> {
    create_svd_engine_with_config(rows, cols, num_threads, JacobiSvdConfig::default())
}

/// Same as [`create_svd_engine`] with explicit numerical parameters.
pub fn create_svd_engine_with_config(
    rows: usize,
    cols: usize,
    num_threads: Option<usize>,
    config: JacobiSvdConfig,
) -> Result<Box<dyn SvdEngine>> {
    match num_threads {
        Some(threads) if threads > 0 => {
            debug!("Creating multithreaded Jacobi SVD engine ({}x{}, {} threads).", rows, cols, threads);
            Ok(Box::new(ParallelJacobiSvd::with_config(rows, cols, threads, config)?))
        }
        _ => {
            debug!("Creating sequential Jacobi SVD engine ({}x{}).", rows, cols);
            Ok(Box::new(SequentialJacobiSvd::with_config(rows, cols, config)?))
        }
    }
}
