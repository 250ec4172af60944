// src/jacobi.rs

use crate::diagnostics::{self, SelftestResiduals};
use crate::engine::SvdEngine;
use crate::error::{Result, SvdError};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ShapeBuilder, Zip};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Numerical parameters of the one-sided Jacobi engines.
///
/// All thresholds are absolute, except `convergence_tolerance`, which bounds the
/// cosine of the angle between two working columns: a pair (i, j) counts as
/// converged when `d² <= tol² · a · b` with `a = ‖col_i‖²`, `b = ‖col_j‖²` and
/// `d = col_i · col_j`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JacobiSvdConfig {
    /// Pairwise orthogonality tolerance (used squared).
    pub convergence_tolerance: f64,
    /// Column norms below this are stored as singular values but the column is not normalized.
    pub singular_value_threshold: f64,
    /// Singular values below this get a zero reciprocal in `solve`.
    pub pseudo_inverse_threshold: f64,
    /// Acceptance bound for each of the three mean-squared residuals of `selftest`.
    pub rmse_tolerance: f64,
    /// Upper bound on the number of sweeps a single `decomp` may run.
    pub max_sweeps: usize,
}

impl Default for JacobiSvdConfig {
    fn default() -> Self {
        JacobiSvdConfig {
            convergence_tolerance: 1e-12,
            singular_value_threshold: 1e-12,
            pseudo_inverse_threshold: 1e-10,
            rmse_tolerance: 1e-16,
            max_sweeps: 100,
        }
    }
}

impl JacobiSvdConfig {
    /// Checks that every tolerance is finite and strictly positive and that at
    /// least one sweep is allowed.
    pub fn validate(&self) -> Result<()> {
        let tolerances = [
            ("convergence_tolerance", self.convergence_tolerance),
            ("singular_value_threshold", self.singular_value_threshold),
            ("pseudo_inverse_threshold", self.pseudo_inverse_threshold),
            ("rmse_tolerance", self.rmse_tolerance),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value <= 0.0 {
                return Err(SvdError::invalid(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        if self.max_sweeps == 0 {
            return Err(SvdError::invalid("max_sweeps must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn convergence_tolerance_sq(&self) -> f64 {
        self.convergence_tolerance * self.convergence_tolerance
    }
}

/// Factors produced by a one-sided Jacobi decomposition.
///
/// The working matrix is always tall-or-square. When the declared shape has
/// fewer rows than columns the engine decomposes `Gᵗ = U·diag(S)·Vᵗ`, so that
/// `G = V·diag(S)·Uᵗ`; `is_transposed()` tells which arrangement applies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JacobiFactors {
    /// Working matrix; holds U once the decomposition has converged.
    /// Shape: (max(rows, cols), min(rows, cols))
    pub(crate) u: Array2<f64>,
    /// Column norms of the converged working matrix, in column order (unsorted).
    pub(crate) s: Array1<f64>,
    /// Accumulated rotations. Shape: (min(rows, cols), min(rows, cols))
    pub(crate) v: Array2<f64>,
    pub(crate) transposed: bool,
    pub(crate) sweeps: usize,
}

impl JacobiFactors {
    /// Allocates column-major factors for a declared `rows × cols` input.
    pub(crate) fn for_shape(rows: usize, cols: usize) -> Self {
        let transposed = rows < cols;
        let (working_rows, working_cols) = if transposed { (cols, rows) } else { (rows, cols) };
        let mut v = Array2::zeros((working_cols, working_cols).f());
        v.diag_mut().fill(1.0);
        JacobiFactors {
            u: Array2::zeros((working_rows, working_cols).f()),
            s: Array1::zeros(working_cols),
            v,
            transposed,
            sweeps: 0,
        }
    }

    /// Left factor (columns of unit length, except near-zero ones).
    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    /// Singular values in the column order the rotations left them in.
    pub fn singular_values(&self) -> &Array1<f64> {
        &self.s
    }

    /// Right factor (orthogonal).
    pub fn v(&self) -> &Array2<f64> {
        &self.v
    }

    /// Whether the decomposition was carried out on the transposed input.
    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    /// Number of sweeps the decomposition ran.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// The `(rows, cols)` shape of the input these factors reconstruct.
    pub fn declared_shape(&self) -> (usize, usize) {
        if self.transposed {
            (self.u.ncols(), self.u.nrows())
        } else {
            (self.u.nrows(), self.u.ncols())
        }
    }

    /// Number of singular values whose magnitude is at least `threshold`.
    pub fn rank(&self, threshold: f64) -> usize {
        self.s.iter().filter(|sv| sv.abs() >= threshold).count()
    }

    /// Rebuilds the input in the caller's orientation.
    pub fn reconstruct(&self) -> Array2<f64> {
        if self.transposed {
            (&self.v * &self.s).dot(&self.u.t())
        } else {
            (&self.u * &self.s).dot(&self.v.t())
        }
    }

    /// Copies `g` (or its transpose) into the working matrix and resets V, S and the sweep counter.
    ///
    /// The working matrix is divided by the power of two just below the largest
    /// entry magnitude of `g`, so squared column norms cannot overflow during the
    /// sweeps and the scaling itself is exact. Returns that scale (1 for an
    /// all-zero `g`); `normalize_columns` multiplies it back into S.
    pub(crate) fn load(&mut self, g: &ArrayView2<f64>) -> f64 {
        let max_abs = g.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
        let scale = if max_abs > 0.0 { max_abs.log2().floor().exp2() } else { 1.0 };
        if self.transposed {
            self.u.assign(&g.t());
        } else {
            self.u.assign(g);
        }
        self.u.mapv_inplace(|x| x / scale);
        self.v.fill(0.0);
        self.v.diag_mut().fill(1.0);
        self.s.fill(0.0);
        self.sweeps = 0;
        scale
    }

    /// Stores column norms of the working matrix, times `scale`, in S and scales
    /// each column to unit length unless that singular value is below
    /// `threshold`. Returns how many columns were left as is.
    pub(crate) fn normalize_columns(&mut self, scale: f64, threshold: f64) -> usize {
        let mut near_zero = 0;
        Zip::from(self.u.columns_mut())
            .and(&mut self.s)
            .for_each(|mut column, singular_value| {
                let scaled_norm = column.dot(&column).sqrt();
                *singular_value = scaled_norm * scale;
                if *singular_value < threshold {
                    // Unnormalized columns carry the input's magnitude again.
                    column.mapv_inplace(|x| x * scale);
                    near_zero += 1;
                } else {
                    column.mapv_inplace(|x| x / scaled_norm);
                }
            });
        near_zero
    }
}

/// Orthogonalizes one column pair of the working matrix and applies the same
/// plane rotation to the matching columns of V.
///
/// Returns `true` when the pair already satisfied the convergence criterion and
/// was left untouched.
pub(crate) fn rotate_column_pair(
    u_i: ArrayViewMut1<f64>,
    u_j: ArrayViewMut1<f64>,
    v_i: ArrayViewMut1<f64>,
    v_j: ArrayViewMut1<f64>,
    tolerance_sq: f64,
) -> bool {
    let a = u_i.dot(&u_i);
    let b = u_j.dot(&u_j);
    let d = u_i.dot(&u_j);

    if d * d <= tolerance_sq * a * b {
        return true;
    }

    // d != 0 here, and hypot keeps sqrt(1 + zeta^2) finite for tiny d.
    let zeta = (b - a) / (2.0 * d);
    let t = if zeta > 0.0 {
        1.0 / (zeta + zeta.hypot(1.0))
    } else {
        -1.0 / (-zeta + zeta.hypot(1.0))
    };
    let c = 1.0 / t.hypot(1.0);
    let s = c * t;

    apply_plane_rotation(u_i, u_j, c, s);
    apply_plane_rotation(v_i, v_j, c, s);
    false
}

fn apply_plane_rotation(x: ArrayViewMut1<f64>, y: ArrayViewMut1<f64>, c: f64, s: f64) {
    Zip::from(x).and(y).for_each(|x_k, y_k| {
        let (p, q) = (*x_k, *y_k);
        *x_k = c * p - s * q;
        *y_k = s * p + c * q;
    });
}

/// How one sweep visits the column pairs of the working matrix.
///
/// Implementations receive exclusive access to the working matrix and V for the
/// duration of the sweep, must visit every unordered pair exactly once, and
/// return the number of rotations they applied (zero means the sweep converged).
pub trait SweepStrategy: Send {
    fn sweep(&mut self, work: &mut Array2<f64>, v: &mut Array2<f64>, tolerance_sq: f64) -> usize;
}

/// Visits pairs `(i, j)`, `i < j`, in index order on the calling thread.
#[derive(Debug, Default, Copy, Clone)]
pub struct SequentialSweep;

impl SweepStrategy for SequentialSweep {
    fn sweep(&mut self, work: &mut Array2<f64>, v: &mut Array2<f64>, tolerance_sq: f64) -> usize {
        let n = work.ncols();
        let mut rotations = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let (u_i, u_j) = work.multi_slice_mut((s![.., i], s![.., j]));
                let (v_i, v_j) = v.multi_slice_mut((s![.., i], s![.., j]));
                if !rotate_column_pair(u_i, u_j, v_i, v_j, tolerance_sq) {
                    rotations += 1;
                }
            }
        }
        rotations
    }
}

pub(crate) fn validate_declared_shape(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(SvdError::invalid(format!(
            "Declared shape must be non-empty, got {}x{}",
            rows, cols
        )));
    }
    Ok(())
}

/// One-sided Jacobi SVD engine for a fixed declared `rows × cols` shape.
///
/// The execution strategy is a type parameter; use [`SequentialJacobiSvd`] or
/// [`ParallelJacobiSvd`](crate::parallel::ParallelJacobiSvd).
#[derive(Debug)]
pub struct OneSidedJacobiSvd<S: SweepStrategy> {
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) config: JacobiSvdConfig,
    pub(crate) factors: JacobiFactors,
    pub(crate) decomposed: bool,
    pub(crate) strategy: S,
}

/// Single-threaded engine; fully deterministic.
pub type SequentialJacobiSvd = OneSidedJacobiSvd<SequentialSweep>;

impl SequentialJacobiSvd {
    /// Creates a sequential engine with the default configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use osj_svd::{SequentialJacobiSvd, SvdEngine};
    ///
    /// let g = array![[3.0, 0.0], [0.0, 4.0]];
    /// let mut svd = SequentialJacobiSvd::new(2, 2).unwrap();
    /// svd.decomp(&g.view()).unwrap();
    /// let s = svd.factors().unwrap().singular_values();
    /// assert!((s[0] - 3.0).abs() < 1e-12 && (s[1] - 4.0).abs() < 1e-12);
    /// ```
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        Self::with_config(rows, cols, JacobiSvdConfig::default())
    }

    pub fn with_config(rows: usize, cols: usize, config: JacobiSvdConfig) -> Result<Self> {
        OneSidedJacobiSvd::from_parts(rows, cols, config, SequentialSweep)
    }
}

impl<S: SweepStrategy> OneSidedJacobiSvd<S> {
    pub(crate) fn from_parts(
        rows: usize,
        cols: usize,
        config: JacobiSvdConfig,
        strategy: S,
    ) -> Result<Self> {
        validate_declared_shape(rows, cols)?;
        config.validate()?;
        Ok(Self {
            rows,
            cols,
            config,
            factors: JacobiFactors::for_shape(rows, cols),
            decomposed: false,
            strategy,
        })
    }

    /// The numerical parameters this engine was built with.
    pub fn config(&self) -> &JacobiSvdConfig {
        &self.config
    }

    fn decomposed_factors(&self) -> Result<&JacobiFactors> {
        if self.decomposed {
            Ok(&self.factors)
        } else {
            Err(SvdError::NotDecomposed)
        }
    }

    fn check_matrix_shape(&self, g: &ArrayView2<f64>) -> Result<()> {
        if g.dim() != (self.rows, self.cols) {
            return Err(SvdError::ShapeMismatch {
                operand: "G",
                expected: vec![self.rows, self.cols],
                got: vec![g.nrows(), g.ncols()],
            });
        }
        Ok(())
    }

    /// Writes the current factors to `path` with bincode.
    ///
    /// # Errors
    /// Returns `NotDecomposed` if no successful `decomp` (or restore) happened yet,
    /// or an I/O / serialization error.
    pub fn save_factors<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let factors = self.decomposed_factors()?;
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(factors, &mut writer, bincode::config::standard())
            .map_err(|e| SvdError::Serialization(format!("Failed to serialize Jacobi factors: {}", e)))?;
        writer.flush()?;
        debug!("Saved {}x{} Jacobi factors to {:?}", self.rows, self.cols, path.as_ref());
        Ok(())
    }

    /// Loads factors previously written by `save_factors` and makes them current,
    /// so `solve` can be used without decomposing again.
    pub fn load_factors<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let factors: JacobiFactors =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| SvdError::Serialization(format!("Failed to deserialize Jacobi factors: {}", e)))?;
        self.restore_factors(factors)
    }

    /// Installs externally held factors after checking they fit the declared shape.
    pub fn restore_factors(&mut self, factors: JacobiFactors) -> Result<()> {
        let mut restored = JacobiFactors::for_shape(self.rows, self.cols);
        let consistent = factors.transposed == restored.transposed
            && factors.u.dim() == restored.u.dim()
            && factors.s.len() == restored.s.len()
            && factors.v.dim() == restored.v.dim();
        if !consistent {
            let (rows, cols) = factors.declared_shape();
            return Err(SvdError::ShapeMismatch {
                operand: "stored factors",
                expected: vec![self.rows, self.cols],
                got: vec![rows, cols],
            });
        }
        if factors.s.iter().any(|&sv| !sv.is_finite() || sv < 0.0)
            || factors.u.iter().chain(factors.v.iter()).any(|x| !x.is_finite())
        {
            return Err(SvdError::invalid(
                "Stored factors contain non-finite values or negative singular values",
            ));
        }

        // Keep the column-major layout the sweeps expect.
        restored.u.assign(&factors.u);
        restored.s.assign(&factors.s);
        restored.v.assign(&factors.v);
        restored.sweeps = factors.sweeps;
        self.factors = restored;
        self.decomposed = true;
        Ok(())
    }
}

impl<S: SweepStrategy> SvdEngine for OneSidedJacobiSvd<S> {
    fn rows(&self) -> usize {
        self.rows
    }

    fn cols(&self) -> usize {
        self.cols
    }

    fn decomp(&mut self, g: &ArrayView2<f64>) -> Result<usize> {
        self.decomposed = false;
        self.check_matrix_shape(g)?;
        if g.iter().any(|x| !x.is_finite()) {
            return Err(SvdError::invalid("G contains non-finite (NaN or infinity) values"));
        }

        let start_time = Instant::now();
        let scale = self.factors.load(g);
        let (working_rows, working_cols) = self.factors.u.dim();
        info!(
            "Starting one-sided Jacobi SVD of {}x{} matrix (working {}x{}, transposed={}).",
            self.rows, self.cols, working_rows, working_cols, self.factors.transposed
        );

        let tolerance_sq = self.config.convergence_tolerance_sq();
        let mut converged = false;
        while self.factors.sweeps < self.config.max_sweeps {
            let rotations = self
                .strategy
                .sweep(&mut self.factors.u, &mut self.factors.v, tolerance_sq);
            self.factors.sweeps += 1;
            debug!("Sweep {}: applied {} rotations.", self.factors.sweeps, rotations);
            if rotations == 0 {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "One-sided Jacobi SVD of {}x{} matrix did not converge within {} sweeps.",
                self.rows, self.cols, self.config.max_sweeps
            );
            return Err(SvdError::DidNotConverge {
                sweeps: self.factors.sweeps,
            });
        }

        let near_zero = self
            .factors
            .normalize_columns(scale, self.config.singular_value_threshold);
        if near_zero > 0 {
            debug!(
                "{} of {} singular values are below {:e}; their columns were left unnormalized.",
                near_zero, working_cols, self.config.singular_value_threshold
            );
        }

        self.decomposed = true;
        info!(
            "One-sided Jacobi SVD converged after {} sweeps in {:?}.",
            self.factors.sweeps,
            start_time.elapsed()
        );
        Ok(self.factors.sweeps)
    }

    fn solve(&self, h: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let factors = self.decomposed_factors()?;
        if h.len() != self.rows {
            return Err(SvdError::ShapeMismatch {
                operand: "h",
                expected: vec![self.rows],
                got: vec![h.len()],
            });
        }

        let threshold = self.config.pseudo_inverse_threshold;
        let s_inv = factors
            .s
            .mapv(|sv| if sv.abs() < threshold { 0.0 } else { 1.0 / sv });
        let kept = factors.rank(threshold);
        if kept < factors.s.len() {
            debug!(
                "Pseudo-inverse truncated {} of {} directions (|s| < {:e}).",
                factors.s.len() - kept,
                factors.s.len(),
                threshold
            );
        }

        let x = if factors.transposed {
            factors.u.dot(&(&s_inv * &factors.v.t().dot(h)))
        } else {
            factors.v.dot(&(&s_inv * &factors.u.t().dot(h)))
        };
        Ok(x)
    }

    fn residuals(&self, g: &ArrayView2<f64>) -> Result<SelftestResiduals> {
        let factors = self.decomposed_factors()?;
        self.check_matrix_shape(g)?;
        Ok(diagnostics::compute_residuals(factors, g))
    }

    fn selftest(&self, g: &ArrayView2<f64>, sink: &mut dyn Write) -> Result<bool> {
        let residuals = self.residuals(g)?;
        let passed = residuals.passes(self.config.rmse_tolerance);
        diagnostics::write_selftest_report(sink, g, &self.factors, &residuals, passed)?;
        if !passed {
            debug!(
                "Selftest failed for {}x{} matrix: {:?} (tolerance {:e}).",
                self.rows, self.cols, residuals, self.config.rmse_tolerance
            );
        }
        Ok(passed)
    }

    fn factors(&self) -> Option<&JacobiFactors> {
        self.decomposed_factors().ok()
    }
}
