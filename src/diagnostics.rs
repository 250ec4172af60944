// src/diagnostics.rs

use crate::jacobi::JacobiFactors;
use ndarray::{Array2, ArrayView2};
use std::io::{self, Write};

/// Mean-squared residuals of a decomposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelftestResiduals {
    /// Mean squared element of `Gr - G`, where `Gr` is rebuilt from the factors.
    pub rmse_g: f64,
    /// Mean squared off-diagonal element of `Uᵗ·U`.
    pub rmse_u: f64,
    /// Mean squared off-diagonal element of `V·Vᵗ`.
    pub rmse_v: f64,
}

impl SelftestResiduals {
    /// True when all three residuals are strictly below `tolerance`.
    pub fn passes(&self, tolerance: f64) -> bool {
        self.rmse_g < tolerance && self.rmse_u < tolerance && self.rmse_v < tolerance
    }
}

/// Mean of the squared entries; 0 for an empty matrix.
pub fn mean_squared(matrix: &ArrayView2<f64>) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    matrix.iter().map(|&x| x * x).sum::<f64>() / matrix.len() as f64
}

/// `Uᵗ·U`, which is the identity (up to near-zero columns) for converged factors.
pub fn gram_u(factors: &JacobiFactors) -> Array2<f64> {
    factors.u().t().dot(factors.u())
}

/// `V·Vᵗ`, the identity for an orthogonal V.
pub fn gram_v(factors: &JacobiFactors) -> Array2<f64> {
    factors.v().dot(&factors.v().t())
}

fn off_diagonal_mean_squared(mut gram: Array2<f64>) -> f64 {
    gram.diag_mut().fill(0.0);
    mean_squared(&gram.view())
}

/// Computes the three residuals of `factors` against the original `g`.
///
/// `g` must have the shape the factors were computed for.
pub fn compute_residuals(factors: &JacobiFactors, g: &ArrayView2<f64>) -> SelftestResiduals {
    let difference = factors.reconstruct() - g;
    SelftestResiduals {
        rmse_g: mean_squared(&difference.view()),
        rmse_u: off_diagonal_mean_squared(gram_u(factors)),
        rmse_v: off_diagonal_mean_squared(gram_v(factors)),
    }
}

/// Writes the intermediate state of a selftest to `sink`.
///
/// Free-form text for people; nothing should parse it.
pub fn write_selftest_report(
    sink: &mut dyn Write,
    g: &ArrayView2<f64>,
    factors: &JacobiFactors,
    residuals: &SelftestResiduals,
    passed: bool,
) -> io::Result<()> {
    writeln!(sink)?;
    writeln!(sink, "--- G\n{:.6}", g)?;
    writeln!(sink)?;
    writeln!(sink, "--- transposed\n{}", factors.is_transposed())?;
    writeln!(sink, "--- sweeps\n{}", factors.sweeps())?;
    writeln!(sink, "--- U\n{:.6}", factors.u())?;
    writeln!(sink, "--- S\n{:.6}", factors.singular_values())?;
    writeln!(sink, "--- V\n{:.6}", factors.v())?;
    writeln!(sink)?;
    writeln!(sink, "--- G reconstructed\n{:.6}", factors.reconstruct())?;
    writeln!(sink, "--- U' * U\n{:.6}", gram_u(factors))?;
    writeln!(sink, "--- V * V'\n{:.6}", gram_v(factors))?;
    writeln!(sink, "--- rmseG\n{:e}", residuals.rmse_g)?;
    writeln!(sink, "--- rmseU\n{:e}", residuals.rmse_u)?;
    writeln!(sink, "--- rmseV\n{:e}", residuals.rmse_v)?;
    writeln!(sink, "--- selftest\n{}", passed)?;
    Ok(())
}
