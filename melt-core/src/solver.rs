//! Linear system solvers.
//!
//! Solves the sparse systems assembled on the grid each step.
//!
//! # Solver Backends
//!
//! - [`MinResSolver`]: minimum residual method for symmetric, possibly
//!   indefinite systems `(A − σI)x = b`. Used for the implicit velocity
//!   update, whose matrix is symmetric but not guaranteed definite.
//! - [`ConjugateGradientSolver`]: (Jacobi-preconditioned) conjugate gradient
//!   for symmetric positive definite systems (heat and pressure).
//! - [`CholeskySolver`]: sparse LLᵀ factorisation using the faer library,
//!   selectable for the SPD systems with [`SolverType::Direct`].
//!
//! Iterative solvers never fail on non-convergence: they return the best
//! iterate with `SolveStats::converged == false`.

use crate::error::{Error, Result};
use crate::sparse::{diagonal, mul_vec, CsrMatrix};
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use nalgebra_sparse::CscMatrix;
use std::time::Instant;

/// Linear solver interface.
pub trait Solver: Send + Sync {
    /// Solve the linear system Ax = b.
    ///
    /// # Arguments
    ///
    /// * `matrix` - System matrix (A)
    /// * `rhs` - Right-hand side vector (b)
    /// * `initial_guess` - Starting iterate; zero when `None`
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64], initial_guess: Option<&[f64]>) -> Result<Solution>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Solver selection strategy for the SPD systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverType {
    /// Conjugate gradient.
    #[default]
    Iterative,
    /// Sparse Cholesky via faer.
    Direct,
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Solver type to use (SPD systems only).
    pub solver_type: SolverType,
    /// Relative residual tolerance for iterative solvers.
    pub tolerance: f64,
    /// Maximum iterations for iterative solvers.
    pub max_iterations: usize,
    /// Scale by the inverse absolute diagonal.
    pub jacobi_preconditioner: bool,
    /// Shift σ for MINRES, solving (A − σI)x = b.
    pub shift: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver_type: SolverType::Iterative,
            tolerance: 1e-8,
            max_iterations: 1000,
            jacobi_preconditioner: true,
            shift: 0.0,
        }
    }
}

impl SolverConfig {
    /// Create a configuration with the given tolerance and iteration cap.
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            ..Default::default()
        }
    }

    /// Use the sparse direct solver for SPD systems.
    pub fn direct(mut self) -> Self {
        self.solver_type = SolverType::Direct;
        self
    }

    /// Enable or disable Jacobi preconditioning.
    pub fn with_preconditioner(mut self, enabled: bool) -> Self {
        self.jacobi_preconditioner = enabled;
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            return Err(Error::InvalidConfig("solver tolerance must be positive".into()));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("solver needs at least one iteration".into()));
        }
        Ok(())
    }
}

/// Solution statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveStats {
    /// Solver name used.
    pub solver: String,
    /// Number of iterations (for iterative solvers).
    pub iterations: Option<usize>,
    /// Final relative residual (for iterative solvers).
    pub residual: Option<f64>,
    /// Whether the tolerance was reached.
    pub converged: bool,
    /// Wall-clock time in seconds.
    pub time_seconds: f64,
}

/// Solution vector together with its statistics.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Vec<f64>,
    pub stats: SolveStats,
}

fn check_dimensions(matrix: &CsrMatrix, rhs: &[f64], initial_guess: Option<&[f64]>) -> Result<usize> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(Error::Solver("Matrix must be square".into()));
    }
    if n != rhs.len() {
        return Err(Error::Solver("RHS size mismatch".into()));
    }
    if let Some(guess) = initial_guess {
        if guess.len() != n {
            return Err(Error::Solver("Initial guess size mismatch".into()));
        }
    }
    Ok(n)
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Inverse absolute diagonal, with 1 where the diagonal vanishes.
pub fn jacobi_preconditioner(matrix: &CsrMatrix) -> Vec<f64> {
    diagonal(matrix)
        .into_iter()
        .map(|d| if d != 0.0 { 1.0 / d.abs() } else { 1.0 })
        .collect()
}

fn apply_preconditioner(preconditioner: Option<&[f64]>, r: &[f64], out: &mut [f64]) {
    match preconditioner {
        Some(m) => {
            for ((o, &ri), &mi) in out.iter_mut().zip(r).zip(m) {
                *o = mi * ri;
            }
        }
        None => out.copy_from_slice(r),
    }
}

/// Minimum residual method for symmetric `(A − shift·I)x = b`.
///
/// Follows the Paige-Saunders recurrence. `preconditioner` is the action of
/// M⁻¹ as a diagonal and must be positive. Terminates when the preconditioned
/// residual estimate drops below `tolerance` relative to its initial value,
/// or after `max_iterations`.
pub fn min_res(
    matrix: &CsrMatrix,
    rhs: &[f64],
    initial_guess: Option<&[f64]>,
    preconditioner: Option<&[f64]>,
    shift: f64,
    max_iterations: usize,
    tolerance: f64,
) -> Result<Solution> {
    let start = Instant::now();
    let n = check_dimensions(matrix, rhs, initial_guess)?;
    if let Some(m) = preconditioner {
        if m.len() != n {
            return Err(Error::Solver("Preconditioner size mismatch".into()));
        }
    }

    let operator = |v: &[f64], out: &mut [f64]| {
        mul_vec(matrix, v, out);
        if shift != 0.0 {
            for (o, &vi) in out.iter_mut().zip(v) {
                *o -= shift * vi;
            }
        }
    };

    let mut x = initial_guess.map_or_else(|| vec![0.0; n], |g| g.to_vec());

    let mut r1 = vec![0.0; n];
    operator(&x, &mut r1);
    for (ri, &bi) in r1.iter_mut().zip(rhs) {
        *ri = bi - *ri;
    }
    let mut y = vec![0.0; n];
    apply_preconditioner(preconditioner, &r1, &mut y);

    let beta1_sq = dot(&r1, &y);
    if beta1_sq < 0.0 {
        return Err(Error::Solver("MINRES preconditioner is not positive definite".into()));
    }
    let beta1 = beta1_sq.sqrt();

    let mut stats = SolveStats {
        solver: "MINRES".into(),
        iterations: Some(0),
        residual: Some(0.0),
        converged: true,
        time_seconds: 0.0,
    };
    if beta1 == 0.0 {
        stats.time_seconds = start.elapsed().as_secs_f64();
        return Ok(Solution { x, stats });
    }

    let mut old_beta = 0.0;
    let mut beta = beta1;
    let mut dbar = 0.0;
    let mut epsilon = 0.0;
    let mut phibar = beta1;
    let mut cs = -1.0;
    let mut sn = 0.0;

    let mut v = vec![0.0; n];
    let mut w = vec![0.0; n];
    let mut w2 = vec![0.0; n];
    let mut r2 = r1.clone();

    let mut converged = false;
    let mut iterations = 0;

    for itn in 1..=max_iterations {
        iterations = itn;

        // Lanczos step
        let scale = 1.0 / beta;
        for (vi, &yi) in v.iter_mut().zip(&y) {
            *vi = scale * yi;
        }
        operator(&v, &mut y);
        if itn >= 2 {
            let ratio = beta / old_beta;
            for (yi, &ri) in y.iter_mut().zip(&r1) {
                *yi -= ratio * ri;
            }
        }
        let alpha = dot(&v, &y);
        let ratio = alpha / beta;
        for (yi, &ri) in y.iter_mut().zip(&r2) {
            *yi -= ratio * ri;
        }
        std::mem::swap(&mut r1, &mut r2);
        r2.copy_from_slice(&y);
        apply_preconditioner(preconditioner, &r2, &mut y);

        old_beta = beta;
        let beta_sq = dot(&r2, &y);
        if beta_sq < 0.0 {
            return Err(Error::Solver("MINRES preconditioner is not positive definite".into()));
        }
        beta = beta_sq.sqrt();

        // Apply previous rotation, then compute and apply the new one
        let old_epsilon = epsilon;
        let delta = cs * dbar + sn * alpha;
        let gbar = sn * dbar - cs * alpha;
        epsilon = sn * beta;
        dbar = -cs * beta;

        let gamma = gbar.hypot(beta).max(f64::EPSILON);
        cs = gbar / gamma;
        sn = beta / gamma;
        let phi = cs * phibar;
        phibar *= sn;

        // Update search direction and solution
        for i in 0..n {
            let w1 = w2[i];
            w2[i] = w[i];
            w[i] = (v[i] - old_epsilon * w1 - delta * w2[i]) / gamma;
            x[i] += phi * w[i];
        }

        let relative = phibar / beta1;
        log::trace!("MINRES iter {}: residual = {:.6e}", itn, relative);

        if relative <= tolerance || beta == 0.0 {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!(
            "MINRES stopped after {} iterations with relative residual {:.3e}",
            iterations,
            phibar / beta1
        );
    }

    stats.iterations = Some(iterations);
    stats.residual = Some(phibar / beta1);
    stats.converged = converged;
    stats.time_seconds = start.elapsed().as_secs_f64();
    Ok(Solution { x, stats })
}

/// Conjugate gradient for symmetric positive definite `A x = b`.
///
/// Terminates once `‖r‖ ≤ min_residual · ‖b‖` (absolute when `b = 0`) or
/// after `max_iterations`. `preconditioner` is an optional diagonal M⁻¹.
pub fn conjugate_gradient(
    matrix: &CsrMatrix,
    rhs: &[f64],
    initial_guess: Option<&[f64]>,
    preconditioner: Option<&[f64]>,
    max_iterations: usize,
    min_residual: f64,
) -> Result<Solution> {
    let start = Instant::now();
    let n = check_dimensions(matrix, rhs, initial_guess)?;

    let mut x = initial_guess.map_or_else(|| vec![0.0; n], |g| g.to_vec());

    let mut r = vec![0.0; n];
    mul_vec(matrix, &x, &mut r);
    for (ri, &bi) in r.iter_mut().zip(rhs) {
        *ri = bi - *ri;
    }

    let b_norm = dot(rhs, rhs).sqrt();
    let scale = if b_norm > 0.0 { b_norm } else { 1.0 };
    let threshold = min_residual * scale;

    let mut z = vec![0.0; n];
    apply_preconditioner(preconditioner, &r, &mut z);
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz = dot(&r, &z);
    let mut r_norm = dot(&r, &r).sqrt();

    let mut converged = r_norm <= threshold;
    let mut iterations = 0;

    while !converged && iterations < max_iterations {
        iterations += 1;

        mul_vec(matrix, &p, &mut ap);
        let pap = dot(&p, &ap);
        if pap <= 0.0 {
            log::warn!("CG breakdown at iteration {}: pᵀAp = {:.3e}", iterations, pap);
            break;
        }

        let alpha = rz / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        r_norm = dot(&r, &r).sqrt();
        log::trace!("CG iter {}: residual = {:.6e}", iterations, r_norm / scale);
        if r_norm <= threshold {
            converged = true;
            break;
        }

        apply_preconditioner(preconditioner, &r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for (pi, &zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
    }

    if !converged {
        log::warn!(
            "CG stopped after {} iterations with relative residual {:.3e}",
            iterations,
            r_norm / scale
        );
    }

    Ok(Solution {
        x,
        stats: SolveStats {
            solver: "Conjugate Gradient".into(),
            iterations: Some(iterations),
            residual: Some(r_norm / scale),
            converged,
            time_seconds: start.elapsed().as_secs_f64(),
        },
    })
}

/// MINRES with settings taken from a [`SolverConfig`].
#[derive(Debug, Clone, Default)]
pub struct MinResSolver {
    config: SolverConfig,
}

impl MinResSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }
}

impl Solver for MinResSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64], initial_guess: Option<&[f64]>) -> Result<Solution> {
        let preconditioner = self
            .config
            .jacobi_preconditioner
            .then(|| jacobi_preconditioner(matrix));
        min_res(
            matrix,
            rhs,
            initial_guess,
            preconditioner.as_deref(),
            self.config.shift,
            self.config.max_iterations,
            self.config.tolerance,
        )
    }

    fn name(&self) -> &str {
        "MINRES"
    }
}

/// Conjugate gradient with settings taken from a [`SolverConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConjugateGradientSolver {
    config: SolverConfig,
}

impl ConjugateGradientSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }
}

impl Solver for ConjugateGradientSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64], initial_guess: Option<&[f64]>) -> Result<Solution> {
        let preconditioner = self
            .config
            .jacobi_preconditioner
            .then(|| jacobi_preconditioner(matrix));
        conjugate_gradient(
            matrix,
            rhs,
            initial_guess,
            preconditioner.as_deref(),
            self.config.max_iterations,
            self.config.tolerance,
        )
    }

    fn name(&self) -> &str {
        "Conjugate Gradient"
    }
}

/// Convert a CSR matrix to faer's column-compressed layout.
fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let (nrows, ncols) = (csr.nrows(), csr.ncols());
    let (col_offsets, row_indices, values) = CscMatrix::from(csr).disassemble();

    // SAFETY: nalgebra-sparse guarantees sorted, in-bounds CSC structure
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(nrows, ncols, col_offsets, None, row_indices),
            values,
        )
    }
}

/// Sparse Cholesky solver using the faer library.
///
/// Only valid for symmetric positive definite matrices such as the heat and
/// pressure systems.
#[derive(Debug, Clone, Default)]
pub struct CholeskySolver;

impl CholeskySolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for CholeskySolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64], initial_guess: Option<&[f64]>) -> Result<Solution> {
        let start = Instant::now();
        let n = check_dimensions(matrix, rhs, initial_guess)?;
        let stats = |time_seconds| SolveStats {
            solver: self.name().into(),
            iterations: None,
            residual: None,
            converged: true,
            time_seconds,
        };
        if n == 0 {
            return Ok(Solution { x: vec![], stats: stats(0.0) });
        }

        let csc = csr_to_faer_csc(matrix);
        let csc_ref = csc.as_ref();

        let symbolic = SymbolicLlt::try_new(csc_ref.symbolic(), faer::Side::Lower)
            .map_err(|_| Error::Solver("Symbolic Cholesky analysis failed".into()))?;

        let llt = Llt::try_new_with_symbolic(symbolic, csc_ref, faer::Side::Lower).map_err(|e| match e {
            SparseLltError::Generic(err) => Error::Solver(format!("Sparse Cholesky error: {:?}", err)),
            SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
                Error::SingularMatrix(format!("Matrix is not positive definite at pivot {}", index))
            }
        })?;

        let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        llt.solve_in_place(x.as_mut());

        Ok(Solution {
            x: (0..n).map(|i| x[(i, 0)]).collect(),
            stats: stats(start.elapsed().as_secs_f64()),
        })
    }

    fn name(&self) -> &str {
        "faer Sparse Cholesky (LLᵀ)"
    }
}

/// Solver for a symmetric positive definite system.
pub fn select_spd_solver(config: &SolverConfig) -> Box<dyn Solver> {
    match config.solver_type {
        SolverType::Direct => Box::new(CholeskySolver::new()),
        SolverType::Iterative => Box::new(ConjugateGradientSolver::new(config.clone())),
    }
}
