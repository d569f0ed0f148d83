//! Small dense linear algebra used by the particle constitutive model.
//!
//! All routines work on 3x3 tensors. The SVD is "signed": both singular
//! vector bases are proper rotations and any reflection is carried by the
//! sign of the smallest singular value, which keeps the polar rotation a
//! rotation even for inverted elements.

use crate::error::{Error, Result};
use crate::types::{Mat3, Vec3};

/// Sign of `x`: -1, 0 or +1.
#[inline]
pub fn sign_function(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Double contraction A:B = Σ A_ij B_ij.
#[inline]
pub fn matrix_element_multiplication(a: &Mat3, b: &Mat3) -> f64 {
    a.component_mul(b).sum()
}

/// Solve the dense 3x3 system `A x = b`.
pub fn linear_system_solve(a: &Mat3, b: &Vec3) -> Result<Vec3> {
    a.lu()
        .solve(b)
        .ok_or_else(|| Error::SingularMatrix("3x3 LU factorization failed".into()))
}

/// Smallest strictly positive value in a list.
pub fn find_min_positive(values: &[usize]) -> Option<usize> {
    values.iter().copied().filter(|&v| v > 0).min()
}

/// Signed singular value decomposition `M = U Σ Vᵀ`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Svd3 {
    pub u: Mat3,
    pub sigma: Vec3,
    pub v: Mat3,
}

impl Svd3 {
    /// Decompose `m`, forcing `det(U) = det(V) = +1`.
    pub fn new(m: &Mat3) -> Self {
        let svd = m.svd(true, true);
        let mut u = svd.u.unwrap_or_else(Mat3::identity);
        let mut v = svd.v_t.map(|vt| vt.transpose()).unwrap_or_else(Mat3::identity);
        let mut sigma = svd.singular_values;

        if u.determinant() < 0.0 {
            u.column_mut(2).neg_mut();
            sigma[2] = -sigma[2];
        }
        if v.determinant() < 0.0 {
            v.column_mut(2).neg_mut();
            sigma[2] = -sigma[2];
        }

        Self { u, sigma, v }
    }

    /// Rebuild `U Σ Vᵀ`.
    pub fn recompose(&self) -> Mat3 {
        self.u * Mat3::from_diagonal(&self.sigma) * self.v.transpose()
    }
}

/// Polar decomposition `M = R S` with `R = U Vᵀ` and `S = V Σ Vᵀ`.
pub fn polar_decomposition(m: &Mat3) -> (Mat3, Mat3) {
    let svd = Svd3::new(m);
    let r = svd.u * svd.v.transpose();
    let s = svd.v * Mat3::from_diagonal(&svd.sigma) * svd.v.transpose();
    (r, s)
}

/// Directional derivative of the polar rotation of `M = R S` along `dm`.
///
/// With `W = Rᵀ dM`, `δR = R [ω]ₓ` where `(tr(S) I − S) ω = axial(W − Wᵀ)`.
/// Returns zero when the stretch is degenerate.
pub fn polar_rotation_differential(r: &Mat3, s: &Mat3, dm: &Mat3) -> Mat3 {
    let w = r.transpose() * dm;
    let skew = w - w.transpose();
    let axial = Vec3::new(skew[(2, 1)], skew[(0, 2)], skew[(1, 0)]);
    let system = Mat3::identity() * s.trace() - s;
    match linear_system_solve(&system, &axial) {
        Ok(omega) => r * omega.cross_matrix(),
        Err(_) => Mat3::zeros(),
    }
}
