//! Grid indexing and interpolation kernels.
//!
//! Two compact-support kernels are used on the staggered grid:
//! - the cubic B-spline (support `(-2, 2)`) for mass, momentum and heat
//!   transfers
//! - the tight quadratic stencil (support `(-1.5, 1.5)`) for the elastic
//!   force terms
//!
//! Both return an exact `0.0` outside their support so that only genuine
//! neighbours end up in the per-cell interpolation lists.
//!
//! # Usage
//!
//! ```
//! use melt_core::kernel::{cell_index, index_to_ijk, cubic_bspline};
//!
//! let n = 8;
//! let idx = cell_index(1, 2, 3, n);
//! assert_eq!(index_to_ijk(idx, n), (1, 2, 3));
//! assert_eq!(cubic_bspline(2.5), 0.0);
//! ```

use crate::types::{Point3, Vec3};

/// Linear index of cell (i, j, k): `i + j·n + k·n²`.
///
/// Callers must bounds-check; indices outside `[0, n)³` alias other cells.
#[inline]
pub fn cell_index(i: usize, j: usize, k: usize, no_cells: usize) -> usize {
    debug_assert!(i < no_cells && j < no_cells && k < no_cells, "cell index out of range");
    i + j * no_cells + k * no_cells * no_cells
}

/// Inverse of [`cell_index`].
#[inline]
pub fn index_to_ijk(index: usize, no_cells: usize) -> (usize, usize, usize) {
    let i = index % no_cells;
    let j = (index / no_cells) % no_cells;
    let k = index / (no_cells * no_cells);
    (i, j, k)
}

/// Home cell of a particle: `floor((position - edge) / h)` per axis.
///
/// `grid_edge_origin` is the outer corner of cell (0, 0, 0), half a cell
/// below its centre. The result may lie outside the grid.
#[inline]
pub fn particle_grid_cell(position: &Point3, cell_size: f64, grid_edge_origin: &Point3) -> [isize; 3] {
    let rel = (position - grid_edge_origin) / cell_size;
    [
        rel.x.floor() as isize,
        rel.y.floor() as isize,
        rel.z.floor() as isize,
    ]
}

/// Cubic B-spline N(x).
#[inline]
pub fn cubic_bspline(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        0.5 * ax * ax * ax - ax * ax + 2.0 / 3.0
    } else if ax < 2.0 {
        let t = 2.0 - ax;
        t * t * t / 6.0
    } else {
        0.0
    }
}

/// Derivative dN/dx of the cubic B-spline.
#[inline]
pub fn cubic_bspline_diff(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 1.0 {
        1.5 * x * ax - 2.0 * x
    } else if ax < 2.0 {
        let t = 2.0 - ax;
        -0.5 * t * t * sign_of(x)
    } else {
        0.0
    }
}

/// Tight quadratic stencil N(x).
#[inline]
pub fn tight_quadratic_stencil(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 0.5 {
        0.75 - ax * ax
    } else if ax < 1.5 {
        let t = 1.5 - ax;
        0.5 * t * t
    } else {
        0.0
    }
}

/// Derivative dN/dx of the tight quadratic stencil.
#[inline]
pub fn tight_quadratic_stencil_diff(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 0.5 {
        -2.0 * x
    } else if ax < 1.5 {
        -(1.5 - ax) * sign_of(x)
    } else {
        0.0
    }
}

#[inline]
fn sign_of(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Separable 3D weight and its gradient with respect to the particle position.
///
/// `offset` is `particle - node` in world units.
#[inline]
fn separable(offset: &Vec3, cell_size: f64, n: fn(f64) -> f64, dn: fn(f64) -> f64) -> (f64, Vec3) {
    let x = offset / cell_size;
    let (nx, ny, nz) = (n(x.x), n(x.y), n(x.z));
    let weight = nx * ny * nz;
    if weight == 0.0 {
        return (0.0, Vec3::zeros());
    }
    let gradient = Vec3::new(dn(x.x) * ny * nz, nx * dn(x.y) * nz, nx * ny * dn(x.z)) / cell_size;
    (weight, gradient)
}

/// Cubic B-spline weight and gradient for a particle/node offset.
#[inline]
pub fn cubic_weight(offset: &Vec3, cell_size: f64) -> (f64, Vec3) {
    separable(offset, cell_size, cubic_bspline, cubic_bspline_diff)
}

/// Tight quadratic weight and gradient for a particle/node offset.
#[inline]
pub fn quadratic_weight(offset: &Vec3, cell_size: f64) -> (f64, Vec3) {
    separable(offset, cell_size, tight_quadratic_stencil, tight_quadratic_stencil_diff)
}

/// Both kernels evaluated for one particle/node pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeWeights {
    pub cubic: f64,
    pub cubic_gradient: Vec3,
    pub quadratic: f64,
    pub quadratic_gradient: Vec3,
}

impl NodeWeights {
    /// Evaluate both kernels; `None` when the cubic weight vanishes.
    pub fn evaluate(offset: &Vec3, cell_size: f64) -> Option<Self> {
        let (cubic, cubic_gradient) = cubic_weight(offset, cell_size);
        if cubic == 0.0 {
            return None;
        }
        let (quadratic, quadratic_gradient) = quadratic_weight(offset, cell_size);
        Some(Self {
            cubic,
            cubic_gradient,
            quadratic,
            quadratic_gradient,
        })
    }
}
