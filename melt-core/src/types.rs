//! Core data types shared by the particle and grid stages.
//!
//! This module defines:
//! - Geometric aliases (points, vectors, 3x3 tensors)
//! - Material phase and grid cell classification
//! - Axis and face-direction tags for the staggered grid

use nalgebra::{Matrix3, Vector3};

/// A point in 3D space.
pub type Point3 = Vector3<f64>;

/// A 3D vector (velocity, gradient, force, etc.).
pub type Vec3 = Vector3<f64>;

/// A 3x3 tensor (deformation gradient, velocity gradient, stress).
pub type Mat3 = Matrix3<f64>;

/// Material phase of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Elastoplastic solid (snow, ice).
    #[default]
    Solid,
    /// Melted material with no deviatoric resistance.
    Liquid,
}

/// Per-step classification of a cell centre or cell face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellState {
    /// Enough material to take part in the solves.
    #[default]
    Interior,
    /// Vacuum or too few particles.
    Empty,
    /// Inside the bounding collision object.
    Colliding,
}

/// Coordinate axis of the staggered grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in X, Y, Z order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index (0, 1 or 2).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Unit offset along this axis as an (i, j, k) increment.
    #[inline]
    pub fn offset(self) -> [isize; 3] {
        match self {
            Axis::X => [1, 0, 0],
            Axis::Y => [0, 1, 0],
            Axis::Z => [0, 0, 1],
        }
    }
}

/// Side of a cell a face sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Lower,
    Upper,
}

/// One of the six faces bounding a cell centre.
///
/// The lower face along an axis shares the cell's own (i, j, k); the upper
/// face is the lower face of the next cell along that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceDirection {
    pub axis: Axis,
    pub side: Side,
}

impl FaceDirection {
    /// Precedence order used by classification: lower before upper,
    /// X before Y before Z.
    pub const ORDER: [FaceDirection; 6] = [
        FaceDirection { axis: Axis::X, side: Side::Lower },
        FaceDirection { axis: Axis::X, side: Side::Upper },
        FaceDirection { axis: Axis::Y, side: Side::Lower },
        FaceDirection { axis: Axis::Y, side: Side::Upper },
        FaceDirection { axis: Axis::Z, side: Side::Lower },
        FaceDirection { axis: Axis::Z, side: Side::Upper },
    ];

    /// (i, j, k) of the face record relative to the cell.
    #[inline]
    pub fn face_offset(self) -> [isize; 3] {
        match self.side {
            Side::Lower => [0, 0, 0],
            Side::Upper => self.axis.offset(),
        }
    }

    /// (i, j, k) of the neighbouring cell centre across this face.
    #[inline]
    pub fn neighbour_offset(self) -> [isize; 3] {
        let [a, b, c] = self.axis.offset();
        match self.side {
            Side::Lower => [-a, -b, -c],
            Side::Upper => [a, b, c],
        }
    }
}

/// Integer (i, j, k) location of a grid record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellCoord {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl CellCoord {
    pub fn new(i: usize, j: usize, k: usize) -> Self {
        Self { i, j, k }
    }

    /// Index along one axis.
    #[inline]
    pub fn along(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.i,
            Axis::Y => self.j,
            Axis::Z => self.k,
        }
    }

    /// Offset this coordinate, returning `None` when it leaves `[0, no_cells)³`.
    #[inline]
    pub fn offset(&self, delta: [isize; 3], no_cells: usize) -> Option<CellCoord> {
        let shift = |v: usize, d: isize| -> Option<usize> {
            let shifted = v as isize + d;
            if shifted < 0 || shifted >= no_cells as isize {
                None
            } else {
                Some(shifted as usize)
            }
        };
        Some(CellCoord {
            i: shift(self.i, delta[0])?,
            j: shift(self.j, delta[1])?,
            k: shift(self.k, delta[2])?,
        })
    }

    /// Whether any index lies on the outermost grid layer.
    #[inline]
    pub fn on_outer_layer(&self, no_cells: usize) -> bool {
        let last = no_cells.saturating_sub(1);
        [self.i, self.j, self.k].iter().any(|&v| v == 0 || v == last)
    }
}
