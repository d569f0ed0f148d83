//! Particle/grid interpolation weights.
//!
//! Each particle contributes to the cell centres and faces inside a window
//! of −2..+3 cells around its home cell per axis. The window covers the
//! cubic B-spline support of the centres and of the half-cell-shifted faces.
//! Only non-zero cubic weights produce an entry.

use super::cell::InterpolationData;
use super::Grid;
use crate::emitter::Emitter;
use crate::kernel::{cell_index, particle_grid_cell, NodeWeights};
use crate::types::{Axis, CellCoord, Point3};
use rayon::prelude::*;

/// Weights of one particle on a cell centre and on the cell's three faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellWeights {
    pub centre: Option<NodeWeights>,
    /// Indexed by [`Axis::index`].
    pub faces: [Option<NodeWeights>; 3],
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Centre,
    Face(usize),
}

const WINDOW: std::ops::RangeInclusive<isize> = -2..=3;

impl Grid {
    /// Reset every record to its placeholder state and drop last step's
    /// interpolation entries.
    pub fn clear_cell_data(&mut self) {
        self.cell_centres.par_iter_mut().for_each(|c| c.clear());
        for faces in self.cell_faces.iter_mut() {
            faces.par_iter_mut().for_each(|f| f.clear());
        }
    }

    /// Kernel weights of a particle at `position` on the centre and faces
    /// of cell `coord`.
    pub fn calc_interpolation_weights(&self, position: &Point3, coord: CellCoord) -> CellWeights {
        let h = self.cell_size;
        let centre = self.centre_position(coord);
        let faces = Axis::ALL.map(|axis| {
            let mut offset = position - centre;
            offset[axis.index()] += 0.5 * h;
            NodeWeights::evaluate(&offset, h)
        });
        CellWeights {
            centre: NodeWeights::evaluate(&(position - centre), h),
            faces,
        }
    }

    /// Build the interpolation lists of every centre and face.
    ///
    /// Particles are processed in parallel into private lists that are then
    /// merged in particle order, so the lists do not depend on scheduling.
    pub fn find_particle_contribution_to_cell(&mut self, emitter: &Emitter) {
        let n = self.no_cells();
        let grid = &*self;

        let contributions: Vec<Vec<(Location, usize, NodeWeights)>> = emitter
            .particles()
            .par_iter()
            .map(|particle| {
                let position = particle.position();
                let mut found = Vec::new();
                if !position.iter().all(|x| x.is_finite()) {
                    return found;
                }
                let home = particle_grid_cell(&position, grid.cell_size, &grid.edge_origin);
                let in_range = |v: isize, d: isize| v.checked_add(d).filter(|&c| c >= 0 && c < n as isize);

                for dk in WINDOW {
                    for dj in WINDOW {
                        for di in WINDOW {
                            let (Some(i), Some(j), Some(k)) =
                                (in_range(home[0], di), in_range(home[1], dj), in_range(home[2], dk))
                            else {
                                continue;
                            };
                            let coord = CellCoord::new(i as usize, j as usize, k as usize);
                            let idx = cell_index(coord.i, coord.j, coord.k, n);
                            let weights = grid.calc_interpolation_weights(&position, coord);

                            if let Some(w) = weights.centre {
                                found.push((Location::Centre, idx, w));
                            }
                            for (a, face) in weights.faces.iter().enumerate() {
                                if let Some(w) = face {
                                    found.push((Location::Face(a), idx, *w));
                                }
                            }
                        }
                    }
                }
                found
            })
            .collect();

        let mut entries = 0;
        for (particle, found) in contributions.into_iter().enumerate() {
            entries += found.len();
            for (location, idx, weights) in found {
                let data = InterpolationData { particle, weights };
                match location {
                    Location::Centre => self.cell_centres[idx].interpolation_data.push(data),
                    Location::Face(a) => self.cell_faces[a][idx].interpolation_data.push(data),
                }
            }
        }
        log::debug!(
            "interpolation: {} entries for {} particles",
            entries,
            emitter.no_particles()
        );
    }
}
