//! Pressure projection.
//!
//! Solves for a cell-centred pressure that removes the part of the
//! velocity divergence the material cannot sustain:
//!
//! ```text
//! JP/(J·λ·dt) p − dt ∇·(1/ρ ∇p) = −∇·v − (JE − 1)/(JE·dt)
//! ```
//!
//! Empty centres are free surfaces with `p = 0`. Faces into the collision
//! object carry no flux.

use super::{assemble_system, Grid, SystemRow};
use crate::error::Result;
use crate::kernel::cell_index;
use crate::solver::{select_spd_solver, SolveStats};
use crate::types::{Axis, CellState, FaceDirection, Side};
use rayon::prelude::*;

impl Grid {
    /// Project the face velocities and re-apply the boundary velocity.
    ///
    /// Returns `None` without touching the velocities when there is no
    /// interior centre.
    ///
    /// # Errors
    ///
    /// Returns error if the pressure system cannot be assembled or the
    /// direct solver fails.
    pub fn project_velocity(&mut self) -> Result<Option<SolveStats>> {
        if !self.cell_centres.iter().any(|c| c.state == CellState::Interior) {
            return Ok(None);
        }

        let pressure = {
            let rows = self.pressure_rows();
            let (matrix, rhs) = assemble_system(rows, self.cell_centres.len())?;
            let solver = select_spd_solver(&self.config.physics.pressure_solver);
            let solution = solver.solve(&matrix, rhs.as_slice(), None)?;
            if !solution.stats.converged {
                log::warn!(
                    "{} pressure solve stopped after {:?} iterations, residual {:?}",
                    solver.name(),
                    solution.stats.iterations,
                    solution.stats.residual
                );
            }
            solution
        };

        self.apply_pressure_gradient(&pressure.x);
        self.set_boundary_velocity();
        Ok(Some(pressure.stats))
    }

    fn pressure_rows(&self) -> Vec<SystemRow> {
        let n = self.no_cells();
        let dt = self.dt;
        let h = self.cell_size;
        let cell_volume = h.powi(3);

        self.cell_centres
            .par_iter()
            .enumerate()
            .map(|(index, centre)| {
                if centre.state != CellState::Interior {
                    return SystemRow::identity(index, 0.0);
                }

                let mut diagonal = if centre.det_deformation_gradient != 0.0 {
                    centre.det_deformation_plastic * centre.lame_lambda_inverse / (centre.det_deformation_gradient * dt)
                } else {
                    0.0
                };
                let mut couplings = Vec::with_capacity(6);
                let mut divergence = 0.0;

                for direction in FaceDirection::ORDER {
                    let Some(face_coord) = centre.coord.offset(direction.face_offset(), n) else {
                        continue;
                    };
                    let face_index = cell_index(face_coord.i, face_coord.j, face_coord.k, n);
                    let face = &self.cell_faces[direction.axis.index()][face_index];
                    divergence += match direction.side {
                        Side::Upper => face.velocity / h,
                        Side::Lower => -face.velocity / h,
                    };

                    let Some(nb) = centre.coord.offset(direction.neighbour_offset(), n) else {
                        continue;
                    };
                    let nb_index = cell_index(nb.i, nb.j, nb.k, n);
                    let nb_state = self.cell_centres[nb_index].state;
                    let density = face.mass / cell_volume;
                    if face.state == CellState::Colliding || nb_state == CellState::Colliding || !(density > 0.0) {
                        continue;
                    }

                    let coef = dt / (density * h * h);
                    diagonal += coef;
                    if nb_state == CellState::Interior {
                        couplings.push((nb_index, -coef));
                    }
                }

                let je = centre.det_deformation_elastic;
                let volume_term = if je != 0.0 { (je - 1.0) / (je * dt) } else { 0.0 };
                SystemRow {
                    index,
                    diagonal,
                    couplings,
                    rhs: -divergence - volume_term,
                }
            })
            .collect()
    }

    /// `v −= dt/(ρ h)·(p_c − p_{c−1})` on every face between two
    /// non-colliding centres. Empty centres hold zero pressure.
    fn apply_pressure_gradient(&mut self, pressure: &[f64]) {
        let n = self.no_cells();
        let dt = self.dt;
        let h = self.cell_size;
        let cell_volume = h.powi(3);
        let Grid {
            cell_centres,
            cell_faces,
            ..
        } = self;
        let centres = &*cell_centres;
        let pressure_at = |idx: usize| match centres[idx].state {
            CellState::Interior => Some(pressure[idx]),
            CellState::Empty => Some(0.0),
            CellState::Colliding => None,
        };

        for axis in Axis::ALL {
            let mut lower = [0isize; 3];
            lower[axis.index()] = -1;
            cell_faces[axis.index()].par_iter_mut().for_each(|face| {
                if face.state == CellState::Colliding || !(face.mass > 0.0) {
                    return;
                }
                let Some(below) = face.coord.offset(lower, n) else {
                    return;
                };
                let own = pressure_at(cell_index(face.coord.i, face.coord.j, face.coord.k, n));
                let beneath = pressure_at(cell_index(below.i, below.j, below.k, n));
                if let (Some(p_upper), Some(p_lower)) = (own, beneath) {
                    let density = face.mass / cell_volume;
                    face.velocity -= dt / (density * h) * (p_upper - p_lower);
                }
            });
        }
    }
}
