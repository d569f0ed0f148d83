//! Implicit heat diffusion on the cell centres.
//!
//! Backward Euler for `ρc ∂T/∂t = ∇·(k∇T)` over the interior centres.
//! Colliding neighbours are fixed-temperature (Dirichlet) boundaries, empty
//! neighbours exchange no heat.

use super::{assemble_system, Grid, SystemRow};
use crate::error::Result;
use crate::kernel::cell_index;
use crate::solver::{select_spd_solver, SolveStats};
use crate::types::{CellState, FaceDirection};
use rayon::prelude::*;

impl Grid {
    /// Advance the centre temperatures by one step.
    ///
    /// The temperature before the solve is kept as `previous_temperature`
    /// for the FLIP transfer. Only interior centres change. Returns `None`
    /// when there is no interior centre.
    ///
    /// # Errors
    ///
    /// Returns error if the heat system cannot be assembled or the direct
    /// solver fails.
    pub fn calc_temperature(&mut self) -> Result<Option<SolveStats>> {
        self.cell_centres
            .par_iter_mut()
            .for_each(|c| c.previous_temperature = c.temperature);

        if !self.cell_centres.iter().any(|c| c.state == CellState::Interior) {
            return Ok(None);
        }

        let (matrix, rhs) = assemble_system(self.heat_rows(), self.cell_centres.len())?;
        let guess: Vec<f64> = self.cell_centres.iter().map(|c| c.temperature).collect();
        let solver = select_spd_solver(&self.config.physics.heat_solver);
        let solution = solver.solve(&matrix, rhs.as_slice(), Some(guess.as_slice()))?;
        if !solution.stats.converged {
            log::warn!(
                "{} heat solve stopped after {:?} iterations, residual {:?}",
                solver.name(),
                solution.stats.iterations,
                solution.stats.residual
            );
        }

        let x = &solution.x;
        self.cell_centres
            .par_iter_mut()
            .enumerate()
            .filter(|(_, c)| c.state == CellState::Interior)
            .for_each(|(idx, centre)| centre.temperature = x[idx]);
        Ok(Some(solution.stats))
    }

    fn heat_rows(&self) -> Vec<SystemRow> {
        let n = self.no_cells();
        let dt = self.dt;
        let h = self.cell_size;
        let cell_volume = h.powi(3);

        self.cell_centres
            .par_iter()
            .enumerate()
            .map(|(index, centre)| {
                if centre.state != CellState::Interior {
                    return SystemRow::identity(index, centre.temperature);
                }

                let capacity = centre.heat_capacity * (centre.mass / cell_volume) / dt;
                let mut diagonal = capacity;
                let mut rhs = capacity * centre.previous_temperature;
                let mut couplings = Vec::with_capacity(6);

                for direction in FaceDirection::ORDER {
                    let (Some(face), Some(nb)) = (
                        centre.coord.offset(direction.face_offset(), n),
                        centre.coord.offset(direction.neighbour_offset(), n),
                    ) else {
                        continue;
                    };
                    let conductivity = self.cell_faces[direction.axis.index()][cell_index(face.i, face.j, face.k, n)]
                        .heat_conductivity;
                    let coef = conductivity / (h * h);
                    let nb_index = cell_index(nb.i, nb.j, nb.k, n);
                    let neighbour = &self.cell_centres[nb_index];

                    match neighbour.state {
                        CellState::Interior => {
                            diagonal += coef;
                            couplings.push((nb_index, -coef));
                        }
                        CellState::Colliding => {
                            diagonal += coef;
                            rhs += coef * neighbour.temperature;
                        }
                        CellState::Empty => {}
                    }
                }

                SystemRow {
                    index,
                    diagonal,
                    couplings,
                    rhs,
                }
            })
            .collect()
    }
}
