//! Interior/empty/colliding labelling of faces and centres.
//!
//! Faces are labelled first. The outermost layer and the first inner face
//! layer along each face's own axis belong to the collision object. A
//! centre touching any colliding face is colliding, so the colliding shell
//! is two cells thick on every side. The remaining faces and centres are
//! interior when more than `particle_threshold` particles contribute to
//! them, and empty otherwise.

use super::{CellCounts, Grid};
use crate::types::{Axis, CellState, FaceDirection};
use rayon::prelude::*;

impl Grid {
    /// Label every face and centre and fix the temperature of non-interior
    /// centres.
    ///
    /// Colliding centres within two layers of the low end of the heat-source
    /// axis take the heat-source temperature; the other colliding centres
    /// and the empty centres take the ambient temperature. The source covers
    /// both colliding layers because only the inner one borders interior
    /// centres; the outermost plane alone would never reach them. Interior
    /// centres keep their transferred temperature. Calling this twice without
    /// changing the grid gives the same result.
    pub fn classify_cells(&mut self) -> CellCounts {
        let n = self.no_cells();
        let Grid {
            cell_centres,
            cell_faces,
            config,
            ..
        } = self;
        let physics = &config.physics;
        let threshold = physics.particle_threshold;

        for (a, faces) in cell_faces.iter_mut().enumerate() {
            let axis = Axis::ALL[a];
            faces.par_iter_mut().for_each(|face| {
                face.state = if face.coord.on_outer_layer(n) || face.coord.along(axis) == 1 {
                    CellState::Colliding
                } else if face.no_particles() <= threshold {
                    CellState::Empty
                } else {
                    CellState::Interior
                };
            });
        }

        let faces = &*cell_faces;
        cell_centres.par_iter_mut().for_each(|centre| {
            let mut state = if centre.no_particles() > threshold {
                CellState::Interior
            } else {
                CellState::Empty
            };
            for direction in FaceDirection::ORDER {
                let Some(coord) = centre.coord.offset(direction.face_offset(), n) else {
                    state = CellState::Colliding;
                    break;
                };
                let face = &faces[direction.axis.index()][coord.i + coord.j * n + coord.k * n * n];
                match face.state {
                    CellState::Colliding => {
                        state = CellState::Colliding;
                        break;
                    }
                    CellState::Empty => state = CellState::Empty,
                    CellState::Interior => {}
                }
            }
            centre.state = state;

            match state {
                CellState::Interior => {}
                CellState::Empty => centre.temperature = physics.ambient_temperature,
                CellState::Colliding => {
                    centre.temperature = if centre.coord.along(physics.heat_source_axis) < 2 {
                        physics.heat_source_temperature
                    } else {
                        physics.ambient_temperature
                    };
                }
            }
        });

        let counts = self.cell_counts();
        log::debug!(
            "classified centres: {} interior, {} empty, {} colliding",
            counts.interior,
            counts.empty,
            counts.colliding
        );
        counts
    }
}
