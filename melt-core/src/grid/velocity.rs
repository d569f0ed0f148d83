//! Deviatoric (elastic shear) velocity update and boundary velocities.
//!
//! The elastic force on face i along axis a is
//!
//! ```text
//! fᵢ = −Σₚ Vₚ (∂ψ/∂FEₚ · FEₚᵀ · ∇ŵᵢₚ)ₐ
//! ```
//!
//! with the tight quadratic stencil ŵ. The implicit update solves, per axis,
//!
//! ```text
//! (M/dt + dt·H) v = M v*/dt + M g + f
//! ```
//!
//! where `Hᵢⱼ = Σₚ Vₚ (δP(eₐ ∇ŵⱼₚᵀ FEₚ) FEₚᵀ ∇ŵᵢₚ)ₐ` couples each interior
//! face to itself and its six axis neighbours in the same face set.

use super::{assemble_system, Grid, SystemRow};
use crate::config::VelocityIntegration;
use crate::emitter::Emitter;
use crate::error::Result;
use crate::kernel::{cell_index, quadratic_weight};
use crate::particle::Particle;
use crate::solver::{MinResSolver, SolveStats, Solver};
use crate::sparse::{CsrMatrix, SparseVector};
use crate::types::{Axis, CellState, Mat3, Vec3};
use rayon::prelude::*;

impl Grid {
    /// Apply the elastic shear forces and gravity to the face velocities.
    ///
    /// Only interior faces change. Returns the solve statistics per axis for
    /// implicit integration and `None` for each axis otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if a velocity system cannot be assembled or solved.
    pub fn calc_deviatoric_velocity(&mut self, emitter: &Emitter) -> Result<[Option<SolveStats>; 3]> {
        let particles = emitter.particles();
        let stress_terms: Vec<Mat3> = particles
            .par_iter()
            .map(|p| p.deviatoric_stress() * p.deformation_elastic().transpose() * p.volume())
            .collect();

        self.calc_deviatoric_force(&stress_terms);

        match self.config.physics.integration {
            VelocityIntegration::Explicit => {
                self.integrate_explicit();
                Ok([None, None, None])
            }
            VelocityIntegration::Implicit => {
                let mut stats = [None, None, None];
                for axis in Axis::ALL {
                    stats[axis.index()] = Some(self.solve_implicit(axis, particles)?);
                }
                Ok(stats)
            }
        }
    }

    fn calc_deviatoric_force(&mut self, stress_terms: &[Mat3]) {
        for (a, faces) in self.cell_faces.iter_mut().enumerate() {
            faces.par_iter_mut().for_each(|face| {
                face.deviatoric_force = -face
                    .interpolation_data
                    .iter()
                    .map(|d| (stress_terms[d.particle] * d.weights.quadratic_gradient)[a])
                    .sum::<f64>();
            });
        }
    }

    /// `v += dt·(f + m·g)/m` on interior faces.
    fn integrate_explicit(&mut self) {
        let dt = self.dt;
        let gravity = self.config.physics.gravity;
        for (a, faces) in self.cell_faces.iter_mut().enumerate() {
            faces
                .par_iter_mut()
                .filter(|f| f.state == CellState::Interior && f.mass > 0.0)
                .for_each(|face| {
                    face.velocity += dt * (face.deviatoric_force / face.mass + gravity[a]);
                });
        }
    }

    fn solve_implicit(&mut self, axis: Axis, particles: &[Particle]) -> Result<SolveStats> {
        let (matrix, rhs) = self.assemble_velocity_system(axis, particles)?;
        let a = axis.index();
        let guess: Vec<f64> = self.cell_faces[a].iter().map(|f| f.velocity).collect();

        let solver = MinResSolver::new(self.config.physics.velocity_solver.clone());
        let solution = solver.solve(&matrix, rhs.as_slice(), Some(guess.as_slice()))?;
        if !solution.stats.converged {
            log::warn!(
                "{} velocity solve along {:?} stopped after {:?} iterations, residual {:?}",
                solver.name(),
                axis,
                solution.stats.iterations,
                solution.stats.residual
            );
        }

        let x = &solution.x;
        self.cell_faces[a]
            .par_iter_mut()
            .enumerate()
            .filter(|(_, f)| f.state == CellState::Interior)
            .for_each(|(idx, face)| face.velocity = x[idx]);
        Ok(solution.stats)
    }

    fn assemble_velocity_system(&self, axis: Axis, particles: &[Particle]) -> Result<(CsrMatrix, SparseVector)> {
        let a = axis.index();
        let dt = self.dt;
        let gravity = self.config.physics.gravity[a];
        let faces = &self.cell_faces[a];

        let rows: Vec<SystemRow> = faces
            .par_iter()
            .enumerate()
            .map(|(index, face)| {
                match face.state {
                    CellState::Colliding => return SystemRow::identity(index, 0.0),
                    CellState::Empty => return SystemRow::identity(index, face.velocity),
                    CellState::Interior => {}
                }

                let mut terms = self.face_stiffness(axis, index, particles).into_iter();
                let own = terms.next().map_or(0.0, |(_, _, h_ii)| h_ii);
                velocity_row(
                    index,
                    face.mass / dt + dt * own,
                    terms.map(|(j, state, h_ij)| (j, state, dt * h_ij)),
                    face.mass * face.velocity / dt + face.mass * gravity + face.deviatoric_force,
                )
            })
            .collect();

        assemble_system(rows, faces.len())
    }

    /// Stiffness entries `H_ij` of face `index` with itself (first) and its
    /// six neighbours along x, y and z, each with the neighbour's state.
    fn face_stiffness(&self, axis: Axis, index: usize, particles: &[Particle]) -> Vec<(usize, CellState, f64)> {
        let n = self.no_cells();
        let a = axis.index();
        let h = self.cell_size;
        let faces = &self.cell_faces[a];
        let face = &faces[index];

        let mut neighbours = vec![(index, self.face_position(axis, face.coord), face.state)];
        for b in Axis::ALL {
            for step in [-1isize, 1] {
                let mut delta = [0isize; 3];
                delta[b.index()] = step;
                if let Some(coord) = face.coord.offset(delta, n) {
                    let j = cell_index(coord.i, coord.j, coord.k, n);
                    neighbours.push((j, self.face_position(axis, coord), faces[j].state));
                }
            }
        }

        let mut stiffness = vec![0.0; neighbours.len()];
        for d in &face.interpolation_data {
            let particle = &particles[d.particle];
            if particle.lame_mu() == 0.0 || particle.volume() == 0.0 {
                continue;
            }
            let fe = particle.deformation_elastic();
            let grad_i = d.weights.quadratic_gradient;
            let projected = fe.transpose() * grad_i;
            let position = particle.position();

            for (slot, (j, face_position, _)) in neighbours.iter().enumerate() {
                let grad_j = if *j == index {
                    grad_i
                } else {
                    quadratic_weight(&(position - face_position), h).1
                };
                if grad_j == Vec3::zeros() {
                    continue;
                }
                let mut df = Mat3::zeros();
                df.set_row(a, &(grad_j.transpose() * fe));
                let dp = particle.deviatoric_stress_differential(&df);
                stiffness[slot] += particle.volume() * (dp * projected)[a];
            }
        }

        neighbours
            .into_iter()
            .zip(stiffness)
            .map(|((j, _, state), h_ij)| (j, state, h_ij))
            .collect()
    }

    /// Zero the velocity on every face touching the collision object.
    ///
    /// A face is zeroed when it is colliding itself or when either centre
    /// it separates is colliding.
    pub fn set_boundary_velocity(&mut self) {
        let n = self.no_cells();
        let Grid {
            cell_centres,
            cell_faces,
            ..
        } = self;
        let centres = &*cell_centres;

        for axis in Axis::ALL {
            let mut lower = [0isize; 3];
            lower[axis.index()] = -1;
            cell_faces[axis.index()].par_iter_mut().for_each(|face| {
                let colliding = |idx: usize| centres[idx].state == CellState::Colliding;
                let own = cell_index(face.coord.i, face.coord.j, face.coord.k, n);
                let below = face
                    .coord
                    .offset(lower, n)
                    .map_or(true, |c| colliding(cell_index(c.i, c.j, c.k, n)));
                if face.state == CellState::Colliding || colliding(own) || below {
                    face.velocity = 0.0;
                }
            });
        }
    }
}

/// Row of an interior face. Interior neighbours keep their coupling, an
/// empty neighbour moves with the face so its coupling joins the diagonal,
/// and a colliding neighbour is at rest and drops out.
fn velocity_row(
    index: usize,
    mut diagonal: f64,
    neighbours: impl IntoIterator<Item = (usize, CellState, f64)>,
    rhs: f64,
) -> SystemRow {
    let mut couplings = Vec::with_capacity(6);
    for (j, state, coupling) in neighbours {
        match state {
            CellState::Interior => couplings.push((j, coupling)),
            CellState::Empty => diagonal += coupling,
            CellState::Colliding => {}
        }
    }
    SystemRow {
        index,
        diagonal,
        couplings,
        rhs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, StepConfig};
    use crate::material::Material;
    use crate::particle::CollisionBounds;
    use crate::types::{Phase, Point3};
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    const DT: f64 = 1e-3;

    fn block(grid: &Grid, phase: Phase) -> Emitter {
        let h = grid.cell_size();
        let spacing = 0.5 * h;
        let mut positions = Vec::new();
        let count = (0.5 / spacing).round() as usize;
        for k in 0..count {
            for j in 0..count {
                for i in 0..count {
                    positions.push(Point3::new(
                        0.25 + (i as f64 + 0.5) * spacing,
                        0.25 + (j as f64 + 0.5) * spacing,
                        0.25 + (k as f64 + 0.5) * spacing,
                    ));
                }
            }
        }
        Emitter::from_positions(&positions, 1e-3, 263.0, phase, Material::snow()).unwrap()
    }

    fn prepared(integration: VelocityIntegration, phase: Phase, shear: Option<Mat3>) -> (Grid, Emitter) {
        let physics = StepConfig::default().with_integration(integration);
        let mut grid = Grid::new(GridConfig::new(Point3::zeros(), 1.0, 8).with_physics(physics)).unwrap();
        let mut emitter = block(&grid, phase);

        if let Some(gradient) = shear {
            let bounds = CollisionBounds::new(Point3::repeat(-10.0), Point3::repeat(10.0));
            for p in emitter.particles_mut() {
                p.add_velocity_gradient(gradient);
            }
            emitter.update_particles(1.0, &bounds);
        }

        grid.dt = DT;
        grid.clear_cell_data();
        grid.find_particle_contribution_to_cell(&emitter);
        grid.transfer_particle_data(&emitter);
        grid.calc_initial_particle_volumes(&mut emitter);
        emitter.preset_particles(1.0, 1.0);
        grid.classify_cells();
        (grid, emitter)
    }

    #[test]
    fn test_explicit_rest_state_only_falls() {
        let (mut grid, emitter) = prepared(VelocityIntegration::Explicit, Phase::Solid, None);
        let stats = grid.calc_deviatoric_velocity(&emitter).unwrap();
        assert!(stats.iter().all(Option::is_none));

        let g = grid.config().physics.gravity;
        for axis in Axis::ALL {
            for face in grid.cell_faces(axis) {
                assert_relative_eq!(face.deviatoric_force, 0.0, epsilon = 1e-9);
                let expected = if face.state == CellState::Interior {
                    DT * g[axis.index()]
                } else {
                    0.0
                };
                assert_relative_eq!(face.velocity, expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_implicit_liquid_matches_free_fall() {
        let (mut grid, emitter) = prepared(VelocityIntegration::Implicit, Phase::Liquid, None);
        let stats = grid.calc_deviatoric_velocity(&emitter).unwrap();
        assert!(stats.iter().all(|s| s.as_ref().is_some_and(|s| s.converged)));

        let g = grid.config().physics.gravity;
        let interior: Vec<_> = grid
            .cell_faces(Axis::Y)
            .iter()
            .filter(|f| f.state == CellState::Interior)
            .collect();
        assert!(!interior.is_empty());
        for face in interior {
            assert_relative_eq!(face.velocity, DT * g.y, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_sheared_block_feels_restoring_force() {
        let shear = Mat3::new(0.0, 2e-3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut grid, emitter) = prepared(VelocityIntegration::Explicit, Phase::Solid, Some(shear));
        grid.calc_deviatoric_velocity(&emitter).unwrap();

        let forces: Vec<f64> = grid.cell_faces(Axis::X).iter().map(|f| f.deviatoric_force).collect();
        assert!(forces.iter().any(|f| f.abs() > 1e-9));
        // Internal forces cancel over the whole body
        assert_relative_eq!(forces.iter().sum::<f64>(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_velocity_system_is_symmetric() {
        let shear = Mat3::new(0.0, 2e-3, 0.0, 0.0, 0.0, -1e-3, 0.0, 0.0, 0.0);
        let (mut grid, emitter) = prepared(VelocityIntegration::Implicit, Phase::Solid, Some(shear));
        let stress: Vec<Mat3> = emitter
            .particles()
            .iter()
            .map(|p| p.deviatoric_stress() * p.deformation_elastic().transpose() * p.volume())
            .collect();
        grid.calc_deviatoric_force(&stress);

        let (matrix, rhs) = grid.assemble_velocity_system(Axis::X, emitter.particles()).unwrap();
        assert_eq!(rhs.as_slice().len(), 512);

        let entries: HashMap<(usize, usize), f64> = matrix.triplet_iter().map(|(r, c, &v)| ((r, c), v)).collect();
        let mut off_diagonal = 0;
        for (&(r, c), &v) in &entries {
            let mirrored = entries.get(&(c, r)).copied().unwrap_or(0.0);
            assert_relative_eq!(v, mirrored, epsilon = 1e-12, max_relative = 1e-12);
            if r != c {
                off_diagonal += 1;
            }
        }
        assert!(off_diagonal > 0);

        // Non-interior rows are identities
        for (idx, face) in grid.cell_faces(Axis::X).iter().enumerate() {
            if face.state != CellState::Interior {
                assert_eq!(entries.get(&(idx, idx)), Some(&1.0));
            }
        }
    }

    #[test]
    fn test_row_folds_neighbours_by_state() {
        let row = velocity_row(
            5,
            2.0,
            [
                (4, CellState::Interior, -0.25),
                (6, CellState::Empty, -0.5),
                (13, CellState::Colliding, -0.75),
            ],
            3.0,
        );
        assert_eq!(row.diagonal, 1.5);
        assert_eq!(row.couplings, vec![(4, -0.25)]);
        assert_eq!(row.rhs, 3.0);

        let rows = vec![
            row,
            SystemRow::identity(4, 0.0),
            SystemRow::identity(6, 0.0),
            SystemRow::identity(13, 0.0),
        ];
        let (matrix, _) = assemble_system(rows, 16).unwrap();
        let entries: HashMap<(usize, usize), f64> = matrix.triplet_iter().map(|(r, c, &v)| ((r, c), v)).collect();
        assert_eq!(entries[&(5, 5)], 1.5);
        assert_eq!(entries[&(5, 4)], -0.125);
        assert_eq!(entries[&(4, 5)], -0.125);
        assert!(!entries.contains_key(&(5, 6)));
        assert!(!entries.contains_key(&(5, 13)));
        assert_eq!(entries[&(6, 6)], 1.0);
        assert_eq!(entries[&(13, 13)], 1.0);
    }

    #[test]
    fn test_neighbour_states_in_assembled_system() {
        let (mut grid, emitter) = prepared(VelocityIntegration::Implicit, Phase::Solid, None);
        let particles = emitter.particles();

        // An interior face with two interior neighbours it is coupled to
        let (face, empty, colliding) = (0..grid.cell_faces(Axis::X).len())
            .filter(|&idx| grid.cell_faces(Axis::X)[idx].state == CellState::Interior)
            .find_map(|idx| {
                let coupled: Vec<(usize, f64)> = grid
                    .face_stiffness(Axis::X, idx, particles)
                    .into_iter()
                    .skip(1)
                    .filter(|&(_, state, h_ij)| state == CellState::Interior && h_ij != 0.0)
                    .map(|(j, _, h_ij)| (j, h_ij))
                    .collect();
                (coupled.len() >= 2).then(|| (idx, coupled[0], coupled[1]))
            })
            .unwrap();

        let entries = |grid: &Grid| -> HashMap<(usize, usize), f64> {
            let (matrix, _) = grid.assemble_velocity_system(Axis::X, particles).unwrap();
            matrix.triplet_iter().map(|(r, c, &v)| ((r, c), v)).collect()
        };
        let before = entries(&grid);
        assert!(before.contains_key(&(face, empty.0)));
        assert!(before.contains_key(&(face, colliding.0)));

        grid.cell_faces[0][empty.0].state = CellState::Empty;
        grid.cell_faces[0][colliding.0].state = CellState::Colliding;
        let after = entries(&grid);

        assert!(!after.contains_key(&(face, empty.0)));
        assert!(!after.contains_key(&(face, colliding.0)));
        assert_relative_eq!(
            after[&(face, face)],
            before[&(face, face)] + grid.dt * empty.1,
            max_relative = 1e-12
        );
        assert_eq!(after[&(empty.0, empty.0)], 1.0);
        assert_eq!(after[&(colliding.0, colliding.0)], 1.0);
    }

    #[test]
    fn test_implicit_solid_stays_finite() {
        let shear = Mat3::new(0.0, 2e-3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let (mut grid, emitter) = prepared(VelocityIntegration::Implicit, Phase::Solid, Some(shear));
        let stats = grid.calc_deviatoric_velocity(&emitter).unwrap();

        assert!(stats.iter().all(Option::is_some));
        for axis in Axis::ALL {
            for face in grid.cell_faces(axis) {
                assert!(face.velocity.is_finite());
                if face.state == CellState::Colliding {
                    assert_eq!(face.velocity, 0.0);
                }
            }
        }
    }
}
