//! Particle to grid and grid to particle transfers.

use super::Grid;
use crate::emitter::Emitter;
use crate::types::{Mat3, Vec3};
use rayon::prelude::*;

impl Grid {
    /// Mass-weighted averages of the particle quantities on every record.
    ///
    /// Centres receive mass, J, JE, temperature, λ⁻¹ and heat capacity;
    /// faces receive mass, their velocity component and heat conductivity.
    /// Records without mass keep their zeroed values. `JP = J / JE` is
    /// derived from the averages.
    pub fn transfer_particle_data(&mut self, emitter: &Emitter) {
        let particles = emitter.particles();

        self.cell_centres.par_iter_mut().for_each(|centre| {
            for data in &centre.interpolation_data {
                let sample = particles[data.particle].cell_centre_data();
                let weighted_mass = data.weights.cubic * sample.mass;

                centre.mass += weighted_mass;
                centre.det_deformation_gradient += weighted_mass * sample.det_deformation_gradient;
                centre.det_deformation_elastic += weighted_mass * sample.det_deformation_elastic;
                centre.temperature += weighted_mass * sample.temperature;
                centre.lame_lambda_inverse += weighted_mass * sample.lame_lambda_inverse;
                centre.heat_capacity += weighted_mass * emitter.heat_capacity(sample.phase);
            }

            if centre.mass > 0.0 {
                let inv = 1.0 / centre.mass;
                centre.det_deformation_gradient *= inv;
                centre.det_deformation_elastic *= inv;
                centre.temperature *= inv;
                centre.lame_lambda_inverse *= inv;
                centre.heat_capacity *= inv;
                if centre.det_deformation_elastic != 0.0 {
                    centre.det_deformation_plastic = centre.det_deformation_gradient / centre.det_deformation_elastic;
                }
            }
        });

        for axis in 0..3 {
            self.cell_faces[axis].par_iter_mut().for_each(|face| {
                for data in &face.interpolation_data {
                    let sample = particles[data.particle].cell_face_data();
                    let weighted_mass = data.weights.cubic * sample.mass;

                    face.mass += weighted_mass;
                    face.velocity += weighted_mass * sample.velocity[axis];
                    face.heat_conductivity += weighted_mass * emitter.heat_conductivity(sample.phase);
                }

                if face.mass > 0.0 {
                    let inv = 1.0 / face.mass;
                    face.velocity *= inv;
                    face.heat_conductivity *= inv;
                }
                face.previous_velocity = face.velocity;
            });
        }
    }

    /// One-time particle volume bootstrap.
    ///
    /// Every centre hands `w·m_c / h³` back to each contributing particle as
    /// density, then each particle takes `volume = mass / density`. Densities
    /// are rebuilt from zero, so repeating the call gives the same volumes.
    /// Returns the number of particles that received no density; their volume
    /// is left as it was.
    pub fn calc_initial_particle_volumes(&self, emitter: &mut Emitter) -> usize {
        let cell_volume = self.cell_size.powi(3);

        let contributions: Vec<(usize, f64)> = self
            .cell_centres
            .par_iter()
            .flat_map_iter(|centre| {
                let density = centre.mass / cell_volume;
                centre
                    .interpolation_data
                    .iter()
                    .map(move |data| (data.particle, data.weights.cubic * density))
            })
            .collect();

        let particles = emitter.particles_mut();
        particles.par_iter_mut().for_each(|p| p.reset_density());
        for (particle, density) in contributions {
            particles[particle].add_density(density);
        }

        let missing = particles
            .par_iter_mut()
            .map(|p| p.calc_initial_volume())
            .filter(|&has_volume| !has_volume)
            .count();
        if missing > 0 {
            log::warn!("{} particles received no grid density; their volume stays zero", missing);
        }
        missing
    }

    /// Blend the solved grid velocity and temperature back onto the
    /// particles.
    ///
    /// Expects the particles to hold the FLIP fractions `alpha·vₚ` and
    /// `beta·Tₚ` left by [`crate::particle::Particle::preset_for_time_step`].
    /// Each face adds `w·(alpha·(v − vᵒˡᵈ) + (1 − alpha)·v)` to its velocity
    /// component and `v·∇wᵀ` to the matching row of the velocity gradient;
    /// each centre does the same for temperature with `beta`.
    pub fn update_particle_from_grid(&self, emitter: &mut Emitter, alpha: f64, beta: f64) {
        let n = emitter.no_particles();
        let mut velocity = vec![Vec3::zeros(); n];
        let mut gradient = vec![Mat3::zeros(); n];
        let mut temperature = vec![0.0; n];

        for (a, faces) in self.cell_faces.iter().enumerate() {
            let contributions: Vec<(usize, f64, Vec3)> = faces
                .par_iter()
                .flat_map_iter(|face| {
                    let blended = alpha * (face.velocity - face.previous_velocity) + (1.0 - alpha) * face.velocity;
                    let v = face.velocity;
                    face.interpolation_data
                        .iter()
                        .map(move |d| (d.particle, d.weights.cubic * blended, d.weights.cubic_gradient * v))
                })
                .collect();

            for (p, dv, grad) in contributions {
                velocity[p][a] += dv;
                for c in 0..3 {
                    gradient[p][(a, c)] += grad[c];
                }
            }
        }

        let contributions: Vec<(usize, f64)> = self
            .cell_centres
            .par_iter()
            .flat_map_iter(|centre| {
                let blended = beta * (centre.temperature - centre.previous_temperature)
                    + (1.0 - beta) * centre.temperature;
                centre
                    .interpolation_data
                    .iter()
                    .map(move |d| (d.particle, d.weights.cubic * blended))
            })
            .collect();
        for (p, change) in contributions {
            temperature[p] += change;
        }

        emitter
            .particles_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(p, particle)| {
                particle.add_velocity(velocity[p]);
                particle.add_velocity_gradient(gradient[p]);
                particle.add_temperature(temperature[p]);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::material::Material;
    use crate::types::{Axis, Phase, Point3};
    use approx::assert_relative_eq;

    fn setup(velocity: Vec3) -> (Grid, Emitter) {
        let mut grid = Grid::new(GridConfig::new(Point3::zeros(), 1.0, 10)).unwrap();
        let positions = [Point3::new(0.43, 0.51, 0.47), Point3::new(0.48, 0.46, 0.52)];
        let mut emitter = Emitter::from_positions(&positions, 2.0, 263.0, Phase::Solid, Material::snow()).unwrap();
        for p in emitter.particles_mut() {
            p.add_velocity(velocity);
        }
        grid.clear_cell_data();
        grid.find_particle_contribution_to_cell(&emitter);
        grid.transfer_particle_data(&emitter);
        (grid, emitter)
    }

    #[test]
    fn test_uniform_fields_are_reproduced() {
        let (grid, emitter) = setup(Vec3::new(1.0, -2.0, 0.5));
        let capacity = emitter.heat_capacity(Phase::Solid);

        for centre in grid.cell_centres().iter().filter(|c| c.mass > 0.0) {
            assert_relative_eq!(centre.temperature, 263.0, epsilon = 1e-9);
            assert_relative_eq!(centre.heat_capacity, capacity, epsilon = 1e-9);
            assert_relative_eq!(centre.det_deformation_gradient, 1.0, epsilon = 1e-12);
            assert_relative_eq!(centre.det_deformation_plastic, 1.0, epsilon = 1e-12);
        }
        for (axis, expected) in [(Axis::X, 1.0), (Axis::Y, -2.0), (Axis::Z, 0.5)] {
            for face in grid.cell_faces(axis).iter().filter(|f| f.mass > 0.0) {
                assert_relative_eq!(face.velocity, expected, epsilon = 1e-12);
                assert_eq!(face.previous_velocity, face.velocity);
            }
        }
    }

    #[test]
    fn test_zero_mass_records_stay_zero() {
        let (grid, _) = setup(Vec3::zeros());
        let far = grid.cell_centre(0, 0, 9).unwrap();
        assert_eq!(far.mass, 0.0);
        assert_eq!(far.temperature, 0.0);
        assert_eq!(far.det_deformation_plastic, 0.0);
        assert!(grid.cell_centres().iter().all(|c| c.temperature.is_finite()));
    }

    #[test]
    fn test_initial_volumes() {
        let (grid, mut emitter) = setup(Vec3::zeros());
        assert_eq!(grid.calc_initial_particle_volumes(&mut emitter), 0);

        let cell_volume = grid.cell_size().powi(3);
        for (p, particle) in emitter.particles().iter().enumerate() {
            let expected: f64 = grid
                .cell_centres()
                .iter()
                .flat_map(|c| c.interpolation_data.iter().map(move |d| (c.mass, d)))
                .filter(|(_, d)| d.particle == p)
                .map(|(mass, d)| d.weights.cubic * mass / cell_volume)
                .sum();
            assert_relative_eq!(particle.density(), expected, max_relative = 1e-12);
            assert_relative_eq!(particle.volume(), 2.0 / expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_repeated_volume_bootstrap_is_stable() {
        let (grid, mut emitter) = setup(Vec3::zeros());
        grid.calc_initial_particle_volumes(&mut emitter);
        let first: Vec<(f64, f64)> = emitter.particles().iter().map(|p| (p.density(), p.volume())).collect();

        grid.calc_initial_particle_volumes(&mut emitter);
        for (particle, (density, volume)) in emitter.particles().iter().zip(first) {
            assert_relative_eq!(particle.density(), density, max_relative = 1e-12);
            assert_relative_eq!(particle.volume(), volume, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_particle_without_density_keeps_zero_volume() {
        let mut grid = Grid::new(GridConfig::new(Point3::zeros(), 1.0, 10)).unwrap();
        let positions = [Point3::new(0.45, 0.5, 0.5), Point3::new(-3.0, 0.5, 0.5)];
        let mut emitter = Emitter::from_positions(&positions, 2.0, 263.0, Phase::Solid, Material::snow()).unwrap();
        grid.clear_cell_data();
        grid.find_particle_contribution_to_cell(&emitter);
        grid.transfer_particle_data(&emitter);

        assert_eq!(grid.calc_initial_particle_volumes(&mut emitter), 1);
        assert!(emitter.particles()[0].volume() > 0.0);
        assert_eq!(emitter.particles()[1].density(), 0.0);
        assert_eq!(emitter.particles()[1].volume(), 0.0);
    }

    #[test]
    fn test_pic_transfer_returns_grid_velocity() {
        let velocity = Vec3::new(0.3, -0.7, 0.2);
        let (grid, mut emitter) = setup(velocity);

        // Pure PIC: particles start from zero and receive the grid field
        emitter.preset_particles(0.0, 0.0);
        grid.update_particle_from_grid(&mut emitter, 0.0, 0.0);
        for particle in emitter.particles() {
            assert_relative_eq!(particle.velocity(), velocity, epsilon = 1e-12);
            assert_relative_eq!(particle.temperature(), 263.0, epsilon = 1e-9);
            // Uniform field has no gradient
            assert_relative_eq!(particle.velocity_gradient(), Mat3::zeros(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flip_transfer_adds_grid_change() {
        let (mut grid, mut emitter) = setup(Vec3::new(1.0, 0.0, 0.0));
        for face in grid.cell_faces[Axis::X.index()].iter_mut() {
            face.velocity += 0.5;
        }

        emitter.preset_particles(1.0, 1.0);
        grid.update_particle_from_grid(&mut emitter, 1.0, 1.0);
        for particle in emitter.particles() {
            assert_relative_eq!(particle.velocity().x, 1.5, epsilon = 1e-12);
            assert_relative_eq!(particle.velocity().y, 0.0, epsilon = 1e-12);
        }
    }
}
