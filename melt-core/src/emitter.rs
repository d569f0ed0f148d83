//! Particle source.
//!
//! An emitter owns the particles of one material and forwards the material
//! constants to the stages that need them. The grid only reads particle
//! samples through it and writes back through the per-particle setters.

use crate::error::{Error, Result};
use crate::material::Material;
use crate::particle::{CollisionBounds, Particle};
use crate::types::{Phase, Point3};
use rayon::prelude::*;

/// Owner of a particle collection and its material.
#[derive(Debug, Clone)]
pub struct Emitter {
    particles: Vec<Particle>,
    material: Material,
}

impl Emitter {
    /// Create an emitter without particles.
    pub fn new(material: Material) -> Self {
        Self {
            particles: Vec::new(),
            material,
        }
    }

    /// Create one particle at each position, all with the same mass,
    /// temperature and phase.
    pub fn from_positions(
        positions: &[Point3],
        particle_mass: f64,
        temperature: f64,
        phase: Phase,
        material: Material,
    ) -> Result<Self> {
        let particles = positions
            .iter()
            .map(|&p| Particle::new(p, particle_mass, temperature, phase, &material))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { particles, material })
    }

    /// Fill the box `[min, max]` with solid particles on a regular lattice.
    ///
    /// Lattice points sit at `min + (n + ½)·spacing` per axis.
    pub fn fill_box(
        min: Point3,
        max: Point3,
        spacing: f64,
        particle_mass: f64,
        temperature: f64,
        material: Material,
    ) -> Result<Self> {
        if !(spacing > 0.0) {
            return Err(Error::Particle("particle spacing must be positive".into()));
        }
        if (0..3).any(|a| max[a] <= min[a]) {
            return Err(Error::Particle("emitter box must have positive extent".into()));
        }

        let count = |a: usize| ((max[a] - min[a]) / spacing).floor() as usize;
        let (nx, ny, nz) = (count(0), count(1), count(2));

        let mut positions = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    positions.push(
                        min + Point3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5) * spacing,
                    );
                }
            }
        }
        log::debug!("emitter box sampled with {} particles", positions.len());

        Self::from_positions(&positions, particle_mass, temperature, Phase::Solid, material)
    }

    pub fn no_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn heat_capacity(&self, phase: Phase) -> f64 {
        self.material.heat_capacity(phase)
    }

    pub fn heat_conductivity(&self, phase: Phase) -> f64 {
        self.material.heat_conductivity(phase)
    }

    /// Total particle mass.
    pub fn total_mass(&self) -> f64 {
        self.particles.iter().map(Particle::mass).sum()
    }

    /// Run [`Particle::preset_for_time_step`] on every particle.
    pub fn preset_particles(&mut self, alpha: f64, beta: f64) {
        let material = &self.material;
        self.particles
            .par_iter_mut()
            .for_each(|p| p.preset_for_time_step(alpha, beta, material));
    }

    /// Run [`Particle::update`] on every particle.
    pub fn update_particles(&mut self, dt: f64, bounds: &CollisionBounds) {
        let material = &self.material;
        self.particles
            .par_iter_mut()
            .for_each(|p| p.update(dt, material, bounds));
    }
}
