//! Grid and time-step configuration.

use crate::error::{Error, Result};
use crate::solver::SolverConfig;
use crate::types::{Axis, Point3, Vec3};

/// How the deviatoric velocity update is integrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VelocityIntegration {
    /// Solve `(M/dt + K) v = M vⁿ/dt + f` with MINRES.
    #[default]
    Implicit,
    /// Forward Euler `v += dt·f/m`.
    Explicit,
}

/// Physical and numerical parameters of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig {
    pub integration: VelocityIntegration,
    /// Cells and faces with at most this many contributing particles are empty.
    pub particle_threshold: usize,
    /// Temperature of the surrounding air (K).
    pub ambient_temperature: f64,
    /// Temperature of the heat-source plate (K).
    pub heat_source_temperature: f64,
    /// The heat source is the colliding slab at the low end of this axis.
    pub heat_source_axis: Axis,
    pub gravity: Vec3,
    /// Run the pressure projection after the deviatoric update.
    pub project_velocity: bool,
    pub velocity_solver: SolverConfig,
    pub pressure_solver: SolverConfig,
    pub heat_solver: SolverConfig,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            integration: VelocityIntegration::Implicit,
            particle_threshold: 6,
            ambient_temperature: 293.0,
            heat_source_temperature: 373.0,
            heat_source_axis: Axis::Y,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            project_velocity: true,
            velocity_solver: SolverConfig::default(),
            pressure_solver: SolverConfig::default(),
            heat_solver: SolverConfig::default(),
        }
    }
}

impl StepConfig {
    pub fn with_integration(mut self, integration: VelocityIntegration) -> Self {
        self.integration = integration;
        self
    }

    pub fn with_particle_threshold(mut self, threshold: usize) -> Self {
        self.particle_threshold = threshold;
        self
    }

    /// Set the ambient and heat-source temperatures.
    pub fn with_temperatures(mut self, ambient: f64, heat_source: f64) -> Self {
        self.ambient_temperature = ambient;
        self.heat_source_temperature = heat_source;
        self
    }

    pub fn with_heat_source_axis(mut self, axis: Axis) -> Self {
        self.heat_source_axis = axis;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_projection(mut self, enabled: bool) -> Self {
        self.project_velocity = enabled;
        self
    }

    /// Use the same solver settings for all three solves.
    pub fn with_solvers(mut self, solver: SolverConfig) -> Self {
        self.velocity_solver = solver.clone();
        self.pressure_solver = solver.clone();
        self.heat_solver = solver;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.ambient_temperature > 0.0) || !(self.heat_source_temperature > 0.0) {
            return Err(Error::InvalidConfig("temperatures must be above absolute zero".into()));
        }
        self.velocity_solver.validate()?;
        self.pressure_solver.validate()?;
        self.heat_solver.validate()
    }
}

/// Geometry of the cubic staggered grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// Centre of cell (0, 0, 0).
    pub origin: Point3,
    /// Edge length of the whole grid.
    pub grid_size: f64,
    /// Cells per axis.
    pub no_cells: usize,
    pub physics: StepConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: Point3::zeros(),
            grid_size: 1.0,
            no_cells: 16,
            physics: StepConfig::default(),
        }
    }
}

impl GridConfig {
    pub fn new(origin: Point3, grid_size: f64, no_cells: usize) -> Self {
        Self {
            origin,
            grid_size,
            no_cells,
            physics: StepConfig::default(),
        }
    }

    pub fn with_physics(mut self, physics: StepConfig) -> Self {
        self.physics = physics;
        self
    }

    /// `grid_size / no_cells`.
    pub fn cell_size(&self) -> f64 {
        self.grid_size / self.no_cells as f64
    }

    /// Outer corner of cell (0, 0, 0).
    pub fn edge_origin(&self) -> Point3 {
        self.origin - Vec3::repeat(0.5 * self.cell_size())
    }

    /// The two collision layers on each side leave no interior below five
    /// cells per axis.
    pub fn validate(&self) -> Result<()> {
        if self.no_cells < 5 {
            return Err(Error::InvalidConfig(format!(
                "grid needs at least 5 cells per axis, got {}",
                self.no_cells
            )));
        }
        if !(self.grid_size > 0.0) {
            return Err(Error::InvalidConfig("grid size must be positive".into()));
        }
        self.physics.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = GridConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.physics.particle_threshold, 6);
        assert_eq!(config.physics.ambient_temperature, 293.0);
        assert_eq!(config.physics.heat_source_temperature, 373.0);
    }

    #[test]
    fn test_cell_geometry() {
        let config = GridConfig::new(Point3::new(1.0, 1.0, 1.0), 2.0, 8);
        assert_relative_eq!(config.cell_size(), 0.25);
        assert_relative_eq!(config.edge_origin(), Point3::new(0.875, 0.875, 0.875));
    }

    #[test]
    fn test_validation() {
        assert!(GridConfig::new(Point3::zeros(), 1.0, 4).validate().is_err());
        assert!(GridConfig::new(Point3::zeros(), 0.0, 8).validate().is_err());

        let physics = StepConfig::default().with_temperatures(0.0, 373.0);
        assert!(GridConfig::default().with_physics(physics).validate().is_err());

        let physics = StepConfig::default().with_solvers(SolverConfig::new(1e-6, 0));
        assert!(GridConfig::default().with_physics(physics).validate().is_err());
    }
}
