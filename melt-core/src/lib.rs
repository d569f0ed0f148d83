//! melt-core - Material point method for melting snow and ice
//!
//! Simulation core for elastoplastic solids that melt into fluids:
//! - Lagrangian particles carrying deformation, temperature and phase
//! - Staggered (MAC) background grid with cubic B-spline transfers
//! - Implicit elastic velocity update, pressure projection and heat solve
//! - Latent-heat phase transitions between solid and liquid
//!
//! # Architecture
//!
//! The simulation is built around these core abstractions:
//!
//! - [`Grid`]: Cell centres and faces, and the per-step pipeline
//! - [`Emitter`]: The particle set and its material
//! - [`Particle`]: Per-particle state and constitutive model
//! - [`Material`]: Snow/water property definitions
//! - [`Solver`] trait: Linear system solution strategies
//!
//! A typical run creates a [`Grid`], fills an [`Emitter`] and calls
//! [`Grid::update`] once per time step, with `is_first_step` set on the
//! first call so the particle volumes are bootstrapped from the grid.

pub mod types;
pub mod error;
pub mod config;
pub mod kernel;
pub mod linalg;
pub mod sparse;
pub mod solver;
pub mod material;
pub mod particle;
pub mod emitter;
pub mod grid;

pub use types::{Axis, CellState, Mat3, Phase, Point3, Vec3};
pub use config::{GridConfig, StepConfig, VelocityIntegration};
pub use grid::{CellCounts, Grid, StepReport};
pub use emitter::Emitter;
pub use particle::{CollisionBounds, Particle};
pub use material::Material;
pub use sparse::CsrMatrix;
pub use solver::{Solver, SolverConfig, SolveStats};
pub use error::{Error, Result};
