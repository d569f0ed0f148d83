//! Error types for simulation operations.

use thiserror::Error;

/// Result type alias using the crate Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or stepping a simulation.
#[derive(Error, Debug)]
pub enum Error {
    /// Grid construction or container invariant violations.
    #[error("grid error: {0}")]
    Grid(String),

    /// The process-wide grid was queried before it was created.
    #[error("grid has not been created yet")]
    GridNotCreated,

    /// A second process-wide grid was requested.
    #[error("grid has already been created")]
    GridAlreadyCreated,

    /// Particle-related errors.
    #[error("particle error: {0}")]
    Particle(String),

    /// Invalid material properties.
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// Invalid simulation or solver parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Solver errors (dimension mismatch, broken preconditioner).
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),
}
