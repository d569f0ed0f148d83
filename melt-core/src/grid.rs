//! Staggered (MAC) background grid and the per-step pipeline.
//!
//! The grid is a cube of `no_cells³` cells. Scalars (mass, temperature,
//! deformation determinants) live at cell centres; each velocity component
//! lives on its own staggered set of faces, offset half a cell down along
//! its axis. All four record sets share the linear index `i + j·n + k·n²`.
//!
//! One call to [`Grid::update`] runs, in order:
//!
//! 1. [`Grid::clear_cell_data`]
//! 2. [`Grid::find_particle_contribution_to_cell`]
//! 3. [`Grid::transfer_particle_data`]
//! 4. [`Grid::calc_initial_particle_volumes`] (first step only)
//! 5. [`Emitter::preset_particles`]
//! 6. [`Grid::classify_cells`]
//! 7. [`Grid::calc_deviatoric_velocity`]
//! 8. [`Grid::set_boundary_velocity`]
//! 9. [`Grid::project_velocity`] (when enabled)
//! 10. [`Grid::calc_temperature`]
//! 11. [`Grid::update_particle_from_grid`]
//! 12. [`Emitter::update_particles`]
//!
//! # Submodules
//!
//! - [`cell`] - Cell-centre and cell-face records
//! - [`interpolation`] - Particle/grid weights
//! - [`transfer`] - Particle to grid and grid to particle transfers
//! - [`classify`] - Interior/empty/colliding labelling
//! - [`velocity`] - Deviatoric velocity solve and boundary velocity
//! - [`pressure`] - Pressure projection
//! - [`temperature`] - Heat solve

use crate::config::GridConfig;
use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::kernel::{cell_index, index_to_ijk, particle_grid_cell};
use crate::linalg::find_min_positive;
use crate::particle::CollisionBounds;
use crate::solver::SolveStats;
use crate::sparse::{CsrMatrix, SparseVector, TripletMatrix};
use crate::types::{Axis, CellCoord, CellState, Point3, Vec3};
use rayon::prelude::*;
use std::sync::{Mutex, OnceLock};

pub mod cell;
pub mod classify;
pub mod interpolation;
pub mod pressure;
pub mod temperature;
pub mod transfer;
pub mod velocity;

pub use cell::{CellCentre, CellFace, InterpolationData};
pub use interpolation::CellWeights;

static GLOBAL_GRID: OnceLock<Mutex<Grid>> = OnceLock::new();

/// Number of cell centres per classification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellCounts {
    pub interior: usize,
    pub empty: usize,
    pub colliding: usize,
}

/// Diagnostics of one time step.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Velocity solve per axis (X, Y, Z); `None` for explicit integration.
    pub velocity: [Option<SolveStats>; 3],
    /// Pressure solve; `None` when the projection is disabled.
    pub pressure: Option<SolveStats>,
    pub temperature: Option<SolveStats>,
    pub centres: CellCounts,
    /// Particles still without a volume after the bootstrap.
    pub particles_without_volume: usize,
}

impl StepReport {
    /// Whether every solve of the step reached its tolerance.
    pub fn converged(&self) -> bool {
        self.velocity
            .iter()
            .flatten()
            .chain(&self.pressure)
            .chain(&self.temperature)
            .all(|stats| stats.converged)
    }
}

/// One row of a grid linear system.
///
/// Off-diagonal couplings are added half to each side, so a coupling that
/// both of its rows report ends up symmetric.
struct SystemRow {
    index: usize,
    diagonal: f64,
    couplings: Vec<(usize, f64)>,
    rhs: f64,
}

impl SystemRow {
    /// `x = rhs` for a record that does not take part in the solve.
    fn identity(index: usize, rhs: f64) -> Self {
        Self {
            index,
            diagonal: 1.0,
            couplings: Vec::new(),
            rhs,
        }
    }
}

fn assemble_system(rows: Vec<SystemRow>, size: usize) -> Result<(CsrMatrix, SparseVector)> {
    let nnz: usize = rows.iter().map(|r| 1 + 2 * r.couplings.len()).sum();
    let mut triplets = TripletMatrix::with_capacity(size, size, nnz);
    let mut rhs = SparseVector::zeros(size);
    for row in rows {
        triplets.add(row.index, row.index, row.diagonal);
        for (col, value) in row.couplings {
            triplets.add_symmetric(row.index, col, value);
        }
        rhs.set(row.index, row.rhs);
    }
    Ok((triplets.to_csr()?, rhs))
}

/// The background grid.
#[derive(Debug, Clone)]
pub struct Grid {
    config: GridConfig,
    cell_size: f64,
    edge_origin: Point3,
    dt: f64,
    cell_centres: Vec<CellCentre>,
    cell_faces: [Vec<CellFace>; 3],
}

impl Grid {
    /// Create a grid with every record cleared.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let n = config.no_cells;

        let coords: Vec<CellCoord> = (0..n * n * n)
            .map(|idx| {
                let (i, j, k) = index_to_ijk(idx, n);
                CellCoord::new(i, j, k)
            })
            .collect();
        let faces = || coords.iter().map(|&c| CellFace::new(c)).collect::<Vec<_>>();

        Ok(Self {
            cell_size: config.cell_size(),
            edge_origin: config.edge_origin(),
            dt: 0.0,
            cell_centres: coords.iter().map(|&c| CellCentre::new(c)).collect(),
            cell_faces: [faces(), faces(), faces()],
            config,
        })
    }

    /// Create the process-wide grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GridAlreadyCreated`] on a second call, or the
    /// configuration error.
    pub fn create_global(config: GridConfig) -> Result<&'static Mutex<Grid>> {
        let grid = Grid::new(config)?;
        GLOBAL_GRID
            .set(Mutex::new(grid))
            .map_err(|_| Error::GridAlreadyCreated)?;
        Grid::global()
    }

    /// The process-wide grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GridNotCreated`] before [`Grid::create_global`].
    pub fn global() -> Result<&'static Mutex<Grid>> {
        GLOBAL_GRID.get().ok_or(Error::GridNotCreated)
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Centre of cell (0, 0, 0).
    pub fn origin(&self) -> Point3 {
        self.config.origin
    }

    /// Outer corner of cell (0, 0, 0).
    pub fn grid_edge_origin(&self) -> Point3 {
        self.edge_origin
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn no_cells(&self) -> usize {
        self.config.no_cells
    }

    /// Time step of the last [`Grid::update`].
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn cell_centres(&self) -> &[CellCentre] {
        &self.cell_centres
    }

    pub fn cell_faces(&self, axis: Axis) -> &[CellFace] {
        &self.cell_faces[axis.index()]
    }

    fn linear_index(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        let n = self.no_cells();
        (i < n && j < n && k < n).then(|| cell_index(i, j, k, n))
    }

    pub fn cell_centre(&self, i: usize, j: usize, k: usize) -> Option<&CellCentre> {
        self.linear_index(i, j, k).map(|idx| &self.cell_centres[idx])
    }

    pub fn cell_face(&self, axis: Axis, i: usize, j: usize, k: usize) -> Option<&CellFace> {
        self.linear_index(i, j, k).map(|idx| &self.cell_faces[axis.index()][idx])
    }

    /// Classification of a cell centre.
    pub fn cell_state(&self, i: usize, j: usize, k: usize) -> Option<CellState> {
        self.cell_centre(i, j, k).map(|c| c.state)
    }

    /// Temperature of a cell centre.
    pub fn cell_temperature(&self, i: usize, j: usize, k: usize) -> Option<f64> {
        self.cell_centre(i, j, k).map(|c| c.temperature)
    }

    /// World position of a cell centre.
    pub fn centre_position(&self, coord: CellCoord) -> Point3 {
        self.config.origin + Vec3::new(coord.i as f64, coord.j as f64, coord.k as f64) * self.cell_size
    }

    /// World position of a face, half a cell below its centre along `axis`.
    pub fn face_position(&self, axis: Axis, coord: CellCoord) -> Point3 {
        let mut position = self.centre_position(coord);
        position[axis.index()] -= 0.5 * self.cell_size;
        position
    }

    /// Region between the innermost colliding faces.
    pub fn collision_bounds(&self) -> CollisionBounds {
        let n = self.no_cells() as f64;
        CollisionBounds::new(
            self.edge_origin + Vec3::repeat(2.0 * self.cell_size),
            self.edge_origin + Vec3::repeat((n - 2.0) * self.cell_size),
        )
    }

    fn cell_counts(&self) -> CellCounts {
        self.cell_centres
            .iter()
            .fold(CellCounts::default(), |mut counts, centre| {
                match centre.state {
                    CellState::Interior => counts.interior += 1,
                    CellState::Empty => counts.empty += 1,
                    CellState::Colliding => counts.colliding += 1,
                }
                counts
            })
    }

    /// Number of particles whose home cell is each grid cell.
    ///
    /// Particles outside the grid are not counted.
    pub fn find_no_particles_in_cells(&self, emitter: &Emitter) -> Vec<usize> {
        let n = self.no_cells() as isize;
        let mut counts = vec![0usize; self.cell_centres.len()];
        let homes: Vec<Option<usize>> = emitter
            .particles()
            .par_iter()
            .map(|p| {
                let [i, j, k] = particle_grid_cell(&p.position(), self.cell_size, &self.edge_origin);
                let inside = (0..n).contains(&i) && (0..n).contains(&j) && (0..n).contains(&k);
                inside.then(|| cell_index(i as usize, j as usize, k as usize, n as usize))
            })
            .collect();
        for idx in homes.into_iter().flatten() {
            counts[idx] += 1;
        }

        log::debug!(
            "particle census: {} occupied cells, sparsest holds {:?} particles",
            counts.iter().filter(|&&c| c > 0).count(),
            find_min_positive(&counts)
        );
        counts
    }

    /// Advance grid and particles by one time step.
    ///
    /// `alpha` and `beta` are the FLIP fractions of the velocity and
    /// temperature transfers back to the particles. The particle volumes
    /// are bootstrapped from the grid density when `is_first_step` is set.
    ///
    /// # Errors
    ///
    /// Returns error for a non-positive `dt`, blend factors outside
    /// `[0, 1]`, or a failing direct solve. Iterative non-convergence is
    /// reported through [`StepReport`], not as an error.
    pub fn update(
        &mut self,
        dt: f64,
        emitter: &mut Emitter,
        is_first_step: bool,
        alpha: f64,
        beta: f64,
    ) -> Result<StepReport> {
        if !(dt > 0.0) {
            return Err(Error::InvalidConfig(format!("time step must be positive, got {}", dt)));
        }
        if !(0.0..=1.0).contains(&alpha) || !(0.0..=1.0).contains(&beta) {
            return Err(Error::InvalidConfig("FLIP/PIC blend factors must be in [0, 1]".into()));
        }
        self.dt = dt;

        self.clear_cell_data();
        self.find_particle_contribution_to_cell(emitter);
        self.transfer_particle_data(emitter);

        let mut report = StepReport::default();
        if is_first_step {
            report.particles_without_volume = self.calc_initial_particle_volumes(emitter);
        }

        emitter.preset_particles(alpha, beta);
        report.centres = self.classify_cells();

        report.velocity = self.calc_deviatoric_velocity(emitter)?;
        self.set_boundary_velocity();
        if self.config.physics.project_velocity {
            report.pressure = self.project_velocity()?;
        }
        report.temperature = self.calc_temperature()?;

        self.update_particle_from_grid(emitter, alpha, beta);
        emitter.update_particles(dt, &self.collision_bounds());

        log::debug!(
            "step dt = {:.3e}: {} interior, {} empty, {} colliding centres",
            dt,
            report.centres.interior,
            report.centres.empty,
            report.centres.colliding
        );
        Ok(report)
    }
}
