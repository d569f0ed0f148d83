//! Cell-centre and cell-face records of the staggered grid.

use crate::kernel::NodeWeights;
use crate::types::{CellCoord, CellState};

/// One particle's kernel weights on one grid record.
///
/// `particle` indexes the emitter's particle list of the current step and
/// is only valid until the next [`super::Grid::clear_cell_data`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationData {
    pub particle: usize,
    pub weights: NodeWeights,
}

/// Scalar quantities living at a cell centre.
#[derive(Debug, Clone, Default)]
pub struct CellCentre {
    pub coord: CellCoord,
    pub state: CellState,
    pub mass: f64,
    pub temperature: f64,
    pub previous_temperature: f64,
    /// Mass-weighted J.
    pub det_deformation_gradient: f64,
    /// Mass-weighted JE.
    pub det_deformation_elastic: f64,
    /// J / JE of the averaged values.
    pub det_deformation_plastic: f64,
    pub heat_capacity: f64,
    pub lame_lambda_inverse: f64,
    pub interpolation_data: Vec<InterpolationData>,
}

impl CellCentre {
    pub fn new(coord: CellCoord) -> Self {
        Self {
            coord,
            state: CellState::Colliding,
            ..Default::default()
        }
    }

    /// Reset for a new step. The interpolation list keeps its allocation.
    pub fn clear(&mut self) {
        self.state = CellState::Colliding;
        self.mass = 0.0;
        self.temperature = 0.0;
        self.previous_temperature = 0.0;
        self.det_deformation_gradient = 0.0;
        self.det_deformation_elastic = 0.0;
        self.det_deformation_plastic = 0.0;
        self.heat_capacity = 0.0;
        self.lame_lambda_inverse = 0.0;
        self.interpolation_data.clear();
    }

    /// Number of contributing particles.
    pub fn no_particles(&self) -> usize {
        self.interpolation_data.len()
    }
}

/// One velocity component living on a cell face.
///
/// Face (i, j, k) along an axis is the lower face of centre (i, j, k).
#[derive(Debug, Clone, Default)]
pub struct CellFace {
    pub coord: CellCoord,
    pub state: CellState,
    pub mass: f64,
    /// Component of the velocity along the face's axis.
    pub velocity: f64,
    /// Transferred velocity before any grid update this step.
    pub previous_velocity: f64,
    pub deviatoric_force: f64,
    pub heat_conductivity: f64,
    pub interpolation_data: Vec<InterpolationData>,
}

impl CellFace {
    pub fn new(coord: CellCoord) -> Self {
        Self {
            coord,
            state: CellState::Interior,
            ..Default::default()
        }
    }

    /// Reset for a new step. The interpolation list keeps its allocation.
    pub fn clear(&mut self) {
        self.state = CellState::Interior;
        self.mass = 0.0;
        self.velocity = 0.0;
        self.previous_velocity = 0.0;
        self.deviatoric_force = 0.0;
        self.heat_conductivity = 0.0;
        self.interpolation_data.clear();
    }

    pub fn no_particles(&self) -> usize {
        self.interpolation_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn entry() -> InterpolationData {
        InterpolationData {
            particle: 3,
            weights: NodeWeights {
                cubic: 0.5,
                cubic_gradient: Vec3::x(),
                quadratic: 0.25,
                quadratic_gradient: Vec3::y(),
            },
        }
    }

    #[test]
    fn test_clear_resets_placeholders() {
        let mut centre = CellCentre::new(CellCoord::new(1, 2, 3));
        centre.state = CellState::Interior;
        centre.mass = 2.0;
        centre.temperature = 300.0;
        centre.interpolation_data.push(entry());
        centre.clear();
        assert_eq!(centre.state, CellState::Colliding);
        assert_eq!(centre.mass, 0.0);
        assert_eq!(centre.temperature, 0.0);
        assert_eq!(centre.no_particles(), 0);
        assert_eq!(centre.coord, CellCoord::new(1, 2, 3));

        let mut face = CellFace::new(CellCoord::new(0, 0, 0));
        face.state = CellState::Empty;
        face.velocity = 1.5;
        face.interpolation_data.push(entry());
        face.clear();
        assert_eq!(face.state, CellState::Interior);
        assert_eq!(face.velocity, 0.0);
        assert_eq!(face.no_particles(), 0);
    }
}
