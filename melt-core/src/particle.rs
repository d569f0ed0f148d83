//! Material point state and the per-particle stages of a time step.
//!
//! A particle carries the material history the grid cannot: the elastic and
//! plastic deformation gradients, temperature, phase and the heat stored
//! towards a phase change. Each step the grid reads two sampled views of it
//! ([`FaceSample`], [`CentreSample`]), the velocity solve queries its
//! deviatoric stress and stress differential, and afterwards the grid adds
//! velocity and temperature contributions back before [`Particle::update`]
//! advances it.
//!
//! # Deviatoric elasticity
//!
//! With `F̂ = JE^{-1/3} FE` and its polar decomposition `F̂ = R̂ Ŝ`, the
//! deviatoric energy density is `ψ = μ ‖F̂ − R̂‖²`. Its derivative with
//! respect to `FE` and the directional derivative of that are both exact,
//! including the rotation differential and the `JE^{-1/3}` normalisation.

use crate::error::{Error, Result};
use crate::linalg::{matrix_element_multiplication, polar_decomposition, polar_rotation_differential, Svd3};
use crate::material::Material;
use crate::types::{Mat3, Phase, Point3, Vec3};

/// Axis-aligned region the particles are confined to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBounds {
    pub min: Point3,
    pub max: Point3,
}

impl CollisionBounds {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Whether `point` lies inside or on the boundary.
    pub fn contains(&self, point: &Point3) -> bool {
        (0..3).all(|a| point[a] >= self.min[a] && point[a] <= self.max[a])
    }
}

/// Particle quantities read by cell faces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSample {
    pub mass: f64,
    pub velocity: Vec3,
    pub phase: Phase,
}

/// Particle quantities read by cell centres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentreSample {
    pub mass: f64,
    pub det_deformation_gradient: f64,
    pub det_deformation_elastic: f64,
    pub phase: Phase,
    pub temperature: f64,
    pub lame_lambda_inverse: f64,
}

/// A single material point.
#[derive(Debug, Clone)]
pub struct Particle {
    position: Point3,
    velocity: Vec3,
    previous_velocity: Vec3,
    velocity_gradient: Mat3,
    mass: f64,
    density: f64,
    volume: f64,

    deformation_elastic: Mat3,
    deformation_plastic: Mat3,
    det_deformation_gradient: f64,
    det_deformation_elastic: f64,
    det_deformation_plastic: f64,
    lame_mu: f64,
    lame_lambda: f64,

    // JE^{-1/3}, JE^{-1/3}·FE, its polar factors and FE^{-T}
    deviatoric_scale: f64,
    deformation_elastic_deviatoric: Mat3,
    rotation_deviatoric: Mat3,
    stretch_deviatoric: Mat3,
    deformation_elastic_inverse_transpose: Mat3,

    temperature: f64,
    previous_temperature: f64,
    transition_heat: f64,
    phase: Phase,
}

impl Particle {
    /// Create an undeformed particle at rest.
    ///
    /// A liquid particle starts with its full latent heat stored.
    ///
    /// # Errors
    ///
    /// Returns error if the mass or temperature is not positive.
    pub fn new(position: Point3, mass: f64, temperature: f64, phase: Phase, material: &Material) -> Result<Self> {
        if !(mass > 0.0) {
            return Err(Error::Particle("mass must be positive".into()));
        }
        if !(temperature > 0.0) {
            return Err(Error::Particle("temperature must be above absolute zero".into()));
        }

        let (lame_mu, lame_lambda) = material.hardened_lame(1.0, phase);
        let transition_heat = match phase {
            Phase::Solid => 0.0,
            Phase::Liquid => material.latent_heat,
        };

        Ok(Self {
            position,
            velocity: Vec3::zeros(),
            previous_velocity: Vec3::zeros(),
            velocity_gradient: Mat3::zeros(),
            mass,
            density: 0.0,
            volume: 0.0,
            deformation_elastic: Mat3::identity(),
            deformation_plastic: Mat3::identity(),
            det_deformation_gradient: 1.0,
            det_deformation_elastic: 1.0,
            det_deformation_plastic: 1.0,
            lame_mu,
            lame_lambda,
            deviatoric_scale: 1.0,
            deformation_elastic_deviatoric: Mat3::identity(),
            rotation_deviatoric: Mat3::identity(),
            stretch_deviatoric: Mat3::identity(),
            deformation_elastic_inverse_transpose: Mat3::identity(),
            temperature,
            previous_temperature: temperature,
            transition_heat,
            phase,
        })
    }

    /// Set the initial velocity.
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self.previous_velocity = velocity;
        self
    }

    pub fn position(&self) -> Point3 {
        self.position
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn previous_velocity(&self) -> Vec3 {
        self.previous_velocity
    }

    pub fn velocity_gradient(&self) -> Mat3 {
        self.velocity_gradient
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn previous_temperature(&self) -> f64 {
        self.previous_temperature
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Heat stored towards a phase change, in `[0, latent_heat]`.
    pub fn transition_heat(&self) -> f64 {
        self.transition_heat
    }

    /// Elastic deformation gradient FE.
    pub fn deformation_elastic(&self) -> Mat3 {
        self.deformation_elastic
    }

    /// Plastic deformation gradient FP.
    pub fn deformation_plastic(&self) -> Mat3 {
        self.deformation_plastic
    }

    /// det(FE·FP).
    pub fn det_deformation_gradient(&self) -> f64 {
        self.det_deformation_gradient
    }

    /// det(FE).
    pub fn det_deformation_elastic(&self) -> f64 {
        self.det_deformation_elastic
    }

    /// J / JE.
    pub fn det_deformation_plastic(&self) -> f64 {
        self.det_deformation_plastic
    }

    /// Hardened shear modulus μ.
    pub fn lame_mu(&self) -> f64 {
        self.lame_mu
    }

    /// Hardened first Lamé parameter λ.
    pub fn lame_lambda(&self) -> f64 {
        self.lame_lambda
    }

    /// `JE^{-1/3}·FE`.
    pub fn deformation_elastic_deviatoric(&self) -> Mat3 {
        self.deformation_elastic_deviatoric
    }

    /// Rotation of the polar decomposition of `JE^{-1/3}·FE`.
    pub fn rotation_deviatoric(&self) -> Mat3 {
        self.rotation_deviatoric
    }

    /// Stretch of the polar decomposition of `JE^{-1/3}·FE`.
    pub fn stretch_deviatoric(&self) -> Mat3 {
        self.stretch_deviatoric
    }

    /// View used by cell faces.
    pub fn cell_face_data(&self) -> FaceSample {
        FaceSample {
            mass: self.mass,
            velocity: self.velocity,
            phase: self.phase,
        }
    }

    /// View used by cell centres. `1/λ` is zero when λ vanishes.
    pub fn cell_centre_data(&self) -> CentreSample {
        CentreSample {
            mass: self.mass,
            det_deformation_gradient: self.det_deformation_gradient,
            det_deformation_elastic: self.det_deformation_elastic,
            phase: self.phase,
            temperature: self.temperature,
            lame_lambda_inverse: if self.lame_lambda > 0.0 { 1.0 / self.lame_lambda } else { 0.0 },
        }
    }

    /// Accumulate grid density during the volume bootstrap.
    pub fn add_density(&mut self, density_increase: f64) {
        self.density += density_increase;
    }

    pub fn reset_density(&mut self) {
        self.density = 0.0;
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    /// Set `volume = mass / density`.
    ///
    /// Returns `false` and leaves the volume untouched when no density was
    /// accumulated.
    pub fn calc_initial_volume(&mut self) -> bool {
        if self.density > 0.0 {
            self.volume = self.mass / self.density;
            true
        } else {
            false
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    pub fn add_velocity(&mut self, contribution: Vec3) {
        self.velocity += contribution;
    }

    pub fn add_velocity_gradient(&mut self, contribution: Mat3) {
        self.velocity_gradient += contribution;
    }

    pub fn add_temperature(&mut self, contribution: f64) {
        self.temperature += contribution;
    }

    /// Prepare for the grid solves of a step.
    ///
    /// Keeps the FLIP part of velocity and temperature (`alpha`, `beta`) so
    /// the grid can add its contributions on top, clears the velocity
    /// gradient, re-applies the plastic limits and caches the deviatoric
    /// elastic tensor and its polar decomposition.
    pub fn preset_for_time_step(&mut self, alpha: f64, beta: f64, material: &Material) {
        self.previous_velocity = self.velocity;
        self.velocity *= alpha;
        self.previous_temperature = self.temperature;
        self.temperature *= beta;
        self.velocity_gradient = Mat3::zeros();

        self.apply_plasticity(material);
        self.refresh_deviatoric();
    }

    /// Advance the particle by one step after the grid contributions are in.
    pub fn update(&mut self, dt: f64, material: &Material, bounds: &CollisionBounds) {
        self.update_deformation_gradient(dt, material);
        self.apply_phase_transition(material);
        self.collision_resolve(dt, bounds);
        self.update_position(dt, bounds);
    }

    /// `D(δF) = JE^{-1/3}(δF − ⅓(FE^{-T}:δF) FE)`, the differential of
    /// `JE^{-1/3}·FE` along `δF`.
    pub fn deform_e_dev_diff_z(&self, z: &Mat3) -> Mat3 {
        let trace = matrix_element_multiplication(&self.deformation_elastic_inverse_transpose, z);
        (z - self.deformation_elastic * (trace / 3.0)) * self.deviatoric_scale
    }

    /// `Dᵀ(Z) = JE^{-1/3}(Z − ⅓(Z:FE) FE^{-T})`, the adjoint of
    /// [`Self::deform_e_dev_diff_z`].
    pub fn z_deform_e_dev_diff(&self, z: &Mat3) -> Mat3 {
        let trace = matrix_element_multiplication(z, &self.deformation_elastic);
        (z - self.deformation_elastic_inverse_transpose * (trace / 3.0)) * self.deviatoric_scale
    }

    /// Deviatoric energy density `μ‖F̂ − R̂‖²`.
    pub fn elastic_energy_density(&self) -> f64 {
        self.lame_mu * (self.deformation_elastic_deviatoric - self.rotation_deviatoric).norm_squared()
    }

    /// `∂ψ/∂FE`.
    pub fn deviatoric_stress(&self) -> Mat3 {
        self.z_deform_e_dev_diff(&self.deviatoric_stress_hat())
    }

    /// Directional derivative of [`Self::deviatoric_stress`] along `δFE`.
    pub fn deviatoric_stress_differential(&self, df: &Mat3) -> Mat3 {
        if self.lame_mu == 0.0 {
            return Mat3::zeros();
        }
        let f = &self.deformation_elastic;
        let f_inv_t = &self.deformation_elastic_inverse_transpose;

        let df_hat = self.deform_e_dev_diff_z(df);
        let dr_hat = polar_rotation_differential(&self.rotation_deviatoric, &self.stretch_deviatoric, &df_hat);
        let material_part = self.z_deform_e_dev_diff(&((df_hat - dr_hat) * (2.0 * self.lame_mu)));

        // Differential of the adjoint map itself, applied to P̂
        let p_hat = self.deviatoric_stress_hat();
        let f_inv_t_df = matrix_element_multiplication(f_inv_t, df);
        let p_df = matrix_element_multiplication(&p_hat, df);
        let p_f = matrix_element_multiplication(&p_hat, f);
        let adjoint_part = self.z_deform_e_dev_diff(&p_hat) * (-f_inv_t_df / 3.0)
            + (f_inv_t * (-p_df / 3.0) + f_inv_t * df.transpose() * f_inv_t * (p_f / 3.0)) * self.deviatoric_scale;

        material_part + adjoint_part
    }

    /// `P̂ = ∂ψ/∂F̂ = 2μ(F̂ − R̂)`.
    fn deviatoric_stress_hat(&self) -> Mat3 {
        (self.deformation_elastic_deviatoric - self.rotation_deviatoric) * (2.0 * self.lame_mu)
    }

    /// Clamp the elastic singular values to `[1 − θc, 1 + θs]` and push the
    /// excess into FP. Liquid keeps only the volumetric part of FE.
    fn apply_plasticity(&mut self, material: &Material) {
        let total = self.deformation_elastic * self.deformation_plastic;

        match self.phase {
            Phase::Solid => {
                let mut svd = Svd3::new(&self.deformation_elastic);
                let lower = 1.0 - material.critical_compression;
                let upper = 1.0 + material.critical_stretch;
                svd.sigma.apply(|s| *s = s.max(lower).min(upper));

                self.deformation_elastic = svd.recompose();
                let sigma_inverse = Mat3::from_diagonal(&svd.sigma.map(|s| 1.0 / s));
                self.deformation_plastic = svd.v * sigma_inverse * svd.u.transpose() * total;
            }
            Phase::Liquid => {
                let cube_root = self.deformation_elastic.determinant().cbrt();
                if cube_root != 0.0 {
                    self.deformation_elastic = Mat3::identity() * cube_root;
                    self.deformation_plastic = total / cube_root;
                }
            }
        }

        self.det_deformation_gradient = total.determinant();
        self.det_deformation_elastic = self.deformation_elastic.determinant();
        self.det_deformation_plastic = if self.det_deformation_elastic != 0.0 {
            self.det_deformation_gradient / self.det_deformation_elastic
        } else {
            1.0
        };

        let (mu, lambda) = material.hardened_lame(self.det_deformation_plastic, self.phase);
        self.lame_mu = mu;
        self.lame_lambda = lambda;
    }

    fn refresh_deviatoric(&mut self) {
        let je = self.deformation_elastic.determinant();
        self.deviatoric_scale = if je != 0.0 { 1.0 / je.cbrt() } else { 1.0 };
        self.deformation_elastic_deviatoric = self.deformation_elastic * self.deviatoric_scale;

        let (r, s) = polar_decomposition(&self.deformation_elastic_deviatoric);
        self.rotation_deviatoric = r;
        self.stretch_deviatoric = s;
        self.deformation_elastic_inverse_transpose = self
            .deformation_elastic
            .try_inverse()
            .map(|inv| inv.transpose())
            .unwrap_or_else(Mat3::zeros);
    }

    /// `FE ← (I + dt·∇v)·FE`, then the plastic limits.
    fn update_deformation_gradient(&mut self, dt: f64, material: &Material) {
        self.deformation_elastic = (Mat3::identity() + self.velocity_gradient * dt) * self.deformation_elastic;
        self.apply_plasticity(material);
    }

    /// Move heat above (below) the freezing point into (out of) the
    /// transition accumulator and switch phase once it is full (empty).
    fn apply_phase_transition(&mut self, material: &Material) {
        let freezing = material.freezing_temperature;
        let latent = material.latent_heat;

        match self.phase {
            Phase::Solid if self.temperature > freezing => {
                self.transition_heat += material.heat_capacity_solid * (self.temperature - freezing);
                self.temperature = freezing;
                if self.transition_heat >= latent {
                    let excess = self.transition_heat - latent;
                    self.transition_heat = latent;
                    self.phase = Phase::Liquid;
                    self.temperature = freezing + excess / material.heat_capacity_fluid;
                }
            }
            Phase::Liquid if self.temperature < freezing => {
                self.transition_heat -= material.heat_capacity_fluid * (freezing - self.temperature);
                self.temperature = freezing;
                if self.transition_heat <= 0.0 {
                    let deficit = -self.transition_heat;
                    self.transition_heat = 0.0;
                    self.phase = Phase::Solid;
                    self.temperature = freezing - deficit / material.heat_capacity_solid;
                }
            }
            _ => {}
        }
    }

    /// Stop motion out of the domain: zero every velocity component that
    /// would carry the particle past a wall this step.
    fn collision_resolve(&mut self, dt: f64, bounds: &CollisionBounds) {
        let predicted = self.position + self.velocity * dt;
        for a in 0..3 {
            let leaving_low = predicted[a] < bounds.min[a] && self.velocity[a] < 0.0;
            let leaving_high = predicted[a] > bounds.max[a] && self.velocity[a] > 0.0;
            if leaving_low || leaving_high {
                self.velocity[a] = 0.0;
            }
        }
    }

    fn update_position(&mut self, dt: f64, bounds: &CollisionBounds) {
        self.position += self.velocity * dt;
        for a in 0..3 {
            self.position[a] = self.position[a].max(bounds.min[a]).min(bounds.max[a]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn snow_particle() -> Particle {
        Particle::new(Point3::new(0.5, 0.5, 0.5), 1.0, 263.0, Phase::Solid, &Material::snow()).unwrap()
    }

    fn deformed(fe: Mat3) -> Particle {
        let mut particle = snow_particle();
        particle.deformation_elastic = fe;
        particle.lame_mu = 1.0;
        particle.refresh_deviatoric();
        particle
    }

    fn sample_fe() -> Mat3 {
        Mat3::new(
            1.1, 0.05, 0.0,
            -0.02, 0.95, 0.03,
            0.01, 0.0, 1.02,
        )
    }

    fn direction() -> Mat3 {
        Mat3::new(
            0.3, -0.1, 0.2,
            0.05, 0.4, -0.3,
            -0.2, 0.1, 0.25,
        )
    }

    #[test]
    fn test_particle_validation() {
        let mat = Material::snow();
        assert!(Particle::new(Point3::zeros(), 0.0, 263.0, Phase::Solid, &mat).is_err());
        assert!(Particle::new(Point3::zeros(), 1.0, -1.0, Phase::Solid, &mat).is_err());

        let liquid = Particle::new(Point3::zeros(), 1.0, 280.0, Phase::Liquid, &mat).unwrap();
        assert_eq!(liquid.transition_heat(), mat.latent_heat);
        assert_eq!(liquid.lame_mu(), 0.0);
    }

    #[test]
    fn test_cell_samples() {
        let mat = Material::snow();
        let particle = snow_particle().with_velocity(Vec3::new(1.0, 2.0, 3.0));

        let face = particle.cell_face_data();
        assert_eq!(face.mass, 1.0);
        assert_eq!(face.velocity, Vec3::new(1.0, 2.0, 3.0));

        let centre = particle.cell_centre_data();
        assert_eq!(centre.det_deformation_gradient, 1.0);
        assert_eq!(centre.temperature, 263.0);
        assert_relative_eq!(centre.lame_lambda_inverse, 1.0 / mat.lame_lambda());
    }

    #[test]
    fn test_volume_bootstrap() {
        let mut particle = snow_particle();
        assert!(!particle.calc_initial_volume());
        assert_eq!(particle.volume(), 0.0);

        particle.add_density(150.0);
        particle.add_density(250.0);
        assert!(particle.calc_initial_volume());
        assert_relative_eq!(particle.volume(), 1.0 / 400.0);

        particle.reset_density();
        assert_eq!(particle.density(), 0.0);
        assert!(!particle.calc_initial_volume());
        assert_relative_eq!(particle.volume(), 1.0 / 400.0);

        particle.set_volume(0.02);
        assert_eq!(particle.volume(), 0.02);
        assert_relative_eq!(particle.cell_centre_data().mass, 1.0);
    }

    #[test]
    fn test_preset_keeps_flip_fraction() {
        let mut particle = snow_particle().with_velocity(Vec3::new(2.0, 0.0, -4.0));
        particle.add_velocity_gradient(Mat3::identity());
        particle.preset_for_time_step(0.95, 0.5, &Material::snow());

        assert_relative_eq!(particle.velocity(), Vec3::new(1.9, 0.0, -3.8));
        assert_eq!(particle.previous_velocity(), Vec3::new(2.0, 0.0, -4.0));
        assert_relative_eq!(particle.temperature(), 131.5);
        assert_eq!(particle.previous_temperature(), 263.0);
        assert_eq!(particle.velocity_gradient(), Mat3::zeros());
    }

    #[test]
    fn test_plasticity_clamps_and_preserves_total_deformation() {
        let mat = Material::snow();
        let mut particle = snow_particle();
        let fe = Mat3::from_diagonal(&Vec3::new(1.1, 1.0, 0.9));
        particle.deformation_elastic = fe;
        particle.apply_plasticity(&mat);

        let clamped = Mat3::from_diagonal(&Vec3::new(1.0075, 1.0, 0.975));
        assert_relative_eq!(particle.deformation_elastic(), clamped, epsilon = 1e-12);
        assert_relative_eq!(
            particle.deformation_elastic() * particle.deformation_plastic(),
            fe,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            particle.det_deformation_plastic(),
            particle.det_deformation_gradient() / particle.det_deformation_elastic(),
            epsilon = 1e-14
        );

        // Net plastic expansion softens the material
        assert!(particle.det_deformation_plastic() > 1.0);
        assert!(particle.lame_mu() < mat.lame_mu());
        let (mu, _) = mat.hardened_lame(particle.det_deformation_plastic(), Phase::Solid);
        assert_relative_eq!(particle.lame_mu(), mu);
    }

    #[test]
    fn test_liquid_keeps_only_volume_change() {
        let mat = Material::snow();
        let mut particle = Particle::new(Point3::zeros(), 1.0, 280.0, Phase::Liquid, &mat).unwrap();
        particle.deformation_elastic = Mat3::from_diagonal(&Vec3::new(2.0, 1.0, 0.5));
        particle.apply_plasticity(&mat);

        assert_relative_eq!(particle.deformation_elastic(), Mat3::identity(), epsilon = 1e-12);
        assert_eq!(particle.lame_mu(), 0.0);
        assert_eq!(particle.deviatoric_stress_differential(&direction()), Mat3::zeros());
    }

    #[test]
    fn test_deviatoric_differential_adjoint() {
        let particle = deformed(sample_fe());
        let z = Mat3::new(0.7, -0.3, 0.1, 0.2, 0.5, -0.6, 0.4, 0.0, 0.9);
        let df = direction();

        let lhs = matrix_element_multiplication(&z, &particle.deform_e_dev_diff_z(&df));
        let rhs = matrix_element_multiplication(&particle.z_deform_e_dev_diff(&z), &df);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-12);
    }

    #[test]
    fn test_deviatoric_differential_matches_finite_difference() {
        let fe = sample_fe();
        let df = direction();
        let particle = deformed(fe);

        let h = 1e-6;
        let fd = (deformed(fe + df * h).deformation_elastic_deviatoric()
            - deformed(fe - df * h).deformation_elastic_deviatoric())
            / (2.0 * h);
        assert_relative_eq!(particle.deform_e_dev_diff_z(&df), fd, epsilon = 1e-7);
    }

    #[test]
    fn test_stress_is_energy_gradient() {
        let fe = sample_fe();
        let df = direction();
        let particle = deformed(fe);

        let h = 1e-6;
        let fd = (deformed(fe + df * h).elastic_energy_density()
            - deformed(fe - df * h).elastic_energy_density())
            / (2.0 * h);
        let analytic = matrix_element_multiplication(&particle.deviatoric_stress(), &df);
        assert_relative_eq!(analytic, fd, epsilon = 1e-7);
    }

    #[test]
    fn test_stress_differential_matches_finite_difference() {
        let fe = sample_fe();
        let df = direction();
        let particle = deformed(fe);

        let h = 1e-6;
        let fd = (deformed(fe + df * h).deviatoric_stress() - deformed(fe - df * h).deviatoric_stress()) / (2.0 * h);
        assert_relative_eq!(particle.deviatoric_stress_differential(&df), fd, epsilon = 1e-6);
    }

    #[test]
    fn test_rest_state_is_stress_free() {
        let particle = deformed(Mat3::identity() * 1.05);
        assert_relative_eq!(particle.elastic_energy_density(), 0.0, epsilon = 1e-20);
        assert_relative_eq!(particle.deviatoric_stress(), Mat3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_melting() {
        let mat = Material::snow();
        let freezing = mat.freezing_temperature;
        let mut particle = Particle::new(Point3::zeros(), 1.0, freezing + 1.0, Phase::Solid, &mat).unwrap();

        particle.apply_phase_transition(&mat);
        assert_eq!(particle.phase(), Phase::Solid);
        assert_relative_eq!(particle.transition_heat(), mat.heat_capacity_solid, epsilon = 1e-6);
        assert_relative_eq!(particle.temperature(), freezing);

        particle.add_temperature(200.0);
        particle.apply_phase_transition(&mat);
        assert_eq!(particle.phase(), Phase::Liquid);
        assert_eq!(particle.transition_heat(), mat.latent_heat);
        let excess = mat.heat_capacity_solid * 201.0 - mat.latent_heat;
        assert_relative_eq!(particle.temperature(), freezing + excess / mat.heat_capacity_fluid, epsilon = 1e-6);
    }

    #[test]
    fn test_freezing() {
        let mat = Material::snow();
        let freezing = mat.freezing_temperature;
        let mut particle = Particle::new(Point3::zeros(), 1.0, freezing - 1.0, Phase::Liquid, &mat).unwrap();

        particle.apply_phase_transition(&mat);
        assert_eq!(particle.phase(), Phase::Liquid);
        assert_relative_eq!(particle.transition_heat(), mat.latent_heat - mat.heat_capacity_fluid, epsilon = 1e-6);

        particle.add_temperature(-100.0);
        particle.apply_phase_transition(&mat);
        assert_eq!(particle.phase(), Phase::Solid);
        assert_eq!(particle.transition_heat(), 0.0);
        assert!(particle.temperature() < freezing);
    }

    #[test]
    fn test_collision_stops_outward_motion() {
        let mat = Material::snow();
        let bounds = CollisionBounds::new(Point3::zeros(), Point3::new(1.0, 1.0, 1.0));
        let mut particle = Particle::new(Point3::new(0.05, 0.5, 0.5), 1.0, 263.0, Phase::Solid, &mat)
            .unwrap()
            .with_velocity(Vec3::new(-10.0, 1.0, 0.0));

        particle.update(0.01, &mat, &bounds);
        assert_eq!(particle.velocity().x, 0.0);
        assert_eq!(particle.velocity().y, 1.0);
        assert_relative_eq!(particle.position(), Point3::new(0.05, 0.51, 0.5), epsilon = 1e-12);
        assert!(bounds.contains(&particle.position()));
    }

    #[test]
    fn test_position_clamped_to_bounds() {
        let mat = Material::snow();
        let bounds = CollisionBounds::new(Point3::zeros(), Point3::new(1.0, 1.0, 1.0));
        let mut particle = Particle::new(Point3::new(1.2, 0.5, -0.3), 1.0, 263.0, Phase::Solid, &mat).unwrap();

        particle.update(0.01, &mat, &bounds);
        assert_eq!(particle.position(), Point3::new(1.0, 0.5, 0.0));
    }

    #[test]
    fn test_deformation_follows_velocity_gradient() {
        let mat = Material::snow();
        let bounds = CollisionBounds::new(Point3::zeros(), Point3::new(1.0, 1.0, 1.0));
        let mut particle = snow_particle();

        // Small shear stays inside the elastic limits
        let grad = Mat3::new(0.0, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        particle.add_velocity_gradient(grad);
        particle.update(0.01, &mat, &bounds);

        assert_relative_eq!(particle.deformation_elastic(), Mat3::identity() + grad * 0.01, epsilon = 1e-12);
        assert_relative_eq!(particle.deformation_plastic(), Mat3::identity(), epsilon = 1e-12);
        assert_relative_eq!(particle.det_deformation_gradient(), 1.0, epsilon = 1e-12);
    }
}
