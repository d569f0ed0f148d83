//! Material property definitions.
//!
//! A single material describes both phases of the simulated substance: the
//! elastoplastic solid (Lamé parameters, hardening and plastic limits) and
//! the thermal constants of the solid and fluid phases.

use crate::error::{Error, Result};
use crate::types::Phase;

/// Elastoplastic and thermal properties of a phase-changing material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Young's modulus (Pa).
    pub youngs_modulus: f64,
    /// Poisson's ratio (dimensionless).
    pub poissons_ratio: f64,
    /// Hardening coefficient ξ.
    pub hardening: f64,
    /// Critical compression θc; singular values below `1 − θc` are plastic.
    pub critical_compression: f64,
    /// Critical stretch θs; singular values above `1 + θs` are plastic.
    pub critical_stretch: f64,
    /// Specific heat capacity of the solid phase (J/(kg·K)).
    pub heat_capacity_solid: f64,
    /// Specific heat capacity of the fluid phase (J/(kg·K)).
    pub heat_capacity_fluid: f64,
    /// Heat conductivity of the solid phase (W/(m·K)).
    pub heat_conductivity_solid: f64,
    /// Heat conductivity of the fluid phase (W/(m·K)).
    pub heat_conductivity_fluid: f64,
    /// Latent heat of fusion (J/kg).
    pub latent_heat: f64,
    /// Freezing / melting temperature (K).
    pub freezing_temperature: f64,
}

impl Material {
    /// Create a material from its elastic constants.
    ///
    /// Hardening, plastic limits and thermal constants start at the values
    /// of [`Material::snow`] and can be changed with the `with_*` builders.
    ///
    /// # Arguments
    ///
    /// * `youngs_modulus` - Young's modulus E (Pa)
    /// * `poissons_ratio` - Poisson's ratio ν (dimensionless, -1 < ν < 0.5)
    ///
    /// # Errors
    ///
    /// Returns error if material properties are physically invalid.
    pub fn new(youngs_modulus: f64, poissons_ratio: f64) -> Result<Self> {
        if !(youngs_modulus > 0.0) {
            return Err(Error::InvalidMaterial(
                "Young's modulus must be positive".into(),
            ));
        }
        if !(poissons_ratio > -1.0 && poissons_ratio < 0.5) {
            return Err(Error::InvalidMaterial(
                "Poisson's ratio must be in range (-1, 0.5)".into(),
            ));
        }
        Ok(Self {
            youngs_modulus,
            poissons_ratio,
            ..Self::snow()
        })
    }

    /// Set the hardening coefficient ξ.
    pub fn with_hardening(mut self, hardening: f64) -> Result<Self> {
        if !(hardening >= 0.0) {
            return Err(Error::InvalidMaterial("Hardening coefficient must be non-negative".into()));
        }
        self.hardening = hardening;
        Ok(self)
    }

    /// Set the critical compression and stretch.
    pub fn with_plastic_limits(mut self, critical_compression: f64, critical_stretch: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&critical_compression) {
            return Err(Error::InvalidMaterial("Critical compression must be in range [0, 1)".into()));
        }
        if !(critical_stretch >= 0.0) {
            return Err(Error::InvalidMaterial("Critical stretch must be non-negative".into()));
        }
        self.critical_compression = critical_compression;
        self.critical_stretch = critical_stretch;
        Ok(self)
    }

    /// Set the heat capacities of the solid and fluid phases.
    pub fn with_heat_capacity(mut self, solid: f64, fluid: f64) -> Result<Self> {
        if !(solid > 0.0 && fluid > 0.0) {
            return Err(Error::InvalidMaterial("Heat capacity must be positive".into()));
        }
        self.heat_capacity_solid = solid;
        self.heat_capacity_fluid = fluid;
        Ok(self)
    }

    /// Set the heat conductivities of the solid and fluid phases.
    pub fn with_heat_conductivity(mut self, solid: f64, fluid: f64) -> Result<Self> {
        if !(solid >= 0.0 && fluid >= 0.0) {
            return Err(Error::InvalidMaterial("Heat conductivity must be non-negative".into()));
        }
        self.heat_conductivity_solid = solid;
        self.heat_conductivity_fluid = fluid;
        Ok(self)
    }

    /// Set the latent heat and the freezing temperature.
    pub fn with_phase_change(mut self, latent_heat: f64, freezing_temperature: f64) -> Result<Self> {
        if !(latent_heat > 0.0) {
            return Err(Error::InvalidMaterial("Latent heat must be positive".into()));
        }
        if !(freezing_temperature > 0.0) {
            return Err(Error::InvalidMaterial("Freezing temperature must be above absolute zero".into()));
        }
        self.latent_heat = latent_heat;
        self.freezing_temperature = freezing_temperature;
        Ok(self)
    }

    /// Lamé's first parameter λ0 = Eν / ((1+ν)(1-2ν)).
    pub fn lame_lambda(&self) -> f64 {
        let e = self.youngs_modulus;
        let nu = self.poissons_ratio;
        e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu))
    }

    /// Lamé's second parameter μ0 = E / (2(1 + ν)).
    pub fn lame_mu(&self) -> f64 {
        self.youngs_modulus / (2.0 * (1.0 + self.poissons_ratio))
    }

    /// Hardened Lamé parameters `(μ, λ)` for a plastic volume ratio `JP`.
    ///
    /// Both scale by `e^{ξ(1 − JP)}`. The fluid phase has no shear
    /// resistance, so its μ is zero.
    pub fn hardened_lame(&self, det_plastic: f64, phase: Phase) -> (f64, f64) {
        let factor = (self.hardening * (1.0 - det_plastic)).exp();
        let mu = match phase {
            Phase::Solid => self.lame_mu() * factor,
            Phase::Liquid => 0.0,
        };
        (mu, self.lame_lambda() * factor)
    }

    /// Heat capacity for a phase.
    pub fn heat_capacity(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Solid => self.heat_capacity_solid,
            Phase::Liquid => self.heat_capacity_fluid,
        }
    }

    /// Heat conductivity for a phase.
    pub fn heat_conductivity(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Solid => self.heat_conductivity_solid,
            Phase::Liquid => self.heat_conductivity_fluid,
        }
    }
}

/// Common material presets.
impl Material {
    /// Snow (E = 140 kPa, ν = 0.2, ξ = 10, θc = 2.5e-2, θs = 7.5e-3) with
    /// the thermal constants of ice and water.
    pub fn snow() -> Self {
        Self {
            youngs_modulus: 1.4e5,
            poissons_ratio: 0.2,
            hardening: 10.0,
            critical_compression: 2.5e-2,
            critical_stretch: 7.5e-3,
            heat_capacity_solid: 2050.0,
            heat_capacity_fluid: 4186.0,
            heat_conductivity_solid: 2.22,
            heat_conductivity_fluid: 0.58,
            latent_heat: 334e3,
            freezing_temperature: 273.15,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::snow()
    }
}
