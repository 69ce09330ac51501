//! Physical constants and unit conversions.

/// Planck constant (J*s).
pub const H_PLANCK: f64 = 6.62607015e-34;

/// Speed of light in vacuum (m/s).
pub const C_LIGHT: f64 = 2.99792458e8;

/// One wavenumber (cm^-1) in electron volts.
pub const CM_INV_TO_EV: f64 = 1.23984e-4;

/// One wavenumber (cm^-1) in Joules.
pub const CM_INV_TO_J: f64 = 1.986e-23;

/// Energy of a single photon at the given vacuum wavelength (J).
pub fn photon_energy_joules(wavelength_nm: f64) -> f64 {
    let wavelength_m = wavelength_nm * 1e-9;
    H_PLANCK * C_LIGHT / wavelength_m
}
