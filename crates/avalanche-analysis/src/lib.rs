//! Photon avalanche parameter extraction for Avalanche.
//!
//! Post-processes power-sweep simulation results into the standardized
//! characterization parameters: threshold power density, nonlinearity
//! order (S), rise time, and saturation/dynamic-range estimates. All
//! algorithms work in base-10 log-log space and degrade to NaN
//! sentinels on sparse data instead of raising; only unknown method or
//! region names are errors.

pub mod error;
pub mod nonlinearity;
pub mod numeric;
pub mod rise;
pub mod sweep;
pub mod threshold;

pub use error::{Error, Result};
pub use nonlinearity::{
    NonlinearityEstimate, Region, SlopeFit, extract_nonlinearity,
};
pub use rise::{RiseTimeMethod, extract_rise_time};
pub use sweep::{PaParameters, analyze_power_sweep};
pub use threshold::{
    EMISSION_EPSILON, ThresholdEstimate, ThresholdMethod, extract_threshold,
};
