//! Power-sweep orchestration.
//!
//! A sweep runs one full integration per pump power density, in input
//! order. Because [`Simulation::run_at_power`] takes the power (and end
//! time) as explicit per-call parameters, the context's configured laser
//! and solver settings are never touched -- they survive both successful
//! sweeps and mid-sweep failures unchanged.

use crate::error::Result;
use crate::simulation::{Simulation, SimulationResult};

/// Progress callback invoked before each run with
/// (index, total count, pending power density).
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize, f64);

impl Simulation {
    /// Run one simulation per power density, in input order.
    ///
    /// `t_end` optionally overrides the configured end time for every
    /// run (steady-state characterization usually wants a longer span
    /// than single-shot dynamics). A failed run aborts the remainder of
    /// the sweep and propagates the solver's diagnostic; no partial
    /// results are returned.
    pub fn run_power_sweep(
        &self,
        power_densities: &[f64],
        t_end: Option<f64>,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<SimulationResult>> {
        let t_end = t_end.unwrap_or(self.config().t_end);
        let total = power_densities.len();
        let mut results = Vec::with_capacity(total);

        for (i, &power) in power_densities.iter().enumerate() {
            if let Some(callback) = progress.as_deref_mut() {
                callback(i, total, power);
            }
            results.push(self.run_at_power(power, t_end, None, None)?);
        }

        Ok(results)
    }
}
