//! Full power-sweep analysis: every PA characterization parameter from
//! one batch of per-power simulation results.

use std::fmt;

use avalanche_solver::SimulationResult;

use crate::error::{Error, Result};
use crate::nonlinearity::{Region, fit_region};
use crate::numeric::linear_fit;
use crate::rise::{RiseTimeMethod, extract_rise_time};
use crate::threshold::{EMISSION_EPSILON, ThresholdMethod, extract_threshold};

/// Extracted photon avalanche parameters.
///
/// Fit-based fields are NaN when the underlying extraction degraded;
/// saturation and dynamic range are absent when the sweep never leaves
/// the avalanche regime.
#[derive(Debug, Clone)]
pub struct PaParameters {
    /// Threshold power density (W/cm^2).
    pub threshold_w_cm2: f64,
    /// Uncertainty of the threshold estimate.
    pub threshold_uncertainty: f64,
    /// Nonlinearity order below threshold.
    pub nonlinearity_below: f64,
    /// Nonlinearity order above threshold (the S parameter).
    pub nonlinearity_above: f64,
    /// Standard error of the above-threshold S.
    pub nonlinearity_uncertainty: f64,
    /// Rise time at the power closest to threshold (s).
    pub rise_time_s: f64,
    /// Power density where saturation sets in (W/cm^2).
    pub saturation_w_cm2: Option<f64>,
    /// Saturation-to-threshold power ratio.
    pub dynamic_range: Option<f64>,
}

impl fmt::Display for PaParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Photon Avalanche Parameters:")?;
        writeln!(f, "  Threshold: {:.2e} W/cm^2", self.threshold_w_cm2)?;
        write!(f, "  Nonlinearity (S): {:.1}", self.nonlinearity_above)?;
        if self.rise_time_s.is_finite() {
            write!(f, "\n  Rise time: {:.2} ms", self.rise_time_s * 1e3)?;
        }
        if let Some(saturation) = self.saturation_w_cm2 {
            write!(f, "\n  Saturation: {:.2e} W/cm^2", saturation)?;
        }
        if let Some(range) = self.dynamic_range {
            write!(f, "\n  Dynamic range: {:.1}x", range)?;
        }
        Ok(())
    }
}

/// Extract all PA parameters from one power sweep.
///
/// Per-run emission is the radiative rate times the final population
/// sample of the emitting level; the rise time is taken from the run
/// whose power is numerically closest to the extracted threshold.
pub fn analyze_power_sweep(
    results: &[SimulationResult],
    emitting_level: &str,
    radiative_rate: f64,
) -> Result<PaParameters> {
    if results.is_empty() {
        return Err(Error::InvalidInput("no simulation results".into()));
    }

    let powers: Vec<f64> = results.iter().map(|r| r.power_density).collect();
    let mut emissions = Vec::with_capacity(results.len());
    for result in results {
        let series = result.emission(emitting_level, radiative_rate)?;
        emissions.push(series.last().copied().unwrap_or(0.0));
    }

    let threshold = extract_threshold(&powers, &emissions, ThresholdMethod::Derivative)?;

    let below = fit_region(&powers, &emissions, threshold.power, Region::Below);
    let above = fit_region(&powers, &emissions, threshold.power, Region::Above);

    // Rise time from the run closest to threshold.
    let mut closest = 0;
    for (i, p) in powers.iter().enumerate() {
        if (p - threshold.power).abs() < (powers[closest] - threshold.power).abs() {
            closest = i;
        }
    }
    let threshold_run = &results[closest];
    let population = threshold_run.population(emitting_level)?;
    let rise_time_s = extract_rise_time(
        &threshold_run.t,
        &population,
        RiseTimeMethod::NinetyPercent,
    );

    let saturation_w_cm2 = estimate_saturation(&powers, &emissions, threshold.power);
    let dynamic_range = saturation_w_cm2.map(|s| s / threshold.power);

    Ok(PaParameters {
        threshold_w_cm2: threshold.power,
        threshold_uncertainty: threshold.uncertainty,
        nonlinearity_below: below.order,
        nonlinearity_above: above.order,
        nonlinearity_uncertainty: above.uncertainty,
        rise_time_s,
        saturation_w_cm2,
        dynamic_range,
    })
}

/// Saturation onset: the first above-threshold point whose 5-point
/// sliding-window log-log slope falls below half of the window slopes'
/// own maximum. `None` when the sweep holds too few above-threshold
/// points or the slope never collapses.
fn estimate_saturation(powers: &[f64], emissions: &[f64], threshold: f64) -> Option<f64> {
    let log_thresh = threshold.log10();

    let above: Vec<usize> = (0..powers.len())
        .filter(|&i| powers[i].log10() > log_thresh)
        .collect();
    if above.len() <= 3 {
        return None;
    }

    let log_p: Vec<f64> = above.iter().map(|&i| powers[i].log10()).collect();
    let log_i: Vec<f64> = above
        .iter()
        .map(|&i| (emissions[i] + EMISSION_EPSILON).log10())
        .collect();

    let m = above.len();
    let slopes: Vec<f64> = (0..m)
        .map(|i| {
            let lo = i.saturating_sub(2);
            let hi = (i + 3).min(m);
            linear_fit(&log_p[lo..hi], &log_i[lo..hi]).slope
        })
        .collect();

    let mut max_idx = 0;
    for (i, s) in slopes.iter().enumerate() {
        if *s > slopes[max_idx] {
            max_idx = i;
        }
    }

    for i in max_idx + 1..m {
        if slopes[i] < slopes[max_idx] / 2.0 {
            return Some(powers[above[i]]);
        }
    }
    None
}
