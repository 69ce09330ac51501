//! Avalanche threshold extraction.
//!
//! The threshold is the pump power where the avalanche feedback loop
//! becomes dominant, visible as a rapid slope increase in the log-log
//! emission-vs-power curve. Three algorithms are offered; the
//! intersection method falls back to the derivative method through
//! ordinary control flow when its preconditions fail.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::numeric::{gaussian_smooth, gradient, linear_fit};

/// Offset added to emission values before taking logarithms.
pub const EMISSION_EPSILON: f64 = 1e-30;

/// Threshold extraction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdMethod {
    /// First point whose log-log slope exceeds twice the initial slope.
    #[default]
    Derivative,
    /// Intersection of linear fits below and above the knee.
    Intersection,
    /// Maximum of the smoothed second log-log derivative.
    Inflection,
}

impl FromStr for ThresholdMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "derivative" => Ok(ThresholdMethod::Derivative),
            "intersection" => Ok(ThresholdMethod::Intersection),
            "inflection" => Ok(ThresholdMethod::Inflection),
            other => Err(Error::UnknownMethod(other.to_string())),
        }
    }
}

/// An extracted threshold with its uncertainty, both in W/cm^2.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEstimate {
    pub power: f64,
    pub uncertainty: f64,
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Extract the avalanche threshold from paired power/emission arrays.
///
/// Fewer than two points degrade to a NaN estimate; mismatched array
/// lengths are an argument error.
pub fn extract_threshold(
    powers: &[f64],
    emissions: &[f64],
    method: ThresholdMethod,
) -> Result<ThresholdEstimate> {
    if powers.len() != emissions.len() {
        return Err(Error::InvalidInput(format!(
            "{} powers vs {} emissions",
            powers.len(),
            emissions.len()
        )));
    }
    if powers.len() < 2 {
        return Ok(ThresholdEstimate {
            power: f64::NAN,
            uncertainty: f64::NAN,
        });
    }

    let log_p: Vec<f64> = powers.iter().map(|p| p.log10()).collect();
    let log_i: Vec<f64> = emissions
        .iter()
        .map(|i| (i + EMISSION_EPSILON).log10())
        .collect();

    match method {
        ThresholdMethod::Derivative => Ok(derivative_threshold(powers, &log_p, &log_i)),
        ThresholdMethod::Intersection => Ok(intersection_threshold(powers, &log_p, &log_i)),
        ThresholdMethod::Inflection => Ok(inflection_threshold(powers, &log_p, &log_i)),
    }
}

fn derivative_threshold(powers: &[f64], log_p: &[f64], log_i: &[f64]) -> ThresholdEstimate {
    let n = powers.len();
    let grad = gradient(log_i, log_p);
    let max_idx = argmax(&grad);

    // Mean slope over the pre-avalanche head of the curve.
    let head = (n / 10).max(3).min(n);
    let initial_slope = grad[..head].iter().sum::<f64>() / head as f64;

    let thresh_idx = grad
        .iter()
        .position(|g| *g > 2.0 * initial_slope)
        .unwrap_or(max_idx);

    let threshold = powers[thresh_idx];
    let uncertainty = if max_idx > 0 && max_idx < n - 1 {
        (powers[max_idx] - powers[thresh_idx]) / 2.0
    } else {
        threshold * 0.1
    };

    ThresholdEstimate {
        power: threshold,
        uncertainty,
    }
}

fn intersection_threshold(powers: &[f64], log_p: &[f64], log_i: &[f64]) -> ThresholdEstimate {
    let n = powers.len();
    let grad = gradient(log_i, log_p);
    let max_slope_idx = argmax(&grad);

    let n_below = (max_slope_idx / 2).max(3).min(n);
    let n_above = ((n - max_slope_idx) / 2).max(3);
    let above_start = (max_slope_idx + n_above / 2).min(n);

    let below = 0..n_below;
    let above = above_start..n;

    if below.len() < 2 || above.len() < 2 {
        return derivative_threshold(powers, log_p, log_i);
    }

    let fit_below = linear_fit(&log_p[below.clone()], &log_i[below]);
    let fit_above = linear_fit(&log_p[above.clone()], &log_i[above]);

    // Nearly parallel fits have no meaningful intersection.
    if (fit_above.slope - fit_below.slope).abs() < 0.1 {
        return derivative_threshold(powers, log_p, log_i);
    }

    let log_p_thresh =
        (fit_below.intercept - fit_above.intercept) / (fit_above.slope - fit_below.slope);
    let threshold = 10f64.powf(log_p_thresh);

    ThresholdEstimate {
        power: threshold,
        uncertainty: threshold * 0.1,
    }
}

fn inflection_threshold(powers: &[f64], log_p: &[f64], log_i: &[f64]) -> ThresholdEstimate {
    let d1 = gradient(log_i, log_p);
    let d2 = gradient(&d1, log_p);
    let smooth = gaussian_smooth(&d2, 2.0);

    let inflection_idx = argmax(&smooth);
    let threshold = powers[inflection_idx];

    ThresholdEstimate {
        power: threshold,
        uncertainty: threshold * 0.15,
    }
}
