//! Luminescence rise-time extraction.
//!
//! Avalanching is characterized by slow rise toward steady state near
//! threshold (tens to hundreds of milliseconds) because the feedback
//! loop must build the metastable reservoir across many pump cycles.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::numeric::fit_exponential_rise;

/// Rise-time extraction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiseTimeMethod {
    /// First crossing of 90% of steady state.
    #[default]
    NinetyPercent,
    /// First crossing of 1 - 1/e (~63.2%) of steady state.
    TimeConstant,
    /// Single-exponential rise fit seeded by the 63% estimate.
    ExponentialFit,
}

impl FromStr for RiseTimeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "90pct" => Ok(RiseTimeMethod::NinetyPercent),
            "63pct" => Ok(RiseTimeMethod::TimeConstant),
            "fit" => Ok(RiseTimeMethod::ExponentialFit),
            other => Err(Error::UnknownMethod(other.to_string())),
        }
    }
}

/// Extract the rise time (s) of a population or emission time series.
///
/// The series is normalized to its steady state, estimated as the mean
/// of the trailing tenth of the samples (the whole series when fewer
/// than ten). A non-positive steady state yields NaN. Crossing methods
/// return the final time when the level is never reached.
pub fn extract_rise_time(t: &[f64], series: &[f64], method: RiseTimeMethod) -> f64 {
    let n = t.len().min(series.len());
    if n == 0 {
        return f64::NAN;
    }

    let tail = if n / 10 == 0 { n } else { n / 10 };
    let steady: f64 = series[n - tail..n].iter().sum::<f64>() / tail as f64;
    if steady <= 0.0 {
        return f64::NAN;
    }

    let normalized: Vec<f64> = series[..n].iter().map(|v| v / steady).collect();

    match method {
        RiseTimeMethod::NinetyPercent => first_crossing(t, &normalized, 0.9),
        RiseTimeMethod::TimeConstant => first_crossing(t, &normalized, 0.632),
        RiseTimeMethod::ExponentialFit => {
            let tau_guess = first_crossing(t, &normalized, 0.632);
            fit_exponential_rise(&t[..n], &normalized, tau_guess).unwrap_or(tau_guess)
        }
    }
}

fn first_crossing(t: &[f64], normalized: &[f64], level: f64) -> f64 {
    normalized
        .iter()
        .position(|v| *v >= level)
        .map(|idx| t[idx])
        .unwrap_or_else(|| t[normalized.len() - 1])
}
