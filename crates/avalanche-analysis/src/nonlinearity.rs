//! Nonlinearity order (S parameter) extraction.
//!
//! For avalanche emission `I ~ P^S`; S is the slope of log(I) against
//! log(P), fitted separately below and above the threshold. Strong PA
//! reaches S of 20-30.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::threshold::{EMISSION_EPSILON, ThresholdMethod, extract_threshold};
use crate::numeric::linear_fit;

/// Which side of the threshold to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    /// Pre-avalanche regime, strictly below threshold.
    Below,
    /// The PA regime, strictly above threshold.
    #[default]
    Above,
    /// Fit both sides and return a pair.
    Both,
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "below" => Ok(Region::Below),
            "above" => Ok(Region::Above),
            "both" => Ok(Region::Both),
            other => Err(Error::UnknownRegion(other.to_string())),
        }
    }
}

/// A fitted nonlinearity order with its standard error.
///
/// Both fields are NaN when fewer than three points fall in the
/// requested region.
#[derive(Debug, Clone, Copy)]
pub struct SlopeFit {
    /// Nonlinearity order S.
    pub order: f64,
    /// Standard error of S from the fit covariance.
    pub uncertainty: f64,
}

impl SlopeFit {
    fn nan() -> Self {
        Self {
            order: f64::NAN,
            uncertainty: f64::NAN,
        }
    }
}

/// Result of a nonlinearity extraction.
#[derive(Debug, Clone, Copy)]
pub enum NonlinearityEstimate {
    /// One region was requested.
    Single(SlopeFit),
    /// [`Region::Both`] was requested.
    Split { below: SlopeFit, above: SlopeFit },
}

impl NonlinearityEstimate {
    /// The single-region fit, if this estimate holds one.
    pub fn single(self) -> Option<SlopeFit> {
        match self {
            NonlinearityEstimate::Single(fit) => Some(fit),
            NonlinearityEstimate::Split { .. } => None,
        }
    }
}

/// Extract the nonlinearity order from paired power/emission arrays.
///
/// The threshold is computed with the derivative method when not
/// supplied. Regions with fewer than three points yield NaN fits rather
/// than errors.
pub fn extract_nonlinearity(
    powers: &[f64],
    emissions: &[f64],
    threshold: Option<f64>,
    region: Region,
) -> Result<NonlinearityEstimate> {
    if powers.len() != emissions.len() {
        return Err(Error::InvalidInput(format!(
            "{} powers vs {} emissions",
            powers.len(),
            emissions.len()
        )));
    }

    let threshold = match threshold {
        Some(t) => t,
        None => extract_threshold(powers, emissions, ThresholdMethod::Derivative)?.power,
    };

    match region {
        Region::Below | Region::Above => Ok(NonlinearityEstimate::Single(fit_region(
            powers, emissions, threshold, region,
        ))),
        Region::Both => Ok(NonlinearityEstimate::Split {
            below: fit_region(powers, emissions, threshold, Region::Below),
            above: fit_region(powers, emissions, threshold, Region::Above),
        }),
    }
}

pub(crate) fn fit_region(
    powers: &[f64],
    emissions: &[f64],
    threshold: f64,
    region: Region,
) -> SlopeFit {
    let log_thresh = threshold.log10();

    let mut log_p = Vec::new();
    let mut log_i = Vec::new();
    for (p, i) in powers.iter().zip(emissions.iter()) {
        let lp = p.log10();
        let keep = match region {
            Region::Below => lp < log_thresh,
            Region::Above => lp > log_thresh,
            Region::Both => unreachable!("Both is split before fitting"),
        };
        if keep {
            log_p.push(lp);
            log_i.push((i + EMISSION_EPSILON).log10());
        }
    }

    if log_p.len() < 3 {
        return SlopeFit::nan();
    }

    let fit = linear_fit(&log_p, &log_i);
    SlopeFit {
        order: fit.slope,
        uncertainty: fit.slope_stderr,
    }
}
