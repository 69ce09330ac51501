//! Shared numerics for parameter extraction: nonuniform-grid gradients,
//! least-squares line fits, Gaussian smoothing, and a one-parameter
//! exponential rise fit.

/// Result of a least-squares line fit `y = slope*x + intercept`.
#[derive(Debug, Clone, Copy)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Standard error of the slope from the residual variance.
    pub slope_stderr: f64,
}

/// Numerical gradient dy/dx on a possibly nonuniform grid.
///
/// Interior points use the second-order three-point stencil; the ends use
/// one-sided differences. Returns an empty vector for fewer than two
/// points.
pub fn gradient(y: &[f64], x: &[f64]) -> Vec<f64> {
    let n = y.len().min(x.len());
    if n < 2 {
        return vec![f64::NAN; n];
    }

    let mut g = vec![0.0; n];
    g[0] = (y[1] - y[0]) / (x[1] - x[0]);
    g[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);

    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        g[i] = (hs * hs * y[i + 1] + (hd * hd - hs * hs) * y[i] - hd * hd * y[i - 1])
            / (hs * hd * (hs + hd));
    }
    g
}

/// Least-squares line fit with slope standard error.
///
/// Degenerate inputs (fewer than 2 points, or zero spread in x) yield
/// NaN coefficients. The standard error uses the unbiased residual
/// variance (n - 2 degrees of freedom); it is zero for a 2-point fit.
pub fn linear_fit(x: &[f64], y: &[f64]) -> LineFit {
    let n = x.len().min(y.len());
    if n < 2 {
        return LineFit {
            slope: f64::NAN,
            intercept: f64::NAN,
            slope_stderr: f64::NAN,
        };
    }

    let nf = n as f64;
    let x_mean = x[..n].iter().sum::<f64>() / nf;
    let y_mean = y[..n].iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - x_mean;
        sxx += dx * dx;
        sxy += dx * (y[i] - y_mean);
    }
    if sxx == 0.0 {
        return LineFit {
            slope: f64::NAN,
            intercept: f64::NAN,
            slope_stderr: f64::NAN,
        };
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let slope_stderr = if n > 2 {
        let rss: f64 = (0..n)
            .map(|i| {
                let r = y[i] - (slope * x[i] + intercept);
                r * r
            })
            .sum();
        (rss / ((nf - 2.0) * sxx)).sqrt()
    } else {
        0.0
    };

    LineFit {
        slope,
        intercept,
        slope_stderr,
    }
}

/// Gaussian smoothing with a kernel truncated at 4 sigma and reflected
/// boundary handling.
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    let n = values.len();
    if n == 0 || sigma <= 0.0 {
        return values.to_vec();
    }

    let radius = (4.0 * sigma).ceil() as isize;
    let mut kernel = Vec::with_capacity(2 * radius as usize + 1);
    for k in -radius..=radius {
        let u = k as f64 / sigma;
        kernel.push((-0.5 * u * u).exp());
    }
    let norm: f64 = kernel.iter().sum();

    let reflect = |mut i: isize| -> usize {
        // Mirror indices into [0, n): ... 2 1 | 0 1 2 ... n-1 | n-2 n-3 ...
        let m = n as isize;
        loop {
            if i < 0 {
                i = -i - 1;
            } else if i >= m {
                i = 2 * m - i - 1;
            } else {
                return i as usize;
            }
        }
    };

    (0..n as isize)
        .map(|i| {
            let mut acc = 0.0;
            for (j, w) in kernel.iter().enumerate() {
                let src = reflect(i + j as isize - radius);
                acc += w * values[src];
            }
            acc / norm
        })
        .collect()
}

/// Fit tau in the rise model `y(t) = 1 - exp(-t/tau)` by damped
/// Gauss-Newton, seeded with `tau0`. Returns `None` when the iteration
/// does not converge to a positive, finite tau.
pub fn fit_exponential_rise(t: &[f64], y: &[f64], tau0: f64) -> Option<f64> {
    let n = t.len().min(y.len());
    if n < 2 || !tau0.is_finite() || tau0 <= 0.0 {
        return None;
    }

    let residual_ss = |tau: f64| -> f64 {
        (0..n)
            .map(|i| {
                let r = 1.0 - (-t[i] / tau).exp() - y[i];
                r * r
            })
            .sum()
    };

    let mut tau = tau0;
    let mut ss = residual_ss(tau);

    for _ in 0..100 {
        // J_i = d(model)/d(tau) = -(t/tau^2) * exp(-t/tau)
        let mut jtj = 0.0;
        let mut jtr = 0.0;
        for i in 0..n {
            let e = (-t[i] / tau).exp();
            let j = -(t[i] / (tau * tau)) * e;
            let r = 1.0 - e - y[i];
            jtj += j * j;
            jtr += j * r;
        }
        if jtj == 0.0 {
            return None;
        }

        let full_step = -jtr / jtj;
        // Backtracking line search keeps tau positive and ss decreasing.
        let mut lambda = 1.0;
        let mut improved = false;
        for _ in 0..20 {
            let candidate = tau + lambda * full_step;
            if candidate > 0.0 && candidate.is_finite() {
                let candidate_ss = residual_ss(candidate);
                if candidate_ss <= ss {
                    let relative_change = (candidate - tau).abs() / tau;
                    tau = candidate;
                    ss = candidate_ss;
                    improved = true;
                    if relative_change < 1e-10 {
                        return Some(tau);
                    }
                    break;
                }
            }
            lambda *= 0.5;
        }
        if !improved {
            // Cannot improve further; accept if the step had converged.
            return if full_step.abs() / tau < 1e-6 {
                Some(tau)
            } else {
                None
            };
        }
    }

    Some(tau)
}
