//! Adaptive implicit integrators for stiff rate-equation systems.
//!
//! Population dynamics under optical pumping couple processes whose
//! timescales span many orders of magnitude (sub-microsecond absorption
//! cycling against millisecond metastable decay), so only implicit,
//! A/L-stable methods are offered:
//!
//! - [`IntegrationMethod::Sdirk2`] (default) — two-stage L-stable SDIRK
//!   with gamma = 1 - 1/sqrt(2) and an embedded first-order error
//!   estimate. Both stages share one LU-factored iteration matrix
//!   `I - h*gamma*J`, refreshed when the step size drifts or a step is
//!   rejected.
//! - [`IntegrationMethod::BackwardEuler`] — implicit Euler with a
//!   step-doubling error estimate.
//!
//! Systems implement [`OdeSystem`]; the default Jacobian is central
//! finite differences, overridable with an analytic one.

use std::fmt;

use nalgebra::{DMatrix, DVector, Dyn};

use crate::error::{Error, Result};

/// Right-hand side of an ODE system `dy/dt = f(t, y)`.
pub trait OdeSystem {
    /// Number of state variables.
    fn ndim(&self) -> usize;

    /// Evaluate `f(t, y)` into `dydt`.
    fn rhs(&self, t: f64, y: &DVector<f64>, dydt: &mut DVector<f64>);

    /// Evaluate the Jacobian `df/dy` at `(t, y)` into `jac`.
    ///
    /// The default uses central finite differences (2n RHS evaluations);
    /// override when an analytic Jacobian is available.
    fn jacobian(&self, t: f64, y: &DVector<f64>, jac: &mut DMatrix<f64>) {
        let n = self.ndim();
        let mut yp = y.clone();
        let mut fp = DVector::zeros(n);
        let mut fm = DVector::zeros(n);
        for j in 0..n {
            let orig = yp[j];
            let h = 1e-8 * (1.0 + orig.abs());
            yp[j] = orig + h;
            self.rhs(t, &yp, &mut fp);
            yp[j] = orig - h;
            self.rhs(t, &yp, &mut fm);
            yp[j] = orig;
            for i in 0..n {
                jac[(i, j)] = (fp[i] - fm[i]) / (2.0 * h);
            }
        }
    }
}

/// Implicit integration method for stiff systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Two-stage L-stable SDIRK with embedded error estimate.
    #[default]
    Sdirk2,
    /// Implicit Euler with step-doubling error estimate.
    BackwardEuler,
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationMethod::Sdirk2 => write!(f, "sdirk2"),
            IntegrationMethod::BackwardEuler => write!(f, "backward-euler"),
        }
    }
}

/// Configuration for the adaptive integrators.
#[derive(Debug, Clone)]
pub struct OdeOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Initial step size; 0.0 selects span/1000.
    pub h0: f64,
    /// Minimum step size.
    pub h_min: f64,
    /// Maximum step size.
    pub h_max: f64,
    /// Maximum number of attempted steps before giving up.
    pub max_steps: usize,
    /// Record every accepted step (otherwise only the final state).
    pub dense_output: bool,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-12,
            h0: 0.0,
            h_min: 1e-18,
            h_max: f64::INFINITY,
            max_steps: 500_000,
            dense_output: true,
        }
    }
}

impl OdeOptions {
    fn validate(&self) -> Result<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(Error::InvalidConfig("rtol must be finite and > 0".into()));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(Error::InvalidConfig("atol must be finite and > 0".into()));
        }
        if self.max_steps == 0 {
            return Err(Error::InvalidConfig("max_steps must be > 0".into()));
        }
        Ok(())
    }

    fn initial_step(&self, span: f64) -> f64 {
        if self.h0 > 0.0 {
            self.h0.min(span)
        } else {
            (span * 1e-3).max(self.h_min).min(self.h_max).min(span)
        }
    }
}

/// Work counters accumulated during one integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OdeStats {
    /// RHS evaluations.
    pub nfev: usize,
    /// Jacobian evaluations.
    pub njev: usize,
    /// LU factorizations.
    pub nlu: usize,
    /// Accepted steps.
    pub naccepted: usize,
    /// Rejected steps (error test or Newton failures).
    pub nrejected: usize,
}

/// Solution of one integration run.
#[derive(Debug, Clone)]
pub struct OdeSolution {
    /// Accepted time points.
    pub t: Vec<f64>,
    /// State at each time point.
    pub y: Vec<DVector<f64>>,
    /// Work counters.
    pub stats: OdeStats,
}

impl OdeSolution {
    /// Sample the solution at explicit times by linear interpolation
    /// between accepted steps. Times outside the integrated span clamp
    /// to the first/last state.
    pub fn sample_at(&self, times: &[f64]) -> OdeSolution {
        let mut out = OdeSolution {
            t: Vec::with_capacity(times.len()),
            y: Vec::with_capacity(times.len()),
            stats: self.stats,
        };
        if self.t.is_empty() {
            return out;
        }

        let mut idx = 0;
        for &tq in times {
            while idx + 1 < self.t.len() && self.t[idx + 1] < tq {
                idx += 1;
            }
            if idx + 1 >= self.t.len() {
                out.t.push(tq);
                out.y.push(self.y.last().expect("non-empty solution").clone());
                continue;
            }

            let ta = self.t[idx];
            let tb = self.t[idx + 1];
            let frac = if (tb - ta).abs() < 1e-300 {
                0.0
            } else {
                ((tq - ta) / (tb - ta)).clamp(0.0, 1.0)
            };

            out.t.push(tq);
            out.y.push(&self.y[idx] * (1.0 - frac) + &self.y[idx + 1] * frac);
        }
        out
    }
}

/// Integrate `sys` from `t0` to `t1` with the chosen implicit method.
///
/// Non-convergence (step budget exhausted, Newton failure at the minimum
/// step, singular iteration matrix) is fatal for the run and carries a
/// diagnostic message; no retry is attempted.
pub fn integrate(
    sys: &dyn OdeSystem,
    method: IntegrationMethod,
    y0: &DVector<f64>,
    t0: f64,
    t1: f64,
    opts: &OdeOptions,
) -> Result<OdeSolution> {
    opts.validate()?;
    if y0.len() != sys.ndim() {
        return Err(Error::InvalidConfig(format!(
            "initial state has {} entries, system has {} levels",
            y0.len(),
            sys.ndim()
        )));
    }
    if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
        return Err(Error::InvalidConfig(format!(
            "invalid time span [{}, {}]",
            t0, t1
        )));
    }

    match method {
        IntegrationMethod::Sdirk2 => sdirk2(sys, y0, t0, t1, opts),
        IntegrationMethod::BackwardEuler => backward_euler(sys, y0, t0, t1, opts),
    }
}

const MAX_NEWTON: usize = 10;
const NEWTON_TOL: f64 = 1e-2;

/// Scaled RMS norm of `v` against `atol + rtol*|scale_i|`.
fn scaled_rms(v: &DVector<f64>, scale: &DVector<f64>, opts: &OdeOptions) -> f64 {
    let n = v.len();
    let mut acc = 0.0;
    for i in 0..n {
        let sc = opts.atol + opts.rtol * scale[i].abs();
        let r = v[i] / sc;
        acc += r * r;
    }
    (acc / n as f64).sqrt()
}

fn sdirk2(
    sys: &dyn OdeSystem,
    y0: &DVector<f64>,
    t0: f64,
    t1: f64,
    opts: &OdeOptions,
) -> Result<OdeSolution> {
    let n = sys.ndim();
    let gamma: f64 = 1.0 - std::f64::consts::FRAC_1_SQRT_2;

    let mut sol = OdeSolution {
        t: Vec::new(),
        y: Vec::new(),
        stats: OdeStats::default(),
    };
    let span = t1 - t0;
    if span == 0.0 {
        sol.t.push(t0);
        sol.y.push(y0.clone());
        return Ok(sol);
    }
    if opts.dense_output {
        sol.t.push(t0);
        sol.y.push(y0.clone());
    }

    let mut t = t0;
    let mut y = y0.clone();
    let mut h = opts.initial_step(span);

    let mut jac = DMatrix::zeros(n, n);
    let mut lu: Option<nalgebra::LU<f64, Dyn, Dyn>> = None;
    let mut cached_hg = -1.0_f64;

    let mut k1 = DVector::zeros(n);
    let mut k2 = DVector::zeros(n);
    let mut f_buf = DVector::zeros(n);

    for _step in 0..opts.max_steps {
        if t >= t1 {
            break;
        }
        h = h.min(t1 - t).max(opts.h_min).min(opts.h_max);
        let hg = h * gamma;

        if lu.is_none() || (hg - cached_hg).abs() > 0.2 * cached_hg {
            sys.jacobian(t, &y, &mut jac);
            sol.stats.njev += 1;
            let mut m = &jac * (-hg);
            for i in 0..n {
                m[(i, i)] += 1.0;
            }
            lu = Some(m.lu());
            sol.stats.nlu += 1;
            cached_hg = hg;
        }
        let factored = lu.as_ref().expect("iteration matrix factored");

        // Stage 1: k1 = f(t + gamma*h, y + h*gamma*k1).
        sys.rhs(t, &y, &mut k1);
        sol.stats.nfev += 1;
        let mut newton_ok = false;
        for _ in 0..MAX_NEWTON {
            let stage_y = &y + &k1 * hg;
            sys.rhs(t + gamma * h, &stage_y, &mut f_buf);
            sol.stats.nfev += 1;
            let resid = &f_buf - &k1;
            let Some(delta) = factored.solve(&resid) else {
                break;
            };
            k1 += &delta;
            if scaled_rms(&delta, &y, opts) < NEWTON_TOL {
                newton_ok = true;
                break;
            }
        }

        // Stage 2: k2 = f(t + h, y + h*(1-gamma)*k1 + h*gamma*k2).
        if newton_ok {
            k2.copy_from(&k1);
            newton_ok = false;
            for _ in 0..MAX_NEWTON {
                let stage_y = &y + &k1 * (h * (1.0 - gamma)) + &k2 * hg;
                sys.rhs(t + h, &stage_y, &mut f_buf);
                sol.stats.nfev += 1;
                let resid = &f_buf - &k2;
                let Some(delta) = factored.solve(&resid) else {
                    break;
                };
                k2 += &delta;
                if scaled_rms(&delta, &y, opts) < NEWTON_TOL {
                    newton_ok = true;
                    break;
                }
            }
        }

        if !newton_ok {
            if h <= opts.h_min {
                return Err(Error::IntegrationFailed(format!(
                    "sdirk2: Newton iteration failed at minimum step size (t = {:.6e})",
                    t
                )));
            }
            sol.stats.nrejected += 1;
            h *= 0.5;
            lu = None;
            continue;
        }

        let y_new = &y + (&k1 * (1.0 - gamma) + &k2 * gamma) * h;

        // Embedded first-order estimate: error = h*gamma*(k2 - k1).
        let err_vec = (&k2 - &k1) * (h * gamma);
        let mut scale = y.clone();
        for i in 0..n {
            scale[i] = y[i].abs().max(y_new[i].abs());
        }
        let err = scaled_rms(&err_vec, &scale, opts);

        if err <= 1.0 {
            t += h;
            y = y_new;
            sol.stats.naccepted += 1;
            if opts.dense_output {
                sol.t.push(t);
                sol.y.push(y.clone());
            }
            if t >= t1 {
                break;
            }
        } else {
            sol.stats.nrejected += 1;
            lu = None;
        }

        let factor = if err == 0.0 {
            4.0
        } else {
            (0.9 * err.powf(-1.0 / 3.0)).clamp(0.25, 4.0)
        };
        h = (h * factor).max(opts.h_min).min(opts.h_max);
    }

    if t < t1 - opts.h_min {
        return Err(Error::IntegrationFailed(format!(
            "sdirk2: exceeded max_steps = {} at t = {:.6e} before reaching t1 = {:.6e}",
            opts.max_steps, t, t1
        )));
    }

    if !opts.dense_output {
        sol.t.push(t);
        sol.y.push(y);
    }
    Ok(sol)
}

/// One implicit Euler stage `z = y + h*f(t + h, z)` solved by Newton.
/// Returns `None` when Newton fails to converge (including a singular
/// iteration matrix), which the caller treats as a step rejection.
fn be_stage(
    sys: &dyn OdeSystem,
    t: f64,
    y: &DVector<f64>,
    h: f64,
    opts: &OdeOptions,
    stats: &mut OdeStats,
) -> Option<DVector<f64>> {
    let n = sys.ndim();

    let mut jac = DMatrix::zeros(n, n);
    sys.jacobian(t, y, &mut jac);
    stats.njev += 1;
    let mut m = &jac * (-h);
    for i in 0..n {
        m[(i, i)] += 1.0;
    }
    let lu = m.lu();
    stats.nlu += 1;

    let mut f_buf = DVector::zeros(n);
    sys.rhs(t, y, &mut f_buf);
    stats.nfev += 1;
    let mut z = y + &f_buf * h;

    for _ in 0..MAX_NEWTON {
        sys.rhs(t + h, &z, &mut f_buf);
        stats.nfev += 1;
        let resid = y + &f_buf * h - &z;
        let delta = lu.solve(&resid)?;
        z += &delta;
        if scaled_rms(&delta, y, opts) < NEWTON_TOL {
            return Some(z);
        }
    }
    None
}

fn backward_euler(
    sys: &dyn OdeSystem,
    y0: &DVector<f64>,
    t0: f64,
    t1: f64,
    opts: &OdeOptions,
) -> Result<OdeSolution> {
    let n = sys.ndim();

    let mut sol = OdeSolution {
        t: Vec::new(),
        y: Vec::new(),
        stats: OdeStats::default(),
    };
    let span = t1 - t0;
    if span == 0.0 {
        sol.t.push(t0);
        sol.y.push(y0.clone());
        return Ok(sol);
    }
    if opts.dense_output {
        sol.t.push(t0);
        sol.y.push(y0.clone());
    }

    let mut t = t0;
    let mut y = y0.clone();
    let mut h = opts.initial_step(span);

    for _step in 0..opts.max_steps {
        if t >= t1 {
            break;
        }
        h = h.min(t1 - t).max(opts.h_min).min(opts.h_max);

        // Step doubling: one full step against two half steps.
        let full = be_stage(sys, t, &y, h, opts, &mut sol.stats);
        let halves = be_stage(sys, t, &y, h / 2.0, opts, &mut sol.stats)
            .and_then(|mid| be_stage(sys, t + h / 2.0, &mid, h / 2.0, opts, &mut sol.stats));

        let (Some(full), Some(halved)) = (full, halves) else {
            if h <= opts.h_min {
                return Err(Error::IntegrationFailed(format!(
                    "backward-euler: Newton iteration failed at minimum step size (t = {:.6e})",
                    t
                )));
            }
            sol.stats.nrejected += 1;
            h *= 0.5;
            continue;
        };

        let err_vec = &halved - &full;
        let mut scale = y.clone();
        for i in 0..n {
            scale[i] = y[i].abs().max(halved[i].abs());
        }
        let err = scaled_rms(&err_vec, &scale, opts);

        if err <= 1.0 {
            t += h;
            y = halved;
            sol.stats.naccepted += 1;
            if opts.dense_output {
                sol.t.push(t);
                sol.y.push(y.clone());
            }
            if t >= t1 {
                break;
            }
        } else {
            sol.stats.nrejected += 1;
        }

        let factor = if err == 0.0 {
            4.0
        } else {
            (0.9 * err.powf(-0.5)).clamp(0.2, 4.0)
        };
        h = (h * factor).max(opts.h_min).min(opts.h_max);
    }

    if t < t1 - opts.h_min {
        return Err(Error::IntegrationFailed(format!(
            "backward-euler: exceeded max_steps = {} at t = {:.6e} before reaching t1 = {:.6e}",
            opts.max_steps, t, t1
        )));
    }

    if !opts.dense_output {
        sol.t.push(t);
        sol.y.push(y);
    }
    Ok(sol)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exponential decay: dy/dt = -k*y.
    struct ExpDecay {
        k: f64,
    }

    impl OdeSystem for ExpDecay {
        fn ndim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &DVector<f64>, dydt: &mut DVector<f64>) {
            dydt[0] = -self.k * y[0];
        }
    }

    /// Classic stiff two-timescale linear system:
    /// dy0/dt = -1000*y0 + y1, dy1/dt = -y1.
    struct StiffLinear;

    impl OdeSystem for StiffLinear {
        fn ndim(&self) -> usize {
            2
        }
        fn rhs(&self, _t: f64, y: &DVector<f64>, dydt: &mut DVector<f64>) {
            dydt[0] = -1000.0 * y[0] + y[1];
            dydt[1] = -y[1];
        }
    }

    fn tight_opts() -> OdeOptions {
        OdeOptions {
            rtol: 1e-8,
            atol: 1e-12,
            ..Default::default()
        }
    }

    #[test]
    fn test_sdirk2_exp_decay() {
        let sys = ExpDecay { k: 1.3 };
        let y0 = DVector::from_vec(vec![2.0]);
        let sol = integrate(
            &sys,
            IntegrationMethod::Sdirk2,
            &y0,
            0.0,
            1.0,
            &tight_opts(),
        )
        .unwrap();

        let y_final = sol.y.last().unwrap()[0];
        let expected = 2.0 * (-1.3_f64).exp();
        assert!(
            (y_final - expected).abs() < 1e-5,
            "sdirk2 exp decay: got {}, expected {}",
            y_final,
            expected
        );
    }

    #[test]
    fn test_backward_euler_exp_decay() {
        let sys = ExpDecay { k: 1.3 };
        let y0 = DVector::from_vec(vec![2.0]);
        let sol = integrate(
            &sys,
            IntegrationMethod::BackwardEuler,
            &y0,
            0.0,
            1.0,
            &tight_opts(),
        )
        .unwrap();

        let y_final = sol.y.last().unwrap()[0];
        let expected = 2.0 * (-1.3_f64).exp();
        assert!(
            (y_final - expected).abs() < 1e-4,
            "backward-euler exp decay: got {}, expected {}",
            y_final,
            expected
        );
    }

    #[test]
    fn test_sdirk2_stiff_system() {
        let y0 = DVector::from_vec(vec![1.0, 1.0]);
        let sol = integrate(
            &StiffLinear,
            IntegrationMethod::Sdirk2,
            &y0,
            0.0,
            5.0,
            &tight_opts(),
        )
        .unwrap();

        // After the fast mode dies, y0 tracks y1/999 with y1 = e^-t.
        let y_final = sol.y.last().unwrap();
        let y1_expected = (-5.0_f64).exp();
        assert!(
            (y_final[1] - y1_expected).abs() < 1e-6,
            "slow mode: got {}, expected {}",
            y_final[1],
            y1_expected
        );
        assert!(
            (y_final[0] - y1_expected / 999.0).abs() < 1e-6,
            "fast mode should track the slow one: got {}",
            y_final[0]
        );
        // The step count must reflect stiffness handling, not 1000/h steps.
        assert!(
            sol.stats.naccepted < 20_000,
            "too many steps for a stiff-capable method: {}",
            sol.stats.naccepted
        );
    }

    #[test]
    fn test_methods_agree() {
        let sys = ExpDecay { k: 0.5 };
        let y0 = DVector::from_vec(vec![1.0]);
        let opts = tight_opts();

        let a = integrate(&sys, IntegrationMethod::Sdirk2, &y0, 0.0, 5.0, &opts).unwrap();
        let b = integrate(&sys, IntegrationMethod::BackwardEuler, &y0, 0.0, 5.0, &opts).unwrap();

        let ya = a.y.last().unwrap()[0];
        let yb = b.y.last().unwrap()[0];
        assert!(
            (ya - yb).abs() < 1e-5,
            "sdirk2 = {}, backward-euler = {} should agree",
            ya,
            yb
        );
    }

    #[test]
    fn test_zero_span() {
        let sys = ExpDecay { k: 1.0 };
        let y0 = DVector::from_vec(vec![1.0]);
        let sol = integrate(
            &sys,
            IntegrationMethod::Sdirk2,
            &y0,
            0.0,
            0.0,
            &OdeOptions::default(),
        )
        .unwrap();
        assert_eq!(sol.t.len(), 1);
        assert_eq!(sol.y[0][0], 1.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let sys = ExpDecay { k: 1.0 };
        let y0 = DVector::from_vec(vec![1.0, 2.0]);
        let err = integrate(
            &sys,
            IntegrationMethod::Sdirk2,
            &y0,
            0.0,
            1.0,
            &OdeOptions::default(),
        );
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_max_steps_exhaustion_is_fatal() {
        let sys = ExpDecay { k: 1.0 };
        let y0 = DVector::from_vec(vec![1.0]);
        let opts = OdeOptions {
            max_steps: 3,
            ..tight_opts()
        };
        let err = integrate(&sys, IntegrationMethod::Sdirk2, &y0, 0.0, 100.0, &opts);
        match err {
            Err(Error::IntegrationFailed(msg)) => {
                assert!(msg.contains("max_steps"), "diagnostic was: {}", msg)
            }
            other => panic!("expected IntegrationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_at_interpolates() {
        let sys = ExpDecay { k: 1.0 };
        let y0 = DVector::from_vec(vec![1.0]);
        let sol = integrate(
            &sys,
            IntegrationMethod::Sdirk2,
            &y0,
            0.0,
            5.0,
            &tight_opts(),
        )
        .unwrap();

        let times = [0.0, 0.5, 1.0, 2.0, 5.0];
        let sampled = sol.sample_at(&times);
        assert_eq!(sampled.t.len(), 5);
        for (i, &tq) in times.iter().enumerate() {
            let expected = (-tq).exp();
            assert!(
                (sampled.y[i][0] - expected).abs() < 1e-4,
                "t = {}: got {}, expected {}",
                tq,
                sampled.y[i][0],
                expected
            );
        }
    }

    #[test]
    fn test_finite_difference_jacobian_default() {
        let sys = ExpDecay { k: 2.0 };
        let y = DVector::from_vec(vec![3.0]);
        let mut jac = DMatrix::zeros(1, 1);
        sys.jacobian(0.0, &y, &mut jac);
        assert!(
            (jac[(0, 0)] + 2.0).abs() < 1e-6,
            "d(-2y)/dy = {} (expected -2)",
            jac[(0, 0)]
        );
    }
}
