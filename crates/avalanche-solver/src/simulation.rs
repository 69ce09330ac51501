//! Simulation orchestration: pump configuration, stiff integration, and
//! structured results.

use std::time::Instant;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};

use avalanche_core::{Material, RateSystem};

use crate::error::{Error, Result};
use crate::ode::{self, IntegrationMethod, OdeOptions, OdeSystem};

/// Pump laser configuration.
#[derive(Debug, Clone, Copy)]
pub struct PumpLaser {
    /// Pump wavelength (nm).
    pub wavelength_nm: f64,
    /// Power density (W/cm^2).
    pub power_density_w_cm2: f64,
}

impl PumpLaser {
    /// Create a pump configuration; both values must be strictly positive.
    pub fn new(wavelength_nm: f64, power_density_w_cm2: f64) -> Result<Self> {
        if wavelength_nm <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "pump wavelength must be positive, got {} nm",
                wavelength_nm
            )));
        }
        if power_density_w_cm2 <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "pump power density must be positive, got {} W/cm^2",
                power_density_w_cm2
            )));
        }
        Ok(Self {
            wavelength_nm,
            power_density_w_cm2,
        })
    }
}

impl Default for PumpLaser {
    /// 1064 nm at 10 kW/cm^2.
    fn default() -> Self {
        Self {
            wavelength_nm: 1064.0,
            power_density_w_cm2: 1e4,
        }
    }
}

/// ODE solver configuration for one simulation context.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Start time (s).
    pub t_start: f64,
    /// End time (s).
    pub t_end: f64,
    /// Implicit integration method.
    pub method: IntegrationMethod,
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance (ions/cm^3).
    pub atol: f64,
    /// Maximum step size (None for automatic).
    pub max_step: Option<f64>,
    /// Step budget before a run is declared non-convergent.
    pub max_steps: usize,
    /// Record every accepted step.
    pub dense_output: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1e-2,
            method: IntegrationMethod::Sdirk2,
            rtol: 1e-8,
            atol: 1e-12,
            max_step: None,
            max_steps: 500_000,
            dense_output: true,
        }
    }
}

/// Solver diagnostics for one run.
#[derive(Debug, Clone, Copy)]
pub struct SolverInfo {
    /// Method used.
    pub method: IntegrationMethod,
    /// RHS evaluations.
    pub nfev: usize,
    /// Jacobian evaluations.
    pub njev: usize,
    /// LU factorizations.
    pub nlu: usize,
    /// Wall time spent integrating (s).
    pub elapsed_seconds: f64,
    /// Number of reported time points.
    pub n_timepoints: usize,
}

/// Results of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Time grid (s).
    pub t: Vec<f64>,
    /// Populations, one row per global level, one column per time point.
    pub populations: DMatrix<f64>,
    /// Display names (`"{species}:{level}"`) in row order.
    pub level_names: Vec<String>,
    /// Pump power density this run used (W/cm^2).
    pub power_density: f64,
    /// Name of the simulated material.
    pub material_name: String,
    /// Solver diagnostics.
    pub solver_info: SolverInfo,
}

impl SimulationResult {
    fn level_index(&self, name: &str) -> Result<usize> {
        self.level_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::UnknownLevel {
                name: name.to_string(),
                available: self.level_names.clone(),
            })
    }

    /// Population time series for a level, by display name.
    pub fn population(&self, level_name: &str) -> Result<Vec<f64>> {
        let idx = self.level_index(level_name)?;
        Ok(self.populations.row(idx).iter().copied().collect())
    }

    /// Steady-state estimate per level: mean over the trailing
    /// `tail_fraction` of the time series (at least one point).
    pub fn steady_state_populations(&self, tail_fraction: f64) -> IndexMap<String, f64> {
        let n_t = self.t.len();
        let n_tail = ((n_t as f64 * tail_fraction) as usize).max(1);
        let start = n_t - n_tail.min(n_t);

        let mut out = IndexMap::with_capacity(self.level_names.len());
        for (i, name) in self.level_names.iter().enumerate() {
            let row = self.populations.row(i);
            let mean = row.iter().skip(start).sum::<f64>() / (n_t - start) as f64;
            out.insert(name.clone(), mean);
        }
        out
    }

    /// Emission intensity from a level: radiative rate times population.
    pub fn emission(&self, level_name: &str, radiative_rate: f64) -> Result<Vec<f64>> {
        let pop = self.population(level_name)?;
        Ok(pop.into_iter().map(|n| radiative_rate * n).collect())
    }
}

/// Adapter binding a rate system to one photon flux for the integrator.
struct RateOde<'a> {
    system: &'a RateSystem,
    flux: f64,
}

impl OdeSystem for RateOde<'_> {
    fn ndim(&self) -> usize {
        self.system.num_levels()
    }

    fn rhs(&self, _t: f64, y: &DVector<f64>, dydt: &mut DVector<f64>) {
        self.system.derivative(y, self.flux, dydt);
    }

    fn jacobian(&self, _t: f64, y: &DVector<f64>, jac: &mut DMatrix<f64>) {
        self.system.jacobian(y, self.flux, jac);
    }
}

/// A simulation context: one material snapshot, pump and solver settings.
///
/// The context is immutable during runs; the pump power is an explicit
/// per-call parameter internally, so sweeping powers never mutates shared
/// state.
#[derive(Debug)]
pub struct Simulation {
    material: Material,
    laser: PumpLaser,
    config: SolverConfig,
    rate_system: RateSystem,
}

impl Simulation {
    /// Build a simulation context. Fails on invalid level references,
    /// negative rates, or a non-positive pump wavelength.
    pub fn new(material: Material, laser: PumpLaser, config: SolverConfig) -> Result<Self> {
        if material.total_levels() == 0 {
            return Err(Error::InvalidConfig(
                "material has no energy levels".into(),
            ));
        }
        let rate_system = RateSystem::new(&material, laser.wavelength_nm)?;
        Ok(Self {
            material,
            laser,
            config,
            rate_system,
        })
    }

    /// Build a context with default pump and solver settings.
    pub fn with_defaults(material: Material) -> Result<Self> {
        Self::new(material, PumpLaser::default(), SolverConfig::default())
    }

    /// The simulated material.
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// The configured pump laser.
    pub fn laser(&self) -> &PumpLaser {
        &self.laser
    }

    /// The solver configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// The underlying rate-equation system.
    pub fn rate_system(&self) -> &RateSystem {
        &self.rate_system
    }

    /// Run at the configured pump power.
    ///
    /// `initial_populations` overrides the default all-in-ground start;
    /// `t_eval` requests specific output times (linear interpolation of
    /// the dense solution).
    pub fn run(
        &self,
        initial_populations: Option<&DVector<f64>>,
        t_eval: Option<&[f64]>,
    ) -> Result<SimulationResult> {
        self.run_at_power(
            self.laser.power_density_w_cm2,
            self.config.t_end,
            initial_populations,
            t_eval,
        )
    }

    /// Run with an explicit output time grid; the end time is taken from
    /// the last grid point.
    pub fn run_temporal(&self, t_points: &[f64]) -> Result<SimulationResult> {
        let t_end = *t_points.last().ok_or_else(|| {
            Error::InvalidConfig("run_temporal requires at least one time point".into())
        })?;
        self.run_at_power(
            self.laser.power_density_w_cm2,
            t_end,
            None,
            Some(t_points),
        )
    }

    /// Run one integration at an explicit pump power and end time.
    ///
    /// This is the pure work-horse behind [`run`](Self::run) and the
    /// power sweep: all run-specific inputs are parameters, nothing on
    /// the context is mutated.
    pub fn run_at_power(
        &self,
        power_density_w_cm2: f64,
        t_end: f64,
        initial_populations: Option<&DVector<f64>>,
        t_eval: Option<&[f64]>,
    ) -> Result<SimulationResult> {
        if power_density_w_cm2 <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "pump power density must be positive, got {} W/cm^2",
                power_density_w_cm2
            )));
        }
        if t_end <= self.config.t_start {
            return Err(Error::InvalidConfig(format!(
                "end time {} must lie after start time {}",
                t_end, self.config.t_start
            )));
        }

        let n_levels = self.rate_system.num_levels();
        let y0 = match initial_populations {
            Some(n0) => {
                if n0.len() != n_levels {
                    return Err(Error::InvalidConfig(format!(
                        "initial populations have {} entries, system has {} levels",
                        n0.len(),
                        n_levels
                    )));
                }
                n0.clone()
            }
            None => self.rate_system.initial_populations(),
        };

        let flux = self.rate_system.photon_flux(power_density_w_cm2);
        let system = RateOde {
            system: &self.rate_system,
            flux,
        };

        let opts = OdeOptions {
            rtol: self.config.rtol,
            atol: self.config.atol,
            h_max: self.config.max_step.unwrap_or(f64::INFINITY),
            max_steps: self.config.max_steps,
            dense_output: self.config.dense_output || t_eval.is_some(),
            ..Default::default()
        };

        let started = Instant::now();
        let mut solution = ode::integrate(
            &system,
            self.config.method,
            &y0,
            self.config.t_start,
            t_end,
            &opts,
        )?;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        if let Some(times) = t_eval {
            solution = solution.sample_at(times);
        }

        let n_timepoints = solution.t.len();
        let populations =
            DMatrix::from_fn(n_levels, n_timepoints, |i, j| solution.y[j][i]);

        Ok(SimulationResult {
            t: solution.t,
            populations,
            level_names: self.rate_system.level_names(),
            power_density: power_density_w_cm2,
            material_name: self.material.name.clone(),
            solver_info: SolverInfo {
                method: self.config.method,
                nfev: solution.stats.nfev,
                njev: solution.stats.njev,
                nlu: solution.stats.nlu,
                elapsed_seconds,
                n_timepoints,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avalanche_core::{Species, Transition, TransitionKind};

    /// Two-level species: GSA up, radiative decay down.
    fn two_level_material() -> Material {
        let mut species = Species::new("Er3+", 1e20);
        species.add_level("ground", 0.0, 1);
        species.add_level("excited", 10000.0, 1);
        species.add_transition(Transition::new(0, 1, TransitionKind::Gsa, 1e-21));
        species.add_transition(Transition::new(1, 0, TransitionKind::Radiative, 1e3));

        let mut material = Material::new("two-level", "NaYF4");
        material.add_species(species);
        material
    }

    fn test_config() -> SolverConfig {
        SolverConfig {
            t_end: 2e-2,
            rtol: 1e-8,
            atol: 1e2,
            ..Default::default()
        }
    }

    #[test]
    fn test_pump_laser_validation() {
        assert!(PumpLaser::new(1064.0, 1e4).is_ok());
        assert!(matches!(
            PumpLaser::new(0.0, 1e4),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            PumpLaser::new(1064.0, -1.0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_two_level_steady_state_matches_analytic() {
        let laser = PumpLaser::new(1064.0, 1e5).unwrap();
        let sim = Simulation::new(two_level_material(), laser, test_config()).unwrap();
        let result = sim.run(None, None).unwrap();

        // sigma*flux*(C - N1) = A*N1  =>  N1 = C*sigma*flux/(sigma*flux + A)
        let flux = sim.rate_system().photon_flux(1e5);
        let pumping = 1e-21 * flux;
        let expected = 1e20 * pumping / (pumping + 1e3);

        let ss = result.steady_state_populations(0.1);
        let n1 = ss["Er3+:excited"];
        assert!(
            ((n1 - expected) / expected).abs() < 1e-3,
            "N1 = {:e} (expected {:e})",
            n1,
            expected
        );
    }

    #[test]
    fn test_custom_initial_populations_decay() {
        // All population starts excited; with pump off-resonance weak,
        // use a tiny power so decay dominates: N1(t) ~ C*exp(-A*t).
        let mut material = two_level_material();
        // Remove the absorption line so only decay acts.
        material.dopants[0].transitions.retain(|t| t.kind == TransitionKind::Radiative);

        let laser = PumpLaser::new(1064.0, 1e4).unwrap();
        let config = SolverConfig {
            t_end: 2e-3,
            rtol: 1e-8,
            atol: 1e2,
            ..Default::default()
        };
        let sim = Simulation::new(material, laser, config).unwrap();

        let n0 = DVector::from_vec(vec![0.0, 1e20]);
        let t_eval = [0.0, 1e-3, 2e-3];
        let result = sim.run(Some(&n0), Some(&t_eval)).unwrap();

        let n1 = result.population("Er3+:excited").unwrap();
        for (k, &tq) in t_eval.iter().enumerate() {
            let expected = 1e20 * (-1e3 * tq).exp();
            assert!(
                ((n1[k] - expected) / 1e20).abs() < 1e-4,
                "N1({}) = {:e} (expected {:e})",
                tq,
                n1[k],
                expected
            );
        }
    }

    #[test]
    fn test_unknown_level_error_lists_names() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::default(),
            test_config(),
        )
        .unwrap();

        let result = sim.run(None, None).unwrap();
        let err = result.population("Er3+:nope").unwrap_err();
        match err {
            Error::UnknownLevel { name, available } => {
                assert_eq!(name, "Er3+:nope");
                assert!(available.contains(&"Er3+:ground".to_string()));
                assert!(available.contains(&"Er3+:excited".to_string()));
            }
            other => panic!("expected UnknownLevel, got {:?}", other),
        }
        // The Display message must enumerate the valid names.
        let err = result.population("Er3+:nope").unwrap_err();
        assert!(err.to_string().contains("Er3+:excited"));
    }

    #[test]
    fn test_emission_scales_population() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::new(1064.0, 1e5).unwrap(),
            test_config(),
        )
        .unwrap();
        let result = sim.run(None, None).unwrap();

        let pop = result.population("Er3+:excited").unwrap();
        let emission = result.emission("Er3+:excited", 1e3).unwrap();
        for (p, e) in pop.iter().zip(emission.iter()) {
            assert!((e - 1e3 * p).abs() <= 1e-9 * p.abs().max(1.0));
        }
    }

    #[test]
    fn test_run_temporal_uses_last_point_as_end() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::default(),
            test_config(),
        )
        .unwrap();
        let t_points = [0.0, 1e-4, 5e-4, 1e-3];
        let result = sim.run_temporal(&t_points).unwrap();

        assert_eq!(result.t.len(), 4);
        assert!((result.t[3] - 1e-3).abs() < 1e-12);
        assert_eq!(result.solver_info.n_timepoints, 4);
    }

    #[test]
    fn test_initial_condition_in_ground_state() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::default(),
            test_config(),
        )
        .unwrap();
        let result = sim.run(None, None).unwrap();

        let ground = result.population("Er3+:ground").unwrap();
        let excited = result.population("Er3+:excited").unwrap();
        assert_eq!(ground[0], 1e20);
        assert_eq!(excited[0], 0.0);
    }

    #[test]
    fn test_nonpositive_power_rejected_per_run() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::default(),
            test_config(),
        )
        .unwrap();
        assert!(matches!(
            sim.run_at_power(0.0, 1e-3, None, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_solver_info_populated() {
        let sim = Simulation::new(
            two_level_material(),
            PumpLaser::default(),
            test_config(),
        )
        .unwrap();
        let result = sim.run(None, None).unwrap();
        let info = &result.solver_info;

        assert_eq!(info.method, IntegrationMethod::Sdirk2);
        assert!(info.nfev > 0);
        assert!(info.njev > 0);
        assert!(info.nlu > 0);
        assert!(info.n_timepoints >= 2);
        assert_eq!(info.n_timepoints, result.t.len());
    }
}
