//! Rate-equation assembly and derivative evaluation.
//!
//! [`RateSystem`] flattens a [`Material`] into dense numeric structures
//! indexed by [`LevelHandle`] and evaluates the instantaneous rate of
//! change of all level populations. The governing equation per level is
//!
//! ```text
//! dN_i/dt = sum(processes populating i) - sum(processes depopulating i)
//! ```
//!
//! with four contribution families: single-ion decay (radiative plus
//! multiphonon), ground-state absorption, excited-state absorption, and
//! two-ion energy transfer (ETU and the cross-relaxation feedback loop
//! that drives photon avalanching).

use nalgebra::{DMatrix, DVector};

use crate::constants::photon_energy_joules;
use crate::error::{Error, Result};
use crate::level::LevelArena;
use crate::material::{Material, TransitionKind};

/// A two-ion process acting on four level populations.
///
/// The mean-field flux is `rate * N[from1] * N[from2]`; it depopulates
/// both `from` levels and populates both `to` levels. No adjustment is
/// made when endpoints coincide (see `two_ion_self_pair_double_counts`).
#[derive(Debug, Clone, Copy)]
pub struct TwoIonProcess {
    /// First ion's initial level.
    pub from1: usize,
    /// First ion's final level.
    pub to1: usize,
    /// Partner ion's initial level.
    pub from2: usize,
    /// Partner ion's final level.
    pub to2: usize,
    /// Rate constant (cm^3/s).
    pub rate: f64,
    /// ETU or CR.
    pub kind: TransitionKind,
}

/// The flattened rate-equation system for one material snapshot.
///
/// Construction is deterministic: transitions are registered in species
/// order, then declaration order. Decay rates on the same (from, to) pair
/// accumulate; GSA/ESA entries on the same source level overwrite
/// (last write wins); ETU/CR transitions without a partner pair are
/// dropped; migration transitions carry no numeric contribution.
#[derive(Debug, Clone)]
pub struct RateSystem {
    arena: LevelArena,
    pump_wavelength_nm: f64,
    /// decay[(i, j)] = total single-ion decay rate from level i to j (s^-1).
    decay: DMatrix<f64>,
    /// Per-level GSA entry: (destination, cross-section).
    gsa: Vec<Option<(usize, f64)>>,
    /// Per-level ESA entry: (destination, cross-section).
    esa: Vec<Option<(usize, f64)>>,
    two_ion: Vec<TwoIonProcess>,
    /// Bulk concentration per species (ions/cm^3).
    concentrations: Vec<f64>,
}

impl RateSystem {
    /// Build the system from a material snapshot and pump wavelength.
    pub fn new(material: &Material, pump_wavelength_nm: f64) -> Result<Self> {
        if pump_wavelength_nm <= 0.0 {
            return Err(Error::InvalidPump(format!(
                "pump wavelength must be positive, got {} nm",
                pump_wavelength_nm
            )));
        }

        let arena = LevelArena::from_material(material);
        let n = arena.len();

        let mut decay = DMatrix::zeros(n, n);
        let mut gsa: Vec<Option<(usize, f64)>> = vec![None; n];
        let mut esa: Vec<Option<(usize, f64)>> = vec![None; n];
        let mut two_ion = Vec::new();

        for (species_idx, species) in material.dopants.iter().enumerate() {
            let resolve = |local: usize| {
                arena.handle(species_idx, local).map(|h| h.index()).ok_or(
                    Error::InvalidLevelReference {
                        species: species.symbol.clone(),
                        level: local,
                    },
                )
            };

            for t in &species.transitions {
                if t.rate < 0.0 {
                    return Err(Error::NegativeRate {
                        species: species.symbol.clone(),
                        from: t.from_level,
                        to: t.to_level,
                        rate: t.rate,
                    });
                }

                let from = resolve(t.from_level)?;
                let to = resolve(t.to_level)?;

                match t.kind {
                    TransitionKind::Radiative | TransitionKind::NonRadiative => {
                        decay[(from, to)] += t.rate;
                    }
                    TransitionKind::Gsa => {
                        gsa[from] = Some((to, t.rate));
                    }
                    TransitionKind::Esa => {
                        esa[from] = Some((to, t.rate));
                    }
                    TransitionKind::Etu | TransitionKind::Cr => {
                        // Declared two-ion transitions without partner
                        // endpoints are dropped, not rejected.
                        if let (Some(pf), Some(pt)) = (t.partner_from, t.partner_to) {
                            two_ion.push(TwoIonProcess {
                                from1: from,
                                to1: to,
                                from2: resolve(pf)?,
                                to2: resolve(pt)?,
                                rate: t.rate,
                                kind: t.kind,
                            });
                        }
                    }
                    TransitionKind::Migration => {}
                }
            }
        }

        let concentrations = material.dopants.iter().map(|s| s.concentration).collect();

        Ok(Self {
            arena,
            pump_wavelength_nm,
            decay,
            gsa,
            esa,
            two_ion,
            concentrations,
        })
    }

    /// Total number of levels in the flattened system.
    pub fn num_levels(&self) -> usize {
        self.arena.len()
    }

    /// The underlying level arena.
    pub fn arena(&self) -> &LevelArena {
        &self.arena
    }

    /// Pump wavelength the system was built for (nm).
    pub fn pump_wavelength_nm(&self) -> f64 {
        self.pump_wavelength_nm
    }

    /// Display names of all levels, in handle order.
    pub fn level_names(&self) -> Vec<String> {
        self.arena.display_names()
    }

    /// Accumulated single-ion decay matrix (s^-1).
    pub fn decay_matrix(&self) -> &DMatrix<f64> {
        &self.decay
    }

    /// GSA entry for a source level.
    pub fn gsa_entry(&self, level: usize) -> Option<(usize, f64)> {
        self.gsa[level]
    }

    /// ESA entry for a source level.
    pub fn esa_entry(&self, level: usize) -> Option<(usize, f64)> {
        self.esa[level]
    }

    /// Registered two-ion processes.
    pub fn two_ion_processes(&self) -> &[TwoIonProcess] {
        &self.two_ion
    }

    /// Photon flux (photons/(cm^2*s)) at the pump wavelength for the
    /// given power density (W/cm^2). Linear in the power density.
    pub fn photon_flux(&self, power_density_w_cm2: f64) -> f64 {
        power_density_w_cm2 / photon_energy_joules(self.pump_wavelength_nm)
    }

    /// Initial population vector: the entire concentration of each
    /// species in its ground level, all other levels empty.
    pub fn initial_populations(&self) -> DVector<f64> {
        let mut n0 = DVector::zeros(self.arena.len());
        for species in 0..self.arena.num_species() {
            if let Some(ground) = self.arena.ground(species) {
                n0[ground.index()] = self.concentrations[species];
            }
        }
        n0
    }

    /// Evaluate dN/dt into `dn` for populations `n` and photon flux `flux`.
    ///
    /// All contributions are independent and additive; every term moves
    /// population within one species, so the per-species sum of `dn` is
    /// exactly zero.
    pub fn derivative(&self, n: &DVector<f64>, flux: f64, dn: &mut DVector<f64>) {
        dn.fill(0.0);
        let levels = self.arena.len();

        // Single-ion decay (radiative + non-radiative).
        for i in 0..levels {
            for j in 0..levels {
                let rate = self.decay[(i, j)];
                if rate > 0.0 {
                    let flow = rate * n[i];
                    dn[i] -= flow;
                    dn[j] += flow;
                }
            }
        }

        // Ground state absorption.
        for (i, entry) in self.gsa.iter().enumerate() {
            if let Some((j, sigma)) = entry {
                let flow = sigma * flux * n[i];
                dn[i] -= flow;
                dn[*j] += flow;
            }
        }

        // Excited state absorption.
        for (i, entry) in self.esa.iter().enumerate() {
            if let Some((j, sigma)) = entry {
                let flow = sigma * flux * n[i];
                dn[i] -= flow;
                dn[*j] += flow;
            }
        }

        // Two-ion processes; flux is the population product, with no
        // half-counting when endpoints coincide.
        for p in &self.two_ion {
            let flow = p.rate * n[p.from1] * n[p.from2];
            dn[p.from1] -= flow;
            dn[p.to1] += flow;
            dn[p.from2] -= flow;
            dn[p.to2] += flow;
        }
    }

    /// Convenience wrapper returning a fresh derivative vector.
    pub fn derivative_vec(&self, n: &DVector<f64>, flux: f64) -> DVector<f64> {
        let mut dn = DVector::zeros(self.arena.len());
        self.derivative(n, flux, &mut dn);
        dn
    }

    /// Evaluate the Jacobian d(dN/dt)/dN into `jac`.
    ///
    /// Hand-derived: the decay and absorption terms are linear in N, the
    /// two-ion terms follow the product rule. Used as the iteration
    /// matrix source by the implicit solver.
    pub fn jacobian(&self, n: &DVector<f64>, flux: f64, jac: &mut DMatrix<f64>) {
        jac.fill(0.0);
        let levels = self.arena.len();

        for i in 0..levels {
            for j in 0..levels {
                let rate = self.decay[(i, j)];
                if rate > 0.0 {
                    jac[(i, i)] -= rate;
                    jac[(j, i)] += rate;
                }
            }
        }

        for (i, entry) in self.gsa.iter().enumerate() {
            if let Some((j, sigma)) = entry {
                let r = sigma * flux;
                jac[(i, i)] -= r;
                jac[(*j, i)] += r;
            }
        }

        for (i, entry) in self.esa.iter().enumerate() {
            if let Some((j, sigma)) = entry {
                let r = sigma * flux;
                jac[(i, i)] -= r;
                jac[(*j, i)] += r;
            }
        }

        for p in &self.two_ion {
            let d1 = p.rate * n[p.from2]; // d(flow)/d(N[from1])
            let d2 = p.rate * n[p.from1]; // d(flow)/d(N[from2])

            jac[(p.from1, p.from1)] -= d1;
            jac[(p.from1, p.from2)] -= d2;
            jac[(p.to1, p.from1)] += d1;
            jac[(p.to1, p.from2)] += d2;
            jac[(p.from2, p.from1)] -= d1;
            jac[(p.from2, p.from2)] -= d2;
            jac[(p.to2, p.from1)] += d1;
            jac[(p.to2, p.from2)] += d2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Species, Transition};

    /// Minimal avalanche-capable species: ground, metastable, pumped,
    /// emitting level, with GSA, ESA and a CR feedback loop.
    fn pa_species() -> Species {
        let mut s = Species::new("Tm3+", 1.2e21);
        s.add_level("ground", 0.0, 13);
        s.add_level("meta", 5600.0, 9);
        s.add_level("pump", 12600.0, 9);
        s.add_level("emit", 21000.0, 9);

        s.add_transition(Transition::new(0, 2, TransitionKind::Gsa, 1e-22));
        s.add_transition(Transition::new(1, 3, TransitionKind::Esa, 5e-21));
        s.add_transition(Transition::new(3, 1, TransitionKind::Cr, 5e-16).with_partner(0, 1));
        s.add_transition(Transition::new(3, 0, TransitionKind::Radiative, 1e3));
        s.add_transition(Transition::new(2, 1, TransitionKind::NonRadiative, 1e5));
        s.add_transition(Transition::new(1, 0, TransitionKind::Radiative, 1e2));
        s
    }

    fn pa_material() -> Material {
        let mut m = Material::new("pa-test", "NaYF4");
        m.add_species(pa_species());
        m
    }

    #[test]
    fn test_decay_rates_accumulate() {
        let mut m = Material::new("acc", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("e", 1000.0, 1);
        s.add_transition(Transition::new(1, 0, TransitionKind::Radiative, 300.0));
        s.add_transition(Transition::new(1, 0, TransitionKind::NonRadiative, 700.0));
        m.add_species(s);

        let system = RateSystem::new(&m, 1064.0).unwrap();
        assert!((system.decay_matrix()[(1, 0)] - 1000.0).abs() < 1e-12);
    }

    #[test]
    fn test_absorption_last_write_wins() {
        let mut m = Material::new("lww", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("a", 1000.0, 1);
        s.add_level("b", 2000.0, 1);
        s.add_transition(Transition::new(0, 1, TransitionKind::Gsa, 1e-22));
        s.add_transition(Transition::new(0, 2, TransitionKind::Gsa, 3e-22));
        m.add_species(s);

        let system = RateSystem::new(&m, 1064.0).unwrap();
        let (to, sigma) = system.gsa_entry(0).unwrap();
        assert_eq!(to, 2);
        assert!((sigma - 3e-22).abs() < 1e-34);
    }

    #[test]
    fn test_partnerless_two_ion_dropped() {
        let mut m = Material::new("drop", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("e", 1000.0, 1);
        // CR declared without partner endpoints: silently excluded.
        s.add_transition(Transition::new(1, 0, TransitionKind::Cr, 1e-17));
        m.add_species(s);

        let system = RateSystem::new(&m, 1064.0).unwrap();
        assert!(system.two_ion_processes().is_empty());
    }

    #[test]
    fn test_migration_carries_no_numeric_contribution() {
        let mut m = Material::new("mig", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("e", 1000.0, 1);
        s.add_transition(Transition::new(1, 1, TransitionKind::Migration, 1e-17));
        m.add_species(s);

        let system = RateSystem::new(&m, 1064.0).unwrap();
        let n = system.initial_populations();
        let dn = system.derivative_vec(&n, 1e25);
        assert_eq!(dn.iter().filter(|v| **v != 0.0).count(), 0);
    }

    #[test]
    fn test_invalid_level_reference_rejected() {
        let mut m = Material::new("bad", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_transition(Transition::new(0, 7, TransitionKind::Radiative, 100.0));
        m.add_species(s);

        let err = RateSystem::new(&m, 1064.0).unwrap_err();
        assert!(matches!(err, Error::InvalidLevelReference { level: 7, .. }));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let mut m = Material::new("neg", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("e", 1000.0, 1);
        s.add_transition(Transition::new(1, 0, TransitionKind::Radiative, -5.0));
        m.add_species(s);

        assert!(matches!(
            RateSystem::new(&m, 1064.0),
            Err(Error::NegativeRate { .. })
        ));
    }

    #[test]
    fn test_nonpositive_wavelength_rejected() {
        let m = pa_material();
        assert!(matches!(
            RateSystem::new(&m, 0.0),
            Err(Error::InvalidPump(_))
        ));
        assert!(matches!(
            RateSystem::new(&m, -532.0),
            Err(Error::InvalidPump(_))
        ));
    }

    #[test]
    fn test_photon_flux_linear_in_power() {
        let system = RateSystem::new(&pa_material(), 1064.0).unwrap();
        let f1 = system.photon_flux(1e4);
        let f2 = system.photon_flux(2e4);
        assert!(
            ((f2 / f1) - 2.0).abs() < 1e-12,
            "flux(2P)/flux(P) = {} (expected 2)",
            f2 / f1
        );
    }

    #[test]
    fn test_initial_populations_in_ground_state() {
        let system = RateSystem::new(&pa_material(), 1064.0).unwrap();
        let n0 = system.initial_populations();

        assert!((n0[0] - 1.2e21).abs() < 1e9);
        for i in 1..n0.len() {
            assert_eq!(n0[i], 0.0, "level {} should start empty", i);
        }
    }

    #[test]
    fn test_derivative_conserves_species_population() {
        let system = RateSystem::new(&pa_material(), 1064.0).unwrap();
        let flux = system.photon_flux(5e4);

        // A scattered population exercises every term at once.
        let n = DVector::from_vec(vec![8e20, 3e20, 5e19, 5e19]);
        let dn = system.derivative_vec(&n, flux);

        let total: f64 = dn.iter().sum();
        let scale: f64 = n.iter().map(|v| v.abs()).sum();
        assert!(
            total.abs() < scale * 1e-15,
            "species population not conserved: sum(dN) = {:e}",
            total
        );
    }

    #[test]
    fn test_derivative_gsa_term() {
        let system = RateSystem::new(&pa_material(), 1064.0).unwrap();
        let n = DVector::from_vec(vec![1e21, 0.0, 0.0, 0.0]);
        let flux = 1e24;
        let dn = system.derivative_vec(&n, flux);

        // Only GSA is active: flow = sigma * flux * N0 = 1e-22 * 1e24 * 1e21.
        let expected = 1e-22 * flux * 1e21;
        assert!((dn[2] - expected).abs() < expected * 1e-12);
        assert!((dn[0] + expected).abs() < expected * 1e-12);
    }

    /// Pins the unadjusted mean-field product when a two-ion process has
    /// coincident endpoints (from1 == from2): the flow k*N1^2 is applied
    /// to each endpoint slot independently, so the shared level is
    /// drained twice per event. This behavior is intentional-as-found;
    /// do not "fix" it without revisiting the model.
    #[test]
    fn test_two_ion_self_pair_double_counts() {
        let mut m = Material::new("self-pair", "host");
        let mut s = Species::new("X", 1e20);
        s.add_level("g", 0.0, 1);
        s.add_level("m", 1000.0, 1);
        s.add_level("u", 2000.0, 1);
        // ETU with both ions starting in level 1: (1,2) with partner (1,0).
        s.add_transition(Transition::new(1, 2, TransitionKind::Etu, 1e-18).with_partner(1, 0));
        m.add_species(s);

        let system = RateSystem::new(&m, 1064.0).unwrap();
        let n = DVector::from_vec(vec![0.0, 2e20, 0.0]);
        let dn = system.derivative_vec(&n, 0.0);

        // flow = 1e-18 * (2e20)^2 = 4e22; level 1 loses it twice.
        assert_eq!(dn[1], -8e22);
        assert_eq!(dn[2], 4e22);
        assert_eq!(dn[0], 4e22);
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let system = RateSystem::new(&pa_material(), 1064.0).unwrap();
        let flux = system.photon_flux(1e5);
        let n = DVector::from_vec(vec![7e20, 4e20, 6e19, 4e19]);

        let levels = system.num_levels();
        let mut jac = DMatrix::zeros(levels, levels);
        system.jacobian(&n, flux, &mut jac);

        let eps = 1e12; // small against populations ~1e20
        let tol = jac.amax() * 1e-6;
        for j in 0..levels {
            let mut np = n.clone();
            let mut nm = n.clone();
            np[j] += eps;
            nm[j] -= eps;
            let fp = system.derivative_vec(&np, flux);
            let fm = system.derivative_vec(&nm, flux);
            for i in 0..levels {
                let fd = (fp[i] - fm[i]) / (2.0 * eps);
                assert!(
                    (jac[(i, j)] - fd).abs() < tol,
                    "J[{},{}] = {:e}, finite difference = {:e}",
                    i,
                    j,
                    jac[(i, j)],
                    fd
                );
            }
        }
    }
}
