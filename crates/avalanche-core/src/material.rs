//! Material definitions: energy levels, transitions, and dopant species.
//!
//! The hierarchy mirrors the physics: a [`Material`] contains dopant
//! [`Species`], each with an ordered list of [`EnergyLevel`]s connected by
//! [`Transition`]s. These types are plain data; persistence of material
//! libraries is the caller's concern (the serde derives are the schema).

use serde::{Deserialize, Serialize};

use crate::constants::{CM_INV_TO_EV, CM_INV_TO_J};

/// Physical process behind a transition between two energy levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Spontaneous emission (Einstein A coefficient, s^-1).
    Radiative,
    /// Multiphonon relaxation (s^-1).
    NonRadiative,
    /// Ground state absorption (cross-section, cm^2).
    Gsa,
    /// Excited state absorption (cross-section, cm^2).
    Esa,
    /// Energy transfer upconversion (cm^3/s, two-ion).
    Etu,
    /// Cross-relaxation (cm^3/s, two-ion) -- the avalanche feedback loop.
    Cr,
    /// Ion-to-ion energy migration (cm^3/s).
    Migration,
}

impl TransitionKind {
    /// Two-ion processes couple a pair of populations multiplicatively.
    pub fn is_two_ion(self) -> bool {
        matches!(self, TransitionKind::Etu | TransitionKind::Cr)
    }

    /// Pump-dependent processes scale with the photon flux.
    pub fn is_pump_dependent(self) -> bool {
        matches!(self, TransitionKind::Gsa | TransitionKind::Esa)
    }
}

/// A transition between two energy levels of one species.
///
/// The meaning of `rate` depends on `kind`: s^-1 for radiative and
/// non-radiative decay, a cm^2 cross-section for GSA/ESA (multiplied by
/// photon flux), and cm^3/s for ETU/CR (multiplied by the partner
/// population). The partner endpoints are only meaningful for two-ion
/// kinds and refer to levels of the same species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Index of the originating level.
    pub from_level: usize,
    /// Index of the destination level.
    pub to_level: usize,
    /// Physical process.
    pub kind: TransitionKind,
    /// Rate constant (units depend on `kind`).
    pub rate: f64,
    /// Partner ion's initial level (two-ion kinds only).
    pub partner_from: Option<usize>,
    /// Partner ion's final level (two-ion kinds only).
    pub partner_to: Option<usize>,
    /// Associated wavelength for absorption/emission lines.
    pub wavelength_nm: Option<f64>,
    /// Free-form literature reference or comment.
    pub notes: String,
}

impl Transition {
    /// Create a transition with no partner pair or wavelength.
    pub fn new(from_level: usize, to_level: usize, kind: TransitionKind, rate: f64) -> Self {
        Self {
            from_level,
            to_level,
            kind,
            rate,
            partner_from: None,
            partner_to: None,
            wavelength_nm: None,
            notes: String::new(),
        }
    }

    /// Set the partner endpoints for a two-ion process.
    pub fn with_partner(mut self, partner_from: usize, partner_to: usize) -> Self {
        self.partner_from = Some(partner_from);
        self.partner_to = Some(partner_to);
        self
    }

    /// Set the associated wavelength.
    pub fn with_wavelength(mut self, wavelength_nm: f64) -> Self {
        self.wavelength_nm = Some(wavelength_nm);
        self
    }

    /// Set a descriptive note.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// An energy level of a dopant ion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyLevel {
    /// Index within the owning species (0 = ground state).
    pub index: usize,
    /// Spectroscopic term symbol (e.g. "3H6", "3F4", "1G4").
    pub name: String,
    /// Energy above the ground state in wavenumbers (cm^-1).
    pub energy_cm_inv: f64,
    /// Degeneracy 2J + 1.
    pub degeneracy: u32,
}

impl EnergyLevel {
    /// Level energy in electron volts.
    pub fn energy_ev(&self) -> f64 {
        self.energy_cm_inv * CM_INV_TO_EV
    }

    /// Level energy in Joules.
    pub fn energy_joules(&self) -> f64 {
        self.energy_cm_inv * CM_INV_TO_J
    }
}

/// A dopant ion species: levels, transitions, and bulk concentration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    /// Chemical symbol with charge (e.g. "Tm3+", "Yb3+").
    pub symbol: String,
    /// Doping concentration in ions/cm^3.
    pub concentration: f64,
    /// Energy levels, ordered by index.
    pub levels: Vec<EnergyLevel>,
    /// All transitions involving this species.
    pub transitions: Vec<Transition>,
}

impl Species {
    /// Create a species with no levels or transitions yet.
    pub fn new(symbol: impl Into<String>, concentration: f64) -> Self {
        Self {
            symbol: symbol.into(),
            concentration,
            levels: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Number of energy levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Append a level; indices are assigned contiguously in creation order.
    /// Returns the new level's index.
    pub fn add_level(
        &mut self,
        name: impl Into<String>,
        energy_cm_inv: f64,
        degeneracy: u32,
    ) -> usize {
        let index = self.levels.len();
        self.levels.push(EnergyLevel {
            index,
            name: name.into(),
            energy_cm_inv,
            degeneracy,
        });
        index
    }

    /// Append a transition.
    pub fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    /// Find a level by its spectroscopic name.
    pub fn level_by_name(&self, name: &str) -> Option<&EnergyLevel> {
        self.levels.iter().find(|l| l.name == name)
    }

    /// All transitions originating from the given level.
    pub fn transitions_from(&self, level_index: usize) -> impl Iterator<Item = &Transition> {
        self.transitions
            .iter()
            .filter(move |t| t.from_level == level_index)
    }

    /// All transitions terminating at the given level.
    pub fn transitions_to(&self, level_index: usize) -> impl Iterator<Item = &Transition> {
        self.transitions
            .iter()
            .filter(move |t| t.to_level == level_index)
    }
}

/// A complete material: one or more dopant species plus host properties.
///
/// Consumed as a read-only snapshot by the rate-equation builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    /// Descriptive name (e.g. "8% Tm:NaYF4 nanoparticles").
    pub name: String,
    /// Chemical formula of the host matrix (e.g. "NaYF4").
    pub host_matrix: String,
    /// Dopant ion species.
    pub dopants: Vec<Species>,
    /// Maximum phonon energy of the host (cm^-1).
    pub phonon_energy_cm_inv: f64,
    /// Particle size for nanoparticles (nm).
    pub size_nm: Option<f64>,
    /// Temperature (K).
    pub temperature_k: f64,
    /// Free-form notes.
    pub notes: String,
}

impl Material {
    /// Create a material with fluoride-host defaults (350 cm^-1, 300 K).
    pub fn new(name: impl Into<String>, host_matrix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_matrix: host_matrix.into(),
            dopants: Vec::new(),
            phonon_energy_cm_inv: 350.0,
            size_nm: None,
            temperature_k: 300.0,
            notes: String::new(),
        }
    }

    /// Append a dopant species.
    pub fn add_species(&mut self, species: Species) {
        self.dopants.push(species);
    }

    /// Find a dopant by symbol.
    pub fn species(&self, symbol: &str) -> Option<&Species> {
        self.dopants.iter().find(|s| s.symbol == symbol)
    }

    /// Total number of energy levels across all dopants.
    pub fn total_levels(&self) -> usize {
        self.dopants.iter().map(|s| s.num_levels()).sum()
    }
}
