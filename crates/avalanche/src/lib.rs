//! # Avalanche
//!
//! A rate-equation simulator for photon avalanching (PA) in multi-level
//! lanthanide-doped materials.
//!
//! Avalanche provides:
//! - A material model: energy levels, transitions (GSA/ESA, radiative
//!   and multiphonon decay, ETU/CR energy transfer), dopant species
//! - Assembly of the coupled, stiff rate-equation system over a flat
//!   level arena
//! - Adaptive implicit integration (SDIRK, backward Euler)
//! - Pump power sweeps with progress reporting
//! - PA parameter extraction: threshold, nonlinearity order (S), rise
//!   time, saturation and dynamic range
//!
//! ## Quick start
//!
//! ```rust
//! use avalanche::prelude::*;
//!
//! // A two-level test ion: ground-state absorption up, radiative decay down.
//! let mut species = Species::new("Er3+", 1e20);
//! species.add_level("ground", 0.0, 1);
//! species.add_level("excited", 10000.0, 1);
//! species.add_transition(Transition::new(0, 1, TransitionKind::Gsa, 1e-21));
//! species.add_transition(Transition::new(1, 0, TransitionKind::Radiative, 1e3));
//!
//! let mut material = Material::new("two-level", "NaYF4");
//! material.add_species(species);
//!
//! let laser = PumpLaser::new(1064.0, 1e4).unwrap();
//! let config = SolverConfig {
//!     t_end: 2e-3,
//!     rtol: 1e-6,
//!     atol: 1e6,
//!     ..Default::default()
//! };
//!
//! let sim = Simulation::new(material, laser, config).unwrap();
//! let result = sim.run(None, None).unwrap();
//!
//! let excited = result.population("Er3+:excited").unwrap();
//! assert!(excited.last().unwrap() > &0.0);
//! ```
//!
//! ## Power sweeps and extraction
//!
//! ```rust,ignore
//! let results = sim.run_power_sweep(&powers, Some(5e-2), None)?;
//! let params = analyze_power_sweep(&results, "Tm3+:emit", 1e3)?;
//! println!("{params}");
//! ```

// Re-export component crates
pub use avalanche_analysis as analysis;
pub use avalanche_core as core;
pub use avalanche_solver as solver;

// ============================================================================
// Convenient re-exports from avalanche_core
// ============================================================================

pub use avalanche_core::{
    // Errors
    Error as CoreError,
    // Level arena
    LevelArena,
    LevelHandle,
    // Material model
    EnergyLevel,
    Material,
    // Rate equations
    RateSystem,
    Species,
    Transition,
    TransitionKind,
    TwoIonProcess,
};

// ============================================================================
// Convenient re-exports from avalanche_solver
// ============================================================================

pub use avalanche_solver::{
    // Errors
    Error as SolverError,
    // Stiff integration
    IntegrationMethod,
    OdeOptions,
    OdeSolution,
    OdeSystem,
    // Simulation orchestration
    PumpLaser,
    Simulation,
    SimulationResult,
    SolverConfig,
    SolverInfo,
    integrate,
};

// ============================================================================
// Convenient re-exports from avalanche_analysis
// ============================================================================

pub use avalanche_analysis::{
    // Errors
    Error as AnalysisError,
    // Extraction
    NonlinearityEstimate,
    PaParameters,
    Region,
    RiseTimeMethod,
    ThresholdEstimate,
    ThresholdMethod,
    analyze_power_sweep,
    extract_nonlinearity,
    extract_rise_time,
    extract_threshold,
};

// ============================================================================
// Re-export commonly used external types
// ============================================================================

/// Re-export of nalgebra's dynamic vector type.
pub use nalgebra::DVector;

/// Re-export of nalgebra's dynamic matrix type.
pub use nalgebra::DMatrix;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module containing commonly used types and functions.
///
/// ```rust
/// use avalanche::prelude::*;
/// ```
pub mod prelude {
    // Material model
    pub use crate::{EnergyLevel, Material, Species, Transition, TransitionKind};

    // Rate equations
    pub use crate::{LevelArena, LevelHandle, RateSystem};

    // Simulation
    pub use crate::{
        IntegrationMethod, PumpLaser, Simulation, SimulationResult, SolverConfig,
    };

    // Extraction
    pub use crate::{
        PaParameters, Region, RiseTimeMethod, ThresholdMethod, analyze_power_sweep,
        extract_nonlinearity, extract_rise_time, extract_threshold,
    };

    // Common external types
    pub use crate::{DMatrix, DVector};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let mut species = Species::new("Tm3+", 1e21);
        species.add_level("ground", 0.0, 13);
        assert_eq!(species.num_levels(), 1);

        let _: IntegrationMethod = IntegrationMethod::default();
        let _: ThresholdMethod = ThresholdMethod::default();
    }

    #[test]
    fn test_component_crates_reachable() {
        let _ = crate::core::constants::H_PLANCK;
        let _ = crate::analysis::EMISSION_EPSILON;
        let _ = crate::solver::SolverConfig::default();
    }
}
