//! Stiff integration and sweep orchestration for Avalanche.
//!
//! This crate provides:
//! - Adaptive implicit ODE integration for stiff rate-equation systems
//! - Simulation orchestration (pump configuration, initial conditions,
//!   structured results with solver diagnostics)
//! - Input-ordered pump power sweeps with progress reporting

pub mod error;
pub mod ode;
pub mod simulation;
pub mod sweep;

pub use error::{Error, Result};
pub use ode::{
    IntegrationMethod, OdeOptions, OdeSolution, OdeStats, OdeSystem, integrate,
};
pub use simulation::{
    PumpLaser, Simulation, SimulationResult, SolverConfig, SolverInfo,
};
pub use sweep::ProgressFn;
