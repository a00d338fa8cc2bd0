//! # spexpol
//!
//! A **Mueller-matrix simulator and DoLP/AoLP retrieval engine** for
//! spectral-modulation polarimeters (SPEX, iSPEX, groundSPEX) written in Rust.
//!
//! A multi-order retarder between polarizers turns the degree and angle of
//! linear polarisation of the incoming light into a sinusoidal modulation of
//! the spectrum. `spexpol` simulates that instrument exactly with Mueller
//! calculus and inverts it again with a bounded least-squares fit.
//!
//! ## Features
//!
//! - **Stokes model**: validated Stokes vectors, DoP/DoLP/AoLP with a
//!   four-quadrant AoLP
//! - **Element library**: rotations, ideal and partial polarizers, retarders at
//!   one or many wavelengths, neutral-density filters
//! - **Instrument trains**: single- and dual-channel iSPEX trains with explicit
//!   configuration, plus lazy one-parameter perturbation sweeps
//! - **Retrieval**: bounded Levenberg-Marquardt fit of DoLP/AoLP with NaN
//!   sentinels for unfittable spectra, dual-channel merging, and windowed
//!   local demodulation
//! - **Tolerance analysis**: DoLP/AoLP error metrics, margins, and margin maps
//!   over Q/U source grids
//!
//! ## Example
//!
//! ```
//! use spexpol::{retrieve, stokes_spectrum, InstrumentConfig, RetrieveConfig};
//!
//! let wavelengths: Vec<f64> = (0..=1000).map(|k| 400.0 + 0.3 * k as f64).collect();
//! let flat = vec![1.0; wavelengths.len()];
//!
//! // 40 % linearly polarised along Q
//! let source = stokes_spectrum(&flat, 0.4, 0.0, 0.0).unwrap();
//! let measured = InstrumentConfig::default()
//!     .simulate_single(&wavelengths, &source)
//!     .unwrap()
//!     .intensity();
//!
//! let fit = retrieve(&wavelengths, &flat, &measured, &RetrieveConfig::default());
//! assert!((fit.dolp - 0.4).abs() < 1e-6);
//! assert!(fit.aolp_deg.abs() < 1e-4);
//! ```
//!
//! ## Conventions
//!
//! Wavelengths and retardances are in nanometres. Public AoLP values are in
//! degrees unless the name ends in `_rad`; the low-level phase kernels in
//! [`modulation`] take radians. Element angles follow the sandwich convention
//! `M(θ) = R(−θ)·M(0)·R(θ)` throughout.

pub mod error;
pub mod margin;
pub mod modulation;
pub mod optics;
pub mod retrieval;
pub mod stokes;

pub use error::{PolarisationError, Result};
pub use margin::{
    aolp_error, dolp_error, margin, MarginStudy, MarginTolerances, ToleranceSweep,
};
pub use optics::{
    propagate, propagate_train, ChannelMode, DualChannelSignal, InstrumentConfig,
    InstrumentParameter, MuellerOperator,
};
pub use retrieval::{
    correct_quadrature_aolp, merge_dual_channel, merge_dual_channel_with, retrieve,
    retrieve_many, retrieve_many_dual, InitialGuess, MergePrecedence, PolarisationSeries,
    RetrievalResult, RetrieveConfig,
};
pub use stokes::{
    angle_of_linear_polarisation, angle_of_linear_polarisation_deg, degree_of_linear_polarisation,
    degree_of_polarisation, stokes_spectrum, SpectralStokes, Stokes,
};

// Commonly used types
pub type Matrix4 = nalgebra::Matrix4<f64>;
pub type Vector4 = nalgebra::Vector4<f64>;
