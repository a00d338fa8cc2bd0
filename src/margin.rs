//! Error and margin analysis of instrument tolerances.
//!
//! A tolerance study perturbs one [`InstrumentParameter`] over a range of
//! offsets, re-simulates the instrument for a known source, retrieves DoLP
//! and AoLP from every perturbed spectrum and compares them with the truth.
//! The *margin* is the smallest perturbation magnitude at which either error
//! leaves its tolerance.
//!
//! # Conventions
//!
//! * DoLP error is fractional: `retrieved / true − 1`. Only overestimates
//!   beyond the tolerance count, unless [`MarginTolerances::symmetric_dolp`]
//!   is set.
//! * AoLP error is the angular distance modulo 180°.
//! * If no offset exceeds a tolerance, the margin is the largest offset
//!   magnitude in the sweep, so margin arrays are always finite.
//! * A retrieval without solution (NaN) never counts as an exceedance.

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::optics::{ChannelMode, DualChannelSignal, InstrumentConfig, InstrumentParameter};
use crate::retrieval::{retrieve_many, retrieve_many_dual, PolarisationSeries, RetrieveConfig};
use crate::stokes::{SpectralStokes, Stokes};

/// Fractional DoLP error `retrieved/truth − 1`.
#[inline]
pub fn dolp_error(retrieved: f64, truth: f64) -> f64 {
    retrieved / truth - 1.0
}

/// AoLP error in degrees: the smallest of `|Δ|`, `|Δ + 180|`, `|Δ − 180|`.
#[inline]
pub fn aolp_error(retrieved_deg: f64, truth_deg: f64) -> f64 {
    let d = retrieved_deg - truth_deg;
    d.abs().min((d + 180.0).abs()).min((d - 180.0).abs())
}

/// Error tolerances defining the margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginTolerances {
    /// Fractional DoLP tolerance. Default 0.03 (3 %).
    pub dolp: f64,
    /// AoLP tolerance in degrees. Default 5°.
    pub aolp_deg: f64,
    /// Count DoLP underestimates as well, i.e. compare `|error|` instead of
    /// the signed error. Default `false`.
    pub symmetric_dolp: bool,
}

impl Default for MarginTolerances {
    fn default() -> Self {
        Self {
            dolp: 0.03,
            aolp_deg: 5.0,
            symmetric_dolp: false,
        }
    }
}

impl MarginTolerances {
    /// Whether an error pair lies outside the tolerances. NaN never does.
    #[inline]
    pub fn exceeded(&self, dolp_error: f64, aolp_error: f64) -> bool {
        let dolp_error = if self.symmetric_dolp {
            dolp_error.abs()
        } else {
            dolp_error
        };
        dolp_error > self.dolp || aolp_error.abs() > self.aolp_deg
    }
}

/// Smallest `|offset|` whose DoLP or AoLP error exceeds its tolerance, or the
/// largest `|offset|` if none does (0.0 for an empty sweep).
///
/// Errors need not be monotonic in the offset; every sample is checked.
///
/// # Panics
/// Panics if the three slices differ in length.
pub fn margin(
    offsets: &[f64],
    dolp_errors: &[f64],
    aolp_errors: &[f64],
    tolerances: &MarginTolerances,
) -> f64 {
    assert!(
        dolp_errors.len() == offsets.len() && aolp_errors.len() == offsets.len(),
        "offsets and error arrays must have the same length"
    );
    let first_exceeded = offsets
        .iter()
        .zip(dolp_errors.iter().zip(aolp_errors))
        .filter(|&(_, (&d, &a))| tolerances.exceeded(d, a))
        .map(|(o, _)| o.abs())
        .fold(f64::INFINITY, f64::min);
    if first_exceeded.is_finite() {
        first_exceeded
    } else {
        offsets.iter().map(|o| o.abs()).fold(0.0, f64::max)
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|k| if k == n - 1 { end } else { start + step * k as f64 })
                .collect()
        }
    }
}

// ── Sweeps ──────────────────────────────────────────────────────────────────

/// Retrieved values and errors of one perturbation sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ToleranceSweep {
    pub parameter: InstrumentParameter,
    pub offsets: Vec<f64>,
    pub retrieved: PolarisationSeries,
    pub dolp_error: Vec<f64>,
    pub aolp_error: Vec<f64>,
}

impl ToleranceSweep {
    pub fn margin(&self, tolerances: &MarginTolerances) -> f64 {
        margin(&self.offsets, &self.dolp_error, &self.aolp_error, tolerances)
    }
}

/// A tolerance study of one instrument over a fixed wavelength grid.
///
/// The simulated source has unit intensity at every wavelength and the
/// retrieval uses a flat reference of ones.
#[derive(Debug, Clone)]
pub struct MarginStudy {
    pub instrument: InstrumentConfig,
    pub wavelengths: Vec<f64>,
    /// Single channel (`POL`) or dual channel (`POL0`/`POL90`, merged).
    /// Default single.
    pub mode: ChannelMode,
    pub retrieve: RetrieveConfig,
    pub tolerances: MarginTolerances,
}

impl MarginStudy {
    pub fn new(instrument: InstrumentConfig, wavelengths: Vec<f64>) -> Self {
        Self {
            instrument,
            wavelengths,
            mode: ChannelMode::default(),
            retrieve: RetrieveConfig::default(),
            tolerances: MarginTolerances::default(),
        }
    }

    /// Simulate and retrieve once per offset of `parameter` for a source with
    /// the normalised polarisation of `source`.
    pub fn sweep(
        &self,
        source: &Stokes,
        parameter: InstrumentParameter,
        offsets: &[f64],
    ) -> Result<ToleranceSweep> {
        let n = self.wavelengths.len();
        let normalised = Stokes::new(
            1.0,
            source.q() / source.i(),
            source.u() / source.i(),
            source.v() / source.i(),
        )?;
        let spectrum = SpectralStokes::uniform(&normalised, n);
        let reference = vec![1.0; n];

        let retrieved = match self.mode {
            ChannelMode::Single => {
                let signals: Vec<Vec<f64>> = self
                    .instrument
                    .sweep_single(&self.wavelengths, &spectrum, parameter, offsets)?
                    .collect::<Result<_>>()?;
                retrieve_many(&self.wavelengths, &reference, &signals, &self.retrieve)
            }
            ChannelMode::Dual => {
                let (channel_0, channel_90): (Vec<Vec<f64>>, Vec<Vec<f64>>) = self
                    .instrument
                    .sweep_dual(&self.wavelengths, &spectrum, parameter, offsets)?
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .map(|DualChannelSignal { channel_0, channel_90 }| (channel_0, channel_90))
                    .unzip();
                retrieve_many_dual(
                    &self.wavelengths,
                    &reference,
                    &channel_0,
                    &channel_90,
                    &self.retrieve,
                )
            }
        };

        let (true_dolp, true_aolp) = (normalised.dolp(), normalised.aolp_deg());
        let dolp_error = retrieved.dolp.iter().map(|&d| dolp_error(d, true_dolp)).collect();
        let aolp_error = retrieved
            .aolp_deg
            .iter()
            .map(|&a| aolp_error(a, true_aolp))
            .collect();

        Ok(ToleranceSweep {
            parameter,
            offsets: offsets.to_vec(),
            retrieved,
            dolp_error,
            aolp_error,
        })
    }

    /// Margin of `parameter` for one source; see [`margin`].
    pub fn margin(
        &self,
        source: &Stokes,
        parameter: InstrumentParameter,
        offsets: &[f64],
    ) -> Result<f64> {
        let m = self.sweep(source, parameter, offsets)?.margin(&self.tolerances);
        debug!(
            "margin {}: {:.4} (DoLP={:.3}, AoLP={:.1}°)",
            parameter,
            m,
            source.dolp(),
            source.aolp_deg()
        );
        Ok(m)
    }

    /// Margin of `parameter` over a grid of normalised sources, rows indexed
    /// by `q_values` (Q/I) and columns by `u_values` (U/I), with V = 0.
    ///
    /// Cells outside `0 < Q² + U² ≤ 1` are NaN; every other cell is finite.
    pub fn margin_grid(
        &self,
        parameter: InstrumentParameter,
        offsets: &[f64],
        q_values: &[f64],
        u_values: &[f64],
    ) -> DMatrix<f64> {
        let (rows, cols) = (q_values.len(), u_values.len());
        debug!(
            "margin grid {}: {}×{} cells, {} offsets, {:?} channel",
            parameter,
            rows,
            cols,
            offsets.len(),
            self.mode
        );

        let cells: Vec<f64> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| {
                let (q, u) = (q_values[idx / cols], u_values[idx % cols]);
                let p2 = q * q + u * u;
                if !(p2 > 0.0 && p2 <= 1.0) {
                    return f64::NAN;
                }
                Stokes::new(1.0, q, u, 0.0)
                    .and_then(|source| self.sweep(&source, parameter, offsets))
                    .map(|sweep| sweep.margin(&self.tolerances))
                    .unwrap_or(f64::NAN)
            })
            .collect();

        DMatrix::from_row_slice(rows, cols, &cells)
    }
}
