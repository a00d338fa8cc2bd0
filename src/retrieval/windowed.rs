//! Local (windowed) demodulation of a normalised channel.
//!
//! Instead of one global DoLP/AoLP per spectrum, every wavelength gets its
//! own fit of
//!
//! ```text
//! offset + ½·DoLP·cos(2π·R/λ + 2·AoLP)
//! ```
//!
//! over the samples in `[λ − r/2, λ + r/2]`, where `r = λ²/R` is the local
//! modulation period ([`spectral_resolution`]). This resolves
//! wavelength-dependent polarisation at the polarimetric resolution of the
//! instrument. Here AoLP is in radians, bounded to `[0, 2π]`.

use nalgebra::Vector3;
use rayon::prelude::*;
use tracing::debug;

use super::lm::{fit_bounded, Bounds, CurveModel, StopCriteria};
use crate::modulation::{phase, spectral_resolution};

/// Configuration for [`demodulate_windowed`].
#[derive(Debug, Clone)]
pub struct WindowedFitConfig {
    /// Modulator retardance, same unit as the wavelengths. Default 4480 nm.
    pub retardance_nm: f64,
    /// Window width in units of the local spectral resolution `λ²/R`.
    /// Default 1.0.
    pub window_scale: f64,
    /// Windows with fewer samples are skipped (NaN). Default 4.
    pub min_samples: usize,
    /// Maximum optimiser iterations per window. Default 200.
    pub max_iterations: u32,
}

impl Default for WindowedFitConfig {
    fn default() -> Self {
        Self {
            retardance_nm: 4480.0,
            window_scale: 1.0,
            min_samples: 4,
            max_iterations: 200,
        }
    }
}

/// Local fit at one wavelength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowFit {
    pub dolp: f64,
    /// AoLP in radians, in `[0, 2π]`.
    pub aolp_rad: f64,
    pub offset: f64,
}

impl WindowFit {
    fn no_solution() -> Self {
        Self {
            dolp: f64::NAN,
            aolp_rad: f64::NAN,
            offset: f64::NAN,
        }
    }

    pub fn is_solution(&self) -> bool {
        !self.dolp.is_nan()
    }
}

struct OffsetModulationFit<'a> {
    wavelengths: &'a [f64],
    signal: &'a [f64],
    retardance: f64,
}

impl CurveModel<3> for OffsetModulationFit<'_> {
    fn len(&self) -> usize {
        self.signal.len()
    }

    #[inline]
    fn residual(&self, i: usize, p: &Vector3<f64>) -> (f64, Vector3<f64>) {
        let (s, c) = phase(self.wavelengths[i], p[1], self.retardance).sin_cos();
        let model = p[2] + 0.5 * p[0] * c;
        (model - self.signal[i], Vector3::new(0.5 * c, -p[0] * s, 1.0))
    }
}

/// Fit every wavelength of a normalised channel (e.g. `S+/I`) over its local
/// window. Wavelengths must be strictly increasing.
///
/// The result has one entry per wavelength; windows with too few samples or
/// a failed fit are NaN.
///
/// # Panics
/// Panics if `wavelengths` and `normalised` differ in length.
pub fn demodulate_windowed(
    wavelengths: &[f64],
    normalised: &[f64],
    config: &WindowedFitConfig,
) -> Vec<WindowFit> {
    assert_eq!(
        wavelengths.len(),
        normalised.len(),
        "wavelengths and signal must have the same length"
    );

    let initial = Vector3::new(0.1, 0.1, 0.5);
    let bounds = Bounds {
        lower: Vector3::new(0.0, 0.0, -1.0),
        upper: Vector3::new(1.0, std::f64::consts::TAU, 1.0),
    };
    let criteria = StopCriteria {
        max_iterations: config.max_iterations,
        ftol: 1e-12,
        xtol: 1e-12,
        gtol: 1e-12,
    };

    let fits: Vec<WindowFit> = wavelengths
        .par_iter()
        .map(|&centre| {
            let resolution = spectral_resolution(centre, config.retardance_nm);
            let half = 0.5 * config.window_scale * resolution;
            let start = wavelengths.partition_point(|&l| l < centre - half);
            let end = wavelengths.partition_point(|&l| l <= centre + half);
            if end - start < config.min_samples {
                return WindowFit::no_solution();
            }
            let model = OffsetModulationFit {
                wavelengths: &wavelengths[start..end],
                signal: &normalised[start..end],
                retardance: config.retardance_nm,
            };
            match fit_bounded(&model, &initial, &bounds, &criteria) {
                Ok(fit) => WindowFit {
                    dolp: fit.params[0],
                    aolp_rad: fit.params[1],
                    offset: fit.params[2],
                },
                Err(_) => WindowFit::no_solution(),
            }
        })
        .collect();

    let skipped = fits.iter().filter(|f| !f.is_solution()).count();
    debug!(
        "windowed demodulation: {} windows, {} without solution",
        fits.len(),
        skipped
    );
    fits
}
