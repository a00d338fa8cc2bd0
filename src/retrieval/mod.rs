//! Polarisation retrieval: invert a modulated spectrum into DoLP and AoLP.
//!
//! The measured single-channel spectrum is fitted with
//!
//! ```text
//! I(λ) = ½·ref(λ)·(1 + DoLP·cos(2π·R/λ + 2·AoLP))
//! ```
//!
//! by bounded non-linear least squares, DoLP ∈ [0, 1] and AoLP ∈ [−90°, 90°].
//! `ref` is the unpolarised reference spectrum. A fit that fails numerically
//! does not return an error: its [`RetrievalResult`] carries NaN DoLP/AoLP so
//! that a single bad spectrum never aborts a batch.
//!
//! # Dual-channel instruments
//!
//! The second channel of a dual-channel instrument sees the same modulation
//! shifted by half a period, i.e. its fit converges on `AoLP + 90°`.
//! [`correct_quadrature_aolp`] maps it back, and [`merge_dual_channel`]
//! combines both channels with a fixed zone heuristic: each channel is only
//! trusted exclusively where its own fitted AoLP is near the 0° starting
//! point of the fit.
//!
//! # Starting point
//!
//! The cost surface has a saddle for AoLP ≈ ±90° when started at 0°, so a
//! single-channel fit of a source polarised near ±90° generally collapses to
//! DoLP = 0. [`InitialGuess::Linearised`] avoids this by seeding the fit with
//! the exact linear least-squares solution in `(DoLP·cos 2A, DoLP·sin 2A)`.
//! A dual-channel instrument always has one channel near ±90° when the source
//! is near 0° or ±90°, so dual-channel retrieval is seeded this way by default
//! ([`RetrieveConfig::dual_initial_guess`]).

mod lm;
pub mod windowed;

pub use windowed::{demodulate_windowed, WindowFit, WindowedFitConfig};

use nalgebra::{Matrix2, Vector2};
use rayon::prelude::*;
use tracing::{debug, trace};

use lm::{fit_bounded, Bounds, CurveModel, StopCriteria};

use crate::modulation::phase;

/// Retrieved AoLP at or below this is wrapped by +180°.
const AOLP_WRAP_DEG: f64 = -89.9;
/// DoLP start value when the measured spectrum gives no amplitude estimate.
const NEUTRAL_DOLP: f64 = 0.5;

// ── Configuration ───────────────────────────────────────────────────────────

/// How the fit is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialGuess {
    /// DoLP from half the peak-to-peak of `2·I/ref`, AoLP 0°.
    #[default]
    Amplitude,
    /// DoLP and AoLP from the linear least-squares solution of the
    /// modulation model in its `(Q, U)` parametrisation.
    Linearised,
}

/// Which channel wins where both merge zones apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePrecedence {
    /// The near-±90° zone of the second channel overrides the first channel.
    #[default]
    ChannelB,
    /// The near-0° zone of the first channel overrides the second channel.
    ChannelA,
}

/// Configuration for [`retrieve`].
#[derive(Debug, Clone)]
pub struct RetrieveConfig {
    /// Modulator retardance, same unit as the wavelengths. Default 4480 nm.
    pub retardance_nm: f64,
    /// Starting point of single-channel fits. Default [`InitialGuess::Amplitude`].
    pub initial_guess: InitialGuess,
    /// Starting point of both channel fits in [`retrieve_many_dual`].
    /// Default [`InitialGuess::Linearised`].
    pub dual_initial_guess: InitialGuess,
    /// Overlap rule for dual-channel merging. Default [`MergePrecedence::ChannelB`].
    pub merge_precedence: MergePrecedence,
    /// Maximum Levenberg-Marquardt iterations. Default 200.
    pub max_iterations: u32,
    /// Relative cost-reduction tolerance. Default 1e-12.
    pub ftol: f64,
    /// Relative step tolerance. Default 1e-12.
    pub xtol: f64,
    /// Projected-gradient tolerance. Default 1e-12.
    pub gtol: f64,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            retardance_nm: 4480.0,
            initial_guess: InitialGuess::default(),
            dual_initial_guess: InitialGuess::Linearised,
            merge_precedence: MergePrecedence::default(),
            max_iterations: 200,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
        }
    }
}

impl RetrieveConfig {
    fn stop_criteria(&self) -> StopCriteria {
        StopCriteria {
            max_iterations: self.max_iterations,
            ftol: self.ftol,
            xtol: self.xtol,
            gtol: self.gtol,
        }
    }
}

// ── Results ─────────────────────────────────────────────────────────────────

/// Outcome of a single-spectrum retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalResult {
    /// Degree of linear polarisation, or NaN if no solution was found.
    pub dolp: f64,
    /// Angle of linear polarisation in degrees, in (−90°, 90°] up to the
    /// wrap tolerance, or NaN if no solution was found.
    pub aolp_deg: f64,
    /// Covariance of `(dolp, aolp_deg)`: `s²·(JᵀJ)⁻¹`, `s² = SSR/(m − 2)`.
    /// Infinite where a parameter is undetermined, NaN without a solution.
    pub covariance: Matrix2<f64>,
    /// Optimiser iterations used (0 without a solution).
    pub iterations: u32,
    /// Final sum of squared residuals.
    pub cost: f64,
}

impl RetrievalResult {
    /// The "no solution found" sentinel.
    pub fn no_solution() -> Self {
        Self {
            dolp: f64::NAN,
            aolp_deg: f64::NAN,
            covariance: Matrix2::repeat(f64::NAN),
            iterations: 0,
            cost: f64::NAN,
        }
    }

    /// `false` for the NaN sentinel.
    pub fn is_solution(&self) -> bool {
        !(self.dolp.is_nan() || self.aolp_deg.is_nan())
    }

    /// One-sigma DoLP uncertainty.
    pub fn dolp_sigma(&self) -> f64 {
        self.covariance[(0, 0)].sqrt()
    }

    /// One-sigma AoLP uncertainty in degrees.
    pub fn aolp_sigma_deg(&self) -> f64 {
        self.covariance[(1, 1)].sqrt()
    }
}

/// Parallel DoLP/AoLP sequences, one entry per retrieved spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolarisationSeries {
    pub dolp: Vec<f64>,
    pub aolp_deg: Vec<f64>,
}

impl PolarisationSeries {
    pub fn len(&self) -> usize {
        self.dolp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dolp.is_empty()
    }

    /// Number of entries that are the "no solution" sentinel.
    pub fn failures(&self) -> usize {
        self.dolp
            .iter()
            .zip(&self.aolp_deg)
            .filter(|(d, a)| d.is_nan() || a.is_nan())
            .count()
    }
}

impl FromIterator<RetrievalResult> for PolarisationSeries {
    fn from_iter<T: IntoIterator<Item = RetrievalResult>>(iter: T) -> Self {
        let (dolp, aolp_deg) = iter.into_iter().map(|r| (r.dolp, r.aolp_deg)).unzip();
        Self { dolp, aolp_deg }
    }
}

// ── Single-spectrum fit ─────────────────────────────────────────────────────

/// Single-channel modulation model, parameters `(DoLP, AoLP°)`.
struct ModulationFit<'a> {
    wavelengths: &'a [f64],
    reference: &'a [f64],
    measured: &'a [f64],
    retardance: f64,
}

impl CurveModel<2> for ModulationFit<'_> {
    fn len(&self) -> usize {
        self.measured.len()
    }

    #[inline]
    fn residual(&self, i: usize, p: &Vector2<f64>) -> (f64, Vector2<f64>) {
        let (dolp, aolp) = (p[0], p[1].to_radians());
        let half_ref = 0.5 * self.reference[i];
        let (s, c) = phase(self.wavelengths[i], aolp, self.retardance).sin_cos();
        let model = half_ref * (1.0 + dolp * c);
        // d/dAoLP° of cos(… + 2·AoLP) = −2·sin(…)·π/180
        let gradient = Vector2::new(half_ref * c, -half_ref * dolp * s * 2f64.to_radians());
        (model - self.measured[i], gradient)
    }
}

impl ModulationFit<'_> {
    /// DoLP from the peak-to-peak of the reference-normalised signal.
    fn amplitude_guess(&self) -> Vector2<f64> {
        let (lo, hi) = self
            .measured
            .iter()
            .zip(self.reference)
            .filter(|&(_, &r)| r != 0.0)
            .map(|(&m, &r)| 2.0 * m / r)
            .filter(|n| n.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), n| {
                (lo.min(n), hi.max(n))
            });
        let dolp = if lo <= hi {
            (0.5 * (hi - lo)).clamp(0.0, 1.0)
        } else {
            NEUTRAL_DOLP
        };
        Vector2::new(dolp, 0.0)
    }

    /// Linear least squares for `a = DoLP·cos 2A`, `b = DoLP·sin 2A`:
    /// `I − ½·ref = ½·ref·(a·cos δ − b·sin δ)`, `δ = 2π·R/λ`.
    fn linearised_guess(&self) -> Option<Vector2<f64>> {
        let mut ata = Matrix2::zeros();
        let mut atb = Vector2::zeros();
        for i in 0..self.measured.len() {
            let half_ref = 0.5 * self.reference[i];
            let (s, c) = phase(self.wavelengths[i], 0.0, self.retardance).sin_cos();
            let row = Vector2::new(half_ref * c, -half_ref * s);
            let y = self.measured[i] - half_ref;
            ata += row * row.transpose();
            atb += row * y;
        }
        let ab = ata.try_inverse()? * atb;
        if !(ab[0].is_finite() && ab[1].is_finite()) {
            return None;
        }
        let dolp = ab[0].hypot(ab[1]).clamp(0.0, 1.0);
        let aolp_deg = 0.5 * ab[1].atan2(ab[0]).to_degrees();
        Some(Vector2::new(dolp, aolp_deg))
    }
}

/// Fit DoLP and AoLP to one measured single-channel spectrum.
///
/// `reference` is the unpolarised (flat-field) intensity spectrum; pass a
/// slice of ones for normalised data. Wavelengths must be positive and share
/// the unit of `config.retardance_nm`.
///
/// Returns [`RetrievalResult::no_solution`] (NaN) if the fit fails or there
/// are fewer samples than free parameters.
///
/// # Panics
/// Panics if the three slices differ in length.
///
/// # Example
/// ```
/// use spexpol::{modulation::modulate_spectrum, retrieve, RetrieveConfig};
///
/// let wavelengths: Vec<f64> = (0..=1000).map(|k| 400.0 + 0.3 * k as f64).collect();
/// let reference = vec![1.0; wavelengths.len()];
/// let measured = modulate_spectrum(&wavelengths, &reference, 0.4, 25.0, 4480.0);
/// let fit = retrieve(&wavelengths, &reference, &measured, &RetrieveConfig::default());
/// assert!((fit.dolp - 0.4).abs() < 1e-6);
/// assert!((fit.aolp_deg - 25.0).abs() < 1e-4);
/// ```
pub fn retrieve(
    wavelengths: &[f64],
    reference: &[f64],
    measured: &[f64],
    config: &RetrieveConfig,
) -> RetrievalResult {
    assert_eq!(
        wavelengths.len(),
        measured.len(),
        "wavelengths and measured spectrum must have the same length"
    );
    assert_eq!(
        reference.len(),
        measured.len(),
        "reference and measured spectrum must have the same length"
    );

    if measured.len() < 2 {
        debug!("retrieve: {} samples, need at least 2", measured.len());
        return RetrievalResult::no_solution();
    }

    let model = ModulationFit {
        wavelengths,
        reference,
        measured,
        retardance: config.retardance_nm,
    };
    let initial = match config.initial_guess {
        InitialGuess::Amplitude => model.amplitude_guess(),
        InitialGuess::Linearised => model.linearised_guess().unwrap_or_else(|| {
            trace!("retrieve: linearised guess undetermined, using amplitude guess");
            model.amplitude_guess()
        }),
    };
    let bounds = Bounds {
        lower: Vector2::new(0.0, -90.0),
        upper: Vector2::new(1.0, 90.0),
    };

    match fit_bounded(&model, &initial, &bounds, &config.stop_criteria()) {
        Ok(fit) => {
            let mut aolp_deg = fit.params[1];
            if aolp_deg <= AOLP_WRAP_DEG {
                aolp_deg += 180.0;
            }
            RetrievalResult {
                dolp: fit.params[0],
                aolp_deg,
                covariance: fit.covariance,
                iterations: fit.iterations,
                cost: fit.cost,
            }
        }
        Err(failure) => {
            debug!(
                "retrieve: no solution ({}), start DoLP={:.3} AoLP={:.1}°",
                failure, initial[0], initial[1]
            );
            RetrievalResult::no_solution()
        }
    }
}

/// [`retrieve`] over a batch of measured spectra sharing one wavelength grid
/// and reference. Spectra are fitted in parallel; output order matches input.
///
/// # Panics
/// Panics if any spectrum's length differs from `wavelengths`.
pub fn retrieve_many<S>(
    wavelengths: &[f64],
    reference: &[f64],
    spectra: &[S],
    config: &RetrieveConfig,
) -> PolarisationSeries
where
    S: AsRef<[f64]> + Sync,
{
    let series: PolarisationSeries = spectra
        .par_iter()
        .map(|s| retrieve(wavelengths, reference, s.as_ref(), config))
        .collect::<Vec<_>>()
        .into_iter()
        .collect();
    let failures = series.failures();
    if failures > 0 {
        debug!(
            "retrieve_many: {} of {} spectra without solution",
            failures,
            series.len()
        );
    }
    series
}

// ── Dual channel ────────────────────────────────────────────────────────────

/// Map the second channel's fitted AoLP (offset by 90°) back into the frame
/// of the first channel: `(A + 90) mod 360`, minus 180 if above 90.
pub fn correct_quadrature_aolp(aolp_deg: f64) -> f64 {
    let a = (aolp_deg + 90.0).rem_euclid(360.0);
    if a > 90.0 {
        a - 180.0
    } else {
        a
    }
}

#[inline]
fn merge_sample(
    dolp_a: f64,
    dolp_b: f64,
    aolp_a: f64,
    aolp_b: f64,
    precedence: MergePrecedence,
) -> (f64, f64) {
    let near_zero = aolp_a > -5.0 && aolp_a < 5.0;
    let near_ninety = aolp_b > 85.0 || aolp_b < -85.0;
    let channel_a = (dolp_a, aolp_a);
    let channel_b = (dolp_b, aolp_b);
    match precedence {
        MergePrecedence::ChannelB if near_ninety => channel_b,
        MergePrecedence::ChannelA if near_zero => channel_a,
        _ if near_ninety => channel_b,
        _ if near_zero => channel_a,
        _ => (0.5 * (dolp_a + dolp_b), 0.5 * (aolp_a + aolp_b)),
    }
}

/// Merge the two channels of a dual-channel retrieval.
///
/// `aolp_b` must already be corrected with [`correct_quadrature_aolp`].
/// Per sample, the result is the plain average of both channels, except:
/// where channel A's AoLP lies in (−5°, 5°) channel A is used, and where
/// channel B's AoLP lies outside [−85°, 85°] channel B is used. Where both
/// apply, channel B wins; see [`merge_dual_channel_with`] to change that.
///
/// # Panics
/// Panics if the four slices differ in length.
pub fn merge_dual_channel(
    dolp_a: &[f64],
    dolp_b: &[f64],
    aolp_a: &[f64],
    aolp_b: &[f64],
) -> PolarisationSeries {
    merge_dual_channel_with(dolp_a, dolp_b, aolp_a, aolp_b, MergePrecedence::ChannelB)
}

/// [`merge_dual_channel`] with an explicit overlap rule.
pub fn merge_dual_channel_with(
    dolp_a: &[f64],
    dolp_b: &[f64],
    aolp_a: &[f64],
    aolp_b: &[f64],
    precedence: MergePrecedence,
) -> PolarisationSeries {
    let n = dolp_a.len();
    assert!(
        dolp_b.len() == n && aolp_a.len() == n && aolp_b.len() == n,
        "all channel arrays must have the same length"
    );
    let (dolp, aolp_deg) = (0..n)
        .map(|k| merge_sample(dolp_a[k], dolp_b[k], aolp_a[k], aolp_b[k], precedence))
        .unzip();
    PolarisationSeries { dolp, aolp_deg }
}

/// Retrieve both channels of a batch of dual-channel measurements, correct
/// the second channel's AoLP and merge them with `config.merge_precedence`.
///
/// Both channels are fitted from `config.dual_initial_guess`; the
/// single-channel `initial_guess` is not used here.
///
/// # Panics
/// Panics if the channel batches differ in length, or a spectrum's length
/// differs from `wavelengths`.
pub fn retrieve_many_dual<S>(
    wavelengths: &[f64],
    reference: &[f64],
    channel_a: &[S],
    channel_b: &[S],
    config: &RetrieveConfig,
) -> PolarisationSeries
where
    S: AsRef<[f64]> + Sync,
{
    assert_eq!(
        channel_a.len(),
        channel_b.len(),
        "both channels must hold the same number of spectra"
    );
    let config = RetrieveConfig {
        initial_guess: config.dual_initial_guess,
        ..config.clone()
    };
    let a = retrieve_many(wavelengths, reference, channel_a, &config);
    let b = retrieve_many(wavelengths, reference, channel_b, &config);
    let aolp_b: Vec<f64> = b.aolp_deg.iter().map(|&x| correct_quadrature_aolp(x)).collect();
    merge_dual_channel_with(
        &a.dolp,
        &b.dolp,
        &a.aolp_deg,
        &aolp_b,
        config.merge_precedence,
    )
}
