//! Instrument optical trains (iSPEX-style single- and dual-channel modulators).
//!
//! Both trains share the same modulator: a quarter-wave plate followed by two
//! multi-order retarders. The single-channel instrument ends in one linear
//! polarizer; the dual-channel instrument splits the beam over two polarizers
//! at nominally orthogonal angles.
//!
//! ```text
//! source → QWP → MOR1 → MOR2 → POL                 (single channel, I)
//! source → QWP → MOR1 → MOR2 ┬→ POL0               (dual channel, I0)
//!                            └→ POL90              (dual channel, I90)
//! ```
//!
//! Every train is fully described by an [`InstrumentConfig`]. Tolerance
//! studies perturb one [`InstrumentParameter`] at a time through the lazy
//! [`SingleChannelSweep`] / [`DualChannelSweep`] iterators.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{ensure_len, PolarisationError, Result};
use crate::optics::elements::{linear_polarizer_deg, retarder_at_wavelengths, retarder_deg};
use crate::optics::{propagate, propagate_train, MuellerOperator};
use crate::stokes::SpectralStokes;

// ── Configuration ───────────────────────────────────────────────────────────

/// Nominal parameters of an iSPEX-style instrument train.
///
/// Retardances are in nanometres, angles in degrees. The defaults are the
/// reference physical configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    /// Quarter-wave plate retardance. Default 140 nm.
    pub qwp_retardance_nm: f64,
    /// Quarter-wave plate fast-axis angle. Default 0°.
    pub qwp_angle_deg: f64,
    /// If set, the quarter-wave plate is treated as achromatic: its phase
    /// retardance is evaluated at this design wavelength and applied
    /// unchanged at every wavelength. Default `None` (chromatic).
    pub qwp_achromatic_at_nm: Option<f64>,
    /// First multi-order retarder retardance. Default 2240 nm.
    pub mor1_retardance_nm: f64,
    /// First multi-order retarder fast-axis angle. Default −45°.
    pub mor1_angle_deg: f64,
    /// Second multi-order retarder retardance. Default 2240 nm.
    pub mor2_retardance_nm: f64,
    /// Second multi-order retarder fast-axis angle. Default −45°.
    pub mor2_angle_deg: f64,
    /// Single-channel polarizer angle. Default 0°.
    pub polarizer_angle_deg: f64,
    /// Dual-channel polarizer angle of the first channel. Default 0°.
    pub polarizer0_angle_deg: f64,
    /// Dual-channel polarizer angle of the second channel. Default 90°.
    pub polarizer90_angle_deg: f64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            qwp_retardance_nm: 140.0,
            qwp_angle_deg: 0.0,
            qwp_achromatic_at_nm: None,
            mor1_retardance_nm: 2240.0,
            mor1_angle_deg: -45.0,
            mor2_retardance_nm: 2240.0,
            mor2_angle_deg: -45.0,
            polarizer_angle_deg: 0.0,
            polarizer0_angle_deg: 0.0,
            polarizer90_angle_deg: 90.0,
        }
    }
}

/// The instrument parameters that can be perturbed in a tolerance sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentParameter {
    /// `QWP_d`: quarter-wave plate retardance (nm).
    QwpRetardance,
    /// `QWP_t`: quarter-wave plate angle (deg).
    QwpAngle,
    /// `MOR1_d`: first multi-order retarder retardance (nm).
    Mor1Retardance,
    /// `MOR1_t`: first multi-order retarder angle (deg).
    Mor1Angle,
    /// `MOR2_d`: second multi-order retarder retardance (nm).
    Mor2Retardance,
    /// `MOR2_t`: second multi-order retarder angle (deg).
    Mor2Angle,
    /// `POL_t`: single-channel polarizer angle (deg).
    PolarizerAngle,
    /// `POL0_t`: first dual-channel polarizer angle (deg).
    Polarizer0Angle,
    /// `POL90_t`: second dual-channel polarizer angle (deg).
    Polarizer90Angle,
}

impl InstrumentParameter {
    pub const ALL: [InstrumentParameter; 9] = [
        InstrumentParameter::QwpRetardance,
        InstrumentParameter::QwpAngle,
        InstrumentParameter::Mor1Retardance,
        InstrumentParameter::Mor1Angle,
        InstrumentParameter::Mor2Retardance,
        InstrumentParameter::Mor2Angle,
        InstrumentParameter::PolarizerAngle,
        InstrumentParameter::Polarizer0Angle,
        InstrumentParameter::Polarizer90Angle,
    ];

    /// Short name as used in tolerance reports, e.g. `"MOR1_t"`.
    pub fn name(&self) -> &'static str {
        match self {
            InstrumentParameter::QwpRetardance => "QWP_d",
            InstrumentParameter::QwpAngle => "QWP_t",
            InstrumentParameter::Mor1Retardance => "MOR1_d",
            InstrumentParameter::Mor1Angle => "MOR1_t",
            InstrumentParameter::Mor2Retardance => "MOR2_d",
            InstrumentParameter::Mor2Angle => "MOR2_t",
            InstrumentParameter::PolarizerAngle => "POL_t",
            InstrumentParameter::Polarizer0Angle => "POL0_t",
            InstrumentParameter::Polarizer90Angle => "POL90_t",
        }
    }

    /// Whether the parameter is an angle (degrees) rather than a retardance (nm).
    pub fn is_angle(&self) -> bool {
        !matches!(
            self,
            InstrumentParameter::QwpRetardance
                | InstrumentParameter::Mor1Retardance
                | InstrumentParameter::Mor2Retardance
        )
    }

    /// Current value of this parameter in `config`.
    pub fn value(&self, config: &InstrumentConfig) -> f64 {
        match self {
            InstrumentParameter::QwpRetardance => config.qwp_retardance_nm,
            InstrumentParameter::QwpAngle => config.qwp_angle_deg,
            InstrumentParameter::Mor1Retardance => config.mor1_retardance_nm,
            InstrumentParameter::Mor1Angle => config.mor1_angle_deg,
            InstrumentParameter::Mor2Retardance => config.mor2_retardance_nm,
            InstrumentParameter::Mor2Angle => config.mor2_angle_deg,
            InstrumentParameter::PolarizerAngle => config.polarizer_angle_deg,
            InstrumentParameter::Polarizer0Angle => config.polarizer0_angle_deg,
            InstrumentParameter::Polarizer90Angle => config.polarizer90_angle_deg,
        }
    }

    fn slot<'a>(&self, config: &'a mut InstrumentConfig) -> &'a mut f64 {
        match self {
            InstrumentParameter::QwpRetardance => &mut config.qwp_retardance_nm,
            InstrumentParameter::QwpAngle => &mut config.qwp_angle_deg,
            InstrumentParameter::Mor1Retardance => &mut config.mor1_retardance_nm,
            InstrumentParameter::Mor1Angle => &mut config.mor1_angle_deg,
            InstrumentParameter::Mor2Retardance => &mut config.mor2_retardance_nm,
            InstrumentParameter::Mor2Angle => &mut config.mor2_angle_deg,
            InstrumentParameter::PolarizerAngle => &mut config.polarizer_angle_deg,
            InstrumentParameter::Polarizer0Angle => &mut config.polarizer0_angle_deg,
            InstrumentParameter::Polarizer90Angle => &mut config.polarizer90_angle_deg,
        }
    }
}

impl fmt::Display for InstrumentParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentParameter {
    type Err = PolarisationError;

    fn from_str(s: &str) -> Result<Self> {
        InstrumentParameter::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PolarisationError::UnknownParameter(s.to_string()))
    }
}

/// Which detector channels an instrument has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    /// One polarizer, one intensity spectrum.
    #[default]
    Single,
    /// Two polarizers at nominally 0° and 90°.
    Dual,
}

/// Intensity spectra of the two channels of a dual-channel instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DualChannelSignal {
    /// Channel behind the polarizer at `polarizer0_angle_deg`.
    pub channel_0: Vec<f64>,
    /// Channel behind the polarizer at `polarizer90_angle_deg`.
    pub channel_90: Vec<f64>,
}

// ── Simulation ──────────────────────────────────────────────────────────────

impl InstrumentConfig {
    /// Copy of this configuration with `offset` added to one parameter.
    pub fn perturbed(&self, parameter: InstrumentParameter, offset: f64) -> Self {
        let mut config = self.clone();
        *parameter.slot(&mut config) += offset;
        config
    }

    /// Combined retardance of the two multi-order retarders, i.e. the
    /// retardance seen by the modulation model when both share one axis.
    pub fn modulator_retardance_nm(&self) -> f64 {
        self.mor1_retardance_nm + self.mor2_retardance_nm
    }

    /// The modulator elements in train order: QWP, MOR1, MOR2.
    pub fn modulator_elements(&self, wavelengths: &[f64]) -> [MuellerOperator; 3] {
        let qwp = match self.qwp_achromatic_at_nm {
            Some(design_nm) => MuellerOperator::Uniform(retarder_deg(
                2.0 * PI * self.qwp_retardance_nm / design_nm,
                self.qwp_angle_deg,
            )),
            None => MuellerOperator::Spectral(retarder_at_wavelengths(
                self.qwp_retardance_nm,
                self.qwp_angle_deg,
                wavelengths,
            )),
        };
        let mor1 =
            retarder_at_wavelengths(self.mor1_retardance_nm, self.mor1_angle_deg, wavelengths);
        let mor2 =
            retarder_at_wavelengths(self.mor2_retardance_nm, self.mor2_angle_deg, wavelengths);
        [qwp, mor1.into(), mor2.into()]
    }

    /// The whole modulator (QWP, MOR1, MOR2) as one operator.
    pub fn modulator(&self, wavelengths: &[f64]) -> Result<MuellerOperator> {
        let [qwp, mor1, mor2] = self.modulator_elements(wavelengths);
        qwp.then(&mor1)?.then(&mor2)
    }

    /// Simulate the single-channel instrument.
    ///
    /// Returns the full Stokes vector behind the polarizer; the detected
    /// signal is its [`intensity`](SpectralStokes::intensity).
    pub fn simulate_single(
        &self,
        wavelengths: &[f64],
        source: &SpectralStokes,
    ) -> Result<SpectralStokes> {
        ensure_len("source spectrum", wavelengths.len(), source.len())?;
        let polarizer = MuellerOperator::from(linear_polarizer_deg(self.polarizer_angle_deg));
        propagate_train(&[self.modulator(wavelengths)?, polarizer], source)
    }

    /// Simulate the dual-channel instrument, returning both channel intensities.
    pub fn simulate_dual(
        &self,
        wavelengths: &[f64],
        source: &SpectralStokes,
    ) -> Result<DualChannelSignal> {
        ensure_len("source spectrum", wavelengths.len(), source.len())?;
        let modulated = propagate(&self.modulator(wavelengths)?, source)?;
        let detect = |angle_deg: f64| {
            let polarizer = MuellerOperator::from(linear_polarizer_deg(angle_deg));
            propagate(&polarizer, &modulated).map(|s| s.intensity())
        };
        Ok(DualChannelSignal {
            channel_0: detect(self.polarizer0_angle_deg)?,
            channel_90: detect(self.polarizer90_angle_deg)?,
        })
    }

    /// Re-simulate the single-channel instrument once per offset of `parameter`.
    ///
    /// The returned iterator is lazy and yields one intensity spectrum per
    /// offset, in order, as a `Result` of the underlying simulation. It
    /// cannot be restarted; call again for a new sweep.
    pub fn sweep_single<'a>(
        &'a self,
        wavelengths: &'a [f64],
        source: &'a SpectralStokes,
        parameter: InstrumentParameter,
        offsets: &'a [f64],
    ) -> Result<SingleChannelSweep<'a>> {
        ensure_len("source spectrum", wavelengths.len(), source.len())?;
        Ok(SingleChannelSweep {
            config: self,
            wavelengths,
            source,
            parameter,
            offsets: offsets.iter(),
        })
    }

    /// Re-simulate the dual-channel instrument once per offset of `parameter`.
    ///
    /// See [`InstrumentConfig::sweep_single`].
    pub fn sweep_dual<'a>(
        &'a self,
        wavelengths: &'a [f64],
        source: &'a SpectralStokes,
        parameter: InstrumentParameter,
        offsets: &'a [f64],
    ) -> Result<DualChannelSweep<'a>> {
        ensure_len("source spectrum", wavelengths.len(), source.len())?;
        Ok(DualChannelSweep {
            config: self,
            wavelengths,
            source,
            parameter,
            offsets: offsets.iter(),
        })
    }
}

// ── Perturbation sweeps ─────────────────────────────────────────────────────

/// Lazy single-channel perturbation sweep; see [`InstrumentConfig::sweep_single`].
#[derive(Debug, Clone)]
pub struct SingleChannelSweep<'a> {
    config: &'a InstrumentConfig,
    wavelengths: &'a [f64],
    source: &'a SpectralStokes,
    parameter: InstrumentParameter,
    offsets: std::slice::Iter<'a, f64>,
}

impl Iterator for SingleChannelSweep<'_> {
    type Item = Result<Vec<f64>>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = *self.offsets.next()?;
        let config = self.config.perturbed(self.parameter, offset);
        Some(
            config
                .simulate_single(self.wavelengths, self.source)
                .map(|s| s.intensity()),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.offsets.size_hint()
    }
}

impl ExactSizeIterator for SingleChannelSweep<'_> {}

/// Lazy dual-channel perturbation sweep; see [`InstrumentConfig::sweep_dual`].
#[derive(Debug, Clone)]
pub struct DualChannelSweep<'a> {
    config: &'a InstrumentConfig,
    wavelengths: &'a [f64],
    source: &'a SpectralStokes,
    parameter: InstrumentParameter,
    offsets: std::slice::Iter<'a, f64>,
}

impl Iterator for DualChannelSweep<'_> {
    type Item = Result<DualChannelSignal>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = *self.offsets.next()?;
        let config = self.config.perturbed(self.parameter, offset);
        Some(config.simulate_dual(self.wavelengths, self.source))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.offsets.size_hint()
    }
}

impl ExactSizeIterator for DualChannelSweep<'_> {}
