//! Mueller-matrix optics: element library, propagation, and instrument trains.
//!
//! # Propagation model
//!
//! An element acts on a spectral Stokes vector wavelength bin by wavelength
//! bin; elements never mix wavelengths. A wavelength-independent element is a
//! single 4×4 matrix that is broadcast over every bin, a dispersive element
//! (e.g. a retarder) carries one matrix per bin:
//!
//! ```text
//! out[k] = M[k] · in[k]        (spectral)
//! out[k] = M    · in[k]        (uniform)
//! ```

pub mod elements;
pub mod train;

pub use elements::*;
pub use train::{
    ChannelMode, DualChannelSignal, DualChannelSweep, InstrumentConfig, InstrumentParameter,
    SingleChannelSweep,
};

use crate::error::{ensure_len, Result};
use crate::stokes::SpectralStokes;
use crate::Matrix4;

/// A Mueller operator over a wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub enum MuellerOperator {
    /// The same matrix at every wavelength.
    Uniform(Matrix4),
    /// One matrix per wavelength bin.
    Spectral(Vec<Matrix4>),
}

impl MuellerOperator {
    /// Number of wavelength bins, or `None` for a uniform operator.
    pub fn len(&self) -> Option<usize> {
        match self {
            MuellerOperator::Uniform(_) => None,
            MuellerOperator::Spectral(stack) => Some(stack.len()),
        }
    }

    /// The matrix acting on wavelength bin `idx`.
    ///
    /// # Panics
    /// Panics if the operator is spectral and `idx` is out of range.
    #[inline]
    pub fn matrix_at(&self, idx: usize) -> &Matrix4 {
        match self {
            MuellerOperator::Uniform(m) => m,
            MuellerOperator::Spectral(stack) => &stack[idx],
        }
    }

    /// The operator equivalent to applying `self` first and `next` second,
    /// i.e. `next · self` per wavelength bin.
    pub fn then(&self, next: &MuellerOperator) -> Result<MuellerOperator> {
        use MuellerOperator::*;
        Ok(match (self, next) {
            (Uniform(a), Uniform(b)) => Uniform(b * a),
            (Uniform(a), Spectral(bs)) => Spectral(bs.iter().map(|b| b * a).collect()),
            (Spectral(as_), Uniform(b)) => Spectral(as_.iter().map(|a| b * a).collect()),
            (Spectral(as_), Spectral(bs)) => {
                ensure_len("Mueller operator stack", as_.len(), bs.len())?;
                Spectral(as_.iter().zip(bs).map(|(a, b)| b * a).collect())
            }
        })
    }
}

impl From<Matrix4> for MuellerOperator {
    fn from(m: Matrix4) -> Self {
        MuellerOperator::Uniform(m)
    }
}

impl From<Vec<Matrix4>> for MuellerOperator {
    fn from(stack: Vec<Matrix4>) -> Self {
        MuellerOperator::Spectral(stack)
    }
}

/// Apply a Mueller operator to a spectral Stokes vector.
///
/// A spectral operator must have exactly one matrix per source wavelength.
pub fn propagate(operator: &MuellerOperator, source: &SpectralStokes) -> Result<SpectralStokes> {
    if let Some(n) = operator.len() {
        ensure_len("Mueller matrix stack", source.len(), n)?;
    }
    let out = source
        .iter()
        .enumerate()
        .map(|(k, s)| operator.matrix_at(k) * s)
        .collect();
    Ok(SpectralStokes::from_vectors(out))
}

/// Propagate a source through an ordered train of operators, first element first.
pub fn propagate_train(
    train: &[MuellerOperator],
    source: &SpectralStokes,
) -> Result<SpectralStokes> {
    train
        .iter()
        .try_fold(source.clone(), |state, element| propagate(element, &state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{stokes_spectrum, Vector4};

    fn source(n: usize) -> SpectralStokes {
        let intensity: Vec<f64> = (0..n).map(|k| 1.0 + 0.1 * k as f64).collect();
        stokes_spectrum(&intensity, 0.3, -0.2, 0.1).unwrap()
    }

    #[test]
    fn test_uniform_broadcast() {
        let src = source(4);
        let out = propagate(&filter(0.5).into(), &src).unwrap();
        for (a, b) in out.iter().zip(src.iter()) {
            assert_eq!(*a, *b * 0.5);
        }
    }

    #[test]
    fn test_spectral_per_bin() {
        let wavelengths = [400.0, 500.0, 600.0];
        let src = source(3);
        let stack = retarder_at_wavelengths(2240.0, 10.0, &wavelengths);
        let out = propagate(&stack.clone().into(), &src).unwrap();
        for k in 0..3 {
            assert_eq!(out.vectors()[k], stack[k] * src.vectors()[k]);
        }
    }

    #[test]
    fn test_stack_length_mismatch() {
        let stack = retarder_at_wavelengths(140.0, 0.0, &[400.0, 500.0]);
        assert!(propagate(&stack.into(), &source(3)).is_err());
    }

    #[test]
    fn test_then_matches_sequential_propagation() {
        let wavelengths = [450.0, 550.0, 650.0];
        let src = source(3);
        let first: MuellerOperator = retarder_at_wavelengths(140.0, 0.0, &wavelengths).into();
        let second: MuellerOperator = linear_polarizer_deg(30.0).into();

        let composed = first.then(&second).unwrap();
        let direct = propagate(&composed, &src).unwrap();
        let sequential = propagate_train(&[first, second], &src).unwrap();
        for (a, b) in direct.iter().zip(sequential.iter()) {
            assert!((a - b).abs().max() < 1e-14);
        }
    }

    #[test]
    fn test_empty_train_is_identity() {
        let src = source(2);
        let out = propagate_train(&[], &src).unwrap();
        assert_eq!(out, src);
        assert_eq!(out.vectors()[0], Vector4::new(1.0, 0.3, -0.2, 0.1));
    }
}
