//! Stokes vectors and the polarisation descriptors derived from them.
//!
//! A [`Stokes`] value is a single, validated `(I, Q, U, V)` state. A
//! [`SpectralStokes`] is an ordered sequence of Stokes vectors indexed by
//! wavelength, the form consumed and produced by the optical train.
//!
//! Derived quantities (DoLP, DoP, AoLP) are always computed, never stored.

use crate::error::{ensure_len, PolarisationError, Result};
use crate::Vector4;

/// Degree of polarisation `sqrt(Q² + U² + V²) / I`.
pub fn degree_of_polarisation(i: f64, q: f64, u: f64, v: f64) -> f64 {
    (q * q + u * u + v * v).sqrt() / i
}

/// Degree of linear polarisation `sqrt(Q² + U²) / I`.
///
/// The circular component is ignored; use [`degree_of_polarisation`] for the
/// full degree of polarisation.
pub fn degree_of_linear_polarisation(i: f64, q: f64, u: f64, _v: f64) -> f64 {
    degree_of_polarisation(i, q, u, 0.0)
}

/// Angle of linear polarisation in radians, `½·atan2(U, Q)`.
///
/// The four-quadrant arctangent keeps `U = +1` and `U = −1` apart (±45°);
/// the result lies in (−π/2, π/2].
pub fn angle_of_linear_polarisation(q: f64, u: f64) -> f64 {
    // −0.0 + 0.0 == +0.0, so U = −0 with Q < 0 gives +π/2
    0.5 * (u + 0.0).atan2(q)
}

/// Angle of linear polarisation in degrees, in (−90°, 90°].
pub fn angle_of_linear_polarisation_deg(q: f64, u: f64) -> f64 {
    angle_of_linear_polarisation(q, u).to_degrees()
}

/// A physically realisable Stokes vector.
///
/// Construction through [`Stokes::new`] enforces `I ≥ 0` and
/// `Q² + U² + V² ≤ I²`; the fields are read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stokes {
    i: f64,
    q: f64,
    u: f64,
    v: f64,
}

impl Stokes {
    /// Build a Stokes vector, failing if it is not physically realisable.
    pub fn new(i: f64, q: f64, u: f64, v: f64) -> Result<Self> {
        let finite = i.is_finite() && q.is_finite() && u.is_finite() && v.is_finite();
        if !finite || i < 0.0 || q * q + u * u + v * v > i * i {
            return Err(PolarisationError::UnphysicalStokes { i, q, u, v });
        }
        Ok(Self { i, q, u, v })
    }

    /// Unpolarised light of intensity `i`.
    pub fn unpolarised(i: f64) -> Result<Self> {
        Self::new(i, 0.0, 0.0, 0.0)
    }

    /// Build a Stokes vector from six polarimetric intensity measurements:
    /// `(I0 + I90, I0 − I90, I45 − I−45, I_LHC − I_RHC)`.
    ///
    /// The measurements are trusted; no realisability check is made.
    pub fn from_polarimetric_intensities(
        i0: f64,
        i90: f64,
        i45: f64,
        im45: f64,
        ilhc: f64,
        irhc: f64,
    ) -> Self {
        Self {
            i: i0 + i90,
            q: i0 - i90,
            u: i45 - im45,
            v: ilhc - irhc,
        }
    }

    /// Validate a raw 4-vector as a Stokes vector.
    pub fn from_vector(vec: &Vector4) -> Result<Self> {
        Self::new(vec[0], vec[1], vec[2], vec[3])
    }

    pub fn i(&self) -> f64 {
        self.i
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    pub fn u(&self) -> f64 {
        self.u
    }

    pub fn v(&self) -> f64 {
        self.v
    }

    /// The state as a column 4-vector `[I, Q, U, V]`.
    pub fn as_vector(&self) -> Vector4 {
        Vector4::new(self.i, self.q, self.u, self.v)
    }

    /// Degree of linear polarisation, in [0, 1].
    pub fn dolp(&self) -> f64 {
        degree_of_linear_polarisation(self.i, self.q, self.u, self.v)
    }

    /// Degree of (total) polarisation, in [0, 1].
    pub fn dop(&self) -> f64 {
        degree_of_polarisation(self.i, self.q, self.u, self.v)
    }

    /// Angle of linear polarisation in radians.
    pub fn aolp_rad(&self) -> f64 {
        angle_of_linear_polarisation(self.q, self.u)
    }

    /// Angle of linear polarisation in degrees.
    pub fn aolp_deg(&self) -> f64 {
        angle_of_linear_polarisation_deg(self.q, self.u)
    }
}

/// A per-wavelength Stokes parameter: either one value for every wavelength or
/// one value per wavelength.
#[derive(Debug, Clone, Copy)]
pub enum Component<'a> {
    Scalar(f64),
    Spectral(&'a [f64]),
}

impl Component<'_> {
    fn at(&self, idx: usize) -> f64 {
        match self {
            Component::Scalar(x) => *x,
            Component::Spectral(xs) => xs[idx],
        }
    }

    fn check_len(&self, what: &'static str, n: usize) -> Result<()> {
        match self {
            Component::Scalar(_) => Ok(()),
            Component::Spectral(xs) => ensure_len(what, n, xs.len()),
        }
    }
}

impl From<f64> for Component<'_> {
    fn from(x: f64) -> Self {
        Component::Scalar(x)
    }
}

impl<'a> From<&'a [f64]> for Component<'a> {
    fn from(xs: &'a [f64]) -> Self {
        Component::Spectral(xs)
    }
}

impl<'a> From<&'a Vec<f64>> for Component<'a> {
    fn from(xs: &'a Vec<f64>) -> Self {
        Component::Spectral(xs.as_slice())
    }
}

/// Stokes vectors sampled on a wavelength grid (shape: wavelength × 4).
///
/// No realisability check is made on the individual vectors; this is the
/// performance path used by simulations and optical propagation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectralStokes {
    vectors: Vec<Vector4>,
}

impl SpectralStokes {
    pub fn from_vectors(vectors: Vec<Vector4>) -> Self {
        Self { vectors }
    }

    /// The same Stokes state repeated on `n` wavelength samples.
    pub fn uniform(stokes: &Stokes, n: usize) -> Self {
        Self {
            vectors: vec![stokes.as_vector(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[Vector4] {
        &self.vectors
    }

    pub fn into_vectors(self) -> Vec<Vector4> {
        self.vectors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vector4> {
        self.vectors.iter()
    }

    /// One Stokes parameter (0 = I, 1 = Q, 2 = U, 3 = V) across all wavelengths.
    ///
    /// # Panics
    /// Panics if `index > 3`.
    pub fn component(&self, index: usize) -> Vec<f64> {
        assert!(index < 4, "Stokes component index must be in 0..4");
        self.vectors.iter().map(|s| s[index]).collect()
    }

    /// Stokes I across all wavelengths, i.e. the detected intensity.
    pub fn intensity(&self) -> Vec<f64> {
        self.component(0)
    }
}

/// Build a spectral Stokes vector from an intensity spectrum, broadcasting
/// scalar or per-wavelength Q, U and V across all samples.
///
/// ```
/// use spexpol::stokes_spectrum;
///
/// let intensity = vec![1.0; 3];
/// let u = [0.1, 0.2, 0.3];
/// let spectrum = stokes_spectrum(&intensity, 0.5, &u[..], 0.0).unwrap();
/// assert_eq!(spectrum.len(), 3);
/// assert_eq!(spectrum.vectors()[2][2], 0.3);
/// ```
pub fn stokes_spectrum<'a>(
    intensity: &[f64],
    q: impl Into<Component<'a>>,
    u: impl Into<Component<'a>>,
    v: impl Into<Component<'a>>,
) -> Result<SpectralStokes> {
    let n = intensity.len();
    let (q, u, v) = (q.into(), u.into(), v.into());
    q.check_len("Stokes Q spectrum", n)?;
    u.check_len("Stokes U spectrum", n)?;
    v.check_len("Stokes V spectrum", n)?;

    let vectors = intensity
        .iter()
        .enumerate()
        .map(|(k, &i)| Vector4::new(i, q.at(k), u.at(k), v.at(k)))
        .collect();
    Ok(SpectralStokes { vectors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unphysical_state() {
        let err = Stokes::new(1.0, 0.8, 0.8, 0.0).unwrap_err();
        assert!(matches!(err, PolarisationError::UnphysicalStokes { .. }));
        assert!(Stokes::new(-1.0, 0.0, 0.0, 0.0).is_err());
        assert!(Stokes::new(1.0, f64::NAN, 0.0, 0.0).is_err());
        // Fully polarised light sits exactly on the boundary
        assert!(Stokes::new(1.0, 0.6, 0.8, 0.0).is_ok());
    }

    #[test]
    fn test_dolp_matches_definition() {
        for &(i, q, u, v) in &[
            (1.0, 0.3, -0.4, 0.1),
            (2.0, -1.2, 0.5, 0.9),
            (0.5, 0.0, 0.0, 0.5),
            (3.0, 3.0, 0.0, 0.0),
        ] {
            let s = Stokes::new(i, q, u, v).unwrap();
            let expected = (q * q + u * u).sqrt() / i;
            assert!((s.dolp() - expected).abs() < 1e-15);
            assert!((0.0..=1.0).contains(&s.dolp()), "DoLP {} out of range", s.dolp());
            assert!(s.dop() >= s.dolp());
        }
    }

    #[test]
    fn test_dop_includes_circular() {
        let s = Stokes::new(1.0, 0.0, 0.0, 0.5).unwrap();
        assert_eq!(s.dolp(), 0.0);
        assert!((s.dop() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_aolp_uses_four_quadrant_arctangent() {
        assert!((angle_of_linear_polarisation_deg(0.0, 1.0) - 45.0).abs() < 1e-12);
        assert!((angle_of_linear_polarisation_deg(0.0, -1.0) + 45.0).abs() < 1e-12);
        // Q < 0: a plain atan(U/Q) would land in the wrong half-plane
        assert!((angle_of_linear_polarisation_deg(-1.0, 0.0) - 90.0).abs() < 1e-12);
        assert!((angle_of_linear_polarisation_deg(-0.5, 0.5) - 67.5).abs() < 1e-12);
        assert!((angle_of_linear_polarisation_deg(-0.5, -0.5) + 67.5).abs() < 1e-12);
    }

    #[test]
    fn test_aolp_negative_zero_u_stays_in_range() {
        assert_eq!(angle_of_linear_polarisation_deg(-0.5, -0.0), 90.0);
        assert_eq!(angle_of_linear_polarisation_deg(-0.5, 0.0), 90.0);
        let s = Stokes::new(1.0, -0.3, -0.0, 0.0).unwrap();
        assert_eq!(s.aolp_deg(), 90.0);
        assert_eq!(angle_of_linear_polarisation_deg(0.5, -0.0), 0.0);
    }

    #[test]
    fn test_from_polarimetric_intensities() {
        let s = Stokes::from_polarimetric_intensities(0.7, 0.3, 0.6, 0.4, 0.55, 0.45);
        assert!((s.i() - 1.0).abs() < 1e-15);
        assert!((s.q() - 0.4).abs() < 1e-15);
        assert!((s.u() - 0.2).abs() < 1e-15);
        assert!((s.v() - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_spectrum_broadcasts_scalars() {
        let intensity = [1.0, 2.0, 3.0, 4.0];
        let v = vec![0.0, 0.1, 0.2, 0.3];
        let spectrum = stokes_spectrum(&intensity, 0.25, -0.5, &v).unwrap();
        assert_eq!(spectrum.len(), 4);
        assert_eq!(spectrum.intensity(), intensity.to_vec());
        assert_eq!(spectrum.component(1), vec![0.25; 4]);
        assert_eq!(spectrum.component(2), vec![-0.5; 4]);
        assert_eq!(spectrum.component(3), v);
    }

    #[test]
    fn test_spectrum_length_mismatch() {
        let intensity = [1.0, 1.0, 1.0];
        let q = [0.1, 0.2];
        let err = stokes_spectrum(&intensity, &q[..], 0.0, 0.0).unwrap_err();
        assert_eq!(
            err,
            PolarisationError::LengthMismatch {
                what: "Stokes Q spectrum",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_uniform_spectrum() {
        let s = Stokes::new(1.0, 0.2, 0.1, 0.0).unwrap();
        let spectrum = SpectralStokes::uniform(&s, 5);
        assert_eq!(spectrum.len(), 5);
        assert!(spectrum.iter().all(|x| *x == s.as_vector()));
    }
}
