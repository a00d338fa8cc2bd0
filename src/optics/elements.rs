//! Mueller matrices of the individual optical elements.
//!
//! Every angled element is built from its 0°-aligned canonical form by the
//! sandwich conjugation in [`rotate_element`]:
//!
//! ```text
//! M(θ) = R(−θ) · M(0) · R(θ)
//! ```
//!
//! with `R(θ)` the Stokes-frame rotation of [`rotation`]. The same sign
//! convention is used for every element, so that for example
//! `rotate_element(&linear_polarizer(0.0), θ) == linear_polarizer(θ)`.

use std::f64::consts::PI;

use crate::Matrix4;

/// Stokes-frame rotation by `angle` radians.
///
/// ```text
/// ⎡1     0        0     0⎤
/// ⎢0   cos 2θ   sin 2θ  0⎥
/// ⎢0  −sin 2θ   cos 2θ  0⎥
/// ⎣0     0        0     1⎦
/// ```
pub fn rotation(angle: f64) -> Matrix4 {
    let (s, c) = (2.0 * angle).sin_cos();
    Matrix4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, c, s, 0.0, //
        0.0, -s, c, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// [`rotation`] with the angle in degrees.
pub fn rotation_deg(angle_deg: f64) -> Matrix4 {
    rotation(angle_deg.to_radians())
}

/// Rotate an element about the optical axis: `R(−θ) · M · R(θ)`.
pub fn rotate_element(element: &Matrix4, angle: f64) -> Matrix4 {
    rotation(-angle) * element * rotation(angle)
}

/// [`rotate_element`] with the angle in degrees.
pub fn rotate_element_deg(element: &Matrix4, angle_deg: f64) -> Matrix4 {
    rotate_element(element, angle_deg.to_radians())
}

/// Ideal linear polarizer with its transmission axis at 0°.
fn linear_polarizer_0() -> Matrix4 {
    0.5 * Matrix4::new(
        1.0, 1.0, 0.0, 0.0, //
        1.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 0.0,
    )
}

/// Ideal linear polarizer with its transmission axis at `angle` radians.
pub fn linear_polarizer(angle: f64) -> Matrix4 {
    rotate_element(&linear_polarizer_0(), angle)
}

/// [`linear_polarizer`] with the angle in degrees.
pub fn linear_polarizer_deg(angle_deg: f64) -> Matrix4 {
    linear_polarizer(angle_deg.to_radians())
}

/// Non-ideal (partial) linear polarizer.
///
/// `k_parallel` and `k_perpendicular` are the power transmission coefficients
/// along and across the transmission axis; the amplitude coefficients are
/// `p = sqrt(k)`. With `k_parallel = 1`, `k_perpendicular = 0` this is the
/// ideal [`linear_polarizer`].
pub fn linear_polarizer_general(k_parallel: f64, k_perpendicular: f64, angle: f64) -> Matrix4 {
    let px = k_parallel.sqrt();
    let py = k_perpendicular.sqrt();
    let sum = px * px + py * py;
    let diff = px * px - py * py;
    let cross = 2.0 * px * py;
    let canonical = 0.5
        * Matrix4::new(
            sum, diff, 0.0, 0.0, //
            diff, sum, 0.0, 0.0, //
            0.0, 0.0, cross, 0.0, //
            0.0, 0.0, 0.0, cross,
        );
    rotate_element(&canonical, angle)
}

/// [`linear_polarizer_general`] with the angle in degrees.
pub fn linear_polarizer_general_deg(
    k_parallel: f64,
    k_perpendicular: f64,
    angle_deg: f64,
) -> Matrix4 {
    linear_polarizer_general(k_parallel, k_perpendicular, angle_deg.to_radians())
}

/// Linear retarder with its fast axis at 0°.
#[inline]
fn retarder_0(retardance: f64) -> Matrix4 {
    let (s, c) = retardance.sin_cos();
    Matrix4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, c, -s, //
        0.0, 0.0, s, c,
    )
}

/// Linear retarder with phase retardance `retardance` (radians) and fast axis
/// at `angle` radians.
pub fn retarder(retardance: f64, angle: f64) -> Matrix4 {
    rotate_element(&retarder_0(retardance), angle)
}

/// [`retarder`] with the axis angle in degrees (retardance still in radians).
pub fn retarder_deg(retardance: f64, angle_deg: f64) -> Matrix4 {
    retarder(retardance, angle_deg.to_radians())
}

/// Retarder whose retardance is given in waves (1.0 = 2π) and angle in degrees.
pub fn retarder_waves(retardance_waves: f64, angle_deg: f64) -> Matrix4 {
    retarder_deg(2.0 * PI * retardance_waves, angle_deg)
}

/// Wavelength-dependent retarder: one Mueller matrix per wavelength.
///
/// The phase retardance at wavelength `λ` is `2π · retardance_nm / λ`, so
/// `retardance_nm` and `wavelengths` must share the same length unit.
/// Wavelengths must be strictly positive; this is not checked.
///
/// The frame rotation is computed once and applied to each per-wavelength
/// matrix, which is numerically identical to calling [`retarder`] per sample.
pub fn retarder_at_wavelengths(
    retardance_nm: f64,
    angle_deg: f64,
    wavelengths: &[f64],
) -> Vec<Matrix4> {
    let angle = angle_deg.to_radians();
    let r_minus = rotation(-angle);
    let r_plus = rotation(angle);
    wavelengths
        .iter()
        .map(|&wvl| r_minus * retarder_0(2.0 * PI * retardance_nm / wvl) * r_plus)
        .collect()
}

/// Neutral-density filter: `attenuation · I₄`.
pub fn filter(attenuation: f64) -> Matrix4 {
    attenuation * Matrix4::identity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector4;

    fn max_abs_diff(a: &Matrix4, b: &Matrix4) -> f64 {
        (a - b).abs().max()
    }

    #[test]
    fn test_rotation_inverse() {
        for deg in [-170.0, -45.0, 0.0, 12.5, 90.0, 133.0] {
            let prod = rotation_deg(deg) * rotation_deg(-deg);
            assert!(max_abs_diff(&prod, &Matrix4::identity()) < 1e-14);
        }
    }

    #[test]
    fn test_rotated_polarizer_matches_direct() {
        let p0 = linear_polarizer(0.0);
        for k in -36..=36 {
            let theta = (k as f64 * 5.0).to_radians();
            let a = rotate_element(&p0, theta);
            let b = linear_polarizer(theta);
            assert!(
                max_abs_diff(&a, &b) < 1e-14,
                "mismatch at {:.1} deg",
                theta.to_degrees()
            );
        }
    }

    #[test]
    fn test_polarizer_malus_law() {
        // Fully Q-polarised light through a polarizer at θ transmits cos²θ
        let s = Vector4::new(1.0, 1.0, 0.0, 0.0);
        for deg in [0.0, 30.0, 45.0, 60.0, 90.0] {
            let out = linear_polarizer_deg(deg) * s;
            let expected = deg.to_radians().cos().powi(2);
            assert!((out[0] - expected).abs() < 1e-14, "θ={deg}: {} vs {}", out[0], expected);
        }
    }

    #[test]
    fn test_polarizer_at_plus_and_minus_45() {
        let plus = linear_polarizer_deg(45.0) * Vector4::new(1.0, 0.0, 1.0, 0.0);
        let minus = linear_polarizer_deg(-45.0) * Vector4::new(1.0, 0.0, 1.0, 0.0);
        assert!((plus[0] - 1.0).abs() < 1e-14);
        assert!(minus[0].abs() < 1e-14);
    }

    #[test]
    fn test_general_polarizer_reduces_to_ideal() {
        for deg in [0.0, 17.0, -45.0, 90.0] {
            let a = linear_polarizer_general_deg(1.0, 0.0, deg);
            let b = linear_polarizer_deg(deg);
            assert!(max_abs_diff(&a, &b) < 1e-14);
        }
    }

    #[test]
    fn test_general_polarizer_unpolarised_transmission() {
        let m = linear_polarizer_general(0.9, 0.05, 0.3);
        let out = m * Vector4::new(1.0, 0.0, 0.0, 0.0);
        assert!((out[0] - 0.475).abs() < 1e-14);
    }

    #[test]
    fn test_half_wave_plate_flips_u() {
        let m = retarder(PI, 0.0);
        let out = m * Vector4::new(1.0, 0.2, 0.5, 0.1);
        assert!((out[1] - 0.2).abs() < 1e-14);
        assert!((out[2] + 0.5).abs() < 1e-14);
        assert!((out[3] + 0.1).abs() < 1e-14);
    }

    #[test]
    fn test_quarter_wave_converts_u_to_v() {
        let out = retarder(PI / 2.0, 0.0) * Vector4::new(1.0, 0.0, 1.0, 0.0);
        assert!(out[2].abs() < 1e-15);
        assert!((out[3] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_retarder_at_wavelengths_matches_scalar() {
        let wavelengths: Vec<f64> = (0..500).map(|k| 350.0 + k as f64 * 0.9).collect();
        let stack = retarder_at_wavelengths(2240.0, -45.0, &wavelengths);
        assert_eq!(stack.len(), wavelengths.len());
        for (m, &wvl) in stack.iter().zip(&wavelengths) {
            let direct = retarder_deg(2.0 * PI * 2240.0 / wvl, -45.0);
            assert!(max_abs_diff(m, &direct) < 1e-14, "mismatch at {wvl} nm");
        }
    }

    #[test]
    fn test_retarder_full_wave_periodicity() {
        let wvl = 532.0;
        for d in [140.0, 2240.0, 4480.0] {
            let a = retarder_at_wavelengths(d, 22.5, &[wvl]);
            let b = retarder_at_wavelengths(d + wvl, 22.5, &[wvl]);
            assert!(max_abs_diff(&a[0], &b[0]) < 1e-12);
        }
    }

    #[test]
    fn test_retarder_waves_matches_radians() {
        let a = retarder_waves(0.25, 30.0);
        let b = retarder(PI / 2.0, 30f64.to_radians());
        assert!(max_abs_diff(&a, &b) < 1e-15);
    }

    #[test]
    fn test_filter() {
        let out = filter(0.25) * Vector4::new(2.0, 1.0, -1.0, 0.5);
        assert_eq!(out, Vector4::new(0.5, 0.25, -0.25, 0.125));
    }
}
