//! Closed-form modulation model of a retarder-between-polarizers spectropolarimeter.
//!
//! A multi-order retarder of retardance `R` between (effectively) crossed
//! polarizers modulates the transmitted spectrum with a phase
//!
//! ```text
//! ψ(λ) = 2π·R/λ + 2·AoLP
//! ```
//!
//! so that the two channels of a dual-channel instrument read
//!
//! ```text
//! S±(λ) = ½·I(λ)·(1 ± DoLP·cos ψ(λ))
//! ```
//!
//! The DoLP sets the modulation amplitude and the AoLP its phase. These
//! functions are the fit targets of the retrieval module. All angles are in
//! radians; `R` and `λ` must share the same length unit.

/// Modulation phase `2π·R/λ + 2·AoLP`.
#[inline]
pub fn phase(wavelength: f64, aolp: f64, retardance: f64) -> f64 {
    2.0 * std::f64::consts::PI * retardance / wavelength + 2.0 * aolp
}

/// Intensity behind the modulator in the `+` channel:
/// `½·I·(1 + DoLP·cos ψ)`.
#[inline]
pub fn modulated_intensity(
    wavelength: f64,
    intensity: f64,
    dolp: f64,
    aolp: f64,
    retardance: f64,
) -> f64 {
    0.5 * intensity * (1.0 + dolp * phase(wavelength, aolp, retardance).cos())
}

/// Both channels `(S+, S−)` of a dual-channel spectropolarimeter.
#[inline]
pub fn dual_channel_modulation(
    wavelength: f64,
    intensity: f64,
    dolp: f64,
    aolp: f64,
    retardance: f64,
) -> (f64, f64) {
    let m = dolp * phase(wavelength, aolp, retardance).cos();
    (0.5 * intensity * (1.0 + m), 0.5 * intensity * (1.0 - m))
}

/// Normalised modulation `(S+ − S−)/(S+ + S−) = DoLP·cos ψ`.
#[inline]
pub fn modulation_normalised(wavelength: f64, dolp: f64, aolp: f64, retardance: f64) -> f64 {
    dolp * phase(wavelength, aolp, retardance).cos()
}

/// Fit variant of the normalised single-channel signal with a free offset
/// and a fixed retardance: `offset + ½·DoLP·cos ψ`.
#[inline]
pub fn modulation_to_fit(
    wavelength: f64,
    dolp: f64,
    aolp: f64,
    offset: f64,
    retardance: f64,
) -> f64 {
    offset + 0.5 * dolp * phase(wavelength, aolp, retardance).cos()
}

/// Polarimetric spectral resolution `λ²/R`: the local modulation period,
/// in the unit of `wavelength`.
#[inline]
pub fn spectral_resolution(wavelength: f64, retardance: f64) -> f64 {
    wavelength * wavelength / retardance
}

/// Measured modulation fraction `(S+ − S−)/(S+ + S−)`.
#[inline]
pub fn modulation_fraction(s_plus: f64, s_minus: f64) -> f64 {
    (s_plus - s_minus) / (s_plus + s_minus)
}

/// Evaluate [`modulated_intensity`] over a spectrum, with the AoLP in degrees.
///
/// # Panics
/// Panics if `wavelengths` and `intensity` differ in length.
pub fn modulate_spectrum(
    wavelengths: &[f64],
    intensity: &[f64],
    dolp: f64,
    aolp_deg: f64,
    retardance: f64,
) -> Vec<f64> {
    assert_eq!(
        wavelengths.len(),
        intensity.len(),
        "wavelengths and intensity must have the same length"
    );
    let aolp = aolp_deg.to_radians();
    wavelengths
        .iter()
        .zip(intensity)
        .map(|(&l, &i)| modulated_intensity(l, i, dolp, aolp, retardance))
        .collect()
}

/// Split a measured channel pair into the total intensity and the two
/// normalised channels: `(I, S+/I, S−/I)` with `I = S+ + S−`.
///
/// # Panics
/// Panics if the channels differ in length.
pub fn normalise_channels(s_plus: &[f64], s_minus: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    assert_eq!(
        s_plus.len(),
        s_minus.len(),
        "both channels must have the same length"
    );
    let mut intensity = Vec::with_capacity(s_plus.len());
    let mut plus = Vec::with_capacity(s_plus.len());
    let mut minus = Vec::with_capacity(s_plus.len());
    for (&p, &m) in s_plus.iter().zip(s_minus) {
        let total = p + m;
        intensity.push(total);
        plus.push(p / total);
        minus.push(m / total);
    }
    (intensity, plus, minus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_phase() {
        assert!((phase(500.0, 0.0, 1000.0) - 4.0 * PI).abs() < 1e-12);
        assert!((phase(500.0, PI / 4.0, 1000.0) - 4.5 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_channels_sum_to_intensity() {
        for k in 0..50 {
            let l = 400.0 + 7.0 * k as f64;
            let (p, m) = dual_channel_modulation(l, 2.0, 0.4, 0.3, 4480.0);
            assert!((p + m - 2.0).abs() < 1e-14);
            assert!((p - modulated_intensity(l, 2.0, 0.4, 0.3, 4480.0)).abs() < 1e-15);
            let frac = modulation_fraction(p, m);
            assert!((frac - modulation_normalised(l, 0.4, 0.3, 4480.0)).abs() < 1e-14);
        }
    }

    #[test]
    fn test_second_channel_is_quadrature_shift() {
        // S− equals S+ with the AoLP rotated by 90°
        let (_, m) = dual_channel_modulation(612.0, 1.0, 0.5, 0.2, 4480.0);
        let shifted = modulated_intensity(612.0, 1.0, 0.5, 0.2 + PI / 2.0, 4480.0);
        assert!((m - shifted).abs() < 1e-14);
    }

    #[test]
    fn test_fit_variant() {
        let v = modulation_to_fit(550.0, 0.6, 0.0, 0.5, 4400.0);
        // 4400/550 = 8 full waves, cos ψ = 1
        assert!((v - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_spectral_resolution() {
        assert!((spectral_resolution(600.0, 4480.0) - 80.357_142_857).abs() < 1e-6);
    }

    #[test]
    fn test_unpolarised_is_flat() {
        let wvl: Vec<f64> = (0..100).map(|k| 450.0 + k as f64).collect();
        let flat = vec![1.0; wvl.len()];
        let out = modulate_spectrum(&wvl, &flat, 0.0, 33.0, 4480.0);
        assert!(out.iter().all(|&x| (x - 0.5).abs() < 1e-15));
    }

    #[test]
    fn test_normalise_channels() {
        let (i, p, m) = normalise_channels(&[0.75, 0.2], &[0.25, 0.6]);
        assert!((i[0] - 1.0).abs() < 1e-15 && (i[1] - 0.8).abs() < 1e-15);
        assert!((p[0] - 0.75).abs() < 1e-15 && (m[1] - 0.75).abs() < 1e-15);
    }
}
