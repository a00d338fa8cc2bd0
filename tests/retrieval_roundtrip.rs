//! Integration tests: simulate the iSPEX trains for known sources and verify
//! that retrieval recovers the source polarisation.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rand_distr::{Distribution, Normal};
use spexpol::{
    merge_dual_channel, merge_dual_channel_with, retrieve, retrieve_many, retrieve_many_dual,
    stokes_spectrum, InstrumentConfig, MergePrecedence, RetrieveConfig,
    SpectralStokes, Stokes,
};

/// 297 to 801.9 nm in 0.3 nm steps.
fn wavelengths() -> Vec<f64> {
    (0..1684).map(|k| 297.0 + 0.3 * k as f64).collect()
}

/// Unit-intensity source with the given DoLP and AoLP (degrees), V = 0.
fn linear_source(dolp: f64, aolp_deg: f64, n: usize) -> SpectralStokes {
    let two_a = (2.0 * aolp_deg).to_radians();
    let stokes = Stokes::new(1.0, dolp * two_a.cos(), dolp * two_a.sin(), 0.0).unwrap();
    SpectralStokes::uniform(&stokes, n)
}

fn achromatic() -> InstrumentConfig {
    InstrumentConfig {
        qwp_achromatic_at_nm: Some(560.0),
        ..Default::default()
    }
}

#[test]
fn test_single_channel_roundtrip() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let wvl = wavelengths();
    let flat = vec![1.0; wvl.len()];
    let source = linear_source(0.7, 30.0, wvl.len());

    let measured = achromatic()
        .simulate_single(&wvl, &source)
        .unwrap()
        .intensity();
    let fit = retrieve(&wvl, &flat, &measured, &RetrieveConfig::default());

    println!(
        "DoLP={:.6} AoLP={:.4}° in {} iterations, cost={:.3e}",
        fit.dolp, fit.aolp_deg, fit.iterations, fit.cost
    );
    assert!(fit.is_solution());
    assert!((fit.dolp - 0.7).abs() < 1e-3, "DoLP {}", fit.dolp);
    assert!((fit.aolp_deg - 30.0).abs() < 0.1, "AoLP {}", fit.aolp_deg);
}

#[test]
fn test_chromatic_qwp_is_exact_for_q_sources() {
    let wvl = wavelengths();
    let flat = vec![1.0; wvl.len()];
    let config = RetrieveConfig::default();

    for q in [0.2, 0.65] {
        let source = stokes_spectrum(&flat, q, 0.0, 0.0).unwrap();
        let measured = InstrumentConfig::default()
            .simulate_single(&wvl, &source)
            .unwrap()
            .intensity();
        let fit = retrieve(&wvl, &flat, &measured, &config);
        assert!((fit.dolp - q).abs() < 1e-6, "Q={q}: DoLP {}", fit.dolp);
        assert!(fit.aolp_deg.abs() < 1e-4, "Q={q}: AoLP {}", fit.aolp_deg);
    }
}

#[test]
fn test_random_sources_batch() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let wvl = wavelengths();
    let flat = vec![1.0; wvl.len()];
    let mut rng = StdRng::seed_from_u64(7);
    let config = achromatic();

    let truths: Vec<(f64, f64)> = (0..30)
        .map(|_| {
            let dolp = 0.1 + 0.8 * rng.random::<f64>();
            let aolp = -40.0 + 80.0 * rng.random::<f64>();
            (dolp, aolp)
        })
        .collect();
    let spectra: Vec<Vec<f64>> = truths
        .iter()
        .map(|&(d, a)| {
            config
                .simulate_single(&wvl, &linear_source(d, a, wvl.len()))
                .unwrap()
                .intensity()
        })
        .collect();

    let series = retrieve_many(&wvl, &flat, &spectra, &RetrieveConfig::default());
    assert_eq!(series.len(), truths.len());
    assert_eq!(series.failures(), 0);
    for (k, &(d, a)) in truths.iter().enumerate() {
        assert!(
            (series.dolp[k] - d).abs() < 1e-6,
            "#{k}: DoLP {} vs {d}",
            series.dolp[k]
        );
        assert!(
            (series.aolp_deg[k] - a).abs() < 1e-4,
            "#{k}: AoLP {} vs {a}",
            series.aolp_deg[k]
        );
    }
}

#[test]
fn test_noisy_retrieval() {
    let wvl: Vec<f64> = (0..=300).map(|k| 400.0 + k as f64).collect();
    let flat = vec![1.0; wvl.len()];
    let noise = Normal::new(0.0, 0.005).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let clean = achromatic()
        .simulate_single(&wvl, &linear_source(0.4, -25.0, wvl.len()))
        .unwrap()
        .intensity();
    let noisy: Vec<f64> = clean.iter().map(|&x| x + noise.sample(&mut rng)).collect();

    let fit = retrieve(&wvl, &flat, &noisy, &RetrieveConfig::default());
    println!(
        "noisy: DoLP={:.4}±{:.4} AoLP={:.3}±{:.3}°",
        fit.dolp,
        fit.dolp_sigma(),
        fit.aolp_deg,
        fit.aolp_sigma_deg()
    );
    assert!((fit.dolp - 0.4).abs() < 0.01, "DoLP {}", fit.dolp);
    assert!((fit.aolp_deg + 25.0).abs() < 1.0, "AoLP {}", fit.aolp_deg);
    // σ_DoLP ≈ σ·sqrt(2/m)/½ for this model
    assert!(fit.dolp_sigma() > 1e-4 && fit.dolp_sigma() < 1e-2);
    assert!(fit.aolp_sigma_deg() > 0.0 && fit.aolp_sigma_deg() < 1.0);
}

#[test]
fn test_dual_channel_roundtrip() {
    let wvl: Vec<f64> = (0..=300).map(|k| 400.0 + k as f64).collect();
    let flat = vec![1.0; wvl.len()];
    let instrument = achromatic();

    // At and near 0° (channel A zone), mid-range (average), near 90° (channel B zone)
    let truths = [(0.5, 0.0), (0.5, 2.0), (0.5, 70.0), (0.6, 88.0)];
    let (channel_a, channel_b): (Vec<Vec<f64>>, Vec<Vec<f64>>) = truths
        .iter()
        .map(|&(d, a)| {
            let signal = instrument
                .simulate_dual(&wvl, &linear_source(d, a, wvl.len()))
                .unwrap();
            (signal.channel_0, signal.channel_90)
        })
        .unzip();

    let config = RetrieveConfig::default();
    let merged = retrieve_many_dual(&wvl, &flat, &channel_a, &channel_b, &config);
    for (k, &(d, a)) in truths.iter().enumerate() {
        assert!((merged.dolp[k] - d).abs() < 1e-6, "#{k}: DoLP {}", merged.dolp[k]);
        assert!(
            (merged.aolp_deg[k] - a).abs() < 1e-4,
            "#{k}: AoLP {}",
            merged.aolp_deg[k]
        );
    }
}

#[test]
fn test_merge_overlap_resolution() {
    // Channel A at 2° and corrected channel B at 88°: both zones apply
    let default = merge_dual_channel(&[0.5], &[0.3], &[2.0], &[88.0]);
    assert_eq!(default.dolp[0], 0.3);
    assert_eq!(default.aolp_deg[0], 88.0);

    let a_first =
        merge_dual_channel_with(&[0.5], &[0.3], &[2.0], &[88.0], MergePrecedence::ChannelA);
    assert_eq!(a_first.dolp[0], 0.5);
    assert_eq!(a_first.aolp_deg[0], 2.0);
}
