//! Python bindings for spexpol via PyO3.
//!
//! Exposes the instrument simulator and the DoLP/AoLP retrieval to Python as
//! the `spexpolrs` module. Spectra are 1-D numpy arrays, batches of spectra
//! and Stokes spectra are 2-D arrays with one row per spectrum / wavelength.
//! A retrieval without solution is reported as NaN, never as an exception.

mod helpers;
mod instrument;

use numpy::ndarray::Array2;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use spexpol::{
    ChannelMode, InitialGuess, InstrumentConfig, MarginStudy, MarginTolerances, RetrieveConfig,
};

use helpers::{
    check_len, parse_parameter, parse_stokes, rows_to_pyarray, to_rows, to_vec, value_error,
    OwnedComponent,
};
use instrument::PyInstrumentConfig;

fn instrument_or_default(config: Option<PyRef<'_, PyInstrumentConfig>>) -> InstrumentConfig {
    config.map(|c| c.inner.clone()).unwrap_or_default()
}

/// Retrieval settings; `linearised` overrides the seed of both single- and
/// dual-channel fits, `None` keeps the library defaults.
fn retrieve_config(retardance: f64, linearised: Option<bool>) -> RetrieveConfig {
    let mut config = RetrieveConfig {
        retardance_nm: retardance,
        ..Default::default()
    };
    if let Some(linearised) = linearised {
        let seed = if linearised {
            InitialGuess::Linearised
        } else {
            InitialGuess::Amplitude
        };
        config.initial_guess = seed;
        config.dual_initial_guess = seed;
    }
    config
}

fn tolerances(dolp_tol: f64, aolp_tol: f64, symmetric_dolp: bool) -> MarginTolerances {
    MarginTolerances {
        dolp: dolp_tol,
        aolp_deg: aolp_tol,
        symmetric_dolp,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Stokes
// ═══════════════════════════════════════════════════════════════════════════

/// Build an N x 4 Stokes spectrum from an intensity spectrum.
///
/// Args:
///     intensity: 1-D intensity spectrum.
///     q, u, v: Float (same value at every wavelength) or 1-D array.
///
/// Returns:
///     numpy array of shape (N, 4) with columns I, Q, U, V.
#[pyfunction]
#[pyo3(signature = (intensity, q = None, u = None, v = None))]
fn stokes_spectrum<'py>(
    py: Python<'py>,
    intensity: PyReadonlyArray1<f64>,
    q: Option<&Bound<'py, PyAny>>,
    u: Option<&Bound<'py, PyAny>>,
    v: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let component = |obj: Option<&Bound<'py, PyAny>>, name: &str| match obj {
        Some(o) => OwnedComponent::extract(o, name),
        None => Ok(OwnedComponent::Scalar(0.0)),
    };
    let (q, u, v) = (component(q, "q")?, component(u, "u")?, component(v, "v")?);
    let spectrum = spexpol::stokes_spectrum(
        &to_vec(&intensity),
        q.as_component(),
        u.as_component(),
        v.as_component(),
    )
    .map_err(value_error)?;
    let arr = Array2::from_shape_fn((spectrum.len(), 4), |(k, c)| spectrum.vectors()[k][c]);
    Ok(PyArray2::from_owned_array(py, arr))
}

/// Degree of linear polarisation sqrt(Q² + U²) / I.
#[pyfunction]
#[pyo3(signature = (i, q, u, v = 0.0))]
fn dolp(i: f64, q: f64, u: f64, v: f64) -> f64 {
    spexpol::degree_of_linear_polarisation(i, q, u, v)
}

/// Angle of linear polarisation ½·atan2(U, Q) in degrees.
#[pyfunction]
fn aolp_deg(q: f64, u: f64) -> f64 {
    spexpol::angle_of_linear_polarisation_deg(q, u)
}

// ═══════════════════════════════════════════════════════════════════════════
// Simulation
// ═══════════════════════════════════════════════════════════════════════════

/// Simulate the single-channel iSPEX train.
///
/// Args:
///     wavelengths: 1-D wavelengths in nm.
///     stokes: (N, 4) Stokes spectrum, e.g. from ``stokes_spectrum``.
///     config: InstrumentConfig, default nominal.
///
/// Returns:
///     1-D detected intensity.
#[pyfunction]
#[pyo3(signature = (wavelengths, stokes, config = None))]
fn simulate_ispex<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    stokes: PyReadonlyArray2<f64>,
    config: Option<PyRef<'_, PyInstrumentConfig>>,
) -> PyResult<Bound<'py, PyArray1<f64>>> {
    let source = parse_stokes(&stokes)?;
    let out = instrument_or_default(config)
        .simulate_single(&to_vec(&wavelengths), &source)
        .map_err(value_error)?;
    Ok(PyArray1::from_vec(py, out.intensity()))
}

/// Simulate the dual-channel iSPEX train.
///
/// Returns:
///     Tuple (I0, I90) of 1-D intensities behind POL0 and POL90.
#[pyfunction]
#[pyo3(signature = (wavelengths, stokes, config = None))]
fn simulate_ispex2<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    stokes: PyReadonlyArray2<f64>,
    config: Option<PyRef<'_, PyInstrumentConfig>>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let source = parse_stokes(&stokes)?;
    let signal = instrument_or_default(config)
        .simulate_dual(&to_vec(&wavelengths), &source)
        .map_err(value_error)?;
    Ok((
        PyArray1::from_vec(py, signal.channel_0),
        PyArray1::from_vec(py, signal.channel_90),
    ))
}

/// Re-simulate once per offset of one instrument parameter.
///
/// Args:
///     parameter: Parameter name, e.g. "MOR1_t".
///     offsets: 1-D offsets (nm or degrees).
///     dual: Simulate the dual-channel train.
///
/// Returns:
///     (len(offsets), N) intensities, or a tuple of two such arrays if dual.
#[pyfunction]
#[pyo3(signature = (wavelengths, stokes, parameter, offsets, config = None, dual = false))]
fn simulate_sweep<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    stokes: PyReadonlyArray2<f64>,
    parameter: &str,
    offsets: PyReadonlyArray1<f64>,
    config: Option<PyRef<'_, PyInstrumentConfig>>,
    dual: bool,
) -> PyResult<Py<PyAny>> {
    let source = parse_stokes(&stokes)?;
    let parameter = parse_parameter(parameter)?;
    let (wvl, offsets) = (to_vec(&wavelengths), to_vec(&offsets));
    let instrument = instrument_or_default(config);

    if dual {
        let (a, b): (Vec<Vec<f64>>, Vec<Vec<f64>>) = instrument
            .sweep_dual(&wvl, &source, parameter, &offsets)
            .and_then(|sweep| sweep.collect::<spexpol::Result<Vec<_>>>())
            .map_err(value_error)?
            .into_iter()
            .map(|s| (s.channel_0, s.channel_90))
            .unzip();
        let pair = (rows_to_pyarray(py, a)?, rows_to_pyarray(py, b)?);
        Ok(pair.into_pyobject(py)?.into_any().unbind())
    } else {
        let rows: Vec<Vec<f64>> = instrument
            .sweep_single(&wvl, &source, parameter, &offsets)
            .and_then(|sweep| sweep.collect::<spexpol::Result<_>>())
            .map_err(value_error)?;
        Ok(rows_to_pyarray(py, rows)?.into_any().unbind())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Retrieval
// ═══════════════════════════════════════════════════════════════════════════

/// Fit DoLP and AoLP to one measured spectrum.
///
/// Args:
///     wavelengths: 1-D wavelengths in nm.
///     reference: 1-D unpolarised reference spectrum (ones if normalised).
///     measured: 1-D measured intensity.
///     retardance: Modulator retardance in nm. Default 4480.
///     linearised: Seed the fit with the linear least-squares solution
///         instead of the peak-to-peak amplitude at AoLP 0.
///
/// Returns:
///     Tuple (dolp, aolp_deg); both NaN if no solution was found.
#[pyfunction]
#[pyo3(signature = (wavelengths, reference, measured, retardance = 4480.0, linearised = false))]
fn retrieve(
    wavelengths: PyReadonlyArray1<f64>,
    reference: PyReadonlyArray1<f64>,
    measured: PyReadonlyArray1<f64>,
    retardance: f64,
    linearised: bool,
) -> PyResult<(f64, f64)> {
    let (wvl, reference, measured) = (to_vec(&wavelengths), to_vec(&reference), to_vec(&measured));
    check_len("reference", wvl.len(), reference.len())?;
    check_len("measured", wvl.len(), measured.len())?;
    let fit = spexpol::retrieve(
        &wvl,
        &reference,
        &measured,
        &retrieve_config(retardance, Some(linearised)),
    );
    Ok((fit.dolp, fit.aolp_deg))
}

/// ``retrieve`` for every row of a 2-D array of measured spectra.
///
/// Returns:
///     Tuple (dolp, aolp_deg) of 1-D arrays, one entry per row.
#[pyfunction]
#[pyo3(signature = (wavelengths, reference, measured, retardance = 4480.0, linearised = false))]
fn retrieve_many<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    reference: PyReadonlyArray1<f64>,
    measured: PyReadonlyArray2<f64>,
    retardance: f64,
    linearised: bool,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let (wvl, reference, spectra) = (to_vec(&wavelengths), to_vec(&reference), to_rows(&measured));
    check_len("reference", wvl.len(), reference.len())?;
    if let Some(row) = spectra.first() {
        check_len("measured row", wvl.len(), row.len())?;
    }
    let config = retrieve_config(retardance, Some(linearised));
    let series = py.detach(|| spexpol::retrieve_many(&wvl, &reference, &spectra, &config));
    Ok((
        PyArray1::from_vec(py, series.dolp),
        PyArray1::from_vec(py, series.aolp_deg),
    ))
}

/// Retrieve both channels of dual-channel measurements and merge them.
///
/// Channel B's AoLP is corrected for its 90° offset; per row the channels
/// are averaged, except where channel A's AoLP is within 5° of 0 (channel A
/// used) or channel B's is within 5° of ±90 (channel B used, also on overlap).
///
/// Args:
///     linearised: Seed both fits with the linear least-squares solution
///         (default True); False starts at the peak-to-peak amplitude, which
///         fails for channels seeing AoLP near ±90°.
///
/// Returns:
///     Tuple (dolp, aolp_deg) of 1-D arrays.
#[pyfunction]
#[pyo3(signature = (
    wavelengths,
    reference,
    channel_a,
    channel_b,
    retardance = 4480.0,
    linearised = None,
))]
fn retrieve_many_dual<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    reference: PyReadonlyArray1<f64>,
    channel_a: PyReadonlyArray2<f64>,
    channel_b: PyReadonlyArray2<f64>,
    retardance: f64,
    linearised: Option<bool>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let (wvl, reference) = (to_vec(&wavelengths), to_vec(&reference));
    let (a, b) = (to_rows(&channel_a), to_rows(&channel_b));
    check_len("reference", wvl.len(), reference.len())?;
    check_len("channel_b", a.len(), b.len())?;
    for row in a.first().into_iter().chain(b.first()) {
        check_len("channel row", wvl.len(), row.len())?;
    }
    let config = retrieve_config(retardance, linearised);
    let series = py.detach(|| spexpol::retrieve_many_dual(&wvl, &reference, &a, &b, &config));
    Ok((
        PyArray1::from_vec(py, series.dolp),
        PyArray1::from_vec(py, series.aolp_deg),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════
// Margins
// ═══════════════════════════════════════════════════════════════════════════

/// Smallest |offset| at which the DoLP or AoLP error exceeds its tolerance,
/// or max |offset| if none does.
///
/// Args:
///     offsets: 1-D swept offsets.
///     dolp_errors: 1-D fractional DoLP errors.
///     aolp_errors: 1-D AoLP errors in degrees.
///     dolp_tol: Default 0.03.
///     aolp_tol: Default 5.0 degrees.
///     symmetric_dolp: Also count DoLP underestimates beyond ``dolp_tol``.
///         Default False (only overestimates count).
#[pyfunction]
#[pyo3(signature = (
    offsets,
    dolp_errors,
    aolp_errors,
    dolp_tol = 0.03,
    aolp_tol = 5.0,
    symmetric_dolp = false,
))]
fn margin(
    offsets: PyReadonlyArray1<f64>,
    dolp_errors: PyReadonlyArray1<f64>,
    aolp_errors: PyReadonlyArray1<f64>,
    dolp_tol: f64,
    aolp_tol: f64,
    symmetric_dolp: bool,
) -> PyResult<f64> {
    let (x, d, a) = (to_vec(&offsets), to_vec(&dolp_errors), to_vec(&aolp_errors));
    check_len("dolp_errors", x.len(), d.len())?;
    check_len("aolp_errors", x.len(), a.len())?;
    let limits = tolerances(dolp_tol, aolp_tol, symmetric_dolp);
    Ok(spexpol::margin(&x, &d, &a, &limits))
}

/// Margin of one parameter over a Q/I x U/I grid of sources.
///
/// Args:
///     linearised: Seed override for the fits. Default None: amplitude seed
///         for single-channel, linearised seed for dual-channel studies.
///
/// Returns:
///     (len(q_values), len(u_values)) array; NaN outside 0 < Q² + U² ≤ 1.
#[pyfunction]
#[pyo3(signature = (
    wavelengths,
    parameter,
    offsets,
    q_values,
    u_values,
    config = None,
    dual = false,
    linearised = None,
    dolp_tol = 0.03,
    aolp_tol = 5.0,
    symmetric_dolp = false,
))]
#[allow(clippy::too_many_arguments)]
fn margin_grid<'py>(
    py: Python<'py>,
    wavelengths: PyReadonlyArray1<f64>,
    parameter: &str,
    offsets: PyReadonlyArray1<f64>,
    q_values: PyReadonlyArray1<f64>,
    u_values: PyReadonlyArray1<f64>,
    config: Option<PyRef<'_, PyInstrumentConfig>>,
    dual: bool,
    linearised: Option<bool>,
    dolp_tol: f64,
    aolp_tol: f64,
    symmetric_dolp: bool,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let parameter = parse_parameter(parameter)?;
    let mut study = MarginStudy::new(instrument_or_default(config), to_vec(&wavelengths));
    study.mode = if dual {
        ChannelMode::Dual
    } else {
        ChannelMode::Single
    };
    study.retrieve = retrieve_config(study.retrieve.retardance_nm, linearised);
    study.tolerances = tolerances(dolp_tol, aolp_tol, symmetric_dolp);
    let (offsets, q, u) = (to_vec(&offsets), to_vec(&q_values), to_vec(&u_values));
    if offsets.is_empty() {
        return Err(PyValueError::new_err("offsets must not be empty"));
    }

    let grid = py.detach(|| study.margin_grid(parameter, &offsets, &q, &u));
    let arr = Array2::from_shape_fn((grid.nrows(), grid.ncols()), |(r, c)| grid[(r, c)]);
    Ok(PyArray2::from_owned_array(py, arr))
}

// ═══════════════════════════════════════════════════════════════════════════
// Module definition
// ═══════════════════════════════════════════════════════════════════════════

/// spexpolrs: spectropolarimeter simulation and DoLP/AoLP retrieval
///
/// Mueller-matrix models of the iSPEX single- and dual-channel trains, a
/// bounded least-squares retrieval, and instrument tolerance margins,
/// exposed to Python via PyO3.
#[pymodule]
fn spexpolrs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyInstrumentConfig>()?;
    m.add_function(wrap_pyfunction!(stokes_spectrum, m)?)?;
    m.add_function(wrap_pyfunction!(dolp, m)?)?;
    m.add_function(wrap_pyfunction!(aolp_deg, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_ispex, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_ispex2, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_sweep, m)?)?;
    m.add_function(wrap_pyfunction!(retrieve, m)?)?;
    m.add_function(wrap_pyfunction!(retrieve_many, m)?)?;
    m.add_function(wrap_pyfunction!(retrieve_many_dual, m)?)?;
    m.add_function(wrap_pyfunction!(margin, m)?)?;
    m.add_function(wrap_pyfunction!(margin_grid, m)?)?;
    Ok(())
}
