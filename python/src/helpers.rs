use numpy::ndarray::Array2;
use numpy::{PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;

use spexpol::{InstrumentParameter, PolarisationError, SpectralStokes, Stokes, Vector4};

/// Map a core error onto `ValueError`.
pub(crate) fn value_error(err: PolarisationError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Raise `ValueError` unless `actual == expected`.
pub(crate) fn check_len(what: &str, expected: usize, actual: usize) -> PyResult<()> {
    if expected != actual {
        return Err(PyValueError::new_err(format!(
            "{what} has {actual} elements, expected {expected}"
        )));
    }
    Ok(())
}

pub(crate) fn to_vec(arr: &PyReadonlyArray1<f64>) -> Vec<f64> {
    arr.as_array().to_vec()
}

/// Rows of a 2-D array, one spectrum per row.
pub(crate) fn to_rows(arr: &PyReadonlyArray2<f64>) -> Vec<Vec<f64>> {
    arr.as_array().rows().into_iter().map(|r| r.to_vec()).collect()
}

/// Stack equal-length rows into an `n × m` numpy array.
pub(crate) fn rows_to_pyarray<'py>(
    py: Python<'py>,
    rows: Vec<Vec<f64>>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let n = rows.len();
    let m = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let arr = Array2::from_shape_vec((n, m), flat)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(PyArray2::from_owned_array(py, arr))
}

/// Parse an `N × 4` array of (I, Q, U, V) rows, validating every row.
pub(crate) fn parse_stokes(arr: &PyReadonlyArray2<f64>) -> PyResult<SpectralStokes> {
    let a = arr.as_array();
    if a.shape()[1] != 4 {
        return Err(PyValueError::new_err(format!(
            "stokes array must have 4 columns (I, Q, U, V), got {}",
            a.shape()[1]
        )));
    }
    let vectors = a
        .rows()
        .into_iter()
        .map(|r| {
            let v = Vector4::new(r[0], r[1], r[2], r[3]);
            Stokes::from_vector(&v).map(|s| s.as_vector()).map_err(value_error)
        })
        .collect::<PyResult<Vec<Vector4>>>()?;
    Ok(SpectralStokes::from_vectors(vectors))
}

/// A Stokes component given either as a float or as a 1-D array.
pub(crate) enum OwnedComponent {
    Scalar(f64),
    Spectral(Vec<f64>),
}

impl OwnedComponent {
    pub(crate) fn extract(obj: &Bound<'_, PyAny>, name: &str) -> PyResult<Self> {
        if let Ok(x) = obj.extract::<f64>() {
            Ok(OwnedComponent::Scalar(x))
        } else if let Ok(arr) = obj.extract::<PyReadonlyArray1<f64>>() {
            Ok(OwnedComponent::Spectral(to_vec(&arr)))
        } else {
            Err(PyTypeError::new_err(format!(
                "{name} must be a float or a 1-D float array"
            )))
        }
    }

    pub(crate) fn as_component(&self) -> spexpol::stokes::Component<'_> {
        match self {
            OwnedComponent::Scalar(x) => (*x).into(),
            OwnedComponent::Spectral(v) => v.as_slice().into(),
        }
    }
}

pub(crate) fn parse_parameter(name: &str) -> PyResult<InstrumentParameter> {
    name.parse::<InstrumentParameter>().map_err(value_error)
}
