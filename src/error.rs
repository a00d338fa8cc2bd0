//! Error types for the polarimetry core.
//!
//! Only construction-time violations surface as errors. Non-convergent fits are
//! reported through NaN sentinels in [`RetrievalResult`](crate::RetrievalResult)
//! so that a single unfittable spectrum never aborts a sweep.

use thiserror::Error;

/// Errors raised by the Stokes, optics and train APIs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolarisationError {
    /// The requested Stokes vector violates `Q² + U² + V² ≤ I²` or has `I < 0`.
    #[error("unphysical Stokes vector (I={i}, Q={q}, U={u}, V={v}): Q²+U²+V² must not exceed I²")]
    UnphysicalStokes { i: f64, q: f64, u: f64, v: f64 },

    /// Two per-wavelength arrays that must be parallel have different lengths.
    #[error("length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A perturbable instrument parameter name was not recognised.
    #[error("unknown instrument parameter '{0}' (expected one of QWP_d, QWP_t, MOR1_d, MOR1_t, MOR2_d, MOR2_t, POL_t, POL0_t, POL90_t)")]
    UnknownParameter(String),
}

/// Shorthand result type for fallible polarimetry operations.
pub type Result<T> = std::result::Result<T, PolarisationError>;

/// Check that a per-wavelength array has the expected length.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(PolarisationError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
