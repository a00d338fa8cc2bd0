use pyo3::prelude::*;

use spexpol::{InstrumentConfig, InstrumentParameter};

use crate::helpers::parse_parameter;

/// Nominal parameters of an iSPEX-style instrument train.
///
/// Retardances in nm, angles in degrees.
///
/// Attributes:
///     qwp_d, qwp_t: Quarter-wave plate retardance and angle.
///     mor1_d, mor1_t: First multi-order retarder retardance and angle.
///     mor2_d, mor2_t: Second multi-order retarder retardance and angle.
///     pol_t: Single-channel polarizer angle.
///     pol0_t, pol90_t: Dual-channel polarizer angles.
///     qwp_achromatic_at: Design wavelength of an achromatic QWP, or None.
#[pyclass(name = "InstrumentConfig", frozen)]
pub(crate) struct PyInstrumentConfig {
    pub(crate) inner: InstrumentConfig,
}

#[pymethods]
impl PyInstrumentConfig {
    #[new]
    #[pyo3(signature = (
        qwp_d = 140.0,
        qwp_t = 0.0,
        mor1_d = 2240.0,
        mor1_t = -45.0,
        mor2_d = 2240.0,
        mor2_t = -45.0,
        pol_t = 0.0,
        pol0_t = 0.0,
        pol90_t = 90.0,
        qwp_achromatic_at = None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        qwp_d: f64,
        qwp_t: f64,
        mor1_d: f64,
        mor1_t: f64,
        mor2_d: f64,
        mor2_t: f64,
        pol_t: f64,
        pol0_t: f64,
        pol90_t: f64,
        qwp_achromatic_at: Option<f64>,
    ) -> Self {
        Self {
            inner: InstrumentConfig {
                qwp_retardance_nm: qwp_d,
                qwp_angle_deg: qwp_t,
                qwp_achromatic_at_nm: qwp_achromatic_at,
                mor1_retardance_nm: mor1_d,
                mor1_angle_deg: mor1_t,
                mor2_retardance_nm: mor2_d,
                mor2_angle_deg: mor2_t,
                polarizer_angle_deg: pol_t,
                polarizer0_angle_deg: pol0_t,
                polarizer90_angle_deg: pol90_t,
            },
        }
    }

    /// Value of a parameter by name, e.g. ``config.get("MOR1_t")``.
    fn get(&self, parameter: &str) -> PyResult<f64> {
        Ok(parse_parameter(parameter)?.value(&self.inner))
    }

    /// Copy of this configuration with ``offset`` added to one parameter.
    ///
    /// Args:
    ///     parameter: One of QWP_d, QWP_t, MOR1_d, MOR1_t, MOR2_d, MOR2_t,
    ///         POL_t, POL0_t, POL90_t (case-insensitive).
    ///     offset: Offset in nm or degrees.
    fn perturbed(&self, parameter: &str, offset: f64) -> PyResult<Self> {
        let parameter = parse_parameter(parameter)?;
        Ok(Self {
            inner: self.inner.perturbed(parameter, offset),
        })
    }

    /// Names of all perturbable parameters.
    #[staticmethod]
    fn parameters() -> Vec<&'static str> {
        InstrumentParameter::ALL.iter().map(|p| p.name()).collect()
    }

    #[getter]
    fn qwp_achromatic_at(&self) -> Option<f64> {
        self.inner.qwp_achromatic_at_nm
    }

    /// Combined retardance of both multi-order retarders in nm.
    #[getter]
    fn modulator_retardance(&self) -> f64 {
        self.inner.modulator_retardance_nm()
    }

    fn __repr__(&self) -> String {
        let params: Vec<String> = InstrumentParameter::ALL
            .iter()
            .map(|p| format!("{}={}", p.name(), p.value(&self.inner)))
            .collect();
        format!(
            "InstrumentConfig({}, qwp_achromatic_at={:?})",
            params.join(", "),
            self.inner.qwp_achromatic_at_nm
        )
    }
}
