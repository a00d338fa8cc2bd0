//! Bounded Levenberg-Marquardt for small, fixed-size curve fits.
//!
//! Minimises `Σ rᵢ(p)²` subject to `lower ≤ p ≤ upper`. Every trial step is
//! projected back onto the box, and a parameter that sits on a bound with its
//! gradient pointing outward is frozen for that iteration (active set). The
//! bounds are therefore honoured by every iterate, not clipped afterwards.
//!
//! Normal equations are accumulated sample by sample into `N×N` static
//! matrices, so a fit over thousands of wavelengths allocates nothing.

use nalgebra::{SMatrix, SVector};
use thiserror::Error;
use tracing::trace;

/// Damping at the first iteration, relative to `diag(JᵀJ)`.
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
/// Beyond this no step can reduce the cost any more.
const LAMBDA_MAX: f64 = 1e16;
/// Lower limit on a diagonal entry used for damping (parameters with a
/// vanishing Jacobian column must still get a positive-definite system).
const DAMPING_FLOOR: f64 = 1e-12;

/// A least-squares model with `N` free parameters.
pub(crate) trait CurveModel<const N: usize> {
    /// Number of residuals.
    fn len(&self) -> usize;

    /// Residual `model − data` of sample `i` and its gradient with respect
    /// to the parameters.
    fn residual(&self, i: usize, params: &SVector<f64, N>) -> (f64, SVector<f64, N>);
}

/// Box constraints on the parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bounds<const N: usize> {
    pub lower: SVector<f64, N>,
    pub upper: SVector<f64, N>,
}

impl<const N: usize> Bounds<N> {
    fn project(&self, params: &SVector<f64, N>) -> SVector<f64, N> {
        let mut out = *params;
        for k in 0..N {
            out[k] = out[k].max(self.lower[k]).min(self.upper[k]);
        }
        out
    }
}

/// Stopping rules, mirroring MINPACK's `ftol`/`xtol`/`gtol`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StopCriteria {
    pub max_iterations: u32,
    /// Relative cost reduction of an accepted step.
    pub ftol: f64,
    /// Step length relative to the parameter norm.
    pub xtol: f64,
    /// Largest gradient component over the free parameters.
    pub gtol: f64,
}

/// Why a fit did not produce a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum FitFailure {
    #[error("damped normal equations are not positive definite")]
    Singular,
    #[error("non-finite residual or gradient")]
    NonFinite,
    #[error("no convergence within the iteration limit")]
    MaxIterations,
}

/// A converged fit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FitOutcome<const N: usize> {
    pub params: SVector<f64, N>,
    /// `s²·(JᵀJ)⁻¹` with `s² = SSR/(m − N)`; infinite where undetermined.
    pub covariance: SMatrix<f64, N, N>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: u32,
}

struct NormalEquations<const N: usize> {
    cost: f64,
    jtj: SMatrix<f64, N, N>,
    gradient: SVector<f64, N>,
}

fn normal_equations<const N: usize, M: CurveModel<N>>(
    model: &M,
    params: &SVector<f64, N>,
) -> Result<NormalEquations<N>, FitFailure> {
    let mut cost = 0.0;
    let mut jtj = SMatrix::<f64, N, N>::zeros();
    let mut gradient = SVector::<f64, N>::zeros();
    for i in 0..model.len() {
        let (r, j) = model.residual(i, params);
        cost += r * r;
        gradient += j * r;
        jtj += j * j.transpose();
    }
    if !cost.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    Ok(NormalEquations {
        cost,
        jtj,
        gradient,
    })
}

/// Parameters that may move this iteration: not pinned against a bound by
/// a gradient that points out of the box.
fn free_parameters<const N: usize>(
    params: &SVector<f64, N>,
    gradient: &SVector<f64, N>,
    bounds: &Bounds<N>,
) -> [bool; N] {
    std::array::from_fn(|k| {
        let at_lower = params[k] <= bounds.lower[k] && gradient[k] > 0.0;
        let at_upper = params[k] >= bounds.upper[k] && gradient[k] < 0.0;
        !(at_lower || at_upper)
    })
}

/// Solve `(JᵀJ + λ·diag(JᵀJ)) δ = −g` over the free parameters; frozen
/// parameters get `δ = 0`.
fn damped_step<const N: usize>(
    normal: &NormalEquations<N>,
    free: &[bool; N],
    lambda: f64,
) -> Option<SVector<f64, N>> {
    let mut a = normal.jtj;
    let mut rhs = -normal.gradient;
    for k in 0..N {
        if free[k] {
            a[(k, k)] += lambda * normal.jtj[(k, k)].max(DAMPING_FLOOR);
        } else {
            a.row_mut(k).fill(0.0);
            a.column_mut(k).fill(0.0);
            a[(k, k)] = 1.0;
            rhs[k] = 0.0;
        }
    }
    a.cholesky().map(|chol| chol.solve(&rhs))
}

fn finish<const N: usize>(
    samples: usize,
    params: SVector<f64, N>,
    normal: &NormalEquations<N>,
    iterations: u32,
) -> FitOutcome<N> {
    let covariance = match normal.jtj.try_inverse() {
        Some(inv) if samples > N => inv * (normal.cost / (samples - N) as f64),
        _ => SMatrix::repeat(f64::INFINITY),
    };
    FitOutcome {
        params,
        covariance,
        cost: normal.cost,
        iterations,
    }
}

/// Fit `model` starting from `initial` (projected into the box first).
pub(crate) fn fit_bounded<const N: usize, M: CurveModel<N>>(
    model: &M,
    initial: &SVector<f64, N>,
    bounds: &Bounds<N>,
    criteria: &StopCriteria,
) -> Result<FitOutcome<N>, FitFailure> {
    let samples = model.len();
    let mut params = bounds.project(initial);
    let mut normal = normal_equations(model, &params)?;
    let mut lambda = LAMBDA_INIT;

    for iteration in 1..=criteria.max_iterations {
        let free = free_parameters(&params, &normal.gradient, bounds);
        let projected_gradient = (0..N)
            .filter(|&k| free[k])
            .map(|k| normal.gradient[k].abs())
            .fold(0.0, f64::max);
        if projected_gradient <= criteria.gtol {
            return Ok(finish(samples, params, &normal, iteration));
        }

        // Inner loop: raise the damping until a step lowers the cost
        loop {
            let Some(step) = damped_step(&normal, &free, lambda) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Err(FitFailure::Singular);
                }
                continue;
            };
            let trial = bounds.project(&(params + step));
            let moved = (trial - params).norm();
            if moved <= criteria.xtol * (params.norm() + criteria.xtol) {
                return Ok(finish(samples, params, &normal, iteration));
            }

            match normal_equations(model, &trial) {
                Ok(next) if next.cost < normal.cost => {
                    let reduction = normal.cost - next.cost;
                    params = trial;
                    normal = next;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                    trace!(
                        "LM {}: cost={:.6e}, λ={:.1e}, params={:?}",
                        iteration,
                        normal.cost,
                        lambda,
                        params.as_slice(),
                    );
                    if reduction <= criteria.ftol * normal.cost {
                        return Ok(finish(samples, params, &normal, iteration));
                    }
                    break;
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        // Stalled at a minimum to within rounding
                        return Ok(finish(samples, params, &normal, iteration));
                    }
                }
            }
        }
    }
    Err(FitFailure::MaxIterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Vector1, Vector2};

    const CRITERIA: StopCriteria = StopCriteria {
        max_iterations: 200,
        ftol: 1e-12,
        xtol: 1e-12,
        gtol: 1e-12,
    };

    /// y = a·exp(−b·x)
    struct Decay {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl CurveModel<2> for Decay {
        fn len(&self) -> usize {
            self.x.len()
        }

        fn residual(&self, i: usize, p: &Vector2<f64>) -> (f64, Vector2<f64>) {
            let e = (-p[1] * self.x[i]).exp();
            (p[0] * e - self.y[i], Vector2::new(e, -p[0] * self.x[i] * e))
        }
    }

    /// y = c (constant), for bound tests.
    struct Constant(Vec<f64>);

    impl CurveModel<1> for Constant {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn residual(&self, i: usize, p: &Vector1<f64>) -> (f64, Vector1<f64>) {
            (p[0] - self.0[i], Vector1::new(1.0))
        }
    }

    fn wide_bounds() -> Bounds<2> {
        Bounds {
            lower: Vector2::new(-100.0, -100.0),
            upper: Vector2::new(100.0, 100.0),
        }
    }

    #[test]
    fn test_exact_exponential_fit() {
        let x: Vec<f64> = (0..40).map(|k| k as f64 * 0.1).collect();
        let y = x.iter().map(|&x| 2.5 * (-1.3 * x).exp()).collect();
        let model = Decay { x, y };
        let out = fit_bounded(&model, &Vector2::new(1.0, 0.5), &wide_bounds(), &CRITERIA).unwrap();
        assert!((out.params[0] - 2.5).abs() < 1e-9, "a = {}", out.params[0]);
        assert!((out.params[1] - 1.3).abs() < 1e-9, "b = {}", out.params[1]);
        assert!(out.cost < 1e-20);
    }

    #[test]
    fn test_upper_bound_is_active() {
        // Unconstrained optimum is the mean 5.0
        let model = Constant(vec![4.0, 5.0, 6.0]);
        let bounds = Bounds {
            lower: Vector1::new(0.0),
            upper: Vector1::new(3.0),
        };
        let out = fit_bounded(&model, &Vector1::new(1.0), &bounds, &CRITERIA).unwrap();
        assert_eq!(out.params[0], 3.0);
    }

    #[test]
    fn test_initial_guess_projected_into_box() {
        let model = Constant(vec![0.5, 0.5]);
        let bounds = Bounds {
            lower: Vector1::new(0.0),
            upper: Vector1::new(1.0),
        };
        let out = fit_bounded(&model, &Vector1::new(42.0), &bounds, &CRITERIA).unwrap();
        assert!((out.params[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_covariance_of_mean() {
        // Fitting a constant: var(mean) = s²/m with s² = SSR/(m−1)
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let model = Constant(data);
        let bounds = Bounds {
            lower: Vector1::new(-10.0),
            upper: Vector1::new(10.0),
        };
        let out = fit_bounded(&model, &Vector1::new(0.0), &bounds, &CRITERIA).unwrap();
        assert!((out.params[0] - 2.5).abs() < 1e-9);
        assert!((out.cost - 5.0).abs() < 1e-12);
        let expected = (5.0 / 3.0) / 4.0;
        assert!((out.covariance[(0, 0)] - expected).abs() < 1e-10);
    }

    #[test]
    fn test_non_finite_data() {
        let model = Constant(vec![1.0, f64::NAN]);
        let bounds = Bounds {
            lower: Vector1::new(-10.0),
            upper: Vector1::new(10.0),
        };
        let err = fit_bounded(&model, &Vector1::new(0.0), &bounds, &CRITERIA).unwrap_err();
        assert_eq!(err, FitFailure::NonFinite);
    }

    #[test]
    fn test_iteration_limit() {
        let x: Vec<f64> = (0..40).map(|k| k as f64 * 0.1).collect();
        let y = x.iter().map(|&x| 2.5 * (-1.3 * x).exp()).collect();
        let model = Decay { x, y };
        let criteria = StopCriteria {
            max_iterations: 1,
            ..CRITERIA
        };
        let err =
            fit_bounded(&model, &Vector2::new(1.0, 0.5), &wide_bounds(), &criteria).unwrap_err();
        assert_eq!(err, FitFailure::MaxIterations);
    }
}
