use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{Executor, Jacobian, Operator, State};
use argmin::solver::gaussnewton::GaussNewton;
use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::{Inverse, Solve};

use crate::curve::CurveModel;
use crate::error::Stage;
use crate::spectrum::Spectrum;
use crate::{Error, Result};

/// Starting damping of the Levenberg-Marquardt iteration
const INITIAL_DAMPING: f64 = 1e-3;
/// Damping beyond which no downhill step exists at the current parameters
const MAXIMUM_DAMPING: f64 = 1e16;
/// Relative decrease in cost below which an accepted step ends the iteration
const COST_TOLERANCE: f64 = 1e-10;

/// A weighted least-squares fit of a curve to spectral samples
///
/// The residual vector is
/// $$
///     r_i = \frac{f(x_i; p) - y_i}{\sigma_i}
/// $$
/// where $f$ is the curve being fitted and $\sigma_i$ the scale of sample $i$.
#[derive(Clone, Debug)]
pub(crate) struct Problem {
    curve: CurveModel,
    x: Array1<f64>,
    y: Array1<f64>,
    sigma: Array1<f64>,
    stage: Stage,
}

/// Parameters minimising a [`Problem`] with their covariance
#[derive(Clone, Debug)]
pub(crate) struct Solution {
    pub(crate) parameters: Array1<f64>,
    pub(crate) covariance: Array2<f64>,
    /// Sum of squared weighted residuals at `parameters`
    pub(crate) cost: f64,
    pub(crate) iterations: u64,
}

impl Solution {
    /// One-sigma standard error of every parameter
    pub(crate) fn uncertainties(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|variance| variance.max(0.).sqrt())
    }
}

impl Problem {
    /// Fit the shape of `curve` to every sample of `spectrum`, scaling residuals by `sigma`
    ///
    /// # Errors
    /// Returns [`Error::InsufficientData`] unless there are more samples than parameters.
    pub(crate) fn new(
        curve: &CurveModel,
        spectrum: &Spectrum,
        sigma: Array1<f64>,
        stage: Stage,
    ) -> Result<Self> {
        let required = curve.shape().parameter_count() + 1;
        if spectrum.len() < required {
            return Err(Error::InsufficientData {
                stage,
                model: curve.shape().to_string(),
                required,
                available: spectrum.len(),
            });
        }
        Ok(Self {
            curve: curve.clone(),
            x: spectrum.x().clone(),
            y: spectrum.y().clone(),
            sigma,
            stage,
        })
    }

    fn failure(&self, reason: impl std::fmt::Display) -> Error {
        Error::convergence(self.stage, &self.curve.shape().to_string(), reason)
    }

    fn residuals(&self, parameters: &Array1<f64>) -> Array1<f64> {
        (self.curve.values_with(&self.x, parameters) - &self.y) / &self.sigma
    }

    fn weighted_jacobian(&self, parameters: &Array1<f64>) -> Array2<f64> {
        self.curve.jacobian(&self.x, parameters) / &self.sigma.view().insert_axis(Axis(1))
    }

    /// Solve with the Gauss-Newton method
    ///
    /// Suited to curves linear in their parameters, where a single step reaches the minimum.
    pub(crate) fn solve_gauss_newton(
        self,
        initial_parameters: Array1<f64>,
        max_iterations: u64,
        verbose: bool,
    ) -> Result<Solution> {
        let solver = GaussNewton::new()
            .with_gamma(1.0)
            .and_then(|solver| solver.with_tolerance(f64::EPSILON.sqrt()))
            .map_err(|e| self.failure(e))?;

        let mut executor = Executor::new(self.clone(), solver)
            .configure(|state| state.param(initial_parameters).max_iters(max_iterations));
        if verbose {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor.run().map_err(|e| self.failure(e))?;

        let mut state = res.state().clone();
        let iterations = state.get_iter();
        let parameters = state
            .take_param()
            .ok_or_else(|| self.failure("solver returned no parameters"))?;
        self.finish(parameters, iterations)
    }

    /// Solve with a damped Gauss-Newton (Levenberg-Marquardt) iteration
    ///
    /// Each trial step solves
    /// $$
    ///     \left(J^T J + \lambda\,\mathrm{diag}(J^T J)\right) \delta = -J^T r
    /// $$
    /// The damping $\lambda$ shrinks tenfold after a step lowering the cost and grows tenfold
    /// after a step raising it. The iteration ends once an accepted step barely lowers the cost,
    /// or once no damping yields a downhill step.
    pub(crate) fn solve_levenberg_marquardt(
        &self,
        initial_parameters: Array1<f64>,
        max_iterations: u64,
    ) -> Result<Solution> {
        let mut parameters = initial_parameters;
        let mut residuals = self.apply(&parameters).map_err(|e| self.failure(e))?;
        let mut cost = residuals.dot(&residuals);
        if !cost.is_finite() {
            return Err(self.failure("non-finite residuals at the initial guess"));
        }
        let mut jacobian = self.jacobian(&parameters).map_err(|e| self.failure(e))?;
        let mut damping = INITIAL_DAMPING;

        for iteration in 1..=max_iterations {
            if cost <= 0. {
                return self.finish(parameters, iteration);
            }
            let normal = jacobian.t().dot(&jacobian);
            let gradient = jacobian.t().dot(&residuals);
            let floor = 1e-9 * normal.diag().fold(0., |acc: f64, a| acc.max(*a));

            let mut damped = normal.clone();
            for (ii, a) in normal.diag().iter().enumerate() {
                damped[[ii, ii]] += damping * a.max(floor);
            }

            let step = damped
                .solve(&gradient.mapv(|g| -g))
                .ok()
                .filter(|step| step.iter().all(|s| s.is_finite()));
            let trial = step.as_ref().map(|step| &parameters + step);
            let trial_residuals = trial.as_ref().map(|trial| self.residuals(trial));
            let trial_cost = trial_residuals
                .as_ref()
                .map_or(f64::INFINITY, |r| r.dot(r));

            match (step, trial, trial_residuals) {
                (Some(step), Some(trial), Some(trial_residuals))
                    if trial_cost.is_finite() && trial_cost <= cost =>
                {
                    let decrease = (cost - trial_cost) / cost;
                    let step_size = step.dot(&step).sqrt();
                    let scale = parameters.dot(&parameters).sqrt();
                    log::debug!(
                        "{} ({}) iteration {iteration}: cost {trial_cost:.6e}, damping {damping:.1e}",
                        self.stage,
                        self.curve.shape()
                    );
                    parameters = trial;
                    residuals = trial_residuals;
                    cost = trial_cost;
                    if decrease < COST_TOLERANCE || step_size <= 1e-12 * (scale + 1e-12) {
                        return self.finish(parameters, iteration);
                    }
                    jacobian = self.jacobian(&parameters).map_err(|e| self.failure(e))?;
                    damping = (damping / 10.).max(1e-12);
                }
                _ => {
                    damping *= 10.;
                    if damping > MAXIMUM_DAMPING {
                        return self.finish(parameters, iteration);
                    }
                }
            }
        }
        Err(self.failure(format!(
            "no convergence within {max_iterations} iterations"
        )))
    }

    /// Package `parameters` with the covariance estimated from the residual variance
    #[allow(clippy::cast_precision_loss)]
    fn finish(&self, parameters: Array1<f64>, iterations: u64) -> Result<Solution> {
        let residuals = self.residuals(&parameters);
        let cost = residuals.dot(&residuals);
        let jacobian = self.weighted_jacobian(&parameters);
        let normal = jacobian.t().dot(&jacobian);
        let inverse = normal
            .inv()
            .map_err(|e| self.failure(format!("singular covariance: {e}")))?;

        let degrees_of_freedom = (self.x.len() - parameters.len()) as f64;
        let covariance = inverse * (cost / degrees_of_freedom);
        if !covariance.iter().all(|c| c.is_finite())
            || covariance.diag().iter().any(|variance| *variance < 0.)
        {
            return Err(self.failure("singular covariance"));
        }
        if parameters.iter().any(|p| !p.is_finite()) {
            return Err(self.failure("non-finite parameters"));
        }
        Ok(Solution {
            parameters,
            covariance,
            cost,
            iterations,
        })
    }
}

impl Operator for Problem {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.residuals(p))
    }
}

impl Jacobian for Problem {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        Ok(self.weighted_jacobian(p))
    }
}
