use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::curve::{CurveModel, Shape};
use crate::error::Stage;
use crate::minimisation::Problem;
use crate::spectrum::{Spectrum, Weighting};
use crate::Result;

/// Gauss-Newton iterations allowed for each reweighted solve
const SOLVER_ITERATIONS: u64 = 20;

/// Which samples the continuum is fitted to
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusPolicy {
    /// Every sample, relying on robust weighting to discount the emission lines
    Whole,
    /// A fraction of the domain width at each end, away from the emission lines
    Edges { fraction: f64 },
}

impl FocusPolicy {
    fn apply(self, spectrum: Spectrum) -> Result<Spectrum> {
        match self {
            Self::Whole => Ok(spectrum.focus_on_whole()),
            Self::Edges { fraction } => spectrum.focus_on_edges(fraction),
        }
    }
}

/// Iteratively reweighted polynomial fit to the continuum under a spectrum
#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundEstimator {
    degree: usize,
    focus: FocusPolicy,
    weighting: Weighting,
    huber_fraction: f64,
    tolerance: f64,
    max_iterations: usize,
    verbose: bool,
}

/// Result of [`BackgroundEstimator::estimate`]
#[derive(Clone, Debug)]
pub struct BackgroundFit {
    /// The fitted continuum
    pub curve: CurveModel,
    /// Original samples minus the continuum
    pub signal: Spectrum,
    /// Original samples carrying the continuum as their curve, with the focus used for the fit
    pub background: Spectrum,
    /// Mean squared error of the seed and of every accepted iteration
    pub history: Vec<f64>,
}

impl BackgroundEstimator {
    /// Polynomial of `degree` fitted over `focus`
    ///
    /// Whole-domain fits weight residuals robustly, edge fits weight them equally.
    #[must_use]
    pub const fn new(degree: usize, focus: FocusPolicy) -> Self {
        let weighting = match focus {
            FocusPolicy::Whole => Weighting::Robust,
            FocusPolicy::Edges { .. } => Weighting::Equal,
        };
        Self {
            degree,
            focus,
            weighting,
            huber_fraction: Spectrum::HUBER_FRACTION,
            tolerance: 1e-10,
            max_iterations: 50,
            verbose: false,
        }
    }

    /// A line fitted to the whole spectrum with Huber weighting
    #[must_use]
    pub const fn linear_huber() -> Self {
        Self::new(1, FocusPolicy::Whole)
    }

    /// A line fitted to the outer tenth of the spectrum at each end
    #[must_use]
    pub const fn linear_satellite() -> Self {
        Self::new(1, FocusPolicy::Edges { fraction: 0.1 })
    }

    #[must_use]
    pub const fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    #[must_use]
    pub const fn with_huber_fraction(mut self, huber_fraction: f64) -> Self {
        self.huber_fraction = huber_fraction;
        self
    }

    /// Smallest relative improvement in mean squared error that continues the iteration
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Print every solver iteration to the terminal
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    #[must_use]
    pub const fn focus(&self) -> FocusPolicy {
        self.focus
    }

    #[must_use]
    pub const fn weighting(&self) -> Weighting {
        self.weighting
    }

    /// Fit the continuum of `spectrum` and subtract it
    ///
    /// Starting from the straight line through the first and last samples, each iteration
    /// recomputes the residual weights and solves the weighted least-squares problem on the
    /// focused samples. The iteration stops when the relative improvement in mean squared error
    /// falls below the tolerance, when a step would increase the error (the step is discarded),
    /// or after the maximum number of iterations.
    ///
    /// # Errors
    /// Returns [`crate::Error::InsufficientData`] if the focus holds no more samples than the
    /// polynomial has coefficients, and [`crate::Error::FitConvergence`] if a solve fails.
    pub fn estimate(&self, spectrum: &Spectrum) -> Result<BackgroundFit> {
        let shape = Shape::Polynomial {
            degree: self.degree,
        };
        let seed = CurveModel::new(shape, self.seed_coefficients(spectrum))?;
        let mut working = self.focus.apply(
            spectrum
                .clone()
                .with_curve(seed)
                .with_weighting(self.weighting)
                .with_huber_fraction(self.huber_fraction),
        )?;

        let mut mse = working.mean_squared_error();
        let mut history = vec![mse];

        for iteration in 1..=self.max_iterations {
            let focused = working.focused();
            let sigma = focused.residual_weights();
            let problem = Problem::new(working.curve(), &focused, sigma, Stage::Background)?;
            let solution = problem.solve_gauss_newton(
                working.curve().parameters().clone(),
                SOLVER_ITERATIONS,
                self.verbose,
            )?;
            let curve = working
                .curve()
                .with_parameters(solution.parameters.clone())?
                .with_uncertainties(solution.uncertainties());
            let candidate = working.clone().with_curve(curve);
            let candidate_mse = candidate.mean_squared_error();

            if candidate_mse > mse {
                log::warn!(
                    "background iteration {iteration} raised the mean squared error from {mse:.6e} to {candidate_mse:.6e}; keeping the previous fit"
                );
                break;
            }
            log::debug!("background iteration {iteration}: mean squared error {candidate_mse:.6e}");

            let improvement = if candidate_mse > 0. {
                mse / candidate_mse - 1.
            } else {
                0.
            };
            working = candidate;
            mse = candidate_mse;
            history.push(mse);
            if improvement < self.tolerance {
                break;
            }
        }

        log::info!(
            "fitted {} background in {} iterations",
            shape,
            history.len() - 1
        );

        let signal = working
            .subtract_curve()
            .focus_on_whole()
            .with_weighting(Weighting::Equal);
        Ok(BackgroundFit {
            curve: working.curve().clone(),
            signal,
            background: working,
            history,
        })
    }

    /// Coefficients of the line through the first and last samples, padded to the degree
    fn seed_coefficients(&self, spectrum: &Spectrum) -> Array1<f64> {
        let mut coefficients = Array1::zeros(self.degree + 1);
        let (x, y) = (spectrum.x(), spectrum.y());
        let (Some(&x0), Some(&x1), Some(&y0), Some(&y1)) = (x.first(), x.last(), y.first(), y.last())
        else {
            return coefficients;
        };
        let slope = if (x1 - x0).abs() > 0. {
            (y1 - y0) / (x1 - x0)
        } else {
            0.
        };
        if self.degree == 0 {
            coefficients[0] = (y0 + y1) / 2.;
        } else {
            coefficients[0] = slope.mul_add(-x0, y0);
            coefficients[1] = slope;
        }
        coefficients
    }
}

impl Default for BackgroundEstimator {
    fn default() -> Self {
        Self::linear_huber()
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array1;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    use super::{BackgroundEstimator, FocusPolicy};
    use crate::spectrum::{Spectrum, Weighting};
    use crate::{Error, Result, Stage};

    fn gaussian(x: f64, a: f64, mu: f64, si: f64) -> f64 {
        a * (-(x - mu).powi(2) / (2. * si.powi(2))).exp()
    }

    /// Two ruby lines on a sloping continuum with a little noise
    fn ruby_on_slope(seed: u64) -> Result<Spectrum> {
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = Array1::linspace(690., 700., 201);
        let noise = Array1::random_using(x.len(), Normal::new(0., 0.002).unwrap(), &mut rng);
        let y = x.mapv(|x| {
            0.02f64.mul_add(x - 690., 0.3)
                + gaussian(x, 1.0, 694.2, 0.35)
                + gaussian(x, 0.6, 692.75, 0.35)
        }) + noise;
        Spectrum::new(x, y)
    }

    #[test]
    fn mean_squared_error_never_increases() -> Result<()> {
        let spectrum = ruby_on_slope(40)?;
        for estimator in [
            BackgroundEstimator::linear_huber(),
            BackgroundEstimator::linear_satellite(),
            BackgroundEstimator::new(2, FocusPolicy::Whole),
        ] {
            let fit = estimator.estimate(&spectrum)?;
            assert!(!fit.history.is_empty());
            for pair in fit.history.windows(2) {
                assert!(pair[1] <= pair[0]);
            }
        }
        Ok(())
    }

    #[test]
    fn continuum_under_the_lines_is_recovered() -> Result<()> {
        let spectrum = ruby_on_slope(40)?;
        for estimator in [
            BackgroundEstimator::linear_huber(),
            BackgroundEstimator::linear_satellite(),
        ] {
            let fit = estimator.estimate(&spectrum)?;
            let coefficients = fit.curve.parameters();
            approx::assert_relative_eq!(
                fit.curve.evaluate(690.),
                0.3,
                epsilon = 0.02
            );
            approx::assert_relative_eq!(coefficients[1], 0.02, epsilon = 0.005);

            // the peak survives subtraction
            let tallest = fit.signal.y().iter().copied().fold(f64::NEG_INFINITY, f64::max);
            approx::assert_relative_eq!(tallest, 1.0, epsilon = 0.05);
            assert_eq!(fit.signal.weighting(), Weighting::Equal);
            assert_eq!(fit.signal.len(), spectrum.len());
        }
        Ok(())
    }

    #[test]
    fn narrow_edges_are_insufficient() -> Result<()> {
        let spectrum = Spectrum::load(
            (0..10).map(f64::from).collect(),
            (0..10).map(f64::from).collect(),
        )?;
        let estimator = BackgroundEstimator::new(1, FocusPolicy::Edges { fraction: 0.05 });
        // the edges hold only the two end samples
        assert!(matches!(
            estimator.estimate(&spectrum),
            Err(Error::InsufficientData {
                stage: Stage::Background,
                required: 3,
                available: 2,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn exact_continuum_converges_immediately() -> Result<()> {
        let x = (0..20).map(f64::from).collect::<Vec<_>>();
        let y = x.iter().map(|x| 3. - 0.5 * x).collect();
        let spectrum = Spectrum::load(x, y)?;
        let fit = BackgroundEstimator::linear_huber().estimate(&spectrum)?;
        approx::assert_relative_eq!(fit.curve.parameters()[0], 3., epsilon = 1e-9);
        approx::assert_relative_eq!(fit.curve.parameters()[1], -0.5, epsilon = 1e-9);
        assert!(fit.signal.y().iter().all(|y| y.abs() < 1e-9));
        Ok(())
    }
}
