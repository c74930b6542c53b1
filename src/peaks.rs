use itertools::Itertools;
use ndarray::Array1;

use crate::curve::{CurveModel, Shape};
use crate::error::Stage;
use crate::math::{convolve_same, percentile, ricker};
use crate::measurement::Measurement;
use crate::minimisation::Problem;
use crate::spectrum::Spectrum;
use crate::{Error, Result};

/// Zero-pressure R1 position used when no peak can be detected
const R1_FALLBACK: f64 = 694.24;
/// Zero-pressure R2 position used when no peak can be detected
const R2_FALLBACK: f64 = 692.75;
/// Wavelength span, in nm, of the widest matched filter
const FILTER_SPAN: f64 = 0.5;
/// Percentile of the absolute filter response taken as the noise floor
const NOISE_PERCENTILE: f64 = 10.;
/// Smallest ratio of filter response to noise floor accepted as a peak
const MIN_SNR: f64 = 1.;

/// Position and height of one fitted emission line
#[derive(Clone, Debug, PartialEq)]
pub struct PeakResult {
    pub center: Measurement,
    pub height: Measurement,
}

/// Result of [`PeakLocator::locate`]
#[derive(Clone, Debug)]
pub struct PeakFit {
    /// The longer-wavelength line
    pub r1: PeakResult,
    pub r2: PeakResult,
    pub curve: CurveModel,
    /// The searched spectrum carrying the fitted curve, focused on the fit windows
    pub spectrum: Spectrum,
}

/// Finds the R1 and R2 lines of a background-free spectrum and fits a peak shape to them
#[derive(Clone, Debug, PartialEq)]
pub struct PeakLocator {
    shape: Shape,
    min_separation: f64,
    max_separation: f64,
    fallback_ratio: f64,
    max_iterations: u64,
}

impl PeakLocator {
    /// # Errors
    /// Returns [`Error::UnknownStrategy`] if `shape` does not describe a pair of lines.
    pub fn new(shape: Shape) -> Result<Self> {
        if shape.lobes().is_none() {
            return Err(Error::UnknownStrategy {
                family: "peak shape",
                name: shape.to_string(),
            });
        }
        Ok(Self {
            shape,
            min_separation: 1.0,
            max_separation: 3.0,
            fallback_ratio: 0.002,
            max_iterations: 200,
        })
    }

    /// Accept a detected R2 lying between `min` and `max` nm below R1
    #[must_use]
    pub const fn with_separation(mut self, min: f64, max: f64) -> Self {
        self.min_separation = min;
        self.max_separation = max;
        self
    }

    /// Place a synthesised R2 at `(1 - ratio)` times the R1 position
    #[must_use]
    pub const fn with_fallback_ratio(mut self, ratio: f64) -> Self {
        self.fallback_ratio = ratio;
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Locate R1 and R2 on `spectrum`
    ///
    /// Candidates from a matched-filter search give the starting positions. The shape is then
    /// fitted twice within windows around them: first with residuals scaled by the signal
    /// magnitude so the taller line does not dominate, then with the weighting of `spectrum`,
    /// which also yields the parameter covariance.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientData`] from the peak search when `spectrum` is too short to
    /// filter, and [`Error::FitConvergence`] when either fit fails, including when the windows
    /// hold too few samples.
    pub fn locate(&self, spectrum: &Spectrum) -> Result<PeakFit> {
        let candidates = find_peaks(spectrum)?;
        log::debug!("peak search found {} candidates", candidates.len());
        let (r1, r2) = self.pair(&candidates, spectrum);

        let curve = CurveModel::new(self.shape, self.shape.initial_parameters(r1, r2))?;
        let windowed = spectrum
            .clone()
            .with_curve(curve)
            .focus_on_points(&[r1.0, r2.0], self.shape.window_half_width())
            .map_err(|e| {
                Error::convergence(
                    Stage::PeakSearch,
                    &self.shape.to_string(),
                    format!("cannot place fit windows at {:.3} and {:.3} nm: {e}", r1.0, r2.0),
                )
            })?;
        let focused = windowed.focused();

        let largest = focused.y().iter().fold(0., |acc: f64, y| acc.max(y.abs()));
        let epsilon = if largest > 0. { 1e-3 * largest } else { 1. };
        let sigma = focused.y().mapv(|y| y.abs().max(epsilon));
        let first = self
            .problem(focused.curve(), &focused, sigma)?
            .solve_levenberg_marquardt(focused.curve().parameters().clone(), self.max_iterations)?;

        let focused = focused
            .clone()
            .with_curve(focused.curve().with_parameters(first.parameters.clone())?);
        let sigma = focused.residual_weights();
        let second = self
            .problem(focused.curve(), &focused, sigma)?
            .solve_levenberg_marquardt(first.parameters, self.max_iterations)?;

        let curve = focused
            .curve()
            .with_parameters(second.parameters.clone())?
            .with_uncertainties(second.uncertainties());
        let (r1, r2) = self.extract(&curve)?;
        log::info!(
            "fitted {} in {} + {} iterations: R1 = {} nm, R2 = {} nm",
            self.shape,
            first.iterations,
            second.iterations,
            r1.center,
            r2.center
        );

        Ok(PeakFit {
            r1,
            r2,
            spectrum: windowed.with_curve(curve.clone()),
            curve,
        })
    }

    fn problem(&self, curve: &CurveModel, focused: &Spectrum, sigma: Array1<f64>) -> Result<Problem> {
        Problem::new(curve, focused, sigma, Stage::PeakFit).map_err(|e| match e {
            Error::InsufficientData {
                required,
                available,
                ..
            } => Error::convergence(
                Stage::PeakFit,
                &self.shape.to_string(),
                format!("{available} samples in the fit windows, at least {required} required"),
            ),
            other => other,
        })
    }

    /// Starting (position, height) of R1 and R2 from ranked candidates
    ///
    /// The tallest candidate is R1. The runner-up is R2 only if it lies within the separation
    /// window below R1, otherwise R2 is synthesised below R1 at half its height.
    fn pair(&self, candidates: &[(f64, f64)], spectrum: &Spectrum) -> ((f64, f64), (f64, f64)) {
        let Some(&(x1, y1)) = candidates.first() else {
            let tallest = spectrum.y().iter().copied().fold(0., f64::max);
            log::warn!("no peaks found, starting from the zero-pressure line positions");
            return ((R1_FALLBACK, tallest), (R2_FALLBACK, tallest / 2.));
        };
        match candidates.get(1) {
            Some(&(x2, y2))
                if x2 > x1 - self.max_separation && x2 < x1 - self.min_separation =>
            {
                ((x1, y1), (x2, y2))
            }
            _ => {
                let synthesised = (x1 * (1. - self.fallback_ratio), y1 / 2.);
                log::warn!(
                    "no R2 candidate found between {} and {} nm below R1, assuming R2 at {:.3} nm",
                    self.min_separation,
                    self.max_separation,
                    synthesised.0
                );
                ((x1, y1), synthesised)
            }
        }
    }

    /// Read the line centres and heights from the fitted parameters, longer wavelength first
    fn extract(&self, curve: &CurveModel) -> Result<(PeakResult, PeakResult)> {
        let missing = || {
            Error::convergence(
                Stage::PeakFit,
                &self.shape.to_string(),
                "fitted curve lacks line parameters",
            )
        };
        let lobes = self.shape.lobes().ok_or_else(missing)?;
        let mut peaks = lobes
            .iter()
            .map(|lobe| {
                Some(PeakResult {
                    center: curve.parameter(lobe.center)?,
                    height: curve.parameter(lobe.height)?,
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(missing)?;
        peaks.sort_by(|a, b| b.center.value().total_cmp(&a.center.value()));
        let r2 = peaks.pop().ok_or_else(missing)?;
        let r1 = peaks.pop().ok_or_else(missing)?;
        Ok((r1, r2))
    }
}

/// Candidate peaks of `spectrum` as (position, height), tallest first
///
/// The samples are convolved with Ricker wavelets of several widths up to [`FILTER_SPAN`].
/// A candidate is a positive local maximum of the summed response that also appears as a
/// local maximum at every width, and whose response exceeds the noise floor. Each candidate is
/// then moved to the tallest sample nearby.
///
/// # Errors
/// Returns [`Error::InsufficientData`] for fewer than three samples.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn find_peaks(spectrum: &Spectrum) -> Result<Vec<(f64, f64)>> {
    let (x, y) = (spectrum.x(), spectrum.y());
    let n = y.len();
    if n < 3 {
        return Err(Error::InsufficientData {
            stage: Stage::PeakSearch,
            model: "matched filter".to_owned(),
            required: 3,
            available: n,
        });
    }
    let span = x.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        - x.iter().copied().fold(f64::INFINITY, f64::min);
    let spacing = span / n as f64;
    if spacing.partial_cmp(&0.) != Some(std::cmp::Ordering::Greater) {
        return Ok(vec![]);
    }
    let width = (FILTER_SPAN / spacing) as usize + 1;
    let widths = [width as f64 / 2., 3. * width as f64 / 4., width as f64];

    let rows = widths
        .iter()
        .map(|w| {
            let w = w.max(1.);
            let points = ((10. * w) as usize).min(n);
            convolve_same(y, &ricker(points, w))
        })
        .collect::<Vec<_>>();
    let combined = rows
        .iter()
        .fold(Array1::zeros(n), |acc: Array1<f64>, row| acc + row);

    let magnitudes = combined.iter().map(|c| c.abs()).collect::<Vec<_>>();
    let noise = percentile(&magnitudes, NOISE_PERCENTILE).unwrap_or(0.);
    let tolerance = (width / 2).max(1);

    let candidates = (1..n - 1)
        .filter(|&ii| is_local_maximum(&combined, ii) && combined[ii] > 0.)
        .filter(|&ii| noise <= 0. || combined[ii] / noise >= MIN_SNR)
        .filter(|&ii| {
            rows.iter().all(|row| {
                let lower = ii.saturating_sub(tolerance).max(1);
                let upper = (ii + tolerance).min(n - 2);
                (lower..=upper).any(|jj| is_local_maximum(row, jj) && row[jj] > 0.)
            })
        })
        .map(|ii| {
            let lower = ii.saturating_sub(width / 2);
            let upper = (ii + width / 2).min(n - 1);
            (lower..=upper)
                .max_by(|a, b| y[*a].total_cmp(&y[*b]))
                .unwrap_or(ii)
        })
        .unique()
        .map(|ii| (x[ii], y[ii]))
        .sorted_by(|a, b| b.1.total_cmp(&a.1))
        .collect();
    Ok(candidates)
}

fn is_local_maximum(values: &Array1<f64>, ii: usize) -> bool {
    values[ii] >= values[ii - 1] && values[ii] > values[ii + 1]
}

#[cfg(test)]
mod test {
    use ndarray::Array1;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    use super::{find_peaks, PeakLocator};
    use crate::curve::Shape;
    use crate::error::Stage;
    use crate::spectrum::Spectrum;
    use crate::{Error, Result};

    fn gaussian(x: f64, a: f64, mu: f64, si: f64) -> f64 {
        a * (-(x - mu).powi(2) / (2. * si.powi(2))).exp()
    }

    fn ruby_lines(r1: f64, r2: f64, noise: f64) -> Result<Spectrum> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = Array1::linspace(690., 700., 201);
        let noise = Array1::random_using(x.len(), Normal::new(0., noise).unwrap(), &mut rng);
        let y = x.mapv(|x| gaussian(x, 1.0, r1, 0.35) + gaussian(x, 0.6, r2, 0.35)) + noise;
        Spectrum::new(x, y)
    }

    #[test]
    fn both_lines_are_found_by_the_search() -> Result<()> {
        let spectrum = ruby_lines(694.2, 692.8, 0.01)?;
        let candidates = find_peaks(&spectrum)?;
        assert!(candidates.len() >= 2);
        approx::assert_relative_eq!(candidates[0].0, 694.2, epsilon = 0.15);
        approx::assert_relative_eq!(candidates[1].0, 692.8, epsilon = 0.15);
        assert!(candidates[0].1 > candidates[1].1);
        Ok(())
    }

    #[test]
    fn every_shape_recovers_line_centres() -> Result<()> {
        let spectrum = ruby_lines(694.2, 692.8, 0.01)?;
        for shape in [Shape::TwoGaussians, Shape::TwoPseudoVoigts, Shape::Camel] {
            let fit = PeakLocator::new(shape)?.locate(&spectrum)?;
            approx::assert_relative_eq!(fit.r1.center.value(), 694.2, epsilon = 0.02);
            approx::assert_relative_eq!(fit.r2.center.value(), 692.8, epsilon = 0.02);
            assert!(fit.r1.center.uncertainty() > 0.);
            assert!(fit.r1.center.uncertainty() < 0.05);
            assert!(fit.spectrum.focus().contains(694.2));
        }
        Ok(())
    }

    #[test]
    fn missing_r2_is_synthesised_below_r1() -> Result<()> {
        let spectrum = ruby_lines(694.2, 692.8, 0.01)?;
        let locator = PeakLocator::new(Shape::TwoGaussians)?;

        let (r1, r2) = locator.pair(&[(694.2, 1.0)], &spectrum);
        assert_eq!(r1, (694.2, 1.0));
        approx::assert_relative_eq!(r2.0, 694.2 * 0.998);
        approx::assert_relative_eq!(r2.1, 0.5);

        // a runner-up above R1 is not R2
        let (_, r2) = locator.pair(&[(694.2, 1.0), (695.0, 0.7)], &spectrum);
        approx::assert_relative_eq!(r2.0, 694.2 * 0.998);

        let (_, r2) = locator.pair(&[(694.2, 1.0), (692.8, 0.6)], &spectrum);
        assert_eq!(r2, (692.8, 0.6));
        Ok(())
    }

    #[test]
    fn empty_search_starts_from_zero_pressure_positions() -> Result<()> {
        let spectrum = Spectrum::load(vec![690., 691., 692.], vec![0.5, 2.0, 0.5])?;
        let locator = PeakLocator::new(Shape::Camel)?;
        let (r1, r2) = locator.pair(&[], &spectrum);
        assert_eq!(r1, (694.24, 2.0));
        assert_eq!(r2, (692.75, 1.0));
        Ok(())
    }

    #[test]
    fn sparse_windows_fail_to_converge() -> Result<()> {
        let x = Array1::linspace(690., 700., 21);
        let y = x.mapv(|x| gaussian(x, 1.0, 694.2, 0.35));
        let spectrum = Spectrum::new(x, y)?;
        assert!(matches!(
            PeakLocator::new(Shape::TwoGaussians)?.locate(&spectrum),
            Err(Error::FitConvergence { .. })
        ));
        Ok(())
    }

    #[test]
    fn spectra_too_short_to_filter_fail_in_the_search() -> Result<()> {
        let spectrum = Spectrum::load(vec![694., 694.5], vec![1., 0.5])?;
        assert!(matches!(
            PeakLocator::new(Shape::TwoGaussians)?.locate(&spectrum),
            Err(Error::InsufficientData {
                stage: Stage::PeakSearch,
                required: 3,
                available: 2,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn background_shapes_are_not_peak_shapes() {
        assert!(PeakLocator::new(Shape::Polynomial { degree: 1 }).is_err());
    }
}
