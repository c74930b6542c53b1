use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::curve::CurveModel;
use crate::interval::IntervalSet;
use crate::{Error, Result};

/// How residuals are scaled when a curve is fitted to a spectrum
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    /// Every sample counts the same
    #[default]
    #[serde(rename = "equal")]
    Equal,
    /// Huber-type down-weighting of large residuals
    #[serde(rename = "huber", alias = "robust")]
    Robust,
}

/// Ordered spectral samples together with the curve currently describing them
///
/// The focus selects the samples used by the next fit. Every transformation returns a new
/// spectrum, leaving the original untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    x: Array1<f64>,
    y: Array1<f64>,
    curve: CurveModel,
    focus: IntervalSet,
    weighting: Weighting,
    huber_fraction: f64,
}

impl Spectrum {
    /// Default Huber tolerance as a fraction of the largest absolute residual
    pub const HUBER_FRACTION: f64 = 0.01;

    /// Build a spectrum from raw samples
    ///
    /// # Errors
    /// Returns [`Error::MismatchedSamples`] if `x` and `y` differ in length and
    /// [`Error::EmptySpectrum`] if there are no samples.
    pub fn load(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        Self::new(Array1::from(x), Array1::from(y))
    }

    /// # Errors
    /// Returns [`Error::MismatchedSamples`] if `x` and `y` differ in length and
    /// [`Error::EmptySpectrum`] if there are no samples.
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::MismatchedSamples {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.is_empty() {
            return Err(Error::EmptySpectrum);
        }
        Ok(Self {
            x,
            y,
            curve: CurveModel::zero(),
            focus: IntervalSet::unbounded(),
            weighting: Weighting::Equal,
            huber_fraction: Self::HUBER_FRACTION,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[must_use]
    pub const fn x(&self) -> &Array1<f64> {
        &self.x
    }

    #[must_use]
    pub const fn y(&self) -> &Array1<f64> {
        &self.y
    }

    #[must_use]
    pub const fn curve(&self) -> &CurveModel {
        &self.curve
    }

    #[must_use]
    pub const fn focus(&self) -> &IntervalSet {
        &self.focus
    }

    #[must_use]
    pub const fn weighting(&self) -> Weighting {
        self.weighting
    }

    #[must_use]
    pub const fn huber_fraction(&self) -> f64 {
        self.huber_fraction
    }

    #[must_use]
    pub fn with_curve(self, curve: CurveModel) -> Self {
        Self { curve, ..self }
    }

    #[must_use]
    pub fn with_focus(self, focus: IntervalSet) -> Self {
        Self { focus, ..self }
    }

    #[must_use]
    pub fn with_weighting(self, weighting: Weighting) -> Self {
        Self { weighting, ..self }
    }

    #[must_use]
    pub fn with_huber_fraction(self, huber_fraction: f64) -> Self {
        Self {
            huber_fraction,
            ..self
        }
    }

    /// The closed interval spanned by the sample abscissae
    #[must_use]
    pub fn domain(&self) -> IntervalSet {
        let lower = self.x.iter().copied().fold(f64::INFINITY, f64::min);
        let upper = self.x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        IntervalSet::new(lower, upper).unwrap_or_default()
    }

    /// Samples whose abscissa lies in `region`, with the same curve, focus and weighting
    #[must_use]
    pub fn within(&self, region: &IntervalSet) -> Self {
        let (x, y): (Vec<f64>, Vec<f64>) = self
            .x
            .iter()
            .zip(&self.y)
            .filter(|(x, _)| region.contains(**x))
            .map(|(x, y)| (*x, *y))
            .unzip();
        Self {
            x: Array1::from(x),
            y: Array1::from(y),
            curve: self.curve.clone(),
            focus: self.focus.clone(),
            weighting: self.weighting,
            huber_fraction: self.huber_fraction,
        }
    }

    /// Samples inside the current focus
    #[must_use]
    pub fn focused(&self) -> Self {
        self.within(&self.focus)
    }

    /// Focus on every sample
    #[must_use]
    pub fn focus_on_whole(self) -> Self {
        self.with_focus(IntervalSet::unbounded())
    }

    /// Focus on `fraction` of the domain width at each end of the spectrum
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] for a negative fraction.
    pub fn focus_on_edges(self, fraction: f64) -> Result<Self> {
        let domain = self.domain();
        let (Some(lower), Some(upper)) = (domain.lower(), domain.upper()) else {
            return Ok(self.with_focus(IntervalSet::empty()));
        };
        let margin = fraction * (upper - lower);
        let edges = IntervalSet::from_pairs([(lower, lower + margin), (upper - margin, upper)])?;
        Ok(self.with_focus(edges))
    }

    /// Focus on windows of `half_width` around each of `points`, clipped to the domain
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] for a negative half-width.
    pub fn focus_on_points(self, points: &[f64], half_width: f64) -> Result<Self> {
        let windows = IntervalSet::from_pairs(
            points
                .iter()
                .map(|point| (point - half_width, point + half_width)),
        )?;
        let focus = &windows & &self.domain();
        Ok(self.with_focus(focus))
    }

    /// Current curve evaluated at every abscissa
    #[must_use]
    pub fn fitted(&self) -> Array1<f64> {
        self.curve.evaluate_all(&self.x)
    }

    /// `y - curve(x)` for every sample
    #[must_use]
    pub fn residuals(&self) -> Array1<f64> {
        &self.y - &self.fitted()
    }

    /// The samples with the current curve subtracted, described by the zero curve
    #[must_use]
    pub fn subtract_curve(&self) -> Self {
        Self {
            y: self.residuals(),
            curve: CurveModel::zero(),
            ..self.clone()
        }
    }

    /// Scale dividing each residual in a weighted fit
    ///
    /// For [`Weighting::Robust`] with residual $d$ and tolerance $t$, a fixed fraction of the
    /// largest $|d|$,
    /// $$
    ///     \sigma = \begin{cases} t^2 & |d| < t \\\\ t (2|d| - t) & \text{otherwise} \end{cases}
    /// $$
    /// so samples far from the curve lose influence. When every residual vanishes, or for
    /// [`Weighting::Equal`], all scales are one.
    #[must_use]
    pub fn residual_weights(&self) -> Array1<f64> {
        match self.weighting {
            Weighting::Equal => Array1::ones(self.len()),
            Weighting::Robust => {
                let residuals = self.residuals();
                let largest = residuals.iter().fold(0., |acc: f64, d| acc.max(d.abs()));
                let t = self.huber_fraction * largest;
                if t > 0. {
                    residuals.mapv(|d| {
                        if d.abs() < t {
                            t.powi(2)
                        } else {
                            t * 2.0f64.mul_add(d.abs(), -t)
                        }
                    })
                } else {
                    Array1::ones(self.len())
                }
            }
        }
    }

    /// Mean of the squared weighted residuals over the focused samples
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mean_squared_error(&self) -> f64 {
        let focused = self.focused();
        if focused.is_empty() {
            return 0.;
        }
        let weighted = focused.residuals() / focused.residual_weights();
        weighted.mapv(|r| r.powi(2)).sum() / focused.len() as f64
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array1;

    use super::{Spectrum, Weighting};
    use crate::curve::{CurveModel, Shape};
    use crate::interval::IntervalSet;
    use crate::{Error, Result};

    fn ramp() -> Result<Spectrum> {
        let x = (0..=10).map(f64::from).collect::<Vec<_>>();
        let y = x.iter().map(|x| 2. * x + 1.).collect();
        Spectrum::load(x, y)
    }

    #[test]
    fn mismatched_samples_are_rejected() {
        assert!(matches!(
            Spectrum::load(vec![1., 2.], vec![1.]),
            Err(Error::MismatchedSamples { x: 2, y: 1 })
        ));
        assert!(matches!(
            Spectrum::load(vec![], vec![]),
            Err(Error::EmptySpectrum)
        ));
    }

    #[test]
    fn restriction_keeps_samples_in_region() -> Result<()> {
        let spectrum = ramp()?.with_weighting(Weighting::Robust);
        let region = IntervalSet::from_pairs([(0., 2.), (8.5, 20.)])?;
        let restricted = spectrum.within(&region);
        assert_eq!(restricted.x().to_vec(), vec![0., 1., 2., 9., 10.]);
        assert_eq!(restricted.y().to_vec(), vec![1., 3., 5., 19., 21.]);
        assert_eq!(restricted.weighting(), Weighting::Robust);
        Ok(())
    }

    #[test]
    fn edge_focus_covers_both_ends() -> Result<()> {
        let spectrum = ramp()?.focus_on_edges(0.2)?;
        assert_eq!(spectrum.focused().x().to_vec(), vec![0., 1., 2., 8., 9., 10.]);
        Ok(())
    }

    #[test]
    fn point_focus_is_clipped_to_domain() -> Result<()> {
        let spectrum = ramp()?.focus_on_points(&[0., 5.], 1.)?;
        assert_eq!(
            spectrum.focus(),
            &IntervalSet::from_pairs([(0., 1.), (4., 6.)])?
        );
        assert_eq!(spectrum.focused().len(), 5);
        Ok(())
    }

    #[test]
    fn exact_curve_has_no_error() -> Result<()> {
        let line = CurveModel::new(Shape::Polynomial { degree: 1 }, Array1::from(vec![1., 2.]))?;
        let spectrum = ramp()?.with_curve(line);
        approx::assert_relative_eq!(spectrum.mean_squared_error(), 0.);
        assert!(spectrum.subtract_curve().y().iter().all(|y| y.abs() < 1e-12));

        let robust = spectrum.with_weighting(Weighting::Robust);
        assert!(robust.residual_weights().iter().all(|w| (*w - 1.).abs() < f64::EPSILON));
        Ok(())
    }

    #[test]
    fn huber_scales_grow_with_residual() -> Result<()> {
        let spectrum = Spectrum::load(vec![0., 1., 2., 3.], vec![0., 0.001, 0.5, -1.])?
            .with_weighting(Weighting::Robust)
            .with_huber_fraction(0.1);
        let weights = spectrum.residual_weights();
        // t = 0.1
        approx::assert_relative_eq!(weights[0], 0.01);
        approx::assert_relative_eq!(weights[1], 0.01);
        approx::assert_relative_eq!(weights[2], 0.1 * (2. * 0.5 - 0.1));
        approx::assert_relative_eq!(weights[3], 0.1 * (2. * 1. - 0.1));
        assert!(weights[3] > weights[2]);
        Ok(())
    }

    #[test]
    fn mean_squared_error_uses_focused_samples() -> Result<()> {
        let spectrum = Spectrum::load(vec![0., 1., 2., 3.], vec![1., 1., 3., 3.])?;
        approx::assert_relative_eq!(spectrum.mean_squared_error(), 5.);
        let focused = spectrum.with_focus(IntervalSet::new(0., 1.)?);
        approx::assert_relative_eq!(focused.mean_squared_error(), 1.);
        Ok(())
    }
}
