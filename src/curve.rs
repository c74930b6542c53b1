use std::f64::consts::LN_2;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::interval::IntervalSet;
use crate::math::{polynomial, vandermonde};
use crate::measurement::Measurement;
use crate::{Error, Result};

/// Family of functions a [`CurveModel`] belongs to
///
/// Parameter layouts:
/// - `Polynomial`: `c0, c1, .., c_degree`
/// - `TwoGaussians`: `a1, mu1, sigma1, a2, mu2, sigma2`
/// - `TwoPseudoVoigts`: `a1, mu1, fwhm1, eta1, a2, mu2, fwhm2, eta2`
/// - `Camel`: `a1, mu1, sigma1, a2, mu2, sigma2, a, sigma`, the last lobe centred halfway
///   between the other two
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Zero,
    Polynomial { degree: usize },
    #[serde(rename = "gaussian")]
    TwoGaussians,
    #[serde(rename = "pseudovoigt")]
    TwoPseudoVoigts,
    Camel,
}

/// Parameter indices describing one emission line of a peak shape
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lobe {
    pub center: usize,
    pub height: usize,
}

impl Shape {
    #[must_use]
    pub const fn parameter_count(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::Polynomial { degree } => *degree + 1,
            Self::TwoGaussians => 6,
            Self::TwoPseudoVoigts | Self::Camel => 8,
        }
    }

    /// The R1 and R2 lobes, for shapes describing a pair of emission lines
    #[must_use]
    pub const fn lobes(&self) -> Option<[Lobe; 2]> {
        match self {
            Self::TwoGaussians | Self::Camel => Some([
                Lobe {
                    center: 1,
                    height: 0,
                },
                Lobe {
                    center: 4,
                    height: 3,
                },
            ]),
            Self::TwoPseudoVoigts => Some([
                Lobe {
                    center: 1,
                    height: 0,
                },
                Lobe {
                    center: 5,
                    height: 4,
                },
            ]),
            Self::Zero | Self::Polynomial { .. } => None,
        }
    }

    /// Half-width of the fitting window placed around each emission line
    #[must_use]
    pub const fn window_half_width(&self) -> f64 {
        match self {
            Self::TwoGaussians => 0.25,
            Self::TwoPseudoVoigts | Self::Camel => 0.5,
            Self::Zero | Self::Polynomial { .. } => 0.,
        }
    }

    /// Starting parameters for a fit given (position, height) guesses of both lines
    #[must_use]
    pub fn initial_parameters(&self, r1: (f64, f64), r2: (f64, f64)) -> Array1<f64> {
        let ((mu1, a1), (mu2, a2)) = (r1, r2);
        match self {
            Self::Zero => Array1::zeros(0),
            Self::Polynomial { degree } => Array1::zeros(degree + 1),
            Self::TwoGaussians => Array1::from(vec![a1, mu1, 0.3, a2, mu2, 0.3]),
            Self::TwoPseudoVoigts => Array1::from(vec![a1, mu1, 0.6, 0.5, a2, mu2, 0.6, 0.5]),
            Self::Camel => Array1::from(vec![a1, mu1, 0.35, a2, mu2, 0.35, a1 / 10., 1.]),
        }
    }

    /// Value at `x`; `p` must hold exactly [`Shape::parameter_count`] values
    fn value(&self, x: f64, p: &[f64]) -> f64 {
        match self {
            Self::Zero => 0.,
            Self::Polynomial { .. } => polynomial(x, p),
            Self::TwoGaussians => gaussian(x, p[0], p[1], p[2]) + gaussian(x, p[3], p[4], p[5]),
            Self::TwoPseudoVoigts => {
                pseudo_voigt(x, p[0], p[1], p[2], p[3]) + pseudo_voigt(x, p[4], p[5], p[6], p[7])
            }
            Self::Camel => {
                gaussian(x, p[0], p[1], p[2])
                    + gaussian(x, p[3], p[4], p[5])
                    + gaussian(x, p[6], (p[1] + p[4]) / 2., p[7])
            }
        }
    }

    /// Derivatives of the value at `x` with respect to every parameter
    fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64> {
        match self {
            Self::Zero => vec![],
            Self::Polynomial { degree } => {
                let mut powers = vec![1.; degree + 1];
                for jj in 1..=*degree {
                    powers[jj] = powers[jj - 1] * x;
                }
                powers
            }
            Self::TwoGaussians => {
                let mut gradient = gaussian_gradient(x, p[0], p[1], p[2]).to_vec();
                gradient.extend(gaussian_gradient(x, p[3], p[4], p[5]));
                gradient
            }
            Self::TwoPseudoVoigts => {
                let mut gradient = pseudo_voigt_gradient(x, p[0], p[1], p[2], p[3]).to_vec();
                gradient.extend(pseudo_voigt_gradient(x, p[4], p[5], p[6], p[7]));
                gradient
            }
            Self::Camel => {
                let [da1, dmu1, dsi1] = gaussian_gradient(x, p[0], p[1], p[2]);
                let [da2, dmu2, dsi2] = gaussian_gradient(x, p[3], p[4], p[5]);
                let [da, dmu, dsi] = gaussian_gradient(x, p[6], (p[1] + p[4]) / 2., p[7]);
                vec![
                    da1,
                    dmu1 + dmu / 2.,
                    dsi1,
                    da2,
                    dmu2 + dmu / 2.,
                    dsi2,
                    da,
                    dsi,
                ]
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("zero"),
            Self::Polynomial { degree } => write!(f, "polynomial of degree {degree}"),
            Self::TwoGaussians => f.write_str("two Gaussians"),
            Self::TwoPseudoVoigts => f.write_str("two pseudo-Voigts"),
            Self::Camel => f.write_str("camel"),
        }
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', ' ', '_'], "").as_str() {
            "gaussian" | "gaussians" | "twogaussians" => Ok(Self::TwoGaussians),
            "pseudovoigt" | "pseudovoigts" | "twopseudovoigts" => Ok(Self::TwoPseudoVoigts),
            "camel" => Ok(Self::Camel),
            _ => Err(Error::UnknownStrategy {
                family: "peak shape",
                name: s.to_owned(),
            }),
        }
    }
}

fn gaussian(x: f64, a: f64, mu: f64, si: f64) -> f64 {
    a * (-(x - mu).powi(2) / (2. * si.powi(2))).exp()
}

fn gaussian_gradient(x: f64, a: f64, mu: f64, si: f64) -> [f64; 3] {
    let e = (-(x - mu).powi(2) / (2. * si.powi(2))).exp();
    [
        e,
        a * e * (x - mu) / si.powi(2),
        a * e * (x - mu).powi(2) / si.powi(3),
    ]
}

fn lorentzian(x: f64, a: f64, mu: f64, ga: f64) -> f64 {
    a * ga.powi(2) / ((x - mu).powi(2) + ga.powi(2))
}

fn lorentzian_gradient(x: f64, a: f64, mu: f64, ga: f64) -> [f64; 3] {
    let d = (x - mu).powi(2) + ga.powi(2);
    [
        ga.powi(2) / d,
        2. * a * ga.powi(2) * (x - mu) / d.powi(2),
        2. * a * ga * (x - mu).powi(2) / d.powi(2),
    ]
}

/// Gaussian standard deviation matching a full width at half maximum of one
fn sigma_per_fwhm() -> f64 {
    (8. * LN_2).sqrt().recip()
}

fn pseudo_voigt(x: f64, a: f64, mu: f64, w: f64, eta: f64) -> f64 {
    eta * gaussian(x, a, mu, w * sigma_per_fwhm()) + (1. - eta) * lorentzian(x, a, mu, w / 2.)
}

fn pseudo_voigt_gradient(x: f64, a: f64, mu: f64, w: f64, eta: f64) -> [f64; 4] {
    let [ga_a, ga_mu, ga_si] = gaussian_gradient(x, a, mu, w * sigma_per_fwhm());
    let [lo_a, lo_mu, lo_ga] = lorentzian_gradient(x, a, mu, w / 2.);
    [
        eta * ga_a + (1. - eta) * lo_a,
        eta * ga_mu + (1. - eta) * lo_mu,
        eta * ga_si * sigma_per_fwhm() + (1. - eta) * lo_ga / 2.,
        gaussian(x, a, mu, w * sigma_per_fwhm()) - lorentzian(x, a, mu, w / 2.),
    ]
}

/// A parametrised function of one variable with fitted parameter values and standard errors
///
/// Each parameter is one error source, created when the parameters are set, so repeated reads
/// of the same parameter through [`CurveModel::parameter`] are fully correlated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "StoredCurve")]
pub struct CurveModel {
    shape: Shape,
    parameters: Array1<f64>,
    uncertainties: Array1<f64>,
    #[serde(skip)]
    measurements: Vec<Measurement>,
}

/// A [`CurveModel`] as read back from a document, before its arity is checked
#[derive(Deserialize)]
struct StoredCurve {
    shape: Shape,
    parameters: Array1<f64>,
    #[serde(default)]
    uncertainties: Option<Array1<f64>>,
}

impl TryFrom<StoredCurve> for CurveModel {
    type Error = Error;

    fn try_from(stored: StoredCurve) -> Result<Self> {
        let curve = Self::new(stored.shape, stored.parameters)?;
        match stored.uncertainties {
            Some(uncertainties) => {
                check_arity(stored.shape, uncertainties.len())?;
                Ok(curve.with_uncertainties(uncertainties))
            }
            None => Ok(curve),
        }
    }
}

impl PartialEq for CurveModel {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.parameters == other.parameters
            && self.uncertainties == other.uncertainties
    }
}

impl Default for CurveModel {
    fn default() -> Self {
        Self::zero()
    }
}

impl CurveModel {
    /// The function returning zero everywhere
    #[must_use]
    pub fn zero() -> Self {
        Self {
            shape: Shape::Zero,
            parameters: Array1::zeros(0),
            uncertainties: Array1::zeros(0),
            measurements: vec![],
        }
    }

    /// # Errors
    /// Returns [`Error::Arity`] if `parameters` does not match the shape.
    pub fn new(shape: Shape, parameters: Array1<f64>) -> Result<Self> {
        check_arity(shape, parameters.len())?;
        let uncertainties = Array1::zeros(parameters.len());
        let measurements = parameters.iter().copied().map(Measurement::exact).collect();
        Ok(Self {
            shape,
            parameters,
            uncertainties,
            measurements,
        })
    }

    /// The same shape with new parameters and no uncertainty
    ///
    /// # Errors
    /// Returns [`Error::Arity`] if `parameters` does not match the shape.
    pub fn with_parameters(&self, parameters: Array1<f64>) -> Result<Self> {
        Self::new(self.shape, parameters)
    }

    /// Attach standard errors, making every parameter a new error source
    pub(crate) fn with_uncertainties(mut self, uncertainties: Array1<f64>) -> Self {
        self.measurements = self
            .parameters
            .iter()
            .enumerate()
            .map(|(ii, value)| {
                Measurement::new(*value, uncertainties.get(ii).copied().unwrap_or(0.))
            })
            .collect();
        self.uncertainties = uncertainties;
        self
    }

    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    #[must_use]
    pub const fn parameters(&self) -> &Array1<f64> {
        &self.parameters
    }

    #[must_use]
    pub const fn uncertainties(&self) -> &Array1<f64> {
        &self.uncertainties
    }

    /// Parameter `index` together with its standard error
    #[must_use]
    pub fn parameter(&self, index: usize) -> Option<Measurement> {
        self.measurements.get(index).cloned()
    }

    #[must_use]
    pub fn evaluate(&self, x: f64) -> f64 {
        self.shape.value(x, self.parameters.as_slice().unwrap_or(&[]))
    }

    /// Evaluate at `x` with `parameters` overriding the stored ones
    ///
    /// # Errors
    /// Returns [`Error::Arity`] if the number of parameters does not match the shape.
    pub fn evaluate_with(&self, x: f64, parameters: &[f64]) -> Result<f64> {
        check_arity(self.shape, parameters.len())?;
        Ok(self.shape.value(x, parameters))
    }

    #[must_use]
    pub fn evaluate_all(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|xi| self.evaluate(xi))
    }

    /// Sample the curve at `points` evenly spaced abscissae spanning `region`
    ///
    /// Abscissae falling in gaps of `region` are dropped. Returns `None` for an empty or unbounded
    /// region.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn sample(&self, region: &IntervalSet, points: usize) -> Option<(Array1<f64>, Array1<f64>)> {
        let (lower, upper) = (region.lower()?, region.upper()?);
        if !(lower.is_finite() && upper.is_finite()) || points < 2 {
            return None;
        }
        let x = Array1::linspace(lower, upper, points)
            .into_iter()
            .filter(|x| region.contains(*x))
            .collect::<Array1<f64>>();
        let y = self.evaluate_all(&x);
        Some((x, y))
    }

    /// Jacobian of the model at `x` with respect to `parameters`
    pub(crate) fn jacobian(&self, x: &Array1<f64>, parameters: &Array1<f64>) -> Array2<f64> {
        if let Shape::Polynomial { degree } = self.shape {
            return vandermonde(x, degree);
        }
        let p = parameters.to_vec();
        let mut jacobian = Array2::zeros((x.len(), p.len()));
        for (mut row, xi) in jacobian.rows_mut().into_iter().zip(x) {
            row.assign(&Array1::from(self.shape.gradient(*xi, &p)));
        }
        jacobian
    }

    /// Values at `x` using `parameters` instead of the stored ones
    pub(crate) fn values_with(&self, x: &Array1<f64>, parameters: &Array1<f64>) -> Array1<f64> {
        let p = parameters.to_vec();
        x.mapv(|xi| self.shape.value(xi, &p))
    }
}

fn check_arity(shape: Shape, found: usize) -> Result<()> {
    let expected = shape.parameter_count();
    if found == expected {
        Ok(())
    } else {
        Err(Error::Arity {
            model: shape.to_string(),
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod test {
    use ndarray::Array1;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{CurveModel, Shape};
    use crate::interval::IntervalSet;
    use crate::{Error, Result};

    fn random_parameters(shape: Shape, rng: &mut impl Rng) -> Array1<f64> {
        match shape {
            Shape::TwoGaussians => Array1::from(vec![
                rng.gen_range(0.5..2.0),
                rng.gen_range(694.0..694.5),
                rng.gen_range(0.2..0.5),
                rng.gen_range(0.2..1.0),
                rng.gen_range(692.5..693.0),
                rng.gen_range(0.2..0.5),
            ]),
            Shape::TwoPseudoVoigts => Array1::from(vec![
                rng.gen_range(0.5..2.0),
                rng.gen_range(694.0..694.5),
                rng.gen_range(0.4..1.0),
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.2..1.0),
                rng.gen_range(692.5..693.0),
                rng.gen_range(0.4..1.0),
                rng.gen_range(0.1..0.9),
            ]),
            Shape::Camel => Array1::from(vec![
                rng.gen_range(0.5..2.0),
                rng.gen_range(694.0..694.5),
                rng.gen_range(0.2..0.5),
                rng.gen_range(0.2..1.0),
                rng.gen_range(692.5..693.0),
                rng.gen_range(0.2..0.5),
                rng.gen_range(0.05..0.2),
                rng.gen_range(0.5..1.5),
            ]),
            Shape::Polynomial { degree } => {
                Array1::from_iter((0..=degree).map(|_| rng.gen_range(-1.0..1.0)))
            }
            Shape::Zero => Array1::zeros(0),
        }
    }

    #[test]
    fn jacobian_columns_match_finite_difference() -> Result<()> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        for shape in [
            Shape::TwoGaussians,
            Shape::TwoPseudoVoigts,
            Shape::Camel,
            Shape::Polynomial { degree: 2 },
        ] {
            let params = random_parameters(shape, &mut rng);
            let curve = CurveModel::new(shape, params.clone())?;
            let x = Array1::linspace(692.0, 695.0, 31);

            let computed = curve.jacobian(&x, &params);
            let delta_rel = 1e-6;

            for jj in 0..params.len() {
                let delta = params[jj].abs().max(1e-3) * delta_rel;
                let mut plus = params.clone();
                plus[jj] += delta;
                let mut minus = params.clone();
                minus[jj] -= delta;

                let numerical =
                    (curve.values_with(&x, &plus) - curve.values_with(&x, &minus)) / (2. * delta);

                for (comp, num) in computed.column(jj).iter().zip(numerical) {
                    approx::assert_relative_eq!(*comp, num, epsilon = 1e-5, max_relative = 1e-4);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn wrong_parameter_counts_are_rejected() -> Result<()> {
        let curve = CurveModel::new(Shape::Polynomial { degree: 1 }, Array1::from(vec![1., 2.]))?;
        approx::assert_relative_eq!(curve.evaluate(3.), 7.);
        approx::assert_relative_eq!(curve.evaluate_with(3., &[0., 1.])?, 3.);
        assert!(matches!(
            curve.evaluate_with(3., &[0., 1., 2.]),
            Err(Error::Arity {
                expected: 2,
                found: 3,
                ..
            })
        ));
        assert!(matches!(
            CurveModel::new(Shape::TwoGaussians, Array1::zeros(5)),
            Err(Error::Arity { .. })
        ));
        Ok(())
    }

    #[test]
    fn gaussian_lobes_peak_at_their_centres() -> Result<()> {
        let curve = CurveModel::new(
            Shape::TwoGaussians,
            Array1::from(vec![1.0, 694.2, 0.35, 0.6, 692.75, 0.35]),
        )?;
        assert!(curve.evaluate(694.2) > curve.evaluate(694.1));
        assert!(curve.evaluate(694.2) > curve.evaluate(694.3));
        approx::assert_relative_eq!(curve.evaluate(694.2), 1.0, max_relative = 1e-3);

        let lobes = Shape::TwoGaussians.lobes().unwrap();
        let r2 = curve.parameter(lobes[1].center).unwrap();
        approx::assert_relative_eq!(r2.value(), 692.75);
        Ok(())
    }

    #[test]
    fn pseudo_voigt_width_is_full_width_at_half_maximum() -> Result<()> {
        for eta in [0., 0.5, 1.] {
            let curve = CurveModel::new(
                Shape::TwoPseudoVoigts,
                Array1::from(vec![1.0, 0.0, 2.0, eta, 0.0, 100.0, 1.0, 0.5]),
            )?;
            approx::assert_relative_eq!(curve.evaluate(1.0), 0.5, max_relative = 1e-9);
            approx::assert_relative_eq!(curve.evaluate(-1.0), 0.5, max_relative = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn curves_are_sampled_within_region() -> Result<()> {
        let region = IntervalSet::from_pairs([(0., 1.), (2., 3.)])?;
        let curve = CurveModel::new(Shape::Polynomial { degree: 0 }, Array1::from(vec![4.]))?;
        let (x, y) = curve.sample(&region, 31).unwrap();
        assert!(x.iter().all(|xi| region.contains(*xi)));
        assert!(y.iter().all(|yi| (*yi - 4.).abs() < f64::EPSILON));
        assert!(curve.sample(&IntervalSet::unbounded(), 10).is_none());
        Ok(())
    }

    #[test]
    fn stored_curves_are_checked_against_their_shape() -> Result<()> {
        let short = r#"
            shape = "gaussian"
            parameters = { v = 1, dim = [3], data = [1.0, 694.2, 0.3] }
        "#;
        let error = toml::from_str::<CurveModel>(short).unwrap_err();
        assert!(error.to_string().contains("takes 6 parameters"), "{error}");

        let mismatched = r#"
            shape = { polynomial = { degree = 1 } }
            parameters = { v = 1, dim = [2], data = [1.0, 2.0] }
            uncertainties = { v = 1, dim = [1], data = [0.1] }
        "#;
        assert!(toml::from_str::<CurveModel>(mismatched).is_err());

        let line = r#"
            shape = { polynomial = { degree = 1 } }
            parameters = { v = 1, dim = [2], data = [1.0, 2.0] }
            uncertainties = { v = 1, dim = [2], data = [0.1, 0.2] }
        "#;
        let curve = toml::from_str::<CurveModel>(line).unwrap();
        approx::assert_relative_eq!(curve.evaluate(3.), 7.);
        approx::assert_relative_eq!(curve.parameter(1).unwrap().uncertainty(), 0.2);
        Ok(())
    }

    #[test]
    fn repeated_reads_of_a_parameter_are_correlated() -> Result<()> {
        let curve = CurveModel::new(
            Shape::TwoGaussians,
            Array1::from(vec![1.0, 694.2, 0.35, 0.6, 692.75, 0.35]),
        )?
        .with_uncertainties(Array1::from(vec![0.01, 0.002, 0.003, 0.01, 0.004, 0.003]));

        let first = curve.parameter(1).unwrap();
        let second = curve.parameter(1).unwrap();
        approx::assert_relative_eq!(first.correlation(&second), 1.);
        assert!((first - second).is_exact());

        let other = curve.parameter(4).unwrap();
        approx::assert_relative_eq!(curve.parameter(1).unwrap().covariance(&other), 0.);
        assert!(curve.parameter(8).is_none());
        Ok(())
    }

    #[test]
    fn shapes_are_parsed_from_names() {
        assert_eq!("Gaussian".parse::<Shape>().unwrap(), Shape::TwoGaussians);
        assert_eq!("Pseudo-Voigt".parse::<Shape>().unwrap(), Shape::TwoPseudoVoigts);
        assert_eq!("camel".parse::<Shape>().unwrap(), Shape::Camel);
        assert!("lorentzian".parse::<Shape>().is_err());
    }
}
