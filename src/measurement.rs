use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

use num_traits::{One, Zero};

static NEXT_SOURCE: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Sensitivity {
    /// Standard deviation of the independent source
    standard_deviation: f64,
    /// First derivative of the owning quantity with respect to the source
    derivative: f64,
}

/// A value with a one-sigma standard error
///
/// Errors are propagated to first order. Every measurement created with [`Measurement::new`] is
/// an independent error source, and derived quantities remember their derivative with respect to
/// each source they were computed from. The variance of a derived quantity is then
/// $$
///     \sigma^2 = \sum_i \left(\frac{\partial f}{\partial s_i}\right)^2 \sigma_{s_i}^2
/// $$
/// so two quantities computed from a shared source are correlated, and differences such as
/// `x - x` carry no uncertainty at all.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    value: f64,
    sensitivities: BTreeMap<u64, Sensitivity>,
}

impl Measurement {
    /// Create a new independent error source
    #[must_use]
    pub fn new(value: f64, standard_deviation: f64) -> Self {
        let mut sensitivities = BTreeMap::new();
        let standard_deviation = standard_deviation.abs();
        if standard_deviation > 0.0 {
            sensitivities.insert(
                NEXT_SOURCE.fetch_add(1, Ordering::Relaxed),
                Sensitivity {
                    standard_deviation,
                    derivative: 1.0,
                },
            );
        }
        Self {
            value,
            sensitivities,
        }
    }

    /// A value known without error
    #[must_use]
    pub const fn exact(value: f64) -> Self {
        Self {
            value,
            sensitivities: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn uncertainty(&self) -> f64 {
        self.variance().sqrt()
    }

    #[must_use]
    pub fn variance(&self) -> f64 {
        self.sensitivities
            .values()
            .map(|s| (s.derivative * s.standard_deviation).powi(2))
            .sum()
    }

    /// Covariance through the error sources shared with `other`
    #[must_use]
    pub fn covariance(&self, other: &Self) -> f64 {
        self.sensitivities
            .iter()
            .filter_map(|(source, s)| {
                other
                    .sensitivities
                    .get(source)
                    .map(|o| s.derivative * o.derivative * s.standard_deviation.powi(2))
            })
            .sum()
    }

    #[must_use]
    pub fn correlation(&self, other: &Self) -> f64 {
        let scale = self.uncertainty() * other.uncertainty();
        if scale == 0.0 {
            0.0
        } else {
            self.covariance(other) / scale
        }
    }

    /// True when no error source influences the value
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.sensitivities.values().all(|s| s.derivative == 0.0)
    }

    #[must_use]
    pub fn powi(&self, n: i32) -> Self {
        self.map(self.value.powi(n), f64::from(n) * self.value.powi(n - 1))
    }

    #[must_use]
    pub fn powf(&self, exponent: &Self) -> Self {
        let value = self.value.powf(exponent.value);
        self.chain(
            exponent,
            value,
            exponent.value * self.value.powf(exponent.value - 1.0),
            value * self.value.ln(),
        )
    }

    #[must_use]
    pub fn recip(&self) -> Self {
        self.map(self.value.recip(), -self.value.powi(-2))
    }

    /// Rescale every sensitivity by `derivative`, giving the measurement `f(self)` with value `value`
    fn map(&self, value: f64, derivative: f64) -> Self {
        Self {
            value,
            sensitivities: self
                .sensitivities
                .iter()
                .map(|(source, s)| {
                    (
                        *source,
                        Sensitivity {
                            standard_deviation: s.standard_deviation,
                            derivative: s.derivative * derivative,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Combine two measurements into `f(self, other)` given both partial derivatives of `f`
    fn chain(&self, other: &Self, value: f64, d_self: f64, d_other: f64) -> Self {
        let mut combined = self.map(value, d_self);
        for (source, s) in &other.sensitivities {
            combined
                .sensitivities
                .entry(*source)
                .and_modify(|existing| existing.derivative += d_other * s.derivative)
                .or_insert(Sensitivity {
                    standard_deviation: s.standard_deviation,
                    derivative: d_other * s.derivative,
                });
        }
        combined
    }

    fn plus(&self, rhs: &Self) -> Self {
        self.chain(rhs, self.value + rhs.value, 1.0, 1.0)
    }

    fn minus(&self, rhs: &Self) -> Self {
        self.chain(rhs, self.value - rhs.value, 1.0, -1.0)
    }

    fn times(&self, rhs: &Self) -> Self {
        self.chain(rhs, self.value * rhs.value, rhs.value, self.value)
    }

    fn divided_by(&self, rhs: &Self) -> Self {
        self.chain(
            rhs,
            self.value / rhs.value,
            rhs.value.recip(),
            -self.value / rhs.value.powi(2),
        )
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $combine:ident) => {
        impl $trait<&Measurement> for &Measurement {
            type Output = Measurement;
            fn $method(self, rhs: &Measurement) -> Measurement {
                self.$combine(rhs)
            }
        }

        impl $trait<Measurement> for Measurement {
            type Output = Measurement;
            fn $method(self, rhs: Measurement) -> Measurement {
                self.$combine(&rhs)
            }
        }

        impl $trait<&Measurement> for Measurement {
            type Output = Measurement;
            fn $method(self, rhs: &Measurement) -> Measurement {
                self.$combine(rhs)
            }
        }

        impl $trait<Measurement> for &Measurement {
            type Output = Measurement;
            fn $method(self, rhs: Measurement) -> Measurement {
                self.$combine(&rhs)
            }
        }

        impl $trait<f64> for Measurement {
            type Output = Measurement;
            fn $method(self, rhs: f64) -> Measurement {
                self.$combine(&Measurement::exact(rhs))
            }
        }

        impl $trait<f64> for &Measurement {
            type Output = Measurement;
            fn $method(self, rhs: f64) -> Measurement {
                self.$combine(&Measurement::exact(rhs))
            }
        }

        impl $trait<Measurement> for f64 {
            type Output = Measurement;
            fn $method(self, rhs: Measurement) -> Measurement {
                Measurement::exact(self).$combine(&rhs)
            }
        }

        impl $trait<&Measurement> for f64 {
            type Output = Measurement;
            fn $method(self, rhs: &Measurement) -> Measurement {
                Measurement::exact(self).$combine(rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, plus);
impl_binary_operator!(Sub, sub, minus);
impl_binary_operator!(Mul, mul, times);
impl_binary_operator!(Div, div, divided_by);

impl Neg for Measurement {
    type Output = Self;
    fn neg(self) -> Self {
        self.map(-self.value, -1.0)
    }
}

impl Neg for &Measurement {
    type Output = Measurement;
    fn neg(self) -> Measurement {
        self.map(-self.value, -1.0)
    }
}

impl Zero for Measurement {
    fn zero() -> Self {
        Self::exact(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.sensitivities.is_empty()
    }
}

impl One for Measurement {
    fn one() -> Self {
        Self::exact(1.0)
    }
}

impl Sum for Measurement {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Self> for Measurement {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, m| acc + m)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(precision) => write!(
                f,
                "{:.*} ± {:.*}",
                precision,
                self.value,
                precision,
                self.uncertainty()
            ),
            None => write!(f, "{} ± {}", self.value, self.uncertainty()),
        }
    }
}

#[cfg(test)]
mod test {
    use ndarray_rand::rand::{Rng, SeedableRng};
    use num_traits::Zero;
    use rand_isaac::Isaac64Rng;

    use super::Measurement;

    #[test]
    fn independent_sources_add_in_quadrature() {
        let a = Measurement::new(1.0, 0.3);
        let b = Measurement::new(2.0, 0.4);

        let sum = &a + &b;
        let difference = &a - &b;

        approx::assert_relative_eq!(sum.value(), 3.0);
        approx::assert_relative_eq!(sum.uncertainty(), 0.5);
        approx::assert_relative_eq!(difference.uncertainty(), 0.5);
        approx::assert_relative_eq!(a.covariance(&b), 0.0);
    }

    #[test]
    fn a_measurement_minus_itself_is_exact() {
        let a = Measurement::new(694.24, 0.01);
        let difference = &a - &a;

        approx::assert_relative_eq!(difference.value(), 0.0);
        approx::assert_relative_eq!(difference.uncertainty(), 0.0);
        approx::assert_relative_eq!((&a / &a).uncertainty(), 0.0);
    }

    #[test]
    fn shared_sources_are_fully_correlated() {
        let a = Measurement::new(3.0, 0.1);
        let doubled = &a * 2.0;
        let shifted = &a + 5.0;

        approx::assert_relative_eq!(doubled.uncertainty(), 0.2);
        approx::assert_relative_eq!(doubled.correlation(&shifted), 1.0);
        approx::assert_relative_eq!((-&a).correlation(&a), -1.0);
    }

    #[test]
    fn exact_values_carry_no_uncertainty() {
        let exact = Measurement::exact(2.5);
        assert!(exact.is_exact());
        assert!(Measurement::new(1.0, 0.0).is_exact());
        assert!(Measurement::zero().is_zero());
        approx::assert_relative_eq!((exact.powi(3) + 1.0).uncertainty(), 0.0);
    }

    #[test]
    fn products_and_quotients_propagate_relative_errors() {
        let a = Measurement::new(4.0, 0.04);
        let b = Measurement::new(2.0, 0.02);

        let product = &a * &b;
        let quotient = &a / &b;

        let relative = (0.01f64.powi(2) * 2.0).sqrt();
        approx::assert_relative_eq!(product.uncertainty() / product.value(), relative);
        approx::assert_relative_eq!(quotient.uncertainty() / quotient.value(), relative);
    }

    #[test]
    fn power_derivatives_match_finite_difference() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);

        for _ in 0..20 {
            let base_value = rng.gen_range(0.5..2.0);
            let exponent_value = rng.gen_range(1.0..10.0);
            let base = Measurement::new(base_value, 1.0);
            let exponent = Measurement::new(exponent_value, 1.0);

            let power = base.powf(&exponent);
            let delta = 1e-6;
            let d_base = ((base_value + delta).powf(exponent_value)
                - (base_value - delta).powf(exponent_value))
                / (2. * delta);
            let d_exponent = (base_value.powf(exponent_value + delta)
                - base_value.powf(exponent_value - delta))
                / (2. * delta);

            approx::assert_relative_eq!(power.covariance(&base), d_base, max_relative = 1e-5);
            approx::assert_relative_eq!(
                power.covariance(&exponent),
                d_exponent,
                max_relative = 1e-5
            );
        }
    }

    #[test]
    fn sums_fold_over_iterators() {
        let values = vec![
            Measurement::new(1.0, 0.1),
            Measurement::new(2.0, 0.2),
            Measurement::exact(3.0),
        ];
        let total: Measurement = values.iter().sum();
        approx::assert_relative_eq!(total.value(), 6.0);
        approx::assert_relative_eq!(total.variance(), 0.05);
    }

    #[test]
    fn display_honours_precision() {
        let a = Measurement::new(1.23456, 0.01234);
        assert_eq!(format!("{a:.3}"), "1.235 ± 0.012");
    }
}
