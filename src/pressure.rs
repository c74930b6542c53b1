use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::correction::TemperatureCorrection;
use crate::measurement::Measurement;
use crate::{Error, Result};

/// Published ruby pressure scales
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    /// Piermarini et al. (1975), linear
    Piermarini,
    /// Mao et al. (1986), quasi-hydrostatic
    Mao,
    /// Jacobsen et al. (2008), helium medium
    Jacobsen,
    /// Liu et al. (2013)
    Liu,
    /// Ruby2020 (Shen et al., 2020)
    #[default]
    Ruby2020,
    /// Wei et al. (2011), temperature dependent
    Wei,
}

impl CalibrationKind {
    pub const ALL: [Self; 6] = [
        Self::Piermarini,
        Self::Mao,
        Self::Jacobsen,
        Self::Liu,
        Self::Ruby2020,
        Self::Wei,
    ];
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Piermarini => "Piermarini 1975",
            Self::Mao => "Mao 1986",
            Self::Jacobsen => "Jacobsen 2008",
            Self::Liu => "Liu 2013",
            Self::Ruby2020 => "Ruby2020",
            Self::Wei => "Wei 2011",
        };
        f.write_str(name)
    }
}

impl FromStr for CalibrationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalised = s
            .to_lowercase()
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect::<String>();
        match normalised.as_str() {
            "piermarini" => Ok(Self::Piermarini),
            "mao" => Ok(Self::Mao),
            "jacobsen" => Ok(Self::Jacobsen),
            "liu" => Ok(Self::Liu),
            "ruby" | "shen" => Ok(Self::Ruby2020),
            "wei" => Ok(Self::Wei),
            _ => Err(Error::UnknownStrategy {
                family: "calibration",
                name: s.to_owned(),
            }),
        }
    }
}

/// Functional form of a calibration and its constants
#[derive(Clone, Debug, PartialEq)]
enum Formula {
    /// $p = k (\lambda - \lambda_0)$
    Linear { slope: Measurement },
    /// $p = \frac{a}{b}\left[\left(\lambda / \lambda_0\right)^b - 1\right]$
    PowerLaw { a: Measurement, b: Measurement },
    /// $p = a \Delta (1 + b \Delta)$ with $\Delta = (\lambda - \lambda_0) / \lambda_0$
    Quadratic { a: Measurement, b: Measurement },
    /// Power law with $a$, $b$ and $\lambda_0$ polynomial in $T - 298\,\mathrm{K}$
    Wei {
        a: [Measurement; 2],
        b: [Measurement; 3],
        reference_shift: Measurement,
    },
}

/// Temperature from which the Wei et al. constants are expanded
const WEI_TEMPERATURE: f64 = 298.0;

/// An empirical mapping from R1 position (nm) and temperature (K) to pressure (GPa)
///
/// Every constant is a [`Measurement`], so the published uncertainties of the scale propagate
/// into the pressures it computes. The constants are fixed at construction, so pressures from
/// the same calibration are correlated through them.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    name: String,
    formula: Formula,
    reference_position: Measurement,
    reference_temperature: Measurement,
}

impl Calibration {
    #[must_use]
    pub fn new(kind: CalibrationKind) -> Self {
        let zero_pressure_r1 = || Measurement::new(694.24, 0.01);
        let (formula, reference_position) = match kind {
            CalibrationKind::Piermarini => (
                Formula::Linear {
                    slope: Measurement::new(2.740, 0.016),
                },
                zero_pressure_r1(),
            ),
            CalibrationKind::Mao => (
                Formula::PowerLaw {
                    a: Measurement::exact(1904.),
                    b: Measurement::exact(7.665),
                },
                zero_pressure_r1(),
            ),
            CalibrationKind::Jacobsen => (
                Formula::PowerLaw {
                    a: Measurement::exact(1904.),
                    b: Measurement::new(10.32, 0.07),
                },
                zero_pressure_r1(),
            ),
            CalibrationKind::Liu => (
                Formula::PowerLaw {
                    a: Measurement::exact(1904.),
                    b: Measurement::exact(9.827),
                },
                zero_pressure_r1(),
            ),
            CalibrationKind::Ruby2020 => (
                Formula::Quadratic {
                    a: Measurement::new(1870., 10.),
                    b: Measurement::new(5.63, 0.03),
                },
                Measurement::new(694.25, 0.01),
            ),
            CalibrationKind::Wei => (
                Formula::Wei {
                    a: [Measurement::new(1915.0, 0.9), Measurement::new(0.622, 0.007)],
                    b: [
                        Measurement::new(9.28, 0.02),
                        Measurement::new(-0.024, 0.003),
                        Measurement::new(-8.2e-7, 0.02e-7),
                    ],
                    reference_shift: Measurement::new(0.0063, 0.0002),
                },
                Measurement::exact(694.2),
            ),
        };
        Self {
            name: kind.to_string(),
            formula,
            reference_position,
            reference_temperature: Measurement::new(298.15, 0.1),
        }
    }

    /// $p = \frac{a}{b}\left[\left(\lambda / \lambda_0\right)^b - 1\right]$ with custom constants
    #[must_use]
    pub fn power_law(
        name: &str,
        a: Measurement,
        b: Measurement,
        reference_position: Measurement,
    ) -> Self {
        Self {
            name: name.to_owned(),
            formula: Formula::PowerLaw { a, b },
            reference_position,
            reference_temperature: Measurement::new(298.15, 0.1),
        }
    }

    /// $p = k (\lambda - \lambda_0)$ with custom constants
    #[must_use]
    pub fn linear(name: &str, slope: Measurement, reference_position: Measurement) -> Self {
        Self {
            name: name.to_owned(),
            formula: Formula::Linear { slope },
            reference_position,
            reference_temperature: Measurement::new(298.15, 0.1),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn reference_temperature(&self) -> &Measurement {
        &self.reference_temperature
    }

    /// Zero-pressure R1 position at `temperature`
    #[must_use]
    pub fn reference_position(&self, temperature: &Measurement) -> Measurement {
        match &self.formula {
            Formula::Wei {
                reference_shift, ..
            } => &self.reference_position + reference_shift * (temperature - WEI_TEMPERATURE),
            _ => self.reference_position.clone(),
        }
    }

    /// Whether temperature enters the formula itself, in which case no separate temperature
    /// correction applies
    #[must_use]
    pub const fn is_temperature_dependent(&self) -> bool {
        matches!(self.formula, Formula::Wei { .. })
    }

    /// Pressure for an R1 line at `position` and `temperature`
    #[must_use]
    pub fn pressure(&self, position: &Measurement, temperature: &Measurement) -> Measurement {
        let reference = self.reference_position(temperature);
        match &self.formula {
            Formula::Linear { slope } => slope * (position - &reference),
            Formula::PowerLaw { a, b } => power_law(position, a, b, &reference),
            Formula::Quadratic { a, b } => {
                let shift = (position - &reference) / &reference;
                a * &shift * (&shift * b + 1.)
            }
            Formula::Wei { a, b, .. } => {
                let dt = temperature - WEI_TEMPERATURE;
                let a = &a[0] + &a[1] * &dt;
                let b = &b[0] + &b[1] * &dt + &b[2] * dt.powi(2);
                power_law(position, &a, &b, &reference)
            }
        }
    }
}

fn power_law(
    position: &Measurement,
    a: &Measurement,
    b: &Measurement,
    reference: &Measurement,
) -> Measurement {
    (a / b) * ((position / reference).powf(b) - 1.)
}

/// A calibration together with the temperature correction applied to measured positions
#[derive(Clone, Debug, PartialEq)]
pub struct PressureModel {
    calibration: Calibration,
    correction: TemperatureCorrection,
}

impl PressureModel {
    #[must_use]
    pub const fn new(calibration: Calibration, correction: TemperatureCorrection) -> Self {
        Self {
            calibration,
            correction,
        }
    }

    #[must_use]
    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[must_use]
    pub const fn correction(&self) -> TemperatureCorrection {
        self.correction
    }

    /// `position` shifted to read as if measured at the reference temperature
    ///
    /// Temperature-dependent calibrations take the position unchanged.
    #[must_use]
    pub fn corrected_position(
        &self,
        position: &Measurement,
        temperature: &Measurement,
    ) -> Measurement {
        if self.calibration.is_temperature_dependent() {
            return position.clone();
        }
        position
            + self
                .correction
                .correction(temperature, self.calibration.reference_temperature())
    }

    /// Pressure for an R1 line measured at `position` and `temperature`
    #[must_use]
    pub fn translate(&self, position: &Measurement, temperature: &Measurement) -> Measurement {
        let corrected = self.corrected_position(position, temperature);
        self.calibration.pressure(&corrected, temperature)
    }
}
