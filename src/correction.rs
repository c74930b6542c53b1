use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::measurement::Measurement;
use crate::{Error, Result};

/// Vos et al. (1991) shift of R1, in units of 0.1 nm, as a polynomial in `T - 300 K`
const VOS_R1: [f64; 4] = [0., 6.591e-2, 7.624e-5, -1.733e-7];
/// Vos et al. (1991) shift of R2, in units of 0.1 nm, as a polynomial in `T - 300 K`
const VOS_R2: [f64; 4] = [0., 6.554e-2, 8.670e-5, -1.099e-7];
/// Ragan et al. (1992) R1 wavenumber, in cm^-1, as a polynomial in `T`
const RAGAN_R1: [f64; 4] = [14423., 4.49e-2, -4.81e-4, 3.71e-7];
/// Ragan et al. (1992) R2 wavenumber, in cm^-1, as a polynomial in `T`
const RAGAN_R2: [f64; 4] = [14452., 3.00e-2, -3.88e-4, 2.55e-7];

/// Removes the drift of the unpressurised lines with temperature from a measured position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemperatureCorrection {
    #[default]
    None,
    VosR1,
    VosR2,
    VosAverage,
    RaganR1,
    RaganR2,
    RaganAverage,
}

#[derive(Clone, Copy)]
enum Line {
    R1,
    R2,
}

impl TemperatureCorrection {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::VosR1,
        Self::VosR2,
        Self::VosAverage,
        Self::RaganR1,
        Self::RaganR2,
        Self::RaganAverage,
    ];

    /// Shift, in nm, to add to a position measured at `temperature` so that it reads as if
    /// measured at `reference`
    #[must_use]
    pub fn correction(&self, temperature: &Measurement, reference: &Measurement) -> Measurement {
        let lines: &[Line] = match self {
            Self::None => return Measurement::exact(0.),
            Self::VosR1 | Self::RaganR1 => &[Line::R1],
            Self::VosR2 | Self::RaganR2 => &[Line::R2],
            Self::VosAverage | Self::RaganAverage => &[Line::R1, Line::R2],
        };
        let total: Measurement = lines
            .iter()
            .map(|line| self.position(*line, reference) - self.position(*line, temperature))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let count = lines.len() as f64;
        total / count
    }

    /// Position of `line` at `temperature`, up to a constant for the Vos presets
    fn position(self, line: Line, temperature: &Measurement) -> Measurement {
        match (self, line) {
            (Self::VosR1 | Self::VosR2 | Self::VosAverage, line) => {
                let coefficients = match line {
                    Line::R1 => &VOS_R1,
                    Line::R2 => &VOS_R2,
                };
                polynomial(&(temperature - 300.), coefficients) * 0.1
            }
            (Self::RaganR1 | Self::RaganR2 | Self::RaganAverage, line) => {
                let coefficients = match line {
                    Line::R1 => &RAGAN_R1,
                    Line::R2 => &RAGAN_R2,
                };
                polynomial(temperature, coefficients).recip() * 1e7
            }
            (Self::None, _) => Measurement::exact(0.),
        }
    }
}

/// Horner evaluation of a polynomial with exact coefficients, lowest order first
fn polynomial(x: &Measurement, coefficients: &[f64]) -> Measurement {
    coefficients
        .iter()
        .rev()
        .fold(Measurement::exact(0.), |acc, coefficient| acc * x + *coefficient)
}

impl fmt::Display for TemperatureCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::VosR1 => "Vos 1991 R1",
            Self::VosR2 => "Vos 1991 R2",
            Self::VosAverage => "Vos 1991 average",
            Self::RaganR1 => "Ragan 1992 R1",
            Self::RaganR2 => "Ragan 1992 R2",
            Self::RaganAverage => "Ragan 1992 average",
        };
        f.write_str(name)
    }
}

impl FromStr for TemperatureCorrection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalised = s
            .to_lowercase()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .replace("1991", "")
            .replace("1992", "");
        match normalised.as_str() {
            "none" => Ok(Self::None),
            "vosr1" => Ok(Self::VosR1),
            "vosr2" => Ok(Self::VosR2),
            "vosaverage" | "vosavg" => Ok(Self::VosAverage),
            "raganr1" => Ok(Self::RaganR1),
            "raganr2" => Ok(Self::RaganR2),
            "raganaverage" | "raganavg" => Ok(Self::RaganAverage),
            _ => Err(Error::UnknownStrategy {
                family: "temperature correction",
                name: s.to_owned(),
            }),
        }
    }
}
