use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::background::{BackgroundEstimator, FocusPolicy};
use crate::correction::TemperatureCorrection;
use crate::curve::Shape;
use crate::interval::IntervalSet;
use crate::inversion::PressureInverter;
use crate::peaks::PeakLocator;
use crate::pressure::{Calibration, CalibrationKind, PressureModel};
use crate::reading::Format;
use crate::spectrum::{Spectrum, Weighting};
use crate::Result;

/// Settings of a pressure calculation, usually read from TOML
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wavelength window, in nm, kept when a spectrum is read
    pub limits: (f64, f64),
    pub format: Format,
    pub background: BackgroundConfig,
    pub peaks: PeaksConfig,
    pub pressure: PressureConfig,
    pub inversion: PressureInverter,
    /// Print every background solver iteration
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: (690., 705.),
            format: Format::default(),
            background: BackgroundConfig::default(),
            peaks: PeaksConfig::default(),
            pressure: PressureConfig::default(),
            inversion: PressureInverter::default(),
            verbose: false,
        }
    }
}

impl Config {
    /// # Errors
    /// Returns [`crate::Error::Toml`] for malformed documents or unknown strategy names.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let document = fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// The wavelength window as a region
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidBounds`] if the limits are reversed.
    pub fn limits_region(&self) -> Result<IntervalSet> {
        IntervalSet::new(self.limits.0, self.limits.1)
    }
}

/// Where the continuum is fitted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFocus {
    #[default]
    Whole,
    Edges,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub degree: usize,
    pub focus: BackgroundFocus,
    /// Fraction of the domain at each end used by the `edges` focus
    pub edge_fraction: f64,
    pub weighting: Weighting,
    pub huber_fraction: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            degree: 1,
            focus: BackgroundFocus::Whole,
            edge_fraction: 0.1,
            weighting: Weighting::Robust,
            huber_fraction: Spectrum::HUBER_FRACTION,
            tolerance: 1e-10,
            max_iterations: 50,
        }
    }
}

impl BackgroundConfig {
    #[must_use]
    pub const fn focus_policy(&self) -> FocusPolicy {
        match self.focus {
            BackgroundFocus::Whole => FocusPolicy::Whole,
            BackgroundFocus::Edges => FocusPolicy::Edges {
                fraction: self.edge_fraction,
            },
        }
    }

    #[must_use]
    pub const fn estimator(&self, verbose: bool) -> BackgroundEstimator {
        BackgroundEstimator::new(self.degree, self.focus_policy())
            .with_weighting(self.weighting)
            .with_huber_fraction(self.huber_fraction)
            .with_tolerance(self.tolerance)
            .with_max_iterations(self.max_iterations)
            .with_verbose(verbose)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeaksConfig {
    pub shape: Shape,
    /// Smallest distance, in nm, of a detected R2 below R1
    pub min_separation: f64,
    /// Largest distance, in nm, of a detected R2 below R1
    pub max_separation: f64,
    /// Relative offset below R1 of a synthesised R2
    pub fallback_ratio: f64,
    pub max_iterations: u64,
}

impl Default for PeaksConfig {
    fn default() -> Self {
        Self {
            shape: Shape::TwoGaussians,
            min_separation: 1.0,
            max_separation: 3.0,
            fallback_ratio: 0.002,
            max_iterations: 200,
        }
    }
}

impl PeaksConfig {
    /// # Errors
    /// Returns [`crate::Error::UnknownStrategy`] if the shape is not a peak shape.
    pub fn locator(&self) -> Result<PeakLocator> {
        Ok(PeakLocator::new(self.shape)?
            .with_separation(self.min_separation, self.max_separation)
            .with_fallback_ratio(self.fallback_ratio)
            .with_max_iterations(self.max_iterations))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    pub calibration: CalibrationKind,
    pub correction: TemperatureCorrection,
}

impl PressureConfig {
    #[must_use]
    pub fn model(&self) -> PressureModel {
        PressureModel::new(Calibration::new(self.calibration), self.correction)
    }
}
