use std::path::Path;

use crate::background::{BackgroundEstimator, BackgroundFit};
use crate::config::Config;
use crate::correction::TemperatureCorrection;
use crate::inversion::PressureInverter;
use crate::measurement::Measurement;
use crate::peaks::{PeakFit, PeakLocator};
use crate::pressure::{Calibration, CalibrationKind, PressureModel};
use crate::reading::read_spectrum;
use crate::spectrum::Spectrum;
use crate::{Error, Result};

/// A pressure calculation session
///
/// Holds the resolved strategies, the current R1 reading with its temperature, and a reference
/// point. Once a reference is set, readings are shifted by an offset so that the reference
/// reading translates to the reference pressure.
#[derive(Clone, Debug)]
pub struct PressureCalculator {
    config: Config,
    background: BackgroundEstimator,
    locator: PeakLocator,
    model: PressureModel,
    inverter: PressureInverter,
    r1: Measurement,
    temperature: Measurement,
    reference: Option<Reference>,
    offset: Measurement,
    background_fit: Option<BackgroundFit>,
    peak_fit: Option<PeakFit>,
}

/// Reading taken at a known pressure
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub r1: Measurement,
    pub temperature: Measurement,
    pub pressure: Measurement,
}

impl PressureCalculator {
    /// # Errors
    /// Returns [`Error::UnknownStrategy`] if the configured peak shape is not a peak shape.
    pub fn from_config(config: Config) -> Result<Self> {
        let model = config.pressure.model();
        let temperature = model.calibration().reference_temperature().clone();
        let r1 = model.calibration().reference_position(&temperature);
        Ok(Self {
            background: config.background.estimator(config.verbose),
            locator: config.peaks.locator()?,
            inverter: config.inversion,
            model,
            r1,
            temperature,
            reference: None,
            offset: Measurement::exact(0.),
            background_fit: None,
            peak_fit: None,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn model(&self) -> &PressureModel {
        &self.model
    }

    /// Current R1 reading, in nm
    #[must_use]
    pub const fn r1(&self) -> &Measurement {
        &self.r1
    }

    /// Sample temperature, in K
    #[must_use]
    pub const fn temperature(&self) -> &Measurement {
        &self.temperature
    }

    #[must_use]
    pub const fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Shift subtracted from every R1 reading
    #[must_use]
    pub const fn offset(&self) -> &Measurement {
        &self.offset
    }

    /// Continuum fitted to the last spectrum read
    #[must_use]
    pub const fn background_fit(&self) -> Option<&BackgroundFit> {
        self.background_fit.as_ref()
    }

    /// Lines fitted to the last spectrum read
    #[must_use]
    pub const fn peak_fit(&self) -> Option<&PeakFit> {
        self.peak_fit.as_ref()
    }

    /// Enter an R1 reading by hand
    pub fn set_r1(&mut self, r1: Measurement) {
        self.r1 = r1;
    }

    pub fn set_temperature(&mut self, temperature: Measurement) {
        self.temperature = temperature;
    }

    /// Switch to another calibration, keeping the reference point
    ///
    /// The calculator is left unchanged if the offset cannot be recomputed.
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the offset cannot be recomputed.
    pub fn set_calibration(&mut self, calibration: CalibrationKind) -> Result<()> {
        let model = PressureModel::new(Calibration::new(calibration), self.model.correction());
        self.offset = self.offset_for(&model, self.reference.as_ref())?;
        self.model = model;
        self.config.pressure.calibration = calibration;
        Ok(())
    }

    /// Switch to another temperature correction, keeping the reference point
    ///
    /// The calculator is left unchanged if the offset cannot be recomputed.
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the offset cannot be recomputed.
    pub fn set_correction(&mut self, correction: TemperatureCorrection) -> Result<()> {
        let model = PressureModel::new(self.model.calibration().clone(), correction);
        self.offset = self.offset_for(&model, self.reference.as_ref())?;
        self.model = model;
        self.config.pressure.correction = correction;
        Ok(())
    }

    /// Use `reference` as the point of known pressure
    ///
    /// The previous reference and offset are kept if the offset cannot be computed.
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the offset cannot be computed.
    pub fn set_reference(&mut self, reference: Reference) -> Result<()> {
        self.offset = self.offset_for(&self.model, Some(&reference))?;
        self.reference = Some(reference);
        Ok(())
    }

    /// Take the current reading as the ambient-pressure reference
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the offset cannot be computed.
    pub fn set_current_as_reference(&mut self) -> Result<()> {
        self.set_reference(Reference {
            r1: self.r1.clone(),
            temperature: self.temperature.clone(),
            pressure: Measurement::new(0., 0.1),
        })
    }

    /// Forget the reference point and the offset
    pub fn clear_reference(&mut self) {
        self.reference = None;
        self.offset = Measurement::exact(0.);
    }

    /// Recompute the offset between the reference reading and the R1 position the calibration
    /// expects at the reference pressure and temperature
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the expected position cannot be found, in
    /// which case the offset is unchanged.
    pub fn calculate_offset_from_reference(&mut self) -> Result<()> {
        self.offset = self.offset_for(&self.model, self.reference.as_ref())?;
        Ok(())
    }

    fn offset_for(
        &self,
        model: &PressureModel,
        reference: Option<&Reference>,
    ) -> Result<Measurement> {
        let Some(reference) = reference else {
            return Ok(Measurement::exact(0.));
        };
        let expected = self.inverter.invert_from(
            model,
            &reference.pressure,
            &reference.temperature,
            Some(reference.r1.value()),
        )?;
        let offset = &reference.r1 - expected;
        log::info!("offset from reference: {offset} nm");
        Ok(offset)
    }

    /// Pressure of the current reading
    #[must_use]
    pub fn calculate_pressure(&self) -> Measurement {
        let pressure = self
            .model
            .translate(&(&self.r1 - &self.offset), &self.temperature);
        log::info!(
            "{} at {} K: R1 = {} nm, p = {} GPa",
            self.model.calibration().name(),
            self.temperature,
            self.r1,
            pressure
        );
        pressure
    }

    /// R1 reading expected at `pressure` and the current temperature
    ///
    /// The search starts from the current reading.
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the search fails.
    pub fn calculate_r1_from_pressure(&self, pressure: &Measurement) -> Result<Measurement> {
        let seed = self.r1.value() - self.offset.value();
        let position = self
            .inverter
            .invert_from(&self.model, pressure, &self.temperature, Some(seed))?;
        Ok(position + &self.offset)
    }

    /// Fit a spectrum and take its R1 line as the current reading
    ///
    /// The samples are trimmed to the configured limits, the continuum is subtracted and the
    /// lines are fitted.
    ///
    /// # Errors
    /// Returns an error if no samples lie within the limits or if either fit fails.
    pub fn read_and_fit(&mut self, x: Vec<f64>, y: Vec<f64>) -> Result<&PeakFit> {
        self.fit(&Spectrum::load(x, y)?)
    }

    /// Read a spectrum file in the configured format and fit it
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or if fitting fails.
    pub fn read_file(&mut self, path: &Path) -> Result<&PeakFit> {
        let spectrum = read_spectrum(path, self.config.format)?;
        self.fit(&spectrum)
    }

    fn fit(&mut self, spectrum: &Spectrum) -> Result<&PeakFit> {
        let trimmed = spectrum.within(&self.config.limits_region()?);
        if trimmed.is_empty() {
            return Err(Error::EmptySpectrum);
        }
        let background = self.background.estimate(&trimmed)?;
        let peaks = self.locator.locate(&background.signal)?;
        self.r1 = peaks.r1.center.clone();
        self.background_fit = Some(background);
        Ok(self.peak_fit.insert(peaks))
    }
}
