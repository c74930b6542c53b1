#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
// #![warn(clippy::cargo)]

pub mod background;
pub mod calculator;
pub mod config;
pub mod correction;
pub mod curve;
pub mod error;
pub mod interval;
pub mod inversion;
pub mod math;
pub mod measurement;
pub(crate) mod minimisation;
pub mod peaks;
pub mod pressure;
pub mod reading;
pub mod spectrum;

pub use background::{BackgroundEstimator, BackgroundFit, FocusPolicy};
pub use calculator::PressureCalculator;
pub use config::Config;
pub use correction::TemperatureCorrection;
pub use curve::{CurveModel, Shape};
pub use error::{Error, Stage};
pub use interval::{Interval, IntervalSet};
pub use inversion::PressureInverter;
pub use measurement::Measurement;
pub use peaks::{PeakFit, PeakLocator, PeakResult};
pub use pressure::{Calibration, CalibrationKind, PressureModel};
pub use spectrum::{Spectrum, Weighting};

pub type Result<T> = ::std::result::Result<T, Error>;

/// Build a spectrum from raw samples already parsed by an I/O layer
///
/// # Errors
/// Fails if `x` and `y` differ in length.
pub fn load(x: Vec<f64>, y: Vec<f64>) -> Result<Spectrum> {
    Spectrum::load(x, y)
}

/// Fit a polynomial continuum of `degree` and subtract it from `spectrum`
///
/// # Errors
/// Fails when too few samples lie in the focus or the solver fails.
pub fn estimate_background(
    spectrum: &Spectrum,
    degree: usize,
    focus: FocusPolicy,
) -> Result<(CurveModel, Spectrum)> {
    let fit = BackgroundEstimator::new(degree, focus).estimate(spectrum)?;
    Ok((fit.curve, fit.signal))
}

/// Locate R1 and R2 on a background-subtracted spectrum
///
/// # Errors
/// Fails with [`Error::FitConvergence`] if the shape cannot be fitted.
pub fn locate_peaks(spectrum: &Spectrum, shape: Shape) -> Result<(PeakResult, PeakResult, CurveModel)> {
    let fit = PeakLocator::new(shape)?.locate(spectrum)?;
    Ok((fit.r1, fit.r2, fit.curve))
}

/// Pressure for an R1 position (nm) at `temperature` (K), without temperature correction
#[must_use]
pub fn translate(
    peak_position: &Measurement,
    temperature: &Measurement,
    calibration: CalibrationKind,
) -> Measurement {
    PressureModel::new(Calibration::new(calibration), TemperatureCorrection::None)
        .translate(peak_position, temperature)
}

/// R1 position (nm) that `calibration` maps to `target_pressure` (GPa) at `temperature` (K)
///
/// # Errors
/// Fails when the adaptive search exhausts its iteration budget.
pub fn invert(
    target_pressure: &Measurement,
    temperature: &Measurement,
    calibration: CalibrationKind,
) -> Result<Measurement> {
    let model = PressureModel::new(Calibration::new(calibration), TemperatureCorrection::None);
    PressureInverter::default().invert(&model, target_pressure, temperature)
}
