use serde::{Deserialize, Serialize};

use crate::measurement::Measurement;
use crate::pressure::PressureModel;
use crate::{Error, Result};

/// Finds the R1 position a [`PressureModel`] maps to a given pressure
///
/// No calibration inverts in closed form once temperature correction is included, so the
/// position is found by an adaptive step search. The step moves towards the target and halves
/// whenever the pressure residual changes sign or grows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureInverter {
    /// First step, in nm
    pub initial_step: f64,
    /// Largest accepted pressure residual, in GPa
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PressureInverter {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            tolerance: 1e-4,
            max_iterations: 100,
        }
    }
}

impl PressureInverter {
    #[must_use]
    pub const fn new(initial_step: f64, tolerance: f64, max_iterations: usize) -> Self {
        Self {
            initial_step,
            tolerance,
            max_iterations,
        }
    }

    /// Position that `model` maps to `target` at `temperature`, searching from the zero-pressure
    /// position of the calibration
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the model does not increase over the first
    /// step or if the iteration budget runs out.
    pub fn invert(
        &self,
        model: &PressureModel,
        target: &Measurement,
        temperature: &Measurement,
    ) -> Result<Measurement> {
        self.invert_from(model, target, temperature, None)
    }

    /// Position that `model` maps to `target` at `temperature`
    ///
    /// The search starts from `seed`, usually the current reading, or from the zero-pressure
    /// position of the calibration when no finite seed is given. The uncertainty of the result
    /// combines the uncertainty of `target` with that of the model at the solution, divided by
    /// the local slope.
    ///
    /// # Errors
    /// Returns [`Error::InversionNonconvergent`] if the model does not increase over the first
    /// step or if the iteration budget runs out.
    pub fn invert_from(
        &self,
        model: &PressureModel,
        target: &Measurement,
        temperature: &Measurement,
        seed: Option<f64>,
    ) -> Result<Measurement> {
        let name = model.calibration().name();
        let nominal = |position: f64| {
            model
                .translate(&Measurement::exact(position), temperature)
                .value()
        };
        let failure = |iterations, reason: &str| Error::InversionNonconvergent {
            calibration: name.to_owned(),
            iterations,
            reason: reason.to_owned(),
        };

        let start = seed.filter(|seed| seed.is_finite()).unwrap_or_else(|| {
            model
                .calibration()
                .reference_position(temperature)
                .value()
        });
        let rise = nominal(start + self.initial_step) - nominal(start);
        if rise.is_nan() || rise <= 0. {
            return Err(failure(
                0,
                "pressure does not increase with position at the starting point",
            ));
        }

        let mut position = start;
        let mut step = self.initial_step;
        let mut previous: Option<f64> = None;
        for iteration in 1..=self.max_iterations {
            let residual = target.value() - nominal(position);
            if !residual.is_finite() {
                return Err(failure(iteration, "pressure is not finite"));
            }
            if residual.abs() < self.tolerance {
                log::debug!(
                    "inverted {name} in {iteration} iterations: {position:.5} nm for {} GPa",
                    target.value()
                );
                return Ok(self.propagate(model, position, target, temperature));
            }
            if let Some(previous) = previous {
                if residual.abs() > previous.abs() || (residual > 0.) != (previous > 0.) {
                    step /= 2.;
                }
            }
            position += step.copysign(residual);
            previous = Some(residual);
        }
        Err(failure(self.max_iterations, "iteration budget exhausted"))
    }

    /// `position` with the uncertainty implied by `target` and the model constants
    fn propagate(
        &self,
        model: &PressureModel,
        position: f64,
        target: &Measurement,
        temperature: &Measurement,
    ) -> Measurement {
        let at = |position: f64| model.translate(&Measurement::exact(position), temperature);
        let delta = self.tolerance.max(1e-6);
        let slope = (at(position + delta).value() - at(position - delta).value()) / (2. * delta);
        Measurement::exact(position) + (target - at(position)) / slope
    }
}
