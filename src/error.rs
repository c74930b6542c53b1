use std::fmt;

/// Pipeline stage an error was raised in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Background,
    PeakSearch,
    PeakFit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Background => "background",
            Self::PeakSearch => "peak search",
            Self::PeakFit => "peak fit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid interval bounds: lower bound {lower} exceeds upper bound {upper}")]
    InvalidBounds { lower: f64, upper: f64 },
    #[error("{stage} ({model}): {available} samples in focus, at least {required} required")]
    InsufficientData {
        stage: Stage,
        model: String,
        required: usize,
        available: usize,
    },
    #[error("{stage} ({model}) failed to converge: {reason}")]
    FitConvergence {
        stage: Stage,
        model: String,
        reason: String,
    },
    #[error("inverting {calibration} failed after {iterations} iterations: {reason}")]
    InversionNonconvergent {
        calibration: String,
        iterations: usize,
        reason: String,
    },
    #[error("{model} takes {expected} parameters but {found} were given")]
    Arity {
        model: String,
        expected: usize,
        found: usize,
    },
    #[error("sample arrays differ in length: {x} x-values and {y} y-values")]
    MismatchedSamples { x: usize, y: usize },
    #[error("spectrum contains no samples")]
    EmptySpectrum,
    #[error("unknown {family} `{name}`")]
    UnknownStrategy { family: &'static str, name: String },
    #[error("line {line}: cannot read `{content}` as a pair of numbers")]
    Parse { line: u64, content: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn convergence(stage: Stage, model: &str, reason: impl fmt::Display) -> Self {
        Self::FitConvergence {
            stage,
            model: model.to_owned(),
            reason: reason.to_string(),
        }
    }
}
