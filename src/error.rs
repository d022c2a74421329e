use std::path::PathBuf;
use thiserror::Error;

use crate::grid::ParameterTuple;

/// Errors produced while enhancing, scoring, fitting or running an experiment
#[derive(Error, Debug)]
pub enum TunerError {
    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("Target image not readable: {}", path.display())]
    TargetNotFound {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Dimension mismatch: expected {}x{}, got {}x{}", expected.0, expected.1, actual.0, actual.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("No supported source image found in {}", path.display())]
    EmptyInputDirectory { path: PathBuf },
    #[error("Cannot fit a surrogate on an empty observation table")]
    EmptyObservationTable,
    #[error("Surrogate used before it was fitted")]
    SurrogateNotFitted,
    #[error("Evaluation failed for {params}: {source}")]
    PointFailed {
        params: ParameterTuple,
        #[source]
        source: Box<TunerError>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl TunerError {
    pub(crate) fn invalid(name: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        TunerError::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            TunerError::InvalidParameter { .. } => "InvalidParameter",
            TunerError::TargetNotFound { .. } => "TargetNotFound",
            TunerError::DimensionMismatch { .. } => "DimensionMismatch",
            TunerError::EmptyInputDirectory { .. } => "EmptyInputDirectory",
            TunerError::EmptyObservationTable => "EmptyObservationTable",
            TunerError::SurrogateNotFitted => "SurrogateNotFitted",
            TunerError::PointFailed { source, .. } => source.kind(),
            TunerError::Io(_) => "Io",
            TunerError::Image(_) => "Image",
            TunerError::Json(_) => "Json",
            TunerError::ThreadPool(_) => "ThreadPool",
        }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;
