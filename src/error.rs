use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds the runner distinguishes when reporting per-sample outcomes.
/// They travel inside `anyhow::Error` and are recovered with `downcast_ref`.
#[derive(Error, Debug)]
pub enum ImputeError {
    #[error("No coverage files found in: {0}")]
    NoInputFilesFound(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    #[error("Duplicate site '{chromosome}:{start}' encountered in {origin}")]
    DuplicateSite {
        chromosome: String,
        start: u64,
        origin: &'static str,
    },

    #[error("Reference catalog is empty after applying the exclusion set")]
    EmptyReferenceAfterFiltering,

    #[error("Model training failed: {0}")]
    ModelTrainingFailure(String),

    #[error("Could not write output to {path:?}: {source}")]
    OutputWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ImputeError {
    pub fn training(message: impl Into<String>) -> Self {
        Self::ModelTrainingFailure(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputWriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Short label used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            ImputeError::NoInputFilesFound(_) => "NoInputFilesFound",
            ImputeError::MalformedRecord { .. } => "MalformedRecord",
            ImputeError::DuplicateSite { .. } => "DuplicateSite",
            ImputeError::EmptyReferenceAfterFiltering => "EmptyReferenceAfterFiltering",
            ImputeError::ModelTrainingFailure(_) => "ModelTrainingFailure",
            ImputeError::OutputWriteFailure { .. } => "OutputWriteFailure",
            ImputeError::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

/// Classifies an arbitrary pipeline error for reporting.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ImputeError>())
        .map(ImputeError::kind)
        .unwrap_or("Other")
}
