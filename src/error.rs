use serde::Serialize;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// The pipeline stage an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Load,
    Normalize,
    Embed,
    Elbow,
    Assign,
    Summarize,
    Export,
}

/// Failures surfaced by the clustering pipeline.
///
/// None of these are transient: each one names a data or configuration
/// problem that the operator has to fix before re-running.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required data source, column or field is absent.
    #[error("missing input from {source_name}: {}", .missing.join(", "))]
    MissingInput {
        source_name: String,
        missing: Vec<String>,
    },

    /// The embedding model could not be located or loaded.
    #[error("embedding model '{model}' is unavailable: {reason}")]
    ModelUnavailable { model: String, reason: String },

    /// Fewer usable records than the stage needs.
    #[error("insufficient data for stage '{stage}': {reason}")]
    InsufficientData { stage: Stage, reason: String },

    /// A caller-supplied parameter is out of range or malformed.
    #[error("invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    /// The embedding provider returned something other than one
    /// fixed-dimension vector per input.
    #[error("embedding provider failure: {0}")]
    Embedding(String),

    /// The clustering backend rejected the input or failed outright.
    #[error("clustering failure: {0}")]
    Clustering(String),
}

impl PipelineError {
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }

    pub fn insufficient(stage: Stage, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            stage,
            reason: reason.into(),
        }
    }

    /// True for the errors an interactive caller can recover from by asking again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. })
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{PipelineError, Stage};

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Elbow.to_string(), "elbow");
        assert_eq!(Stage::Summarize.to_string(), "summarize");
    }

    #[test]
    fn test_messages_carry_context() {
        let err = PipelineError::MissingInput {
            source_name: "task.csv".into(),
            missing: vec!["Number".into(), "Work notes".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing input from task.csv: Number, Work notes"
        );

        let err = PipelineError::insufficient(Stage::Elbow, "1 vector, need at least 2");
        assert!(err.to_string().contains("'elbow'"));
        assert!(!err.is_recoverable());
        assert!(PipelineError::invalid("k", "must be > 1").is_recoverable());
    }
}
