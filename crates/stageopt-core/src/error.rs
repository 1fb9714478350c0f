use thiserror::Error;

use crate::id::StageId;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A structural invariant of the Stage Graph or a stage's sub-plan is broken.
    /// Always fatal for the optimization run.
    #[error("malformed plan{}: {reason}", at_stage(.stage))]
    MalformedPlan {
        stage: Option<StageId>,
        reason: String,
    },

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    pub fn malformed(stage: StageId, reason: impl Into<String>) -> Self {
        Error::MalformedPlan {
            stage: Some(stage),
            reason: reason.into(),
        }
    }

    /// Stage the error points at, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            Error::MalformedPlan { stage, .. } => *stage,
            _ => None,
        }
    }
}

fn at_stage(stage: &Option<StageId>) -> String {
    stage.map(|s| format!(" at {s}")).unwrap_or_default()
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
