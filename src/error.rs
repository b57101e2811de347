use serde::Serialize;
use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::parameters::ParameterError;
use crate::pipeline::sequence::SequenceError;
use crate::run_config::ConfigError;
use crate::stage::{StageError, StageId};

/// Stable classification of why a run ended without a verified proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    UnsupportedSectorSize,
    Io,
    Stage,
    VerificationFailed,
}

impl FailureKind {
    pub fn exit_code(self) -> u8 {
        match self {
            FailureKind::Config => 2,
            FailureKind::UnsupportedSectorSize => 3,
            FailureKind::Io => 4,
            FailureKind::Stage => 5,
            FailureKind::VerificationFailed => 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no parameter set is registered for sector size {0}")]
    UnsupportedSectorSize(u64),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("verification stage `{stage}` returned a negative verdict")]
    VerificationFailed { stage: StageId },
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Config(_) | PipelineError::Sequence(_) => FailureKind::Config,
            PipelineError::UnsupportedSectorSize(_) => FailureKind::UnsupportedSectorSize,
            PipelineError::Artifact(_) => FailureKind::Io,
            PipelineError::Stage(_) => FailureKind::Stage,
            PipelineError::VerificationFailed { .. } => FailureKind::VerificationFailed,
        }
    }
}

impl From<ParameterError> for PipelineError {
    fn from(err: ParameterError) -> Self {
        match err {
            ParameterError::UnsupportedSectorSize(size) => PipelineError::UnsupportedSectorSize(size),
            ParameterError::Stage(e) => PipelineError::Stage(e),
            ParameterError::Inconsistent {
                sector_size,
                reason,
            } => PipelineError::Stage(StageError::malformed(
                StageId::DefaultValues,
                format!("inconsistent default values for sector size {sector_size}: {reason}"),
            )),
        }
    }
}

/// A run that stopped early, with enough context to resume by hand from the
/// artifacts already in the output directory.
#[derive(Debug, Error)]
#[error("{}", describe(.stage, .last_completed))]
pub struct RunFailure {
    /// The stage that failed, `None` when the run stopped before any stage.
    pub stage: Option<StageId>,
    pub last_completed: Option<StageId>,
    #[source]
    pub error: PipelineError,
}

fn describe(stage: &Option<StageId>, last_completed: &Option<StageId>) -> String {
    match (stage, last_completed) {
        (None, None) => "run failed before any stage was invoked".to_string(),
        (None, Some(last)) => format!("run failed after `{last}` completed"),
        (Some(stage), None) => format!("run halted at stage `{stage}` with no stage completed"),
        (Some(stage), Some(last)) if stage == last => {
            format!("run halted after stage `{stage}` completed but its progress was not recorded")
        }
        (Some(stage), Some(last)) => {
            format!("run halted at stage `{stage}` after `{last}` completed")
        }
    }
}

impl RunFailure {
    pub fn before_stages(error: PipelineError) -> Self {
        Self {
            stage: None,
            last_completed: None,
            error,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }
}
