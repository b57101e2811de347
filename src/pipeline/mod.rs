pub mod driver;
pub mod fields;
pub mod journal;
pub mod sequence;

use serde::{Deserialize, Serialize};

pub use driver::{Outcome, PipelineDriver, RunReport, Verdict};
pub use fields::{Field, FieldValue};
pub use journal::{JournalStatus, RunJournal};
pub use sequence::{SequenceError, StageDescriptor, StageSequence};

/// What to do after a verification stage returns a negative verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Stop right after the failing verification stage.
    #[default]
    Abort,
    /// Keep going, e.g. to inspect the aggregated proof. The report still
    /// records the failure.
    Proceed,
}
