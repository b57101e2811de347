//! Orchestrator for the Non-Interactive Proof-of-Replication (NI-PoRep)
//! pipeline of a single storage sector.
//!
//! The cryptography lives in external stage executables. This crate decides
//! in which order they run, builds every request from the run inputs, the
//! sector parameters and earlier responses, and names every file they share.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod parameters;
pub mod pipeline;
pub mod run_config;
pub mod stage;
pub mod types;

pub use artifacts::{Artifact, ArtifactStore};
pub use error::{FailureKind, PipelineError, RunFailure};
pub use parameters::{ParameterResolver, SectorParameters};
pub use pipeline::{PipelineDriver, RunReport, StageSequence, VerificationPolicy};
pub use run_config::{RunConfig, RunInputs};
pub use stage::{StageError, StageId, StageInvoker};
