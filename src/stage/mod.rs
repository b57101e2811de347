//! The uniform contract every proof-construction stage is invoked through.

pub mod command;
pub mod in_process;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use command::CommandInvoker;
pub use in_process::InProcessInvoker;

/// A structured request or response record: named fields, order independent.
pub type StageRecord = serde_json::Map<String, serde_json::Value>;

/// Every external stage the pipeline knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    DefaultValues,
    TreeD,
    Sdr,
    TreeC,
    TreeRLast,
    CommR,
    ChallengesNi,
    MerkleProofs,
    SnarkProof,
    SnarkProofVerify,
    SnarkProofAggregate,
    SnarkProofVerifyAggregated,
}

impl StageId {
    pub const ALL: [StageId; 12] = [
        StageId::DefaultValues,
        StageId::TreeD,
        StageId::Sdr,
        StageId::TreeC,
        StageId::TreeRLast,
        StageId::CommR,
        StageId::ChallengesNi,
        StageId::MerkleProofs,
        StageId::SnarkProof,
        StageId::SnarkProofVerify,
        StageId::SnarkProofAggregate,
        StageId::SnarkProofVerifyAggregated,
    ];

    /// Name of the stage executable, also used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            StageId::DefaultValues => "default-values",
            StageId::TreeD => "tree-d",
            StageId::Sdr => "sdr",
            StageId::TreeC => "tree-c",
            StageId::TreeRLast => "tree-r-last",
            StageId::CommR => "comm-r",
            StageId::ChallengesNi => "challenges-ni",
            StageId::MerkleProofs => "merkle-proofs",
            StageId::SnarkProof => "snark-proof",
            StageId::SnarkProofVerify => "snark-proof-verify",
            StageId::SnarkProofAggregate => "snark-proof-aggregate",
            StageId::SnarkProofVerifyAggregated => "snark-proof-verify-aggregated",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An external stage terminated abnormally or answered with something that
/// is not a well-formed record.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("stage `{stage}` failed{}: {diagnostic}", exit_suffix(.exit_status))]
pub struct StageError {
    pub stage: StageId,
    pub exit_status: Option<i32>,
    pub diagnostic: String,
}

fn exit_suffix(exit_status: &Option<i32>) -> String {
    match exit_status {
        Some(code) => format!(" with exit status {code}"),
        None => String::new(),
    }
}

impl StageError {
    pub fn new(stage: StageId, exit_status: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            stage,
            exit_status,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn malformed(stage: StageId, diagnostic: impl Into<String>) -> Self {
        Self::new(stage, None, format!("malformed response: {}", diagnostic.into()))
    }
}

/// Runs one stage to completion: request record in, response record out.
///
/// Implementations block until the stage has finished. The pipeline never
/// holds two invocations open at once.
pub trait StageInvoker {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError>;
}

impl<T: StageInvoker + ?Sized> StageInvoker for &T {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        (**self).invoke(stage, request)
    }
}

impl<T: StageInvoker + ?Sized> StageInvoker for Box<T> {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        (**self).invoke(stage, request)
    }
}

/// Turns a raw response value into a record, rejecting anything but a JSON object.
pub fn into_record(stage: StageId, value: serde_json::Value) -> Result<StageRecord, StageError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StageError::malformed(
            stage,
            format!("expected a JSON object, got `{other}`"),
        )),
    }
}
