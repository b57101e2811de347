//! The stage graph as data: an ordered list of stage descriptors, each
//! declaring where every request field comes from and what it produces.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use super::fields::Field;
use crate::artifacts::Artifact;
use crate::stage::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunField {
    OutputDir,
    PorepId,
    ReplicaId,
    SectorSize,
    Seed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamField {
    NumLayers,
    NumChallengesPerPartition,
    NumPartitions,
    ParametersPath,
    SrsKeyPath,
    VerifyingKeyPath,
}

/// Where the value of one request field comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Run(RunField),
    Param(ParamField),
    /// Path of an artifact an earlier step has fully written.
    Reads(Artifact),
    /// Path the stage itself writes to.
    Writes(Artifact),
    /// The request key looked up in a persisted JSON artifact.
    Contents(Artifact),
    /// A value returned by an earlier stage.
    Output(Field),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub key: &'static str,
    pub source: Source,
}

/// A response key captured into the run, optionally persisted as a JSON
/// artifact of the form `{ key: value }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub key: &'static str,
    pub field: Field,
    pub persist: Option<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage: StageId,
    pub inputs: &'static [Binding],
    pub outputs: &'static [Output],
    /// Files the stage writes without being handed their path.
    pub writes: &'static [Artifact],
    /// Files the stage reads without being handed their path.
    pub requires: &'static [Artifact],
}

impl StageDescriptor {
    pub fn produced_artifacts(&self) -> Vec<Artifact> {
        let mut produced: Vec<Artifact> = self
            .inputs
            .iter()
            .filter_map(|binding| match binding.source {
                Source::Writes(artifact) => Some(artifact),
                _ => None,
            })
            .collect();
        produced.extend(self.writes);
        produced.extend(self.outputs.iter().filter_map(|output| output.persist));
        produced
    }

    pub fn consumed_artifacts(&self) -> Vec<Artifact> {
        let mut consumed: Vec<Artifact> = self
            .inputs
            .iter()
            .filter_map(|binding| match binding.source {
                Source::Reads(artifact) | Source::Contents(artifact) => Some(artifact),
                _ => None,
            })
            .collect();
        consumed.extend(self.requires);
        consumed
    }

    pub fn consumed_fields(&self) -> impl Iterator<Item = (&'static str, Field)> + '_ {
        self.inputs.iter().filter_map(|binding| match binding.source {
            Source::Output(field) => Some((binding.key, field)),
            _ => None,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("stage `{stage}` binds `{key}` to `{field}`, which no earlier stage produces")]
    UnboundField {
        stage: StageId,
        key: &'static str,
        field: Field,
    },

    #[error("stage `{stage}` reads {artifact}, which no earlier step writes")]
    UnwrittenArtifact { stage: StageId, artifact: Artifact },

    #[error("`{field}` is produced by both `{first}` and `{second}`")]
    DuplicateOutput {
        field: Field,
        first: StageId,
        second: StageId,
    },

    #[error("stage `{0}` appears more than once")]
    DuplicateStage(StageId),
}

/// Ordered stages plus the artifacts the driver prepares before the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSequence {
    prepared: Vec<Artifact>,
    stages: Vec<StageDescriptor>,
}

impl StageSequence {
    pub fn new(prepared: Vec<Artifact>, stages: Vec<StageDescriptor>) -> Self {
        Self { prepared, stages }
    }

    /// The NI-PoRep construction for one committed-capacity sector.
    pub fn ni_porep() -> Self {
        Self::new(
            vec![Artifact::StagedData],
            vec![
                TREE_D,
                SDR,
                TREE_C,
                TREE_R_LAST,
                COMM_R,
                CHALLENGES,
                VANILLA_PROOFS,
                SNARK_PROOF,
                SNARK_VERIFY,
                SNARK_AGGREGATE,
                AGGREGATE_VERIFY,
            ],
        )
    }

    pub fn prepared(&self) -> &[Artifact] {
        &self.prepared
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn position(&self, stage: StageId) -> Option<usize> {
        self.stages.iter().position(|d| d.stage == stage)
    }

    pub fn descriptor(&self, stage: StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|d| d.stage == stage)
    }

    pub fn producer_of(&self, field: Field) -> Option<StageId> {
        self.stages
            .iter()
            .find(|d| d.outputs.iter().any(|o| o.field == field))
            .map(|d| d.stage)
    }

    /// Checks that every value and file a stage consumes is produced by an
    /// earlier step, and that no value has two producers.
    pub fn validate(&self) -> Result<(), SequenceError> {
        let mut written: BTreeSet<Artifact> = self.prepared.iter().copied().collect();
        let mut produced: BTreeMap<Field, StageId> = BTreeMap::new();
        let mut seen: BTreeSet<StageId> = BTreeSet::new();

        for descriptor in &self.stages {
            let stage = descriptor.stage;
            if !seen.insert(stage) {
                return Err(SequenceError::DuplicateStage(stage));
            }

            for (key, field) in descriptor.consumed_fields() {
                if !produced.contains_key(&field) {
                    return Err(SequenceError::UnboundField { stage, key, field });
                }
            }
            for artifact in descriptor.consumed_artifacts() {
                if !written.contains(&artifact) {
                    return Err(SequenceError::UnwrittenArtifact { stage, artifact });
                }
            }

            for output in descriptor.outputs {
                if let Some(first) = produced.insert(output.field, stage) {
                    return Err(SequenceError::DuplicateOutput {
                        field: output.field,
                        first,
                        second: stage,
                    });
                }
            }
            written.extend(descriptor.produced_artifacts());
        }
        Ok(())
    }
}

impl fmt::Display for RunField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunField::OutputDir => "output_dir",
            RunField::PorepId => "porep_id",
            RunField::ReplicaId => "replica_id",
            RunField::SectorSize => "sector_size",
            RunField::Seed => "seed",
        })
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamField::NumLayers => "num_layers",
            ParamField::NumChallengesPerPartition => "num_challenges_per_partition",
            ParamField::NumPartitions => "num_partitions",
            ParamField::ParametersPath => "parameters_path",
            ParamField::SrsKeyPath => "srs_key_path",
            ParamField::VerifyingKeyPath => "verifying_key_path",
        })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Run(field) => write!(f, "run.{field}"),
            Source::Param(field) => write!(f, "params.{field}"),
            Source::Reads(artifact) => write!(f, "path of {artifact}"),
            Source::Writes(artifact) => write!(f, "path for new {artifact}"),
            Source::Contents(artifact) => write!(f, "contents of {artifact}"),
            Source::Output(field) => write!(f, "output {field}"),
        }
    }
}

impl fmt::Display for StageSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for artifact in &self.prepared {
            writeln!(f, " 0. prepare {artifact}")?;
        }
        for (index, descriptor) in self.stages.iter().enumerate() {
            writeln!(f, "{:>2}. {}", index + 1, descriptor.stage)?;
            for binding in descriptor.inputs {
                writeln!(f, "      {:<30} <- {}", binding.key, binding.source)?;
            }
            for output in descriptor.outputs {
                match output.persist {
                    Some(artifact) => writeln!(
                        f,
                        "      {:<30} -> {} (persisted to {artifact})",
                        output.key, output.field
                    )?,
                    None => writeln!(f, "      {:<30} -> {}", output.key, output.field)?,
                }
            }
        }
        Ok(())
    }
}

const fn bind(key: &'static str, source: Source) -> Binding {
    Binding { key, source }
}

const fn output(key: &'static str, field: Field) -> Output {
    Output {
        key,
        field,
        persist: None,
    }
}

use self::ParamField as P;
use self::RunField as R;

const TREE_D: StageDescriptor = StageDescriptor {
    stage: StageId::TreeD,
    inputs: &[
        bind("input_path", Source::Reads(Artifact::StagedData)),
        bind("output_dir", Source::Run(R::OutputDir)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[output("comm_d", Field::CommD)],
    writes: &[Artifact::TreeD],
    requires: &[],
};

const SDR: StageDescriptor = StageDescriptor {
    stage: StageId::Sdr,
    inputs: &[
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("output_dir", Source::Run(R::OutputDir)),
        bind("porep_id", Source::Run(R::PorepId)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[],
    // Every layer 1..=num_layers; only the last one is referenced by name.
    writes: &[Artifact::SectorKey],
    requires: &[],
};

const TREE_C: StageDescriptor = StageDescriptor {
    stage: StageId::TreeC,
    inputs: &[
        bind("input_dir", Source::Run(R::OutputDir)),
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[output("comm_c", Field::CommC)],
    writes: &[Artifact::TreeC],
    requires: &[Artifact::SectorKey],
};

const TREE_R_LAST: StageDescriptor = StageDescriptor {
    stage: StageId::TreeRLast,
    inputs: &[
        bind("output_dir", Source::Run(R::OutputDir)),
        bind("replica_path", Source::Reads(Artifact::SectorKey)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[output("comm_r_last", Field::CommRLast)],
    writes: &[Artifact::TreeRLast],
    requires: &[],
};

const COMM_R: StageDescriptor = StageDescriptor {
    stage: StageId::CommR,
    inputs: &[
        bind("comm_c", Source::Output(Field::CommC)),
        bind("comm_r_last", Source::Output(Field::CommRLast)),
    ],
    outputs: &[output("comm_r", Field::CommR)],
    writes: &[],
    requires: &[],
};

const CHALLENGES: StageDescriptor = StageDescriptor {
    stage: StageId::ChallengesNi,
    inputs: &[
        bind("comm_r", Source::Output(Field::CommR)),
        bind(
            "num_challenges_per_partition",
            Source::Param(P::NumChallengesPerPartition),
        ),
        bind("num_partitions", Source::Param(P::NumPartitions)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[Output {
        key: "challenges",
        field: Field::Challenges,
        persist: Some(Artifact::Challenges),
    }],
    writes: &[],
    requires: &[],
};

const VANILLA_PROOFS: StageDescriptor = StageDescriptor {
    stage: StageId::MerkleProofs,
    inputs: &[
        bind("challenges", Source::Contents(Artifact::Challenges)),
        bind("comm_c", Source::Output(Field::CommC)),
        bind("comm_d", Source::Output(Field::CommD)),
        bind("comm_r_last", Source::Output(Field::CommRLast)),
        bind("input_dir", Source::Run(R::OutputDir)),
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("num_partitions", Source::Param(P::NumPartitions)),
        bind("output_path", Source::Writes(Artifact::VanillaProofs)),
        bind("porep_id", Source::Run(R::PorepId)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("replica_path", Source::Reads(Artifact::SectorKey)),
        bind("sector_size", Source::Run(R::SectorSize)),
        bind("seed", Source::Run(R::Seed)),
    ],
    outputs: &[],
    writes: &[],
    requires: &[Artifact::TreeD, Artifact::TreeC, Artifact::TreeRLast],
};

const SNARK_PROOF: StageDescriptor = StageDescriptor {
    stage: StageId::SnarkProof,
    inputs: &[
        bind("comm_c", Source::Output(Field::CommC)),
        bind("comm_d", Source::Output(Field::CommD)),
        bind("comm_r", Source::Output(Field::CommR)),
        bind("comm_r_last", Source::Output(Field::CommRLast)),
        bind(
            "num_challenges_per_partition",
            Source::Param(P::NumChallengesPerPartition),
        ),
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("num_partitions", Source::Param(P::NumPartitions)),
        bind("output_path", Source::Writes(Artifact::SnarkProof)),
        bind("parameters_path", Source::Param(P::ParametersPath)),
        bind("porep_proofs_path", Source::Reads(Artifact::VanillaProofs)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("sector_size", Source::Run(R::SectorSize)),
    ],
    outputs: &[],
    writes: &[],
    requires: &[],
};

const SNARK_VERIFY: StageDescriptor = StageDescriptor {
    stage: StageId::SnarkProofVerify,
    inputs: &[
        bind("comm_d", Source::Output(Field::CommD)),
        bind("comm_r", Source::Output(Field::CommR)),
        bind("input_path", Source::Reads(Artifact::SnarkProof)),
        bind(
            "num_challenges_per_partition",
            Source::Param(P::NumChallengesPerPartition),
        ),
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("num_partitions", Source::Param(P::NumPartitions)),
        bind("porep_id", Source::Run(R::PorepId)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("sector_size", Source::Run(R::SectorSize)),
        bind("seed", Source::Run(R::Seed)),
        bind("verifying_key_path", Source::Param(P::VerifyingKeyPath)),
    ],
    outputs: &[output("verifies", Field::SnarkVerdict)],
    writes: &[],
    requires: &[],
};

const SNARK_AGGREGATE: StageDescriptor = StageDescriptor {
    stage: StageId::SnarkProofAggregate,
    inputs: &[
        bind("comm_r", Source::Output(Field::CommR)),
        bind("input_path", Source::Reads(Artifact::SnarkProof)),
        bind("num_proofs", Source::Param(P::NumPartitions)),
        bind("output_path", Source::Writes(Artifact::AggregatedProof)),
        bind("seed", Source::Run(R::Seed)),
        bind("srs_key_path", Source::Param(P::SrsKeyPath)),
    ],
    outputs: &[],
    writes: &[],
    requires: &[],
};

const AGGREGATE_VERIFY: StageDescriptor = StageDescriptor {
    stage: StageId::SnarkProofVerifyAggregated,
    inputs: &[
        bind("comm_d", Source::Output(Field::CommD)),
        bind("comm_r", Source::Output(Field::CommR)),
        bind("input_path", Source::Reads(Artifact::AggregatedProof)),
        bind(
            "num_challenges_per_partition",
            Source::Param(P::NumChallengesPerPartition),
        ),
        bind("num_layers", Source::Param(P::NumLayers)),
        bind("num_partitions", Source::Param(P::NumPartitions)),
        bind("porep_id", Source::Run(R::PorepId)),
        bind("replica_id", Source::Run(R::ReplicaId)),
        bind("sector_size", Source::Run(R::SectorSize)),
        bind("seed", Source::Run(R::Seed)),
        bind("srs_key_path", Source::Param(P::SrsKeyPath)),
        bind("verifying_key_path", Source::Param(P::VerifyingKeyPath)),
    ],
    outputs: &[output("verifies", Field::AggregateVerdict)],
    writes: &[],
    requires: &[],
};
