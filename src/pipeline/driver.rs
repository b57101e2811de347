use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::fields::{Field, FieldValue};
use super::journal::{JournalStatus, RunJournal};
use super::sequence::{
    Binding, ParamField, RunField, SequenceError, Source, StageDescriptor, StageSequence,
};
use super::VerificationPolicy;
use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::error::{PipelineError, RunFailure};
use crate::parameters::{ParameterResolver, SectorParameters};
use crate::run_config::RunConfig;
use crate::stage::{StageError, StageId, StageInvoker, StageRecord};
use crate::types::Commitment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub stage: StageId,
    pub field: Field,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Every verification stage that ran returned a positive verdict.
    Verified,
    /// The sequence has no verification stage.
    Unverified,
    VerificationFailed { stage: StageId },
}

/// What a run left behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub sector_size: u64,
    pub parameters: SectorParameters,
    pub completed: Vec<StageId>,
    pub outputs: BTreeMap<Field, FieldValue>,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub verdicts: Vec<Verdict>,
    pub outcome: Outcome,
}

impl RunReport {
    pub fn commitment(&self, field: Field) -> Option<Commitment> {
        self.outputs.get(&field).and_then(FieldValue::as_commitment)
    }

    pub fn challenges(&self) -> Option<&[u64]> {
        self.outputs
            .get(&Field::Challenges)
            .and_then(FieldValue::as_challenges)
    }

    pub fn is_verified(&self) -> bool {
        self.outcome == Outcome::Verified
    }

    /// Turns a negative verdict into an error for callers that treat it as one.
    pub fn ensure_verified(&self) -> Result<(), PipelineError> {
        match self.outcome {
            Outcome::VerificationFailed { stage } => Err(PipelineError::VerificationFailed { stage }),
            Outcome::Verified | Outcome::Unverified => Ok(()),
        }
    }
}

/// Runs a [`StageSequence`] for one sector, strictly one stage after the
/// other, threading each stage's outputs into later requests.
pub struct PipelineDriver<I> {
    invoker: I,
    sequence: StageSequence,
    policy: VerificationPolicy,
}

impl<I: StageInvoker> PipelineDriver<I> {
    pub fn new(invoker: I, sequence: StageSequence) -> Result<Self, SequenceError> {
        sequence.validate()?;
        Ok(Self {
            invoker,
            sequence,
            policy: VerificationPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    pub fn run<R>(&self, config: &RunConfig, resolver: &R) -> Result<RunReport, RunFailure>
    where
        R: ParameterResolver + ?Sized,
    {
        info!(
            "Starting NI-PoRep run for a {} byte sector in {}",
            config.sector_size,
            config.output_dir.display()
        );

        let params = resolver
            .resolve(config.sector_size)
            .map_err(|e| RunFailure::before_stages(e.into()))?;
        info!(
            "Resolved parameters: {} layers, {} partitions x {} challenges",
            params.num_layers, params.num_partitions, params.num_challenges_per_partition
        );

        let store = ArtifactStore::new(&config.output_dir, params.num_layers);
        self.prepare(config, &store)
            .map_err(|e| RunFailure::before_stages(e.into()))?;

        let mut journal = RunJournal::new(config, &params);
        journal
            .save(&store)
            .map_err(|e| RunFailure::before_stages(e.into()))?;

        let mut context = RunContext {
            config,
            params: &params,
            store: &store,
            values: BTreeMap::new(),
        };
        let mut verdicts = Vec::new();
        let mut failed_verification = None;

        for descriptor in self.sequence.stages() {
            let stage = descriptor.stage;
            let previous = journal.last_completed();
            let step = self
                .run_stage(descriptor, &mut context)
                .map_err(|e| (previous, e))
                .and_then(|produced| {
                    journal.record(stage, &produced);
                    // The stage's work is on disk even if its progress is not.
                    journal
                        .save(&store)
                        .map_err(|e| (Some(stage), PipelineError::from(e)))?;
                    Ok(produced)
                });

            let produced = match step {
                Ok(produced) => produced,
                Err((last_completed, error)) => {
                    let failure = RunFailure {
                        stage: Some(stage),
                        last_completed,
                        error,
                    };
                    error!("Stage {stage} failed: {}", failure.error);
                    if let Some(last) = failure.last_completed {
                        error!(
                            "Artifacts up to stage {last} remain in {}",
                            store.root().display()
                        );
                    }
                    journal.finish(JournalStatus::Failed {
                        stage: Some(stage),
                        error: failure.error.to_string(),
                    });
                    if let Err(e) = journal.save(&store) {
                        warn!("Could not record the failure in the run journal: {e}");
                    }
                    return Err(failure);
                }
            };

            for (field, value) in &produced {
                if let Some(verified) = value.as_verdict() {
                    verdicts.push(Verdict {
                        stage,
                        field: *field,
                        verified,
                    });
                    if !verified {
                        warn!("Stage {stage} returned a negative verdict");
                        if failed_verification.is_none() {
                            failed_verification = Some(stage);
                        }
                    }
                }
            }

            if failed_verification == Some(stage) && self.policy == VerificationPolicy::Abort {
                info!("Stopping after failed verification in {stage}");
                break;
            }
        }

        let outcome = match failed_verification {
            Some(stage) => Outcome::VerificationFailed { stage },
            None if verdicts.is_empty() => Outcome::Unverified,
            None => Outcome::Verified,
        };
        journal.finish(match outcome {
            Outcome::VerificationFailed { stage } => JournalStatus::VerificationFailed { stage },
            Outcome::Verified | Outcome::Unverified => JournalStatus::Completed,
        });
        journal.save(&store).map_err(|e| RunFailure {
            stage: None,
            last_completed: journal.last_completed(),
            error: e.into(),
        })?;

        info!("NI-PoRep run finished: {outcome:?}");
        let outputs = context.values;
        Ok(RunReport {
            output_dir: config.output_dir.clone(),
            sector_size: config.sector_size,
            artifacts: self.artifact_index(&store, &journal.completed),
            parameters: params,
            completed: journal.completed,
            outputs,
            verdicts,
            outcome,
        })
    }

    /// Creates the run directory and the zero-filled placeholder for the
    /// unsealed data of a CC sector.
    fn prepare(&self, config: &RunConfig, store: &ArtifactStore) -> Result<(), ArtifactError> {
        store.ensure_run_directory()?;
        for artifact in self.sequence.prepared() {
            match artifact {
                Artifact::StagedData => {
                    store.preallocate(&store.path_for(Artifact::StagedData), config.sector_size)?
                }
                other => debug!("Nothing to prepare for {other}"),
            }
        }
        Ok(())
    }

    fn run_stage(
        &self,
        descriptor: &StageDescriptor,
        context: &mut RunContext<'_>,
    ) -> Result<Vec<(Field, FieldValue)>, PipelineError> {
        let stage = descriptor.stage;
        let request = context.request_for(descriptor)?;
        info!("Running stage {stage}");
        let logged = Value::Object(request.clone());
        debug!("{stage} request: {logged}");

        let started = Instant::now();
        let response = self.invoker.invoke(stage, &request)?;
        let logged = Value::Object(response.clone());
        debug!("{stage} response: {logged}");

        let produced = context.absorb(descriptor, &response)?;
        info!("Stage {stage} finished in {:.2?}", started.elapsed());
        Ok(produced)
    }

    fn artifact_index(
        &self,
        store: &ArtifactStore,
        completed: &[StageId],
    ) -> BTreeMap<String, PathBuf> {
        let mut index = BTreeMap::new();
        let produced = self
            .sequence
            .prepared()
            .iter()
            .copied()
            .chain(
                self.sequence
                    .stages()
                    .iter()
                    .filter(|d| completed.contains(&d.stage))
                    .flat_map(|d| d.produced_artifacts()),
            );
        for artifact in produced {
            if artifact == Artifact::SectorKey {
                for layer in 1..=store.num_layers() {
                    index.insert(
                        Artifact::Layer(layer).to_string(),
                        store.path_for(Artifact::Layer(layer)),
                    );
                }
            }
            index.insert(artifact.to_string(), store.path_for(artifact));
        }
        index.insert(Artifact::Journal.to_string(), store.path_for(Artifact::Journal));
        index
    }
}

/// Everything a request can be built from during one run.
struct RunContext<'a> {
    config: &'a RunConfig,
    params: &'a SectorParameters,
    store: &'a ArtifactStore,
    values: BTreeMap<Field, FieldValue>,
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

impl RunContext<'_> {
    fn request_for(&self, descriptor: &StageDescriptor) -> Result<StageRecord, PipelineError> {
        let mut request = StageRecord::new();
        for binding in descriptor.inputs {
            request.insert(binding.key.to_string(), self.resolve(descriptor.stage, binding)?);
        }
        Ok(request)
    }

    fn resolve(&self, stage: StageId, binding: &Binding) -> Result<Value, PipelineError> {
        let value = match binding.source {
            Source::Run(field) => match field {
                RunField::OutputDir => path_value(&self.config.output_dir),
                RunField::PorepId => json!(self.config.porep_id),
                RunField::ReplicaId => json!(self.config.replica_id),
                RunField::SectorSize => json!(self.config.sector_size),
                RunField::Seed => json!(self.config.seed),
            },
            Source::Param(field) => match field {
                ParamField::NumLayers => json!(self.params.num_layers),
                ParamField::NumChallengesPerPartition => {
                    json!(self.params.num_challenges_per_partition)
                }
                ParamField::NumPartitions => json!(self.params.num_partitions),
                ParamField::ParametersPath => path_value(&self.params.parameters_path),
                ParamField::SrsKeyPath => path_value(&self.params.srs_key_path),
                ParamField::VerifyingKeyPath => path_value(&self.params.verifying_key_path),
            },
            Source::Reads(artifact) | Source::Writes(artifact) => {
                path_value(&self.store.path_for(artifact))
            }
            Source::Contents(artifact) => {
                let mut record: StageRecord = self.store.read_json(artifact)?;
                record
                    .remove(binding.key)
                    .ok_or_else(|| ArtifactError::MissingEntry {
                        path: self.store.path_for(artifact),
                        key: binding.key.to_string(),
                    })?
            }
            Source::Output(field) => self
                .values
                .get(&field)
                .map(FieldValue::to_json)
                .ok_or(SequenceError::UnboundField {
                    stage,
                    key: binding.key,
                    field,
                })?,
        };
        Ok(value)
    }

    /// Captures the declared outputs of a response and persists the ones
    /// that are backed by an artifact.
    fn absorb(
        &mut self,
        descriptor: &StageDescriptor,
        response: &StageRecord,
    ) -> Result<Vec<(Field, FieldValue)>, PipelineError> {
        let stage = descriptor.stage;
        let mut produced = Vec::with_capacity(descriptor.outputs.len());
        for output in descriptor.outputs {
            let raw = response.get(output.key).ok_or_else(|| {
                StageError::malformed(stage, format!("response has no `{}` field", output.key))
            })?;
            let value = output
                .field
                .parse(raw)
                .map_err(|reason| StageError::malformed(stage, reason))?;
            if let Some(challenges) = value.as_challenges() {
                let expected = self.params.total_challenges();
                if challenges.len() != expected {
                    return Err(StageError::malformed(
                        stage,
                        format!(
                            "expected {expected} challenges, got {}",
                            challenges.len()
                        ),
                    )
                    .into());
                }
            }

            if let Some(artifact) = output.persist {
                let mut persisted = StageRecord::new();
                persisted.insert(output.key.to_string(), value.to_json());
                let path = self.store.write_json(artifact, &persisted)?;
                debug!("Persisted {} to {}", output.field, path.display());
            }
            self.values.insert(output.field, value.clone());
            produced.push((output.field, value));
        }
        Ok(produced)
    }
}
