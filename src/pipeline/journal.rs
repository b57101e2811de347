use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::fields::{Field, FieldValue};
use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::parameters::SectorParameters;
use crate::run_config::RunConfig;
use crate::stage::StageId;
use crate::types::{PorepId, ReplicaId, Seed};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JournalStatus {
    Running,
    Completed,
    VerificationFailed { stage: StageId },
    Failed { stage: Option<StageId>, error: String },
}

/// Progress record kept in the output directory for diagnosis and manual
/// resumption. Rewritten whole after every completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunJournal {
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub porep_id: PorepId,
    pub replica_id: ReplicaId,
    pub seed: Seed,
    pub sector_size: u64,
    pub parameters: SectorParameters,
    pub completed: Vec<StageId>,
    pub outputs: BTreeMap<Field, FieldValue>,
    pub status: JournalStatus,
}

impl RunJournal {
    pub fn new(config: &RunConfig, parameters: &SectorParameters) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            updated_at: now,
            porep_id: config.porep_id,
            replica_id: config.replica_id,
            seed: config.seed,
            sector_size: config.sector_size,
            parameters: parameters.clone(),
            completed: Vec::new(),
            outputs: BTreeMap::new(),
            status: JournalStatus::Running,
        }
    }

    pub fn last_completed(&self) -> Option<StageId> {
        self.completed.last().copied()
    }

    pub fn record(&mut self, stage: StageId, outputs: &[(Field, FieldValue)]) {
        self.completed.push(stage);
        for (field, value) in outputs {
            self.outputs.insert(*field, value.clone());
        }
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, status: JournalStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn save(&self, store: &ArtifactStore) -> Result<(), ArtifactError> {
        store.write_json(Artifact::Journal, self).map(|_| ())
    }

    pub fn load(store: &ArtifactStore) -> Result<Self, ArtifactError> {
        store.read_json(Artifact::Journal)
    }
}
