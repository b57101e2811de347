//! Deterministic naming and handling of the files a sector run leaves in its
//! output directory.
//!
//! The output directory belongs to exactly one run at a time. Two runs
//! sharing a directory overwrite each other's artifacts; callers must keep
//! them apart.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode or decode {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has no `{key}` entry")]
    MissingEntry { path: PathBuf, key: String },
}

impl ArtifactError {
    fn io(path: &Path, source: io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ArtifactError::Io { path, .. }
            | ArtifactError::Json { path, .. }
            | ArtifactError::MissingEntry { path, .. } => path,
        }
    }
}

/// Logical names of everything persisted under the run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    /// Zero-filled placeholder standing in for the unsealed data of a CC sector.
    StagedData,
    /// One SDR layer, numbered from 1.
    Layer(usize),
    /// The last SDR layer.
    SectorKey,
    TreeD,
    TreeC,
    TreeRLast,
    Challenges,
    VanillaProofs,
    SnarkProof,
    AggregatedProof,
    Journal,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::StagedData => f.write_str("staged_data"),
            Artifact::Layer(layer) => write!(f, "layer_{layer}"),
            Artifact::SectorKey => f.write_str("sector_key"),
            Artifact::TreeD => f.write_str("tree_d"),
            Artifact::TreeC => f.write_str("tree_c"),
            Artifact::TreeRLast => f.write_str("tree_r_last"),
            Artifact::Challenges => f.write_str("challenges"),
            Artifact::VanillaProofs => f.write_str("vanilla_proofs"),
            Artifact::SnarkProof => f.write_str("snark_proof"),
            Artifact::AggregatedProof => f.write_str("snark_proof_aggregated"),
            Artifact::Journal => f.write_str("journal"),
        }
    }
}

/// Maps logical artifacts to concrete paths under one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
    num_layers: usize,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, num_layers: usize) -> Self {
        Self {
            root: root.into(),
            num_layers,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Creates the run directory and its parents. Safe to call repeatedly.
    pub fn ensure_run_directory(&self) -> Result<&Path, ArtifactError> {
        fs::create_dir_all(&self.root).map_err(|e| ArtifactError::io(&self.root, e))?;
        debug!("Run directory ready at {}", self.root.display());
        Ok(&self.root)
    }

    pub fn path_for(&self, artifact: Artifact) -> PathBuf {
        match artifact {
            Artifact::StagedData => self.root.join("unsealed.dat"),
            Artifact::Layer(layer) => self.layer_path(layer),
            Artifact::SectorKey => self.sector_key_path(),
            Artifact::TreeD => self.root.join("sc-02-data-tree-d.dat"),
            Artifact::TreeC => self.root.join("sc-02-data-tree-c.dat"),
            Artifact::TreeRLast => self.root.join("sc-02-data-tree-r-last.dat"),
            Artifact::Challenges => self.root.join("challenges.json"),
            Artifact::VanillaProofs => self.root.join("vanilla-proofs.dat"),
            Artifact::SnarkProof => self.root.join("snark-proof.dat"),
            Artifact::AggregatedProof => self.root.join("snark-proof-aggregated.dat"),
            Artifact::Journal => self.root.join("run-journal.json"),
        }
    }

    pub fn layer_path(&self, layer: usize) -> PathBuf {
        self.root.join(format!("sc-02-data-layer-{layer}.dat"))
    }

    pub fn layer_paths(&self) -> Vec<PathBuf> {
        (1..=self.num_layers).map(|layer| self.layer_path(layer)).collect()
    }

    /// The sector key is the last SDR layer.
    pub fn sector_key_path(&self) -> PathBuf {
        self.layer_path(self.num_layers)
    }

    /// Sizes `path` to exactly `size` zero bytes, truncating any previous content.
    pub fn preallocate(&self, path: &Path, size: u64) -> Result<(), ArtifactError> {
        let file = File::create(path).map_err(|e| ArtifactError::io(path, e))?;
        file.set_len(size).map_err(|e| ArtifactError::io(path, e))?;
        file.sync_all().map_err(|e| ArtifactError::io(path, e))?;
        debug!("Preallocated {} ({size} bytes)", path.display());
        Ok(())
    }

    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        artifact: Artifact,
        value: &T,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.path_for(artifact);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|e| ArtifactError::io(&path, e))?;
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<T, ArtifactError> {
        let path = self.path_for(artifact);
        let bytes = fs::read(&path).map_err(|e| ArtifactError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json { path, source })
    }
}
