//! Run-level inputs for one sector run.
//!
//! [`RunInputs`] is the loosely typed record a caller hands in (every field
//! optional, identifiers as hex). [`RunConfig`] is the validated, immutable
//! form shared read-only with every stage.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::{Bytes32, HexError, PorepId, ReplicaId, Seed};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required run input `{0}` is missing")]
    Missing(&'static str),

    #[error("run input `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read run inputs from {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Caller supplied record. Missing values stay `None` until validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    pub output_dir: Option<PathBuf>,
    pub porep_id: Option<String>,
    pub replica_id: Option<String>,
    pub sector_size: Option<u64>,
    pub seed: Option<String>,
}

impl RunInputs {
    /// Reads a JSON (or, by extension, TOML) inputs file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let unreadable = |reason: String| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml_from_str(&contents).map_err(unreadable),
            _ => serde_json::from_str(&contents).map_err(|e| unreadable(e.to_string())),
        }
    }

    /// Fields set in `other` replace the ones in `self`.
    pub fn merge(self, other: RunInputs) -> RunInputs {
        RunInputs {
            output_dir: other.output_dir.or(self.output_dir),
            porep_id: other.porep_id.or(self.porep_id),
            replica_id: other.replica_id.or(self.replica_id),
            sector_size: other.sector_size.or(self.sector_size),
            seed: other.seed.or(self.seed),
        }
    }
}

fn toml_from_str(contents: &str) -> Result<RunInputs, String> {
    config::Config::builder()
        .add_source(config::File::from_str(contents, config::FileFormat::Toml))
        .build()
        .and_then(|c| c.try_deserialize::<RunInputs>())
        .map_err(|e| e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub porep_id: PorepId,
    pub replica_id: ReplicaId,
    pub sector_size: u64,
    pub seed: Seed,
}

impl TryFrom<RunInputs> for RunConfig {
    type Error = ConfigError;

    /// Fields are checked in a fixed order and the first problem wins:
    /// output_dir, porep_id, replica_id, sector_size, seed.
    fn try_from(inputs: RunInputs) -> Result<Self, Self::Error> {
        let output_dir = inputs
            .output_dir
            .ok_or(ConfigError::Missing("output_dir"))?;
        if output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "output_dir",
                reason: "path is empty".into(),
            });
        }
        if output_dir.to_str().is_none() {
            return Err(ConfigError::Invalid {
                field: "output_dir",
                reason: "path is not valid UTF-8".into(),
            });
        }

        let porep_id = parse_id("porep_id", inputs.porep_id)?;
        let replica_id = parse_id("replica_id", inputs.replica_id)?;

        let sector_size = inputs
            .sector_size
            .ok_or(ConfigError::Missing("sector_size"))?;
        if sector_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sector_size",
                reason: "must be a positive number of bytes".into(),
            });
        }

        let seed = parse_id("seed", inputs.seed)?;

        Ok(RunConfig {
            output_dir,
            porep_id,
            replica_id,
            sector_size,
            seed,
        })
    }
}

fn parse_id(field: &'static str, value: Option<String>) -> Result<Bytes32, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(field))?;
    value
        .trim()
        .parse()
        .map_err(|e: HexError| ConfigError::Invalid {
            field,
            reason: e.to_string(),
        })
}
