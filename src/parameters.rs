//! Sector-size dependent constants and parameter file locations.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::stage::{StageError, StageId, StageInvoker, StageRecord};

pub const SECTOR_SIZE_2_KIB: u64 = 1 << 11;
pub const SECTOR_SIZE_4_KIB: u64 = 1 << 12;
pub const SECTOR_SIZE_16_KIB: u64 = 1 << 14;
pub const SECTOR_SIZE_32_KIB: u64 = 1 << 15;
pub const SECTOR_SIZE_8_MIB: u64 = 1 << 23;
pub const SECTOR_SIZE_16_MIB: u64 = 1 << 24;
pub const SECTOR_SIZE_512_MIB: u64 = 1 << 29;
pub const SECTOR_SIZE_32_GIB: u64 = 1 << 35;
pub const SECTOR_SIZE_64_GIB: u64 = 1 << 36;

/// Groth16 parameters are versioned together with the circuit.
const PARAMETER_VERSION: &str = "v28";

const SRS_KEY_FILE: &str = "v28-fil-inner-product-v1.srs";

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("no parameter set is registered for sector size {0}")]
    UnsupportedSectorSize(u64),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("inconsistent default values for sector size {sector_size}: {reason}")]
    Inconsistent { sector_size: u64, reason: String },
}

/// Sector constants, resolved once per run and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorParameters {
    pub num_layers: usize,
    pub num_challenges_per_partition: usize,
    pub num_partitions: usize,
    pub parameters_path: PathBuf,
    pub srs_key_path: PathBuf,
    pub verifying_key_path: PathBuf,
}

impl SectorParameters {
    pub fn total_challenges(&self) -> usize {
        self.num_partitions * self.num_challenges_per_partition
    }
}

/// Looks up the [`SectorParameters`] for a sector size.
pub trait ParameterResolver {
    fn resolve(&self, sector_size: u64) -> Result<SectorParameters, ParameterError>;
}

/// The per-size counts of a parameter set, without any paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValues {
    pub num_layers: usize,
    pub num_challenges_per_partition: usize,
    pub num_partitions: usize,
}

impl DefaultValues {
    const fn new(num_layers: usize, num_challenges_per_partition: usize, num_partitions: usize) -> Self {
        Self {
            num_layers,
            num_challenges_per_partition,
            num_partitions,
        }
    }
}

/// Registered sector sizes. Test sizes use two partitions so the proofs can
/// still be aggregated; production sizes use the NI-PoRep 126 x 18 layout.
const DEFAULT_VALUES: [(u64, DefaultValues); 9] = [
    (SECTOR_SIZE_2_KIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_4_KIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_16_KIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_32_KIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_8_MIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_16_MIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_512_MIB, DefaultValues::new(2, 2, 2)),
    (SECTOR_SIZE_32_GIB, DefaultValues::new(11, 18, 126)),
    (SECTOR_SIZE_64_GIB, DefaultValues::new(11, 18, 126)),
];

pub fn default_values(sector_size: u64) -> Option<DefaultValues> {
    DEFAULT_VALUES
        .iter()
        .find(|(size, _)| *size == sector_size)
        .map(|(_, values)| *values)
}

pub fn supported_sector_sizes() -> impl Iterator<Item = u64> {
    DEFAULT_VALUES.iter().map(|(size, _)| *size)
}

/// Human readable size label used in parameter file names, e.g. `16KiB`.
pub fn size_label(sector_size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = sector_size;
    let mut unit = 0;
    while unit < UNITS.len() - 1 && size >= 1024 && size % 1024 == 0 {
        size /= 1024;
        unit += 1;
    }
    format!("{size}{}", UNITS[unit])
}

/// Derives parameter file locations inside the parameter cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPaths {
    cache_dir: PathBuf,
}

impl ParameterPaths {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn circuit_stem(sector_size: u64) -> String {
        format!(
            "{PARAMETER_VERSION}-ni-stacked-proof-of-replication-{}",
            size_label(sector_size)
        )
    }

    pub fn parameters_path(&self, sector_size: u64) -> PathBuf {
        self.cache_dir
            .join(format!("{}.params", Self::circuit_stem(sector_size)))
    }

    pub fn verifying_key_path(&self, sector_size: u64) -> PathBuf {
        self.cache_dir
            .join(format!("{}.vk", Self::circuit_stem(sector_size)))
    }

    pub fn srs_key_path(&self) -> PathBuf {
        self.cache_dir.join(SRS_KEY_FILE)
    }

    fn complete(&self, sector_size: u64, values: DefaultValues) -> SectorParameters {
        SectorParameters {
            num_layers: values.num_layers,
            num_challenges_per_partition: values.num_challenges_per_partition,
            num_partitions: values.num_partitions,
            parameters_path: self.parameters_path(sector_size),
            srs_key_path: self.srs_key_path(),
            verifying_key_path: self.verifying_key_path(sector_size),
        }
    }
}

/// Resolves from the table compiled into this crate.
#[derive(Debug, Clone)]
pub struct BuiltinParameters {
    paths: ParameterPaths,
}

impl BuiltinParameters {
    pub fn new(paths: ParameterPaths) -> Self {
        Self { paths }
    }
}

impl ParameterResolver for BuiltinParameters {
    fn resolve(&self, sector_size: u64) -> Result<SectorParameters, ParameterError> {
        let values =
            default_values(sector_size).ok_or(ParameterError::UnsupportedSectorSize(sector_size))?;
        Ok(self.paths.complete(sector_size, values))
    }
}

/// Response of the `default-values` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValuesOutput {
    pub num_layers: usize,
    pub num_porep_challenges: usize,
    pub num_porep_partitions: usize,
}

/// Resolves by asking the external `default-values` stage.
pub struct StageParameters<I> {
    invoker: I,
    paths: ParameterPaths,
}

impl<I: StageInvoker> StageParameters<I> {
    pub fn new(invoker: I, paths: ParameterPaths) -> Self {
        Self { invoker, paths }
    }
}

impl<I: StageInvoker> ParameterResolver for StageParameters<I> {
    fn resolve(&self, sector_size: u64) -> Result<SectorParameters, ParameterError> {
        let stage = StageId::DefaultValues;
        let mut request = StageRecord::new();
        request.insert("sector_size".into(), json!(sector_size));

        let response = self.invoker.invoke(stage, &request).map_err(|e| {
            // The lookup stage rejects unknown sizes by exiting non-zero.
            if e.exit_status.is_some() && e.diagnostic.contains("unknown sector size") {
                ParameterError::UnsupportedSectorSize(sector_size)
            } else {
                ParameterError::Stage(e)
            }
        })?;
        let output: DefaultValuesOutput =
            serde_json::from_value(serde_json::Value::Object(response))
                .map_err(|e| StageError::malformed(stage, e.to_string()))?;
        debug!("Default values for {sector_size}: {output:?}");

        let inconsistent = |reason: &str| ParameterError::Inconsistent {
            sector_size,
            reason: reason.to_string(),
        };
        if output.num_layers == 0 || output.num_porep_partitions == 0 {
            return Err(inconsistent("layer and partition counts must be positive"));
        }
        if output.num_porep_challenges == 0
            || output.num_porep_challenges % output.num_porep_partitions != 0
        {
            return Err(inconsistent(
                "challenge count must be a positive multiple of the partition count",
            ));
        }

        let values = DefaultValues {
            num_layers: output.num_layers,
            num_challenges_per_partition: output.num_porep_challenges
                / output.num_porep_partitions,
            num_partitions: output.num_porep_partitions,
        };
        Ok(self.paths.complete(sector_size, values))
    }
}
