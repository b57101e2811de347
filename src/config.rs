use config::{Config, Environment, File};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::pipeline::VerificationPolicy;
use crate::stage::StageId;

/// Default location of the Filecoin proof parameter cache.
pub const DEFAULT_PARAMETER_CACHE: &str = "/var/tmp/filecoin-proof-parameters";

/// Loads operator settings from an optional config file layered under
/// environment variables (`NI_POREP__SECTION__KEY`).
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<PipelineSettings> {
    // Load .env file if it exists, ignore if not present
    dotenv().ok();

    let mut settings = Config::builder()
        .set_default("parameters.cache_dir", DEFAULT_PARAMETER_CACHE)?
        .set_default("parameters.source", "builtin")?
        .set_default("verification.on_failure", "abort")?
        .set_default("logging.level", "info")?;

    if let Some(path) = config_file_path {
        settings = settings.add_source(File::from(path).required(true));
    }

    settings = settings.add_source(Environment::with_prefix("NI_POREP").separator("__"));

    let pipeline_settings = settings.build()?.try_deserialize::<PipelineSettings>()?;

    Ok(pipeline_settings)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub stages: StageSettings,
    pub parameters: ParameterSettings,
    pub verification: VerificationSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Directory holding the stage executables. `PATH` lookup when unset.
    pub bin_dir: Option<PathBuf>,
    /// Per-stage executable overrides, keyed by stage name.
    #[serde(default)]
    pub executables: HashMap<StageId, PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    Builtin,
    Stage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSettings {
    pub cache_dir: PathBuf,
    pub source: ParameterSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSettings {
    pub on_failure: VerificationPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String, // "debug" | "info" | "warn" | "error"
}
