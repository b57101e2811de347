use std::{
    collections::HashMap,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};
use tracing::{debug, info, warn};

use super::{into_record, StageError, StageId, StageInvoker, StageRecord};
use crate::config::StageSettings;

/// Runs every stage as a child process: the request record goes to stdin as
/// one JSON object, the response record is read back from stdout.
#[derive(Debug, Clone, Default)]
pub struct CommandInvoker {
    bin_dir: Option<PathBuf>,
    executables: HashMap<StageId, PathBuf>,
}

impl CommandInvoker {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self {
            bin_dir,
            executables: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &StageSettings) -> Self {
        Self {
            bin_dir: settings.bin_dir.clone(),
            executables: settings.executables.clone(),
        }
    }

    /// Uses `executable` for `stage` instead of the default name.
    pub fn with_executable(mut self, stage: StageId, executable: impl Into<PathBuf>) -> Self {
        self.executables.insert(stage, executable.into());
        self
    }

    pub fn executable(&self, stage: StageId) -> PathBuf {
        if let Some(path) = self.executables.get(&stage) {
            return path.clone();
        }
        match &self.bin_dir {
            Some(dir) => dir.join(stage.name()),
            None => PathBuf::from(stage.name()),
        }
    }
}

impl StageInvoker for CommandInvoker {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        let executable = self.executable(stage);
        let body = serde_json::to_vec(request)
            .map_err(|e| StageError::new(stage, None, format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                StageError::new(
                    stage,
                    None,
                    format!("failed to launch {}: {e}", executable.display()),
                )
            })?;
        debug!("Launched {} (pid {})", executable.display(), child.id());

        if let Some(mut stdin) = child.stdin.take() {
            // A stage that exits without reading its request reports through its exit status.
            match stdin.write_all(&body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    abandon(&mut child, &executable);
                    return Err(StageError::new(
                        stage,
                        None,
                        format!("failed to send request: {e}"),
                    ));
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| StageError::new(stage, None, format!("failed to wait for stage: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(StageError::new(stage, output.status.code(), stderr));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| StageError::malformed(stage, e.to_string()))?;
        let record = into_record(stage, value)?;

        info!("{stage} completed successfully");
        Ok(record)
    }
}

/// Kills a child whose request could not be delivered and reaps it.
fn abandon(child: &mut Child, executable: &Path) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill {}: {e}", executable.display());
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap {}: {e}", executable.display());
    }
}
