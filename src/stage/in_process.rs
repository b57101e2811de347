use std::collections::HashMap;

use super::{StageError, StageId, StageInvoker, StageRecord};

type StageFn = Box<dyn Fn(&StageRecord) -> Result<StageRecord, String> + Send + Sync>;

/// Dispatches stages to native functions in the current process.
#[derive(Default)]
pub struct InProcessInvoker {
    stages: HashMap<StageId, StageFn>,
}

impl InProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, stage: StageId, f: F) -> Self
    where
        F: Fn(&StageRecord) -> Result<StageRecord, String> + Send + Sync + 'static,
    {
        self.stages.insert(stage, Box::new(f));
        self
    }
}

impl StageInvoker for InProcessInvoker {
    fn invoke(&self, stage: StageId, request: &StageRecord) -> Result<StageRecord, StageError> {
        let f = self
            .stages
            .get(&stage)
            .ok_or_else(|| StageError::new(stage, None, "no in-process implementation registered"))?;
        f(request).map_err(|diagnostic| StageError::new(stage, None, diagnostic))
    }
}
