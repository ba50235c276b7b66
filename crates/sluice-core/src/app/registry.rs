//! StageRegistry - ステージ → ハンドラの対応表
//!
//! ハンドラは `Arc<dyn StageHandler>` として保持し、同じステージの
//! ワーカー全員で共有します。

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::Stage;
use crate::ports::StageHandler;

#[derive(Default, Clone)]
pub struct StageRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for stage '{0}' is already registered")]
    AlreadyRegistered(Stage),
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stage: Stage,
        handler: Arc<dyn StageHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&stage) {
            return Err(RegistryError::AlreadyRegistered(stage));
        }
        self.handlers.insert(stage, handler);
        Ok(())
    }

    pub fn get(&self, stage: &Stage) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(stage).cloned()
    }

    pub fn contains(&self, stage: &Stage) -> bool {
        self.handlers.contains_key(stage)
    }

    /// Registered stages, sorted.
    pub fn registered_stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self.handlers.keys().cloned().collect();
        stages.sort();
        stages
    }
}
