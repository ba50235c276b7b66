//! AppBuilder - ハンドラの登録とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_stages()` で設定上ワーカーが必要なステージを宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - パイプラインにないステージを期待した場合もエラー
//!
//! ```ignore
//! let app = AppBuilder::new()
//!     .register(Stage::extract(), Arc::new(MyExtractor))?
//!     .register(Stage::classify(), Arc::new(MyClassifier))?
//!     .expect_stages(&config.pool_stages())
//!     .build()?;
//! ```

use std::sync::Arc;

use crate::app::registry::{RegistryError, StageRegistry};
use crate::app::worker_loop::{PipelineLauncher, Worker, WorkerConfig};
use crate::domain::{Pipeline, Stage, WorkerIdentity};
use crate::ports::{StageHandler, TaskStore};
use crate::queue::StageQueue;

pub struct AppBuilder {
    registry: StageRegistry,
    pipeline: Pipeline,
    expected_stages: Option<Vec<Stage>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("no handler registered for stages {0:?}")]
    MissingStages(Vec<Stage>),

    #[error("stages {0:?} are not part of the pipeline")]
    UnknownStages(Vec<Stage>),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: StageRegistry::new(),
            pipeline: Pipeline::default(),
            expected_stages: None,
        }
    }

    pub fn register(
        mut self,
        stage: Stage,
        handler: Arc<dyn StageHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(stage, handler)?;
        Ok(self)
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn expect_stages(mut self, stages: &[Stage]) -> Self {
        self.expected_stages = Some(stages.to_vec());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if self.pipeline.stages().is_empty() {
            return Err(BuildError::EmptyPipeline);
        }
        if let Some(expected) = &self.expected_stages {
            let unknown: Vec<Stage> = expected
                .iter()
                .filter(|s| !self.pipeline.contains(s))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(BuildError::UnknownStages(unknown));
            }

            let mut missing: Vec<Stage> = expected
                .iter()
                .filter(|s| !self.registry.contains(s))
                .cloned()
                .collect();
            missing.sort();
            missing.dedup();
            if !missing.is_empty() {
                return Err(BuildError::MissingStages(missing));
            }
        }
        Ok(App {
            registry: Arc::new(self.registry),
            pipeline: self.pipeline,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated handlers plus the stage order.
#[derive(Clone)]
pub struct App {
    pub registry: Arc<StageRegistry>,
    pub pipeline: Pipeline,
}

impl App {
    /// A worker for `stage`, chained into the stage that follows it.
    /// `None` when no handler is registered for `stage`.
    pub fn worker(
        &self,
        identity: WorkerIdentity,
        stage: &Stage,
        store: Arc<dyn TaskStore>,
        config: WorkerConfig,
    ) -> Option<Worker> {
        let handler = self.registry.get(stage)?;
        let queue = StageQueue::new(store, stage.clone());
        let next = self
            .pipeline
            .next_after(stage)
            .map(|next| queue.for_stage(next.clone()));
        Some(
            Worker::new(identity, queue, handler)
                .with_next_stage(next)
                .with_config(config),
        )
    }

    pub fn launcher(&self, store: Arc<dyn TaskStore>, config: WorkerConfig) -> PipelineLauncher {
        PipelineLauncher::new(self.clone(), store, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::registry::tests::EchoHandler;
    use crate::impls::InMemoryStore;

    #[test]
    fn build_success() {
        let app = AppBuilder::new()
            .register(Stage::extract(), Arc::new(EchoHandler))
            .unwrap()
            .register(Stage::classify(), Arc::new(EchoHandler))
            .unwrap()
            .expect_stages(&[Stage::extract(), Stage::classify()])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_reports_missing_stages() {
        let app = AppBuilder::new()
            .register(Stage::extract(), Arc::new(EchoHandler))
            .unwrap()
            .expect_stages(&[Stage::extract(), Stage::classify(), Stage::classify()])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingStages(missing)) if missing == vec![Stage::classify()]
        ));
    }

    #[test]
    fn build_rejects_stage_outside_pipeline() {
        let app = AppBuilder::new()
            .register(Stage::new("geotag"), Arc::new(EchoHandler))
            .unwrap()
            .expect_stages(&[Stage::new("geotag")])
            .build();
        assert!(matches!(app, Err(BuildError::UnknownStages(_))));
    }

    #[test]
    fn build_without_expectations() {
        let app = AppBuilder::new().build();
        assert!(app.is_ok());

        let empty = AppBuilder::new().pipeline(Pipeline::new(vec![])).build();
        assert!(matches!(empty, Err(BuildError::EmptyPipeline)));
    }

    #[test]
    fn worker_is_chained_to_next_stage() {
        let app = AppBuilder::new()
            .register(Stage::extract(), Arc::new(EchoHandler))
            .unwrap()
            .register(Stage::classify(), Arc::new(EchoHandler))
            .unwrap()
            .build()
            .unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryStore::new());

        let extractor = app
            .worker(
                WorkerIdentity::new("extractor", 0),
                &Stage::extract(),
                store.clone(),
                WorkerConfig::default(),
            )
            .unwrap();
        assert_eq!(extractor.next_stage(), Some(&Stage::classify()));

        let classifier = app
            .worker(
                WorkerIdentity::new("classifier", 0),
                &Stage::classify(),
                store.clone(),
                WorkerConfig::default(),
            )
            .unwrap();
        assert_eq!(classifier.next_stage(), None);

        assert!(
            app.worker(
                WorkerIdentity::new("geo", 0),
                &Stage::new("geotag"),
                store,
                WorkerConfig::default(),
            )
            .is_none()
        );
    }
}
