use std::sync::Arc;

use paddock_core::{LoaderError, PaddockConfig, Pipeline, PolicyLoader, PolicyRegistry};

/// Shared state handed to the policy middleware.
#[derive(Clone)]
pub struct PolicyState {
    pipeline: Arc<Pipeline>,
}

impl PolicyState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Build a pipeline and load the configured policy directory.
    pub fn from_config(config: &PaddockConfig) -> Result<Self, LoaderError> {
        Ok(Self::new(Pipeline::load(config, &PolicyLoader::default())?))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        self.pipeline.registry()
    }
}
