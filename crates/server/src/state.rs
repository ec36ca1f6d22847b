use std::sync::Arc;
use mintline_core::{Config, OnboardingPipeline, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    pipeline: Arc<OnboardingPipeline>,
}

impl AppState {
    pub fn new(config: Config, pipeline: Arc<OnboardingPipeline>) -> Self {
        Self { config, pipeline }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn pipeline(&self) -> &OnboardingPipeline {
        self.pipeline.as_ref()
    }
}
