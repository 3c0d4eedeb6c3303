//! Shared application state for the HTTP handlers.

use std::sync::Arc;

use crate::pipeline::Pipeline;

/// State handed to every request.
///
/// The pipeline is immutable after startup; requests share nothing else.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}
