use std::sync::Arc;

use paperflow_engine::Coordinator;

/// Shared application state passed to every route handler.
pub struct AppState {
    pub engine: Arc<Coordinator>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl AppState {
    pub fn new(engine: Arc<Coordinator>) -> Self {
        Self { engine }
    }
}
