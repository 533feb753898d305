pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::scoring::PostureScorer;
use crate::state::FindingStore;
use crate::suppression::SuppressionManager;
use crate::sync::DeltaSyncEngine;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DeltaSyncEngine>,
    pub suppression: Arc<SuppressionManager>,
    pub scorer: Arc<PostureScorer>,
    pub store: Arc<dyn FindingStore>,
}

impl AppState {
    pub fn new(
        engine: Arc<DeltaSyncEngine>,
        suppression: Arc<SuppressionManager>,
        scorer: Arc<PostureScorer>,
        store: Arc<dyn FindingStore>,
    ) -> Self {
        Self {
            engine,
            suppression,
            scorer,
            store,
        }
    }
}
