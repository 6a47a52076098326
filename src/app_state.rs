use std::sync::Arc;

use crate::services::{queue::JobQueue, status::StatusService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub status: Arc<StatusService>,
    /// Deployment label recorded on every job this API enqueues.
    pub environment: String,
}

impl AppState {
    pub fn new(queue: JobQueue, status: StatusService, environment: impl Into<String>) -> Self {
        Self {
            queue: Arc::new(queue),
            status: Arc::new(status),
            environment: environment.into(),
        }
    }
}
