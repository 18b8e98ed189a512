//! Application state.

use std::sync::Arc;
use std::time::Duration;

use scribe_orchestrator::{
    ChunkDispatcher, FfprobeDurationProbe, Finalizer, JobSubmitter, RetryCoordinator,
    TranscriptSink,
};
use scribe_queue::TaskDispatcher;
use scribe_storage::ObjectStore;
use scribe_store::JobStore;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub sink: TranscriptSink,
    pub submitter: Arc<JobSubmitter>,
    pub retry: Arc<RetryCoordinator>,
}

impl AppState {
    /// Wire the orchestrator components over already-connected backends.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        finalizer: Finalizer,
        task_deadline: Duration,
    ) -> Self {
        let chunk_dispatcher = ChunkDispatcher::new(Arc::clone(&dispatcher), task_deadline);
        let probe = FfprobeDurationProbe::new(Arc::clone(&objects), config.work_dir.clone());

        let submitter = JobSubmitter::new(
            Arc::clone(&store),
            chunk_dispatcher.clone(),
            finalizer.clone(),
        )
        .with_slicing(config.chunk_slice_secs, config.chunk_overlap_secs)
        .with_probe(Arc::new(probe));

        let sink = finalizer.sink().clone();
        let retry = RetryCoordinator::new(Arc::clone(&store), chunk_dispatcher, finalizer);

        Self {
            config,
            store,
            objects,
            dispatcher,
            sink,
            submitter: Arc::new(submitter),
            retry: Arc::new(retry),
        }
    }
}
