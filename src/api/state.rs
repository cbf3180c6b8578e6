//! API shared state containing actor handles

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::actors::hub::HubHandle;
use crate::pipeline::Pipeline;
use crate::session::SessionSettings;
use crate::storage::PersistenceSink;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Hub that new viewer sessions register with
    pub hub: HubHandle,

    /// Sink queried by the health check
    pub sink: Arc<dyn PersistenceSink>,

    pub session_settings: SessionSettings,

    /// Every viewer session runs on this tracker so shutdown can wait for it
    pub sessions: TaskTracker,

    /// Closes remaining sessions once the shutdown grace period is over
    pub force_close: CancellationToken,
}

impl ApiState {
    pub fn new(pipeline: &Pipeline, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            hub: pipeline.hub().clone(),
            sink,
            session_settings: pipeline.session_settings().clone(),
            sessions: pipeline.sessions().clone(),
            force_close: pipeline.force_close().clone(),
        }
    }
}
