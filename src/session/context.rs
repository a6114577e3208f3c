//! Session context
//!
//! Everything a session needs from its supervisor, bundled so the monitor
//! task can own a copy.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::media::AudioFrame;
use crate::protocol::InvocationStrategy;
use crate::registry::SessionRegistry;
use crate::supervisor::{StreamEvent, SupervisorConfig};

/// Collaborators handed to a session when it starts
#[derive(Clone)]
pub struct SessionContext {
    /// Supervisor configuration
    pub config: Arc<SupervisorConfig>,

    /// Builds decoder command lines
    pub strategy: Arc<InvocationStrategy>,

    /// Caller-owned destination for decoded audio
    pub output: mpsc::Sender<AudioFrame>,

    /// Lifecycle event fan-out
    pub events: broadcast::Sender<StreamEvent>,

    /// Registry the session removes itself from when it gives up
    pub registry: Arc<SessionRegistry>,
}

impl SessionContext {
    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}
