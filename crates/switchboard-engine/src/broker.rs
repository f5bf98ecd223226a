use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::info;

use switchboard_core::ids::SessionId;
use switchboard_core::protocol::SessionEvent;

use crate::config::DispatchConfig;
use crate::registry::ToolRegistry;
use crate::session::Session;

/// Owns the tool registry and supervises every live session.
pub struct Broker {
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl Broker {
    pub fn new(registry: Arc<ToolRegistry>, config: DispatchConfig) -> Self {
        Self {
            registry,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// A client connected: create its session, already in `Negotiating`.
    pub fn connect(&self) -> (Arc<Session>, mpsc::Receiver<SessionEvent>) {
        let (session, events) = Session::new(Arc::clone(&self.registry), self.config.clone());
        session.begin_negotiation();
        self.sessions
            .insert(session.id().clone(), Arc::clone(&session));
        info!(session_id = %session.id(), sessions = self.sessions.len(), "session connected");
        (session, events)
    }

    /// Transport lost or client closed: close and forget the session.
    /// Unknown ids are ignored.
    pub async fn disconnect(&self, id: &SessionId) {
        let Some((_, session)) = self.sessions.remove(id) else {
            return;
        };
        session.close().await;
        info!(session_id = %id, sessions = self.sessions.len(), "session disconnected");
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!(sessions = ids.len(), "closing all sessions");
        for id in ids {
            self.disconnect(&id).await;
        }
    }
}
