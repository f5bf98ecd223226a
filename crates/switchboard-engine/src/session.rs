use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::errors::{BrokerError, ErrorKind};
use switchboard_core::ids::{InvocationId, SessionId};
use switchboard_core::invocation::{InvocationRecord, InvocationStatus, RequestedMode};
use switchboard_core::protocol::{
    Accepted, InvocationRequest, NegotiationResponse, Rejection, SessionEvent,
};
use switchboard_core::stream::{StreamCloseReason, StreamHandle};
use switchboard_core::tools::{CallAdapter, OutputKind};

use crate::config::DispatchConfig;
use crate::registry::{ToolEntry, ToolRegistry};

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Negotiating,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

pub(crate) struct InvocationEntry {
    pub record: InvocationRecord,
    pub cancel: CancellationToken,
}

/// A call admitted but not yet started.
pub(crate) struct CallJob {
    pub invocation_id: InvocationId,
    pub tool_name: String,
    pub adapter: Arc<dyn CallAdapter>,
    pub arguments: serde_json::Value,
    pub deadline: Duration,
    pub cancel: CancellationToken,
}

/// How long `close` waits for the stream task to report its closure.
const STREAM_CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Work admitted under the lock, started after it is released.
pub(crate) enum Launch {
    Call(CallJob),
    Stream(crate::stream::StreamJob),
}

pub(crate) struct ActiveStream {
    pub handle: StreamHandle,
    pub cancel: CancellationToken,
    /// Set by whoever takes the slot away from the stream task.
    pub close_reason: Arc<Mutex<Option<StreamCloseReason>>>,
    /// Cancelled once the stream task has emitted its `StreamClosed`.
    pub finished: CancellationToken,
}

impl ActiveStream {
    /// Detach the stream from its task with a reason the task will report.
    /// The returned token fires once that report has been queued.
    pub fn revoke(self, reason: StreamCloseReason) -> CancellationToken {
        *self.close_reason.lock() = Some(reason);
        self.cancel.cancel();
        self.finished
    }
}

/// Per-session mutable state. Only touched under [`Session::table`], never
/// across an await.
pub(crate) struct SessionTable {
    pub state: SessionState,
    pub capabilities: Vec<String>,
    pub invocations: HashMap<InvocationId, InvocationEntry>,
    /// Every id ever accepted, so ids are never reused.
    pub seen_ids: HashSet<InvocationId>,
    pub running: usize,
    pub queue: VecDeque<CallJob>,
    pub stream: Option<ActiveStream>,
}

impl SessionTable {
    fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            capabilities: Vec::new(),
            invocations: HashMap::new(),
            seen_ids: HashSet::new(),
            running: 0,
            queue: VecDeque::new(),
            stream: None,
        }
    }

    pub fn set_status(&mut self, id: &InvocationId, status: InvocationStatus) {
        if let Some(entry) = self.invocations.get_mut(id) {
            entry.record.status = status;
        }
    }
}

/// One connected client.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) config: DispatchConfig,
    pub(crate) table: Mutex<SessionTable>,
    outbound: mpsc::Sender<SessionEvent>,
    weak_self: Weak<Session>,
}

impl Session {
    /// Create a session in `Connecting` and the receiver for its events.
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: DispatchConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(config.outbound_buffer.max(1));
        let session = Arc::new_cyclic(|weak| Self {
            id: SessionId::new(),
            registry,
            config,
            table: Mutex::new(SessionTable::new()),
            outbound: tx,
            weak_self: weak.clone(),
        });
        (session, rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.table.lock().state
    }

    /// Negotiated tool names, in the order the client asked for them.
    pub fn capabilities(&self) -> Vec<String> {
        self.table.lock().capabilities.clone()
    }

    pub fn invocation(&self, id: &InvocationId) -> Option<InvocationRecord> {
        self.table
            .lock()
            .invocations
            .get(id)
            .map(|e| e.record.clone())
    }

    /// Records that are still pending or running.
    pub fn open_invocations(&self) -> Vec<InvocationRecord> {
        let table = self.table.lock();
        let mut open: Vec<InvocationRecord> = table
            .invocations
            .values()
            .filter(|e| e.record.status.is_open())
            .map(|e| e.record.clone())
            .collect();
        open.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        open
    }

    pub fn record_count(&self) -> usize {
        self.table.lock().invocations.len()
    }

    pub fn active_stream(&self) -> Option<StreamHandle> {
        self.table.lock().stream.as_ref().map(|s| s.handle.clone())
    }

    /// Calls currently holding a concurrency slot.
    pub fn running_calls(&self) -> usize {
        self.table.lock().running
    }

    pub fn queued_calls(&self) -> usize {
        self.table.lock().queue.len()
    }

    /// Transport is up; tool traffic may follow negotiation.
    pub fn begin_negotiation(&self) {
        let mut table = self.table.lock();
        if table.state == SessionState::Connecting {
            table.state = SessionState::Negotiating;
        }
    }

    /// Declare the tools this client wants. Unknown names are rejected one by
    /// one and never abort negotiation.
    ///
    /// Calling this again while `Active` replaces the capability set:
    /// invocations of withdrawn tools are cancelled and a stream of a
    /// withdrawn tool is force-closed.
    ///
    /// A session still in `Connecting` is treated as connected: the request
    /// itself proves the transport is up, so it moves through `Negotiating`
    /// like any other negotiation.
    pub async fn negotiate(&self, names: &[String]) -> Result<NegotiationResponse, BrokerError> {
        let mut events = Vec::new();
        let mut expired = Vec::new();
        let response = {
            let mut table = self.table.lock();
            if table.state.is_closed() {
                return Err(BrokerError::session(
                    ErrorKind::SessionClosed,
                    "session closed",
                ));
            }
            // Re-negotiation passes through Negotiating within this critical
            // section; no submit can observe it half-applied.
            table.state = SessionState::Negotiating;

            let mut response = NegotiationResponse::default();
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name.as_str()) {
                    continue;
                }
                if self.registry.contains(name) {
                    response.accepted.push(name.clone());
                } else {
                    response.rejected.push(Rejection {
                        name: name.clone(),
                        reason: ErrorKind::UnknownTool,
                    });
                }
            }

            let removed: HashSet<String> = table
                .capabilities
                .iter()
                .filter(|c| !response.accepted.contains(c))
                .cloned()
                .collect();
            table.capabilities = response.accepted.clone();

            if !removed.is_empty() {
                self.withdraw(&mut table, &removed, &mut events, &mut expired);
            }

            table.state = SessionState::Active;
            response
        };

        info!(
            session_id = %self.id,
            accepted = response.accepted.len(),
            rejected = response.rejected.len(),
            "capabilities negotiated"
        );
        for name in &response.rejected {
            warn!(session_id = %self.id, tool = %name.name, "unknown tool requested");
        }

        for event in events {
            self.deliver(event).await;
        }
        for id in expired {
            self.schedule_expiry(id);
        }
        Ok(response)
    }

    fn withdraw(
        &self,
        table: &mut SessionTable,
        removed: &HashSet<String>,
        events: &mut Vec<SessionEvent>,
        expired: &mut Vec<InvocationId>,
    ) {
        if table
            .stream
            .as_ref()
            .is_some_and(|s| removed.contains(&s.handle.tool_name))
        {
            if let Some(active) = table.stream.take() {
                info!(
                    session_id = %self.id,
                    invocation_id = %active.handle.invocation_id,
                    tool = %active.handle.tool_name,
                    "capability withdrawn, closing stream"
                );
                table.set_status(&active.handle.invocation_id, InvocationStatus::Cancelled);
                active.revoke(StreamCloseReason::CapabilityRevoked);
            }
        }

        let withdrawn: Vec<InvocationId> = table
            .invocations
            .values()
            .filter(|e| {
                e.record.mode == RequestedMode::Call
                    && e.record.status.is_open()
                    && removed.contains(&e.record.tool_name)
            })
            .map(|e| e.record.invocation_id.clone())
            .collect();

        for id in withdrawn {
            table.queue.retain(|job| job.invocation_id != id);
            if let Some(entry) = table.invocations.get_mut(&id) {
                entry.record.status = InvocationStatus::Cancelled;
                entry.cancel.cancel();
            }
            debug!(session_id = %self.id, invocation_id = %id, "call cancelled by re-negotiation");
            events.push(SessionEvent::Error {
                error: BrokerError::for_invocation(
                    ErrorKind::ToolNotNegotiated,
                    &id,
                    "capability withdrawn",
                ),
                invocation_id: id.clone(),
            });
            expired.push(id);
        }
    }

    /// Submit an invocation. Validation failures are returned here and
    /// leave no trace; accepted work reports its outcome as events.
    pub fn submit(&self, request: InvocationRequest) -> Result<Accepted, BrokerError> {
        let entry = self.registry.entry(&request.tool_name);
        // Schema check is pure; it runs outside the lock and is reported
        // only after the state, negotiation and id checks pass.
        let schema_check = entry
            .as_ref()
            .map(|e| e.validate(&request.arguments))
            .unwrap_or(Ok(()));

        let (accepted, launch) = {
            let mut table = self.table.lock();
            let entry = self.check_admissible(&table, &request, entry, schema_check)?;
            match request.mode {
                RequestedMode::Call => self.admit_call(&mut table, request, entry)?,
                RequestedMode::Stream => self.admit_stream(&mut table, request, entry)?,
            }
        };
        if let Some(launch) = launch {
            self.launch(launch);
        }
        Ok(accepted)
    }

    /// Spawn admitted work. Never called with the table locked.
    pub(crate) fn launch(&self, launch: Launch) {
        let Some(session) = self.arc() else {
            return;
        };
        match launch {
            Launch::Call(job) => {
                tokio::spawn(crate::dispatcher::run_call(session, job));
            }
            Launch::Stream(job) => {
                tokio::spawn(crate::stream::run_stream(session, job));
            }
        }
    }

    fn check_admissible(
        &self,
        table: &SessionTable,
        request: &InvocationRequest,
        entry: Option<Arc<ToolEntry>>,
        schema_check: Result<(), Vec<String>>,
    ) -> Result<Arc<ToolEntry>, BrokerError> {
        let id = &request.invocation_id;
        match table.state {
            SessionState::Closing | SessionState::Closed => {
                return Err(BrokerError::session_closed(id));
            }
            SessionState::Connecting | SessionState::Negotiating => {
                return Err(BrokerError::for_invocation(
                    ErrorKind::ToolNotNegotiated,
                    id,
                    "no capabilities negotiated yet",
                ));
            }
            SessionState::Active => {}
        }

        let entry = match entry {
            Some(entry) if table.capabilities.contains(&request.tool_name) => entry,
            _ => {
                return Err(BrokerError::for_invocation(
                    ErrorKind::ToolNotNegotiated,
                    id,
                    format!("tool not negotiated: {}", request.tool_name),
                ));
            }
        };

        if table.seen_ids.contains(id) {
            return Err(BrokerError::for_invocation(
                ErrorKind::DuplicateInvocation,
                id,
                format!("invocation id already used: {id}"),
            ));
        }

        let expected = match request.mode {
            RequestedMode::Call => OutputKind::SingleResult,
            RequestedMode::Stream => OutputKind::Stream,
        };
        if entry.descriptor.output_kind != expected {
            return Err(BrokerError::for_invocation(
                ErrorKind::InvalidArguments,
                id,
                format!(
                    "tool {} does not support {:?} mode",
                    request.tool_name, request.mode
                ),
            ));
        }

        if let Err(errors) = schema_check {
            return Err(BrokerError::for_invocation(
                ErrorKind::InvalidArguments,
                id,
                errors.join("; "),
            ));
        }

        Ok(entry)
    }

    /// Drop a terminal record early once the client has seen its outcome.
    pub fn acknowledge(&self, id: &InvocationId) -> bool {
        let mut table = self.table.lock();
        let terminal = table
            .invocations
            .get(id)
            .is_some_and(|e| e.record.status.is_terminal());
        if terminal {
            table.invocations.remove(id);
        }
        terminal
    }

    /// Close the session: every open call gets `Error(SessionClosed)`, the
    /// stream gets `StreamClosed(SessionClosed)`, and no records remain.
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        let (events, stream_finished) = {
            let mut table = self.table.lock();
            if table.state.is_closed() {
                return;
            }
            table.state = SessionState::Closing;
            table.queue.clear();
            let stream_finished = table
                .stream
                .take()
                .map(|active| active.revoke(StreamCloseReason::SessionClosed));
            let mut events = Vec::new();
            for (id, entry) in table.invocations.drain() {
                entry.cancel.cancel();
                if entry.record.mode == RequestedMode::Call && entry.record.status.is_open() {
                    events.push(SessionEvent::Error {
                        error: BrokerError::session_closed(&id),
                        invocation_id: id,
                    });
                }
            }
            (events, stream_finished)
        };

        info!(session_id = %self.id, cancelled = events.len(), "session closing");
        for event in events {
            self.deliver(event).await;
        }
        if let Some(finished) = stream_finished {
            if tokio::time::timeout(STREAM_CLOSE_WAIT, finished.cancelled())
                .await
                .is_err()
            {
                warn!(session_id = %self.id, "stream task did not finish closing");
            }
        }
        self.table.lock().state = SessionState::Closed;
    }

    pub(crate) async fn deliver(&self, event: SessionEvent) {
        let id = event.invocation_id().clone();
        let kind = event.event_type();
        if self.outbound.send(event).await.is_err() {
            debug!(session_id = %self.id, invocation_id = %id, kind, "event dropped, receiver gone");
        }
    }

    /// Remove a terminal record after the grace period if still present.
    pub(crate) fn schedule_expiry(&self, id: InvocationId) {
        let weak = self.weak_self.clone();
        let grace = self.config.record_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = weak.upgrade() {
                let mut table = session.table.lock();
                if table
                    .invocations
                    .get(&id)
                    .is_some_and(|e| e.record.status.is_terminal())
                {
                    table.invocations.remove(&id);
                }
            }
        });
    }

    pub(crate) fn arc(&self) -> Option<Arc<Session>> {
        self.weak_self.upgrade()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
