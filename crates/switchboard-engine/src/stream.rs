//! Streaming path: one stream slot per session, a task per stream pumping
//! frames with sequence checks, and idempotent close.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::errors::{AdapterError, BrokerError, ErrorKind};
use switchboard_core::ids::{InvocationId, StreamId};
use switchboard_core::invocation::{InvocationRecord, InvocationStatus, RequestedMode};
use switchboard_core::protocol::{Accepted, InvocationRequest, SessionEvent};
use switchboard_core::stream::{FrameSource, SequenceTracker, StreamCloseReason, StreamHandle};
use switchboard_core::tools::{Adapter, InvocationContext, StreamAdapter};

use crate::registry::ToolEntry;
use crate::session::{ActiveStream, InvocationEntry, Launch, Session, SessionTable};

/// A stream whose slot is reserved and whose task has not started yet.
pub(crate) struct StreamJob {
    handle: StreamHandle,
    adapter: Arc<dyn StreamAdapter>,
    arguments: serde_json::Value,
    open_deadline: Duration,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<StreamCloseReason>>>,
    finished: CancellationToken,
}

#[derive(Debug)]
enum PumpExit {
    Cancelled,
    Ended,
    Violation { expected: u64, got: u64 },
    Failed(AdapterError),
    Panicked,
    OpenTimeout,
}

impl Session {
    /// Reserve the session's stream slot for a validated stream request.
    pub(crate) fn admit_stream(
        &self,
        table: &mut SessionTable,
        request: InvocationRequest,
        entry: Arc<ToolEntry>,
    ) -> Result<(Accepted, Option<Launch>), BrokerError> {
        let id = request.invocation_id;
        let Adapter::Stream(adapter) = &entry.adapter else {
            return Err(BrokerError::for_invocation(
                ErrorKind::InvalidArguments,
                &id,
                format!("tool {} only supports call mode", request.tool_name),
            ));
        };
        if let Some(active) = &table.stream {
            return Err(BrokerError::for_invocation(
                ErrorKind::StreamAlreadyActive,
                &id,
                format!(
                    "stream {} ({}) is already active",
                    active.handle.invocation_id, active.handle.tool_name
                ),
            ));
        }

        let handle = StreamHandle {
            stream_id: StreamId::new(),
            invocation_id: id.clone(),
            tool_name: request.tool_name.clone(),
            opened_at: Utc::now(),
        };
        let cancel = CancellationToken::new();
        let close_reason = Arc::new(Mutex::new(None));
        let finished = CancellationToken::new();
        table.stream = Some(ActiveStream {
            handle: handle.clone(),
            cancel: cancel.clone(),
            close_reason: Arc::clone(&close_reason),
            finished: finished.clone(),
        });

        let mut record = InvocationRecord::new(id.clone(), request.tool_name, RequestedMode::Stream);
        record.status = InvocationStatus::Running;
        table.seen_ids.insert(id.clone());
        table.invocations.insert(
            id.clone(),
            InvocationEntry {
                record,
                cancel: cancel.clone(),
            },
        );
        info!(
            session_id = %self.id,
            invocation_id = %id,
            stream_id = %handle.stream_id,
            tool = %handle.tool_name,
            "stream opened"
        );

        let job = StreamJob {
            handle,
            adapter: Arc::clone(adapter),
            arguments: request.arguments,
            open_deadline: request.deadline.unwrap_or(self.config.call_timeout),
            cancel,
            close_reason,
            finished,
        };
        Ok((
            Accepted {
                invocation_id: id,
                status: InvocationStatus::Running,
            },
            Some(Launch::Stream(job)),
        ))
    }

    /// Client-requested close. Returns `false` when that stream is not the
    /// active one (already closed, never opened); nothing changes then.
    pub fn close_stream(&self, id: &InvocationId) -> bool {
        let mut table = self.table.lock();
        let is_active = table
            .stream
            .as_ref()
            .is_some_and(|s| &s.handle.invocation_id == id);
        if !is_active {
            return false;
        }
        let Some(active) = table.stream.take() else {
            return false;
        };
        table.set_status(id, InvocationStatus::Completed);
        active.revoke(StreamCloseReason::ClientRequested);
        debug!(session_id = %self.id, invocation_id = %id, "stream close requested");
        true
    }
}

/// Open the adapter and pump frames until the stream ends or is revoked.
///
/// This task is the only writer of events for its stream, so frames always
/// precede the terminal `StreamClosed`.
pub(crate) async fn run_stream(session: Arc<Session>, job: StreamJob) {
    let StreamJob {
        handle,
        adapter,
        arguments,
        open_deadline,
        cancel,
        close_reason,
        finished,
    } = job;
    // Fires after the final event below, or if this task unwinds.
    let _finished = finished.drop_guard();
    let id = handle.invocation_id.clone();
    let ctx = InvocationContext {
        session_id: session.id().clone(),
        invocation_id: id.clone(),
        cancel: cancel.clone(),
    };

    let mut source: Option<Box<dyn FrameSource>> = None;
    let open = AssertUnwindSafe(adapter.open(arguments, &ctx)).catch_unwind();
    let exit = tokio::select! {
        biased;
        _ = cancel.cancelled() => PumpExit::Cancelled,
        opened = tokio::time::timeout(open_deadline, open) => match opened {
            Ok(Ok(Ok(src))) => {
                let src = source.insert(src);
                pump_frames(&session, &id, src, &cancel).await
            }
            Ok(Ok(Err(err))) => PumpExit::Failed(err),
            Ok(Err(_panic)) => panicked(&session, &handle, "open"),
            Err(_elapsed) => PumpExit::OpenTimeout,
        },
    };

    let (reason, error) = {
        let mut table = session.table.lock();
        let ours = table
            .stream
            .as_ref()
            .is_some_and(|s| s.handle.stream_id == handle.stream_id);
        if ours {
            table.stream = None;
            let (status, reason, error) = settle(&id, exit, open_deadline);
            table.set_status(&id, status);
            (reason, error)
        } else {
            let reason = close_reason
                .lock()
                .unwrap_or(StreamCloseReason::SessionClosed);
            (reason, None)
        }
    };

    if let Some(mut src) = source {
        if AssertUnwindSafe(src.close()).catch_unwind().await.is_err() {
            warn!(invocation_id = %id, tool = %handle.tool_name, "frame source panicked on close");
        }
    }
    if let Some(error) = error {
        warn!(
            session_id = %ctx.session_id,
            invocation_id = %id,
            tool = %handle.tool_name,
            kind = %error.kind,
            error = %error.message,
            "stream failed"
        );
        session
            .deliver(SessionEvent::Error {
                invocation_id: id.clone(),
                error,
            })
            .await;
    }
    info!(
        session_id = %ctx.session_id,
        invocation_id = %id,
        stream_id = %handle.stream_id,
        reason = ?reason,
        "stream closed"
    );
    session
        .deliver(SessionEvent::StreamClosed {
            invocation_id: id.clone(),
            reason,
        })
        .await;
    session.schedule_expiry(id);
}

fn panicked(session: &Session, handle: &StreamHandle, stage: &str) -> PumpExit {
    warn!(
        session_id = %session.id(),
        invocation_id = %handle.invocation_id,
        tool = %handle.tool_name,
        stage,
        "stream adapter panicked"
    );
    PumpExit::Panicked
}

async fn pump_frames(
    session: &Session,
    id: &InvocationId,
    source: &mut Box<dyn FrameSource>,
    cancel: &CancellationToken,
) -> PumpExit {
    let mut tracker = SequenceTracker::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            next = AssertUnwindSafe(source.next_frame()).catch_unwind() => next,
        };
        let Ok(next) = next else {
            warn!(session_id = %session.id(), invocation_id = %id, "frame source panicked");
            return PumpExit::Panicked;
        };
        match next {
            Ok(Some(frame)) => {
                if let Err(expected) = tracker.observe(frame.sequence) {
                    return PumpExit::Violation {
                        expected,
                        got: frame.sequence,
                    };
                }
                if cancel.is_cancelled() {
                    return PumpExit::Cancelled;
                }
                session
                    .deliver(SessionEvent::Frame {
                        invocation_id: id.clone(),
                        frame,
                    })
                    .await;
            }
            Ok(None) => {
                debug!(invocation_id = %id, frames = tracker.delivered(), "end of stream");
                return PumpExit::Ended;
            }
            Err(err) => return PumpExit::Failed(err),
        }
    }
}

/// Record status, close reason and optional error for a stream that ended on
/// its own.
fn settle(
    id: &InvocationId,
    exit: PumpExit,
    open_deadline: Duration,
) -> (InvocationStatus, StreamCloseReason, Option<BrokerError>) {
    match exit {
        PumpExit::Ended => (InvocationStatus::Completed, StreamCloseReason::EndOfStream, None),
        PumpExit::Violation { expected, got } => (
            InvocationStatus::Failed,
            StreamCloseReason::ProtocolViolation,
            Some(BrokerError::for_invocation(
                ErrorKind::StreamProtocolViolation,
                id,
                format!("expected frame {expected}, got {got}"),
            )),
        ),
        PumpExit::Failed(err) => (
            InvocationStatus::Failed,
            StreamCloseReason::AdapterFailure,
            Some(BrokerError::adapter(id, &err)),
        ),
        PumpExit::Panicked => (
            InvocationStatus::Failed,
            StreamCloseReason::AdapterFailure,
            Some(BrokerError::adapter(
                id,
                &AdapterError::Device("adapter panicked".to_string()),
            )),
        ),
        PumpExit::OpenTimeout => (
            InvocationStatus::Failed,
            StreamCloseReason::AdapterFailure,
            Some(BrokerError::timeout(id, open_deadline)),
        ),
        PumpExit::Cancelled => (
            InvocationStatus::Cancelled,
            StreamCloseReason::SessionClosed,
            None,
        ),
    }
}
