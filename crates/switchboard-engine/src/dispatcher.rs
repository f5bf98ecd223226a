//! Call path: admission against the per-session cap, the FIFO wait queue,
//! adapter execution under a deadline, and result correlation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use switchboard_core::errors::{BrokerError, ErrorKind};
use switchboard_core::ids::InvocationId;
use switchboard_core::invocation::{InvocationRecord, InvocationStatus, RequestedMode};
use switchboard_core::protocol::{Accepted, InvocationRequest, SessionEvent};
use switchboard_core::tools::{Adapter, InvocationContext};

use crate::registry::ToolEntry;
use crate::session::{CallJob, InvocationEntry, Launch, Session, SessionState, SessionTable};
use crate::truncate::json_for_log;

const LOG_VALUE_LIMIT: usize = 200;

impl Session {
    /// Admit a validated call: run it now if a slot is free, queue it if the
    /// queue has room, otherwise reject with `Overloaded`.
    pub(crate) fn admit_call(
        &self,
        table: &mut SessionTable,
        request: InvocationRequest,
        entry: Arc<ToolEntry>,
    ) -> Result<(Accepted, Option<Launch>), BrokerError> {
        let id = request.invocation_id;
        let Adapter::Call(adapter) = &entry.adapter else {
            return Err(BrokerError::for_invocation(
                ErrorKind::InvalidArguments,
                &id,
                format!("tool {} only supports stream mode", request.tool_name),
            ));
        };

        let cancel = CancellationToken::new();
        let job = CallJob {
            invocation_id: id.clone(),
            tool_name: request.tool_name.clone(),
            adapter: Arc::clone(adapter),
            arguments: request.arguments,
            deadline: request.deadline.unwrap_or(self.config.call_timeout),
            cancel: cancel.clone(),
        };
        let mut record = InvocationRecord::new(id.clone(), request.tool_name, RequestedMode::Call);

        let launch = if table.running < self.config.max_concurrent_calls {
            table.running += 1;
            record.status = InvocationStatus::Running;
            Some(Launch::Call(job))
        } else if table.queue.len() >= self.config.queue_bound {
            warn!(
                session_id = %self.id,
                invocation_id = %id,
                queued = table.queue.len(),
                "call rejected, queue full"
            );
            return Err(BrokerError::for_invocation(
                ErrorKind::Overloaded,
                &id,
                format!(
                    "{} calls running and {} queued",
                    table.running,
                    table.queue.len()
                ),
            ));
        } else {
            table.queue.push_back(job);
            None
        };

        debug!(
            session_id = %self.id,
            invocation_id = %id,
            tool = %record.tool_name,
            status = ?record.status,
            "call accepted"
        );
        let accepted = Accepted {
            invocation_id: id.clone(),
            status: record.status,
        };
        table.seen_ids.insert(id.clone());
        table.invocations.insert(id, InvocationEntry { record, cancel });
        Ok((accepted, launch))
    }

    /// Settle a finished call and hand its slot to the next queued call.
    ///
    /// The outcome is only delivered if the record is still running; a
    /// cancelled or removed record means the result is stale.
    fn finish_call(
        &self,
        id: &InvocationId,
        outcome: Option<Result<serde_json::Value, BrokerError>>,
    ) -> (Option<SessionEvent>, Option<Launch>) {
        let mut table = self.table.lock();
        table.running = table.running.saturating_sub(1);

        let still_running = table
            .invocations
            .get(id)
            .is_some_and(|e| e.record.status == InvocationStatus::Running);
        let event = match outcome {
            Some(result) if still_running => Some(match result {
                Ok(value) => {
                    table.set_status(id, InvocationStatus::Completed);
                    SessionEvent::Result {
                        invocation_id: id.clone(),
                        value,
                    }
                }
                Err(error) => {
                    table.set_status(id, InvocationStatus::Failed);
                    SessionEvent::Error {
                        invocation_id: id.clone(),
                        error,
                    }
                }
            }),
            _ => {
                debug!(session_id = %self.id, invocation_id = %id, "discarding stale call outcome");
                None
            }
        };

        let next = if table.state == SessionState::Active {
            start_next(&mut table)
        } else {
            None
        };
        (event, next)
    }
}

fn start_next(table: &mut SessionTable) -> Option<Launch> {
    let job = table.queue.pop_front()?;
    table.running += 1;
    table.set_status(&job.invocation_id, InvocationStatus::Running);
    Some(Launch::Call(job))
}

/// Run one call to completion, timeout or cancellation.
pub(crate) async fn run_call(session: Arc<Session>, job: CallJob) {
    let CallJob {
        invocation_id: id,
        tool_name,
        adapter,
        arguments,
        deadline,
        cancel,
    } = job;
    let ctx = InvocationContext {
        session_id: session.id().clone(),
        invocation_id: id.clone(),
        cancel: cancel.clone(),
    };
    debug!(
        session_id = %ctx.session_id,
        invocation_id = %id,
        tool = %tool_name,
        args = %json_for_log(&arguments, LOG_VALUE_LIMIT),
        "call started"
    );

    let start = Instant::now();
    let invoke = AssertUnwindSafe(adapter.invoke(arguments, &ctx)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(deadline, invoke) => Some(match result {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => {
                warn!(
                    session_id = %ctx.session_id,
                    invocation_id = %id,
                    tool = %tool_name,
                    error_kind = err.error_kind(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "adapter failed"
                );
                Err(BrokerError::adapter(&id, &err))
            }
            Ok(Err(_panic)) => {
                warn!(session_id = %ctx.session_id, invocation_id = %id, tool = %tool_name, "adapter panicked");
                Err(BrokerError::for_invocation(
                    ErrorKind::AdapterFailure,
                    &id,
                    format!("adapter {tool_name} panicked"),
                ))
            }
            Err(_elapsed) => {
                warn!(
                    session_id = %ctx.session_id,
                    invocation_id = %id,
                    tool = %tool_name,
                    deadline_ms = deadline.as_millis() as u64,
                    "call timed out"
                );
                Err(BrokerError::timeout(&id, deadline))
            }
        }),
    };

    let (event, next) = session.finish_call(&id, outcome);
    if let Some(next) = next {
        session.launch(next);
    }
    if let Some(event) = event {
        debug!(
            session_id = %ctx.session_id,
            invocation_id = %id,
            tool = %tool_name,
            outcome = event.event_type(),
            duration_ms = start.elapsed().as_millis() as u64,
            "call finished"
        );
        session.deliver(event).await;
        session.schedule_expiry(id);
    }
}
