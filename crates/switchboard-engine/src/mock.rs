//! Controllable adapters for deterministic tests without real devices or
//! network calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use switchboard_core::errors::AdapterError;
use switchboard_core::stream::{Frame, FrameSource};
use switchboard_core::tools::{
    CallAdapter, InvocationContext, OutputKind, StreamAdapter, ToolDescriptor,
};

fn object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

/// Call tool that echoes its arguments back, optionally after a delay.
pub struct EchoTool {
    name: String,
    schema: serde_json::Value,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: object_schema(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CallAdapter for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.name.clone(),
            format!("Echo tool {}", self.name),
            self.schema.clone(),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        args: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(serde_json::json!({ "echo": args }))
    }
}

/// Call tool that always fails with the configured error.
pub struct FailingTool {
    name: String,
    error: AdapterError,
}

impl FailingTool {
    pub fn new(name: &str, error: AdapterError) -> Self {
        Self {
            name: name.to_string(),
            error,
        }
    }
}

#[async_trait]
impl CallAdapter for FailingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.name.clone(),
            "Always fails",
            object_schema(),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        _args: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        Err(self.error.clone())
    }
}

/// Call tool whose invocations block until the test releases them by id.
///
/// Every invocation reports its id on the `started` channel as soon as the
/// adapter is entered, so tests can observe exactly which calls are running.
pub struct GatedTool {
    name: String,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    started: mpsc::UnboundedSender<String>,
}

impl GatedTool {
    pub fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (started, rx) = mpsc::unbounded_channel();
        let tool = Arc::new(Self {
            name: name.to_string(),
            gates: Mutex::new(HashMap::new()),
            started,
        });
        (tool, rx)
    }

    fn gate(&self, id: &str) -> Arc<Notify> {
        Arc::clone(
            self.gates
                .lock()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Let the invocation with this id complete. Safe to call before it starts.
    pub fn release(&self, id: &str) {
        self.gate(id).notify_one();
    }
}

#[async_trait]
impl CallAdapter for GatedTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.name.clone(),
            "Blocks until released",
            object_schema(),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        _args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let id = ctx.invocation_id.to_string();
        let gate = self.gate(&id);
        let _ = self.started.send(id.clone());
        gate.notified().await;
        Ok(serde_json::json!({ "released": id }))
    }
}

/// One step of a scripted frame source.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Emit a frame with this sequence number.
    Frame(u64),
    /// Fail mid-stream.
    Fail(AdapterError),
    /// Report end of stream.
    End,
    /// Never produce anything again until closed.
    Hold,
    /// Panic inside the frame source.
    Panic,
}

/// Stream tool replaying a fixed script on every open.
pub struct ScriptedStream {
    name: String,
    script: Vec<ScriptStep>,
    open_error: Option<AdapterError>,
    open_panics: bool,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedStream {
    pub fn new(name: &str, script: Vec<ScriptStep>) -> Self {
        Self {
            name: name.to_string(),
            script,
            open_error: None,
            open_panics: false,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A stream that never ends on its own.
    pub fn endless(name: &str) -> Self {
        Self::new(name, vec![ScriptStep::Frame(1), ScriptStep::Hold])
    }

    pub fn failing_open(name: &str, error: AdapterError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(name, Vec::new())
        }
    }

    /// A stream whose `open` panics.
    pub fn panicking_open(name: &str) -> Self {
        Self {
            open_panics: true,
            ..Self::new(name, Vec::new())
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many frame sources were closed (device released).
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamAdapter for ScriptedStream {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            self.name.clone(),
            "Scripted frame source",
            object_schema(),
            OutputKind::Stream,
        )
    }

    async fn open(
        &self,
        _args: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<Box<dyn FrameSource>, AdapterError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        if self.open_panics {
            panic!("{} failed to open", self.name);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            steps: self.script.iter().cloned().collect(),
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, AdapterError> {
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(seq)) => Ok(Some(Frame::new(
                seq,
                "application/octet-stream",
                seq.to_be_bytes().to_vec(),
            ))),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::End) | None => Ok(None),
            Some(ScriptStep::Hold) => std::future::pending().await,
            Some(ScriptStep::Panic) => panic!("frame source fault"),
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
