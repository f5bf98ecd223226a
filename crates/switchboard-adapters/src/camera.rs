//! Camera capture: a device abstraction, a synthetic test-pattern device,
//! and the `camera_stream` / `capture_image` tools built on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use switchboard_core::errors::AdapterError;
use switchboard_core::stream::{Frame, FrameSource};
use switchboard_core::tools::{
    CallAdapter, InvocationContext, OutputKind, StreamAdapter, ToolDescriptor,
};
use switchboard_settings::{CameraSettings, MAX_CAMERA_DIMENSION};

const MAX_FPS: u64 = 60;

/// One captured image.
#[derive(Clone, Debug)]
pub struct CapturedImage {
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

/// A capture device that can be held by one user at a time.
pub trait CaptureDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Take exclusive ownership of the device. Fails with
    /// [`AdapterError::DeviceBusy`] while another session holds it.
    fn acquire(&self) -> Result<Box<dyn CaptureSession>, AdapterError>;
}

/// Exclusive handle on a device. Dropping it releases the device.
pub trait CaptureSession: Send {
    fn grab(&mut self) -> Result<CapturedImage, AdapterError>;
}

/// Device producing a moving colour-bar pattern as binary PPM images.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    in_use: Arc<AtomicBool>,
    grabbed: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.clamp(1, MAX_CAMERA_DIMENSION),
            height: height.clamp(1, MAX_CAMERA_DIMENSION),
            in_use: Arc::new(AtomicBool::new(false)),
            grabbed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_settings(settings: &CameraSettings) -> Self {
        Self::new(settings.width, settings.height)
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Total images captured across all holders.
    pub fn frames_grabbed(&self) -> u64 {
        self.grabbed.load(Ordering::Relaxed)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn acquire(&self) -> Result<Box<dyn CaptureSession>, AdapterError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AdapterError::DeviceBusy("camera is in use".into()));
        }
        Ok(Box::new(SyntheticSession {
            width: self.width,
            height: self.height,
            tick: 0,
            in_use: Arc::clone(&self.in_use),
            grabbed: Arc::clone(&self.grabbed),
        }))
    }
}

struct SyntheticSession {
    width: u32,
    height: u32,
    tick: u32,
    in_use: Arc<AtomicBool>,
    grabbed: Arc<AtomicU64>,
}

impl CaptureSession for SyntheticSession {
    fn grab(&mut self) -> Result<CapturedImage, AdapterError> {
        let data = test_pattern(self.width, self.height, self.tick);
        self.tick = self.tick.wrapping_add(1);
        self.grabbed.fetch_add(1, Ordering::Relaxed);
        Ok(CapturedImage {
            content_type: "image/x-portable-pixmap",
            width: self.width,
            height: self.height,
            data,
        })
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}

/// Binary PPM (P6) with eight vertical bars shifted one column per tick.
fn test_pattern(width: u32, height: u32, tick: u32) -> Bytes {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [0, 0, 0],
    ];
    let header = format!("P6\n{width} {height}\n255\n");
    let mut buf = Vec::with_capacity(header.len() + width as usize * height as usize * 3);
    buf.extend_from_slice(header.as_bytes());
    let bar_width = (width / BARS.len() as u32).max(1);
    for _ in 0..height {
        for x in 0..width {
            let bar = ((x.wrapping_add(tick) / bar_width) as usize) % BARS.len();
            buf.extend_from_slice(&BARS[bar]);
        }
    }
    Bytes::from(buf)
}

fn requested_fps(args: &serde_json::Value, default: u32) -> u64 {
    args["fps"]
        .as_u64()
        .unwrap_or(u64::from(default))
        .clamp(1, MAX_FPS)
}

/// `camera_stream`: frames from the capture device at a fixed rate until the
/// client closes the stream or `max_frames` is reached.
pub struct CameraStreamTool {
    device: Arc<dyn CaptureDevice>,
    default_fps: u32,
}

impl CameraStreamTool {
    pub fn new(device: Arc<dyn CaptureDevice>, default_fps: u32) -> Self {
        Self {
            device,
            default_fps,
        }
    }
}

#[async_trait]
impl StreamAdapter for CameraStreamTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "camera_stream",
            "Stream frames from the camera until closed.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "fps": {"type": "integer", "minimum": 1, "maximum": MAX_FPS},
                    "max_frames": {"type": "integer", "minimum": 1}
                },
                "additionalProperties": false
            }),
            OutputKind::Stream,
        )
    }

    async fn open(
        &self,
        args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<Box<dyn FrameSource>, AdapterError> {
        let fps = requested_fps(&args, self.default_fps);
        let max_frames = args["max_frames"].as_u64();
        let session = self.device.acquire()?;
        info!(
            invocation_id = %ctx.invocation_id,
            device = self.device.name(),
            fps,
            ?max_frames,
            "camera opened"
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(1000 / fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(CameraFrames {
            session: Some(session),
            ticker,
            next_seq: 1,
            max_frames,
        }))
    }
}

struct CameraFrames {
    session: Option<Box<dyn CaptureSession>>,
    ticker: Interval,
    next_seq: u64,
    max_frames: Option<u64>,
}

#[async_trait]
impl FrameSource for CameraFrames {
    async fn next_frame(&mut self) -> Result<Option<Frame>, AdapterError> {
        if self.max_frames.is_some_and(|max| self.next_seq > max) {
            return Ok(None);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        self.ticker.tick().await;
        let image = session.grab()?;
        let frame = Frame::new(self.next_seq, image.content_type, image.data);
        self.next_seq += 1;
        Ok(Some(frame))
    }

    async fn close(&mut self) {
        if self.session.take().is_some() {
            debug!(frames = self.next_seq - 1, "camera released");
        }
    }
}

/// `capture_image`: a single snapshot, returned base64-encoded.
pub struct CaptureImageTool {
    device: Arc<dyn CaptureDevice>,
}

impl CaptureImageTool {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl CallAdapter for CaptureImageTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "capture_image",
            "Capture a single image from the camera.",
            serde_json::json!({"type": "object", "additionalProperties": false}),
            OutputKind::SingleResult,
        )
    }

    async fn invoke(
        &self,
        _args: serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<serde_json::Value, AdapterError> {
        let image = {
            let mut session = self.device.acquire()?;
            session.grab()?
        };
        debug!(invocation_id = %ctx.invocation_id, bytes = image.data.len(), "image captured");
        Ok(serde_json::json!({
            "contentType": image.content_type,
            "width": image.width,
            "height": image.height,
            "data": base64::engine::general_purpose::STANDARD.encode(&image.data),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::errors::ErrorKind;
    use switchboard_core::ids::{InvocationId, SessionId};
    use switchboard_core::protocol::{InvocationRequest, SessionEvent};
    use switchboard_core::stream::StreamCloseReason;
    use switchboard_core::tools::Adapter;
    use switchboard_engine::{DispatchConfig, Session, ToolRegistry};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> InvocationContext {
        InvocationContext {
            session_id: SessionId::new(),
            invocation_id: InvocationId::from("cam"),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn pattern_is_valid_ppm() {
        let data = test_pattern(16, 4, 0);
        let header = b"P6\n16 4\n255\n";
        assert!(data.starts_with(header));
        assert_eq!(data.len(), header.len() + 16 * 4 * 3);
        // First bar is white.
        assert_eq!(&data[header.len()..header.len() + 3], &[255, 255, 255]);
    }

    #[test]
    fn oversized_device_is_clamped() {
        let camera = SyntheticCamera::new(u32::MAX, 0);
        let image = camera.acquire().unwrap().grab().unwrap();
        assert_eq!(image.width, MAX_CAMERA_DIMENSION);
        assert_eq!(image.height, 1);
        let header = format!("P6\n{MAX_CAMERA_DIMENSION} 1\n255\n");
        assert_eq!(image.data.len(), header.len() + MAX_CAMERA_DIMENSION as usize * 3);
    }

    #[test]
    fn pattern_moves_between_ticks() {
        assert_ne!(test_pattern(16, 2, 0), test_pattern(16, 2, 2));
    }

    #[test]
    fn device_is_exclusive() {
        let camera = SyntheticCamera::new(8, 8);
        let held = camera.acquire().unwrap();
        assert!(camera.in_use());
        let err = camera.acquire().err().unwrap();
        assert!(matches!(err, AdapterError::DeviceBusy(_)));
        assert!(err.is_retryable());
        drop(held);
        assert!(!camera.in_use());
        assert!(camera.acquire().is_ok());
    }

    #[test]
    fn fps_is_clamped() {
        assert_eq!(requested_fps(&serde_json::json!({}), 10), 10);
        assert_eq!(requested_fps(&serde_json::json!({"fps": 500}), 10), MAX_FPS);
        assert_eq!(requested_fps(&serde_json::json!({"fps": 0}), 10), 1);
    }

    #[tokio::test]
    async fn stream_yields_contiguous_frames_then_ends() {
        let camera = Arc::new(SyntheticCamera::new(8, 8));
        let tool = CameraStreamTool::new(camera.clone(), 10);
        let mut source = tool
            .open(serde_json::json!({"fps": 60, "max_frames": 3}), &ctx())
            .await
            .unwrap();

        let mut seqs = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            assert_eq!(frame.content_type, "image/x-portable-pixmap");
            seqs.push(frame.sequence);
        }
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(camera.in_use());
        source.close().await;
        assert!(!camera.in_use());
    }

    #[tokio::test]
    async fn snapshot_fails_while_streaming() {
        let camera = Arc::new(SyntheticCamera::new(8, 8));
        let stream = CameraStreamTool::new(camera.clone(), 10);
        let snapshot = CaptureImageTool::new(camera.clone());

        let mut source = stream.open(serde_json::json!({}), &ctx()).await.unwrap();
        let err = snapshot.invoke(serde_json::json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, AdapterError::DeviceBusy(_)));

        source.close().await;
        let out = snapshot.invoke(serde_json::json!({}), &ctx()).await.unwrap();
        assert_eq!(out["width"], 8);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(out["data"].as_str().unwrap())
            .unwrap();
        assert!(decoded.starts_with(b"P6\n8 8\n255\n"));
        assert!(!camera.in_use());
    }

    #[tokio::test]
    async fn second_open_is_busy() {
        let camera = Arc::new(SyntheticCamera::new(8, 8));
        let tool = CameraStreamTool::new(camera.clone(), 10);
        let _first = tool.open(serde_json::json!({}), &ctx()).await.unwrap();
        let err = tool.open(serde_json::json!({}), &ctx()).await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn streams_through_a_session() {
        let camera = Arc::new(SyntheticCamera::new(8, 8));
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Adapter::Stream(Arc::new(CameraStreamTool::new(
                camera.clone(),
                10,
            ))))
            .unwrap();
        let (session, mut rx) = Session::new(registry, DispatchConfig::default());
        session.begin_negotiation();
        session.negotiate(&["camera_stream".to_string()]).await.unwrap();

        session
            .submit(InvocationRequest::stream(
                "s1",
                "camera_stream",
                serde_json::json!({"fps": 60, "max_frames": 4}),
            ))
            .unwrap();

        let mut seqs = Vec::new();
        let reason = loop {
            match rx.recv().await.unwrap() {
                SessionEvent::Frame { frame, .. } => seqs.push(frame.sequence),
                SessionEvent::StreamClosed { reason, .. } => break reason,
                other => panic!("unexpected event {other:?}"),
            }
        };
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(reason, StreamCloseReason::EndOfStream);
        assert!(session.active_stream().is_none());
        assert_eq!(camera.frames_grabbed(), 4);
        assert!(!camera.in_use());
    }

    #[tokio::test]
    async fn busy_device_surfaces_as_retryable_stream_error() {
        let camera = Arc::new(SyntheticCamera::new(8, 8));
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Adapter::Stream(Arc::new(CameraStreamTool::new(
                camera.clone(),
                10,
            ))))
            .unwrap();
        let _held = camera.acquire().unwrap();

        let (session, mut rx) = Session::new(registry, DispatchConfig::default());
        session.begin_negotiation();
        session.negotiate(&["camera_stream".to_string()]).await.unwrap();
        session
            .submit(InvocationRequest::stream("s1", "camera_stream", serde_json::json!({})))
            .unwrap();

        match rx.recv().await.unwrap() {
            SessionEvent::Error { error, .. } => {
                assert_eq!(error.kind, ErrorKind::AdapterFailure);
                assert!(error.retryable);
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::StreamClosed {
                reason: StreamCloseReason::AdapterFailure,
                ..
            }
        ));
    }
}
