//! Mock capture device and tracks.

use async_trait::async_trait;
use common::types::MediaKind;
use meet_client::errors::CaptureDeviceError;
use meet_client::media::{CaptureConstraints, CaptureDevice, MediaStream, MediaTrack};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A track whose state lives in memory.
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
}

impl MockTrack {
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{}-track-{}", kind.as_str(), uuid::Uuid::new_v4()),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        })
    }

    /// How many times `stop` was called.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Builds a stream with one fresh track of `kind`.
pub fn mock_stream(kind: MediaKind) -> (MediaStream, Arc<MockTrack>) {
    let track = MockTrack::new(kind);
    let stream = MediaStream::new(
        format!("stream-{}", uuid::Uuid::new_v4()),
        vec![Arc::clone(&track) as Arc<dyn MediaTrack>],
    );
    (stream, track)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureBehavior {
    Grant,
    Deny,
    Unavailable,
}

/// Capture device that grants, denies, or has no hardware.
#[derive(Debug)]
pub struct MockCaptureDevice {
    behavior: Mutex<CaptureBehavior>,
    acquired: Mutex<Vec<Arc<MockTrack>>>,
    constraints: Mutex<Vec<CaptureConstraints>>,
}

impl MockCaptureDevice {
    pub fn granting() -> Arc<Self> {
        Self::with_behavior(CaptureBehavior::Grant)
    }

    pub fn denying() -> Arc<Self> {
        Self::with_behavior(CaptureBehavior::Deny)
    }

    pub fn unavailable() -> Arc<Self> {
        Self::with_behavior(CaptureBehavior::Unavailable)
    }

    fn with_behavior(behavior: CaptureBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            acquired: Mutex::new(Vec::new()),
            constraints: Mutex::new(Vec::new()),
        })
    }

    /// Subsequent acquisitions are granted.
    pub fn grant(&self) {
        *self.behavior.lock().unwrap() = CaptureBehavior::Grant;
    }

    /// Subsequent acquisitions are denied.
    pub fn deny(&self) {
        *self.behavior.lock().unwrap() = CaptureBehavior::Deny;
    }

    /// Every track handed out so far, oldest first.
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn tracks_of(&self, kind: MediaKind) -> Vec<Arc<MockTrack>> {
        self.tracks()
            .into_iter()
            .filter(|t| t.kind() == kind)
            .collect()
    }

    /// Constraints of every acquisition attempt.
    pub fn requested(&self) -> Vec<CaptureConstraints> {
        self.constraints.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, CaptureDeviceError> {
        self.constraints.lock().unwrap().push(constraints.clone());
        let kind = constraints.kind();

        match *self.behavior.lock().unwrap() {
            CaptureBehavior::Deny => {
                return Err(CaptureDeviceError::PermissionDenied {
                    kind,
                    reason: "NotAllowedError".to_string(),
                })
            }
            CaptureBehavior::Unavailable => {
                return Err(CaptureDeviceError::Unavailable {
                    kind,
                    reason: "NotFoundError".to_string(),
                })
            }
            CaptureBehavior::Grant => {}
        }

        let (stream, track) = mock_stream(kind);
        self.acquired.lock().unwrap().push(track);
        Ok(stream)
    }
}
