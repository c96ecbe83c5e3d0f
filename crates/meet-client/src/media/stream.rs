//! Local and remote media streams and the capture device seam.

use crate::errors::CaptureDeviceError;

use async_trait::async_trait;
use common::types::MediaKind;
use std::fmt;
use std::sync::Arc;

/// Ideal capture width for video.
pub const VIDEO_IDEAL_WIDTH: u32 = 1280;

/// Ideal capture height for video.
pub const VIDEO_IDEAL_HEIGHT: u32 = 720;

/// One track of a media stream, owned by the platform.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// True once the track has ended.
    fn is_stopped(&self) -> bool;
    fn stop(&self);
}

/// A set of tracks delivered together.
///
/// Cloning shares the tracks: enabling or stopping a track through any
/// clone affects every holder, which is how one local stream is offered to
/// all peer connections.
#[derive(Clone, Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    #[must_use]
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Sets every track of `kind`; returns how many tracks were touched.
    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) -> usize {
        let mut touched = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }

    /// Whether the first track of `kind` is enabled. False when there is none.
    #[must_use]
    pub fn first_enabled(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind)
            .next()
            .is_some_and(|track| track.is_enabled())
    }

    /// Stops every track that is still live; returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for track in self.tracks.iter().filter(|t| !t.is_stopped()) {
            track.stop();
            stopped += 1;
        }
        stopped
    }
}

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// What to ask the capture device for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureConstraints {
    /// Microphone only.
    Audio,
    /// Camera only, with ideal resolution and facing.
    Video {
        width: u32,
        height: u32,
        facing: FacingMode,
    },
}

impl CaptureConstraints {
    /// Constraints used for a media kind's local capture.
    #[must_use]
    pub fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => CaptureConstraints::Audio,
            MediaKind::Video => CaptureConstraints::Video {
                width: VIDEO_IDEAL_WIDTH,
                height: VIDEO_IDEAL_HEIGHT,
                facing: FacingMode::User,
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            CaptureConstraints::Audio => MediaKind::Audio,
            CaptureConstraints::Video { .. } => MediaKind::Video,
        }
    }
}

/// Platform capture (microphone / camera).
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquires a local stream matching `constraints`.
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, CaptureDeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestTrack {
        kind: MediaKind,
        enabled: AtomicBool,
        stopped: AtomicBool,
        stop_calls: AtomicUsize,
    }

    impl TestTrack {
        fn new(kind: MediaKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                stop_calls: AtomicUsize::new(0),
            })
        }
    }

    impl MediaTrack for TestTrack {
        fn id(&self) -> &str {
            "t"
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

    #[test]
    fn test_set_enabled_only_touches_kind() {
        let audio = TestTrack::new(MediaKind::Audio);
        let video = TestTrack::new(MediaKind::Video);
        let tracks: Vec<Arc<dyn MediaTrack>> = vec![audio.clone() as Arc<dyn MediaTrack>, video.clone()];
        let stream = MediaStream::new("s", tracks);

        assert_eq!(stream.set_enabled(MediaKind::Audio, false), 1);
        assert!(!audio.is_enabled());
        assert!(video.is_enabled());
        assert!(!stream.first_enabled(MediaKind::Audio));
        assert!(stream.first_enabled(MediaKind::Video));
    }

    #[test]
    fn test_first_enabled_without_tracks() {
        let stream = MediaStream::new("empty", Vec::new());
        assert!(!stream.first_enabled(MediaKind::Audio));
        assert_eq!(stream.set_enabled(MediaKind::Audio, true), 0);
    }

    #[test]
    fn test_stop_all_stops_each_track_once() {
        let track = TestTrack::new(MediaKind::Audio);
        let stream = MediaStream::new("s", vec![track.clone() as Arc<dyn MediaTrack>]);
        let clone = stream.clone();

        assert_eq!(stream.stop_all(), 1);
        assert_eq!(clone.stop_all(), 0);
        assert_eq!(track.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_constraints_for_kind() {
        assert_eq!(
            CaptureConstraints::for_kind(MediaKind::Video),
            CaptureConstraints::Video {
                width: 1280,
                height: 720,
                facing: FacingMode::User
            }
        );
        assert_eq!(
            CaptureConstraints::for_kind(MediaKind::Audio).kind(),
            MediaKind::Audio
        );
    }
}
