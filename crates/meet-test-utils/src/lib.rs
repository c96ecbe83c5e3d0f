//! # Meet Test Utilities
//!
//! Mocks and fixtures for exercising the client core without a browser,
//! a peer server, or a backend.
//!
//! ## Modules
//!
//! - `mock_capture` - Capture device that grants, denies, or has no hardware
//! - `mock_peer` - In-memory peer network shared by any number of endpoints
//! - `mock_signaling` - In-memory signaling server that records emitted events
//! - `mock_membership` - Membership service and chat store backed by memory
//! - `fixtures` - Test configuration, identities, rosters, session harness
//! - `eventual` - Polling assertions for state that converges asynchronously
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meet_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let network = MockPeerNetwork::new();
//!     let signaling = MockSignalingServer::new();
//!
//!     let amy = SessionHarness::builder("m1", "amy")
//!         .network(Arc::clone(&network))
//!         .signaling(Arc::clone(&signaling))
//!         .build();
//!
//!     amy.session.join().await.unwrap();
//! }
//! ```
//!
//! Participants that should see each other share one network, one
//! signaling server, and one membership service.

pub mod eventual;
pub mod fixtures;
pub mod mock_capture;
pub mod mock_membership;
pub mod mock_peer;
pub mod mock_signaling;

pub use eventual::{assert_eventually, assert_eventually_within, settle, EVENTUALLY_TIMEOUT};
pub use fixtures::{
    identity, roster, roster_entry, spawn_channel, test_config, test_config_with, SessionHarness,
    SessionHarnessBuilder, AUDIO_AUTHORITY, TEST_BACKEND_URL, TEST_SOCKET_URL, VIDEO_AUTHORITY,
};
pub use mock_capture::{mock_stream, MockCaptureDevice, MockTrack};
pub use mock_membership::{MockChatStore, MockMembership};
pub use mock_peer::{MockPeerNetwork, PEER_UNAVAILABLE};
pub use mock_signaling::MockSignalingServer;
