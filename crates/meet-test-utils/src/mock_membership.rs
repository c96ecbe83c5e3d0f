//! Mock membership service and chat store.

use crate::mock_signaling::MockSignalingServer;
use async_trait::async_trait;
use meet_client::api::{ChatStore, MeetingRecord, MeetingSummary, MembershipService};
use meet_client::errors::RequestError;
use meet_client::signaling::{ChatMessage, RosterEntry};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long the finish check waits for `endMeeting` to reach the server.
const END_WATCH_WAIT: Duration = Duration::from_millis(200);

#[derive(Default)]
struct MembershipState {
    roster: Vec<RosterEntry>,
    creator_id: String,
    summary: MeetingSummary,
    fail_register: bool,
    fail_meeting: bool,
    fail_finish: bool,
    fail_remove: bool,
    /// Operation names in call order.
    calls: Vec<String>,
    /// (user id, socket id) of every presence registration.
    registrations: Vec<(String, String)>,
    end_sent_before_finish: Option<bool>,
}

/// In-memory `MembershipService`.
///
/// Presence registration adds the caller to the roster and returns it.
#[derive(Clone)]
pub struct MockMembership {
    state: Arc<Mutex<MembershipState>>,
    end_watch: Option<Arc<MockSignalingServer>>,
}

impl MockMembership {
    pub fn new(creator_id: &str) -> Self {
        let state = MembershipState {
            creator_id: creator_id.to_string(),
            summary: MeetingSummary {
                message: "Meeting finished".to_string(),
                ai_summary: Some("Discussed the roadmap".to_string()),
            },
            ..MembershipState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            end_watch: None,
        }
    }

    /// On `finish_meeting`, record whether the signaling server had already
    /// received `endMeeting`.
    pub fn with_end_watch(mut self, server: Arc<MockSignalingServer>) -> Self {
        self.end_watch = Some(server);
        self
    }

    /// Seed the roster with other participants.
    pub fn with_roster(self, roster: Vec<RosterEntry>) -> Self {
        self.state.lock().unwrap().roster = roster;
        self
    }

    pub fn fail_register(&self) {
        self.state.lock().unwrap().fail_register = true;
    }

    pub fn fail_meeting_lookup(&self) {
        self.state.lock().unwrap().fail_meeting = true;
    }

    pub fn fail_finish(&self) {
        self.state.lock().unwrap().fail_finish = true;
    }

    pub fn fail_remove(&self) {
        self.state.lock().unwrap().fail_remove = true;
    }

    pub fn set_roster(&self, roster: Vec<RosterEntry>) {
        self.state.lock().unwrap().roster = roster;
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.state.lock().unwrap().roster.clone()
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| *c == operation).count()
    }

    pub fn registrations(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().registrations.clone()
    }

    /// `None` until `finish_meeting` ran with a watched server attached.
    pub fn end_sent_before_finish(&self) -> Option<bool> {
        self.state.lock().unwrap().end_sent_before_finish
    }

    fn record(&self, operation: &str) {
        self.state.lock().unwrap().calls.push(operation.to_string());
    }
}

fn server_error(message: &str) -> RequestError {
    RequestError::Status {
        status: 500,
        message: message.to_string(),
    }
}

#[async_trait]
impl MembershipService for MockMembership {
    async fn register_presence(
        &self,
        _meeting_id: &str,
        user_id: &str,
        socket_id: &str,
    ) -> Result<Vec<RosterEntry>, RequestError> {
        self.record("register_presence");
        let mut state = self.state.lock().unwrap();
        if state.fail_register {
            return Err(server_error("Could not join meeting"));
        }

        state
            .registrations
            .push((user_id.to_string(), socket_id.to_string()));
        match state.roster.iter_mut().find(|e| e.user_id == user_id) {
            Some(entry) => entry.socket_id = socket_id.to_string(),
            None => state.roster.push(RosterEntry {
                user_id: user_id.to_string(),
                socket_id: socket_id.to_string(),
                name: None,
                email: None,
                photo_url: None,
            }),
        }
        Ok(state.roster.clone())
    }

    async fn remove_presence(
        &self,
        _meeting_id: &str,
        user_id: &str,
        _socket_id: &str,
    ) -> Result<(), RequestError> {
        self.record("remove_presence");
        let mut state = self.state.lock().unwrap();
        if state.fail_remove {
            return Err(server_error("Could not leave meeting"));
        }
        state.roster.retain(|e| e.user_id != user_id);
        Ok(())
    }

    async fn meeting(&self, _meeting_id: &str) -> Result<MeetingRecord, RequestError> {
        self.record("meeting");
        let state = self.state.lock().unwrap();
        if state.fail_meeting {
            return Err(RequestError::Status {
                status: 404,
                message: "Meeting not found".to_string(),
            });
        }
        Ok(MeetingRecord {
            creator_id: state.creator_id.clone(),
        })
    }

    async fn finish_meeting(&self, _meeting_id: &str) -> Result<MeetingSummary, RequestError> {
        self.record("finish_meeting");

        if let Some(server) = &self.end_watch {
            let deadline = tokio::time::Instant::now() + END_WATCH_WAIT;
            let mut seen = false;
            while tokio::time::Instant::now() < deadline {
                if server.sent_event_names().contains(&"endMeeting") {
                    seen = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.state.lock().unwrap().end_sent_before_finish = Some(seen);
        }

        let state = self.state.lock().unwrap();
        if state.fail_finish {
            return Err(server_error("Could not finish meeting"));
        }
        Ok(state.summary.clone())
    }
}

/// In-memory `ChatStore`.
#[derive(Clone, Default)]
pub struct MockChatStore {
    stored: Arc<Mutex<Vec<ChatMessage>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn stored(&self) -> Vec<ChatMessage> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for MockChatStore {
    async fn store(&self, message: &ChatMessage) -> Result<(), RequestError> {
        if *self.fail.lock().unwrap() {
            return Err(server_error("Could not store message"));
        }
        self.stored.lock().unwrap().push(message.clone());
        Ok(())
    }
}
