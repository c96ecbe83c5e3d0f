//! Meeting membership collaborator.
//!
//! Presence registration returns the current roster; the meeting record
//! names its creator, which decides host privileges.

use super::request::{RequestOptions, RestClient};
use crate::errors::RequestError;
use crate::signaling::RosterEntry;

use async_trait::async_trait;
use common::secret::{bearer_header_value, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Meeting record as returned by `GET /meetings/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MeetingRecord {
    /// User id of the meeting creator.
    #[serde(rename = "userId")]
    pub creator_id: String,
}

/// Result of finishing a meeting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct MeetingSummary {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub ai_summary: Option<String>,
}

impl MeetingSummary {
    /// Text to show in the summary panel.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.ai_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.message)
    }
}

#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Adds or refreshes the user's presence and returns the roster.
    async fn register_presence(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: &str,
    ) -> Result<Vec<RosterEntry>, RequestError>;

    async fn remove_presence(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: &str,
    ) -> Result<(), RequestError>;

    async fn meeting(&self, meeting_id: &str) -> Result<MeetingRecord, RequestError>;

    /// Closes the meeting for everyone and returns its summary.
    async fn finish_meeting(&self, meeting_id: &str) -> Result<MeetingSummary, RequestError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceBody<'a> {
    user_id: &'a str,
    socket_id: &'a str,
}

/// The backend answers presence updates with either a bare list or
/// `{"users": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RosterResponse {
    List(Vec<RosterEntry>),
    Wrapped { users: Vec<RosterEntry> },
}

impl From<RosterResponse> for Vec<RosterEntry> {
    fn from(response: RosterResponse) -> Self {
        match response {
            RosterResponse::List(users) | RosterResponse::Wrapped { users } => users,
        }
    }
}

/// `MembershipService` over the meetings REST API.
#[derive(Debug, Clone)]
pub struct HttpMembershipClient {
    client: RestClient,
    token: Option<SecretString>,
}

impl HttpMembershipClient {
    #[must_use]
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    fn authorized(&self, options: RequestOptions) -> RequestOptions {
        match &self.token {
            Some(token) => options.with_header("Authorization", bearer_header_value(token)),
            None => options,
        }
    }

    fn presence_body(user_id: &str, socket_id: &str) -> Result<serde_json::Value, RequestError> {
        serde_json::to_value(PresenceBody { user_id, socket_id })
            .map_err(|e| RequestError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MembershipService for HttpMembershipClient {
    #[instrument(skip_all, name = "meet.api.register_presence", fields(meeting_id = %meeting_id, user_id = %user_id))]
    async fn register_presence(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: &str,
    ) -> Result<Vec<RosterEntry>, RequestError> {
        let options = self.authorized(
            RequestOptions::put(format!("/meetings/updateOrAddMeetingUser/{meeting_id}"))
                .with_data(Self::presence_body(user_id, socket_id)?),
        );
        let roster: Vec<RosterEntry> = self.client.request::<RosterResponse>(options).await?.into();

        debug!(target: "meet.api", users = roster.len(), "Presence registered");
        Ok(roster)
    }

    #[instrument(skip_all, name = "meet.api.remove_presence", fields(meeting_id = %meeting_id, user_id = %user_id))]
    async fn remove_presence(
        &self,
        meeting_id: &str,
        user_id: &str,
        socket_id: &str,
    ) -> Result<(), RequestError> {
        let options = self.authorized(
            RequestOptions::put(format!("/meetings/removeUser/{meeting_id}"))
                .with_data(Self::presence_body(user_id, socket_id)?),
        );
        let _: serde_json::Value = self.client.request(options).await?;
        Ok(())
    }

    async fn meeting(&self, meeting_id: &str) -> Result<MeetingRecord, RequestError> {
        let options = self.authorized(RequestOptions::get(format!("/meetings/{meeting_id}")));
        self.client.request(options).await
    }

    #[instrument(skip_all, name = "meet.api.finish_meeting", fields(meeting_id = %meeting_id))]
    async fn finish_meeting(&self, meeting_id: &str) -> Result<MeetingSummary, RequestError> {
        let options = self.authorized(RequestOptions::put(format!("/meetings/finish/{meeting_id}")));
        self.client.request(options).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_response_accepts_both_shapes() {
        let list: RosterResponse =
            serde_json::from_str(r#"[{"userId":"a","socketId":"s1"}]"#).unwrap();
        let wrapped: RosterResponse =
            serde_json::from_str(r#"{"users":[{"userId":"a"},{"userId":"b"}]}"#).unwrap();

        assert_eq!(Vec::<RosterEntry>::from(list).len(), 1);
        assert_eq!(Vec::<RosterEntry>::from(wrapped).len(), 2);
    }

    #[test]
    fn test_meeting_record_creator_from_user_id() {
        let record: MeetingRecord =
            serde_json::from_str(r#"{"userId":"host-1","title":"Standup"}"#).unwrap();
        assert_eq!(record.creator_id, "host-1");
    }

    #[test]
    fn test_summary_display_prefers_ai_summary() {
        let summary = MeetingSummary {
            message: "Meeting finished".to_string(),
            ai_summary: Some("We agreed on the roadmap".to_string()),
        };
        assert_eq!(summary.display_text(), "We agreed on the roadmap");

        let blank = MeetingSummary {
            message: "Meeting finished".to_string(),
            ai_summary: Some("  ".to_string()),
        };
        assert_eq!(blank.display_text(), "Meeting finished");
    }
}
