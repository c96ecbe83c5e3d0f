//! Deterministic peer-transport identities.
//!
//! Every participant registers on a peer server as `"{meeting_id}-{user_id}"`,
//! so any participant can compute any other participant's identity from the
//! roster alone. The user id is recovered from the segment after the LAST
//! `-`: user ids that themselves contain `-` cannot be recovered correctly.
//! Construction logs a warning in that case; the format is shared with the
//! peer servers, so it is not changed here.

use std::fmt;
use tracing::warn;

/// Separator between the meeting id and the user id.
pub const PEER_ID_SEPARATOR: char = '-';

/// A participant's identity on a peer-transport server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Identity for `user_id` in `meeting_id`.
    #[must_use]
    pub fn new(meeting_id: &str, user_id: &str) -> Self {
        if user_id.contains(PEER_ID_SEPARATOR) {
            warn!(
                target: "meet.media.identity",
                meeting_id = %meeting_id,
                user_id = %user_id,
                "User id contains the peer id separator; remote peers will misidentify this participant"
            );
        }
        Self(format!("{meeting_id}{PEER_ID_SEPARATOR}{user_id}"))
    }

    /// Wraps an identity received from the transport (e.g. a caller id).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User id part: everything after the last separator, or the whole
    /// identity when there is no separator.
    #[must_use]
    pub fn user_id(&self) -> &str {
        extract_user_id(&self.0)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recovers the user id from a raw peer id.
#[must_use]
pub fn extract_user_id(peer_id: &str) -> &str {
    peer_id
        .rsplit_once(PEER_ID_SEPARATOR)
        .map_or(peer_id, |(_, user_id)| user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_format() {
        let identity = PeerIdentity::new("m1", "u2");
        assert_eq!(identity.as_str(), "m1-u2");
        assert_eq!(identity.to_string(), "m1-u2");
    }

    #[test]
    fn test_user_id_round_trip_without_separator() {
        for user in ["u1", "abcDEF123", "x"] {
            let identity = PeerIdentity::new("meeting42", user);
            assert_eq!(identity.user_id(), user);
        }
    }

    #[test]
    fn test_meeting_id_may_contain_separator() {
        // Only the last segment matters
        let identity = PeerIdentity::new("2024-team-sync", "u7");
        assert_eq!(identity.user_id(), "u7");
    }

    #[test]
    fn test_user_id_with_separator_is_ambiguous() {
        let identity = PeerIdentity::new("m1", "first-last");
        assert_eq!(identity.user_id(), "last");
    }

    #[test]
    fn test_extract_without_separator_returns_whole() {
        assert_eq!(extract_user_id("standalone"), "standalone");
        assert_eq!(PeerIdentity::from_raw("m1-").user_id(), "");
    }
}
