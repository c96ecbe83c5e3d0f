//! HTTP collaborators.
//!
//! - [`request`] - `RestClient`, the JSON request wrapper
//! - [`membership`] - presence, meeting record, finish
//! - [`chat`] - chat message persistence

pub mod chat;
pub mod membership;
pub mod request;

pub use chat::{ChatStore, HttpChatStore};
pub use membership::{HttpMembershipClient, MeetingRecord, MeetingSummary, MembershipService};
pub use request::{Method, RequestOptions, RestClient, DEFAULT_ERROR_MESSAGE};
