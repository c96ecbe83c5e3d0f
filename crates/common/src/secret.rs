//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types plus the two places where a Nexmeet client
//! legitimately has to put an auth token on the wire: the `Authorization`
//! header and the signaling `newUser` announcement.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` and holds a token stays safe to log via `{:?}` or tracing.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{bearer_header_value, SecretString};
//!
//! #[derive(Debug)]
//! struct Identity {
//!     user_id: String,
//!     auth_token: SecretString,
//! }
//!
//! let identity = Identity {
//!     user_id: "u1".to_string(),
//!     auth_token: SecretString::from("id-token"),
//! };
//!
//! assert!(!format!("{identity:?}").contains("id-token"));
//! assert_eq!(bearer_header_value(&identity.auth_token), "Bearer id-token");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

use serde::Serializer;

/// Formats a token as an HTTP `Authorization` header value.
#[must_use]
pub fn bearer_header_value(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

/// Serde helper for wire fields that must carry the raw secret.
///
/// Use with `#[serde(serialize_with = "common::secret::serialize_exposed")]`.
/// Deserialization needs no helper: `secrecy` implements it with the `serde`
/// feature.
///
/// # Errors
///
/// Propagates the serializer's error.
pub fn serialize_exposed<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}
