//! Local user identity supplied by the authentication collaborator.

use super::messages::Route;
use common::secret::SecretString;

/// Who is joining. Every field may be missing until the user has signed in
/// and completed a profile.
#[derive(Debug, Clone, Default)]
pub struct LocalIdentity {
    pub user_id: Option<String>,
    pub auth_token: Option<SecretString>,
    pub display_name: Option<String>,
}

/// An identity that passed validation.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub auth_token: SecretString,
    pub display_name: Option<String>,
}

impl LocalIdentity {
    #[must_use]
    pub fn new(user_id: impl Into<String>, auth_token: SecretString) -> Self {
        Self {
            user_id: Some(user_id.into()),
            auth_token: Some(auth_token),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// A missing token sends the user to login; a missing user id sends
    /// them to finish their profile.
    ///
    /// # Errors
    ///
    /// Returns the route the user must visit before joining.
    pub fn verify(&self) -> Result<VerifiedIdentity, Route> {
        let Some(auth_token) = self.auth_token.clone() else {
            return Err(Route::Login);
        };
        let user_id = match self.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(Route::Profile),
        };

        Ok(VerifiedIdentity {
            user_id,
            auth_token,
            display_name: self.display_name.clone(),
        })
    }
}
