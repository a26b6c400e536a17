use serde::{Deserialize, Serialize};

/// The signed-in user as exposed by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user identifier. Owns items and markers.
    pub user_id: String,
    /// Display login (usually an email address).
    pub login: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            login: login.into(),
        }
    }
}
