// src/types/session.rs
use serde::{Deserialize, Serialize};

/// Opaque profile record as returned by the backend. The client checks
/// presence only and never validates the structure.
pub type UserProfile = serde_json::Value;

/// Bearer credentials held for the lifetime of a session. The access
/// token is attached to outgoing requests; the refresh token is kept
/// for the logout call and future renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

/// Shape of the persisted `authData` storage key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

/// Response of the login, federated-login and register endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub token: String,
    pub refresh: String,
}

impl LoginResponse {
    pub fn into_parts(self) -> (UserProfile, Tokens) {
        (
            self.user,
            Tokens {
                access: self.token,
                refresh: self.refresh,
            },
        )
    }
}
