// Credentials and tokens
//
// Two layers: `Credentials` is what the user knows (email + password),
// `Credential` is what the cloud minted (token + expiry). The vendor's
// grant has no separate refresh token — a refresh re-runs the credential
// grant — so the stored `Credentials` double as the refresh material.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Account credentials used for login and token refresh.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account email address.
    pub email: String,
    /// Account password.
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// A minted access token with its expiry.
///
/// Mutated only by the session manager on login/refresh; destroyed on
/// logout. The wire shape comes from `POST auth/token`:
/// `{"user_id", "access_token", "expires_at"}` with a unix-seconds expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    /// The authenticated user's identifier, sent as `x-tractive-user`.
    pub user_id: String,

    /// Bearer token for the `authorization` header.
    pub access_token: SecretString,

    /// Absolute expiry of the token.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Construct from previously persisted parts.
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: SecretString::from(access_token.into()),
            expires_at,
        }
    }

    /// Whether the token is still usable, leaving `margin` of safety
    /// before the actual expiry.
    pub fn is_valid(&self, margin: std::time::Duration) -> bool {
        let margin = ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::zero());
        Utc::now() + margin < self.expires_at
    }

    /// The `authorization` header value.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn validity_honors_margin() {
        let cred = Credential::new("u1", "tok", Utc::now() + ChronoDuration::seconds(30));
        assert!(cred.is_valid(Duration::ZERO));
        // 30s of remaining validity is inside a 60s safety margin.
        assert!(!cred.is_valid(Duration::from_secs(60)));
    }

    #[test]
    fn expired_token_is_invalid() {
        let cred = Credential::new("u1", "tok", Utc::now() - ChronoDuration::seconds(1));
        assert!(!cred.is_valid(Duration::ZERO));
    }

    #[test]
    fn deserializes_token_response() {
        let body = r#"{
            "user_id": "test_user_123",
            "access_token": "test_access_token_xyz",
            "expires_at": 4102444800
        }"#;
        let cred: Credential = serde_json::from_str(body).expect("decode");
        assert_eq!(cred.user_id, "test_user_123");
        assert_eq!(cred.access_token.expose_secret(), "test_access_token_xyz");
        assert!(cred.is_valid(Duration::from_secs(60)));
    }

    #[test]
    fn bearer_header_value() {
        let cred = Credential::new("u1", "tok", Utc::now() + ChronoDuration::seconds(3600));
        assert_eq!(cred.bearer(), "Bearer tok");
    }
}
