use thiserror::Error;

/// Kind of a remote-reported API failure, decoded from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 404 — unknown tracker / pet / user.
    NotFound,
    /// 429 — request limit exceeded. Retrying is the caller's decision.
    RateLimited,
    /// Other 4xx — the request itself was malformed or not permitted.
    Validation,
    /// 5xx — cloud-side failure.
    Server,
}

/// Top-level error type for the `tractive-api` crate.
///
/// Covers every failure mode: authentication, request/response calls,
/// transport, the realtime channel, and subscription delivery.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or token refresh failed (wrong credentials, locked account,
    /// or the remote rejected a freshly minted token).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// A token grant issued while this call was queued behind it failed.
    /// The failure is shared with the queued callers instead of each one
    /// issuing another grant.
    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    // ── Request/response API ────────────────────────────────────────
    /// Remote-reported 4xx/5xx, decoded into a kind.
    #[error("API error ({kind:?}, HTTP {status}): {message}")]
    Api {
        kind: ApiErrorKind,
        status: u16,
        message: String,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request exceeded the configured per-call timeout.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to construct the HTTP client.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Realtime channel ────────────────────────────────────────────
    /// Realtime channel handshake or connection failed.
    #[error("Realtime channel connection failed: {0}")]
    ChannelConnect(String),

    /// Realtime channel was closed by the remote or by `close()`.
    #[error("Realtime channel closed")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Decode { message: String, body: String },

    // ── Subscriptions ───────────────────────────────────────────────
    /// A subscription's bounded queue overflowed on a critical event.
    /// The subscription was closed rather than dropping the event.
    #[error("Subscription {subscription_id} overwhelmed, queue full")]
    Backpressure { subscription_id: u64 },
}

impl Error {
    /// Returns `true` if this error indicates the token was rejected
    /// and a refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::ChannelConnect(_) | Self::TokenRefresh { .. } => true,
            Self::Api { kind, .. } => {
                matches!(kind, ApiErrorKind::RateLimited | ApiErrorKind::Server)
            }
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api {
                kind: ApiErrorKind::NotFound,
                ..
            }
        )
    }

    /// Map a non-success HTTP status to the API error taxonomy.
    ///
    /// 401/403 are not handled here — they map to
    /// [`Error::Authentication`] upstream so the session manager can run
    /// its refresh-and-retry cycle.
    pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        let kind = if status == reqwest::StatusCode::NOT_FOUND {
            ApiErrorKind::NotFound
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ApiErrorKind::RateLimited
        } else if status.is_client_error() {
            ApiErrorKind::Validation
        } else {
            ApiErrorKind::Server
        };

        Self::Api {
            kind,
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let err = Error::from_status(reqwest::StatusCode::NOT_FOUND, "missing".into());
        assert!(err.is_not_found());

        let err = Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(
            err,
            Error::Api {
                kind: ApiErrorKind::RateLimited,
                status: 429,
                ..
            }
        ));
        assert!(err.is_transient());

        let err = Error::from_status(reqwest::StatusCode::BAD_REQUEST, "bad".into());
        assert!(matches!(
            err,
            Error::Api {
                kind: ApiErrorKind::Validation,
                ..
            }
        ));

        let err = Error::from_status(reqwest::StatusCode::BAD_GATEWAY, "oops".into());
        assert!(matches!(
            err,
            Error::Api {
                kind: ApiErrorKind::Server,
                ..
            }
        ));
    }

    #[test]
    fn shared_refresh_failures_are_transient() {
        let err = Error::TokenRefresh {
            message: "API error (Server, HTTP 500): auth backend down".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_auth_expired());
    }

    #[test]
    fn auth_errors_are_not_transient() {
        let err = Error::Authentication {
            message: "bad password".into(),
        };
        assert!(err.is_auth_expired());
        assert!(!err.is_transient());
    }
}
