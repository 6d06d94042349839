// Session manager
//
// Owns the credential lifecycle: login, proactive refresh-before-use,
// and exactly one transparent refresh-and-retry when the remote rejects
// a token mid-flight. Refresh is single-flighted: the token slot lives
// behind a `tokio::sync::Mutex` and the refresh request is issued while
// holding it, so concurrent callers that observe a stale token queue up
// and reuse one result instead of racing their own refreshes. That goes
// for failures too: a grant epoch lets queued callers tell "a refresh
// completed while I waited" apart from "nobody has tried yet", and a
// failed attempt is shared with everyone who was queued behind it.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Method;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::auth::{Credential, Credentials};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::transport::build_http_client;

const TOKEN_PATH: &str = "auth/token";

/// Guarded token state. `failure` mirrors the outcome of the most recent
/// completed grant so queued waiters can share it.
struct TokenSlot {
    cred: Option<Credential>,
    failure: Option<GrantFailure>,
}

/// Cloneable record of a failed grant, handed to callers that were
/// queued behind it.
#[derive(Clone)]
enum GrantFailure {
    Auth(String),
    Other(String),
}

impl GrantFailure {
    fn of(error: &Error) -> Self {
        match error {
            Error::Authentication { message } => Self::Auth(message.clone()),
            other => Self::Other(other.to_string()),
        }
    }

    fn to_error(&self) -> Error {
        match self {
            Self::Auth(message) => Error::Authentication {
                message: message.clone(),
            },
            Self::Other(message) => Error::TokenRefresh {
                message: message.clone(),
            },
        }
    }
}

/// Orchestrates authentication and attaches authorization to every
/// outbound request/response call.
pub struct SessionManager {
    http: reqwest::Client,
    config: ClientConfig,
    /// Refresh material. `None` when the client was constructed from a
    /// bare [`Credential`] — expiry then surfaces as an auth error
    /// instead of a silent re-login.
    credentials: Option<Credentials>,
    /// The single owned credential slot. Mutated only under the lock.
    token: Mutex<TokenSlot>,
    /// Bumped after every completed grant attempt, success or failure.
    /// Callers snapshot it before queueing on the lock; a changed epoch
    /// means an attempt they waited on has finished.
    grant_epoch: AtomicU64,
}

impl SessionManager {
    pub(crate) fn new(
        config: ClientConfig,
        credentials: Option<Credentials>,
        initial: Option<Credential>,
    ) -> Result<Self, Error> {
        let http = build_http_client(&config)?;
        Ok(Self {
            http,
            config,
            credentials,
            token: Mutex::new(TokenSlot {
                cred: initial,
                failure: None,
            }),
            grant_epoch: AtomicU64::new(0),
        })
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Exchange the stored credentials for a fresh [`Credential`],
    /// replacing any existing one.
    pub async fn login(&self) -> Result<Credential, Error> {
        let mut slot = self.token.lock().await;
        self.grant_locked(&mut slot).await
    }

    /// Destroy the local credential.
    ///
    /// The vendor grant has no revocation endpoint, so logout is purely
    /// local; the token simply ages out on the remote side.
    pub async fn logout(&self) {
        let mut slot = self.token.lock().await;
        slot.cred = None;
        slot.failure = None;
        debug!("session credential destroyed");
    }

    /// Snapshot of the current credential, e.g. for persisting across
    /// process restarts.
    pub async fn credential(&self) -> Option<Credential> {
        self.token.lock().await.cred.clone()
    }

    /// The authenticated user's id, logging in first if needed.
    pub async fn user_id(&self) -> Result<String, Error> {
        Ok(self.token().await?.user_id)
    }

    // ── Token lifecycle ──────────────────────────────────────────────

    /// Return a credential guaranteed to be outside the refresh margin,
    /// minting a new one if needed.
    pub(crate) async fn token(&self) -> Result<Credential, Error> {
        let observed = self.grant_epoch.load(Ordering::Acquire);
        let mut slot = self.token.lock().await;
        if let Some(cred) = slot.cred.as_ref() {
            if cred.is_valid(self.config.token_refresh_margin) {
                return Ok(cred.clone());
            }
            debug!(
                expires_at = %cred.expires_at,
                "token inside refresh margin, refreshing before use"
            );
        }
        if let Some(failure) = self.shared_failure(&slot, observed) {
            return Err(failure);
        }
        self.grant_locked(&mut slot).await
    }

    /// Force-refresh after the remote rejected `stale`.
    ///
    /// If another caller already replaced `stale` while we waited for
    /// the lock, that newer credential is reused instead of issuing a
    /// second refresh; likewise a refresh that failed while we waited is
    /// shared rather than repeated.
    pub(crate) async fn refresh(&self, stale: &Credential) -> Result<Credential, Error> {
        let observed = self.grant_epoch.load(Ordering::Acquire);
        let mut slot = self.token.lock().await;
        if let Some(cred) = slot.cred.as_ref() {
            if cred.expires_at > stale.expires_at
                && cred.is_valid(self.config.token_refresh_margin)
            {
                debug!("reusing token refreshed by a concurrent caller");
                return Ok(cred.clone());
            }
        }
        if let Some(failure) = self.shared_failure(&slot, observed) {
            return Err(failure);
        }
        self.grant_locked(&mut slot).await
    }

    /// The failure of a grant that completed while this caller was
    /// queued on the lock, if there was one. A fresh caller (same epoch
    /// as its snapshot) is allowed to try again.
    fn shared_failure(&self, slot: &TokenSlot, observed_epoch: u64) -> Option<Error> {
        if self.grant_epoch.load(Ordering::Acquire) == observed_epoch {
            return None;
        }
        let failure = slot.failure.as_ref()?;
        debug!("sharing failed token grant with a queued caller");
        Some(failure.to_error())
    }

    /// Run the credential grant and record its outcome in the slot. The
    /// epoch bump is what queued waiters key on.
    async fn grant_locked(&self, slot: &mut TokenSlot) -> Result<Credential, Error> {
        let result = self.request_token().await;
        match &result {
            Ok(cred) => {
                slot.cred = Some(cred.clone());
                slot.failure = None;
            }
            Err(e) => slot.failure = Some(GrantFailure::of(e)),
        }
        self.grant_epoch.fetch_add(1, Ordering::Release);
        result
    }

    /// Run the credential grant against the remote. Slot and epoch
    /// bookkeeping happens in [`grant_locked`](Self::grant_locked).
    async fn request_token(&self) -> Result<Credential, Error> {
        let Some(creds) = self.credentials.as_ref() else {
            return Err(Error::Authentication {
                message: "credential expired and no login credentials available".into(),
            });
        };

        let url = self.config.api_base.join(TOKEN_PATH)?;
        debug!(%url, "requesting access token");

        let body = serde_json::json!({
            "platform_email": creds.email,
            "platform_token": creds.password.expose_secret(),
            "grant_type": "tractive",
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                message: format!("invalid credentials (HTTP {status})"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status(status, preview(&body).to_owned()));
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        let cred: Credential = serde_json::from_str(&body).map_err(|e| Error::Decode {
            message: format!("token response: {e}"),
            body,
        })?;

        info!(user_id = %cred.user_id, expires_at = %cred.expires_at, "authenticated");
        Ok(cred)
    }

    // ── Authorized request/response calls ────────────────────────────

    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        self.authorized_call(Method::GET, url, None).await
    }

    /// Dispatch with a guaranteed-valid token. On an authorization
    /// rejection, refresh once and retry once; a second rejection
    /// surfaces to the caller.
    pub(crate) async fn authorized_call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, Error> {
        let token = self.token().await?;
        match self
            .dispatch(method.clone(), url.clone(), body.as_ref(), &token)
            .await
        {
            Err(e) if e.is_auth_expired() => {
                debug!(%url, "authorization rejected, refreshing token and retrying once");
                let fresh = self.refresh(&token).await?;
                self.dispatch(method, url, body.as_ref(), &fresh).await
            }
            other => other,
        }
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        token: &Credential,
    ) -> Result<T, Error> {
        debug!(%method, %url, "dispatching authorized request");

        let mut req = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, token.bearer())
            .header("x-tractive-user", &token.user_id);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Authentication {
                message: format!("authorization rejected (HTTP {status})"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status(status, preview(&body).to_owned()));
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Decode {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                timeout_secs: self.config.request_timeout.as_secs(),
            }
        } else {
            Error::Transport(e)
        }
    }
}

/// First 200 bytes of a body for error messages, clamped to a char
/// boundary.
fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
