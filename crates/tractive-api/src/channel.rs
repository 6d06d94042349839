// Realtime channel
//
// Keeps a persistent connection to the push endpoint and hides transient
// disconnects from subscribers: reconnect with exponential backoff and
// jitter, a fresh token from the session manager on every connect, and a
// liveness watchdog that treats prolonged silence as a dead connection.
// Only a fresh token being rejected again is terminal — the channel then
// surfaces the auth error and closes instead of retrying forever.
//
// The transport handshake sits behind `ChannelConnector` so the state
// machine can be driven by scripted frame streams in tests; the
// production connector speaks WebSocket via tokio-tungstenite.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Credential;
use crate::config::{ClientConfig, ReconnectConfig};
use crate::dispatcher::{CloseReason, EventDispatcher};
use crate::error::Error;
use crate::session::SessionManager;

/// Connection state of the realtime channel.
///
/// Mutated only by the channel's background task; observable through
/// [`RealtimeChannel::watch_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Connected; waiting for the remote to accept the token.
    Authenticating,
    /// Message pump active.
    Open,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting { attempt: u32, next_delay: Duration },
    /// Terminal: explicit shutdown or unrecoverable auth failure.
    Closed,
}

pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<FrameStream, Error>> + Send>>;

/// Narrow transport seam: establish one authenticated connection and
/// return its stream of text frames.
pub(crate) trait ChannelConnector: Send + Sync {
    fn connect(&self, url: Url, token: Credential) -> ConnectFuture;
}

// ── WebSocket connector ─────────────────────────────────────────────

/// Production connector: WebSocket handshake, then the current token as
/// the first frame.
pub(crate) struct WsConnector;

impl ChannelConnector for WsConnector {
    fn connect(&self, url: Url, token: Credential) -> ConnectFuture {
        Box::pin(async move {
            debug!(%url, "connecting realtime channel");

            let (ws_stream, _response) = tokio_tungstenite::connect_async(url.to_string())
                .await
                .map_err(|e| Error::ChannelConnect(e.to_string()))?;

            let (mut write, read) = ws_stream.split();

            let auth = serde_json::json!({
                "message": "auth",
                "access_token": token.access_token.expose_secret(),
                "user_id": token.user_id,
            });
            write
                .send(Message::Text(auth.to_string().into()))
                .await
                .map_err(|e| Error::ChannelConnect(e.to_string()))?;

            // The write half is not needed past the auth frame; pings are
            // answered by tungstenite itself.
            drop(write);

            let frames = read.filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(Message::Close(_)) => Some(Err(Error::ChannelClosed)),
                    Ok(_) => None, // ping/pong/binary
                    Err(e) => Some(Err(Error::ChannelConnect(e.to_string()))),
                }
            });

            Ok(Box::pin(frames) as FrameStream)
        })
    }
}

// ── Channel handle ──────────────────────────────────────────────────

/// Handle to the running realtime channel.
///
/// The connect/read loop runs in a background task; dropping the handle
/// does not stop it — call [`shutdown`](Self::shutdown).
pub struct RealtimeChannel {
    state_rx: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
}

impl RealtimeChannel {
    pub(crate) fn spawn(
        session: Arc<SessionManager>,
        dispatcher: Arc<EventDispatcher>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let config = session.config().clone();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            channel_loop(config, session, dispatcher, connector, state_tx, task_cancel).await;
        });

        Self { state_rx, cancel }
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Signal the background task to shut down. Terminal.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background loop ─────────────────────────────────────────────────

enum DropReason {
    /// Transport-level failure; retried with backoff, indefinitely.
    Transport(String),
    /// No traffic within the liveness window; presumed dead.
    Liveness,
    /// The remote rejected the token.
    AuthRejected(String),
    /// Stream ended cleanly (close frame or EOF).
    StreamEnded,
}

struct ConnectionOutcome {
    reason: DropReason,
    /// How long the connection was Open, if it got that far.
    open_for: Option<Duration>,
}

impl ConnectionOutcome {
    fn before_open(reason: DropReason) -> Self {
        Self {
            reason,
            open_for: None,
        }
    }

    fn after_open(reason: DropReason, opened_at: Instant) -> Self {
        Self {
            reason,
            open_for: Some(opened_at.elapsed()),
        }
    }
}

/// Main loop: connect → pump → on drop, backoff → reconnect.
async fn channel_loop(
    config: ClientConfig,
    session: Arc<SessionManager>,
    dispatcher: Arc<EventDispatcher>,
    connector: Arc<dyn ChannelConnector>,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    // Set once an auth rejection forced a token refresh; cleared when a
    // connection reaches Open. A rejection while set is terminal.
    let mut fresh_token_retry = false;
    // Per-loop jitter phase, so instances that drop together don't
    // reconnect in lockstep.
    let jitter_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| f64::from(d.subsec_nanos()) * 1e-9);

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = run_connection(
                &config,
                &session,
                &dispatcher,
                connector.as_ref(),
                &state_tx,
                fresh_token_retry,
            ) => outcome,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "realtime channel failed terminally");
                dispatcher.close_all(&CloseReason::AuthRejected(e.to_string()));
                let _ = state_tx.send(ChannelState::Closed);
                return;
            }
        };

        // A sustained Open period forgives the past failure history.
        if outcome
            .open_for
            .is_some_and(|open| open >= config.reconnect.reset_after)
        {
            attempt = 0;
        }
        if outcome.open_for.is_some() {
            // The token was accepted, so any earlier rejection is stale.
            fresh_token_retry = false;
        }

        match outcome.reason {
            DropReason::AuthRejected(reason) => {
                if fresh_token_retry {
                    warn!(%reason, "freshly refreshed token rejected, closing channel");
                    dispatcher.close_all(&CloseReason::AuthRejected(reason));
                    let _ = state_tx.send(ChannelState::Closed);
                    return;
                }
                info!(%reason, "channel auth rejected, will retry with a fresh token");
                fresh_token_retry = true;
            }
            DropReason::Transport(reason) => {
                debug!(%reason, attempt, "channel transport dropped");
            }
            DropReason::Liveness => {
                warn!(attempt, "channel liveness timeout");
            }
            DropReason::StreamEnded => {
                debug!(attempt, "channel stream ended, reconnecting");
            }
        }

        let delay = backoff_delay(attempt, jitter_seed, &config.reconnect);
        let _ = state_tx.send(ChannelState::Reconnecting {
            attempt,
            next_delay: delay,
        });
        debug!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting before reconnect");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    dispatcher.close_all(&CloseReason::Shutdown);
    let _ = state_tx.send(ChannelState::Closed);
    debug!("realtime channel shut down");
}

/// One connection lifecycle: token → handshake → pump until it drops.
///
/// `Err` is terminal (the session manager cannot produce a usable
/// token); every recoverable path comes back as `Ok` with a reason.
async fn run_connection(
    config: &ClientConfig,
    session: &SessionManager,
    dispatcher: &EventDispatcher,
    connector: &dyn ChannelConnector,
    state_tx: &watch::Sender<ChannelState>,
    force_refresh: bool,
) -> Result<ConnectionOutcome, Error> {
    let _ = state_tx.send(ChannelState::Connecting);

    // Always go through the session manager so an expired token is
    // refreshed rather than replayed.
    let token = match session.token().await {
        Ok(token) => token,
        Err(e @ Error::Authentication { .. }) => return Err(e),
        Err(e) => {
            return Ok(ConnectionOutcome::before_open(DropReason::Transport(
                e.to_string(),
            )));
        }
    };
    let token = if force_refresh {
        match session.refresh(&token).await {
            Ok(token) => token,
            Err(e @ Error::Authentication { .. }) => return Err(e),
            Err(e) => {
                return Ok(ConnectionOutcome::before_open(DropReason::Transport(
                    e.to_string(),
                )));
            }
        }
    } else {
        token
    };

    let mut frames = match connector.connect(config.channel_url.clone(), token).await {
        Ok(frames) => frames,
        Err(e) => {
            return Ok(ConnectionOutcome::before_open(DropReason::Transport(
                e.to_string(),
            )));
        }
    };

    let _ = state_tx.send(ChannelState::Authenticating);

    // The first frame decides whether the token was accepted: normally a
    // handshake frame, but a prompt data event counts as acceptance too.
    // A close before any frame is how some backends reject a token, so
    // it counts as a rejection; silence does not.
    let first = match tokio::time::timeout(config.liveness_timeout, frames.next()).await {
        Err(_) => {
            return Ok(ConnectionOutcome::before_open(DropReason::Transport(
                "authentication timed out".into(),
            )));
        }
        Ok(None | Some(Err(Error::ChannelClosed))) => {
            return Ok(ConnectionOutcome::before_open(DropReason::AuthRejected(
                "channel closed during authentication".into(),
            )));
        }
        Ok(Some(Err(e))) => {
            return Ok(ConnectionOutcome::before_open(DropReason::Transport(
                e.to_string(),
            )));
        }
        Ok(Some(Ok(text))) => text,
    };
    if let Some(reason) = auth_rejection(&first) {
        return Ok(ConnectionOutcome::before_open(DropReason::AuthRejected(
            reason,
        )));
    }

    let _ = state_tx.send(ChannelState::Open);
    info!("realtime channel open");
    let opened_at = Instant::now();

    dispatcher.dispatch(&first);
    let mut last_frame = Instant::now();

    loop {
        let deadline = last_frame + config.liveness_timeout;
        tokio::select! {
            biased;
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    last_frame = Instant::now();
                    dispatcher.dispatch(&text);
                }
                Some(Err(Error::ChannelClosed)) => {
                    return Ok(ConnectionOutcome::after_open(DropReason::StreamEnded, opened_at));
                }
                Some(Err(e)) => {
                    return Ok(ConnectionOutcome::after_open(
                        DropReason::Transport(e.to_string()),
                        opened_at,
                    ));
                }
                None => {
                    return Ok(ConnectionOutcome::after_open(DropReason::StreamEnded, opened_at));
                }
            },
            () = tokio::time::sleep_until(deadline) => {
                return Ok(ConnectionOutcome::after_open(DropReason::Liveness, opened_at));
            }
        }
    }
}

/// Explicit auth-rejection frame from the remote, if that's what this is.
///
/// A close before the first frame is also a rejection, handled where
/// that frame is awaited; silence is a transport fault, not a rejection.
fn auth_rejection(frame: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    let message = value.get("message")?.as_str()?;
    if message == "auth_error" || message == "unauthorized" {
        Some(format!("channel authentication rejected: {message}"))
    } else {
        None
    }
}

// ── Backoff calculation ─────────────────────────────────────────────

/// Exponential backoff with jitter:
/// `delay = min(base * 2^attempt, max) * jitter`, jitter in the ±20%
/// band. The phase mixes the attempt number with a per-loop seed taken
/// at spawn time, so instances at the same attempt still spread out.
fn backoff_delay(attempt: u32, seed: f64, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(20)).unwrap_or(20);
    let exp = config.base_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = exp.min(config.max_delay.as_secs_f64());

    let jitter = 1.0 + 0.2 * (f64::from(attempt) * 7.3 + seed * 6.28 + 1.3).sin();
    Duration::from_secs_f64(capped * jitter)
}

// ── Tests ───────────────────────────────────────────────────────────
