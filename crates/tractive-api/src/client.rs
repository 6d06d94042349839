// Client facade
//
// Thin typed accessors over the session manager plus the subscribe
// surface for realtime events. Holds no state of its own beyond the
// lazily started channel task.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::auth::{Credential, Credentials};
use crate::channel::{ChannelConnector, ChannelState, RealtimeChannel, WsConnector};
use crate::config::ClientConfig;
use crate::dispatcher::{EventDispatcher, Subscription, SubscriptionId};
use crate::error::Error;
use crate::models::{
    Account, CommandResponse, HardwareReport, HealthOverview, Position, Tracker, TrackableObject,
    TrackableObjectDetail, TrackerDetail,
};
use crate::session::SessionManager;

/// Asynchronous client for the Tractive cloud.
///
/// Request/response calls share one connection pool and always carry a
/// valid token (refreshed transparently). The realtime channel is
/// started lazily on the first `subscribe_*` call and runs in a
/// background task until [`close`](Self::close).
pub struct TractiveClient {
    session: Arc<SessionManager>,
    dispatcher: Arc<EventDispatcher>,
    channel: OnceLock<RealtimeChannel>,
}

impl TractiveClient {
    /// Construct a client that logs in with account credentials on the
    /// first call that needs a token.
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self, Error> {
        let capacity = config.subscription_capacity;
        let session = Arc::new(SessionManager::new(config, Some(credentials), None)?);
        Ok(Self {
            session,
            dispatcher: Arc::new(EventDispatcher::new(capacity)),
            channel: OnceLock::new(),
        })
    }

    /// Construct a client from a previously persisted [`Credential`].
    ///
    /// Without the account password there is no refresh material: once
    /// the credential expires, calls fail with an authentication error.
    pub fn with_credential(config: ClientConfig, credential: Credential) -> Result<Self, Error> {
        let capacity = config.subscription_capacity;
        let session = Arc::new(SessionManager::new(config, None, Some(credential))?);
        Ok(Self {
            session,
            dispatcher: Arc::new(EventDispatcher::new(capacity)),
            channel: OnceLock::new(),
        })
    }

    /// Log in now and return the minted credential (e.g. to persist it).
    pub async fn login(&self) -> Result<Credential, Error> {
        self.session.login().await
    }

    /// The current credential, if one is held.
    pub async fn credential(&self) -> Option<Credential> {
        self.session.credential().await
    }

    /// Shut down the realtime channel and destroy the local credential.
    pub async fn logout(&self) {
        self.close();
        self.session.logout().await;
    }

    /// Stop the realtime channel; all subscriptions end. Request/response
    /// calls in flight complete normally.
    pub fn close(&self) {
        if let Some(channel) = self.channel.get() {
            debug!("closing realtime channel");
            channel.shutdown();
        }
    }

    // ── Account ──────────────────────────────────────────────────────

    /// Account details of the authenticated user.
    pub async fn account(&self) -> Result<Account, Error> {
        let uid = self.session.user_id().await?;
        self.session.get(self.api_url(&format!("user/{uid}"))?).await
    }

    // ── Trackers ─────────────────────────────────────────────────────

    /// All trackers on the account.
    pub async fn trackers(&self) -> Result<Vec<Tracker>, Error> {
        let uid = self.session.user_id().await?;
        self.session
            .get(self.api_url(&format!("user/{uid}/trackers"))?)
            .await
    }

    /// Full detail for one tracker.
    pub async fn tracker(&self, tracker_id: &str) -> Result<TrackerDetail, Error> {
        self.session
            .get(self.api_url(&format!("tracker/{tracker_id}"))?)
            .await
    }

    /// Hardware report (battery, mount state) for one tracker.
    pub async fn hardware_report(&self, tracker_id: &str) -> Result<HardwareReport, Error> {
        self.session
            .get(self.api_url(&format!("device_hw_report/{tracker_id}/"))?)
            .await
    }

    /// Latest position fix for one tracker.
    pub async fn position_report(&self, tracker_id: &str) -> Result<Position, Error> {
        self.session
            .get(self.api_url(&format!("device_pos_report/{tracker_id}"))?)
            .await
    }

    /// Position history segments for a time range. One inner vector per
    /// contiguous recording segment.
    pub async fn positions(
        &self,
        tracker_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Vec<Position>>, Error> {
        let mut url = self.api_url(&format!("tracker/{tracker_id}/positions"))?;
        url.query_pairs_mut()
            .append_pair("time_from", &from.timestamp().to_string())
            .append_pair("time_to", &to.timestamp().to_string())
            .append_pair("format", "json_segments");
        self.session.get(url).await
    }

    // ── Device commands ──────────────────────────────────────────────

    /// Switch the tracker's buzzer on or off.
    pub async fn set_buzzer(&self, tracker_id: &str, active: bool) -> Result<CommandResponse, Error> {
        self.command(tracker_id, "buzzer_control", active).await
    }

    /// Switch the tracker's LED on or off.
    pub async fn set_led(&self, tracker_id: &str, active: bool) -> Result<CommandResponse, Error> {
        self.command(tracker_id, "led_control", active).await
    }

    /// Enable or disable live tracking mode.
    pub async fn set_live_tracking(
        &self,
        tracker_id: &str,
        active: bool,
    ) -> Result<CommandResponse, Error> {
        self.command(tracker_id, "live_tracking", active).await
    }

    async fn command(
        &self,
        tracker_id: &str,
        command: &str,
        active: bool,
    ) -> Result<CommandResponse, Error> {
        let action = if active { "on" } else { "off" };
        self.session
            .get(self.api_url(&format!("tracker/{tracker_id}/command/{command}/{action}"))?)
            .await
    }

    // ── Trackable objects (pets) ─────────────────────────────────────

    /// All trackable objects (pets) on the account.
    pub async fn trackable_objects(&self) -> Result<Vec<TrackableObject>, Error> {
        let uid = self.session.user_id().await?;
        self.session
            .get(self.api_url(&format!("user/{uid}/trackable_objects"))?)
            .await
    }

    /// Full detail for one trackable object.
    pub async fn trackable_object(&self, object_id: &str) -> Result<TrackableObjectDetail, Error> {
        self.session
            .get(self.api_url(&format!("trackable_object/{object_id}"))?)
            .await
    }

    /// Health/activity overview for a pet, from the wellness surface.
    pub async fn health_overview(&self, pet_id: &str) -> Result<HealthOverview, Error> {
        let url = self
            .session
            .config()
            .aps_base
            .join(&format!("pet/{pet_id}/health/overview"))?;
        self.session.get(url).await
    }

    // ── Realtime events ──────────────────────────────────────────────

    /// Subscribe to all events. Starts the realtime channel if needed.
    ///
    /// The returned subscription is a lazy sequence: it survives
    /// transient reconnects and ends only on [`close`](Self::close),
    /// unsubscribe, or an unrecoverable authentication failure.
    /// Subscribing after `close` yields an already-ended subscription.
    pub fn subscribe(&self) -> Subscription {
        self.ensure_channel();
        self.dispatcher.subscribe(None)
    }

    /// Subscribe to events for a single tracker.
    pub fn subscribe_tracker(&self, tracker_id: &str) -> Subscription {
        self.ensure_channel();
        self.dispatcher.subscribe(Some(tracker_id.to_owned()))
    }

    /// Subscribe to raw traffic, including keepalive frames.
    pub fn subscribe_raw(&self) -> Subscription {
        self.ensure_channel();
        self.dispatcher.subscribe_raw()
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.dispatcher.unsubscribe(id);
    }

    /// Current realtime channel state; `Disconnected` if the channel was
    /// never started.
    pub fn channel_state(&self) -> ChannelState {
        self.channel
            .get()
            .map_or(ChannelState::Disconnected, RealtimeChannel::state)
    }

    /// Must be called from within a tokio runtime (the channel task is
    /// spawned on the current runtime).
    fn ensure_channel(&self) {
        self.channel.get_or_init(|| {
            RealtimeChannel::spawn(
                Arc::clone(&self.session),
                Arc::clone(&self.dispatcher),
                Arc::new(WsConnector) as Arc<dyn ChannelConnector>,
            )
        });
    }

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.session.config().api_base.join(path)?)
    }
}
