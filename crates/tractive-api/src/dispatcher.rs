// Event dispatcher
//
// Decodes raw channel frames into typed events and fans them out to
// subscriptions in arrival order. Each subscription gets its own bounded
// queue so a slow consumer never stalls the channel's read loop or other
// subscriptions. Critical events (location/battery/geofence/error) are
// never silently dropped: a full queue closes that one subscription with
// a backpressure error instead. Keepalive-class frames are droppable and
// are only queued at all for raw subscriptions.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::Error;

/// Kind of a realtime event, derived from the frame's `message` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LocationUpdate,
    BatteryUpdate,
    GeofenceEnter,
    GeofenceExit,
    /// Protocol keepalive / handshake traffic. Only delivered to raw
    /// subscriptions, and droppable under backpressure.
    Keepalive,
    /// A frame that could not be decoded, or an unknown message type.
    /// Delivered to every subscription so decode failures are observable.
    Error,
}

impl EventKind {
    /// Critical events must never be silently dropped.
    fn is_critical(self) -> bool {
        !matches!(self, Self::Keepalive)
    }
}

/// A decoded realtime event. Immutable once constructed; fan-out clones
/// it per subscription.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Tracker the event refers to, when the frame names one.
    pub device_id: Option<String>,
    /// The frame's `message` type verbatim, e.g. `"tracker_position_update"`.
    pub message: String,
    /// Full decoded frame (or error detail for [`EventKind::Error`]).
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Why a subscription's queue was closed by the dispatcher.
#[derive(Debug, Clone)]
pub(crate) enum CloseReason {
    /// Explicit client close — the stream just ends.
    Shutdown,
    /// Terminal authentication failure on the channel.
    AuthRejected(String),
    /// The subscription's queue overflowed on a critical event.
    Backpressure,
}

struct Sink {
    id: u64,
    /// Restrict delivery to this device id (error events bypass it).
    filter: Option<String>,
    /// Raw subscriptions also receive keepalive-class traffic.
    raw: bool,
    tx: mpsc::Sender<Event>,
    closed: Arc<OnceLock<CloseReason>>,
}

struct Registry {
    sinks: Vec<Sink>,
    /// Latched by `close_all`; subscriptions made afterwards are born
    /// already ended.
    closed: Option<CloseReason>,
}

/// Fans decoded events out to registered subscriptions.
pub struct EventDispatcher {
    registry: Mutex<Registry>,
    capacity: usize,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                sinks: Vec::new(),
                closed: None,
            }),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a sink. With a filter, only events for that device id
    /// (plus error events) are delivered.
    pub fn subscribe(&self, filter: Option<String>) -> Subscription {
        self.subscribe_inner(filter, false)
    }

    /// Register a sink that also receives keepalive-class traffic.
    pub fn subscribe_raw(&self) -> Subscription {
        self.subscribe_inner(None, true)
    }

    fn subscribe_inner(&self, filter: Option<String>, raw: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let closed = Arc::new(OnceLock::new());

        let mut registry = self
            .registry
            .lock()
            .expect("subscription registry lock poisoned");
        if let Some(reason) = registry.closed.as_ref() {
            // The channel task is gone; hand out a subscription that has
            // already ended rather than one that pends forever.
            let _ = closed.set(reason.clone());
            debug!(subscription = id, "subscription requested after close");
        } else {
            registry.sinks.push(Sink {
                id,
                filter,
                raw,
                tx,
                closed: Arc::clone(&closed),
            });
            debug!(subscription = id, raw, "subscription registered");
        }

        Subscription {
            id: SubscriptionId(id),
            rx,
            closed,
            terminated: false,
        }
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self
            .registry
            .lock()
            .expect("subscription registry lock poisoned");
        registry.sinks.retain(|sink| {
            if sink.id == id.0 {
                let _ = sink.closed.set(CloseReason::Shutdown);
                false
            } else {
                true
            }
        });
    }

    /// Decode one raw text frame and deliver the resulting event.
    ///
    /// Called only from the channel's read loop, which preserves arrival
    /// order per subscription.
    pub(crate) fn dispatch(&self, frame: &str) {
        self.deliver(decode_frame(frame));
    }

    /// Close every subscription, surfacing `reason` to its consumer, and
    /// latch the registry so later subscriptions end immediately too.
    pub(crate) fn close_all(&self, reason: &CloseReason) {
        let mut registry = self
            .registry
            .lock()
            .expect("subscription registry lock poisoned");
        if registry.closed.is_none() {
            registry.closed = Some(reason.clone());
        }
        for sink in registry.sinks.drain(..) {
            let _ = sink.closed.set(reason.clone());
        }
    }

    fn deliver(&self, event: Event) {
        let mut registry = self
            .registry
            .lock()
            .expect("subscription registry lock poisoned");

        registry.sinks.retain(|sink| {
            // Keepalive traffic only reaches raw subscriptions.
            if event.kind == EventKind::Keepalive && !sink.raw {
                return true;
            }
            // Error events bypass the device filter so every consumer
            // can observe decode failures.
            if event.kind != EventKind::Error {
                if let Some(filter) = &sink.filter {
                    if event.device_id.as_deref() != Some(filter.as_str()) {
                        return true;
                    }
                }
            }

            match sink.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    if event.kind.is_critical() {
                        warn!(
                            subscription = sink.id,
                            "subscription queue full on critical event, closing it"
                        );
                        let _ = sink.closed.set(CloseReason::Backpressure);
                        false
                    } else {
                        // Keepalives carry no payload; dropping one on a
                        // full raw queue loses nothing.
                        true
                    }
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

// ── Frame decoding ──────────────────────────────────────────────────

fn kind_for_message(message: &str) -> Option<EventKind> {
    match message {
        "tracker_position_update" | "position_update" => Some(EventKind::LocationUpdate),
        "tracker_status" | "battery_status" => Some(EventKind::BatteryUpdate),
        "geofence_enter" => Some(EventKind::GeofenceEnter),
        "geofence_exit" => Some(EventKind::GeofenceExit),
        "keep-alive" | "handshake" => Some(EventKind::Keepalive),
        _ => None,
    }
}

/// Decode one frame. Malformed or unknown frames become an error-kind
/// event rather than being dropped silently.
fn decode_frame(frame: &str) -> Event {
    let received_at = Utc::now();

    let value: serde_json::Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "malformed channel frame");
            return Event {
                kind: EventKind::Error,
                device_id: None,
                message: String::new(),
                payload: serde_json::json!({ "error": e.to_string(), "raw": frame }),
                received_at,
            };
        }
    };

    let device_id = value
        .get("tracker_id")
        .or_else(|| value.get("device_id"))
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let Some(message) = value.get("message").and_then(serde_json::Value::as_str) else {
        debug!("channel frame without message type");
        return Event {
            kind: EventKind::Error,
            device_id,
            message: String::new(),
            payload: serde_json::json!({ "error": "frame has no message type", "raw": value }),
            received_at,
        };
    };
    let message = message.to_owned();

    match kind_for_message(&message) {
        Some(kind) => Event {
            kind,
            device_id,
            message,
            payload: value,
            received_at,
        },
        None => {
            debug!(message, "unknown channel message type");
            Event {
                kind: EventKind::Error,
                device_id,
                message,
                payload: serde_json::json!({ "error": "unknown message type", "raw": value }),
                received_at,
            }
        }
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// Consumer end of a subscription.
///
/// A lazy sequence of events: it survives transient channel reconnects
/// and ends only on explicit close, unsubscribe, terminal auth failure,
/// or backpressure close. Also implements [`futures_core::Stream`] with
/// `Item = Result<Event, Error>`.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Event>,
    closed: Arc<OnceLock<CloseReason>>,
    terminated: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event.
    ///
    /// `Ok(None)` means the subscription ended cleanly (close or
    /// unsubscribe). Terminal failures surface once as `Err`, after any
    /// already-queued events have been drained.
    pub async fn recv(&mut self) -> Result<Option<Event>, Error> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => self.close_result(),
        }
    }

    fn close_result(&mut self) -> Result<Option<Event>, Error> {
        if self.terminated {
            return Ok(None);
        }
        self.terminated = true;
        match self.closed.get() {
            Some(CloseReason::AuthRejected(message)) => Err(Error::Authentication {
                message: message.clone(),
            }),
            Some(CloseReason::Backpressure) => Err(Error::Backpressure {
                subscription_id: self.id.0,
            }),
            Some(CloseReason::Shutdown) | None => Ok(None),
        }
    }
}

impl futures_core::Stream for Subscription {
    type Item = Result<Event, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => match this.close_result() {
                Ok(_) => Poll::Ready(None),
                Err(e) => Poll::Ready(Some(Err(e))),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("terminated", &self.terminated)
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
