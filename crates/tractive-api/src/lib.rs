// tractive-api: Async Rust client for the Tractive GPS pet tracker cloud API

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod session;
mod transport;

pub use auth::{Credential, Credentials};
pub use channel::{ChannelState, RealtimeChannel};
pub use client::TractiveClient;
pub use config::{ClientConfig, ReconnectConfig};
pub use dispatcher::{Event, EventDispatcher, EventKind, Subscription, SubscriptionId};
pub use error::{ApiErrorKind, Error};
pub use session::SessionManager;
