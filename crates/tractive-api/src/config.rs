// Client configuration
//
// All timing knobs are plain fields with illustrative defaults, none of
// them contractual constants. The endpoint defaults point at the
// production Tractive cloud.

use std::time::Duration;

use url::Url;

/// Default REST base. The trailing slash matters for `Url::join`.
pub const DEFAULT_API_BASE: &str = "https://graph.tractive.com/4/";

/// Default base for the wellness/health API surface.
pub const DEFAULT_APS_BASE: &str = "https://aps-api.tractive.com/api/1/";

/// Default realtime channel endpoint.
pub const DEFAULT_CHANNEL_URL: &str = "wss://channel.tractive.com/3/channel";

/// Client identifier the vendor apps send with every request.
pub const DEFAULT_CLIENT_ID: &str = "625e533dc3c3b41c28a669f0";

/// Exponential backoff configuration for realtime channel reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// A connection that stays open at least this long resets the
    /// attempt counter, so one old failure streak doesn't penalize a
    /// long-lived connection. Default: 30s.
    pub reset_after: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            reset_after: Duration::from_secs(30),
        }
    }
}

/// Configuration for [`TractiveClient`](crate::TractiveClient).
///
/// `ClientConfig::default()` targets the production cloud; tests point
/// `api_base` / `channel_url` at local mock servers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST endpoint base URL.
    pub api_base: Url,

    /// Wellness/health endpoint base URL.
    pub aps_base: Url,

    /// Realtime channel endpoint.
    pub channel_url: Url,

    /// Client identifier sent as `x-tractive-client` on every request.
    pub client_id: String,

    /// Per-call timeout for request/response calls. Default: 10s.
    pub request_timeout: Duration,

    /// Remaining validity below which a token is refreshed before use.
    /// Default: 60s.
    pub token_refresh_margin: Duration,

    /// Realtime channel reconnect policy.
    pub reconnect: ReconnectConfig,

    /// Maximum silence on an open channel before it is presumed dead
    /// and reconnected. Default: 45s.
    pub liveness_timeout: Duration,

    /// Bounded queue capacity per subscription. Default: 256.
    pub subscription_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base URL"),
            aps_base: Url::parse(DEFAULT_APS_BASE).expect("default APS base URL"),
            channel_url: Url::parse(DEFAULT_CHANNEL_URL).expect("default channel URL"),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            request_timeout: Duration::from_secs(10),
            token_refresh_margin: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
            liveness_timeout: Duration::from_secs(45),
            subscription_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Override the REST base endpoint (e.g. for a mock server).
    pub fn with_api_base(mut self, base: Url) -> Self {
        self.api_base = base;
        self
    }

    /// Override the realtime channel endpoint.
    pub fn with_channel_url(mut self, url: Url) -> Self {
        self.channel_url = url;
        self
    }

    /// Override the per-call request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base.as_str(), DEFAULT_API_BASE);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.liveness_timeout, Duration::from_secs(45));
    }

    #[test]
    fn join_is_relative_to_base() {
        let config = ClientConfig::default();
        let url = config.api_base.join("user/u1/trackers").expect("join");
        assert_eq!(
            url.as_str(),
            "https://graph.tractive.com/4/user/u1/trackers"
        );
    }
}
