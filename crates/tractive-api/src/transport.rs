// HTTP client construction
//
// One shared reqwest::Client per TractiveClient: connection pool, per-call
// timeout, and the vendor's default headers. Authorization headers are
// attached per-request by the session manager, not here, because the
// token rotates.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

use crate::config::ClientConfig;
use crate::error::Error;

/// Build the shared `reqwest::Client` from the config.
pub(crate) fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-tractive-client",
        HeaderValue::from_str(&config.client_id)
            .map_err(|e| Error::ClientBuild(format!("invalid client id: {e}")))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("tractive-api/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .build()
        .map_err(|e| Error::ClientBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let config = ClientConfig::default();
        assert!(build_http_client(&config).is_ok());
    }

    #[test]
    fn rejects_unprintable_client_id() {
        let config = ClientConfig {
            client_id: "bad\nid".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            build_http_client(&config),
            Err(Error::ClientBuild(_))
        ));
    }
}
