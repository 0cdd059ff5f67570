//! Subscription configuration

use bon::Builder;
use cirrus_codec::DecodeOptions;
use smol_str::SmolStr;
use url::Url;

use crate::error::StreamError;

/// Relay used when none is configured
pub const DEFAULT_RELAY: &str = "wss://bsky.network";

/// XRPC path of the repository event stream
pub const SUBSCRIBE_REPOS_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";

/// Firehose subscription options.
///
/// - `relay`: base URL of the relay or PDS, `ws://` or `wss://`
/// - `cursor`: sequence number to replay from; live tail when absent
/// - `decode_options`: CBOR rules for frame headers, bodies and blocks
///
/// Deserializable so it can sit in an application's config file; decode
/// options are not part of the serialized form.
#[derive(Debug, Clone, PartialEq, Builder, serde::Deserialize)]
#[builder(start_fn = new)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseConfig {
    /// Relay base URL
    #[builder(into, default = SmolStr::new_static(DEFAULT_RELAY))]
    #[serde(default = "default_relay")]
    pub relay: SmolStr,
    /// Replay cursor
    #[serde(default)]
    pub cursor: Option<i64>,
    /// CBOR decoding rules
    #[builder(default)]
    #[serde(skip)]
    pub decode_options: DecodeOptions,
}

fn default_relay() -> SmolStr {
    SmolStr::new_static(DEFAULT_RELAY)
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self::new().build()
    }
}

impl FirehoseConfig {
    /// Full `subscribeRepos` URL, with the cursor as a query parameter.
    pub fn subscription_url(&self) -> Result<Url, StreamError> {
        let mut url = Url::parse(&self.relay).map_err(|e| {
            StreamError::protocol(format!("invalid relay URL {:?}: {e}", self.relay))
                .with_help("relay must be an absolute ws:// or wss:// URL")
        })?;
        let base = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{base}{SUBSCRIBE_REPOS_PATH}"));
        url.set_query(None);
        if let Some(cursor) = self.cursor {
            url.query_pairs_mut()
                .append_pair("cursor", &cursor.to_string());
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamErrorKind;

    #[test]
    fn test_default_points_at_the_network_relay() {
        let url = FirehoseConfig::default().subscription_url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos"
        );
    }

    #[test]
    fn test_cursor_becomes_a_query_parameter() {
        let config = FirehoseConfig::new()
            .relay("ws://localhost:2470/")
            .cursor(1234)
            .build();
        assert_eq!(
            config.subscription_url().unwrap().as_str(),
            "ws://localhost:2470/xrpc/com.atproto.sync.subscribeRepos?cursor=1234"
        );
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: FirehoseConfig = serde_json::from_str(r#"{"cursor": 7}"#).unwrap();
        assert_eq!(config.relay, DEFAULT_RELAY);
        assert_eq!(config.cursor, Some(7));
        assert_eq!(config.decode_options, DecodeOptions::dag_cbor());
    }

    #[test]
    fn test_rejects_relative_relay() {
        let config = FirehoseConfig::new().relay("bsky.network").build();
        let err = config.subscription_url().unwrap_err();
        assert_eq!(err.kind(), &StreamErrorKind::Protocol);
    }
}
