//! Best-effort forwarding of observed feed items to the external real-time
//! distribution service.
//!
//! Each batch of newly observed items is serialized twice, as Atom and as
//! JSON HTTP-response envelopes, and pushed to a channel derived from the
//! session's connection identity and the topic path. Delivery is
//! fire-and-forget: the stanza-processing path never waits on the HTTP
//! response, and failures are only logged.

use crate::feed::FeedEntry;
use crate::wire::Jid;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Separator every path component is normalized to in channel names.
pub const CHANNEL_SEPARATOR: char = '-';

const TOKEN_LIFETIME_SECS: i64 = 3600;

/// One item ready for emission, with its causal-chain metadata resolved.
#[derive(Debug, Clone)]
pub struct Emission {
    pub id: String,
    pub prev_id: Option<String>,
    pub entry: FeedEntry,
}

/// Pushes item batches to the distribution service's publish endpoint.
pub struct Forwarder {
    http: reqwest::Client,
    base_url: String,
    realm: String,
    key: EncodingKey,
    published: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Serialize)]
struct PublishBody {
    items: Vec<PublishItem>,
}

#[derive(Debug, Serialize)]
struct PublishItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "prev-id", skip_serializing_if = "Option::is_none")]
    prev_id: Option<String>,
    #[serde(rename = "http-response")]
    http_response: HttpResponseEnvelope,
}

#[derive(Debug, Serialize)]
struct HttpResponseEnvelope {
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    exp: i64,
    iss: String,
}

impl Forwarder {
    pub fn new(base_url: impl Into<String>, realm: impl Into<String>, key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            realm: realm.into(),
            key: EncodingKey::from_secret(key.as_bytes()),
            published: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Emitted item id: entry id plus the update timestamp truncated to
    /// whole seconds.
    pub fn item_id(entry: &FeedEntry) -> String {
        format!("{}_{}", entry.id, entry.updated.timestamp())
    }

    /// Channel stem for a topic: connection identity joined with the topic
    /// path, every path separator normalized to [`CHANNEL_SEPARATOR`]. The
    /// format-discriminating suffix is appended per emission.
    pub fn channel_base(jid: &Jid, node: &str) -> String {
        format!("{}/{}", jid.bare(), node).replace('/', &CHANNEL_SEPARATOR.to_string())
    }

    /// Queue a batch for both output formats. Returns immediately; delivery
    /// happens on detached tasks.
    pub fn publish(self: &Arc<Self>, jid: &Jid, node: &str, emissions: &[Emission]) {
        if emissions.is_empty() {
            return;
        }
        let base = Self::channel_base(jid, node);
        let atom_items = emissions.iter().map(PublishItem::atom).collect();
        let json_items = emissions.iter().map(PublishItem::json).collect();
        self.spawn_post(format!("{base}-atom"), atom_items);
        self.spawn_post(format!("{base}-json"), json_items);
    }

    /// Count of successful channel publishes.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Count of failed channel publishes.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Short-lived signed assertion for the publish call: expires an hour
    /// out, issued by the configured realm.
    pub fn bearer_token(&self) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = TokenClaims {
            exp: Utc::now().timestamp() + TOKEN_LIFETIME_SECS,
            iss: self.realm.clone(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.key)
    }

    fn spawn_post(self: &Arc<Self>, channel: String, items: Vec<PublishItem>) {
        let forwarder = self.clone();
        tokio::spawn(async move {
            match forwarder.post_channel(&channel, items).await {
                Ok(()) => {
                    forwarder.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    forwarder.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%channel, "fan-out delivery failed: {err:#}");
                }
            }
        });
    }

    async fn post_channel(&self, channel: &str, items: Vec<PublishItem>) -> anyhow::Result<()> {
        let url = format!(
            "{}/realm/{}/publish/{}",
            self.base_url.trim_end_matches('/'),
            self.realm,
            channel
        );
        let token = self.bearer_token()?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&PublishBody { items })
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("distribution service answered {}", response.status());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("base_url", &self.base_url)
            .field("realm", &self.realm)
            .finish()
    }
}

impl PublishItem {
    fn atom(emission: &Emission) -> PublishItem {
        PublishItem {
            id: Some(emission.id.clone()),
            prev_id: emission.prev_id.clone(),
            http_response: HttpResponseEnvelope {
                headers: content_type("application/atom+xml"),
                body: emission.entry.to_atom(),
            },
        }
    }

    fn json(emission: &Emission) -> PublishItem {
        PublishItem {
            id: Some(emission.id.clone()),
            prev_id: emission.prev_id.clone(),
            http_response: HttpResponseEnvelope {
                headers: content_type("application/json"),
                body: serde_json::to_string(&emission.entry).unwrap_or_default(),
            },
        }
    }
}

fn content_type(value: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), value.to_string());
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jsonwebtoken::{DecodingKey, Validation};

    fn entry(id: &str, secs: i64) -> FeedEntry {
        FeedEntry::new(id, "content", Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn channel_name_normalizes_every_path_separator() {
        let jid: Jid = "alice@example.org/web".parse().unwrap();
        let base = Forwarder::channel_base(&jid, "user@example.org/posts");
        assert_eq!(base, "alice@example.org-user@example.org-posts");
    }

    #[test]
    fn item_id_truncates_the_update_timestamp_to_seconds() {
        let e = entry("urn:e:1", 1_700_000_000);
        assert_eq!(Forwarder::item_id(&e), "urn:e:1_1700000000");
    }

    #[test]
    fn bearer_token_claims_carry_expiry_and_realm() {
        let forwarder = Arc::new(Forwarder::new("http://127.0.0.1:1", "demo", "secret"));
        let token = forwarder.bearer_token().unwrap();

        let mut validation = Validation::default();
        validation.set_issuer(&["demo"]);
        let decoded = jsonwebtoken::decode::<TokenClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iss, "demo");
        let now = Utc::now().timestamp();
        assert!(decoded.claims.exp > now + TOKEN_LIFETIME_SECS - 60);
        assert!(decoded.claims.exp <= now + TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn publish_items_serialize_with_wire_field_names() {
        let emission = Emission {
            id: "e_1".into(),
            prev_id: Some("e_0".into()),
            entry: entry("e", 100),
        };
        let value = serde_json::to_value(PublishItem::json(&emission)).unwrap();
        assert_eq!(value["id"], "e_1");
        assert_eq!(value["prev-id"], "e_0");
        assert_eq!(value["http-response"]["headers"]["Content-Type"], "application/json");
        assert!(value["http-response"]["body"].as_str().unwrap().contains("\"id\":\"e\""));

        let first = serde_json::to_value(PublishItem::atom(&Emission {
            prev_id: None,
            ..emission
        }))
        .unwrap();
        assert!(first.get("prev-id").is_none());
        assert!(first["http-response"]["body"]
            .as_str()
            .unwrap()
            .starts_with("<entry"));
    }
}
