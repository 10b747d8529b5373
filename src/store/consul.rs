use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::{directory, KvPair, KvStore, StoreError};

/// Entry of a `GET /v1/kv/{prefix}?recurse` response
#[derive(Debug, Deserialize)]
struct ConsulEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

/// Key-value store backed by the Consul KV HTTP API
pub struct ConsulStore {
    client: reqwest::Client,
    base_url: String,
}

impl ConsulStore {
    /// `base_url` must be an absolute `http` or `https` URL of a Consul agent.
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        validate_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'))
    }
}

fn validate_base_url(base_url: &str) -> Result<(), StoreError> {
    let invalid = |reason: String| StoreError::InvalidUrl {
        url: base_url.to_string(),
        reason,
    };
    let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

fn request_error(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Http(err)
    }
}

/// Decode a recursive listing into pairs under `dir`, skipping folder placeholders.
fn decode_entries(dir: &str, body: &[u8]) -> Result<Vec<KvPair>, StoreError> {
    let entries: Vec<ConsulEntry> =
        serde_json::from_slice(body).map_err(|e| StoreError::Malformed {
            key: dir.to_string(),
            reason: e.to_string(),
        })?;

    let mut pairs = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.key == dir || !entry.key.starts_with(dir) {
            continue;
        }
        let Some(encoded) = entry.value else {
            continue;
        };
        let value = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| StoreError::Malformed {
                key: entry.key.clone(),
                reason: e.to_string(),
            })?;
        pairs.push(KvPair {
            key: entry.key,
            value,
        });
    }
    pairs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(pairs)
}

#[async_trait]
impl KvStore for ConsulStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let response = self
            .client
            .get(self.key_url(key))
            .query(&[("raw", "true")])
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await.map_err(request_error)?;
                Ok(Some(body.to_vec()))
            }
            status => Err(StoreError::Status {
                status,
                key: key.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        debug!("Consul PUT {}", key);
        let response = self
            .client
            .put(self.key_url(key))
            .body(value.to_vec())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError> {
        let dir = directory(prefix);
        let response = self
            .client
            .get(self.key_url(&dir))
            .query(&[("recurse", "true")])
            .send()
            .await
            .map_err(request_error)?;

        // Consul answers 404 for a prefix with no keys under it
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                let body = response.bytes().await.map_err(request_error)?;
                decode_entries(&dir, &body)
            }
            status => Err(StoreError::Status { status, key: dir }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        debug!("Consul DELETE {}", key);
        let response = self
            .client
            .delete(self.key_url(key))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status,
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_url() {
        let store = ConsulStore::new("http://localhost:8500/").unwrap();
        assert_eq!(
            store.key_url("telegram/chats/42"),
            "http://localhost:8500/v1/kv/telegram/chats/42"
        );
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        for url in ["localhost:8500", "127.0.0.1:8500", "", "ftp://localhost:8500"] {
            let err = ConsulStore::new(url).err().unwrap();
            assert!(matches!(err, StoreError::InvalidUrl { .. }), "{url}: {err}");
        }
        assert!(ConsulStore::new("https://consul.internal").is_ok());
    }

    #[test]
    fn test_decode_entries() {
        // "eyJpZCI6NDJ9" is base64 for {"id":42}
        let body = br#"[
            {"Key": "telegram/chats/", "Value": null, "Flags": 0},
            {"Key": "telegram/chats/42", "Value": "eyJpZCI6NDJ9", "Flags": 0},
            {"Key": "telegram/chatsx/1", "Value": "eyJpZCI6NDJ9", "Flags": 0}
        ]"#;

        let pairs = decode_entries("telegram/chats/", body).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "telegram/chats/42");
        assert_eq!(pairs[0].value, br#"{"id":42}"#.to_vec());
    }

    #[test]
    fn test_decode_entries_rejects_bad_base64() {
        let body = br#"[{"Key": "telegram/chats/1", "Value": "not base64!"}]"#;
        let err = decode_entries("telegram/chats/", body).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_unavailable() {
        // Nothing listens on port 1
        let store = ConsulStore::new("http://127.0.0.1:1").unwrap();
        let err = store.list("telegram/chats").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
