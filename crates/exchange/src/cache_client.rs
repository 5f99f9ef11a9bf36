//! Client contract for the external creative cache.
//!
//! Winning bids (and VAST creatives) are written in one batched put; the
//! cache answers with one opaque id per entry which ends up in the
//! `hb_cache_id`/`hb_uuid` targeting keys. Failures are strictly non-fatal:
//! a missing id just means the corresponding key is not emitted.

use {
    serde::{Deserialize, Serialize},
    std::time::Duration,
    url::Url,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Json,
    Xml,
}

#[derive(Clone, Debug, Serialize)]
pub struct Cacheable {
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    pub value: serde_json::Value,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CacheClient: Send + Sync {
    /// Stores all values, returning ids positionally. An entry that could
    /// not be stored yields `None` in its slot.
    async fn put_many(&self, values: Vec<Cacheable>) -> Vec<Option<String>>;
}

/// HTTP implementation talking to a prebid-cache style endpoint.
pub struct HttpCacheClient {
    client: reqwest::Client,
    endpoint: Url,
    /// How long one batched put is expected to take; doubles as the request
    /// timeout so a slow cache cannot stall response assembly.
    expected_time: Duration,
}

#[derive(Serialize)]
struct PutRequest {
    puts: Vec<Cacheable>,
}

#[derive(Deserialize)]
struct PutResponse {
    responses: Vec<PutResponseObject>,
}

#[derive(Deserialize)]
struct PutResponseObject {
    uuid: String,
}

impl HttpCacheClient {
    pub fn new(client: reqwest::Client, endpoint: Url, expected_time: Duration) -> Self {
        Self {
            client,
            endpoint,
            expected_time,
        }
    }
}

#[async_trait::async_trait]
impl CacheClient for HttpCacheClient {
    async fn put_many(&self, values: Vec<Cacheable>) -> Vec<Option<String>> {
        let count = values.len();
        if count == 0 {
            return Vec::new();
        }
        let result = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.expected_time)
            .json(&PutRequest { puts: values })
            .send()
            .await;
        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "creative cache rejected put");
                return vec![None; count];
            }
            Err(err) => {
                tracing::warn!(?err, "creative cache unreachable");
                return vec![None; count];
            }
        };
        match response.json::<PutResponse>().await {
            Ok(put) if put.responses.len() == count => {
                put.responses.into_iter().map(|r| Some(r.uuid)).collect()
            }
            Ok(put) => {
                tracing::warn!(
                    expected = count,
                    got = put.responses.len(),
                    "creative cache returned wrong number of ids"
                );
                vec![None; count]
            }
            Err(err) => {
                tracing::warn!(?err, "unparseable creative cache response");
                vec![None; count]
            }
        }
    }
}

/// Used when no cache endpoint is configured; requests that ask for caching
/// degrade to responses without cache keys.
pub struct NullCacheClient;

#[async_trait::async_trait]
impl CacheClient for NullCacheClient {
    async fn put_many(&self, values: Vec<Cacheable>) -> Vec<Option<String>> {
        vec![None; values.len()]
    }
}
