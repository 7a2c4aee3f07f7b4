//! Best-effort feature probes against provider model-listing endpoints.
//!
//! Probes run after a connection edit has committed, outside any lock,
//! one independent task per connection with its own timeout. Results
//! are advisory cache entries; a failed or slow probe never blocks or
//! fails the edit, and a stuck probe for one connection cannot delay
//! another.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cache::ReplicaCache;
use crate::connections::ProviderKind;

const PROBE_CACHE_TTL_SECS: u64 = 300;

/// What the service hands over per connection: identity, endpoint and
/// an already-resolved bearer credential (plaintext never re-enters
/// the codec from here).
pub struct ProbeTarget {
    pub id: Uuid,
    pub base_url: String,
    pub bearer: Option<Zeroizing<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub reachable: bool,
    pub model_count: usize,
}

#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    cache: ReplicaCache,
}

impl Prober {
    pub fn new(cache: ReplicaCache, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build probe HTTP client");
        Self { client, cache }
    }

    /// Fire one detached task per target and return immediately.
    pub fn spawn_all(&self, provider: ProviderKind, targets: Vec<ProbeTarget>) {
        for target in targets {
            let prober = self.clone();
            tokio::spawn(async move {
                prober.probe_one(provider, target).await;
            });
        }
    }

    async fn probe_one(&self, provider: ProviderKind, target: ProbeTarget) {
        let url = models_url(provider, &target.base_url);
        let mut request = self.client.get(&url);
        if let Some(bearer) = &target.bearer {
            request = request.bearer_auth(bearer.as_str());
        }

        let result = match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                ProbeResult {
                    reachable: true,
                    model_count: count_models(provider, &body),
                }
            }
            Ok(resp) => {
                tracing::debug!(
                    "probe for {} connection {} got status {}",
                    provider,
                    target.id,
                    resp.status()
                );
                ProbeResult {
                    reachable: false,
                    model_count: 0,
                }
            }
            Err(e) => {
                tracing::debug!("probe for {} connection {} failed: {}", provider, target.id, e);
                ProbeResult {
                    reachable: false,
                    model_count: 0,
                }
            }
        };

        let key = probe_key(provider, target.id);
        if let Err(e) = self.cache.set(&key, &result, PROBE_CACHE_TTL_SECS).await {
            tracing::debug!("caching probe result for '{}' failed: {}", key, e);
        }
    }
}

pub fn probe_key(provider: ProviderKind, id: Uuid) -> String {
    format!("probe:{}:{}", provider, id)
}

fn models_url(provider: ProviderKind, base_url: &str) -> String {
    match provider {
        ProviderKind::Openai => format!("{}/models", base_url),
        ProviderKind::Ollama => format!("{}/api/tags", base_url),
    }
}

fn count_models(provider: ProviderKind, body: &serde_json::Value) -> usize {
    let list = match provider {
        ProviderKind::Openai => body.get("data"),
        ProviderKind::Ollama => body.get("models"),
    };
    list.and_then(|v| v.as_array()).map_or(0, |a| a.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn probe_caches_model_count_and_sends_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "gpt-a"}, {"id": "gpt-b"}]
            })))
            .mount(&server)
            .await;

        let cache = ReplicaCache::new(None);
        let prober = Prober::new(cache.clone(), Duration::from_secs(2));
        let id = Uuid::new_v4();
        prober
            .probe_one(
                ProviderKind::Openai,
                ProbeTarget {
                    id,
                    base_url: format!("{}/v1", server.uri()),
                    bearer: Some(Zeroizing::new("sk-test".to_string())),
                },
            )
            .await;

        let result: Option<ProbeResult> = cache.get(&probe_key(ProviderKind::Openai, id)).await;
        assert_eq!(
            result,
            Some(ProbeResult {
                reachable: true,
                model_count: 2
            })
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_recorded_not_raised() {
        let cache = ReplicaCache::new(None);
        let prober = Prober::new(cache.clone(), Duration::from_millis(300));
        let id = Uuid::new_v4();
        prober
            .probe_one(
                ProviderKind::Ollama,
                ProbeTarget {
                    id,
                    base_url: "http://127.0.0.1:1".to_string(),
                    bearer: None,
                },
            )
            .await;

        let result: Option<ProbeResult> = cache.get(&probe_key(ProviderKind::Ollama, id)).await;
        assert_eq!(
            result,
            Some(ProbeResult {
                reachable: false,
                model_count: 0
            })
        );
    }
}
