//! OpenAI-compatible embedding provider
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::EmbeddingConfig;
use crate::error::AdvisorError;
use crate::similarity::EmbeddingProvider;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::error;

pub struct HttpEmbeddingProvider {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    /// Fails with a configuration error when no API key is configured, so
    /// callers can fall back to deterministic embeddings.
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            AdvisorError::Configuration("EMBEDDING_API_KEY not configured".to_string())
        })?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}{}", cfg.api_base, cfg.path),
            api_key,
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
            "dimensions": self.dimensions,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdvisorError::ExternalService(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Embedding provider error response: {}", error_text);
            return Err(AdvisorError::ExternalService(format!(
                "Embedding provider returned {}",
                status
            )));
        }

        let json: Value = response.json().await?;
        parse_embedding_response(json)?
            .into_iter()
            .next()
            .ok_or_else(|| AdvisorError::ExternalService("Embedding response was empty".to_string()))
    }
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            AdvisorError::ExternalService("Embedding response is missing data array".to_string())
        })?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                AdvisorError::ExternalService("Embedding item missing embedding array".to_string())
            })?;

        let vector = embedding
            .iter()
            .map(|value| {
                value.as_f64().map(|n| n as f32).ok_or_else(|| {
                    AdvisorError::ExternalService("Embedding value must be numeric".to_string())
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;

    #[test]
    fn test_parses_embeddings_in_index_order() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 3.0] },
                { "index": 0, "embedding": [0.5, 1.5] }
            ]
        });
        let parsed = parse_embedding_response(json).unwrap();
        assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        let missing = parse_embedding_response(serde_json::json!({ "object": "list" }));
        assert!(matches!(missing, Err(AdvisorError::ExternalService(_))));

        let non_numeric = parse_embedding_response(serde_json::json!({
            "data": [{ "embedding": ["a"] }]
        }));
        assert!(non_numeric.is_err());
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let config = AdvisorConfig::default();
        let result = HttpEmbeddingProvider::new(&config.embedding);
        assert!(matches!(result, Err(AdvisorError::Configuration(_))));
    }
}
