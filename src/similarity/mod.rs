//! Vehicle similarity store
//!
//! Maps vehicle descriptions and customer intent to fixed-length vectors and
//! ranks vehicles by cosine similarity. Vectors come from an injected
//! embedding provider; whenever the provider is missing, slow or broken the
//! store falls back to a deterministic pseudo-embedding so indexing stays
//! reproducible.

pub mod provider;

pub use provider::HttpEmbeddingProvider;

use crate::error::AdvisorError;
use crate::models::Vehicle;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;
const LCG_MODULUS: f64 = 4_294_967_296.0;

/// External text → vector capability
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    Provider,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub vehicle_id: Uuid,
    pub score: f32,
}

struct IndexEntry {
    vector: Vec<f32>,
    fingerprint: String,
    source: EmbeddingSource,
    price: Option<f64>,
    sequence: u64,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<Uuid, IndexEntry>,
    next_sequence: u64,
}

pub struct SimilarityStore {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dimensions: usize,
    provider_timeout: Duration,
    index: RwLock<IndexState>,
}

impl SimilarityStore {
    pub fn new(
        dimensions: usize,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            dimensions,
            provider_timeout,
            index: RwLock::new(IndexState::default()),
        }
    }

    /// Store that only ever uses the deterministic fallback
    pub fn deterministic(dimensions: usize) -> Self {
        Self::new(dimensions, None, Duration::from_secs(0))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed text through the provider, falling back to the pseudo-embedding.
    pub async fn embed(&self, text: &str) -> (Vec<f32>, EmbeddingSource) {
        let Some(provider) = self.provider.as_ref() else {
            return (pseudo_embedding(text, self.dimensions), EmbeddingSource::Fallback);
        };

        match tokio::time::timeout(self.provider_timeout, provider.embed(text)).await {
            Ok(Ok(vector)) if vector.len() == self.dimensions && vector.iter().all(|v| v.is_finite()) => {
                (vector, EmbeddingSource::Provider)
            }
            Ok(Ok(vector)) => {
                warn!(
                    provider = provider.name(),
                    expected = self.dimensions,
                    actual = vector.len(),
                    "Embedding provider returned an unusable vector, using deterministic fallback"
                );
                (pseudo_embedding(text, self.dimensions), EmbeddingSource::Fallback)
            }
            Ok(Err(error)) => {
                warn!(
                    provider = provider.name(),
                    %error,
                    "Embedding provider failed, using deterministic fallback"
                );
                (pseudo_embedding(text, self.dimensions), EmbeddingSource::Fallback)
            }
            Err(_) => {
                warn!(
                    provider = provider.name(),
                    timeout_ms = self.provider_timeout.as_millis() as u64,
                    "Embedding provider timed out, using deterministic fallback"
                );
                (pseudo_embedding(text, self.dimensions), EmbeddingSource::Fallback)
            }
        }
    }

    /// Index `text` for a vehicle. An existing entry keeps its price and its
    /// insertion position.
    pub async fn upsert_embedding(&self, vehicle_id: Uuid, text: &str) -> EmbeddingSource {
        self.upsert_inner(vehicle_id, text, None).await
    }

    /// Index a catalog vehicle by its descriptive text and record its price
    /// for tie-breaking.
    pub async fn index_vehicle(&self, vehicle: &Vehicle) -> EmbeddingSource {
        self.upsert_inner(vehicle.id, &vehicle.descriptive_text(), Some(vehicle.price))
            .await
    }

    async fn upsert_inner(&self, vehicle_id: Uuid, text: &str, price: Option<f64>) -> EmbeddingSource {
        let fingerprint = text_fingerprint(text);

        {
            let mut index = self.index.write().await;
            if let Some(entry) = index.entries.get_mut(&vehicle_id) {
                if entry.fingerprint == fingerprint && entry.source == EmbeddingSource::Provider {
                    if price.is_some() {
                        entry.price = price;
                    }
                    debug!(%vehicle_id, "Descriptive text unchanged, keeping embedding");
                    return EmbeddingSource::Provider;
                }
            }
        }

        let (vector, source) = self.embed(text).await;

        let mut index = self.index.write().await;
        let next_sequence = index.next_sequence;
        match index.entries.get_mut(&vehicle_id) {
            Some(entry) => {
                entry.vector = vector;
                entry.fingerprint = fingerprint;
                entry.source = source;
                if price.is_some() {
                    entry.price = price;
                }
            }
            None => {
                index.entries.insert(
                    vehicle_id,
                    IndexEntry {
                        vector,
                        fingerprint,
                        source,
                        price,
                        sequence: next_sequence,
                    },
                );
                index.next_sequence += 1;
            }
        }

        debug!(%vehicle_id, ?source, "Vehicle embedding indexed");
        source
    }

    pub async fn remove(&self, vehicle_id: Uuid) -> bool {
        self.index.write().await.entries.remove(&vehicle_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Top `k` vehicles by cosine similarity to `text`.
    ///
    /// Ties are broken by ascending price (unknown price last), then by
    /// insertion order.
    pub async fn query(&self, text: &str, k: usize) -> Vec<SimilarityHit> {
        if k == 0 {
            return Vec::new();
        }

        let (query_vector, _) = self.embed(text).await;
        let index = self.index.read().await;

        let mut scored: Vec<(Uuid, f32, Option<f64>, u64)> = Vec::with_capacity(index.entries.len());
        for (vehicle_id, entry) in &index.entries {
            match cosine_similarity(&query_vector, &entry.vector) {
                Ok(score) => scored.push((*vehicle_id, score, entry.price, entry.sequence)),
                Err(error) => {
                    warn!(%vehicle_id, %error, "Skipping vehicle with incompatible embedding");
                }
            }
        }
        drop(index);

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| compare_price(a.2, b.2))
                .then_with(|| a.3.cmp(&b.3))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(vehicle_id, score, _, _)| SimilarityHit { vehicle_id, score })
            .collect()
    }
}

fn compare_price(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn text_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Normalized dot product. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(AdvisorError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

/// 32-bit multiply-shift-add hash over UTF-16 code units (`h * 31 + unit`).
pub fn rolling_hash(text: &str) -> u32 {
    text.encode_utf16().fold(0_u32, |hash, unit| {
        (hash << 5).wrapping_sub(hash).wrapping_add(unit as u32)
    })
}

/// Deterministic L2-normalized vector derived only from `text`.
///
/// The rolling hash seeds an LCG (a = 1664525, c = 1013904223, m = 2^32);
/// each dimension takes the next generator state mapped into [-1, 1).
pub fn pseudo_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut state = rolling_hash(text);

    let raw: Vec<f64> = (0..dimensions)
        .map(|_| {
            state = state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
            (state as f64 / LCG_MODULUS) * 2.0 - 1.0
        })
        .collect();

    let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return raw.into_iter().map(|v| v as f32).collect();
    }

    raw.into_iter().map(|v| (v / norm) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BodyType, VehicleFeatures};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AdvisorError::ExternalService("connection refused".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0; 8])
        }
    }

    /// Fixed-width provider that counts how often it is called
    struct CountingProvider {
        calls: AtomicUsize,
        width: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let mut vector = vec![0.0; self.width];
            vector[text.len() % self.width] = 1.0;
            Ok(vector)
        }
    }

    fn test_vehicle(model: &str, price: f64) -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            brand: "Honda".to_string(),
            model: model.to_string(),
            year: 2022,
            mileage_km: 20_000,
            price,
            body_type: Some(BodyType::Suv),
            fuel: None,
            transmission: None,
            door_count: 4,
            features: VehicleFeatures::default(),
            km_per_liter: None,
            available: true,
        }
    }

    #[test]
    fn test_rolling_hash_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("abc"), 96354);
        assert_eq!(rolling_hash("X2000_TEST_MOTO 2024"), 1_545_923_199);
    }

    #[test]
    fn test_pseudo_embedding_golden_values() {
        let expected = [
            0.137_902_69_f32,
            0.791_111_93,
            -0.527_683_17,
            -0.276_902_93,
        ];
        let vector = pseudo_embedding("abc", 4);
        for (actual, expected) in vector.iter().zip(expected.iter()) {
            assert!((actual - expected).abs() < 1e-6, "{} vs {}", actual, expected);
        }

        let empty = pseudo_embedding("", 4);
        assert!((empty[0] - (-0.528_950_74)).abs() < 1e-6);
        assert!((empty[3] - 0.336_424_95).abs() < 1e-6);
    }

    #[test]
    fn test_pseudo_embedding_is_pure_and_normalized() {
        let a = pseudo_embedding("Jeep Compass 2020 suv", 1536);
        let b = pseudo_embedding("Jeep Compass 2020 suv", 1536);
        assert_eq!(a.len(), 1536);
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );

        let norm: f64 = a.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        assert_ne!(a, pseudo_embedding("Jeep Compass 2021 suv", 1536));
    }

    #[test]
    fn test_cosine_identity_and_symmetry() {
        let a = vec![0.3, -1.2, 4.0, 0.0, 2.5];
        let b = vec![1.0, 0.5, -0.25, 3.0, 0.1];

        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );

        let opposite: Vec<f32> = a.iter().map(|v| -v).collect();
        assert!((cosine_similarity(&a, &opposite).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch_and_zero() {
        let result = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
        assert!(matches!(
            result,
            Err(AdvisorError::DimensionMismatch { left: 2, right: 3 })
        ));

        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_query_same_text_ranks_first() {
        let store = SimilarityStore::deterministic(1536);
        let target = Uuid::new_v4();

        store.index_vehicle(&test_vehicle("Civic", 90_000.0)).await;
        store.index_vehicle(&test_vehicle("HR-V", 110_000.0)).await;
        store.upsert_embedding(target, "X2000_TEST_MOTO 2024").await;
        store.index_vehicle(&test_vehicle("City", 85_000.0)).await;

        let hits = store.query("X2000_TEST_MOTO 2024", 3).await;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].vehicle_id, target);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_ties_break_by_price_then_insertion_order() {
        let store = SimilarityStore::deterministic(64);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let cheaper = test_vehicle("Fit", 50_000.0);
        let pricier = test_vehicle("Fit", 70_000.0);

        store.upsert_embedding(first, "Honda Fit").await;
        store.upsert_embedding(second, "Honda Fit").await;
        // Identical descriptive text, different prices
        store.index_vehicle(&pricier).await;
        store.index_vehicle(&cheaper).await;

        let hits = store.query(&cheaper.descriptive_text(), 2).await;
        assert_eq!(hits[0].vehicle_id, cheaper.id);
        assert_eq!(hits[1].vehicle_id, pricier.id);

        let hits = store.query("Honda Fit", 2).await;
        assert_eq!(hits[0].vehicle_id, first);
        assert_eq!(hits[1].vehicle_id, second);

        // Re-upserting keeps the original insertion position
        store.upsert_embedding(first, "Honda Fit").await;
        let hits = store.query("Honda Fit", 2).await;
        assert_eq!(hits[0].vehicle_id, first);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_pseudo_embedding() {
        let store = SimilarityStore::new(32, Some(Arc::new(FailingProvider)), Duration::from_secs(1));
        let (vector, source) = store.embed("Onix LT 2021").await;
        assert_eq!(source, EmbeddingSource::Fallback);
        assert_eq!(vector, pseudo_embedding("Onix LT 2021", 32));

        let id = Uuid::new_v4();
        assert_eq!(store.upsert_embedding(id, "Onix LT 2021").await, EmbeddingSource::Fallback);
    }

    #[tokio::test]
    async fn test_provider_timeout_falls_back() {
        let store = SimilarityStore::new(8, Some(Arc::new(SlowProvider)), Duration::from_millis(20));
        let (vector, source) = store.embed("Renegade").await;
        assert_eq!(source, EmbeddingSource::Fallback);
        assert_eq!(vector, pseudo_embedding("Renegade", 8));
    }

    #[tokio::test]
    async fn test_wrong_width_from_provider_falls_back() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            width: 4,
        });
        let store = SimilarityStore::new(16, Some(provider), Duration::from_secs(1));
        let (_, source) = store.embed("Kicks").await;
        assert_eq!(source, EmbeddingSource::Fallback);
    }

    #[tokio::test]
    async fn test_unchanged_text_is_not_re_embedded() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            width: 16,
        });
        let store = SimilarityStore::new(16, Some(provider.clone()), Duration::from_secs(1));
        let mut vehicle = test_vehicle("Corolla Cross", 150_000.0);

        assert_eq!(store.index_vehicle(&vehicle).await, EmbeddingSource::Provider);
        store.index_vehicle(&vehicle).await;
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 1);

        vehicle.year = 2023;
        store.index_vehicle(&vehicle).await;
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(store.len().await, 1);
    }
}
