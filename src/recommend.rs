//! Recommendation scorer
//!
//! Combines similarity-store hits with hard eligibility filters and soft
//! constraint fit into a single ranked candidate list.

use crate::eligibility::{classify, normalize_key, EligibilityPolicy, RuleSet};
use crate::error::AdvisorError;
use crate::models::{CustomerProfile, RecommendationCandidate, Vehicle};
use crate::repository::VehicleRepository;
use crate::similarity::SimilarityStore;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const RECENCY_HORIZON_YEARS: f64 = 15.0;

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub budget: f64,
    pub body_type: f64,
    pub model: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            budget: 0.2,
            body_type: 0.1,
            model: 0.1,
            recency: 0.1,
        }
    }
}

pub struct RecommendationScorer {
    similarity: Arc<SimilarityStore>,
    repository: Arc<dyn VehicleRepository>,
    policy: EligibilityPolicy,
    weights: ScoreWeights,
}

impl RecommendationScorer {
    pub fn new(
        similarity: Arc<SimilarityStore>,
        repository: Arc<dyn VehicleRepository>,
        policy: EligibilityPolicy,
    ) -> Self {
        Self {
            similarity,
            repository,
            policy,
            weights: ScoreWeights::default(),
        }
    }

    /// Rank catalog vehicles for a profile.
    ///
    /// Vehicles failing the category the profile's usage requires are
    /// dropped, as are unavailable vehicles and similarity hits whose
    /// vehicle no longer exists.
    pub async fn rank(
        &self,
        profile: &CustomerProfile,
        intent: &str,
        city_slug: &str,
        reference_year: i32,
        rules: &RuleSet,
        limit: usize,
    ) -> Result<Vec<RecommendationCandidate>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Every indexed vehicle is scored; hard filters run after retrieval.
        let pool = self.similarity.len().await;
        let hits = self.similarity.query(intent, pool).await;

        let mut seen = HashSet::with_capacity(hits.len());
        let hits: Vec<_> = hits
            .into_iter()
            .filter(|hit| seen.insert(hit.vehicle_id))
            .collect();

        let ids: Vec<Uuid> = hits.iter().map(|hit| hit.vehicle_id).collect();
        let vehicles: HashMap<Uuid, Vehicle> = self
            .repository
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|vehicle| (vehicle.id, vehicle))
            .collect();

        let required_tag = profile.usage.and_then(|usage| usage.required_tag());
        let mut candidates = Vec::new();

        for hit in hits {
            let Some(vehicle) = vehicles.get(&hit.vehicle_id) else {
                let error = AdvisorError::DataIntegrity(format!(
                    "indexed vehicle {} is missing from the repository",
                    hit.vehicle_id
                ));
                warn!(vehicle_id = %hit.vehicle_id, %error, "Dropping recommendation candidate");
                continue;
            };

            if !vehicle.available {
                debug!(vehicle_id = %vehicle.id, "Skipping unavailable vehicle");
                continue;
            }

            let eligibility = classify(vehicle, city_slug, reference_year, rules, &self.policy);
            if let Some(tag) = required_tag {
                if !eligibility.has(tag) {
                    continue;
                }
            }

            candidates.push(RecommendationCandidate {
                vehicle_id: vehicle.id,
                similarity_score: hit.score,
                eligibility_tags: eligibility.tags(),
                composite_score: composite_score(
                    hit.score,
                    vehicle,
                    profile,
                    reference_year,
                    &self.weights,
                ),
                label: vehicle.label(),
                price: vehicle.price,
            });
        }

        candidates.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then_with(|| a.price.total_cmp(&b.price))
        });
        candidates.truncate(limit);

        debug!(
            count = candidates.len(),
            required = ?required_tag,
            "Recommendations ranked"
        );

        Ok(candidates)
    }
}

/// Weighted blend of similarity and constraint fit, in [0, 1] for weights
/// summing to 1.
pub fn composite_score(
    similarity: f32,
    vehicle: &Vehicle,
    profile: &CustomerProfile,
    reference_year: i32,
    weights: &ScoreWeights,
) -> f64 {
    let similarity_fit = ((similarity as f64 + 1.0) / 2.0).clamp(0.0, 1.0);

    weights.similarity * similarity_fit
        + weights.budget * budget_fit(profile.budget, vehicle.price)
        + weights.body_type * body_type_fit(profile, vehicle)
        + weights.model * model_fit(profile, vehicle)
        + weights.recency * recency_fit(vehicle, reference_year)
}

/// Under budget decays gently with distance; over budget drops to zero at
/// 50% above.
fn budget_fit(budget: Option<f64>, price: f64) -> f64 {
    match budget {
        Some(budget) if budget > 0.0 => {
            if price <= budget {
                1.0 - 0.5 * (budget - price) / budget
            } else {
                (1.0 - 2.0 * (price - budget) / budget).max(0.0)
            }
        }
        _ => 0.5,
    }
}

fn body_type_fit(profile: &CustomerProfile, vehicle: &Vehicle) -> f64 {
    match (profile.body_type, vehicle.body_type) {
        (None, _) => 0.5,
        (Some(wanted), Some(actual)) if wanted == actual => 1.0,
        _ => 0.0,
    }
}

fn model_fit(profile: &CustomerProfile, vehicle: &Vehicle) -> f64 {
    let Some(preferred) = profile.preferred_model.as_deref() else {
        return 0.5;
    };

    let preferred = normalize_key(preferred);
    let model = normalize_key(&vehicle.model);
    let name = normalize_key(&format!("{} {}", vehicle.brand, vehicle.model));

    let matches = !preferred.is_empty()
        && (name.contains(&preferred) || (!model.is_empty() && preferred.contains(&model)));
    if matches {
        1.0
    } else {
        0.0
    }
}

fn recency_fit(vehicle: &Vehicle, reference_year: i32) -> f64 {
    let age = vehicle.age(reference_year).max(0) as f64;
    (1.0 - age / RECENCY_HORIZON_YEARS).clamp(0.0, 1.0)
}
