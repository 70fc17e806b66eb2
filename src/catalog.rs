//! Catalog service
//!
//! Keeps the vehicle repository and the similarity index in step, and
//! answers catalog browsing with per-city eligibility.

use crate::eligibility::{
    classify, classify_with_reasons, normalize_city_slug, EligibilityPolicy, EligibilityReport,
    RuleSet, RuleStore,
};
use crate::error::AdvisorError;
use crate::models::{Eligibility, EligibilityRuleRow, Vehicle};
use crate::repository::VehicleRepository;
use crate::similarity::{EmbeddingSource, SimilarityStore};
use crate::Result;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVehicle {
    pub vehicle_id: Uuid,
    pub created: bool,
    pub embedding_source: EmbeddingSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogListing {
    pub vehicle: Vehicle,
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleEligibilityReport {
    pub vehicle_id: Uuid,
    pub label: String,
    #[serde(flatten)]
    pub report: EligibilityReport,
}

pub struct CatalogService {
    repository: Arc<dyn VehicleRepository>,
    similarity: Arc<SimilarityStore>,
    rules: Arc<dyn RuleStore>,
    policy: EligibilityPolicy,
    reference_year: Option<i32>,
}

impl CatalogService {
    pub fn new(
        repository: Arc<dyn VehicleRepository>,
        similarity: Arc<SimilarityStore>,
        rules: Arc<dyn RuleStore>,
        policy: EligibilityPolicy,
        reference_year: Option<i32>,
    ) -> Self {
        Self {
            repository,
            similarity,
            rules,
            policy,
            reference_year,
        }
    }

    fn reference_year(&self) -> i32 {
        self.reference_year.unwrap_or_else(|| Utc::now().year())
    }

    /// Store the vehicle and refresh its embedding.
    pub async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<IndexedVehicle> {
        validate_vehicle(&vehicle, self.reference_year())?;

        let embedding_source = self.similarity.index_vehicle(&vehicle).await;
        let vehicle_id = vehicle.id;
        let created = self.repository.upsert(vehicle).await?.is_none();

        info!(%vehicle_id, created, source = ?embedding_source, "Vehicle indexed");

        Ok(IndexedVehicle {
            vehicle_id,
            created,
            embedding_source,
        })
    }

    pub async fn remove_vehicle(&self, vehicle_id: Uuid) -> Result<bool> {
        self.similarity.remove(vehicle_id).await;
        Ok(self.repository.remove(vehicle_id).await?.is_some())
    }

    /// Available vehicles with their eligibility in `city`. Vehicles with an
    /// unknown body type are listed, just not eligible for ride-hailing.
    pub async fn browse(&self, city: &str) -> Result<Vec<CatalogListing>> {
        let city = normalize_city_slug(city);
        let rules = RuleSet::from_rows(&self.rules.rules_for_city(&city).await?);
        let year = self.reference_year();

        Ok(self
            .repository
            .list_available()
            .await?
            .into_iter()
            .map(|vehicle| CatalogListing {
                eligibility: classify(&vehicle, &city, year, &rules, &self.policy),
                vehicle,
            })
            .collect())
    }

    /// Atomically replace a city's scraped rules.
    pub async fn replace_rules(&self, city: &str, rows: Vec<EligibilityRuleRow>) -> Result<usize> {
        let stored = self.rules.replace_city(city, rows).await?;
        info!(city = %normalize_city_slug(city), stored, "Eligibility rules replaced");
        Ok(stored)
    }

    /// Re-run classification for every vehicle in the repository.
    pub async fn recompute_eligibility(&self, city: &str) -> Result<Vec<VehicleEligibilityReport>> {
        let city = normalize_city_slug(city);
        let rules = RuleSet::from_rows(&self.rules.rules_for_city(&city).await?);
        let vehicles = self.repository.list_all().await?;

        Ok(eligibility_reports(
            &vehicles,
            &city,
            self.reference_year(),
            &rules,
            &self.policy,
        ))
    }
}

pub fn eligibility_reports(
    vehicles: &[Vehicle],
    city_slug: &str,
    reference_year: i32,
    rules: &RuleSet,
    policy: &EligibilityPolicy,
) -> Vec<VehicleEligibilityReport> {
    vehicles
        .iter()
        .map(|vehicle| VehicleEligibilityReport {
            vehicle_id: vehicle.id,
            label: vehicle.label(),
            report: classify_with_reasons(vehicle, city_slug, reference_year, rules, policy),
        })
        .collect()
}

fn validate_vehicle(vehicle: &Vehicle, reference_year: i32) -> Result<()> {
    if vehicle.brand.trim().is_empty() || vehicle.model.trim().is_empty() {
        return Err(AdvisorError::UserInput("brand and model are required".to_string()));
    }
    if !vehicle.price.is_finite() || vehicle.price < 0.0 {
        return Err(AdvisorError::UserInput(format!("invalid price {}", vehicle.price)));
    }
    if vehicle.year < 1950 || vehicle.year > reference_year + 1 {
        return Err(AdvisorError::UserInput(format!("invalid model year {}", vehicle.year)));
    }
    if vehicle.door_count == 0 {
        return Err(AdvisorError::UserInput("door count must be positive".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::InMemoryRuleStore;
    use crate::models::{BodyType, RideCategory, VehicleFeatures};
    use crate::repository::InMemoryVehicleRepository;

    fn service() -> CatalogService {
        CatalogService::new(
            Arc::new(InMemoryVehicleRepository::new()),
            Arc::new(SimilarityStore::deterministic(32)),
            Arc::new(InMemoryRuleStore::new()),
            EligibilityPolicy::default(),
            Some(2026),
        )
    }

    fn vehicle(model: &str, year: i32, body: Option<BodyType>) -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            brand: "Toyota".to_string(),
            model: model.to_string(),
            year,
            mileage_km: 10_000,
            price: 140_000.0,
            body_type: body,
            fuel: None,
            transmission: None,
            door_count: 4,
            features: VehicleFeatures {
                air_conditioning: true,
                ..Default::default()
            },
            km_per_liter: None,
            available: true,
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_creation() {
        let catalog = service();
        let corolla = vehicle("Corolla", 2022, Some(BodyType::Sedan));

        let first = catalog.upsert_vehicle(corolla.clone()).await.unwrap();
        assert!(first.created);
        assert_eq!(first.embedding_source, EmbeddingSource::Fallback);

        let second = catalog.upsert_vehicle(corolla).await.unwrap();
        assert!(!second.created);
    }

    #[tokio::test]
    async fn test_invalid_vehicle_is_user_input() {
        let catalog = service();
        let mut broken = vehicle("", 2022, Some(BodyType::Sedan));
        assert!(matches!(
            catalog.upsert_vehicle(broken.clone()).await,
            Err(AdvisorError::UserInput(_))
        ));

        broken.model = "Corolla".to_string();
        broken.year = 2031;
        assert!(matches!(
            catalog.upsert_vehicle(broken).await,
            Err(AdvisorError::UserInput(_))
        ));
    }

    #[tokio::test]
    async fn test_browse_lists_unknown_body_type_as_ineligible() {
        let catalog = service();
        let mystery = vehicle("Bandeirante", 2024, None);
        catalog.upsert_vehicle(mystery.clone()).await.unwrap();

        let listings = catalog.browse("São Paulo").await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].vehicle.id, mystery.id);
        assert!(!listings[0].eligibility.uber_x);
    }

    #[tokio::test]
    async fn test_browse_applies_city_rules() {
        let catalog = service();
        let corolla = vehicle("Corolla", 2018, Some(BodyType::Sedan));
        catalog.upsert_vehicle(corolla).await.unwrap();

        assert!(!catalog.browse("sao-paulo").await.unwrap()[0].eligibility.uber_black);

        let row = EligibilityRuleRow {
            city_slug: "sao-paulo".to_string(),
            category: RideCategory::Black,
            brand: "Toyota".to_string(),
            model: "Corolla".to_string(),
            min_year: 2018,
            source_url: "https://example.com/sp".to_string(),
            fetched_at: Utc::now(),
        };
        assert_eq!(catalog.replace_rules("sao-paulo", vec![row]).await.unwrap(), 1);

        assert!(catalog.browse("sao-paulo").await.unwrap()[0].eligibility.uber_black);
        assert!(!catalog.browse("curitiba").await.unwrap()[0].eligibility.uber_black);

        let reports = catalog.recompute_eligibility("sao-paulo").await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0]
            .report
            .checks
            .iter()
            .any(|check| check.rule_name == "black.min_year" && check.passed));
    }
}
