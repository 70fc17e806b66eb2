//! Vehicle repository
//!
//! Source of truth for catalog rows. The in-memory implementation keeps
//! vehicles in insertion order so catalog listings are stable.

use crate::models::Vehicle;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn get(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>>;
    /// Vehicles that no longer exist are simply missing from the result.
    async fn get_many(&self, vehicle_ids: &[Uuid]) -> Result<Vec<Vehicle>>;
    async fn list_available(&self) -> Result<Vec<Vehicle>>;
    async fn list_all(&self) -> Result<Vec<Vehicle>>;
    /// Returns the previous version when the vehicle already existed.
    async fn upsert(&self, vehicle: Vehicle) -> Result<Option<Vehicle>>;
    async fn remove(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>>;
}

#[derive(Default)]
struct Inventory {
    vehicles: HashMap<Uuid, Vehicle>,
    order: Vec<Uuid>,
}

/// In-memory vehicle repository for development and tests
pub struct InMemoryVehicleRepository {
    inventory: Arc<RwLock<Inventory>>,
}

impl InMemoryVehicleRepository {
    pub fn new() -> Self {
        Self {
            inventory: Arc::new(RwLock::new(Inventory::default())),
        }
    }

    pub async fn with_vehicles(vehicles: Vec<Vehicle>) -> Result<Self> {
        let repository = Self::new();
        for vehicle in vehicles {
            repository.upsert(vehicle).await?;
        }
        Ok(repository)
    }
}

impl Default for InMemoryVehicleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VehicleRepository for InMemoryVehicleRepository {
    async fn get(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>> {
        let inventory = self.inventory.read().await;
        Ok(inventory.vehicles.get(&vehicle_id).cloned())
    }

    async fn get_many(&self, vehicle_ids: &[Uuid]) -> Result<Vec<Vehicle>> {
        let inventory = self.inventory.read().await;
        Ok(vehicle_ids
            .iter()
            .filter_map(|id| inventory.vehicles.get(id).cloned())
            .collect())
    }

    async fn list_available(&self) -> Result<Vec<Vehicle>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|vehicle| vehicle.available)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Vehicle>> {
        let inventory = self.inventory.read().await;
        Ok(inventory
            .order
            .iter()
            .filter_map(|id| inventory.vehicles.get(id).cloned())
            .collect())
    }

    async fn upsert(&self, vehicle: Vehicle) -> Result<Option<Vehicle>> {
        let mut inventory = self.inventory.write().await;
        let vehicle_id = vehicle.id;
        let previous = inventory.vehicles.insert(vehicle_id, vehicle);
        if previous.is_none() {
            inventory.order.push(vehicle_id);
        }
        Ok(previous)
    }

    async fn remove(&self, vehicle_id: Uuid) -> Result<Option<Vehicle>> {
        let mut inventory = self.inventory.write().await;
        let removed = inventory.vehicles.remove(&vehicle_id);
        if removed.is_some() {
            inventory.order.retain(|id| *id != vehicle_id);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BodyType, VehicleFeatures};

    fn vehicle(model: &str, available: bool) -> Vehicle {
        Vehicle {
            id: Uuid::new_v4(),
            brand: "Chevrolet".to_string(),
            model: model.to_string(),
            year: 2021,
            mileage_km: 35_000,
            price: 75_000.0,
            body_type: Some(BodyType::Hatch),
            fuel: None,
            transmission: None,
            door_count: 4,
            features: VehicleFeatures::default(),
            km_per_liter: None,
            available,
        }
    }

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let onix = vehicle("Onix", true);
        let tracker = vehicle("Tracker", false);
        let spin = vehicle("Spin", true);
        let repo = InMemoryVehicleRepository::with_vehicles(vec![
            onix.clone(),
            tracker.clone(),
            spin.clone(),
        ])
        .await
        .unwrap();

        let all: Vec<_> = repo.list_all().await.unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(all, vec![onix.id, tracker.id, spin.id]);

        let available: Vec<_> = repo
            .list_available()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(available, vec![onix.id, spin.id]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let mut onix = vehicle("Onix", true);
        let repo = InMemoryVehicleRepository::new();

        assert!(repo.upsert(onix.clone()).await.unwrap().is_none());
        onix.price = 70_000.0;
        let previous = repo.upsert(onix.clone()).await.unwrap();
        assert_eq!(previous.map(|v| v.price), Some(75_000.0));

        assert_eq!(repo.list_all().await.unwrap().len(), 1);
        assert_eq!(repo.get(onix.id).await.unwrap().map(|v| v.price), Some(70_000.0));
    }

    #[tokio::test]
    async fn test_get_many_skips_missing_vehicles() {
        let onix = vehicle("Onix", true);
        let repo = InMemoryVehicleRepository::with_vehicles(vec![onix.clone()])
            .await
            .unwrap();

        let found = repo.get_many(&[Uuid::new_v4(), onix.id]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, onix.id);

        assert!(repo.remove(onix.id).await.unwrap().is_some());
        assert!(repo.get_many(&[onix.id]).await.unwrap().is_empty());
    }
}
