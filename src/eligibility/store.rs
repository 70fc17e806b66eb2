//! Scraped eligibility rule storage
//!
//! Rows are replaced per city as a whole: readers see either the previous
//! snapshot or the new one, never a mix.

use super::normalize_city_slug;
use crate::error::AdvisorError;
use crate::models::{EligibilityRuleRow, RideCategory};
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

#[async_trait]
pub trait RuleStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Atomically replace every row for `city_slug`. An empty batch clears
    /// the city. Returns the number of rows stored.
    async fn replace_city(&self, city_slug: &str, rows: Vec<EligibilityRuleRow>) -> Result<usize>;

    async fn rules_for_city(&self, city_slug: &str) -> Result<Arc<Vec<EligibilityRuleRow>>>;
}

/// Reject the whole batch when any row belongs to another city or lacks a
/// brand or model.
pub fn validate_rows(city_slug: &str, rows: &[EligibilityRuleRow]) -> Result<String> {
    let city = normalize_city_slug(city_slug);
    if city.is_empty() {
        return Err(AdvisorError::InvalidRuleSet("city slug is empty".to_string()));
    }

    for (position, row) in rows.iter().enumerate() {
        if normalize_city_slug(&row.city_slug) != city {
            return Err(AdvisorError::InvalidRuleSet(format!(
                "row {} belongs to {:?}, expected {:?}",
                position, row.city_slug, city
            )));
        }
        if row.brand.trim().is_empty() || row.model.trim().is_empty() {
            return Err(AdvisorError::InvalidRuleSet(format!(
                "row {} has an empty brand or model",
                position
            )));
        }
    }

    Ok(city)
}

//
// ================= In-memory =================
//

#[derive(Default)]
pub struct InMemoryRuleStore {
    snapshots: RwLock<HashMap<String, Arc<Vec<EligibilityRuleRow>>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    fn backend_name(&self) -> &'static str {
        "in-memory"
    }

    async fn replace_city(&self, city_slug: &str, rows: Vec<EligibilityRuleRow>) -> Result<usize> {
        let city = validate_rows(city_slug, &rows)?;
        let count = rows.len();

        let mut snapshots = self.snapshots.write().await;
        if rows.is_empty() {
            snapshots.remove(&city);
        } else {
            snapshots.insert(city, Arc::new(rows));
        }

        Ok(count)
    }

    async fn rules_for_city(&self, city_slug: &str) -> Result<Arc<Vec<EligibilityRuleRow>>> {
        let city = normalize_city_slug(city_slug);
        Ok(self
            .snapshots
            .read()
            .await
            .get(&city)
            .cloned()
            .unwrap_or_default())
    }
}

//
// ================= Postgres =================
//

pub struct PostgresRuleStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresRuleStore {
    /// Lazily connecting pool; nothing touches the database until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS eligibility_rules (
                      city_slug TEXT NOT NULL,
                      category TEXT NOT NULL,
                      brand TEXT NOT NULL,
                      model TEXT NOT NULL,
                      min_year INTEGER NOT NULL,
                      source_url TEXT NOT NULL,
                      fetched_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_eligibility_rules_city
                    ON eligibility_rules (city_slug);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AdvisorError::Database(format!("Failed to initialize eligibility rule schema: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl RuleStore for PostgresRuleStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn replace_city(&self, city_slug: &str, rows: Vec<EligibilityRuleRow>) -> Result<usize> {
        let city = validate_rows(city_slug, &rows)?;
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM eligibility_rules WHERE city_slug = $1")
            .bind(&city)
            .execute(&mut *tx)
            .await?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO eligibility_rules
                  (city_slug, category, brand, model, min_year, source_url, fetched_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&city)
            .bind(row.category.as_str())
            .bind(row.brand.trim())
            .bind(row.model.trim())
            .bind(row.min_year)
            .bind(&row.source_url)
            .bind(row.fetched_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(rows.len())
    }

    async fn rules_for_city(&self, city_slug: &str) -> Result<Arc<Vec<EligibilityRuleRow>>> {
        self.ensure_schema().await?;
        let city = normalize_city_slug(city_slug);

        let records = sqlx::query(
            r#"
            SELECT city_slug, category, brand, model, min_year, source_url, fetched_at
            FROM eligibility_rules
            WHERE city_slug = $1
            "#,
        )
        .bind(&city)
        .fetch_all(&self.pool)
        .await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let category: String = record.try_get("category")?;
            let Some(category) = RideCategory::parse(&category) else {
                warn!(city = %city, category = %category, "Skipping rule row with unknown category");
                continue;
            };

            rows.push(EligibilityRuleRow {
                city_slug: record.try_get("city_slug")?,
                category,
                brand: record.try_get("brand")?,
                model: record.try_get("model")?,
                min_year: record.try_get("min_year")?,
                source_url: record.try_get("source_url")?,
                fetched_at: record.try_get("fetched_at")?,
            });
        }

        Ok(Arc::new(rows))
    }
}

/// Postgres when a database URL is configured and the pool can be built,
/// in-memory otherwise.
pub fn build_rule_store(database_url: Option<&str>) -> Arc<dyn RuleStore> {
    if let Some(url) = database_url {
        match PostgresRuleStore::connect_lazy(url) {
            Ok(store) => {
                info!("Eligibility rule backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres rule backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Eligibility rule backend: in-memory");
    Arc::new(InMemoryRuleStore::new())
}

/// Postgres only. Refreshes from a one-shot process must outlive it, so an
/// in-memory fallback is an error here.
pub fn durable_rule_store(database_url: Option<&str>) -> Result<Arc<dyn RuleStore>> {
    let url = database_url.ok_or_else(|| {
        AdvisorError::Configuration("refresh-rules requires DATABASE_URL".to_string())
    })?;
    Ok(Arc::new(PostgresRuleStore::connect_lazy(url)?))
}

/// Replace a city's rows in the durable store.
pub async fn refresh_city_rules(
    database_url: Option<&str>,
    city_slug: &str,
    rows: Vec<EligibilityRuleRow>,
) -> Result<usize> {
    let store = durable_rule_store(database_url)?;
    let stored = store.replace_city(city_slug, rows).await?;
    info!(
        city = %normalize_city_slug(city_slug),
        stored,
        backend = store.backend_name(),
        "Eligibility rules refreshed"
    );
    Ok(stored)
}
