//! Ride-hailing eligibility rules
//!
//! Pure classification of a vehicle into ride-hailing categories and
//! use-case tags. No I/O: scraped rule rows arrive as a [`RuleSet`] built
//! from whatever the [`store::RuleStore`] holds for the city.
//!
//! Precedence for Black:
//! 1. exclusion list (substring, case-insensitive) → ineligible, stop
//! 2. static structural rule (age, doors, body, brand, air conditioning)
//! 3. a scraped row for (city, category, brand, model) replaces the age cutoff

pub mod store;

pub use store::{InMemoryRuleStore, RuleStore};

use crate::models::{
    BodyType, Eligibility, EligibilityRuleRow, FuelEconomyTier, RideCategory, Vehicle,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Models permanently barred from Black, matched as substrings.
const BLACK_EXCLUSIONS: &[&str] = &[
    "hb20s", "onix plus", "logan", "voyage", "prisma", "cobalt", "siena", "versa", "cronos",
    "yaris sedan",
];

const BLACK_BRANDS: &[&str] = &[
    "audi", "bmw", "byd", "caoa chery", "chery", "chevrolet", "citroen", "ford", "gwm", "honda",
    "hyundai", "jeep", "kia", "land rover", "lexus", "mercedes-benz", "mitsubishi", "nissan",
    "peugeot", "renault", "toyota", "volkswagen", "volvo",
];

const FAMILY_BODY_TYPES: &[BodyType] = &[BodyType::Suv, BodyType::Sedan, BodyType::Minivan];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub max_age_years: i32,
    pub min_doors: u8,
    pub body_types: Vec<BodyType>,
    /// `None` accepts every brand
    pub brands: Option<Vec<String>>,
    pub require_air_conditioning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    pub x: CategoryPolicy,
    pub comfort: CategoryPolicy,
    pub black: CategoryPolicy,
    pub black_exclusions: Vec<String>,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            x: CategoryPolicy {
                max_age_years: 10,
                min_doors: 4,
                body_types: vec![
                    BodyType::Hatch,
                    BodyType::Sedan,
                    BodyType::Suv,
                    BodyType::Minivan,
                ],
                brands: None,
                require_air_conditioning: true,
            },
            comfort: CategoryPolicy {
                max_age_years: 6,
                min_doors: 4,
                body_types: vec![BodyType::Sedan, BodyType::Suv, BodyType::Minivan],
                brands: None,
                require_air_conditioning: true,
            },
            black: CategoryPolicy {
                max_age_years: 6,
                min_doors: 4,
                body_types: vec![BodyType::Sedan, BodyType::Suv],
                brands: Some(BLACK_BRANDS.iter().map(|b| b.to_string()).collect()),
                require_air_conditioning: true,
            },
            black_exclusions: BLACK_EXCLUSIONS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl EligibilityPolicy {
    pub fn category(&self, category: RideCategory) -> &CategoryPolicy {
        match category {
            RideCategory::X => &self.x,
            RideCategory::Comfort => &self.comfort,
            RideCategory::Black => &self.black,
        }
    }

    pub fn is_black_excluded(&self, model: &str) -> bool {
        let model = normalize_key(model);
        self.black_exclusions
            .iter()
            .any(|excluded| model.contains(&normalize_key(excluded)))
    }
}

//
// ================= Rule set =================
//

type RuleKey = (String, RideCategory, String, String);

/// Scraped minimum model years indexed by (city, category, brand, model).
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    min_years: HashMap<RuleKey, (i32, DateTime<Utc>)>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Duplicate keys resolve to the most recently fetched row, then the
    /// strictest `min_year`.
    pub fn from_rows(rows: &[EligibilityRuleRow]) -> Self {
        let mut min_years: HashMap<RuleKey, (i32, DateTime<Utc>)> = HashMap::with_capacity(rows.len());

        for row in rows {
            let key = (
                normalize_city_slug(&row.city_slug),
                row.category,
                normalize_key(&row.brand),
                normalize_key(&row.model),
            );
            let candidate = (row.min_year, row.fetched_at);
            min_years
                .entry(key)
                .and_modify(|current| {
                    if (candidate.1, candidate.0) > (current.1, current.0) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        Self { min_years }
    }

    pub fn len(&self) -> usize {
        self.min_years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min_years.is_empty()
    }

    pub fn min_year(
        &self,
        city_slug: &str,
        category: RideCategory,
        brand: &str,
        model: &str,
    ) -> Option<i32> {
        let key = (
            normalize_city_slug(city_slug),
            category,
            normalize_key(brand),
            normalize_key(model),
        );
        self.min_years.get(&key).map(|(year, _)| *year)
    }
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

impl RuleCheck {
    fn new(category: &str, rule: &str, passed: bool, details: String) -> Self {
        Self {
            rule_name: format!("{}.{}", category, rule),
            passed,
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub eligibility: Eligibility,
    pub checks: Vec<RuleCheck>,
}

/// Classify a vehicle for a city. Pure; see the module docs for precedence.
pub fn classify(
    vehicle: &Vehicle,
    city_slug: &str,
    reference_year: i32,
    rules: &RuleSet,
    policy: &EligibilityPolicy,
) -> Eligibility {
    classify_with_reasons(vehicle, city_slug, reference_year, rules, policy).eligibility
}

/// Same as [`classify`], keeping every rule evaluated along the way.
pub fn classify_with_reasons(
    vehicle: &Vehicle,
    city_slug: &str,
    reference_year: i32,
    rules: &RuleSet,
    policy: &EligibilityPolicy,
) -> EligibilityReport {
    let mut checks = Vec::new();

    let uber_x = evaluate_category(
        vehicle,
        RideCategory::X,
        city_slug,
        reference_year,
        rules,
        policy,
        &mut checks,
    );
    let uber_comfort = evaluate_category(
        vehicle,
        RideCategory::Comfort,
        city_slug,
        reference_year,
        rules,
        policy,
        &mut checks,
    );

    let uber_black = if policy.is_black_excluded(&vehicle.model) {
        checks.push(RuleCheck::new(
            RideCategory::Black.as_str(),
            "exclusion_list",
            false,
            format!("{} is on the Black exclusion list", vehicle.model),
        ));
        false
    } else {
        evaluate_category(
            vehicle,
            RideCategory::Black,
            city_slug,
            reference_year,
            rules,
            policy,
            &mut checks,
        )
    };

    let family_suitable = vehicle.door_count >= 4
        && vehicle
            .body_type
            .map(|body| FAMILY_BODY_TYPES.contains(&body))
            .unwrap_or(false);

    let work_suitable = vehicle.features.air_conditioning
        && matches!(
            vehicle.fuel_economy_tier(),
            Some(FuelEconomyTier::Medium | FuelEconomyTier::High)
        );

    EligibilityReport {
        eligibility: Eligibility {
            uber_x,
            uber_comfort,
            uber_black,
            family_suitable,
            work_suitable,
        },
        checks,
    }
}

fn evaluate_category(
    vehicle: &Vehicle,
    category: RideCategory,
    city_slug: &str,
    reference_year: i32,
    rules: &RuleSet,
    policy: &EligibilityPolicy,
    checks: &mut Vec<RuleCheck>,
) -> bool {
    let name = category.as_str();
    let category_policy = policy.category(category);

    // Unknown body type fails closed
    let Some(body_type) = vehicle.body_type else {
        checks.push(RuleCheck::new(
            name,
            "body_type",
            false,
            "body type unknown".to_string(),
        ));
        return false;
    };

    let mut eligible = true;
    let mut record = |rule: &str, passed: bool, details: String| {
        eligible &= passed;
        checks.push(RuleCheck::new(name, rule, passed, details));
    };

    match rules.min_year(city_slug, category, &vehicle.brand, &vehicle.model) {
        Some(min_year) => record(
            "min_year",
            vehicle.year >= min_year,
            format!("year {} vs scraped minimum {} for {}", vehicle.year, min_year, city_slug),
        ),
        None => {
            let age = vehicle.age(reference_year);
            record(
                "max_age",
                age <= category_policy.max_age_years,
                format!("age {} vs limit {}", age, category_policy.max_age_years),
            );
        }
    }

    record(
        "doors",
        vehicle.door_count >= category_policy.min_doors,
        format!("{} doors vs minimum {}", vehicle.door_count, category_policy.min_doors),
    );

    record(
        "body_type",
        category_policy.body_types.contains(&body_type),
        format!("{:?}", body_type),
    );

    if let Some(brands) = &category_policy.brands {
        let brand = normalize_key(&vehicle.brand);
        record(
            "brand",
            brands.iter().any(|allowed| normalize_key(allowed) == brand),
            vehicle.brand.clone(),
        );
    }

    if category_policy.require_air_conditioning {
        record(
            "air_conditioning",
            vehicle.features.air_conditioning,
            if vehicle.features.air_conditioning { "present" } else { "missing" }.to_string(),
        );
    }

    eligible
}

//
// ================= Normalization =================
//

fn strip_accents(raw: &str) -> String {
    raw.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercase, accent-free, single-spaced form used for brand/model matching.
pub fn normalize_key(raw: &str) -> String {
    strip_accents(raw)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `"São Paulo"` → `"sao-paulo"`
pub fn normalize_city_slug(raw: &str) -> String {
    let lowered = strip_accents(raw).to_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
