//! Runtime configuration
//!
//! Everything is read from the environment (after `dotenv`). Optional
//! integrations without credentials are disabled, never fatal: the
//! deterministic fallbacks cover them.

use crate::eligibility::EligibilityPolicy;
use crate::error::AdvisorError;
use crate::Result;
use chrono::{Datelike, Utc};
use std::env;
use std::str::FromStr;

const PLACEHOLDER_KEYS: &[&str] = &["your_gemini_api_key_here", "your_embedding_api_key_here", "mock_key"];

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub path: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub default_city: String,
    /// Fixed reference year for eligibility; current UTC year when unset.
    pub reference_year: Option<i32>,
    pub recommendation_limit: usize,
    pub history_window: usize,
    pub exit_keyword: String,
    pub phrase_seed: Option<u64>,
    pub classifier: ClassifierConfig,
    pub embedding: EmbeddingConfig,
    pub eligibility: EligibilityPolicy,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            default_city: "sao-paulo".to_string(),
            reference_year: None,
            recommendation_limit: 5,
            history_window: 12,
            exit_keyword: "sair".to_string(),
            phrase_seed: None,
            classifier: ClassifierConfig {
                gemini_api_key: None,
                model: "gemini-2.0-flash".to_string(),
                timeout_ms: 8_000,
            },
            embedding: EmbeddingConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                path: "/embeddings".to_string(),
                api_key: None,
                model: "text-embedding-3-small".to_string(),
                dimensions: 1536,
                timeout_ms: 5_000,
            },
            eligibility: EligibilityPolicy::default(),
        }
    }
}

impl AdvisorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = AdvisorConfig::default();

        if let Some(port) = get("PORT").or_else(|| get("API_PORT")) {
            config.port = parse_value("PORT", &port)?;
        }
        config.database_url = get("DATABASE_URL").or_else(|| get("POSTGRES_URL"));

        if let Some(city) = get("DEFAULT_CITY") {
            config.default_city = crate::eligibility::normalize_city_slug(&city);
        }
        if let Some(year) = get("REFERENCE_YEAR") {
            config.reference_year = Some(parse_value("REFERENCE_YEAR", &year)?);
        }
        if let Some(limit) = get("RECOMMENDATION_LIMIT") {
            config.recommendation_limit = parse_value("RECOMMENDATION_LIMIT", &limit)?;
        }
        if let Some(window) = get("HISTORY_WINDOW") {
            config.history_window = parse_value("HISTORY_WINDOW", &window)?;
        }
        if let Some(keyword) = get("EXIT_KEYWORD") {
            config.exit_keyword = keyword.to_lowercase();
        }
        if let Some(seed) = get("PHRASE_SEED") {
            config.phrase_seed = Some(parse_value("PHRASE_SEED", &seed)?);
        }

        config.classifier.gemini_api_key = get("GEMINI_API_KEY").filter(|k| !is_placeholder(k));
        if let Some(model) = get("GEMINI_MODEL") {
            config.classifier.model = model;
        }
        if let Some(timeout) = get("CLASSIFIER_TIMEOUT_MS") {
            config.classifier.timeout_ms = parse_value("CLASSIFIER_TIMEOUT_MS", &timeout)?;
        }

        if let Some(base) = get("EMBEDDING_API_BASE") {
            config.embedding.api_base = base.trim_end_matches('/').to_string();
        }
        config.embedding.api_key = get("EMBEDDING_API_KEY").filter(|k| !is_placeholder(k));
        if let Some(model) = get("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dimensions) = get("EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = parse_value("EMBEDDING_DIMENSIONS", &dimensions)?;
        }
        if let Some(timeout) = get("EMBEDDING_TIMEOUT_MS") {
            config.embedding.timeout_ms = parse_value("EMBEDDING_TIMEOUT_MS", &timeout)?;
        }

        if let Some(age) = get("ELIGIBILITY_X_MAX_AGE") {
            config.eligibility.x.max_age_years = parse_value("ELIGIBILITY_X_MAX_AGE", &age)?;
        }
        if let Some(age) = get("ELIGIBILITY_COMFORT_MAX_AGE") {
            config.eligibility.comfort.max_age_years =
                parse_value("ELIGIBILITY_COMFORT_MAX_AGE", &age)?;
        }
        if let Some(age) = get("ELIGIBILITY_BLACK_MAX_AGE") {
            config.eligibility.black.max_age_years = parse_value("ELIGIBILITY_BLACK_MAX_AGE", &age)?;
        }

        if config.embedding.dimensions == 0 {
            return Err(AdvisorError::Configuration(
                "EMBEDDING_DIMENSIONS must be greater than zero".to_string(),
            ));
        }
        if config.recommendation_limit == 0 {
            return Err(AdvisorError::Configuration(
                "RECOMMENDATION_LIMIT must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year.unwrap_or_else(|| Utc::now().year())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AdvisorError::Configuration(format!("{} has an invalid value: {:?}", key, raw)))
}

fn is_placeholder(key: &str) -> bool {
    PLACEHOLDER_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AdvisorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.recommendation_limit, 5);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.eligibility.black.max_age_years, 6);
        assert_eq!(config.eligibility.comfort.max_age_years, 6);
        assert_eq!(config.eligibility.x.max_age_years, 10);
        assert!(config.classifier.gemini_api_key.is_none());
        assert!(config.embedding.api_key.is_none());
    }

    #[test]
    fn test_overrides_and_placeholders() {
        let config = AdvisorConfig::from_lookup(lookup(&[
            ("API_PORT", "9090"),
            ("DEFAULT_CITY", "Belo Horizonte"),
            ("REFERENCE_YEAR", "2026"),
            ("GEMINI_API_KEY", "your_gemini_api_key_here"),
            ("EMBEDDING_API_KEY", "sk-live"),
            ("EMBEDDING_DIMENSIONS", "768"),
            ("ELIGIBILITY_BLACK_MAX_AGE", "5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.default_city, "belo-horizonte");
        assert_eq!(config.reference_year(), 2026);
        assert!(config.classifier.gemini_api_key.is_none());
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-live"));
        assert_eq!(config.embedding.dimensions, 768);
        assert_eq!(config.eligibility.black.max_age_years, 5);
    }

    #[test]
    fn test_malformed_values_are_configuration_errors() {
        let result = AdvisorConfig::from_lookup(lookup(&[("EMBEDDING_DIMENSIONS", "many")]));
        assert!(matches!(result, Err(AdvisorError::Configuration(_))));

        let result = AdvisorConfig::from_lookup(lookup(&[("EMBEDDING_DIMENSIONS", "0")]));
        assert!(matches!(result, Err(AdvisorError::Configuration(_))));
    }
}
