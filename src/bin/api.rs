use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vehicle_advisor::{
    api::{start_server, ApiState},
    catalog::CatalogService,
    classifier::{GeminiClassifier, KeywordClassifier, PreferenceClassifier},
    config::AdvisorConfig,
    conversation::{ConversationEngine, EngineSettings, InMemoryConversationStore, Phrasebook},
    eligibility::store::build_rule_store,
    lead::LeadLog,
    recommend::RecommendationScorer,
    repository::{InMemoryVehicleRepository, VehicleRepository},
    similarity::{EmbeddingProvider, HttpEmbeddingProvider, SimilarityStore},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AdvisorConfig::from_env()?;

    info!("Vehicle Advisor - API Server");
    info!("Port: {}", config.port);
    info!("Default city: {}", config.default_city);

    // Embeddings
    let provider: Option<Arc<dyn EmbeddingProvider>> =
        match HttpEmbeddingProvider::new(&config.embedding) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                warn!("{}; using deterministic embeddings", e);
                None
            }
        };
    let similarity = Arc::new(SimilarityStore::new(
        config.embedding.dimensions,
        provider,
        Duration::from_millis(config.embedding.timeout_ms),
    ));

    // Classifier
    let classifier: Arc<dyn PreferenceClassifier> = match GeminiClassifier::new(&config.classifier)
    {
        Ok(gemini) => Arc::new(gemini),
        Err(e) => {
            warn!("{}; using keyword classifier", e);
            Arc::new(KeywordClassifier)
        }
    };
    info!("Classifier: {}", classifier.name());

    // Storage
    let repository: Arc<dyn VehicleRepository> = Arc::new(InMemoryVehicleRepository::new());
    let rules = build_rule_store(config.database_url.as_deref());
    info!("Rule store: {}", rules.backend_name());

    let scorer = Arc::new(RecommendationScorer::new(
        similarity.clone(),
        repository.clone(),
        config.eligibility.clone(),
    ));

    let leads = Arc::new(LeadLog::new());
    let engine = ConversationEngine::new(
        Arc::new(InMemoryConversationStore::new()),
        classifier,
        scorer,
        rules.clone(),
        leads.clone(),
        Phrasebook::new(config.phrase_seed),
        EngineSettings::from_config(&config),
    );

    let catalog = CatalogService::new(
        repository,
        similarity,
        rules,
        config.eligibility.clone(),
        config.reference_year,
    );

    let state = ApiState {
        engine: Arc::new(engine),
        catalog: Arc::new(catalog),
        leads,
        default_city: config.default_city.clone(),
    };

    info!("Advisor initialized, starting API server");

    start_server(state, config.port).await?;

    Ok(())
}
