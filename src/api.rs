//! REST API for the vehicle advisor
//!
//! Messaging channels post customer turns to `/api/chat`; the catalog and
//! rule endpoints are for the dealership's back office.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::CatalogService;
use crate::conversation::ConversationEngine;
use crate::error::AdvisorError;
use crate::lead::LeadLog;
use crate::models::{EligibilityRuleRow, InboundMessage, Vehicle};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub city: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiReply = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiReply {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(error: AdvisorError) -> ApiReply {
    let status = match &error {
        AdvisorError::UserInput(_) | AdvisorError::InvalidRuleSet(_) => StatusCode::BAD_REQUEST,
        AdvisorError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        AdvisorError::ExternalService(_) | AdvisorError::Database(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %error, "Request failed");
    }
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ConversationEngine>,
    pub catalog: Arc<CatalogService>,
    pub leads: Arc<LeadLog>,
    pub default_city: String,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Conversation Endpoints
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(inbound): Json<InboundMessage>,
) -> ApiReply {
    match state.engine.handle_turn(inbound).await {
        Ok(outcome) => ok(outcome),
        Err(e) => failure(e),
    }
}

async fn get_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiReply {
    match state.engine.load_conversation(conversation_id).await {
        Ok(Some(conversation)) => ok(conversation),
        Ok(None) => failure(AdvisorError::ConversationNotFound(conversation_id)),
        Err(e) => failure(e),
    }
}

async fn delete_conversation(
    State(state): State<ApiState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiReply {
    match state.engine.delete_conversation(conversation_id).await {
        Ok(true) => ok(serde_json::json!({ "deleted": conversation_id })),
        Ok(false) => failure(AdvisorError::ConversationNotFound(conversation_id)),
        Err(e) => failure(e),
    }
}

/// Handoff leads raised in a conversation, oldest first
async fn conversation_leads(
    State(state): State<ApiState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiReply {
    ok(state.leads.list_for_conversation(conversation_id).await)
}

/// =============================
/// Catalog Endpoints
/// =============================

async fn upsert_vehicle(State(state): State<ApiState>, Json(vehicle): Json<Vehicle>) -> ApiReply {
    match state.catalog.upsert_vehicle(vehicle).await {
        Ok(indexed) => ok(indexed),
        Err(e) => failure(e),
    }
}

async fn list_vehicles(
    State(state): State<ApiState>,
    Query(query): Query<CatalogQuery>,
) -> ApiReply {
    let city = query.city.unwrap_or_else(|| state.default_city.clone());
    match state.catalog.browse(&city).await {
        Ok(listings) => ok(listings),
        Err(e) => failure(e),
    }
}

async fn remove_vehicle(State(state): State<ApiState>, Path(vehicle_id): Path<Uuid>) -> ApiReply {
    match state.catalog.remove_vehicle(vehicle_id).await {
        Ok(removed) => ok(serde_json::json!({ "removed": removed })),
        Err(e) => failure(e),
    }
}

async fn replace_rules(
    State(state): State<ApiState>,
    Path(city): Path<String>,
    Json(rows): Json<Vec<EligibilityRuleRow>>,
) -> ApiReply {
    match state.catalog.replace_rules(&city, rows).await {
        Ok(stored) => ok(serde_json::json!({ "city": city, "stored": stored })),
        Err(e) => failure(e),
    }
}

async fn eligibility_report(
    State(state): State<ApiState>,
    Path(city): Path<String>,
) -> ApiReply {
    match state.catalog.recompute_eligibility(&city).await {
        Ok(reports) => ok(reports),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/:id/leads", get(conversation_leads))
        .route("/api/vehicles", post(upsert_vehicle).get(list_vehicles))
        .route("/api/vehicles/:id", delete(remove_vehicle))
        .route("/api/rules/:city", put(replace_rules))
        .route("/api/eligibility/:city", get(eligibility_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use crate::conversation::{EngineSettings, InMemoryConversationStore, Phrasebook};
    use crate::eligibility::{EligibilityPolicy, InMemoryRuleStore, RuleStore};
    use crate::recommend::RecommendationScorer;
    use crate::repository::{InMemoryVehicleRepository, VehicleRepository};
    use crate::similarity::SimilarityStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn state() -> ApiState {
        let similarity = Arc::new(SimilarityStore::deterministic(32));
        let repository: Arc<dyn VehicleRepository> = Arc::new(InMemoryVehicleRepository::new());
        let rules: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
        let policy = EligibilityPolicy::default();

        let scorer = Arc::new(RecommendationScorer::new(
            similarity.clone(),
            repository.clone(),
            policy.clone(),
        ));
        let leads = Arc::new(LeadLog::new());
        let engine = ConversationEngine::new(
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(KeywordClassifier),
            scorer,
            rules.clone(),
            leads.clone(),
            Phrasebook::new(Some(11)),
            EngineSettings::default(),
        );
        let catalog = CatalogService::new(repository, similarity, rules, policy, Some(2026));

        ApiState {
            engine: Arc::new(engine),
            catalog: Arc::new(catalog),
            leads,
            default_city: "sao-paulo".to_string(),
        }
    }

    async fn send(
        router: Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_turn_and_delete() {
        let router = create_router(state());

        let (status, body) = send(
            router.clone(),
            Method::POST,
            "/api/chat",
            Some(serde_json::json!({ "channel": "+5511900000000", "message": "oi, quero um suv" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);

        let data = body.data.unwrap();
        assert_eq!(data["stage"], "discovery");
        assert_eq!(data["continue_conversation"], true);
        let conversation_id = data["conversation_id"].as_str().unwrap().to_string();

        let uri = format!("/api/conversations/{}", conversation_id);
        let (status, _) = send(router.clone(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(router.clone(), Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_handoff_lead_is_listed() {
        let router = create_router(state());

        let (_, body) = send(
            router.clone(),
            Method::POST,
            "/api/chat",
            Some(serde_json::json!({ "channel": "+5511911111111", "message": "quero um vendedor" })),
        )
        .await;
        let data = body.data.unwrap();
        assert_eq!(data["stage"], "handoff");
        let conversation_id = data["conversation_id"].as_str().unwrap().to_string();

        let uri = format!("/api/conversations/{}/leads", conversation_id);
        let (status, body) = send(router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let leads = body.data.unwrap();
        assert_eq!(leads.as_array().unwrap().len(), 1);
        assert_eq!(leads[0]["lead"]["triggering_message"], "quero um vendedor");
    }

    #[tokio::test]
    async fn test_blank_channel_is_bad_request() {
        let (status, body) = send(
            create_router(state()),
            Method::POST,
            "/api/chat",
            Some(serde_json::json!({ "channel": "  ", "message": "oi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_vehicle_upsert_and_listing() {
        let router = create_router(state());
        let vehicle = serde_json::json!({
            "id": Uuid::new_v4(),
            "brand": "Jeep",
            "model": "Compass",
            "year": 2022,
            "price": 139900.0,
            "body_type": "suv",
            "door_count": 4,
            "features": { "air_conditioning": true }
        });

        let (status, body) = send(router.clone(), Method::POST, "/api/vehicles", Some(vehicle)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["created"], true);

        let (status, body) = send(router, Method::GET, "/api/vehicles?city=sao-paulo", None).await;
        assert_eq!(status, StatusCode::OK);
        let listings = body.data.unwrap();
        assert_eq!(listings.as_array().unwrap().len(), 1);
        assert_eq!(listings[0]["eligibility"]["uber_black"], true);
    }

    #[tokio::test]
    async fn test_invalid_rule_batch_is_rejected() {
        let rows = serde_json::json!([{
            "city_slug": "curitiba",
            "category": "black",
            "brand": "Toyota",
            "model": "Corolla",
            "min_year": 2018,
            "source_url": "https://example.com/rules",
            "fetched_at": chrono::Utc::now()
        }]);

        let (status, body) =
            send(create_router(state()), Method::PUT, "/api/rules/sao-paulo", Some(rows)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
    }
}
