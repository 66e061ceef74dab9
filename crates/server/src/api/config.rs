//! # Config API
//!
//! Read and partially update the persisted pipeline configuration. An
//! update is saved to `.scholar/config.json` and applies to every stage run
//! that starts afterwards.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use scholar_core::models::ModelSettings;
use scholar_core::{ConfigPatch, ScholarConfig};

use super::error::{ApiError, ErrorBody};
use crate::SharedState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigResponse {
    #[schema(value_type = Object)]
    pub config: ScholarConfig,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ConfigUpdate {
    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub llm_concurrency: Option<usize>,
    pub retrieval_concurrency: Option<usize>,
    pub max_keywords: Option<usize>,
    pub items_per_query: Option<usize>,
    pub max_context_items: Option<usize>,
    pub context_token_budget: Option<usize>,
    pub entailment_enabled: Option<bool>,
    /// Clamped to 0.0..=1.0
    pub min_entailment_ratio: Option<f64>,
    #[schema(value_type = Option<Object>)]
    pub model: Option<ModelSettings>,
    /// Enabled backends: "semantic_scholar", "pubmed"
    pub sources: Option<Vec<String>>,
}

impl From<ConfigUpdate> for ConfigPatch {
    fn from(update: ConfigUpdate) -> Self {
        ConfigPatch {
            max_retries: update.max_retries,
            timeout_secs: update.timeout_secs,
            llm_concurrency: update.llm_concurrency,
            retrieval_concurrency: update.retrieval_concurrency,
            max_keywords: update.max_keywords,
            items_per_query: update.items_per_query,
            max_context_items: update.max_context_items,
            context_token_budget: update.context_token_budget,
            entailment_enabled: update.entailment_enabled,
            min_entailment_ratio: update.min_entailment_ratio,
            model: update.model,
            sources: update.sources,
        }
    }
}

/// Get current configuration
#[utoipa::path(
    get,
    path = "/api/v1/config",
    tag = "config",
    responses(
        (status = 200, description = "Current configuration", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    let config = state.config.read().await;
    Json(ConfigResponse {
        config: config.clone(),
    })
}

/// Update configuration (partial merge)
#[utoipa::path(
    patch,
    path = "/api/v1/config",
    tag = "config",
    request_body = ConfigUpdate,
    responses(
        (status = 200, description = "Updated configuration", body = ConfigResponse),
        (status = 500, description = "Backends could not be built", body = ErrorBody)
    )
)]
pub async fn update_config(
    State(state): State<SharedState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let mut config = state.config.write().await;
    let mut next = config.clone();
    next.merge(update.into());

    let ctx = crate::stage_context(&next).map_err(ApiError::Internal)?;
    if let Err(e) = next.save().await {
        tracing::error!("Failed to save config: {:#}", e);
    }

    {
        let mut driver = state.driver.write().await;
        let rebuilt = driver.reconfigured(ctx);
        *driver = Arc::new(rebuilt);
    }
    *config = next.clone();
    tracing::info!("Configuration updated");

    Ok(Json(ConfigResponse { config: next }))
}
