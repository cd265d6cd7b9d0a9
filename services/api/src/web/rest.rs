//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use course_builder_core::{domain::SavedPlan, ports::PortError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_plans_handler,
        delete_plan_handler,
    ),
    components(
        schemas(PlanSummary)
    ),
    tags(
        (name = "Course Builder API", description = "Saved learning plans. Live sessions run over the /ws WebSocket.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A saved plan as shown in the plan picker.
#[derive(Serialize, ToSchema)]
pub struct PlanSummary {
    id: Uuid,
    topic: String,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SavedPlan> for PlanSummary {
    fn from(plan: SavedPlan) -> Self {
        Self {
            id: plan.id,
            topic: plan.topic,
            title: plan.title,
            description: plan.description,
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the learner's saved plans, most recently active first.
#[utoipa::path(
    get,
    path = "/plans",
    responses(
        (status = 200, description = "Saved plans", body = [PlanSummary]),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn list_plans_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match app_state.db.list_plans(user_id).await {
        Ok(plans) => {
            let body: Vec<PlanSummary> = plans.into_iter().map(PlanSummary::from).collect();
            Ok(Json(body))
        }
        Err(e) => {
            error!(%user_id, "Failed to list plans: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list plans".to_string(),
            ))
        }
    }
}

/// Delete a saved plan together with its modules, lessons and content.
#[utoipa::path(
    delete,
    path = "/plans/{plan_id}",
    responses(
        (status = 204, description = "Plan deleted"),
        (status = 404, description = "No such plan for this user"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("plan_id" = Uuid, Path, description = "The plan to delete."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_plan_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(plan_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    match app_state.db.delete_plan(user_id, plan_id).await {
        Ok(()) => {
            info!(%user_id, %plan_id, "Plan deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(PortError::NotFound(message)) => Err((StatusCode::NOT_FOUND, message)),
        Err(e) => {
            error!(%plan_id, "Failed to delete plan: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete plan".to_string(),
            ))
        }
    }
}
