//! Discovery and diagnostic HTTP endpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::warn;

use crate::services::registry::{RegistryError, RouterAddress};
use crate::state::AppState;

/// `GET /rocky/routers`: every live router, for client start-up.
pub async fn routers(State(state): State<AppState>) -> Result<Json<Vec<RouterAddress>>, StatusCode> {
    let routers = state.registry.routers().await.map_err(registry_error_to_status)?;
    Ok(Json(routers))
}

/// `GET /rocky/module/{namespace}`: raw stored records keyed by module.
pub async fn module_records(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<BTreeMap<String, Vec<String>>>, StatusCode> {
    let records = state.registry.module_records(&namespace).await.map_err(registry_error_to_status)?;
    Ok(Json(records))
}

fn registry_error_to_status(err: RegistryError) -> StatusCode {
    warn!(error = %err, "discovery: registry read failed");
    match err {
        RegistryError::DuplicateRegistration { .. } => StatusCode::CONFLICT,
        RegistryError::InvalidName { .. } => StatusCode::BAD_REQUEST,
        RegistryError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Record(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "discovery_test.rs"]
mod tests;
