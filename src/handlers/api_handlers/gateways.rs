use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::AssignmentCatalog;
use crate::errors::IngestRejection;
use crate::gateway_registry::GatewayRegistry;

// Query for gateways/status route
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayStatusQueries {
    #[serde(rename = "zoneId")]
    pub zone_id: String,
}

#[derive(Serialize)]
struct GatewayStatusResponse {
    #[serde(rename = "zoneId")]
    zone_id: String,
    connected: bool,
}

#[derive(Serialize)]
struct ActionMessage {
    message: String,
}

pub async fn gateway_status_handler(
    opts: GatewayStatusQueries,
    registry: Arc<GatewayRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let connected = registry.status_of(&opts.zone_id).await;

    Ok(warp::reply::json(&GatewayStatusResponse {
        zone_id: opts.zone_id,
        connected,
    }))
}

pub async fn gateway_refresh_handler(
    registry: Arc<GatewayRegistry>,
) -> Result<impl warp::Reply, warp::Rejection> {
    registry
        .refresh()
        .await
        .map_err(|e| warp::reject::custom(IngestRejection(e)))?;

    Ok(warp::reply::json(&ActionMessage {
        message: "gateway connections rebuilt".to_string(),
    }))
}

/// Called by the platform after it flips an assignment's active flag on.
pub async fn gateway_activate_handler(
    assignment_id: String,
    registry: Arc<GatewayRegistry>,
    catalog: Arc<dyn AssignmentCatalog>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let assignment = catalog
        .load_assignment_with_relations(&assignment_id)
        .await
        .map_err(|e| warp::reject::custom(IngestRejection(e)))?;

    registry
        .add(assignment)
        .await
        .map_err(|e| warp::reject::custom(IngestRejection(e)))?;

    Ok(warp::reply::json(&ActionMessage {
        message: format!("assignment {} activated", assignment_id),
    }))
}

/// Soft deactivation: the platform keeps the record, we just drop the
/// connection.
pub async fn gateway_deactivate_handler(
    assignment_id: String,
    registry: Arc<GatewayRegistry>,
    catalog: Arc<dyn AssignmentCatalog>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if catalog
        .is_assignment_active(&assignment_id)
        .await
        .unwrap_or(false)
    {
        log::warn!(
            "assignment {} is still flagged active in the catalog, closing its connection anyway",
            assignment_id
        );
    }

    let message = if registry.remove(&assignment_id).await {
        format!("assignment {} connection closed", assignment_id)
    } else {
        format!("assignment {} had no live connection", assignment_id)
    };

    Ok(warp::reply::json(&ActionMessage { message }))
}
