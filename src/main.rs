mod catalog;
mod config;
mod db;
mod errors;
mod gateway_registry;
mod handlers;
mod logger;
mod measurements;
mod models;
#[cfg(test)]
mod test_support;
mod topic_guard;
mod websocket_srv;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use warp::Filter;

use catalog::{AssignmentCatalog, MongoAssignmentCatalog};
use config::Configs;
use gateway_registry::GatewayRegistry;
use handlers::api_handlers::gateways;
use measurements::{MeasurementStore, MongoMeasurementStore};
use websocket_srv::{ClientsConnections, RealtimeChannel};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::start_log();

    let config_path =
        std::env::var("INGEST_CONFIG").unwrap_or_else(|_| "agrihub.toml".to_string());
    let configs = Configs::load_from_file(&config_path)?;
    let db = db::get_db().await?;

    let catalog: Arc<dyn AssignmentCatalog> = Arc::new(MongoAssignmentCatalog::new(db.clone()));
    let store: Arc<dyn MeasurementStore> = Arc::new(MongoMeasurementStore::new(db));

    let connections = ClientsConnections::new();
    websocket_srv::websocket(configs.websocket.clone(), connections.clone()).await?;
    let channel: Arc<dyn RealtimeChannel> = Arc::new(connections);

    let registry = GatewayRegistry::new(
        catalog.clone(),
        store,
        channel,
        configs.mqtt.clone(),
        Duration::from_secs(configs.flush_interval_secs),
    );
    registry.initialize().await?;

    let root = warp::path::end().map(|| "Agrihub sensor ingestion");

    let status_route = warp::path!("gateways" / "status")
        .and(warp::get())
        .and(warp::query::<gateways::GatewayStatusQueries>())
        .and(with_registry(registry.clone()))
        .and_then(gateways::gateway_status_handler);

    let refresh_route = warp::path!("gateways" / "refresh")
        .and(warp::post())
        .and(with_registry(registry.clone()))
        .and_then(gateways::gateway_refresh_handler);

    let activate_route = warp::path!("gateways" / String / "activate")
        .and(warp::post())
        .and(with_registry(registry.clone()))
        .and(with_catalog(catalog.clone()))
        .and_then(gateways::gateway_activate_handler);

    let deactivate_route = warp::path!("gateways" / String / "deactivate")
        .and(warp::post())
        .and(with_registry(registry.clone()))
        .and(with_catalog(catalog.clone()))
        .and_then(gateways::gateway_deactivate_handler);

    let routes = root
        .or(status_route)
        .or(refresh_route)
        .or(activate_route)
        .or(deactivate_route)
        .recover(errors::handle_rejection);

    let addr: SocketAddr = configs.http.server.parse()?;
    warp::serve(routes).run(addr).await;

    Ok(())
}

fn with_registry(
    registry: Arc<GatewayRegistry>,
) -> impl Filter<Extract = (Arc<GatewayRegistry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn with_catalog(
    catalog: Arc<dyn AssignmentCatalog>,
) -> impl Filter<Extract = (Arc<dyn AssignmentCatalog>,), Error = std::convert::Infallible> + Clone
{
    warp::any().map(move || catalog.clone())
}
