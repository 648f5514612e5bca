// websocket-server/src/main.rs
use actix::Actor;
use actix_web::{web, App, HttpServer};
use common::auth::TokenVerifier;
use common::{setup_tracing, Config};
use std::sync::Arc;
use websocket_server::actors::connection_store::ConnectionStoreActor;
use websocket_server::admission::AdmissionHandler;
use websocket_server::registry::{ActorConnectionStore, ConnectionRegistry};
use websocket_server::routing::routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    setup_tracing();

    let config = Config::from_env();
    let server_addr = config.websocket_server_addr.clone();

    let verifier = TokenVerifier::from_config(&config.identity).map_err(|e| {
        tracing::error!("Invalid identity configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    tracing::info!("Verifying tokens against {}", verifier.resolver().jwks_url());

    // Initialize the connection store with its expiry sweep
    let store = ConnectionStoreActor::new()
        .with_sweep_interval(config.registry.sweep_interval())
        .start();
    let registry = ConnectionRegistry::new(Arc::new(ActorConnectionStore::new(
        store,
        config.registry.write_timeout(),
    )));

    let admission = web::Data::new(AdmissionHandler::from_config(
        Arc::new(verifier),
        registry,
        &config.registry,
    ));

    tracing::info!("Starting WebSocket Server on {}", server_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(admission.clone())
            .configure(routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
