// websocket-client/src/main.rs
use common::{setup_tracing, Config};
use std::sync::Arc;
use websocket_client::{ConnectionDriver, DriverEvent, EventCategory, ReconnectPolicy, TungsteniteConnector};

#[actix::main]
async fn main() -> std::io::Result<()> {
    setup_tracing();

    let config = Config::from_env();
    let token = std::env::var("APP_TOKEN").unwrap_or_default();

    let driver = ConnectionDriver::new(
        &config.client.endpoint,
        Arc::new(TungsteniteConnector),
        ReconnectPolicy::from(&config.client),
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let handle = driver.spawn();

    let subscriptions = [
        handle
            .on(EventCategory::Opened, |_| tracing::info!("WebSocket connection opened"))
            .await,
        handle
            .on(EventCategory::Message, |event| {
                if let DriverEvent::Message(frame) = event {
                    tracing::info!("Message received: {}", serde_json::Value::Object(frame.clone()));
                }
            })
            .await,
        handle
            .on(EventCategory::Error, |event| {
                if let DriverEvent::Error(e) = event {
                    tracing::warn!("Connection error: {}", e);
                }
            })
            .await,
        handle
            .on(EventCategory::Closed, |event| {
                if let DriverEvent::Closed { code, reason } = event {
                    tracing::info!("WebSocket closed: code={:?} reason={}", code, reason);
                }
            })
            .await,
    ];
    if let Some(Err(e)) = subscriptions.into_iter().find(Result::is_err) {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    }

    handle
        .connect(token)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down client");
    let _ = handle.disconnect(false).await;
    handle.shutdown();

    Ok(())
}
