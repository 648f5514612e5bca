// websocket-server/src/actors/client_session_actor.rs
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use common::{ConnectionRecord, ServerFrame};
use std::time::{Duration, Instant};

use crate::registry::ConnectionRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Actor serving one admitted WebSocket connection
pub struct ClientSessionActor {
    record: ConnectionRecord,
    registry: ConnectionRegistry,
    last_heartbeat: Instant,
}

impl ClientSessionActor {
    pub fn new(record: ConnectionRecord, registry: ConnectionRegistry) -> Self {
        Self {
            record,
            registry,
            last_heartbeat: Instant::now(),
        }
    }

    // Ping periodically and drop peers that stop answering
    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                tracing::warn!("Client heartbeat timeout: {}", act.record.connection_id);
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }

    fn handle_text(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let reply = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(payload) if payload.is_object() => ServerFrame::Echo {
                connection_id: self.record.connection_id.clone(),
                payload,
                timestamp: chrono::Utc::now().timestamp(),
            },
            _ => {
                tracing::debug!(
                    "Unparseable frame ({} bytes) from {}",
                    text.len(),
                    self.record.connection_id
                );
                ServerFrame::Error {
                    message: "frames must be JSON objects".to_string(),
                }
            },
        };

        ctx.text(reply.to_json());
    }
}

impl Actor for ClientSessionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "Client connected: {} (user {})",
            self.record.connection_id,
            self.record.user_id
        );

        self.last_heartbeat = Instant::now();
        self.heartbeat(ctx);

        let welcome = ServerFrame::Welcome {
            connection_id: self.record.connection_id.clone(),
            user_id: self.record.user_id.clone(),
            expires_at: self.record.expires_at.timestamp(),
        };
        ctx.text(welcome.to_json());
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Client disconnected: {}", self.record.connection_id);

        let registry = self.registry.clone();
        let connection_id = self.record.connection_id.clone();
        actix::spawn(async move {
            if let Err(e) = registry.unregister(&connection_id).await {
                // The lease sweep removes it eventually
                tracing::warn!("Could not unregister {}: {}", connection_id, e);
            }
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ClientSessionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            },
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            },
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            },
            Ok(ws::Message::Binary(bin)) => {
                self.last_heartbeat = Instant::now();
                match std::str::from_utf8(&bin) {
                    Ok(text) => self.handle_text(text, ctx),
                    Err(_) => tracing::debug!("Dropping non UTF-8 frame from {}", self.record.connection_id),
                }
            },
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("Client closing connection: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            },
            Err(e) => {
                tracing::error!("WebSocket protocol error on {}: {}", self.record.connection_id, e);
                ctx.stop();
            },
            _ => (),
        }
    }
}
