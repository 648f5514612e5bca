// websocket-server/src/routing.rs
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::actors::client_session_actor::ClientSessionActor;
use crate::admission::{AdmissionHandler, AdmissionOutcome};

/// Header an upstream transport uses to pass its own connection id
pub const CONNECTION_ID_HEADER: &str = "X-Connection-Id";

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Configure routes for the WebSocket server
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(ws_route)))
        .service(web::resource("/connect").route(web::get().to(connect_route)))
        .service(web::resource("/health").route(web::get().to(health_route)));
}

// A malformed query string is treated the same as an absent token
fn presented_token(req: &HttpRequest) -> Option<String> {
    web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

fn connection_id(req: &HttpRequest) -> String {
    req.headers()
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn outcome_response(outcome: &AdmissionOutcome) -> HttpResponse {
    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::UNAUTHORIZED);
    HttpResponse::build(status).body(outcome.body())
}

/// Admission only: the transport owns the socket and asks whether to keep it
async fn connect_route(req: HttpRequest, admission: web::Data<AdmissionHandler>) -> HttpResponse {
    let connection_id = connection_id(&req);
    let token = presented_token(&req);

    let outcome = admission.admit(&connection_id, token.as_deref()).await;
    outcome_response(&outcome)
}

/// Admission followed by a WebSocket session for accepted connections
async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    admission: web::Data<AdmissionHandler>,
) -> Result<HttpResponse, Error> {
    // Refuse non-upgrade requests before touching the verifier or registry
    if let Err(e) = ws::handshake(&req) {
        tracing::debug!("Rejected non-upgrade request to /ws: {}", e);
        return Err(e.into());
    }

    let connection_id = Uuid::new_v4().to_string();
    let token = presented_token(&req);

    match admission.admit(&connection_id, token.as_deref()).await {
        AdmissionOutcome::Accepted(record) => {
            let session = ClientSessionActor::new(record, admission.registry().clone());
            ws::start(session, &req, stream)
        },
        rejected => Ok(outcome_response(&rejected)),
    }
}

async fn health_route(admission: web::Data<AdmissionHandler>) -> HttpResponse {
    match admission.registry().live_count().await {
        Ok(count) => HttpResponse::Ok().json(json!({
            "status": "ok",
            "live_connections": count
        })),
        Err(e) => {
            tracing::error!("Health check could not reach the registry: {}", e);
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "degraded",
                "error": "registry unavailable"
            }))
        },
    }
}
