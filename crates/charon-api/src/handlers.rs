//! HTTP handlers

use crate::dto::{ApiReply, ApiRequest};
use crate::responder::Responder;
use actix_web::{web, HttpResponse};
use charon_core::AppError;
use std::sync::Arc;
use tracing::warn;

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "charon-billing",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Single RPC endpoint: `{method, params}` in, `{result | error}` out.
/// Every operation runs under the configured end-to-end deadline.
pub async fn rpc(
    responder: web::Data<Arc<Responder>>,
    deadline: web::Data<std::time::Duration>,
    request: web::Json<ApiRequest>,
) -> HttpResponse {
    let ApiRequest { method, params } = request.into_inner();
    let outcome = tokio::time::timeout(
        *deadline.get_ref(),
        responder.dispatch(&method, params),
    )
    .await;
    let reply = match outcome {
        Ok(Ok(result)) => ApiReply::ok(result),
        Ok(Err(err)) => {
            warn!(%method, kind = err.kind(), "rpc failed");
            return HttpResponse::build(err.status_code()).json(ApiReply::err(&err));
        }
        Err(_) => {
            let err = AppError::ServerError(format!("deadline exceeded for {}", method));
            warn!(%method, "rpc deadline exceeded");
            return HttpResponse::build(err.status_code()).json(ApiReply::err(&err));
        }
    };
    HttpResponse::Ok().json(reply)
}
