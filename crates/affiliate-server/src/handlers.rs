use affiliate_api::{ApiError, MessageBody};
use affiliate_ledger::NewCommission;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::middleware::ClientIp;
use crate::server::AppState;
use crate::services::{BuyTokensRequest, SERVICE_NAME};

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": SERVICE_NAME,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn register_affiliate(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let registration = state.affiliates.register_affiliate().await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn get_affiliate(
    State(state): State<AppState>,
    Path(affiliate_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let affiliate = state.affiliates.require_affiliate(&affiliate_id).await?;
    Ok(Json(affiliate))
}

#[derive(Debug, Deserialize)]
pub struct BuyTokensPayload {
    pub amount: Option<f64>,
    pub affiliate_id: Option<String>,
}

pub async fn affiliate_buy_tokens(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    payload: Result<Json<BuyTokensPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let amount = match payload.amount {
        Some(amount) if amount != 0.0 => amount,
        _ => return Err(ApiError::bad_request("Missing amount")),
    };
    let request = BuyTokensRequest {
        amount,
        affiliate_id: payload.affiliate_id.unwrap_or_default(),
    };

    let response = state.relay.process_buy_tokens(request, &client_ip).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct RecordCommissionPayload {
    pub affiliate_id: Option<String>,
    pub ico_id: Option<String>,
    pub amount: Option<f64>,
    pub commission: Option<f64>,
    pub client_ip: Option<String>,
}

impl RecordCommissionPayload {
    fn into_commission(self) -> Option<NewCommission> {
        let present = |s: Option<String>| s.filter(|s| !s.is_empty());
        Some(NewCommission {
            affiliate_id: present(self.affiliate_id)?,
            ico_id: present(self.ico_id)?,
            amount: self.amount?,
            commission: self.commission?,
            client_ip: present(self.client_ip)?,
        })
    }
}

pub async fn record_commission(
    State(state): State<AppState>,
    payload: Result<Json<RecordCommissionPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let commission = payload
        .into_commission()
        .ok_or_else(|| ApiError::bad_request("Missing required data"))?;

    if state.affiliates.record_commission(&commission).await? {
        Ok(Json(MessageBody::new("Commission recorded successfully")))
    } else {
        Err(ApiError::bad_request("Invalid affiliate ID or other error"))
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check_health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .metrics
        .get_metrics()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Failed to collect metrics: {e}")))
}

pub async fn prometheus_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = crate::metrics::render_metrics()
        .ok_or_else(|| ApiError::not_found("Prometheus metrics not enabled"))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.caches.stats())
}

pub async fn cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.caches.clear();
    Json(json!({ "message": "Caches cleared", "cleared": cleared }))
}

pub async fn cache_cleanup(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.caches.cleanup_expired();
    Json(json!({ "message": "Expired entries removed", "removed": removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> RecordCommissionPayload {
        RecordCommissionPayload {
            affiliate_id: Some("aff".into()),
            ico_id: Some("main_ico".into()),
            amount: Some(100.0),
            commission: Some(0.0),
            client_ip: Some("127.0.0.1".into()),
        }
    }

    #[test]
    fn complete_payload_converts() {
        let commission = payload().into_commission().unwrap();
        assert_eq!(commission.affiliate_id, "aff");
        assert_eq!(commission.commission, 0.0);
    }

    #[test]
    fn missing_or_blank_fields_are_rejected() {
        let mut p = payload();
        p.client_ip = None;
        assert!(p.into_commission().is_none());

        let mut p = payload();
        p.ico_id = Some(String::new());
        assert!(p.into_commission().is_none());

        let mut p = payload();
        p.amount = None;
        assert!(p.into_commission().is_none());
    }
}
