//! Claim endpoints.
//!
//! Both handlers resolve the caller from the `user_id` cookie and hand a newly
//! minted id back with `Set-Cookie` so the browser keeps it for later visits.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use crate::claims::{ClaimOutcome, FAILURE_MESSAGE, NO_COUPONS_MESSAGE};
use crate::identity::{ResolvedIdentity, user_id_cookie};
use crate::models::claim::ClaimStatusView;
use crate::state::AppState;

use super::HttpError;

pub const CLAIMED_MESSAGE: &str = "Coupon claimed";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claim", post(claim_coupon))
        .route("/claim-status", get(claim_status))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub success: bool,
    pub coupon_code: String,
    pub message: String,
    pub cooldown_period_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownResponse {
    pub success: bool,
    pub message: String,
    pub time_remaining_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusErrorResponse {
    pub time_remaining_seconds: Option<u64>,
    pub recent_claims: Vec<String>,
    pub error: String,
}

async fn claim_coupon(State(state): State<AppState>, identity: ResolvedIdentity) -> Response {
    let cookie = fresh_cookie(&state, &identity);

    let response = match state.claims.claim(&identity).await {
        ClaimOutcome::Dispensed {
            coupon_code,
            cooldown_period_seconds,
        } => Json(ClaimResponse {
            success: true,
            coupon_code,
            message: CLAIMED_MESSAGE.to_string(),
            cooldown_period_seconds,
        })
        .into_response(),
        ClaimOutcome::OnCooldown {
            remaining_seconds,
            message,
        } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(CooldownResponse {
                success: false,
                message,
                time_remaining_seconds: remaining_seconds,
            }),
        )
            .into_response(),
        ClaimOutcome::Exhausted => {
            HttpError::new(StatusCode::NOT_FOUND, NO_COUPONS_MESSAGE.to_string()).into_response()
        }
        ClaimOutcome::Failed => HttpError::internal().into_response(),
    };

    (cookie, response).into_response()
}

async fn claim_status(State(state): State<AppState>, identity: ResolvedIdentity) -> Response {
    let cookie = fresh_cookie(&state, &identity);

    let response = match state.claims.status(&identity).await {
        Ok(view) => Json::<ClaimStatusView>(view).into_response(),
        Err(err) => {
            error!(
                user_id = %identity.user_id,
                error = %err,
                "Claim status lookup failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusErrorResponse {
                    time_remaining_seconds: None,
                    recent_claims: Vec::new(),
                    error: FAILURE_MESSAGE.to_string(),
                }),
            )
                .into_response()
        }
    };

    (cookie, response).into_response()
}

/// `Set-Cookie` headers for a freshly minted identity, empty otherwise.
fn fresh_cookie(state: &AppState, identity: &ResolvedIdentity) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !identity.fresh {
        return headers;
    }
    match user_id_cookie(&identity.user_id, state.secure_cookies) {
        Ok(value) => {
            headers.insert(SET_COOKIE, value);
        }
        Err(err) => error!(user_id = %identity.user_id, error = %err, "Unusable identity cookie"),
    }
    headers
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::COOKIE;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;

    use super::super::test_support::{app, json_body};
    use super::*;

    fn post_claim(user: &str) -> Request<Body> {
        Request::post("/claim")
            .header(COOKIE, format!("user_id={user}"))
            .body(Body::empty())
            .unwrap()
    }

    fn get_status(user: &str) -> Request<Body> {
        Request::get("/claim-status")
            .header(COOKIE, format!("user_id={user}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn claim_then_cooldown_then_next_coupon() {
        let app = app(&["A", "B", "C"], 60).await;

        let response = app.send(post_claim("alice")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["couponCode"], "A");
        assert_eq!(body["message"], CLAIMED_MESSAGE);
        assert_eq!(body["cooldownPeriodSeconds"], 60);

        let response = app.send(post_claim("alice")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["timeRemainingSeconds"], 60);
        assert_eq!(
            body["message"],
            "Please wait 1 minute before claiming another coupon"
        );

        app.clock.advance(Duration::seconds(61));
        let body = json_body(app.send(post_claim("alice")).await).await;
        assert_eq!(body["couponCode"], "B");
    }

    #[tokio::test]
    async fn first_visit_gets_cookie() {
        let app = app(&["A"], 60).await;
        let response = app
            .send(Request::post("/claim").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("user_id="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));

        // The minted id now identifies the caller
        let user_id = cookie
            .trim_start_matches("user_id=")
            .split(';')
            .next()
            .unwrap()
            .to_string();
        let response = app.send(post_claim(&user_id)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn empty_rotation_is_not_found() {
        let app = app(&[], 60).await;
        let response = app.send(post_claim("alice")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], NO_COUPONS_MESSAGE);
        assert_eq!(app.storage.coupons.cursor().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_tracks_claims() {
        let app = app(&["A", "B", "C"], 60).await;

        let body = json_body(app.send(get_status("alice")).await).await;
        assert!(body["timeRemainingSeconds"].is_null());
        assert_eq!(body["recentClaims"], serde_json::json!([]));

        app.send(post_claim("alice")).await;
        app.clock.advance(Duration::seconds(15));
        let body = json_body(app.send(get_status("alice")).await).await;
        assert_eq!(body["timeRemainingSeconds"], 45);
        assert_eq!(body["recentClaims"], serde_json::json!(["A"]));

        app.clock.advance(Duration::seconds(45));
        app.send(post_claim("alice")).await;
        app.clock.advance(Duration::seconds(60));
        let body = json_body(app.send(get_status("alice")).await).await;
        assert!(body["timeRemainingSeconds"].is_null());
        assert_eq!(body["recentClaims"], serde_json::json!(["B", "A"]));
    }

    #[tokio::test]
    async fn status_mints_cookie_for_new_visitor() {
        let app = app(&["A"], 60).await;
        let response = app
            .send(Request::get("/claim-status").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_some());
        let body = json_body(response).await;
        assert!(body["timeRemainingSeconds"].is_null());
        assert_eq!(body["recentClaims"], serde_json::json!([]));
    }
}
