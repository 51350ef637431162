use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::models::coupon::{Coupon, normalize_coupon_code};
use crate::state::AppState;
use crate::store::{StoreError, bounded};

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new().route("/coupons", post(create_coupon))
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCouponResponse {
    pub success: bool,
    pub coupon: Coupon,
}

/// Append a coupon to the end of the rotation.
async fn create_coupon(
    State(state): State<AppState>,
    payload: Result<Json<CreateCouponRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateCouponResponse>), HttpError> {
    let Json(request) =
        payload.map_err(|rejection| HttpError::bad_request(rejection.body_text()))?;
    let raw = request
        .code
        .ok_or_else(|| HttpError::bad_request("Coupon code is required"))?;
    let code = normalize_coupon_code(&raw).map_err(|err| HttpError::bad_request(err.to_string()))?;

    let now = state.clock.now();
    let coupon = bounded(
        state.storage_timeout,
        state.storage.coupons.create_coupon(&code, now),
    )
    .await
    .map_err(|err| match err {
        StoreError::DuplicateCoupon(_) => HttpError::new(
            StatusCode::CONFLICT,
            "Coupon code already exists".to_string(),
        ),
        other => {
            error!(coupon = %code, error = %other, "Coupon creation failed");
            HttpError::internal()
        }
    })?;

    info!(coupon = %coupon.code, id = coupon.id, "Coupon added to rotation");
    Ok((
        StatusCode::CREATED,
        Json(CreateCouponResponse {
            success: true,
            coupon,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Request, StatusCode};

    use super::super::test_support::{app, json_body};

    fn post_coupon(body: &str) -> Request<Body> {
        Request::post("/coupons")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn created_coupon_joins_rotation() {
        let app = app(&["A"], 60).await;

        let response = app.send(post_coupon(r#"{"code":"  NEWCODE "}"#)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["coupon"]["code"], "NEWCODE");
        assert!(body["coupon"]["id"].is_i64());
        assert!(body["coupon"]["createdAt"].is_string());
        assert_eq!(app.storage.coupons.count().await.unwrap(), 2);

        let first = app.storage.coupons.next_coupon(chrono::Utc::now()).await.unwrap();
        let second = app.storage.coupons.next_coupon(chrono::Utc::now()).await.unwrap();
        assert_eq!(first.unwrap().code, "A");
        assert_eq!(second.unwrap().code, "NEWCODE");
    }

    #[tokio::test]
    async fn duplicate_code_conflicts() {
        let app = app(&["SAVE20TODAY"], 60).await;
        let response = app.send(post_coupon(r#"{"code":"SAVE20TODAY"}"#)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Coupon code already exists");
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let app = app(&[], 60).await;

        for payload in [r#"{}"#, r#"{"code":"   "}"#, r#"{"code":"50% OFF"}"#, "{not json"] {
            let response = app.send(post_coupon(payload)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
            let body = json_body(response).await;
            assert_eq!(body["success"], false);
            assert!(body["message"].is_string());
        }

        let response = app
            .send(
                Request::post("/coupons")
                    .body(Body::from(r#"{"code":"A"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.storage.coupons.count().await.unwrap(), 0);
    }
}
