//! HTTP surface tests driven through the router with `oneshot`

mod common;

#[cfg(test)]
mod tests {
    use super::common::Harness;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use devicelend_server::auth::{generate_token, Principal, Role};
    use devicelend_server::config::Config;
    use devicelend_server::routes::app_router;
    use devicelend_server::webhook::signer;

    const GATEWAY_SECRET: &str = "gateway-secret";
    const DEVICE_KEY: &str = "device-key";

    fn configured() -> Harness {
        Harness::with_config(Config {
            gateway_secret: Some(GATEWAY_SECRET.to_string()),
            device_api_key: Some(DEVICE_KEY.to_string()),
            ..Config::default()
        })
    }

    fn token(h: &Harness, principal: &Principal) -> String {
        generate_token(principal, &h.config.jwt_secret, 3600).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_request(method: Method, uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn loan_body(hardware_id: &str) -> Value {
        json!({
            "customer_id": Uuid::new_v4(),
            "device_id": hardware_id,
            "financed_amount": 500_000,
            "down_payment": 100_000,
            "tenure_months": 4,
            "interest_rate_bps": 250,
        })
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = Harness::new();
        let app = app_router(h.state.clone());

        let (status, body) = send(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let h = Harness::new();
        let app = app_router(h.state.clone());

        let request = Request::builder()
            .uri("/health")
            .header("x-request-id", "req-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("req-123")
        );
    }

    #[tokio::test]
    async fn test_loan_routes_require_token() {
        let h = Harness::new();
        let app = app_router(h.state.clone());

        let (status, body) = send(&app, get("/api/loans", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "MISSING_TOKEN");

        let (status, body) = send(&app, get("/api/loans", Some("not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_merchant_originates_and_reads_loan() {
        let h = Harness::new();
        let app = app_router(h.state.clone());
        let bearer = token(&h, &h.merchant);

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/api/devices", Some(&bearer), json!({ "hardware_id": "HW-400" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/loans", Some(&bearer), loan_body("HW-400")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "PENDING");
        let loan_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/loans/{}/payments", loan_id),
                Some(&bearer),
                json!({ "amount": 100_000, "reference": "DP-1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["loan_status"], "ACTIVE");

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/loans/{}/payments", loan_id),
                Some(&bearer),
                json!({ "amount": 100_000, "reference": "DP-1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["duplicate"], true);

        let (status, body) = send(&app, get(&format!("/api/loans/{}", loan_id), Some(&bearer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["installments"].as_array().map(Vec::len), Some(4));
        assert_eq!(body["data"]["device_status"], "UNLOCKED");

        let (status, body) = send(&app, get("/api/loans", Some(&bearer))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_other_tenant_is_forbidden() {
        let h = Harness::new();
        let loan = h.standard_loan("HW-401", None).await;
        let app = app_router(h.state.clone());
        let intruder = token(&h, &Principal::merchant(Uuid::new_v4()));

        let (status, _) = send(&app, get(&format!("/api/loans/{}", loan.id), Some(&intruder))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/loans/{}/payments", loan.id),
                Some(&intruder),
                json!({ "amount": 100_000 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_loan_is_not_found() {
        let h = Harness::new();
        let app = app_router(h.state.clone());
        let bearer = token(&h, &h.merchant);

        let (status, _) = send(&app, get(&format!("/api/loans/{}", Uuid::new_v4()), Some(&bearer))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_short_down_payment_is_unprocessable() {
        let h = Harness::new();
        let loan = h.standard_loan("HW-402", None).await;
        let app = app_router(h.state.clone());
        let bearer = token(&h, &h.merchant);

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/loans/{}/payments", loan.id),
                Some(&bearer),
                json!({ "amount": 10_000 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_admin_routes_reject_merchants() {
        let h = Harness::new();
        let app = app_router(h.state.clone());
        let merchant = token(&h, &h.merchant);

        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/admin/enforcement/run", Some(&merchant), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let admin = Principal {
            subject: "ops".to_string(),
            tenant_id: Uuid::nil(),
            role: Role::Admin,
        };
        let admin = token(&h, &admin);
        let (status, body) = send(
            &app,
            json_request(Method::POST, "/api/admin/enforcement/run", Some(&admin), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["defaulted"], 0);

        let partner_id = Uuid::new_v4();
        let (status, _) = send(
            &app,
            json_request(
                Method::PUT,
                &format!("/api/partners/{}/webhook", partner_id),
                Some(&admin),
                json!({ "url": "https://partner.example.com/hooks", "secret": "partner-signing-secret-01" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            json_request(Method::POST, "/api/admin/webhooks/999/retry", Some(&admin), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_device_endpoints_fail_closed_without_key() {
        let h = Harness::new();
        h.register_device("HW-403").await;
        let app = app_router(h.state.clone());

        let (status, _) = send(&app, get("/api/devices/HW-403/status", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_device_agent_reads_status_with_key() {
        let h = configured();
        h.active_loan("HW-404", None).await;
        let app = app_router(h.state.clone());

        let (status, _) = send(&app, get("/api/devices/HW-404/status", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/devices/HW-404/status")
            .header("X-Device-Key", DEVICE_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "UNLOCKED");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/devices/HW-404/heartbeat")
            .header("X-Device-Key", DEVICE_KEY)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["last_heartbeat"].is_string());
    }

    fn gateway_request(body: &Value, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/gateway")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Gateway-Signature", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_gateway_callback_requires_valid_signature() {
        let h = configured();
        let loan = h.standard_loan("HW-405", None).await;
        let app = app_router(h.state.clone());

        let body = json!({ "loan_id": loan.id, "amount": 100_000, "reference": "GW-1" });

        let (status, _) = send(&app, gateway_request(&body, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = signer::signature_header("wrong-secret", body.to_string().as_bytes()).unwrap();
        let (status, _) = send(&app, gateway_request(&body, Some(forged))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signature =
            signer::signature_header(GATEWAY_SECRET, body.to_string().as_bytes()).unwrap();
        let (status, response) = send(&app, gateway_request(&body, Some(signature))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["data"]["loan_status"], "ACTIVE");
        assert_eq!(response["data"]["payment_type"], "DOWN_PAYMENT");
    }

    #[tokio::test]
    async fn test_gateway_callback_fails_closed_without_secret() {
        let h = Harness::new();
        let loan = h.standard_loan("HW-406", None).await;
        let app = app_router(h.state.clone());

        let body = json!({ "loan_id": loan.id, "amount": 100_000, "reference": "GW-1" });
        let signature = signer::signature_header("anything", body.to_string().as_bytes()).unwrap();
        let (status, _) = send(&app, gateway_request(&body, Some(signature))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let stored = h.state.loan_service.get_loan_state(&h.merchant, loan.id).await.unwrap();
        assert_eq!(stored.total_paid, 0);
    }
}
