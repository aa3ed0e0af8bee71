//! Router assembly: HTTP endpoints, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - API routes at the root (`/generate-class`, `/submit-answer`, ...)
/// - Static SPA from `./static` with index fallback
/// - CORS restricted to `cors_origins`, credentials allowed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/", get(http::http_root))
        .route("/health", get(http::http_health))
        .route("/about", get(http::http_about))
        .route("/remaining-calls", get(http::http_remaining_calls))
        .route("/generate-class", post(http::http_generate_class))
        .route("/submit-answer", post(http::http_submit_answer))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "arcade_backend", origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Credentials rule out wildcards, so methods/headers mirror the preflight.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::quota::store::testing::FlakyStore;
    use crate::test_support::{test_clock, test_state, test_state_with, ScriptedProvider};

    const PLAN: &str = "## Welcome\nHi **there** 🚀\n## Badge\n🏅 **Grammar Guru**\n";

    fn app(provider: ScriptedProvider) -> Router {
        let (state, _) = test_state(provider);
        build_router(Arc::new(state), &["http://localhost:3000".to_string()])
    }

    fn class_body() -> Value {
        json!({
            "student_level": "B1",
            "skill_focus": "Grammar",
            "teacher": "Emma",
            "reason": "travel",
            "age": 30
        })
    }

    fn answer_body() -> Value {
        json!({
            "answer": "I has a dog",
            "class_plan": "## Welcome",
            "student_level": "A1",
            "skill_focus": "Grammar",
            "reason": "travel"
        })
    }

    fn post(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn json_of(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_is_public() {
        let res = app(ScriptedProvider::ok(PLAN)).oneshot(get_req("/", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_of(res).await["message"], "Language Arcade Backend is running!");
    }

    #[tokio::test]
    async fn health_reports_fallback_mode() {
        let res = app(ScriptedProvider::ok(PLAN)).oneshot(get_req("/health", None)).await.unwrap();
        let body = json_of(res).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["shared_quota_store"], false);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let app = app(ScriptedProvider::ok(PLAN));
        let res = app.clone().oneshot(get_req("/about", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let res = app.clone().oneshot(get_req("/about", Some("forged"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.oneshot(post("/generate-class", None, &class_body())).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn about_for_signed_in_user() {
        let res = app(ScriptedProvider::ok(PLAN)).oneshot(get_req("/about", Some("token-u1"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(json_of(res).await["content"].as_str().unwrap().contains("Arcade"));
    }

    #[tokio::test]
    async fn generate_class_returns_plan_badge_and_remaining() {
        let res = app(ScriptedProvider::ok(PLAN))
            .oneshot(post("/generate-class", Some("token-u1"), &class_body()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-remaining-calls"], "4");
        let body = json_of(res).await;
        assert_eq!(body["badge"], "Grammar Guru");
        assert_eq!(body["remaining_calls"], 4);
        assert!(body["class_plan"].as_str().unwrap().starts_with("## Welcome"));
    }

    #[tokio::test]
    async fn quota_runs_out_with_retry_hint() {
        let app = app(ScriptedProvider::ok("Nice work."));
        for expected in (0..5).rev() {
            let res = app.clone().oneshot(post("/submit-answer", Some("token-u1"), &answer_body())).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(json_of(res).await["remaining_calls"], expected);
        }

        let res = app.clone().oneshot(post("/submit-answer", Some("token-u1"), &answer_body())).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["x-remaining-calls"], "0");
        // test clock sits at 22:00 UTC
        assert_eq!(res.headers()[header::RETRY_AFTER], "7200");
        assert_eq!(json_of(res).await["detail"], "Daily submit limit (5) reached. Try again tomorrow.");

        let res = app.oneshot(get_req("/remaining-calls", Some("token-u1"))).await.unwrap();
        let body = json_of(res).await;
        assert_eq!(body["remaining_calls"]["submit"], 0);
        assert_eq!(body["remaining_calls"]["generate"], 5);
    }

    #[tokio::test]
    async fn other_users_keep_their_quota() {
        let app = app(ScriptedProvider::ok("Nice work."));
        for _ in 0..5 {
            app.clone().oneshot(post("/submit-answer", Some("token-alice"), &answer_body())).await.unwrap();
        }
        let res = app.oneshot(post("/submit-answer", Some("token-bob"), &answer_body())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_of(res).await["remaining_calls"], 4);
    }

    #[tokio::test]
    async fn invalid_enum_is_unprocessable() {
        let mut body = class_body();
        body["teacher"] = json!("Bob");
        let res = app(ScriptedProvider::ok(PLAN))
            .oneshot(post("/generate-class", Some("token-u1"), &body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
        assert!(json_of(res).await["detail"].as_str().unwrap().contains("unknown variant"));
    }

    #[tokio::test]
    async fn undecodable_bodies_use_the_detail_shape() {
        let app = app(ScriptedProvider::ok(PLAN));

        let mut body = class_body();
        body["age"] = json!(300);
        let res = app.clone().oneshot(post("/generate-class", Some("token-u1"), &body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json_of(res).await["detail"].is_string());

        let req = Request::builder()
            .method("POST")
            .uri("/submit-answer")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer token-u1")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_of(res).await["detail"].is_string());

        // neither failure touched the quota
        let res = app.oneshot(get_req("/remaining-calls", Some("token-u1"))).await.unwrap();
        let body = json_of(res).await;
        assert_eq!(body["remaining_calls"]["generate"], 5);
        assert_eq!(body["remaining_calls"]["submit"], 5);
    }

    #[tokio::test]
    async fn out_of_range_age_is_unprocessable() {
        let mut body = class_body();
        body["age"] = json!(3);
        let res = app(ScriptedProvider::ok(PLAN))
            .oneshot(post("/generate-class", Some("token-u1"), &body))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json_of(res).await["detail"].as_str().unwrap().contains("age"));
    }

    #[tokio::test]
    async fn provider_failures_map_to_status() {
        let res = app(ScriptedProvider::rate_limited())
            .oneshot(post("/generate-class", Some("token-u1"), &class_body()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let res = app(ScriptedProvider::unavailable())
            .oneshot(post("/submit-answer", Some("token-u1"), &answer_body()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn redis_outage_is_invisible_to_clients() {
        let primary = Arc::new(FlakyStore::new(true));
        let (state, _) = test_state_with(ScriptedProvider::ok(PLAN), Some(primary), test_clock());
        let app = build_router(Arc::new(state), &[]);

        let res = app.clone().oneshot(post("/generate-class", Some("token-u1"), &class_body())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_of(res).await["remaining_calls"], 4);

        let res = app.oneshot(get_req("/remaining-calls", Some("token-u1"))).await.unwrap();
        assert_eq!(json_of(res).await["remaining_calls"]["generate"], 4);
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/generate-class")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let res = app(ScriptedProvider::ok(PLAN)).oneshot(req).await.unwrap();
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
