use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use governor::middleware::NoOpMiddleware;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{ErrorBody, INTERNAL_ERROR_MESSAGE};
use crate::{Raffle, ResultStore};

mod http;

pub struct Api<S> {
    raffle: Arc<Raffle<S>>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

/// Coarse per-IP flood guard in front of the handlers. The draw pipeline
/// still applies its own per-bucket window.
fn governor_config(per_second: Option<u64>, burst: Option<u32>) -> Option<Arc<IpGovernorConfig>> {
    match (per_second, burst) {
        (Some(rate_per_second), Some(burst_size)) if rate_per_second > 0 && burst_size > 0 => {
            let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
            let config = GovernorConfigBuilder::default()
                .period(Duration::from_nanos(nanos_per_request))
                .burst_size(burst_size)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .or_else(|| {
                    tracing::warn!("invalid rate-limit config; falling back to defaults");
                    default_governor_config()
                });
            config.map(Arc::new)
        }
        _ => None,
    }
}

impl<S: ResultStore> Api<S> {
    pub fn new(raffle: Arc<Raffle<S>>) -> Self {
        Self { raffle }
    }

    pub fn router(&self) -> Router {
        let config = self.raffle.config();

        let router = Router::new()
            .route("/api/sorteo", any(http::sorteo::<S>))
            .route("/healthz", get(http::healthz))
            .route("/metrics", get(http::metrics::<S>))
            .route("/metrics/prometheus", get(http::prometheus_metrics::<S>));

        let router = match governor_config(
            config.http_rate_limit_per_second,
            config.http_rate_limit_burst,
        ) {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(CatchPanicLayer::custom(panic_response));
        let router = router.layer(middleware::from_fn_with_state(
            self.raffle.clone(),
            request_id_middleware::<S>,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.raffle.clone())
    }
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "http.panic");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new(INTERNAL_ERROR_MESSAGE)),
    )
        .into_response()
}

async fn request_id_middleware<S: ResultStore>(
    AxumState(raffle): AxumState<Arc<Raffle<S>>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => raffle.metrics().inc_reject_body(),
        StatusCode::INTERNAL_SERVER_ERROR => raffle.metrics().inc_internal_error(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DrawRecord, FairnessMode, MemoryStore, RaffleConfig, Secret, StoreError};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request as HttpRequest};
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn config() -> RaffleConfig {
        RaffleConfig {
            secret: Secret::new("s"),
            ..RaffleConfig::default()
        }
    }

    /// Code issued to a bucket-only loss from 10.0.0.* at the fixed clock.
    fn bucket_code() -> String {
        raffle_execution::issue_code(
            "2024-01-01T10:00:00.000Z",
            &raffle_execution::BucketKey::from_address("10.0.0.7"),
            None,
            false,
            "s",
        )
    }

    fn router_with(config: RaffleConfig) -> (Router, Arc<Raffle<MemoryStore>>) {
        router_over(config, MemoryStore::new())
    }

    fn router_over<S: ResultStore>(config: RaffleConfig, store: S) -> (Router, Arc<Raffle<S>>) {
        let raffle = Arc::new(Raffle::new(config, store).with_clock(fixed_clock));
        (Api::new(raffle.clone()).router(), raffle)
    }

    /// Store whose lookups fail, either with an error or by panicking.
    struct BrokenStore {
        panic: bool,
    }

    impl ResultStore for BrokenStore {
        async fn cached_result(
            &self,
            _client_id: &str,
            _day: &str,
        ) -> Result<Option<DrawRecord>, StoreError> {
            if self.panic {
                panic!("result lookup exploded at redis://secret-host");
            }
            let err = serde_json::from_str::<DrawRecord>("{").unwrap_err();
            Err(StoreError::Corrupt(err))
        }

        async fn store_result(
            &self,
            _client_id: &str,
            record: DrawRecord,
        ) -> Result<DrawRecord, StoreError> {
            Ok(record)
        }

        async fn store_issued_code(&self, _code: &str, _issued_at_ms: u64) -> Result<(), StoreError> {
            Ok(())
        }

        async fn evict_older_than(
            &self,
            _now_ms: u64,
            _max_age: Duration,
        ) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn post(origin: Option<&str>, forwarded: &str, body: &'static str) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("content-type", "application/json")
            .header("x-forwarded-for", forwarded);
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(router: &Router, request: HttpRequest<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_winning_client_draw() {
        let (router, _) = router_with(RaffleConfig {
            prizes: "A:30,B:70".parse().unwrap(),
            ..config()
        });
        let (status, headers, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", r#"{"clientId":"frank"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(headers.get("vary").unwrap(), "Origin");
        assert!(headers.get("x-request-id").is_some());
        assert_eq!(body["ok"], true);
        assert_eq!(body["win"], true);
        assert_eq!(body["prize"], "B");
        assert_eq!(body["mensaje"], "🎁 ¡Ganaste B!");
        assert_eq!(body["nowUtc"], "2024-01-01T10:00:00.000Z");
        assert_eq!(body["clientId"], "frank");
        assert_eq!(body["code"].as_str().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_repeat_client_gets_identical_body() {
        let (router, raffle) = router_with(config());
        let first = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", r#"{"clientId":"abc"}"#),
        )
        .await;
        let second = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.99", r#"{"clientId":"abc"}"#),
        )
        .await;

        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(first.2, second.2);
        assert_eq!(first.2["win"], false);
        assert_eq!(raffle.metrics().snapshot().replays, 1);
    }

    #[tokio::test]
    async fn test_bucket_draw_code() {
        let (router, _) = router_with(config());
        let (status, _, body) =
            send(&router, post(Some("http://localhost:3000"), "10.0.0.7", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["win"], false);
        assert_eq!(body["code"], bucket_code());
        assert!(body.get("clientId").is_none());
        assert!(body.get("prize").is_none());
    }

    #[tokio::test]
    async fn test_denied_origin_has_no_cors() {
        let (router, raffle) = router_with(config());
        for origin in [None, Some("https://evil.example"), Some("http://localhost:3000.evil.com")] {
            let (status, headers, body) = send(&router, post(origin, "10.0.0.7", "{}")).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert!(headers.get("access-control-allow-origin").is_none());
            assert_eq!(body["ok"], false);
            assert_eq!(body["error"], "Acceso denegado");
        }
        let snapshot = raffle.metrics().snapshot();
        assert_eq!(snapshot.reject_origin, 3);
        assert_eq!(snapshot.draws, 0);
    }

    #[tokio::test]
    async fn test_denied_preview_origin_when_previews_disabled() {
        let (router, raffle) = router_with(RaffleConfig {
            allow_preview_domains: false,
            ..config()
        });
        let (status, headers, body) = send(
            &router,
            post(Some("https://my-app-git-main.vercel.app"), "10.0.0.7", "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.get("access-control-allow-origin").is_none());
        assert_eq!(body["error"], "Acceso denegado");
        assert_eq!(raffle.metrics().snapshot().reject_origin, 1);
    }

    #[tokio::test]
    async fn test_referer_wins_over_origin() {
        let (router, _) = router_with(config());
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("origin", "https://evil.example")
            .header("referer", "http://localhost:3000/promo")
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("origin", "http://localhost:3000")
            .header("referer", "https://evil.example/page")
            .header("x-forwarded-for", "10.0.0.7")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_opaque_internal_error() {
        let (router, raffle) = router_over(config(), BrokenStore { panic: false });
        let (status, headers, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", r#"{"clientId":"abc"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"ok": false, "error": "Error interno"}));
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
        let snapshot = raffle.metrics().snapshot();
        assert_eq!(snapshot.internal_errors, 1);
        assert_eq!(snapshot.draws, 0);
    }

    #[tokio::test]
    async fn test_panic_in_pipeline_becomes_internal_error() {
        let (router, raffle) = router_over(config(), BrokenStore { panic: true });
        let (status, headers, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", r#"{"clientId":"abc"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"ok": false, "error": "Error interno"}));
        assert!(headers.get("x-request-id").is_some());
        assert_eq!(raffle.metrics().snapshot().internal_errors, 1);

        let (status, _, _) = send(&router, post(Some("http://localhost:3000"), "10.0.0.8", "")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_referer_fallback_and_preview_domain() {
        let (router, _) = router_with(config());
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("referer", "https://my-app-git-main.vercel.app/promo?x=1")
            .header("x-real-ip", "10.0.0.7")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "https://my-app-git-main.vercel.app"
        );
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (router, raffle) = router_with(config());
        let request = HttpRequest::builder()
            .method(Method::GET)
            .uri("/api/sorteo")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(headers.get("access-control-allow-origin").is_none());
        assert_eq!(headers.get("access-control-allow-methods").unwrap(), "POST, OPTIONS");
        assert_eq!(body["error"], "Método no permitido");
        assert_eq!(raffle.metrics().snapshot().reject_method, 1);
    }

    #[tokio::test]
    async fn test_preflight() {
        let (router, raffle) = router_with(config());
        let request = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/api/sorteo")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(headers.get("access-control-allow-headers").unwrap(), "Content-Type");
        assert_eq!(body, Value::Null);

        let request = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/api/sorteo")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get("access-control-allow-origin").is_none());
        assert_eq!(raffle.metrics().snapshot().reject_origin, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_per_bucket() {
        let (router, _) = router_with(config());
        for i in 0..20 {
            let forwarded = format!("10.0.0.{i}");
            let request = HttpRequest::builder()
                .method(Method::POST)
                .uri("/api/sorteo")
                .header("origin", "http://localhost:3000")
                .header("x-forwarded-for", forwarded)
                .body(Body::empty())
                .unwrap();
            let (status, _, _) = send(&router, request).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, headers, body) =
            send(&router, post(Some("http://localhost:3000"), "10.0.0.200", "")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Demasiadas solicitudes, probá en un minuto");
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );

        let (status, _, _) =
            send(&router, post(Some("http://localhost:3000"), "10.0.1.1", "")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_for_uses_first_entry() {
        let (router, _) = router_with(config());
        let (_, _, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7, 172.16.0.1", ""),
        )
        .await;
        assert_eq!(body["code"], bucket_code());
    }

    #[tokio::test]
    async fn test_malformed_body_degrades_to_bucket_draw() {
        let (router, _) = router_with(config());
        let (status, _, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], bucket_code());
    }

    #[tokio::test]
    async fn test_malformed_body_rejected_in_strict_mode() {
        let (router, raffle) = router_with(RaffleConfig {
            strict_body: true,
            ..config()
        });
        let (status, headers, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", "{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Solicitud inválida");
        assert!(headers.get("access-control-allow-origin").is_some());
        assert_eq!(raffle.metrics().snapshot().reject_body, 1);

        let (status, _, _) =
            send(&router, post(Some("http://localhost:3000"), "10.0.0.7", "")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_network_mode_ignores_client_id() {
        let (router, _) = router_with(RaffleConfig {
            fairness: FairnessMode::Network,
            ..config()
        });
        let (_, _, body) = send(
            &router,
            post(Some("http://localhost:3000"), "10.0.0.7", r#"{"clientId":"frank"}"#),
        )
        .await;
        assert_eq!(body["win"], false);
        assert_eq!(body["code"], bucket_code());
        assert!(body.get("clientId").is_none());
    }

    #[tokio::test]
    async fn test_missing_address_uses_unknown_bucket() {
        let (router, _) = router_with(config());
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (router, raffle) = router_with(RaffleConfig {
            http_body_limit_bytes: Some(16),
            ..config()
        });
        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/api/sorteo")
            .header("origin", "http://localhost:3000")
            .body(Body::from(format!(r#"{{"clientId":"{}"}}"#, "x".repeat(64))))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(raffle.metrics().snapshot().reject_body, 1);
    }

    #[tokio::test]
    async fn test_healthz_and_metrics() {
        let (router, _) = router_with(config());
        let request = HttpRequest::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        send(&router, post(Some("http://localhost:3000"), "10.0.0.7", "")).await;
        let request = HttpRequest::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["draws"], 1);

        let request = HttpRequest::builder()
            .uri("/metrics/prometheus")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("raffle_draws_total 1\n"));
    }

    #[tokio::test]
    async fn test_metrics_require_token_when_configured() {
        let (router, _) = router_with(RaffleConfig {
            metrics_auth_token: Some("t0k3n".to_string()),
            ..config()
        });
        let request = HttpRequest::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = HttpRequest::builder()
            .uri("/metrics")
            .header("authorization", "Bearer t0k3n")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = HttpRequest::builder()
            .uri("/metrics/prometheus")
            .header("x-metrics-token", "t0k3n")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_governor_config_requires_both_values() {
        assert!(governor_config(None, Some(10)).is_none());
        assert!(governor_config(Some(5), None).is_none());
        assert!(governor_config(Some(0), Some(10)).is_none());
        assert!(governor_config(Some(5), Some(10)).is_some());
    }
}
