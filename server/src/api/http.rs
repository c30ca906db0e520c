use axum::{
    body::Bytes,
    extract::{ConnectInfo, State as AxumState},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use raffle_execution::client_address;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::metrics::render_prometheus;
use crate::{DrawRecord, DrawRequest, Raffle, RaffleError, ResultStore};

/// Proxy headers consulted for the caller address, most trusted first.
const ADDRESS_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "x-vercel-forwarded-for",
    "cf-connecting-ip",
];

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrawBody {
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DrawResponse {
    ok: bool,
    win: bool,
    mensaje: String,
    now_utc: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prize: Option<String>,
}

impl From<DrawRecord> for DrawResponse {
    fn from(record: DrawRecord) -> Self {
        Self {
            ok: true,
            win: record.won,
            mensaje: record.mensaje,
            now_utc: record.now_utc,
            code: record.code,
            client_id: record.client_id,
            prize: record.prize,
        }
    }
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

/// Draw endpoint. Accepts any method so that wrong ones get the JSON 405.
pub(super) async fn sorteo<S: ResultStore>(
    AxumState(raffle): AxumState<Arc<Raffle<S>>>,
    method: Method,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        let check = raffle.check_origin(declared_origin(&headers));
        return with_cors(StatusCode::OK.into_response(), check.echo_origin.as_deref());
    }
    if method != Method::POST {
        raffle.metrics().inc_reject_method();
        return with_cors(RaffleError::InvalidMethod.into_response(), None);
    }

    let check = raffle.check_origin(declared_origin(&headers));
    if !check.allowed {
        raffle.metrics().inc_reject_origin();
        return RaffleError::OriginDenied.into_response();
    }
    let echo = check.echo_origin.as_deref();

    let client_id = match parse_body(&body) {
        Ok(body) => body.client_id,
        Err(err) if raffle.config().strict_body => {
            raffle.metrics().inc_reject_body();
            return with_cors(
                RaffleError::MalformedBody(err.to_string()).into_response(),
                echo,
            );
        }
        Err(err) => {
            tracing::debug!(%err, "raffle.body_ignored");
            None
        }
    };

    let address = client_address(
        ADDRESS_HEADERS
            .iter()
            .map(|name| headers.get(*name).and_then(|value| value.to_str().ok())),
        peer.map(|ConnectInfo(addr)| addr.ip()),
    );

    let response = match raffle.draw(DrawRequest { address, client_id }).await {
        Ok(record) => Json(DrawResponse::from(record)).into_response(),
        Err(err) => err.into_response(),
    };
    with_cors(response, echo)
}

pub(super) async fn metrics<S: ResultStore>(
    headers: HeaderMap,
    AxumState(raffle): AxumState<Arc<Raffle<S>>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&raffle, &headers) {
        return status.into_response();
    }
    Json(raffle.metrics().snapshot()).into_response()
}

pub(super) async fn prometheus_metrics<S: ResultStore>(
    headers: HeaderMap,
    AxumState(raffle): AxumState<Arc<Raffle<S>>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&raffle, &headers) {
        return status.into_response();
    }
    let body = render_prometheus(&raffle.metrics().snapshot());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response()
}

fn metrics_auth_error<S: ResultStore>(raffle: &Raffle<S>, headers: &HeaderMap) -> Option<StatusCode> {
    let token = match raffle.config().metrics_auth_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => return None,
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok());
    if bearer == Some(token) || header_token == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

/// Declared origin of a browser request: `Referer`, falling back to `Origin`.
fn declared_origin(headers: &HeaderMap) -> Option<&str> {
    [header::REFERER, header::ORIGIN]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Empty bodies are an empty request.
fn parse_body(body: &[u8]) -> Result<DrawBody, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DrawBody::default());
    }
    serde_json::from_slice(body)
}

fn with_cors(mut response: Response, echo_origin: Option<&str>) -> Response {
    let headers = response.headers_mut();
    if let Some(value) = echo_origin.and_then(|origin| HeaderValue::from_str(origin).ok()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}
