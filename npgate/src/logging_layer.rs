//! Tower layer for structured request/response logging.
//!
//! Uses `tower_http::trace::TraceLayer` for the middleware plumbing, with
//! custom callbacks so every admission call gets one span carrying a
//! request id, and header values that could carry credentials are redacted.

use http::{HeaderMap, Request, Response};
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Headers that are redacted from logs.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Header values longer than this are truncated in logs.
const MAX_VALUE_LEN: usize = 256;

/// Random per-process high half of every generated correlation ID.
static CORRELATION_PREFIX: LazyLock<u64> =
    LazyLock::new(|| (Uuid::new_v4().as_u128() >> 64) as u64);

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a UUID v4-shaped correlation ID without hitting the RNG.
///
/// A random per-process prefix plus a counter; the version and variant bits
/// are forced so the result still parses as v4.
pub fn correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = (u128::from(prefix) << 64) | u128::from(counter);
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

/// Creates the logging/tracing layer.
pub fn logging_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    DefaultOnBodyChunk,
    DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Span creator attaching a request id to every request span.
///
/// Uses `x-request-id` when the caller sent one, otherwise a fresh
/// [`correlation_id`].
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| correlation_id().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// Logs method and URI, and sanitized headers at debug level.
#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &Request<B>, _span: &tracing::Span) {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            "Request received"
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(headers = ?SanitizedHeaders(request.headers()), "Request headers");
        }
    }
}

/// Logs status and latency.
#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &tracing::Span) {
        info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis(),
            "Response sent"
        );
    }
}

/// Logs 5xx responses and service errors.
#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for OnFailureLogger {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            "Request failed"
        );
    }
}

/// Debug view of a header map with sensitive values redacted.
struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.0 {
            let name = name.as_str();
            if SENSITIVE_HEADERS
                .iter()
                .any(|s| name.eq_ignore_ascii_case(s))
            {
                map.entry(&name, &"[REDACTED]");
                continue;
            }
            match value.to_str() {
                Ok(v) if v.len() <= MAX_VALUE_LEN => map.entry(&name, &v),
                Ok(v) => map.entry(&name, &format!("<{} bytes>", v.len())),
                Err(_) => map.entry(&name, &format!("<binary: {} bytes>", value.len())),
            };
        }
        map.finish()
    }
}
