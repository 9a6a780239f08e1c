//! Webhook gateway: axum server receiving provider callbacks.
//!
//! Handlers validate authenticity, normalize the payload, deduplicate, and
//! acknowledge immediately; pipeline work runs on detached tasks so the
//! provider never waits on an AI call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::channels::{
    linkmobility::LinkMobilityPayload, messenger::MessengerPayload, sendgrid::SendGridPayload,
    skebby::SkebbyPayload, twilio::TwilioPayload,
};
use crate::config::{Config, Environment};
use crate::message::{ProviderKind, WebhookEvent};
use crate::pipeline::MessagePipeline;
use crate::security::{constant_time_eq, verify_hmac_sha256_hex, verify_twilio_signature};

const TWIML_ACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// How often the rate limiter sweeps stale client entries from its map.
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300;

#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    max_keys: usize,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            limit_per_window,
            window,
            max_keys: max_keys.max(1),
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    fn prune_stale(requests: &mut HashMap<String, Vec<Instant>>, cutoff: Instant) {
        requests.retain(|_, timestamps| {
            timestamps.retain(|t| *t > cutoff);
            !timestamps.is_empty()
        });
    }

    pub fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or_else(Instant::now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        if last_sweep.elapsed() >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS) {
            Self::prune_stale(requests, cutoff);
            *last_sweep = now;
        }

        if !requests.contains_key(key) && requests.len() >= self.max_keys {
            // Stale cleanup before eviction under cardinality pressure.
            Self::prune_stale(requests, cutoff);
            *last_sweep = now;

            if requests.len() >= self.max_keys {
                let evict_key = requests
                    .iter()
                    .min_by_key(|(_, timestamps)| timestamps.last().copied().unwrap_or(cutoff))
                    .map(|(k, _)| k.clone());
                if let Some(evict_key) = evict_key {
                    requests.remove(&evict_key);
                }
            }
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

/// TTL store over `(provider, message_id)` keys. Providers redeliver
/// unacknowledged webhooks; the second delivery must not reach the pipeline.
#[derive(Debug)]
pub struct DedupStore {
    ttl: Duration,
    max_keys: usize,
    keys: Mutex<HashMap<String, Instant>>,
}

impl DedupStore {
    pub fn new(ttl: Duration, max_keys: usize) -> Self {
        Self {
            ttl,
            max_keys: max_keys.max(1),
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if this key is new and is now recorded.
    pub fn record_if_new(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        keys.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if keys.contains_key(key) {
            return false;
        }

        if keys.len() >= self.max_keys {
            let evict_key = keys
                .iter()
                .min_by_key(|(_, seen_at)| *seen_at)
                .map(|(k, _)| k.clone());
            if let Some(evict_key) = evict_key {
                keys.remove(&evict_key);
            }
        }

        keys.insert(key.to_owned(), now);
        true
    }
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    first
        .parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| ip.to_string())
}

/// Rate-limit key for one request: the forwarded client IP when the proxy
/// header is trusted, the peer address otherwise.
fn client_key(state: &AppState, headers: &HeaderMap, peer_addr: SocketAddr) -> String {
    if state.trust_forwarded_headers {
        if let Some(ip) = forwarded_client_ip(headers) {
            return ip;
        }
    }
    peer_addr.ip().to_string()
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MessagePipeline>,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub dedup: Arc<DedupStore>,
    pub environment: Environment,
    pub trust_forwarded_headers: bool,
    pub public_url: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub linkmobility_secret: Option<String>,
    pub facebook_verify_token: Option<String>,
    pub skebby_service_number: String,
}

impl AppState {
    pub fn new(pipeline: Arc<MessagePipeline>, config: &Config) -> Self {
        Self {
            pipeline,
            rate_limiter: Arc::new(SlidingWindowRateLimiter::new(
                config.gateway.rate_limit_requests,
                Duration::from_secs(config.gateway.rate_limit_window_secs),
                1024,
            )),
            dedup: Arc::new(DedupStore::new(
                Duration::from_secs(config.gateway.dedup_ttl_secs),
                4096,
            )),
            environment: config.environment,
            trust_forwarded_headers: config.gateway.trust_forwarded_headers,
            public_url: config.gateway.public_url.clone(),
            twilio_auth_token: config
                .providers
                .twilio
                .as_ref()
                .map(|t| t.auth_token.clone()),
            linkmobility_secret: config
                .providers
                .linkmobility
                .as_ref()
                .map(|l| l.webhook_secret.clone()),
            facebook_verify_token: config
                .providers
                .facebook
                .as_ref()
                .map(|f| f.verify_token.clone()),
            skebby_service_number: config
                .providers
                .skebby
                .as_ref()
                .map(|s| s.service_number.clone())
                .unwrap_or_default(),
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhooks/test", get(handle_test))
        .route("/webhooks/info", get(handle_info))
        .route("/webhooks/twilio/whatsapp", post(handle_twilio))
        .route("/webhooks/linkmobility/whatsapp", post(handle_linkmobility))
        .route("/webhooks/skebby/sms", post(handle_skebby))
        .route("/webhooks/sendgrid/inbound", post(handle_sendgrid))
        .route(
            "/webhooks/facebook/messenger",
            get(handle_facebook_verify).post(handle_facebook),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
}

/// Bind and serve until the task is cancelled.
pub async fn serve(state: AppState, config: &Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, environment = config.environment.as_str(), "gateway listening");

    let app = router(
        state,
        config.gateway.max_body_bytes,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── Shared handler plumbing ────────────────────────────────────────────────

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": detail})),
    )
        .into_response()
}

fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({"error": "rate limit exceeded"})),
    )
        .into_response()
}

fn json_ack() -> Response {
    Json(serde_json::json!({"success": true})).into_response()
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> &'h str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Signature verification is mandatory in production only; elsewhere an
/// invalid or missing signature is logged and waved through so tunnels and
/// test harnesses work without provider credentials.
fn signature_ok(
    state: &AppState,
    provider: ProviderKind,
    secret: Option<&str>,
    valid: impl FnOnce(&str) -> bool,
) -> bool {
    let Some(secret) = secret else {
        if state.environment.enforce_signatures() {
            tracing::error!(%provider, "no webhook secret configured in production");
            return false;
        }
        tracing::warn!(%provider, "no webhook secret configured, skipping verification");
        return true;
    };

    if valid(secret) {
        return true;
    }

    if state.environment.enforce_signatures() {
        tracing::warn!(%provider, "webhook signature verification failed");
        return false;
    }
    tracing::warn!(%provider, "invalid webhook signature ignored outside production");
    true
}

/// Dedup, then hand the event to the pipeline on a detached task. The
/// handler's ack never waits on classification or sends.
fn process_event(state: &AppState, event: WebhookEvent) {
    match event {
        WebhookEvent::Message(message) => {
            if !state.dedup.record_if_new(&message.dedup_key()) {
                tracing::info!(key = %message.dedup_key(), "duplicate delivery ignored");
                return;
            }
            let pipeline = Arc::clone(&state.pipeline);
            tokio::spawn(async move {
                pipeline.handle(message).await;
            });
        }
        WebhookEvent::Status(status) => state.pipeline.handle_status(&status),
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /webhooks/twilio/whatsapp: form body, TwiML ack.
async fn handle_twilio(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.rate_limiter.allow(&client_key(&state, &headers, peer_addr)) {
        return too_many_requests();
    }

    let signature = header_str(&headers, "X-Twilio-Signature");
    if !signature_ok(
        &state,
        ProviderKind::Twilio,
        state.twilio_auth_token.as_deref(),
        |secret| verify_twilio_signature(secret, &body, signature),
    ) {
        return unauthorized("invalid signature");
    }

    match serde_urlencoded::from_bytes::<TwilioPayload>(&body) {
        Ok(payload) => {
            if let Some(event) = payload.into_event() {
                process_event(&state, event);
            }
        }
        Err(error) => {
            // Malformed payloads are acked: Twilio would retry forever.
            tracing::warn!(error = %error, "twilio: malformed payload acknowledged");
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        TWIML_ACK,
    )
        .into_response()
}

/// POST /webhooks/linkmobility/whatsapp: JSON body, HMAC-SHA256 header.
async fn handle_linkmobility(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.rate_limiter.allow(&client_key(&state, &headers, peer_addr)) {
        return too_many_requests();
    }

    let signature = header_str(&headers, "X-Link-Signature");
    if !signature_ok(
        &state,
        ProviderKind::LinkMobility,
        state.linkmobility_secret.as_deref(),
        |secret| verify_hmac_sha256_hex(secret, &body, signature),
    ) {
        return unauthorized("invalid signature");
    }

    match serde_json::from_slice::<LinkMobilityPayload>(&body) {
        Ok(payload) => {
            if let Some(event) = payload.into_event() {
                process_event(&state, event);
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "linkmobility: malformed payload acknowledged");
        }
    }
    json_ack()
}

/// POST /webhooks/skebby/sms: JSON body, no signature scheme.
async fn handle_skebby(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.rate_limiter.allow(&client_key(&state, &headers, peer_addr)) {
        return too_many_requests();
    }

    match serde_json::from_slice::<SkebbyPayload>(&body) {
        Ok(payload) => {
            if let Some(event) = payload.into_event(&state.skebby_service_number) {
                process_event(&state, event);
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "skebby: malformed payload acknowledged");
        }
    }
    json_ack()
}

/// POST /webhooks/sendgrid/inbound: inbound-parse JSON.
async fn handle_sendgrid(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.rate_limiter.allow(&client_key(&state, &headers, peer_addr)) {
        return too_many_requests();
    }

    match serde_json::from_slice::<SendGridPayload>(&body) {
        Ok(payload) => {
            if let Some(event) = payload.into_event() {
                process_event(&state, event);
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "sendgrid: malformed payload acknowledged");
        }
    }
    json_ack()
}

#[derive(Debug, serde::Deserialize)]
pub struct FacebookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhooks/facebook/messenger: subscription handshake. The challenge
/// is echoed verbatim only when the verify token matches in constant time.
async fn handle_facebook_verify(
    State(state): State<AppState>,
    Query(params): Query<FacebookVerifyQuery>,
) -> Response {
    let Some(expected) = state.facebook_verify_token.as_deref() else {
        return (StatusCode::NOT_FOUND, "Messenger not configured".to_string()).into_response();
    };

    let token_matches = params
        .verify_token
        .as_deref()
        .is_some_and(|t| constant_time_eq(t, expected));

    if params.mode.as_deref() == Some("subscribe") && token_matches {
        if let Some(challenge) = params.challenge {
            tracing::info!("messenger webhook verified");
            return (StatusCode::OK, challenge).into_response();
        }
        return (StatusCode::BAD_REQUEST, "Missing hub.challenge".to_string()).into_response();
    }

    tracing::warn!("messenger webhook verification failed");
    (StatusCode::FORBIDDEN, "Forbidden".to_string()).into_response()
}

/// POST /webhooks/facebook/messenger: page events, possibly batched.
async fn handle_facebook(
    State(state): State<AppState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.rate_limiter.allow(&client_key(&state, &headers, peer_addr)) {
        return too_many_requests();
    }

    match serde_json::from_slice::<MessengerPayload>(&body) {
        Ok(payload) => {
            for event in payload.into_events() {
                process_event(&state, event);
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "messenger: malformed payload acknowledged");
        }
    }
    json_ack()
}

const WEBHOOK_PATHS: &[(&str, &str, &str)] = &[
    ("twilio", "/webhooks/twilio/whatsapp", "X-Twilio-Signature"),
    (
        "linkmobility",
        "/webhooks/linkmobility/whatsapp",
        "X-Link-Signature",
    ),
    ("skebby", "/webhooks/skebby/sms", ""),
    ("sendgrid", "/webhooks/sendgrid/inbound", ""),
    ("facebook", "/webhooks/facebook/messenger", ""),
];

/// GET /webhooks/test: operational status and endpoint inventory.
async fn handle_test(State(state): State<AppState>) -> impl IntoResponse {
    let endpoints: Vec<_> = WEBHOOK_PATHS
        .iter()
        .map(|(provider, path, _)| serde_json::json!({"provider": provider, "path": path}))
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "environment": state.environment.as_str(),
        "signatures_enforced": state.environment.enforce_signatures(),
        "endpoints": endpoints,
    }))
}

/// GET /webhooks/info: fully-qualified URLs to paste into provider consoles.
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    let base = state
        .public_url
        .clone()
        .unwrap_or_else(|| "http://localhost:8088".to_string());
    let base = base.trim_end_matches('/');

    let providers: Vec<_> = WEBHOOK_PATHS
        .iter()
        .map(|(provider, path, signature_header)| {
            serde_json::json!({
                "provider": provider,
                "url": format!("{base}{path}"),
                "signature_header": if signature_header.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String((*signature_header).to_string())
                },
            })
        })
        .collect();

    Json(serde_json::json!({"public_url": base, "providers": providers}))
}
