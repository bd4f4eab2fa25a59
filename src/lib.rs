//! Core library for fieldrelay: the Dialogflow fulfillment relay that
//! forwards conversation analytics to Chatbase, plus the oilfield reporting
//! model the chatbot answers questions about.

pub mod chatbase;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod models;
pub mod platforms;
pub mod schema;
pub mod telemetry;

pub use config::AppConfig;

use axum::body::Bytes;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody},
    DefaultBodyLimit, State,
};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

use crate::chatbase::{AnalyticsSink, ChatbaseClient};
use crate::forwarder::{build_events, ForwardMode, Forwarder};
use crate::platforms::{Platform, WebhookHandler};
use crate::telemetry::{EventLog, WebhookRecord};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
}

/// Request counters and the latency histogram behind `/metrics`.
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub bad_requests_total: AtomicU64,
    pub schema_violations_total: AtomicU64,
    pub schema_rejections_total: AtomicU64,
    pub adapter_errors_total: AtomicU64,
    pub platform_requests: DashMap<String, AtomicU64>,
    // bucket upper bounds in ms
    pub hist_buckets: Vec<u64>,
    pub hist_counts: Vec<AtomicU64>,
    pub hist_sum_ms: AtomicU64,
    pub hist_count: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        let buckets: Vec<u64> = vec![1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000];
        Self {
            requests_total: AtomicU64::new(0),
            bad_requests_total: AtomicU64::new(0),
            schema_violations_total: AtomicU64::new(0),
            schema_rejections_total: AtomicU64::new(0),
            adapter_errors_total: AtomicU64::new(0),
            platform_requests: DashMap::new(),
            hist_counts: buckets.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_buckets: buckets,
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    fn observe_latency(&self, ms: u64) {
        self.hist_sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        // first bucket >= value
        for (idx, ub) in self.hist_buckets.iter().enumerate() {
            if ms <= *ub {
                self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    fn count_platform(&self, platform: &str) {
        if let Some(counter) = self.platform_requests.get(platform) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.platform_requests
            .entry(platform.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub api_key: Option<String>,
    pub strict_schema: bool,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub forwarder: Forwarder,
    pub events: EventLog,
    pub metrics: Arc<Metrics>,
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

/// Assemble state from a parsed configuration.  `sink` overrides the
/// Chatbase client built from `config.chatbase`; must run inside a tokio
/// runtime when forwarding is queued.
pub fn build_state(
    config: AppConfig,
    sink: Option<Arc<dyn AnalyticsSink>>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let AppConfig {
        chatbase,
        forward_mode,
        queue_capacity,
        retry,
        strict_schema,
        max_request_bytes,
        log_file,
        rotation,
        log_stdout,
        log_sample_n,
    } = config;

    let sink = match (sink, forward_mode) {
        (Some(s), _) => Some(s),
        (None, ForwardMode::Off) => None,
        (None, _) => {
            let client = ChatbaseClient::new(&chatbase.base_url, chatbase.timeout)?;
            Some(Arc::new(client) as Arc<dyn AnalyticsSink>)
        }
    };
    let forwarder = Forwarder::new(forward_mode, sink, queue_capacity, retry);
    tracing::info!(
        mode = forwarder.mode().as_str(),
        base_url = %chatbase.base_url,
        strict_schema,
        "analytics forwarding configured"
    );

    let events = EventLog::from_config(log_file.as_deref(), &rotation, log_stdout, log_sample_n);

    let start_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    Ok(AppState {
        api_key: chatbase.api_key,
        strict_schema,
        max_request_bytes,
        forwarder,
        events,
        metrics: Arc::new(Metrics::default()),
        process_start_epoch: start_time.as_secs_f64(),
        process_start_instant: Instant::now(),
    })
}

/// Build state from environment variables; see [`AppConfig::from_env`].
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    build_state(config, None)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/info/webhook", post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn bad_request(message: String) -> ErrorResponse {
    ErrorResponse {
        error_code: 4000,
        message,
        http_status: 400,
        diagnostics: None,
    }
}

/// Fulfillment webhook.  Answers `200 {}` once the body is valid JSON,
/// whatever happens to the analytics batch.
async fn webhook_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> axum::response::Response {
    let start = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let body = match body {
        Ok(b) => b,
        Err(rejection) => {
            state.metrics.bad_requests_total.fetch_add(1, Ordering::Relaxed);
            return handle_body_rejection(&state, rejection);
        }
    };
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) => {
            state.metrics.bad_requests_total.fetch_add(1, Ordering::Relaxed);
            return respond_with_error(bad_request(
                "Malformed request JSON: expected an object".into(),
            ));
        }
        Err(e) => {
            state.metrics.bad_requests_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "rejecting unparsable webhook body");
            return respond_with_error(bad_request(format!("Malformed request JSON: {}", e)));
        }
    };

    let violations = schema::check_webhook(&raw);
    if !violations.is_empty() {
        state
            .metrics
            .schema_violations_total
            .fetch_add(violations.len() as u64, Ordering::Relaxed);
        if state.strict_schema {
            state
                .metrics
                .schema_rejections_total
                .fetch_add(1, Ordering::Relaxed);
            return respond_with_error(ErrorResponse {
                error_code: 4220,
                message: format!("Request failed schema validation: {}", violations),
                http_status: 422,
                diagnostics: serde_json::to_value(&violations.violations).ok(),
            });
        }
        tracing::warn!(count = violations.len(), violations = %violations, "webhook request violates schema");
    }

    let handler = WebhookHandler::new(raw);
    let platform = Platform::detect(&handler);
    state.metrics.count_platform(platform.as_str());

    let outcome = if state.forwarder.mode() == ForwardMode::Off {
        forwarder::ForwardOutcome::Disabled.as_str()
    } else {
        match build_events(handler.raw(), state.api_key.as_deref().unwrap_or("")) {
            Ok(set) => state.forwarder.dispatch(set).await.as_str(),
            Err(err) => {
                state
                    .metrics
                    .adapter_errors_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(platform = %platform, error = %err, "could not build analytics batch");
                "skipped"
            }
        }
    };

    let latency_ms = start.elapsed().as_millis();
    state.metrics.observe_latency(latency_ms as u64);

    let mut record = WebhookRecord::now(platform.as_str(), outcome);
    record.intent = handler.intent_display_name().ok();
    record.session = handler.session_id().ok();
    record.schema_violations = violations.len();
    record.latency_ms = latency_ms;
    state.events.emit(&record);

    (StatusCode::OK, Json(serde_json::json!({}))).into_response()
}

fn handle_body_rejection(state: &AppState, rejection: BytesRejection) -> axum::response::Response {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            if let Some(limit) = state.max_request_bytes {
                tracing::warn!(limit, "request body exceeded configured limit");
            } else {
                tracing::warn!("request body exceeded default limit");
            }
            let message = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            respond_with_error(ErrorResponse {
                error_code: 4001,
                message,
                http_status: 413,
                diagnostics: None,
            })
        }
        other => respond_with_error(bad_request(format!("Failed to read request body: {}", other))),
    }
}

/// Health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "forwardMode": state.forwarder.mode().as_str(),
        "queueDepth": state.forwarder.queue_depth(),
        "strictSchema": state.strict_schema,
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let m = &state.metrics;
    let stats = state.forwarder.stats();

    let counters: [(&str, &str, u64); 10] = [
        (
            "fieldrelay_requests_total",
            "Webhook requests received",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_bad_requests_total",
            "Webhook requests rejected as malformed or oversized",
            m.bad_requests_total.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_schema_violations_total",
            "Schema violations found in webhook requests",
            m.schema_violations_total.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_schema_rejections_total",
            "Webhook requests rejected in strict schema mode",
            m.schema_rejections_total.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_adapter_errors_total",
            "Requests whose analytics batch could not be built",
            m.adapter_errors_total.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_forwarded_total",
            "Analytics batches delivered to Chatbase",
            stats.forwarded.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_forward_failed_total",
            "Analytics batches that failed after retries",
            stats.failed.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_forward_dropped_total",
            "Analytics batches dropped because the queue was full",
            stats.dropped.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_forward_retries_total",
            "Analytics delivery retries",
            stats.retries.load(Ordering::Relaxed),
        ),
        (
            "fieldrelay_event_lines_total",
            "Event log lines written",
            state.events.lines_total(),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }
    writeln!(
        &mut buf,
        "# HELP fieldrelay_event_write_errors_total Event log line write failures\n# TYPE fieldrelay_event_write_errors_total counter"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_event_write_errors_total {}",
        state.events.write_errors_total()
    )
    .ok();

    writeln!(
        &mut buf,
        "# HELP fieldrelay_platform_requests_total Webhook requests per detected platform\n# TYPE fieldrelay_platform_requests_total counter"
    )
    .ok();
    let mut platforms: Vec<(String, u64)> = m
        .platform_requests
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    platforms.sort();
    for (platform, count) in platforms {
        writeln!(
            &mut buf,
            "fieldrelay_platform_requests_total{{platform=\"{}\"}} {}",
            platform.replace('\\', "\\\\").replace('"', "\\\""),
            count
        )
        .ok();
    }

    writeln!(
        &mut buf,
        "# HELP fieldrelay_forward_queue_depth Analytics batches waiting in the queue\n# TYPE fieldrelay_forward_queue_depth gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_forward_queue_depth {}",
        state.forwarder.queue_depth()
    )
    .ok();

    // Histogram
    let count = m.hist_count.load(Ordering::Relaxed);
    writeln!(
        &mut buf,
        "# HELP fieldrelay_request_latency_ms Webhook latency histogram milliseconds"
    )
    .ok();
    writeln!(&mut buf, "# TYPE fieldrelay_request_latency_ms histogram").ok();
    let mut cumulative: u64 = 0;
    for (i, ub) in m.hist_buckets.iter().enumerate() {
        cumulative += m.hist_counts[i].load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "fieldrelay_request_latency_ms_bucket{{le=\"{}\"}} {}",
            ub, cumulative
        )
        .ok();
    }
    writeln!(
        &mut buf,
        "fieldrelay_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
        count
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_request_latency_ms_sum {}",
        m.hist_sum_ms.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(&mut buf, "fieldrelay_request_latency_ms_count {}", count).ok();

    writeln!(
        &mut buf,
        "# HELP fieldrelay_build_info Build information\n# TYPE fieldrelay_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_build_info{{version=\"{}\",forwardMode=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION"),
        state.forwarder.mode().as_str()
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP fieldrelay_log_file_size_bytes Current size in bytes of the event log (0 if disabled)\n# TYPE fieldrelay_log_file_size_bytes gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_log_file_size_bytes {}",
        state.events.file_size_bytes()
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP fieldrelay_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE fieldrelay_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_process_start_time_seconds {}",
        state.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP fieldrelay_process_uptime_seconds Process uptime seconds\n# TYPE fieldrelay_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "fieldrelay_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buf,
    )
        .into_response()
}
