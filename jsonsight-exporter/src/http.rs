//! HTTP server: probe, self-metrics and health endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::collector::collect;
use crate::config::{ExporterConfig, ModuleConfig};
use crate::descriptor::{MetricDescriptor, ValueType, build_descriptors};
use crate::fetch::{FetchError, Fetcher};
use crate::registry::{ProbeRegistry, Sample};
use crate::telemetry::{ExporterMetrics, FailureReason};

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";
const OPENMETRICS_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";
const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";
const DEFAULT_MODULE: &str = "default";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<ExporterConfig>,
    metrics: Arc<ExporterMetrics>,
}

/// Create the HTTP router.
pub fn create_router(config: Arc<ExporterConfig>, metrics: Arc<ExporterMetrics>) -> Router {
    let metrics_path = config.metrics_path.clone();
    let state = AppState { config, metrics };

    Router::new()
        .route("/", get(index_handler))
        .route("/probe", get(probe_handler))
        .route(&metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /probe endpoint.
async fn probe_handler(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let module_name = first_param(&params, "module")
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODULE);

    let Some(module) = state.config.module(module_name) else {
        debug!(module = %module_name, "Unknown module");
        state.metrics.unknown_module();
        return (
            StatusCode::BAD_REQUEST,
            format!("Unknown module {:?}", module_name),
        )
            .into_response();
    };

    let Some(target) = first_param(&params, "target").filter(|t| !t.is_empty()) else {
        state
            .metrics
            .probe_failed(module_name, FailureReason::MissingTarget);
        return (StatusCode::BAD_REQUEST, "Target parameter is missing").into_response();
    };

    state.metrics.probe_started(module_name);
    let start = Instant::now();

    let descriptors = match build_descriptors(module) {
        Ok(descriptors) => descriptors,
        Err(e) => {
            error!(module = %module_name, error = %e, "Failed to build metric descriptors");
            state.metrics.probe_failed(module_name, FailureReason::Build);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create metrics list from config: {}", e),
            )
                .into_response();
        }
    };

    let deadline = probe_deadline(module, &headers);
    let data = match fetch(module, target, &params, deadline).await {
        Ok(data) => data,
        Err((reason, message)) => {
            warn!(module = %module_name, target = %target, error = %message, "Probe fetch failed");
            state.metrics.probe_failed(module_name, reason);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!(
                    "Failed to fetch JSON response. TARGET: {}, ERROR: {}",
                    target, message
                ),
            )
                .into_response();
        }
    };

    let (body, samples) = render_probe(&descriptors, &data, start);
    state.metrics.samples_emitted(module_name, samples);

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], body).into_response()
}

async fn fetch(
    module: &ModuleConfig,
    target: &str,
    params: &[(String, String)],
    deadline: Duration,
) -> Result<Vec<u8>, (FailureReason, String)> {
    let fetcher = Fetcher::new(module).map_err(|e| (FailureReason::Fetch, e.to_string()))?;

    match tokio::time::timeout(deadline, fetcher.fetch(target, params)).await {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(FetchError::Request(e))) if e.is_timeout() => {
            Err((FailureReason::Timeout, e.to_string()))
        }
        Ok(Err(e)) => Err((FailureReason::Fetch, e.to_string())),
        Err(_) => Err((
            FailureReason::Timeout,
            format!("probe timed out after {:.3}s", deadline.as_secs_f64()),
        )),
    }
}

/// Collect samples into a fresh registry and append the probe meta-metrics.
///
/// Returns the rendered body and the number of collected samples.
fn render_probe(descriptors: &[MetricDescriptor], data: &[u8], start: Instant) -> (String, usize) {
    let mut registry = ProbeRegistry::new();
    let report = collect(descriptors, data, &mut registry);

    debug!(
        samples = report.samples,
        failed_descriptors = report.failed_descriptors,
        failed_elements = report.failed_elements,
        "Probe collected"
    );

    let meta = [
        (
            "probe_success",
            "Displays whether or not the probe was a success",
            if report.success() { 1.0 } else { 0.0 },
        ),
        (
            "probe_duration_seconds",
            "Returns how long the probe took to complete in seconds",
            start.elapsed().as_secs_f64(),
        ),
    ];
    for (name, help, value) in meta {
        let recorded = registry
            .register(name, help, ValueType::Gauge, &[])
            .and_then(|_| {
                registry.record(
                    name,
                    Sample {
                        label_values: Vec::new(),
                        value,
                        timestamp_ms: None,
                    },
                )
            });
        if let Err(e) = recorded {
            warn!(metric = %name, error = %e, "Failed to record probe meta-metric");
        }
    }

    (registry.render(), report.samples)
}

/// The module timeout, shortened by the scraper's own timeout when given.
fn probe_deadline(module: &ModuleConfig, headers: &HeaderMap) -> Duration {
    let module_timeout = Duration::from_secs(module.http_client.timeout_secs);

    headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| module_timeout.min(Duration::from_secs_f64(secs)))
        .unwrap_or(module_timeout)
}

fn first_param<'p>(params: &'p [(String, String)], name: &str) -> Option<&'p str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Handler for the metrics path.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, [("content-type", OPENMETRICS_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode exporter metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>JSON Exporter</title></head>\n\
         <body>\n\
         <h1>JSON Exporter</h1>\n\
         <p><a href=\"/probe?target=http://localhost:8000/data.json\">Run a probe</a></p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        state.config.metrics_path
    ))
}

/// HTTP server configuration.
pub struct HttpServer {
    config: Arc<ExporterConfig>,
    metrics: Arc<ExporterMetrics>,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        config: Arc<ExporterConfig>,
        metrics: Arc<ExporterMetrics>,
        listen_addr: SocketAddr,
    ) -> Self {
        Self {
            config,
            metrics,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let metrics_path = self.config.metrics_path.clone();
        let router = create_router(self.config, self.metrics);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_config(metrics_path: &str) -> Arc<ExporterConfig> {
        let config = ExporterConfig::parse(&format!(
            r#"{{
                metrics_path: "{}",
                modules: {{
                    default: {{ metrics: [ {{ name: "counter", path: "{{.counter}}" }} ] }},
                }},
            }}"#,
            metrics_path
        ))
        .unwrap();
        Arc::new(config)
    }

    fn make_router(metrics_path: &str) -> Router {
        create_router(make_config(metrics_path), Arc::new(ExporterMetrics::new()))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = make_router("/metrics")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_index_links_metrics_path() {
        let response = make_router("/internal/metrics")
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("href=\"/internal/metrics\""));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = make_router("/internal/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/internal/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("openmetrics"));

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probe_unknown_module() {
        let response = make_router("/metrics")
            .oneshot(
                Request::get("/probe?module=nope&target=http://localhost:1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Unknown module \"nope\"");
    }

    #[tokio::test]
    async fn test_unknown_module_names_are_not_labels() {
        let metrics = Arc::new(ExporterMetrics::new());
        let router = create_router(make_config("/metrics"), metrics.clone());

        for i in 0..20 {
            let response = router
                .clone()
                .oneshot(
                    Request::get(format!("/probe?module=bogus-{}&target=http://localhost:1", i))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let output = metrics.render().unwrap();
        assert!(!output.contains("bogus"));
        assert!(output.contains(
            "jsonsight_probe_failures_total{module=\"\",reason=\"unknown_module\"} 20"
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_target() {
        let response = make_router("/metrics")
            .oneshot(Request::get("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Target parameter is missing");
    }

    #[test]
    fn test_probe_deadline() {
        let module = ModuleConfig::default();
        let mut headers = HeaderMap::new();
        assert_eq!(probe_deadline(&module, &headers), Duration::from_secs(10));

        headers.insert(SCRAPE_TIMEOUT_HEADER, "2.5".parse().unwrap());
        assert_eq!(probe_deadline(&module, &headers), Duration::from_millis(2500));

        headers.insert(SCRAPE_TIMEOUT_HEADER, "60".parse().unwrap());
        assert_eq!(probe_deadline(&module, &headers), Duration::from_secs(10));

        headers.insert(SCRAPE_TIMEOUT_HEADER, "soon".parse().unwrap());
        assert_eq!(probe_deadline(&module, &headers), Duration::from_secs(10));
    }

    #[test]
    fn test_render_probe_meta_metrics() {
        let module = make_config("/metrics");
        let descriptors = build_descriptors(module.module("default").unwrap()).unwrap();

        let (body, samples) = render_probe(&descriptors, br#"{"counter": 5}"#, Instant::now());
        assert_eq!(samples, 1);
        assert!(body.contains("counter 5\n"));
        assert!(body.contains("probe_success 1\n"));
        assert!(body.contains("# TYPE probe_duration_seconds gauge\n"));

        let (body, samples) = render_probe(&descriptors, br#"{"other": 5}"#, Instant::now());
        assert_eq!(samples, 0);
        assert!(body.contains("probe_success 0\n"));
    }
}
