//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Metrics collection and export utilities."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the pipeline.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Text exposition of every family in `registry`.
pub fn exposition(registry: &Registry) -> prometheus::Result<String> {
    TextEncoder::new().encode_to_string(&registry.gather())
}

async fn render_metrics(State(registry): State<SharedRegistry>) -> Response {
    match exposition(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics exposition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, useful when listening on port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Case lifecycle and stage timing metrics.
#[derive(Clone, Debug)]
pub struct PipelineMetrics {
    registry: SharedRegistry,
    cases_total: IntCounterVec,
    dispatch_attempts: IntCounterVec,
    late_results: IntCounterVec,
    stage_duration: HistogramVec,
    in_flight: IntGauge,
}

impl PipelineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cases_total = IntCounterVec::new(
            Opts::new("rao_cases_total", "Study cases reaching a terminal state"),
            &["outcome"],
        )?;
        registry.register(Box::new(cases_total.clone()))?;

        let dispatch_attempts = IntCounterVec::new(
            Opts::new(
                "rao_dispatch_attempts_total",
                "Engine dispatch attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(dispatch_attempts.clone()))?;

        let late_results = IntCounterVec::new(
            Opts::new(
                "rao_late_results_total",
                "Engine results received after the case stopped waiting",
            ),
            &["disposition"],
        )?;
        registry.register(Box::new(late_results.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 20)
            .context("failed to construct histogram buckets")?;
        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "rao_stage_duration_seconds",
                "Time spent in each pipeline stage",
            )
            .buckets(buckets),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration.clone()))?;

        let in_flight = IntGauge::with_opts(Opts::new(
            "rao_cases_in_flight",
            "Study cases currently held by the coordinator",
        ))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            cases_total,
            dispatch_attempts,
            late_results,
            stage_duration,
            in_flight,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_case(&self, outcome: &str) {
        self.cases_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_dispatch(&self, outcome: &str) {
        self.dispatch_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn record_late_result(&self, disposition: &str) {
        self.late_results.with_label_values(&[disposition]).inc();
    }

    pub fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.stage_duration
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }

    pub fn case_started(&self) {
        self.in_flight.inc();
    }

    pub fn case_finished(&self) {
        self.in_flight.dec();
    }

    pub fn cases_total(&self, outcome: &str) -> u64 {
        self.cases_total.with_label_values(&[outcome]).get()
    }

    pub fn dispatch_total(&self, outcome: &str) -> u64 {
        self.dispatch_attempts.with_label_values(&[outcome]).get()
    }

    pub fn late_results_total(&self, disposition: &str) -> u64 {
        self.late_results.with_label_values(&[disposition]).get()
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_metrics_register_and_count() {
        let metrics = PipelineMetrics::new(new_registry()).unwrap();
        metrics.record_case("completed");
        metrics.record_case("completed");
        metrics.record_dispatch("timed_out");
        metrics.observe_stage("parse", Duration::from_millis(12));
        assert_eq!(metrics.cases_total("completed"), 2);
        assert_eq!(metrics.dispatch_total("timed_out"), 1);
        let names: Vec<_> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"rao_stage_duration_seconds".to_owned()));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        PipelineMetrics::new(registry.clone()).unwrap();
        assert!(PipelineMetrics::new(registry).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn metrics_route_serves_text_exposition() {
        let metrics = PipelineMetrics::new(new_registry()).unwrap();
        metrics.record_case("failed");
        let text = exposition(&metrics.registry()).unwrap();
        assert!(text.contains("rao_cases_total{outcome=\"failed\"} 1"), "{text}");

        let response = render_metrics(State(metrics.registry())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exporter_binds_and_shuts_down() {
        let metrics = PipelineMetrics::new(new_registry()).unwrap();
        let server = spawn_http_server(metrics.registry(), "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);
        server.shutdown().await.unwrap();
    }
}
