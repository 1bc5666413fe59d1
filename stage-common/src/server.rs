use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, http::StatusCode, middleware::Next,
    response::IntoResponse, routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;

use crate::orchestrator::StageState;

/// Liveness and readiness probes. The stage is ready while its poll loop runs.
pub fn router(status: watch::Receiver<StageState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_liveness", get(|| std::future::ready("ok")))
        .route(
            "/_readiness",
            get(move || {
                let state = *status.borrow();
                std::future::ready(readiness(state))
            }),
        )
}

async fn index() -> &'static str {
    "rule stage"
}

fn readiness(state: StageState) -> (StatusCode, &'static str) {
    match state {
        StageState::Running => (StatusCode::OK, state.as_str()),
        _ => (StatusCode::SERVICE_UNAVAILABLE, state.as_str()),
    }
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
