//! Prometheus metrics for served CSI requests, exposed over HTTP.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use libcsi::{Code, RequestObserver};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Request counters and latencies, kept in a registry of their own.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let operations = IntCounterVec::new(
            Opts::new("csi_operations_total", "CSI requests served, by method and status code"),
            &["method", "code"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "csi_operation_duration_seconds",
                "Time spent serving CSI requests",
            ),
            &["method"],
        )?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    /// Text exposition of everything registered.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl RequestObserver for Metrics {
    fn observe(&self, method: &'static str, code: Code, elapsed: Duration) {
        self.operations
            .with_label_values(&[method, code.as_str()])
            .inc();
        self.duration
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }
}

fn respond(metrics: &Metrics, path: &str) -> Response<Full<Bytes>> {
    let (status, body) = match path {
        "/metrics" => match metrics.render() {
            Ok(buffer) => (StatusCode::OK, Bytes::from(buffer)),
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, Bytes::from(e.to_string()))
            }
        },
        _ => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if status == StatusCode::OK {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    }
    response
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "metrics server listening");
    Ok(listener)
}

/// Serve `GET /metrics` on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, metrics: Arc<Metrics>) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = respond(&metrics, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "metrics connection error");
            }
        });
    }
}

/// Bind and serve; failures are logged and end the task without touching
/// the CSI host.
pub async fn run(addr: SocketAddr, metrics: Arc<Metrics>) {
    let listener = match bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };
    if let Err(e) = serve(listener, metrics).await {
        error!(error = %e, "metrics server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(metrics: &Metrics) -> String {
        String::from_utf8(metrics.render().unwrap()).unwrap()
    }

    #[test]
    fn observed_requests_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("Probe", Code::Ok, Duration::from_millis(2));
        metrics.observe("Probe", Code::Ok, Duration::from_millis(3));
        metrics.observe("NodeExpandVolume", Code::Unimplemented, Duration::from_millis(1));

        let text = rendered(&metrics);
        let probe = text
            .lines()
            .find(|l| l.starts_with("csi_operations_total{") && l.contains("method=\"Probe\""))
            .unwrap();
        assert!(probe.contains("code=\"OK\""));
        assert!(probe.ends_with(" 2"));
        assert!(text.contains("code=\"UNIMPLEMENTED\""));
        assert!(text.contains("csi_operation_duration_seconds_count{method=\"Probe\"} 2"));
    }

    #[test]
    fn registries_are_per_instance() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.observe("Probe", Code::Ok, Duration::ZERO);
        assert!(!rendered(&b).contains("method=\"Probe\""));
    }

    #[tokio::test]
    async fn serves_metrics_and_404() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.observe("NodeStageVolume", Code::Internal, Duration::from_millis(5));
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, metrics));

        let resp = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body = resp.text().await.unwrap();
        assert!(body.contains("method=\"NodeStageVolume\""));

        let resp = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        server.abort();
    }

    #[tokio::test]
    async fn bind_failure_does_not_panic() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        run(addr, Arc::new(Metrics::new().unwrap())).await;
    }
}
