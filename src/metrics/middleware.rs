//! Per-route HTTP metrics
//!
//! Applied with `Router::route_layer` so the matched path template, not the
//! raw URI, becomes the `path` label.

use super::*;
use axum::{
    extract::{MatchedPath, Request},
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

/// Entry point for building the metrics layer
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    pub fn layer() -> MetricsLayer {
        Self::layer_with_config(MetricsConfig::default())
    }

    pub fn layer_with_config(config: MetricsConfig) -> MetricsLayer {
        MetricsLayer {
            config: Arc::new(config),
        }
    }
}

#[derive(Clone)]
pub struct MetricsLayer {
    config: Arc<MetricsConfig>,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    config: Arc<MetricsConfig>,
}

/// Measures one request; the in-flight gauge drops even if the future is
/// cancelled before a response exists
struct RequestTimer {
    method: String,
    path: String,
    started: Instant,
    histograms: bool,
}

impl RequestTimer {
    fn start(method: String, path: String, histograms: bool) -> Self {
        HTTP_CONNECTIONS_ACTIVE.inc();
        Self {
            method,
            path,
            started: Instant::now(),
            histograms,
        }
    }

    fn finish(&self, response: &Response) {
        let status = response.status().as_u16().to_string();
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[&self.method, &self.path, &status])
            .inc();
        if self.histograms {
            HTTP_REQUEST_DURATION_SECONDS
                .with_label_values(&[&self.method, &self.path])
                .observe(self.started.elapsed().as_secs_f64());
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        HTTP_CONNECTIONS_ACTIVE.dec();
    }
}

fn route_label(req: &Request) -> String {
    match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => req.uri().path().to_string(),
    }
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let path = route_label(&req);
        if !self.config.enabled || self.config.is_path_excluded(&path) {
            return Box::pin(self.inner.call(req));
        }

        let timer = RequestTimer::start(
            req.method().to_string(),
            path,
            self.config.enable_histograms,
        );
        let future = self.inner.call(req);

        Box::pin(async move {
            let result = future.await;
            if let Ok(response) = &result {
                timer.finish(response);
            }
            result
        })
    }
}
