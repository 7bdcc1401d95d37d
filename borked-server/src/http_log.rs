//! Outbound request logging for the GitHub client.

use std::time::Instant;

use axum::http;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};

/// Logs method, path, status and latency of every outbound request.
///
/// Query strings and headers are never logged.
pub struct RequestLogMiddleware {
    service: &'static str,
}

impl RequestLogMiddleware {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl Middleware for RequestLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let started = Instant::now();

        let response = next.run(req, extensions).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &response {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "{} {} {} -> {} ({} ms)",
                    self.service,
                    method,
                    path,
                    resp.status(),
                    elapsed_ms
                );
            }
            Ok(resp) => {
                warn!(
                    "{} {} {} -> {} ({} ms)",
                    self.service,
                    method,
                    path,
                    resp.status(),
                    elapsed_ms
                );
            }
            Err(err) => {
                warn!(
                    "{} {} {} failed after {} ms: {}",
                    self.service, method, path, elapsed_ms, err
                );
            }
        }

        response
    }
}
