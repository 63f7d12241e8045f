//! Request metrics: per-endpoint counts and durations, plus websocket upgrade
//! failures (any response other than 101 on a session route).

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::warn;

/// Paths served by websocket sessions.
pub const SESSION_ROUTES: [&str; 2] = ["/asr", "/tts"];

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        // Route patterns keep the endpoint table bounded
        let route = req.request().match_pattern().unwrap_or_else(|| "unmatched".to_string());
        let endpoint = format!("{} {}", req.method(), route);
        let is_session_route = SESSION_ROUTES.contains(&req.path());
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &app_state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let status = match &result {
                Ok(response) => Some(response.status()),
                Err(_) => None,
            };
            let is_error = status.map_or(true, |s| s.is_client_error() || s.is_server_error());

            if let Some(state) = app_state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
                if is_session_route && status != Some(StatusCode::SWITCHING_PROTOCOLS) {
                    state.increment_upgrade_failures();
                    warn!(endpoint = %endpoint, status = ?status, "Websocket upgrade failed");
                }
            }

            result
        })
    }
}
