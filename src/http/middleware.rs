//! axum middleware that gates requests through the rate limiter.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::RateLimitSettings;
use crate::error::Result;
use crate::ratelimit::{Decision, RateLimiter, RequestDescriptor};

/// Header carrying the caller chain when behind a proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header reporting whole tokens left after an admitted request.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Describe an inbound request for the limiter.
///
/// Undecodable header values are treated as absent.
pub fn describe<B>(request: &axum::http::Request<B>) -> RequestDescriptor {
    let uri = request.uri();
    let mut descriptor = RequestDescriptor::new(uri.path()).with_query(uri.query());

    if let Some(forwarded) = forwarded_for(request.headers()) {
        descriptor = descriptor.with_forwarded_for(forwarded);
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        descriptor = descriptor.with_peer_addr(addr.ip());
    }

    descriptor
}

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers.get(FORWARDED_FOR).and_then(|value| value.to_str().ok())
}

/// Admit or reject a request before it reaches the handler.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = describe(&request);
    let decision = limiter.check(&descriptor);

    if let Some(rejection) = decision.rejection() {
        warn!(
            retry_ms = rejection.retry_after().as_millis() as u64,
            "Request rejected by rate limiter"
        );
        return rejection.into_response();
    }

    let mut response = next.run(request).await;
    if let Decision::Admitted { remaining, .. } = decision {
        response
            .headers_mut()
            .insert(REMAINING_HEADER, HeaderValue::from(remaining));
    }
    response
}

/// Wrap `router` with the limiter.
///
/// An inactive limiter (no policies) installs nothing.
pub fn layer<S>(router: Router<S>, limiter: Arc<RateLimiter>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !limiter.is_active() {
        return router;
    }
    router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
}

/// Wrap `router` according to configuration.
///
/// When rate limiting is disabled or no policies are configured, the router
/// is returned untouched and requests pay no cost at all.
pub fn apply<S>(router: Router<S>, settings: &RateLimitSettings) -> Result<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    if !settings.is_active() {
        info!(
            enabled = settings.enabled,
            policies = settings.policies.len(),
            "Rate limiting not installed"
        );
        return Ok(router);
    }

    let limiter = Arc::new(RateLimiter::new(settings.compile()?));
    info!(policies = limiter.policies().len(), "Rate limiting installed");
    Ok(layer(router, limiter))
}
