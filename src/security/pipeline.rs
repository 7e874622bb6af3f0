//! Request security pipeline.
//!
//! Two middleware layers run in front of every route, in a fixed order:
//!
//! 1. `identity_middleware` - resolve the client IP, reject globally blocked
//!    IPs, derive the composite key, attach the [`SecurityContext`].
//! 2. `burst_middleware` - burst-class sliding window for mutating requests
//!    and the distinct-endpoint burst profiler for all requests.
//!
//! Endpoint-specific steps (honeypot, post/reveal windows, shadowban
//! short-circuit, moderation) live in the handlers, which see the context
//! via request extensions.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::context::AppContext;
use crate::error::AppError;
use crate::security::identity::{extract_fingerprint, extract_real_ip};

/// Security context derived per request and consumed by handlers.
#[derive(Clone, Debug)]
pub struct SecurityContext {
    pub composite_key: String,
    pub ip: String,
    pub fingerprint: String,
    /// True when no fingerprint header was supplied; the identity is then
    /// bucketed by IP alone and subject to stricter limits.
    pub weak_identity: bool,
}

fn is_mutating(method: &Method) -> bool {
    !matches!(method, &Method::GET | &Method::HEAD | &Method::OPTIONS)
}

/// Step 1 and 2 of the pipeline: IP resolution, global block check,
/// composite key derivation.
pub async fn identity_middleware(
    State(ctx): State<AppContext>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req, &addr, &ctx.config.trusted_proxies);
    let mutating = is_mutating(req.method());

    match ctx.rate_limiter.is_ip_blocked(&ip).await {
        Ok(true) => {
            let retry = ctx.rate_limiter.ip_block_ttl(&ip).await.unwrap_or(0).max(1) as u64;
            return AppError::RateLimited {
                retry_after_seconds: retry,
            }
            .into_response();
        }
        Ok(false) => {}
        Err(e) => {
            // Mutating endpoints fail closed when the store is unreachable
            if mutating {
                return AppError::Store(e).into_response();
            }
            tracing::error!(error = %e, ip = %ip, "IP block check failed, continuing read-only request");
        }
    }

    let fingerprint = extract_fingerprint(&req);
    let weak_identity = fingerprint.is_none();
    let fingerprint = fingerprint.unwrap_or_default();

    let composite_key = ctx.keys.generate(&ip, &fingerprint);

    req.extensions_mut().insert(SecurityContext {
        composite_key,
        ip,
        fingerprint,
        weak_identity,
    });

    next.run(req).await
}

/// Steps 3 and 4 of the pipeline: burst-class window and burst profiler.
pub async fn burst_middleware(
    State(ctx): State<AppContext>,
    req: Request,
    next: Next,
) -> Response {
    let Some(security) = req.extensions().get::<SecurityContext>().cloned() else {
        // Identity middleware always runs first; missing context is a bug
        tracing::error!("Security context missing in burst middleware");
        return AppError::Internal("missing security context".into()).into_response();
    };

    let path = req.uri().path().to_string();
    let mutating = is_mutating(req.method());
    let is_post_endpoint = mutating && path == "/messages";

    // Burst-class sliding window, mutating requests only
    if mutating {
        match ctx
            .rate_limiter
            .check(
                &security.composite_key,
                crate::security::rate_limiter::RateLimitClass::Burst,
                security.weak_identity,
            )
            .await
        {
            Ok(decision) if !decision.allowed => {
                if let Err(e) = ctx.rate_limiter.block_ip_default(&security.ip).await {
                    tracing::error!(error = %e, ip = %security.ip, "Failed to block bursting IP");
                }
                return AppError::RateLimited {
                    retry_after_seconds: decision.retry_after_seconds,
                }
                .into_response();
            }
            Ok(_) => {}
            Err(e) => return AppError::Store(e).into_response(),
        }
    }

    // Burst profiler observes every routed request, GETs included: the
    // distinct-endpoint signal is exactly what scripts produce while
    // enumerating the API.
    match ctx
        .burst_profiler
        .observe(&security.composite_key, &path)
        .await
    {
        Ok(true) => {
            if let Err(e) = ctx
                .shadowban
                .shadowban(&security.composite_key, "burst", Some(86_400))
                .await
            {
                tracing::error!(error = %e, "Failed to shadowban burst bot");
            }
            if let Err(e) = ctx.rate_limiter.block_ip_default(&security.ip).await {
                tracing::error!(error = %e, ip = %security.ip, "Failed to block bot IP");
            }

            // Posts continue so the bot sees a synthetic success downstream;
            // reads complete normally. Other mutations are refused outright.
            if mutating && !is_post_endpoint {
                return AppError::RateLimited {
                    retry_after_seconds: 1800,
                }
                .into_response();
            }
        }
        Ok(false) => {}
        Err(e) => {
            if mutating {
                return AppError::Store(e).into_response();
            }
            tracing::error!(error = %e, "Burst profiler check failed, continuing read-only request");
        }
    }

    next.run(req).await
}
