use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use std::collections::HashMap;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    sanitize_text, unix_now, ChatMessage, PostMessageRequest, ReportMessageRequest,
    ReportResponse, StoredMessage, MAX_MESSAGE_CHARS,
};
use crate::security::moderation::Verdict;
use crate::security::pipeline::SecurityContext;
use crate::security::rate_limiter::RateLimitClass;
use crate::storage::{PhoneLookup, DEFAULT_FEED_LIMIT};

// ============================================================================
// POST /messages
// ============================================================================

pub async fn post_message(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
    Json(request): Json<PostMessageRequest>,
) -> AppResult<Json<ChatMessage>> {
    // Honeypot field: humans never see it, so a value means automation.
    // The response is a plain 429 so the bot learns nothing; the identity
    // is banned permanently.
    if request.website.as_deref().is_some_and(|w| !w.is_empty()) {
        ctx.shadowban
            .shadowban(&security.composite_key, "honeypot", None)
            .await?;
        return Err(AppError::RateLimited {
            retry_after_seconds: 60,
        });
    }

    validate_post(&ctx, &request)?;

    // Post window and reputation cooldown; the effective wait is the max of
    // the two. An active cooldown must not consume a window slot, so it is
    // checked with the read-only probe first.
    if let Some(cooldown) = ctx
        .reputation
        .cooldown_remaining(&security.composite_key)
        .await?
    {
        let status = ctx
            .rate_limiter
            .status(
                &security.composite_key,
                RateLimitClass::Post,
                security.weak_identity,
            )
            .await?;
        return Err(AppError::RateLimited {
            retry_after_seconds: cooldown.max(status.retry_after_seconds),
        });
    }

    let decision = ctx
        .rate_limiter
        .check(
            &security.composite_key,
            RateLimitClass::Post,
            security.weak_identity,
        )
        .await?;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
        });
    }

    let risk = ctx.reputation.risk_level(&security.ip).await?;
    let visibility = risk.visibility();

    // Shadowban check runs before moderation on purpose: a banned identity
    // must not be able to probe the filters for the exact rejection rule.
    if ctx
        .shadowban
        .is_shadowbanned(&security.composite_key)
        .await?
    {
        let message = ChatMessage::new(
            request.browser_id,
            sanitize_text(&request.message),
            request.message_type,
            request.location,
        );
        tracing::debug!(
            message_id = %message.id,
            "Synthetic success for shadowbanned identity"
        );
        return Ok(Json(message));
    }

    match ctx.moderator.moderate(&request.message).await {
        Verdict::Accept => {}
        Verdict::Reject { category, reason } => {
            // A refused post does not consume the window; the violation
            // counter is what escalates repeat offenders.
            if let Some(member) = &decision.member {
                if let Err(e) = ctx
                    .rate_limiter
                    .refund(&security.composite_key, RateLimitClass::Post, member)
                    .await
                {
                    tracing::error!(error = %e, "Failed to refund post window slot");
                }
            }
            metrics::REJECTED_MESSAGES_TOTAL
                .with_label_values(&[category.as_str()])
                .inc();
            match ctx.shadowban.record_violation(&security.composite_key).await {
                Ok((count, banned)) => tracing::info!(
                    composite_key = %security.composite_key,
                    category = %category,
                    reason = %reason,
                    violations = count,
                    auto_banned = banned,
                    "Message rejected by moderation"
                ),
                Err(e) => tracing::error!(error = %e, "Failed to record violation"),
            }
            return Err(AppError::ContentRejected { category });
        }
    }

    let message = ChatMessage::new(
        request.browser_id,
        sanitize_text(&request.message),
        request.message_type,
        request.location,
    );
    let stored = StoredMessage {
        message: message.clone(),
        origin_ip: security.ip.clone(),
    };
    ctx.messages.put(&stored, request.phone.as_deref()).await?;

    ctx.reputation
        .start_cooldown(&security.composite_key, risk.cooldown_seconds())
        .await?;

    // Persistence is the source of truth; a failed publish never fails the
    // response.
    if let Err(e) = ctx.bus.publish(&message, visibility, &security.ip).await {
        metrics::BROADCAST_FAILURES_TOTAL.inc();
        tracing::error!(error = %e, message_id = %message.id, "Broadcast publish failed");
    }

    metrics::MESSAGES_POSTED_TOTAL.inc();
    if let Err(e) = ctx.stats.bump_daily_messages().await {
        tracing::error!(error = %e, "Failed to bump daily message count");
    }
    if let Err(e) = ctx.stats.note_visitor(&security.ip).await {
        tracing::error!(error = %e, "Failed to note visitor");
    }

    Ok(Json(message))
}

fn validate_post(ctx: &AppContext, request: &PostMessageRequest) -> Result<(), AppError> {
    if request.browser_id.trim().is_empty() {
        return Err(AppError::BadRequest("browser_id must not be empty".into()));
    }
    if request.message.trim().is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".into()));
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::BadRequest(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_CHARS
        )));
    }
    if request.location.trim().is_empty() {
        return Err(AppError::BadRequest("location must not be empty".into()));
    }
    if !ctx.moderator.validate_phone_field(request.phone.as_deref()) {
        return Err(AppError::BadRequest("Invalid phone number format".into()));
    }
    Ok(())
}

// ============================================================================
// GET /messages?location=<city>
// ============================================================================

pub async fn get_messages(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let location = params
        .get("location")
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| AppError::BadRequest("location query parameter is required".into()))?;

    // Visitor tracking is best effort and never fails the feed
    if let Err(e) = ctx.stats.note_visitor(&security.ip).await {
        tracing::error!(error = %e, "Failed to note visitor");
    }
    if !security.fingerprint.is_empty() {
        if let Err(e) = ctx
            .stats
            .note_city_view(location, &security.fingerprint)
            .await
        {
            tracing::error!(error = %e, city = %location, "Failed to note city view");
        }
    }

    let feed = ctx.messages.get_by_city(location, DEFAULT_FEED_LIMIT).await?;
    Ok(Json(feed))
}

// ============================================================================
// GET /api/contact/{id}
// ============================================================================

pub async fn get_contact(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
    Path(message_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let decision = ctx
        .rate_limiter
        .check(
            &security.composite_key,
            RateLimitClass::Reveal,
            security.weak_identity,
        )
        .await?;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_seconds: decision.retry_after_seconds,
        });
    }

    // Shadowbanned identities see the world as empty
    if ctx
        .shadowban
        .is_shadowbanned(&security.composite_key)
        .await?
    {
        return Err(AppError::NotFound("Message".into()));
    }

    match ctx.messages.get_phone(&message_id).await? {
        PhoneLookup::Phone(phone) => {
            metrics::CONTACT_REVEALS_TOTAL.inc();
            Ok(Json(json!({ "phone": phone })))
        }
        PhoneLookup::NoContact => Err(AppError::NoContact),
        PhoneLookup::NotFound => Err(AppError::NotFound("Message".into())),
    }
}

// ============================================================================
// POST /api/report
// ============================================================================

pub async fn report_message(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
    Json(request): Json<ReportMessageRequest>,
) -> AppResult<Json<ReportResponse>> {
    if ctx
        .shadowban
        .is_shadowbanned(&security.composite_key)
        .await?
    {
        return Err(AppError::NotFound("Message".into()));
    }

    let stored = ctx
        .messages
        .get(&request.message_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Message".into()))?;

    // A mismatched browser id or a self-report behaves exactly like a
    // missing message; reporters learn nothing about either case.
    if stored.message.browser_id != request.reported_browser_id
        || stored.message.browser_id == security.fingerprint
    {
        return Err(AppError::NotFound("Message".into()));
    }

    let reports_on_ip = ctx
        .reputation
        .add_report(&stored.origin_ip, &security.fingerprint)
        .await?;
    let reports_on_message = ctx
        .reputation
        .add_message_report(&request.message_id, &security.fingerprint)
        .await?;

    tracing::info!(
        message_id = %request.message_id,
        origin_ip = %stored.origin_ip,
        reports_on_ip,
        reports_on_message,
        "Report recorded"
    );

    Ok(Json(ReportResponse {
        success: true,
        message: "Report submitted successfully".to_string(),
        reports_on_ip,
    }))
}

// ============================================================================
// GET /api/cooldown
// ============================================================================

pub async fn get_cooldown(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
) -> Json<serde_json::Value> {
    // Read-only probe of the post window; never consumes a slot. Fails open:
    // the composer button greys out client-side anyway.
    let window_wait = match ctx
        .rate_limiter
        .status(
            &security.composite_key,
            RateLimitClass::Post,
            security.weak_identity,
        )
        .await
    {
        Ok(status) if !status.allowed => status.retry_after_seconds,
        Ok(_) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Cooldown status check failed");
            0
        }
    };

    let cooldown_wait = ctx
        .reputation
        .cooldown_remaining(&security.composite_key)
        .await
        .unwrap_or(None)
        .unwrap_or(0);

    let remaining = window_wait.max(cooldown_wait);
    Json(json!({
        "can_post": remaining == 0,
        "remaining_seconds": remaining,
    }))
}

// ============================================================================
// Stats and health
// ============================================================================

pub async fn track_visitor(
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.stats.note_visitor(&security.ip).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Visitor tracked",
    })))
}

pub async fn get_daily_stats(State(ctx): State<AppContext>) -> AppResult<Json<serde_json::Value>> {
    let daily = ctx.stats.daily().await?;
    Ok(Json(json!({
        "unique_ips": daily.unique_ips,
        "message_count": daily.message_count,
    })))
}

pub async fn get_city_stats(
    State(ctx): State<AppContext>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<serde_json::Value>> {
    let current_city = params.get("current_city").map(|s| s.as_str());
    let stats = ctx.stats.city_views(current_city).await?;
    Ok(Json(serde_json::to_value(stats)?))
}

/// Health check for the load balancer: healthy iff the store answers.
pub async fn health_check(State(ctx): State<AppContext>) -> Response {
    let redis_connected = ctx.store.ping().await.unwrap_or(false);
    let body = json!({
        "healthy": redis_connected,
        "redis_connected": redis_connected,
        "active_connections": ctx.registry.len().await,
        "timestamp": unix_now(),
    });

    let status = if redis_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

pub async fn metrics_endpoint() -> Response {
    match metrics::gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            AppError::Internal("metrics gathering failed".into()).into_response()
        }
    }
}

// ============================================================================
// GET /ws
// ============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    Extension(security): Extension<SecurityContext>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    // City comes from the upgrade request: query param first, header as a
    // fallback for clients that cannot set query strings on the WS URL.
    let city = params
        .get("location")
        .map(|c| c.to_string())
        .or_else(|| {
            headers
                .get("X-Board-Location")
                .and_then(|h| h.to_str().ok())
                .map(|c| c.to_string())
        })
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let Some(city) = city else {
        return AppError::BadRequest("location is required for the push channel".into())
            .into_response();
    };

    let remote_ip = security.ip.clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, ctx, city, remote_ip))
}

async fn handle_websocket(socket: WebSocket, ctx: AppContext, city: String, remote_ip: String) {
    let (socket_id, mut rx) = ctx.registry.register(&city, &remote_ip).await;
    let (mut sender, mut receiver) = socket.split();

    // Forward queued broadcast frames to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // The client sends no meaningful frames; drain and watch for close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Runs on every exit path, aborted sends included
    ctx.registry.remove(socket_id).await;
}
