// ============================================================================
// REST API Integration Tests
// ============================================================================
//
// End-to-end flows through the real router and middleware stack:
// - post -> fetch round trip
// - post rate limiting and retry_after_seconds
// - honeypot shadowban (silent success afterwards)
// - content rejection and violation escalation
// - report flow and progressive friction
// - cooldown, stats and health endpoints
//
// All tests here require Redis and run with `cargo test -- --ignored`.
//
// ============================================================================

use reqwest::StatusCode;
use roomboard_server::security::identity::TrustedProxies;
use serial_test::serial;

use test_utils::{spawn_app, spawn_app_with_proxies, unique, TestClient};

const ON_TOPIC: &str = "Looking for 1BHK near Koramangala, rent under 20000";

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn post_then_fetch_round_trip() {
    let app = spawn_app().await;
    let city = unique("Bangalore");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.1");

    let response = client.post_listing(&city, ON_TOPIC, Some("+919876543210")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let posted: serde_json::Value = response.json().await.unwrap();
    assert!(posted["id"].is_string());
    assert_eq!(posted["message"], ON_TOPIC);
    assert_eq!(posted["location"], city);
    // The phone never appears in the canonical wire shape
    assert!(posted.get("phone").is_none());

    let feed: serde_json::Value = client
        .get(&format!("/messages?location={}", city))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let feed = feed.as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["id"], posted["id"]);
    assert!(feed[0].get("phone").is_none());
    assert!(feed[0].get("origin_ip").is_none());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn immediate_second_post_is_rate_limited() {
    let app = spawn_app().await;
    let city = unique("Bangalore");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.2");

    let first = client.post_listing(&city, ON_TOPIC, None).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = client.post_listing(&city, ON_TOPIC, None).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");
    // The message never names which limiter fired
    assert!(body.get("window").is_none());
    let retry = body["retry_after_seconds"].as_u64().unwrap();
    assert!((58..=60).contains(&retry), "retry was {}", retry);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn forwarded_headers_from_untrusted_peers_are_ignored() {
    // No trusted proxies: the server keys everything on the socket peer and
    // spoofed Cf-Connecting-Ip / X-Forwarded-For headers cannot rotate the
    // caller's effective IP.
    let app = spawn_app_with_proxies(TrustedProxies::default()).await;
    let city = unique("Hyderabad");
    let fingerprint = unique("fp");

    let first = TestClient::new(&app, &fingerprint, "1.2.3.4");
    assert_eq!(
        first.post_listing(&city, ON_TOPIC, None).await.status(),
        StatusCode::OK
    );

    // Same fingerprint, freshly spoofed forwarded IP: still the same
    // identity, so the post window applies
    let spoofed = TestClient::new(&app, &fingerprint, "5.6.7.8");
    let second = spoofed
        .post("/messages")
        .header("Cf-Connecting-Ip", "9.10.11.12")
        .json(&serde_json::json!({
            "browser_id": fingerprint,
            "message": ON_TOPIC,
            "message_type": "requested",
            "location": city,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn honeypot_bans_silently() {
    let app = spawn_app().await;
    let city = unique("Pune");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.3");

    // Bot fills the invisible field: 429, not 403, so it learns nothing
    let response = client
        .post("/messages")
        .json(&serde_json::json!({
            "browser_id": client.fingerprint,
            "message": ON_TOPIC,
            "message_type": "requested",
            "website": "http://bot.test",
            "location": city,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A later legitimate-looking post appears to succeed...
    let follow_up = client.post_listing(&city, ON_TOPIC, None).await;
    assert_eq!(follow_up.status(), StatusCode::OK);

    // ...but is never persisted
    let feed: Vec<serde_json::Value> = client
        .get(&format!("/messages?location={}", city))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(feed.is_empty());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn scam_posts_escalate_to_shadowban() {
    let app = spawn_app().await;
    let city = unique("Delhi");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.4");
    let composite_key = app.ctx.keys.generate(&client.ip, &client.fingerprint);

    for attempt in 0..3 {
        let response = client
            .post_listing(&city, "Room available, details on t.me/scambot", None)
            .await;
        assert_eq!(
            response.status(),
            StatusCode::FORBIDDEN,
            "attempt {}",
            attempt
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "content_rejected");
        assert_eq!(body["reason"], "scam_url");
    }

    // Three violations inside the window auto-shadowban the identity
    assert!(app.ctx.shadowban.is_shadowbanned(&composite_key).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn message_boundary_is_280_code_points() {
    let app = spawn_app().await;
    let city = unique("Chennai");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.5");

    // Keep it on-topic: the filler repeats rental keywords
    let filler = "room rent flat bhk ";
    let mut body = String::new();
    while body.chars().count() < 280 {
        body.push_str(filler);
    }
    let exact: String = body.chars().take(280).collect();
    let over: String = format!("{}x", exact);
    assert_eq!(over.chars().count(), 281);

    let ok = client.post_listing(&city, &exact, None).await;
    assert_eq!(ok.status(), StatusCode::OK);

    let client2 = TestClient::new(&app, &unique("fp"), "10.1.0.6");
    let too_long = client2.post_listing(&city, &over, None).await;
    assert_eq!(too_long.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn reports_raise_friction_for_the_origin_ip() {
    let app = spawn_app().await;
    let city = unique("Mumbai");
    let poster_ip = "10.9.9.9";
    let poster = TestClient::new(&app, &unique("poster"), poster_ip);

    // Reports persist for a week; start from a clean slate for this IP
    app.ctx
        .store
        .del(&format!("reports:ip:{}", poster_ip))
        .await
        .unwrap();

    let posted: serde_json::Value = poster
        .post_listing(&city, ON_TOPIC, None)
        .await
        .json()
        .await
        .unwrap();
    let message_id = posted["id"].as_str().unwrap().to_string();

    for (i, reporter_fp) in ["r1", "r2", "r3"].iter().enumerate() {
        let reporter = TestClient::new(
            &app,
            &format!("{}-{}", reporter_fp, message_id),
            &format!("10.2.0.{}", i + 1),
        );
        let response = reporter
            .post("/api/report")
            .json(&serde_json::json!({
                "message_id": message_id,
                "reported_browser_id": poster.fingerprint,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["reports_on_ip"], (i + 1) as u64);
    }

    // Three unique reporters put the IP at risk level 2 (900s cooldown,
    // throttled visibility) and shadow-hide the message
    let risk = app.ctx.reputation.risk_level(poster_ip).await.unwrap();
    assert_eq!(risk.cooldown_seconds(), 900);

    let feed: Vec<serde_json::Value> = poster
        .get(&format!("/messages?location={}", city))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(feed.iter().all(|m| m["id"] != message_id.as_str()));
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn reporting_an_unknown_or_mismatched_message_is_404() {
    let app = spawn_app().await;
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.7");

    let response = client
        .post("/api/report")
        .json(&serde_json::json!({
            "message_id": "no-such-id",
            "reported_browser_id": "whoever",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn contact_reveal_paths() {
    let app = spawn_app().await;
    let city = unique("Noida");
    let with_phone = TestClient::new(&app, &unique("fp"), "10.1.0.8");
    let without_phone = TestClient::new(&app, &unique("fp"), "10.1.0.9");

    let posted: serde_json::Value = with_phone
        .post_listing(&city, ON_TOPIC, Some("+919876543210"))
        .await
        .json()
        .await
        .unwrap();
    let contactless: serde_json::Value = without_phone
        .post_listing(&city, ON_TOPIC, None)
        .await
        .json()
        .await
        .unwrap();

    let reader = TestClient::new(&app, &unique("fp"), "10.1.0.10");

    let revealed = reader
        .get(&format!("/api/contact/{}", posted["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(revealed.status(), StatusCode::OK);
    let body: serde_json::Value = revealed.json().await.unwrap();
    assert_eq!(body["phone"], "+919876543210");

    let no_contact = reader
        .get(&format!(
            "/api/contact/{}",
            contactless["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(no_contact.status(), StatusCode::BAD_REQUEST);

    let missing = reader.get("/api/contact/no-such-id").send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn cooldown_endpoint_reflects_the_post_window() {
    let app = spawn_app().await;
    let city = unique("Kolkata");
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.11");

    let before: serde_json::Value = client
        .get("/api/cooldown")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["can_post"], true);
    assert_eq!(before["remaining_seconds"], 0);

    client.post_listing(&city, ON_TOPIC, None).await;

    let after: serde_json::Value = client
        .get("/api/cooldown")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["can_post"], false);
    assert!(after["remaining_seconds"].as_u64().unwrap() > 0);
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn health_reports_store_liveness() {
    let app = spawn_app().await;
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.12");

    let response = client.get("/health").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["healthy"], true);
    assert_eq!(body["redis_connected"], true);
    assert!(body["active_connections"].is_number());
    assert!(body["timestamp"].is_number());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn metrics_exposition_is_plain_text() {
    let app = spawn_app().await;
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.13");

    let response = client.get("/metrics").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn daily_stats_shape() {
    let app = spawn_app().await;
    let client = TestClient::new(&app, &unique("fp"), "10.1.0.14");

    client.post("/api/track-visitor").send().await.unwrap();

    let daily: serde_json::Value = client
        .get("/api/stats/daily")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(daily["unique_ips"].as_u64().unwrap() >= 1);
    assert!(daily["message_count"].is_number());

    let cities: serde_json::Value = client
        .get("/api/stats/cities?current_city=Testville")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let cities = cities.as_array().unwrap();
    assert!(cities.iter().any(|c| c["city"] == "Testville"));
    assert!(cities.iter().all(|c| c["views"].is_number()
        && c["daily_average"].is_number()));
}
