//! Management API exercised through the router, without a socket.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{eventually, fixture, test_config};
use petbot_net_core::credentials::Credential;
use petbot_net_core::traits::AuthMode;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(router: &Router, uri: &str, json: &str) -> Response {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    send(router, request).await
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[tokio::test]
async fn saved_list_hides_passwords() {
    let fx = fixture(test_config()).await;
    let router = fx.app.router.clone();

    assert_eq!(
        post_json(&router, "/api/wifi/save", r#"{"ssid":"HomeNet","password":"hunter22"}"#)
            .await
            .status(),
        StatusCode::OK
    );
    assert_eq!(
        post_json(&router, "/api/wifi/save", r#"{"ssid":"CafeGuest"}"#)
            .await
            .status(),
        StatusCode::OK
    );

    let response = get(&router, "/api/wifi/saved").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(!body.contains("hunter22"));

    let saved: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        saved,
        serde_json::json!([
            { "ssid": "HomeNet", "hasPassword": true },
            { "ssid": "CafeGuest", "hasPassword": false },
        ])
    );
}

#[tokio::test]
async fn save_rejects_bad_input() {
    let fx = fixture(test_config()).await;
    let router = fx.app.router.clone();

    let too_long = format!(r#"{{"ssid":"{}","password":"x"}}"#, "s".repeat(33));
    for body in [
        "not json",
        r#"{"password":"orphan"}"#,
        r#"{"ssid":"","password":"x"}"#,
        too_long.as_str(),
    ] {
        let response = post_json(&router, "/api/wifi/save", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
    }
    assert!(fx.app.store.load().await.is_empty());
}

#[tokio::test]
async fn save_into_full_store_fails() {
    let mut config = test_config();
    config.storage.capacity = 1;
    let fx = fixture(config).await;
    let router = fx.app.router.clone();

    let first = post_json(&router, "/api/wifi/save", r#"{"ssid":"One","password":"11111111"}"#).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = post_json(&router, "/api/wifi/save", r#"{"ssid":"Two","password":"22222222"}"#).await;
    assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // 已存在的 SSID 仍可更新
    let update = post_json(&router, "/api/wifi/save", r#"{"ssid":"One","password":"changed!"}"#).await;
    assert_eq!(update.status(), StatusCode::OK);
    let saved = fx.app.store.load().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].password(), "changed!");
}

#[tokio::test]
async fn delete_by_ssid() {
    let fx = fixture(test_config()).await;
    let router = fx.app.router.clone();
    fx.app
        .store
        .save_or_update(Credential::new("HomeNet", "hunter22").unwrap())
        .await
        .unwrap();

    let delete = |uri: &str| Request::delete(uri).body(Body::empty()).unwrap();

    assert_eq!(
        send(&router, delete("/api/wifi/delete")).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        send(&router, delete("/api/wifi/delete?ssid=Nowhere")).await.status(),
        StatusCode::NOT_FOUND
    );

    let response = send(&router, delete("/api/wifi/delete?ssid=HomeNet")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
    assert!(fx.app.store.load().await.is_empty());
}

#[tokio::test]
async fn scan_lists_visible_networks() {
    let fx = fixture(test_config()).await;
    fx.radio.add_network("HomeNet", -48, AuthMode::Wpa2, "hunter22");
    let router = fx.app.router.clone();

    let networks = body_json(get(&router, "/api/wifi/scan").await).await;
    assert_eq!(
        networks,
        serde_json::json!([
            { "ssid": "HomeNet", "signal_strength": -48, "auth_mode": "wpa2" },
        ])
    );

    fx.radio.set_scan_fails(true);
    assert_eq!(
        get(&router, "/api/wifi/scan").await.status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn log_endpoint_filters_by_sequence() {
    let fx = fixture(test_config()).await;
    let router = fx.app.router.clone();
    for line in ["boot", "scan", "connect"] {
        fx.app.logs.push_line(line);
    }

    let all = body_json(get(&router, "/api/log").await).await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let newer = body_json(get(&router, "/api/log?since=1").await).await;
    assert_eq!(
        newer,
        serde_json::json!([
            { "sequence": 2, "text": "scan" },
            { "sequence": 3, "text": "connect" },
        ])
    );

    let garbage = body_json(get(&router, "/api/log?since=abc").await).await;
    assert_eq!(garbage, all);
}

#[tokio::test]
async fn status_before_boot_is_transitioning() {
    let fx = fixture(test_config()).await;
    let status = body_json(get(&fx.app.router, "/api/status").await).await;
    assert_eq!(
        status,
        serde_json::json!({ "mode": "transitioning", "connected": false, "ip": null })
    );
}

#[tokio::test]
async fn connectivity_checks_redirect_to_portal() {
    let config = test_config();
    let portal = config.http.portal_url.clone();
    let fx = fixture(config).await;

    for check in ["/generate_204", "/hotspot-detect.html"] {
        let response = get(&fx.app.router, check).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], portal.as_str());
    }
}

#[tokio::test]
async fn pages_are_served() {
    let fx = fixture(test_config()).await;
    for page in ["/", "/logs", "/ota", "/settings"] {
        let response = get(&fx.app.router, page).await;
        assert_eq!(response.status(), StatusCode::OK, "page {}", page);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"), "page {}", page);
    }

    let script = get(&fx.app.router, "/assets/main.js").await;
    assert_eq!(script.status(), StatusCode::OK);
    assert_eq!(get(&fx.app.router, "/nope").await.status(), StatusCode::NOT_FOUND);
}

fn upload(body: &'static [u8], content_length: Option<usize>) -> Request<Body> {
    let mut builder = Request::post("/api/ota/upload").header(header::CONTENT_TYPE, "application/octet-stream");
    if let Some(len) = content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn ota_upload_marks_image_and_restarts() {
    let fx = fixture(test_config()).await;
    let image: &'static [u8] = b"petbot firmware image v2";

    let idle = body_json(get(&fx.app.router, "/api/ota/status").await).await;
    assert_eq!(idle, serde_json::json!({ "state": "idle" }));

    let response = send(&fx.app.router, upload(image, Some(image.len()))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK - Rebooting");

    let ready = body_json(get(&fx.app.router, "/api/ota/status").await).await;
    assert_eq!(ready, serde_json::json!({ "state": "ready" }));

    let expected = format!("{:x}", Sha256::digest(image));
    assert_eq!(fx.firmware.pending_boot().await, Some(expected));

    let restarted = fx.restarted.clone();
    eventually(move || restarted.load(std::sync::atomic::Ordering::SeqCst)).await;
}

#[tokio::test]
async fn ota_upload_requires_content_length() {
    let fx = fixture(test_config()).await;
    let response = send(&fx.app.router, upload(b"abc", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fx.firmware.pending_boot().await, None);
}

#[tokio::test]
async fn ota_short_body_is_rejected() {
    let fx = fixture(test_config()).await;
    let response = send(&fx.app.router, upload(b"half", Some(8))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(fx.firmware.pending_boot().await, None);
    assert!(!fx.restarted());

    let status = body_json(get(&fx.app.router, "/api/ota/status").await).await;
    assert_eq!(status, serde_json::json!({ "state": "failed" }));
}
