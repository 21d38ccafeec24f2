mod common;

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

use vidqueue::models::AssetRef;
use vidqueue::providers::ExternalError;

// ── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_ok() {
    let app = common::spawn_app().await;

    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

// ── Intake ──────────────────────────────────────────────────────

#[tokio::test]
async fn upload_creates_a_record_scheduled_for_today() {
    let app = common::spawn_app().await;

    let (body, status) = app.upload("beach_day.mp4", Some("sunset"), None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "created");
    assert_eq!(body["record_status"], "scheduled");
    assert_eq!(body["scheduled_for"], "2025-03-10");

    let id = body["record_id"].as_str().unwrap();
    let (record, status) = app.get(&format!("/api/v1/records/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["filename"], "beach_day.mp4");
    assert_eq!(record["caption"], "sunset");
    assert_eq!(record["attempts"], 0);
}

#[tokio::test]
async fn upload_past_the_daily_limit_stays_pending() {
    let app = common::spawn_app_with(1, None).await;

    app.upload("one.mp4", None, None).await;
    let (body, status) = app.upload("two.mp4", None, Some(2)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["record_status"], "pending");
    assert!(body["scheduled_for"].is_null());
}

#[tokio::test]
async fn upload_without_file_is_rejected() {
    let app = common::spawn_app().await;

    let form = reqwest::multipart::Form::new().text("caption", "no video here");
    let resp = app
        .client
        .post(app.url("/api/v1/videos"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn upload_requires_multipart() {
    let app = common::spawn_app().await;

    let resp = app
        .client
        .post(app.url("/api/v1/videos"))
        .json(&json!({ "file": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Passes & queue views ────────────────────────────────────────

#[tokio::test]
async fn manual_pass_publishes_and_overflows() {
    let app = common::spawn_app().await;
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        let (_, status) = app.upload(name, None, None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (summary, status) = app.post("/api/v1/queue/pass").await;
    assert_eq!(status, StatusCode::OK, "{summary}");
    assert_eq!(summary["trigger"], "manual");
    assert_eq!(summary["date"], "2025-03-10");
    assert_eq!(summary["remaining_today"], 0);
    assert!(!summary["cancelled"].as_bool().unwrap());

    let (status_body, _) = app.get("/api/v1/status").await;
    assert_eq!(status_body["uploaded"], 2);
    assert_eq!(status_body["scheduled"], 1);
    assert_eq!(status_body["uploads_today"], 2);
    assert_eq!(status_body["remaining_today"], 0);

    let (today, status) = app.get("/api/v1/queue/today").await;
    assert_eq!(status, StatusCode::OK);
    let today = today.as_array().unwrap();
    assert_eq!(today.len(), 2);
    assert!(today.iter().all(|r| r["status"] == "uploaded"));
    assert!(today.iter().all(|r| r["publish_ref"].is_string()));
}

#[tokio::test]
async fn manual_pass_fails_once_the_scheduler_stopped() {
    let app = common::spawn_app().await;
    app.stop_scheduler();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (body, status) = app.post("/api/v1/queue/pass").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
}

// ── Records ─────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_record_is_404() {
    let app = common::spawn_app().await;

    let (body, status) = app
        .get(&format!("/api/v1/records/{}", Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn patch_updates_metadata_and_rejects_bad_input() {
    let app = common::spawn_app().await;
    let (body, _) = app.upload("clip.mp4", None, None).await;
    let id = body["record_id"].as_str().unwrap();
    let path = format!("/api/v1/records/{id}");

    let (record, status) = app
        .patch(
            &path,
            &json!({
                "metadata": { "title": "Fresh title", "description": "d", "tags": ["x"] },
                "priority": 7
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{record}");
    assert_eq!(record["metadata"]["title"], "Fresh title");
    assert_eq!(record["priority"], 7);

    let (_, status) = app.patch(&path, &json!({ "priority": null })).await;
    assert_eq!(status, StatusCode::OK);
    let (record, _) = app.get(&path).await;
    assert!(record["priority"].is_null());

    let (_, status) = app
        .patch(&path, &json!({ "scheduled_for": "2020-01-01" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Published records are frozen
    app.post("/api/v1/queue/pass").await;
    let (_, status) = app
        .patch(&path, &json!({ "scheduled_for": "2025-03-20" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn requeue_of_a_live_record_is_a_conflict() {
    let app = common::spawn_app().await;
    let (body, _) = app.upload("clip.mp4", None, None).await;
    let id = body["record_id"].as_str().unwrap();

    let (body, status) = app.post(&format!("/api/v1/records/{id}/requeue")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("scheduled"));
}

#[tokio::test]
async fn failed_record_can_be_requeued() {
    let app = common::spawn_app().await;
    app.harness.publisher.fail_for(
        &AssetRef("mem:bad.mp4".to_string()),
        ExternalError::Permanent("HTTP 400: unsupported codec".to_string()),
    );

    let (body, _) = app.upload("bad.mp4", None, None).await;
    let id = body["record_id"].as_str().unwrap().to_string();
    app.post("/api/v1/queue/pass").await;

    let (record, _) = app.get(&format!("/api/v1/records/{id}")).await;
    assert_eq!(record["status"], "failed");
    assert!(record["last_error"].as_str().unwrap().contains("codec"));

    let (record, status) = app.post(&format!("/api/v1/records/{id}/requeue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "pending");
    assert_eq!(record["attempts"], 0);
    assert!(record["last_error"].is_null());
}

// ── Operator token ──────────────────────────────────────────────

#[tokio::test]
async fn operator_token_is_enforced_when_configured() {
    let app = common::spawn_app_with(2, Some("s3cret")).await;

    let resp = app
        .client
        .get(app.url("/api/v1/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .client
        .get(app.url("/api/v1/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (_, status) = app.get("/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    // Health stays open
    let resp = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
