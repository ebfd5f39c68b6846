mod common;

use anyhow::Result;
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{acquire_db_lock, body_json, body_to_vec, TestApp, VALID_PUSH_TOKEN};
use replysequence::cron::run_retry_pass;
use serde_json::{json, Value};

fn push_body(message_id: &str, data: &str) -> Value {
    json!({
        "message": {
            "data": data,
            "messageId": message_id,
            "publishTime": "2024-05-01T16:00:00Z",
            "attributes": {}
        },
        "subscription": "projects/replies/subscriptions/meet-events"
    })
}

fn encoded(event: Value) -> String {
    STANDARD.encode(event.to_string())
}

fn conference_ended(record: &str) -> String {
    encoded(json!({
        "eventType": "google.workspace.meet.conference.v2.ended",
        "conferenceRecord": { "name": record }
    }))
}

async fn push(app: &TestApp, body: &Value) -> Result<hyper::Response<axum::body::Body>> {
    app.post_raw(
        "/api/webhooks/google-meet",
        serde_json::to_vec(body)?,
        &[("authorization", format!("Bearer {VALID_PUSH_TOKEN}"))],
    )
    .await
}

#[tokio::test]
async fn challenge_is_echoed() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .get("/api/webhooks/google-meet?challenge=meet-challenge-1", None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_vec(response.into_body()).await?, b"meet-challenge-1");

    Ok(())
}

#[tokio::test]
async fn push_without_valid_token_is_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let body = serde_json::to_vec(&push_body("msg-1", &encoded(json!({}))))?;
    let response = app
        .post_raw("/api/webhooks/google-meet", body.clone(), &[])
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_raw(
            "/api/webhooks/google-meet",
            body,
            &[("authorization", "Bearer forged".to_string())],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.raw_events().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn transcript_event_waits_for_generated_transcript() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let data = encoded(json!({
        "eventType": "google.workspace.meet.transcript.v2.fileGenerated",
        "transcript": { "name": "conferenceRecords/rec-1/transcripts/t-1" }
    }));
    let body = serde_json::to_vec(&push_body("msg-2", &data))?;
    let response = app
        .post_raw(
            "/api/webhooks/google-meet",
            body,
            &[("authorization", format!("Bearer {VALID_PUSH_TOKEN}"))],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["action"], json!("awaiting_transcript"));

    let raw_events = app.raw_events().await?;
    assert_eq!(raw_events.len(), 1);
    assert_eq!(raw_events[0].platform, "google_meet");
    assert_eq!(raw_events[0].external_event_id, "msg-2");
    assert_eq!(raw_events[0].status, "processed");
    assert!(app.meetings().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn undecodable_event_is_stored_and_acknowledged() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let body = serde_json::to_vec(&push_body("msg-3", "%%% not base64 %%%"))?;
    let response = app
        .post_raw(
            "/api/webhooks/google-meet",
            body,
            &[("authorization", format!("Bearer {VALID_PUSH_TOKEN}"))],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let raw_events = app.raw_events().await?;
    assert_eq!(raw_events.len(), 1);
    assert_eq!(raw_events[0].event_type, "unknown");
    assert_eq!(raw_events[0].status, "pending");
    assert!(app.webhook_failures().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn ended_conference_creates_meeting_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.meet.set_transcripts_ready(true);

    let body = push_body("msg-10", &conference_ended("conferenceRecords/rec-10"));
    let response = push(&app, &body).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["action"], json!("created"));

    let meetings = app.meetings().await?;
    assert_eq!(meetings.len(), 1);
    assert_eq!(meetings[0].platform, "google_meet");
    assert_eq!(meetings[0].external_meeting_id, "conferenceRecords/rec-10");
    assert_eq!(meetings[0].topic, "Google Meet (spaces/standup)");
    assert_eq!(meetings[0].duration_minutes, Some(30));
    assert_eq!(meetings[0].participants, json!(["Ana", "Ben"]));

    // Pub/Sub redelivers with the same message id.
    let response = push(&app, &body).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await?,
        json!({ "received": true, "duplicate": true })
    );
    assert_eq!(app.meetings().await?.len(), 1);
    assert_eq!(app.raw_events().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn failed_meet_delivery_is_replayed_by_cron() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.tokens.set_failing(true);

    let body = push_body("msg-11", &conference_ended("conferenceRecords/rec-11"));
    let response = push(&app, &body).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["queuedForRetry"], json!(true));

    let failures = app.webhook_failures().await?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].platform, "google_meet");
    assert_eq!(failures[0].event_type, "google.workspace.meet.conference.v2.ended");

    app.tokens.set_failing(false);
    app.meet.set_transcripts_ready(true);
    app.make_failures_due().await?;
    let summary = run_retry_pass(&app.state).await?;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successful, 1);

    assert_eq!(app.webhook_failures().await?[0].status, "succeeded");
    let meetings = app.meetings().await?;
    assert_eq!(meetings.len(), 1);
    assert_eq!(meetings[0].external_meeting_id, "conferenceRecords/rec-11");
    assert_eq!(app.raw_events().await?[0].status, "processed");

    Ok(())
}
