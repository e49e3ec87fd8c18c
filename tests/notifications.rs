mod common;

use common::{eventually, notification_json, session_json, signed_in_client, FakeSocket};
use lolmatch_client::models::NotificationStatus;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Acknowledge the notification room join so the handshake stops retrying
async fn finish_handshake(socket: &mut FakeSocket) {
    let frame = socket.expect_event("join-notification-room").await;
    socket.ack(&frame["ack"], json!({"success": true}));
}

#[tokio::test]
async fn test_notification_room_join_retries_until_acked() {
    let (_harness, mut socket) = signed_in_client("u1").await;

    let first = socket.expect_event("join-notification-room").await;
    assert_eq!(first["data"], json!({"userId": "u1"}));

    // Unanswered, so the join is sent again
    let second = socket.expect_event("join-notification-room").await;
    assert_ne!(first["ack"], second["ack"]);
    socket.ack(&second["ack"], json!({"success": true}));

    while let Some(frame) = socket.try_next_frame(Duration::from_millis(500)).await {
        assert_ne!(frame["event"], "join-notification-room");
    }
}

#[tokio::test]
async fn test_refused_join_is_retried() {
    let (_harness, mut socket) = signed_in_client("u1").await;

    let first = socket.expect_event("join-notification-room").await;
    socket.ack(&first["ack"], json!({"success": false, "error": "Try again"}));

    finish_handshake(&mut socket).await;
}

#[tokio::test]
async fn test_live_notifications_update_pending_count() {
    let (harness, mut socket) = signed_in_client("u1").await;
    finish_handshake(&mut socket).await;
    let notifications = harness.client.notifications();

    socket.push("new-notification", notification_json("n1", "pending"));
    socket.push("new-notification", notification_json("n1", "pending"));
    socket.push("new-notification", notification_json("n2", "accepted"));
    socket.push("new-notification", notification_json("n3", "pending"));
    eventually("third notification", move || async move {
        notifications.notifications().await.len() == 3
    })
    .await;

    let ids: Vec<String> = notifications
        .notifications()
        .await
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["n3", "n2", "n1"]);
    assert_eq!(notifications.pending_count().await, 2);
}

#[tokio::test]
async fn test_accept_reconciles_with_server() {
    let (harness, mut socket) = signed_in_client("u1").await;
    finish_handshake(&mut socket).await;

    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            notification_json("n1", "pending"),
            notification_json("n2", "pending"),
        ])))
        .mount(&harness.server)
        .await;

    let notifications = harness.client.notifications();
    notifications.fetch_notifications().await.unwrap();
    assert_eq!(notifications.pending_count().await, 2);

    harness.server.reset().await;
    Mock::given(method("POST"))
        .and(path("/api/squads/invitations/n1/accept"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            notification_json("n1", "accepted"),
            notification_json("n2", "pending"),
        ])))
        .mount(&harness.server)
        .await;

    notifications.accept_invitation("n1").await.unwrap();

    assert_eq!(notifications.pending_count().await, 1);
    let items = notifications.notifications().await;
    assert_eq!(items[0].status, NotificationStatus::Accepted);
}

#[tokio::test]
async fn test_failed_reject_restores_server_state() {
    let (harness, mut socket) = signed_in_client("u1").await;
    finish_handshake(&mut socket).await;

    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            notification_json("n1", "pending"),
        ])))
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/squads/invitations/n1/reject"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"message": "Invitation expired"})),
        )
        .mount(&harness.server)
        .await;

    let notifications = harness.client.notifications();
    notifications.fetch_notifications().await.unwrap();

    let error = notifications.reject_invitation("n1").await.unwrap_err();
    assert_eq!(error.status(), Some(409));
    assert_eq!(error.to_string(), "HTTP 409: Invitation expired");
    assert_eq!(notifications.pending_count().await, 1);
}

#[tokio::test]
async fn test_logout_clears_notifications() {
    let (harness, mut socket) = signed_in_client("u1").await;
    finish_handshake(&mut socket).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("u1")))
        .mount(&harness.server)
        .await;

    socket.push("new-notification", notification_json("n1", "pending"));
    let notifications = harness.client.notifications();
    eventually("notification", move || async move {
        notifications.pending_count().await == 1
    })
    .await;

    harness.client.session().logout().await;
    eventually("cleared", move || async move {
        notifications.notifications().await.is_empty()
    })
    .await;
}

#[tokio::test]
async fn test_delete_removes_first_then_refetches() {
    let (harness, mut socket) = signed_in_client("u1").await;
    finish_handshake(&mut socket).await;

    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            notification_json("n1", "pending"),
            notification_json("n2", "pending"),
        ])))
        .mount(&harness.server)
        .await;
    let notifications = harness.client.notifications().clone();
    notifications.fetch_notifications().await.unwrap();

    harness.server.reset().await;
    Mock::given(method("DELETE"))
        .and(path("/api/notifications/n1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            notification_json("n2", "pending"),
            notification_json("n3", "pending"),
        ])))
        .expect(1)
        .mount(&harness.server)
        .await;

    let delete = {
        let notifications = notifications.clone();
        tokio::spawn(async move { notifications.delete_notification("n1").await })
    };
    let view = notifications.clone();
    eventually("optimistic removal", move || {
        let view = view.clone();
        async move { view.notifications().await.len() == 1 }
    })
    .await;
    assert!(!delete.is_finished());
    assert_eq!(notifications.notifications().await[0].id, "n2");

    delete.await.unwrap().unwrap();
    let ids: Vec<String> = notifications
        .notifications()
        .await
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, vec!["n2", "n3"]);
}
