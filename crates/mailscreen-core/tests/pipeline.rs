//! End-to-end pipeline tests against a mocked Gmail API.

#![allow(clippy::unwrap_used)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use mailscreen_core::notify::RecordingNotifier;
use mailscreen_core::{
    LimboDecision, Pipeline, RunOutcome, ScreenStatus, Screener, ScreenerStatus, ScreenerTimings,
    User, UserId,
};
use mailscreen_gmail::PushNotification;
use mailscreen_oauth::TokenClient;
use mockito::Matcher;

const NOT_FOUND_BODY: &str = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#;

async fn pipeline(server: &mockito::Server) -> Pipeline<RecordingNotifier> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let token_client = TokenClient::google("id", "secret").unwrap();
    Pipeline::new(
        pool,
        token_client,
        mailscreen_core::config::GoogleConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            pubsub_topic: "projects/mailscreen/topics/gmail-push".into(),
            pubsub_subscription: "projects/mailscreen/subscriptions/gmail-push".into(),
        },
        mailscreen_core::config::AppConfig {
            base_url: "https://app.mailscreen.app".into(),
            operator_email: "ops@mailscreen.app".into(),
        },
        RecordingNotifier::new(),
    )
    .await
    .unwrap()
    .with_gmail_base_url(server.url())
}

async fn seed_user(pipeline: &Pipeline<RecordingNotifier>, watermark: u64) -> User {
    let mut user = User::new(UserId::new("u1"), "user@example.com");
    user.gmail_id = Some("g1".into());
    user.refresh_token = Some("rt".into());
    user.access_token = Some("at".into());
    user.access_token_expire_at = Some(Utc::now() + Duration::hours(1));
    user.history_id = Some(watermark);
    user.timezone = Some("UTC".into());
    user.daily_screener_time = Some("09:00".into());
    user.is_daily_screener_on = true;
    pipeline.users.insert(&user).await.unwrap();
    user
}

fn full_message_json(
    id: &str,
    thread_id: &str,
    history_id: u64,
    labels: &[&str],
    from: &str,
    subject: &str,
    extra_headers: &[(&str, &str)],
    body_text: &str,
) -> String {
    let mut headers = vec![
        format!(r#"{{"name":"From","value":"{from}"}}"#),
        format!(r#"{{"name":"Subject","value":"{subject}"}}"#),
    ];
    for (name, value) in extra_headers {
        headers.push(format!(r#"{{"name":"{name}","value":"{value}"}}"#));
    }
    let labels = labels
        .iter()
        .map(|l| format!(r#""{l}""#))
        .collect::<Vec<_>>()
        .join(",");
    let data = URL_SAFE_NO_PAD.encode(body_text);
    format!(
        r#"{{
            "id": "{id}",
            "threadId": "{thread_id}",
            "historyId": "{history_id}",
            "internalDate": "1700000000000",
            "snippet": "{body_text}",
            "labelIds": [{labels}],
            "payload": {{
                "mimeType": "text/plain",
                "headers": [{}],
                "body": {{"size": {}, "data": "{data}"}}
            }}
        }}"#,
        headers.join(","),
        body_text.len()
    )
}

fn history_page(history_id: u64, message_id: &str, thread_id: &str) -> String {
    format!(
        r#"{{"history":[{{"id":"{history_id}","messagesAdded":[{{"message":{{"id":"{message_id}","threadId":"{thread_id}"}}}}]}}]}}"#
    )
}

#[tokio::test]
async fn test_stale_event_is_ignored_without_side_effects() {
    let server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    seed_user(&pipeline, 500).await;

    // no mocks registered: any API call would fail the test
    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 400,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stale);

    let user = pipeline.users.get(&UserId::new("u1")).await.unwrap().unwrap();
    assert_eq!(user.history_id, Some(500));
}

#[tokio::test]
async fn test_push_envelope_subscription_is_verified() {
    let server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    seed_user(&pipeline, 500).await;

    let data = base64::engine::general_purpose::STANDARD
        .encode(r#"{"emailAddress":"user@example.com","historyId":400}"#);
    let envelope = |subscription: &str| {
        format!(
            r#"{{"message":{{"data":"{data}","messageId":"1","publishTime":"2024-01-01T00:00:00Z"}},"subscription":"{subscription}"}}"#
        )
    };

    // a spoofed subscription is rejected before anything runs
    let err = pipeline
        .handle_push_envelope(&envelope("projects/other/subscriptions/spoofed"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unexpected subscription"));

    // the real subscription decodes and flows into the usual handling
    let outcome = pipeline
        .handle_push_envelope(&envelope("projects/mailscreen/subscriptions/gmail-push"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Stale);
}

#[tokio::test]
async fn test_replayed_event_after_processing_changes_nothing() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    seed_user(&pipeline, 100).await;

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["UNREAD", "INBOX"],
            "Stranger <stranger@example.com>",
            "Hello there",
            &[],
            "just saying hi",
        ))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/messages/m1/modify")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let push = PushNotification {
        email_address: "user@example.com".into(),
        history_id: 150,
    };
    assert_eq!(pipeline.handle_push(&push).await.unwrap(), RunOutcome::Completed);
    // at-least-once delivery: the same event arrives again
    assert_eq!(pipeline.handle_push(&push).await.unwrap(), RunOutcome::Stale);

    let limbo = pipeline
        .limbo
        .undecided_for_user(&UserId::new("u1"))
        .await
        .unwrap();
    assert_eq!(limbo.len(), 1, "replay must not double-stage");
    let user = pipeline.users.get(&UserId::new("u1")).await.unwrap().unwrap();
    assert_eq!(user.history_id, Some(150));
}

#[tokio::test]
async fn test_first_time_sender_lands_in_limbo() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    seed_user(&pipeline, 100).await;

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["UNREAD", "INBOX"],
            "Sales Team <sales@newco.com>",
            "Introducing our product",
            &[],
            "have a look",
        ))
        .create_async()
        .await;
    let unlabel = server
        .mock("POST", "/messages/m1/modify")
        .match_body(Matcher::PartialJsonString(
            r#"{"removeLabelIds":["INBOX"]}"#.into(),
        ))
        .with_body("{}")
        .create_async()
        .await;

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    unlabel.assert_async().await;

    let limbo = pipeline
        .limbo
        .undecided_for_user(&UserId::new("u1"))
        .await
        .unwrap();
    assert_eq!(limbo.len(), 1);
    assert_eq!(limbo[0].sender_email, "sales@newco.com");
    assert_eq!(limbo[0].from_name.as_deref(), Some("Sales Team"));
    assert_eq!(limbo[0].message_id, "m1");
    assert_eq!(limbo[0].body.as_deref(), Some("have a look"));
}

#[tokio::test]
async fn test_denied_sender_is_trashed() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;
    pipeline
        .senders
        .upsert_overriding(
            &user.id,
            &[("noise@spam.com".into(), None)],
            ScreenStatus::Out,
        )
        .await
        .unwrap();

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["UNREAD", "INBOX"],
            "noise@spam.com",
            "Buy now",
            &[],
            "spam",
        ))
        .create_async()
        .await;
    let trash = server
        .mock("POST", "/messages/m1/trash")
        .with_body("{}")
        .create_async()
        .await;

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    trash.assert_async().await;
    assert!(
        pipeline
            .limbo
            .undecided_for_user(&user.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_sent_message_whitelists_recipients() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["SENT"],
            "user@example.com",
            "Re: catching up",
            &[("To", "Friend <friend@x.com>"), ("Cc", "copy@y.com")],
            "see you soon",
        ))
        .create_async()
        .await;

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let friend = pipeline
        .senders
        .get(&user.id, "friend@x.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(friend.status, ScreenStatus::In);
    assert_eq!(friend.from_name.as_deref(), Some("Friend"));
    let copied = pipeline.senders.get(&user.id, "copy@y.com").await.unwrap();
    assert!(copied.is_some());
}

#[tokio::test]
async fn test_transactional_email_stays_in_inbox() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["UNREAD", "INBOX"],
            "no-reply@service.com",
            "Your verification code",
            &[],
            "code inside",
        ))
        .create_async()
        .await;
    // no modify/trash mocks: any mutation would fail the run

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(
        pipeline
            .limbo
            .undecided_for_user(&user.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_vanished_message_is_not_staged() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    server
        .mock("GET", "/history")
        .match_query(Matcher::Any)
        .with_body(history_page(150, "m1", "t1"))
        .create_async()
        .await;
    server
        .mock("GET", "/messages/m1")
        .match_query(Matcher::Any)
        .with_body(full_message_json(
            "m1",
            "t1",
            150,
            &["UNREAD", "INBOX"],
            "gone@later.com",
            "Fleeting",
            &[],
            "already deleted elsewhere",
        ))
        .create_async()
        .await;
    server
        .mock("POST", "/messages/m1/modify")
        .with_status(404)
        .with_body(NOT_FOUND_BODY)
        .create_async()
        .await;

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(
        pipeline
            .limbo
            .undecided_for_user(&user.id)
            .await
            .unwrap()
            .is_empty(),
        "a message that vanished before unlabeling must not be staged"
    );
}

#[tokio::test]
async fn test_screener_off_advances_watermark_only() {
    let server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let mut user = User::new(UserId::new("u1"), "user@example.com");
    user.history_id = Some(100);
    user.is_daily_screener_on = false;
    pipeline.users.insert(&user).await.unwrap();

    let outcome = pipeline
        .handle_push(&PushNotification {
            email_address: "user@example.com".into(),
            history_id: 150,
        })
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::ScreenerOff);

    let stored = pipeline.users.get(&user.id).await.unwrap().unwrap();
    assert_eq!(stored.history_id, Some(150));
}

#[tokio::test]
async fn test_resolve_failure_keeps_rows_and_rules() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    let message = mailscreen_core::LimboMessage::new(
        user.id.clone(),
        "decided@x.com",
        Some("Decided".into()),
        "m1",
        "t1",
        "subject",
        None,
        "snippet",
        Utc::now(),
    );
    pipeline.limbo.stage(&message).await.unwrap();
    pipeline
        .limbo
        .record_decision(&user.id, "decided@x.com", LimboDecision::In)
        .await
        .unwrap();

    server
        .mock("POST", "/messages/batchModify")
        .with_status(500)
        .with_body(r#"{"error":{"code":500,"message":"Backend Error","status":"INTERNAL"}}"#)
        .create_async()
        .await;

    pipeline.update_screening_results(&user.id).await.unwrap();

    // remote failed: local rows and rules untouched, operator alerted
    assert_eq!(pipeline.limbo.decided_for_user(&user.id).await.unwrap().len(), 1);
    assert!(pipeline.senders.get(&user.id, "decided@x.com").await.unwrap().is_none());
    assert!(!pipeline.notifier.notices().is_empty());
}

#[tokio::test]
async fn test_resolve_success_commits_rows_and_rules() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    for (sender, decision) in [("keep@x.com", LimboDecision::In), ("drop@x.com", LimboDecision::Out)] {
        let message = mailscreen_core::LimboMessage::new(
            user.id.clone(),
            sender,
            None,
            format!("m-{sender}"),
            "t1",
            "subject",
            None,
            "snippet",
            Utc::now(),
        );
        pipeline.limbo.stage(&message).await.unwrap();
        pipeline
            .limbo
            .record_decision(&user.id, sender, decision)
            .await
            .unwrap();
    }

    server
        .mock("POST", "/messages/batchModify")
        .with_status(204)
        .create_async()
        .await;
    server
        .mock("POST", "/messages/m-drop@x.com/trash")
        .with_body("{}")
        .create_async()
        .await;

    pipeline.update_screening_results(&user.id).await.unwrap();

    assert!(pipeline.limbo.decided_for_user(&user.id).await.unwrap().is_empty());
    assert_eq!(
        pipeline.senders.get(&user.id, "keep@x.com").await.unwrap().unwrap().status,
        ScreenStatus::In
    );
    assert_eq!(
        pipeline.senders.get(&user.id, "drop@x.com").await.unwrap().unwrap().status,
        ScreenStatus::Out
    );
}

#[tokio::test]
async fn test_delivery_skips_empty_screener_and_reschedules() {
    let server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    let now = Utc::now();
    let (window_start, window_end) = mailscreen_core::service::delivery_window(now);
    let mid_window = window_start + (window_end - window_start) / 2;
    let mut due = Screener::scheduled(
        user.id.clone(),
        ScreenerTimings {
            scheduled_at: mid_window,
            expire_at: mid_window + Duration::hours(24),
        },
    );
    due.status = ScreenerStatus::Scheduled;
    pipeline.screeners.replace_scheduled(&due).await.unwrap();

    let summary = pipeline.run_delivery_sweep(now).await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.sent, 0);

    // rescheduled: exactly one scheduled screener, in the future
    let scheduled = pipeline.screeners.scheduled_for_user(&user.id).await.unwrap();
    assert_eq!(scheduled.len(), 1);
    assert!(scheduled[0].scheduled_at > now);
    assert_ne!(scheduled[0].id, due.id);
}

#[tokio::test]
async fn test_delivery_sends_and_schedules_next() {
    let mut server = mockito::Server::new_async().await;
    let pipeline = pipeline(&server).await;
    let user = seed_user(&pipeline, 100).await;

    pipeline
        .limbo
        .stage(&mailscreen_core::LimboMessage::new(
            user.id.clone(),
            "pending@x.com",
            None,
            "m1",
            "t1",
            "subject",
            None,
            "snippet",
            Utc::now(),
        ))
        .await
        .unwrap();

    let now = Utc::now();
    let (window_start, window_end) = mailscreen_core::service::delivery_window(now);
    let mid_window = window_start + (window_end - window_start) / 2;
    let due = Screener::scheduled(
        user.id.clone(),
        ScreenerTimings {
            scheduled_at: mid_window,
            expire_at: mid_window + Duration::hours(24),
        },
    );
    pipeline.screeners.replace_scheduled(&due).await.unwrap();

    let import = server
        .mock("POST", "/messages/import")
        .match_query(Matcher::Any)
        .with_body(r#"{"id":"prov-1"}"#)
        .create_async()
        .await;

    let summary = pipeline.run_delivery_sweep(now).await.unwrap();
    assert_eq!(summary.sent, 1);
    import.assert_async().await;

    let sent = pipeline.screeners.get(&user.id, &due.id).await.unwrap().unwrap();
    assert_eq!(sent.status, ScreenerStatus::Sent);
    assert_eq!(sent.provider_id.as_deref(), Some("prov-1"));

    let scheduled = pipeline.screeners.scheduled_for_user(&user.id).await.unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_ne!(scheduled[0].id, due.id);
}
