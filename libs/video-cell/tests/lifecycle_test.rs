use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::ClientConfig;
use shared_utils::test_utils::TestUser;
use shared_utils::{Clock, ManualClock};
use video_cell::{
    CallEvent, CallLifecycleService, JoinOutcome, MeetingRegistry, StandardEligibility,
    VideoApiClient, VideoConfig, VideoSessionError,
};

const MEETING_ID: &str = "meet-1234";
const TOKEN: &str = "test-token";

struct Fixture {
    server: MockServer,
    service: CallLifecycleService,
    registry: Arc<MeetingRegistry>,
    clock: Arc<ManualClock>,
    appointment_id: Uuid,
}

async fn fixture() -> Fixture {
    let server = MockServer::start().await;
    let config = ClientConfig {
        api_base_url: server.uri(),
        chat_socket_url: String::new(),
        history_dir: ".telecare-test/history".to_string(),
        history_retention_days: 7,
        vendor_domains: vec!["zegocloud.com".to_string()],
        permissive_eligibility: false,
    };

    let api = Arc::new(VideoApiClient::new(&config, &VideoConfig::default()).unwrap());
    let registry = Arc::new(MeetingRegistry::new(api.clone()));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap(),
    ));
    let service = CallLifecycleService::new(
        api,
        registry.clone(),
        Arc::new(StandardEligibility),
        clock.clone() as Arc<dyn Clock>,
        VideoConfig::default(),
    );

    Fixture {
        server,
        service,
        registry,
        clock,
        appointment_id: Uuid::new_v4(),
    }
}

fn meetings_body(appointment_id: Uuid) -> serde_json::Value {
    json!([{ "appointmentId": appointment_id, "meetingId": MEETING_ID }])
}

fn details_body(joined: bool, ended: bool) -> serde_json::Value {
    json!({
        "videoCallInfo": {
            "meetingId": MEETING_ID,
            "meetingUrl": "https://rooms.example.com/meet-1234",
            "joinedAt": if joined { json!("2025-01-10T08:55:00Z") } else { json!(null) },
            "endedAt": if ended { json!("2025-01-10T09:40:00Z") } else { json!(null) },
        }
    })
}

async fn mount_meetings(fx: &Fixture) {
    Mock::given(method("GET"))
        .and(path("/video-calls/meetings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meetings_body(fx.appointment_id)))
        .mount(&fx.server)
        .await;
}

async fn mount_details(fx: &Fixture, joined: bool, ended: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/video-calls/meetings/{}", MEETING_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(details_body(joined, ended)))
        .mount(&fx.server)
        .await;
}

#[tokio::test]
async fn unknown_meeting_is_rejected_after_one_registry_refresh() {
    let fx = fixture().await;
    Mock::given(method("GET"))
        .and(path("/video-calls/meetings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let outcome = fx
        .service
        .join_call(MEETING_ID, fx.clock.now(), &TestUser::patient(), false, TOKEN)
        .await
        .unwrap();

    assert_eq!(outcome, JoinOutcome::UnknownMeeting);
}

#[tokio::test]
async fn registry_refresh_failure_degrades_to_unknown_meeting() {
    let fx = fixture().await;
    Mock::given(method("GET"))
        .and(path("/video-calls/meetings"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&fx.server)
        .await;

    let outcome = fx
        .service
        .join_call(MEETING_ID, fx.clock.now(), &TestUser::patient(), false, TOKEN)
        .await
        .unwrap();

    assert_eq!(outcome, JoinOutcome::UnknownMeeting);
}

#[tokio::test]
async fn patient_join_at_start_is_approved_without_backend_marking() {
    let fx = fixture().await;
    mount_meetings(&fx).await;
    mount_details(&fx, true, false).await;
    Mock::given(method("POST"))
        .and(path(format!("/video-calls/join/{}", fx.appointment_id)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let outcome = fx
        .service
        .join_call(MEETING_ID, fx.clock.now(), &TestUser::patient(), false, TOKEN)
        .await
        .unwrap();

    assert_matches!(outcome, JoinOutcome::Approved(details) => {
        assert_eq!(details.video_call_info.meeting_id, MEETING_ID);
    });
}

#[tokio::test]
async fn patient_before_start_waits_with_a_countdown() {
    let fx = fixture().await;
    mount_meetings(&fx).await;

    let scheduled = fx.clock.now() + chrono::Duration::minutes(45);
    let outcome = fx
        .service
        .join_call(MEETING_ID, scheduled, &TestUser::patient(), false, TOKEN)
        .await
        .unwrap();

    assert_matches!(outcome, JoinOutcome::NotYetJoinable(Some(wait)) => {
        assert_eq!(wait.total_minutes(), 45);
    });
}

#[tokio::test]
async fn early_access_patient_is_not_permitted() {
    let fx = fixture().await;
    mount_meetings(&fx).await;

    let outcome = fx
        .service
        .join_call(MEETING_ID, fx.clock.now(), &TestUser::patient(), true, TOKEN)
        .await
        .unwrap();

    assert_eq!(outcome, JoinOutcome::NotPermitted);
}

#[tokio::test]
async fn host_join_survives_a_failed_join_marking() {
    let fx = fixture().await;
    mount_meetings(&fx).await;
    mount_details(&fx, false, false).await;
    Mock::given(method("POST"))
        .and(path(format!("/video-calls/join/{}", fx.appointment_id)))
        .respond_with(ResponseTemplate::new(500).set_body_string("marking down"))
        .expect(1)
        .mount(&fx.server)
        .await;

    let scheduled = fx.clock.now() + chrono::Duration::minutes(10);
    let outcome = fx
        .service
        .join_call(MEETING_ID, scheduled, &TestUser::doctor(), true, TOKEN)
        .await
        .unwrap();

    assert_matches!(outcome, JoinOutcome::Approved(_));
}

#[tokio::test]
async fn missing_call_metadata_is_a_hard_stop() {
    let fx = fixture().await;
    mount_meetings(&fx).await;
    Mock::given(method("GET"))
        .and(path(format!("/video-calls/meetings/{}", MEETING_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "videoCallInfo": {
                "meetingId": MEETING_ID,
                "meetingUrl": "",
                "joinedAt": null,
                "endedAt": null,
            }
        })))
        .mount(&fx.server)
        .await;

    let result = fx
        .service
        .join_call(MEETING_ID, fx.clock.now(), &TestUser::patient(), false, TOKEN)
        .await;

    assert_matches!(result, Err(VideoSessionError::InvalidCallMetadata(_)));
}

#[tokio::test]
async fn start_call_is_host_only() {
    let fx = fixture().await;

    let result = fx
        .service
        .start_call(fx.appointment_id, MEETING_ID, &TestUser::patient(), TOKEN)
        .await;

    assert_matches!(result, Err(VideoSessionError::Unauthorized));
}

#[tokio::test]
async fn start_call_marks_joined_only_when_unmarked() {
    let fx = fixture().await;
    // First read shows no join timestamp; the re-fetch after marking does.
    Mock::given(method("GET"))
        .and(path(format!("/video-calls/meetings/{}", MEETING_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(details_body(false, false)))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    mount_details(&fx, true, false).await;
    Mock::given(method("POST"))
        .and(path(format!("/video-calls/join/{}", fx.appointment_id)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&fx.server)
        .await;

    let details = fx
        .service
        .start_call(fx.appointment_id, MEETING_ID, &TestUser::doctor(), TOKEN)
        .await
        .unwrap();

    assert!(details.video_call_info.joined_at.is_some());
}

#[tokio::test]
async fn start_call_does_not_remark_a_started_call() {
    let fx = fixture().await;
    mount_details(&fx, true, false).await;
    Mock::given(method("POST"))
        .and(path(format!("/video-calls/join/{}", fx.appointment_id)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    fx.service
        .start_call(fx.appointment_id, MEETING_ID, &TestUser::admin(), TOKEN)
        .await
        .unwrap();
}

#[tokio::test]
async fn end_call_is_host_only_and_refreshes_the_registry() {
    let fx = fixture().await;
    Mock::given(method("GET"))
        .and(path("/video-calls/meetings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(meetings_body(fx.appointment_id)))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    fx.registry.refresh(TOKEN).await.unwrap();
    assert_eq!(fx.registry.len().await, 1);

    assert_matches!(
        fx.service
            .end_call(fx.appointment_id, &TestUser::patient(), TOKEN)
            .await,
        Err(VideoSessionError::Unauthorized)
    );

    // The ended meeting disappears from the next registry snapshot.
    Mock::given(method("GET"))
        .and(path("/video-calls/meetings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/video-calls/end/{}", fx.appointment_id)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&fx.server)
        .await;

    fx.service
        .end_call(fx.appointment_id, &TestUser::doctor(), TOKEN)
        .await
        .unwrap();

    assert!(fx.registry.is_empty().await);
}

#[tokio::test]
async fn watcher_emits_ended_when_the_backend_reports_it() {
    let fx = fixture().await;
    Mock::given(method("GET"))
        .and(path(format!("/video-calls/meetings/{}", MEETING_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(details_body(true, false)))
        .up_to_n_times(2)
        .mount(&fx.server)
        .await;
    mount_details(&fx, true, true).await;

    let mut events = fx.service.subscribe();
    let handle = fx
        .service
        .watch_until_ended(MEETING_ID.to_string(), TOKEN.to_string());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("watcher should report the ended call")
        .unwrap();
    assert_matches!(event, CallEvent::Ended { meeting_id } if meeting_id == MEETING_ID);
    handle.await.unwrap();
}

#[tokio::test]
async fn stop_watching_ends_the_poll_loop_quietly() {
    let fx = fixture().await;
    mount_details(&fx, true, false).await;

    let mut events = fx.service.subscribe();
    fx.service.stop_watching();
    let handle = fx
        .service
        .watch_until_ended(MEETING_ID.to_string(), TOKEN.to_string());

    handle.await.unwrap();
    assert!(events.try_recv().is_err());
}
