//! End-to-end call flows against the in-memory server.

use std::time::Duration;
use tokio::time::{Instant, sleep};
use txcore::protocol::RequestEnvelope;
use txcore::types::call::{CallId, CallPhase};
use txcore::types::events::Event;

use super::{CallError, InviteOptions};
use crate::client::ClientError;
use crate::media::{IceConnectionState, MediaEvent};
use crate::test_utils::{
    MALFORMED_SDP, TestHarness, eventually, frames, test_config, wait_for_requests,
};

const INVITE: &str = "telnyx_rtc.invite";
const ANSWER: &str = "telnyx_rtc.answer";
const ATTACH: &str = "telnyx_rtc.attach";
const BYE: &str = "telnyx_rtc.bye";
const MODIFY: &str = "telnyx_rtc.modify";

fn phase(h: &TestHarness, call_id: CallId) -> Option<CallPhase> {
    h.client.call(call_id).map(|info| info.phase)
}

async fn wait_phase(h: &TestHarness, call_id: CallId, expected: CallPhase) {
    let client = h.client.clone();
    eventually(&format!("{call_id} to reach {expected}"), || {
        client.call(call_id).map(|info| info.phase) == Some(expected.clone())
    })
    .await;
}

/// Dials and waits for the invite to hit the wire.
async fn dial(h: &TestHarness) -> (CallId, RequestEnvelope) {
    let handle = h
        .client
        .new_invite(InviteOptions::new("2000"))
        .await
        .unwrap();
    let call_id = handle.id();
    let server = h.server();
    eventually("invite", || {
        server
            .requests_for(INVITE)
            .iter()
            .any(|r| r.call_id() == Some(call_id))
    })
    .await;
    let invite = server
        .requests_for(INVITE)
        .into_iter()
        .find(|r| r.call_id() == Some(call_id))
        .unwrap();
    (call_id, invite)
}

async fn established_call(h: &TestHarness) -> CallId {
    let (call_id, invite) = dial(h).await;
    let server = h.server();
    server.push(frames::result(&invite.id)).await;
    server
        .push(frames::answer(call_id, Some("v=0 remote answer")))
        .await;
    wait_phase(h, call_id, CallPhase::Active).await;
    let client = h.client.clone();
    eventually("invite slot released", || {
        client
            .calls
            .get(&call_id)
            .is_some_and(|call| call.in_flight().is_none())
    })
    .await;
    call_id
}

#[tokio::test]
async fn test_outgoing_call_happy_path() {
    let h = TestHarness::connected().await;
    let (call_id, invite) = dial(&h).await;

    assert_eq!(invite.params["sessid"], "sess-1");
    assert_eq!(invite.params["sdp"], "v=0 offer 1");
    assert_eq!(invite.params["dialogParams"]["destination_number"], "2000");
    assert_eq!(invite.params["dialogParams"]["caller_id_number"], "1000");
    assert_eq!(phase(&h, call_id), Some(CallPhase::Connecting));

    let server = h.server();
    server.push(frames::result(&invite.id)).await;
    server.push(frames::ringing(call_id)).await;
    wait_phase(&h, call_id, CallPhase::Ringing).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallRinging(r) if r.call_id == call_id))
        .await;

    server
        .push(frames::answer(call_id, Some("v=0 remote answer")))
        .await;
    wait_phase(&h, call_id, CallPhase::Active).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallAnswered { call_id: id } if *id == call_id))
        .await;
    let engine = h.media.engine(call_id).unwrap();
    assert_eq!(
        engine.remote_descriptions().last().map(|d| d.sdp.as_str()),
        Some("v=0 remote answer")
    );
    let info = h.client.call(call_id).unwrap();
    assert!(info.connected_at.is_some());
    assert!(info.milestones.contains_key("invite_sent"));

    h.client.end_call(call_id).unwrap();
    assert!(h.client.call(call_id).is_none());
    let byes = wait_for_requests(&server, BYE, 1).await;
    assert_eq!(byes[0].params["causeCode"], 16);
    assert_eq!(byes[0].params["cause"], "NORMAL_CLEARING");
    h.events
        .wait_for(|e| matches!(e, Event::CallEnded { call_id: id, .. } if *id == call_id))
        .await;
    eventually("media closed", || engine.is_closed()).await;

    // Ending again is a no-op.
    h.client.end_call(call_id).unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(server.requests_for(BYE).len(), 1);
}

#[tokio::test]
async fn test_hold_round_trip_sends_one_modify_per_toggle() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;
    let server = h.server();

    assert_eq!(h.client.hold_unhold(call_id).await.unwrap(), CallPhase::Held);
    let modifies = wait_for_requests(&server, MODIFY, 1).await;
    assert_eq!(modifies[0].params["action"], "hold");

    // Still waiting for the server: a second toggle is refused.
    assert!(matches!(
        h.client.hold_unhold(call_id).await,
        Err(ClientError::Call(CallError::BusyLocally { .. }))
    ));
    assert_eq!(phase(&h, call_id), Some(CallPhase::Held));

    server
        .push(frames::modify_ack(&modifies[0].id, call_id, "hold"))
        .await;
    let client = h.client.clone();
    eventually("modify slot released", || {
        client
            .calls
            .get(&call_id)
            .is_some_and(|call| call.in_flight().is_none())
    })
    .await;

    assert_eq!(h.client.hold_unhold(call_id).await.unwrap(), CallPhase::Active);
    let modifies = wait_for_requests(&server, MODIFY, 2).await;
    assert_eq!(modifies.len(), 2);
    assert_eq!(modifies[1].params["action"], "unhold");
}

#[tokio::test]
async fn test_hold_stays_applied_when_server_refuses() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;
    let server = h.server();

    h.client.hold_unhold(call_id).await.unwrap();
    let modifies = wait_for_requests(&server, MODIFY, 1).await;
    server
        .push(frames::error(&modifies[0].id, -32000, "hold rejected"))
        .await;

    h.events
        .wait_for(|e| matches!(e, Event::CallWarning { call_id: id, .. } if *id == call_id))
        .await;
    assert_eq!(phase(&h, call_id), Some(CallPhase::Held));
}

#[tokio::test]
async fn test_ice_failure_triggers_a_single_update_media() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;
    let server = h.server();
    let engine = h.media.engine(call_id).unwrap();

    engine
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Disconnected))
        .await;
    engine
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Failed))
        .await;

    let modifies = wait_for_requests(&server, MODIFY, 1).await;
    assert_eq!(modifies[0].params["action"], "updateMedia");
    assert_eq!(engine.offers(), vec![false, true]);
    wait_phase(&h, call_id, CallPhase::Renegotiating).await;

    server
        .push(frames::update_media_answer(&modifies[0].id, call_id, "v=0 renegotiated"))
        .await;
    wait_phase(&h, call_id, CallPhase::Active).await;
    assert_eq!(
        engine.remote_descriptions().last().map(|d| d.sdp.as_str()),
        Some("v=0 renegotiated")
    );

    sleep(Duration::from_millis(150)).await;
    assert_eq!(server.requests_for(MODIFY).len(), 1);
}

#[tokio::test]
async fn test_ice_recovering_within_grace_skips_renegotiation() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;
    let engine = h.media.engine(call_id).unwrap();

    engine
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Disconnected))
        .await;
    engine
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Connected))
        .await;

    sleep(Duration::from_millis(150)).await;
    assert!(h.server().requests_for(MODIFY).is_empty());
    assert_eq!(phase(&h, call_id), Some(CallPhase::Active));
}

#[tokio::test]
async fn test_failed_restart_offer_keeps_the_call_active() {
    let h = TestHarness::connected().await;
    h.media.set_fail_restart_offers(true);
    let call_id = established_call(&h).await;
    let engine = h.media.engine(call_id).unwrap();

    engine
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Failed))
        .await;
    h.events
        .wait_for(|e| matches!(e, Event::CallWarning { call_id: id, .. } if *id == call_id))
        .await;

    assert_eq!(phase(&h, call_id), Some(CallPhase::Active));
    assert!(h.server().requests_for(MODIFY).is_empty());
}

#[tokio::test]
async fn test_unusable_answer_fails_only_that_call() {
    let h = TestHarness::connected().await;
    let (call_id, _) = dial(&h).await;

    h.server()
        .push(frames::answer(call_id, Some(MALFORMED_SDP)))
        .await;
    h.events
        .wait_for(|e| matches!(e, Event::CallError { call_id: id, .. } if *id == call_id))
        .await;
    h.events
        .wait_for(|e| {
            matches!(e, Event::CallStateChanged { call_id: id, phase: CallPhase::Error } if *id == call_id)
        })
        .await;
    assert!(h.client.call(call_id).is_none());

    let next = established_call(&h).await;
    assert_ne!(next, call_id);
}

#[tokio::test]
async fn test_answer_without_sdp_and_no_early_media_is_an_error() {
    let h = TestHarness::connected().await;
    let (call_id, _) = dial(&h).await;

    h.server().push(frames::answer(call_id, None)).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallError { call_id: id, .. } if *id == call_id))
        .await;
    assert!(h.client.call(call_id).is_none());
}

#[tokio::test]
async fn test_early_media_then_answer_waits_for_ice() {
    let h = TestHarness::connected().await;
    let (call_id, _) = dial(&h).await;
    let server = h.server();

    server.push(frames::media(call_id, Some("v=0 early"))).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallEarlyMedia { call_id: id } if *id == call_id))
        .await;
    assert!(h.client.call(call_id).unwrap().early_media);

    server.push(frames::answer(call_id, None)).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallAnswered { call_id: id } if *id == call_id))
        .await;
    assert_eq!(phase(&h, call_id), Some(CallPhase::Connecting));

    h.media
        .engine(call_id)
        .unwrap()
        .emit(MediaEvent::IceConnectionState(IceConnectionState::Connected))
        .await;
    wait_phase(&h, call_id, CallPhase::Active).await;
}

#[tokio::test]
async fn test_media_without_sdp_only_warns() {
    let h = TestHarness::connected().await;
    let (call_id, _) = dial(&h).await;

    h.server().push(frames::media(call_id, None)).await;
    h.events
        .wait_for(|e| matches!(e, Event::CallWarning { call_id: id, .. } if *id == call_id))
        .await;
    assert_eq!(phase(&h, call_id), Some(CallPhase::Connecting));
}

#[tokio::test]
async fn test_frames_for_unknown_calls_are_reported() {
    let h = TestHarness::connected().await;
    let stranger = CallId::new();

    h.server()
        .push(frames::bye(stranger, "NORMAL_CLEARING", 16))
        .await;
    let event = h
        .events
        .wait_for(|e| matches!(e, Event::UnroutableCallMessage { .. }))
        .await;
    assert!(matches!(
        event,
        Event::UnroutableCallMessage { call_id, kind: BYE } if call_id == stranger
    ));
}

#[tokio::test]
async fn test_answer_after_local_hangup_is_discarded() {
    let h = TestHarness::connected().await;
    let (call_id, _) = dial(&h).await;

    h.client.end_call(call_id).unwrap();
    let byes = wait_for_requests(&h.server(), BYE, 1).await;
    assert_eq!(byes[0].params["cause"], "USER_BUSY");

    h.server()
        .push(frames::answer(call_id, Some("v=0 late")))
        .await;
    h.events
        .wait_for(|e| matches!(e, Event::UnroutableCallMessage { call_id: id, .. } if *id == call_id))
        .await;
    assert_eq!(
        h.events
            .count(|e| matches!(e, Event::CallAnswered { .. })),
        0
    );
}

#[tokio::test]
async fn test_remote_hangup_carries_the_cause() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;

    h.server().push(frames::bye(call_id, "USER_BUSY", 17)).await;
    let ended = h
        .events
        .wait_for(|e| matches!(e, Event::CallEnded { call_id: id, .. } if *id == call_id))
        .await;
    match ended {
        Event::CallEnded {
            reason: Some(reason),
            ..
        } => {
            assert_eq!(reason.cause.as_deref(), Some("USER_BUSY"));
            assert_eq!(reason.cause_code, Some(17));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.client.active_calls().is_empty());
}

#[tokio::test]
async fn test_incoming_call_accept() {
    let h = TestHarness::connected().await;
    let call_id = CallId::new();
    let server = h.server();

    server.push(frames::invite(call_id, "v=0 remote offer")).await;
    let incoming = h
        .events
        .wait_for(|e| matches!(e, Event::IncomingCall(_)))
        .await;
    match incoming {
        Event::IncomingCall(incoming) => {
            assert_eq!(incoming.call_id, call_id);
            assert_eq!(incoming.caller_number.as_deref(), Some("2000"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(phase(&h, call_id), Some(CallPhase::Ringing));

    // A repeated invite does not create a second call.
    server.push(frames::invite(call_id, "v=0 remote offer")).await;

    let handle = h.client.accept_call(call_id, "2000", Vec::new()).unwrap();
    let answers = wait_for_requests(&server, ANSWER, 1).await;
    assert_eq!(answers[0].call_id(), Some(call_id));
    assert_eq!(answers[0].params["sdp"], "v=0 local answer");
    wait_phase(&h, call_id, CallPhase::Active).await;
    assert_eq!(handle.phase(), Some(CallPhase::Active));
    assert_eq!(h.media.engine_count(call_id), 1);

    // Accepting twice is refused.
    assert!(matches!(
        h.client.accept_call(call_id, "2000", Vec::new()),
        Err(ClientError::Call(CallError::WrongPhase { .. }))
    ));
}

#[tokio::test]
async fn test_dtmf_and_local_toggles() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;

    assert!(matches!(
        h.client.dtmf(call_id, "12x"),
        Err(ClientError::Call(CallError::InvalidDtmf(_)))
    ));
    h.client.dtmf(call_id, "1#").unwrap();
    let infos = wait_for_requests(&h.server(), "telnyx_rtc.info", 1).await;
    assert_eq!(infos[0].params["dtmf"], "1#");

    assert!(h.client.mute_unmute(call_id).unwrap());
    assert!(!h.client.mute_unmute(call_id).unwrap());
    assert!(h.client.toggle_speaker(call_id).unwrap());
    assert!(h.client.call(call_id).unwrap().speaker_on);
}

#[tokio::test]
async fn test_call_survives_reconnect_through_attach() {
    let mut config = test_config();
    config.reconnect_timeout = Duration::from_secs(2);
    let h = TestHarness::connected_with(config).await;
    let call_id = established_call(&h).await;
    let first_engine = h.media.engine(call_id).unwrap();

    h.server().drop_connection().await;
    h.events
        .wait_for(|e| matches!(e, Event::Reconnecting))
        .await;
    assert!(matches!(phase(&h, call_id), Some(CallPhase::Reconnecting(_))));

    let transport = h.transport.clone();
    eventually("second dial", || transport.dial_count() == 2).await;
    h.register(2).await;
    let server = h.server();
    let logins = server.requests_for("login");
    assert_eq!(logins[0].params["sessid"], "sess-1");

    server.push(frames::attach(call_id, "v=0 reoffer")).await;
    let attaches = wait_for_requests(&server, ATTACH, 1).await;
    assert_eq!(attaches[0].params["dialogParams"]["attach"], true);
    assert_eq!(attaches[0].params["sdp"], "v=0 local answer");
    wait_phase(&h, call_id, CallPhase::Active).await;

    assert_eq!(h.media.engine_count(call_id), 2);
    eventually("old peer closed", || first_engine.is_closed()).await;
    let client = h.client.clone();
    eventually("recovery finished", || {
        !crate::connection::lock(&client.recovery).is_running()
    })
    .await;
    assert!(h.client.connection.has_ongoing_call());
}

#[tokio::test]
async fn test_socket_lost_again_during_recovery_is_redialed() {
    let mut config = test_config();
    config.reconnect_timeout = Duration::from_secs(2);
    let h = TestHarness::connected_with(config).await;
    let call_id = established_call(&h).await;
    let transport = h.transport.clone();

    h.server().drop_connection().await;
    eventually("second dial", || transport.dial_count() == 2).await;
    wait_for_requests(&h.server(), "login", 1).await;

    // The new socket goes away before the call is re-attached.
    h.server().drop_connection().await;
    eventually("third dial", || transport.dial_count() == 3).await;
    assert!(matches!(phase(&h, call_id), Some(CallPhase::Reconnecting(_))));

    h.register(2).await;
    let server = h.server();
    server.push(frames::attach(call_id, "v=0 reoffer")).await;
    wait_for_requests(&server, ATTACH, 1).await;
    wait_phase(&h, call_id, CallPhase::Active).await;

    let client = h.client.clone();
    eventually("recovery finished", || {
        !crate::connection::lock(&client.recovery).is_running()
    })
    .await;
    assert_eq!(
        h.events
            .count(|e| matches!(e, Event::ReconnectionTimeout | Event::Disconnected)),
        0
    );
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_calls_are_dropped_when_recovery_window_closes() {
    let mut config = test_config();
    config.reconnect_timeout = Duration::from_millis(150);
    let h = TestHarness::connected_with(config).await;
    let call_id = established_call(&h).await;

    h.transport.set_refuse(true);
    h.server().drop_connection().await;

    let ended = h
        .events
        .wait_for(|e| matches!(e, Event::CallEnded { call_id: id, .. } if *id == call_id))
        .await;
    match ended {
        Event::CallEnded {
            reason: Some(reason),
            ..
        } => assert_eq!(reason.cause.as_deref(), Some("NETWORK_LOST")),
        other => panic!("unexpected {other:?}"),
    }
    h.events
        .wait_for(|e| matches!(e, Event::ReconnectionTimeout))
        .await;
    h.events
        .wait_for(|e| matches!(e, Event::Disconnected))
        .await;
    assert!(h.client.active_calls().is_empty());
    assert!(!h.client.is_connected());
}

#[tokio::test]
async fn test_idle_disconnect_does_not_reconnect() {
    let h = TestHarness::connected().await;

    h.server().drop_connection().await;
    h.events
        .wait_for(|e| matches!(e, Event::Disconnected))
        .await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.dial_count(), 1);
    assert_eq!(
        h.events.count(|e| matches!(e, Event::Reconnecting)),
        0
    );
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let h = TestHarness::connected().await;
    let server = h.server();

    server.push(frames::ping(7)).await;
    eventually("pong", || {
        server.raw_sent().iter().any(|text| {
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            value["id"] == 7 && value["result"]["method"] == "telnyx_rtc.ping"
        })
    })
    .await;
    assert_eq!(h.client.metrics().total_pings, 1);
}

#[tokio::test]
async fn test_disconnect_hangs_up_and_forgets_the_session() {
    let h = TestHarness::connected().await;
    let call_id = established_call(&h).await;
    let server = h.server();

    h.client.disconnect().await;

    assert!(server.requests_for(BYE).iter().any(|r| r.call_id() == Some(call_id)));
    assert!(h.client.active_calls().is_empty());
    assert!(!h.client.is_connected());
    assert!(h.client.session_id().is_none());
    assert!(matches!(
        h.client.new_invite(InviteOptions::new("2000")).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_registration_timeout_is_reported_once() {
    let h = TestHarness::new();
    h.client
        .connect(Some(crate::test_utils::test_session()), None)
        .await
        .unwrap();
    let server = h.server();
    let logins = wait_for_requests(&server, "login", 1).await;
    server
        .push(frames::login_result(&logins[0].id, "sess-1"))
        .await;

    h.events
        .wait_for(|e| matches!(e, Event::RegistrationTimeout))
        .await;
    assert_eq!(server.requests_for("telnyx_rtc.gatewayState").len(), 3);

    server.push(frames::gateway("NOREG")).await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.events.count(|e| matches!(e, Event::RegistrationTimeout)),
        1
    );
    assert!(!h.client.is_logged_in());
}

#[tokio::test]
async fn test_end_current_call_prefers_the_established_call() {
    let h = TestHarness::connected().await;
    assert!(matches!(
        h.client.end_current_call(),
        Err(ClientError::Call(CallError::NoCurrentCall))
    ));

    let established = established_call(&h).await;
    let (dialing, _) = dial(&h).await;

    h.client.end_current_call().unwrap();
    assert!(h.client.call(established).is_none());
    assert_eq!(phase(&h, dialing), Some(CallPhase::Connecting));
    let byes = wait_for_requests(&h.server(), BYE, 1).await;
    assert_eq!(byes[0].call_id(), Some(established));
    assert_eq!(byes[0].params["causeCode"], 16);
}

#[tokio::test]
async fn test_disable_push_reports_the_server_outcome() {
    let h = TestHarness::connected().await;
    assert!(matches!(
        h.client.disable_push().await,
        Err(ClientError::NoSession)
    ));

    let h = TestHarness::new();
    let mut session = crate::test_utils::test_session();
    session.push = Some(crate::config::PushCredentials {
        device_token: "fcm-1".into(),
        provider: "android".into(),
    });
    h.client.connect(Some(session), None).await.unwrap();
    h.register(1).await;
    let server = h.server();

    let (outcome, _) = tokio::join!(h.client.disable_push(), async {
        let requests =
            wait_for_requests(&server, "telnyx_rtc.disable_push_notification", 1).await;
        assert_eq!(requests[0].params["user"], "alice");
        server.push(frames::result(&requests[0].id)).await;
    });
    assert!(outcome.unwrap());
    h.events
        .wait_for(|e| matches!(e, Event::DisablePushResult { success: true, .. }))
        .await;
}

#[tokio::test]
async fn test_slow_media_engine_does_not_hold_up_other_calls() {
    let h = TestHarness::connected().await;
    let existing = established_call(&h).await;
    let server = h.server();
    h.media.set_create_delay(Duration::from_millis(800));

    let incoming = CallId::new();
    let started = Instant::now();
    server.push(frames::invite(incoming, "v=0 remote offer")).await;
    server.push(frames::bye(incoming, "NORMAL_CLEARING", 16)).await;
    server.push(frames::bye(existing, "NORMAL_CLEARING", 16)).await;

    h.events
        .wait_for(|e| matches!(e, Event::CallEnded { call_id, .. } if *call_id == existing))
        .await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(phase(&h, incoming), Some(CallPhase::Ringing));

    // Frames of the new call waited for its peer and kept their order.
    h.events
        .wait_for(|e| matches!(e, Event::CallEnded { call_id, .. } if *call_id == incoming))
        .await;
    assert_eq!(
        h.events
            .count(|e| matches!(e, Event::IncomingCall(c) if c.call_id == incoming)),
        1
    );
    let engine = h.media.engine(incoming).unwrap();
    assert_eq!(engine.remote_descriptions()[0].sdp, "v=0 remote offer");
}
