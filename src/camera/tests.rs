use super::*;
use crate::error::SessionError;
use crate::events::{FaceSource, SessionEvent};
use crate::lens::LensFacing;
use crate::permission::PermissionState;
use crate::test_support::{eventually, test_frame, test_session_config, Harness};

/// No two Bound notifications without an Unbound between them
fn assert_unbound_between_binds(states: &[SessionState]) {
    let mut bound = false;
    for state in states {
        match state {
            SessionState::Bound => {
                assert!(!bound, "two Bound states without an Unbound: {:?}", states);
                bound = true;
            }
            SessionState::Unbound => bound = false,
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_start_binds_all_outputs_in_order() {
    let mut harness = Harness::new();

    harness.session.start().await.unwrap();

    assert_eq!(harness.session.state(), SessionState::Bound);
    assert_eq!(
        harness.drain_states(),
        vec![SessionState::Binding, SessionState::Bound]
    );
    assert_eq!(
        harness.backend.attach_log(),
        vec![
            (LensFacing::Back, OutputKind::Preview),
            (LensFacing::Back, OutputKind::Analysis),
            (LensFacing::Back, OutputKind::StillCapture),
        ]
    );
    assert_eq!(harness.backend.live_devices(), 1);
}

#[tokio::test]
async fn test_start_denied_allocates_nothing() {
    let harness = Harness::new();
    harness.permissions.set(PermissionState::Denied);

    let result = harness.session.start().await;

    assert_eq!(result, Err(SessionError::PermissionDenied));
    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert!(harness.backend.opened_lenses().is_empty());
}

#[tokio::test]
async fn test_start_when_bound_is_noop() {
    let mut harness = Harness::new().bound().await;

    harness.session.start().await.unwrap();

    assert!(harness.drain_states().is_empty());
    assert_eq!(harness.backend.opened_lenses().len(), 1);
}

#[tokio::test]
async fn test_attach_failure_unwinds_and_ends_unbound() {
    let mut harness = Harness::new();
    harness.backend.fail_attach(OutputKind::StillCapture);

    let result = harness.session.start().await;

    assert!(matches!(result, Err(SessionError::BindFailed { .. })));
    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert_eq!(
        harness.drain_states(),
        vec![
            SessionState::Binding,
            SessionState::Error,
            SessionState::Unbound
        ]
    );
    // Partial attachments are torn down in reverse order
    assert_eq!(
        harness.backend.detach_log(),
        vec![
            (LensFacing::Back, OutputKind::Analysis),
            (LensFacing::Back, OutputKind::Preview),
        ]
    );
    assert_eq!(harness.backend.live_devices(), 0);
}

#[tokio::test]
async fn test_open_failure_reports_bind_failed() {
    let harness = Harness::new();
    harness.backend.fail_open(LensFacing::Back);

    let result = harness.session.start().await;

    assert!(matches!(result, Err(SessionError::BindFailed { .. })));
    assert_eq!(harness.session.state(), SessionState::Unbound);
}

#[tokio::test]
async fn test_bind_timeout_is_bind_failed() {
    let harness = Harness::new();
    harness.backend.hold_binds();

    let result = harness.session.start().await;

    assert!(matches!(result, Err(SessionError::BindFailed { .. })));
    assert_eq!(harness.session.state(), SessionState::Unbound);
}

#[tokio::test]
async fn test_attach_timeout_unwinds_partial_binding() {
    let mut harness = Harness::new();
    harness.backend.hold_attach(OutputKind::StillCapture);

    let result = harness.session.start().await;

    assert!(matches!(result, Err(SessionError::BindFailed { .. })));
    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert_eq!(
        harness.drain_states(),
        vec![
            SessionState::Binding,
            SessionState::Error,
            SessionState::Unbound
        ]
    );
    assert_eq!(
        harness.backend.detach_log(),
        vec![
            (LensFacing::Back, OutputKind::Analysis),
            (LensFacing::Back, OutputKind::Preview),
        ]
    );
    assert_eq!(harness.backend.closed_devices(), 1);
    assert_eq!(harness.backend.live_devices(), 0);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut harness = Harness::new().bound().await;

    harness.session.stop().await.unwrap();
    harness.session.stop().await.unwrap();

    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert_eq!(
        harness.drain_states(),
        vec![SessionState::Unbinding, SessionState::Unbound]
    );
    assert_eq!(harness.backend.live_devices(), 0);
}

#[tokio::test]
async fn test_stop_when_never_started() {
    let mut harness = Harness::new();

    harness.session.stop().await.unwrap();

    assert!(harness.drain_states().is_empty());
}

#[tokio::test]
async fn test_flip_rebinds_to_other_lens() {
    let mut harness = Harness::new().bound().await;

    let lens = harness.session.flip_lens().await.unwrap();
    assert_eq!(lens, LensFacing::Front);
    assert_eq!(harness.session.lens(), LensFacing::Front);

    harness.wait_for_bound(LensFacing::Front).await;

    let states = harness.drain_states();
    assert_eq!(
        states,
        vec![
            SessionState::Unbinding,
            SessionState::Unbound,
            SessionState::Binding,
            SessionState::Bound
        ]
    );
    assert_eq!(
        harness.backend.opened_lenses(),
        vec![LensFacing::Back, LensFacing::Front]
    );
    // The old camera is closed before the new one is opened
    assert_eq!(harness.backend.max_live_devices(), 1);
    assert_eq!(harness.session.snapshot().active_lens, LensFacing::Front);
}

#[tokio::test]
async fn test_flip_while_unbound_only_changes_selection() {
    let mut harness = Harness::new();

    assert_eq!(harness.session.flip_lens().await.unwrap(), LensFacing::Front);
    assert!(harness.drain_states().is_empty());

    harness.session.start().await.unwrap();
    assert_eq!(harness.backend.opened_lenses(), vec![LensFacing::Front]);
}

#[tokio::test]
async fn test_rebind_waits_for_new_binding() {
    let mut harness = Harness::new().bound().await;

    let lens = harness.session.rebind(LensFacing::Front).await.unwrap();

    assert_eq!(lens, LensFacing::Front);
    assert_eq!(harness.session.state(), SessionState::Bound);
    assert_unbound_between_binds(&harness.drain_states());
}

#[tokio::test]
async fn test_rebind_requires_session() {
    let harness = Harness::new();

    let result = harness.session.rebind(LensFacing::Front).await;

    assert_eq!(
        result,
        Err(SessionError::SessionNotReady {
            state: SessionState::Unbound
        })
    );
}

#[tokio::test]
async fn test_failed_rebind_ends_unbound() {
    let harness = Harness::new().bound().await;
    harness.backend.fail_open(LensFacing::Front);

    let result = harness.session.rebind(LensFacing::Front).await;

    assert!(matches!(result, Err(SessionError::BindFailed { .. })));
    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert_eq!(harness.backend.live_devices(), 0);
}

#[tokio::test]
async fn test_stop_during_binding_cancels_start() {
    let mut harness = Harness::with_config(SessionConfig {
        bind_timeout: std::time::Duration::from_secs(5),
        ..test_session_config()
    });
    harness.backend.hold_binds();

    let starter = harness.session.clone();
    let start = tokio::spawn(async move { starter.start().await });
    harness.wait_for_state(SessionState::Binding).await;

    let stopper = harness.session.clone();
    let stop = tokio::spawn(async move { stopper.stop().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;
    harness.backend.release_bind();

    assert_eq!(start.await.unwrap(), Err(SessionError::Cancelled));
    stop.await.unwrap().unwrap();

    assert_eq!(harness.session.state(), SessionState::Unbound);
    let states = harness.drain_states();
    assert_eq!(states.last(), Some(&SessionState::Unbound));
    assert!(states.contains(&SessionState::Unbinding));
    eventually(|| harness.backend.live_devices() == 0).await;
}

#[tokio::test]
async fn test_start_after_stop_during_binding_rebinds() {
    let mut harness = Harness::with_config(SessionConfig {
        bind_timeout: std::time::Duration::from_secs(5),
        ..test_session_config()
    });
    harness.backend.hold_binds();

    let starter = harness.session.clone();
    let first_start = tokio::spawn(async move { starter.start().await });
    harness.wait_for_state(SessionState::Binding).await;

    let stopper = harness.session.clone();
    let stop = tokio::spawn(async move { stopper.stop().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;

    let restarter = harness.session.clone();
    let second_start = tokio::spawn(async move { restarter.start().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;

    // One for the bind in progress, one for the bind the later start asks for
    harness.backend.release_bind();
    harness.backend.release_bind();

    assert_eq!(first_start.await.unwrap(), Err(SessionError::Cancelled));
    stop.await.unwrap().unwrap();
    second_start.await.unwrap().unwrap();

    assert_eq!(harness.session.state(), SessionState::Bound);
    assert_eq!(harness.backend.opened_lenses().len(), 2);
    assert_eq!(harness.backend.max_live_devices(), 1);

    let states = harness.drain_states();
    assert_eq!(states.last(), Some(&SessionState::Bound));
    let last_unbound = states
        .iter()
        .rposition(|state| *state == SessionState::Unbound)
        .unwrap();
    assert_eq!(
        &states[last_unbound..],
        &[
            SessionState::Unbound,
            SessionState::Binding,
            SessionState::Bound
        ]
    );
    assert_unbound_between_binds(&states);
}

#[tokio::test]
async fn test_second_stop_cancels_queued_start() {
    let mut harness = Harness::with_config(SessionConfig {
        bind_timeout: std::time::Duration::from_secs(5),
        ..test_session_config()
    });
    harness.backend.hold_binds();

    let starter = harness.session.clone();
    let first_start = tokio::spawn(async move { starter.start().await });
    harness.wait_for_state(SessionState::Binding).await;

    let stopper = harness.session.clone();
    let stop = tokio::spawn(async move { stopper.stop().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;

    let restarter = harness.session.clone();
    let second_start = tokio::spawn(async move { restarter.start().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;

    let stopper = harness.session.clone();
    let second_stop = tokio::spawn(async move { stopper.stop().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    harness.sync().await;
    harness.backend.release_bind();

    assert_eq!(first_start.await.unwrap(), Err(SessionError::Cancelled));
    assert_eq!(second_start.await.unwrap(), Err(SessionError::Cancelled));
    stop.await.unwrap().unwrap();
    second_stop.await.unwrap().unwrap();

    assert_eq!(harness.session.state(), SessionState::Unbound);
    assert_eq!(harness.backend.opened_lenses().len(), 1);
    assert_eq!(harness.drain_states().last(), Some(&SessionState::Unbound));
}

#[tokio::test]
async fn test_repeated_flips_never_double_bind() {
    let mut harness = Harness::new().bound().await;

    for _ in 0..3 {
        let lens = harness.session.flip_lens().await.unwrap();
        harness.wait_for_bound(lens).await;
    }
    harness.session.stop().await.unwrap();

    assert_unbound_between_binds(&harness.drain_states());
    assert_eq!(harness.backend.max_live_devices(), 1);
}

#[tokio::test]
async fn test_live_frames_produce_face_results() {
    let mut harness = Harness::new().bound().await;

    assert!(harness.backend.push_frame(test_frame(11)));

    let frame_id = harness
        .next_event(|event| match event {
            SessionEvent::FaceResult {
                source: FaceSource::Frame { frame_id, .. },
                result: Ok(faces),
                ..
            } if faces.len() == 1 => Some(*frame_id),
            _ => None,
        })
        .await;
    assert_eq!(frame_id, 11);

    let stats = harness.session.pipeline_stats().await.unwrap();
    assert_eq!(stats.analyzed, 1);
    assert_eq!(harness.backend.outstanding_frames(), 0);
}

#[tokio::test]
async fn test_frames_dropped_while_analysis_pending() {
    let harness = Harness::new().bound().await;
    harness.stream_detector.hold();

    assert!(harness.backend.push_frame(test_frame(1)));
    eventually(|| harness.stream_detector.call_count() == 1).await;
    assert!(harness.backend.push_frame(test_frame(2)));

    let session = harness.session.clone();
    let mut dropped = 0;
    for _ in 0..100 {
        dropped = session.pipeline_stats().await.unwrap().dropped;
        if dropped == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(dropped, 1);
    // Only the frame under analysis still holds budget
    assert_eq!(harness.backend.outstanding_frames(), 1);

    harness.stream_detector.release();
    eventually(|| harness.backend.outstanding_frames() == 0).await;
    assert_eq!(harness.stream_detector.seen_frames(), vec![1]);
}

#[tokio::test]
async fn test_disabled_live_analysis_releases_frames() {
    let harness = Harness::with_config(SessionConfig {
        live_analysis: false,
        ..test_session_config()
    })
    .bound()
    .await;

    assert!(harness.backend.push_frame(test_frame(1)));
    eventually(|| harness.backend.outstanding_frames() == 0).await;

    let stats = harness.session.pipeline_stats().await.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(harness.stream_detector.call_count(), 0);
}

#[tokio::test]
async fn test_stop_detaches_analysis_stream() {
    let harness = Harness::new().bound().await;

    harness.session.stop().await.unwrap();

    assert!(!harness.backend.push_frame(test_frame(1)));
}

#[tokio::test]
async fn test_dropping_all_handles_releases_camera() {
    let harness = Harness::new().bound().await;
    let backend = harness.backend.clone();

    drop(harness);

    eventually(|| backend.live_devices() == 0).await;
}

#[tokio::test]
async fn test_builder_requires_backend() {
    let result = CameraSessionBuilder::new().spawn();

    match result {
        Err(crate::error::FacecamError::System { message }) => {
            assert!(message.contains("backend"));
        }
        Err(other) => panic!("Unexpected error: {}", other),
        Ok(_) => panic!("builder accepted a missing backend"),
    }
}
