mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use riptide_core::errors::ControlError;
use riptide_core::types::{ChannelId, StreamKey};
use support::{new_control, Call, MockBackend};

const CHANNEL: ChannelId = ChannelId(7);

#[tokio::test]
async fn start_stream_registers_and_rejects_overlap() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    let stream = control.start_stream(CHANNEL).await.unwrap();
    assert_eq!(stream.channel_id(), CHANNEL);
    assert_eq!(stream.stream_id().map(|id| id.0), Some(8));
    assert!(backend.has_call(&Call::ServiceStartStream(7)));
    assert!(backend.has_call(&Call::OrchestratorStartStream(7, 8)));

    let err = control.start_stream(CHANNEL).await.unwrap_err();
    assert!(matches!(err, ControlError::AlreadyExists(CHANNEL)));
}

#[tokio::test]
async fn restart_after_stop_succeeds() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    control.start_stream(CHANNEL).await.unwrap();
    control.stop_stream(CHANNEL).await.unwrap();
    assert!(backend.has_call(&Call::ServiceEndStream(8)));
    assert!(backend.has_call(&Call::OrchestratorStopStream(7, 8)));

    control.start_stream(CHANNEL).await.unwrap();
}

#[tokio::test]
async fn stop_stream_is_idempotent() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    control.start_stream(CHANNEL).await.unwrap();
    control.stop_stream(CHANNEL).await.unwrap();
    // Second stop: the channel is already gone, still not an error.
    control.stop_stream(CHANNEL).await.unwrap();
    assert_eq!(
        backend.count_calls(|call| matches!(call, Call::ServiceEndStream(_))),
        1
    );
}

#[tokio::test]
async fn stop_stream_fires_cancellation_and_stopped_flag() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    let stream = control.start_stream(CHANNEL).await.unwrap();
    let token = stream.cancel_token();
    control.stop_stream(CHANNEL).await.unwrap();

    assert!(stream.stopped());
    assert!(token.is_cancelled());
    assert!(matches!(
        control.get_tracks(CHANNEL),
        Err(ControlError::NotFound(CHANNEL))
    ));
}

#[tokio::test]
async fn service_refusal_rolls_the_stream_back() {
    let backend = MockBackend::new();
    backend.fail_service_start.store(true, Ordering::SeqCst);
    let control = new_control(&backend);

    let err = control.start_stream(CHANNEL).await.unwrap_err();
    assert!(matches!(err, ControlError::Service(_)));
    // Nothing was announced to the orchestrator and the registry is clean.
    assert!(!backend.has_call(&Call::OrchestratorStartStream(7, 8)));
    assert!(control.get_stream(CHANNEL).is_none());
    backend.fail_service_start.store(false, Ordering::SeqCst);
    control.start_stream(CHANNEL).await.unwrap();
}

#[tokio::test]
async fn orchestrator_refusal_unwinds_the_service_side() {
    let backend = MockBackend::new();
    backend.fail_orchestrator_start.store(true, Ordering::SeqCst);
    let control = new_control(&backend);

    let err = control.start_stream(CHANNEL).await.unwrap_err();
    assert!(matches!(err, ControlError::Orchestrator(_)));
    assert!(backend.has_call(&Call::ServiceEndStream(8)));
    assert!(control.get_stream(CHANNEL).is_none());
}

#[tokio::test]
async fn stop_stream_attempts_everything_and_reports_the_service_error_first() {
    let backend = MockBackend::new();
    backend.fail_service_end.store(true, Ordering::SeqCst);
    backend.fail_orchestrator_stop.store(true, Ordering::SeqCst);
    let control = new_control(&backend);

    control.start_stream(CHANNEL).await.unwrap();
    let err = control.stop_stream(CHANNEL).await.unwrap_err();

    // Both collaborators were told despite both failing, the registry entry
    // is gone, and the service error wins the priority order.
    assert!(matches!(err, ControlError::Service(_)));
    assert!(backend.has_call(&Call::ServiceEndStream(8)));
    assert!(backend.has_call(&Call::OrchestratorStopStream(7, 8)));
    assert!(control.get_stream(CHANNEL).is_none());
}

#[tokio::test]
async fn authenticate_compares_against_the_service_key() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    control
        .authenticate(CHANNEL, &StreamKey::from("abcd"))
        .await
        .unwrap();
    let err = control
        .authenticate(CHANNEL, &StreamKey::from("wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Unauthenticated));
}

#[tokio::test]
async fn shutdown_stops_every_stream() {
    let backend = MockBackend::new();
    let control = new_control(&backend);

    control.start_stream(ChannelId(1)).await.unwrap();
    control.start_stream(ChannelId(2)).await.unwrap();
    control.shutdown().await;

    assert!(control.is_shutting_down());
    assert!(control.get_stream(ChannelId(1)).is_none());
    assert!(control.get_stream(ChannelId(2)).is_none());
    assert!(backend.has_call(&Call::ServiceEndStream(2)));
    assert!(backend.has_call(&Call::ServiceEndStream(3)));
}

#[tokio::test(start_paused = true)]
async fn five_failed_heartbeats_stop_the_stream() {
    let backend = MockBackend::new();
    backend.fail_metadata.store(true, Ordering::SeqCst);
    let control = new_control(&backend);

    let stream = control.start_stream(CHANNEL).await.unwrap();

    for tick in 1..=5u32 {
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(
            backend.count_calls(|call| matches!(call, Call::ServiceUpdateMetadata(_))),
            tick as usize,
            "expected one metadata attempt per tick"
        );
        if tick < 5 {
            assert!(!stream.stopped(), "stream stopped before the 5th failure");
        }
    }

    assert!(stream.stopped());
    assert!(stream.cancel_token().is_cancelled());
    assert!(backend.has_call(&Call::ServiceEndStream(8)));
    assert!(control.get_stream(CHANNEL).is_none());

    // The channel is free again after the fail-out.
    backend.fail_metadata.store(false, Ordering::SeqCst);
    control.start_stream(CHANNEL).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn clean_ticks_recover_the_failure_count() {
    let backend = MockBackend::new();
    backend.fail_metadata.store(true, Ordering::SeqCst);
    let control = new_control(&backend);

    let stream = control.start_stream(CHANNEL).await.unwrap();

    // Four failures, then recovery before the fifth.
    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
    }
    assert!(!stream.stopped());
    backend.fail_metadata.store(false, Ordering::SeqCst);

    for _ in 0..8 {
        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
    }
    assert!(!stream.stopped(), "recovered stream must keep running");

    control.stop_stream(CHANNEL).await.unwrap();
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
