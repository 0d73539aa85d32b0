mod common;

use common::*;
use std::time::Duration;
use voicebot_protocol::Packet;
use voicebot_sdk::voice::MemoryTranscoder;
use voicebot_sdk::{
    CommandError, EnqueueError, LeaveReason, Placement, ResolutionError, SessionEvent,
    SessionState,
};

const LIMIT: Duration = Duration::from_secs(60);

fn count_tag(endpoint: &MockEndpoint, tag: i16) -> usize {
    endpoint.tags().iter().filter(|t| **t == Some(tag)).count()
}

fn titles(tracks: &[voicebot_sdk::Track]) -> Vec<String> {
    tracks.iter().map(|t| t.title.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn skip_starts_next_track_and_discards_buffered_frames() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 500))
        .with_pcm("b", tone(2, 500))
        .with_pcm("c", tone(3, 500));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    for locator in ["a", "b", "c"] {
        session.enqueue(locator, 10).await.unwrap();
    }
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 20).await;

    let report = session.skip().await.unwrap();
    let sent_at_skip = endpoint.media().len();
    assert_eq!(report.skipped.title, "a");
    assert!(report.dropped.is_empty());
    assert_eq!(report.now_playing.map(|t| t.title), Some("b".to_string()));

    let status = session.status();
    assert_eq!(status.state, SessionState::Playing);
    assert_eq!(status.current_track.map(|t| t.title), Some("b".to_string()));
    assert_eq!(titles(&status.queue), vec!["c"]);

    wait_for(LIMIT, || count_tag(&endpoint, 2) >= 20).await;
    let after: Vec<Option<i16>> = endpoint.tags().split_off(sent_at_skip);
    assert!(!after.contains(&Some(1)), "frames of the skipped track were sent");
    // the lookahead is full, so b's first frame is only a tick or two away
    let first_b = after.iter().position(|t| *t == Some(2)).unwrap();
    assert!(first_b <= 2, "b started {first_b} frames after the skip");

    let events = drain_events(&session);
    assert!(events.contains(&SessionEvent::TrackSkipped(report.skipped)));
}

#[tokio::test(start_paused = true)]
async fn sequence_stays_contiguous_across_track_boundaries() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 15))
        .with_failure("broken", "invalid data found when processing input")
        .with_pcm("b", tone(2, 300))
        .with_pcm("c", tone(3, 25));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    for locator in ["a", "broken", "b", "c"] {
        session.enqueue(locator, 10).await.unwrap();
    }
    wait_for(LIMIT, || count_tag(&endpoint, 2) >= 10).await;
    session.skip().await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 3) == 25).await;
    wait_for_state(&session, SessionState::Ready).await;

    let media = endpoint.media();
    assert_contiguous(&media);
    let (first, last) = (media[0].0, media[media.len() - 1].0);
    let elapsed = u32::try_from(media.len() - 1).unwrap() * 960;
    assert_eq!(last.timestamp.wrapping_sub(first.timestamp), elapsed);
    assert_eq!(count_tag(&endpoint, 1), 15);

    let endings: Vec<String> = drain_events(&session)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::TrackFinished(t) => Some(format!("finished {}", t.title)),
            SessionEvent::TrackFailed { track, .. } => Some(format!("failed {}", track.title)),
            SessionEvent::TrackSkipped(t) => Some(format!("skipped {}", t.title)),
            _ => None,
        })
        .collect();
    assert_eq!(
        endings,
        vec!["finished a", "failed broken", "skipped b", "finished c"]
    );
    assert_eq!(session.status().frames_sent, media.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn pause_is_idempotent_and_silences_the_stream() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new().with_pcm("a", tone(1, 2_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 5).await;

    session.pause().await.unwrap();
    session.pause().await.unwrap();
    let status = session.status();
    assert_eq!(status.state, SessionState::Paused);
    assert_eq!(status.current_track.map(|t| t.title), Some("a".to_string()));

    let sent = endpoint.media().len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(endpoint.media().len(), sent);

    session.resume().await.unwrap();
    session.resume().await.unwrap();
    wait_for(LIMIT, || endpoint.media().len() >= sent + 10).await;
    assert_eq!(session.state(), SessionState::Playing);
    assert_contiguous(&endpoint.media());

    let speaking: Vec<bool> = endpoint
        .packets()
        .into_iter()
        .filter_map(|p| match p {
            Packet::Speaking { speaking, .. } => Some(speaking),
            _ => None,
        })
        .collect();
    assert_eq!(speaking, vec![true, false, true]);
}

#[tokio::test(start_paused = true)]
async fn commands_that_cannot_apply_are_typed_no_ops() {
    let endpoint = MockEndpoint::new();
    let manager = manager(&endpoint, MemoryTranscoder::new(), test_config());
    let session = manager.join(1);
    wait_for_state(&session, SessionState::Ready).await;

    assert_eq!(session.skip().await, Err(CommandError::NothingPlaying));
    assert_eq!(
        session.pause().await,
        Err(CommandError::InvalidState(SessionState::Ready))
    );
    assert_eq!(session.remove(3).await, Err(CommandError::NoSuchPosition(3)));
    assert_eq!(session.set_volume(9.0).await, Ok(1.5));
    assert_eq!(session.state(), SessionState::Ready);

    let too_long = session.enqueue("long:concert", 10).await;
    assert!(matches!(
        too_long,
        Err(EnqueueError::Resolution(ResolutionError::TooLong { .. }))
    ));
    assert!(session.status().queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn enqueue_now_interrupts_and_requeues_current() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 1_000))
        .with_pcm("b", tone(2, 1_000))
        .with_pcm("urgent", tone(9, 1_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    session.enqueue("b", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 5).await;

    session
        .enqueue_with("urgent", 11, Placement::Now)
        .await
        .unwrap();
    let status = session.status();
    assert_eq!(status.current_track.map(|t| t.title), Some("urgent".to_string()));
    assert_eq!(titles(&status.queue), vec!["a", "b"]);
    wait_for(LIMIT, || count_tag(&endpoint, 9) >= 5).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_resumes_without_resetting_the_timeline() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new().with_pcm("a", tone(1, 3_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 20).await;
    let before = endpoint.media().len();

    endpoint.drop_connections();
    wait_for(Duration::from_millis(20), || session.state() == SessionState::Connecting).await;
    assert_eq!(session.status().queue.len(), 1, "interrupted track is queued again");

    wait_for_state(&session, SessionState::Playing).await;
    wait_for(LIMIT, || endpoint.media().len() >= before + 20).await;
    assert_contiguous(&endpoint.media());

    assert!(endpoint
        .packets()
        .iter()
        .any(|p| matches!(p, Packet::Resume { session_id, .. } if session_id == "session-1")));
    let events = drain_events(&session);
    assert!(events.contains(&SessionEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_secs(1),
    }));
    assert!(events.contains(&SessionEvent::Connected { resumed: true }));
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_ends_the_session_when_retries_run_out() {
    let endpoint = MockEndpoint::silent();
    let mut config = test_config();
    config.session.handshake_timeout_ms = 200;
    config.session.reconnect_attempts = 1;
    config.session.reconnect_backoff_ms = 100;
    let manager = manager(&endpoint, MemoryTranscoder::new(), config);
    let session = manager.join(1);

    wait_for(LIMIT, || session.is_closed()).await;
    assert_eq!(session.state(), SessionState::Disconnected);

    let events = drain_events(&session);
    assert!(events.contains(&SessionEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_millis(100),
    }));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Left(LeaveReason::ConnectionFailed(reason))) if reason.contains("timed out")
    ));
    assert_eq!(
        session.enqueue("a", 10).await,
        Err(EnqueueError::Command(CommandError::SessionClosed))
    );
    assert!(endpoint.media().is_empty());
}

#[tokio::test(start_paused = true)]
async fn idle_session_leaves_after_timeout() {
    let endpoint = MockEndpoint::new();
    let mut config = test_config();
    config.queue.idle_timeout_secs = 5;
    let manager = manager(&endpoint, MemoryTranscoder::new(), config);
    let session = manager.join(1);
    wait_for_state(&session, SessionState::Ready).await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!session.is_closed());
    wait_for(Duration::from_secs(3), || session.is_closed()).await;

    assert_eq!(
        drain_events(&session).last(),
        Some(&SessionEvent::Left(LeaveReason::Idle))
    );
    assert!(endpoint
        .packets()
        .contains(&Packet::Leave { channel_id: 1 }));
    assert!(manager.get(1).is_none());
}

#[tokio::test(start_paused = true)]
async fn keepalives_flow_only_while_not_playing() {
    let endpoint = MockEndpoint::new();
    let manager = manager(&endpoint, MemoryTranscoder::new(), test_config());
    let session = manager.join(1);
    wait_for_state(&session, SessionState::Ready).await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(endpoint.keepalives(), 2);
    assert!(endpoint.media().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_heartbeats_count_as_connection_loss() {
    let endpoint = MockEndpoint::deaf_to_heartbeats();
    let manager = manager(&endpoint, MemoryTranscoder::new(), test_config());
    let session = manager.join(1);
    wait_for_state(&session, SessionState::Ready).await;

    // heartbeats go out at 5, 10 and 15 s; the fourth interval gives up
    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(session.state(), SessionState::Ready);
    assert!(!drain_events(&session)
        .iter()
        .any(|e| matches!(e, SessionEvent::Reconnecting { .. })));

    wait_for(Duration::from_secs(2), || session.state() == SessionState::Connecting).await;
    assert_eq!(
        count_packets(&endpoint, |p| matches!(p, Packet::Heartbeat { .. })),
        3
    );
    assert!(drain_events(&session).contains(&SessionEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_secs(1),
    }));

    wait_for_state(&session, SessionState::Ready).await;
    assert!(drain_events(&session).contains(&SessionEvent::Connected { resumed: true }));
}

#[tokio::test(start_paused = true)]
async fn rejected_resume_falls_back_to_a_fresh_session() {
    let endpoint = MockEndpoint::rejecting_resume();
    let transcoder = MemoryTranscoder::new().with_pcm("a", tone(1, 3_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 20).await;

    endpoint.drop_connections();
    wait_for(LIMIT, || {
        endpoint
            .media()
            .iter()
            .filter(|(h, _)| h.ssrc == SSRC + 1)
            .count()
            >= 20
    })
    .await;

    assert!(endpoint
        .packets()
        .iter()
        .any(|p| matches!(p, Packet::Resume { session_id, .. } if session_id == "session-1")));
    assert_eq!(
        count_packets(&endpoint, |p| matches!(p, Packet::Identify { .. })),
        2
    );

    let connected: Vec<bool> = drain_events(&session)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Connected { resumed } => Some(resumed),
            _ => None,
        })
        .collect();
    assert_eq!(connected, vec![false, false]);

    // each generation starts its own timeline and never repeats a number
    let media = endpoint.media();
    let first = media_of(&media, SSRC);
    let second = media_of(&media, SSRC + 1);
    assert_eq!(first.len() + second.len(), media.len());
    assert_eq!(first[0].0.sequence, 0);
    assert_eq!(second[0].0.sequence, 0);
    assert_eq!(second[0].0.timestamp, 0);
    assert_contiguous(&first);
    assert_contiguous(&second);
}

#[tokio::test(start_paused = true)]
async fn repeat_replays_the_track_on_natural_end() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new().with_pcm("a", tone(1, 15));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.set_repeat(true).await.unwrap();
    session.enqueue("a", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 20).await;
    assert!(session.status().repeat);

    session.set_repeat(false).await.unwrap();
    wait_for_state(&session, SessionState::Ready).await;

    assert_eq!(count_tag(&endpoint, 1), 30);
    assert_contiguous(&endpoint.media());
    let events = drain_events(&session);
    let started = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::TrackStarted(t) if t.title == "a"))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::TrackFinished(t) if t.title == "a"))
        .count();
    assert_eq!((started, finished), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn skip_many_drops_the_queued_tracks_in_between() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 500))
        .with_pcm("b", tone(2, 500))
        .with_pcm("c", tone(3, 500))
        .with_pcm("d", tone(4, 500));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    for locator in ["a", "b", "c", "d"] {
        session.enqueue(locator, 10).await.unwrap();
    }
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 5).await;

    let report = session.skip_many(3).await.unwrap();
    assert_eq!(report.skipped.title, "a");
    assert_eq!(titles(&report.dropped), vec!["b", "c"]);
    assert_eq!(report.now_playing.map(|t| t.title), Some("d".to_string()));
    assert!(session.status().queue.is_empty());

    wait_for(LIMIT, || count_tag(&endpoint, 4) >= 5).await;
    assert_eq!(count_tag(&endpoint, 2), 0);
    assert_eq!(count_tag(&endpoint, 3), 0);
    assert_contiguous(&endpoint.media());
}

#[tokio::test(start_paused = true)]
async fn stop_clears_everything_and_goes_quiet() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 1_000))
        .with_pcm("b", tone(2, 1_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    session.enqueue("b", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 5).await;

    session.stop().await.unwrap();
    let status = session.status();
    assert_eq!(status.state, SessionState::Ready);
    assert!(status.current_track.is_none());
    assert!(status.queue.is_empty());

    let sent = endpoint.media().len();
    let frames_sent = status.frames_sent;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(endpoint.media().len(), sent);
    assert_eq!(session.status().frames_sent, frames_sent);
    assert_eq!(count_tag(&endpoint, 2), 0);

    let events = drain_events(&session);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::TrackSkipped(t) if t.title == "a")));
}

#[tokio::test(start_paused = true)]
async fn queue_positions_can_be_moved_and_removed() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new()
        .with_pcm("a", tone(1, 1_000))
        .with_pcm("b", tone(2, 100))
        .with_pcm("c", tone(3, 100))
        .with_pcm("d", tone(4, 100));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    for locator in ["a", "b", "c", "d"] {
        session.enqueue(locator, 10).await.unwrap();
    }
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 1).await;
    assert_eq!(titles(&session.status().queue), vec!["b", "c", "d"]);

    session.move_track(2, 0).await.unwrap();
    assert_eq!(titles(&session.status().queue), vec!["d", "b", "c"]);

    let removed = session.remove(1).await.unwrap();
    assert_eq!(removed.title, "b");
    assert_eq!(titles(&session.status().queue), vec!["d", "c"]);

    let report = session.skip().await.unwrap();
    assert_eq!(report.now_playing.map(|t| t.title), Some("d".to_string()));
}

#[tokio::test(start_paused = true)]
async fn toggle_pause_flips_between_playing_and_paused() {
    let endpoint = MockEndpoint::new();
    let transcoder = MemoryTranscoder::new().with_pcm("a", tone(1, 1_000));
    let manager = manager(&endpoint, transcoder, test_config());
    let session = manager.join(1);

    session.enqueue("a", 10).await.unwrap();
    wait_for(LIMIT, || count_tag(&endpoint, 1) >= 5).await;

    assert_eq!(session.toggle_pause().await, Ok(SessionState::Paused));
    assert_eq!(session.toggle_pause().await, Ok(SessionState::Playing));

    session.stop().await.unwrap();
    assert_eq!(
        session.toggle_pause().await,
        Err(CommandError::InvalidState(SessionState::Ready))
    );
}
