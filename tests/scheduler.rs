mod common;

use common::{RecordingNode, prepared_track};
use segue::audio::PlayerNode;
use segue::events::{EventBus, Message, PlaybackEvent};
use segue::scheduler::{CallbackScheduler, Scheduler};
use segue::session::SessionRegistry;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

struct Fixture {
    scheduler: CallbackScheduler,
    sessions: SessionRegistry,
    node: Arc<RecordingNode>,
    receiver: Receiver<Message>,
}

fn fixture() -> Fixture {
    let (events, receiver) = EventBus::channel();
    let sessions = SessionRegistry::new();
    let node = Arc::new(RecordingNode::default());
    let scheduler = CallbackScheduler::new(node.clone(), sessions.clone(), events);
    Fixture {
        scheduler,
        sessions,
        node,
        receiver,
    }
}

fn events(receiver: &Receiver<Message>) -> Vec<PlaybackEvent> {
    receiver
        .try_iter()
        .filter_map(|message| match message {
            Message::Event(event) => Some(event),
            Message::Signal(_) => None,
        })
        .collect()
}

#[test]
fn loop_segment_is_computed_once_per_session() {
    let fixture = fixture();
    fixture.sessions.start(prepared_track("a.wav", 60.0));
    let session = fixture.sessions.define_loop(25.0, 37.0).expect("loop");

    fixture.scheduler.restart_loop(&session).expect("first restart");
    fixture.scheduler.restart_loop(&session).expect("second restart");

    let scheduled = fixture.node.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(scheduled[0].id, scheduled[1].id);
    assert_eq!(scheduled[0].first_frame, 25_000);
    assert_eq!(scheduled[0].last_frame, 37_000);
    assert!(scheduled.iter().all(|segment| segment.immediate));
}

#[test]
fn changed_loop_gets_a_new_segment() {
    let fixture = fixture();
    fixture.sessions.start(prepared_track("a.wav", 60.0));
    let first = fixture.sessions.define_loop(25.0, 37.0).expect("loop");
    fixture.scheduler.restart_loop(&first).expect("restart");

    let second = fixture.sessions.define_loop(10.0, 20.0).expect("loop");
    fixture.scheduler.restart_loop(&second).expect("restart");

    let scheduled = fixture.node.scheduled();
    assert_ne!(scheduled[0].id, scheduled[1].id);
    assert_eq!(scheduled[1].first_frame, 10_000);
}

#[test]
fn finished_loop_restarts_with_the_cached_segment() {
    let fixture = fixture();
    fixture.sessions.start(prepared_track("a.wav", 60.0));
    let session = fixture.sessions.define_loop(25.0, 37.0).expect("loop");
    fixture.scheduler.play_loop(&session, true).expect("play");

    assert!(fixture.node.complete_segment());
    assert!(fixture.node.complete_segment());

    let scheduled = fixture.node.scheduled();
    assert_eq!(scheduled.len(), 3);
    assert!(scheduled.iter().all(|segment| segment.id == scheduled[0].id));
    let restarts = events(&fixture.receiver)
        .into_iter()
        .filter(|event| matches!(event, PlaybackEvent::LoopRestarted { .. }))
        .count();
    assert_eq!(restarts, 3);
    assert!(fixture.node.is_playing());
}

#[test]
fn track_completion_is_published_for_the_current_session_only() {
    let fixture = fixture();
    let stale = fixture.sessions.start(prepared_track("a.wav", 5.0));
    fixture.scheduler.play_track(&stale, 0.0).expect("play");
    let current = fixture.sessions.start(prepared_track("b.wav", 5.0));
    assert!(fixture.node.complete_segment());
    assert!(events(&fixture.receiver).is_empty());

    fixture.scheduler.play_track(&current, 0.0).expect("play");
    assert!(fixture.node.complete_segment());
    let completed: Vec<_> = events(&fixture.receiver)
        .into_iter()
        .filter_map(|event| match event {
            PlaybackEvent::TrackCompleted(session) => Some(session.id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, [current.id]);
}

#[test]
fn ending_a_loop_continues_from_the_next_frame() {
    let fixture = fixture();
    fixture.sessions.start(prepared_track("a.wav", 60.0));
    let looped = fixture.sessions.define_loop(25.0, 37.0).expect("loop");
    fixture.scheduler.play_loop(&looped, true).expect("play");

    let unlooped = fixture.sessions.remove_loop().expect("session");
    fixture
        .scheduler
        .end_loop(&unlooped, 37.0, true)
        .expect("continue");

    let scheduled = fixture.node.scheduled();
    let continuation = scheduled.last().expect("segment");
    assert_eq!(continuation.first_frame, 37_001);
    assert_eq!(continuation.last_frame, 59_999);
    assert!(!continuation.immediate);
}

#[test]
fn completion_while_paused_waits_for_resume() {
    let fixture = fixture();
    let session = fixture.sessions.start(prepared_track("a.wav", 5.0));
    fixture.scheduler.play_track(&session, 0.0).expect("play");
    fixture.scheduler.pause();
    assert!(fixture.node.complete_segment());
    assert!(events(&fixture.receiver).is_empty());

    fixture.scheduler.resume();
    assert!(matches!(
        events(&fixture.receiver).as_slice(),
        [PlaybackEvent::TrackCompleted(completed)] if completed.id == session.id
    ));
}
