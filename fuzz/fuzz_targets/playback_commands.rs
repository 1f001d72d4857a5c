#![no_main]

use libfuzzer_sys::fuzz_target;
use segue::model::Track;
use segue::queue::{PlayQueue, RepeatMode, ShuffleMode, TrackQueue};
use segue::session::SessionRegistry;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let len = (data.len() % 32).max(1);
    let tracks: Vec<_> = (0..len)
        .map(|idx| Arc::new(Track::new(format!("track_{idx}.mp3"), "t", 60.0)))
        .collect();
    let queue = TrackQueue::new(tracks);
    let sessions = SessionRegistry::new();
    queue.start();

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = f64::from(pair.get(1).copied().unwrap_or(0));
        match op % 12 {
            0 => queue.set_repeat_mode(RepeatMode::Off),
            1 => queue.set_repeat_mode(RepeatMode::All),
            2 => queue.set_repeat_mode(RepeatMode::One),
            3 => queue.set_shuffle_mode(if arg as u8 % 2 == 0 {
                ShuffleMode::On
            } else {
                ShuffleMode::Off
            }),
            4 => {
                if let Some(track) = queue.subsequent() {
                    sessions.start(track);
                }
            }
            5 => {
                queue.next();
            }
            6 => {
                queue.previous();
            }
            7 => {
                sessions.begin_loop(arg);
            }
            8 => {
                sessions.end_loop(arg);
            }
            9 => {
                sessions.define_loop(arg, arg + f64::from(op));
            }
            10 => {
                sessions.remove_loop();
            }
            _ => {
                sessions.end_current();
            }
        }

        if let Some(index) = queue.current_index() {
            assert!(index < len);
        }
        if let Some(playback_loop) = sessions.current_loop()
            && let Some(end) = playback_loop.end_time
        {
            assert!(end >= playback_loop.start_time);
        }
        if !sessions.has_current_session() {
            assert!(!sessions.has_loop());
        }
    }
});
