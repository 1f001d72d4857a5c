use anyhow::Context;
use rodio::OutputStream;
use segue::audio::{self, NullPlayerNode, PlayerNode, RodioPlayerNode, SymphoniaPreparer};
use segue::chain::actions::ChainServices;
use segue::chain::context::{ContextRegistry, PlaybackParams};
use segue::config;
use segue::events::{EventBus, PlaybackEvent};
use segue::model::{PersistedState, PlaybackState, SchedulerSelection, UserInputMode};
use segue::orchestrator::PlaybackOrchestrator;
use segue::player::Player;
use segue::profiles::PlaybackProfiles;
use segue::queue::{PlayQueue, RepeatMode, ShuffleMode, TrackQueue};
use segue::scheduler::create_scheduler;
use segue::session::SessionRegistry;
use segue::transcoder::WavTranscoder;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PUMP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct CliArgs {
    polling: bool,
    null_output: bool,
    repeat: Option<RepeatMode>,
    shuffle: bool,
    gap: Option<f64>,
    delay: Option<f64>,
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    TogglePause,
    Next,
    Previous,
    SeekForward,
    SeekBackward,
    ToggleLoop,
    Stop,
    Quit,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args(std::env::args().skip(1).collect())?;
    if args.files.is_empty() {
        print_help();
        anyhow::bail!("no files given");
    }

    let saved = config::load_state().unwrap_or_else(|err| {
        warn!(%err, "could not load saved state; starting fresh");
        PersistedState::default()
    });
    let mut preferences = saved.preferences.clone();
    if args.polling {
        preferences.scheduler = SchedulerSelection::Polling;
    }
    if let Some(gap) = args.gap {
        preferences.gap_between_tracks = true;
        preferences.gap_between_tracks_seconds = gap;
    }

    let mut tracks = Vec::new();
    for file in &args.files {
        let path = config::normalize_path(file);
        match audio::probe_track(&path) {
            Ok(track) => tracks.push(Arc::new(track)),
            Err(err) => warn!(%err, "skipping file"),
        }
    }
    if tracks.is_empty() {
        anyhow::bail!("none of the given files could be read");
    }
    info!(count = tracks.len(), "queue loaded");

    let (events, receiver) = EventBus::channel();
    let sessions = SessionRegistry::new();
    let (_stream, node) = open_player_node(args.null_output);
    let scheduler = create_scheduler(
        preferences.scheduler,
        node,
        sessions.clone(),
        events.clone(),
    );

    let queue = Arc::new(TrackQueue::new(tracks));
    if let Some(mode) = args.repeat {
        queue.set_repeat_mode(mode);
    }
    if args.shuffle {
        queue.set_shuffle_mode(ShuffleMode::On);
    }

    let cache_dir = config::transcode_dir()?;
    let transcoder = WavTranscoder::new(
        cache_dir,
        preferences.transcode_extensions.clone(),
        events.clone(),
    );
    let services = ChainServices {
        player: Arc::new(Player::new(scheduler, sessions.clone())),
        queue,
        preparer: Arc::new(SymphoniaPreparer),
        transcoder: Arc::new(transcoder),
        profiles: PlaybackProfiles::from_saved(saved.profiles.clone()),
        preferences: Arc::new(Mutex::new(preferences)),
        contexts: ContextRegistry::new(),
        events,
    };
    let orchestrator = PlaybackOrchestrator::new(services, sessions, receiver);

    let commands = spawn_command_reader();
    let mut params = PlaybackParams::default();
    if let Some(delay) = args.delay {
        params = params.with_delay(delay);
    }
    orchestrator.play_track_at(0, params);

    'running: loop {
        for event in orchestrator.wait_and_pump(PUMP_INTERVAL) {
            log_event(&event);
        }
        loop {
            let command = match commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'running,
            };
            if command == Command::Quit {
                break 'running;
            }
            run_command(&orchestrator, command);
        }
        if orchestrator.state() == PlaybackState::NoTrack
            && orchestrator.queue().current().is_none()
        {
            info!("playback finished");
            break;
        }
    }

    orchestrator.on_app_exit();
    let state = PersistedState {
        preferences: saved.preferences,
        profiles: orchestrator.profiles().all(),
    };
    config::save_state(&state).context("failed to save state")?;
    Ok(())
}

fn open_player_node(null_output: bool) -> (Option<OutputStream>, Arc<dyn PlayerNode>) {
    if !null_output {
        match audio::open_default_output() {
            Ok(stream) => {
                let node = RodioPlayerNode::new(stream.mixer().clone());
                return (Some(stream), Arc::new(node));
            }
            Err(err) => warn!(%err, "audio output unavailable; playing silently"),
        }
    }
    (None, Arc::new(NullPlayerNode::new()))
}

fn run_command(orchestrator: &PlaybackOrchestrator, command: Command) {
    match command {
        Command::TogglePause => {
            let state = orchestrator.toggle_play_pause();
            info!(?state, "toggled");
        }
        Command::Next => {
            orchestrator.next_track();
        }
        Command::Previous => {
            orchestrator.previous_track();
        }
        Command::SeekForward => {
            orchestrator.seek_forward(UserInputMode::Discrete);
        }
        Command::SeekBackward => {
            orchestrator.seek_backward(UserInputMode::Discrete);
        }
        Command::ToggleLoop => {
            let playback_loop = orchestrator.toggle_loop();
            info!(?playback_loop, "loop toggled");
        }
        Command::Stop => {
            orchestrator.stop();
        }
        Command::Quit => {}
    }
    let position = orchestrator.position();
    info!(
        elapsed = format!("{:.1}", position.elapsed),
        duration = format!("{:.1}", position.duration),
        "position"
    );
}

fn parse_command(line: &str) -> Option<Command> {
    let command = match line.chars().next() {
        None | Some(' ') => Command::TogglePause,
        Some('n') => Command::Next,
        Some('p') => Command::Previous,
        Some('f') => Command::SeekForward,
        Some('b') => Command::SeekBackward,
        Some('l') => Command::ToggleLoop,
        Some('s') => Command::Stop,
        Some('q') => Command::Quit,
        Some(_) => return None,
    };
    Some(command)
}

fn spawn_command_reader() -> Receiver<Command> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(command) => {
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                None => warn!(input = %line, "unknown command"),
            }
        }
    });
    receiver
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::TrackChanged { new_track, .. } => match new_track {
            Some(track) => info!(track = %track.display(), "now playing"),
            None => info!("playback stopped"),
        },
        PlaybackEvent::TrackNotPlayed { error, .. } => warn!(%error, "track not played"),
        PlaybackEvent::GapStarted {
            new_track, delay, ..
        } => info!(next = %new_track.display(), delay, "gap"),
        other => tracing::debug!(event = ?other, "playback event"),
    }
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--polling" => out.polling = true,
            "--null-output" => out.null_output = true,
            "--shuffle" => out.shuffle = true,
            "--repeat" => {
                index += 1;
                out.repeat = match args.get(index).map(String::as_str) {
                    Some("one") => Some(RepeatMode::One),
                    Some("all") => Some(RepeatMode::All),
                    Some("off") => Some(RepeatMode::Off),
                    _ => anyhow::bail!("--repeat requires one, all or off"),
                };
            }
            "--gap" => {
                index += 1;
                out.gap = Some(parse_seconds("--gap", args.get(index))?);
            }
            "--delay" => {
                index += 1;
                out.delay = Some(parse_seconds("--delay", args.get(index))?);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => anyhow::bail!("unknown argument {flag}"),
            file => out.files.push(PathBuf::from(file)),
        }
        index += 1;
    }
    Ok(out)
}

fn parse_seconds(flag: &str, value: Option<&String>) -> anyhow::Result<f64> {
    let Some(value) = value else {
        anyhow::bail!("{flag} requires a number of seconds");
    };
    let seconds: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{flag} expects seconds, got {value}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("{flag} cannot be negative");
    }
    Ok(seconds)
}

fn print_help() {
    println!("segue [options] FILE...");
    println!("  --polling         Detect track ends by polling the playback position");
    println!("  --null-output     Play without an audio device");
    println!("  --repeat MODE     one, all or off");
    println!("  --shuffle         Shuffle the queue");
    println!("  --gap SECS        Silence between tracks");
    println!("  --delay SECS      Silence before the first track");
    println!();
    println!("Commands on stdin: <space>/<enter> pause, n next, p previous,");
    println!("  f/b seek, l loop, s stop, q quit");
}
