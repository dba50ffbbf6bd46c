//! Lento Player - slowed, sped-up and reverbed playback in the terminal
//!
//! Loads one file or URL, plays it through the stretch graph on the default
//! output device and reads transport commands from stdin.
//!
//! ## Command line
//!
//! ```text
//! lento-player <path-or-url> [--config FILE] [--rate R] [--semitones S]
//!              [--reverb A] [--volume V] [--lock-pitch] [--repeat] [--resume] [--native]
//! lento-player --list-devices
//! ```
//!
//! `--native` skips the stretch graph and plays through the varispeed track
//! (pitch follows speed, no reverb).
//!
//! ## Commands (one per line)
//!
//! `p` play/pause, `s <secs>` seek, `r <rate>` speed, `t <semitones>` pitch,
//! `w <0-1>` reverb, `v <0-1>` volume, `l` toggle pitch lock, `b`/`f` send to
//! background/foreground, `q` quit

use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use lento_core::audio::{get_output_devices, AudioConfig, CpalBackend, OfflineBackend, RenderBackend};
use lento_core::config::{default_config_path, load_config, EngineConfig};
use lento_core::media::{SnapshotStore, VarispeedTrack, YamlSnapshotStore};
use lento_core::player::{PlaybackEvent, Player};
use lento_core::EngineState;

const CONFIG_FILE: &str = "player.yaml";
const SESSION_FILE: &str = "session.yaml";

/// Extra wait on top of the decoder bound before giving up on a load
const LOAD_GRACE: Duration = Duration::from_secs(1);

/// Persistent player configuration (`~/.config/lento/player.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PlayerConfig {
    engine: EngineConfig,
    audio: AudioConfig,
}

#[derive(Debug, Default)]
struct Args {
    source: Option<String>,
    config: Option<PathBuf>,
    rate: Option<f64>,
    semitones: Option<f64>,
    reverb: Option<f32>,
    volume: Option<f32>,
    pitch_lock: bool,
    repeat: bool,
    resume: bool,
    native: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(parse_value(&arg, iter.next())?),
            "--rate" => args.rate = Some(parse_value(&arg, iter.next())?),
            "--semitones" => args.semitones = Some(parse_value(&arg, iter.next())?),
            "--reverb" => args.reverb = Some(parse_value(&arg, iter.next())?),
            "--volume" => args.volume = Some(parse_value(&arg, iter.next())?),
            "--lock-pitch" => args.pitch_lock = true,
            "--repeat" => args.repeat = true,
            "--resume" => args.resume = true,
            "--native" => args.native = true,
            "--list-devices" => args.list_devices = true,
            flag if flag.starts_with("--") => bail!("unknown flag {}", flag),
            _ if args.source.is_none() => args.source = Some(arg),
            _ => bail!("unexpected argument {}", arg),
        }
    }
    Ok(args)
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.with_context(|| format!("{} needs a value", flag))?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {}: {}", flag, value))
}

/// A line typed on stdin
#[derive(Debug, PartialEq)]
enum Command {
    Toggle,
    Seek(f64),
    Rate(f64),
    Semitones(f64),
    Reverb(f32),
    Volume(f32),
    TogglePitchLock,
    Background,
    Foreground,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let value = parts.next();
    match (cmd, value) {
        ("p", None) => Some(Command::Toggle),
        ("s", Some(v)) => v.parse().ok().map(Command::Seek),
        ("r", Some(v)) => v.parse().ok().map(Command::Rate),
        ("t", Some(v)) => v.parse().ok().map(Command::Semitones),
        ("w", Some(v)) => v.parse().ok().map(Command::Reverb),
        ("v", Some(v)) => v.parse().ok().map(Command::Volume),
        ("l", None) => Some(Command::TogglePitchLock),
        ("b", None) => Some(Command::Background),
        ("f", None) => Some(Command::Foreground),
        ("q", None) => Some(Command::Quit),
        _ => None,
    }
}

/// Forward stdin lines to the control loop; the channel closes on EOF
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .expect("Failed to spawn stdin reader thread");
    rx
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;

    if args.list_devices {
        for device in get_output_devices().context("Failed to enumerate output devices")? {
            println!("{}", device);
        }
        return Ok(());
    }

    let Some(source) = args.source.clone() else {
        bail!("usage: lento-player <path-or-url> [--config FILE] [--rate R] [--semitones S] [--reverb A] [--volume V] [--lock-pitch] [--repeat] [--resume] [--native]");
    };

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(CONFIG_FILE));
    let config: PlayerConfig = load_config(&config_path);
    let session = YamlSnapshotStore::new(default_config_path(SESSION_FILE));

    log::info!("lento-player starting up");

    let device = CpalBackend::new(config.audio.clone());
    let stretch_backend: Box<dyn RenderBackend> = if args.native {
        log::info!("Stretch graph disabled via --native");
        Box::new(OfflineBackend::failing(lento_core::SAMPLE_RATE))
    } else {
        Box::new(device.clone())
    };

    let visual = VarispeedTrack::new(Box::new(device));
    let mut player = Player::with_defaults(visual, stretch_backend, config.engine.clone());
    let events = player.subscribe();

    player.load(&source);
    let state = player.wait_until_loaded(config.engine.decoder.load_timeout() + LOAD_GRACE);
    if state != EngineState::Ready {
        bail!("could not load {}", source);
    }
    if let Some(buffer) = player.source_buffer() {
        player
            .visual_mut()
            .attach(buffer)
            .context("Failed to open the output device")?;
    }

    if args.resume {
        if let Some(snapshot) = session.load() {
            player.restore(&snapshot);
        }
    }
    apply_args(&mut player, &args);

    println!(
        "{} ({:.1}s) - p play/pause, s <secs> seek, r <rate>, t <semitones>, w <reverb>, v <volume>, l pitch lock, b/f background/foreground, q quit",
        source,
        player.duration()
    );
    player.play();
    if player.is_native_fallback() {
        println!("Playing through the native fallback (pitch follows speed, no reverb)");
    }

    run(&mut player, &spawn_stdin_reader(), &events);

    if let Err(e) = session.save(&player.snapshot()) {
        log::warn!("Failed to save session: {:#}", e);
    }
    player.cleanup();
    log::info!("lento-player shut down");
    Ok(())
}

fn apply_args(player: &mut Player<VarispeedTrack>, args: &Args) {
    if let Some(rate) = args.rate {
        player.set_rate(rate);
    }
    if let Some(semitones) = args.semitones {
        player.set_semitones(semitones);
    }
    if args.pitch_lock {
        player.set_pitch_locked(true);
    }
    if let Some(reverb) = args.reverb {
        player.set_reverb_amount(reverb);
    }
    if let Some(volume) = args.volume {
        player.set_volume(volume);
    }
    if args.repeat {
        player.set_repeat(true);
    }
}

/// Control loop: sync ticks plus stdin commands until quit
///
/// Without an interactive stdin, runs until playback stops.
fn run(player: &mut Player<VarispeedTrack>, commands: &Receiver<String>, events: &Receiver<PlaybackEvent>) {
    let interval = player.config().sync.poll_interval();
    let mut next_tick = Instant::now() + interval;
    let mut interactive = true;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        if interactive {
            match commands.recv_timeout(wait) {
                Ok(line) => match parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => handle_command(player, command),
                    None => println!("?"),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => interactive = false,
            }
        } else {
            std::thread::sleep(wait);
        }

        if Instant::now() >= next_tick {
            player.tick();
            next_tick += interval;
        }

        for event in events.try_iter() {
            match event {
                PlaybackEvent::TrackEnded => println!("[end]"),
                PlaybackEvent::LoadFailed(reason) => println!("[load failed] {}", reason),
                PlaybackEvent::ModeSelected(mode) => log::info!("Playback path: {:?}", mode),
                _ => {}
            }
        }

        if !interactive && !player.is_playing() {
            break;
        }
    }
}

fn handle_command(player: &mut Player<VarispeedTrack>, command: Command) {
    match command {
        Command::Toggle => player.toggle_playback(),
        Command::Seek(seconds) => player.seek(seconds),
        Command::Rate(rate) => player.set_rate(rate),
        Command::Semitones(semitones) => player.set_semitones(semitones),
        Command::Reverb(amount) => player.set_reverb_amount(amount),
        Command::Volume(volume) => player.set_volume(volume),
        Command::TogglePitchLock => {
            let locked = !player.is_pitch_locked();
            player.set_pitch_locked(locked);
        }
        Command::Background => player.on_visibility_change(false),
        Command::Foreground => player.on_visibility_change(true),
        Command::Quit => {}
    }

    let transport = player.transport();
    let params = player.params();
    println!(
        "{} {:.1}/{:.1}s  rate {:.2}  pitch {:+.2}  reverb {:.2}  volume {:.2}{}",
        if transport.is_playing { ">" } else { "||" },
        transport.current_time,
        transport.duration,
        params.rate,
        params.semitones,
        params.reverb_amount,
        params.volume,
        if player.is_pitch_locked() { "  [locked]" } else { "" },
    );
}
