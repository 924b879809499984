// Lyrebird - headless front end for the music library core
// Every command builds the services once and drives them like a UI would

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lyrebird::{
    audio::{format_duration, ScanCancel, ScanProgress},
    config::Config,
    events::CoreEvent,
    playback::{PlaybackEngine, RepeatMode, SilentEngine, TransportState},
    Services,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "lyrebird")]
#[command(about = "Local music library: scan, playlists, favorites and playback with listening affinity")]
#[command(version)]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long, global = true)]
    dev: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rescan the music directory
    Scan,

    /// List every track in the library
    Tracks,

    /// List playlists
    Playlists,

    /// Create a playlist, optionally seeded with track ids
    PlaylistCreate {
        name: String,
        track_ids: Vec<String>,

        /// Image file to use as the playlist cover
        #[arg(long)]
        cover: Option<PathBuf>,
    },

    /// Append tracks to a playlist
    PlaylistAdd {
        playlist_id: String,
        #[arg(required = true)]
        track_ids: Vec<String>,
    },

    /// Render a playlist cover (custom image or artwork mosaic) to a PNG
    Cover {
        playlist_id: String,
        output: PathBuf,
    },

    /// Toggle a track's favorite flag
    Favorite { track_id: String },

    /// List favorite tracks
    Favorites,

    /// Tracks ranked by listening affinity
    Top {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Delete a track's file and remove it from playlists and favorites
    Delete { track_id: String },

    /// Play the library or a playlist
    Play {
        /// Play this playlist instead of the whole library
        #[arg(long)]
        playlist: Option<String>,

        /// Start from this track id
        #[arg(long)]
        track: Option<String>,

        #[arg(long)]
        shuffle: bool,

        #[arg(long, value_enum, default_value = "none")]
        repeat: RepeatArg,

        /// Pause playback after this many minutes
        #[arg(long)]
        sleep_minutes: Option<u64>,

        /// Stop after this many seconds regardless of the queue
        #[arg(long)]
        max_seconds: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RepeatArg {
    None,
    Queue,
    Track,
}

impl From<RepeatArg> for RepeatMode {
    fn from(arg: RepeatArg) -> Self {
        match arg {
            RepeatArg::None => RepeatMode::None,
            RepeatArg::Queue => RepeatMode::Queue,
            RepeatArg::Track => RepeatMode::Track,
        }
    }
}

fn init_logging(log_dir: &Path, dev: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "lyrebird.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lyrebird=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {}", e))?;

    if dev {
        eprintln!("🔧 Dev mode: debug output to stderr + {}", log_dir.display());
    }

    Ok(guard)
}

fn build_engine() -> Box<dyn PlaybackEngine> {
    #[cfg(feature = "audio")]
    {
        match lyrebird::playback::RodioEngine::new(1.0) {
            Ok(engine) => return Box::new(engine),
            Err(e) => tracing::warn!("Falling back to silent playback: {}", e),
        }
    }

    Box::new(SilentEngine::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Guard must live until exit so buffered log lines get flushed
    let _log_guard = init_logging(&config.log_directory(), args.dev)?;
    info!("🎵 Lyrebird starting up");

    let services = Services::start(config, build_engine(), tokio::runtime::Handle::current())
        .context("failed to open library state")?;

    if !matches!(args.command, Command::Scan) {
        services.library.ensure_music_directory()?;
        services.library.scan().context("failed to scan music directory")?;
    }

    match args.command {
        Command::Scan => scan(&services).await?,
        Command::Tracks => list_tracks(&services),
        Command::Playlists => list_playlists(&services),
        Command::PlaylistCreate {
            name,
            track_ids,
            cover,
        } => {
            let cover = cover
                .map(|path| std::fs::read(&path).with_context(|| format!("reading {}", path.display())))
                .transpose()?;
            let playlist = services.playlists.create(&name, track_ids, cover.as_deref())?;
            println!("✅ Created playlist '{}' ({})", playlist.name, playlist.id);
        }
        Command::PlaylistAdd {
            playlist_id,
            track_ids,
        } => {
            services.playlists.add_track_ids(&track_ids, &playlist_id)?;
            println!("✅ Added {} tracks", track_ids.len());
        }
        Command::Cover { playlist_id, output } => {
            let playlist = services
                .playlists
                .playlist(&playlist_id)
                .ok_or_else(|| anyhow!("no playlist with id {}", playlist_id))?;
            let cover = services
                .playlists
                .cover_for_playlist(&playlist, &services.library, services.config.covers.size);
            cover
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("🖼  Wrote cover for '{}' to {}", playlist.name, output.display());
        }
        Command::Favorite { track_id } => {
            let track = services.library.track(&track_id)?;
            let now_favorite = services.favorites.toggle(&track_id)?;
            let verb = if now_favorite { "Added" } else { "Removed" };
            println!("{} '{}' {} favorites", verb, track.title, if now_favorite { "to" } else { "from" });
        }
        Command::Favorites => {
            for track in services.favorites.favorite_tracks(&services.library) {
                println!("♥ {}  {} - {}", track.id, track.artist, track.title);
            }
        }
        Command::Top { limit } => list_top(&services, limit),
        Command::Delete { track_id } => {
            services.delete_track(&track_id)?;
            println!("🗑  Deleted {}", track_id);
        }
        Command::Play {
            playlist,
            track,
            shuffle,
            repeat,
            sleep_minutes,
            max_seconds,
        } => {
            let options = PlayOptions {
                playlist,
                track,
                shuffle,
                repeat: repeat.into(),
                sleep: sleep_minutes
                    .map(|m| {
                        m.checked_mul(60)
                            .map(Duration::from_secs)
                            .ok_or_else(|| anyhow!("--sleep-minutes {} is too large", m))
                    })
                    .transpose()?,
                max_run: max_seconds.map(Duration::from_secs),
            };
            play(&services, options).await?;
        }
    }

    Ok(())
}

async fn scan(services: &Services) -> Result<()> {
    services.library.ensure_music_directory()?;
    println!("📁 Scanning {}", services.library.music_directory().display());

    let (progress_tx, mut progress_rx) = mpsc::channel(128);
    let cancel = ScanCancel::new();

    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            match progress {
                ScanProgress::TrackFound { progress, .. } if progress % 50 == 0 => {
                    println!("   📀 Found {} tracks so far...", progress);
                }
                ScanProgress::Skipped { path, error } => {
                    eprintln!("   ⚠️  Skipped {}: {}", path.display(), error);
                }
                ScanProgress::Completed { total_tracks } => {
                    println!("🎵 Scan complete: {} tracks", total_tracks);
                }
                ScanProgress::Cancelled { tracks_found } => {
                    println!("Scan cancelled after {} tracks", tracks_found);
                }
                _ => {}
            }
        }
    });

    let completed = services.library.scan_incremental(progress_tx, cancel).await?;
    let _ = printer.await;

    if completed && services.library.snapshot().is_empty() {
        println!("{}", services.library.files_drop_hint());
    }
    Ok(())
}

fn list_tracks(services: &Services) {
    let tracks = services.library.tracks();
    if tracks.is_empty() {
        println!("{}", services.library.files_drop_hint());
        return;
    }

    let ids: Vec<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
    let stats = services.analytics.analytics_for(&ids);

    for track in &tracks {
        let counts = stats.get(&track.id).copied().unwrap_or_default();
        let favorite = if services.favorites.is_favorite(&track.id) { "♥" } else { " " };
        println!(
            "{} {}  {:>7}  {} - {}  ({} plays, {} skips)",
            favorite,
            track.id,
            format_duration(track.duration_secs()),
            track.artist,
            track.title,
            counts.play_count,
            counts.skip_count
        );
    }
}

fn list_playlists(services: &Services) {
    for playlist in services.playlists.playlists() {
        let resolved = services
            .playlists
            .tracks_for_playlist(&playlist, &services.library);
        let total: f64 = resolved.iter().map(|t| t.duration_secs()).sum();
        println!(
            "{}  {}  {} tracks  {}",
            playlist.id,
            playlist.name,
            resolved.len(),
            format_duration(total)
        );
    }
}

fn list_top(services: &Services, limit: usize) {
    let ranked = services.analytics.sort_by_affinity(&services.library.tracks());
    for (rank, track) in ranked.iter().take(limit).enumerate() {
        println!(
            "{:>3}. {:.3}  {} - {}",
            rank + 1,
            services.analytics.score(&track.id),
            track.artist,
            track.title
        );
    }
}

struct PlayOptions {
    playlist: Option<String>,
    track: Option<String>,
    shuffle: bool,
    repeat: RepeatMode,
    sleep: Option<Duration>,
    max_run: Option<Duration>,
}

async fn play(services: &Services, options: PlayOptions) -> Result<()> {
    let context = match &options.playlist {
        Some(id) => {
            let playlist = services
                .playlists
                .playlist(id)
                .ok_or_else(|| anyhow!("no playlist with id {}", id))?;
            services
                .playlists
                .tracks_for_playlist(&playlist, &services.library)
        }
        None => services.library.tracks(),
    };
    if context.is_empty() {
        println!("Nothing to play. {}", services.library.files_drop_hint());
        return Ok(());
    }

    let playback = Arc::clone(&services.playback);
    let mut events = services.subscribe();

    playback.set_shuffle_enabled(options.shuffle);
    while playback.repeat_mode() != options.repeat {
        playback.cycle_repeat_mode();
    }

    match &options.track {
        Some(id) => playback.play_track_in_context(services.library.track(id)?, context)?,
        None => playback.play_tracks(context, 0)?,
    }

    if let Some(sleep) = options.sleep {
        services.sleep_timer.start(sleep)?;
        if let Some(fire_date) = services.sleep_timer.fire_date() {
            println!("😴 Sleep timer set for {}", fire_date.with_timezone(&chrono::Local).format("%H:%M"));
        }
    }

    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(
        services.config.playback.progress_interval_ms.max(50),
    ));
    let mut last_track: Option<String> = None;

    loop {
        interval.tick().await;
        playback.tick();

        while let Ok(event) = events.try_recv() {
            match event {
                CoreEvent::PlaybackStateChanged => {
                    if let Some(track) = playback.current_track() {
                        if last_track.as_deref() != Some(track.id.as_str()) {
                            println!("▶ {} - {}  [{}]", track.artist, track.title, format_duration(track.duration_secs()));
                            if let Some(next) = playback.predicted_next_track_for_skip() {
                                debug!("Up next: {}", next.title);
                            }
                            last_track = Some(track.id.clone());
                        }
                    }
                }
                CoreEvent::SleepTimerChanged { active: false } => {
                    println!("😴 Sleep timer expired");
                }
                _ => {}
            }
        }

        match playback.transport() {
            TransportState::Stopped => {
                println!("⏹  Queue finished");
                break;
            }
            TransportState::Paused if !services.sleep_timer.is_active() => {
                println!("⏸  Paused");
                break;
            }
            _ => {}
        }

        if options.max_run.is_some_and(|max| started.elapsed() >= max) {
            let snapshot = playback.snapshot();
            println!(
                "Stopping at {} / {}",
                format_duration(snapshot.current_time),
                format_duration(snapshot.duration)
            );
            playback.clear();
            break;
        }
    }

    if services.sleep_timer.cancel() {
        debug!("Cancelled pending sleep timer on exit");
    }
    Ok(())
}
