mod devices;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use video_player_core::{
    AppConfig, CachedFrameSource, CommandServer, Controller, Devices, DirectoryFrameSource,
    DisplaySink, PlaybackCoordinator, PlaybackSettings, SystemClock, VideoLibrary,
};

use crate::devices::{FramebufferDisplay, SilentAudio, TracingDisplay, TracingLeds};

fn main() -> video_player_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, port } => run_server(config, bind, port),
        Commands::Play {
            image_dir,
            fps,
            audio,
            timeline,
        } => run_local(&config, image_dir, fps, audio, timeline),
        Commands::Send { addr, command } => run_send(&addr, &command),
        Commands::List { root, json } => run_list(&config, root, json),
    }
}

fn load_config(path: Option<&Path>) -> video_player_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            AppConfig::from_file(path)
        }
        None => Ok(AppConfig::default()),
    }
}

/// Wires the hardware backends. The audio output is created here, once for
/// the whole process.
fn build_devices(config: &AppConfig) -> video_player_core::Result<Devices> {
    let (width, height) = (config.display.width, config.display.height);
    let display: Arc<dyn DisplaySink> = match &config.display.device {
        Some(device) => Arc::new(FramebufferDisplay::open(device, width, height)?),
        None => Arc::new(TracingDisplay),
    };

    Ok(Devices {
        frames: Arc::new(CachedFrameSource::new(DirectoryFrameSource::new(width, height))),
        display,
        leds: Arc::new(TracingLeds::new(config.leds.count)),
        audio: Arc::new(SilentAudio::init()),
        clock: Arc::new(SystemClock),
        audio_poll_interval: config.audio.poll_interval(),
    })
}

fn run_server(
    mut config: AppConfig,
    bind: Option<String>,
    port: Option<u16>,
) -> video_player_core::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let controller = Arc::new(Controller::new(&config, build_devices(&config)?));
    controller.reset_leds()?;

    let server = CommandServer::bind(config.server.address()?, controller)?;
    server.serve()
}

fn run_local(
    config: &AppConfig,
    image_dir: PathBuf,
    fps: Option<u32>,
    audio: Option<PathBuf>,
    timeline: Option<PathBuf>,
) -> video_player_core::Result<()> {
    let mut settings = PlaybackSettings::new(image_dir, fps.unwrap_or(config.playback.fps))?;
    settings.audio = audio;
    settings.timeline = timeline.or_else(|| config.playback.timeline.clone());
    tracing::info!(?settings, "playing locally");

    let coordinator = PlaybackCoordinator::new(settings, build_devices(config)?);
    coordinator.start()
}

fn run_send(addr: &str, command: &[String]) -> video_player_core::Result<()> {
    let line = command.join(" ");
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(line.as_bytes())?;
    tracing::debug!(%addr, %line, "sent command");

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    print!("{reply}");
    Ok(())
}

fn run_list(config: &AppConfig, root: Option<PathBuf>, json: bool) -> video_player_core::Result<()> {
    let library = VideoLibrary::new(root.unwrap_or_else(|| config.library.root.clone()));
    let videos = library.scan()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&videos)?);
        return Ok(());
    }
    for video in &videos {
        println!(
            "{:<24} {:>4} fps  audio: {:<3}  lights: {}",
            video.name,
            video.fps,
            if video.audio.is_some() { "yes" } else { "no" },
            if video.timeline.is_some() { "yes" } else { "no" },
        );
    }
    tracing::info!(count = videos.len(), root = %library.root().display(), "video library scanned");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Image-sequence video player with LED timeline", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control server.
    Serve {
        /// Address to listen on, overrides the configuration.
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on, overrides the configuration.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Play a frame directory without the server, until interrupted.
    Play {
        /// Directory holding `image-NNNN.jpg` frames.
        image_dir: PathBuf,
        #[arg(short, long)]
        fps: Option<u32>,
        /// Soundtrack to play alongside.
        #[arg(short, long)]
        audio: Option<PathBuf>,
        /// Light timeline (`color,time,led` rows).
        #[arg(short, long)]
        timeline: Option<PathBuf>,
    },
    /// Send one command to a running server and print the reply.
    Send {
        #[arg(short, long, default_value = "127.0.0.1:9999")]
        addr: String,
        /// Command and arguments, e.g. `PLAY_VIDEO image_dir=/videos/x fps=24`.
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// List the converted videos of the library.
    List {
        /// Library root, overrides the configuration.
        #[arg(short, long)]
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}
