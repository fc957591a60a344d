//! Control channel: accepts connections, decodes request lines and hands each
//! command to its own handler thread.
//!
//! Connections are served one at a time. Within a connection every recognised
//! command is acknowledged with `<COMMAND> OK` as soon as its handler has been
//! spawned, so a long-running `PLAY_VIDEO` never blocks a following
//! `STOP_VIDEO`. Handler failures only reach the log.

use std::collections::HashMap;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::protocol::{self, Reply, Request};
use crate::{
    AppConfig, AudioChannel, Devices, PlaybackConfig, PlaybackCoordinator, PlaybackSettings,
    PlayerError, Result, VideoLibrary,
};

/// Bytes read from the socket per request chunk.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Interval used while waiting for an audio channel to wind down.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct VideoSession {
    id: u64,
    coordinator: Arc<PlaybackCoordinator>,
}

struct AudioSession {
    id: u64,
    channel: Arc<AudioChannel>,
}

/// Command handlers and the resources they share.
///
/// At most one video session and one audio session exist at a time. Starting
/// a new one stops the previous session and waits for its teardown while the
/// slot stays locked, so two sessions never overlap.
///
/// Task ids follow arrival order. A stop cancels every play dispatched before
/// it, including one whose thread has not reached its slot yet.
pub struct Controller {
    devices: Devices,
    defaults: PlaybackConfig,
    library: VideoLibrary,
    video: Mutex<Option<VideoSession>>,
    audio: Mutex<Option<AudioSession>>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_task: AtomicU64,
    video_stopped_at: AtomicU64,
    audio_stopped_at: AtomicU64,
}

impl Controller {
    pub fn new(config: &AppConfig, devices: Devices) -> Self {
        Self {
            devices,
            defaults: config.playback.clone(),
            library: VideoLibrary::new(config.library.root.clone()),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            tasks: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            video_stopped_at: AtomicU64::new(0),
            audio_stopped_at: AtomicU64::new(0),
        }
    }

    /// Puts the LED strip in its idle color.
    pub fn reset_leds(&self) -> Result<()> {
        self.devices.leds.fill(self.defaults.color)
    }

    /// Runs `request` on a new detached thread and returns its task id.
    pub fn dispatch(self: &Arc<Self>, request: Request) -> Result<u64> {
        let id = self.next_task.fetch_add(1, Ordering::SeqCst);
        let kind = request.kind();
        let controller = Arc::clone(self);

        let handle = thread::Builder::new()
            .name(format!("command-{id}"))
            .spawn(move || {
                if let Err(err) = controller.handle(id, request) {
                    error!(%err, command = kind.name(), task = id, "command failed");
                }
            })?;

        let mut tasks = self.lock_tasks();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(id, handle);
        Ok(id)
    }

    /// Number of command threads that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.lock_tasks()
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Handles one request on the calling thread.
    pub fn handle(&self, id: u64, request: Request) -> Result<()> {
        match request {
            Request::PlayVideo {
                image_dir,
                video,
                fps,
                audio,
                timeline,
            } => {
                let settings = self.resolve_video(image_dir, video, fps, audio, timeline)?;
                self.play_video(id, settings)
            }
            Request::StopVideo => {
                self.video_stopped_at.fetch_max(id, Ordering::SeqCst);
                self.stop_video();
                Ok(())
            }
            Request::PlayAudio { audio } => {
                let path = audio.unwrap_or_else(|| self.defaults.audio.clone());
                self.play_audio(id, path)
            }
            Request::StopAudio => {
                self.audio_stopped_at.fetch_max(id, Ordering::SeqCst);
                self.stop_audio();
                Ok(())
            }
            Request::SetLed { color } => {
                let color = color.unwrap_or(self.defaults.color);
                info!(%color, "setting LEDs");
                self.devices.leds.fill(color)
            }
        }
    }

    fn resolve_video(
        &self,
        image_dir: Option<PathBuf>,
        video: Option<String>,
        fps: Option<u32>,
        audio: Option<PathBuf>,
        timeline: Option<PathBuf>,
    ) -> Result<PlaybackSettings> {
        let entry = video.map(|name| self.library.find(&name)).transpose()?;

        let image_dir = image_dir
            .or_else(|| entry.as_ref().map(|video| video.image_dir.clone()))
            .unwrap_or_else(|| self.defaults.image_dir.clone());
        let fps = fps
            .or_else(|| entry.as_ref().map(|video| video.fps))
            .unwrap_or(self.defaults.fps);

        let mut settings = PlaybackSettings::new(image_dir, fps)?;
        settings.audio = audio.or_else(|| entry.as_ref().and_then(|video| video.audio.clone()));
        settings.timeline = timeline
            .or_else(|| entry.as_ref().and_then(|video| video.timeline.clone()))
            .or_else(|| self.defaults.timeline.clone());
        Ok(settings)
    }

    fn play_video(&self, id: u64, settings: PlaybackSettings) -> Result<()> {
        let coordinator = Arc::new(PlaybackCoordinator::new(settings, self.devices.clone()));
        {
            let mut slot = self.lock_video();
            if let Some(previous) = slot.take() {
                info!(session = previous.id, "video player already playing, stopping first");
                previous.coordinator.stop();
                previous.coordinator.wait_idle();
            }
            if self.video_stopped_at.load(Ordering::SeqCst) > id {
                info!(session = id, "video stopped before it started");
                return Ok(());
            }
            if !coordinator.try_begin() {
                return Err(PlayerError::msg("fresh playback coordinator was not idle"));
            }
            *slot = Some(VideoSession {
                id,
                coordinator: coordinator.clone(),
            });
        }

        let outcome = coordinator.run();
        if outcome.is_err() {
            let mut slot = self.lock_video();
            if slot.as_ref().is_some_and(|session| session.id == id) {
                *slot = None;
            }
        }
        outcome
    }

    fn stop_video(&self) {
        let mut slot = self.lock_video();
        match slot.take() {
            Some(session) => {
                session.coordinator.stop();
                session.coordinator.wait_idle();
                info!(session = session.id, "video session closed");
            }
            None => warn!("no video player active"),
        }
    }

    fn play_audio(&self, id: u64, path: PathBuf) -> Result<()> {
        let channel = Arc::new(AudioChannel::new(
            self.devices.audio.clone(),
            Some(path),
            self.devices.clock.clone(),
            self.devices.audio_poll_interval,
        ));
        {
            let mut slot = self.lock_audio();
            if let Some(previous) = slot.take() {
                info!(session = previous.id, "audio player already playing, stopping first");
                Self::wait_audio_stopped(&previous.channel);
            }
            if self.audio_stopped_at.load(Ordering::SeqCst) > id {
                info!(session = id, "audio stopped before it started");
                return Ok(());
            }
            *slot = Some(AudioSession {
                id,
                channel: channel.clone(),
            });
        }

        let outcome = channel.start();
        let mut slot = self.lock_audio();
        if slot.as_ref().is_some_and(|session| session.id == id) {
            *slot = None;
        }
        outcome
    }

    fn stop_audio(&self) {
        let mut slot = self.lock_audio();
        match slot.take() {
            Some(session) => {
                Self::wait_audio_stopped(&session.channel);
                info!(session = session.id, "audio session closed");
            }
            None => warn!("no audio player active"),
        }
    }

    fn wait_audio_stopped(channel: &AudioChannel) {
        channel.stop();
        while channel.is_playing() {
            thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// The active video session, if any.
    pub fn video(&self) -> Option<Arc<PlaybackCoordinator>> {
        self.lock_video()
            .as_ref()
            .map(|session| session.coordinator.clone())
    }

    /// The active standalone audio session, if any.
    pub fn audio(&self) -> Option<Arc<AudioChannel>> {
        self.lock_audio()
            .as_ref()
            .map(|session| session.channel.clone())
    }

    /// Stops every session and joins all command threads.
    pub fn shutdown(&self) {
        if self.lock_video().is_some() {
            self.stop_video();
        }
        if self.lock_audio().is_some() {
            self.stop_audio();
        }

        let tasks: Vec<_> = self.lock_tasks().drain().collect();
        for (id, task) in tasks {
            if task.join().is_err() {
                warn!(task = id, "command thread panicked");
            }
        }
        info!("controller shut down");
    }

    fn lock_video(&self) -> MutexGuard<'_, Option<VideoSession>> {
        self.video.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_audio(&self) -> MutexGuard<'_, Option<AudioSession>> {
        self.audio.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("library", &self.library)
            .field("video", &self.video().is_some())
            .field("audio", &self.audio().is_some())
            .finish()
    }
}

/// TCP front end of a [`Controller`].
#[derive(Debug)]
pub struct CommandServer {
    listener: TcpListener,
    controller: Arc<Controller>,
}

impl CommandServer {
    pub fn bind(addr: impl ToSocketAddrs, controller: Arc<Controller>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            controller,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Accepts and serves connections one after another, forever.
    pub fn serve(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "video server started");
        loop {
            debug!("waiting for new client");
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(%peer, "new connection");
                    self.handle_connection(stream);
                    info!(%peer, "connection closed");
                }
                Err(err) => warn!(%err, "incoming connection failed"),
            }
        }
    }

    /// Serves one connection until the peer closes it or the socket fails.
    pub fn handle_connection(&self, mut stream: impl Read + Write) {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            let read = match stream.read(&mut buffer) {
                Ok(0) => return,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    let err = PlayerError::from(err);
                    if err.is_transient() {
                        debug!(%err, "connection dropped by peer");
                    } else {
                        warn!(%err, "failed to read from connection");
                    }
                    return;
                }
            };

            // A chunk holds one request without a trailing newline, or
            // several newline-separated requests.
            let text = String::from_utf8_lossy(&buffer[..read]);
            for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
                let reply = self.process_line(line);
                if let Err(err) = stream.write_all(reply.to_string().as_bytes()) {
                    debug!(%err, "failed to send reply");
                    return;
                }
            }
        }
    }

    /// Decodes and dispatches one request line, returning the reply to send.
    pub fn process_line(&self, line: &str) -> Reply {
        match protocol::decode(line) {
            Ok(request) => {
                let kind = request.kind();
                info!(command = kind.name(), ?request, "dispatching command");
                if let Err(err) = self.controller.dispatch(request) {
                    error!(%err, command = kind.name(), "failed to dispatch command");
                }
                Reply::Accepted(kind)
            }
            Err(reply) => {
                let message = reply.to_string();
                warn!(line, reply = message.trim_end(), "rejecting command");
                reply
            }
        }
    }
}
