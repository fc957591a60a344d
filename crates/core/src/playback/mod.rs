//! Playback coordinator: paces frames against the clock and runs the audio
//! and light companions of one video session.
//!
//! A coordinator moves through `Idle -> Loading -> Playing -> Stopping -> Idle`.
//! Frame loading happens synchronously inside [`PlaybackCoordinator::start`];
//! when it fails the coordinator falls straight back to `Idle` and the error is
//! returned to the caller. Stopping is cooperative: the frame loop, the light
//! timeline and the audio poller each observe a flag and wind down on their own.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    AudioChannel, AudioOutput, Clock, DisplaySink, FrameSequence, FrameSource, LedSink,
    LightTimeline, PlayerError, Result, StopSignal, Timeline,
};

pub const DEFAULT_FPS: u32 = 10;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    /// Frames are being loaded; a stop now aborts before the first frame.
    Loading,
    Playing,
    /// Stop requested, companions are winding down.
    Stopping,
}

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub image_dir: PathBuf,
    fps: u32,
    pub audio: Option<PathBuf>,
    pub timeline: Option<PathBuf>,
}

impl PlaybackSettings {
    pub fn new(image_dir: impl Into<PathBuf>, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(PlayerError::config("fps must be a positive integer"));
        }
        Ok(Self {
            image_dir: image_dir.into(),
            fps,
            audio: None,
            timeline: None,
        })
    }

    pub fn with_audio(mut self, audio: impl Into<PathBuf>) -> Self {
        self.audio = Some(audio.into());
        self
    }

    pub fn with_timeline(mut self, timeline: impl Into<PathBuf>) -> Self {
        self.timeline = Some(timeline.into());
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_delay(&self) -> Duration {
        RATE_WINDOW / self.fps
    }
}

/// Collaborators shared by every session. The audio output in particular is
/// initialised once per process by the composition root.
#[derive(Clone)]
pub struct Devices {
    pub frames: Arc<dyn FrameSource>,
    pub display: Arc<dyn DisplaySink>,
    pub leds: Arc<dyn LedSink>,
    pub audio: Arc<dyn AudioOutput>,
    pub clock: Arc<dyn Clock>,
    pub audio_poll_interval: Duration,
}

impl fmt::Debug for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devices")
            .field("audio_poll_interval", &self.audio_poll_interval)
            .finish_non_exhaustive()
    }
}

/// Rolling one-second count of displayed frames.
///
/// When a window completes, the next one starts exactly where the previous
/// ended rather than at the frame that closed it, so reports do not drift.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    window_start: Instant,
    frames: u32,
}

impl FrameRateCounter {
    pub fn new(window_start: Instant) -> Self {
        Self {
            window_start,
            frames: 0,
        }
    }

    /// Counts a frame shown at `at`. Returns the number of frames of the
    /// window that `at` closed, if any.
    pub fn record(&mut self, at: Instant) -> Option<u32> {
        let elapsed = at.saturating_duration_since(self.window_start);
        let mut completed = None;
        if elapsed >= RATE_WINDOW {
            completed = Some(self.frames);
            self.window_start = at - (elapsed - RATE_WINDOW);
            self.frames = 0;
        }
        self.frames += 1;
        completed
    }
}

#[derive(Default)]
struct Companions {
    audio: Option<Arc<AudioChannel>>,
    lights: Option<Arc<LightTimeline>>,
}

/// Owns one playback session.
pub struct PlaybackCoordinator {
    settings: PlaybackSettings,
    devices: Devices,
    state: Mutex<PlaybackState>,
    state_changed: Condvar,
    stop: StopSignal,
    companions: Mutex<Companions>,
    frame_index: AtomicUsize,
    observed_fps: AtomicU32,
}

impl PlaybackCoordinator {
    pub fn new(settings: PlaybackSettings, devices: Devices) -> Self {
        Self {
            settings,
            devices,
            state: Mutex::new(PlaybackState::Idle),
            state_changed: Condvar::new(),
            stop: StopSignal::new(),
            companions: Mutex::new(Companions::default()),
            frame_index: AtomicUsize::new(0),
            observed_fps: AtomicU32::new(0),
        }
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.settings
    }

    /// Loads the frames and plays them on the calling thread until
    /// [`PlaybackCoordinator::stop`] is called.
    ///
    /// Returns immediately with a warning when a session is already active,
    /// and with a [`PlayerError::Load`] when the frames cannot be loaded.
    pub fn start(&self) -> Result<()> {
        if !self.try_begin() {
            return Ok(());
        }
        self.run()
    }

    /// Claims the coordinator for a new session (`Idle -> Loading`).
    pub(crate) fn try_begin(&self) -> bool {
        let mut state = self.lock_state();
        if *state != PlaybackState::Idle {
            warn!(state = ?*state, "video already playing");
            return false;
        }
        *state = PlaybackState::Loading;
        self.stop.reset();
        self.frame_index.store(0, Ordering::SeqCst);
        self.observed_fps.store(0, Ordering::SeqCst);
        self.state_changed.notify_all();
        true
    }

    /// Runs a session claimed with [`PlaybackCoordinator::try_begin`].
    pub(crate) fn run(&self) -> Result<()> {
        let frames = match self.devices.frames.load(&self.settings.image_dir) {
            Ok(frames) => frames,
            Err(err) => {
                self.set_state(PlaybackState::Idle);
                return Err(err);
            }
        };

        let companions = self.prepare_companions();
        {
            let mut state = self.lock_state();
            if *state == PlaybackState::Stopping {
                *state = PlaybackState::Idle;
                self.state_changed.notify_all();
                info!("video stopped before the first frame");
                return Ok(());
            }
            *self.lock_companions() = companions;
            *state = PlaybackState::Playing;
            self.state_changed.notify_all();
        }

        info!(
            fps = self.settings.fps,
            frames = frames.len(),
            dir = %self.settings.image_dir.display(),
            "video player starting"
        );
        let lights = self.spawn_companions();

        self.play_frames(&frames);

        // Audio is left to finish its own poll loop; only the lights are joined.
        if let Some(handle) = lights {
            if handle.join().is_err() {
                warn!("light timeline thread panicked");
            }
        }
        *self.lock_companions() = Companions::default();
        self.set_state(PlaybackState::Idle);
        info!("video player ending");
        Ok(())
    }

    fn prepare_companions(&self) -> Companions {
        let audio = self.settings.audio.as_ref().map(|path| {
            Arc::new(AudioChannel::new(
                self.devices.audio.clone(),
                Some(path.clone()),
                self.devices.clock.clone(),
                self.devices.audio_poll_interval,
            ))
        });

        let lights = self.settings.timeline.as_deref().and_then(|path| {
            match Timeline::load(path) {
                Ok(timeline) => Some(Arc::new(LightTimeline::new(
                    timeline,
                    self.devices.leds.clone(),
                    self.devices.clock.clone(),
                ))),
                Err(err) => {
                    warn!(%err, "light timeline unavailable, playing without lights");
                    None
                }
            }
        });

        Companions { audio, lights }
    }

    fn spawn_companions(&self) -> Option<JoinHandle<()>> {
        let companions = self.lock_companions();

        if let Some(audio) = companions.audio.clone() {
            let spawned = thread::Builder::new()
                .name("audio-channel".into())
                .spawn(move || {
                    if let Err(err) = audio.start() {
                        warn!(%err, "audio playback failed");
                    }
                });
            if let Err(err) = spawned {
                warn!(%err, "failed to spawn audio thread");
            }
        }

        let lights = companions.lights.clone()?;
        thread::Builder::new()
            .name("light-timeline".into())
            .spawn(move || lights.start())
            .map_err(|err| warn!(%err, "failed to spawn light timeline thread"))
            .ok()
    }

    fn play_frames(&self, frames: &FrameSequence) {
        let clock = &self.devices.clock;
        let frame_delay = self.settings.frame_delay();
        let mut counter = FrameRateCounter::new(clock.now());
        let mut index = 0;

        while self.state() == PlaybackState::Playing {
            let before = clock.now();
            if let Err(err) = self.devices.display.show(frames.get(index)) {
                warn!(%err, index, "failed to show frame");
            }
            let after = clock.now();

            if let Some(fps) = counter.record(after) {
                self.observed_fps.store(fps, Ordering::SeqCst);
                debug!(fps, "frame rate");
            }

            index = (index + 1) % frames.len();
            self.frame_index.store(index, Ordering::SeqCst);

            let next_due = before + frame_delay;
            if next_due > after && clock.wait_until(next_due, &self.stop) {
                break;
            }
        }
    }

    /// Requests the session to end. Returns without waiting; use
    /// [`PlaybackCoordinator::wait_idle`] to wait for the teardown.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        match *state {
            PlaybackState::Idle | PlaybackState::Stopping => {
                warn!("video not playing");
                return;
            }
            PlaybackState::Loading => {}
            PlaybackState::Playing => {
                let companions = self.lock_companions();
                if let Some(audio) = &companions.audio {
                    audio.stop();
                }
                if let Some(lights) = &companions.lights {
                    lights.stop();
                }
            }
        }
        *state = PlaybackState::Stopping;
        self.stop.raise();
        self.state_changed.notify_all();
        info!("video stop requested");
    }

    /// True while frames are shown or the session is still tearing down.
    pub fn is_playing(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Playing | PlaybackState::Stopping
        )
    }

    pub fn state(&self) -> PlaybackState {
        *self.lock_state()
    }

    /// Blocks until the coordinator is back to `Idle`.
    pub fn wait_idle(&self) {
        let state = self.lock_state();
        let _idle = self
            .state_changed
            .wait_while(state, |state| *state != PlaybackState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like [`PlaybackCoordinator::wait_idle`] with an upper bound. Returns
    /// whether the coordinator became idle in time.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock_state();
        let (state, _) = self
            .state_changed
            .wait_timeout_while(state, timeout, |state| *state != PlaybackState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
        *state == PlaybackState::Idle
    }

    /// Index of the next frame to show.
    pub fn frame_index(&self) -> usize {
        self.frame_index.load(Ordering::SeqCst)
    }

    /// Frames shown in the last completed one-second window.
    pub fn observed_fps(&self) -> u32 {
        self.observed_fps.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: PlaybackState) {
        *self.lock_state() = next;
        self.state_changed.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_companions(&self) -> MutexGuard<'_, Companions> {
        self.companions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("frame_index", &self.frame_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{Color, DirectoryFrameSource, Frame, ManualClock, Sound, SystemClock};

    /// Three 1x1 frames whose red channel is the frame number.
    struct StaticFrames;

    impl FrameSource for StaticFrames {
        fn load(&self, dir: &Path) -> Result<FrameSequence> {
            if dir.ends_with("missing") {
                return Err(PlayerError::load(format!("{}", dir.display())));
            }
            FrameSequence::new(
                (0..3)
                    .map(|n| Frame::new(RgbImage::from_pixel(1, 1, Rgb([n, 0, 0]))))
                    .collect(),
            )
        }
    }

    type FrameHook = Box<dyn Fn(usize, &PlaybackCoordinator) + Send + Sync>;

    /// Records (frame number, virtual time) and runs a hook after each frame.
    struct ScriptedDisplay {
        clock: Arc<ManualClock>,
        latency: Duration,
        shown: Mutex<Vec<(u8, Duration)>>,
        coordinator: Mutex<Option<Arc<PlaybackCoordinator>>>,
        hook: FrameHook,
    }

    impl DisplaySink for ScriptedDisplay {
        fn show(&self, frame: &Frame) -> Result<()> {
            self.clock.advance(self.latency);
            let count = {
                let mut shown = self.shown.lock().unwrap();
                shown.push((frame.image().get_pixel(0, 0).0[0], self.clock.elapsed()));
                shown.len()
            };
            let coordinator = self.coordinator.lock().unwrap().clone();
            if let Some(coordinator) = coordinator {
                (self.hook)(count, &coordinator);
            }
            Ok(())
        }
    }

    struct NullLeds;

    impl LedSink for NullLeds {
        fn fill(&self, _color: Color) -> Result<()> {
            Ok(())
        }

        fn set_single(&self, _index: usize, _color: Color) -> Result<()> {
            Ok(())
        }
    }

    struct NoAudio;

    impl AudioOutput for NoAudio {
        fn open(&self, path: &Path) -> Result<Box<dyn Sound>> {
            Err(PlayerError::load(format!("sound {}", path.display())))
        }
    }

    fn devices(
        frames: Arc<dyn FrameSource>,
        display: Arc<dyn DisplaySink>,
        leds: Arc<dyn LedSink>,
        clock: Arc<dyn Clock>,
    ) -> Devices {
        Devices {
            frames,
            display,
            leds,
            audio: Arc::new(NoAudio),
            clock,
            audio_poll_interval: Duration::from_millis(10),
        }
    }

    fn scripted(
        fps: u32,
        latency: Duration,
        hook: impl Fn(usize, &PlaybackCoordinator) + Send + Sync + 'static,
    ) -> (Arc<PlaybackCoordinator>, Arc<ScriptedDisplay>) {
        let clock = Arc::new(ManualClock::new());
        let display = Arc::new(ScriptedDisplay {
            clock: clock.clone(),
            latency,
            shown: Mutex::new(Vec::new()),
            coordinator: Mutex::new(None),
            hook: Box::new(hook),
        });
        let coordinator = Arc::new(PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/test", fps).unwrap(),
            devices(Arc::new(StaticFrames), display.clone(), Arc::new(NullLeds), clock),
        ));
        *display.coordinator.lock().unwrap() = Some(coordinator.clone());
        (coordinator, display)
    }

    fn stop_after(frames: usize) -> impl Fn(usize, &PlaybackCoordinator) + Send + Sync {
        move |count: usize, coordinator: &PlaybackCoordinator| {
            if count == frames {
                coordinator.stop();
            }
        }
    }

    fn finish(display: &ScriptedDisplay) -> Vec<(u8, Duration)> {
        *display.coordinator.lock().unwrap() = None;
        display.shown.lock().unwrap().clone()
    }

    #[test]
    fn counter_reports_completed_windows_without_drift() {
        let origin = Instant::now();
        let mut counter = FrameRateCounter::new(origin);
        let mut reports = Vec::new();

        for n in 0..35u32 {
            if let Some(fps) = counter.record(origin + Duration::from_millis(100) * n) {
                reports.push(fps);
            }
        }
        assert_eq!(reports, [10, 10, 10]);

        let late = origin + Duration::from_millis(1250);
        let mut counter = FrameRateCounter::new(origin);
        counter.record(origin);
        assert_eq!(counter.record(late), Some(1));
        // The next window started at 1.0s, not at 1.25s.
        assert_eq!(counter.record(origin + Duration::from_millis(2000)), Some(1));
    }

    #[test]
    fn paces_frames_at_the_target_rate() {
        let (coordinator, display) = scripted(10, Duration::ZERO, stop_after(35));

        coordinator.start().unwrap();

        let shown = finish(&display);
        assert_eq!(shown.len(), 35);
        for (n, (frame, at)) in shown.iter().enumerate() {
            assert_eq!(*frame as usize, n % 3);
            assert_eq!(*at, Duration::from_millis(100) * n as u32);
        }
        assert_eq!(coordinator.observed_fps(), 10);
        assert_eq!(coordinator.state(), PlaybackState::Idle);
        assert!(!coordinator.is_playing());
    }

    #[test]
    fn display_latency_is_absorbed_by_the_frame_delay() {
        let (coordinator, display) = scripted(10, Duration::from_millis(30), stop_after(5));

        coordinator.start().unwrap();

        let times: Vec<Duration> = finish(&display).into_iter().map(|(_, at)| at).collect();
        let expected: Vec<Duration> = (0..5u32)
            .map(|n| Duration::from_millis(100) * n + Duration::from_millis(30))
            .collect();
        assert_eq!(times, expected);
    }

    #[test]
    fn slow_display_never_waits() {
        let (coordinator, display) = scripted(10, Duration::from_millis(150), stop_after(4));

        coordinator.start().unwrap();

        let times: Vec<Duration> = finish(&display).into_iter().map(|(_, at)| at).collect();
        assert_eq!(
            times,
            [150, 300, 450, 600].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn stop_is_observed_before_the_next_frame() {
        let (coordinator, display) = scripted(10, Duration::ZERO, stop_after(7));

        coordinator.start().unwrap();

        let shown = finish(&display);
        assert_eq!(shown.len(), 7);
        // The pending wait was cut short: no virtual time passed after frame 7.
        assert_eq!(shown[6].1, Duration::from_millis(600));
        assert_eq!(coordinator.frame_index(), 7 % 3);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let (coordinator, display) = scripted(10, Duration::ZERO, |count, coordinator| {
            if count == 2 {
                let index = coordinator.frame_index();
                coordinator.start().unwrap();
                assert_eq!(coordinator.state(), PlaybackState::Playing);
                assert_eq!(coordinator.frame_index(), index);
            }
            if count == 5 {
                coordinator.stop();
            }
        });

        coordinator.start().unwrap();

        let frames: Vec<u8> = finish(&display).into_iter().map(|(frame, _)| frame).collect();
        assert_eq!(frames, [0, 1, 2, 0, 1]);
    }

    #[test]
    fn stop_on_idle_is_a_no_op() {
        let (coordinator, display) = scripted(10, Duration::ZERO, |_, _| {});

        coordinator.stop();

        assert_eq!(coordinator.state(), PlaybackState::Idle);
        assert!(coordinator.wait_idle_timeout(Duration::ZERO));
        finish(&display);
    }

    #[test]
    fn failed_load_never_enters_playing() {
        let (coordinator, display) = scripted(10, Duration::ZERO, |_, _| {});
        let coordinator = PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/missing", 10).unwrap(),
            coordinator.devices.clone(),
        );

        let err = coordinator.start().unwrap_err();

        assert!(matches!(err, PlayerError::Load(_)));
        assert!(!coordinator.is_playing());
        assert_eq!(coordinator.state(), PlaybackState::Idle);
        assert!(finish(&display).is_empty());
    }

    #[test]
    fn empty_directory_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), b"no frames here").unwrap();
        let (template, display) = scripted(10, Duration::ZERO, |_, _| {});
        let mut devices = template.devices.clone();
        devices.frames = Arc::new(DirectoryFrameSource::new(4, 4));
        let coordinator = PlaybackCoordinator::new(
            PlaybackSettings::new(dir.path(), 10).unwrap(),
            devices,
        );

        assert!(matches!(coordinator.start(), Err(PlayerError::Load(_))));
        assert!(!coordinator.is_playing());
        finish(&display);
    }

    #[test]
    fn zero_fps_is_rejected() {
        assert!(matches!(
            PlaybackSettings::new("/videos/x", 0),
            Err(PlayerError::Config(_))
        ));
        assert_eq!(
            PlaybackSettings::new("/videos/x", 25).unwrap().frame_delay(),
            Duration::from_millis(40)
        );
    }

    /// Blocks `load` until the test releases it.
    struct GatedFrames {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl FrameSource for GatedFrames {
        fn load(&self, dir: &Path) -> Result<FrameSequence> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            StaticFrames.load(dir)
        }
    }

    #[test]
    fn stop_while_loading_aborts_before_the_first_frame() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let (template, display) = scripted(10, Duration::ZERO, |_, _| {});
        let mut devices = template.devices.clone();
        devices.frames = Arc::new(GatedFrames {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let coordinator = Arc::new(PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/test", 10).unwrap(),
            devices,
        ));

        let runner = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.start())
        };
        entered_rx.recv().unwrap();
        assert_eq!(coordinator.state(), PlaybackState::Loading);

        coordinator.stop();
        release_tx.send(()).unwrap();
        runner.join().unwrap().unwrap();

        assert_eq!(coordinator.state(), PlaybackState::Idle);
        assert!(finish(&display).is_empty());
    }

    /// Counts LED writes.
    #[derive(Default)]
    struct CountingLeds(AtomicUsize);

    impl LedSink for CountingLeds {
        fn fill(&self, _color: Color) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_single(&self, _index: usize, _color: Color) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullDisplay;

    impl DisplaySink for NullDisplay {
        fn show(&self, _frame: &Frame) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn runs_and_joins_the_light_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = dir.path().join("led.csv");
        fs::write(&timeline, "color,time,led\n#ff0000,0,0\n#00ff00,3600,1\n").unwrap();
        let leds = Arc::new(CountingLeds::default());
        let coordinator = Arc::new(PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/test", 50)
                .unwrap()
                .with_timeline(&timeline)
                .with_audio(dir.path().join("audio.wav")),
            devices(
                Arc::new(StaticFrames),
                Arc::new(NullDisplay),
                leds.clone(),
                Arc::new(SystemClock),
            ),
        ));

        let runner = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.start())
        };
        while coordinator.frame_index() == 0 || leds.0.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        assert!(coordinator.is_playing());

        let requested = Instant::now();
        coordinator.stop();
        coordinator.wait_idle();
        runner.join().unwrap().unwrap();

        // The timeline was mid-way through an hour-long row.
        assert!(requested.elapsed() < Duration::from_secs(2));
        assert_eq!(leds.0.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_playing());
    }

    /// Sounds that stay busy until stopped.
    #[derive(Default)]
    struct EndlessAudio {
        opened: AtomicUsize,
        stopped: Arc<AtomicUsize>,
    }

    struct EndlessSound(Arc<AtomicUsize>);

    impl AudioOutput for EndlessAudio {
        fn open(&self, _path: &Path) -> Result<Box<dyn Sound>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EndlessSound(self.stopped.clone())))
        }
    }

    impl Sound for EndlessSound {
        fn play(&self) -> Result<()> {
            Ok(())
        }

        fn is_busy(&self) -> bool {
            true
        }

        fn stop(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn stopping_the_video_stops_its_soundtrack() {
        let audio = Arc::new(EndlessAudio::default());
        let mut devices = devices(
            Arc::new(StaticFrames),
            Arc::new(NullDisplay),
            Arc::new(NullLeds),
            Arc::new(SystemClock),
        );
        devices.audio = audio.clone();
        let coordinator = Arc::new(PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/test", 50)
                .unwrap()
                .with_audio("/videos/test/audio.wav"),
            devices,
        ));

        let runner = {
            let coordinator = coordinator.clone();
            thread::spawn(move || coordinator.start())
        };
        while audio.opened.load(Ordering::SeqCst) == 0 || coordinator.frame_index() == 0 {
            thread::yield_now();
        }
        assert_eq!(audio.stopped.load(Ordering::SeqCst), 0);

        coordinator.stop();
        coordinator.wait_idle();
        runner.join().unwrap().unwrap();

        // The audio thread is not joined; it observes the stop within a poll.
        let deadline = Instant::now() + Duration::from_secs(5);
        while audio.stopped.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(audio.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(audio.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_timeline_degrades_to_video_only() {
        let leds = Arc::new(CountingLeds::default());
        let (template, display) = scripted(10, Duration::ZERO, |_, _| {});
        let mut devices = template.devices.clone();
        devices.leds = leds.clone();
        let coordinator = Arc::new(PlaybackCoordinator::new(
            PlaybackSettings::new("/videos/test", 10)
                .unwrap()
                .with_timeline("/definitely/missing/led.csv"),
            devices,
        ));
        let stopper = {
            let coordinator = coordinator.clone();
            thread::spawn(move || {
                while coordinator.frame_index() == 0 {
                    thread::yield_now();
                }
                coordinator.stop();
            })
        };

        coordinator.start().unwrap();
        stopper.join().unwrap();

        assert!(!finish(&display).is_empty());
        assert_eq!(leds.0.load(Ordering::SeqCst), 0);
    }
}
