use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{Clock, Result, StopSignal};

/// Default interval between "still playing?" checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide audio backend. The composition root initialises it once and
/// hands the same instance to every channel.
pub trait AudioOutput: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Sound>>;
}

/// A loaded sound resource.
pub trait Sound: Send {
    fn play(&self) -> Result<()>;

    /// Whether the hardware is still producing this sound.
    fn is_busy(&self) -> bool;

    fn stop(&self);
}

/// Plays a single sound file and polls it until it ends or is stopped.
pub struct AudioChannel {
    output: Arc<dyn AudioOutput>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    stop: StopSignal,
    playing: AtomicBool,
}

impl AudioChannel {
    /// Creates a channel. Without a `path` every call is a no-op.
    pub fn new(
        output: Arc<dyn AudioOutput>,
        path: Option<PathBuf>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        if path.is_none() {
            debug!("no audio configured for channel");
        }
        Self {
            output,
            path,
            clock,
            poll_interval,
            stop: StopSignal::new(),
            playing: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Plays the sound on the calling thread and returns once it has finished
    /// or [`AudioChannel::stop`] was observed.
    ///
    /// A stop requested before this call makes it return without playing.
    pub fn start(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if self.playing.swap(true, Ordering::SeqCst) {
            warn!("audio already playing");
            return Ok(());
        }

        let outcome = self.play_until_stopped(path);

        self.stop.reset();
        self.playing.store(false, Ordering::SeqCst);
        outcome
    }

    fn play_until_stopped(&self, path: &Path) -> Result<()> {
        if self.stop.is_raised() {
            debug!(path = %path.display(), "audio stopped before it started");
            return Ok(());
        }

        let sound = self.output.open(path)?;
        info!(path = %path.display(), "audio starting");
        sound.play()?;

        while sound.is_busy() {
            if self.clock.wait_for(self.poll_interval, &self.stop) {
                break;
            }
        }

        sound.stop();
        info!(path = %path.display(), "audio stopped");
        Ok(())
    }

    /// Flags the polling loop to stop. The hardware is stopped by the loop
    /// within one poll interval.
    pub fn stop(&self) {
        if self.path.is_none() {
            return;
        }
        if !self.is_playing() {
            debug!("audio not playing yet");
        }
        self.stop.raise();
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChannel")
            .field("path", &self.path)
            .field("playing", &self.is_playing())
            .finish()
    }
}
