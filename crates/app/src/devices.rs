//! Hardware backends wired in by the binary.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use video_player_core::{
    AudioOutput, Color, DisplaySink, Frame, LedSink, PlayerError, Result, Sound,
};

/// Writes frames as little-endian RGB565 to a Linux framebuffer device such
/// as the one fbtft exposes for an ST7735R panel.
#[derive(Debug)]
pub struct FramebufferDisplay {
    device: Mutex<File>,
    width: u32,
    height: u32,
}

impl FramebufferDisplay {
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self> {
        let device = OpenOptions::new().write(true).open(path).map_err(|err| {
            PlayerError::config(format!("framebuffer {}: {err}", path.display()))
        })?;
        tracing::info!(path = %path.display(), width, height, "framebuffer display opened");
        Ok(Self {
            device: Mutex::new(device),
            width,
            height,
        })
    }
}

fn rgb565([r, g, b]: [u8; 3]) -> [u8; 2] {
    let packed = (u16::from(r) >> 3) << 11 | (u16::from(g) >> 2) << 5 | u16::from(b) >> 3;
    packed.to_le_bytes()
}

impl DisplaySink for FramebufferDisplay {
    fn show(&self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PlayerError::msg(format!(
                "frame is {}x{}, display is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let bytes: Vec<u8> = frame.rgb_pixels().flat_map(rgb565).collect();

        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        device.seek(SeekFrom::Start(0))?;
        device.write_all(&bytes)?;
        Ok(())
    }
}

/// Display stand-in that only traces each frame.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl DisplaySink for TracingDisplay {
    fn show(&self, frame: &Frame) -> Result<()> {
        tracing::trace!(width = frame.width(), height = frame.height(), "frame");
        Ok(())
    }
}

/// LED strip stand-in that keeps the colors in memory and logs changes.
#[derive(Debug)]
pub struct TracingLeds {
    colors: Mutex<Vec<Color>>,
}

impl TracingLeds {
    pub fn new(count: usize) -> Self {
        Self {
            colors: Mutex::new(vec![Color::BLACK; count]),
        }
    }
}

impl LedSink for TracingLeds {
    fn fill(&self, color: Color) -> Result<()> {
        let mut colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        colors.fill(color);
        tracing::info!(%color, count = colors.len(), "LEDs set");
        Ok(())
    }

    fn set_single(&self, index: usize, color: Color) -> Result<()> {
        let mut colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        let count = colors.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| colors.get_mut(i))
            .ok_or_else(|| PlayerError::config(format!("LED {index} out of range 1..={count}")))?;
        *slot = color;
        tracing::info!(%color, index, "LED set");
        Ok(())
    }
}

/// Audio stand-in: a sound counts as playing for its decoded length.
#[derive(Debug, Default)]
pub struct SilentAudio;

impl SilentAudio {
    pub fn init() -> Self {
        tracing::info!("audio output initialised (silent)");
        Self
    }
}

impl AudioOutput for SilentAudio {
    fn open(&self, path: &Path) -> Result<Box<dyn Sound>> {
        let length = sound_length(path)?;
        Ok(Box::new(SilentSound {
            path: path.to_path_buf(),
            length,
            started: Mutex::new(None),
        }))
    }
}

fn sound_error(path: &Path, err: impl fmt::Display) -> PlayerError {
    PlayerError::load(format!("sound {}: {err}", path.display()))
}

/// Playing time of an audio file. Uses the frame count the container
/// declares and falls back to summing packet durations.
fn sound_length(path: &Path) -> Result<Duration> {
    let file = File::open(path).map_err(|err| sound_error(path, err))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| sound_error(path, err))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| sound_error(path, "no audio track"))?;
    let track_id = track.id;
    let declared = track.codec_params.n_frames;
    let sample_rate = track
        .codec_params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| sound_error(path, "unknown sample rate"))?;

    let frames = match declared {
        Some(frames) => frames,
        None => {
            let mut frames = 0;
            loop {
                match format.next_packet() {
                    Ok(packet) if packet.track_id() == track_id => frames += packet.dur,
                    Ok(_) => {}
                    Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
                    Err(err) => return Err(sound_error(path, err)),
                }
            }
            frames
        }
    };

    Ok(frames_to_duration(frames, sample_rate))
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    let rate = u64::from(sample_rate);
    Duration::from_secs(frames / rate)
        + Duration::from_nanos((frames % rate) * 1_000_000_000 / rate)
}

struct SilentSound {
    path: PathBuf,
    length: Duration,
    started: Mutex<Option<Instant>>,
}

impl Sound for SilentSound {
    fn play(&self) -> Result<()> {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        tracing::info!(path = %self.path.display(), length = ?self.length, "sound playing");
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|started| started.elapsed() < self.length)
    }

    fn stop(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_rgb565_little_endian() {
        assert_eq!(rgb565([0xff, 0xff, 0xff]), [0xff, 0xff]);
        assert_eq!(rgb565([0xff, 0, 0]), [0x00, 0xf8]);
        assert_eq!(rgb565([0, 0xff, 0]), [0xe0, 0x07]);
        assert_eq!(rgb565([0, 0, 0xff]), [0x1f, 0x00]);
    }

    #[test]
    fn single_leds_are_one_based() {
        let leds = TracingLeds::new(4);

        leds.set_single(1, Color::WHITE).unwrap();
        leds.set_single(4, Color::WHITE).unwrap();
        assert!(leds.set_single(0, Color::WHITE).is_err());
        assert!(leds.set_single(5, Color::WHITE).is_err());

        let colors = leds.colors.lock().unwrap().clone();
        assert_eq!(colors, [Color::WHITE, Color::BLACK, Color::BLACK, Color::WHITE]);
    }

    /// 16-bit mono PCM at 8 kHz, with an INFO list between `fmt ` and `data`
    /// the way ffmpeg writes it.
    fn wav_with_info_list(data_len: u32, info_len: u32) -> Vec<u8> {
        let mut fmt_chunk = Vec::new();
        fmt_chunk.extend_from_slice(&1u16.to_le_bytes());
        fmt_chunk.extend_from_slice(&1u16.to_le_bytes());
        fmt_chunk.extend_from_slice(&8000u32.to_le_bytes());
        fmt_chunk.extend_from_slice(&16000u32.to_le_bytes());
        fmt_chunk.extend_from_slice(&2u16.to_le_bytes());
        fmt_chunk.extend_from_slice(&16u16.to_le_bytes());

        let mut list = b"INFO".to_vec();
        list.extend_from_slice(b"ISFT");
        list.extend_from_slice(&info_len.to_le_bytes());
        list.extend(std::iter::repeat(b'a').take(info_len as usize));

        let mut body = b"WAVE".to_vec();
        for (id, chunk) in [
            (b"fmt ", fmt_chunk),
            (b"LIST", list),
            (b"data", vec![0u8; data_len as usize]),
        ] {
            body.extend_from_slice(id);
            body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            body.extend_from_slice(&chunk);
        }

        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        bytes
    }

    #[test]
    fn measures_sound_length_past_metadata_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.wav");
        std::fs::write(&path, wav_with_info_list(1600, 3988)).unwrap();

        assert_eq!(sound_length(&path).unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn rejects_missing_and_undecodable_sounds() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("notes.txt");
        std::fs::write(&garbage, b"just some text, not audio").unwrap();

        assert!(matches!(
            sound_length(&dir.path().join("missing.wav")),
            Err(PlayerError::Load(_))
        ));
        assert!(matches!(sound_length(&garbage), Err(PlayerError::Load(_))));
        assert!(SilentAudio::init().open(&garbage).is_err());
    }

    #[test]
    fn converts_frames_to_time() {
        assert_eq!(frames_to_duration(44_100, 44_100), Duration::from_secs(1));
        assert_eq!(frames_to_duration(800, 8000), Duration::from_millis(100));
        assert_eq!(frames_to_duration(0, 48_000), Duration::ZERO);
    }
}
