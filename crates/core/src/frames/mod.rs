//! Pre-rendered frame sequences and the sources that load them.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::{imageops::FilterType, RgbImage};
use tracing::{debug, info};

use crate::{PlayerError, Result};

/// One raster image sized for the display.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Row-major RGB triples.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.image.pixels().map(|pixel| pixel.0)
    }
}

/// Ordered, finite and non-empty sequence of frames. Indexing wraps around so
/// the playback loop can cycle forever.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Arc<[Frame]>,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(PlayerError::load("frame sequence: no frames"));
        }
        Ok(Self {
            frames: frames.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the frame at `index` modulo the sequence length.
    pub fn get(&self, index: usize) -> &Frame {
        &self.frames[index % self.frames.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

/// Supplies the frames of one video.
pub trait FrameSource: Send + Sync {
    fn load(&self, dir: &Path) -> Result<FrameSequence>;
}

/// Extracts the numeric suffix of names shaped like `image-0042.jpg`.
pub fn frame_number(file_name: &str) -> Option<u32> {
    let (stem, _extension) = file_name.rsplit_once('.')?;
    let (_, digits) = stem.rsplit_once('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn unreadable_dir(dir: &Path, err: io::Error) -> PlayerError {
    PlayerError::load(format!("frame directory {}: {err}", dir.display()))
}

/// Lists the numbered frame files of `dir`, ordered by their numeric suffix.
pub fn list_frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| unreadable_dir(dir, err))?;

    let mut numbered = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| unreadable_dir(dir, err))?;
        let file_type = entry.file_type().map_err(|err| unreadable_dir(dir, err))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str().and_then(frame_number) {
            Some(number) => numbered.push((number, entry.path())),
            None => debug!(file = ?name, "skipping file without frame number"),
        }
    }

    if numbered.is_empty() {
        return Err(PlayerError::load(format!(
            "frame directory {}: no numbered frames",
            dir.display()
        )));
    }

    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

/// Decodes every numbered image of a directory and resizes it to the display.
#[derive(Debug, Clone)]
pub struct DirectoryFrameSource {
    width: u32,
    height: u32,
}

impl DirectoryFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FrameSource for DirectoryFrameSource {
    fn load(&self, dir: &Path) -> Result<FrameSequence> {
        let files = list_frame_files(dir)?;
        info!(count = files.len(), dir = %dir.display(), "found frames for video");

        let mut frames = Vec::with_capacity(files.len());
        for path in &files {
            let decoded = image::open(path)
                .map_err(|err| PlayerError::load(format!("frame {}: {err}", path.display())))?;
            let resized = if decoded.width() == self.width && decoded.height() == self.height {
                decoded.to_rgb8()
            } else {
                decoded
                    .resize_exact(self.width, self.height, FilterType::Triangle)
                    .to_rgb8()
            };
            frames.push(Frame::new(resized));
        }

        info!(width = self.width, height = self.height, "frame preprocessing complete");
        FrameSequence::new(frames)
    }
}

/// Remembers loaded sequences per directory so replays skip decoding.
pub struct CachedFrameSource<S> {
    inner: S,
    cache: Mutex<HashMap<PathBuf, FrameSequence>>,
}

impl<S: FrameSource> CachedFrameSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<S: FrameSource> FrameSource for CachedFrameSource<S> {
    fn load(&self, dir: &Path) -> Result<FrameSequence> {
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dir)
        {
            debug!(dir = %dir.display(), "frame cache hit");
            return Ok(hit.clone());
        }

        // Decode outside the lock; a concurrent load of the same directory
        // only costs a duplicate decode.
        let sequence = self.inner.load(dir)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dir.to_path_buf(), sequence.clone());
        Ok(sequence)
    }
}

impl<S> std::fmt::Debug for CachedFrameSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFrameSource").finish()
    }
}
