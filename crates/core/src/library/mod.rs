//! Converted videos on disk.
//!
//! The converter stores each video as `<root>/<name>_<fps>/` with the frames
//! in `images/`, the extracted soundtrack in `audio.wav` and an optional light
//! timeline in `led.csv`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{PlayerError, Result};

const IMAGES_DIR: &str = "images";
const AUDIO_FILE: &str = "audio.wav";
const TIMELINE_FILE: &str = "led.csv";

/// One converted video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoEntry {
    /// Directory name, e.g. `hockey_30`.
    pub name: String,
    /// Name without the fps suffix, e.g. `hockey`.
    pub title: String,
    pub fps: u32,
    pub dir: PathBuf,
    pub image_dir: PathBuf,
    pub audio: Option<PathBuf>,
    pub timeline: Option<PathBuf>,
}

/// Splits `hockey_30` into `("hockey", 30)`.
pub fn parse_video_dir_name(name: &str) -> Option<(&str, u32)> {
    let (title, fps) = name.rsplit_once('_')?;
    let fps: u32 = fps.parse().ok()?;
    (!title.is_empty() && fps > 0).then_some((title, fps))
}

#[derive(Debug, Clone)]
pub struct VideoLibrary {
    root: PathBuf,
}

impl VideoLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the videos under the root, sorted by name.
    pub fn scan(&self) -> Result<Vec<VideoEntry>> {
        let unreadable = |err: io::Error| {
            PlayerError::load(format!("video library {}: {err}", self.root.display()))
        };
        let entries = fs::read_dir(&self.root).map_err(unreadable)?;

        let mut videos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(unreadable)?;
            if !entry.file_type().map_err(unreadable)?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match parse_video_dir_name(&name) {
                Some((title, fps)) => {
                    let title = title.to_string();
                    videos.push(Self::entry(name, title, fps, entry.path()));
                }
                None => debug!(name = name.as_str(), "skipping directory without fps suffix"),
            }
        }

        videos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(videos)
    }

    /// Finds a video by directory name, or by title when exactly one video
    /// carries it. A title shared by several frame rates must be spelled out.
    pub fn find(&self, name: &str) -> Result<VideoEntry> {
        let videos = self.scan()?;
        if let Some(video) = videos.iter().find(|video| video.name == name) {
            return Ok(video.clone());
        }

        let mut titled: Vec<VideoEntry> = videos
            .into_iter()
            .filter(|video| video.title == name)
            .collect();
        match titled.len() {
            0 => Err(PlayerError::load(format!("video `{name}`: not in library"))),
            1 => Ok(titled.remove(0)),
            _ => {
                let candidates: Vec<&str> =
                    titled.iter().map(|video| video.name.as_str()).collect();
                warn!(name, ?candidates, "ambiguous video title");
                Err(PlayerError::config(format!(
                    "video `{name}` is ambiguous, use one of {}",
                    candidates.join(", ")
                )))
            }
        }
    }

    fn entry(name: String, title: String, fps: u32, dir: PathBuf) -> VideoEntry {
        let existing = |file: &str| {
            let path = dir.join(file);
            path.is_file().then_some(path)
        };
        VideoEntry {
            image_dir: dir.join(IMAGES_DIR),
            audio: existing(AUDIO_FILE),
            timeline: existing(TIMELINE_FILE),
            name,
            title,
            fps,
            dir,
        }
    }
}
