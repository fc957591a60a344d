//! Ambient LED colors and the looping light timeline.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{Clock, PlayerError, Result, StopSignal};

/// RGB color written to the LED strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(0xff, 0xff, 0xff);
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = PlayerError;

    /// Parses `#rrggbb` or `rrggbb`.
    fn from_str(value: &str) -> Result<Self> {
        let hex = value.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PlayerError::config(format!("color `{value}` is not #rrggbb")));
        }
        let component = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|err| PlayerError::config(format!("color `{value}`: {err}")))
        };
        Ok(Self::new(component(0..2)?, component(2..4)?, component(4..6)?))
    }
}

impl TryFrom<String> for Color {
    type Error = PlayerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Which LEDs a timeline row addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedTarget {
    All,
    /// 1-based LED index.
    Single(usize),
}

impl LedTarget {
    /// Index 0 addresses the whole strip.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::All,
            n => Self::Single(n),
        }
    }
}

/// Driver for the LED strip.
pub trait LedSink: Send + Sync {
    fn fill(&self, color: Color) -> Result<()>;

    /// `index` is 1-based.
    fn set_single(&self, index: usize, color: Color) -> Result<()>;

    fn apply(&self, target: LedTarget, color: Color) -> Result<()> {
        match target {
            LedTarget::All => self.fill(color),
            LedTarget::Single(index) => self.set_single(index, color),
        }
    }
}

/// One scheduled color change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightState {
    pub color: Color,
    /// Offset from the start of a timeline pass.
    pub time: Duration,
    pub target: LedTarget,
}

/// Rows of a light timeline in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    rows: Vec<LightState>,
}

impl Timeline {
    pub fn new(rows: Vec<LightState>) -> Result<Self> {
        if rows.is_empty() {
            return Err(PlayerError::load("light timeline: no rows"));
        }
        Ok(Self { rows })
    }

    /// Parses `color,time_seconds,target_index` rows after a header line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rows = Vec::new();
        for (number, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row = parse_row(line)
                .map_err(|err| PlayerError::load(format!("light timeline line {}: {err}", number + 1)))?;
            rows.push(row);
        }
        Self::new(rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| PlayerError::load(format!("light timeline {}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn rows(&self) -> &[LightState] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn parse_row(line: &str) -> std::result::Result<LightState, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [color, time, target] = fields.as_slice() else {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    };

    let color = color.parse::<Color>().map_err(|err| err.to_string())?;
    let seconds: f64 = time
        .parse()
        .map_err(|_| format!("time `{time}` is not a number"))?;
    let time = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("time `{time}` must be a non-negative offset"))?;
    let target: usize = target
        .parse()
        .map_err(|_| format!("target `{target}` is not an LED index"))?;

    Ok(LightState {
        color,
        time,
        target: LedTarget::from_index(target),
    })
}

/// Replays a [`Timeline`] in a loop against the clock.
pub struct LightTimeline {
    timeline: Timeline,
    leds: Arc<dyn LedSink>,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    running: AtomicBool,
}

impl LightTimeline {
    pub fn new(timeline: Timeline, leds: Arc<dyn LedSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeline,
            leds,
            clock,
            stop: StopSignal::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Runs the timeline on the calling thread until [`LightTimeline::stop`].
    ///
    /// Each pass re-anchors to the clock when the last row wraps to the first,
    /// so sleep overshoot does not accumulate across passes. Rows are visited
    /// in file order; a row whose time lies in the past fires immediately.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("light timeline already running");
            return;
        }
        info!(rows = self.timeline.len(), "light timeline starting");

        let rows = self.timeline.rows();
        let mut index = 0;
        let mut time_offset = self.clock.now();

        while !self.stop.is_raised() {
            let row = rows[index];
            trace!(index, color = %row.color, "light timeline row");
            if let Err(err) = self.leds.apply(row.target, row.color) {
                warn!(%err, index, "failed to set LEDs");
            }

            let next_index = (index + 1) % rows.len();
            let due = time_offset + rows[next_index].time;
            if due > self.clock.now() && self.clock.wait_until(due, &self.stop) {
                break;
            }

            index = next_index;
            if index == 0 {
                time_offset = self.clock.now();
                debug!("light timeline wrapped");
            }
        }

        self.stop.reset();
        self.running.store(false, Ordering::SeqCst);
        info!("light timeline stopped");
    }

    /// Requests termination; the replay loop exits without waiting for the
    /// current row's dwell time to elapse. A request made before the loop
    /// starts makes that start return immediately.
    pub fn stop(&self) {
        if !self.is_running() {
            debug!("light timeline not running yet");
        }
        self.stop.raise();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LightTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightTimeline")
            .field("rows", &self.timeline.len())
            .field("running", &self.is_running())
            .finish()
    }
}
