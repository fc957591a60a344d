use crate::{frames::Frame, Result};

/// Rendering backend for video frames. `show` returns once the frame has been
/// handed to the hardware; the playback loop measures this call's latency and
/// subtracts it from the frame delay.
pub trait DisplaySink: Send + Sync {
    fn show(&self, frame: &Frame) -> Result<()>;
}
