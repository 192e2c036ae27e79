//! Target-frame interface between the encoder core and the external image
//! conversion pipeline.

use crate::mode::VideoMode;
use crate::screen::MemoryMap;

/// One target display image: the MAIN bank, plus the AUX bank in DHGR.
#[derive(Debug, Clone)]
pub struct TargetFrame {
    pub main: MemoryMap,
    pub aux: Option<MemoryMap>,
}

impl TargetFrame {
    pub fn new(mode: VideoMode, main: MemoryMap, aux: Option<MemoryMap>) -> Self {
        debug_assert_eq!(aux.is_some(), mode == VideoMode::Dhgr);
        TargetFrame { main, aux }
    }
}

/// Lazy sequence of target display images aligned to the input video's
/// frame rate. Image conversion itself (dithering, palette mapping) happens
/// outside the core; implementations hand back ready display memory.
pub trait FrameSource {
    /// Frame rate of the input video, in frames per second.
    fn frame_rate(&self) -> f64;

    /// Next target image, or None at end of video.
    fn next_frame(&mut self) -> std::io::Result<Option<TargetFrame>>;
}
