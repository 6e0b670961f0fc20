mod replay;

pub use replay::DirectorySource;

use anyhow::Result;
use depthmatte::{ColorFrame, DepthFrame};

/// Trait for aligned depth + color frame sources
pub trait FrameSource {
    /// Next frame pair, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<(DepthFrame, ColorFrame)>>;

    /// Get the resolution of the frames
    fn resolution(&self) -> (u32, u32);
}
