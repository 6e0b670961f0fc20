mod png_sink;

pub use png_sink::PngSink;

use anyhow::Result;
use depthmatte::{ColorFrame, Mask};

/// Trait for label destinations
pub trait LabelSink {
    /// Write the labels of one frame, with the color frame they belong to
    fn write_labels(&mut self, frame: u64, labels: &Mask, color: &ColorFrame) -> Result<()>;
}
