use super::LabelSink;
use anyhow::{Context, Result};
use depthmatte::{ColorFrame, Mask};
use image::Rgb;
use std::path::{Path, PathBuf};

/// Writes `label_NNNN.png` per frame, plus `matte_NNNN.png` (the color
/// frame with background pixels blacked out) when compositing is on.
pub struct PngSink {
    dir: PathBuf,
    composite: bool,
}

impl PngSink {
    pub fn new<P: AsRef<Path>>(dir: P, composite: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        tracing::info!("Writing labels to {}", dir.display());
        Ok(Self { dir, composite })
    }

    fn composite(labels: &Mask, color: &ColorFrame) -> ColorFrame {
        ColorFrame::from_fn(color.width(), color.height(), |x, y| {
            if labels.get_pixel(x, y)[0] != 0 {
                *color.get_pixel(x, y)
            } else {
                Rgb([0, 0, 0])
            }
        })
    }
}

impl LabelSink for PngSink {
    fn write_labels(&mut self, frame: u64, labels: &Mask, color: &ColorFrame) -> Result<()> {
        let path = self.dir.join(format!("label_{frame:04}.png"));
        labels
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        if self.composite && labels.dimensions() == color.dimensions() {
            let path = self.dir.join(format!("matte_{frame:04}.png"));
            Self::composite(labels, color)
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }
}
