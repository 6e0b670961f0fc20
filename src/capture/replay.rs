use super::FrameSource;
use anyhow::{bail, Context, Result};
use depthmatte::{ColorFrame, DepthFrame};
use std::path::{Path, PathBuf};

/// Replays a recorded session: `depth_NNNN.png` (16-bit grayscale) paired
/// with `color_NNNN.png` (RGB), in frame-number order.
pub struct DirectorySource {
    frames: Vec<(PathBuf, PathBuf)>,
    next: usize,
    width: u32,
    height: u32,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("Scanning {} for recorded frames", dir.display());

        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let path = entry?.path();
            let Some(number) = frame_number(&path, "depth_") else {
                continue;
            };
            let color = dir.join(format!("color_{number}.png"));
            if color.exists() {
                frames.push((number, path, color));
            } else {
                tracing::warn!("No color frame for {}, skipping", path.display());
            }
        }
        if frames.is_empty() {
            bail!("No depth_*.png / color_*.png pairs in {}", dir.display());
        }
        frames.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        let (width, height) = image::image_dimensions(&frames[0].1)
            .with_context(|| format!("Failed to read {}", frames[0].1.display()))?;
        Ok(Self {
            frames: frames.into_iter().map(|(_, depth, color)| (depth, color)).collect(),
            next: 0,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

/// The `NNNN` of `<prefix>NNNN.png`
fn frame_number(path: &Path, prefix: &str) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let number = name.strip_prefix(prefix)?.strip_suffix(".png")?;
    (!number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())).then(|| number.to_string())
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<(DepthFrame, ColorFrame)>> {
        let Some((depth_path, color_path)) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let depth = image::open(depth_path)
            .with_context(|| format!("Failed to decode {}", depth_path.display()))?
            .into_luma16();
        let color = image::open(color_path)
            .with_context(|| format!("Failed to decode {}", color_path.display()))?
            .into_rgb8();

        Ok(Some((depth, color)))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn record(dir: &Path, number: &str, depth: u16) {
        DepthFrame::from_pixel(4, 3, Luma([depth]))
            .save(dir.join(format!("depth_{number}.png")))
            .unwrap();
        ColorFrame::from_pixel(4, 3, Rgb([1, 2, 3]))
            .save(dir.join(format!("color_{number}.png")))
            .unwrap();
    }

    #[test]
    fn replays_pairs_in_frame_order() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "10", 1010);
        record(dir.path(), "2", 1002);
        record(dir.path(), "9", 1009);
        // unpaired depth frame
        DepthFrame::new(4, 3).save(dir.path().join("depth_11.png")).unwrap();

        let mut source = DirectorySource::new(dir.path()).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.resolution(), (4, 3));

        let mut depths = Vec::new();
        while let Some((depth, color)) = source.next_frame().unwrap() {
            assert_eq!(color.get_pixel(0, 0), &Rgb([1, 2, 3]));
            depths.push(depth.get_pixel(0, 0)[0]);
        }
        assert_eq!(depths, vec![1002, 1009, 1010]);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySource::new(dir.path()).is_err());
    }

    #[test]
    fn frame_numbers_must_be_digits() {
        assert_eq!(frame_number(Path::new("/a/depth_0042.png"), "depth_").as_deref(), Some("0042"));
        assert_eq!(frame_number(Path::new("depth_x1.png"), "depth_"), None);
        assert_eq!(frame_number(Path::new("color_0001.png"), "depth_"), None);
    }
}
