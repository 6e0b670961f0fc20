//! Real-time foreground extraction from an aligned depth + color sensor.
//!
//! Depth background subtraction gives a rough trimap, the largest
//! foreground components become seeds, Gaussian mixture color models of
//! each seed's certain regions price the uncertain band, and a min-cut over
//! those costs produces the final labels.

pub mod color;
pub mod config;
pub mod depth;
pub mod error;
pub mod frame;
pub mod graph;
pub mod morphology;
pub mod pipeline;
pub mod seed;

pub use config::{load_config, SegmenterConfig};
pub use error::{Result, SegmentError};
pub use frame::{BoundingBox, ColorFrame, DepthFrame, Mask, Trimap};
pub use pipeline::{FrameReport, Phase, Segmenter, StageTimings};
