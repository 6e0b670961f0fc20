mod background;
mod noise;

pub use background::{BackgroundModel, BackgroundReference, BackgroundState, ReferenceDepth};
pub use noise::{DepthNoiseModel, NoiseTable, NOISE_TABLE_SIZE};
