use thiserror::Error;

/// Errors surfaced by the segmentation stages.
///
/// A failing stage never aborts the process: callers skip the frame and keep
/// the last good output.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Frame, mask or buffer dimensions do not line up
    #[error("{what}: expected {expected:?}, got {actual:?}")]
    InputShapeMismatch {
        what: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// An operation was requested before the model it depends on was built
    #[error("{0} has not been computed yet")]
    UninitializedModel(&'static str),

    /// A training mask selected no pixel
    #[error("{0} selects no pixel")]
    EmptyRegion(&'static str),

    /// The min-cut oracle reported an error
    #[error("min-cut oracle failed: {0}")]
    Oracle(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SegmentError>;

impl SegmentError {
    pub(crate) fn shape(what: &'static str, expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::InputShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}
