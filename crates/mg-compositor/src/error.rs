use std::fmt;

use mg_image::ImageError;
use mg_transport::TransportError;

/// Scheduler-level error kinds from §7. The first three (here:
/// `GroupConstraintViolated`, `BlendTypeMismatch`, `BlendRegionGap` via
/// `Image`) represent programmer/configuration faults and are fatal;
/// there is no local recovery. `PartitionOutOfRange` is a `getPieceRange`
/// argument-check failure.
#[derive(Debug)]
pub enum CompositeError {
    GroupConstraintViolated { detail: &'static str },
    PartitionOutOfRange { index: usize, count: usize },
    Image(ImageError),
    Transport(TransportError),
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeError::GroupConstraintViolated { detail } => {
                write!(f, "group constraint violated: {detail}")
            }
            CompositeError::PartitionOutOfRange { index, count } => {
                write!(f, "partition index {index} out of range for {count} pieces")
            }
            CompositeError::Image(e) => write!(f, "{e}"),
            CompositeError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompositeError {}

impl From<ImageError> for CompositeError {
    fn from(e: ImageError) -> Self {
        CompositeError::Image(e)
    }
}

impl From<TransportError> for CompositeError {
    fn from(e: TransportError) -> Self {
        CompositeError::Transport(e)
    }
}
