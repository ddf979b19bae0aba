use std::fmt;

/// Image-level error kinds from §7. Both represent a programmer fault in
/// how a scheduler assembled its operands; there is no local recovery.
/// Correct scheduler code never produces `BlendRegionGap` by construction.
#[derive(Debug)]
pub enum ImageError {
    BlendTypeMismatch { left: &'static str, right: &'static str },
    BlendRegionGap { left_end: usize, right_begin: usize },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::BlendTypeMismatch { left, right } => {
                write!(f, "blend type mismatch: {left} vs {right}")
            }
            ImageError::BlendRegionGap { left_end, right_begin } => write!(
                f,
                "blend region gap: left ends at {left_end}, right begins at {right_begin}"
            ),
        }
    }
}

impl std::error::Error for ImageError {}
