/// A 2-D sub-rectangle of the full `width x height` frame, used only as a
/// hint about where non-empty pixels live (§3.1). Never load-bearing for
/// correctness: blend and window operate purely on the 1-D region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Viewport { min_x: 0, min_y: 0, max_x: width as i32, max_y: height as i32 }
    }

    pub fn empty() -> Self {
        Viewport { min_x: 0, min_y: 0, max_x: 0, max_y: 0 }
    }

    /// The smallest viewport containing both inputs.
    pub fn union(self, other: Viewport) -> Viewport {
        Viewport {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}
