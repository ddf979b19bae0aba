use rayon::prelude::*;

use crate::color::Color;
use crate::error::ImageError;
use crate::region::{union_or_gap, Region};
use crate::storage::DenseBuffer;
use crate::viewport::Viewport;

/// The pixel payload of a dense image, in either of the two color
/// disciplines (§3.1).
#[derive(Clone)]
pub enum DensePayload {
    ColorOnly { colors: DenseBuffer<Color> },
    ColorDepth { colors: DenseBuffer<Color>, depths: DenseBuffer<f32> },
}

/// A dense, fully-populated raster sub-region. See `SparseImage` for the
/// run-length-compressed wrapper over the same two color disciplines.
#[derive(Clone)]
pub struct DenseImage {
    pub width: u32,
    pub height: u32,
    pub region: Region,
    pub viewport: Viewport,
    pub payload: DensePayload,
}

impl DenseImage {
    pub fn create_new(width: u32, height: u32, region: Region, viewport: Viewport, color_only: bool) -> Self {
        let len = region.len();
        let payload = if color_only {
            DensePayload::ColorOnly { colors: DenseBuffer::from_vec(vec![Color::default(); len]) }
        } else {
            DensePayload::ColorDepth {
                colors: DenseBuffer::from_vec(vec![Color::default(); len]),
                depths: DenseBuffer::from_vec(vec![f32::INFINITY; len]),
            }
        };
        DenseImage { width, height, region, viewport, payload }
    }

    pub fn is_color_only(&self) -> bool {
        matches!(self.payload, DensePayload::ColorOnly { .. })
    }

    pub fn blend_is_order_dependent(&self) -> bool {
        self.is_color_only()
    }

    pub fn variant_name(&self) -> &'static str {
        if self.is_color_only() { "dense-color-only" } else { "dense-color-depth" }
    }

    /// Sets every pixel to `color` (and, for color+depth images, `depth`).
    pub fn clear(&mut self, color: Color, depth: f32) {
        let len = self.region.len();
        match &mut self.payload {
            DensePayload::ColorOnly { colors } => colors.make_mut(len).fill(color),
            DensePayload::ColorDepth { colors, depths } => {
                colors.make_mut(len).fill(color);
                depths.make_mut(len).fill(depth);
            }
        }
    }

    pub fn window(&self, a: usize, b: usize) -> DenseImage {
        assert!(a <= b && b <= self.region.len(), "window [{a},{b}) out of bounds for region of length {}", self.region.len());
        let region = Region::new(self.region.begin + a, self.region.begin + b);
        let payload = match &self.payload {
            DensePayload::ColorOnly { colors } => DensePayload::ColorOnly { colors: colors.window(a) },
            DensePayload::ColorDepth { colors, depths } => {
                DensePayload::ColorDepth { colors: colors.window(a), depths: depths.window(a) }
            }
        };
        DenseImage { width: self.width, height: self.height, region, viewport: self.viewport, payload }
    }

    pub fn copy_subrange(&self, a: usize, b: usize) -> DenseImage {
        assert!(a <= b && b <= self.region.len());
        let len = b - a;
        let region = Region::new(self.region.begin + a, self.region.begin + b);
        let payload = match &self.payload {
            DensePayload::ColorOnly { colors } => {
                DensePayload::ColorOnly { colors: colors.window(a).copy_subrange(len) }
            }
            DensePayload::ColorDepth { colors, depths } => DensePayload::ColorDepth {
                colors: colors.window(a).copy_subrange(len),
                depths: depths.window(a).copy_subrange(len),
            },
        };
        DenseImage { width: self.width, height: self.height, region, viewport: self.viewport, payload }
    }

    /// `self` is "top" for color-only ("over") blends.
    pub fn blend(&self, other: &DenseImage) -> Result<DenseImage, ImageError> {
        match (&self.payload, &other.payload) {
            (DensePayload::ColorOnly { colors: top }, DensePayload::ColorOnly { colors: bottom }) => {
                if self.region != other.region {
                    return Err(ImageError::BlendRegionGap {
                        left_end: self.region.end,
                        right_begin: other.region.begin,
                    });
                }
                let len = self.region.len();
                let top = top.as_slice(len);
                let bottom = bottom.as_slice(len);
                let colors: Vec<Color> = (0..len).into_par_iter().map(|i| top[i].over(bottom[i])).collect();
                Ok(DenseImage {
                    width: self.width,
                    height: self.height,
                    region: self.region,
                    viewport: self.viewport.union(other.viewport),
                    payload: DensePayload::ColorOnly { colors: DenseBuffer::from_vec(colors) },
                })
            }
            (
                DensePayload::ColorDepth { colors: sc, depths: sd },
                DensePayload::ColorDepth { colors: oc, depths: od },
            ) => {
                let union = union_or_gap(self.region, other.region)?;
                let self_len = self.region.len();
                let other_len = other.region.len();
                let sc = sc.as_slice(self_len);
                let sd = sd.as_slice(self_len);
                let oc = oc.as_slice(other_len);
                let od = od.as_slice(other_len);
                let results: Vec<(Color, f32)> = (0..union.len())
                    .into_par_iter()
                    .map(|offset| {
                        let idx = union.begin + offset;
                        let self_i = idx
                            .checked_sub(self.region.begin)
                            .filter(|&i| i < self_len);
                        let other_i = idx
                            .checked_sub(other.region.begin)
                            .filter(|&i| i < other_len);
                        match (self_i, other_i) {
                            (Some(si), Some(oi)) => {
                                if sd[si] <= od[oi] { (sc[si], sd[si]) } else { (oc[oi], od[oi]) }
                            }
                            (Some(si), None) => (sc[si], sd[si]),
                            (None, Some(oi)) => (oc[oi], od[oi]),
                            (None, None) => unreachable!("union pixel must be covered by an operand"),
                        }
                    })
                    .collect();
                let (colors, depths): (Vec<Color>, Vec<f32>) = results.into_iter().unzip();
                Ok(DenseImage {
                    width: self.width,
                    height: self.height,
                    region: union,
                    viewport: self.viewport.union(other.viewport),
                    payload: DensePayload::ColorDepth {
                        colors: DenseBuffer::from_vec(colors),
                        depths: DenseBuffer::from_vec(depths),
                    },
                })
            }
            _ => Err(ImageError::BlendTypeMismatch { left: self.variant_name(), right: other.variant_name() }),
        }
    }

    pub fn colors(&self) -> &[Color] {
        let len = self.region.len();
        match &self.payload {
            DensePayload::ColorOnly { colors } => colors.as_slice(len),
            DensePayload::ColorDepth { colors, .. } => colors.as_slice(len),
        }
    }

    pub fn depths(&self) -> Option<&[f32]> {
        let len = self.region.len();
        match &self.payload {
            DensePayload::ColorOnly { .. } => None,
            DensePayload::ColorDepth { depths, .. } => Some(depths.as_slice(len)),
        }
    }
}
