//! The Image data model (§3.1) and its two orthogonal axes: dense vs.
//! sparse storage, color-only vs. color+depth blend discipline. Everything
//! a compositing scheduler touches (`blend`, `window`, `copySubrange`,
//! `send`/`recv`, `gather`) lives behind the [`Image`] enum in `image`;
//! the `dense` and `sparse` modules hold the two concrete payload shapes.

mod color;
mod dense;
mod error;
mod image;
mod ppm;
mod region;
mod sparse;
mod storage;
mod viewport;
mod wire;

pub use color::Color;
pub use dense::{DenseImage, DensePayload};
pub use error::ImageError;
pub use image::{Image, ImageShape, PendingImage};
pub use ppm::encode_ppm;
pub use region::Region;
pub use sparse::{BackgroundTemplate, RunLength, SparseImage};
pub use storage::DenseBuffer;
pub use viewport::Viewport;
