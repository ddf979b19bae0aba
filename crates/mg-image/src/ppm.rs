//! PPM output (§6.1 "PPM writer"): out of scope as a file-writing
//! collaborator, but the encoding itself is a handful of lines over a
//! dense [`Image`] and is provided here so a driver doesn't have to
//! re-derive the byte layout. Grounded on
//! `original_source/Common/SavePPM.cpp`'s `SavePPM`.

use crate::dense::DenseImage;

/// Encodes `image` as a binary PPM (`P6`) buffer: header `P6\nW H\n255\n`,
/// then `H*W*3` bytes, row-major, top row first (`y` from `H-1` down to
/// `0`, `x` from `0` to `W-1`), one `R,G,B` triple per pixel. The image's
/// region must cover the full frame; a driver wanting to save a partition
/// first reassembles it via [`crate::Image::gather`].
pub fn encode_ppm(image: &DenseImage) -> Vec<u8> {
    let width = image.width as usize;
    let height = image.height as usize;
    assert_eq!(
        image.region.len(),
        width * height,
        "encode_ppm requires a full-frame image; gather a partitioned result first"
    );
    let colors = image.colors();
    let mut buf = format!("P6\n{width} {height}\n255\n").into_bytes();
    buf.reserve(height * width * 3);
    for y in (0..height).rev() {
        for x in 0..width {
            let color = colors[y * width + x];
            buf.push(color.r);
            buf.push(color.g);
            buf.push(color.b);
        }
    }
    buf
}
