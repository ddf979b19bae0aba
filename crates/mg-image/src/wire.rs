//! §6.2 wire format: a fixed-layout header followed by tagged payload
//! records. Byte order is little-endian throughout; every scalar is either
//! an `i32` or an 8-bit color component, matching the header's own "signed
//! 32-bit integers" fields so a single reader can walk both.

use crate::color::Color;
use crate::dense::{DenseImage, DensePayload};
use crate::region::Region;
use crate::sparse::{BackgroundTemplate, RunLength, SparseImage};
use crate::storage::DenseBuffer;
use crate::viewport::Viewport;

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_i32(bytes: &[u8], at: &mut usize) -> i32 {
    let v = i32::from_le_bytes(bytes[*at..*at + 4].try_into().unwrap());
    *at += 4;
    v
}

/// The fixed header every image transfer opens with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub width: i32,
    pub height: i32,
    pub region_begin: i32,
    pub region_end: i32,
    pub viewport: Viewport,
}

impl Header {
    pub const ENCODED_LEN: usize = 4 * 8;

    pub fn of(width: u32, height: u32, region: Region, viewport: Viewport) -> Self {
        Header {
            width: width as i32,
            height: height as i32,
            region_begin: region.begin as i32,
            region_end: region.end as i32,
            viewport,
        }
    }

    pub fn region(&self) -> Region {
        Region::new(self.region_begin as usize, self.region_end as usize)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        push_i32(&mut buf, self.width);
        push_i32(&mut buf, self.height);
        push_i32(&mut buf, self.region_begin);
        push_i32(&mut buf, self.region_end);
        push_i32(&mut buf, self.viewport.min_x);
        push_i32(&mut buf, self.viewport.min_y);
        push_i32(&mut buf, self.viewport.max_x);
        push_i32(&mut buf, self.viewport.max_y);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), Self::ENCODED_LEN, "header record has wrong length");
        let mut at = 0;
        let width = read_i32(bytes, &mut at);
        let height = read_i32(bytes, &mut at);
        let region_begin = read_i32(bytes, &mut at);
        let region_end = read_i32(bytes, &mut at);
        let min_x = read_i32(bytes, &mut at);
        let min_y = read_i32(bytes, &mut at);
        let max_x = read_i32(bytes, &mut at);
        let max_y = read_i32(bytes, &mut at);
        Header {
            width,
            height,
            region_begin,
            region_end,
            viewport: Viewport { min_x, min_y, max_x, max_y },
        }
    }
}

pub fn encode_colors(colors: &[Color]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(colors.len() * 4);
    for c in colors {
        buf.extend_from_slice(&[c.r, c.g, c.b, c.a]);
    }
    buf
}

pub fn decode_colors(bytes: &[u8]) -> Vec<Color> {
    bytes.chunks_exact(4).map(|c| Color::rgba(c[0], c[1], c[2], c[3])).collect()
}

pub fn encode_depths(depths: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(depths.len() * 4);
    for d in depths {
        buf.extend_from_slice(&d.to_le_bytes());
    }
    buf
}

pub fn decode_depths(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect()
}

pub fn encode_run_lengths(runs: &[RunLength]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(runs.len() * 8);
    for r in runs {
        push_i32(&mut buf, r.background as i32);
        push_i32(&mut buf, r.foreground as i32);
    }
    buf
}

pub fn decode_run_lengths(bytes: &[u8]) -> Vec<RunLength> {
    let mut out = Vec::with_capacity(bytes.len() / 8);
    let mut at = 0;
    while at < bytes.len() {
        let background = read_i32(bytes, &mut at) as u32;
        let foreground = read_i32(bytes, &mut at) as u32;
        out.push(RunLength { background, foreground });
    }
    out
}

/// Encodes a dense image's payload messages (color-only: one; color+depth:
/// two), in the order a receiver expects them tagged.
pub fn encode_dense_payload(image: &DenseImage) -> Vec<Vec<u8>> {
    match image.depths() {
        Some(depths) => vec![encode_colors(image.colors()), encode_depths(depths)],
        None => vec![encode_colors(image.colors())],
    }
}

pub fn decode_dense_payload(
    header: Header,
    color_only: bool,
    color_bytes: &[u8],
    depth_bytes: Option<&[u8]>,
) -> DenseImage {
    let region = header.region();
    let payload = if color_only {
        DensePayload::ColorOnly { colors: DenseBuffer::from_vec(decode_colors(color_bytes)) }
    } else {
        DensePayload::ColorDepth {
            colors: DenseBuffer::from_vec(decode_colors(color_bytes)),
            depths: DenseBuffer::from_vec(decode_depths(depth_bytes.expect("color+depth payload needs a depth record"))),
        }
    };
    DenseImage {
        width: header.width as u32,
        height: header.height as u32,
        region,
        viewport: header.viewport,
        payload,
    }
}

/// Encodes a sparse image: background record, then run-lengths, then the
/// (already-shrunk) dense active-pixel payload. The sender must call
/// [`SparseImage::shrink`] before this so only the needed elements go out
/// (§5 resource policy; §8 Sc-5 measures exactly this).
pub fn encode_sparse_payload(image: &SparseImage) -> (Vec<u8>, Vec<u8>, Vec<Vec<u8>>) {
    let background = match image.background {
        BackgroundTemplate::ColorOnly(c) => encode_colors(&[c]),
        BackgroundTemplate::ColorDepth(c, d) => {
            let mut buf = encode_colors(&[c]);
            buf.extend_from_slice(&encode_depths(&[d]));
            buf
        }
    };
    let run_lengths = encode_run_lengths(image.runs());
    let dense = match image.active_depths() {
        Some(depths) => vec![encode_colors(image.active_colors()), encode_depths(depths)],
        None => vec![encode_colors(image.active_colors())],
    };
    (background, run_lengths, dense)
}

pub fn decode_sparse_payload(
    header: Header,
    color_only: bool,
    background_bytes: &[u8],
    run_length_bytes: &[u8],
    color_bytes: &[u8],
    depth_bytes: Option<&[u8]>,
) -> SparseImage {
    let region = header.region();
    let background = if color_only {
        BackgroundTemplate::ColorOnly(decode_colors(&background_bytes[..4])[0])
    } else {
        let c = decode_colors(&background_bytes[..4])[0];
        let d = decode_depths(&background_bytes[4..8])[0];
        BackgroundTemplate::ColorDepth(c, d)
    };
    let runs = decode_run_lengths(run_length_bytes);
    let active_colors = decode_colors(color_bytes);
    let active_depths = depth_bytes.map(decode_depths);
    let run_count = runs.len();
    let active_count = active_colors.len();

    let mut image = SparseImage::preallocate_for_receive(
        header.width as u32,
        header.height as u32,
        region,
        header.viewport,
        background,
    );
    image.runs_mut(run_count).copy_from_slice(&runs);
    image.active_colors_mut(active_count).copy_from_slice(&active_colors);
    if let Some(depths) = &active_depths {
        image.active_depths_mut(active_count).copy_from_slice(depths);
    }
    image.set_counts(run_count, active_count);
    image.shrink();
    image
}
