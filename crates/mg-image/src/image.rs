use mg_transport::{Communicator, Completion, Purpose, Rank, RequestId, RequestSet};

use crate::color::Color;
use crate::dense::{DenseImage, DensePayload};
use crate::error::ImageError;
use crate::region::Region;
use crate::sparse::{BackgroundTemplate, SparseImage};
use crate::viewport::Viewport;
use crate::wire::{self, Header};

/// The sealed set of image variants (§9 "virtual dispatch"): every
/// scheduler-visible operation (blend, window, copy-subrange, send,
/// receive) is implemented once per variant here rather than through a
/// trait object, since the set of shapes an Image can take is closed.
#[derive(Clone)]
pub enum Image {
    Dense(DenseImage),
    Sparse(SparseImage),
}

/// What shape of image a receiver expects, decided by the scheduler from
/// its own partition math rather than discovered on the wire. The two
/// sides of a transfer already agree on this out of band, same as the
/// region/width/height a `recv` call is given.
#[derive(Clone, Copy, Debug)]
pub enum ImageShape {
    Dense { color_only: bool },
    Sparse { color_only: bool },
}

impl Image {
    pub fn create_new(width: u32, height: u32, region: Region, viewport: Viewport, color_only: bool) -> Image {
        Image::Dense(DenseImage::create_new(width, height, region, viewport, color_only))
    }

    pub fn is_color_only(&self) -> bool {
        match self {
            Image::Dense(d) => d.is_color_only(),
            Image::Sparse(s) => s.is_color_only(),
        }
    }

    pub fn blend_is_order_dependent(&self) -> bool {
        self.is_color_only()
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Image::Dense(d) => d.variant_name(),
            Image::Sparse(s) => s.variant_name(),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Image::Dense(d) => d.width,
            Image::Sparse(s) => s.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Image::Dense(d) => d.height,
            Image::Sparse(s) => s.height,
        }
    }

    pub fn region(&self) -> Region {
        match self {
            Image::Dense(d) => d.region,
            Image::Sparse(s) => s.region,
        }
    }

    pub fn viewport(&self) -> Viewport {
        match self {
            Image::Dense(d) => d.viewport,
            Image::Sparse(s) => s.viewport,
        }
    }

    pub fn number_of_pixels(&self) -> usize {
        self.region().len()
    }

    /// The shape a peer would need to declare to `irecv` this image.
    pub fn shape(&self) -> ImageShape {
        match self {
            Image::Dense(d) => ImageShape::Dense { color_only: d.is_color_only() },
            Image::Sparse(s) => ImageShape::Sparse { color_only: s.is_color_only() },
        }
    }

    pub fn clear_dense(&mut self, color: Color, depth: f32) {
        match self {
            Image::Dense(d) => d.clear(color, depth),
            Image::Sparse(_) => panic!("clear_dense called on a sparse image; use clear_sparse"),
        }
    }

    pub fn clear_sparse(&mut self, background: BackgroundTemplate) {
        match self {
            Image::Sparse(s) => s.clear(background),
            Image::Dense(_) => panic!("clear_sparse called on a dense image; use clear_dense"),
        }
    }

    pub fn window(&self, a: usize, b: usize) -> Image {
        match self {
            Image::Dense(d) => Image::Dense(d.window(a, b)),
            Image::Sparse(s) => Image::Sparse(s.window(a, b)),
        }
    }

    pub fn copy_subrange(&self, a: usize, b: usize) -> Image {
        match self {
            Image::Dense(d) => Image::Dense(d.copy_subrange(a, b)),
            Image::Sparse(s) => Image::Sparse(s.copy_subrange(a, b)),
        }
    }

    /// Dispatches to same-kind blend. A dense/sparse mismatch is a
    /// scheduler bug (schedulers always know which shape both operands of
    /// a blend have) and is reported the same way a color/depth mismatch
    /// within one kind is.
    pub fn blend(&self, other: &Image) -> Result<Image, ImageError> {
        match (self, other) {
            (Image::Dense(a), Image::Dense(b)) => a.blend(b).map(Image::Dense),
            (Image::Sparse(a), Image::Sparse(b)) => a.blend(b).map(Image::Sparse),
            _ => Err(ImageError::BlendTypeMismatch { left: self.variant_name(), right: other.variant_name() }),
        }
    }

    pub fn compress(&self, background: BackgroundTemplate) -> Image {
        match self {
            Image::Dense(d) => Image::Sparse(SparseImage::compress(d, background)),
            Image::Sparse(_) => self.clone(),
        }
    }

    pub fn uncompress(&self) -> Image {
        match self {
            Image::Sparse(s) => Image::Dense(s.uncompress()),
            Image::Dense(_) => self.clone(),
        }
    }

    /// Posts every sub-message a send of this image requires, in the fixed
    /// order a matching `irecv` expects.
    pub fn isend(&self, comm: &dyn Communicator, dest: Rank, requests: &mut RequestSet) {
        let header = Header::of(self.width(), self.height(), self.region(), self.viewport());
        requests.push(comm.isend(dest, Purpose::Metadata, header.encode()));
        match self {
            Image::Dense(d) => {
                for (purpose, bytes) in
                    [Purpose::Color, Purpose::Depth].into_iter().zip(wire::encode_dense_payload(d))
                {
                    requests.push(comm.isend(dest, purpose, bytes));
                }
            }
            Image::Sparse(s) => {
                let (background, run_lengths, dense) = wire::encode_sparse_payload(s);
                requests.push(comm.isend(dest, Purpose::Background, background));
                requests.push(comm.isend(dest, Purpose::RunLengths, run_lengths));
                for (purpose, bytes) in [Purpose::Color, Purpose::Depth].into_iter().zip(dense) {
                    requests.push(comm.isend(dest, purpose, bytes));
                }
            }
        }
    }

    pub fn send(&self, comm: &dyn Communicator, dest: Rank) {
        log::trace!("sending {} region {:?} to rank {dest}", self.variant_name(), self.region());
        let mut requests = RequestSet::new();
        self.isend(comm, dest, &mut requests);
        requests.wait_all(comm);
    }

    /// Posts receives for every sub-message `shape` implies, pre-sized per
    /// the resource policy (§5): dense buffers to `region.len()`, sparse
    /// run-lengths to `(pixels/2)+1`, sparse active storage to `pixels`.
    pub fn irecv(
        comm: &dyn Communicator,
        src: Rank,
        width: u32,
        height: u32,
        region: Region,
        viewport: Viewport,
        shape: ImageShape,
    ) -> PendingImage {
        let pixels = region.len();
        let metadata = comm.irecv(src, Purpose::Metadata, Header::ENCODED_LEN);
        let mut ids = vec![metadata];
        match shape {
            ImageShape::Dense { color_only } => {
                ids.push(comm.irecv(src, Purpose::Color, pixels * 4));
                if !color_only {
                    ids.push(comm.irecv(src, Purpose::Depth, pixels * 4));
                }
            }
            ImageShape::Sparse { color_only } => {
                let background_len = if color_only { 4 } else { 8 };
                ids.push(comm.irecv(src, Purpose::Background, background_len));
                ids.push(comm.irecv(src, Purpose::RunLengths, (pixels / 2 + 1) * 8));
                ids.push(comm.irecv(src, Purpose::Color, pixels * 4));
                if !color_only {
                    ids.push(comm.irecv(src, Purpose::Depth, pixels * 4));
                }
            }
        }
        PendingImage { shape, width, height, region, viewport, ids }
    }

    pub fn finish_recv(pending: PendingImage, comm: &dyn Communicator) -> Image {
        let bytes: Vec<Vec<u8>> = pending.ids.iter().map(|&id| comm.wait(id).into_bytes()).collect();
        Self::decode_received(pending.shape, pending.region, bytes)
    }

    /// Like [`finish_recv`], but for the completion-driven reception loops
    /// of §4.4/§4.5: the caller already consumed [`PendingImage::final_id`]
    /// via `wait_any` (that's what makes it suitable for racing against
    /// other pending images), so its bytes are supplied directly instead of
    /// being waited on a second time. The remaining sub-messages are waited
    /// on normally; per §5, their completion is not otherwise guaranteed
    /// until this call.
    pub fn finish_recv_after_wait_any(
        pending: PendingImage,
        comm: &dyn Communicator,
        final_completion: Completion,
    ) -> Image {
        let (rest, last) = pending.ids.split_at(pending.ids.len() - 1);
        debug_assert_eq!(last.len(), 1);
        let mut bytes: Vec<Vec<u8>> = rest.iter().map(|&id| comm.wait(id).into_bytes()).collect();
        bytes.push(final_completion.into_bytes());
        Self::decode_received(pending.shape, pending.region, bytes)
    }

    fn decode_received(shape: ImageShape, expected_region: Region, mut bytes: Vec<Vec<u8>>) -> Image {
        let header = Header::decode(&bytes[0]);
        debug_assert_eq!(header.region(), expected_region, "received metadata disagrees with expected region");
        bytes.remove(0);
        match shape {
            ImageShape::Dense { color_only } => {
                let color = bytes.remove(0);
                let depth = if color_only { None } else { Some(bytes.remove(0)) };
                Image::Dense(wire::decode_dense_payload(header, color_only, &color, depth.as_deref()))
            }
            ImageShape::Sparse { color_only } => {
                let background = bytes.remove(0);
                let run_lengths = bytes.remove(0);
                let color = bytes.remove(0);
                let depth = if color_only { None } else { Some(bytes.remove(0)) };
                Image::Sparse(wire::decode_sparse_payload(
                    header,
                    color_only,
                    &background,
                    &run_lengths,
                    &color,
                    depth.as_deref(),
                ))
            }
        }
    }

    pub fn recv(
        comm: &dyn Communicator,
        src: Rank,
        width: u32,
        height: u32,
        region: Region,
        viewport: Viewport,
        shape: ImageShape,
    ) -> Image {
        let pending = Image::irecv(comm, src, width, height, region, viewport, shape);
        let image = Image::finish_recv(pending, comm);
        log::trace!("received {} region {:?} from rank {src}", image.variant_name(), image.region());
        image
    }

    fn encode_self_describing(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let tag: u8 = match self {
            Image::Dense(d) if d.is_color_only() => 0,
            Image::Dense(_) => 1,
            Image::Sparse(s) if s.is_color_only() => 2,
            Image::Sparse(_) => 3,
        };
        buf.push(tag);
        let header = Header::of(self.width(), self.height(), self.region(), self.viewport());
        buf.extend_from_slice(&header.encode());
        match self {
            Image::Dense(d) => {
                buf.extend_from_slice(&wire::encode_colors(d.colors()));
                if let Some(depths) = d.depths() {
                    buf.extend_from_slice(&wire::encode_depths(depths));
                }
            }
            Image::Sparse(s) => {
                let (background, run_lengths, dense) = wire::encode_sparse_payload(s);
                buf.extend_from_slice(&background);
                buf.extend_from_slice(&(s.run_count() as u32).to_le_bytes());
                buf.extend_from_slice(&(s.number_of_active_pixels() as u32).to_le_bytes());
                buf.extend_from_slice(&run_lengths);
                for part in dense {
                    buf.extend_from_slice(&part);
                }
            }
        }
        buf
    }

    fn decode_self_describing(bytes: &[u8]) -> Image {
        let tag = bytes[0];
        let mut at = 1;
        let header = Header::decode(&bytes[at..at + Header::ENCODED_LEN]);
        at += Header::ENCODED_LEN;
        let region = header.region();
        let pixels = region.len();
        match tag {
            0 | 1 => {
                let color_only = tag == 0;
                let colors = wire::decode_colors(&bytes[at..at + pixels * 4]);
                at += pixels * 4;
                let depths = if color_only {
                    None
                } else {
                    let d = wire::decode_depths(&bytes[at..at + pixels * 4]);
                    Some(d)
                };
                let payload = match depths {
                    Some(depths) => DensePayload::ColorDepth {
                        colors: crate::storage::DenseBuffer::from_vec(colors),
                        depths: crate::storage::DenseBuffer::from_vec(depths),
                    },
                    None => DensePayload::ColorOnly { colors: crate::storage::DenseBuffer::from_vec(colors) },
                };
                Image::Dense(DenseImage {
                    width: header.width as u32,
                    height: header.height as u32,
                    region,
                    viewport: header.viewport,
                    payload,
                })
            }
            2 | 3 => {
                let color_only = tag == 2;
                let background_len = if color_only { 4 } else { 8 };
                let background_bytes = &bytes[at..at + background_len];
                let background = if color_only {
                    BackgroundTemplate::ColorOnly(wire::decode_colors(&background_bytes[..4])[0])
                } else {
                    let c = wire::decode_colors(&background_bytes[..4])[0];
                    let d = wire::decode_depths(&background_bytes[4..8])[0];
                    BackgroundTemplate::ColorDepth(c, d)
                };
                at += background_len;
                let run_count = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
                at += 4;
                let active_count = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
                at += 4;
                let run_lengths = wire::decode_run_lengths(&bytes[at..at + run_count * 8]);
                at += run_count * 8;
                let active_colors = wire::decode_colors(&bytes[at..at + active_count * 4]);
                at += active_count * 4;
                let active_depths = if color_only {
                    None
                } else {
                    Some(wire::decode_depths(&bytes[at..at + active_count * 4]))
                };

                let mut image = SparseImage::preallocate_for_receive(
                    header.width as u32,
                    header.height as u32,
                    region,
                    header.viewport,
                    background,
                );
                image.runs_mut(run_count).copy_from_slice(&run_lengths);
                image.active_colors_mut(active_count).copy_from_slice(&active_colors);
                if let Some(depths) = &active_depths {
                    image.active_depths_mut(active_count).copy_from_slice(depths);
                }
                image.set_counts(run_count, active_count);
                image.shrink();
                Image::Sparse(image)
            }
            other => panic!("unknown Image wire tag {other}"),
        }
    }

    /// Collective: every participant must call this (§5 "Collectives").
    /// Each participant's own image is shipped to `root` and the pieces
    /// (which form a partition of `[0, W*H)` by construction, §8 invariant
    /// 8) are assembled in region order into one full dense image.
    /// Non-root participants receive `None`.
    pub fn gather(&self, comm: &dyn Communicator, root: Rank) -> Option<Image> {
        let payload = self.encode_self_describing();
        let gathered = comm.gather_bytes(root, payload)?;
        let mut pieces: Vec<Image> = gathered.iter().map(|bytes| Image::decode_self_describing(bytes)).collect();
        pieces.sort_by_key(|img| img.region().begin);

        let total_pixels = pieces.iter().map(|p| p.number_of_pixels()).sum::<usize>();
        let width = pieces[0].width();
        let height = pieces[0].height();
        let color_only = pieces[0].is_color_only();
        let mut colors = vec![Color::default(); total_pixels];
        let mut depths = if color_only { None } else { Some(vec![f32::INFINITY; total_pixels]) };
        for piece in &pieces {
            let dense = piece.uncompress();
            let dense = match &dense {
                Image::Dense(d) => d,
                Image::Sparse(_) => unreachable!("uncompress always yields Dense"),
            };
            let region = dense.region;
            colors[region.begin..region.end].copy_from_slice(dense.colors());
            if let (Some(out), Some(src)) = (depths.as_mut(), dense.depths()) {
                out[region.begin..region.end].copy_from_slice(src);
            }
        }
        let payload = match depths {
            Some(depths) => DensePayload::ColorDepth {
                colors: crate::storage::DenseBuffer::from_vec(colors),
                depths: crate::storage::DenseBuffer::from_vec(depths),
            },
            None => DensePayload::ColorOnly { colors: crate::storage::DenseBuffer::from_vec(colors) },
        };
        log::debug!("gather at rank {root} assembled {total_pixels} pixels from {} pieces", pieces.len());
        Some(Image::Dense(DenseImage {
            width,
            height,
            region: Region::new(0, total_pixels),
            viewport: pieces.iter().map(|p| p.viewport()).reduce(Viewport::union).unwrap_or_else(Viewport::empty),
            payload,
        }))
    }
}

/// A posted-but-not-yet-complete receive of one image's sub-messages.
/// `final_id` returns the *last* id, not the first (see below); that id is
/// suitable for `wait_any` against other pending images: a scheduler's
/// primary reception loop waits on one handle per pending image, and the
/// remaining sub-messages for that peer complete essentially immediately
/// once the first does, since one participant's sends to another arrive in
/// post order.
pub struct PendingImage {
    shape: ImageShape,
    width: u32,
    height: u32,
    region: Region,
    viewport: Viewport,
    ids: Vec<RequestId>,
}

impl PendingImage {
    /// The handle to wait on to learn this image has (essentially) arrived.
    pub fn final_id(&self) -> RequestId {
        *self.ids.last().expect("PendingImage always posts at least a metadata receive")
    }

    pub fn region(&self) -> Region {
        self.region
    }
}
