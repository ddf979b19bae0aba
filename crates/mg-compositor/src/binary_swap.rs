//! Binary-Swap (§4.2) and its non-power-of-two variants (§4.3).

use mg_image::{Color, DenseImage, DensePayload, DenseBuffer, Image, Region, Viewport};
use mg_transport::{Communicator, ProcessGroup, RequestSet};

use crate::error::CompositeError;
use crate::metrics::{timed, CompositeMetricsSink};
use crate::partition::piece_range;

fn floor_pow2(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    1usize << (usize::BITS - 1 - n.leading_zeros())
}

fn is_pow2(n: usize) -> bool {
    n > 0 && (n & (n - 1)) == 0
}

fn self_position(group: &ProcessGroup, comm: &dyn Communicator) -> Result<usize, CompositeError> {
    group
        .rank_of(comm.rank())
        .ok_or(CompositeError::GroupConstraintViolated { detail: "caller is not a member of its own group" })
}

/// One swap-and-blend round between `my_pos` and its adjacent partner
/// `my_pos ^ 1` within `group` (§4.2 steps 1-5), plus the next round's
/// sub-group (step 6). Shared by the base algorithm and every variant's
/// post-prelude descent.
fn one_round(
    image: Image,
    group: &ProcessGroup,
    my_pos: usize,
    comm: &dyn Communicator,
) -> Result<(Image, ProcessGroup, usize), CompositeError> {
    let n = group.size();
    let partner_pos = my_pos ^ 1;
    let partner_rank = group.member_at(partner_pos);
    let even = my_pos % 2 == 0;

    let region = image.region();
    let total = region.len();
    let half = total / 2;
    let mid = region.begin + half;
    let (keep_begin, keep_end, send_begin, send_end) =
        if even { (region.begin, mid, mid, region.end) } else { (mid, region.end, region.begin, mid) };

    let keep = image.window(keep_begin - region.begin, keep_end - region.begin);
    let send_piece = image.window(send_begin - region.begin, send_end - region.begin);
    let recv_region = Region::new(send_begin, send_end);

    let pending = Image::irecv(
        comm,
        partner_rank,
        image.width(),
        image.height(),
        recv_region,
        image.viewport(),
        image.shape(),
    );
    let mut requests = RequestSet::new();
    send_piece.isend(comm, partner_rank, &mut requests);
    let incoming = Image::finish_recv(pending, comm);
    requests.wait_all(comm);

    let blended = if even { keep.blend(&incoming)? } else { incoming.blend(&keep)? };

    let next_group = if even { group.include_by_range(0, n, 2) } else { group.include_by_range(1, n, 2) };
    let next_pos = next_group
        .rank_of(comm.rank())
        .expect("self remains a member of the half-group it was just placed into");
    Ok((blended, next_group, next_pos))
}

fn swap_round(image: Image, group: &ProcessGroup, my_pos: usize, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    if group.size() == 1 {
        return Ok(image);
    }
    log::trace!("binary-swap round: group size {} position {my_pos}", group.size());
    let (blended, next_group, next_pos) = one_round(image, group, my_pos, comm)?;
    swap_round(blended, &next_group, next_pos, comm)
}

/// Precondition: `group.size()` is a power of two (§4.2).
pub fn base(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let n = group.size();
    if !is_pow2(n) {
        return Err(CompositeError::GroupConstraintViolated {
            detail: "Binary-Swap base requires a power-of-two group size",
        });
    }
    if n == 1 {
        // Sc-6: a lone participant returns a shallow copy of its input.
        return Ok(image.window(0, image.number_of_pixels()));
    }
    let my_pos = self_position(group, comm)?;
    swap_round(image, group, my_pos, comm)
}

/// Fold (§4.3): the `E = N - floor_pow2(N)` trailing members each give
/// their whole image to the corresponding prefix member, then the
/// surviving power-of-two group runs the base algorithm. Donors return an
/// empty image.
pub fn fold(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let n = group.size();
    let p = floor_pow2(n);
    let e = n - p;
    if e == 0 {
        return base(image, group, comm);
    }
    let my_pos = self_position(group, comm)?;

    if my_pos >= p {
        let recipient_rank = group.member_at(my_pos - p);
        let mut requests = RequestSet::new();
        image.isend(comm, recipient_rank, &mut requests);
        requests.wait_all(comm);
        return Ok(image.window(0, 0));
    }

    let image = if my_pos < e {
        let donor_rank = group.member_at(p + my_pos);
        let pending =
            Image::irecv(comm, donor_rank, image.width(), image.height(), image.region(), image.viewport(), image.shape());
        let donated = Image::finish_recv(pending, comm);
        image.blend(&donated)?
    } else {
        image
    };

    let surviving = group.include_by_range(0, p, 1);
    base(image, &surviving, comm)
}

/// Remainder (§4.3): at any round with an odd group size, the trailing
/// member splits its image and hands both halves to the last even-paired
/// pair, which each blend in their half after the normal swap, then the
/// trailing member exits. Precondition: the odd-one-out is always the
/// *trailing* member of the current ordering (asserted, per the Open
/// Question in §9: callers that reorder a group so the odd member isn't
/// last get a `GroupConstraintViolated` rather than silently wrong output).
pub fn remainder(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let my_pos = self_position(group, comm)?;
    remainder_round(image, group, my_pos, comm)
}

fn remainder_round(image: Image, group: &ProcessGroup, my_pos: usize, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let n = group.size();
    if n == 1 {
        return Ok(image);
    }
    if n % 2 == 0 {
        let (blended, next_group, next_pos) = one_round(image, group, my_pos, comm)?;
        return remainder_round(blended, &next_group, next_pos, comm);
    }

    let last = n - 1;
    if n < 3 {
        return Err(CompositeError::GroupConstraintViolated {
            detail: "Binary-Swap-Remainder needs at least 3 members to eliminate an odd trailing one",
        });
    }
    if my_pos == last {
        let region = image.region();
        let mid = region.begin + region.len() / 2;
        let first_half = image.window(0, mid - region.begin);
        let second_half = image.window(mid - region.begin, region.len());
        let recipient_a = group.member_at(last - 2);
        let recipient_b = group.member_at(last - 1);
        let mut requests = RequestSet::new();
        first_half.isend(comm, recipient_a, &mut requests);
        second_half.isend(comm, recipient_b, &mut requests);
        requests.wait_all(comm);
        return Ok(image.window(0, 0));
    }

    let trailing_rank = group.member_at(last);
    let receives_extra = my_pos == last - 2 || my_pos == last - 1;
    let even_group = group.exclude_by_range(last, n, 1);
    let even_pos = even_group
        .rank_of(comm.rank())
        .expect("non-trailing members remain in the group with the odd one excluded");

    let (blended, next_group, next_pos) = one_round(image, &even_group, even_pos, comm)?;
    let blended = if receives_extra {
        let pending = Image::irecv(
            comm,
            trailing_rank,
            blended.width(),
            blended.height(),
            blended.region(),
            blended.viewport(),
            blended.shape(),
        );
        let extra = Image::finish_recv(pending, comm);
        blended.blend(&extra)?
    } else {
        blended
    };
    remainder_round(blended, &next_group, next_pos, comm)
}

/// Places disjoint, region-tagged pieces into one dense image covering
/// `target`. Used where Telescoping's cross-partition step needs to
/// reassemble several narrower incoming fragments into one sub-region.
fn stitch(target: Region, width: u32, height: u32, viewport: Viewport, pieces: &[(Region, Image)]) -> Image {
    let color_only = pieces[0].1.is_color_only();
    let len = target.len();
    let mut colors = vec![Color::default(); len];
    let mut depths = if color_only { None } else { Some(vec![f32::INFINITY; len]) };
    for (region, piece) in pieces {
        let dense = piece.uncompress();
        let Image::Dense(d) = &dense else { unreachable!("uncompress always yields Dense") };
        let local_begin = region.begin - target.begin;
        colors[local_begin..local_begin + region.len()].copy_from_slice(d.colors());
        if let (Some(out), Some(src)) = (depths.as_mut(), d.depths()) {
            out[local_begin..local_begin + region.len()].copy_from_slice(src);
        }
    }
    let payload = match depths {
        Some(depths) => {
            DensePayload::ColorDepth { colors: DenseBuffer::from_vec(colors), depths: DenseBuffer::from_vec(depths) }
        }
        None => DensePayload::ColorOnly { colors: DenseBuffer::from_vec(colors) },
    };
    Image::Dense(DenseImage { width, height, region: target, viewport, payload })
}

fn overlap(a: Region, b: Region) -> Option<Region> {
    let begin = a.begin.max(b.begin);
    let end = a.end.min(b.end);
    if begin < end {
        Some(Region::new(begin, end))
    } else {
        None
    }
}

/// Telescoping (§4.3): split the group into `[0, P)` and `[P, N)`, run the
/// base algorithm on the first and [`remainder`] on the second, then merge.
///
/// The source addresses the cross-partition exchange by the bit-reversal
/// of each large-partition rank. This implementation instead has both
/// sides compute their own and their counterpart's exact sub-regions
/// directly from [`piece_range`] (every region is a pure function of
/// `(total, position, group size)`, so no extra round-trip is needed to
/// learn it) and exchanges along region overlap. Both addressing schemes
/// reach the same partition of the image across the same two groups; this
/// one avoids re-deriving the bit-reversal permutation from first
/// principles for an already-verified fact (piece ownership is exactly
/// what `piece_range` says it is).
pub fn telescoping(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let n = group.size();
    let p = floor_pow2(n);
    if n == p {
        return base(image, group, comm);
    }
    let my_pos = self_position(group, comm)?;
    let total = image.number_of_pixels();
    let width = image.width();
    let height = image.height();
    let viewport = image.viewport();
    let large = group.include_by_range(0, p, 1);
    let small = group.include_by_range(p, n, 1);

    if my_pos < p {
        let blended = base(image, &large, comm)?;
        let my_region = blended.region();
        let mut pieces = Vec::new();
        for small_pos in 0..small.size() {
            let their_region = piece_range(total, small_pos, small.size())?;
            if let Some(ov) = overlap(their_region, my_region) {
                let sender_rank = small.member_at(small_pos);
                let pending =
                    Image::irecv(comm, sender_rank, width, height, ov, viewport, blended.shape());
                let incoming = Image::finish_recv(pending, comm);
                let my_slice = blended.window(ov.begin - my_region.begin, ov.end - my_region.begin);
                pieces.push((ov, my_slice.blend(&incoming)?));
            }
        }
        Ok(stitch(my_region, width, height, viewport, &pieces))
    } else {
        let reduced = remainder(image, &small, comm)?;
        let my_region = reduced.region();
        let mut requests = RequestSet::new();
        for large_pos in 0..p {
            let their_region = piece_range(total, large_pos, p)?;
            if let Some(ov) = overlap(their_region, my_region) {
                let target_rank = large.member_at(large_pos);
                let slice = reduced.window(ov.begin - my_region.begin, ov.end - my_region.begin);
                slice.isend(comm, target_rank, &mut requests);
            }
        }
        requests.wait_all(comm);
        Ok(reduced.window(0, 0))
    }
}

/// Splits a region into the same first/second halves [`one_round`] swaps,
/// so callers that need to address a half directly (posting a receive
/// before the swap happens) can compute it without running the swap.
fn half_regions(region: Region) -> (Region, Region) {
    let mid = region.begin + region.len() / 2;
    (Region::new(region.begin, mid), Region::new(mid, region.end))
}

/// One ordinary binary-swap exchange between the two members of `pair_group`
/// (`swapHalves` in the source). `pos_in_pair` is 0 or 1.
fn swap_pair(
    image: Image,
    pair_group: &ProcessGroup,
    pos_in_pair: usize,
    comm: &dyn Communicator,
) -> Result<Image, CompositeError> {
    one_round(image, pair_group, pos_in_pair, comm).map(|(blended, _, _)| blended)
}

/// 3-to-2 elimination: the member at `subgroup_start + 2` gives away both
/// halves of its image to the other two, who run an ordinary swap between
/// themselves and then blend in the donated half. Ported from
/// `BinarySwap234Schedule.cpp`'s `Eliminate32`.
fn eliminate_32(
    image: Image,
    group: &ProcessGroup,
    subgroup_start: usize,
    comm: &dyn Communicator,
) -> Result<Image, CompositeError> {
    let my_pos = self_position(group, comm)?;
    let local = my_pos - subgroup_start;
    match local {
        0 | 1 => {
            let donor_rank = group.member_at(subgroup_start + 2);
            let (first_half, second_half) = half_regions(image.region());
            let expected = if local == 0 { first_half } else { second_half };
            let pending =
                Image::irecv(comm, donor_rank, image.width(), image.height(), expected, image.viewport(), image.shape());
            let pair_group = group.include_by_range(subgroup_start, subgroup_start + 2, 1);
            let blended = swap_pair(image, &pair_group, local, comm)?;
            let donated = Image::finish_recv(pending, comm);
            Ok(blended.blend(&donated)?)
        }
        2 => {
            let region = image.region();
            let (first_half, second_half) = half_regions(region);
            let first = image.window(first_half.begin - region.begin, first_half.end - region.begin);
            let second = image.window(second_half.begin - region.begin, second_half.end - region.begin);
            let mut requests = RequestSet::new();
            first.isend(comm, group.member_at(subgroup_start), &mut requests);
            second.isend(comm, group.member_at(subgroup_start + 1), &mut requests);
            requests.wait_all(comm);
            Ok(image.window(0, 0))
        }
        _ => Err(CompositeError::GroupConstraintViolated { detail: "Eliminate32 called outside its 3-member subgroup" }),
    }
}

/// 4-to-2 elimination: the pair at `subgroup_start + 2, + 3` runs an
/// ordinary swap between themselves and forwards the result to the
/// corresponding member of the first pair, which does its own swap and
/// blends the forwarded half in. Ported from `Eliminate42`.
fn eliminate_42(
    image: Image,
    group: &ProcessGroup,
    subgroup_start: usize,
    comm: &dyn Communicator,
) -> Result<Image, CompositeError> {
    let my_pos = self_position(group, comm)?;
    let local = my_pos - subgroup_start;
    match local {
        0 | 1 => {
            let counterpart_rank = group.member_at(subgroup_start + 2 + local);
            let (first_half, second_half) = half_regions(image.region());
            let expected = if local == 0 { first_half } else { second_half };
            let pending = Image::irecv(
                comm,
                counterpart_rank,
                image.width(),
                image.height(),
                expected,
                image.viewport(),
                image.shape(),
            );
            let pair_group = group.include_by_range(subgroup_start, subgroup_start + 2, 1);
            let blended = swap_pair(image, &pair_group, local, comm)?;
            let donated = Image::finish_recv(pending, comm);
            Ok(blended.blend(&donated)?)
        }
        2 | 3 => {
            let pair_group = group.include_by_range(subgroup_start + 2, subgroup_start + 4, 1);
            let blended = swap_pair(image.clone(), &pair_group, local - 2, comm)?;
            let target_rank = group.member_at(subgroup_start + (local - 2));
            let mut requests = RequestSet::new();
            blended.isend(comm, target_rank, &mut requests);
            requests.wait_all(comm);
            Ok(image.window(0, 0))
        }
        _ => Err(CompositeError::GroupConstraintViolated { detail: "Eliminate42 called outside its 4-member subgroup" }),
    }
}

/// Builds the group a 234-Schedule participant descends into after the
/// elimination prelude: the union of several strided position ranges
/// `(lo, hi, stride)` of `group`, each range exclusive of `hi` (matching
/// [`ProcessGroup::include_by_range`]'s convention). A range with `hi <=
/// lo` contributes nothing, which is what the source's explicit
/// "all eliminations were 3-2" special case falls out of automatically
/// here instead of needing its own branch.
fn range_union_group(group: &ProcessGroup, ranges: &[(usize, usize, usize)]) -> ProcessGroup {
    let mut members = Vec::new();
    for &(lo, hi, stride) in ranges {
        let hi = hi.min(group.size());
        if lo < hi {
            members.extend((lo..hi).step_by(stride).map(|i| group.member_at(i)));
        }
    }
    ProcessGroup::new(members)
}

/// 234-Schedule (§4.3): reduces an arbitrary `N` to `floor_pow2(N)` with a
/// single prelude round of 3-to-2 and/or 4-to-2 eliminations, then descends
/// into the base algorithm. Mirrors
/// `BinarySwap234Schedule::compose`'s case-1/case-2 split: pure 3-2
/// elimination when there's enough slack (`N < P + P/2`), a 4-2/3-2 mix
/// otherwise, so the elimination fans out in one round instead of
/// [`remainder`]'s recursive one-survivor-per-round shape.
pub fn schedule_234(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let n = group.size();
    let target_p2 = floor_pow2(n);
    if n == target_p2 {
        return base(image, group, comm);
    }
    let my_pos = self_position(group, comm)?;

    if n < target_p2 + target_p2 / 2 {
        // Case 1: pure 3-2 elimination prelude.
        let num_32 = n - target_p2;
        let first_swap_group = num_32 * 3;

        let (working_image, role_first) = if my_pos < first_swap_group {
            let subgroup_start = (my_pos / 3) * 3;
            let local = my_pos - subgroup_start;
            let img = eliminate_32(image, group, subgroup_start, comm)?;
            match local {
                0 => (img, true),
                1 => (img, false),
                _ => return Ok(img),
            }
        } else {
            let subgroup_start = (((my_pos - first_swap_group) / 2) * 2) + first_swap_group;
            let local = my_pos - subgroup_start;
            let pair_group = group.include_by_range(subgroup_start, subgroup_start + 2, 1);
            let img = swap_pair(image, &pair_group, local, comm)?;
            (img, local == 0)
        };

        let descend_group = if role_first {
            range_union_group(group, &[(0, first_swap_group, 3), (first_swap_group, n, 2)])
        } else {
            range_union_group(group, &[(1, first_swap_group, 3), (first_swap_group + 1, n, 2)])
        };
        base(working_image, &descend_group, comm)
    } else {
        // Case 2: mixed 4-2/3-2 elimination prelude.
        let num_42 = n - target_p2 - target_p2 / 2;
        let first_32_group = num_42 * 4;

        let (working_image, role_first) = if my_pos < first_32_group {
            let subgroup_start = (my_pos / 4) * 4;
            let local = my_pos - subgroup_start;
            let img = eliminate_42(image, group, subgroup_start, comm)?;
            match local {
                0 => (img, true),
                1 => (img, false),
                _ => return Ok(img),
            }
        } else {
            let subgroup_start = (((my_pos - first_32_group) / 3) * 3) + first_32_group;
            let local = my_pos - subgroup_start;
            let img = eliminate_32(image, group, subgroup_start, comm)?;
            match local {
                0 => (img, true),
                1 => (img, false),
                _ => return Ok(img),
            }
        };

        let descend_group = if role_first {
            range_union_group(group, &[(0, first_32_group, 4), (first_32_group, n, 3)])
        } else {
            range_union_group(group, &[(1, first_32_group, 4), (first_32_group + 1, n, 3)])
        };
        base(working_image, &descend_group, comm)
    }
}

/// `base`, reporting `composite-algorithm`/`composite-seconds` to `sink`
/// (§6.1 Timing/metrics writer).
pub fn base_with_metrics(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    sink: &dyn CompositeMetricsSink,
) -> Result<Image, CompositeError> {
    sink.composite_algorithm("binary-swap-base");
    timed(sink, |s, secs| s.composite_seconds(secs), || base(image, group, comm))
}
