//! Direct-Send with Overlap (§4.5): every sender in `send_group` ships a
//! disjoint slice of its image directly to every receiver in `recv_group`,
//! and a receiver starts blending whichever pieces arrive first instead of
//! waiting for them in rank order. Grounded on
//! `original_source/DirectSend/Overlap/DirectSendOverlap.cpp`'s
//! `PostReceives`/`PostSends`/`ProcessIncomingImages`.

use mg_image::{Image, PendingImage, Region};
use mg_transport::{Communicator, ProcessGroup, RequestSet};

use crate::error::CompositeError;
use crate::metrics::{timed, CompositeMetricsSink};

/// The default cap on how many pieces an image is split into, matching
/// `DirectSendOverlap`'s own `DEFAULT_MAX_IMAGE_SPLIT` (§6.3).
pub const DEFAULT_MAX_IMAGE_SPLIT: usize = 1_000_000;

/// Direct-Send's own piece split: all-but-the-last piece get `total/n`
/// pixels, and the last absorbs whatever remains. This is deliberately a
/// different tie-breaking rule than [`crate::partition::piece_range`]'s
/// leading-piece bias: each scheduler that needs a near-equal split owns
/// its own rule, matching how the original sources never shared one
/// `getPieceRange` between Direct-Send and the 2-3 tree.
fn piece_range(total: usize, index: usize, count: usize) -> (usize, usize) {
    let piece = total / count;
    let begin = piece * index;
    let end = if index < count - 1 { begin + piece } else { total };
    (begin, end)
}

/// One of `send_group`'s members' contribution to the blended result we're
/// assembling, from this receiver's point of view.
enum Incoming {
    Waiting(PendingImage),
    Ready(Image),
    Empty,
}

fn post_receives(
    local: &Image,
    send_group: &ProcessGroup,
    recv_group: &ProcessGroup,
    comm: &dyn Communicator,
) -> Vec<Incoming> {
    let Some(my_recv_pos) = recv_group.rank_of(comm.rank()) else {
        // Not receiving anything at all: hand back a single empty piece so
        // the blend loop below still has exactly one "result" slot.
        return vec![Incoming::Ready(local.window(0, 0))];
    };
    let recv_group_size = recv_group.size();
    let my_send_pos = send_group.rank_of(comm.rank());
    let (begin, end) = piece_range(local.number_of_pixels(), my_recv_pos, recv_group_size);
    let local_region = local.region();
    let region = Region::new(local_region.begin + begin, local_region.begin + end);

    let send_group_size = send_group.size();
    let mut out = Vec::with_capacity(send_group_size);
    for idx in 0..send_group_size {
        if my_send_pos == Some(idx) {
            // "Sending" to ourselves: just take the slice directly.
            out.push(Incoming::Ready(local.window(begin, end)));
        } else {
            let src = send_group.member_at(idx);
            let pending = Image::irecv(comm, src, local.width(), local.height(), region, local.viewport(), local.shape());
            out.push(Incoming::Waiting(pending));
        }
    }
    out
}

fn post_sends(local: &Image, send_group: &ProcessGroup, recv_group: &ProcessGroup, comm: &dyn Communicator) -> RequestSet {
    let mut requests = RequestSet::new();
    if send_group.rank_of(comm.rank()).is_none() {
        return requests;
    }
    let my_recv_pos = recv_group.rank_of(comm.rank());
    let recv_group_size = recv_group.size();
    for idx in 0..recv_group_size {
        if my_recv_pos == Some(idx) {
            continue; // post_receives already grabbed our own piece directly.
        }
        let (begin, end) = piece_range(local.number_of_pixels(), idx, recv_group_size);
        let dest = recv_group.member_at(idx);
        let slice = local.window(begin, end);
        slice.isend(comm, dest, &mut requests);
    }
    requests
}

/// Drains `incoming` via completion-driven `wait_any`, blending every READY
/// pair it can each time a new piece arrives, short-circuiting the forward
/// scan at the first still-WAITING neighbor of an order-dependent target
/// (order-dependent images can't skip ahead and blend out of arrival order).
fn process_incoming(comm: &dyn Communicator, mut incoming: Vec<Incoming>) -> Result<Image, CompositeError> {
    loop {
        let waiting: Vec<(usize, _)> = incoming
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Incoming::Waiting(p) => Some((i, p.final_id())),
                _ => None,
            })
            .collect();
        if waiting.is_empty() {
            break;
        }
        let ids: Vec<_> = waiting.iter().map(|&(_, id)| id).collect();
        let (pos, completion) = comm.wait_any(&ids);
        let idx = waiting[pos].0;
        let pending = match std::mem::replace(&mut incoming[idx], Incoming::Empty) {
            Incoming::Waiting(p) => p,
            _ => unreachable!("wait_any only ever reports a still-waiting slot"),
        };
        incoming[idx] = Incoming::Ready(Image::finish_recv_after_wait_any(pending, comm, completion));

        let mut target = 0;
        while target < incoming.len() {
            if matches!(incoming[target], Incoming::Ready(_)) {
                let mut source = target + 1;
                while source < incoming.len() {
                    match &incoming[source] {
                        Incoming::Ready(_) => {
                            let src_img = match std::mem::replace(&mut incoming[source], Incoming::Empty) {
                                Incoming::Ready(img) => img,
                                _ => unreachable!(),
                            };
                            let tgt_img = match std::mem::replace(&mut incoming[target], Incoming::Empty) {
                                Incoming::Ready(img) => img,
                                _ => unreachable!(),
                            };
                            incoming[target] = Incoming::Ready(tgt_img.blend(&src_img)?);
                            source += 1;
                        }
                        Incoming::Waiting(_) => {
                            let order_dependent = match &incoming[target] {
                                Incoming::Ready(img) => img.blend_is_order_dependent(),
                                _ => unreachable!(),
                            };
                            if order_dependent {
                                break;
                            }
                            source += 1;
                        }
                        Incoming::Empty => source += 1,
                    }
                }
            }
            target += 1;
        }
    }

    match std::mem::replace(&mut incoming[0], Incoming::Empty) {
        Incoming::Ready(img) => Ok(img),
        _ => unreachable!("draining every request leaves slot 0 ready"),
    }
}

/// Runs one Direct-Send-with-Overlap exchange: `send_group` members each
/// split their image across `recv_group` and blend whatever arrives first.
/// Usually `send_group == recv_group`; Radix-k's per-round call is the
/// common case that passes the same group for both.
pub fn compose(
    image: Image,
    send_group: &ProcessGroup,
    recv_group: &ProcessGroup,
    comm: &dyn Communicator,
) -> Result<Image, CompositeError> {
    log::trace!("direct-send round: {} senders, {} receivers", send_group.size(), recv_group.size());
    let incoming = post_receives(&image, send_group, recv_group, comm);
    let mut send_requests = post_sends(&image, send_group, recv_group, comm);
    let result = process_incoming(comm, incoming)?;
    send_requests.wait_all(comm);
    Ok(result)
}

/// Direct-Send capped at `max_split` pieces (§6.3 `--max-image-split`):
/// only the first `max_split` members of `group` receive anything, bounding
/// network traffic at the cost of load imbalance on those members.
pub fn compose_capped(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    max_split: usize,
) -> Result<Image, CompositeError> {
    let recv_group = group.include_by_range(0, max_split.min(group.size()), 1);
    compose(image, group, &recv_group, comm)
}

/// `compose_capped`, reporting `max-image-split` and `composite-seconds`
/// (§6.1 Timing/metrics writer).
pub fn compose_capped_with_metrics(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    max_split: usize,
    sink: &dyn CompositeMetricsSink,
) -> Result<Image, CompositeError> {
    sink.composite_algorithm("direct-send-overlap");
    sink.max_image_split(max_split.min(group.size()));
    timed(sink, |s, secs| s.composite_seconds(secs), || compose_capped(image, group, comm, max_split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use mg_image::{BackgroundTemplate, Color, Viewport};
    use mg_transport::make_thread_communicators;

    fn filled(width: usize, color: Color, depth: f32) -> Image {
        let mut img = Image::create_new(width as u32, 1, Region::new(0, width), Viewport::full(width as u32, 1), false);
        img.clear_dense(color, depth);
        img
    }

    #[test]
    fn piece_range_puts_remainder_on_the_last_piece() {
        let sizes: Vec<usize> = (0..3).map(|i| {
            let (b, e) = piece_range(10, i, 3);
            e - b
        }).collect();
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn five_participants_depth_compose_matches_serial_reference() {
        let n = 5;
        let width = 15usize;
        let comms = make_thread_communicators(n);
        let colors: Vec<Color> = (0..n).map(|i| Color::rgba((30 * i) as u8, 1, 2, 255)).collect();
        let depths: Vec<f32> = (0..n).map(|i| 0.1 * (i as f32 + 1.0)).collect();

        let reference = (0..n)
            .map(|r| filled(width, colors[r], depths[r]))
            .reduce(|a, b| a.blend(&b).unwrap())
            .unwrap();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, comm) in comms.iter().enumerate() {
                let group = ProcessGroup::new((0..n).collect());
                let local = filled(width, colors[rank], depths[rank]);
                handles.push(scope.spawn(move || compose(local, &group, &group, comm)));
            }
            let pieces: Vec<Image> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

            let total: usize = pieces.iter().map(|p| p.number_of_pixels()).sum();
            assert_eq!(total, width);

            let mut assembled = vec![None; width];
            for piece in &pieces {
                let Image::Dense(d) = &piece else { panic!("expected dense") };
                for (i, &c) in d.colors().iter().enumerate() {
                    assembled[d.region.begin + i] = Some(c);
                }
            }
            let Image::Dense(ref_dense) = &reference else { unreachable!() };
            for (i, expected) in ref_dense.colors().iter().enumerate() {
                assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected);
            }
        });
    }

    #[test]
    fn compose_capped_with_metrics_reports_without_changing_the_result() {
        let comms = make_thread_communicators(1);
        let group = ProcessGroup::new(vec![0]);
        let local = filled(4, Color::rgba(9, 9, 9, 255), 0.1);
        let result = compose_capped_with_metrics(local, &group, &comms[0], 1, &NullMetricsSink).unwrap();
        assert_eq!(result.number_of_pixels(), 4);
    }

    #[test]
    fn capped_split_only_sends_to_the_leading_members() {
        let n = 4;
        let width = 8usize;
        let max_split = 2usize;
        let comms = make_thread_communicators(n);
        let colors: Vec<Color> = (0..n).map(|i| Color::rgba(i as u8, 0, 0, 200)).collect();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, comm) in comms.iter().enumerate() {
                let group = ProcessGroup::new((0..n).collect());
                let bg = Color::TRANSPARENT;
                let local = {
                    let mut img = Image::create_new(width as u32, 1, Region::new(0, width), Viewport::full(width as u32, 1), true);
                    img.clear_dense(colors[rank], 0.0);
                    img.compress(BackgroundTemplate::ColorOnly(bg))
                };
                handles.push(scope.spawn(move || compose_capped(local, &group, comm, max_split)));
            }
            let pieces: Vec<Option<Image>> = handles.into_iter().map(|h| h.join().unwrap().ok()).collect();
            let total_owned: usize = pieces.iter().flatten().map(|p| p.number_of_pixels()).sum();
            assert_eq!(total_owned, width, "the two receiving members should own the whole image between them");
        });
    }
}
