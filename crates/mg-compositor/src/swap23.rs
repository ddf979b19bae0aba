//! 2-3 Swap (§4.4): bottom-up compositing over the tree built in `tree.rs`.
//! Grounded directly on
//! `original_source/2-3-Swap/Base/Swap_2_3_Base.cpp`'s `Do_2_3_Swap`,
//! `PostReceives`/`PostSends`, and `ProcessIncomingImages`.

use mg_image::{Image, PendingImage, Region};
use mg_transport::{Communicator, ProcessGroup, RequestSet};

use crate::error::CompositeError;
use crate::metrics::{timed, CompositeMetricsSink};
use crate::tree::CompositeTreeNode;

/// A posted receive from one member of another subnode, tagged by its
/// subnode's relative index `Δ` (§4.4 step 3) so the eventual blend knows
/// which side is "top".
struct Incoming {
    relative: i64,
    pending: PendingImage,
}

fn post_receives_from_subtree(
    window_image: &Image,
    subtree: &CompositeTreeNode,
    relative: i64,
    comm: &dyn Communicator,
    out: &mut Vec<Incoming>,
) {
    let my_region = window_image.region();
    for group_index in 0..subtree.group_size {
        let region_end = subtree.region_indices[group_index + 1];
        if region_end <= my_region.begin {
            // Haven't yet reached the parts of the image intersecting mine.
            continue;
        }
        let region_begin = subtree.region_indices[group_index];
        if region_begin >= my_region.end {
            // Past any image part that intersects mine.
            break;
        }
        let begin = region_begin.max(my_region.begin);
        let end = region_end.min(my_region.end);
        let src = subtree.group.member_at(group_index);
        let pending = Image::irecv(
            comm,
            src,
            window_image.width(),
            window_image.height(),
            Region::new(begin, end),
            window_image.viewport(),
            window_image.shape(),
        );
        out.push(Incoming { relative, pending });
    }
}

/// Windows `starting` to this participant's own sub-region at `tree`'s
/// level, then posts every receive the other subnodes' overlapping members
/// require, split into primary (`|Δ|=1`) and secondary (`|Δ|>1`) sets.
fn post_receives(
    starting: &Image,
    tree: &CompositeTreeNode,
    comm: &dyn Communicator,
) -> Result<(Image, Vec<Incoming>, Vec<Incoming>), CompositeError> {
    let my_group_rank = tree.group.rank_of(comm.rank()).ok_or(CompositeError::GroupConstraintViolated {
        detail: "2-3 Swap: participant is not a member of its own tree node's group",
    })?;
    let region_begin = tree.region_indices[my_group_rank];
    let region_end = tree.region_indices[my_group_rank + 1];
    let starting_begin = starting.region().begin;
    let window = starting.window(region_begin - starting_begin, region_end - starting_begin);

    let my_subtree = tree.my_subnode_index(comm.rank()).ok_or(CompositeError::GroupConstraintViolated {
        detail: "2-3 Swap: participant's rank is not a member of any subnode of its own tree node",
    })?;

    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for (idx, subtree) in tree.subnodes.iter().enumerate() {
        let relative = idx as i64 - my_subtree as i64;
        if relative == 0 {
            continue; // not receiving from my own subnode
        }
        if relative.abs() == 1 {
            post_receives_from_subtree(&window, subtree, relative, comm, &mut primary);
        } else {
            post_receives_from_subtree(&window, subtree, relative, comm, &mut secondary);
        }
    }
    Ok((window, primary, secondary))
}

/// Sends windowed slices of `starting` to every other member of `tree`'s
/// level whose assigned region overlaps it.
fn post_sends(starting: &Image, tree: &CompositeTreeNode, comm: &dyn Communicator) -> Result<RequestSet, CompositeError> {
    let my_group_rank = tree.group.rank_of(comm.rank()).ok_or(CompositeError::GroupConstraintViolated {
        detail: "2-3 Swap: participant is not a member of its own tree node's group",
    })?;
    let region = starting.region();
    let mut requests = RequestSet::new();
    for group_rank in 0..tree.group_size {
        if group_rank == my_group_rank {
            continue;
        }
        let begin = tree.region_indices[group_rank].max(region.begin);
        let end = tree.region_indices[group_rank + 1].min(region.end);
        if end <= begin {
            continue;
        }
        let slice = starting.window(begin - region.begin, end - region.begin);
        let dest = tree.group.member_at(group_rank);
        slice.isend(comm, dest, &mut requests);
    }
    Ok(requests)
}

/// §4.4 steps 6-7: a completion-driven reception loop. Whichever pending
/// image's final sub-message arrives first is blended in next; the blend
/// direction follows the sign of its subnode's `Δ`.
fn process_incoming(comm: &dyn Communicator, mut incoming: Vec<Incoming>, start: Image) -> Result<Image, CompositeError> {
    let mut working = start;
    while !incoming.is_empty() {
        let ids: Vec<_> = incoming.iter().map(|i| i.pending.final_id()).collect();
        let (idx, completion) = comm.wait_any(&ids);
        let entry = incoming.remove(idx);
        let arrived = Image::finish_recv_after_wait_any(entry.pending, comm, completion);
        working = if entry.relative < 0 { arrived.blend(&working)? } else { working.blend(&arrived)? };
    }
    Ok(working)
}

fn compose_at(local: Image, tree: &CompositeTreeNode, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    if tree.subnodes.is_empty() {
        // At a leaf: nothing to do but hand back our own piece.
        return Ok(local.window(0, local.number_of_pixels()));
    }

    let my_subtree = tree.my_subnode_index(comm.rank()).ok_or(CompositeError::GroupConstraintViolated {
        detail: "2-3 Swap: malformed compositing tree, participant's rank is in no subnode",
    })?;
    log::trace!("2-3 swap level: group size {} into {} subnodes", tree.group_size, tree.subnodes.len());
    let starting = compose_at(local, &tree.subnodes[my_subtree], comm)?;

    let (window, primary, secondary) = post_receives(&starting, tree, comm)?;
    let mut send_requests = post_sends(&starting, tree, comm)?;

    let mut working = window;
    if !primary.is_empty() {
        working = process_incoming(comm, primary, working)?;
    }
    if !secondary.is_empty() {
        working = process_incoming(comm, secondary, working)?;
    }
    send_requests.wait_all(comm);
    Ok(working)
}

/// Builds the compositing tree over `group` (§3.3) and runs the bottom-up
/// 2-3 Swap pass (§4.4).
pub fn compose(image: Image, group: &ProcessGroup, comm: &dyn Communicator) -> Result<Image, CompositeError> {
    let tree = CompositeTreeNode::build(group.clone(), image.number_of_pixels());
    compose_at(image, &tree, comm)
}

/// `compose`, reporting `construct-tree-seconds` and `composite-seconds`
/// separately (§6.1 Timing/metrics writer): tree construction is pure local
/// computation, distinct from the communication-bound compositing pass.
pub fn compose_with_metrics(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    sink: &dyn CompositeMetricsSink,
) -> Result<Image, CompositeError> {
    sink.composite_algorithm("2-3-swap");
    let pixels = image.number_of_pixels();
    let tree = timed(sink, |s, secs| s.construct_tree_seconds(secs), || CompositeTreeNode::build(group.clone(), pixels));
    timed(sink, |s, secs| s.composite_seconds(secs), || compose_at(image, &tree, comm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use mg_image::{BackgroundTemplate, Color, Region as R, Viewport};
    use mg_transport::make_thread_communicators;

    fn filled_color_depth(n: usize, color: Color, depth: f32) -> Image {
        let mut img = Image::create_new(n as u32, 1, R::new(0, n), Viewport::full(n as u32, 1), false);
        img.clear_dense(color, depth);
        img
    }

    #[test]
    fn six_participants_depth_compose_matches_serial_reference() {
        let n = 6;
        let comms = make_thread_communicators(n);
        let colors = [
            Color::rgba(255, 0, 0, 255),
            Color::rgba(0, 255, 0, 255),
            Color::rgba(0, 0, 255, 255),
            Color::rgba(255, 255, 0, 255),
            Color::rgba(0, 255, 255, 255),
            Color::rgba(255, 0, 255, 255),
        ];
        let depths = [0.5f32, 0.1, 0.9, 0.3, 0.7, 0.2];
        let width = 12usize;

        let reference = (0..n)
            .map(|r| filled_color_depth(width, colors[r], depths[r]))
            .reduce(|a, b| a.blend(&b).unwrap())
            .unwrap();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, comm) in comms.iter().enumerate() {
                let group = ProcessGroup::new((0..n).collect());
                let local = filled_color_depth(width, colors[rank], depths[rank]);
                handles.push(scope.spawn(move || compose(local, &group, comm)));
            }
            let pieces: Vec<Image> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

            let total: usize = pieces.iter().map(|p| p.number_of_pixels()).sum();
            assert_eq!(total, width);

            let mut assembled = vec![None; width];
            for piece in &pieces {
                let dense = piece.uncompress();
                let Image::Dense(d) = &dense else { panic!("expected dense") };
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
    fn compose_with_metrics_reports_without_changing_the_result() {
        let comms = make_thread_communicators(1);
        let group = ProcessGroup::new(vec![0]);
        let local = filled_color_depth(10, Color::rgba(1, 2, 3, 255), 0.4);
        let result = compose_with_metrics(local.clone(), &group, &comms[0], &NullMetricsSink).unwrap();
        assert_eq!(result.number_of_pixels(), local.number_of_pixels());
    }

    #[test]
    fn single_participant_returns_shallow_copy() {
        let comms = make_thread_communicators(1);
        let group = ProcessGroup::new(vec![0]);
        let local = filled_color_depth(10, Color::rgba(1, 2, 3, 255), 0.4);
        let result = compose(local.clone(), &group, &comms[0]).unwrap();
        assert_eq!(result.number_of_pixels(), local.number_of_pixels());
    }

    #[test]
    fn sparse_color_only_seven_participants_matches_reference() {
        let n = 7;
        let width = 14usize;
        let bg = Color::TRANSPARENT;
        let comms = make_thread_communicators(n);

        let make = |r: usize| -> Image {
            let fg = Color::rgba((20 * r) as u8, 10, 200, 128);
            let mut colors: Vec<Color> = vec![bg; width];
            colors[r] = fg;
            colors[(r + 3) % width] = fg;
            let dense = mg_image::DenseImage {
                width: width as u32,
                height: 1,
                region: R::new(0, width),
                viewport: Viewport::full(width as u32, 1),
                payload: mg_image::DensePayload::ColorOnly { colors: mg_image::DenseBuffer::from_vec(colors) },
            };
            Image::Dense(dense).compress(BackgroundTemplate::ColorOnly(bg))
        };

        let reference = (0..n).map(make).reduce(|top, bottom| top.blend(&bottom).unwrap()).unwrap();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, comm) in comms.iter().enumerate() {
                let group = ProcessGroup::new((0..n).collect());
                let local = make(rank);
                handles.push(scope.spawn(move || compose(local, &group, comm)));
            }
            let pieces: Vec<Image> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

            let mut assembled = vec![None; width];
            for piece in &pieces {
                let dense = piece.uncompress();
                let Image::Dense(d) = &dense else { panic!("expected dense") };
                for (i, &c) in d.colors().iter().enumerate() {
                    assembled[d.region.begin + i] = Some(c);
                }
            }
            let reference_dense = reference.uncompress();
            let Image::Dense(ref_dense) = &reference_dense else { unreachable!() };
            for (i, expected) in ref_dense.colors().iter().enumerate() {
                assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected);
            }
        });
    }
}
