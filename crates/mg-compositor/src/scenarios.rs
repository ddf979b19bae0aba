//! §8 "End-to-end scenarios (literal)": Sc-1 through Sc-6, each driven over
//! [`mg_transport::ThreadCommunicator`] the way every other scheduler test
//! in this crate is. These are broader than the per-module unit tests:
//! each one stands up every participant as an OS thread, runs a full
//! `compose`, and checks the reassembled result against a sequentially
//! computed reference blend.

use mg_image::{BackgroundTemplate, Color, DenseBuffer, DenseImage, DensePayload, Image, Region, Viewport};
use mg_transport::{make_thread_communicators, ProcessGroup};

use crate::{binary_swap, direct_send, radix_k, swap23, CompositeTreeNode};

/// Sc-1/Sc-2's painter stand-in: a dense color+depth image where pixels
/// inside `x > 10, x < 90, y > 10, y < 90, x <= y` hold opaque red at depth
/// `x/w`; everything else is the far-plane background. Every participant
/// paints the identical pattern (the scenario text gives no per-rank
/// variation), so the composited reference is that same pattern rendered
/// once, but still exercises every round of whichever scheduler composes it.
fn triangle_image(w: u32, h: u32) -> Image {
    let len = (w * h) as usize;
    let mut colors = vec![Color::TRANSPARENT; len];
    let mut depths = vec![1.0f32; len];
    for y in 0..h {
        for x in 0..w {
            if x > 10 && x < 90 && y > 10 && y < 90 && x <= y {
                let idx = (y * w + x) as usize;
                colors[idx] = Color::rgba(255, 0, 0, 255);
                depths[idx] = x as f32 / w as f32;
            }
        }
    }
    Image::Dense(DenseImage {
        width: w,
        height: h,
        region: Region::new(0, len),
        viewport: Viewport::full(w, h),
        payload: DensePayload::ColorDepth { colors: DenseBuffer::from_vec(colors), depths: DenseBuffer::from_vec(depths) },
    })
}

fn solid_color_depth(width: usize, color: Color, depth: f32) -> Image {
    let mut img = Image::create_new(width as u32, 1, Region::new(0, width), Viewport::full(width as u32, 1), false);
    img.clear_dense(color, depth);
    img
}

fn solid_color_only(width: usize, color: Color) -> Image {
    let mut img = Image::create_new(width as u32, 1, Region::new(0, width), Viewport::full(width as u32, 1), true);
    img.clear_dense(color, 0.0);
    img
}

/// Reassembles a scheduler's returned per-participant pieces into one
/// dense color vector indexed by pixel position, the way every scheduler
/// test in this crate checks its result.
fn assemble_colors(total_len: usize, pieces: &[Image]) -> Vec<Option<Color>> {
    let mut assembled = vec![None; total_len];
    for piece in pieces {
        let dense = piece.uncompress();
        let Image::Dense(d) = &dense else { unreachable!("uncompress always yields Dense") };
        for (i, &c) in d.colors().iter().enumerate() {
            assembled[d.region.begin + i] = Some(c);
        }
    }
    assembled
}

fn run_scheduler<F>(n: usize, make_local: impl Fn(usize) -> Image + Send + Sync, scheduler: F) -> Vec<Image>
where
    F: Fn(Image, &ProcessGroup, &dyn mg_transport::Communicator) -> Result<Image, crate::CompositeError> + Sync,
{
    let comms = make_thread_communicators(n);
    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (rank, comm) in comms.iter().enumerate() {
            let group = ProcessGroup::new((0..n).collect());
            let local = make_local(rank);
            let scheduler = &scheduler;
            handles.push(scope.spawn(move || scheduler(local, &group, comm).unwrap()));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Sc-1: N=4, W=H=100 dense color+depth, Binary-Swap base.
#[test]
fn sc1_binary_swap_base_matches_serial_depth_reference() {
    let n = 4;
    let w = 100;
    let h = 100;
    let reference = triangle_image(w, h);

    let pieces = run_scheduler(n, |_rank| triangle_image(w, h), |img, group, comm| binary_swap::base(img, group, comm));

    let total = (w * h) as usize;
    let assembled = assemble_colors(total, &pieces);
    let Image::Dense(ref_dense) = &reference else { unreachable!() };
    for (i, expected) in ref_dense.colors().iter().enumerate() {
        assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected);
    }
}

/// Sc-2: N=5, same scene as Sc-1, every non-power-of-two Binary-Swap
/// variant; each must match Sc-1's reference.
#[test]
fn sc2_binary_swap_variants_match_sc1_reference() {
    let n = 5;
    let w = 100;
    let h = 100;
    let reference = triangle_image(w, h);
    let Image::Dense(ref_dense) = &reference else { unreachable!() };
    let total = (w * h) as usize;

    for variant in ["fold", "remainder", "telescoping", "234"] {
        let pieces = run_scheduler(n, |_rank| triangle_image(w, h), move |img, group, comm| match variant {
            "fold" => binary_swap::fold(img, group, comm),
            "remainder" => binary_swap::remainder(img, group, comm),
            "telescoping" => binary_swap::telescoping(img, group, comm),
            "234" => binary_swap::schedule_234(img, group, comm),
            _ => unreachable!(),
        });
        let assembled = assemble_colors(total, &pieces);
        for (i, expected) in ref_dense.colors().iter().enumerate() {
            assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected, "variant {variant} mismatch at pixel {i}");
        }
    }
}

/// Sc-3: N=6, 2-3 Swap. The tree construction's "divide by 2 vs. by 3"
/// choice at the root for N=6 is the Open Question resolved in
/// `tree.rs`'s module doc (grounded on `Swap_2_3_Node.cpp`'s `P` being the
/// smallest power of two *strictly greater* than the group size, not a
/// ceiling): for N=6, P=8 and `6 < P-1` (`6 < 7`) holds, so the root
/// divides by 2, and each resulting group of 3 then divides by 3 one level
/// down. This test checks that resolved shape alongside correctness.
#[test]
fn sc3_two_three_swap_matches_reference_and_divides_as_documented() {
    let n = 6;
    let w = 100;
    let h = 100;
    let reference = triangle_image(w, h);
    let Image::Dense(ref_dense) = &reference else { unreachable!() };
    let total = (w * h) as usize;

    let tree = CompositeTreeNode::build(ProcessGroup::new((0..n).collect()), total);
    assert_eq!(tree.subnodes.len(), 2, "root divides by 2 for N=6 (P=8, 6 < P-1)");
    assert!(tree.subnodes.iter().all(|s| s.subnodes.len() == 3), "each sub-group of 3 divides by 3 one level down");

    let pieces = run_scheduler(n, |_rank| triangle_image(w, h), |img, group, comm| swap23::compose(img, group, comm));
    let assembled = assemble_colors(total, &pieces);
    for (i, expected) in ref_dense.colors().iter().enumerate() {
        assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected);
    }
}

/// Sc-4: N=7, dense color-only, alternating alpha=0.5 premultiplied red and
/// blue. Direct-Send-Overlap and Radix-k(k=[7]) must both match the serial
/// front-to-back `over` reference; order-dependence means the overlap
/// scheduler's scan must not blend out of arrival order.
#[test]
fn sc4_direct_send_and_radix_k_match_serial_over_reference() {
    let n = 7;
    let width = 21usize;
    let red = Color::rgba(128, 0, 0, 128);
    let blue = Color::rgba(0, 0, 128, 128);
    let color_of = |r: usize| if r % 2 == 0 { red } else { blue };

    let reference = (0..n)
        .map(|r| solid_color_only(width, color_of(r)))
        .reduce(|top, bottom| top.blend(&bottom).unwrap())
        .unwrap();
    let Image::Dense(ref_dense) = &reference else { unreachable!() };

    let direct_send_pieces =
        run_scheduler(n, |r| solid_color_only(width, color_of(r)), |img, group, comm| direct_send::compose(img, group, group, comm));
    let assembled = assemble_colors(width, &direct_send_pieces);
    for (i, expected) in ref_dense.colors().iter().enumerate() {
        assert_eq!(assembled[i].expect("direct-send: every pixel covered exactly once"), *expected);
    }

    let radix_k_pieces =
        run_scheduler(n, |r| solid_color_only(width, color_of(r)), |img, group, comm| radix_k::compose(img, group, comm, &[7]));
    let assembled = assemble_colors(width, &radix_k_pieces);
    for (i, expected) in ref_dense.colors().iter().enumerate() {
        assert_eq!(assembled[i].expect("radix-k: every pixel covered exactly once"), *expected);
    }
}

/// Sc-5: N=8 sparse color+depth, 90% background. Binary-Swap correctness,
/// plus a wire-size check: the shrunk sparse encoding of the 90%-background
/// image must be well under the dense equivalent's byte count (the
/// resource policy's reason for shrinking before send, §5/§6.2).
#[test]
fn sc5_sparse_binary_swap_matches_reference_and_shrinks_before_send() {
    let n = 8;
    let width = 100usize;
    let bg = Color::rgba(0, 0, 0, 0);
    let bg_depth = 1.0f32;

    let make_sparse = |r: usize| -> Image {
        let fg = Color::rgba((20 + r) as u8, 0, 0, 255);
        let mut colors = vec![bg; width];
        let mut depths = vec![bg_depth; width];
        // 10% foreground: ten scattered pixels per rank, offset so ranks disagree.
        for k in 0..10 {
            let idx = (k * 10 + r) % width;
            colors[idx] = fg;
            depths[idx] = 0.01 * (r as f32 + 1.0);
        }
        let dense = DenseImage {
            width: width as u32,
            height: 1,
            region: Region::new(0, width),
            viewport: Viewport::full(width as u32, 1),
            payload: DensePayload::ColorDepth { colors: DenseBuffer::from_vec(colors), depths: DenseBuffer::from_vec(depths) },
        };
        let sparse = Image::Dense(dense.clone()).compress(BackgroundTemplate::ColorDepth(bg, bg_depth));
        let Image::Sparse(s) = &sparse else { unreachable!() };
        let sparse_bytes = 8 + s.run_count() * 8 + s.number_of_active_pixels() * 8;
        let dense_bytes = width * 8;
        assert!(
            (sparse_bytes as f64) <= 0.25 * (dense_bytes as f64),
            "shrunk sparse encoding ({sparse_bytes}B) should be <=25% of the dense equivalent ({dense_bytes}B)"
        );
        sparse
    };

    let reference = (0..n)
        .map(|r| {
            let sparse = make_sparse(r);
            sparse.uncompress()
        })
        .reduce(|a, b| a.blend(&b).unwrap())
        .unwrap();
    let Image::Dense(ref_dense) = &reference else { unreachable!() };

    let pieces = run_scheduler(n, make_sparse, |img, group, comm| binary_swap::base(img, group, comm));
    let assembled = assemble_colors(width, &pieces);
    for (i, expected) in ref_dense.colors().iter().enumerate() {
        assert_eq!(assembled[i].expect("every pixel covered exactly once"), *expected);
    }
}

/// Sc-6: N=1, every scheduler returns a shallow copy of the input.
#[test]
fn sc6_single_participant_every_scheduler_returns_a_shallow_copy() {
    let comms = make_thread_communicators(1);
    let group = ProcessGroup::new(vec![0]);
    let local = solid_color_depth(30, Color::rgba(7, 8, 9, 255), 0.3);

    let from_binary_swap = binary_swap::base(local.clone(), &group, &comms[0]).unwrap();
    assert_eq!(from_binary_swap.number_of_pixels(), local.number_of_pixels());

    let from_swap23 = swap23::compose(local.clone(), &group, &comms[0]).unwrap();
    assert_eq!(from_swap23.number_of_pixels(), local.number_of_pixels());

    let from_direct_send = direct_send::compose(local.clone(), &group, &group, &comms[0]).unwrap();
    assert_eq!(from_direct_send.number_of_pixels(), local.number_of_pixels());

    let from_radix_k = radix_k::compose(local.clone(), &group, &comms[0], &[]).unwrap();
    assert_eq!(from_radix_k.number_of_pixels(), local.number_of_pixels());
}
