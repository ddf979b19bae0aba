//! Radix-k (§4.6): a sequence of Direct-Send-with-Overlap rounds, each run
//! within a contiguous k-sized slice of the current working group, with a
//! strided regroup between rounds. Grounded on
//! `original_source/RadixK/Base/RadixKBase.cpp`'s `Do_Radix_K` and
//! `generateK`.

use mg_image::Image;
use mg_transport::{Communicator, ProcessGroup};

use crate::direct_send;
use crate::error::CompositeError;
use crate::metrics::{timed, CompositeMetricsSink};

/// The default target factor size (§6.3 `--target-k`), used by
/// [`generate_k`] when no explicit factor list is given.
pub const DEFAULT_TARGET_K: usize = 8;

/// Factors `num_proc` into a sequence of round sizes close to `target_k`:
/// prefer `target_k` itself when it divides the remaining product, else
/// search downward from `target_k - 1` for a smaller exact factor, else
/// search upward from `target_k + 1` for a larger one (guaranteed to
/// terminate, since the remaining product always divides itself).
pub fn generate_k(target_k: usize, num_proc: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut remaining = num_proc;
    while remaining > 1 {
        if remaining % target_k == 0 {
            factors.push(target_k);
            remaining /= target_k;
            continue;
        }
        let mut smaller = target_k.saturating_sub(1);
        while smaller > 1 && remaining % smaller != 0 {
            smaller -= 1;
        }
        if smaller > 1 {
            factors.push(smaller);
            remaining /= smaller;
            continue;
        }
        let mut larger = target_k + 1;
        while remaining % larger != 0 {
            larger += 1;
        }
        factors.push(larger);
        remaining /= larger;
    }
    factors
}

/// Runs one round per entry of `k_values` (normally produced by
/// [`generate_k`]), narrowing `group` down to same-position members after
/// each round via a strided regroup.
pub fn compose(image: Image, group: &ProcessGroup, comm: &dyn Communicator, k_values: &[usize]) -> Result<Image, CompositeError> {
    let mut working_group = group.clone();
    let mut working_image = image;

    for &k in k_values {
        let group_size = working_group.size();
        if k <= 1 || group_size <= 1 {
            continue;
        }
        let my_group_rank = working_group.rank_of(comm.rank()).ok_or(CompositeError::GroupConstraintViolated {
            detail: "radix-k: participant dropped out of its own working group mid-schedule",
        })?;
        let my_subgroup_rank = my_group_rank % k;
        let my_partition = my_group_rank / k;

        log::trace!("radix-k round: factor {k}, working group size {group_size}");
        let round_group = working_group.include_by_range(k * my_partition, (k * (my_partition + 1)).min(group_size), 1);
        working_image = direct_send::compose(working_image, &round_group, &round_group, comm)?;

        working_group = working_group.include_by_range(my_subgroup_rank, group_size, k);
    }

    Ok(working_image)
}

/// Builds the default factor schedule from `--target-k` and runs it.
pub fn compose_with_target_k(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    target_k: usize,
) -> Result<Image, CompositeError> {
    let k_values = generate_k(target_k, group.size());
    compose(image, group, comm, &k_values)
}

/// `compose_with_target_k`, reporting the resolved factor schedule and
/// `composite-seconds` (§6.1 Timing/metrics writer).
pub fn compose_with_target_k_and_metrics(
    image: Image,
    group: &ProcessGroup,
    comm: &dyn Communicator,
    target_k: usize,
    sink: &dyn CompositeMetricsSink,
) -> Result<Image, CompositeError> {
    sink.composite_algorithm("radix-k");
    let k_values = generate_k(target_k, group.size());
    sink.k(&k_values);
    timed(sink, |s, secs| s.composite_seconds(secs), || compose(image, group, comm, &k_values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullMetricsSink;
    use mg_image::{Color, Region, Viewport};
    use mg_transport::make_thread_communicators;

    fn filled(width: usize, color: Color, depth: f32) -> Image {
        let mut img = Image::create_new(width as u32, 1, Region::new(0, width), Viewport::full(width as u32, 1), false);
        img.clear_dense(color, depth);
        img
    }

    #[test]
    fn generate_k_prefers_the_exact_target() {
        assert_eq!(generate_k(8, 64), vec![8, 8]);
    }

    #[test]
    fn generate_k_falls_back_to_a_smaller_factor() {
        // 12 isn't a multiple of 8 or evenly reducible by decrementing to an
        // exact divisor above 1 other than... 12 = 4 * 3, target 8 searches
        // downward (7,6,5,4) and finds 4 first.
        assert_eq!(generate_k(8, 12), vec![4, 3]);
    }

    #[test]
    fn generate_k_falls_back_to_a_larger_factor_for_primes() {
        // 11 is prime and smaller than target_k=8 can't divide it down to 1
        // via any factor between 2 and 7, so it searches upward and finds 11.
        assert_eq!(generate_k(8, 11), vec![11]);
    }

    #[test]
    fn generate_k_handles_a_single_process() {
        assert_eq!(generate_k(8, 1), Vec::<usize>::new());
    }

    #[test]
    fn compose_with_target_k_and_metrics_reports_without_changing_the_result() {
        let comms = make_thread_communicators(1);
        let group = ProcessGroup::new(vec![0]);
        let local = filled(4, Color::rgba(3, 3, 3, 255), 0.2);
        let result = compose_with_target_k_and_metrics(local, &group, &comms[0], 8, &NullMetricsSink).unwrap();
        assert_eq!(result.number_of_pixels(), 4);
    }

    #[test]
    fn eight_participants_two_rounds_of_k2_matches_serial_reference() {
        let n = 8;
        let width = 16usize;
        let comms = make_thread_communicators(n);
        let colors: Vec<Color> = (0..n).map(|i| Color::rgba((10 * i) as u8, 5, 7, 255)).collect();
        let depths: Vec<f32> = (0..n).map(|i| 0.05 * (i as f32 + 1.0)).collect();

        let reference = (0..n)
            .map(|r| filled(width, colors[r], depths[r]))
            .reduce(|a, b| a.blend(&b).unwrap())
            .unwrap();

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (rank, comm) in comms.iter().enumerate() {
                let group = ProcessGroup::new((0..n).collect());
                let local = filled(width, colors[rank], depths[rank]);
                handles.push(scope.spawn(move || compose(local, &group, comm, &[2, 2, 2])));
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
}
