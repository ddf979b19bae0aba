//! The 2-3 Swap composite tree (§3.3): a recursive descriptor that assigns
//! one contiguous sub-region of the image to every participant and groups
//! participants into 2- or 3-ary subtrees for the bottom-up compositing
//! pass in `swap23.rs`.
//!
//! Construction follows `original_source/2-3-Swap/Base/Swap_2_3_Node.cpp`
//! exactly: `P` is the smallest power of two *strictly greater* than the
//! group size at this level (not the ceiling of the group size itself;
//! for a group that is already a power of two, `P` is the next one up),
//! and the node divides by 2 when `groupSize < P - 1`, by 3 otherwise.
//!
//! Worth spelling out since it's easy to misstate by analogy with a plain
//! ceiling-power-of-two: for N=6, P=8, and `6 < P-1` (`6 < 7`) is true, so
//! six participants divide by 2 at the root (into two subtrees of three,
//! each of which *does* then divide by 3, since `3 < P-1` with the halved
//! P=4 is false at that level).
use mg_transport::ProcessGroup;

/// One node of the compositing tree. The group handle, region assignment,
/// and children are all owned directly; Rust's ownership model retires
/// each node's `ProcessGroup` exactly once on drop, which is what §3.3's
/// "the group handle is destroyed exactly once at node destruction" means
/// in a language without manual `MPI_Group_free` bookkeeping.
pub struct CompositeTreeNode {
    pub group: ProcessGroup,
    pub group_size: usize,
    /// Length `group_size + 1`: `region_indices[i]..region_indices[i+1]` is
    /// the sub-region owned by the participant at position `i` of `group`.
    pub region_indices: Vec<usize>,
    /// 0 (leaf), 2, or 3 children.
    pub subnodes: Vec<CompositeTreeNode>,
}

/// The smallest power of two strictly greater than `n`.
fn larger_power_of_two(n: usize) -> usize {
    let mut p = 1usize;
    while p <= n {
        p *= 2;
    }
    p
}

impl CompositeTreeNode {
    pub fn build(group: ProcessGroup, image_size: usize) -> CompositeTreeNode {
        let p = larger_power_of_two(group.size());
        Self::build_bounded(group, image_size, p)
    }

    fn build_bounded(group: ProcessGroup, image_size: usize, larger_pow2: usize) -> CompositeTreeNode {
        let group_size = group.size();
        if group_size == 1 {
            return CompositeTreeNode { group, group_size, region_indices: vec![0, image_size], subnodes: Vec::new() };
        }

        if group_size < larger_pow2 - 1 {
            Self::build_divide_by_2(group, group_size, image_size, larger_pow2)
        } else {
            Self::build_divide_by_3(group, group_size, image_size, larger_pow2)
        }
    }

    fn build_divide_by_2(group: ProcessGroup, group_size: usize, image_size: usize, larger_pow2: usize) -> CompositeTreeNode {
        let sub_size2 = group_size / 2;
        let sub_size1 = group_size - sub_size2;

        let node0 = Self::build_bounded(group.include_by_range(0, sub_size1, 1), image_size, larger_pow2 / 2);
        let node1 = Self::build_bounded(group.include_by_range(sub_size1, group_size, 1), image_size, larger_pow2 / 2);

        let mut region_indices = vec![0usize; group_size + 1];
        if sub_size1 == sub_size2 {
            for i in 0..sub_size1 {
                region_indices[2 * i] = node0.region_indices[i];
                region_indices[2 * i + 1] = (node0.region_indices[i] + node0.region_indices[i + 1]) / 2;
            }
        } else {
            let piece = image_size / group_size;
            for (i, slot) in region_indices.iter_mut().enumerate().take(group_size) {
                *slot = i * piece;
            }
        }
        region_indices[group_size] = image_size;

        let mut merged = vec![0usize; group_size];
        for i in 0..sub_size1 {
            merged[2 * i] = node0.group.member_at(i);
        }
        for i in 0..sub_size2 {
            merged[2 * i + 1] = node1.group.member_at(i);
        }

        CompositeTreeNode {
            group: ProcessGroup::new(merged),
            group_size,
            region_indices,
            subnodes: vec![node0, node1],
        }
    }

    fn build_divide_by_3(group: ProcessGroup, group_size: usize, image_size: usize, larger_pow2: usize) -> CompositeTreeNode {
        let sub_size2 = group_size / 3;
        let sub_size1 = group_size - 2 * sub_size2;

        let node0 = Self::build_bounded(group.include_by_range(0, sub_size1, 1), image_size, larger_pow2 / 2);
        let node1 = Self::build_bounded(
            group.include_by_range(sub_size1, sub_size1 + sub_size2, 1),
            image_size,
            larger_pow2 / 2,
        );
        let node2 = Self::build_bounded(
            group.include_by_range(sub_size1 + sub_size2, group_size, 1),
            image_size,
            larger_pow2 / 2,
        );

        let mut region_indices = vec![0usize; group_size + 1];
        if sub_size1 == sub_size2 {
            for i in 0..sub_size1 {
                region_indices[3 * i] = node0.region_indices[i];
                region_indices[3 * i + 1] = (2 * node0.region_indices[i] + node0.region_indices[i + 1]) / 3;
                region_indices[3 * i + 2] = (node0.region_indices[i] + 2 * node0.region_indices[i + 1]) / 3;
            }
        } else {
            let piece = image_size / group_size;
            for (i, slot) in region_indices.iter_mut().enumerate().take(group_size) {
                *slot = i * piece;
            }
        }
        region_indices[group_size] = image_size;

        let mut merged = vec![0usize; group_size];
        for i in 0..sub_size1 {
            merged[3 * i] = node0.group.member_at(i);
        }
        for i in 0..sub_size2 {
            merged[3 * i + 1] = node1.group.member_at(i);
            merged[3 * i + 2] = node2.group.member_at(i);
        }

        CompositeTreeNode {
            group: ProcessGroup::new(merged),
            group_size,
            region_indices,
            subnodes: vec![node0, node1, node2],
        }
    }

    /// Which subnode (by index into `self.subnodes`) the caller's own rank
    /// belongs to, found via each child's own `rank_of` rather than a
    /// back-pointer (§9: "cyclic parent/child in the 2-3 tree is avoided").
    pub fn my_subnode_index(&self, comm_rank: usize) -> Option<usize> {
        self.subnodes.iter().position(|n| n.group.rank_of(comm_rank).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(n: usize) -> ProcessGroup {
        ProcessGroup::new((0..n).collect())
    }

    #[test]
    fn leaf_has_no_subnodes() {
        let node = CompositeTreeNode::build(group(1), 100);
        assert!(node.subnodes.is_empty());
        assert_eq!(node.region_indices, vec![0, 100]);
    }

    #[test]
    fn three_divides_by_three_at_the_leaves() {
        let node = CompositeTreeNode::build(group(3), 90);
        assert_eq!(node.subnodes.len(), 3);
        assert!(node.subnodes.iter().all(|n| n.subnodes.is_empty()));
    }

    #[test]
    fn six_divides_into_two_subtrees_of_three() {
        let node = CompositeTreeNode::build(group(6), 60);
        assert_eq!(node.subnodes.len(), 2);
        assert_eq!(node.subnodes[0].group_size, 3);
        assert_eq!(node.subnodes[1].group_size, 3);
        assert_eq!(node.subnodes[0].subnodes.len(), 3);
        assert_eq!(node.subnodes[1].subnodes.len(), 3);
    }

    #[test]
    fn region_indices_partition_the_image() {
        for n in 1..12usize {
            let node = CompositeTreeNode::build(group(n), 1000);
            assert_eq!(node.region_indices.len(), n + 1);
            assert_eq!(node.region_indices[0], 0);
            assert_eq!(*node.region_indices.last().unwrap(), 1000);
            assert!(node.region_indices.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn merged_group_is_exactly_the_original_members() {
        let node = CompositeTreeNode::build(group(7), 70);
        let mut members = node.group.members().to_vec();
        members.sort_unstable();
        assert_eq!(members, (0..7).collect::<Vec<_>>());
    }
}
