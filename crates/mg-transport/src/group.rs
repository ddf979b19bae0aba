use std::sync::Arc;

/// A participant identity in the surrounding communicator. Stable across the
/// whole run; a [`ProcessGroup`] only ever holds an ordered subset of these.
pub type Rank = usize;

/// An immutable, ordered, named subset of the communicator's ranks.
///
/// Cheap to clone: the member list is reference-counted. Group handles are
/// owned by whoever constructs them (a scheduler round, a composite tree
/// node); Rust's ownership rules retire the underlying `Vec` exactly once
/// when the last `ProcessGroup` referring to it is dropped, so there is no
/// separate "destroy" call to forget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessGroup {
    members: Arc<Vec<Rank>>,
}

impl ProcessGroup {
    /// Build a group from an explicit, already-ordered member list.
    pub fn new(members: Vec<Rank>) -> Self {
        ProcessGroup {
            members: Arc::new(members),
        }
    }

    /// Number of participants in the group.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The full ordered member list, as real ranks in the enclosing communicator.
    pub fn members(&self) -> &[Rank] {
        &self.members
    }

    /// Real rank of the member occupying `position` in this group's ordering.
    pub fn member_at(&self, position: usize) -> Rank {
        self.members[position]
    }

    /// This group's position for a given real rank, or `None` ("UNDEFINED")
    /// if that rank is not a member.
    pub fn rank_of(&self, real_rank: Rank) -> Option<usize> {
        self.members.iter().position(|&r| r == real_rank)
    }

    /// `includeByRange([lo,hi,stride])`: keep members at positions
    /// `lo, lo+stride, ..` while `< hi`, preserving order.
    pub fn include_by_range(&self, lo: usize, hi: usize, stride: usize) -> ProcessGroup {
        assert!(stride > 0, "include_by_range: stride must be positive");
        let hi = hi.min(self.members.len());
        let kept: Vec<Rank> = (lo..hi).step_by(stride).map(|i| self.members[i]).collect();
        ProcessGroup::new(kept)
    }

    /// `excludeByRange`: drop members at positions `lo, lo+stride, ..` while
    /// `< hi`, preserving the order of everything that remains.
    pub fn exclude_by_range(&self, lo: usize, hi: usize, stride: usize) -> ProcessGroup {
        assert!(stride > 0, "exclude_by_range: stride must be positive");
        let hi = hi.min(self.members.len());
        let dropped: std::collections::HashSet<usize> = (lo..hi).step_by(stride).collect();
        let kept: Vec<Rank> = self
            .members
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, &r)| r)
            .collect();
        ProcessGroup::new(kept)
    }

    /// Translate a position in `self` to the corresponding position in
    /// `dst`, or `None` if the underlying rank is not a member of `dst`.
    pub fn translate_rank(&self, position: usize, dst: &ProcessGroup) -> Option<usize> {
        dst.rank_of(self.member_at(position))
    }

    /// Translate every position in `positions` from `self` into `dst` in one pass.
    pub fn translate_ranks(&self, positions: &[usize], dst: &ProcessGroup) -> Vec<Option<usize>> {
        positions
            .iter()
            .map(|&p| self.translate_rank(p, dst))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(members: &[Rank]) -> ProcessGroup {
        ProcessGroup::new(members.to_vec())
    }

    #[test]
    fn size_and_rank_of() {
        let g = group(&[4, 5, 6, 7]);
        assert_eq!(g.size(), 4);
        assert_eq!(g.rank_of(6), Some(2));
        assert_eq!(g.rank_of(99), None);
    }

    #[test]
    fn include_by_range_keeps_stride() {
        let g = group(&[0, 1, 2, 3, 4, 5, 6]);
        let evens = g.include_by_range(0, 7, 2);
        assert_eq!(evens.members(), &[0, 2, 4, 6]);
        let odds = g.include_by_range(1, 7, 2);
        assert_eq!(odds.members(), &[1, 3, 5]);
    }

    #[test]
    fn exclude_by_range_drops_stride() {
        let g = group(&[10, 11, 12, 13, 14]);
        let without_evens = g.exclude_by_range(0, 5, 2);
        assert_eq!(without_evens.members(), &[11, 13]);
    }

    #[test]
    fn translate_ranks_round_trips_through_enclosing_group() {
        let enclosing = group(&[0, 1, 2, 3, 4, 5]);
        let sub_a = group(&[1, 3, 5]);
        let sub_b = group(&[0, 2, 4]);
        // position 1 in sub_a is real rank 3, which is not a member of sub_b.
        assert_eq!(sub_a.translate_rank(1, &sub_b), None);
        // but every position of sub_a does translate into the enclosing group.
        let translated = sub_a.translate_ranks(&[0, 1, 2], &enclosing);
        assert_eq!(translated, vec![Some(1), Some(3), Some(5)]);
    }
}
