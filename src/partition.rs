//! Assignment of leaves to ranks.

use std::ops::Range;

use crate::{error::DomainError, tools::displacements};

/// Contiguous blocks of leaf ids per rank.
///
/// Every rank owns `num_leaf / num_rank` leaves and the first `num_leaf % num_rank`
/// ranks own one more. Rank 0 owns the smallest ids. The assignment only depends on
/// the two counts, so every rank computes it without communication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafPartition {
    num_leaf: usize,
    counts: Vec<usize>,
    offsets: Vec<usize>,
}

impl LeafPartition {
    /// Partition `num_leaf` leaves among `num_rank` ranks.
    pub fn new(num_leaf: usize, num_rank: usize) -> Result<Self, DomainError> {
        if num_rank == 0 {
            return Err(DomainError::InvalidArgument(
                "cannot partition leaves among zero ranks".to_string(),
            ));
        }

        let base = num_leaf / num_rank;
        let extra = num_leaf % num_rank;
        let counts = (0..num_rank)
            .map(|rank| base + usize::from(rank < extra))
            .collect::<Vec<_>>();
        let offsets = displacements(&counts);

        Ok(Self {
            num_leaf,
            counts,
            offsets,
        })
    }

    /// Fail unless every rank owns at least one leaf.
    pub fn check_every_rank_owns_a_leaf(&self) -> Result<(), DomainError> {
        if self.num_leaf < self.num_ranks() {
            return Err(DomainError::DecompositionMismatch(format!(
                "{} leaves cannot be distributed among {} ranks",
                self.num_leaf,
                self.num_ranks()
            )));
        }
        Ok(())
    }

    /// Total number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.num_leaf
    }

    /// Number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.counts.len()
    }

    /// Number of leaves per rank.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// First leaf id per rank.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Number of leaves owned by `rank`.
    pub fn count(&self, rank: usize) -> usize {
        self.counts.get(rank).copied().unwrap_or(0)
    }

    /// Leaf ids owned by `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        match (self.offsets.get(rank), self.counts.get(rank)) {
            (Some(&offset), Some(&count)) => offset..offset + count,
            _ => 0..0,
        }
    }

    /// Rank owning `leaf`, or `None` if the leaf does not exist.
    pub fn rank_of(&self, leaf: usize) -> Option<usize> {
        if leaf >= self.num_leaf {
            return None;
        }

        // Ranks without leaves come last and start beyond every leaf id, so the last
        // offset not exceeding the leaf belongs to its owner.
        Some(self.offsets.partition_point(|&offset| offset <= leaf) - 1)
    }
}
