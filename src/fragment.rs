//! # Read fragments and the finalized read set
//!
//! A [`Fragment`] is one read, or one merged mate pair, viewed as a sparse
//! row of allele observations over the variant sites of a chromosome.
//! This module also hosts the mate-pair merge, the fragment filter that
//! guards the phaser's input invariants, and [`ReadSet`], the frozen
//! collection the phaser consumes.
use crate::{
    errors::PhasingError,
    variant::{Allele, AlleleObservation},
};

/// Mapping quality of a fragment: single-end reads keep one value, merged
/// mate pairs record both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingQuality {
    Single(u8),
    Pair(u8, u8),
}

impl MappingQuality {
    fn first(self) -> u8 {
        match self {
            MappingQuality::Single(q) | MappingQuality::Pair(q, _) => q,
        }
    }
}

/// One read or merged mate pair. For a merged pair, `mate_boundary` is the
/// index of mate B's first observation and stands in for the sentinel gap
/// between the two mates.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    pub mapq: MappingQuality,
    pub observations: Vec<AlleleObservation>,
    pub mate_boundary: Option<usize>,
    /// Assigned by [`ReadSet::finalize`]; `None` until then.
    pub id: Option<usize>,
}

impl Fragment {
    pub fn new(name: String, mapq: u8, observations: Vec<AlleleObservation>) -> Fragment {
        Fragment {
            name,
            mapq: MappingQuality::Single(mapq),
            observations,
            mate_boundary: None,
            id: None,
        }
    }

    pub fn first_position(&self) -> Option<i64> {
        self.observations.first().map(|obs| obs.position)
    }

    pub fn last_position(&self) -> Option<i64> {
        self.observations.last().map(|obs| obs.position)
    }
}

/// Merge fragments that occur twice under the same name (mate pairs) into
/// single fragments; the merged observation list is mate A's observations
/// followed by mate B's, with the boundary recorded. Names occurring more
/// than twice cannot be paired and fail the chromosome.
pub fn merge_by_name(mut fragments: Vec<Fragment>) -> Result<Vec<Fragment>, PhasingError> {
    // stable sort keeps mates in coordinate order within one name
    fragments.sort_by(|a, b| a.name.cmp(&b.name));

    let mut result = Vec::with_capacity(fragments.len());
    let mut iter = fragments.into_iter().peekable();
    while let Some(first) = iter.next() {
        match iter.next_if(|f| f.name == first.name) {
            None => result.push(first),
            Some(second) => {
                if iter.peek().is_some_and(|f| f.name == first.name) {
                    return Err(PhasingError::AmbiguousPair(first.name));
                }
                result.push(merge_pair(first, second));
            }
        }
    }

    Ok(result)
}

fn merge_pair(mate_a: Fragment, mate_b: Fragment) -> Fragment {
    let boundary = mate_a.observations.len();
    let mut observations = mate_a.observations;
    observations.extend(mate_b.observations);

    Fragment {
        name: mate_a.name,
        mapq: MappingQuality::Pair(mate_a.mapq.first(), mate_b.mapq.first()),
        observations,
        mate_boundary: Some(boundary),
        id: None,
    }
}

/// Drop fragments that carry an observation matching neither allele, whose
/// observation positions are not strictly increasing across both mates
/// combined, or that carry fewer than `min_observations` observations.
/// Returns the survivors and the number of dropped fragments.
pub fn filter_fragments(
    fragments: Vec<Fragment>,
    min_observations: usize,
) -> (Vec<Fragment>, usize) {
    let before = fragments.len();
    let kept: Vec<Fragment> = fragments
        .into_iter()
        .filter(|fragment| fragment_is_usable(fragment, min_observations))
        .collect();
    let dropped = before - kept.len();

    (kept, dropped)
}

fn fragment_is_usable(fragment: &Fragment, min_observations: usize) -> bool {
    if fragment.observations.len() < min_observations {
        return false;
    }
    let mut previous = i64::MIN;
    for obs in &fragment.observations {
        if obs.allele == Allele::Other || obs.position <= previous {
            return false;
        }
        previous = obs.position;
    }

    true
}

/// The canonical input to the phaser: fragments sorted by their first
/// observation position, each carrying a unique id. Frozen after
/// construction.
#[derive(Debug, Default)]
pub struct ReadSet {
    fragments: Vec<Fragment>,
}

impl ReadSet {
    /// Sort `fragments` by first observation position and assign ids in
    /// that order.
    pub fn finalize(mut fragments: Vec<Fragment>) -> ReadSet {
        fragments.sort_by_key(Fragment::first_position);
        for (id, fragment) in fragments.iter_mut().enumerate() {
            fragment.id = Some(id);
        }
        ReadSet { fragments }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Sorted, deduplicated variant positions covered by the read set.
    pub fn positions(&self) -> Vec<i64> {
        let mut positions: Vec<i64> = self
            .fragments
            .iter()
            .flat_map(|fragment| fragment.observations.iter().map(|obs| obs.position))
            .collect();
        positions.sort_unstable();
        positions.dedup();

        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn observation(position: i64, allele: Allele, quality: u8) -> AlleleObservation {
        AlleleObservation {
            position,
            base: b'N',
            allele,
            quality,
        }
    }

    fn fragment(name: &str, positions: &[i64]) -> Fragment {
        let observations = positions
            .iter()
            .map(|&p| observation(p, Allele::Ref, 30))
            .collect();
        Fragment::new(name.into(), 60, observations)
    }

    #[test]
    fn singletons_pass_through_merge() {
        let merged = merge_by_name(vec![fragment("a", &[1, 2]), fragment("b", &[3, 4])]).unwrap();
        assert_eq!(2, merged.len());
        assert!(merged.iter().all(|f| f.mate_boundary.is_none()));
    }

    #[test]
    fn pairs_are_merged_with_boundary() {
        let merged = merge_by_name(vec![fragment("a", &[1, 2]), fragment("a", &[8, 9])]).unwrap();
        assert_eq!(1, merged.len());
        let pair = &merged[0];
        assert_eq!(Some(2), pair.mate_boundary);
        assert_eq!(MappingQuality::Pair(60, 60), pair.mapq);
        assert_eq!(
            vec![1, 2, 8, 9],
            pair.observations.iter().map(|o| o.position).collect::<Vec<_>>()
        );
    }

    #[test]
    fn triplets_are_ambiguous() {
        let result = merge_by_name(vec![
            fragment("a", &[1]),
            fragment("a", &[2]),
            fragment("a", &[3]),
        ]);
        assert!(matches!(result, Err(PhasingError::AmbiguousPair(_))));
    }

    #[test]
    fn filter_drops_error_alleles() {
        let mut bad = fragment("a", &[1, 2]);
        bad.observations[1].allele = Allele::Other;
        let (kept, dropped) = filter_fragments(vec![bad, fragment("b", &[1, 2])], 2);
        assert_eq!(1, kept.len());
        assert_eq!(1, dropped);
        assert_eq!("b", kept[0].name);
    }

    #[test]
    fn filter_enforces_monotonicity_across_mates() {
        // mates overlap: positions 5,9 then 8,12
        let pair = merge_pair(fragment("a", &[5, 9]), fragment("a", &[8, 12]));
        let (kept, dropped) = filter_fragments(vec![pair], 2);
        assert!(kept.is_empty());
        assert_eq!(1, dropped);
    }

    #[test]
    fn filter_enforces_minimum_observations() {
        let (kept, dropped) = filter_fragments(vec![fragment("a", &[7])], 2);
        assert!(kept.is_empty());
        assert_eq!(1, dropped);
    }

    #[test]
    fn finalize_sorts_and_assigns_ids() {
        let readset = ReadSet::finalize(vec![fragment("late", &[50, 60]), fragment("early", &[10, 20])]);
        assert_eq!("early", readset.fragments()[0].name);
        assert_eq!(Some(0), readset.fragments()[0].id);
        assert_eq!(Some(1), readset.fragments()[1].id);
        assert_eq!(vec![10, 20, 50, 60], readset.positions());
    }
}
