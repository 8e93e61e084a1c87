//! # Coverage-limited slicing
//!
//! Packs fragments into layers such that within one layer no variant
//! column is spanned by more than `max_coverage` fragments, bounding the
//! phaser's active set. The slicer works in compressed variant-index
//! space: the positions occurring in any fragment are deduplicated,
//! sorted, and assigned contiguous column indices. Downstream phasing
//! consumes the first layer; the remaining layers are kept for their
//! statistics.
use std::collections::{HashMap, HashSet};

use log::{debug, info};
use ndarray::{s, Array1};

use crate::{fragment::Fragment, utils};

struct CoverageMonitor {
    coverage: Array1<u32>,
}

impl CoverageMonitor {
    fn new(columns: usize) -> CoverageMonitor {
        CoverageMonitor {
            coverage: Array1::zeros(columns),
        }
    }

    fn max_in_range(&self, begin: usize, end: usize) -> u32 {
        self.coverage
            .slice(s![begin..end])
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
    }

    fn add_fragment(&mut self, begin: usize, end: usize) {
        self.coverage
            .slice_mut(s![begin..end])
            .mapv_inplace(|c| c + 1);
    }
}

pub struct SliceResult {
    /// Layers of fragments, each respecting the coverage bound; layer 0 is
    /// the one handed to the phaser.
    pub slices: Vec<Vec<Fragment>>,
    /// Distinct variant positions covered by at least one sliced fragment.
    pub accessible_positions: usize,
    /// Fragments spanning fewer than two variants, dropped before slicing.
    pub skipped_fragments: usize,
}

/// Pack `fragments` into coverage-limited layers. Fragments are considered
/// in input order and land in the lowest layer whose coverage over their
/// column interval stays below `max_coverage`.
pub fn slice_fragments(fragments: &[Fragment], max_coverage: u32) -> SliceResult {
    let mut position_list: Vec<i64> = fragments
        .iter()
        .flat_map(|fragment| fragment.observations.iter().map(|obs| obs.position))
        .collect();
    position_list.sort_unstable();
    position_list.dedup();
    info!("Found {} variant positions", position_list.len());

    let position_to_index: HashMap<i64, usize> = position_list
        .iter()
        .enumerate()
        .map(|(index, &position)| (position, index))
        .collect();

    let mut slices: Vec<Vec<Fragment>> = vec![Vec::new()];
    let mut coverages = vec![CoverageMonitor::new(position_list.len())];
    let mut skipped_fragments = 0;
    let mut accessible: HashSet<i64> = HashSet::new();

    for fragment in fragments {
        if fragment.observations.len() < 2 {
            skipped_fragments += 1;
            continue;
        }
        for obs in &fragment.observations {
            accessible.insert(obs.position);
        }
        let begin = position_to_index[&fragment.observations[0].position];
        let end = position_to_index[&fragment.observations[fragment.observations.len() - 1].position] + 1;

        let mut slice_id = 0;
        loop {
            if coverages[slice_id].max_in_range(begin, end) < max_coverage {
                coverages[slice_id].add_fragment(begin, end);
                slices[slice_id].push(fragment.clone());
                break;
            }
            slice_id += 1;
            if slice_id == slices.len() {
                slices.push(Vec::new());
                coverages.push(CoverageMonitor::new(position_list.len()));
            }
        }
    }
    info!("Skipped {skipped_fragments} fragments covering fewer than two variants");

    let unconnected = position_list.len() - accessible.len();
    if !position_list.is_empty() {
        info!(
            "{} of {} variant positions ({:.1}%) have no fragment connecting them to another variant and cannot be phased",
            unconnected,
            position_list.len(),
            utils::percent(unconnected, position_list.len())
        );
    }

    for slice in &mut slices {
        slice.sort_by_key(Fragment::first_position);
    }
    for (slice_id, slice) in slices.iter().enumerate() {
        let covered: HashSet<i64> = slice
            .iter()
            .flat_map(|fragment| fragment.observations.iter().map(|obs| obs.position))
            .collect();
        debug!(
            "Slice {slice_id} contains {} fragments and covers {} of {} variant positions",
            slice.len(),
            covered.len(),
            position_list.len()
        );
    }

    SliceResult {
        slices,
        accessible_positions: accessible.len(),
        skipped_fragments,
    }
}
