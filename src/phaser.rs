//! # Dynamic-programming phaser
//!
//! Finds the minimum-cost bipartition of a coverage-limited read set into
//! two haplotypes. Variant columns are processed left to right; the DP
//! state is the bitmask of haplotype labels over the fragments whose
//! column interval covers the current column. The coverage slicer bounds
//! that active count, so the 2^A state table stays small irrespective of
//! input depth. Column costs are enumerated in Gray-code order so that
//! each state update moves a single fragment between the two sides.
use std::collections::HashMap;

use log::debug;

use crate::fragment::ReadSet;

/// Largest supported active-fragment count. The DP keeps a 2^A state table
/// per column, so `--max-coverage` is capped to this value.
pub const MAX_ACTIVE: usize = 25;

/// One haplotype entry. `allele` is `None` where the column could not be
/// phased (a homozygous choice outside all-het mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperReadEntry {
    pub position: i64,
    pub allele: Option<u8>,
    pub quality: u32,
}

/// The two haplotypes produced by the phaser. Both cover the same position
/// sequence; phased entries carry complementary alleles.
#[derive(Debug, Clone, Default)]
pub struct SuperReads {
    haplotypes: [Vec<SuperReadEntry>; 2],
}

impl SuperReads {
    pub fn from_entries(haplotypes: [Vec<SuperReadEntry>; 2]) -> SuperReads {
        assert_eq!(
            haplotypes[0].len(),
            haplotypes[1].len(),
            "haplotypes must cover the same positions"
        );
        SuperReads { haplotypes }
    }

    pub fn haplotype(&self, index: usize) -> &[SuperReadEntry] {
        &self.haplotypes[index]
    }

    pub fn len(&self) -> usize {
        self.haplotypes[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.haplotypes[0].is_empty()
    }
}

pub struct PhasingResult {
    pub superreads: SuperReads,
    /// Minimum total weighted disagreement achieved by the bipartition.
    pub cost: u64,
    /// Haplotype label of each fragment, indexed by fragment id.
    pub labels: Vec<u8>,
}

struct DpFragment {
    /// Position of the source fragment in the read set.
    index: usize,
    first_column: usize,
    last_column: usize,
    /// (column, allele, weight), sorted by column.
    observations: Vec<(usize, u8, u32)>,
    cursor: usize,
}

struct ColumnTrace {
    active: Vec<usize>,
    /// Full previous-column state for every state of this column.
    predecessor: Vec<u32>,
}

struct ColumnChoice {
    alleles: Option<(u8, u8)>,
    quality: u64,
    cost: u64,
}

/// Phase `readset` into two super-reads minimizing the weighted
/// disagreement between every fragment and its assigned haplotype. With
/// `all_het` set, every column is forced to carry complementary alleles;
/// otherwise homozygous columns are admissible and come out unphased.
pub fn phase(readset: &ReadSet, all_het: bool) -> PhasingResult {
    let positions = readset.positions();
    let n_columns = positions.len();
    if readset.is_empty() || n_columns == 0 {
        return PhasingResult {
            superreads: SuperReads::default(),
            cost: 0,
            labels: vec![0; readset.len()],
        };
    }

    let column_of: HashMap<i64, usize> = positions
        .iter()
        .enumerate()
        .map(|(column, &position)| (position, column))
        .collect();

    let mut dp_fragments: Vec<DpFragment> = Vec::with_capacity(readset.len());
    for (index, fragment) in readset.fragments().iter().enumerate() {
        let observations: Vec<(usize, u8, u32)> = fragment
            .observations
            .iter()
            .filter_map(|obs| {
                obs.allele
                    .as_index()
                    .map(|allele| (column_of[&obs.position], allele, u32::from(obs.quality)))
            })
            .collect();
        let (Some(&(first_column, ..)), Some(&(last_column, ..))) =
            (observations.first(), observations.last())
        else {
            continue;
        };
        dp_fragments.push(DpFragment {
            index,
            first_column,
            last_column,
            observations,
            cursor: 0,
        });
    }

    let mut entering: Vec<Vec<usize>> = vec![Vec::new(); n_columns];
    for (f, fragment) in dp_fragments.iter().enumerate() {
        entering[fragment.first_column].push(f);
    }

    // forward pass
    let mut traces: Vec<ColumnTrace> = Vec::with_capacity(n_columns);
    let mut block_of = vec![0usize; n_columns];
    let mut current_block = 0usize;
    let mut active: Vec<usize> = Vec::new();
    let mut dp: Vec<u64> = vec![0];
    for k in 0..n_columns {
        let stay: Vec<bool> = active
            .iter()
            .map(|&f| dp_fragments[f].last_column >= k)
            .collect();
        let n_stay = stay.iter().filter(|&&s| s).count();
        if n_stay == 0 {
            current_block += 1;
        }
        block_of[k] = current_block;

        let (proj, proj_arg) = project(&dp, &stay);

        let mut next_active: Vec<usize> = active
            .iter()
            .zip(&stay)
            .filter(|(_, &stays)| stays)
            .map(|(&f, _)| f)
            .collect();
        next_active.extend(entering[k].iter().copied());
        let n_active = next_active.len();
        assert!(
            n_active <= MAX_ACTIVE,
            "{n_active} fragments active at one column; the input was not coverage-sliced"
        );

        let col_obs: Vec<Option<(u8, u64)>> = next_active
            .iter()
            .map(|&f| {
                let fragment = &mut dp_fragments[f];
                while fragment.cursor < fragment.observations.len()
                    && fragment.observations[fragment.cursor].0 < k
                {
                    fragment.cursor += 1;
                }
                match fragment.observations.get(fragment.cursor) {
                    Some(&(column, allele, weight)) if column == k => {
                        Some((allele, u64::from(weight)))
                    }
                    _ => None,
                }
            })
            .collect();

        // all fragments start on side 0, then Gray-code enumeration moves
        // one fragment at a time
        let mut weights = [[0u64; 2]; 2];
        for (allele, weight) in col_obs.iter().flatten() {
            weights[0][*allele as usize] += weight;
        }

        let n_states = 1usize << n_active;
        let stay_mask = (1usize << n_stay) - 1;
        let mut dp_next = vec![0u64; n_states];
        let mut predecessor = vec![0u32; n_states];
        let mut state = 0usize;
        for i in 0..n_states {
            if i > 0 {
                let bit = i.trailing_zeros() as usize;
                state ^= 1 << bit;
                if let Some((allele, weight)) = col_obs[bit] {
                    let side = (state >> bit) & 1;
                    weights[side ^ 1][allele as usize] -= weight;
                    weights[side][allele as usize] += weight;
                }
            }
            let compressed = state & stay_mask;
            dp_next[state] = proj[compressed] + choose_column(&weights, all_het).cost;
            predecessor[state] = proj_arg[compressed];
        }

        traces.push(ColumnTrace {
            active: next_active.clone(),
            predecessor,
        });
        active = next_active;
        dp = dp_next;
    }

    let mut best_state = 0usize;
    let mut best_cost = u64::MAX;
    for (state, &cost) in dp.iter().enumerate() {
        if cost < best_cost {
            best_cost = cost;
            best_state = state;
        }
    }

    // backtrace: every fragment's label is its bit at any column where it
    // is active
    let mut labels = vec![0u8; readset.len()];
    let mut state = best_state;
    for trace in traces.iter().rev() {
        for (bit, &f) in trace.active.iter().enumerate() {
            labels[dp_fragments[f].index] = ((state >> bit) & 1) as u8;
        }
        state = trace.predecessor[state] as usize;
    }

    // recompute per-column weights under the final labels
    let mut column_weights = vec![[[0u64; 2]; 2]; n_columns];
    for fragment in &dp_fragments {
        let side = usize::from(labels[fragment.index]);
        for &(column, allele, weight) in &fragment.observations {
            column_weights[column][side][allele as usize] += u64::from(weight);
        }
    }

    // normalize each connected block so that its first phased column
    // carries allele 0 on haplotype 0, making h* lexicographically smallest
    let mut flip_block: HashMap<usize, bool> = HashMap::new();
    for (k, weights) in column_weights.iter().enumerate() {
        let block = block_of[k];
        if flip_block.contains_key(&block) {
            continue;
        }
        if let Some((a0, _)) = choose_column(weights, all_het).alleles {
            flip_block.insert(block, a0 == 1);
        }
    }
    for (k, weights) in column_weights.iter_mut().enumerate() {
        if flip_block.get(&block_of[k]).copied().unwrap_or(false) {
            weights.swap(0, 1);
        }
    }
    for fragment in &dp_fragments {
        if flip_block
            .get(&block_of[fragment.first_column])
            .copied()
            .unwrap_or(false)
        {
            labels[fragment.index] ^= 1;
        }
    }

    let mut haplotypes: [Vec<SuperReadEntry>; 2] = [
        Vec::with_capacity(n_columns),
        Vec::with_capacity(n_columns),
    ];
    let mut total_cost = 0u64;
    for (k, weights) in column_weights.iter().enumerate() {
        let choice = choose_column(weights, all_het);
        total_cost += choice.cost;
        let quality = choice.quality.min(u64::from(u32::MAX)) as u32;
        let (a0, a1) = match choice.alleles {
            Some((a0, a1)) => (Some(a0), Some(a1)),
            None => (None, None),
        };
        haplotypes[0].push(SuperReadEntry {
            position: positions[k],
            allele: a0,
            quality,
        });
        haplotypes[1].push(SuperReadEntry {
            position: positions[k],
            allele: a1,
            quality,
        });
    }
    debug_assert_eq!(best_cost, total_cost);
    debug!(
        "Optimal bipartition over {} columns has cost {total_cost}",
        n_columns
    );

    PhasingResult {
        superreads: SuperReads::from_entries(haplotypes),
        cost: total_cost,
        labels,
    }
}

/// Minimize over states sharing the labels of the surviving fragments.
/// `stay[bit]` marks the bits of `dp`'s state space that survive into the
/// next column; surviving bits keep their relative order.
fn project(dp: &[u64], stay: &[bool]) -> (Vec<u64>, Vec<u32>) {
    let n_stay = stay.iter().filter(|&&s| s).count();
    let mut proj = vec![u64::MAX; 1 << n_stay];
    let mut proj_arg = vec![0u32; 1 << n_stay];
    for (state, &cost) in dp.iter().enumerate() {
        let mut compressed = 0usize;
        let mut out = 0usize;
        for (bit, &stays) in stay.iter().enumerate() {
            if stays {
                compressed |= ((state >> bit) & 1) << out;
                out += 1;
            }
        }
        if cost < proj[compressed] {
            proj[compressed] = cost;
            proj_arg[compressed] = state as u32;
        }
    }

    (proj, proj_arg)
}

/// Pick the allele pair (haplotype 0, haplotype 1) minimizing the weight of
/// contradicting observations at one column. Ties prefer the phased pair
/// with allele 0 first; a strictly better homozygous pair (admissible only
/// outside all-het mode) yields an unphased column.
fn choose_column(weights: &[[u64; 2]; 2], all_het: bool) -> ColumnChoice {
    let mut candidates: Vec<(u8, u8)> = vec![(0, 1), (1, 0)];
    if !all_het {
        candidates.push((0, 0));
        candidates.push((1, 1));
    }

    let mut best = (0u8, 1u8);
    let mut best_cost = u64::MAX;
    for (a0, a1) in candidates {
        let cost = weights[0][1 - a0 as usize] + weights[1][1 - a1 as usize];
        if cost < best_cost {
            best_cost = cost;
            best = (a0, a1);
        }
    }

    let support = weights[0][best.0 as usize] + weights[1][best.1 as usize];
    ColumnChoice {
        alleles: (best.0 != best.1).then_some(best),
        quality: support.saturating_sub(best_cost),
        cost: best_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fragment::Fragment,
        variant::{Allele, AlleleObservation},
    };

    fn fragment(name: &str, observations: &[(i64, u8)], quality: u8) -> Fragment {
        let observations = observations
            .iter()
            .map(|&(position, allele)| AlleleObservation {
                position,
                base: b'N',
                allele: if allele == 0 { Allele::Ref } else { Allele::Alt },
                quality,
            })
            .collect();
        Fragment::new(name.into(), 60, observations)
    }

    fn alleles(superreads: &SuperReads, haplotype: usize) -> Vec<Option<u8>> {
        superreads
            .haplotype(haplotype)
            .iter()
            .map(|entry| entry.allele)
            .collect()
    }

    /// Recompute the weighted disagreement of a solution from scratch.
    fn recomputed_cost(readset: &ReadSet, result: &PhasingResult) -> u64 {
        let haplotype: HashMap<i64, u8> = result
            .superreads
            .haplotype(0)
            .iter()
            .filter_map(|entry| entry.allele.map(|a| (entry.position, a)))
            .collect();
        let mut cost = 0u64;
        for (fragment, &label) in readset.fragments().iter().zip(&result.labels) {
            for obs in &fragment.observations {
                let Some(observed) = obs.allele.as_index() else {
                    continue;
                };
                let Some(&h) = haplotype.get(&obs.position) else {
                    continue;
                };
                if observed != h ^ label {
                    cost += u64::from(obs.quality);
                }
            }
        }
        cost
    }

    #[test]
    fn toy_matrix_is_phased_perfectly() {
        let readset = ReadSet::finalize(vec![
            fragment("f1", &[(100, 0), (200, 0), (400, 1)], 1),
            fragment("f2", &[(200, 0), (300, 1), (400, 1)], 1),
            fragment("f3", &[(100, 0), (300, 1)], 1),
        ]);
        let result = phase(&readset, true);

        assert_eq!(0, result.cost);
        assert_eq!(
            vec![Some(0), Some(0), Some(1), Some(1)],
            alleles(&result.superreads, 0)
        );
        assert_eq!(
            vec![Some(1), Some(1), Some(0), Some(0)],
            alleles(&result.superreads, 1)
        );
    }

    #[test]
    fn superreads_share_positions_and_complement() {
        let readset = ReadSet::finalize(vec![
            fragment("a", &[(10, 0), (20, 1), (30, 0)], 5),
            fragment("b", &[(20, 0), (30, 1)], 7),
            fragment("c", &[(10, 1), (30, 1)], 3),
        ]);
        let result = phase(&readset, true);

        let h0 = result.superreads.haplotype(0);
        let h1 = result.superreads.haplotype(1);
        assert_eq!(h0.len(), h1.len());
        for (e0, e1) in h0.iter().zip(h1) {
            assert_eq!(e0.position, e1.position);
            assert_eq!(e0.allele.map(|a| a ^ 1), e1.allele);
        }
    }

    #[test]
    fn cost_matches_recomputation() {
        let readset = ReadSet::finalize(vec![
            fragment("deep", &[(100, 0), (200, 0), (300, 0)], 10),
            fragment("left", &[(100, 0), (200, 1)], 2),
            fragment("right", &[(200, 1), (300, 1)], 2),
        ]);
        let result = phase(&readset, true);

        assert_eq!(2, result.cost);
        assert_eq!(result.cost, recomputed_cost(&readset, &result));
    }

    #[test]
    fn first_phased_column_carries_allele_zero() {
        for first_allele in [0u8, 1u8] {
            let readset = ReadSet::finalize(vec![fragment(
                "solo",
                &[(100, first_allele), (200, first_allele ^ 1)],
                30,
            )]);
            let result = phase(&readset, true);
            assert_eq!(vec![Some(0), Some(1)], alleles(&result.superreads, 0));
        }
    }

    #[test]
    fn each_block_is_normalized_independently() {
        let readset = ReadSet::finalize(vec![
            fragment("a", &[(100, 0), (200, 1)], 30),
            fragment("b", &[(300, 1), (400, 0)], 30),
        ]);
        let result = phase(&readset, true);
        assert_eq!(
            vec![Some(0), Some(1), Some(0), Some(1)],
            alleles(&result.superreads, 0)
        );
    }

    #[test]
    fn homozygous_column_is_unphased_outside_all_het() {
        let readset = ReadSet::finalize(vec![
            fragment("a", &[(100, 1), (200, 0)], 1),
            fragment("b", &[(100, 1), (200, 1)], 1),
        ]);

        let relaxed = phase(&readset, false);
        assert_eq!(0, relaxed.cost);
        assert_eq!(vec![None, Some(0)], alleles(&relaxed.superreads, 0));
        assert_eq!(vec![None, Some(1)], alleles(&relaxed.superreads, 1));

        let strict = phase(&ReadSet::finalize(vec![
            fragment("a", &[(100, 1), (200, 0)], 1),
            fragment("b", &[(100, 1), (200, 1)], 1),
        ]), true);
        assert_eq!(1, strict.cost);
    }

    #[test]
    fn conflicting_fragments_split_by_weight() {
        // the two heavy fragments agree, the light one contradicts them
        let readset = ReadSet::finalize(vec![
            fragment("heavy1", &[(10, 0), (20, 1)], 40),
            fragment("heavy2", &[(10, 0), (20, 1)], 40),
            fragment("light", &[(10, 0), (20, 0)], 5),
        ]);
        let result = phase(&readset, true);

        // cheapest: pay the light fragment's disagreement at one column
        assert_eq!(5, result.cost);
        assert_eq!(vec![Some(0), Some(1)], alleles(&result.superreads, 0));
        assert_eq!(result.cost, recomputed_cost(&readset, &result));
    }

    #[test]
    fn empty_read_set_yields_empty_superreads() {
        let result = phase(&ReadSet::default(), true);
        assert!(result.superreads.is_empty());
        assert_eq!(0, result.cost);
    }

    #[test]
    fn quality_reflects_vote_margin() {
        let readset = ReadSet::finalize(vec![
            fragment("a", &[(10, 0), (20, 1)], 30),
            fragment("b", &[(10, 0), (20, 1)], 10),
        ]);
        let result = phase(&readset, true);
        // both fragments end up on one side; margin is the full support
        assert_eq!(40, result.superreads.haplotype(0)[0].quality);
        assert_eq!(40, result.superreads.haplotype(1)[1].quality);
    }
}
