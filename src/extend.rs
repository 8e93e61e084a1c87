//! # Phase extension from haplotagged reads
//!
//! An independent pipeline that propagates phase to variants the phaser
//! could not place, using reads that already carry haplotype (HP) and
//! phase-set (PS) tags. Every observation of a tagged read votes for the
//! key `(PS, HP XOR allele)` with its base quality as weight, mapping the
//! read's haplotype onto a canonical ref/alt orientation within its phase
//! set. Per position, the strongest key wins if it holds a large enough
//! share of the evidence and the surrounding reference is not a long
//! homopolymer.
use std::collections::HashMap;

use log::info;

use crate::{
    fragment::Fragment,
    phaser::{SuperReadEntry, SuperReads},
    variant::VariantSite,
};

/// A fragment read from a haplotagged alignment. `haplotype` is 0 or 1
/// (negative when the read carries no usable tag), `phase_set` the PS tag
/// value.
#[derive(Debug)]
pub struct TaggedFragment {
    pub fragment: Fragment,
    pub haplotype: i32,
    pub phase_set: i32,
}

/// Per-position vote table: position → (phase set, allele) → accumulated
/// quality.
pub type VoteTable = HashMap<i64, HashMap<(i32, u8), u64>>;

pub struct ExtendOptions {
    /// Minimum percentage of the total evidence the winning vote must hold
    /// to phase a previously unphased variant.
    pub gap_threshold: u32,
    /// Homopolymer length at which a neighboring variant is disqualified;
    /// 0 disables the guard.
    pub cut_poly: usize,
    pub only_indels: bool,
}

/// Accumulate weighted votes at every non-homozygous variant position
/// visited by a tagged fragment. Untagged fragments are ignored.
pub fn compute_votes(variants: &[VariantSite], fragments: &[TaggedFragment]) -> VoteTable {
    let homozygous: HashMap<i64, bool> = variants
        .iter()
        .map(|site| (site.position, site.genotype.is_homozygous()))
        .collect();

    let mut votes = VoteTable::new();
    for tagged in fragments {
        if tagged.haplotype < 0 || tagged.phase_set < 0 {
            continue;
        }
        let haplotype = (tagged.haplotype & 1) as u8;
        for obs in &tagged.fragment.observations {
            if homozygous.get(&obs.position).copied().unwrap_or(true) {
                continue;
            }
            let Some(allele) = obs.allele.as_index() else {
                continue;
            };
            let entry = votes.entry(obs.position).or_default();
            *entry
                .entry((tagged.phase_set, haplotype ^ allele))
                .or_insert(0) += u64::from(obs.quality);
        }
    }

    votes
}

/// Decide per voted position whether to extend phase, and build the
/// resulting super-reads and phase-set assignment. `reference` is the full
/// chromosome sequence; without it the homopolymer guard is skipped.
pub fn extend_phase(
    variants: &[VariantSite],
    votes: &VoteTable,
    reference: Option<&[u8]>,
    options: &ExtendOptions,
) -> (SuperReads, HashMap<i64, i64>) {
    let site_of: HashMap<i64, &VariantSite> =
        variants.iter().map(|site| (site.position, site)).collect();

    let mut haplotypes: [Vec<SuperReadEntry>; 2] = [Vec::new(), Vec::new()];
    let mut components: HashMap<i64, i64> = HashMap::new();
    let mut positions: Vec<i64> = votes.keys().copied().collect();
    positions.sort_unstable();

    for position in positions {
        let Some(site) = site_of.get(&position) else {
            continue;
        };
        let already_phased = site.phase.is_some();
        let ((phase_set, allele), score, fraction) = best_candidate(&votes[&position]);

        if fraction * 100. < f64::from(options.gap_threshold) && !already_phased {
            continue;
        }
        if options.only_indels && site.is_snv() && !already_phased {
            continue;
        }
        if options.cut_poly > 0 {
            if let Some(reference) = reference {
                let rightward = homopolymer_run(reference, position + 1, 1, options.cut_poly);
                let leftward = homopolymer_run(reference, position, -1, options.cut_poly);
                if leftward.max(rightward) >= options.cut_poly {
                    continue;
                }
            }
        }

        components.insert(position, i64::from(phase_set));
        let quality = score.min(u64::from(u32::MAX)) as u32;
        haplotypes[0].push(SuperReadEntry {
            position,
            allele: Some(allele),
            quality,
        });
        haplotypes[1].push(SuperReadEntry {
            position,
            allele: Some(allele ^ 1),
            quality,
        });
    }
    info!("Extended phase to {} variants", haplotypes[0].len());

    (SuperReads::from_entries(haplotypes), components)
}

/// The highest-scoring `(phase set, allele)` key at one position, its
/// score, and its fraction of the total evidence. Ties break towards the
/// smaller key for determinism.
fn best_candidate(candidates: &HashMap<(i32, u8), u64>) -> ((i32, u8), u64, f64) {
    let mut entries: Vec<(&(i32, u8), &u64)> = candidates.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    let total: u64 = entries.iter().map(|(_, &score)| score).sum();
    let (&key, &score) = entries[0];
    let fraction = if total == 0 {
        0.
    } else {
        score as f64 / total as f64
    };

    (key, score, fraction)
}

/// Length of the run of bases identical to the base at `start`, walking in
/// direction `step` (+1 or -1) and truncated at `threshold`. Out-of-range
/// starts yield 0.
pub fn homopolymer_run(reference: &[u8], start: i64, step: i64, threshold: usize) -> usize {
    if start < 0 || start >= reference.len() as i64 {
        return 0;
    }
    let anchor = reference[start as usize].to_ascii_uppercase();
    let mut run = 0;
    let mut i = start;
    while run < threshold
        && i >= 0
        && i < reference.len() as i64
        && reference[i as usize].to_ascii_uppercase() == anchor
    {
        run += 1;
        i += step;
    }

    run
}
