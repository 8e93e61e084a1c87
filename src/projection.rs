//! # Projecting alignments onto variant sites
//!
//! Walks an alignment's CIGAR with a read cursor and a reference cursor and
//! emits one [`AlleleObservation`] for every variant site that falls inside
//! an aligned block. Insertions and soft clips advance only the read
//! cursor, deletions and reference skips only the reference cursor, hard
//! clips and padding neither, so a variant hidden under a deletion is never
//! observed.
use rust_htslib::bam::record::CigarStringView;

use crate::{
    utils::cigar,
    variant::{Allele, AlleleObservation, VariantSite},
};

/// Base quality substituted when the alignment carries no quality string
/// (htslib reports those positions as 0xff).
pub const DEFAULT_BASE_QUALITY: u8 = 30;

const MISSING_QUALITY: u8 = 0xff;

/// Emit allele observations for all `variants` covered by aligned blocks of
/// one read. `start` must index the first variant that could still overlap
/// the read; earlier sites are never revisited since both the variant list
/// and the alignments are position sorted.
pub fn project_alleles(
    variants: &[VariantSite],
    start: usize,
    read_start: i64,
    cigar: &CigarStringView,
    seq: &[u8],
    qual: &[u8],
) -> Vec<AlleleObservation> {
    let mut observations = Vec::new();
    let mut j = start; // index into the variant list
    let mut p = read_start; // reference cursor
    let mut s = 0usize; // read cursor

    for op in cigar.iter() {
        let len = i64::from(op.len());
        if cigar::is_aligned_block(op) {
            let s_next = s + len as usize;
            let p_next = p + len;
            // leave behind variants starting before this block
            while j < variants.len() && variants[j].position < p {
                j += 1;
            }
            while j < variants.len() && p < p_next {
                if variants[j].position == p {
                    observations.push(observe(&variants[j], s, seq, qual));
                    j += 1;
                }
                s += 1;
                p += 1;
            }
            s = s_next;
            p = p_next;
        } else if cigar::consumes_query(op) {
            s += len as usize;
        } else if cigar::consumes_ref(op) {
            p += len;
        }
        // hard clip and padding advance neither cursor
    }

    observations
}

fn observe(site: &VariantSite, s: usize, seq: &[u8], qual: &[u8]) -> AlleleObservation {
    let base = seq.get(s).copied().unwrap_or(b'N').to_ascii_uppercase();
    let allele = if matches_allele(base, &site.reference_allele) {
        Allele::Ref
    } else if matches_allele(base, &site.alternative_allele) {
        Allele::Alt
    } else {
        Allele::Other
    };
    let quality = match qual.get(s) {
        Some(&q) if q != MISSING_QUALITY => q,
        _ => DEFAULT_BASE_QUALITY,
    };

    AlleleObservation {
        position: site.position,
        base,
        allele,
        quality,
    }
}

fn matches_allele(base: u8, allele: &str) -> bool {
    allele.len() == 1 && allele.as_bytes()[0].to_ascii_uppercase() == base
}
