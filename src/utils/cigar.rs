//! # CIGAR Utils
//!
//! Functions to check which category CIGAR operations fall into,
//! which informs how they move the read and reference cursors during
//! allele projection.
use rust_htslib::bam::record::{Cigar, CigarStringView};

/// Check if the provided cigar operation `op` advances the
/// position in the reference sequence.
pub fn consumes_ref(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Del(_) | Cigar::RefSkip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Check if the provided cigar operation `op` advances the
/// position in the query sequence.
pub fn consumes_query(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Check if `op` aligns query bases against reference bases, i.e. is one of
/// the operations inside which allele observations can be made.
pub fn is_aligned_block(op: &Cigar) -> bool {
    matches!(op, Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_))
}

/// Full query length implied by the CIGAR, counting hard-clipped bases.
/// Used for records that carry no stored sequence.
pub fn read_len_from_cigar(cigar: &CigarStringView) -> usize {
    cigar
        .iter()
        .map(|op| {
            if consumes_query(op) || matches!(op, Cigar::HardClip(_)) {
                op.len() as usize
            } else {
                0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use rust_htslib::bam::record::CigarString;

    use super::*;

    #[test]
    fn read_len_counts_clips() {
        let cigar = CigarString(vec![
            Cigar::HardClip(10),
            Cigar::Match(50),
            Cigar::Del(5),
            Cigar::SoftClip(3),
        ])
        .into_view(0);
        assert_eq!(63, read_len_from_cigar(&cigar));
    }

    #[test]
    fn aligned_blocks() {
        assert!(is_aligned_block(&Cigar::Match(1)));
        assert!(is_aligned_block(&Cigar::Equal(1)));
        assert!(is_aligned_block(&Cigar::Diff(1)));
        assert!(!is_aligned_block(&Cigar::Ins(1)));
        assert!(!is_aligned_block(&Cigar::Del(1)));
    }
}
