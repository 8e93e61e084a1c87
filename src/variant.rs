//! # Variant sites and allele observations
//!
//! [`VariantSite`] represents one candidate locus taken from the input VCF
//! for the configured sample. [`AlleleObservation`] is a single read's call
//! at such a site after projecting the alignment through its CIGAR; its
//! [`Allele`] uses the extended {0, 1, E} alphabet, where `Other` marks a
//! base matching neither allele and is filtered out before phasing.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allele {
    Ref,
    Alt,
    /// The observed base matched neither the reference nor the alternative
    /// allele.
    Other,
}

impl Allele {
    /// The 0/1 haplotype index of this allele; `None` for [`Allele::Other`].
    pub fn as_index(self) -> Option<u8> {
        match self {
            Allele::Ref => Some(0),
            Allele::Alt => Some(1),
            Allele::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Genotype {
    HomRef,
    Het,
    HomAlt,
    Missing,
}

impl Genotype {
    pub fn is_homozygous(self) -> bool {
        matches!(self, Genotype::HomRef | Genotype::HomAlt)
    }
}

/// Pre-existing phasing of a site: `first_allele` is the allele written
/// before the `|` separator of the genotype, `phase_set` the PS tag value
/// it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SitePhase {
    pub phase_set: i32,
    pub first_allele: u8,
}

/// One biallelic locus of the current chromosome. Positions are 0-based;
/// alleles are single bases for SNVs and arbitrary strings for indels.
#[derive(Debug, Clone)]
pub struct VariantSite {
    pub position: i64,
    pub reference_allele: String,
    pub alternative_allele: String,
    pub genotype: Genotype,
    pub phase: Option<SitePhase>,
}

impl VariantSite {
    pub fn is_snv(&self) -> bool {
        self.reference_allele.len() == 1 && self.alternative_allele.len() == 1
    }
}

/// One read's call at one variant site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlleleObservation {
    pub position: i64,
    pub base: u8,
    pub allele: Allele,
    pub quality: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snv_detection() {
        let site = VariantSite {
            position: 100,
            reference_allele: "A".into(),
            alternative_allele: "T".into(),
            genotype: Genotype::Het,
            phase: None,
        };
        assert!(site.is_snv());

        let indel = VariantSite {
            alternative_allele: "AT".into(),
            ..site
        };
        assert!(!indel.is_snv());
    }

    #[test]
    fn allele_indices() {
        assert_eq!(Some(0), Allele::Ref.as_index());
        assert_eq!(Some(1), Allele::Alt.as_index());
        assert_eq!(None, Allele::Other.as_index());
    }
}
