//! # Alignment input and fragment assembly
//!
//! [`BamReader`] wraps an indexed BAM/CRAM and turns the raw alignments of
//! one chromosome into [`Fragment`]s: it filters unusable records, projects
//! the survivors onto the variant list, groups them by read name and merges
//! mate pairs. A missing index is built once before opening. The same
//! machinery also reads haplotagged alignments for the extension pipeline,
//! additionally extracting the HP and PS tags.
use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use rust_htslib::bam::{self, record::Aux, Read, Record};

use crate::{
    extend::TaggedFragment,
    fragment::{self, Fragment},
    projection,
    variant::VariantSite,
};

pub struct BamReader {
    reader: bam::IndexedReader,
    mapq_threshold: u8,
    sample_to_read_groups: HashMap<String, HashSet<String>>,
}

/// Counters for records rejected before projection.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipCounts {
    /// Unmapped, secondary, or supplementary alignments.
    pub flags: usize,
    pub mapping_quality: usize,
    pub missing_cigar: usize,
    pub read_group: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.flags + self.mapping_quality + self.missing_cigar + self.read_group
    }
}

impl BamReader {
    /// Open `path`, building the index first if none is present.
    pub fn open(path: &str, mapq_threshold: u8) -> Result<BamReader> {
        ensure_index(path)?;
        let reader = bam::IndexedReader::from_path(path)
            .with_context(|| format!("Failed to open alignment file {path}"))?;
        let sample_to_read_groups =
            sample_map_from_header(&bam::Header::from_template(reader.header()));

        Ok(BamReader {
            reader,
            mapq_threshold,
            sample_to_read_groups,
        })
    }

    /// Fragments of `chromosome` with at least one allele observation,
    /// mate pairs merged, plus the skip statistics. When `sample` is given,
    /// only reads from its read groups are used.
    pub fn read_fragments(
        &mut self,
        chromosome: &str,
        variants: &[VariantSite],
        sample: Option<&str>,
    ) -> Result<(Vec<Fragment>, SkipCounts)> {
        let (raw, counts) = self.collect_fragments(chromosome, variants, sample)?;
        let fragments =
            fragment::merge_by_name(raw.into_iter().map(|tagged| tagged.fragment).collect())?;

        Ok((fragments, counts))
    }

    /// Like [`BamReader::read_fragments`], but keeps each alignment
    /// separate and extracts its HP and PS tags. Haplotags apply to single
    /// alignments, so mates are not merged.
    pub fn read_tagged_fragments(
        &mut self,
        chromosome: &str,
        variants: &[VariantSite],
        sample: Option<&str>,
    ) -> Result<(Vec<TaggedFragment>, SkipCounts)> {
        self.collect_fragments(chromosome, variants, sample)
    }

    fn collect_fragments(
        &mut self,
        chromosome: &str,
        variants: &[VariantSite],
        sample: Option<&str>,
    ) -> Result<(Vec<TaggedFragment>, SkipCounts)> {
        let read_groups = sample.map(|name| {
            self.sample_to_read_groups
                .get(name)
                .cloned()
                .unwrap_or_else(|| {
                    warn!("Sample {name} has no read groups in the alignment header");
                    HashSet::new()
                })
        });

        self.reader
            .fetch(chromosome)
            .with_context(|| format!("Failed to fetch chromosome {chromosome} from alignment"))?;

        let mut counts = SkipCounts::default();
        let mut fragments = Vec::new();
        let mut i = 0usize; // cursor into the position-sorted variant list
        let mut record = Record::new();
        while let Some(result) = self.reader.read(&mut record) {
            result.with_context(|| format!("Error reading alignment record on {chromosome}"))?;
            if record.is_unmapped() || record.is_secondary() || record.is_supplementary() {
                counts.flags += 1;
                continue;
            }
            if record.mapq() < self.mapq_threshold {
                counts.mapping_quality += 1;
                continue;
            }
            if record.cigar_len() == 0 {
                counts.missing_cigar += 1;
                continue;
            }
            if let Some(read_groups) = &read_groups {
                match record_read_group(&record) {
                    Some(rg) if read_groups.contains(&rg) => {}
                    _ => {
                        counts.read_group += 1;
                        continue;
                    }
                }
            }

            // alignments are coordinate sorted: variants left behind by
            // this record's start are left behind for all later records
            while i < variants.len() && variants[i].position < record.pos() {
                i += 1;
            }
            let seq = record.seq().as_bytes();
            let observations = projection::project_alleles(
                variants,
                i,
                record.pos(),
                &record.cigar(),
                &seq,
                record.qual(),
            );
            if observations.is_empty() {
                continue;
            }

            let name = String::from_utf8_lossy(record.qname()).into_owned();
            fragments.push(TaggedFragment {
                fragment: Fragment::new(name, record.mapq(), observations),
                haplotype: haplotype_from_tag(aux_int(&record, b"HP")),
                phase_set: aux_int(&record, b"PS"),
            });
        }

        Ok((fragments, counts))
    }
}

/// Create a .bai index next to the alignment if none exists yet.
fn ensure_index(path: &str) -> Result<()> {
    let appended = format!("{path}.bai");
    let replaced = Path::new(path).with_extension("bai");
    let csi = format!("{path}.csi");
    if Path::new(&appended).exists() || replaced.exists() || Path::new(&csi).exists() {
        return Ok(());
    }
    info!("Alignment index not found, creating it now");
    bam::index::build(path, None::<&str>, bam::index::Type::Bai, 1)
        .with_context(|| format!("Failed to build index for alignment file {path}"))?;

    Ok(())
}

/// Sample name → read group ids, from the alignment header's RG lines.
fn sample_map_from_header(header: &bam::Header) -> HashMap<String, HashSet<String>> {
    let mut samples: HashMap<String, HashSet<String>> = HashMap::new();
    for (key, records) in header.to_hashmap() {
        if key != "RG" {
            continue;
        }
        for record in records {
            if let (Some(id), Some(sample)) = (record.get("ID"), record.get("SM")) {
                samples
                    .entry(sample.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }

    samples
}

fn record_read_group(record: &Record) -> Option<String> {
    match record.aux(b"RG") {
        Ok(Aux::String(rg)) => Some(rg.to_owned()),
        _ => None,
    }
}

fn aux_int(record: &Record, tag: &[u8]) -> i32 {
    match record.aux(tag) {
        Ok(Aux::U8(v)) => i32::from(v),
        Ok(Aux::I8(v)) => i32::from(v),
        Ok(Aux::U16(v)) => i32::from(v),
        Ok(Aux::I16(v)) => i32::from(v),
        Ok(Aux::U32(v)) => i32::try_from(v).unwrap_or(-1),
        Ok(Aux::I32(v)) => v,
        _ => -1,
    }
}

/// Haplotagged alignments carry HP values 1 and 2; anything else is
/// treated as untagged.
fn haplotype_from_tag(hp: i32) -> i32 {
    match hp {
        1 => 0,
        2 => 1,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haplotype_tag_normalization() {
        assert_eq!(0, haplotype_from_tag(1));
        assert_eq!(1, haplotype_from_tag(2));
        assert_eq!(-1, haplotype_from_tag(0));
        assert_eq!(-1, haplotype_from_tag(-1));
        assert_eq!(-1, haplotype_from_tag(3));
    }
}
