//! # VCF input and phased output
//!
//! [`VcfReader`] streams the input VCF one chromosome at a time, keeping
//! the raw records (they are written back out) next to the [`VariantSite`]s
//! extracted for the configured sample. [`PhasedVcfWriter`] reuses the
//! input header, adds a PS format line, and rewrites the target sample's
//! genotype as `a|b` plus a PS tag wherever a phasing result covers the
//! position.
use std::collections::HashMap;
use std::str;

use anyhow::{Context, Result};
use log::warn;
use rust_htslib::bcf::{
    self,
    header::{Header, HeaderView},
    record::GenotypeAllele,
    Format, Read,
};

use crate::{
    errors::PhasingError,
    phaser::SuperReads,
    variant::{Genotype, SitePhase, VariantSite},
};

/// All records of one chromosome, in input order, with the variant sites
/// extracted for the configured sample.
pub struct VcfChromosome {
    pub name: String,
    pub records: Vec<bcf::Record>,
    pub variants: Vec<VariantSite>,
}

pub struct VcfReader {
    reader: bcf::Reader,
    samples: Vec<String>,
    sample_index: usize,
    has_ps: bool,
    pending: Option<bcf::Record>,
}

impl VcfReader {
    /// Open `path` and select `sample`, or the first sample of the file if
    /// none is given.
    pub fn open(path: &str, sample: Option<&str>) -> Result<VcfReader> {
        let reader = bcf::Reader::from_path(path)
            .with_context(|| format!("Failed to open VCF file {path}"))?;
        let samples: Vec<String> = reader
            .header()
            .samples()
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        if samples.is_empty() {
            return Err(
                PhasingError::Format(format!("VCF file {path} contains no samples")).into(),
            );
        }
        let sample_index = match sample {
            Some(name) => samples
                .iter()
                .position(|s| s == name)
                .with_context(|| format!("Sample {name} not found in VCF file {path}"))?,
            None => 0,
        };
        let has_ps = reader.header().name_to_id(b"PS").is_ok();

        Ok(VcfReader {
            reader,
            samples,
            sample_index,
            has_ps,
            pending: None,
        })
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn sample_name(&self) -> &str {
        &self.samples[self.sample_index]
    }

    pub fn sample_index(&self) -> usize {
        self.sample_index
    }

    pub fn header(&self) -> &HeaderView {
        self.reader.header()
    }

    /// The next contiguous run of records sharing one chromosome, or
    /// `None` at end of input.
    pub fn next_chromosome(&mut self) -> Result<Option<VcfChromosome>> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.read_record()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };
        let rid = first.rid().context("VCF record without a chromosome")?;
        let name = str::from_utf8(self.reader.header().rid2name(rid)?)
            .context("Invalid chromosome name in VCF header")?
            .to_owned();

        let mut records = vec![first];
        while let Some(record) = self.read_record()? {
            if record.rid() == Some(rid) {
                records.push(record);
            } else {
                self.pending = Some(record);
                break;
            }
        }
        let variants = self.extract_variants(&records, &name)?;

        Ok(Some(VcfChromosome {
            name,
            records,
            variants,
        }))
    }

    fn read_record(&mut self) -> Result<Option<bcf::Record>> {
        let mut record = self.reader.empty_record();
        match self.reader.read(&mut record) {
            Some(Ok(())) => Ok(Some(record)),
            Some(Err(e)) => Err(e).context("Error reading VCF record"),
            None => Ok(None),
        }
    }

    /// Biallelic sites of one chromosome, positions strictly increasing.
    /// Records violating the ordering are skipped, not fatal.
    fn extract_variants(
        &self,
        records: &[bcf::Record],
        chromosome: &str,
    ) -> Result<Vec<VariantSite>> {
        let mut variants = Vec::new();
        let mut previous = i64::MIN;
        for record in records {
            let alleles = record.alleles();
            if alleles.len() != 2 {
                continue;
            }
            let reference_allele = String::from_utf8_lossy(alleles[0]).into_owned();
            let alternative_allele = String::from_utf8_lossy(alleles[1]).into_owned();
            if alternative_allele.starts_with('<') {
                // symbolic alternative alleles cannot be observed in reads
                continue;
            }
            if record.pos() <= previous {
                warn!(
                    "Skipping out-of-order variant record at {chromosome}:{}",
                    record.pos() + 1
                );
                continue;
            }
            previous = record.pos();

            variants.push(VariantSite {
                position: record.pos(),
                reference_allele,
                alternative_allele,
                genotype: self.genotype_of(record)?,
                phase: self.phase_of(record),
            });
        }

        Ok(variants)
    }

    fn genotype_of(&self, record: &bcf::Record) -> Result<Genotype> {
        let genotypes = record.genotypes().context("Failed to decode genotypes")?;
        let genotype = genotypes.get(self.sample_index);
        if genotype.len() < 2 {
            return Ok(Genotype::Missing);
        }

        Ok(match (genotype[0].index(), genotype[1].index()) {
            (Some(0), Some(0)) => Genotype::HomRef,
            (Some(1), Some(1)) => Genotype::HomAlt,
            (Some(_), Some(_)) => Genotype::Het,
            _ => Genotype::Missing,
        })
    }

    fn phase_of(&self, record: &bcf::Record) -> Option<SitePhase> {
        let genotypes = record.genotypes().ok()?;
        let genotype = genotypes.get(self.sample_index);
        if genotype.len() < 2 || !matches!(genotype[1], GenotypeAllele::Phased(_)) {
            return None;
        }
        let first_allele = genotype[0].index()? as u8;
        let phase_set = if self.has_ps {
            match record.format(b"PS").integer() {
                Ok(values) => values[self.sample_index]
                    .first()
                    .copied()
                    .filter(|&v| v > 0)
                    .unwrap_or(0),
                Err(_) => 0,
            }
        } else {
            0
        };

        Some(SitePhase {
            phase_set,
            first_allele,
        })
    }
}

/// The PS format line added to the output header.
const PS_FORMAT_LINE: &[u8] =
    br#"##FORMAT=<ID=PS,Number=1,Type=Integer,Description="Phase set identifier">"#;

pub struct PhasedVcfWriter {
    writer: bcf::Writer,
    sample_index: usize,
    n_samples: usize,
}

impl PhasedVcfWriter {
    /// Build a writer over `template` (the input header) writing to `output`
    /// or standard output.
    pub fn create(
        template: &HeaderView,
        output: Option<&str>,
        sample_index: usize,
    ) -> Result<PhasedVcfWriter> {
        let mut header = Header::from_template(template);
        header.push_record(PS_FORMAT_LINE);
        let writer = match output {
            Some(path) => bcf::Writer::from_path(path, &header, true, Format::Vcf)
                .with_context(|| format!("Failed to open output VCF {path}"))?,
            None => bcf::Writer::from_stdout(&header, true, Format::Vcf)
                .context("Failed to open standard output for writing")?,
        };

        Ok(PhasedVcfWriter {
            writer,
            sample_index,
            n_samples: template.sample_count() as usize,
        })
    }

    /// Write `record` untouched.
    pub fn write_unchanged(&mut self, record: &mut bcf::Record) -> Result<()> {
        self.writer.translate(record);
        self.writer
            .write(record)
            .context("Failed to write VCF record")
    }

    /// Write one chromosome's records, rewriting GT and PS of the target
    /// sample wherever `superreads` phase the position. `phase_sets` maps
    /// phased positions to the PS value to write.
    pub fn write_chromosome(
        &mut self,
        records: Vec<bcf::Record>,
        superreads: &SuperReads,
        phase_sets: &HashMap<i64, i64>,
    ) -> Result<()> {
        let phased: HashMap<i64, (u8, u8)> = superreads
            .haplotype(0)
            .iter()
            .zip(superreads.haplotype(1))
            .filter_map(|(h0, h1)| match (h0.allele, h1.allele) {
                (Some(a0), Some(a1)) => Some((h0.position, (a0, a1))),
                _ => None,
            })
            .collect();

        for mut record in records {
            self.writer.translate(&mut record);
            let biallelic = record.alleles().len() == 2;
            if let (true, Some(&(a0, a1)), Some(&phase_set)) = (
                biallelic,
                phased.get(&record.pos()),
                phase_sets.get(&record.pos()),
            ) {
                self.apply_phase(&mut record, a0, a1, phase_set)?;
            }
            self.writer
                .write(&record)
                .context("Failed to write VCF record")?;
        }

        Ok(())
    }

    fn apply_phase(
        &self,
        record: &mut bcf::Record,
        a0: u8,
        a1: u8,
        phase_set: i64,
    ) -> Result<()> {
        let existing: Vec<Vec<GenotypeAllele>> = {
            let genotypes = record
                .genotypes()
                .context("Failed to decode genotypes for phased record")?;
            (0..self.n_samples)
                .map(|s| genotypes.get(s).iter().copied().collect())
                .collect()
        };

        let mut rewritten: Vec<GenotypeAllele> = Vec::with_capacity(self.n_samples * 2);
        for (s, genotype) in existing.into_iter().enumerate() {
            if s == self.sample_index {
                rewritten.push(GenotypeAllele::Unphased(i32::from(a0)));
                rewritten.push(GenotypeAllele::Phased(i32::from(a1)));
            } else {
                rewritten.extend(genotype);
            }
        }
        record
            .push_genotypes(&rewritten)
            .context("Failed to set phased genotype")?;

        // bcf_int32_missing for all samples but the phased one
        let mut ps = vec![i32::MIN; self.n_samples];
        ps[self.sample_index] = phase_set as i32;
        record
            .push_format_integer(b"PS", &ps)
            .context("Failed to set PS field")?;

        Ok(())
    }
}
