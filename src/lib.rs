//! # haplophase
//!
//! This library backs the `haplophase` binary: read-based phasing of
//! heterozygous variants in a diploid sample. A VCF of variant calls and a
//! coordinate-sorted alignment file are turned into a phased VCF by
//! projecting reads onto the variant sites, packing the resulting
//! fragments into coverage-limited slices, bipartitioning the first slice
//! with a dynamic program, and grouping the phased positions into
//! connected components. A separate extension pipeline propagates phase
//! from haplotagged reads to still unphased variants, and a split utility
//! partitions alignments by a haplotag list.
pub mod cli;
pub mod components;
pub mod errors;
pub mod extend;
pub mod fragment;
pub mod io;
pub mod phaser;
pub mod projection;
pub mod slicer;
pub mod split;
pub mod utils;
pub mod variant;

use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rust_htslib::faidx;

use crate::{
    cli::{ExtendArgs, PhaseArgs, SplitArgs},
    components::find_components,
    errors::PhasingError,
    extend::ExtendOptions,
    fragment::{filter_fragments, ReadSet},
    io::{
        bam::BamReader,
        vcf::{PhasedVcfWriter, VcfReader},
    },
    phaser::SuperReads,
    slicer::slice_fragments,
    variant::{Genotype, VariantSite},
};

/// Phase the heterozygous SNVs of every selected chromosome in the input
/// VCF and write the result, chromosome by chromosome, in input order.
pub fn run_phase(args: &PhaseArgs) -> Result<()> {
    let mut vcf = VcfReader::open(&args.vcf, args.sample.as_deref())?;
    if args.ignore_read_groups && args.sample.is_none() && vcf.samples().len() > 1 {
        return Err(PhasingError::Config(
            "when using --ignore-read-groups on a VCF with multiple samples, \
             --sample must also be used"
                .into(),
        )
        .into());
    }
    let sample = if args.ignore_read_groups {
        None
    } else {
        Some(vcf.sample_name().to_owned())
    };
    let mut bam = BamReader::open(&args.alignment, args.mapping_quality)?;
    let mut writer =
        PhasedVcfWriter::create(vcf.header(), args.output.as_deref(), vcf.sample_index())?;

    while let Some(chromosome) = vcf.next_chromosome()? {
        if !args.chromosome.is_empty() && !args.chromosome.contains(&chromosome.name) {
            info!(
                "Leaving chromosome {} unchanged (present in VCF, but not selected)",
                chromosome.name
            );
            for mut record in chromosome.records {
                writer.write_unchanged(&mut record)?;
            }
            continue;
        }
        info!(
            "Read {} variant records on chromosome {}",
            chromosome.records.len(),
            chromosome.name
        );
        let targets: Vec<VariantSite> = chromosome
            .variants
            .iter()
            .filter(|site| site.genotype == Genotype::Het && site.is_snv())
            .cloned()
            .collect();
        info!("{} heterozygous SNVs are candidates for phasing", targets.len());

        let (superreads, components) = phase_chromosome(
            &mut bam,
            &chromosome.name,
            &targets,
            sample.as_deref(),
            args,
        )?;
        // PS values are the 1-based position of the leftmost variant of
        // each component
        let phase_sets: HashMap<i64, i64> = components
            .iter()
            .map(|(&position, &representative)| (position, representative + 1))
            .collect();
        info!("Writing chromosome {} ...", chromosome.name);
        writer.write_chromosome(chromosome.records, &superreads, &phase_sets)?;
    }

    Ok(())
}

/// The in-memory phasing pipeline for one chromosome: assemble fragments,
/// shuffle, filter, slice, phase, find components.
fn phase_chromosome(
    bam: &mut BamReader,
    chromosome: &str,
    variants: &[VariantSite],
    sample: Option<&str>,
    args: &PhaseArgs,
) -> Result<(SuperReads, HashMap<i64, i64>)> {
    if variants.is_empty() {
        return Ok((SuperReads::default(), HashMap::new()));
    }

    let (mut fragments, skips) = bam.read_fragments(chromosome, variants, sample)?;
    debug!(
        "Skipped {} alignments: {} flagged, {} below the mapping quality threshold, \
         {} without CIGAR, {} from other read groups",
        skips.total(),
        skips.flags,
        skips.mapping_quality,
        skips.missing_cigar,
        skips.read_group
    );
    info!(
        "Assembled {} fragments with allele observations",
        fragments.len()
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    fragments.shuffle(&mut rng);
    let (fragments, dropped) = filter_fragments(fragments, 2);
    info!("Filtered out {dropped} fragments");

    let sliced = slice_fragments(&fragments, args.max_coverage);
    let slice = sliced.slices.into_iter().next().unwrap_or_default();
    if slice.is_empty() {
        info!("No fragments connect two variants on {chromosome}; leaving it unchanged");
        return Ok((SuperReads::default(), HashMap::new()));
    }

    let readset = ReadSet::finalize(slice);
    info!("Phasing {} fragments ...", readset.len());
    let result = phaser::phase(&readset, args.all_het);
    info!(
        "Weighted disagreement of the optimal bipartition: {}",
        result.cost
    );
    let components = find_components(&result.superreads, &fragments);

    Ok((result.superreads, components))
}

/// Propagate phase from haplotagged reads to still unphased variants of
/// every selected chromosome.
pub fn run_extend(args: &ExtendArgs) -> Result<()> {
    let mut vcf = VcfReader::open(&args.vcf, args.sample.as_deref())?;
    if args.ignore_read_groups && args.sample.is_none() && vcf.samples().len() > 1 {
        return Err(PhasingError::Config(
            "when using --ignore-read-groups on a VCF with multiple samples, \
             --sample must also be used"
                .into(),
        )
        .into());
    }
    let sample = if args.ignore_read_groups {
        None
    } else {
        Some(vcf.sample_name().to_owned())
    };
    let mut bam = BamReader::open(&args.alignment, args.mapping_quality)?;
    let fasta = args
        .reference
        .as_deref()
        .map(|path| {
            faidx::Reader::from_path(path)
                .with_context(|| format!("Failed to open reference FASTA {path}"))
        })
        .transpose()?;
    if fasta.is_none() && args.cut_poly > 0 {
        warn!("No reference given; the homopolymer guard is disabled");
    }
    let mut writer =
        PhasedVcfWriter::create(vcf.header(), args.output.as_deref(), vcf.sample_index())?;
    let options = ExtendOptions {
        gap_threshold: args.gap_threshold,
        cut_poly: args.cut_poly,
        only_indels: args.only_indels,
    };

    while let Some(chromosome) = vcf.next_chromosome()? {
        if !args.chromosome.is_empty() && !args.chromosome.contains(&chromosome.name) {
            info!(
                "Leaving chromosome {} unchanged (present in VCF, but not selected)",
                chromosome.name
            );
            for mut record in chromosome.records {
                writer.write_unchanged(&mut record)?;
            }
            continue;
        }
        info!("Processing chromosome {} ...", chromosome.name);
        let n_phased = chromosome
            .variants
            .iter()
            .filter(|site| site.phase.is_some())
            .count();
        let n_homozygous = chromosome
            .variants
            .iter()
            .filter(|site| site.genotype.is_homozygous())
            .count();
        info!(
            "{} of {} variants are already phased, {} are homozygous",
            n_phased,
            chromosome.variants.len(),
            n_homozygous
        );

        let (tagged, skips) =
            bam.read_tagged_fragments(&chromosome.name, &chromosome.variants, sample.as_deref())?;
        debug!("Skipped {} alignments before projection", skips.total());
        let votes = extend::compute_votes(&chromosome.variants, &tagged);
        let reference = match &fasta {
            Some(reader) => Some(
                // htslib clamps the range to the actual sequence length
                reader
                    .fetch_seq(&chromosome.name, 0, i32::MAX as usize)
                    .with_context(|| {
                        format!("Failed to fetch {} from the reference", chromosome.name)
                    })?
                    .to_vec(),
            ),
            None => None,
        };
        let (superreads, components) =
            extend::extend_phase(&chromosome.variants, &votes, reference.as_deref(), &options);
        writer.write_chromosome(chromosome.records, &superreads, &components)?;
    }

    Ok(())
}

/// Partition an alignment file by a haplotag list.
pub fn run_split(args: &SplitArgs) -> Result<()> {
    split::split_alignments(args)
}
