//! # Command line interface for `haplophase`
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::phaser;

#[derive(Parser)]
#[command(
    name = "haplophase",
    author,
    version,
    about = "Read-based phasing of diploid variant calls",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Phase heterozygous variants using read alignments
    Phase(PhaseArgs),
    /// Extend phasing from haplotagged reads to still unphased variants
    Extend(ExtendArgs),
    /// Split an alignment file by haplotype assignment
    Split(SplitArgs),
}

#[derive(Args)]
pub struct PhaseArgs {
    /// VCF file with variants to phase (bgzip-compressed and indexed)
    pub vcf: String,

    /// Alignment file with reads over the same chromosomes. Can be BAM or CRAM
    pub alignment: String,

    /// Output VCF file. If omitted, write to standard output
    #[arg(short, long)]
    pub output: Option<String>,

    /// Name of a chromosome to phase. If not given, all chromosomes in the input VCF are phased. Can be used multiple times
    #[arg(long = "chromosome")]
    pub chromosome: Vec<String>,

    /// Ignore read groups in the alignment header and assume all reads come from the same sample
    #[arg(long)]
    pub ignore_read_groups: bool,

    /// Name of the sample to phase. If not given, the first sample in the input VCF is phased
    #[arg(long)]
    pub sample: Option<String>,

    /// Reduce fragment coverage to at most this many fragments per variant position
    #[arg(long, default_value_t = 15, value_parser = coverage_in_range)]
    pub max_coverage: u32,

    /// Minimum mapping quality for reads to be used
    #[arg(long, default_value_t = 20)]
    pub mapping_quality: u8,

    /// Random seed for the pre-slicing shuffle
    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    /// Assume all candidate positions to be heterozygous (fully trust the variant calls)
    #[arg(long)]
    pub all_het: bool,
}

#[derive(Args)]
pub struct ExtendArgs {
    /// VCF file with phased variants (bgzip-compressed and indexed)
    pub vcf: String,

    /// Haplotagged alignment file. Can be BAM or CRAM
    pub alignment: String,

    /// Output VCF file. If omitted, write to standard output
    #[arg(short, long)]
    pub output: Option<String>,

    /// Name of a chromosome to process. Can be used multiple times
    #[arg(long = "chromosome")]
    pub chromosome: Vec<String>,

    /// Ignore read groups in the alignment header and assume all reads come from the same sample
    #[arg(long)]
    pub ignore_read_groups: bool,

    /// Name of the sample to process. If not given, the first sample in the input VCF is used
    #[arg(long)]
    pub sample: Option<String>,

    /// Reference genome. Expected format is FASTA with a .fai index next to it; required for the homopolymer guard
    #[arg(short, long)]
    pub reference: Option<String>,

    /// Minimum mapping quality for reads to be used
    #[arg(long, default_value_t = 20)]
    pub mapping_quality: u8,

    /// Threshold percentage of vote quality for assigning phase to a previously unphased variant
    #[arg(long, default_value_t = 70)]
    pub gap_threshold: u32,

    /// Skip variants neighboring a reference homopolymer of at least this length; 0 disables the check
    #[arg(long, default_value_t = 10)]
    pub cut_poly: usize,

    /// Extend new phasing information only to indels
    #[arg(long)]
    pub only_indels: bool,
}

#[derive(Args)]
pub struct SplitArgs {
    /// Alignment file with reads to split (BAM)
    pub alignment: String,

    /// Tab-separated haplotag list assigning read names to haplotypes
    pub list: String,

    /// Output alignment file for one haplotype; repeat for H1, H2, ... in order
    #[arg(long = "output-haplotype")]
    pub output_haplotype: Vec<String>,

    /// Output alignment file for reads without a haplotype assignment
    #[arg(long)]
    pub output_untagged: Option<String>,

    /// Also write untagged reads to every haplotype output
    #[arg(long)]
    pub add_untagged: bool,

    /// Write a read-length histogram to this tab-separated file
    #[arg(long)]
    pub read_lengths_histogram: Option<String>,
}

fn coverage_in_range(s: &str) -> Result<u32> {
    let coverage: u32 = s
        .parse()
        .context("Could not parse value passed to --max-coverage to integer")?;
    // the phaser holds a 2^coverage state table per variant column
    if coverage < 1 || coverage as usize > phaser::MAX_ACTIVE {
        bail!(
            "--max-coverage must be between 1 and {}",
            phaser::MAX_ACTIVE
        );
    }
    Ok(coverage)
}
