//! # Input/output adapters
//!
//! Everything that touches files lives under this module: VCF reading and
//! phased writing (`vcf`), alignment reading and fragment assembly (`bam`),
//! and haplotag list parsing (`haplotag`). The pipeline core never opens a
//! file itself; it consumes the data types these adapters produce.

pub mod bam;
pub mod haplotag;
pub mod vcf;
