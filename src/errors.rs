//! # Error kinds for the phasing pipelines
//!
//! Only problems that abort a whole chromosome or the whole run get a typed
//! variant here. Per-read problems (bad flags, low mapping quality, missing
//! CIGAR, mismatching alleles) are counted and skipped where they occur and
//! never construct an error value.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhasingError {
    /// More than two alignments share one read name, so mates cannot be
    /// paired unambiguously.
    #[error("read name '{0}' occurs more than twice in the alignment file")]
    AmbiguousPair(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed input: {0}")]
    Format(String),
}
