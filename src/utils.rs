//! # Root for utility functions in `haplophase`
//!
//! This top-level module contains miscellaneous helpers, the `cigar`
//! sub-module contains functions related to CIGAR interpretation.

pub mod cigar;

/// `part` as a percentage of `total`; 0 when `total` is 0.
pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.
    } else {
        100. * part as f64 / total as f64
    }
}
