//! # Haplotag list parsing
//!
//! Reads the tab-separated read-name → haplotype assignment list produced
//! by a haplotagging run. Expected columns are read name, haplotype
//! (`H1`, `H2`, … or `none`), phase set, and chromosome; trailing columns
//! beyond the first two are optional and lines starting with `#` are
//! comments.
use std::collections::HashMap;
use std::io;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct HaplotagRow {
    readname: String,
    haplotype: String,
    #[serde(default)]
    #[allow(dead_code)]
    phaseset: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    chromosome: Option<String>,
}

/// Read the haplotag list at `path` into a map from read name to 1-based
/// haplotype index. Untagged reads are absent from the map.
pub fn read_haplotag_list(path: &str) -> Result<HashMap<String, u32>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Could not read haplotag list {path}"))?;
    parse_haplotag_list(file).with_context(|| format!("Failed to parse haplotag list {path}"))
}

fn parse_haplotag_list<R: io::Read>(input: R) -> Result<HashMap<String, u32>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(input);

    let mut assignments = HashMap::new();
    for result in reader.deserialize() {
        let row: HaplotagRow = result.context("Malformed haplotag list record")?;
        if let Some(haplotype) = parse_haplotype(&row.haplotype) {
            assignments.insert(row.readname, haplotype);
        }
    }

    Ok(assignments)
}

/// `H1`/`H2`/… → 1-based haplotype index; anything else means untagged.
fn parse_haplotype(field: &str) -> Option<u32> {
    let trimmed = field.trim();
    trimmed
        .strip_prefix('H')
        .or_else(|| trimmed.strip_prefix('h'))?
        .parse()
        .ok()
}
