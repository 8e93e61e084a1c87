//! # Splitting alignments by haplotype assignment
//!
//! Streams an alignment file once and partitions its records according to
//! a previously computed haplotag list: one output per haplotype, an
//! optional output for untagged reads, and an optional read-length
//! histogram. Reads keep their input order within each output.
use std::collections::BTreeMap;
use std::io;

use anyhow::{Context, Result};
use log::{info, warn};
use rust_htslib::bam::{self, Read};

use crate::{cli::SplitArgs, io::haplotag, utils::cigar};

pub fn split_alignments(args: &SplitArgs) -> Result<()> {
    let assignments = haplotag::read_haplotag_list(&args.list)?;
    info!(
        "Read {} haplotype assignments from {}",
        assignments.len(),
        args.list
    );

    let n_haplotypes = args.output_haplotype.len();
    let mut reader = bam::Reader::from_path(&args.alignment)
        .with_context(|| format!("Failed to open alignment file {}", args.alignment))?;
    let header = bam::Header::from_template(reader.header());
    let mut haplotype_writers = args
        .output_haplotype
        .iter()
        .map(|path| {
            bam::Writer::from_path(path, &header, bam::Format::Bam)
                .with_context(|| format!("Failed to open output alignment file {path}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut untagged_writer = match &args.output_untagged {
        Some(path) => Some(
            bam::Writer::from_path(path, &header, bam::Format::Bam)
                .with_context(|| format!("Failed to open output alignment file {path}"))?,
        ),
        None => None,
    };

    // per read length: one count per haplotype plus one for untagged reads
    let mut histogram: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
    let mut written = vec![0u64; n_haplotypes + 1];
    let mut unmatched_haplotypes = 0usize;
    let mut record = bam::Record::new();
    while let Some(result) = reader.read(&mut record) {
        result.context("Error reading alignment record")?;
        let name = String::from_utf8_lossy(record.qname()).into_owned();
        let class = match assignments.get(name.as_str()) {
            Some(&haplotype) if (1..=n_haplotypes as u32).contains(&haplotype) => {
                (haplotype - 1) as usize
            }
            Some(_) => {
                unmatched_haplotypes += 1;
                continue;
            }
            None => n_haplotypes, // untagged
        };

        if class < n_haplotypes {
            haplotype_writers[class]
                .write(&record)
                .context("Failed to write alignment record")?;
        } else {
            if let Some(writer) = &mut untagged_writer {
                writer
                    .write(&record)
                    .context("Failed to write alignment record")?;
            }
            if args.add_untagged {
                for writer in &mut haplotype_writers {
                    writer
                        .write(&record)
                        .context("Failed to write alignment record")?;
                }
            }
        }
        written[class] += 1;
        if args.read_lengths_histogram.is_some() {
            let length = read_length(&record);
            histogram
                .entry(length)
                .or_insert_with(|| vec![0; n_haplotypes + 1])[class] += 1;
        }
    }

    if unmatched_haplotypes > 0 {
        warn!(
            "{unmatched_haplotypes} reads were assigned to haplotypes without an output file and were dropped"
        );
    }
    for (h, count) in written.iter().take(n_haplotypes).enumerate() {
        info!("Wrote {count} reads to haplotype {} output", h + 1);
    }
    info!("{} reads were untagged", written[n_haplotypes]);

    if let Some(path) = &args.read_lengths_histogram {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to open read-length histogram {path}"))?;
        write_histogram(file, &histogram, n_haplotypes)?;
    }

    Ok(())
}

/// Stored sequence length, or the CIGAR-implied length for records without
/// a sequence.
fn read_length(record: &bam::Record) -> usize {
    let stored = record.seq_len();
    if stored > 0 {
        stored
    } else {
        cigar::read_len_from_cigar(&record.cigar())
    }
}

fn write_histogram<W: io::Write>(
    output: W,
    histogram: &BTreeMap<usize, Vec<u64>>,
    n_haplotypes: usize,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(output);
    let mut header: Vec<String> = vec!["length".into()];
    header.extend((1..=n_haplotypes).map(|h| format!("count_h{h}")));
    header.push("count_untagged".into());
    writer.write_record(&header)?;

    for (length, counts) in histogram {
        let mut row: Vec<String> = vec![length.to_string()];
        row.extend(counts.iter().map(|count| count.to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use rust_htslib::bam::record::{Cigar, CigarString};

    use super::*;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "haplophase-split-{test}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn path_str(path: &Path) -> String {
        path.to_str().unwrap().into()
    }

    fn unmapped_record(name: &str) -> bam::Record {
        let mut record = bam::Record::new();
        record.set(name.as_bytes(), None, b"ACGT", &[30; 4]);
        record.set_tid(-1);
        record.set_pos(-1);
        record.set_mtid(-1);
        record.set_mpos(-1);
        record.set_unmapped();
        record
    }

    fn write_bam(path: &Path, names: &[String]) {
        let header = bam::Header::new();
        let mut writer = bam::Writer::from_path(path, &header, bam::Format::Bam).unwrap();
        for name in names {
            writer.write(&unmapped_record(name)).unwrap();
        }
    }

    fn read_names(path: &Path) -> Vec<String> {
        let mut reader = bam::Reader::from_path(path).unwrap();
        let mut record = bam::Record::new();
        let mut names = Vec::new();
        while let Some(result) = reader.read(&mut record) {
            result.unwrap();
            names.push(String::from_utf8_lossy(record.qname()).into_owned());
        }
        names
    }

    #[test]
    fn split_routes_reads_to_haplotype_outputs() {
        let dir = scratch_dir("counts");
        let bam_path = dir.join("input.bam");
        let list_path = dir.join("haplotags.tsv");
        let h1_path = dir.join("h1.bam");
        let h2_path = dir.join("h2.bam");

        let names: Vec<String> = (1..=25).map(|i| format!("read{i:02}")).collect();
        write_bam(&bam_path, &names);
        let mut list = String::from("#readname\thaplotype\tphaseset\tchromosome\n");
        for (i, name) in names.iter().enumerate() {
            let haplotype = if i < 15 { "H1" } else { "H2" };
            list.push_str(&format!("{name}\t{haplotype}\t100\tchr1\n"));
        }
        std::fs::write(&list_path, list).unwrap();

        let args = SplitArgs {
            alignment: path_str(&bam_path),
            list: path_str(&list_path),
            output_haplotype: vec![path_str(&h1_path), path_str(&h2_path)],
            output_untagged: None,
            add_untagged: false,
            read_lengths_histogram: None,
        };
        split_alignments(&args).unwrap();

        assert_eq!(15, read_names(&h1_path).len());
        assert_eq!(10, read_names(&h2_path).len());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn split_duplicates_untagged_reads_when_requested() {
        for add_untagged in [false, true] {
            let dir = scratch_dir(if add_untagged {
                "tetraploid-untagged"
            } else {
                "tetraploid"
            });
            let bam_path = dir.join("input.bam");
            let list_path = dir.join("haplotags.tsv");
            let untagged_path = dir.join("untagged.bam");
            let outputs: Vec<PathBuf> =
                (1..=4).map(|h| dir.join(format!("hap{h}.bam"))).collect();

            // four tagged reads, one untagged, one tagged beyond the
            // provided outputs
            let names: Vec<String> = vec![
                "tag1".into(),
                "tag2".into(),
                "tag3".into(),
                "tag4".into(),
                "chr1:2000000-2000099".into(),
                "stray".into(),
            ];
            write_bam(&bam_path, &names);
            let list = "tag1\tH1\t100\tchr1\n\
                tag2\tH2\t100\tchr1\n\
                tag3\tH3\t100\tchr1\n\
                tag4\tH4\t100\tchr1\n\
                stray\tH9\t100\tchr1\n";
            std::fs::write(&list_path, list).unwrap();

            let args = SplitArgs {
                alignment: path_str(&bam_path),
                list: path_str(&list_path),
                output_haplotype: outputs.iter().map(|p| path_str(p)).collect(),
                output_untagged: Some(path_str(&untagged_path)),
                add_untagged,
                read_lengths_histogram: None,
            };
            split_alignments(&args).unwrap();

            for (h, path) in outputs.iter().enumerate() {
                let expected = if add_untagged {
                    vec![format!("tag{}", h + 1), "chr1:2000000-2000099".to_owned()]
                } else {
                    vec![format!("tag{}", h + 1)]
                };
                assert_eq!(expected, read_names(path));
            }
            // the untagged read lands in its own output either way; the
            // read tagged beyond the provided outputs lands nowhere
            assert_eq!(
                vec!["chr1:2000000-2000099".to_owned()],
                read_names(&untagged_path)
            );
            let _ = std::fs::remove_dir_all(&dir);
        }
    }

    #[test]
    fn read_length_falls_back_to_cigar() {
        let mut record = bam::Record::new();
        let cigar = CigarString(vec![Cigar::Match(205)]);
        record.set(b"read", Some(&cigar), b"", b"");
        assert_eq!(205, read_length(&record));

        let mut with_seq = bam::Record::new();
        let cigar = CigarString(vec![Cigar::Match(4)]);
        with_seq.set(b"read", Some(&cigar), b"ACGT", &[30; 4]);
        assert_eq!(4, read_length(&with_seq));
    }

    #[test]
    fn histogram_rows_are_sorted_and_tab_separated() {
        let mut histogram: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        histogram.insert(716, vec![1, 0, 0]);
        histogram.insert(205, vec![1, 0, 0]);
        histogram.insert(1613, vec![0, 0, 1]);
        histogram.insert(12930, vec![0, 1, 0]);

        let mut buffer = Vec::new();
        write_histogram(&mut buffer, &histogram, 2).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!("length\tcount_h1\tcount_h2\tcount_untagged", lines[0]);
        assert_eq!("205\t1\t0\t0", lines[1]);
        assert_eq!("716\t1\t0\t0", lines[2]);
        assert_eq!("1613\t0\t0\t1", lines[3]);
        assert_eq!("12930\t0\t1\t0", lines[4]);
    }
}
