//! Concatenating merge of BAM files that share one reference layout.
use anyhow::{ensure, Context, Result};
use log::debug;
use rust_htslib::bam::{self, Read, Record};
use std::path::{Path, PathBuf};

/// Reference sequence names and lengths of a header, in header order.
type ReferenceLayout = Vec<(Vec<u8>, u64)>;

fn reference_layout(header: &bam::HeaderView) -> ReferenceLayout {
    header
        .target_names()
        .into_iter()
        .enumerate()
        .map(|(tid, name)| {
            let len = header.target_len(tid as u32).unwrap_or(0);
            (name.to_vec(), len)
        })
        .collect()
}

/// What a merge wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub inputs: usize,
    pub records: u64,
}

/// Merge `inputs` into `output`, in the order given.
///
/// The header of the first input is used for the output, and every other
/// input must have the same reference sequences in the same order. Records are
/// copied as-is, no re-sorting happens. An existing `output` (including a
/// symlink) is removed first so that the target of a link is never written
/// through.
pub fn merge_bams<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<MergeSummary> {
    ensure!(
        !inputs.is_empty(),
        "no input BAM files to merge into {}",
        output.display()
    );

    if output.symlink_metadata().is_ok() {
        std::fs::remove_file(output)
            .with_context(|| format!("removing previous {}", output.display()))?;
    }

    let first = inputs[0].as_ref();
    let template = bam::Reader::from_path(first)
        .with_context(|| format!("opening BAM {}", first.display()))?;
    let expected = reference_layout(template.header());
    let header = bam::Header::from_template(template.header());
    drop(template);

    let mut writer = bam::Writer::from_path(output, &header, bam::Format::Bam)
        .with_context(|| format!("creating BAM {}", output.display()))?;

    let mut records = 0u64;
    let mut record = Record::new();
    for input in inputs {
        let input = input.as_ref();
        let mut reader = bam::Reader::from_path(input)
            .with_context(|| format!("opening BAM {}", input.display()))?;
        ensure!(
            reference_layout(reader.header()) == expected,
            "reference sequences of {} differ from {}",
            input.display(),
            first.display()
        );
        let mut copied = 0u64;
        while let Some(r) = reader.read(&mut record) {
            r.with_context(|| format!("reading BAM {}", input.display()))?;
            writer
                .write(&record)
                .with_context(|| format!("writing BAM {}", output.display()))?;
            copied += 1;
        }
        debug!("copied {copied} records from {}", input.display());
        records += copied;
    }

    Ok(MergeSummary {
        output: output.to_path_buf(),
        inputs: inputs.len(),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::header::{Header, HeaderRecord};
    use rust_htslib::bam::record::{Cigar, CigarString};

    fn write_bam(path: &Path, contigs: &[(&str, u64)], reads: usize) {
        let mut header = Header::new();
        for (name, len) in contigs {
            header.push_record(
                HeaderRecord::new(b"SQ")
                    .push_tag(b"SN", name)
                    .push_tag(b"LN", len),
            );
        }
        let mut writer = bam::Writer::from_path(path, &header, bam::Format::Bam).unwrap();
        let cigar = CigarString(vec![Cigar::Match(4)]);
        for i in 0..reads {
            let mut rec = Record::new();
            rec.set(format!("read{i}").as_bytes(), Some(&cigar), b"ACGT", b"IIII");
            rec.set_tid(0);
            rec.set_pos(i as i64 * 10);
            writer.write(&rec).unwrap();
        }
    }

    fn count_records(path: &Path) -> usize {
        bam::Reader::from_path(path).unwrap().records().count()
    }

    #[test]
    fn test_merge_concatenates_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("run_it1.bam");
        let b = dir.path().join("run_it1_unclassified.bam");
        write_bam(&a, &[("chr1", 10_000)], 3);
        write_bam(&b, &[("chr1", 10_000)], 2);

        let out = dir.path().join("composite_iteration_1.bam");
        let summary = merge_bams(&[&a, &b], &out)?;
        assert_eq!(summary.inputs, 2);
        assert_eq!(summary.records, 5);
        assert_eq!(count_records(&out), 5);
        Ok(())
    }

    #[test]
    fn test_merge_overwrites_link_not_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.bam");
        let b = dir.path().join("b.bam");
        write_bam(&a, &[("chr1", 500)], 1);
        write_bam(&b, &[("chr1", 500)], 4);

        let out = dir.path().join("cumulative.bam");
        std::os::unix::fs::symlink(&a, &out)?;
        merge_bams(&[&a, &b], &out)?;

        assert!(!out.symlink_metadata()?.file_type().is_symlink());
        assert_eq!(count_records(&a), 1);
        assert_eq!(count_records(&out), 5);
        Ok(())
    }

    #[test]
    fn test_merge_rejects_mismatched_references() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bam");
        let b = dir.path().join("b.bam");
        write_bam(&a, &[("chr1", 500)], 1);
        write_bam(&b, &[("chr2", 500)], 1);
        let out = dir.path().join("out.bam");
        assert!(merge_bams(&[&a, &b], &out).is_err());
    }

    #[test]
    fn test_merge_requires_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let none: [&Path; 0] = [];
        assert!(merge_bams(&none, &dir.path().join("out.bam")).is_err());
    }
}
