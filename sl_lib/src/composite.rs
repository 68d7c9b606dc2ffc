//! The per-iteration alignment files that feed the cumulative CNV merge.
use crate::discover::iteration_index;
use crate::layout::InstrumentMode;
use crate::tools::BamMerger;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory under the output dir holding composites and the cumulative merge.
pub const CNV_INPUT_DIR: &str = "cnv_input";

/// Composite alignment files keyed by iteration. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeIndex {
    entries: BTreeMap<u32, PathBuf>,
}

impl CompositeIndex {
    /// Record `path` under `key`. An existing key is left untouched and false
    /// is returned.
    pub fn insert(&mut self, key: u32, path: PathBuf) -> bool {
        if let Some(existing) = self.entries.get(&key) {
            warn!(
                "composite {key} already recorded as {}, not replacing with {}",
                existing.display(),
                path.display()
            );
            return false;
        }
        self.entries.insert(key, path);
        true
    }

    pub fn contains(&self, key: u32) -> bool {
        self.entries.contains_key(&key)
    }

    /// Entries with a key no greater than `iteration`, ascending.
    pub fn up_to(&self, iteration: u32) -> Vec<PathBuf> {
        self.entries
            .range(..=iteration)
            .map(|(_, path)| path.clone())
            .collect()
    }

    pub fn keys(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Point `link` at `target`, replacing whatever `link` was before. The target
/// itself is never touched.
pub(crate) fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(link)
            .with_context(|| format!("removing stale link {}", link.display()))?;
    }
    let target = std::fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    std::os::unix::fs::symlink(&target, link).with_context(|| {
        format!(
            "linking {} -> {}",
            link.display(),
            target.display()
        )
    })
}

/// Builds composites and keeps the [`CompositeIndex`].
pub struct CompositeMerger {
    cnv_dir: PathBuf,
    mode: InstrumentMode,
    merger: Box<dyn BamMerger>,
    index: CompositeIndex,
}

impl CompositeMerger {
    pub fn new(output_dir: &Path, mode: InstrumentMode, merger: Box<dyn BamMerger>) -> Self {
        CompositeMerger {
            cnv_dir: output_dir.join(CNV_INPUT_DIR),
            mode,
            merger,
            index: CompositeIndex::default(),
        }
    }

    pub fn cnv_dir(&self) -> &Path {
        &self.cnv_dir
    }

    pub fn index(&self) -> &CompositeIndex {
        &self.index
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cnv_dir)
            .with_context(|| format!("creating {}", self.cnv_dir.display()))
    }

    fn composite_path(&self, index: u32) -> PathBuf {
        self.cnv_dir.join(format!("composite_iteration_{index}.bam"))
    }

    /// Produce the unit to classify for one pre-split iteration.
    ///
    /// With complements the partials are merged into a composite, which is
    /// returned. A lone primary is linked into the index and returned as is.
    pub fn build_from_partials(
        &mut self,
        index: u32,
        primary: &Path,
        complements: &[PathBuf],
    ) -> Result<PathBuf> {
        self.ensure_dir()?;
        let composite = self.composite_path(index);
        let unit = if complements.is_empty() {
            replace_symlink(primary, &composite)?;
            primary.to_path_buf()
        } else {
            let mut inputs = vec![primary.to_path_buf()];
            inputs.extend(complements.iter().cloned());
            info!(
                "Merging {} partial files for iteration {index} into {}",
                inputs.len(),
                composite.display()
            );
            self.merger.merge(&inputs, &composite)?;
            composite.clone()
        };
        self.index.insert(index, composite);
        Ok(unit)
    }

    /// Record the CNV input for a successfully classified file.
    pub fn record_processed(&mut self, iteration: u32, file: &Path) -> Result<()> {
        match self.mode {
            InstrumentMode::Standard => {
                self.ensure_dir()?;
                let link = self
                    .cnv_dir
                    .join(format!("cnv_input_iteration_{iteration}.bam"));
                replace_symlink(file, &link)?;
                self.index.insert(iteration, link);
            }
            InstrumentMode::Alternate => {
                if self.index.entries.values().any(|p| p == file) {
                    debug!("{} already indexed", file.display());
                    return Ok(());
                }
                let key = iteration_index(file).unwrap_or(iteration);
                if !self.index.contains(key) {
                    self.index.insert(key, file.to_path_buf());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct CopyMerger;

    impl BamMerger for CopyMerger {
        fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            let mut data = Vec::new();
            for input in inputs {
                data.extend(std::fs::read(input)?);
            }
            std::fs::write(output, data)?;
            Ok(())
        }
    }

    #[test]
    fn test_index_is_append_only() {
        let mut index = CompositeIndex::default();
        assert!(index.insert(2, "b.bam".into()));
        assert!(index.insert(1, "a.bam".into()));
        assert!(!index.insert(2, "other.bam".into()));
        assert!(index.insert(4, "d.bam".into()));
        assert_eq!(index.entries.get(&2), Some(&PathBuf::from("b.bam")));
        assert_eq!(
            index.up_to(3),
            vec![PathBuf::from("a.bam"), PathBuf::from("b.bam")]
        );
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_partials_merged_into_composite() -> Result<()> {
        let runs = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let primary = runs.path().join("run_it1.bam");
        let complement = runs.path().join("run_it1_unclassified.bam");
        std::fs::write(&primary, "P")?;
        std::fs::write(&complement, "U")?;

        let mut merger =
            CompositeMerger::new(out.path(), InstrumentMode::Alternate, Box::new(CopyMerger));
        let unit = merger.build_from_partials(1, &primary, &[complement])?;
        assert_eq!(unit, out.path().join("cnv_input/composite_iteration_1.bam"));
        assert_eq!(std::fs::read_to_string(&unit)?, "PU");
        assert_eq!(merger.index().entries.get(&1), Some(&unit));

        // classifying the composite does not add a second entry
        merger.record_processed(1, &unit)?;
        assert_eq!(merger.index().len(), 1);
        Ok(())
    }

    #[test]
    fn test_lone_primary_is_linked() -> Result<()> {
        let runs = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let primary = runs.path().join("run_it3.bam");
        std::fs::write(&primary, "P")?;

        let mut merger =
            CompositeMerger::new(out.path(), InstrumentMode::Alternate, Box::new(CopyMerger));
        let unit = merger.build_from_partials(3, &primary, &[])?;
        assert_eq!(unit, primary);
        let link = merger.index().entries[&3].clone();
        assert_eq!(std::fs::read_link(&link)?, std::fs::canonicalize(&primary)?);

        // re-processing the primary keeps the original entry
        merger.record_processed(5, &primary)?;
        assert_eq!(merger.index().keys(), vec![3]);
        Ok(())
    }

    #[test]
    fn test_standard_links_each_iteration() -> Result<()> {
        let runs = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let mut merger =
            CompositeMerger::new(out.path(), InstrumentMode::Standard, Box::new(CopyMerger));
        for (n, name) in [(1, "x.bam"), (2, "y.bam")] {
            let file = runs.path().join(name);
            std::fs::write(&file, name)?;
            merger.record_processed(n, &file)?;
        }
        let link = out.path().join("cnv_input/cnv_input_iteration_2.bam");
        assert_eq!(std::fs::read_to_string(&link)?, "y.bam");
        assert_eq!(merger.index().up_to(2).len(), 2);
        Ok(())
    }

    #[test]
    fn test_alternate_live_arrival_uses_parsed_index() -> Result<()> {
        let out = tempfile::tempdir()?;
        let mut merger =
            CompositeMerger::new(out.path(), InstrumentMode::Alternate, Box::new(CopyMerger));
        merger.record_processed(1, Path::new("/runs/run_it7.bam"))?;
        merger.record_processed(2, Path::new("/runs/late.bam"))?;
        assert_eq!(merger.index().keys(), vec![2, 7]);
        Ok(())
    }
}
