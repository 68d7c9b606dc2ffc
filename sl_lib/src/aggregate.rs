//! Periodic cumulative merge of the composites, followed by the CNV plot.
use crate::composite::CompositeIndex;
use crate::tools::{BamMerger, CnvPlotter};
use anyhow::{bail, ensure, Context, Result};
use log::info;
use std::path::{Path, PathBuf};

const CUMULATIVE_BAM: &str = "cumulative.bam";

/// What one aggregation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub iteration: u32,
    pub cumulative: PathBuf,
    pub inputs: Vec<PathBuf>,
}

pub struct CumulativeAggregator {
    freq: u32,
    cnv_dir: PathBuf,
    merger: Box<dyn BamMerger>,
    plotter: Box<dyn CnvPlotter>,
}

impl CumulativeAggregator {
    pub fn new(
        freq: u32,
        cnv_dir: impl Into<PathBuf>,
        merger: Box<dyn BamMerger>,
        plotter: Box<dyn CnvPlotter>,
    ) -> Result<Self> {
        ensure!(freq >= 1, "aggregation frequency must be at least 1");
        Ok(CumulativeAggregator {
            freq,
            cnv_dir: cnv_dir.into(),
            merger,
            plotter,
        })
    }

    pub fn cumulative_path(&self) -> PathBuf {
        self.cnv_dir.join(CUMULATIVE_BAM)
    }

    /// True when `iteration` is a multiple of the frequency.
    pub fn is_due(&self, iteration: u32) -> bool {
        iteration % self.freq == 0
    }

    /// Merge every composite up to `iteration` into the cumulative file.
    pub fn merge(&self, composites: &CompositeIndex, iteration: u32) -> Result<Aggregation> {
        let inputs = composites.up_to(iteration);
        if inputs.is_empty() {
            bail!("no composite files recorded up to iteration {iteration}");
        }
        std::fs::create_dir_all(&self.cnv_dir)
            .with_context(|| format!("creating {}", self.cnv_dir.display()))?;
        let cumulative = self.cumulative_path();
        info!(
            "Merging {} composite files into {}",
            inputs.len(),
            cumulative.display()
        );
        self.merger
            .merge(&inputs, &cumulative)
            .with_context(|| format!("merging composites up to iteration {iteration}"))?;
        Ok(Aggregation {
            iteration,
            cumulative,
            inputs,
        })
    }

    /// Render the CNV plot for a finished aggregation.
    pub fn plot(&self, aggregation: &Aggregation, output_prefix: &Path) -> Result<()> {
        info!("Generating CNV plot {}", output_prefix.display());
        self.plotter
            .plot(&aggregation.cumulative, output_prefix)
            .with_context(|| format!("plotting CNV for iteration {}", aggregation.iteration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        merges: Arc<Mutex<Vec<Vec<PathBuf>>>>,
        plots: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
    }

    impl BamMerger for Recorder {
        fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            std::fs::write(output, "")?;
            self.merges.lock().unwrap().push(inputs.to_vec());
            Ok(())
        }
    }

    impl CnvPlotter for Recorder {
        fn plot(&self, bam: &Path, output_prefix: &Path) -> Result<()> {
            self.plots
                .lock()
                .unwrap()
                .push((bam.to_path_buf(), output_prefix.to_path_buf()));
            Ok(())
        }
    }

    #[test]
    fn test_is_due() {
        let rec = Recorder::default();
        let agg = CumulativeAggregator::new(3, "/tmp/x", Box::new(rec.clone()), Box::new(rec)).unwrap();
        let due: Vec<u32> = (1..=10).filter(|&n| agg.is_due(n)).collect();
        assert_eq!(due, vec![3, 6, 9]);
    }

    #[test]
    fn test_merges_composites_up_to_iteration() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let rec = Recorder::default();
        let agg = CumulativeAggregator::new(
            2,
            dir.path().join("cnv_input"),
            Box::new(rec.clone()),
            Box::new(rec.clone()),
        )?;
        let mut index = CompositeIndex::default();
        for n in [3, 1, 2] {
            index.insert(n, PathBuf::from(format!("c{n}.bam")));
        }

        let aggregation = agg.merge(&index, 2)?;
        assert_eq!(
            aggregation.inputs,
            vec![PathBuf::from("c1.bam"), PathBuf::from("c2.bam")]
        );
        assert!(aggregation.cumulative.exists());

        let prefix = dir.path().join("iteration_2/CNV_plot_iteration_2");
        agg.plot(&aggregation, &prefix)?;
        assert_eq!(
            rec.plots.lock().unwrap().clone(),
            vec![(dir.path().join("cnv_input/cumulative.bam"), prefix)]
        );
        Ok(())
    }

    #[test]
    fn test_zero_freq_rejected() {
        let rec = Recorder::default();
        let err = CumulativeAggregator::new(0, "/tmp/x", Box::new(rec.clone()), Box::new(rec))
            .err()
            .unwrap();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_nothing_to_merge() {
        let rec = Recorder::default();
        let agg = CumulativeAggregator::new(1, "/tmp/x", Box::new(rec.clone()), Box::new(rec)).unwrap();
        assert!(agg.merge(&CompositeIndex::default(), 4).is_err());
    }
}
