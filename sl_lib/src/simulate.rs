//! Rehearsal of a live run: files from a finished run are linked into a
//! destination directory one at a time, as an instrument would write them.
use crate::discover::suffix_pattern;
use crate::shutdown::ShutdownCoordinator;
use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub interval: Duration,
    pub prefix: String,
    /// Pause before the first link.
    pub initial_delay: Duration,
    /// Stop after this many steps; `None` runs until shutdown.
    pub max_steps: Option<usize>,
    pub poll: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Linked(PathBuf),
    AlreadyLinked(PathBuf),
    NoFiles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub linked: usize,
    pub skipped: usize,
}

/// Cycles through the source files in name order.
#[derive(Debug)]
pub struct Simulator {
    settings: SimulationSettings,
    last_index: Option<usize>,
}

impl Simulator {
    pub fn new(settings: SimulationSettings) -> Self {
        Simulator {
            settings,
            last_index: None,
        }
    }

    fn source_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = suffix_pattern(&self.settings.source_dir, ".bam")?;
        Ok(glob::glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .sorted()
            .collect())
    }

    fn link_path(&self, source: &Path) -> Option<PathBuf> {
        let name = source.file_name()?.to_str()?;
        Some(
            self.settings
                .dest_dir
                .join(format!("{}{name}", self.settings.prefix)),
        )
    }

    /// Link the next source file, re-reading the source directory each time.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let files = self.source_files()?;
        if files.is_empty() {
            warn!(
                "No BAM files found in source directory {}",
                self.settings.source_dir.display()
            );
            return Ok(StepOutcome::NoFiles);
        }
        let index = self.last_index.map_or(0, |i| (i + 1) % files.len());
        self.last_index = Some(index);
        let source = &files[index];
        let link = self
            .link_path(source)
            .with_context(|| format!("bad source file name {}", source.display()))?;
        if link.symlink_metadata().is_ok() {
            info!("Link {} already exists, skipping", link.display());
            return Ok(StepOutcome::AlreadyLinked(link));
        }
        let target = std::fs::canonicalize(source).unwrap_or_else(|_| source.clone());
        std::os::unix::fs::symlink(&target, &link)
            .with_context(|| format!("linking {} -> {}", link.display(), target.display()))?;
        info!("Created link {}", link.display());
        Ok(StepOutcome::Linked(link))
    }
}

pub fn run_simulation(
    settings: SimulationSettings,
    shutdown: &ShutdownCoordinator,
) -> Result<SimulationSummary> {
    std::fs::create_dir_all(&settings.dest_dir)
        .with_context(|| format!("creating {}", settings.dest_dir.display()))?;
    let poll = settings.poll;
    let interval = settings.interval;
    let max_steps = settings.max_steps;
    let mut summary = SimulationSummary::default();

    if !shutdown.sleep(settings.initial_delay, poll) {
        return Ok(summary);
    }
    let mut simulator = Simulator::new(settings);
    let mut steps = 0;
    loop {
        match simulator.step()? {
            StepOutcome::Linked(_) => summary.linked += 1,
            StepOutcome::AlreadyLinked(_) => summary.skipped += 1,
            StepOutcome::NoFiles => (),
        }
        steps += 1;
        if max_steps.is_some_and(|max| steps >= max) {
            break;
        }
        info!("Waiting {interval:?} before the next file");
        if !shutdown.sleep(interval, poll) {
            break;
        }
    }
    Ok(summary)
}
