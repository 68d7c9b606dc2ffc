//! The single consumer: classifies queued files one at a time and drives the
//! ledger, composites and periodic aggregation.
use crate::aggregate::CumulativeAggregator;
use crate::composite::CompositeMerger;
use crate::ledger::ProgressLedger;
use crate::plot::{render_confidence_plot, ColorMap};
use crate::queue::{QueueReceiver, QueuedFile};
use crate::shutdown::CancelToken;
use crate::tools::Classifier;
use crate::{iteration_dir, iteration_name};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Processing(u32),
    ShuttingDown,
}

/// The next iteration to assign and the last one that was aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationState {
    pub iteration: u32,
    pub last_aggregated: Option<u32>,
}

impl Default for IterationState {
    fn default() -> Self {
        IterationState {
            iteration: 1,
            last_aggregated: None,
        }
    }
}

impl IterationState {
    /// Number of files classified so far.
    pub fn completed(&self) -> u32 {
        self.iteration - 1
    }
}

/// What happened to one dequeued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Classified as this iteration.
    Completed(u32),
    /// Classification failed; the iteration is reused for the next file.
    Held(u32),
}

/// Settings the controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub output_dir: PathBuf,
    pub model: PathBuf,
    pub model_name: String,
    pub color_table: Option<PathBuf>,
}

pub struct PipelineController {
    settings: ControllerSettings,
    classifier: Box<dyn Classifier>,
    ledger: ProgressLedger,
    composites: CompositeMerger,
    aggregator: CumulativeAggregator,
    state: IterationState,
    status: ControllerState,
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

impl PipelineController {
    pub fn new(
        settings: ControllerSettings,
        classifier: Box<dyn Classifier>,
        composites: CompositeMerger,
        aggregator: CumulativeAggregator,
    ) -> Self {
        let ledger = ProgressLedger::new(&settings.output_dir, &settings.model_name);
        PipelineController {
            settings,
            classifier,
            ledger,
            composites,
            aggregator,
            state: IterationState::default(),
            status: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    pub fn status(&self) -> ControllerState {
        self.status
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn composites(&self) -> &CompositeMerger {
        &self.composites
    }

    /// Drain the queue until it closes or `cancel` is set.
    pub fn run(
        mut self,
        queue: &QueueReceiver,
        cancel: &CancelToken,
        poll: Duration,
    ) -> IterationState {
        loop {
            if queue.is_empty() {
                info!("FLAG: Waiting for new bam file");
            }
            let Some(file) = queue.next(cancel, poll) else {
                break;
            };
            self.process(&file);
        }
        self.status = ControllerState::ShuttingDown;
        info!(
            "Pipeline stopped after {} iterations",
            self.state.completed()
        );
        self.state
    }

    /// Classify one file and, on success, do all per-iteration follow-up work.
    pub fn process(&mut self, file: &QueuedFile) -> FileOutcome {
        let iteration = self.state.iteration;
        self.status = ControllerState::Processing(iteration);
        let outcome = match self.classify(file.path(), iteration) {
            Ok(()) => {
                self.follow_up(file.path(), iteration);
                info!("FLAG: {} completed!", iteration_name(iteration));
                self.state.iteration += 1;
                FileOutcome::Completed(iteration)
            }
            Err(e) => {
                error!(
                    "Processing of {} failed, {} will be retried with the next file: {e:#}",
                    file.path().display(),
                    iteration_name(iteration)
                );
                FileOutcome::Held(iteration)
            }
        };
        self.status = ControllerState::Idle;
        outcome
    }

    /// Run the classifier and fold its output into the ledger. Either failing
    /// leaves the iteration unused.
    fn classify(&mut self, file: &Path, iteration: u32) -> Result<()> {
        info!(
            "FLAG: Starting processing of {} with {}",
            iteration_name(iteration),
            file.display()
        );
        self.classifier
            .classify(
                file,
                &self.settings.output_dir,
                &self.settings.model,
                iteration,
            )
            .context("classifier failed")?;
        let scores = self.ledger.classifier_output(iteration);
        self.ledger
            .append(iteration, &scores, &timestamp())
            .context("could not read classifier output")?;
        Ok(())
    }

    fn follow_up(&mut self, file: &Path, iteration: u32) {
        if let Err(e) = self.composites.record_processed(iteration, file) {
            warn!("could not record CNV input for {}: {e:#}", file.display());
        }

        if self.aggregator.is_due(iteration) {
            let prefix = iteration_dir(&self.settings.output_dir, iteration)
                .join(format!("CNV_plot_{}", iteration_name(iteration)));
            match self.aggregator.merge(self.composites.index(), iteration) {
                Ok(aggregation) => {
                    self.state.last_aggregated = Some(iteration);
                    if let Err(e) = self.aggregator.plot(&aggregation, &prefix) {
                        warn!("CNV plot failed: {e:#}");
                    }
                }
                Err(e) => warn!("cumulative merge failed: {e:#}"),
            }
        }

        let colors = ColorMap::load(self.settings.color_table.as_deref());
        let prefix = iteration_dir(&self.settings.output_dir, iteration)
            .join(format!("confidence_over_time_plot_{}", iteration_name(iteration)));
        if let Err(e) = render_confidence_plot(self.ledger.table(), &colors, &prefix) {
            warn!("confidence plot failed: {e:#}");
        }
    }
}
