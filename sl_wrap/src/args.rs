use clap::{Args, Parser, Subcommand};
use sl_lib::config::Overrides;
use sl_lib::simulate::SimulationSettings;
use std::path::PathBuf;
use std::time::Duration;

const CMD: &str = "sturgeon_live";

/// Live CNS tumour classification of a running nanopore sequencing run
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
pub struct SturgeonLive {
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Monitor a run directory and classify each new BAM file as it appears.
    Run(RunArgs),

    /// Replay the BAM files of a finished run into a directory, one at a time.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Directory of the sequencing run (or its bam_pass / barcode directory).
    #[clap(short, long)]
    pub input: Option<PathBuf>,

    /// Directory where results are written.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Lock file preventing a second instance on the same run.
    #[clap(short, long)]
    pub lock: Option<PathBuf>,

    /// Classifier script, run with bash for each file.
    #[clap(short, long)]
    pub sturgeon_script: Option<PathBuf>,

    /// Barcode used in library preparation, e.g. 5, 05 or unclassified.
    #[clap(short, long)]
    pub barcode: Option<String>,

    /// Number of iterations between cumulative merges and CNV plots.
    #[clap(short, long)]
    pub freq: Option<u32>,

    /// Model passed to the classifier.
    #[clap(short, long)]
    pub model: Option<PathBuf>,

    /// R script providing plot_cnv_from_bam_DNAcopy.
    #[clap(short, long)]
    pub r_script: Option<PathBuf>,

    /// Directory of helper files for the CNV plot.
    #[clap(long)]
    pub cnv_utils: Option<PathBuf>,

    /// CSV with `class,color` columns for the confidence plot.
    #[clap(long)]
    pub color_table: Option<PathBuf>,

    /// GridION verification run: watch the input directory itself and merge
    /// pre-split files by iteration index.
    #[clap(short, long)]
    pub gridion: bool,

    /// Creating this file stops the run.
    #[clap(long)]
    pub shutdown_file: Option<PathBuf>,

    /// error, warn, info, debug or trace.
    #[clap(long)]
    pub log_level: Option<String>,

    /// Configuration file. Defaults to sturgeon_live.toml next to the executable.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            input: self.input.clone(),
            output: self.output.clone(),
            lock: self.lock.clone(),
            sturgeon_script: self.sturgeon_script.clone(),
            barcode: self.barcode.clone(),
            freq: self.freq,
            model: self.model.clone(),
            r_script: self.r_script.clone(),
            cnv_utils: self.cnv_utils.clone(),
            color_table: self.color_table.clone(),
            gridion: self.gridion,
            shutdown_file: self.shutdown_file.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Directory containing the BAM files to replay.
    #[clap(long)]
    pub source_dir: PathBuf,

    /// Directory the links are created in.
    #[clap(long)]
    pub dest_dir: PathBuf,

    /// Seconds between links.
    #[clap(long, default_value_t = 60)]
    pub interval: u64,

    /// Prefix given to each link name.
    #[clap(long, default_value = "symlink_")]
    pub prefix: String,

    /// Seconds to wait before the first link.
    #[clap(long, default_value_t = 10)]
    pub initial_delay: u64,

    /// Stop after this many files instead of running until interrupted.
    #[clap(long)]
    pub max_steps: Option<usize>,

    /// Creating this file stops the simulation. Defaults to
    /// `stop_simulation.flag` in the destination directory.
    #[clap(long)]
    pub stop_file: Option<PathBuf>,
}

impl SimulateArgs {
    pub fn stop_file(&self) -> PathBuf {
        self.stop_file
            .clone()
            .unwrap_or_else(|| self.dest_dir.join("stop_simulation.flag"))
    }

    pub fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            source_dir: self.source_dir.clone(),
            dest_dir: self.dest_dir.clone(),
            interval: Duration::from_secs(self.interval),
            prefix: self.prefix.clone(),
            initial_delay: Duration::from_secs(self.initial_delay),
            max_steps: self.max_steps,
            poll: Duration::from_secs(1),
        }
    }
}
