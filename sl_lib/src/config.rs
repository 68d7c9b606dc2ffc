//! Run configuration: an optional TOML file overlaid by command-line flags,
//! resolved once into an immutable [`LiveConfig`].
use crate::layout::{normalize_barcode, InstrumentMode};
use anyhow::{anyhow, bail, ensure, Context, Result};
use log::{warn, LevelFilter};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Looked for next to the executable when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "sturgeon_live.toml";

const DEFAULT_FREQ: u32 = 5;
const DEFAULT_SUFFIX: &str = ".bam";
const DEFAULT_LOCK_NAME: &str = "sturgeon_live.lock";
const DEFAULT_SHUTDOWN_NAME: &str = "shutdown.flag";
const DEFAULT_WAIT_INTERVAL_SECS: u64 = 20;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_WORKER_JOIN_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    /// Run root, `bam_pass` or the barcode directory itself.
    pub bam_input: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
    pub script_lock: Option<PathBuf>,
    pub sturgeon_script: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub r_script: Option<PathBuf>,
    /// Extra directory handed to the CNV plotting function.
    pub cnv_utils: Option<PathBuf>,
    /// `class,color` CSV for the confidence plot.
    pub color_table: Option<PathBuf>,
    pub shutdown_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingSection {
    pub wait_interval_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub worker_join_timeout_secs: Option<u64>,
}

/// The on-disk configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub paths: PathsSection,
    pub barcode: Option<String>,
    pub freq: Option<u32>,
    pub gridion: Option<bool>,
    pub suffix: Option<String>,
    pub logging: LoggingSection,
    pub timing: TimingSection,
}

impl ConfigFile {
    pub fn from_toml(s: &str) -> Result<ConfigFile> {
        Ok(toml::from_str(s)?)
    }

    pub fn read(path: &Path) -> Result<ConfigFile> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        ConfigFile::from_toml(&s).with_context(|| path.display().to_string())
    }

    /// Read `explicit` if given (it must exist), otherwise the file next to
    /// the executable, otherwise fall back to an empty configuration.
    pub fn locate(explicit: Option<&Path>) -> Result<ConfigFile> {
        if let Some(path) = explicit {
            return ConfigFile::read(path);
        }
        let path = std::env::current_exe()
            .context("Unable to locate the running executable")?
            .with_file_name(CONFIG_FILE_NAME);
        if path.exists() {
            ConfigFile::read(&path)
        } else {
            warn!(
                "could not find {CONFIG_FILE_NAME} at {}, falling back to defaults",
                path.display()
            );
            Ok(ConfigFile::default())
        }
    }
}

/// Values given on the command line; these win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub lock: Option<PathBuf>,
    pub sturgeon_script: Option<PathBuf>,
    pub barcode: Option<String>,
    pub freq: Option<u32>,
    pub model: Option<PathBuf>,
    pub r_script: Option<PathBuf>,
    pub cnv_utils: Option<PathBuf>,
    pub color_table: Option<PathBuf>,
    pub gridion: bool,
    pub shutdown_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// Everything a live run needs, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub lock_file: PathBuf,
    pub shutdown_file: PathBuf,
    pub sturgeon_script: PathBuf,
    pub model: PathBuf,
    pub r_script: PathBuf,
    pub cnv_utils: Option<PathBuf>,
    pub color_table: Option<PathBuf>,
    pub barcode: String,
    pub freq: u32,
    pub mode: InstrumentMode,
    pub suffix: String,
    pub log_level: LevelFilter,
    pub wait_interval: Duration,
    pub poll_interval: Duration,
    pub worker_join_timeout: Duration,
}

fn required<T>(value: Option<T>, flag: &str, key: &str) -> Result<T> {
    match value {
        Some(v) => Ok(v),
        None => bail!("no {flag} given on the command line and no {key} in the config file"),
    }
}

impl LiveConfig {
    pub fn resolve(file: ConfigFile, cli: Overrides) -> Result<LiveConfig> {
        let ConfigFile {
            paths,
            barcode,
            freq,
            gridion,
            suffix,
            logging,
            timing,
        } = file;

        let mode = InstrumentMode::from_gridion_flag(cli.gridion || gridion.unwrap_or(false));
        let output = required(cli.output.or(paths.results_dir), "--output", "paths.results_dir")?;
        let barcode = match (cli.barcode.or(barcode), mode) {
            (Some(b), _) => normalize_barcode(b.trim()),
            (None, InstrumentMode::Alternate) => String::new(),
            (None, InstrumentMode::Standard) => {
                bail!("no --barcode given on the command line and no barcode in the config file")
            }
        };
        let level = cli
            .log_level
            .or(logging.log_level)
            .unwrap_or_else(|| "info".to_string());
        let log_level =
            LevelFilter::from_str(&level).map_err(|_| anyhow!("invalid log level {level:?}"))?;

        let config = LiveConfig {
            input: required(cli.input.or(paths.bam_input), "--input", "paths.bam_input")?,
            lock_file: cli
                .lock
                .or(paths.script_lock)
                .unwrap_or_else(|| output.join(DEFAULT_LOCK_NAME)),
            shutdown_file: cli
                .shutdown_file
                .or(paths.shutdown_file)
                .unwrap_or_else(|| output.join(DEFAULT_SHUTDOWN_NAME)),
            output,
            sturgeon_script: required(
                cli.sturgeon_script.or(paths.sturgeon_script),
                "--sturgeon-script",
                "paths.sturgeon_script",
            )?,
            model: required(cli.model.or(paths.model), "--model", "paths.model")?,
            r_script: required(cli.r_script.or(paths.r_script), "--r-script", "paths.r_script")?,
            cnv_utils: cli.cnv_utils.or(paths.cnv_utils),
            color_table: cli.color_table.or(paths.color_table),
            barcode,
            freq: cli.freq.or(freq).unwrap_or(DEFAULT_FREQ),
            mode,
            suffix: suffix.unwrap_or_else(|| DEFAULT_SUFFIX.to_string()),
            log_level,
            wait_interval: Duration::from_secs(
                timing.wait_interval_secs.unwrap_or(DEFAULT_WAIT_INTERVAL_SECS),
            ),
            poll_interval: Duration::from_millis(
                timing.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            worker_join_timeout: Duration::from_secs(
                timing
                    .worker_join_timeout_secs
                    .unwrap_or(DEFAULT_WORKER_JOIN_TIMEOUT_SECS),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.freq >= 1, "freq must be at least 1, got {}", self.freq);
        ensure!(!self.suffix.is_empty(), "file suffix must not be empty");
        ensure!(
            !self.poll_interval.is_zero(),
            "poll interval must be greater than zero"
        );
        Ok(())
    }

    /// The model file stem, which the classifier puts in its output names.
    pub fn model_name(&self) -> Result<String> {
        let stem = self
            .model
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("cannot derive a model name from {}", self.model.display()))?;
        Ok(stem.to_string())
    }
}
