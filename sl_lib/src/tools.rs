//! External collaborators invoked by the pipeline: the classifier script, the
//! CNV plotting R script and BAM merging.
use anyhow::Result;
use itertools::Itertools;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to start {tool}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} failed with {status}")]
    Failed { tool: String, status: ExitStatus },
}

/// Runs classification of one alignment file.
pub trait Classifier: Send {
    /// Classify `input`, depositing results under `output_dir/iteration_<iteration>/`.
    fn classify(&self, input: &Path, output_dir: &Path, model: &Path, iteration: u32)
        -> Result<()>;
}

/// Produces the CNV plot for a merged alignment file.
pub trait CnvPlotter: Send {
    /// Write plot artifacts at `output_prefix` (the plotter picks the extensions).
    fn plot(&self, bam: &Path, output_prefix: &Path) -> Result<()>;
}

/// Combines alignment files into one.
pub trait BamMerger: Send {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

fn run_tool(cmd: &mut Command, tool: &str) -> Result<(), ToolError> {
    debug!(
        "running {tool}: {:?} {}",
        cmd.get_program(),
        cmd.get_args().map(|a| a.to_string_lossy()).join(" ")
    );
    let status = cmd.status().map_err(|source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    })?;
    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed {
            tool: tool.to_string(),
            status,
        })
    }
}

/// The classifier shell script, called as
/// `bash <script> <input> <output_dir> <model> <iteration>`.
#[derive(Debug, Clone)]
pub struct ScriptClassifier {
    script: PathBuf,
}

impl ScriptClassifier {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        ScriptClassifier {
            script: script.into(),
        }
    }
}

impl Classifier for ScriptClassifier {
    fn classify(
        &self,
        input: &Path,
        output_dir: &Path,
        model: &Path,
        iteration: u32,
    ) -> Result<()> {
        let mut cmd = Command::new("bash");
        cmd.arg(&self.script)
            .arg(input)
            .arg(output_dir)
            .arg(model)
            .arg(iteration.to_string());
        Ok(run_tool(&mut cmd, "classifier")?)
    }
}

/// Quote a string as an R character literal.
fn r_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Sources the CNV R script and calls `plot_cnv_from_bam_DNAcopy`.
#[derive(Debug, Clone)]
pub struct RscriptCnvPlotter {
    r_script: PathBuf,
    utils: Option<PathBuf>,
}

impl RscriptCnvPlotter {
    pub fn new(r_script: impl Into<PathBuf>, utils: Option<PathBuf>) -> Self {
        RscriptCnvPlotter {
            r_script: r_script.into(),
            utils,
        }
    }

    fn expression(&self, bam: &Path, output_prefix: &Path) -> String {
        let mut call_args = vec![
            r_string(&bam.to_string_lossy()),
            r_string(&output_prefix.to_string_lossy()),
        ];
        if let Some(utils) = &self.utils {
            call_args.push(r_string(&utils.to_string_lossy()));
        }
        format!(
            "source({}); plot_cnv_from_bam_DNAcopy({})",
            r_string(&self.r_script.to_string_lossy()),
            call_args.join(", ")
        )
    }
}

impl CnvPlotter for RscriptCnvPlotter {
    fn plot(&self, bam: &Path, output_prefix: &Path) -> Result<()> {
        let mut cmd = Command::new("Rscript");
        cmd.arg("-e").arg(self.expression(bam, output_prefix));
        Ok(run_tool(&mut cmd, "CNV plotting")?)
    }
}

/// In-process BAM merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtslibMerger;

impl BamMerger for HtslibMerger {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let summary = sl_bam::merge_bams(inputs, output)?;
        debug!(
            "merged {} files ({} records) into {}",
            summary.inputs,
            summary.records,
            summary.output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let script = dir.join("classify.sh");
        std::fs::write(&script, body).unwrap();
        script
    }

    #[test]
    fn test_script_receives_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("args.txt");
        let script = write_script(
            dir.path(),
            &format!("echo \"$@\" > {}\n", record.display()),
        );
        let classifier = ScriptClassifier::new(script);
        classifier
            .classify(
                Path::new("/in/file.bam"),
                Path::new("/out"),
                Path::new("/models/general.zip"),
                7,
            )
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(record).unwrap().trim(),
            "/in/file.bam /out /models/general.zip 7"
        );
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit 3\n");
        let err = ScriptClassifier::new(script)
            .classify(Path::new("a.bam"), dir.path(), Path::new("m.zip"), 1)
            .unwrap_err();
        let tool_err = err.downcast_ref::<ToolError>().unwrap();
        match tool_err {
            ToolError::Failed { status, .. } => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_r_expression() {
        let plotter = RscriptCnvPlotter::new(
            "/opt/cnv/plot_cnv.R",
            Some(PathBuf::from("/opt/cnv/utils")),
        );
        assert_eq!(
            plotter.expression(
                Path::new("/out/cnv_input/cumulative.bam"),
                Path::new("/out/iteration_3/CNV_plot_iteration_3")
            ),
            "source(\"/opt/cnv/plot_cnv.R\"); plot_cnv_from_bam_DNAcopy(\
             \"/out/cnv_input/cumulative.bam\", \"/out/iteration_3/CNV_plot_iteration_3\", \
             \"/opt/cnv/utils\")"
        );
        let bare = RscriptCnvPlotter::new("plot.R", None);
        assert_eq!(
            bare.expression(Path::new("a\"b.bam"), Path::new("out")),
            "source(\"plot.R\"); plot_cnv_from_bam_DNAcopy(\"a\\\"b.bam\", \"out\")"
        );
    }
}
