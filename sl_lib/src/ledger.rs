//! Running per-class confidence history built from the classifier outputs.
use crate::iteration_name;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Label of the row carrying the `%H:%M` timestamp of each iteration.
pub const TIME_LABEL: &str = "TIME";
const CLASS_HEADER: &str = "class";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{path}: expected 2 rows of classifier output, found {found}")]
    RowCount { path: PathBuf, found: usize },

    #[error("{path}: {labels} labels but {values} values")]
    ColumnMismatch {
        path: PathBuf,
        labels: usize,
        values: usize,
    },

    #[error("{path}: no class scores after the probe count")]
    Empty { path: PathBuf },

    #[error("{path}: score {value:?} for class {class} is not a number")]
    BadScore {
        path: PathBuf,
        class: String,
        value: String,
    },
}

/// One iteration's scores in classifier order, probe count removed.
pub fn read_classifier_scores(path: &Path) -> Result<Vec<(String, f64)>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening classifier output {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record.with_context(|| format!("reading {}", path.display()))?);
    }
    if rows.len() != 2 {
        return Err(LedgerError::RowCount {
            path: path.to_path_buf(),
            found: rows.len(),
        }
        .into());
    }
    let (labels, values) = (&rows[0], &rows[1]);
    if labels.len() != values.len() {
        return Err(LedgerError::ColumnMismatch {
            path: path.to_path_buf(),
            labels: labels.len(),
            values: values.len(),
        }
        .into());
    }

    let mut seen = HashSet::new();
    let mut scores = Vec::new();
    // the first column is the number of probes
    for (label, value) in labels.iter().zip(values.iter()).skip(1) {
        let score: f64 = value.parse().map_err(|_| LedgerError::BadScore {
            path: path.to_path_buf(),
            class: label.to_string(),
            value: value.to_string(),
        })?;
        if !seen.insert(label.to_string()) {
            warn!("duplicate class {label} in {}, keeping the first", path.display());
            continue;
        }
        scores.push((label.to_string(), score));
    }
    if scores.is_empty() {
        return Err(LedgerError::Empty {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(scores)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub class: String,
    pub scores: Vec<f64>,
}

/// Classes by iteration. Every row has one score per column, and `times`
/// has one entry per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressTable {
    pub columns: Vec<String>,
    pub times: Vec<String>,
    pub rows: Vec<ProgressRow>,
}

impl ProgressTable {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, class: &str) -> Option<&ProgressRow> {
        self.rows.iter().find(|row| row.class == class)
    }

    /// The table with one more column. The first column seeds the rows; later
    /// columns keep only classes present in both, in the existing order.
    pub fn joined(&self, column: String, time: String, scores: Vec<(String, f64)>) -> Self {
        let rows = if self.is_empty() {
            scores
                .into_iter()
                .map(|(class, score)| ProgressRow {
                    class,
                    scores: vec![score],
                })
                .collect()
        } else {
            let incoming: HashMap<String, f64> = scores.into_iter().collect();
            self.rows
                .iter()
                .filter_map(|row| {
                    let Some(&score) = incoming.get(&row.class) else {
                        debug!("class {} missing from {column}, dropping", row.class);
                        return None;
                    };
                    let mut row = row.clone();
                    row.scores.push(score);
                    Some(row)
                })
                .collect()
        };
        let mut columns = self.columns.clone();
        columns.push(column);
        let mut times = self.times.clone();
        times.push(time);
        ProgressTable {
            columns,
            times,
            rows,
        }
    }

    /// Tab separated, header `class`, the `TIME` row last.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record(std::iter::once(CLASS_HEADER).chain(self.columns.iter().map(String::as_str)))?;
        for row in &self.rows {
            let mut record = vec![row.class.clone()];
            record.extend(row.scores.iter().map(f64::to_string));
            writer.write_record(&record)?;
        }
        writer.write_record(std::iter::once(TIME_LABEL).chain(self.times.iter().map(String::as_str)))?;
        writer.flush()?;
        Ok(())
    }
}

/// Owns the [`ProgressTable`] and its on-disk snapshots.
#[derive(Debug)]
pub struct ProgressLedger {
    output_dir: PathBuf,
    model_name: String,
    table: ProgressTable,
}

impl ProgressLedger {
    pub fn new(output_dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        ProgressLedger {
            output_dir: output_dir.into(),
            model_name: model_name.into(),
            table: ProgressTable::default(),
        }
    }

    /// Where the classifier leaves its scores for `iteration`.
    pub fn classifier_output(&self, iteration: u32) -> PathBuf {
        let it = iteration_name(iteration);
        self.output_dir.join(&it).join(format!(
            "merged_probes_methyl_calls_{}_{it}.csv",
            self.model_name
        ))
    }

    pub fn snapshot_path(&self, iteration: u32) -> PathBuf {
        let it = iteration_name(iteration);
        self.output_dir
            .join(&it)
            .join(format!("classifier_progress_{it}.tsv"))
    }

    pub fn table(&self) -> &ProgressTable {
        &self.table
    }

    /// Fold one classification into the table. The table only changes once
    /// the snapshot has been written.
    pub fn append(
        &mut self,
        iteration: u32,
        classifier_csv: &Path,
        timestamp: &str,
    ) -> Result<&ProgressTable> {
        let scores = read_classifier_scores(classifier_csv)?;
        let next = self
            .table
            .joined(iteration_name(iteration), timestamp.to_string(), scores);
        if next.rows.is_empty() {
            warn!("no class is present in every iteration so far");
        }
        let snapshot = self.snapshot_path(iteration);
        if let Some(parent) = snapshot.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        next.write_tsv(&snapshot)?;
        self.table = next;
        Ok(&self.table)
    }
}
