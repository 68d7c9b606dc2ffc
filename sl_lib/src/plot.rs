//! The confidence-over-time chart.
use crate::ledger::ProgressTable;
use anyhow::{Context, Result};
use log::warn;
use plotly::common::{DashType, Line, Marker, Mode, Position};
use plotly::layout::Axis;
use plotly::{Layout, Plot, Scatter};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_COLOR: &str = "gray";
const LABEL_THRESHOLD: f64 = 0.5;
const LABEL_OFFSET: f64 = 0.05;
const THRESHOLDS: [(f64, &str); 2] = [(0.95, "red"), (0.80, "orange")];
const TIME_TICK_EVERY: usize = 4;

#[derive(Deserialize)]
struct ColorEntry {
    class: String,
    color: String,
}

/// Class label to plot colour, from a `class,color` CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMap {
    colors: HashMap<String, String>,
}

impl ColorMap {
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening colour table {}", path.display()))?;
        let mut colors = HashMap::new();
        for entry in reader.deserialize() {
            let entry: ColorEntry =
                entry.with_context(|| format!("reading colour table {}", path.display()))?;
            colors.insert(entry.class, entry.color);
        }
        Ok(ColorMap { colors })
    }

    /// Read the table if there is one, falling back to the default colour for
    /// every class.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return ColorMap::default();
        };
        match ColorMap::from_csv(path) {
            Ok(map) => map,
            Err(e) => {
                warn!("using default plot colours: {e:#}");
                ColorMap::default()
            }
        }
    }

    /// Colour for a class. Labels containing `/` are looked up with spaces.
    pub fn color_for(&self, class: &str) -> &str {
        self.colors
            .get(&class.replace('/', " "))
            .map_or(DEFAULT_COLOR, String::as_str)
    }
}

/// Number of x ticks to draw for `n` iterations.
pub fn x_axis_upper(n: usize) -> usize {
    if n > 5 {
        n + 5
    } else {
        10
    }
}

/// Tick text for positions `0..upper`: the iteration number, with the time
/// underneath on every fourth tick.
pub fn tick_labels(times: &[String], upper: usize) -> Vec<String> {
    (0..upper)
        .map(|i| {
            let n = i + 1;
            match times.get(i) {
                Some(time) if n % TIME_TICK_EVERY == 0 && !time.is_empty() => {
                    format!("{n}<br>{time}")
                }
                _ => n.to_string(),
            }
        })
        .collect()
}

fn confidence_plot(table: &ProgressTable, colors: &ColorMap) -> Plot {
    let n = table.num_columns();
    let upper = x_axis_upper(n);
    let x: Vec<f64> = (0..n).map(|i| i as f64).collect();

    let mut plot = Plot::new();
    for row in &table.rows {
        let color = colors.color_for(&row.class).to_string();
        plot.add_trace(
            Scatter::new(x.clone(), row.scores.clone())
                .name(&row.class)
                .mode(Mode::LinesMarkers)
                .line(Line::new().color(color.clone()))
                .marker(Marker::new().color(color)),
        );
        if let Some(&last) = row.scores.last() {
            if last > LABEL_THRESHOLD {
                plot.add_trace(
                    Scatter::new(vec![(n - 1) as f64], vec![last + LABEL_OFFSET])
                        .mode(Mode::Text)
                        .text_array(vec![row.class.clone()])
                        .text_position(Position::TopCenter)
                        .show_legend(false),
                );
            }
        }
    }

    let x_range = vec![-0.8, upper as f64 - 0.5];
    for (threshold, color) in THRESHOLDS {
        plot.add_trace(
            Scatter::new(x_range.clone(), vec![threshold, threshold])
                .name(&format!("{threshold:.2} threshold"))
                .mode(Mode::Lines)
                .line(Line::new().color(color).dash(DashType::Dash)),
        );
    }

    plot.set_layout(
        Layout::new()
            .title("Confidence over time")
            .show_legend(true)
            .x_axis(
                Axis::new()
                    .title("Iteration")
                    .range(x_range)
                    .tick_values((0..upper).map(|i| i as f64).collect())
                    .tick_text(tick_labels(&table.times, upper)),
            )
            .y_axis(
                Axis::new()
                    .title("Confidence")
                    .range(vec![-0.1, 1.1])
                    .tick_values(vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]),
            ),
    );
    plot
}

/// Write `<prefix>.html` and `<prefix>.json` for the table.
pub fn render_confidence_plot(
    table: &ProgressTable,
    colors: &ColorMap,
    prefix: &Path,
) -> Result<Vec<PathBuf>> {
    let plot = confidence_plot(table, colors);
    let html = prefix.with_extension("html");
    let json = prefix.with_extension("json");
    std::fs::write(&html, plot.to_html())
        .with_context(|| format!("writing {}", html.display()))?;
    std::fs::write(&json, plot.to_json())
        .with_context(|| format!("writing {}", json.display()))?;
    Ok(vec![html, json])
}
