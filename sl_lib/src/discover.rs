//! Enumerating the alignment files already present when monitoring starts.
use crate::composite::CompositeMerger;
use crate::layout::{InstrumentMode, WatchTarget, UNCLASSIFIED};
use crate::queue::{QueueOrigin, QueuedFile};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn iteration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_it(?:_iteration_)?(\d+)").unwrap())
}

/// The iteration index embedded in an alternate-mode file name
/// (`..._it<NN>...` or `..._it_iteration_<NN>...`).
pub fn iteration_index(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    iteration_regex()
        .captures(name)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// True for the `unclassified` partial of a pre-split file.
pub fn is_unclassified(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains(UNCLASSIFIED))
}

/// Glob pattern for the files directly inside `dir` ending with `suffix`.
/// Both are escaped, so a run directory like `run[1]` matches literally.
pub(crate) fn suffix_pattern(dir: &Path, suffix: &str) -> Result<String> {
    let dir = dir
        .to_str()
        .with_context(|| format!("non UTF-8 directory {}", dir.display()))?;
    let pattern = Path::new(&glob::Pattern::escape(dir))
        .join(format!("*{}", glob::Pattern::escape(suffix)));
    Ok(pattern.to_string_lossy().into_owned())
}

/// Files directly inside `dir` whose name ends with `suffix`.
fn glob_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let pattern = suffix_pattern(dir, suffix)?;
    let mut files = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("bad glob pattern {pattern}"))? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => (),
            Err(e) => warn!("skipping unreadable entry during discovery: {e}"),
        }
    }
    Ok(files)
}

/// Standard mode: oldest file first, ties broken by path.
fn discover_by_mtime(dir: &Path, suffix: &str) -> Result<Vec<QueuedFile>> {
    let mut files = Vec::new();
    for path in glob_suffix(dir, suffix)? {
        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading modification time of {}", path.display()))?;
        files.push((modified, path));
    }
    Ok(files
        .into_iter()
        .sorted()
        .map(|(modified, path)| QueuedFile::new(path, QueueOrigin::Discovered { modified }))
        .collect())
}

/// Pre-split files sharing one iteration index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartialGroup {
    pub primary: Option<PathBuf>,
    pub complements: Vec<PathBuf>,
}

/// Group alternate-mode files by the iteration index in their name.
/// Files without an index are ignored.
pub fn group_partials(files: Vec<PathBuf>) -> BTreeMap<u32, PartialGroup> {
    let mut groups: BTreeMap<u32, PartialGroup> = BTreeMap::new();
    for path in files.into_iter().sorted() {
        let Some(index) = iteration_index(&path) else {
            warn!("ignoring {}: no iteration index in name", path.display());
            continue;
        };
        let group = groups.entry(index).or_default();
        if is_unclassified(&path) {
            group.complements.push(path);
        } else if let Some(existing) = &group.primary {
            warn!(
                "ignoring {}: iteration {index} already has primary {}",
                path.display(),
                existing.display()
            );
        } else {
            group.primary = Some(path);
        }
    }
    groups
}

/// Alternate mode: one queued unit per iteration index, ascending.
fn discover_by_index(
    dir: &Path,
    suffix: &str,
    composites: &mut CompositeMerger,
) -> Result<Vec<QueuedFile>> {
    let mut queued = Vec::new();
    for (index, group) in group_partials(glob_suffix(dir, suffix)?) {
        let Some(primary) = group.primary else {
            warn!(
                "iteration {index} only has unclassified files {:?}, skipping",
                group.complements
            );
            continue;
        };
        let unit = composites.build_from_partials(index, &primary, &group.complements)?;
        queued.push(QueuedFile::new(unit, QueueOrigin::Sequenced { index }));
    }
    Ok(queued)
}

/// List the backlog of `target`, in processing order.
///
/// In alternate mode this also builds the composite files for the backlog.
pub fn discover(
    target: &WatchTarget,
    suffix: &str,
    composites: &mut CompositeMerger,
) -> Result<Vec<QueuedFile>> {
    info!("Checking existing {suffix} files in {}", target.directory.display());
    let files = match target.mode {
        InstrumentMode::Standard => discover_by_mtime(&target.directory, suffix)?,
        InstrumentMode::Alternate => discover_by_index(&target.directory, suffix, composites)?,
    };
    info!("Found {} existing files to process", files.len());
    Ok(files)
}
