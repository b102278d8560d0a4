//! All-or-nothing output staging.
//!
//! Every output of a run is first written into a hidden temporary directory
//! next to its target. Only after the whole run succeeded are the staged
//! files renamed onto their targets; dropping [`StagedOutputs`] without
//! committing removes everything that was staged.
//!
//! ```text
//! out/basins            <- target
//! out/.midasflow-XXXX/  <- staging directory
//!     basins            <- written here first
//!     previous          <- old target, parked during commit
//! ```
//!
//! A target inside an already staged directory target (for example a
//! hierarchy file inside the basin output directory) is written into that
//! directory's staged tree and lands together with it.
//!
//! Commit runs in two phases: every old target is first parked inside its
//! staging directory, then every staged output is renamed into place. A
//! failure in either phase moves the parked targets back.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{MidasError, Result};

const STAGING_PREFIX: &str = ".midasflow-";
const PARKED_NAME: &str = "previous";

struct Staged {
    target: PathBuf,
    /// Lexically absolute `target`, used for nesting checks.
    absolute: PathBuf,
    staged: PathBuf,
    dir: TempDir,
}

impl Staged {
    fn parked(&self) -> PathBuf {
        self.dir.path().join(PARKED_NAME)
    }
}

/// Outputs staged for one run.
#[derive(Default)]
pub struct StagedOutputs {
    staged: Vec<Staged>,
}

impl StagedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a staging location for `target` and returns the path to
    /// write to. The target's parent directory is created if needed.
    ///
    /// A target below an already staged target resolves into that target's
    /// staged tree. Staging the same target twice, or a target that
    /// encloses one staged earlier, is rejected.
    pub fn stage(&mut self, target: &Path) -> Result<PathBuf> {
        let name = target
            .file_name()
            .ok_or_else(|| MidasError::invalid_parameter("output path", "has no file name"))?;
        let absolute = lexical_absolute(target)?;

        for entry in &self.staged {
            if absolute == entry.absolute {
                return Err(MidasError::invalid_parameter(
                    "output path",
                    format!("{} is already an output of this run", target.display()),
                ));
            }
            if let Ok(relative) = absolute.strip_prefix(&entry.absolute) {
                let staged = entry.staged.join(relative);
                if let Some(parent) = staged.parent() {
                    fs::create_dir_all(parent).map_err(|source| MidasError::WriteFailed {
                        path: target.to_path_buf(),
                        source,
                    })?;
                }
                debug!(
                    path = %target.display(),
                    within = %entry.target.display(),
                    "output staged inside another output"
                );
                return Ok(staged);
            }
            if entry.absolute.starts_with(&absolute) {
                return Err(MidasError::invalid_parameter(
                    "output path",
                    format!(
                        "{} would replace the output {}",
                        target.display(),
                        entry.target.display()
                    ),
                ));
            }
        }

        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let write_err = |source| MidasError::WriteFailed {
            path: target.to_path_buf(),
            source,
        };
        fs::create_dir_all(&parent).map_err(write_err)?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(write_err)?;
        let staged = dir.path().join(name);
        self.staged.push(Staged {
            target: target.to_path_buf(),
            absolute,
            staged: staged.clone(),
            dir,
        });
        Ok(staged)
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Moves every staged output onto its target, replacing what was there.
    ///
    /// Fails without touching any target when a staged output was never
    /// written.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        if let Some(missing) = self.staged.iter().find(|e| !e.staged.exists()) {
            return Err(MidasError::Internal(format!(
                "output {} was staged but never written",
                missing.target.display()
            )));
        }

        let mut parked: Vec<&Staged> = Vec::new();
        for entry in &self.staged {
            if fs::symlink_metadata(&entry.target).is_err() {
                continue;
            }
            if let Err(source) = fs::rename(&entry.target, entry.parked()) {
                restore(&[], &parked);
                return Err(MidasError::WriteFailed {
                    path: entry.target.clone(),
                    source,
                });
            }
            parked.push(entry);
        }

        let mut placed: Vec<&Staged> = Vec::with_capacity(self.staged.len());
        for entry in &self.staged {
            if let Err(source) = fs::rename(&entry.staged, &entry.target) {
                restore(&placed, &parked);
                return Err(MidasError::WriteFailed {
                    path: entry.target.clone(),
                    source,
                });
            }
            debug!(path = %entry.target.display(), "output committed");
            placed.push(entry);
        }

        Ok(self.staged.iter().map(|e| e.target.clone()).collect())
    }
}

/// Undoes a partial commit. Best effort; failures are logged.
fn restore(placed: &[&Staged], parked: &[&Staged]) {
    for entry in placed {
        if let Err(e) = fs::rename(&entry.target, &entry.staged) {
            warn!(path = %entry.target.display(), error = %e, "failed to withdraw output");
        }
    }
    for entry in parked {
        if let Err(e) = fs::rename(entry.parked(), &entry.target) {
            warn!(path = %entry.target.display(), error = %e, "failed to restore previous output");
        }
    }
}

/// Absolute form of `path` with `.` and `..` folded, without touching the
/// filesystem.
fn lexical_absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| MidasError::WriteFailed {
                path: path.to_path_buf(),
                source,
            })?
            .join(path)
    };
    let mut normal = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }
    Ok(normal)
}
