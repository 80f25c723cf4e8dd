use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::config::Layout;
use crate::task::{Artifacts, TaskContext};
use crate::transform::Transform;
use crate::utils::as_overhead;

#[derive(Debug, Error)]
pub enum ClearError {
    #[error("Failed to remove {0}: {1}")]
    Remove(Utf8PathBuf, #[source] io::Error),
    #[error("Failed to list {0}: {1}")]
    List(Utf8PathBuf, #[source] io::Error),
}

/// Deletes the intermediate directory and the contents of the output
/// directory. A `.git` entry inside the output directory is kept.
#[derive(Debug, Clone)]
pub struct Clean {
    tmp: Utf8PathBuf,
    dist: Utf8PathBuf,
}

impl Clean {
    pub fn new(layout: &Layout) -> Self {
        Self {
            tmp: layout.tmp.clone(),
            dist: layout.dist.clone(),
        }
    }
}

impl Transform for Clean {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Artifacts> {
        let s = Instant::now();

        remove(&self.tmp)?;
        clear_dist(&self.dist)?;

        tracing::info!("Cleaned {} and {} {}", self.tmp, self.dist, as_overhead(s));
        Ok(Vec::new())
    }
}

fn remove(path: &Utf8Path) -> Result<(), ClearError> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };

    result.map_err(|err| ClearError::Remove(path.to_owned(), err))
}

fn clear_dist(dist: &Utf8Path) -> Result<(), ClearError> {
    let entries = match dist.read_dir_utf8() {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(ClearError::List(dist.to_owned(), err)),
    };

    for entry in entries {
        let entry = entry.map_err(|err| ClearError::List(dist.to_owned(), err))?;
        if entry.file_name() == ".git" {
            continue;
        }
        remove(entry.path())?;
    }

    Ok(())
}
