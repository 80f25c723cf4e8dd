//! Writing task artifacts to disk.

use std::fs;
use std::io;

use camino::Utf8PathBuf;

use crate::task::Artifact;

/// Writes every artifact to its destination, creating parent directories as
/// needed. Returns the written paths in order.
pub(crate) fn save_artifacts(artifacts: &[Artifact]) -> io::Result<Vec<Utf8PathBuf>> {
    let mut written = Vec::with_capacity(artifacts.len());

    for artifact in artifacts {
        if let Some(parent) = artifact.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        fs::write(&artifact.path, &artifact.data)?;
        written.push(artifact.path.clone());
    }

    Ok(written)
}
