//! Asset transforms wired into tasks.
//!
//! Every transform is a plain struct built once from the configuration; the
//! scheduler calls [`Transform::run`] and writes the returned artifacts.

mod clean;
mod copy;
pub mod html;
#[cfg(feature = "images")]
mod images;
pub mod prefix;
mod scripts;
#[cfg(feature = "styles")]
mod styles;

use camino::{Utf8Path, Utf8PathBuf};
use glob::MatchOptions;

use crate::task::{Artifact, Artifacts, TaskContext};

pub use clean::Clean;
pub use copy::CopyStatic;
pub use html::Html;
#[cfg(feature = "images")]
pub use images::Images;
pub use scripts::Scripts;
#[cfg(feature = "styles")]
pub use styles::Styles;

pub trait Transform: Send + Sync + 'static {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Artifacts>;
}

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Expands glob patterns into a sorted list of files.
pub(crate) fn expand<I, S>(patterns: I) -> anyhow::Result<Vec<Utf8PathBuf>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut files = Vec::new();

    for pattern in patterns {
        for entry in glob::glob_with(pattern.as_ref(), MATCH)? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Path of `file` relative to `base`.
pub(crate) fn relative<'a>(file: &'a Utf8Path, base: &Utf8Path) -> anyhow::Result<&'a Utf8Path> {
    file.strip_prefix(base)
        .map_err(|_| anyhow::anyhow!("{file} is not inside {base}"))
}

/// Logs the size summary of a task's output.
pub(crate) fn report(title: &str, artifacts: &[Artifact], show_files: bool) {
    if show_files {
        for artifact in artifacts {
            tracing::info!(
                "{title} {} {}",
                artifact.path,
                crate::utils::format_size(artifact.data.len() as u64)
            );
        }
    }

    let total: u64 = artifacts.iter().map(|a| a.data.len() as u64).sum();
    tracing::info!(
        "{title}: {} file(s), {}",
        artifacts.len(),
        console::style(crate::utils::format_size(total)).magenta()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_includes_dotfiles_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(root.join("b.txt"), "").unwrap();
        std::fs::write(root.join("a.txt"), "").unwrap();
        std::fs::write(root.join(".htaccess"), "").unwrap();
        std::fs::create_dir(root.join("dir")).unwrap();

        let files = expand([root.join("*").as_str()]).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap()).collect();

        assert_eq!(names, vec![".htaccess", "a.txt", "b.txt"]);
    }

    #[test]
    fn relative_fails_outside_base() {
        assert_eq!(
            relative(Utf8Path::new("src/a/b.css"), Utf8Path::new("src")).unwrap(),
            "a/b.css"
        );
        assert!(relative(Utf8Path::new("lib/b.css"), Utf8Path::new("src")).is_err());
    }
}
