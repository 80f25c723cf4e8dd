use std::fs;

use camino::Utf8PathBuf;

use crate::config::{CopyConfig, Layout};
use crate::task::{Artifact, Artifacts, TaskContext};
use crate::transform::{Transform, expand, report};

/// Copies the top level files of the source directory, dotfiles included,
/// to the output root. HTML pages are left to the html transform.
#[derive(Debug, Clone)]
pub struct CopyStatic {
    base: Utf8PathBuf,
    dist: Utf8PathBuf,
    /// Copied when present, skipped silently otherwise.
    extra: Vec<Utf8PathBuf>,
}

impl CopyStatic {
    pub fn new(layout: &Layout, config: &CopyConfig) -> Self {
        Self {
            base: layout.src.clone(),
            dist: layout.dist.clone(),
            extra: config.extra.clone(),
        }
    }
}

impl Transform for CopyStatic {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Artifacts> {
        let mut files = expand([self.base.join("*").as_str()])?;
        files.retain(|file| file.extension() != Some("html"));
        files.extend(self.extra.iter().filter(|file| file.is_file()).cloned());

        let mut artifacts = Vec::new();

        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            artifacts.push(Artifact::new(self.dist.join(name), fs::read(&file)?));
        }

        report("copy", &artifacts, true);
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;

    #[test]
    fn copies_top_level_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let layout = Layout::default().rooted(root);

        fs::create_dir_all(layout.src.join("styles")).unwrap();
        fs::write(layout.src.join("styles/main.scss"), "").unwrap();
        fs::write(layout.src.join("index.html"), "").unwrap();
        fs::write(layout.src.join("robots.txt"), "User-agent: *").unwrap();
        fs::write(layout.src.join(".nojekyll"), "").unwrap();
        fs::write(root.join(".htaccess"), "Options -Indexes").unwrap();

        let config = CopyConfig {
            extra: vec![root.join(".htaccess"), root.join("missing.conf")],
        };
        let ctx = TaskContext {
            name: "copy",
            span: tracing::Span::none(),
        };
        let artifacts = CopyStatic::new(&layout, &config).run(&ctx).unwrap();

        let paths: Vec<_> = artifacts.iter().map(|a| a.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                layout.dist.join(".nojekyll"),
                layout.dist.join("robots.txt"),
                layout.dist.join(".htaccess"),
            ]
        );
        assert_eq!(artifacts[1].data, b"User-agent: *");
    }
}
