use std::io::ErrorKind;
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{Layout, ScriptsConfig};
use crate::task::{Artifact, Artifacts, TaskContext};
use crate::transform::{Transform, report};

/// Errors that can occur when compiling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The esbuild executable could not be started.
    #[error("Couldn't start '{0}', is esbuild installed?")]
    Missing(String),

    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The esbuild process returned a non-zero exit code.
    #[error("esbuild failed on {entry}: {stderr}")]
    Esbuild { entry: Utf8PathBuf, stderr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Syntax lowering of the entry point only, with an inline source map.
    Transpile,
    /// Entry point and its imports in one minified file.
    Bundle,
}

/// Runs esbuild on the script entry point.
#[derive(Debug, Clone)]
pub struct Scripts {
    esbuild: String,
    entry: Utf8PathBuf,
    out: Utf8PathBuf,
    target: String,
    mode: Mode,
}

impl Scripts {
    /// Lowers `<src>/scripts/<entry>` to the configured target, written to
    /// `<tmp>/scripts/main.js`.
    pub fn transpile(layout: &Layout, config: &ScriptsConfig) -> Self {
        Self::new(layout, config, layout.tmp.join("scripts/main.js"), Mode::Transpile)
    }

    /// Bundles and minifies the entry point into `out`.
    pub fn bundle(layout: &Layout, config: &ScriptsConfig, out: Utf8PathBuf) -> Self {
        Self::new(layout, config, out, Mode::Bundle)
    }

    fn new(layout: &Layout, config: &ScriptsConfig, out: Utf8PathBuf, mode: Mode) -> Self {
        Self {
            esbuild: config.esbuild.clone(),
            entry: layout.src.join("scripts").join(&config.entry),
            out,
            target: config.target.clone(),
            mode,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![self.entry.to_string(), format!("--target={}", self.target)];

        match self.mode {
            Mode::Transpile => args.push("--sourcemap=inline".into()),
            Mode::Bundle => {
                args.push("--bundle".into());
                args.push("--minify".into());
            }
        }

        args
    }

    fn compile(&self) -> Result<Vec<u8>, ScriptError> {
        let output = Command::new(&self.esbuild)
            .args(self.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => ScriptError::Missing(self.esbuild.clone()),
                _ => ScriptError::Io(err),
            })?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild {
                entry: self.entry.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl Transform for Scripts {
    fn run(&self, ctx: &TaskContext) -> anyhow::Result<Artifacts> {
        let data = self.compile()?;
        let artifacts = vec![Artifact::new(self.out.clone(), data)];

        report(ctx.name, &artifacts, self.mode == Mode::Bundle);
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpile_targets_tmp_with_inline_maps() {
        let layout = Layout::default();
        let scripts = Scripts::transpile(&layout, &ScriptsConfig::default());

        assert_eq!(scripts.out, ".tmp/scripts/main.js");
        assert_eq!(
            scripts.args(),
            ["src/scripts/main.js", "--target=es2015", "--sourcemap=inline"]
        );
    }

    #[test]
    fn bundle_minifies() {
        let layout = Layout::default();
        let scripts = Scripts::bundle(
            &layout,
            &ScriptsConfig::default(),
            layout.dist.join("scripts/main.min.js"),
        );

        assert_eq!(scripts.out, "dist/scripts/main.min.js");
        assert!(scripts.args().contains(&"--bundle".to_string()));
        assert!(scripts.args().contains(&"--minify".to_string()));
    }

    #[test]
    fn missing_executable_is_reported() {
        let config = ScriptsConfig {
            esbuild: "esbuild-that-does-not-exist".into(),
            ..ScriptsConfig::default()
        };
        let scripts = Scripts::transpile(&Layout::default(), &config);

        let ctx = TaskContext {
            name: "babelfy",
            span: tracing::Span::none(),
        };
        let err = scripts.run(&ctx).unwrap_err();

        assert!(err.to_string().contains("esbuild-that-does-not-exist"));
    }
}
