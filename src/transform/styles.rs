use std::borrow::Cow;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};
use thiserror::Error;

use crate::config::{Layout, StylesConfig};
use crate::error::ConfigError;
use crate::task::{Artifact, Artifacts, TaskContext};
use crate::transform::prefix::{Target, prefix};
use crate::transform::{Transform, expand, relative, report};

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// The Sass compiler rejected a stylesheet.
    #[error("Failed to compile {path}: {message}")]
    Compile { path: Utf8PathBuf, message: String },
}

/// Compiles Sass stylesheets, adds vendor prefixes and minifies the result.
///
/// Partials (files whose name starts with `_`) are only compiled through the
/// stylesheets importing them.
#[derive(Debug, Clone)]
pub struct Styles {
    base: Utf8PathBuf,
    tmp: Utf8PathBuf,
    dist: Utf8PathBuf,
    precision: u8,
    targets: Vec<Target>,
}

impl Styles {
    pub fn new(layout: &Layout, config: &StylesConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base: layout.src.join("styles"),
            tmp: layout.tmp.join("styles"),
            dist: layout.dist.join("styles"),
            precision: config.precision,
            targets: config.targets()?,
        })
    }

    fn compile(&self, path: &Utf8Path) -> Result<String, StyleError> {
        let fail = |err: Box<grass::Error>| StyleError::Compile {
            path: path.to_owned(),
            message: err.to_string(),
        };

        let opts = grass::Options::default()
            .style(grass::OutputStyle::Expanded)
            .load_path(&self.base);
        let css = grass::from_path(path, &opts).map_err(fail)?;

        let css = prefix(&css, &self.targets);
        let css = round_numbers(&css, self.precision);

        let opts = grass::Options::default().style(grass::OutputStyle::Compressed);
        grass::from_string(css.into_owned(), &opts).map_err(fail)
    }
}

impl Transform for Styles {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Artifacts> {
        let files = expand([
            self.base.join("**/*.scss").as_str(),
            self.base.join("**/*.css").as_str(),
        ])?;

        let mut artifacts = Vec::new();

        for file in files {
            if file.file_name().is_some_and(|name| name.starts_with('_')) {
                continue;
            }

            let css = self.compile(&file)?;
            let rel = relative(&file, &self.base)?.with_extension("css");

            artifacts.push(Artifact::new(self.tmp.join(&rel), css.clone()));
            artifacts.push(Artifact::new(self.dist.join(&rel), css));
        }

        report("styles", &artifacts, false);
        Ok(artifacts)
    }
}

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[\s:(,/])(-?\d*\.\d+)").expect("valid number regex")
});

/// Rounds decimal numbers to `precision` fractional digits, trimming
/// trailing zeros.
pub(crate) fn round_numbers(css: &str, precision: u8) -> Cow<'_, str> {
    let precision = usize::from(precision);

    NUMBER.replace_all(css, |caps: &Captures| {
        let literal = &caps[2];
        let digits = literal.split_once('.').map_or(0, |(_, frac)| frac.len());

        if digits <= precision {
            return caps[0].to_string();
        }

        let Ok(value) = literal.parse::<f64>() else {
            return caps[0].to_string();
        };

        let rounded = format!("{value:.precision$}");
        let rounded = if rounded.contains('.') {
            rounded.trim_end_matches('0').trim_end_matches('.')
        } else {
            &rounded
        };
        let rounded = if rounded == "-0" { "0" } else { rounded };

        format!("{}{}", &caps[1], rounded)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;

    fn setup() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let layout = Layout::default().rooted(root);
        std::fs::create_dir_all(layout.src.join("styles")).unwrap();
        (dir, layout)
    }

    fn ctx() -> TaskContext<'static> {
        TaskContext {
            name: "styles",
            span: tracing::Span::none(),
        }
    }

    #[test]
    fn rounds_only_long_fractions() {
        assert_eq!(round_numbers("width: 33.333333%;", 2), "width: 33.33%;");
        assert_eq!(round_numbers("margin: -0.5000001em;", 3), "margin: -0.5em;");
        assert_eq!(round_numbers("opacity: .25;", 10), "opacity: .25;");
        assert_eq!(
            round_numbers("background: url(img.12345678.png);", 2),
            "background: url(img.12345678.png);"
        );
    }

    #[test]
    fn compiles_prefixes_and_minifies() {
        let (_guard, layout) = setup();
        let styles_dir = layout.src.join("styles");
        std::fs::write(styles_dir.join("_vars.scss"), "$w: 10px;").unwrap();
        std::fs::write(
            styles_dir.join("main.scss"),
            "@use 'vars';\n.box {\n  width: vars.$w;\n  transform: rotate(1deg);\n}\n",
        )
        .unwrap();

        let styles = Styles::new(&layout, &StylesConfig::default()).unwrap();
        let artifacts = styles.run(&ctx()).unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].path, layout.tmp.join("styles/main.css"));
        assert_eq!(artifacts[1].path, layout.dist.join("styles/main.css"));

        let css = String::from_utf8(artifacts[1].data.clone()).unwrap();
        assert!(css.contains("-webkit-transform:rotate(1deg)"));
        assert!(css.contains("width:10px"));
        assert_eq!(artifacts[0].data, artifacts[1].data);
    }

    #[test]
    fn compile_errors_name_the_file() {
        let (_guard, layout) = setup();
        std::fs::write(layout.src.join("styles/broken.scss"), ".a { color: ").unwrap();

        let styles = Styles::new(&layout, &StylesConfig::default()).unwrap();
        let err = styles.run(&ctx()).unwrap_err();

        assert!(err.to_string().contains("broken.scss"));
    }
}
