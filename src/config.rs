//! Startup configuration.
//!
//! Every option has a default matching the stock front-end layout, so an
//! empty JSON object (or no file at all) is a valid configuration. Options
//! are read once and never change while the process runs.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub layout: Layout,
    pub styles: StylesConfig,
    pub html: HtmlConfig,
    pub scripts: ScriptsConfig,
    pub images: ImagesConfig,
    pub copy: CopyConfig,
    pub serve: ServeConfig,
    pub watch: WatchConfig,
}

impl Config {
    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.styles.targets()?;
        Ok(config)
    }

    /// Reads `path` if it exists, falls back to the defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Where sources are read from and artifacts are written to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub src: Utf8PathBuf,
    /// Scoped intermediate output, served in development.
    pub tmp: Utf8PathBuf,
    /// Final output.
    pub dist: Utf8PathBuf,
    /// Persistent cache, survives `clean`.
    pub cache: Utf8PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            src: "src".into(),
            tmp: ".tmp".into(),
            dist: "dist".into(),
            cache: ".cache".into(),
        }
    }
}

impl Layout {
    /// All paths relative to `root`.
    pub fn rooted(&self, root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref();
        Self {
            src: root.join(&self.src),
            tmp: root.join(&self.tmp),
            dist: root.join(&self.dist),
            cache: root.join(&self.cache),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StylesConfig {
    /// Number of decimal digits kept in numbers of the compiled output.
    pub precision: u8,
    /// Browser compatibility targets for vendor prefixing.
    pub browsers: Vec<String>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            precision: 10,
            browsers: [
                "ie >= 8",
                "ie_mob >= 10",
                "ff >= 30",
                "chrome >= 34",
                "safari >= 7",
                "opera >= 23",
                "ios >= 7",
                "android >= 4.1",
                "bb >= 10",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl StylesConfig {
    /// Parses the browser list into typed constraints.
    pub fn targets(&self) -> Result<Vec<crate::transform::prefix::Target>, ConfigError> {
        self.browsers
            .iter()
            .map(|entry| entry.parse())
            .collect()
    }
}

/// Switches of the HTML minifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HtmlConfig {
    pub remove_comments: bool,
    pub collapse_whitespace: bool,
    pub collapse_boolean_attributes: bool,
    pub remove_attribute_quotes: bool,
    pub remove_redundant_attributes: bool,
    pub remove_empty_attributes: bool,
    pub remove_script_type_attributes: bool,
    pub remove_style_link_type_attributes: bool,
    pub remove_optional_tags: bool,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            remove_comments: true,
            collapse_whitespace: true,
            collapse_boolean_attributes: true,
            remove_attribute_quotes: true,
            remove_redundant_attributes: true,
            remove_empty_attributes: true,
            remove_script_type_attributes: true,
            remove_style_link_type_attributes: true,
            remove_optional_tags: true,
        }
    }
}

impl HtmlConfig {
    /// A configuration with every switch turned off.
    pub fn none() -> Self {
        Self {
            remove_comments: false,
            collapse_whitespace: false,
            collapse_boolean_attributes: false,
            remove_attribute_quotes: false,
            remove_redundant_attributes: false,
            remove_empty_attributes: false,
            remove_script_type_attributes: false,
            remove_style_link_type_attributes: false,
            remove_optional_tags: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// The `esbuild` executable.
    pub esbuild: String,
    /// Entry point, relative to `<src>/scripts`.
    pub entry: String,
    /// Language target for transpilation.
    pub target: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            esbuild: "esbuild".into(),
            entry: "main.js".into(),
            target: "es2015".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub jpeg_quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Extra files copied to the output root when they exist.
    pub extra: Vec<Utf8PathBuf>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            extra: vec!["node_modules/apache-server-configs/dist/.htaccess".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub port: u16,
    pub live_port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            live_port: 35729,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}
