//! The stock front-end build.
//!
//! | task              | does                                                   |
//! |-------------------|--------------------------------------------------------|
//! | `clean`           | removes the intermediate and output directories        |
//! | `styles`          | Sass, vendor prefixes, minification                    |
//! | `babelfy`         | transpiles the script entry point into `.tmp`          |
//! | `browserify`      | bundles the scripts into `.tmp`                        |
//! | `browserify:dist` | bundles the scripts into `dist/scripts/main.min.js`    |
//! | `html`            | build blocks and minification of every page            |
//! | `images`          | image optimization                                     |
//! | `copy`            | top level files and extras                             |
//! | `default`         | `clean`, then `styles`, then everything else at once   |
//! | `serve`           | `browserify` and `styles`, for the development server  |
//! | `serve:dist`      | `default`, for previewing the output                   |
//!
//! The ordered stages of `default` are separate `default:*` tasks sharing
//! the bodies of the standalone tasks, so that running `styles` alone never
//! pulls in `clean`.

use std::sync::Arc;

use crate::config::{Config, Layout};
use crate::error::GraphError;
use crate::transform::{
    Clean, CopyStatic, Html, Images, Scripts, Styles, Transform,
};
use crate::{Blueprint, Pipeline, TaskHandle};

pub const CLEAN: &str = "clean";
pub const STYLES: &str = "styles";
pub const BABELFY: &str = "babelfy";
pub const BROWSERIFY: &str = "browserify";
pub const BROWSERIFY_DIST: &str = "browserify:dist";
pub const HTML: &str = "html";
pub const IMAGES: &str = "images";
pub const COPY: &str = "copy";
pub const DEFAULT: &str = "default";
pub const SERVE: &str = "serve";
pub const SERVE_DIST: &str = "serve:dist";

fn register<T: Transform>(
    bp: &mut Blueprint,
    name: &'static str,
    after: &[&'static str],
    transform: &Arc<T>,
) -> Result<TaskHandle, GraphError> {
    let transform = transform.clone();
    bp.task(name)
        .after_all(after.iter().copied())
        .run(move |ctx| transform.run(ctx))
}

/// Builds the task graph for `config`.
pub fn pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let layout = &config.layout;

    let clean = Arc::new(Clean::new(layout));
    let styles = Arc::new(Styles::new(layout, &config.styles)?);
    let babelfy = Arc::new(Scripts::transpile(layout, &config.scripts));
    let browserify = Arc::new(Scripts::bundle(
        layout,
        &config.scripts,
        layout.tmp.join("scripts/main.js"),
    ));
    let browserify_dist = Arc::new(Scripts::bundle(
        layout,
        &config.scripts,
        layout.dist.join("scripts/main.min.js"),
    ));
    let html = Arc::new(Html::new(layout, config.html));
    let images = Arc::new(Images::new(layout, &config.images));
    let copy = Arc::new(CopyStatic::new(layout, &config.copy));

    let mut bp = Blueprint::new();

    register(&mut bp, CLEAN, &[], &clean)?;
    register(&mut bp, STYLES, &[], &styles)?;
    register(&mut bp, BABELFY, &[], &babelfy)?;
    register(&mut bp, BROWSERIFY, &[], &browserify)?;
    register(&mut bp, BROWSERIFY_DIST, &[], &browserify_dist)?;
    register(&mut bp, HTML, &[], &html)?;
    register(&mut bp, IMAGES, &[], &images)?;
    register(&mut bp, COPY, &[], &copy)?;

    register(&mut bp, "default:styles", &[CLEAN], &styles)?;
    let after_styles = &["default:styles"];
    register(&mut bp, "default:html", after_styles, &html)?;
    register(&mut bp, "default:babelfy", after_styles, &babelfy)?;
    register(&mut bp, "default:browserify", after_styles, &browserify_dist)?;
    register(&mut bp, "default:images", after_styles, &images)?;
    register(&mut bp, "default:copy", after_styles, &copy)?;

    bp.task(DEFAULT)
        .after_all([
            "default:html",
            "default:babelfy",
            "default:browserify",
            "default:images",
            "default:copy",
        ])
        .group()?;

    bp.task(SERVE).after(BROWSERIFY).after(STYLES).group()?;
    bp.task(SERVE_DIST).after(DEFAULT).group()?;

    Ok(bp.finish()?)
}

/// Directories served by `serve`, in lookup order.
pub fn dev_roots(layout: &Layout) -> Vec<camino::Utf8PathBuf> {
    vec![layout.tmp.clone(), layout.src.clone()]
}

/// What the development server does when sources change.
#[cfg(feature = "live")]
pub fn watch_rules(layout: &Layout) -> Vec<crate::watch::WatchRule> {
    use crate::watch::{Notify, WatchRule};

    let src = &layout.src;
    let glob = |pattern: &str| src.join(pattern).to_string();

    vec![
        WatchRule::reload([glob("**/*.html")]),
        WatchRule::run(
            [glob("styles/**/*.scss"), glob("styles/**/*.css")],
            [STYLES],
            Notify::InjectStyles,
        ),
        WatchRule::run(
            [glob("scripts/**/*.js")],
            [BABELFY, BROWSERIFY],
            Notify::FullReload,
        ),
        WatchRule::reload([glob("images/**/*")]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pipeline: &Pipeline, groups: Vec<Vec<TaskHandle>>) -> Vec<Vec<&str>> {
        groups
            .into_iter()
            .map(|group| {
                let mut names: Vec<_> = group.into_iter().map(|h| pipeline.name(h)).collect();
                names.sort();
                names
            })
            .collect()
    }

    #[test]
    fn default_runs_clean_then_styles_then_the_rest() {
        let pipeline = pipeline(&Config::default()).unwrap();
        let order = pipeline.resolve_order(DEFAULT).unwrap();

        assert_eq!(
            names(&pipeline, order),
            vec![
                vec!["clean"],
                vec!["default:styles"],
                vec![
                    "default:babelfy",
                    "default:browserify",
                    "default:copy",
                    "default:html",
                    "default:images",
                ],
                vec!["default"],
            ]
        );
    }

    #[test]
    fn standalone_tasks_have_no_predecessors() {
        let pipeline = pipeline(&Config::default()).unwrap();

        for task in [STYLES, BABELFY, BROWSERIFY, BROWSERIFY_DIST, HTML, IMAGES, COPY] {
            assert_eq!(pipeline.resolve_order(task).unwrap().len(), 1, "{task}");
        }
    }

    #[test]
    fn serve_prepares_scripts_and_styles() {
        let pipeline = pipeline(&Config::default()).unwrap();

        assert_eq!(
            names(&pipeline, pipeline.resolve_order(SERVE).unwrap()),
            vec![vec!["browserify", "styles"], vec!["serve"]]
        );
        assert_eq!(pipeline.resolve_order(SERVE_DIST).unwrap().len(), 5);
    }

    #[test]
    fn invalid_browser_list_fails_the_recipe() {
        let config = Config::parse("{}").map(|mut config| {
            config.styles.browsers = vec!["mosaic >= 1".into()];
            config
        });

        assert!(pipeline(&config.unwrap()).is_err());
    }

    #[cfg(feature = "live")]
    #[test]
    fn watch_rules_bind_to_the_recipe() {
        use crate::reload::NoReload;
        use crate::watch::Dispatcher;

        let config = Config::default();
        let pipeline = Arc::new(pipeline(&config).unwrap());

        let dispatcher = Dispatcher::new(
            pipeline,
            watch_rules(&config.layout),
            Arc::new(NoReload),
        );
        assert!(dispatcher.is_ok());
    }
}
