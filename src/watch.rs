//! Source watching and rebuild dispatch.
//!
//! A [`Watcher`] observes the static roots of every [`WatchRule`] through a
//! debounced `notify` watcher. Each debounced batch of changed paths goes to
//! the [`Dispatcher`], which finds the rules matching any of the paths and
//! reacts once per rule: either it asks the browsers to reload, or it runs
//! the rule's tasks and then notifies the browsers.
//!
//! The debouncer settles each path on its own, so batches that follow each
//! other within the debounce window are merged before dispatching. Batches
//! are handled one at a time on a single thread, so runs started by the
//! watcher never overlap.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};

use crate::error::WatchError;
use crate::reload::Reload;
use crate::task::{TaskHandle, TaskRef};
use crate::Pipeline;

/// What the browsers are told once a rule's tasks succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    Nothing,
    FullReload,
    /// Stylesheets written by the run are swapped in place.
    InjectStyles,
}

#[derive(Debug, Clone)]
pub enum Reaction {
    /// Reload the browsers without running anything.
    Reload,
    /// Run each task in order, then notify.
    Run { tasks: Vec<TaskRef>, then: Notify },
}

/// Globs paired with the reaction to a change of any matching file.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub globs: Vec<String>,
    pub reaction: Reaction,
}

impl WatchRule {
    pub fn reload<I, S>(globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            globs: globs.into_iter().map(Into::into).collect(),
            reaction: Reaction::Reload,
        }
    }

    pub fn run<I, S, T>(globs: I, tasks: T, then: Notify) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        T: IntoIterator,
        T::Item: Into<TaskRef>,
    {
        Self {
            globs: globs.into_iter().map(Into::into).collect(),
            reaction: Reaction::Run {
                tasks: tasks.into_iter().map(Into::into).collect(),
                then,
            },
        }
    }
}

#[derive(Debug)]
enum Bound {
    Reload,
    Run { tasks: Vec<TaskHandle>, then: Notify },
}

/// A rule validated against the pipeline, with compiled patterns.
#[derive(Debug)]
struct BoundRule {
    roots: Vec<Utf8PathBuf>,
    patterns: Vec<Pattern>,
    reaction: Bound,
}

impl BoundRule {
    fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches_path(path))
    }
}

/// Turns batches of changed paths into task runs and browser notifications.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    rules: Vec<BoundRule>,
    reload: Arc<dyn Reload>,
}

impl Dispatcher {
    /// Validates every task a rule names and compiles the globs.
    pub fn new(
        pipeline: Arc<Pipeline>,
        rules: Vec<WatchRule>,
        reload: Arc<dyn Reload>,
    ) -> Result<Self, WatchError> {
        let mut bound = Vec::with_capacity(rules.len());

        for rule in rules {
            let reaction = match rule.reaction {
                Reaction::Reload => Bound::Reload,
                Reaction::Run { tasks, then } => Bound::Run {
                    tasks: tasks
                        .into_iter()
                        .map(|task| pipeline.lookup(task))
                        .collect::<Result<_, _>>()?,
                    then,
                },
            };

            let mut roots = Vec::new();
            let mut patterns = Vec::new();
            for glob in &rule.globs {
                let (root, pattern) = resolve_watch_path(glob)?;
                roots.push(root);
                patterns.push(pattern);
            }

            bound.push(BoundRule {
                roots,
                patterns,
                reaction,
            });
        }

        Ok(Self {
            pipeline,
            rules: bound,
            reload,
        })
    }

    /// Minimal set of existing directories covering every rule.
    pub fn roots(&self) -> Vec<Utf8PathBuf> {
        let roots = self
            .rules
            .iter()
            .flat_map(|rule| rule.roots.iter())
            .filter(|root| root.exists())
            .cloned()
            .collect();

        collapse_watch_paths(roots)
    }

    /// Indices of the rules matched by at least one path, in declaration
    /// order.
    fn matching<'p>(&self, paths: impl IntoIterator<Item = &'p Path>) -> Vec<usize> {
        let paths: Vec<&Path> = paths.into_iter().collect();

        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| paths.iter().any(|path| rule.matches(path)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Reacts to one batch of changed paths. Each matched rule reacts once,
    /// however many of its files changed. A failing rule doesn't keep the
    /// rules after it from reacting.
    ///
    /// Returns the number of rules that matched.
    pub fn dispatch<'p>(&self, paths: impl IntoIterator<Item = &'p Path>) -> usize {
        let matched = self.matching(paths);

        for &i in &matched {
            self.react(&self.rules[i]);
        }

        matched.len()
    }

    fn react(&self, rule: &BoundRule) {
        let (tasks, then) = match &rule.reaction {
            Bound::Reload => {
                self.reload.notify_full_reload();
                return;
            }
            Bound::Run { tasks, then } => (tasks, *then),
        };

        let mut written = Vec::new();

        for &task in tasks {
            match self.pipeline.run(task) {
                Ok(diagnostics) => written.extend(diagnostics.written),
                Err(err) => {
                    // the previous output stays, the browsers keep it
                    tracing::error!(
                        "{} failed, waiting for the next change: {err}",
                        self.pipeline.name(task)
                    );
                    return;
                }
            }
        }

        match then {
            Notify::Nothing => {}
            Notify::FullReload => self.reload.notify_full_reload(),
            Notify::InjectStyles => {
                for path in written.iter().filter(|path| path.extension() == Some("css")) {
                    self.reload.notify_style_injected(path);
                }
            }
        }
    }

    /// Handles debounced batches until the sending side goes away.
    ///
    /// After a batch arrives, further batches are collected until none has
    /// come for `quiet`, then the merged set of paths is dispatched once.
    fn pump(&self, rx: Receiver<DebounceEventResult>, quiet: Duration) {
        while let Ok(first) = rx.recv() {
            let mut paths = HashSet::new();
            collect_paths(first, &mut paths);

            loop {
                match rx.recv_timeout(quiet) {
                    Ok(next) => collect_paths(next, &mut paths),
                    Err(RecvTimeoutError::Timeout) => break,
                    // stopped while settling, the pending changes are dropped
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }

            if paths.is_empty() {
                continue;
            }

            tracing::debug!("{} path(s) changed", paths.len());
            if self.dispatch(paths.iter().map(PathBuf::as_path)) == 0 {
                tracing::trace!("no rule matched");
            }
        }
    }
}

/// Adds the paths of every non-access event in a batch to `paths`.
fn collect_paths(result: DebounceEventResult, paths: &mut HashSet<PathBuf>) {
    match result {
        Ok(events) => paths.extend(
            events
                .into_iter()
                .filter(|de| !de.event.kind.is_access())
                .flat_map(|de| de.event.paths),
        ),
        Err(errors) => {
            for error in errors {
                tracing::error!("watch error: {error}");
            }
        }
    }
}

struct Active {
    debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    thread: JoinHandle<()>,
}

/// Runs a [`Dispatcher`] on a background thread fed by a debounced file
/// watcher.
pub struct Watcher {
    dispatcher: Arc<Dispatcher>,
    debounce: Duration,
    active: Option<Active>,
}

impl Watcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        rules: Vec<WatchRule>,
        reload: Arc<dyn Reload>,
        debounce: Duration,
    ) -> Result<Self, WatchError> {
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(pipeline, rules, reload)?),
            debounce,
            active: None,
        })
    }

    /// Starts watching. Does nothing when already running.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.active.is_some() {
            return Ok(());
        }

        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(self.debounce, None, tx)?;

        for root in self.dispatcher.roots() {
            tracing::info!("watching {}", root);
            debouncer.watch(root.as_std_path(), RecursiveMode::Recursive)?;
        }

        let dispatcher = self.dispatcher.clone();
        let quiet = self.debounce;
        let thread = std::thread::spawn(move || dispatcher.pump(rx, quiet));

        self.active = Some(Active { debouncer, thread });
        Ok(())
    }

    /// Stops watching and waits for a run in progress to finish. Does
    /// nothing when not running.
    pub fn stop(&mut self) {
        let Some(Active { debouncer, thread }) = self.active.take() else {
            return;
        };

        // dropping the debouncer closes the channel, which ends the pump
        drop(debouncer);
        if thread.join().is_err() {
            tracing::error!("watch thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Splits a glob string into an absolute static root path (for watching)
/// and a compiled absolute Pattern (for matching).
///
/// The root is canonicalized when it exists, it may be created later on.
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str.as_ref());

    // static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let root_part = if root_part.as_str().is_empty() {
        Utf8PathBuf::from(".")
    } else {
        root_part
    };

    let absolute_root = match root_part.canonicalize_utf8() {
        Ok(root) => root,
        Err(_) => Utf8PathBuf::try_from(std::path::absolute(&root_part)?)
            .map_err(|err| err.into_io_error())?,
    };

    // a concrete file is watched through its parent, to catch atomic writes
    let (watch_root, pattern_str) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern_str = absolute_root.join(&suffix_part);
        (absolute_root, pattern_str)
    };

    let pattern = Pattern::new(pattern_str.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// A recursive watch on `/a` covers `/a/b`, so only `/a` is kept.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;

    use super::*;
    use crate::{Artifact, Blueprint};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Reload for Recorder {
        fn notify_full_reload(&self) {
            self.0.lock().unwrap().push("reload".into());
        }

        fn notify_style_injected(&self, path: &Utf8Path) {
            self.0.lock().unwrap().push(format!("css:{}", path.file_name().unwrap()));
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        runs: Arc<Mutex<Vec<String>>>,
        recorder: Arc<Recorder>,
        pipeline: Arc<Pipeline>,
        rules: Vec<WatchRule>,
        dispatcher: Dispatcher,
    }

    fn fixture(fail_scripts: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        fs::create_dir_all(root.join("src/styles")).unwrap();
        fs::create_dir_all(root.join("src/scripts")).unwrap();

        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut bp = Blueprint::new();

        let log = runs.clone();
        let css = root.join(".tmp/styles/main.css");
        bp.task("styles")
            .run(move |ctx| {
                log.lock().unwrap().push(ctx.name.to_string());
                Ok(vec![Artifact::new(css.clone(), "a{}")])
            })
            .unwrap();

        for name in ["babelfy", "browserify"] {
            let log = runs.clone();
            bp.task(name)
                .run(move |ctx| {
                    log.lock().unwrap().push(ctx.name.to_string());
                    if fail_scripts && ctx.name == "babelfy" {
                        anyhow::bail!("syntax error");
                    }
                    Ok(vec![])
                })
                .unwrap();
        }
        let pipeline = Arc::new(bp.finish().unwrap());

        let src = root.join("src");
        let rules = vec![
            WatchRule::run(
                [src.join("scripts/**/*.js").to_string()],
                ["babelfy", "browserify"],
                Notify::FullReload,
            ),
            WatchRule::run(
                [
                    src.join("styles/**/*.scss").to_string(),
                    src.join("styles/**/*.css").to_string(),
                ],
                ["styles"],
                Notify::InjectStyles,
            ),
            WatchRule::reload([src.join("**/*.html").to_string()]),
        ];

        let recorder = Arc::new(Recorder::default());
        let dispatcher =
            Dispatcher::new(pipeline.clone(), rules.clone(), recorder.clone()).unwrap();

        Fixture {
            _dir: dir,
            root,
            runs,
            recorder,
            pipeline,
            rules,
            dispatcher,
        }
    }

    #[test]
    fn style_change_runs_only_styles_and_injects() {
        let fx = fixture(false);
        let changed = fx.root.join("src/styles/main.scss");

        assert_eq!(fx.dispatcher.dispatch([changed.as_std_path()]), 1);

        assert_eq!(*fx.runs.lock().unwrap(), ["styles"]);
        assert_eq!(*fx.recorder.0.lock().unwrap(), ["css:main.css"]);
    }

    #[test]
    fn many_paths_of_one_rule_react_once() {
        let fx = fixture(false);
        let a = fx.root.join("src/styles/a.scss");
        let b = fx.root.join("src/styles/nested/b.css");

        assert_eq!(fx.dispatcher.dispatch([a.as_std_path(), b.as_std_path()]), 1);
        assert_eq!(fx.runs.lock().unwrap().len(), 1);
    }

    #[test]
    fn html_change_only_reloads() {
        let fx = fixture(false);
        let page = fx.root.join("src/about/index.html");

        fx.dispatcher.dispatch([page.as_std_path()]);

        assert!(fx.runs.lock().unwrap().is_empty());
        assert_eq!(*fx.recorder.0.lock().unwrap(), ["reload"]);
    }

    #[test]
    fn failed_rule_does_not_notify_or_block_later_rules() {
        let fx = fixture(true);
        let script = fx.root.join("src/scripts/main.js");
        let style = fx.root.join("src/styles/main.scss");

        let matched = fx
            .dispatcher
            .dispatch([style.as_std_path(), script.as_std_path()]);

        assert_eq!(matched, 2);
        // rules react in declaration order, browserify never runs
        assert_eq!(*fx.runs.lock().unwrap(), ["babelfy", "styles"]);
        assert_eq!(*fx.recorder.0.lock().unwrap(), ["css:main.css"]);
    }

    #[test]
    fn unrelated_paths_are_ignored() {
        let fx = fixture(false);
        let other = fx.root.join("README.md");

        assert_eq!(fx.dispatcher.dispatch([other.as_std_path()]), 0);
        assert!(fx.recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_task_in_rule_is_rejected() {
        let pipeline = Arc::new(Blueprint::new().finish().unwrap());
        let rules = vec![WatchRule::run(["src/**/*.js"], ["lint"], Notify::Nothing)];

        let result = Dispatcher::new(pipeline, rules, Arc::new(crate::reload::NoReload));
        assert!(matches!(result, Err(WatchError::Graph(_))));
    }

    #[test]
    fn pump_returns_when_the_channel_closes() {
        let fx = fixture(false);
        let (tx, rx) = channel::<DebounceEventResult>();
        tx.send(Ok(vec![])).unwrap();
        drop(tx);

        fx.dispatcher.pump(rx, Duration::from_millis(10));
        assert!(fx.runs.lock().unwrap().is_empty());
    }

    fn changed(path: &Utf8Path) -> DebounceEventResult {
        let event = notify::Event::new(notify::EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(path.as_std_path().to_path_buf());
        Ok(vec![notify_debouncer_full::DebouncedEvent::new(
            event,
            std::time::Instant::now(),
        )])
    }

    #[test]
    fn batches_within_the_window_are_merged() {
        let fx = fixture(false);
        let (tx, rx) = channel();
        tx.send(changed(&fx.root.join("src/styles/a.scss"))).unwrap();
        tx.send(changed(&fx.root.join("src/styles/b.scss"))).unwrap();

        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            drop(tx);
        });
        fx.dispatcher.pump(rx, Duration::from_millis(100));
        sender.join().unwrap();

        assert_eq!(*fx.runs.lock().unwrap(), ["styles"]);
        assert_eq!(*fx.recorder.0.lock().unwrap(), ["css:main.css"]);
    }

    #[test]
    fn two_writes_within_the_debounce_window_run_once() {
        let fx = fixture(false);
        let mut watcher = Watcher::new(
            fx.pipeline.clone(),
            fx.rules.clone(),
            fx.recorder.clone(),
            Duration::from_millis(400),
        )
        .unwrap();
        watcher.start().unwrap();

        fs::write(fx.root.join("src/styles/a.scss"), "a{}").unwrap();
        std::thread::sleep(Duration::from_millis(200));
        fs::write(fx.root.join("src/styles/b.scss"), "b{}").unwrap();

        std::thread::sleep(Duration::from_millis(2500));
        watcher.stop();

        assert_eq!(*fx.runs.lock().unwrap(), ["styles"]);
    }

    #[test]
    fn watcher_start_and_stop_are_idempotent() {
        let fx = fixture(false);
        let rules = vec![WatchRule::reload([fx.root.join("src/**/*.html").to_string()])];
        let pipeline = Arc::new(Blueprint::new().finish().unwrap());
        let mut watcher = Watcher::new(
            pipeline,
            rules,
            Arc::new(crate::reload::NoReload),
            Duration::from_millis(50),
        )
        .unwrap();

        watcher.stop();
        assert!(!watcher.is_running());

        watcher.start().unwrap();
        watcher.start().unwrap();
        assert!(watcher.is_running());

        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn resolves_wildcards_against_the_static_root() {
        let fx = fixture(false);
        let glob = fx.root.join("src/styles/**/*.scss");

        let (watch, pattern) = resolve_watch_path(glob.as_str()).unwrap();

        assert_eq!(watch, fx.root.join("src/styles"));
        assert_eq!(pattern.as_str(), glob.as_str());
    }

    #[test]
    fn concrete_file_is_watched_through_its_parent() {
        let fx = fixture(false);
        let file = fx.root.join("src/index.html");
        fs::write(&file, "").unwrap();

        let (watch, pattern) = resolve_watch_path(file.as_str()).unwrap();

        assert_eq!(watch, fx.root.join("src"));
        assert_eq!(pattern.as_str(), file.as_str());
    }

    #[test]
    fn missing_root_still_resolves() {
        let fx = fixture(false);
        let glob = fx.root.join("src/images/**/*");

        let (watch, _) = resolve_watch_path(glob.as_str()).unwrap();
        assert_eq!(watch, fx.root.join("src/images"));
    }

    #[test]
    fn collapse_keeps_outermost_roots() {
        let paths = ["/a", "/a/b", "/a/b/c", "/b", "/c/d", "/foo", "/foo-bar"]
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect();

        assert_eq!(
            collapse_watch_paths(paths),
            ["/a", "/b", "/c/d", "/foo", "/foo-bar"].map(Utf8PathBuf::from)
        );
    }
}
