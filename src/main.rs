use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use tsumiki::reload::LiveReload;
use tsumiki::watch::Watcher;
use tsumiki::{Config, Pipeline, recipe, server};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run: default, clean, serve, serve:dist, or any other task.
    #[clap(index = 1, default_value = recipe::DEFAULT)]
    task: String,

    /// JSON configuration file, defaults apply when it doesn't exist.
    #[clap(long, default_value = "tsumiki.json")]
    config: Utf8PathBuf,

    /// Port of the development server.
    #[clap(long)]
    port: Option<u16>,

    /// Print the task graph as a Mermaid diagram after the run.
    #[clap(long)]
    mermaid: bool,

    /// List the available tasks and exit.
    #[clap(long)]
    list: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = tsumiki::init_logging() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(port) = args.port {
        config.serve.port = port;
    }

    let pipeline = Arc::new(recipe::pipeline(&config)?);

    if args.list {
        let mut names: Vec<_> = pipeline.names().collect();
        names.sort();
        for name in names {
            println!("{name}");
        }
        return Ok(());
    }

    let diagnostics = pipeline.run(args.task.clone())?;

    if args.mermaid {
        println!("{}", diagnostics.render_mermaid(&pipeline));
    }

    match args.task.as_str() {
        recipe::SERVE => serve(pipeline, &config),
        recipe::SERVE_DIST => {
            let (_, http) = server::start(vec![config.layout.dist.clone()], config.serve.port, None)?;
            wait(http)
        }
        _ => Ok(()),
    }
}

/// Development server over the intermediate and source directories, with
/// live reload and rebuilds on change.
fn serve(pipeline: Arc<Pipeline>, config: &Config) -> anyhow::Result<()> {
    let roots = recipe::dev_roots(&config.layout);

    let live = LiveReload::start(config.serve.live_port, roots.clone())?;
    let (_, http) = server::start(roots, config.serve.port, Some(live.port()))?;

    let mut watcher = Watcher::new(
        pipeline,
        recipe::watch_rules(&config.layout),
        Arc::new(live),
        Duration::from_millis(config.watch.debounce_ms),
    )?;
    watcher.start()?;

    let result = wait(http);
    watcher.stop();
    result
}

fn wait(http: std::thread::JoinHandle<anyhow::Result<()>>) -> anyhow::Result<()> {
    match http.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("the HTTP server thread panicked"),
    }
}
