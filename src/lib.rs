#![forbid(unsafe_code)]
//! A front-end asset build runner.
//!
//! Work is described as a graph of named tasks. A [`Blueprint`] collects the
//! tasks and their predecessors, [`Blueprint::finish`] validates the graph
//! into a [`Pipeline`], and [`Pipeline::run`] executes a task together with
//! everything it depends on, group by group, running independent tasks in
//! parallel. Task bodies return [`Artifact`]s, which the scheduler writes to
//! disk as soon as the task is done.
//!
//! ```rust
//! use tsumiki::{Artifact, Blueprint};
//!
//! let dir = std::env::temp_dir().join("tsumiki-doc");
//! let out = camino::Utf8PathBuf::try_from(dir.join("hello.txt"))?;
//!
//! let mut blueprint = Blueprint::new();
//! blueprint
//!     .task("hello")
//!     .run(move |ctx| Ok(vec![Artifact::new(out.clone(), ctx.name)]))?;
//! blueprint.task("default").after("hello").group()?;
//!
//! let pipeline = blueprint.finish()?;
//! let diagnostics = pipeline.run("default")?;
//! assert_eq!(diagnostics.written.len(), 1);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! The stock build ([`recipe`]) compiles stylesheets, scripts, pages and
//! images. In development the [`watch`] module reruns the affected tasks on
//! every change and tells the browsers, through a [`reload::Reload`] sink,
//! to reload or to swap the new stylesheets in.

mod blueprint;
pub mod config;
mod error;
mod executor;
mod hash;
mod output;
#[cfg(all(feature = "styles", feature = "images"))]
pub mod recipe;
pub mod reload;
#[cfg(feature = "server")]
pub mod server;
mod task;
pub mod transform;
mod utils;
#[cfg(feature = "live")]
pub mod watch;

pub use crate::blueprint::{Blueprint, Pipeline, TaskDef};
pub use crate::config::Config;
#[cfg(feature = "live")]
pub use crate::error::WatchError;
pub use crate::error::{AggregateError, ConfigError, GraphError, RunError, TransformError};
pub use crate::executor::{Diagnostics, TaskExecution};
pub use crate::task::{Action, Artifact, Artifacts, TaskContext, TaskHandle, TaskRef, TaskSpec};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
