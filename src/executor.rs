mod diagnostics;

use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{AggregateError, RunError, TransformError};
use crate::task::{TaskContext, TaskHandle, TaskRef};
use crate::Pipeline;

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// What a worker reports back once its task is over.
struct Completed {
    handle: TaskHandle,
    outcome: anyhow::Result<Vec<Utf8PathBuf>>,
    start: Instant,
    duration: Duration,
}

impl Pipeline {
    /// Runs the root task together with everything it depends on.
    ///
    /// Execution groups run one after another, the tasks of a group run
    /// concurrently on the rayon pool. Each task's artifacts are written as
    /// soon as that task finishes. When a task fails, the rest of its group
    /// is allowed to finish, no further group is started, and every failure
    /// seen is returned together.
    pub fn run(&self, root: impl Into<TaskRef>) -> Result<Diagnostics, RunError> {
        let root = self.lookup(root)?;
        let groups = self.resolve_order(root)?;
        let s = Instant::now();

        let total = groups.iter().map(Vec::len).sum::<usize>() as u64;

        let root_span = tracing::span!(Level::INFO, "run", task = self.name(root));
        root_span.pb_set_length(total);
        root_span.pb_set_style(&crate::utils::STYLE_RUN);
        root_span.pb_set_message(&format!("Running {}", self.name(root)));
        let _enter = root_span.enter();

        let mut diagnostics = Diagnostics::default();

        for group in groups {
            let failures = self.run_group(&group, &mut diagnostics, &root_span);

            if !failures.is_empty() {
                tracing::error!(
                    task = self.name(root),
                    failed = failures.len(),
                    "run aborted {}",
                    crate::utils::as_overhead(s)
                );
                return Err(AggregateError(failures).into());
            }
        }

        tracing::info!(
            task = self.name(root),
            "finished {}",
            crate::utils::as_overhead(s)
        );

        Ok(diagnostics)
    }

    fn run_group(
        &self,
        group: &[TaskHandle],
        diagnostics: &mut Diagnostics,
        root_span: &tracing::Span,
    ) -> Vec<TransformError> {
        let (sender, receiver) = channel::<Completed>();

        rayon::scope(|s| {
            for &handle in group {
                let Some(action) = self.action(handle) else {
                    // grouping tasks are satisfied once their predecessors are
                    root_span.pb_inc(1);
                    continue;
                };

                let name = self.name(handle);
                let sender = sender.clone();
                let parent = root_span.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(parent: &parent, Level::INFO, "task", name = name);
                    span.pb_set_style(&crate::utils::STYLE_TASK);
                    span.pb_set_message(&format!("Running {name}"));
                    let _enter = span.enter();

                    let context = TaskContext {
                        name,
                        span: span.clone(),
                    };

                    let start = Instant::now();

                    let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                        || action(&context),
                    )) {
                        Ok(result) => result,
                        Err(panic) => Err(anyhow::anyhow!(panic_message(panic))),
                    };

                    let outcome = outcome.and_then(|artifacts| {
                        crate::output::save_artifacts(&artifacts).map_err(anyhow::Error::from)
                    });

                    let duration = start.elapsed();

                    // the receiver outlives the scope
                    let _ = sender.send(Completed {
                        handle,
                        outcome,
                        start,
                        duration,
                    });
                });
            }
        });

        drop(sender);

        let mut failures = Vec::new();

        for completed in receiver.iter() {
            root_span.pb_inc(1);

            let name = self.name(completed.handle);
            diagnostics.execution_times.insert(
                completed.handle,
                TaskExecution {
                    start: completed.start,
                    duration: completed.duration,
                },
            );

            match completed.outcome {
                Ok(written) => {
                    tracing::debug!(task = name, files = written.len(), "task done");
                    diagnostics.written.extend(written);
                }
                Err(err) => {
                    tracing::error!(task = name, "{err:#}");
                    failures.push(TransformError::new(name, err));
                }
            }
        }

        failures
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}
