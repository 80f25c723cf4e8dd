use std::fmt::{self, Display};

use thiserror::Error;

/// Errors raised while the task graph is being assembled or queried.
///
/// These are construction-time errors: a pipeline that produced one of them
/// must not be started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    DuplicateName(String),

    #[error("Adding task '{task}' would create a cycle: {}", .cycle.join(" -> "))]
    Cycle { task: String, cycle: Vec<String> },

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),
}

/// A single task failed, either inside its transform or while its artifacts
/// were being written.
#[derive(Debug, Error)]
#[error("Task '{task}': {source:#}")]
pub struct TransformError {
    pub task: String,
    #[source]
    pub source: anyhow::Error,
}

impl TransformError {
    pub fn new(task: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            task: task.into(),
            source: source.into(),
        }
    }
}

/// Every failure observed during one scheduler run.
#[derive(Debug)]
pub struct AggregateError(pub Vec<TransformError>);

impl AggregateError {
    pub fn failures(&self) -> &[TransformError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Build failed, {0}")]
    Aggregate(#[from] AggregateError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read the configuration file.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse the configuration file.\n{0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid browser constraint '{0}'")]
    Browser(String),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_lists_every_failure() {
        let err = AggregateError(vec![
            TransformError::new("styles", anyhow::anyhow!("bad syntax")),
            TransformError::new("images", anyhow::anyhow!("broken png")),
        ]);

        let text = err.to_string();
        assert!(text.starts_with("2 task(s) failed"));
        assert!(text.contains("Task 'styles': bad syntax"));
        assert!(text.contains("Task 'images': broken png"));
    }

    #[test]
    fn cycle_message_shows_path() {
        let err = GraphError::Cycle {
            task: "c".into(),
            cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };

        assert_eq!(
            err.to_string(),
            "Adding task 'c' would create a cycle: a -> b -> c -> a"
        );
    }
}
