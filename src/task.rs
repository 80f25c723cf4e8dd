use std::borrow::Cow;
use std::fmt::{self, Debug};
use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::graph::NodeIndex;

/// A validated reference to a task, handed out once by
/// [`Blueprint::register`](crate::Blueprint::register).
///
/// Handles are only meaningful for the graph that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) NodeIndex);

impl TaskHandle {
    pub(crate) fn index(self) -> NodeIndex {
        self.0
    }
}

/// Anything that can name a predecessor: a handle obtained earlier, or a
/// task name which may be declared later on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Handle(TaskHandle),
    Name(Cow<'static, str>),
}

impl From<TaskHandle> for TaskRef {
    fn from(value: TaskHandle) -> Self {
        TaskRef::Handle(value)
    }
}

impl From<&'static str> for TaskRef {
    fn from(value: &'static str) -> Self {
        TaskRef::Name(Cow::Borrowed(value))
    }
}

impl From<String> for TaskRef {
    fn from(value: String) -> Self {
        TaskRef::Name(Cow::Owned(value))
    }
}

/// A single file produced by a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Full destination path, including the output directory.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn new(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// The artifacts a task hands back to the scheduler for writing.
pub type Artifacts = Vec<Artifact>;

/// Information available to a running task.
pub struct TaskContext<'a> {
    /// Name of the task being executed.
    pub name: &'a str,
    /// Span the task runs in, carries the progress indicator.
    pub span: tracing::Span,
}

/// Shared, type-erased task body.
pub type Action = Arc<dyn Fn(&TaskContext) -> anyhow::Result<Artifacts> + Send + Sync>;

/// Declaration of a task before it is added to the graph.
pub struct TaskSpec {
    pub name: Cow<'static, str>,
    pub after: Vec<TaskRef>,
    pub action: Option<Action>,
}

impl TaskSpec {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            action: None,
        }
    }

    pub fn after(mut self, task: impl Into<TaskRef>) -> Self {
        self.after.push(task.into());
        self
    }

    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<Artifacts> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }
}

impl Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("action", &self.action.as_ref().map(|_| "*"))
            .finish()
    }
}

/// A graph node. Nodes start out as `Pending` when they are referenced as a
/// predecessor before being declared. `seq` counts declarations, node
/// indices only count first mentions.
#[derive(Clone)]
pub(crate) enum Node {
    Pending(Cow<'static, str>),
    Declared {
        name: Cow<'static, str>,
        action: Option<Action>,
        seq: usize,
    },
}

impl Node {
    pub(crate) fn name(&self) -> &str {
        match self {
            Node::Pending(name) => name,
            Node::Declared { name, .. } => name,
        }
    }

    pub(crate) fn action(&self) -> Option<&Action> {
        match self {
            Node::Pending(_) => None,
            Node::Declared { action, .. } => action.as_ref(),
        }
    }

    pub(crate) fn seq(&self) -> usize {
        match self {
            Node::Pending(_) => usize::MAX,
            Node::Declared { seq, .. } => *seq,
        }
    }

    pub(crate) fn is_declared(&self) -> bool {
        matches!(self, Node::Declared { .. })
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Pending(name) => write!(f, "Pending({name})"),
            Node::Declared { name, action, .. } => {
                write!(f, "Task({name}{})", if action.is_some() { "" } else { ", group" })
            }
        }
    }
}
