use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::error::GraphError;
use crate::task::{Artifacts, Node, TaskContext, TaskHandle, TaskRef, TaskSpec};

/// The task graph while it is being assembled.
///
/// Tasks are registered one by one, each naming its predecessors either by
/// [`TaskHandle`] or by name. A name that hasn't been declared yet is kept as
/// a pending reference, so tasks can be written in any order; every pending
/// reference must be declared by the time [`Blueprint::finish`] is called.
///
/// ```rust
/// use tsumiki::Blueprint;
///
/// let mut blueprint = Blueprint::new();
/// let clean = blueprint.task("clean").run(|_| Ok(vec![]))?;
/// blueprint.task("default").after(clean).group()?;
///
/// let pipeline = blueprint.finish()?;
/// assert_eq!(pipeline.resolve_order("default")?.len(), 2);
/// # Ok::<(), tsumiki::GraphError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    graph: Graph<Node, ()>,
    names: HashMap<Cow<'static, str>, NodeIndex>,
    declared: usize,
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Visited,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fluent task declaration.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            spec: TaskSpec::new(name),
        }
    }

    /// Adds a task to the graph.
    ///
    /// Fails without touching the graph if the name is already declared or
    /// if the new predecessor edges would close a cycle.
    pub fn register(&mut self, spec: TaskSpec) -> Result<TaskHandle, GraphError> {
        let TaskSpec {
            name,
            after,
            action,
        } = spec;

        let existing = self.names.get(name.as_ref()).copied();
        if let Some(index) = existing
            && self.graph[index].is_declared()
        {
            return Err(GraphError::DuplicateName(name.into_owned()));
        }

        let mut known = Vec::new();
        let mut fresh = Vec::new();

        for pred in after {
            match pred {
                TaskRef::Handle(handle) => {
                    let index = self.check_handle(handle)?;
                    if Some(index) == existing {
                        return Err(self_cycle(&name));
                    }
                    known.push(index);
                }
                TaskRef::Name(pred) if pred == name => return Err(self_cycle(&name)),
                TaskRef::Name(pred) => match self.names.get(pred.as_ref()) {
                    Some(&index) => known.push(index),
                    None if !fresh.contains(&pred) => fresh.push(pred),
                    None => {}
                },
            }
        }

        // Only a task that was already referenced has dependents, so only
        // then can one of its new predecessors already depend on it.
        if let Some(index) = existing {
            let targets: HashSet<_> = known.iter().copied().collect();
            if let Some(path) = self.find_path(index, &targets) {
                let mut cycle: Vec<String> = path
                    .iter()
                    .map(|&i| self.graph[i].name().to_string())
                    .collect();
                cycle.push(name.to_string());
                return Err(GraphError::Cycle {
                    task: name.into_owned(),
                    cycle,
                });
            }
        }

        let seq = self.declared;
        self.declared += 1;

        let index = match existing {
            Some(index) => {
                self.graph[index] = Node::Declared { name, action, seq };
                index
            }
            None => {
                let index = self.graph.add_node(Node::Declared {
                    name: name.clone(),
                    action,
                    seq,
                });
                self.names.insert(name, index);
                index
            }
        };

        for pred in fresh {
            let pending = self.graph.add_node(Node::Pending(pred.clone()));
            self.names.insert(pred, pending);
            known.push(pending);
        }

        for pred in known {
            self.graph.update_edge(pred, index, ());
        }

        Ok(TaskHandle(index))
    }

    /// Validates that every referenced task has been declared and freezes
    /// the graph.
    pub fn finish(self) -> Result<Pipeline, GraphError> {
        if let Some(node) = self.graph.node_weights().find(|node| !node.is_declared()) {
            return Err(GraphError::UnknownTask(node.name().to_string()));
        }

        Ok(Pipeline {
            graph: self.graph,
            names: self.names,
        })
    }

    fn check_handle(&self, handle: TaskHandle) -> Result<NodeIndex, GraphError> {
        match self.graph.node_weight(handle.index()) {
            Some(_) => Ok(handle.index()),
            None => Err(GraphError::UnknownTask(format!("#{}", handle.index().index()))),
        }
    }

    /// Depth-first search along dependent edges, returning the path from
    /// `from` to the first node found in `targets`.
    fn find_path(&self, from: NodeIndex, targets: &HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
        let mut marks = HashMap::new();
        let mut path = Vec::new();

        self.visit(from, targets, &mut marks, &mut path)
            .then_some(path)
    }

    fn visit(
        &self,
        node: NodeIndex,
        targets: &HashSet<NodeIndex>,
        marks: &mut HashMap<NodeIndex, Mark>,
        path: &mut Vec<NodeIndex>,
    ) -> bool {
        match marks.get(&node) {
            // the graph is acyclic, a node being visited is never reached twice
            Some(Mark::Visiting) | Some(Mark::Visited) => return false,
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);

        if targets.contains(&node) {
            return true;
        }

        for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
            if self.visit(next, targets, marks, path) {
                return true;
            }
        }

        path.pop();
        marks.insert(node, Mark::Visited);
        false
    }
}

fn self_cycle(name: &str) -> GraphError {
    GraphError::Cycle {
        task: name.to_string(),
        cycle: vec![name.to_string(), name.to_string()],
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        render_mermaid(&self.graph, f)
    }
}

pub(crate) fn render_mermaid(
    graph: &Graph<Node, ()>,
    f: &mut impl std::fmt::Write,
) -> std::fmt::Result {
    writeln!(f, "graph LR")?;

    for index in graph.node_indices() {
        let name = graph[index].name().replace('"', "\\\"");
        match graph[index].action() {
            Some(_) => writeln!(f, "    {}[\"{}\"]", index.index(), name)?,
            None => writeln!(f, "    {}([\"{}\"])", index.index(), name)?,
        }
    }

    for edge in graph.raw_edges() {
        writeln!(
            f,
            "    {} --> {}",
            edge.source().index(),
            edge.target().index()
        )?;
    }

    Ok(())
}

/// Fluent builder returned by [`Blueprint::task`].
pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    spec: TaskSpec,
}

impl<'a> TaskDef<'a> {
    /// Declares a predecessor; may be called repeatedly.
    pub fn after(mut self, task: impl Into<TaskRef>) -> Self {
        self.spec = self.spec.after(task);
        self
    }

    /// Declares several predecessors at once.
    pub fn after_all<I, T>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskRef>,
    {
        for task in tasks {
            self.spec = self.spec.after(task);
        }
        self
    }

    /// Registers the task with the given body.
    pub fn run<F>(self, action: F) -> Result<TaskHandle, GraphError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<Artifacts> + Send + Sync + 'static,
    {
        self.blueprint.register(self.spec.action(action))
    }

    /// Registers a grouping task without a body.
    pub fn group(self) -> Result<TaskHandle, GraphError> {
        self.blueprint.register(self.spec)
    }
}

/// A finished, validated task graph.
///
/// The pipeline is immutable; it is shared by reference (or `Arc`) between
/// the scheduler, the watch dispatcher and the command line.
#[derive(Debug)]
pub struct Pipeline {
    pub(crate) graph: Graph<Node, ()>,
    names: HashMap<Cow<'static, str>, NodeIndex>,
}

impl Pipeline {
    /// Looks up a task by name.
    pub fn handle(&self, name: &str) -> Option<TaskHandle> {
        self.names.get(name).copied().map(TaskHandle)
    }

    /// Name of the task behind a handle.
    pub fn name(&self, handle: TaskHandle) -> &str {
        self.graph[handle.index()].name()
    }

    /// Names of all tasks, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let mut nodes: Vec<&Node> = self.graph.node_weights().collect();
        nodes.sort_by_key(|node| node.seq());
        nodes.into_iter().map(Node::name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub(crate) fn lookup(&self, task: impl Into<TaskRef>) -> Result<TaskHandle, GraphError> {
        match task.into() {
            TaskRef::Handle(handle) => match self.graph.node_weight(handle.index()) {
                Some(_) => Ok(handle),
                None => Err(GraphError::UnknownTask(format!("#{}", handle.index().index()))),
            },
            TaskRef::Name(name) => self
                .handle(&name)
                .ok_or_else(|| GraphError::UnknownTask(name.into_owned())),
        }
    }

    /// Splits the part of the graph the root depends on into execution
    /// groups. Tasks in a group don't depend on each other, every task comes
    /// one group after the deepest of its predecessors.
    pub fn resolve_order(&self, root: impl Into<TaskRef>) -> Result<Vec<Vec<TaskHandle>>, GraphError> {
        let root = self.lookup(root)?.index();

        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, root);
        let mut reachable = Vec::new();
        while let Some(index) = dfs.next(reversed) {
            reachable.push(index);
        }
        reachable.sort_by_key(|&index| self.graph[index].seq());

        let mut depths = HashMap::new();
        let mut groups: Vec<Vec<TaskHandle>> = Vec::new();

        for index in reachable {
            let depth = self.depth(index, &mut depths);
            if groups.len() <= depth {
                groups.resize_with(depth + 1, Vec::new);
            }
            groups[depth].push(TaskHandle(index));
        }

        Ok(groups)
    }

    fn depth(&self, index: NodeIndex, memo: &mut HashMap<NodeIndex, usize>) -> usize {
        if let Some(&depth) = memo.get(&index) {
            return depth;
        }

        let depth = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|pred| self.depth(pred, memo) + 1)
            .max()
            .unwrap_or(0);

        memo.insert(index, depth);
        depth
    }

    pub(crate) fn action(&self, handle: TaskHandle) -> Option<crate::task::Action> {
        self.graph[handle.index()].action().map(Arc::clone)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        render_mermaid(&self.graph, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &TaskContext) -> anyhow::Result<Artifacts> {
        Ok(vec![])
    }

    fn names(pipeline: &Pipeline, groups: &[Vec<TaskHandle>]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|group| group.iter().map(|&h| pipeline.name(h).to_string()).collect())
            .collect()
    }

    fn diamond() -> Pipeline {
        let mut bp = Blueprint::new();
        bp.task("a").run(noop).unwrap();
        bp.task("b").after("a").run(noop).unwrap();
        bp.task("c").after("a").run(noop).unwrap();
        bp.task("d").after("b").after("c").run(noop).unwrap();
        bp.finish().unwrap()
    }

    #[test]
    fn diamond_resolves_into_three_groups() {
        let pipeline = diamond();
        let groups = pipeline.resolve_order("d").unwrap();

        assert_eq!(
            names(&pipeline, &groups),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn resolve_only_includes_predecessors_of_root() {
        let pipeline = diamond();
        let groups = pipeline.resolve_order("b").unwrap();

        assert_eq!(names(&pipeline, &groups), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn unbalanced_paths_use_the_deepest_predecessor() {
        let mut bp = Blueprint::new();
        bp.task("a").run(noop).unwrap();
        bp.task("b").after("a").run(noop).unwrap();
        bp.task("c").after("a").after("b").run(noop).unwrap();
        let pipeline = bp.finish().unwrap();

        let groups = pipeline.resolve_order("c").unwrap();
        assert_eq!(names(&pipeline, &groups), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn duplicate_name_is_rejected_and_graph_unchanged() {
        let mut bp = Blueprint::new();
        bp.task("a").run(noop).unwrap();

        let err = bp.task("a").after("ghost").run(noop).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName("a".into()));

        // the rejected declaration must not have left a pending "ghost"
        let pipeline = bp.finish().unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn closing_a_cycle_is_rejected_without_mutation() {
        let mut bp = Blueprint::new();
        bp.task("a").after("c").run(noop).unwrap();
        bp.task("b").after("a").run(noop).unwrap();

        let err = bp.task("c").after("b").run(noop).unwrap_err();
        match err {
            GraphError::Cycle { task, cycle } => {
                assert_eq!(task, "c");
                assert_eq!(cycle, vec!["c", "a", "b", "c"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // "c" is still only a pending reference, so a clean declaration works
        bp.task("c").run(noop).unwrap();
        let pipeline = bp.finish().unwrap();
        let groups = pipeline.resolve_order("b").unwrap();
        assert_eq!(names(&pipeline, &groups), vec![vec!["c"], vec!["a"], vec!["b"]]);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut bp = Blueprint::new();
        let err = bp.task("a").after("a").group().unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn undeclared_predecessor_fails_on_finish() {
        let mut bp = Blueprint::new();
        bp.task("a").after("missing").run(noop).unwrap();

        assert_eq!(
            bp.finish().unwrap_err(),
            GraphError::UnknownTask("missing".into())
        );
    }

    #[test]
    fn unknown_root_is_reported() {
        let pipeline = diamond();
        assert_eq!(
            pipeline.resolve_order("nope").unwrap_err(),
            GraphError::UnknownTask("nope".into())
        );
    }

    #[test]
    fn handles_work_as_predecessors_and_roots() {
        let mut bp = Blueprint::new();
        let a = bp.task("a").run(noop).unwrap();
        let b = bp.task("b").run(noop).unwrap();
        let all = bp.task("all").after_all([a, b]).group().unwrap();
        let pipeline = bp.finish().unwrap();

        let groups = pipeline.resolve_order(all).unwrap();
        assert_eq!(groups, vec![vec![a, b], vec![all]]);
        assert_eq!(pipeline.handle("all"), Some(all));
    }

    #[test]
    fn groups_follow_declaration_order_for_forward_references() {
        let mut bp = Blueprint::new();
        bp.task("all").after("b").after("a").group().unwrap();
        bp.task("a").run(noop).unwrap();
        bp.task("b").run(noop).unwrap();
        let pipeline = bp.finish().unwrap();

        let groups = pipeline.resolve_order("all").unwrap();
        assert_eq!(names(&pipeline, &groups), vec![vec!["a", "b"], vec!["all"]]);
        assert_eq!(pipeline.names().collect::<Vec<_>>(), ["all", "a", "b"]);
        assert!(format!("{pipeline:?}").contains("Task(all, group)"));
    }

    #[test]
    fn mermaid_lists_nodes_and_edges() {
        let pipeline = diamond();
        let text = pipeline.to_string();

        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("0[\"a\"]"));
        assert!(text.contains("0 --> 1"));
        assert!(text.contains("2 --> 3"));
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        // Task i may only depend on tasks 0..i, which keeps the graph acyclic.
        fn dag_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
            (1..=max).prop_flat_map(|n| {
                proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n)
                    .prop_map(|raw| {
                        raw.into_iter()
                            .enumerate()
                            .map(|(i, deps)| {
                                if i == 0 {
                                    vec![]
                                } else {
                                    deps.into_iter().map(|d| d % i).collect()
                                }
                            })
                            .collect()
                    })
            })
        }

        proptest! {
            #[test]
            fn groups_cover_reachable_set_exactly_once(
                deps in dag_strategy(12),
                root in any::<prop::sample::Index>(),
            ) {
                let mut bp = Blueprint::new();
                for (i, preds) in deps.iter().enumerate() {
                    let mut def = bp.task(format!("t{i}"));
                    for p in preds {
                        def = def.after(format!("t{p}"));
                    }
                    def.run(noop).unwrap();
                }
                let pipeline = bp.finish().unwrap();

                let root = root.index(deps.len());
                let groups = pipeline.resolve_order(format!("t{root}")).unwrap();

                // expected: reverse reachability computed by hand
                let mut expected = HashSet::new();
                let mut stack = vec![root];
                while let Some(i) = stack.pop() {
                    if expected.insert(i) {
                        stack.extend(deps[i].iter().copied());
                    }
                }

                let flat: Vec<_> = groups.iter().flatten().map(|&h| pipeline.name(h).to_string()).collect();
                let unique: HashSet<_> = flat.iter().cloned().collect();
                prop_assert_eq!(flat.len(), unique.len());

                let expected: HashSet<_> = expected.into_iter().map(|i| format!("t{i}")).collect();
                prop_assert_eq!(unique, expected);

                // every predecessor lands in a strictly earlier group
                let position: HashMap<_, _> = groups
                    .iter()
                    .enumerate()
                    .flat_map(|(g, group)| group.iter().map(move |&h| (h, g)))
                    .collect();
                for (&handle, &g) in &position {
                    let i: usize = pipeline.name(handle)[1..].parse().unwrap();
                    for p in &deps[i] {
                        let pred = pipeline.handle(&format!("t{p}")).unwrap();
                        prop_assert!(position[&pred] < g);
                    }
                }
            }
        }
    }
}
