//! Generic concurrent task graph execution.
//!
//! A [`TaskGraph`] is a directed acyclic graph of opaque units of work
//! with priorities and dependency edges. A [`TaskGraphRunner`] accepts
//! graphs per namespace, runs ready tasks (on a worker pool or
//! synchronously), and lets the caller collect completed tasks at any
//! time. Scheduling a new graph for a namespace atomically replaces
//! the previous one: tasks present in both are preserved, tasks absent
//! from the new graph that have not started are canceled (they
//! complete without running), and tasks already running finish
//! normally with their completion reported exactly once.
//!
//! This crate knows nothing about tiles or rasterization.

use std::fmt;
use std::sync::Arc;

mod synchronous_runner;
mod work_queue;
mod worker_runner;

pub use synchronous_runner::SynchronousTaskGraphRunner;
pub use worker_runner::WorkerTaskGraphRunner;

/// A unit of work. `run` is called at most once, on an arbitrary
/// worker thread; a canceled task is reported as completed without
/// `run` ever being called. Tasks record their own results internally.
pub trait Task: Send + Sync {
    fn run(&self);
}

/// Identity of a scheduled task. Two `Arc`s pointing at the same task
/// allocation are the same task.
pub(crate) type TaskKey = usize;

pub(crate) fn task_key(task: &Arc<dyn Task>) -> TaskKey {
    Arc::as_ptr(task) as *const () as TaskKey
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceToken(u32);

impl NamespaceToken {
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

#[derive(Clone)]
pub struct TaskGraphNode {
    pub task: Arc<dyn Task>,
    pub priority: u16,
    pub dependency_count: u32,
}

impl fmt::Debug for TaskGraphNode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TaskGraphNode")
            .field("task", &task_key(&self.task))
            .field("priority", &self.priority)
            .field("dependency_count", &self.dependency_count)
            .finish()
    }
}

#[derive(Clone)]
pub struct TaskGraphEdge {
    pub dependency: Arc<dyn Task>,
    pub dependent: Arc<dyn Task>,
}

impl fmt::Debug for TaskGraphEdge {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TaskGraphEdge")
            .field("dependency", &task_key(&self.dependency))
            .field("dependent", &task_key(&self.dependent))
            .finish()
    }
}

/// One scheduling pass worth of tasks. Lower `priority` values are
/// scheduled first when workers are available. Every edge endpoint
/// must also be a node of the same graph, and each node's
/// `dependency_count` must equal the number of edges pointing at it;
/// violations are programmer errors and panic at schedule time.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskGraphNode>,
    edges: Vec<TaskGraphEdge>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_task(&mut self, task: Arc<dyn Task>, priority: u16, dependency_count: u32) {
        self.nodes.push(TaskGraphNode {
            task,
            priority,
            dependency_count,
        });
    }

    pub fn push_edge(&mut self, dependency: Arc<dyn Task>, dependent: Arc<dyn Task>) {
        self.edges.push(TaskGraphEdge {
            dependency,
            dependent,
        });
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn nodes(&self) -> &[TaskGraphNode] {
        &self.nodes
    }

    pub(crate) fn edges(&self) -> &[TaskGraphEdge] {
        &self.edges
    }
}

/// Shared contract of the worker-pool and synchronous runners.
///
/// The caller obtains a namespace token once, schedules graphs into it
/// (each call replaces the previous graph), and drains completions
/// with `collect_completed_tasks`. `wait_for_tasks_to_finish` is the
/// one blocking operation, used when tearing down a binding so no task
/// outlives the resources it references.
pub trait TaskGraphRunner: Send + Sync {
    fn allocate_namespace(&self) -> NamespaceToken;

    fn schedule_tasks(&self, token: NamespaceToken, graph: TaskGraph);

    fn wait_for_tasks_to_finish(&self, token: NamespaceToken);

    fn collect_completed_tasks(&self, token: NamespaceToken) -> Vec<Arc<dyn Task>>;
}
