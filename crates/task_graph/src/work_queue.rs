use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use smallvec::SmallVec;

use crate::{NamespaceToken, Task, TaskGraph, TaskKey, task_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Blocked,
    Ready,
    Running,
    Completed,
}

struct TaskEntry {
    task: Arc<dyn Task>,
    priority: u16,
    phase: TaskPhase,
    remaining_dependencies: u32,
    dependents: SmallVec<[TaskKey; 4]>,
    // Bumped on every schedule pass; heap items from older passes are
    // recognized as stale and skipped when popped.
    generation: u64,
}

struct TaskNamespace {
    generation: u64,
    entries: HashMap<TaskKey, TaskEntry>,
    num_pending: usize,
    completed_sender: Sender<Arc<dyn Task>>,
    completed_receiver: Receiver<Arc<dyn Task>>,
}

impl TaskNamespace {
    fn new() -> Self {
        let (completed_sender, completed_receiver) = unbounded();
        Self {
            generation: 0,
            entries: HashMap::new(),
            num_pending: 0,
            completed_sender,
            completed_receiver,
        }
    }
}

// Min-order: lower priority value first, ties broken by insertion
// sequence so traversal is stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyTaskKey {
    priority: u16,
    sequence: u64,
    token: NamespaceToken,
    key: TaskKey,
    generation: u64,
}

/// Priority- and dependency-ordered work queue shared by both runner
/// implementations. Callers are expected to serialize access (the
/// worker runner holds it behind one mutex).
pub(crate) struct TaskGraphWorkQueue {
    namespaces: HashMap<NamespaceToken, TaskNamespace>,
    ready: BinaryHeap<Reverse<ReadyTaskKey>>,
    next_namespace_id: u32,
    next_sequence: u64,
}

impl TaskGraphWorkQueue {
    pub(crate) fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
            ready: BinaryHeap::new(),
            next_namespace_id: 0,
            next_sequence: 0,
        }
    }

    pub(crate) fn allocate_namespace(&mut self) -> NamespaceToken {
        let token = NamespaceToken::from_raw(self.next_namespace_id);
        self.next_namespace_id = self
            .next_namespace_id
            .checked_add(1)
            .expect("namespace token space exhausted");
        self.namespaces.insert(token, TaskNamespace::new());
        token
    }

    /// Atomically replace the namespace's graph. Preserves tasks
    /// present in both graphs, cancels unstarted tasks absent from the
    /// new graph, and leaves running tasks to finish on their own.
    pub(crate) fn schedule(&mut self, token: NamespaceToken, graph: TaskGraph) {
        validate_graph(&graph);

        let namespace = self
            .namespaces
            .get_mut(&token)
            .unwrap_or_else(|| panic!("schedule for unknown namespace token {token:?}"));
        namespace.generation = namespace
            .generation
            .checked_add(1)
            .expect("namespace generation overflow");
        let generation = namespace.generation;

        let new_keys = graph
            .nodes()
            .iter()
            .map(|node| task_key(&node.task))
            .collect::<HashSet<_>>();

        // Cancel unstarted tasks that did not survive into the new
        // graph. They complete without ever running.
        let canceled_keys = namespace
            .entries
            .iter()
            .filter(|(key, entry)| {
                !new_keys.contains(*key)
                    && matches!(entry.phase, TaskPhase::Blocked | TaskPhase::Ready)
            })
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();
        for key in canceled_keys {
            let entry = namespace
                .entries
                .remove(&key)
                .expect("canceled task entry must exist");
            namespace
                .completed_sender
                .send(entry.task)
                .expect("completed task channel disconnected");
        }

        // Running tasks absent from the new graph keep their entries so
        // their eventual completion is reported, but no longer gate
        // anything in the new graph.
        for entry in namespace.entries.values_mut() {
            entry.dependents.clear();
        }

        for node in graph.nodes() {
            let key = task_key(&node.task);
            match namespace.entries.get_mut(&key) {
                Some(entry) => {
                    entry.priority = node.priority;
                    entry.generation = generation;
                    if matches!(entry.phase, TaskPhase::Blocked | TaskPhase::Ready) {
                        entry.phase = TaskPhase::Blocked;
                        entry.remaining_dependencies = node.dependency_count;
                    }
                }
                None => {
                    namespace.entries.insert(
                        key,
                        TaskEntry {
                            task: node.task.clone(),
                            priority: node.priority,
                            phase: TaskPhase::Blocked,
                            remaining_dependencies: node.dependency_count,
                            dependents: SmallVec::new(),
                            generation,
                        },
                    );
                }
            }
        }

        // Wire dependency edges. An edge from a task that already
        // completed (finished on a worker but not yet collected) is
        // satisfied immediately.
        for edge in graph.edges() {
            let dependency_key = task_key(&edge.dependency);
            let dependent_key = task_key(&edge.dependent);
            let dependency_phase = namespace
                .entries
                .get(&dependency_key)
                .expect("edge dependency must be a graph node")
                .phase;
            match dependency_phase {
                TaskPhase::Completed => {
                    let dependent = namespace
                        .entries
                        .get_mut(&dependent_key)
                        .expect("edge dependent must be a graph node");
                    dependent.remaining_dependencies = dependent
                        .remaining_dependencies
                        .checked_sub(1)
                        .expect("dependency count underflow");
                }
                TaskPhase::Blocked | TaskPhase::Ready | TaskPhase::Running => {
                    let dependency = namespace
                        .entries
                        .get_mut(&dependency_key)
                        .expect("edge dependency must be a graph node");
                    dependency.dependents.push(dependent_key);
                }
            }
        }

        // Everything unblocked becomes ready, in graph order so equal
        // priorities keep a deterministic sequence.
        let mut newly_ready = Vec::new();
        for node in graph.nodes() {
            let key = task_key(&node.task);
            let entry = namespace
                .entries
                .get_mut(&key)
                .expect("graph node entry must exist");
            if entry.phase == TaskPhase::Blocked && entry.remaining_dependencies == 0 {
                entry.phase = TaskPhase::Ready;
                newly_ready.push((entry.priority, key));
            }
        }

        namespace.num_pending = namespace
            .entries
            .values()
            .filter(|entry| entry.phase != TaskPhase::Completed)
            .count();

        for (priority, key) in newly_ready {
            self.push_ready(token, key, priority, generation);
        }
    }

    /// Pop the highest-priority ready task, skipping entries
    /// invalidated by a later schedule pass. Marks the task running.
    pub(crate) fn pop_ready(&mut self) -> Option<(NamespaceToken, TaskKey, Arc<dyn Task>)> {
        while let Some(Reverse(item)) = self.ready.pop() {
            let Some(namespace) = self.namespaces.get_mut(&item.token) else {
                continue;
            };
            let Some(entry) = namespace.entries.get_mut(&item.key) else {
                continue;
            };
            if entry.phase != TaskPhase::Ready || entry.generation != item.generation {
                continue;
            }
            entry.phase = TaskPhase::Running;
            return Some((item.token, item.key, entry.task.clone()));
        }
        None
    }

    /// Record a running task as finished, unblocking dependents.
    /// Returns true when the namespace has no pending work left.
    pub(crate) fn finish(&mut self, token: NamespaceToken, key: TaskKey) -> bool {
        let namespace = self
            .namespaces
            .get_mut(&token)
            .unwrap_or_else(|| panic!("finish for unknown namespace token {token:?}"));
        let entry = namespace
            .entries
            .get_mut(&key)
            .expect("finished task entry must exist");
        if entry.phase != TaskPhase::Running {
            panic!("task finished twice or without running");
        }
        entry.phase = TaskPhase::Completed;
        let task = entry.task.clone();
        let dependents = std::mem::take(&mut entry.dependents);
        let generation = namespace.generation;

        namespace
            .completed_sender
            .send(task)
            .expect("completed task channel disconnected");
        namespace.num_pending = namespace
            .num_pending
            .checked_sub(1)
            .expect("namespace pending count underflow");

        let mut newly_ready = Vec::new();
        for dependent_key in dependents {
            let Some(dependent) = namespace.entries.get_mut(&dependent_key) else {
                // Dependent was canceled by a later schedule pass.
                continue;
            };
            if dependent.phase != TaskPhase::Blocked {
                continue;
            }
            dependent.remaining_dependencies = dependent
                .remaining_dependencies
                .checked_sub(1)
                .expect("dependency count underflow");
            if dependent.remaining_dependencies == 0 {
                dependent.phase = TaskPhase::Ready;
                newly_ready.push((dependent.priority, dependent_key));
            }
        }
        let idle = namespace.num_pending == 0;

        for (priority, ready_key) in newly_ready {
            self.push_ready(token, ready_key, priority, generation);
        }
        idle
    }

    /// Drain every completed (or canceled) task reported since the
    /// last collection, in completion order.
    pub(crate) fn collect_completed(&mut self, token: NamespaceToken) -> Vec<Arc<dyn Task>> {
        let namespace = self
            .namespaces
            .get_mut(&token)
            .unwrap_or_else(|| panic!("collect for unknown namespace token {token:?}"));
        let mut completed = Vec::new();
        while let Ok(task) = namespace.completed_receiver.try_recv() {
            let key = task_key(&task);
            if let Some(entry) = namespace.entries.get(&key) {
                assert!(
                    entry.phase == TaskPhase::Completed,
                    "collected task entry must be completed"
                );
                namespace.entries.remove(&key);
            }
            completed.push(task);
        }
        completed
    }

    pub(crate) fn num_pending(&self, token: NamespaceToken) -> usize {
        self.namespaces
            .get(&token)
            .map(|namespace| namespace.num_pending)
            .unwrap_or_else(|| panic!("pending count for unknown namespace token {token:?}"))
    }

    fn push_ready(&mut self, token: NamespaceToken, key: TaskKey, priority: u16, generation: u64) {
        let sequence = self.next_sequence;
        self.next_sequence = sequence
            .checked_add(1)
            .expect("ready task sequence overflow");
        self.ready.push(Reverse(ReadyTaskKey {
            priority,
            sequence,
            token,
            key,
            generation,
        }));
    }
}

fn validate_graph(graph: &TaskGraph) {
    let mut dependency_counts = HashMap::with_capacity(graph.nodes().len());
    for node in graph.nodes() {
        let key = task_key(&node.task);
        if dependency_counts.insert(key, 0u32).is_some() {
            panic!("task graph contains the same task twice");
        }
    }
    for edge in graph.edges() {
        let dependency_key = task_key(&edge.dependency);
        let dependent_key = task_key(&edge.dependent);
        assert!(
            dependency_counts.contains_key(&dependency_key),
            "task graph edge dependency is not a node"
        );
        let count = dependency_counts
            .get_mut(&dependent_key)
            .expect("task graph edge dependent is not a node");
        *count = count.checked_add(1).expect("edge count overflow");
    }
    for node in graph.nodes() {
        let key = task_key(&node.task);
        let edge_count = dependency_counts[&key];
        assert!(
            edge_count == node.dependency_count,
            "task graph node dependency count {} does not match its {} edges",
            node.dependency_count,
            edge_count
        );
    }
}
