use std::sync::{Arc, Mutex};

use crate::work_queue::TaskGraphWorkQueue;
use crate::{NamespaceToken, Task, TaskGraph, TaskGraphRunner};

/// Runner that executes tasks on the calling thread, in dependency
/// order then priority order then insertion order. Deterministic, for
/// tests; the contract is otherwise identical to the worker runner.
pub struct SynchronousTaskGraphRunner {
    queue: Mutex<TaskGraphWorkQueue>,
}

impl SynchronousTaskGraphRunner {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(TaskGraphWorkQueue::new()),
        }
    }

    /// Run every runnable task in every namespace.
    pub fn run_until_idle(&self) {
        loop {
            let item = self
                .queue
                .lock()
                .expect("synchronous task graph queue lock poisoned")
                .pop_ready();
            let Some((token, key, task)) = item else {
                return;
            };
            task.run();
            self.queue
                .lock()
                .expect("synchronous task graph queue lock poisoned")
                .finish(token, key);
        }
    }
}

impl Default for SynchronousTaskGraphRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraphRunner for SynchronousTaskGraphRunner {
    fn allocate_namespace(&self) -> NamespaceToken {
        self.queue
            .lock()
            .expect("synchronous task graph queue lock poisoned")
            .allocate_namespace()
    }

    fn schedule_tasks(&self, token: NamespaceToken, graph: TaskGraph) {
        self.queue
            .lock()
            .expect("synchronous task graph queue lock poisoned")
            .schedule(token, graph);
    }

    fn wait_for_tasks_to_finish(&self, token: NamespaceToken) {
        loop {
            let mut queue = self
                .queue
                .lock()
                .expect("synchronous task graph queue lock poisoned");
            if queue.num_pending(token) == 0 {
                return;
            }
            let Some((ready_token, key, task)) = queue.pop_ready() else {
                let pending = queue.num_pending(token);
                panic!("task graph deadlocked with {pending} pending tasks");
            };
            drop(queue);
            task.run();
            self.queue
                .lock()
                .expect("synchronous task graph queue lock poisoned")
                .finish(ready_token, key);
        }
    }

    fn collect_completed_tasks(&self, token: NamespaceToken) -> Vec<Arc<dyn Task>> {
        self.queue
            .lock()
            .expect("synchronous task graph queue lock poisoned")
            .collect_completed(token)
    }
}
