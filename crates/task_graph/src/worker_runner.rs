use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::work_queue::TaskGraphWorkQueue;
use crate::{NamespaceToken, Task, TaskGraph, TaskGraphRunner};

struct WorkerState {
    queue: TaskGraphWorkQueue,
    shutdown: bool,
}

struct RunnerShared {
    state: Mutex<WorkerState>,
    work_available: Condvar,
    namespace_idle: Condvar,
}

/// Task graph runner backed by a pool of worker threads. Tasks run
/// concurrently up to the worker count; completion order is
/// unconstrained. Dropping the runner drains all runnable work and
/// joins the workers.
pub struct WorkerTaskGraphRunner {
    shared: Arc<RunnerShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerTaskGraphRunner {
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker count must be at least 1");
        let shared = Arc::new(RunnerShared {
            state: Mutex::new(WorkerState {
                queue: TaskGraphWorkQueue::new(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
            namespace_idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("raster-worker-{index}"))
                .spawn(move || worker_loop(&worker_shared))
                .expect("spawn raster worker thread");
            workers.push(handle);
        }

        Self { shared, workers }
    }
}

fn worker_loop(shared: &RunnerShared) {
    loop {
        let (token, key, task) = {
            let mut state = shared
                .state
                .lock()
                .expect("task graph runner state lock poisoned");
            loop {
                if let Some(item) = state.queue.pop_ready() {
                    break item;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .work_available
                    .wait(state)
                    .expect("task graph runner state lock poisoned");
            }
        };

        task.run();

        let mut state = shared
            .state
            .lock()
            .expect("task graph runner state lock poisoned");
        let namespace_became_idle = state.queue.finish(token, key);
        drop(state);
        // Finishing a task can unblock dependents in any namespace.
        shared.work_available.notify_all();
        if namespace_became_idle {
            shared.namespace_idle.notify_all();
        }
    }
}

impl TaskGraphRunner for WorkerTaskGraphRunner {
    fn allocate_namespace(&self) -> NamespaceToken {
        self.shared
            .state
            .lock()
            .expect("task graph runner state lock poisoned")
            .queue
            .allocate_namespace()
    }

    fn schedule_tasks(&self, token: NamespaceToken, graph: TaskGraph) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("task graph runner state lock poisoned");
        state.queue.schedule(token, graph);
        let idle = state.queue.num_pending(token) == 0;
        drop(state);
        self.shared.work_available.notify_all();
        if idle {
            // Scheduling an empty graph can cancel everything at once.
            self.shared.namespace_idle.notify_all();
        }
    }

    fn wait_for_tasks_to_finish(&self, token: NamespaceToken) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("task graph runner state lock poisoned");
        while state.queue.num_pending(token) > 0 {
            state = self
                .shared
                .namespace_idle
                .wait(state)
                .expect("task graph runner state lock poisoned");
        }
    }

    fn collect_completed_tasks(&self, token: NamespaceToken) -> Vec<Arc<dyn Task>> {
        self.shared
            .state
            .lock()
            .expect("task graph runner state lock poisoned")
            .queue
            .collect_completed(token)
    }
}

impl Drop for WorkerTaskGraphRunner {
    fn drop(&mut self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .expect("task graph runner state lock poisoned");
            state.shutdown = true;
        }
        self.shared.work_available.notify_all();
        for handle in self.workers.drain(..) {
            handle.join().expect("raster worker thread panicked");
        }
    }
}
