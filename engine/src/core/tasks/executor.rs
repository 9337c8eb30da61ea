use std::any::Any;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, SendError, Sender, unbounded};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send + 'static>;
type Panic = Box<dyn Any + Send + 'static>;

/// A fixed size pool of worker threads fed through a shared channel.
///
/// Work is only ever submitted through a [`Scope`], which lets tasks borrow from the calling
/// stack frame and guarantees they have finished before the scope returns.
pub struct Executor {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Creates a new executor with the specified number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "Thread pool size must be greater than 0");

        let (sender, receiver) = unbounded();
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            workers.push(Worker::new(id, receiver.clone()));
        }

        log::debug!("started executor with {size} worker threads");
        Executor { sender, workers }
    }

    /// Creates a single-threaded executor.
    pub fn single_threaded() -> Self {
        Self::new(1)
    }

    /// Returns the number of worker threads in the pool.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Creates a scope for spawning tasks that can access non-'static data.
    ///
    /// Every task spawned in the scope has completed when this returns. A task that panicked has
    /// its panic resumed on the calling thread.
    ///
    /// # Example
    /// ```ignore
    /// let mut data = vec![1, 2, 3, 4];
    /// executor.scope(|s| {
    ///     for item in &mut data {
    ///         s.spawn(|| {
    ///             *item *= 2;
    ///         });
    ///     }
    /// });
    /// assert_eq!(data, vec![2, 4, 6, 8]);
    /// ```
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            wait_group: RefCell::new(WaitGroup::new()),
            pending: Cell::new(0),
            panic: Arc::new(Mutex::new(None)),
            _phantom: PhantomData,
        };

        let result = f(&scope);
        if scope.pending.get() > 0 {
            scope.wait_for_all();
        }
        result
    }

    fn submit(&self, task: Task) {
        // Workers only hang up after shutdown; run inline rather than lose the task.
        if let Err(SendError(Message::Task(task))) = self.sender.send(Message::Task(task)) {
            log::warn!("executor has no live workers, running task on the calling thread");
            task();
        }
    }
}

/// A scope for spawning tasks that can borrow non-'static data.
///
/// The scope counts outstanding work with a [`WaitGroup`]. [`wait_for_all`](Self::wait_for_all)
/// is the barrier between scheduling steps and may be called any number of times.
pub struct Scope<'env> {
    executor: &'env Executor,
    wait_group: RefCell<WaitGroup>,
    pending: Cell<usize>,
    panic: Arc<Mutex<Option<Panic>>>,
    _phantom: PhantomData<Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawns a scoped task that can access data from the environment.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let wait_group = self.wait_group.borrow().clone();
        let panic_slot = Arc::clone(&self.panic);

        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                log::error!("task panicked on worker {:?}", thread::current().name());
                panic_slot.lock().get_or_insert(payload);
            }
            drop(wait_group);
        });

        // Safety: We transmute the lifetime to 'static for storage in the executor.
        // This is safe because:
        // 1. The Scope holds a reference to the Executor, preventing it from being dropped
        // 2. The scope waits on the wait group for every spawned task before it ends
        // 3. The tasks cannot outlive the scope due to the lifetime constraint
        let static_task: Task = unsafe { std::mem::transmute(task) };

        self.pending.set(self.pending.get() + 1);
        self.executor.submit(static_task);
    }

    /// Number of tasks spawned since the last wait.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Block until every task spawned so far has completed.
    ///
    /// Waiting with nothing scheduled is logged and ignored.
    pub fn wait_for_all(&self) {
        if self.pending.get() == 0 {
            log::warn!("Trying to wait for unscheduled tasks.");
            return;
        }

        let wait_group = self.wait_group.replace(WaitGroup::new());
        wait_group.wait();
        self.pending.set(0);

        if let Some(payload) = self.panic.lock().take() {
            panic::resume_unwind(payload);
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        // Unwinding out of the scope body must still not leave tasks borrowing the stack frame.
        if self.pending.get() > 0 {
            let wait_group = self.wait_group.replace(WaitGroup::new());
            wait_group.wait();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    log::error!("worker {} terminated abnormally", worker.id);
                }
            }
        }
    }
}

impl Worker {
    fn new(id: usize, receiver: Receiver<Message>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("bucket-worker-{id}"))
            .spawn(move || {
                loop {
                    match receiver.recv() {
                        Ok(Message::Task(task)) => task(),
                        Ok(Message::Shutdown) | Err(_) => break,
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(error) => {
                log::error!("failed to spawn worker {id}: {error}");
                None
            }
        };

        Worker { id, handle }
    }
}
