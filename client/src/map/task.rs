//! Bounded-concurrency task queue with cooperative cancellation

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{LocalSpawn, LocalSpawnExt};
use log::{debug, trace, warn};

/// Default number of tasks allowed to run at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Shared stop flag, checked cooperatively by long-running work
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Rc<Cell<bool>>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// How a task body settled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    /// The token was flagged and the work was abandoned
    Stopped,
}

type TaskFuture = LocalBoxFuture<'static, anyhow::Result<TaskStatus>>;

struct QueuedTask {
    func: Box<dyn FnOnce() -> TaskFuture>,
    token: Option<CancellationToken>,
}

struct Inner {
    queue: VecDeque<QueuedTask>,
    running: HashMap<u64, Option<CancellationToken>>,
    next_id: u64,
    max_concurrency: usize,
    /// Resolved when nothing is running
    drain_waiters: Vec<oneshot::Sender<()>>,
    /// Resolved when nothing is running or queued
    idle_waiters: Vec<oneshot::Sender<()>>,
}

/// Snapshot of the queue for the status line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueStats {
    pub running: usize,
    pub queued: usize,
    pub max_concurrency: usize,
}

/// FIFO of task factories, at most `max_concurrency` of which run at once.
///
/// Tasks are spawned on the supplied local executor; cloning the queue shares
/// the same state.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Rc<RefCell<Inner>>,
    spawner: Rc<dyn LocalSpawn>,
}

impl TaskQueue {
    pub fn new(spawner: impl LocalSpawn + 'static, max_concurrency: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                queue: VecDeque::new(),
                running: HashMap::new(),
                next_id: 0,
                max_concurrency: max_concurrency.max(1),
                drain_waiters: Vec::new(),
                idle_waiters: Vec::new(),
            })),
            spawner: Rc::new(spawner),
        }
    }

    /// Enqueue `func`; it is invoked once a slot is free.
    ///
    /// A task whose token is already stopped is discarded, here or when it
    /// reaches the head of the queue.
    pub fn add<F, Fut>(&self, func: F, token: Option<CancellationToken>)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<TaskStatus>> + 'static,
    {
        if token.as_ref().is_some_and(CancellationToken::is_stopped) {
            trace!("Discarding task with stopped token");
            return;
        }
        self.inner.borrow_mut().queue.push_back(QueuedTask {
            func: Box::new(move || func().boxed_local()),
            token,
        });
        self.schedule();
    }

    fn schedule(&self) {
        loop {
            let (id, task) = {
                let mut inner = self.inner.borrow_mut();
                if inner.running.len() >= inner.max_concurrency {
                    break;
                }
                let Some(task) = inner.queue.pop_front() else {
                    break;
                };
                if task.token.as_ref().is_some_and(CancellationToken::is_stopped) {
                    continue;
                }
                let id = inner.next_id;
                inner.next_id += 1;
                inner.running.insert(id, task.token.clone());
                (id, task)
            };

            let body = (task.func)();
            let queue = self.clone();
            let spawned = self.spawner.spawn_local(async move {
                match body.await {
                    Ok(TaskStatus::Completed) => trace!("Task {} completed", id),
                    Ok(TaskStatus::Stopped) => debug!("Task {} stopped", id),
                    Err(e) => warn!("Task {} failed: {:#}", id, e),
                }
                queue.finish(id);
            });
            if let Err(e) = spawned {
                warn!("Failed to spawn task {}: {}", id, e);
                self.inner.borrow_mut().running.remove(&id);
            }
        }
        self.notify();
    }

    fn finish(&self, id: u64) {
        self.inner.borrow_mut().running.remove(&id);
        self.schedule();
    }

    fn notify(&self) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            if !inner.running.is_empty() {
                return;
            }
            let mut waiters = std::mem::take(&mut inner.drain_waiters);
            if inner.queue.is_empty() {
                waiters.append(&mut inner.idle_waiters);
            }
            waiters
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// Drop every queued task and stop every running one.
    ///
    /// The returned future resolves once no task body is running any more.
    pub fn clear(&self) -> LocalBoxFuture<'static, ()> {
        let rx = {
            let mut inner = self.inner.borrow_mut();
            let dropped = inner.queue.len();
            inner.queue.clear();
            for token in inner.running.values().flatten() {
                token.stop();
            }
            debug!(
                "Cleared task queue: {} dropped, {} draining",
                dropped,
                inner.running.len()
            );
            if inner.running.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.drain_waiters.push(tx);
                Some(rx)
            }
        };
        self.notify();
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
        .boxed_local()
    }

    /// Resolves once nothing is queued or running
    pub fn wait_all_task_done(&self) -> LocalBoxFuture<'static, ()> {
        let rx = {
            let mut inner = self.inner.borrow_mut();
            if inner.running.is_empty() && inner.queue.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.idle_waiters.push(tx);
                Some(rx)
            }
        };
        async move {
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
        .boxed_local()
    }

    pub fn running_count(&self) -> usize {
        self.inner.borrow().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.borrow();
        QueueStats {
            running: inner.running.len(),
            queued: inner.queue.len(),
            max_concurrency: inner.max_concurrency,
        }
    }
}

#[derive(Default)]
struct FrameState {
    frame: Cell<u64>,
    wakers: RefCell<Vec<Waker>>,
}

/// Frame counter advanced by the host once per rendered frame
#[derive(Clone, Default)]
pub struct FrameClock {
    state: Rc<FrameState>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> u64 {
        self.state.frame.get()
    }

    pub fn advance(&self) {
        self.state.frame.set(self.state.frame.get() + 1);
        let wakers = std::mem::take(&mut *self.state.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    /// Resolves at the next `advance`
    pub fn next_frame(&self) -> NextFrame {
        NextFrame {
            clock: self.clone(),
            target: self.frame() + 1,
        }
    }
}

pub struct NextFrame {
    clock: FrameClock,
    target: u64,
}

impl Future for NextFrame {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.clock.frame() >= self.target {
            Poll::Ready(())
        } else {
            self.clock.state.wakers.borrow_mut().push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// How time-sliced work hands control back between slices
#[derive(Clone, Default)]
pub enum YieldPolicy {
    /// Reschedule right away behind other ready tasks
    #[default]
    Immediate,
    /// Resume on the next host frame
    Frame(FrameClock),
}

impl YieldPolicy {
    pub async fn wait(&self) {
        match self {
            YieldPolicy::Immediate => futures_lite::future::yield_now().await,
            YieldPolicy::Frame(clock) => clock.next_frame().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;

    struct ConcurrencyTracker {
        active: Rc<Cell<usize>>,
        peak: Rc<Cell<usize>>,
        finished: Rc<Cell<usize>>,
    }

    impl ConcurrencyTracker {
        fn new() -> Self {
            Self {
                active: Rc::new(Cell::new(0)),
                peak: Rc::new(Cell::new(0)),
                finished: Rc::new(Cell::new(0)),
            }
        }

        fn task(
            &self,
            gate: oneshot::Receiver<()>,
        ) -> impl FnOnce() -> LocalBoxFuture<'static, anyhow::Result<TaskStatus>> + 'static {
            let (active, peak, finished) =
                (self.active.clone(), self.peak.clone(), self.finished.clone());
            move || {
                async move {
                    active.set(active.get() + 1);
                    peak.set(peak.get().max(active.get()));
                    let _ = gate.await;
                    active.set(active.get() - 1);
                    finished.set(finished.get() + 1);
                    Ok(TaskStatus::Completed)
                }
                .boxed_local()
            }
        }
    }

    #[test]
    fn test_concurrency_cap() {
        let mut pool = LocalPool::new();
        let queue = TaskQueue::new(pool.spawner(), 2);
        let tracker = ConcurrencyTracker::new();
        let mut gates = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            gates.push(tx);
            queue.add(tracker.task(rx), None);
        }
        pool.run_until_stalled();
        assert_eq!(queue.running_count(), 2);
        assert_eq!(queue.queued_count(), 3);

        for tx in gates {
            let _ = tx.send(());
            pool.run_until_stalled();
            assert!(queue.running_count() <= 2);
        }
        assert_eq!(tracker.peak.get(), 2);
        assert_eq!(tracker.finished.get(), 5);
        assert_eq!(queue.running_count(), 0);
    }

    #[test]
    fn test_clear_waits_for_running_bodies() {
        let mut pool = LocalPool::new();
        let queue = TaskQueue::new(pool.spawner(), 1);
        let tracker = ConcurrencyTracker::new();
        let token = CancellationToken::new();

        let (tx, rx) = oneshot::channel();
        queue.add(tracker.task(rx), Some(token.clone()));
        let (_tx2, rx2) = oneshot::channel();
        queue.add(tracker.task(rx2), None);
        pool.run_until_stalled();

        let cleared = Rc::new(Cell::new(false));
        let flag = cleared.clone();
        let drain = queue.clear();
        pool.spawner()
            .spawn_local(async move {
                drain.await;
                flag.set(true);
            })
            .unwrap();
        pool.run_until_stalled();

        assert!(token.is_stopped());
        assert_eq!(queue.queued_count(), 0);
        assert!(!cleared.get());

        tx.send(()).unwrap();
        pool.run_until_stalled();
        assert!(cleared.get());
        assert_eq!(tracker.finished.get(), 1);
    }

    #[test]
    fn test_wait_all_immediate_when_idle() {
        let pool = LocalPool::new();
        let queue = TaskQueue::new(pool.spawner(), DEFAULT_MAX_CONCURRENCY);
        assert!(queue.wait_all_task_done().now_or_never().is_some());
        assert!(queue.clear().now_or_never().is_some());
    }

    #[test]
    fn test_wait_all_after_tasks_settle() {
        let mut pool = LocalPool::new();
        let queue = TaskQueue::new(pool.spawner(), DEFAULT_MAX_CONCURRENCY);
        queue.add(
            || async { Err::<TaskStatus, _>(anyhow::anyhow!("network down")) },
            None,
        );
        queue.add(|| async { Ok(TaskStatus::Stopped) }, None);
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        let wait = queue.wait_all_task_done();
        pool.spawner()
            .spawn_local(async move {
                wait.await;
                flag.set(true);
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(done.get());
        assert_eq!(queue.stats().running, 0);
    }

    #[test]
    fn test_stopped_token_discarded() {
        let mut pool = LocalPool::new();
        let queue = TaskQueue::new(pool.spawner(), 1);
        let ran = Rc::new(Cell::new(0));
        let token = CancellationToken::new();
        token.stop();
        let r = ran.clone();
        queue.add(
            move || async move {
                r.set(r.get() + 1);
                Ok(TaskStatus::Completed)
            },
            Some(token),
        );
        assert_eq!(queue.queued_count(), 0);
        pool.run_until_stalled();
        assert_eq!(ran.get(), 0);
    }

    #[test]
    fn test_frame_clock_paces_yield() {
        let mut pool = LocalPool::new();
        let clock = FrameClock::new();
        let policy = YieldPolicy::Frame(clock.clone());
        let steps = Rc::new(Cell::new(0));
        let s = steps.clone();
        pool.spawner()
            .spawn_local(async move {
                for _ in 0..3 {
                    s.set(s.get() + 1);
                    policy.wait().await;
                }
            })
            .unwrap();
        pool.run_until_stalled();
        assert_eq!(steps.get(), 1);
        clock.advance();
        pool.run_until_stalled();
        assert_eq!(steps.get(), 2);
        clock.advance();
        clock.advance();
        pool.run_until_stalled();
        assert_eq!(steps.get(), 3);
    }
}
