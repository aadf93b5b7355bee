//! Process groups for cooperative multi-writer streams
//!
//! A group is handed to the storage manager at construction and passed
//! through to the engine untouched. Engines use it to name per-rank subfiles
//! and to make step boundaries collective.

use crate::{ColStepError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Collective operations an engine needs from a process group
pub trait Communicator: Send + Sync {
    /// Rank of this member, `0..size`
    fn rank(&self) -> usize;

    /// Number of members
    fn size(&self) -> usize;

    /// Block until every member has arrived
    fn barrier(&self) -> Result<()>;

    /// Fail every current and future barrier in the group
    fn abort(&self, reason: &str);
}

/// Shared handle to a communicator
#[derive(Clone)]
pub struct ProcessGroup(Arc<dyn Communicator>);

impl ProcessGroup {
    /// Group of one member
    pub fn single() -> Self {
        Self(Arc::new(SingleProcess))
    }

    pub fn from_communicator(comm: Arc<dyn Communicator>) -> Self {
        Self(comm)
    }

    pub fn rank(&self) -> usize {
        self.0.rank()
    }

    pub fn size(&self) -> usize {
        self.0.size()
    }

    pub fn is_root(&self) -> bool {
        self.rank() == 0
    }

    pub fn barrier(&self) -> Result<()> {
        if self.size() == 1 {
            return Ok(());
        }
        self.0.barrier()
    }

    pub fn abort(&self, reason: &str) {
        self.0.abort(reason)
    }
}

impl Default for ProcessGroup {
    fn default() -> Self {
        Self::single()
    }
}

impl fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

/// Communicator for a lone writer
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn abort(&self, _reason: &str) {}
}

/// Threads of one process acting as the ranks of a group
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<BarrierState>,
}

struct BarrierState {
    size: usize,
    timeout: Option<Duration>,
    inner: Mutex<BarrierInner>,
    cond: Condvar,
}

struct BarrierInner {
    arrived: usize,
    generation: u64,
    aborted: Option<String>,
}

impl ThreadGroup {
    /// Create handles for `size` ranks sharing one barrier
    pub fn new(size: usize) -> Vec<ProcessGroup> {
        Self::build(size, None)
    }

    /// Like `new`, but a barrier that waits longer than `timeout` aborts the group
    pub fn with_timeout(size: usize, timeout: Duration) -> Vec<ProcessGroup> {
        Self::build(size, Some(timeout))
    }

    fn build(size: usize, timeout: Option<Duration>) -> Vec<ProcessGroup> {
        let size = size.max(1);
        let shared = Arc::new(BarrierState {
            size,
            timeout,
            inner: Mutex::new(BarrierInner {
                arrived: 0,
                generation: 0,
                aborted: None,
            }),
            cond: Condvar::new(),
        });
        (0..size)
            .map(|rank| {
                ProcessGroup::from_communicator(Arc::new(ThreadGroup {
                    rank,
                    shared: shared.clone(),
                }))
            })
            .collect()
    }
}

impl Communicator for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if let Some(reason) = &inner.aborted {
            return Err(ColStepError::CollectiveAborted(reason.clone()));
        }

        let generation = inner.generation;
        inner.arrived += 1;
        if inner.arrived == shared.size {
            inner.arrived = 0;
            inner.generation += 1;
            shared.cond.notify_all();
            return Ok(());
        }

        let deadline = shared.timeout.map(|t| Instant::now() + t);
        while inner.generation == generation && inner.aborted.is_none() {
            match deadline {
                Some(deadline) => {
                    if shared.cond.wait_until(&mut inner, deadline).timed_out()
                        && inner.generation == generation
                    {
                        inner.aborted = Some(format!(
                            "rank {} timed out waiting for {} of {} ranks",
                            self.rank,
                            shared.size - inner.arrived,
                            shared.size
                        ));
                        shared.cond.notify_all();
                    }
                }
                None => shared.cond.wait(&mut inner),
            }
        }

        if inner.generation != generation {
            return Ok(());
        }
        let reason = inner.aborted.clone().unwrap_or_default();
        Err(ColStepError::CollectiveAborted(reason))
    }

    fn abort(&self, reason: &str) {
        let mut inner = self.shared.inner.lock();
        if inner.aborted.is_none() {
            inner.aborted = Some(format!("rank {}: {}", self.rank, reason));
        }
        self.shared.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_single_process() {
        let group = ProcessGroup::single();
        assert_eq!(group.rank(), 0);
        assert_eq!(group.size(), 1);
        assert!(group.is_root());
        group.barrier().unwrap();
    }

    #[test]
    fn test_thread_group_barrier() {
        let groups = ThreadGroup::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for round in 1..=3 {
                        counter.fetch_add(1, Ordering::SeqCst);
                        group.barrier().unwrap();
                        assert!(counter.load(Ordering::SeqCst) >= round * 4);
                        group.barrier().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_abort_releases_waiters() {
        let mut groups = ThreadGroup::new(2);
        let second = groups.pop().unwrap();
        let first = groups.pop().unwrap();

        let waiter = thread::spawn(move || first.barrier());
        thread::sleep(Duration::from_millis(20));
        second.abort("writer failed");

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(ColStepError::CollectiveAborted(_))));
        assert!(second.barrier().is_err());
    }

    #[test]
    fn test_barrier_timeout() {
        let groups = ThreadGroup::with_timeout(2, Duration::from_millis(30));
        let result = groups[0].barrier();
        assert!(matches!(result, Err(ColStepError::CollectiveAborted(_))));
    }
}
