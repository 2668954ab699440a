//! The shared run queue.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::proc::Process;

/// FIFO of runnable processes shared by all cores.
///
/// A process is in the queue exactly while it is RUNNABLE. Idle tasks are
/// never queued; each core falls back to its own when the queue is empty.
#[derive(Default)]
pub(crate) struct RunQueue {
    queue: VecDeque<Arc<Process>>,
}

impl RunQueue {
    pub(crate) const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Queues a process behind everything already runnable.
    pub(crate) fn push(&mut self, proc: Arc<Process>) {
        self.queue.push_back(proc);
    }

    /// Takes the process that has waited longest.
    pub(crate) fn pop(&mut self) -> Option<Arc<Process>> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, proc: &Arc<Process>) -> bool {
        self.queue.iter().any(|p| Arc::ptr_eq(p, proc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meson_core::id::Pid;

    #[test]
    fn empty_on_creation() {
        let mut rq = RunQueue::new();
        assert_eq!(rq.len(), 0);
        assert!(rq.pop().is_none());
    }

    #[test]
    fn round_robin_order() {
        let mut rq = RunQueue::new();
        let procs: Vec<_> = (2..5)
            .map(|n| Arc::new(Process::new(Pid::new(n), false)))
            .collect();
        for p in &procs {
            rq.push(Arc::clone(p));
        }
        assert!(rq.contains(&procs[1]));
        let a = rq.pop().unwrap();
        rq.push(a);
        let order: Vec<_> = std::iter::from_fn(|| rq.pop()).map(|p| p.pid().as_u32()).collect();
        assert_eq!(order, [3, 4, 2]);
    }
}
