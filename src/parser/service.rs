// Parser service trait and the per-service worker queue.
//
// Each service owns one FIFO queue guarded by a mutex + condvar. Workers
// block until a task is available and the service is neither paused nor
// stopping; pause is observed between tasks, never mid-run.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::catalog::task::Task;
use crate::core::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Advance to the next service, or complete the task.
    Success,
    /// Transient failure; retried while the budget lasts.
    Error,
    /// Permanent failure; the task is parked.
    Fatal,
    /// The file vanished or stopped being ours mid-run; drop the task.
    Discarded,
}

pub(crate) trait ParserService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scheduling hint; the thumbnailer is fixed at 1.
    fn nb_threads(&self) -> u8 {
        1
    }

    fn initialize(&self, core: &Arc<Core>) -> bool {
        let _ = core;
        true
    }

    /// The step this service is responsible for.
    fn step(&self) -> u8;

    fn is_completed(&self, task: &Task) -> bool {
        task.is_step_completed(self.step())
    }

    fn run(&self, core: &Core, task: &mut Task) -> Status;
}

struct QueueState {
    tasks: VecDeque<Task>,
    paused: bool,
    stopped: bool,
}

pub(crate) struct ServiceQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl ServiceQueue {
    pub fn new() -> ServiceQueue {
        ServiceQueue {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                paused: false,
                stopped: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.tasks.push_back(task);
        self.cond.notify_all();
    }

    /// Block until a task is available and the queue is running.
    /// None means stop was requested.
    pub fn pop(&self) -> Option<Task> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return None;
            }
            if !state.paused {
                if let Some(task) = state.tasks.pop_front() {
                    return Some(task);
                }
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        self.cond.notify_all();
    }

    /// Ask the worker to exit; it observes the flag at its wait point.
    pub fn signal_stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.cond.notify_all();
    }

    /// Drop everything queued, returning how many tasks went away.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let count = state.tasks.len();
        state.tasks.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dummy_task(id: i64) -> Task {
        Task {
            id,
            step: 0,
            retry_count: 0,
            mrl: format!("file:///t/{id}.mp3"),
            file_id: None,
            parent_folder_id: None,
            parent_playlist_id: None,
            parent_playlist_index: 0,
            current_service: 0,
            media_id: None,
            probe: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = ServiceQueue::new();
        queue.push(dummy_task(1));
        queue.push(dummy_task(2));
        assert_eq!(queue.pop().unwrap().id, 1);
        assert_eq!(queue.pop().unwrap().id, 2);
    }

    #[test]
    fn test_pause_blocks_pop_until_resume() {
        let queue = Arc::new(ServiceQueue::new());
        queue.pause();
        queue.push(dummy_task(1));

        let q = Arc::clone(&queue);
        let popper = std::thread::spawn(move || q.pop());

        // The worker must still be blocked while paused
        std::thread::sleep(Duration::from_millis(50));
        assert!(!popper.is_finished());

        queue.resume();
        assert_eq!(popper.join().unwrap().unwrap().id, 1);
    }

    #[test]
    fn test_stop_wakes_blocked_pop() {
        let queue = Arc::new(ServiceQueue::new());
        let q = Arc::clone(&queue);
        let popper = std::thread::spawn(move || q.pop());
        std::thread::sleep(Duration::from_millis(20));
        queue.signal_stop();
        assert!(popper.join().unwrap().is_none());
    }

    #[test]
    fn test_pause_then_resume_leaves_queue_unchanged() {
        let queue = ServiceQueue::new();
        queue.push(dummy_task(1));
        queue.pause();
        queue.resume();
        assert_eq!(queue.len(), 1);
    }
}
