//! Wakers for [`RawTask`].

use super::task::{RawTask, TaskState};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Wake, Waker};

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let next = match TaskState::from_u8(current) {
                TaskState::Idle => TaskState::Scheduled,
                TaskState::Running => TaskState::Notified,
                TaskState::Scheduled | TaskState::Notified | TaskState::Complete => return,
            };

            if self
                .state
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if next == TaskState::Scheduled {
                    let _ = self.schedule();
                }
                return;
            }
        }
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.clone().wake()
    }
}

pub(crate) fn task_waker(task: Arc<RawTask>) -> Waker {
    Waker::from(task)
}
