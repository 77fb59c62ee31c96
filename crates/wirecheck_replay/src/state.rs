//! Per-thread replay state: the replaying flag and the result queue.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use wirecheck_core::Reply;

thread_local! {
    static REPLAYING: Cell<bool> = const { Cell::new(false) };
    static RESULTS: RefCell<VecDeque<Reply>> = const { RefCell::new(VecDeque::new()) };
}

/// Whether the current thread is replaying a recorded call
#[must_use]
pub fn is_replaying() -> bool {
    REPLAYING.with(Cell::get)
}

/// Run `body` with the replaying flag set on this thread
pub fn replaying<R>(body: impl FnOnce() -> R) -> R {
    struct Reset(bool);
    impl Drop for Reset {
        fn drop(&mut self) {
            REPLAYING.with(|flag| flag.set(self.0));
        }
    }

    let _reset = Reset(REPLAYING.with(|flag| flag.replace(true)));
    body()
}

/// Queue a recorded reply for the current thread
pub fn enqueue(reply: Reply) {
    RESULTS.with(|queue| queue.borrow_mut().push_back(reply));
}

/// Take the oldest queued reply
pub fn dequeue() -> Option<Reply> {
    RESULTS.with(|queue| queue.borrow_mut().pop_front())
}

/// Number of queued replies
#[must_use]
pub fn queued() -> usize {
    RESULTS.with(|queue| queue.borrow().len())
}

/// Drop every queued reply, returning how many there were
pub fn clear() -> usize {
    RESULTS.with(|queue| {
        let mut queue = queue.borrow_mut();
        let dropped = queue.len();
        queue.clear();
        dropped
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        clear();
        enqueue(Reply::count(1));
        enqueue(Reply::count(2));
        assert_eq!(queued(), 2);
        assert_eq!(dequeue().unwrap().n(), 1);
        assert_eq!(clear(), 1);
        assert!(dequeue().is_none());
    }

    #[test]
    fn test_replaying_flag_nests_and_resets() {
        assert!(!is_replaying());
        replaying(|| {
            assert!(is_replaying());
            replaying(|| assert!(is_replaying()));
            assert!(is_replaying());
        });
        assert!(!is_replaying());

        let _ = std::panic::catch_unwind(|| replaying::<()>(|| panic!("boom")));
        assert!(!is_replaying());
    }

    #[test]
    fn test_queue_is_per_thread() {
        clear();
        enqueue(Reply::ok());
        let other = std::thread::spawn(queued).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(clear(), 1);
    }
}
