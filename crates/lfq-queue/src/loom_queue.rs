//! The Michael & Scott queue on loom-switchable atomics.
//!
//! Same algorithm as `ConcurrentQueue`, written against `AtomicPtr` so loom
//! can explore every interleaving. crossbeam-epoch cannot run inside a loom
//! model, so reclamation is deferred differently: an unlinked sentinel is
//! pushed onto a lock-free retire list and only freed when the queue is
//! dropped, at which point no reader can exist.
//!
//! # Usage
//!
//! For normal tests:
//! ```bash
//! cargo test -p lfq-queue
//! ```
//!
//! For loom tests:
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p lfq-queue --release loom
//! ```
//!
//! Memory grows with the number of pops until the queue is dropped, so this
//! type suits bounded model checking and short-lived queues.

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use std::mem::MaybeUninit;
use std::ptr;

pub struct LoomQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    /// Unlinked sentinels awaiting teardown, chained through `retired_next`
    retired: AtomicPtr<Node<T>>,
    len: AtomicUsize,
    retired_len: AtomicUsize,
}

struct Node<T> {
    data: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
    retired_next: AtomicPtr<Node<T>>,
}

// Nodes allocated minus nodes freed on this thread.
#[cfg(all(test, not(loom)))]
thread_local! {
    static NODES_LIVE: std::cell::Cell<isize> = std::cell::Cell::new(0);
}

#[cfg(all(test, not(loom)))]
impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        NODES_LIVE.with(|live| live.set(live.get() - 1));
    }
}

impl<T> Node<T> {
    fn alloc(data: MaybeUninit<T>) -> *mut Self {
        #[cfg(all(test, not(loom)))]
        NODES_LIVE.with(|live| live.set(live.get() + 1));
        Box::into_raw(Box::new(Self {
            data,
            next: AtomicPtr::new(ptr::null_mut()),
            retired_next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

#[inline]
fn retry() {
    #[cfg(loom)]
    loom::thread::yield_now();
    #[cfg(not(loom))]
    std::hint::spin_loop();
}

impl<T> LoomQueue<T> {
    pub fn new() -> Self {
        let sentinel = Node::alloc(MaybeUninit::uninit());
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            retired: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            retired_len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, value: T) {
        let new = Node::alloc(MaybeUninit::new(value));
        self.len.fetch_add(1, Ordering::Relaxed);

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // Safety: tail is never null and nodes are not freed before Drop.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if !next.is_null() {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                retry();
                continue;
            }

            // Safety: as above.
            let linked = unsafe {
                (*tail)
                    .next
                    .compare_exchange(ptr::null_mut(), new, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            };
            if linked {
                let _ = self
                    .tail
                    .compare_exchange(tail, new, Ordering::Release, Ordering::Relaxed);
                return;
            }
            retry();
        }
    }

    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // Safety: head is never null and nodes are not freed before Drop.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };

            if next.is_null() {
                return None;
            }

            if head == tail {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                retry();
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                // Safety: winning the CAS hands us next's payload exactly once.
                let value = unsafe { ptr::read((*next).data.as_ptr()) };
                self.retire(head);
                return Some(value);
            }
            retry();
        }
    }

    /// Push an unlinked node onto the retire list.
    fn retire(&self, node: *mut Node<T>) {
        loop {
            let top = self.retired.load(Ordering::Relaxed);
            // Safety: node is unlinked; only this thread writes retired_next.
            unsafe { (*node).retired_next.store(top, Ordering::Relaxed) };
            if self
                .retired
                .compare_exchange(top, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            retry();
        }
        self.retired_len.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes unlinked by pops and still waiting for teardown.
    pub fn retired_len(&self) -> usize {
        self.retired_len.load(Ordering::Relaxed)
    }

    /// Contents head to tail, without popping. Only meaningful while no
    /// other thread is operating on the queue.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Copy,
    {
        let mut contents = Vec::with_capacity(self.len());
        let head = self.head.load(Ordering::Acquire);
        // Safety: nodes are not freed before Drop; every node after the
        // sentinel holds an initialised payload, and `T: Copy` makes the
        // read a plain copy.
        unsafe {
            let mut current = (*head).next.load(Ordering::Acquire);
            while !current.is_null() {
                contents.push((*current).data.assume_init_read());
                current = (*current).next.load(Ordering::Acquire);
            }
        }
        contents
    }
}

impl<T> Default for LoomQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: payloads move between threads, nodes are freed only in Drop.
unsafe impl<T: Send> Send for LoomQueue<T> {}
unsafe impl<T: Send> Sync for LoomQueue<T> {}

impl<T> Drop for LoomQueue<T> {
    fn drop(&mut self) {
        // Safety: exclusive access; retired nodes hold no payload, the live
        // sentinel holds none, every node after it holds one.
        unsafe {
            let mut retired = self.retired.load(Ordering::Relaxed);
            while !retired.is_null() {
                let node = Box::from_raw(retired);
                retired = node.retired_next.load(Ordering::Relaxed);
            }

            let sentinel = self.head.load(Ordering::Relaxed);
            let mut current = (*sentinel).next.load(Ordering::Relaxed);
            drop(Box::from_raw(sentinel));
            while !current.is_null() {
                let mut node = Box::from_raw(current);
                current = node.next.load(Ordering::Relaxed);
                node.data.assume_init_drop();
            }
        }
    }
}


/// Loom tests - exhaustively check all interleavings
#[cfg(loom)]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn loom_push_push() {
        loom::model(|| {
            let queue = Arc::new(LoomQueue::new());
            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);

            let h1 = thread::spawn(move || q1.push(1));
            let h2 = thread::spawn(move || q2.push(2));
            h1.join().unwrap();
            h2.join().unwrap();

            let mut values = vec![];
            while let Some(v) = queue.pop() {
                values.push(v);
            }
            values.sort_unstable();
            assert_eq!(values, vec![1, 2]);
        });
    }

    #[test]
    fn loom_push_pop() {
        loom::model(|| {
            let queue = Arc::new(LoomQueue::new());
            queue.push(1);

            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);
            let h1 = thread::spawn(move || q1.push(2));
            let h2 = thread::spawn(move || q2.pop());
            h1.join().unwrap();
            let popped = h2.join().unwrap();

            // 1 was linked first, so it is always the one popped
            assert_eq!(popped, Some(1));
            assert_eq!(queue.pop(), Some(2));
            assert_eq!(queue.pop(), None);
        });
    }

    #[test]
    fn loom_concurrent_pop() {
        loom::model(|| {
            let queue = Arc::new(LoomQueue::new());
            queue.push(1);

            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);
            let h1 = thread::spawn(move || q1.pop());
            let h2 = thread::spawn(move || q2.pop());

            match (h1.join().unwrap(), h2.join().unwrap()) {
                (Some(1), None) | (None, Some(1)) => {}
                other => panic!("Unexpected result: {:?}", other),
            }
            assert_eq!(queue.len(), 0);
            assert_eq!(queue.retired_len(), 1);
        });
    }

    #[test]
    fn loom_fifo_per_producer() {
        loom::model(|| {
            let queue = Arc::new(LoomQueue::new());
            let q1 = Arc::clone(&queue);
            let q2 = Arc::clone(&queue);

            let h1 = thread::spawn(move || {
                q1.push(1);
                q1.push(2);
            });
            let h2 = thread::spawn(move || {
                q2.push(10);
            });
            h1.join().unwrap();
            h2.join().unwrap();

            let mut values = vec![];
            while let Some(v) = queue.pop() {
                values.push(v);
            }
            let ones: Vec<_> = values.iter().copied().filter(|v| *v < 10).collect();
            assert_eq!(ones, vec![1, 2], "per-producer order broken: {:?}", values);
            assert_eq!(values.len(), 3, "Lost elements!");
        });
    }
}
