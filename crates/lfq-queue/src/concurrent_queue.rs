//! Unbounded lock-free MPMC FIFO queue (Michael & Scott).
//!
//! # Structure
//!
//! ```text
//!   head                                 tail
//!    |                                    |
//!    v                                    v
//! [sentinel] -> [a] -> [b] -> ... -> [last] -> null
//! ```
//!
//! The node at `head` is always a sentinel whose payload slot is empty;
//! the logical elements start at `head.next`. Producers link after the last
//! node with a CAS on its `next` field, then swing `tail`. Consumers swing
//! `head` forward one node and move the payload out of the node that just
//! became the sentinel.
//!
//! # Invariants
//!
//! | Property | Enforced by |
//! |----------|-------------|
//! | List never empty | sentinel allocated in `new`, freed only in `Drop` |
//! | `head` only moves forward | CAS from a snapshot to that snapshot's `next` |
//! | `tail` never behind `head` | `pop` advances a lagging `tail` before moving `head` |
//! | Each node linked and unlinked once | CAS on `next` from null; CAS on `head` |
//! | No use-after-free | unlinked sentinels go through `Guard::defer_destroy` |
//!
//! # Memory Safety
//!
//! Every operation runs pinned to the current epoch. A consumer that loses
//! the `head` CAS may still be reading the old sentinel, so the winner never
//! frees it directly: destruction is deferred until every thread pinned at
//! the time of unlinking has unpinned.
//!
//! Node lifetimes are checked under miri, which flags any use-after-free or
//! double free in the deferred path:
//!
//! ```bash
//! cargo +nightly miri test -p lfq-queue
//! ```

use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use tracing::trace;

/// An unbounded lock-free multi-producer multi-consumer FIFO queue.
///
/// `push` never fails and `pop` never blocks: on an empty queue it returns
/// `None` immediately. Both are lock-free: a thread may retry under
/// contention, but every failed CAS means another thread's CAS succeeded.
///
/// # Examples
///
/// ```
/// use lfq_queue::ConcurrentQueue;
///
/// let queue = ConcurrentQueue::new();
/// queue.push("a");
/// queue.push("b");
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.pop(), Some("a"));
/// assert_eq!(queue.pop(), Some("b"));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct ConcurrentQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    len: CachePadded<AtomicUsize>,
}

struct Node<T> {
    /// Uninitialized for the sentinel: either never written (first
    /// sentinel) or already moved out by the pop that promoted it.
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    fn new(data: MaybeUninit<T>) -> Owned<Self> {
        Owned::new(Self {
            data,
            next: Atomic::null(),
        })
    }
}

// Safety: values of T move between threads through the queue, but are never
// shared; nodes are only freed once unreachable.
unsafe impl<T: Send> Send for ConcurrentQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentQueue<T> {}

impl<T> ConcurrentQueue<T> {
    /// Create an empty queue holding only the sentinel node.
    #[must_use]
    pub fn new() -> Self {
        let queue = Self {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
            len: CachePadded::new(AtomicUsize::new(0)),
        };

        // Safety: the queue is not shared yet.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = Node::new(MaybeUninit::uninit()).into_shared(guard);
            queue.head.store(sentinel, Ordering::Relaxed);
            queue.tail.store(sentinel, Ordering::Relaxed);
        }

        queue
    }

    /// Append `value` at the tail.
    pub fn push(&self, value: T) {
        let guard = &epoch::pin();
        let backoff = Backoff::new();
        let new = Node::new(MaybeUninit::new(value)).into_shared(guard);

        // Counted before the node becomes reachable, so a pop of it can
        // never decrement first.
        self.len.fetch_add(1, Ordering::Relaxed);

        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: tail is never null and is kept alive by the guard.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            if !next.is_null() {
                // Tail lags behind the real last node: help it along.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(Shared::null(), new, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                // Best effort; whoever sees the lag next will fix it.
                let _ = self
                    .tail
                    .compare_exchange(tail, new, Ordering::Release, Ordering::Relaxed, guard);
                return;
            }

            backoff.spin();
        }
    }

    /// Remove the element at the head, or return `None` if the queue was
    /// empty at the moment of the check.
    pub fn pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        self.pop_with(guard)
    }

    fn pop_with(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);
            // Safety: head is never null and is kept alive by the guard.
            let next = unsafe { head.deref() }.next.load(Ordering::Acquire, guard);

            // Safety: a non-null next is a live node protected by the guard.
            let next_ref = match unsafe { next.as_ref() } {
                Some(node) => node,
                None => return None,
            };

            if head == tail {
                // Never let head overtake tail.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed, guard);
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                // Safety: winning the CAS makes us the only reader of
                // next's payload, and the old sentinel is now unreachable
                // from head; other pinned threads may still hold it, so it
                // is destroyed only after they unpin.
                unsafe {
                    guard.defer_destroy(head);
                    return Some(next_ref.data.assume_init_read());
                }
            }

            backoff.spin();
        }
    }

    /// Number of elements, as an advisory snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the length counter reads zero. Advisory under concurrency.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        // Safety: `&mut self` rules out concurrent operations, so every node
        // still linked is owned by us alone. Nodes retired earlier belong to
        // the epoch collector.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = self.head.load(Ordering::Relaxed, guard);
            let mut current = sentinel.deref().next.load(Ordering::Relaxed, guard);
            drop(sentinel.into_owned());

            let mut released = 0usize;
            while !current.is_null() {
                let mut node = current.into_owned();
                current = node.next.load(Ordering::Relaxed, guard);
                node.data.assume_init_drop();
                released += 1;
            }

            trace!(released, "queue dropped");
        }
    }
}
