//! Unbounded lock-free MPMC queue.
//!
//! A Michael–Scott linked queue whose nodes come from a preallocated arena of
//! generation-tagged slots. When every arena slot is in use, nodes are
//! allocated on the heap instead, so an enqueue never fails.
//!
//! Retired sentinels are handed to `crossbeam::epoch` and only return to the
//! arena (or get freed) once no pinned thread can still observe them. Each
//! arena slot carries a generation counter that is bumped whenever the slot is
//! recycled; `dequeue` re-validates it before swinging `head`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;

/// Arena slots reserved per worker thread.
pub const ARENA_NODES_PER_THREAD: usize = 128;

/// Upper bound on arena slots for a single queue.
pub const MAX_ARENA_NODES: usize = 16_384;

/// Arena size used for a queue serving `threads` workers.
pub fn arena_capacity_for(threads: usize) -> usize {
    threads
        .saturating_mul(ARENA_NODES_PER_THREAD)
        .clamp(1, MAX_ARENA_NODES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Arena(usize),
    Heap,
}

struct Node<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    next: Atomic<Node<T>>,
    generation: AtomicU64,
    origin: Origin,
}

impl<T> Node<T> {
    fn vacant(origin: Origin) -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            next: Atomic::null(),
            generation: AtomicU64::new(0),
            origin,
        }
    }

    fn occupied(value: T) -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::new(value)),
            next: Atomic::null(),
            generation: AtomicU64::new(0),
            origin: Origin::Heap,
        }
    }
}

// The value cell is only touched by the thread that owns the node: the
// producer before publication, and the single consumer whose head CAS won.
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

struct NodeArena<T> {
    slots: Box<[Node<T>]>,
    bump: AtomicUsize,
    free: ArrayQueue<usize>,
}

impl<T> NodeArena<T> {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|i| Node::vacant(Origin::Arena(i))).collect(),
            bump: AtomicUsize::new(0),
            free: ArrayQueue::new(capacity),
        }
    }

    /// Hands out a slot that no other thread holds, or `None` when the arena is exhausted.
    fn acquire(&self) -> Option<&Node<T>> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => self
                .bump
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                    (next < self.slots.len()).then_some(next + 1)
                })
                .ok()?,
        };
        Some(&self.slots[index])
    }

    fn release(&self, index: usize) {
        self.slots[index].generation.fetch_add(1, Ordering::AcqRel);
        // Every index is owned by at most one holder, so the free list never overflows.
        let _ = self.free.push(index);
    }
}

/// Lock-free FIFO queue supporting concurrent enqueue, dequeue and steal.
pub struct LockFreeQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
    arena: Arc<NodeArena<T>>,
    heap_allocations: AtomicUsize,
}

impl<T: Send + 'static> LockFreeQueue<T> {
    /// Creates a queue whose arena is sized for `threads` workers.
    pub fn for_threads(threads: usize) -> Self {
        Self::with_arena_capacity(arena_capacity_for(threads))
    }

    /// Creates a queue with an explicit number of arena slots (at least one).
    pub fn with_arena_capacity(capacity: usize) -> Self {
        // SAFETY: the sentinel is not shared with any other thread yet.
        let sentinel = Owned::new(Node::vacant(Origin::Heap)).into_shared(unsafe { epoch::unprotected() });
        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
            arena: Arc::new(NodeArena::with_capacity(capacity)),
            heap_allocations: AtomicUsize::new(0),
        }
    }

    /// Appends one value at the tail.
    pub fn enqueue(&self, value: T) {
        let guard = &epoch::pin();
        let node = self.allocate(value, guard);
        self.link(node, node, guard);
    }

    /// Appends all values, preserving their order, with a single splice onto the tail.
    pub fn enqueue_batch<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let guard = &epoch::pin();
        let mut values = values.into_iter();
        let Some(first_value) = values.next() else {
            return;
        };

        let first = self.allocate(first_value, guard);
        let mut last = first;
        for value in values {
            let node = self.allocate(value, guard);
            // SAFETY: the chain is private until `link` publishes it.
            unsafe { last.deref() }.next.store(node, Ordering::Relaxed);
            last = node;
        }

        self.link(first, last, guard);
    }

    /// Removes the value at the head, or returns `None` if the queue is empty.
    pub fn dequeue(&self) -> Option<T> {
        let guard = &epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            // SAFETY: head is never null and cannot be reclaimed while we are pinned.
            let head_ref = unsafe { head.deref() };
            let generation = head_ref.generation.load(Ordering::Acquire);
            let next = head_ref.next.load(Ordering::Acquire, guard);
            let tail = self.tail.load(Ordering::Acquire, guard);

            // SAFETY: nodes reachable from a pinned head stay allocated.
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                return None;
            };

            if head == tail {
                // Tail must never be left pointing at a retired node.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            if head_ref.generation.load(Ordering::Acquire) != generation {
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed, guard)
                .is_ok()
            {
                // SAFETY: winning the head CAS grants exclusive access to next's value,
                // which the producer initialised before publishing the node.
                let value = unsafe { (*next_ref.value.get()).assume_init_read() };
                // SAFETY: head is now unreachable from the queue.
                unsafe { self.retire(head, guard) };
                return Some(value);
            }
        }
    }

    /// Takes a value on behalf of another worker. Same semantics as [`dequeue`](Self::dequeue).
    pub fn steal(&self) -> Option<T> {
        self.dequeue()
    }

    /// Returns true if no value is currently linked behind the sentinel.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: head is never null.
        unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, guard)
            .is_null()
    }

    /// Number of arena slots backing this queue.
    pub fn arena_capacity(&self) -> usize {
        self.arena.slots.len()
    }

    /// How many nodes had to be allocated on the heap because the arena was exhausted.
    pub fn heap_allocations(&self) -> usize {
        self.heap_allocations.load(Ordering::Relaxed)
    }

    fn allocate<'g>(&self, value: T, guard: &'g Guard) -> Shared<'g, Node<T>> {
        match self.arena.acquire() {
            Some(node) => {
                node.next.store(Shared::null(), Ordering::Relaxed);
                // SAFETY: an acquired slot is exclusively ours until it is linked.
                unsafe { (*node.value.get()).write(value) };
                Shared::from(node as *const Node<T>)
            }
            None => {
                self.heap_allocations.fetch_add(1, Ordering::Relaxed);
                Owned::new(Node::occupied(value)).into_shared(guard)
            }
        }
    }

    fn link<'g>(&self, first: Shared<'g, Node<T>>, last: Shared<'g, Node<T>>, guard: &'g Guard) {
        loop {
            let tail = self.tail.load(Ordering::Acquire, guard);
            // SAFETY: tail is never null and never points at a reclaimed node.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, guard);

            if !next.is_null() {
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                );
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(Shared::null(), first, Ordering::AcqRel, Ordering::Relaxed, guard)
                .is_ok()
            {
                let _ = self.tail.compare_exchange(
                    tail,
                    last,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                    guard,
                );
                return;
            }
        }
    }

    /// # Safety
    /// `node` must have just been unlinked from the head of this queue.
    unsafe fn retire(&self, node: Shared<'_, Node<T>>, guard: &Guard) {
        // SAFETY: the caller guarantees node is a valid, unlinked sentinel.
        match unsafe { node.deref() }.origin {
            Origin::Heap => unsafe { guard.defer_destroy(node) },
            Origin::Arena(index) => {
                let arena = Arc::clone(&self.arena);
                guard.defer(move || arena.release(index));
            }
        }
    }
}

impl<T: Send + 'static> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::for_threads(1)
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can touch the queue.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            let mut is_sentinel = true;
            while let Some(node_ref) = node.as_ref() {
                let next = node_ref.next.load(Ordering::Relaxed, guard);
                if !is_sentinel {
                    (*node_ref.value.get()).assume_init_drop();
                }
                if node_ref.origin == Origin::Heap {
                    drop(node.into_owned());
                }
                is_sentinel = false;
                node = next;
            }
        }
    }
}
