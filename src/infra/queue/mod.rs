//! Fixed-capacity FIFO of packets.
//!
//! [`BoundedQueue`] is the plain ring buffer; [`SharedQueue`] wraps it in an
//! `embassy_sync` blocking mutex so that interrupt handlers and mainline code
//! can push and pop concurrently. With `CriticalSectionRawMutex` each access
//! disables interrupts only for the index update and the slot copy.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

use crate::protocol::packet::Packet;

//==================================================================================BOUNDED_QUEUE
/// Ring buffer of `N` packets with monotonically wrapping indices.
///
/// * empty iff `read_index == write_index`
/// * full iff `write_index - read_index == N`
///
/// `N` must be a non-zero power of two so that the wrapping indices stay
/// consistent with the slot mapping across integer overflow.
#[derive(Debug, Clone)]
pub struct BoundedQueue<const N: usize> {
    slots: [Packet; N],
    read_index: usize,
    write_index: usize,
}

impl<const N: usize> Default for BoundedQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BoundedQueue<N> {
    const VALID_CAPACITY: () = assert!(
        N > 0 && N.is_power_of_two(),
        "queue capacity must be a non-zero power of two"
    );

    /// Create an empty queue.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        Self {
            slots: [Packet::EMPTY; N],
            read_index: 0,
            write_index: 0,
        }
    }

    /// Maximum number of packets the queue holds.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of queued packets.
    #[inline]
    pub fn len(&self) -> usize {
        self.write_index.wrapping_sub(self.read_index)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_index == self.write_index
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Append `packet`. Returns `false` when the queue is full: the packet is
    /// dropped and the queue is left untouched (drop-newest).
    pub fn push(&mut self, packet: Packet) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.write_index % N] = packet;
        self.write_index = self.write_index.wrapping_add(1);
        true
    }

    /// Remove the oldest packet.
    pub fn pop(&mut self) -> Option<Packet> {
        if self.is_empty() {
            return None;
        }
        let packet = self.slots[self.read_index % N];
        self.read_index = self.read_index.wrapping_add(1);
        Some(packet)
    }

    /// Drop every queued packet and rewind both indices to zero.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }
}

//==================================================================================SHARED_QUEUE
/// [`BoundedQueue`] guarded by a blocking mutex; every operation is one
/// short critical section.
pub struct SharedQueue<M: RawMutex, const N: usize> {
    inner: Mutex<M, RefCell<BoundedQueue<N>>>,
}

impl<M: RawMutex, const N: usize> Default for SharedQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> SharedQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(BoundedQueue::new())),
        }
    }

    pub fn push(&self, packet: Packet) -> bool {
        self.inner.lock(|cell| cell.borrow_mut().push(packet))
    }

    pub fn pop(&self) -> Option<Packet> {
        self.inner.lock(|cell| cell.borrow_mut().pop())
    }

    pub fn clear(&self) {
        self.inner.lock(|cell| cell.borrow_mut().clear())
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock(|cell| cell.borrow().is_empty())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Run `f` on the queue inside the critical section. Used for
    /// consistent multi-field reads such as debug dumps of both indices.
    pub fn inspect<R>(&self, f: impl FnOnce(&BoundedQueue<N>) -> R) -> R {
        self.inner.lock(|cell| f(&cell.borrow()))
    }
}
