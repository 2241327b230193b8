//! Bounded buffer pools
//!
//! A pool owns one backing arena and hands out write slots that become
//! visible to readers only once committed. Two layouts are supported:
//!
//! - [`PoolPolicy::Fixed`]: N equally sized slots used round-robin. The
//!   transport staging pools are built this way (2-deep send, 1-deep receive).
//! - [`PoolPolicy::Ring`]: variable-length records appended contiguously and
//!   consumed oldest-first. The sensor log queue is built this way.
//!
//! Capacity exhaustion never overwrites committed data; the writer gets
//! `None` back and decides what to drop.

use std::collections::VecDeque;

use thiserror::Error;

/// Buffer pool errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No free slot or contiguous space
    #[error("Buffer pool full")]
    Full,

    /// Nothing committed to read or release
    #[error("Buffer pool empty")]
    Empty,

    /// Slot was handed out before the last reset, or was already committed
    #[error("Stale write slot (generation {slot}, pool at {pool})")]
    StaleSlot { slot: u64, pool: u64 },

    /// Commit length exceeds the slot capacity
    #[error("Commit of {len} bytes exceeds slot capacity {capacity}")]
    Overflow { len: usize, capacity: usize },
}

/// Slot layout of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPolicy {
    /// Independently addressable fixed-size slots
    Fixed { slots: usize, slot_size: usize },
    /// Contiguous variable-length records, at most `max_records` outstanding
    Ring {
        max_records: usize,
        max_record: usize,
    },
}

/// A leased, not yet committed, write region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSlot {
    offset: usize,
    capacity: usize,
    generation: u64,
}

impl WriteSlot {
    /// Maximum number of bytes that may be committed
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    len: usize,
}

/// Fixed-capacity byte pool with FIFO release
#[derive(Debug)]
pub struct BufferPool {
    arena: Vec<u8>,
    policy: PoolPolicy,
    committed: VecDeque<Span>,
    /// Bytes of the oldest committed span already released
    consumed: usize,
    /// Fixed policy: index of the oldest committed slot
    head: usize,
    pending: Option<WriteSlot>,
    generation: u64,
}

impl BufferPool {
    pub fn new(policy: PoolPolicy) -> Self {
        let size = match policy {
            PoolPolicy::Fixed { slots, slot_size } => slots * slot_size,
            PoolPolicy::Ring {
                max_records,
                max_record,
            } => max_records * max_record,
        };

        Self {
            arena: vec![0; size],
            policy,
            committed: VecDeque::new(),
            consumed: 0,
            head: 0,
            pending: None,
            generation: 0,
        }
    }

    /// Pool of `slots` fixed slots of `slot_size` bytes each
    pub fn fixed(slots: usize, slot_size: usize) -> Self {
        Self::new(PoolPolicy::Fixed { slots, slot_size })
    }

    /// Ring of up to `max_records` records, each at most `max_record` bytes
    pub fn ring(max_records: usize, max_record: usize) -> Self {
        Self::new(PoolPolicy::Ring {
            max_records,
            max_record,
        })
    }

    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }

    /// Number of committed, unreleased entries
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Lease a write slot.
    ///
    /// A second lease before commit replaces the first; only one unadvanced
    /// write exists per pool.
    pub fn acquire_write(&mut self) -> Option<WriteSlot> {
        let slot = match self.policy {
            PoolPolicy::Fixed { slots, slot_size } => {
                if self.committed.len() >= slots {
                    return None;
                }
                let index = (self.head + self.committed.len()) % slots;
                WriteSlot {
                    offset: index * slot_size,
                    capacity: slot_size,
                    generation: self.generation,
                }
            }
            PoolPolicy::Ring {
                max_records,
                max_record,
            } => {
                if self.committed.len() >= max_records {
                    return None;
                }
                let offset = self.ring_write_offset(max_record)?;
                WriteSlot {
                    offset,
                    capacity: max_record,
                    generation: self.generation,
                }
            }
        };

        self.pending = Some(slot);
        Some(slot)
    }

    fn ring_write_offset(&self, needed: usize) -> Option<usize> {
        let (Some(front), Some(back)) = (self.committed.front(), self.committed.back()) else {
            return (needed <= self.arena.len()).then_some(0);
        };

        let head = front.offset;
        let tail = back.offset + back.len;

        if tail > head || (tail == head && back.len == 0 && self.committed.len() == 1) {
            if self.arena.len() - tail >= needed {
                Some(tail)
            } else if head >= needed {
                Some(0)
            } else {
                None
            }
        } else if head - tail >= needed {
            Some(tail)
        } else {
            None
        }
    }

    /// Writable region of a leased slot
    pub fn slot_mut(&mut self, slot: &WriteSlot) -> Result<&mut [u8], PoolError> {
        self.check_pending(slot)?;
        Ok(&mut self.arena[slot.offset..slot.offset + slot.capacity])
    }

    /// Make `len` bytes of the slot visible to readers
    pub fn commit(&mut self, slot: &WriteSlot, len: usize) -> Result<(), PoolError> {
        self.check_pending(slot)?;
        if len > slot.capacity {
            return Err(PoolError::Overflow {
                len,
                capacity: slot.capacity,
            });
        }

        self.pending = None;
        self.committed.push_back(Span {
            offset: slot.offset,
            len,
        });
        Ok(())
    }

    /// Drop a leased slot without committing it
    pub fn abandon(&mut self, slot: &WriteSlot) {
        if self.pending.as_ref() == Some(slot) {
            self.pending = None;
        }
    }

    /// Lease, fill and commit in one step
    pub fn push(&mut self, data: &[u8]) -> Result<(), PoolError> {
        let slot = self.acquire_write().ok_or(PoolError::Full)?;
        if data.len() > slot.capacity {
            self.abandon(&slot);
            return Err(PoolError::Overflow {
                len: data.len(),
                capacity: slot.capacity,
            });
        }
        self.slot_mut(&slot)?[..data.len()].copy_from_slice(data);
        self.commit(&slot, data.len())
    }

    fn check_pending(&self, slot: &WriteSlot) -> Result<(), PoolError> {
        if slot.generation != self.generation || self.pending.as_ref() != Some(slot) {
            return Err(PoolError::StaleSlot {
                slot: slot.generation,
                pool: self.generation,
            });
        }
        Ok(())
    }

    /// Oldest committed, unreleased bytes
    pub fn acquire_read(&self) -> Option<&[u8]> {
        let span = self.committed.front()?;
        let start = span.offset + self.consumed;
        Some(&self.arena[start..span.offset + span.len])
    }

    /// Release `len` bytes from the oldest entry; the entry is removed once
    /// fully consumed.
    pub fn release_read(&mut self, len: usize) -> Result<(), PoolError> {
        let span = *self.committed.front().ok_or(PoolError::Empty)?;
        self.consumed += len;

        if self.consumed >= span.len {
            self.committed.pop_front();
            self.consumed = 0;
            if let PoolPolicy::Fixed { slots, .. } = self.policy {
                self.head = (self.head + 1) % slots;
            }
        }
        Ok(())
    }

    /// Discard every committed entry and invalidate outstanding write slots
    pub fn reset(&mut self) {
        self.committed.clear();
        self.consumed = 0;
        self.head = 0;
        self.pending = None;
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_pool_fails_closed_when_full() {
        let mut pool = BufferPool::fixed(2, 8);

        pool.push(b"one").unwrap();
        pool.push(b"two").unwrap();

        assert!(pool.acquire_write().is_none());
        assert_eq!(pool.push(b"three"), Err(PoolError::Full));
        assert_eq!(pool.acquire_read(), Some(&b"one"[..]));
    }

    #[test]
    fn test_fixed_pool_round_robin_reuses_oldest_free_slot() {
        let mut pool = BufferPool::fixed(2, 4);

        pool.push(b"aaaa").unwrap();
        pool.push(b"bbbb").unwrap();
        pool.release_read(4).unwrap();
        pool.push(b"cccc").unwrap();

        assert_eq!(pool.acquire_read(), Some(&b"bbbb"[..]));
        pool.release_read(4).unwrap();
        assert_eq!(pool.acquire_read(), Some(&b"cccc"[..]));
    }

    #[test]
    fn test_uncommitted_write_is_invisible() {
        let mut pool = BufferPool::fixed(1, 16);
        let slot = pool.acquire_write().unwrap();
        pool.slot_mut(&slot).unwrap()[..3].copy_from_slice(b"abc");

        assert!(pool.acquire_read().is_none());

        pool.commit(&slot, 3).unwrap();
        assert_eq!(pool.acquire_read(), Some(&b"abc"[..]));
    }

    #[test]
    fn test_partial_release() {
        let mut pool = BufferPool::fixed(1, 16);
        pool.push(b"abcdef").unwrap();

        pool.release_read(2).unwrap();
        assert_eq!(pool.acquire_read(), Some(&b"cdef"[..]));

        pool.release_read(4).unwrap();
        assert!(pool.acquire_read().is_none());
        assert_eq!(pool.release_read(1), Err(PoolError::Empty));
    }

    #[test]
    fn test_reset_invalidates_leased_slot() {
        let mut pool = BufferPool::fixed(1, 16);
        let slot = pool.acquire_write().unwrap();

        pool.reset();

        assert!(matches!(
            pool.commit(&slot, 1),
            Err(PoolError::StaleSlot { .. })
        ));
        assert!(pool.acquire_write().is_some());
    }

    #[test]
    fn test_commit_overflow_rejected() {
        let mut pool = BufferPool::fixed(1, 4);
        let slot = pool.acquire_write().unwrap();

        assert_eq!(
            pool.commit(&slot, 5),
            Err(PoolError::Overflow {
                len: 5,
                capacity: 4
            })
        );
    }

    #[test]
    fn test_ring_holds_variable_records_in_order() {
        let mut pool = BufferPool::ring(4, 8);

        pool.push(b"a").unwrap();
        pool.push(b"bbbbbbbb").unwrap();
        pool.push(b"cc").unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.acquire_read(), Some(&b"a"[..]));
        pool.release_read(1).unwrap();
        assert_eq!(pool.acquire_read(), Some(&b"bbbbbbbb"[..]));
        pool.release_read(8).unwrap();
        assert_eq!(pool.acquire_read(), Some(&b"cc"[..]));
    }

    #[test]
    fn test_ring_record_limit() {
        let mut pool = BufferPool::ring(2, 4);

        pool.push(b"x").unwrap();
        pool.push(b"y").unwrap();

        assert_eq!(pool.push(b"z"), Err(PoolError::Full));
    }

    #[test]
    fn test_ring_wraps_to_front_once_space_frees() {
        let mut pool = BufferPool::ring(3, 4);

        pool.push(b"1111").unwrap();
        pool.push(b"2222").unwrap();
        pool.push(b"3333").unwrap();
        pool.release_read(4).unwrap();

        pool.push(b"4444").unwrap();
        let mut seen = Vec::new();
        while let Some(data) = pool.acquire_read() {
            seen.push(data.to_vec());
            let len = data.len();
            pool.release_read(len).unwrap();
        }

        assert_eq!(
            seen,
            vec![b"2222".to_vec(), b"3333".to_vec(), b"4444".to_vec()]
        );
    }
}
