//! Relocatable scratch-memory pool.
//!
//! Operators borrow short-lived regions from a single shared pool sized for
//! the whole inference pass. To fight fragmentation on kilobyte-scale
//! devices, the pool may compact — physically move live regions — during any
//! `allocate` or explicit `compact` call.
//!
//! A [`Handle`] is a stable index into the pool's region table; the physical
//! offset behind it is rewritten when the region moves. No raw address ever
//! escapes: all access goes through length-checked views derived from the
//! pool at point of use, so stale pointers cannot exist in caller code.
//!
//! Protocol: `allocate` → `bind` (immediately) → … → `unbind` → `deallocate`,
//! with bind/unbind pairs nesting strictly LIFO. Only bound regions survive
//! compaction; a region left unbound across a compacting call is dropped and
//! its handle goes stale. [`ScratchPool::acquire`]/[`ScratchPool::release`]
//! bundle the pairs for the common scoped pattern.

use kilo_core::{KiloError, Result};

/// Region alignment in bytes. Offsets stay 4-aligned against the 8-aligned
/// backing store, so an `i32` view over any region is always valid.
const REGION_ALIGN: usize = 4;

/// Stable reference to one live pool region.
///
/// Handles are generation-checked: once the region is deallocated or dropped
/// by compaction, every outstanding copy of its handle reports
/// `InvalidHandle` instead of aliasing a later allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    index: usize,
    generation: u32,
}

impl Handle {
    /// Region-table index, for diagnostics.
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionState {
    /// Allocated but not tracked; the next compaction drops it.
    Unbound,
    /// Tracked; compaction relocates it and rewrites its offset.
    Bound,
    /// Table slot free for reuse.
    Free,
}

#[derive(Debug, Clone, Copy)]
struct Region {
    offset: usize,
    len: usize,
    state: RegionState,
    generation: u32,
}

/// Bounded scratch pool with handle-indirected relocation.
pub struct ScratchPool {
    /// u64 backing keeps the base 8-aligned, so every 4-aligned byte offset
    /// yields a validly aligned `i32` view.
    buf: Vec<u64>,
    capacity: usize,
    /// Bump cursor: next free byte offset.
    cursor: usize,
    regions: Vec<Region>,
    /// Indices of bound regions, in bind order.
    bind_stack: Vec<usize>,
}

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

impl ScratchPool {
    /// Create a pool with (at least) the given capacity in bytes.
    ///
    /// Capacity is rounded up to a multiple of 8.
    pub fn with_capacity(bytes: usize) -> Self {
        let words = bytes.div_ceil(8);
        Self {
            buf: vec![0u64; words],
            capacity: words * 8,
            cursor: 0,
            regions: Vec::new(),
            bind_stack: Vec::new(),
        }
    }

    /// Reserve `size` bytes, compacting first if the tail cannot fit them.
    ///
    /// The new region starts unbound. Callers must `bind` it before the next
    /// pool call: compaction triggered by a later `allocate` drops unbound
    /// regions.
    pub fn allocate(&mut self, size: usize) -> Result<Handle> {
        let padded = align_up(size, REGION_ALIGN);
        if self.cursor + padded > self.capacity {
            self.compact();
        }
        if self.cursor + padded > self.capacity {
            return Err(KiloError::OutOfMemory {
                requested: size,
                available: self.capacity - self.cursor,
            });
        }
        let offset = self.cursor;
        self.cursor += padded;
        self.bytes_raw_mut()[offset..offset + padded].fill(0);

        let index = match self
            .regions
            .iter()
            .position(|r| r.state == RegionState::Free)
        {
            Some(i) => i,
            None => {
                self.regions.push(Region {
                    offset: 0,
                    len: 0,
                    state: RegionState::Free,
                    generation: 0,
                });
                self.regions.len() - 1
            }
        };
        let generation = self.regions[index].generation;
        self.regions[index] = Region {
            offset,
            len: size,
            state: RegionState::Unbound,
            generation,
        };
        log::trace!("pool: allocated {size}B at offset {offset} (region {index})");
        Ok(Handle { index, generation })
    }

    /// Start tracking a region across compaction.
    pub fn bind(&mut self, handle: Handle) -> Result<()> {
        let index = self.check(handle)?;
        if self.regions[index].state == RegionState::Bound {
            return Err(KiloError::PoolViolation(format!(
                "bind: region {index} is already bound"
            )));
        }
        self.regions[index].state = RegionState::Bound;
        self.bind_stack.push(index);
        Ok(())
    }

    /// Stop tracking a region. Must be the most recently bound one.
    pub fn unbind(&mut self, handle: Handle) -> Result<()> {
        let index = self.check(handle)?;
        if self.regions[index].state != RegionState::Bound {
            return Err(KiloError::PoolViolation(format!(
                "unbind: region {index} is not bound"
            )));
        }
        if self.bind_stack.last() != Some(&index) {
            return Err(KiloError::PoolViolation(format!(
                "unbind: region {index} violates LIFO bind order"
            )));
        }
        self.bind_stack.pop();
        self.regions[index].state = RegionState::Unbound;
        Ok(())
    }

    /// Release an unbound region. Its handle (and any copy) goes stale.
    pub fn deallocate(&mut self, handle: Handle) -> Result<()> {
        let index = self.check(handle)?;
        if self.regions[index].state == RegionState::Bound {
            return Err(KiloError::PoolViolation(format!(
                "deallocate: region {index} is still bound"
            )));
        }
        let Region { offset, len, .. } = self.regions[index];
        self.regions[index].state = RegionState::Free;
        self.regions[index].generation = self.regions[index].generation.wrapping_add(1);
        // Reclaim the bump cursor when the freed region sits at the tail.
        if offset + align_up(len, REGION_ALIGN) == self.cursor {
            self.cursor = offset;
        }
        Ok(())
    }

    /// `allocate` + `bind` in one step — the form operators use so a fresh
    /// region is never exposed to a compacting call.
    pub fn acquire(&mut self, size: usize) -> Result<Handle> {
        let handle = self.allocate(size)?;
        self.bind(handle)?;
        Ok(handle)
    }

    /// `unbind` + `deallocate` in one step.
    pub fn release(&mut self, handle: Handle) -> Result<()> {
        self.unbind(handle)?;
        self.deallocate(handle)
    }

    /// Slide bound regions down to close gaps and drop unbound regions.
    pub fn compact(&mut self) {
        let mut order: Vec<usize> = (0..self.regions.len())
            .filter(|&i| self.regions[i].state == RegionState::Bound)
            .collect();
        order.sort_by_key(|&i| self.regions[i].offset);

        let mut cursor = 0;
        for index in order {
            let Region { offset, len, .. } = self.regions[index];
            let padded = align_up(len, REGION_ALIGN);
            if offset != cursor {
                self.bytes_raw_mut().copy_within(offset..offset + padded, cursor);
                self.regions[index].offset = cursor;
            }
            cursor += padded;
        }

        let mut dropped = 0usize;
        for region in self.regions.iter_mut() {
            if region.state == RegionState::Unbound {
                region.state = RegionState::Free;
                region.generation = region.generation.wrapping_add(1);
                dropped += 1;
            }
        }
        self.cursor = cursor;
        log::trace!("pool: compacted to {cursor}B live, dropped {dropped} unbound region(s)");
    }

    /// Byte view of a region.
    pub fn bytes(&self, handle: Handle) -> Result<&[u8]> {
        let index = self.check(handle)?;
        let Region { offset, len, .. } = self.regions[index];
        Ok(&self.bytes_raw()[offset..offset + len])
    }

    /// Mutable byte view of a region.
    pub fn bytes_mut(&mut self, handle: Handle) -> Result<&mut [u8]> {
        let index = self.check(handle)?;
        let Region { offset, len, .. } = self.regions[index];
        Ok(&mut self.bytes_raw_mut()[offset..offset + len])
    }

    /// `i32` view of a region. The region length must be a multiple of 4.
    pub fn i32_view(&self, handle: Handle) -> Result<&[i32]> {
        let index = self.check(handle)?;
        let Region { offset, len, .. } = self.regions[index];
        if len % 4 != 0 {
            return Err(KiloError::PoolViolation(format!(
                "i32 view over {len}B region"
            )));
        }
        let ptr = unsafe { self.buf.as_ptr().cast::<u8>().add(offset) };
        Ok(unsafe { std::slice::from_raw_parts(ptr.cast::<i32>(), len / 4) })
    }

    /// Mutable `i32` view of a region.
    pub fn i32_view_mut(&mut self, handle: Handle) -> Result<&mut [i32]> {
        let index = self.check(handle)?;
        let Region { offset, len, .. } = self.regions[index];
        if len % 4 != 0 {
            return Err(KiloError::PoolViolation(format!(
                "i32 view over {len}B region"
            )));
        }
        let ptr = unsafe { self.buf.as_mut_ptr().cast::<u8>().add(offset) };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.cast::<i32>(), len / 4) })
    }

    /// Mutable `i32` views over two distinct regions at once.
    pub fn i32_view_pair_mut(
        &mut self,
        a: Handle,
        b: Handle,
    ) -> Result<(&mut [i32], &mut [i32])> {
        let ia = self.check(a)?;
        let ib = self.check(b)?;
        if ia == ib {
            return Err(KiloError::PoolViolation(
                "i32 view pair over the same region".into(),
            ));
        }
        let ra = self.regions[ia];
        let rb = self.regions[ib];
        if ra.len % 4 != 0 || rb.len % 4 != 0 {
            return Err(KiloError::PoolViolation(
                "i32 view pair over unaligned region".into(),
            ));
        }
        // Distinct regions are disjoint by construction, so the two mutable
        // views cannot alias.
        let base = self.buf.as_mut_ptr().cast::<u8>();
        unsafe {
            let sa = std::slice::from_raw_parts_mut(base.add(ra.offset).cast::<i32>(), ra.len / 4);
            let sb = std::slice::from_raw_parts_mut(base.add(rb.offset).cast::<i32>(), rb.len / 4);
            Ok((sa, sb))
        }
    }

    /// Current physical offset of a region, for diagnostics and tests.
    pub fn offset_of(&self, handle: Handle) -> Result<usize> {
        let index = self.check(handle)?;
        Ok(self.regions[index].offset)
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes below the bump cursor (includes alignment padding and gaps).
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes available at the tail without compacting.
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Bytes held by live (bound or unbound) regions.
    pub fn live_bytes(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.state != RegionState::Free)
            .map(|r| align_up(r.len, REGION_ALIGN))
            .sum()
    }

    fn check(&self, handle: Handle) -> Result<usize> {
        match self.regions.get(handle.index) {
            Some(r) if r.generation == handle.generation && r.state != RegionState::Free => {
                Ok(handle.index)
            }
            _ => Err(KiloError::InvalidHandle {
                index: handle.index,
            }),
        }
    }

    fn bytes_raw(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.buf.as_ptr().cast::<u8>(), self.capacity) }
    }

    fn bytes_raw_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.buf.as_mut_ptr().cast::<u8>(), self.capacity) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_restores_baseline() {
        let mut pool = ScratchPool::with_capacity(64);
        assert_eq!(pool.live_bytes(), 0);
        let h = pool.acquire(16).unwrap();
        assert_eq!(pool.live_bytes(), 16);
        assert_eq!(pool.used(), 16);
        pool.release(h).unwrap();
        assert_eq!(pool.live_bytes(), 0);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_out_of_memory() {
        let mut pool = ScratchPool::with_capacity(32);
        let _a = pool.acquire(24).unwrap();
        let err = pool.allocate(16).unwrap_err();
        assert_eq!(
            err,
            KiloError::OutOfMemory {
                requested: 16,
                available: 8
            }
        );
    }

    #[test]
    fn test_i32_view_roundtrip() {
        let mut pool = ScratchPool::with_capacity(64);
        let h = pool.acquire(16).unwrap();
        {
            let view = pool.i32_view_mut(h).unwrap();
            assert_eq!(view.len(), 4);
            view.copy_from_slice(&[1, -2, 3, -4]);
        }
        assert_eq!(pool.i32_view(h).unwrap(), &[1, -2, 3, -4]);
        pool.release(h).unwrap();
    }

    #[test]
    fn test_fresh_region_is_zeroed() {
        let mut pool = ScratchPool::with_capacity(32);
        let h = pool.acquire(8).unwrap();
        pool.bytes_mut(h).unwrap().fill(0xAB);
        pool.release(h).unwrap();
        let h = pool.acquire(8).unwrap();
        assert_eq!(pool.bytes(h).unwrap(), &[0u8; 8]);
        pool.release(h).unwrap();
    }

    #[test]
    fn test_compaction_relocates_bound_region() {
        let mut pool = ScratchPool::with_capacity(64);
        // Unbound gap in front of a bound region.
        let gap = pool.allocate(16).unwrap();
        let kept = pool.acquire(16).unwrap();
        assert_eq!(pool.offset_of(kept).unwrap(), 16);
        pool.i32_view_mut(kept).unwrap().copy_from_slice(&[7, 8, 9, 10]);

        // Tail has 32 free; asking for 48 forces a compaction pass.
        let big = pool.allocate(48).unwrap();
        assert_eq!(pool.offset_of(kept).unwrap(), 0);
        assert_eq!(pool.i32_view(kept).unwrap(), &[7, 8, 9, 10]);
        // The unbound region did not survive.
        assert_eq!(
            pool.bytes(gap).unwrap_err(),
            KiloError::InvalidHandle { index: gap.index() }
        );
        pool.deallocate(big).unwrap();
        pool.release(kept).unwrap();
    }

    #[test]
    fn test_stale_handle_after_deallocate() {
        let mut pool = ScratchPool::with_capacity(32);
        let h = pool.acquire(8).unwrap();
        pool.release(h).unwrap();
        assert!(matches!(
            pool.bytes(h).unwrap_err(),
            KiloError::InvalidHandle { .. }
        ));
        // A new allocation reusing the table slot must not be reachable
        // through the stale handle.
        let fresh = pool.acquire(8).unwrap();
        assert!(pool.bytes(h).is_err());
        pool.release(fresh).unwrap();
    }

    #[test]
    fn test_lifo_discipline() {
        let mut pool = ScratchPool::with_capacity(64);
        let first = pool.acquire(8).unwrap();
        let second = pool.acquire(8).unwrap();
        let err = pool.unbind(first).unwrap_err();
        assert!(matches!(err, KiloError::PoolViolation(_)));
        // Reverse order is fine.
        pool.release(second).unwrap();
        pool.release(first).unwrap();
        assert_eq!(pool.live_bytes(), 0);
    }

    #[test]
    fn test_deallocate_while_bound_rejected() {
        let mut pool = ScratchPool::with_capacity(32);
        let h = pool.acquire(8).unwrap();
        assert!(matches!(
            pool.deallocate(h).unwrap_err(),
            KiloError::PoolViolation(_)
        ));
        pool.release(h).unwrap();
    }

    #[test]
    fn test_alignment_padding() {
        let mut pool = ScratchPool::with_capacity(32);
        let a = pool.acquire(3).unwrap();
        let b = pool.acquire(4).unwrap();
        // 3 bytes pad to 4, so the second region starts 4-aligned.
        assert_eq!(pool.offset_of(b).unwrap(), 4);
        pool.release(b).unwrap();
        pool.release(a).unwrap();
    }
}
