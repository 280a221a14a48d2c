use alloc::vec::Vec;

use crate::consts::{HEAP_FREE_LIST_CAPACITY, PAGE_SIZE, USER_HEAP_BASE};
use crate::error::Errno;

use super::addr::VirtAddr;
use super::set::{MapPermission, MemorySet};

/// Page-granular user heap: a bump region `[base, top)` plus a bounded list
/// of released pages that are handed out again before `top` grows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapState {
    base: usize,
    top: usize,
    free: Vec<usize>,
    pages: usize,
}

impl Default for HeapState {
    fn default() -> Self {
        Self::new(USER_HEAP_BASE)
    }
}

impl HeapState {
    pub fn new(base: usize) -> Self {
        Self {
            base,
            top: base,
            free: Vec::with_capacity(HEAP_FREE_LIST_CAPACITY),
            pages: 0,
        }
    }

    pub fn top(&self) -> usize {
        self.top
    }

    /// Pages the heap has grown by; freed pages still count.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn free_pages(&self) -> &[usize] {
        &self.free
    }

    /// Hands out one zeroed, user read/write page and returns its address.
    pub fn allocate_page(&mut self, mset: &mut MemorySet) -> Result<VirtAddr, Errno> {
        let perm = MapPermission::U | MapPermission::R | MapPermission::W;
        if let Some(addr) = self.free.pop() {
            debug_assert!(addr < self.top);
            if let Err(err) = mset.map_page(VirtAddr(addr), perm) {
                self.free.push(addr);
                return Err(err);
            }
            return Ok(VirtAddr(addr));
        }

        let addr = self.top;
        mset.map_page(VirtAddr(addr), perm)?;
        self.top += PAGE_SIZE;
        self.pages += 1;
        Ok(VirtAddr(addr))
    }

    /// Returns a page to the free list. The address must be a heap page that is
    /// currently handed out.
    pub fn free_page(&mut self, mset: &mut MemorySet, addr: VirtAddr) -> Result<(), Errno> {
        let va = addr.0;
        if !addr.is_aligned() || va < self.base || va >= self.top {
            return Err(Errno::InvalidArgument);
        }
        if self.free.contains(&va) || !mset.is_mapped(addr) {
            return Err(Errno::InvalidArgument);
        }
        if self.free.len() >= HEAP_FREE_LIST_CAPACITY {
            return Err(Errno::OutOfMemory);
        }

        mset.unmap_page(addr)?;
        self.free.push(va);
        Ok(())
    }
}
