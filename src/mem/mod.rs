use self::addr::PhysPageNum;

pub mod addr;
pub mod heap;
pub mod paging;
pub mod set;

#[cfg(target_os = "none")]
pub use self::bare::init;

/// Physical frame owned by one mapping; returned to the allocator on drop.
pub struct Frame(usize);

impl Frame {
    /// Allocates a zero-filled frame, or `None` when physical memory is exhausted.
    pub fn alloc() -> Option<Self> {
        let ppn = backend::alloc()?;
        unsafe { PhysPageNum(ppn).bytes_array().fill(0) };
        Some(Self(ppn))
    }

    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum::from(self.0)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        backend::dealloc(self.0);
    }
}

#[cfg(target_os = "none")]
use self::bare as backend;
#[cfg(not(target_os = "none"))]
use self::hosted as backend;

#[cfg(target_os = "none")]
mod bare {
    use alloc::collections::VecDeque;
    use buddy_system_allocator::LockedHeap;
    use riscv::register::sstatus;

    use crate::consts::*;

    use super::addr;

    #[global_allocator]
    static DYNAMIC_ALLOCATOR: LockedHeap<32> = LockedHeap::<32>::empty();

    pub fn init() {
        unsafe {
            sstatus::set_sum();
        }
        init_heap();
        init_frame();
    }

    fn init_heap() {
        static mut HEAP: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];
        unsafe {
            DYNAMIC_ALLOCATOR
                .lock()
                .init(core::ptr::addr_of_mut!(HEAP) as usize, KERNEL_HEAP_SIZE);
        }
    }

    extern "C" {
        fn _frames_start();
    }

    enum NaiveFrameAllocator {
        Init {
            freelist: VecDeque<usize>,
            ptr: usize,
            end: usize,
        },
        Uninit,
    }

    static FRAME_ALLOC: spin::Mutex<NaiveFrameAllocator> =
        spin::Mutex::new(NaiveFrameAllocator::Uninit);

    fn init_frame() {
        let start: usize = addr::PhysAddr::from(_frames_start as usize).ceil().into();
        let end: usize = addr::PhysAddr::from(PHYS_MEMORY_END).floor().into();
        log::info!("[Mem] frames {:#x}..{:#x}", start, end);
        *FRAME_ALLOC.lock() = NaiveFrameAllocator::Init {
            freelist: VecDeque::new(),
            ptr: start,
            end,
        };
    }

    pub fn alloc() -> Option<usize> {
        match *FRAME_ALLOC.lock() {
            NaiveFrameAllocator::Uninit => panic!("Frame allocated before init"),
            NaiveFrameAllocator::Init {
                ref mut freelist,
                ref mut ptr,
                end,
            } => {
                if let Some(p) = freelist.pop_front() {
                    return Some(p);
                }
                if *ptr >= end {
                    return None;
                }
                let alloc = *ptr;
                *ptr += 1;
                Some(alloc)
            }
        }
    }

    pub fn dealloc(ppn: usize) {
        match *FRAME_ALLOC.lock() {
            NaiveFrameAllocator::Uninit => panic!("Frame de-allocated before init"),
            NaiveFrameAllocator::Init {
                ref mut freelist, ..
            } => {
                freelist.push_front(ppn);
            }
        }
    }
}

// Off target, frames are page-aligned heap blocks. Their addresses double as
// physical addresses, so page-table walks work unchanged in tests.
#[cfg(not(target_os = "none"))]
mod hosted {
    use alloc::alloc::{alloc_zeroed, dealloc as free, Layout};

    use crate::consts::PAGE_SIZE;

    use super::addr::PAGE_SIZE_BITS;

    fn layout() -> Layout {
        // PAGE_SIZE is a nonzero power of two.
        unsafe { Layout::from_size_align_unchecked(PAGE_SIZE, PAGE_SIZE) }
    }

    pub fn alloc() -> Option<usize> {
        let ptr = unsafe { alloc_zeroed(layout()) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr as usize >> PAGE_SIZE_BITS)
        }
    }

    pub fn dealloc(ppn: usize) {
        unsafe { free((ppn << PAGE_SIZE_BITS) as *mut u8, layout()) }
    }
}
