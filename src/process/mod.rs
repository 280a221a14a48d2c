use core::fmt;

use crate::consts::{PAGE_SIZE, USER_STACK_PAGES, USER_STACK_TOP};
use crate::debug_line::DebugLine;
use crate::elf::{ByteSource, ElfContext, ElfError};
use crate::error::Errno;
use crate::mem::addr::VirtAddr;
use crate::mem::heap::HeapState;
use crate::mem::set::{MapPermission, MemorySet};
use crate::trap::TrapFrame;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitReason {
    AnyChild,
    Specific(Pid),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Free,
    Ready,
    Running,
    Blocked(WaitReason),
    /// Exited, holding the exit code until the parent reaps it.
    Zombie(isize),
}

/// Page counts per segment kind.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentPages {
    pub code: usize,
    pub data: usize,
    pub stack: usize,
    pub heap: usize,
}

pub struct Process {
    pub status: Status,
    pub parent: Option<Pid>,
    pub tf: TrapFrame,
    pub mset: MemorySet,
    pub heap: HeapState,
    pub segments: SegmentPages,
    pub debug_line: Option<DebugLine>,
}

impl Process {
    /// Builds a process from an ELF image: loadable segments at their linked
    /// addresses, a fixed user stack below `USER_STACK_TOP`, and a context
    /// that enters at the image's entry point.
    pub fn new_user<S: ByteSource>(elf: &mut ElfContext<S>) -> Result<Process, ElfError> {
        let mut mset = MemorySet::new_user().map_err(|_| ElfError::Exhausted)?;
        elf.load(&mut mset)?;

        let mut segments = SegmentPages::default();
        for ph in elf.program_headers.iter().filter(|ph| ph.is_load()) {
            let start = VirtAddr(ph.vaddr as usize).floor();
            let end = VirtAddr((ph.vaddr + ph.memsz) as usize).ceil();
            let pages = end.0 - start.0;
            if ph.permission().contains(MapPermission::X) {
                segments.code += pages;
            } else {
                segments.data += pages;
            }
        }

        let stack_bottom = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;
        mset.insert_framed_area(
            VirtAddr(stack_bottom),
            VirtAddr(USER_STACK_TOP),
            MapPermission::U | MapPermission::R | MapPermission::W,
        )
        .map_err(|_| ElfError::Exhausted)?;
        segments.stack = USER_STACK_PAGES;

        let entry = elf.entry() as usize;
        log::debug!("[Process] entry {:#x}, {:?}", entry, segments);

        Ok(Process {
            status: Status::Ready,
            parent: None,
            tf: TrapFrame::new_user(entry, USER_STACK_TOP),
            mset,
            heap: HeapState::default(),
            segments,
            debug_line: None,
        })
    }

    /// Full copy for fork. `tf` is the parent's live context; the child
    /// resumes from it with `a0 = 0`.
    pub fn fork_from(&self, tf: &TrapFrame) -> Result<Process, Errno> {
        let mut child_tf = tf.clone();
        child_tf.set_return(0);
        Ok(Process {
            status: Status::Ready,
            parent: None,
            tf: child_tf,
            mset: self.mset.fork_copy()?,
            heap: self.heap.clone(),
            segments: self.segments,
            debug_line: self.debug_line.clone(),
        })
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.status, Status::Zombie(_))
    }

    pub fn allocate_page(&mut self) -> Result<VirtAddr, Errno> {
        let va = self.heap.allocate_page(&mut self.mset)?;
        self.segments.heap = self.heap.pages();
        Ok(va)
    }

    pub fn free_page(&mut self, va: VirtAddr) -> Result<(), Errno> {
        self.heap.free_page(&mut self.mset, va)
    }
}
