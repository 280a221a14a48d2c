use alloc::vec;
use alloc::vec::Vec;

use crate::error::Errno;

use super::{addr::*, Frame};

bitflags::bitflags! {
    pub struct PTEFlags: u8 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

#[derive(Copy, Clone)]
#[repr(C)]
pub struct PTE {
    pub bits: usize,
}

impl PTE {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PTE {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }
    pub fn empty() -> Self {
        PTE { bits: 0 }
    }
    pub fn ppn(&self) -> PhysPageNum {
        (self.bits >> 10 & ((1usize << 44) - 1)).into()
    }
    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    /// Leaf reachable from user mode.
    pub fn is_user(&self) -> bool {
        self.flags().contains(PTEFlags::V | PTEFlags::U)
    }
}

/// Sv39 three-level page table. Owns the frames of its interior nodes.
pub struct PageTable {
    ppn: PhysPageNum,
    frames: Vec<Frame>,
}

impl PageTable {
    pub fn new() -> Result<Self, Errno> {
        let frame = Frame::alloc().ok_or(Errno::OutOfMemory)?;
        let ppn = frame.ppn();
        let frames = vec![frame];

        Ok(PageTable { ppn, frames })
    }

    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, flags: PTEFlags) -> Result<(), Errno> {
        let pte = self.find_pte_create(vpn)?;
        if pte.is_valid() {
            return Err(Errno::AlreadyMapped);
        }
        *pte = PTE::new(ppn, flags | PTEFlags::V);
        Ok(())
    }

    /// Clears the leaf entry and returns the frame it pointed at.
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Result<PhysPageNum, Errno> {
        let pte = self.find_pte(vpn).ok_or(Errno::NotMapped)?;
        if !pte.is_valid() {
            return Err(Errno::NotMapped);
        }
        let ppn = pte.ppn();
        *pte = PTE::empty();
        Ok(ppn)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PTE> {
        self.find_pte(vpn).map(|pte| *pte).filter(PTE::is_valid)
    }

    pub fn translate_addr(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        self.translate(vaddr.floor()).map(|pte| {
            let ppn = pte.ppn();
            let mut paddr_base: PhysAddr = ppn.into();
            paddr_base.0 += vaddr.page_offset();
            paddr_base
        })
    }

    fn find_pte_create(&mut self, vpn: VirtPageNum) -> Result<&mut PTE, Errno> {
        let idxs = vpn.indexes();
        let mut ppn = self.ppn;
        for (level, idx) in idxs.iter().enumerate() {
            let pte = unsafe { ppn.pte_within(*idx) };
            if level == 2 {
                return Ok(pte);
            }
            if !pte.is_valid() {
                let frame = Frame::alloc().ok_or(Errno::OutOfMemory)?;
                *pte = PTE::new(frame.ppn(), PTEFlags::V);
                self.frames.push(frame);
            }
            ppn = pte.ppn();
        }
        unreachable!()
    }

    fn find_pte(&self, vpn: VirtPageNum) -> Option<&mut PTE> {
        let idxs = vpn.indexes();
        let mut ppn = self.ppn;
        for (level, idx) in idxs.iter().enumerate() {
            let pte = unsafe { ppn.pte_within(*idx) };
            if level == 2 {
                return Some(pte);
            }
            if !pte.is_valid() {
                return None;
            }
            ppn = pte.ppn();
        }
        None
    }

    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }
}
