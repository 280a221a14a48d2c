use alloc::{collections::BTreeMap, vec::Vec};

use crate::consts::PAGE_SIZE;
use crate::elf::{ElfError, SegmentMapper};
use crate::error::Errno;

use super::{Frame, addr::{VirtPageNum, VirtAddr, PhysAddr, PhysPageNum}, paging::{PageTable, PTEFlags}};

bitflags::bitflags! {
    pub struct MapPermission: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
    }
}

impl From<MapPermission> for PTEFlags {
    fn from(perm: MapPermission) -> Self {
        PTEFlags::from_bits_truncate(perm.bits())
    }
}

pub enum MapTarget {
    Identical,
    Framed {
        frames: BTreeMap<VirtPageNum, Frame>,
    },
}

/// A run of virtual pages sharing one permission and backing policy.
pub struct MapArea {
    start: VirtPageNum,
    end: VirtPageNum,
    perm: MapPermission,
    target: MapTarget,
}

impl MapArea {
    pub fn new(
        start_va: VirtAddr,
        end_va: VirtAddr,
        target: MapTarget,
        perm: MapPermission
    ) -> Self {
        Self {
            start: start_va.floor(),
            end: end_va.ceil(),
            target,
            perm,
        }
    }

    pub fn framed(start_va: VirtAddr, end_va: VirtAddr, perm: MapPermission) -> Self {
        Self::new(start_va, end_va, MapTarget::Framed { frames: BTreeMap::new() }, perm)
    }

    fn vpns(&self) -> impl Iterator<Item = VirtPageNum> {
        (self.start.0..self.end.0).map(VirtPageNum)
    }

    /// Maps every page of the area. Pages some earlier framed area already maps
    /// are shared: their permissions are widened instead of mapping a second
    /// frame. The caller rules out overlap with identical areas.
    pub fn map(&mut self, table: &mut PageTable) -> Result<(), Errno> {
        for vpn in self.vpns() {
            if let Some(pte) = table.translate(vpn) {
                let widened = pte.flags() | PTEFlags::from(self.perm);
                table.unmap(vpn)?;
                table.map(vpn, pte.ppn(), widened)?;
                continue;
            }
            self.map_one(table, vpn)?;
        }
        Ok(())
    }

    pub fn unmap(&mut self, table: &mut PageTable) -> Result<(), Errno> {
        match self.target {
            MapTarget::Identical => {
                for vpn in self.vpns() {
                    table.unmap(vpn)?;
                }
            }
            MapTarget::Framed { ref mut frames } => {
                for (vpn, _) in core::mem::take(frames) {
                    table.unmap(vpn)?;
                }
            }
        }
        Ok(())
    }

    pub fn map_one(&mut self, table: &mut PageTable, vpn: VirtPageNum) -> Result<(), Errno> {
        let ppn = match self.target {
            MapTarget::Identical => PhysPageNum(vpn.0),
            MapTarget::Framed { ref mut frames } => {
                let frame = Frame::alloc().ok_or(Errno::OutOfMemory)?;
                let ppn = frame.ppn();
                frames.insert(vpn, frame);
                ppn
            }
        };

        table.map(vpn, ppn, self.perm.into())
    }
}

/// An address space: one page table plus the areas that populate it.
pub struct MemorySet {
    pub table: PageTable,
    areas: Vec<MapArea>,
}

impl MemorySet {
    pub fn new_bare() -> Result<Self, Errno> {
        Ok(Self {
            table: PageTable::new()?,
            areas: Vec::new(),
        })
    }

    /// Empty user address space. On the target it already carries the kernel
    /// identity mappings so traps run without switching tables.
    pub fn new_user() -> Result<Self, Errno> {
        #[cfg(target_os = "none")]
        return Self::new_kernel();
        #[cfg(not(target_os = "none"))]
        return Self::new_bare();
    }

    pub fn push(&mut self, mut map_area: MapArea, data: Option<&[u8]>) -> Result<(), Errno> {
        if self.overlaps_identical(&map_area) {
            return Err(Errno::AlreadyMapped);
        }
        map_area.map(&mut self.table)?;
        let start = VirtAddr::from(map_area.start);
        self.areas.push(map_area);
        if let Some(data) = data {
            self.write(start, data)?;
        }
        Ok(())
    }

    /// Assume that no conflicts.
    pub fn insert_framed_area(
        &mut self,
        start_va: VirtAddr, end_va: VirtAddr, permission: MapPermission
    ) -> Result<(), Errno> {
        self.push(MapArea::framed(start_va, end_va, permission), None)
    }

    /// Maps one fresh page at `va`, which must be page aligned and unmapped.
    pub fn map_page(&mut self, va: VirtAddr, perm: MapPermission) -> Result<(), Errno> {
        if !va.is_aligned() {
            return Err(Errno::InvalidArgument);
        }
        if self.is_mapped(va) {
            return Err(Errno::AlreadyMapped);
        }
        let end = VirtAddr(va.0 + PAGE_SIZE);
        self.insert_framed_area(va, end, perm)
    }

    /// Removes a page mapped with `map_page` and releases its frame.
    pub fn unmap_page(&mut self, va: VirtAddr) -> Result<(), Errno> {
        let vpn = va.floor();
        let idx = self
            .areas
            .iter()
            .position(|area| area.start == vpn && area.end == vpn.next())
            .ok_or(Errno::NotMapped)?;
        let mut area = self.areas.remove(idx);
        area.unmap(&mut self.table)
    }

    fn overlaps_identical(&self, other: &MapArea) -> bool {
        self.areas.iter().any(|area| {
            matches!(area.target, MapTarget::Identical)
                && area.start < other.end
                && other.start < area.end
        })
    }

    pub fn is_mapped(&self, va: VirtAddr) -> bool {
        self.table.translate(va.floor()).is_some()
    }

    /// Resolves a user-space address to a kernel-accessible one.
    pub fn translate_user(&self, va: VirtAddr) -> Option<PhysAddr> {
        if !va.is_canonical() {
            return None;
        }
        let pte = self.table.translate(va.floor())?;
        if !pte.is_user() {
            return None;
        }
        self.table.translate_addr(va)
    }

    /// Copies `buf.len()` bytes out of user memory, one page at a time.
    pub fn copy_from_user(&self, va: VirtAddr, buf: &mut [u8]) -> Result<(), Errno> {
        let mut done = 0;
        while done < buf.len() {
            let cur = VirtAddr(va.0.checked_add(done).ok_or(Errno::BadAddress)?);
            let pa = self.translate_user(cur).ok_or(Errno::BadAddress)?;
            let chunk = (PAGE_SIZE - cur.page_offset()).min(buf.len() - done);
            let page = unsafe { pa.floor().bytes_array() };
            let off = pa.page_offset();
            buf[done..done + chunk].copy_from_slice(&page[off..off + chunk]);
            done += chunk;
        }
        Ok(())
    }

    pub fn read_user_u64(&self, va: VirtAddr) -> Result<u64, Errno> {
        let mut raw = [0u8; 8];
        self.copy_from_user(va, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Kernel-side write into mapped pages, ignoring the user permission bits.
    pub fn write(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), Errno> {
        let mut done = 0;
        while done < data.len() {
            let cur = VirtAddr(va.0.checked_add(done).ok_or(Errno::BadAddress)?);
            if !cur.is_canonical() {
                return Err(Errno::BadAddress);
            }
            let pa = self.table.translate_addr(cur).ok_or(Errno::NotMapped)?;
            let chunk = (PAGE_SIZE - cur.page_offset()).min(data.len() - done);
            let page = unsafe { pa.floor().bytes_array() };
            let off = pa.page_offset();
            page[off..off + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Deep copy for fork: every framed page gets a new frame with the same
    /// contents and the same page-table flags.
    pub fn fork_copy(&self) -> Result<Self, Errno> {
        let mut child = Self::new_user()?;
        for area in &self.areas {
            let MapTarget::Framed { ref frames } = area.target else {
                continue;
            };
            let mut copied = BTreeMap::new();
            for (vpn, frame) in frames {
                let flags = self.table.translate(*vpn).ok_or(Errno::NotMapped)?.flags();
                let new_frame = Frame::alloc().ok_or(Errno::OutOfMemory)?;
                unsafe {
                    new_frame
                        .ppn()
                        .bytes_array()
                        .copy_from_slice(frame.ppn().bytes_array());
                }
                child.table.map(*vpn, new_frame.ppn(), flags & !PTEFlags::V)?;
                copied.insert(*vpn, new_frame);
            }
            child.areas.push(MapArea {
                start: area.start,
                end: area.end,
                perm: area.perm,
                target: MapTarget::Framed { frames: copied },
            });
        }
        Ok(child)
    }

    /// Number of user pages this set owns frames for.
    pub fn framed_pages(&self) -> usize {
        self.areas
            .iter()
            .map(|area| match &area.target {
                MapTarget::Framed { frames } => frames.len(),
                MapTarget::Identical => 0,
            })
            .sum()
    }
}

impl SegmentMapper for MemorySet {
    fn map_segment(&mut self, vaddr: u64, memsz: u64, perm: MapPermission) -> Result<(), ElfError> {
        let end = vaddr.checked_add(memsz).ok_or(ElfError::Malformed)?;
        let start = VirtAddr(vaddr as usize);
        let last = VirtAddr(end.saturating_sub(1).max(vaddr) as usize);
        if !start.is_canonical() || !last.is_canonical() || last.0 >> 38 != start.0 >> 38 {
            return Err(ElfError::Malformed);
        }
        let area = MapArea::framed(start, VirtAddr(end as usize), perm | MapPermission::U);
        self.push(area, None).map_err(|err| match err {
            Errno::AlreadyMapped => ElfError::Malformed,
            _ => ElfError::Exhausted,
        })
    }

    fn write(&mut self, vaddr: u64, data: &[u8]) -> Result<(), ElfError> {
        MemorySet::write(self, VirtAddr(vaddr as usize), data).map_err(|_| ElfError::Malformed)
    }
}

#[cfg(target_os = "none")]
impl MemorySet {
    pub fn new_kernel() -> Result<Self, Errno> {
        use crate::consts::PHYS_MEMORY_END;

        let mut memory_set = Self::new_bare()?;

        extern "C" {
            fn _text_start();
            fn _text_end();
            fn _ro_start();
            fn _ro_end();
            fn _rw_start();
            fn _rw_end();
            fn _kernel_end();
        }

        log::trace!(".text [{:#x}, {:#x})", _text_start as usize, _text_end as usize);
        log::trace!(".rodata [{:#x}, {:#x})", _ro_start as usize, _ro_end as usize);
        log::trace!(".data + .bss [{:#x}, {:#x})", _rw_start as usize, _rw_end as usize);
        memory_set.push(MapArea::new(
            VirtAddr(_text_start as usize),
            VirtAddr(_text_end as usize),
            MapTarget::Identical,
            MapPermission::R | MapPermission::X,
        ), None)?;
        memory_set.push(MapArea::new(
            VirtAddr(_ro_start as usize),
            VirtAddr(_ro_end as usize),
            MapTarget::Identical,
            MapPermission::R,
        ), None)?;
        memory_set.push(MapArea::new(
            VirtAddr(_rw_start as usize),
            VirtAddr(_rw_end as usize),
            MapTarget::Identical,
            MapPermission::R | MapPermission::W,
        ), None)?;
        memory_set.push(MapArea::new(
            VirtAddr(_kernel_end as usize),
            VirtAddr(PHYS_MEMORY_END),
            MapTarget::Identical,
            MapPermission::R | MapPermission::W,
        ), None)?;

        // UART
        memory_set.push(MapArea::new(
            VirtAddr(0x1000_0000),
            VirtAddr(0x1000_1000),
            MapTarget::Identical,
            MapPermission::R | MapPermission::W,
        ), None)?;

        Ok(memory_set)
    }

    pub fn activate(&self) {
        log::trace!("Activating page table at {:#x}000", self.table.ppn().0);
        unsafe {
            use riscv::register::satp;
            satp::set(satp::Mode::Sv39, 0, self.table.ppn().into());
            riscv::asm::sfence_vma_all();
        }
    }
}

#[cfg(not(target_os = "none"))]
impl MemorySet {
    pub fn activate(&self) {}
}
