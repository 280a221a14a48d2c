//! ELF64 loading and global function symbol extraction.
//!
//! Everything is read through a [`ByteSource`], so the image never has to sit
//! in one contiguous buffer and no read goes past the source's extent.

use alloc::vec::Vec;
use core::fmt;
use enum_repr::EnumRepr;

use crate::consts::{SYMBOL_CAPACITY, SYMBOL_NAME_LEN};
use crate::mem::set::MapPermission;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_LITTLE: u8 = 1;
const EM_RISCV: u16 = 0xF3;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const STB_GLOBAL: u8 = 1;
const STT_FUNC: u8 = 2;
const GLOBAL_FUNC: u8 = STB_GLOBAL << 4 | STT_FUNC;

/// Segment contents are copied through a buffer of this size.
const COPY_CHUNK: usize = 512;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ElfError {
    /// Short read from the source.
    Io,
    NotElf,
    /// Inconsistent sizes, overflowing ranges, unsupported class.
    Malformed,
    /// A bounded table or the mapper ran out of room.
    Exhausted,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ElfError::Io => "short read from ELF source",
            ElfError::NotElf => "not an ELF image",
            ElfError::Malformed => "malformed ELF image",
            ElfError::Exhausted => "out of room while loading ELF",
        };
        f.write_str(text)
    }
}

/// Random-access byte source an image is read from.
pub trait ByteSource {
    fn len(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset`; returns how many were read.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ElfError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ElfError> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= <[u8]>::len(self) {
            return Ok(0);
        }
        let n = buf.len().min(<[u8]>::len(self) - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ElfError> {
        self.as_slice().read_at(offset, buf)
    }
}

/// Destination for loadable segments.
pub trait SegmentMapper {
    /// Makes `[vaddr, vaddr + memsz)` writable memory with the given permission.
    fn map_segment(&mut self, vaddr: u64, memsz: u64, perm: MapPermission) -> Result<(), ElfError>;

    fn write(&mut self, vaddr: u64, data: &[u8]) -> Result<(), ElfError>;
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[EnumRepr(type = "u32")]
pub enum ProgramType {
    Null = 0,
    Load = 1,
    Dynamic = 2,
    Interp = 3,
    Note = 4,
    Phdr = 6,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[EnumRepr(type = "u32")]
pub enum SectionType {
    Null = 0,
    ProgBits = 1,
    SymTab = 2,
    StrTab = 3,
    Rela = 4,
    NoBits = 8,
}

fn u16_at(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(raw)
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(raw)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl ElfHeader {
    fn parse(raw: &[u8; EHDR_SIZE]) -> Result<Self, ElfError> {
        if raw[..4] != ELF_MAGIC {
            return Err(ElfError::NotElf);
        }
        if raw[4] != ELF_CLASS_64 || raw[5] != ELF_DATA_LITTLE {
            return Err(ElfError::Malformed);
        }
        if u16_at(raw, 18) != EM_RISCV {
            return Err(ElfError::Malformed);
        }
        Ok(Self {
            entry: u64_at(raw, 24),
            phoff: u64_at(raw, 32),
            shoff: u64_at(raw, 40),
            phentsize: u16_at(raw, 54),
            phnum: u16_at(raw, 56),
            shentsize: u16_at(raw, 58),
            shnum: u16_at(raw, 60),
            shstrndx: u16_at(raw, 62),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl ProgramHeader {
    fn parse(raw: &[u8]) -> Self {
        Self {
            p_type: u32_at(raw, 0),
            flags: u32_at(raw, 4),
            offset: u64_at(raw, 8),
            vaddr: u64_at(raw, 16),
            filesz: u64_at(raw, 32),
            memsz: u64_at(raw, 40),
        }
    }

    pub fn is_load(&self) -> bool {
        ProgramType::from_repr(self.p_type) == Some(ProgramType::Load)
    }

    pub fn permission(&self) -> MapPermission {
        let mut perm = MapPermission::empty();
        if self.flags & PF_R != 0 {
            perm |= MapPermission::R;
        }
        if self.flags & PF_W != 0 {
            perm |= MapPermission::W;
        }
        if self.flags & PF_X != 0 {
            perm |= MapPermission::X;
        }
        perm
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub offset: u64,
    pub size: u64,
}

impl SectionHeader {
    fn parse(raw: &[u8]) -> Self {
        Self {
            name: u32_at(raw, 0),
            sh_type: u32_at(raw, 4),
            offset: u64_at(raw, 24),
            size: u64_at(raw, 32),
        }
    }
}

#[derive(Debug)]
pub struct Sym {
    pub name: u32,
    pub info: u8,
    pub value: u64,
    pub size: u64,
}

impl Sym {
    fn parse(raw: &[u8]) -> Self {
        Self {
            name: u32_at(raw, 0),
            info: raw[4],
            value: u64_at(raw, 8),
            size: u64_at(raw, 16),
        }
    }
}

/// A global function: its name (truncated to `SYMBOL_NAME_LEN` bytes) and
/// address range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    name: [u8; SYMBOL_NAME_LEN],
    name_len: usize,
    pub value: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(name: &[u8], value: u64, size: u64) -> Self {
        let len = name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(name.len())
            .min(SYMBOL_NAME_LEN);
        let mut buf = [0u8; SYMBOL_NAME_LEN];
        buf[..len].copy_from_slice(&name[..len]);
        Self {
            name: buf,
            name_len: len,
            value,
            size,
        }
    }

    pub fn name(&self) -> &str {
        let raw = &self.name[..self.name_len];
        match core::str::from_utf8(raw) {
            Ok(name) => name,
            Err(err) => core::str::from_utf8(&raw[..err.valid_up_to()]).unwrap_or(""),
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.value && addr - self.value < self.size
    }
}

/// Bounded table of global functions, built once per loaded image.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, symbol: Symbol) -> Result<(), ElfError> {
        if self.symbols.len() >= SYMBOL_CAPACITY {
            return Err(ElfError::Exhausted);
        }
        self.symbols.push(symbol);
        Ok(())
    }

    pub fn resolve(&self, addr: u64) -> Option<&Symbol> {
        self.symbols.iter().find(|sym| sym.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

/// Loading state for one image: the header read by `init`, the header tables
/// filled in as `load` and `symbols` walk them.
pub struct ElfContext<S: ByteSource> {
    source: S,
    pub header: ElfHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub section_headers: Vec<SectionHeader>,
}

impl<S: ByteSource> ElfContext<S> {
    pub fn init(mut source: S) -> Result<Self, ElfError> {
        let mut raw = [0u8; EHDR_SIZE];
        read_exact_at(&mut source, 0, &mut raw)?;
        let header = ElfHeader::parse(&raw)?;
        Ok(Self {
            source,
            header,
            program_headers: Vec::new(),
            section_headers: Vec::new(),
        })
    }

    pub fn entry(&self) -> u64 {
        self.header.entry
    }

    /// Maps every loadable segment at its linked address and copies its file
    /// bytes in.
    pub fn load<M: SegmentMapper + ?Sized>(&mut self, mapper: &mut M) -> Result<(), ElfError> {
        self.read_program_headers()?;
        for ph in self.program_headers.clone().iter().filter(|ph| ph.is_load()) {
            if ph.memsz < ph.filesz {
                return Err(ElfError::Malformed);
            }
            if ph.vaddr.checked_add(ph.memsz).is_none() {
                return Err(ElfError::Malformed);
            }
            log::debug!(
                "[Loader] segment {:#x}+{:#x} (file {:#x}@{:#x})",
                ph.vaddr,
                ph.memsz,
                ph.filesz,
                ph.offset
            );
            mapper.map_segment(ph.vaddr, ph.memsz, ph.permission())?;
            self.copy_segment(ph, mapper)?;
        }
        Ok(())
    }

    fn copy_segment<M: SegmentMapper + ?Sized>(
        &mut self,
        ph: &ProgramHeader,
        mapper: &mut M,
    ) -> Result<(), ElfError> {
        let end = ph.offset.checked_add(ph.filesz).ok_or(ElfError::Malformed)?;
        if end > self.source.len() {
            return Err(ElfError::Io);
        }
        let mut chunk = [0u8; COPY_CHUNK];
        let mut done = 0u64;
        while done < ph.filesz {
            let n = (ph.filesz - done).min(COPY_CHUNK as u64) as usize;
            read_exact_at(&mut self.source, ph.offset + done, &mut chunk[..n])?;
            mapper.write(ph.vaddr + done, &chunk[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    fn read_program_headers(&mut self) -> Result<(), ElfError> {
        let h = self.header;
        if h.phnum > 0 && (h.phentsize as usize) < PHDR_SIZE {
            return Err(ElfError::Malformed);
        }
        let mut headers = Vec::with_capacity(h.phnum as usize);
        let mut raw = [0u8; PHDR_SIZE];
        for i in 0..h.phnum as u64 {
            let off = table_entry(h.phoff, h.phentsize, i)?;
            read_exact_at(&mut self.source, off, &mut raw)?;
            headers.push(ProgramHeader::parse(&raw));
        }
        self.program_headers = headers;
        Ok(())
    }

    fn read_section_headers(&mut self) -> Result<(), ElfError> {
        let h = self.header;
        if h.shnum > 0 && (h.shentsize as usize) < SHDR_SIZE {
            return Err(ElfError::Malformed);
        }
        let mut headers = Vec::with_capacity(h.shnum as usize);
        let mut raw = [0u8; SHDR_SIZE];
        for i in 0..h.shnum as u64 {
            let off = table_entry(h.shoff, h.shentsize, i)?;
            read_exact_at(&mut self.source, off, &mut raw)?;
            headers.push(SectionHeader::parse(&raw));
        }
        self.section_headers = headers;
        Ok(())
    }

    /// Reads the NUL-terminated string at `index` of a string-table section,
    /// at most `SYMBOL_NAME_LEN` bytes and never past the section or source.
    fn read_name(&mut self, table: &SectionHeader, index: u32) -> Result<Symbol, ElfError> {
        let mut buf = [0u8; SYMBOL_NAME_LEN];
        let index = index as u64;
        if index >= table.size {
            return Err(ElfError::Malformed);
        }
        let at = table.offset.checked_add(index).ok_or(ElfError::Malformed)?;
        let avail = (table.size - index).min(self.source.len().saturating_sub(at));
        let n = avail.min(SYMBOL_NAME_LEN as u64) as usize;
        read_exact_at(&mut self.source, at, &mut buf[..n])?;
        Ok(Symbol::new(&buf[..n], 0, 0))
    }

    /// Collects every global function symbol from `.symtab`, naming them from
    /// `.strtab`.
    pub fn symbols(&mut self) -> Result<SymbolTable, ElfError> {
        self.read_section_headers()?;
        let mut table = SymbolTable::new();
        if self.section_headers.is_empty() {
            return Ok(table);
        }
        let shstr = *self
            .section_headers
            .get(self.header.shstrndx as usize)
            .ok_or(ElfError::Malformed)?;

        let mut symtab = None;
        let mut strtab = None;
        for sh in self.section_headers.clone() {
            match SectionType::from_repr(sh.sh_type) {
                Some(SectionType::SymTab) => symtab = Some(sh),
                Some(SectionType::StrTab) => {
                    if self.read_name(&shstr, sh.name)?.name() == ".strtab" {
                        strtab = Some(sh);
                    }
                }
                _ => {}
            }
        }
        let (Some(symtab), Some(strtab)) = (symtab, strtab) else {
            log::warn!("[Loader] no .symtab/.strtab, backtraces will be unresolved");
            return Ok(table);
        };

        let mut raw = [0u8; SYM_SIZE];
        for i in 0..symtab.size / SYM_SIZE as u64 {
            read_exact_at(&mut self.source, symtab.offset + i * SYM_SIZE as u64, &mut raw)?;
            let sym = Sym::parse(&raw);
            if sym.name == 0 || sym.info != GLOBAL_FUNC {
                continue;
            }
            let named = self.read_name(&strtab, sym.name)?;
            table.push(Symbol { value: sym.value, size: sym.size, ..named })?;
        }
        log::info!("[Loader] {} function symbols", table.len());
        Ok(table)
    }
}

fn table_entry(base: u64, entsize: u16, index: u64) -> Result<u64, ElfError> {
    (entsize as u64)
        .checked_mul(index)
        .and_then(|off| base.checked_add(off))
        .ok_or(ElfError::Malformed)
}

fn read_exact_at<S: ByteSource + ?Sized>(source: &mut S, offset: u64, buf: &mut [u8]) -> Result<(), ElfError> {
    let mut done = 0;
    while done < buf.len() {
        let n = source.read_at(offset + done as u64, &mut buf[done..])?;
        if n == 0 {
            return Err(ElfError::Io);
        }
        done += n;
    }
    Ok(())
}
