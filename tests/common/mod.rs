#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use spindle_os::elf::{ByteSource, ElfError};
use spindle_os::kernel::Kernel;
use spindle_os::process::Pid;
use spindle_os::trap::{self, SourceFiles, TimerControl, TrapFrame, TrapOutcome, A0};

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const GLOBAL_FUNC: u8 = 0x12;
pub const LOCAL_FUNC: u8 = 0x02;

pub struct Segment {
    pub vaddr: u64,
    pub flags: u32,
    pub data: Vec<u8>,
    pub memsz: u64,
}

pub struct Func {
    pub name: &'static str,
    pub value: u64,
    pub size: u64,
    pub info: u8,
}

/// Assembles a little-endian ELF64 executable with the given segments and,
/// when `symbols` is non-empty, `.symtab`/`.strtab` sections.
#[derive(Default)]
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<Func>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            ..Default::default()
        }
    }

    pub fn segment(mut self, vaddr: u64, flags: u32, data: &[u8], memsz: u64) -> Self {
        self.segments.push(Segment {
            vaddr,
            flags,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    pub fn function(mut self, name: &'static str, value: u64, size: u64) -> Self {
        self.symbols.push(Func {
            name,
            value,
            size,
            info: GLOBAL_FUNC,
        });
        self
    }

    pub fn symbol(mut self, name: &'static str, value: u64, size: u64, info: u8) -> Self {
        self.symbols.push(Func {
            name,
            value,
            size,
            info,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut image = vec![0u8; 64 + phnum * 56];

        let mut offsets = Vec::new();
        for seg in &self.segments {
            offsets.push(image.len() as u64);
            image.extend_from_slice(&seg.data);
        }
        for (i, seg) in self.segments.iter().enumerate() {
            let ph = 64 + i * 56;
            put32(&mut image, ph, 1);
            put32(&mut image, ph + 4, seg.flags);
            put64(&mut image, ph + 8, offsets[i]);
            put64(&mut image, ph + 16, seg.vaddr);
            put64(&mut image, ph + 24, seg.vaddr);
            put64(&mut image, ph + 32, seg.data.len() as u64);
            put64(&mut image, ph + 40, seg.memsz);
            put64(&mut image, ph + 48, 0x1000);
        }

        let mut shnum = 0u16;
        let mut shoff = 0u64;
        if !self.symbols.is_empty() {
            let shstrtab = b"\0.shstrtab\0.strtab\0.symtab\0";
            let shstr_off = image.len() as u64;
            image.extend_from_slice(shstrtab);

            let str_off = image.len() as u64;
            let mut strtab = vec![0u8];
            let mut name_idx = Vec::new();
            for sym in &self.symbols {
                name_idx.push(strtab.len() as u32);
                strtab.extend_from_slice(sym.name.as_bytes());
                strtab.push(0);
            }
            image.extend_from_slice(&strtab);

            while image.len() % 8 != 0 {
                image.push(0);
            }
            let sym_off = image.len() as u64;
            image.extend_from_slice(&[0u8; 24]);
            for (sym, name) in self.symbols.iter().zip(&name_idx) {
                let mut raw = [0u8; 24];
                raw[..4].copy_from_slice(&name.to_le_bytes());
                raw[4] = sym.info;
                raw[6..8].copy_from_slice(&1u16.to_le_bytes());
                raw[8..16].copy_from_slice(&sym.value.to_le_bytes());
                raw[16..24].copy_from_slice(&sym.size.to_le_bytes());
                image.extend_from_slice(&raw);
            }
            let sym_size = (self.symbols.len() as u64 + 1) * 24;

            while image.len() % 8 != 0 {
                image.push(0);
            }
            shoff = image.len() as u64;
            let sections: [(u32, u32, u64, u64); 4] = [
                (0, 0, 0, 0),
                (1, 3, shstr_off, shstrtab.len() as u64),
                (11, 3, str_off, strtab.len() as u64),
                (19, 2, sym_off, sym_size),
            ];
            for (name, kind, off, size) in sections {
                let mut raw = [0u8; 64];
                raw[..4].copy_from_slice(&name.to_le_bytes());
                raw[4..8].copy_from_slice(&kind.to_le_bytes());
                raw[24..32].copy_from_slice(&off.to_le_bytes());
                raw[32..40].copy_from_slice(&size.to_le_bytes());
                image.extend_from_slice(&raw);
            }
            shnum = 4;
        }

        image[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        image[4] = 2;
        image[5] = 1;
        image[6] = 1;
        put16(&mut image, 16, 2);
        put16(&mut image, 18, 0xF3);
        put32(&mut image, 20, 1);
        put64(&mut image, 24, self.entry);
        put64(&mut image, 32, 64);
        put64(&mut image, 40, shoff);
        put16(&mut image, 52, 64);
        put16(&mut image, 54, 56);
        put16(&mut image, 56, phnum as u16);
        put16(&mut image, 58, 64);
        put16(&mut image, 60, shnum);
        put16(&mut image, 62, if shnum > 0 { 1 } else { 0 });
        image
    }
}

fn put16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Byte source that records the furthest byte any read touched.
pub struct TrackedSource {
    bytes: Vec<u8>,
    pub furthest: Rc<Cell<u64>>,
}

impl TrackedSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            furthest: Rc::new(Cell::new(0)),
        }
    }
}

impl ByteSource for TrackedSource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ElfError> {
        let start = offset as usize;
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        self.furthest.set(self.furthest.get().max(offset + n as u64));
        Ok(n)
    }
}

/// A small program: text at 0x10000, data at 0x11000 with trailing bss.
pub fn sample_program() -> ElfBuilder {
    ElfBuilder::new(0x10000)
        .segment(0x10000, PF_R | PF_X, &[0x13, 0x00, 0x00, 0x00, 0x73, 0x00, 0x00, 0x00], 8)
        .segment(0x11000, PF_R | PF_W, b"hello\0", 0x2000)
        .function("main", 0x10000, 0x40)
        .function("helper", 0x10040, 0x20)
        .symbol("local_fn", 0x10060, 0x10, LOCAL_FUNC)
}

/// Timer and file access stand-in that counts what the dispatcher asks for.
#[derive(Default)]
pub struct MockBoard {
    pub timers_set: usize,
    pub soft_pending: bool,
    pub files: Vec<(String, Vec<u8>)>,
}

impl MockBoard {
    pub fn with_file(path: &str, text: &str) -> Self {
        Self {
            files: vec![(path.to_string(), text.as_bytes().to_vec())],
            ..Default::default()
        }
    }
}

impl TimerControl for MockBoard {
    fn set_next_timer(&mut self) {
        self.timers_set += 1;
    }

    fn raise_soft_interrupt(&mut self) {
        self.soft_pending = true;
    }

    fn clear_soft_interrupt(&mut self) {
        self.soft_pending = false;
    }
}

impl SourceFiles for MockBoard {
    fn open(&mut self, path: &str) -> Option<Box<dyn ByteSource>> {
        self.files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, bytes)| Box::new(bytes.clone()) as Box<dyn ByteSource>)
    }
}

pub const ECALL_CAUSE: usize = 8;

/// Issues syscall `number` from whatever context `tf` holds.
pub fn ecall(
    kernel: &mut Kernel,
    tf: &mut TrapFrame,
    out: &mut String,
    number: usize,
    args: &[usize],
) -> TrapOutcome {
    tf.scause = ECALL_CAUSE;
    tf.x[A0] = number;
    for (i, arg) in args.iter().enumerate() {
        tf.x[A0 + 1 + i] = *arg;
    }
    trap::handle(kernel, tf, &mut MockBoard::default(), out)
}

/// Kernel with the sample program loaded and running in `tf`.
pub fn booted() -> (Kernel, TrapFrame, Pid) {
    let mut kernel = Kernel::new();
    let image = sample_program().build();
    kernel.load_program(image.as_slice()).expect("boot");
    let mut tf = TrapFrame::default();
    let pid = kernel.start(&mut tf).expect("start");
    (kernel, tf, pid)
}
