//! Address-to-source tables used to annotate fatal faults.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::elf::ByteSource;
use crate::trap::SourceFiles;

/// Longest source line echoed back in a fault report.
const MAX_LINE: usize = 256;
const READ_CHUNK: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub dir: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineEntry {
    pub addr: u64,
    pub file: usize,
    pub line: usize,
}

/// Per-process line table: directories, files and address rows ordered by
/// address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugLine {
    pub dirs: Vec<String>,
    pub files: Vec<FileEntry>,
    pub lines: Vec<LineEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: usize,
}

impl DebugLine {
    /// Row whose address is exactly `addr`, resolved to `dir/file`.
    pub fn lookup(&self, addr: u64) -> Option<SourceLocation> {
        let row = self.lines.iter().find(|row| row.addr == addr)?;
        let file = self.files.get(row.file)?;
        let dir = self.dirs.get(file.dir)?;
        let mut path = String::with_capacity(dir.len() + file.name.len() + 1);
        path.push_str(dir);
        path.push('/');
        path.push_str(&file.name);
        Some(SourceLocation {
            path,
            line: row.line,
        })
    }
}

/// Prints `Runtime error at <path>:<line>` and the offending source line.
/// Any failure along the way just means no annotation.
pub fn annotate<F: SourceFiles + ?Sized>(
    table: &DebugLine,
    addr: u64,
    files: &mut F,
    out: &mut dyn Write,
) -> Option<SourceLocation> {
    let location = table.lookup(addr)?;
    let mut source = files.open(&location.path)?;
    let text = read_line(source.as_mut(), location.line)?;
    let _ = writeln!(out, "Runtime error at {}:{}\n{}", location.path, location.line, text);
    Some(location)
}

/// Streams through `source` to the 1-based `line`, keeping at most
/// `MAX_LINE` bytes of it.
fn read_line(source: &mut dyn ByteSource, line: usize) -> Option<String> {
    if line == 0 {
        return None;
    }
    let mut row = 1;
    let mut offset = 0u64;
    let mut text = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = source.read_at(offset, &mut chunk).ok()?;
        if n == 0 {
            break;
        }
        offset += n as u64;
        for &b in &chunk[..n] {
            if b == b'\n' {
                if row == line {
                    return Some(String::from_utf8_lossy(&text).into_owned());
                }
                row += 1;
            } else if row == line && text.len() < MAX_LINE {
                text.push(b);
            }
        }
    }
    (row == line).then(|| String::from_utf8_lossy(&text).into_owned())
}
