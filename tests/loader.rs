mod common;

use common::{sample_program, ElfBuilder, TrackedSource, PF_R, PF_W, PF_X};
use spindle_os::consts::{USER_STACK_PAGES, USER_STACK_TOP};
use spindle_os::elf::{ElfContext, ElfError};
use spindle_os::kernel::{BootError, Kernel};
use spindle_os::mem::addr::VirtAddr;
use spindle_os::process::{Process, Status};

#[test]
fn segments_land_at_linked_addresses() {
    let image = ElfBuilder::new(0x10000)
        .segment(0x10000, PF_R | PF_X, &[0xaa; 0x1800], 0x1800)
        .segment(0x20010, PF_R | PF_W, b"data bytes", 0x3000)
        .build();
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    let proc = Process::new_user(&mut elf).expect("load");

    let mut text = vec![0u8; 0x1800];
    proc.mset.copy_from_user(VirtAddr(0x10000), &mut text).expect("text");
    assert!(text.iter().all(|b| *b == 0xaa));

    let mut data = [0u8; 10];
    proc.mset.copy_from_user(VirtAddr(0x20010), &mut data).expect("data");
    assert_eq!(&data, b"data bytes");

    let mut bss = [0xffu8; 16];
    proc.mset.copy_from_user(VirtAddr(0x20100), &mut bss).expect("bss");
    assert_eq!(bss, [0u8; 16]);

    assert_eq!(proc.tf.sepc, 0x10000);
    assert_eq!(proc.segments.code, 2);
    assert_eq!(proc.segments.data, 4);
    assert_eq!(proc.segments.stack, USER_STACK_PAGES);
    assert!(proc.mset.is_mapped(VirtAddr(USER_STACK_TOP - 8)));
}

#[test]
fn loading_never_reads_past_the_source() {
    let image = sample_program().build();
    let len = image.len() as u64;
    let source = TrackedSource::new(image);
    let furthest = source.furthest.clone();

    let mut elf = ElfContext::init(source).expect("init");
    Process::new_user(&mut elf).expect("load");
    elf.symbols().expect("symbols");
    assert!(furthest.get() <= len);
}

#[test]
fn truncated_segment_is_an_io_error() {
    let mut image = ElfBuilder::new(0x10000)
        .segment(0x10000, PF_R | PF_X, &[1; 64], 64)
        .build();
    image.truncate(64 + 56 + 10);
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    assert_eq!(Process::new_user(&mut elf).err(), Some(ElfError::Io));
}

#[test]
fn bad_images_are_rejected() {
    let mut image = sample_program().build();
    image[1] = b'X';
    assert_eq!(ElfContext::init(image.as_slice()).err(), Some(ElfError::NotElf));

    let image = ElfBuilder::new(0x10000)
        .segment(0x10000, PF_R, &[0; 32], 16)
        .build();
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    assert_eq!(Process::new_user(&mut elf).err(), Some(ElfError::Malformed));
}

#[test]
fn only_global_functions_are_collected() {
    let image = sample_program().build();
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    let symbols = elf.symbols().expect("symbols");

    let names: Vec<_> = symbols.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["main", "helper"]);
    assert_eq!(symbols.resolve(0x10048).map(|s| s.name()), Some("helper"));
    assert_eq!(symbols.resolve(0x10000).map(|s| s.name()), Some("main"));
    assert!(symbols.resolve(0x10064).is_none());
}

#[test]
fn image_without_symbols_has_empty_table() {
    let image = ElfBuilder::new(0x10000)
        .segment(0x10000, PF_R | PF_X, &[0; 8], 8)
        .build();
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    assert!(elf.symbols().expect("symbols").is_empty());
}

#[test]
fn kernel_boots_one_ready_process() {
    let image = sample_program().build();
    let mut kernel = Kernel::new();
    let pid = kernel.load_program(image.as_slice()).expect("boot");
    assert_eq!(kernel.sched.status(pid), Status::Ready);
    assert_eq!(kernel.symbols.len(), 2);

    assert_eq!(
        kernel.load_program(&[b'x'; 64][..]),
        Err(BootError::Elf(ElfError::NotElf))
    );
}

#[test]
fn segment_outside_the_sv39_range_is_malformed() {
    let image = ElfBuilder::new(0x10000)
        .segment((1 << 39) | 0x10000, PF_R | PF_X, &[0x13; 8], 8)
        .build();
    let mut elf = ElfContext::init(image.as_slice()).expect("init");
    assert_eq!(Process::new_user(&mut elf).err(), Some(ElfError::Malformed));
}
