//! ELF loader and argv marshaller (spec.md §4.3, §6 "ELF acceptance").
//!
//! Parses just enough of the ELF64 format to validate the header and
//! `PT_LOAD` program headers and register lazy file-backed SPT entries for
//! them — section headers, symbol tables, relocations, and every other
//! record layout ELF defines are out of scope (spec.md §1).

extern crate alloc;

use alloc::{sync::Arc, vec::Vec};

use crate::error::{KernelError, KernelResult};
use crate::fs::FileHandle;
use crate::mm::{
    fault::handle_page_fault,
    file_backed::FileBackedPage,
    page_round_down,
    spt::{PageKind, SptEntry},
    is_page_aligned, PGSIZE, USER_STACK,
};
use crate::sched::thread::Thread;

/// Bytes 0..7 of `e_ident` (spec.md §6: `\x7FELF\2\1\1` — class 64-bit,
/// data little-endian, version 1).
const ELF_MAGIC: [u8; 7] = [0x7F, b'E', b'L', b'F', 2, 1, 1];
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3E;
const EV_CURRENT: u32 = 1;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_SHLIB: u32 = 5;

bitflags::bitflags! {
    /// `p_flags` permission bits (ELF64 spec; only `W` affects this loader
    /// — execute permission is not enforced since this kernel has no W^X
    /// policy to speak of, spec.md §1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SegmentFlags: u32 {
        const EXECUTE = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// Maximum program headers this loader will parse (spec.md §4.3, §6).
const MAX_PHNUM: u16 = 1024;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

#[derive(Debug, Clone, Copy)]
struct ElfHeader {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

/// Validate the ELF64 header (spec.md §4.3: "magic bytes, 64-bit
/// little-endian AMD64, version 1, program-header entry size,
/// program-header count ≤ 1024").
fn validate_header(buf: &[u8]) -> KernelResult<ElfHeader> {
    if buf.len() < EHDR_SIZE || buf[0..7] != ELF_MAGIC {
        return Err(KernelError::BadElf);
    }
    let e_type = read_u16(buf, 16);
    let e_machine = read_u16(buf, 18);
    let e_version = read_u32(buf, 20);
    if e_type != ET_EXEC || e_machine != EM_X86_64 || e_version != EV_CURRENT {
        return Err(KernelError::BadElf);
    }
    let e_entry = read_u64(buf, 24);
    let e_phoff = read_u64(buf, 32);
    let e_phentsize = read_u16(buf, 54);
    let e_phnum = read_u16(buf, 56);
    if e_phentsize as usize != PHDR_SIZE || e_phnum > MAX_PHNUM {
        return Err(KernelError::BadElf);
    }
    Ok(ElfHeader {
        e_entry,
        e_phoff,
        e_phentsize,
        e_phnum,
    })
}

fn parse_program_header(buf: &[u8]) -> ProgramHeader {
    ProgramHeader {
        p_type: read_u32(buf, 0),
        p_flags: read_u32(buf, 4),
        p_offset: read_u64(buf, 8),
        p_vaddr: read_u64(buf, 16),
        p_filesz: read_u64(buf, 32),
        p_memsz: read_u64(buf, 40),
    }
}

/// Validate one `PT_LOAD` segment (spec.md §4.3): `p_offset`/`p_vaddr`
/// share a page offset, the whole memory range fits below the stack
/// without wrapping or touching page 0, and `p_memsz >= p_filesz`.
fn validate_load_segment(ph: &ProgramHeader) -> KernelResult<()> {
    if ph.p_memsz < ph.p_filesz {
        return Err(KernelError::BadElf);
    }
    if ph.p_offset % PGSIZE as u64 != ph.p_vaddr % PGSIZE as u64 {
        return Err(KernelError::BadElf);
    }
    let end = ph
        .p_vaddr
        .checked_add(ph.p_memsz)
        .ok_or(KernelError::BadElf)?;
    if ph.p_vaddr < PGSIZE as u64 || end > USER_STACK {
        return Err(KernelError::BadElf);
    }
    Ok(())
}

/// Load `handle` (the already-opened executable) into `thread`: validate
/// the header and program headers, register a lazy file-backed SPT entry
/// per page of each accepted `PT_LOAD` segment, mark the executable
/// deny-write, and install the initial stack page. Returns the ELF entry
/// point.
pub fn load(thread: &mut Thread, handle: Arc<dyn FileHandle>) -> KernelResult<u64> {
    let len = handle.length() as usize;
    let mut buf = alloc::vec![0u8; len];
    handle.seek(0);
    handle.read(&mut buf);

    let header = validate_header(&buf)?;

    let spt = thread
        .spt
        .as_mut()
        .ok_or(KernelError::Fatal("elf load on a thread with no SPT"))?;

    for i in 0..header.e_phnum {
        let off = header.e_phoff as usize + i as usize * header.e_phentsize as usize;
        if off + PHDR_SIZE > buf.len() {
            return Err(KernelError::BadElf);
        }
        let ph = parse_program_header(&buf[off..off + PHDR_SIZE]);

        match ph.p_type {
            PT_LOAD => {
                validate_load_segment(&ph)?;
                register_segment(spt, &handle, &ph)?;
            }
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => {
                return Err(KernelError::UnsupportedElfSegment);
            }
            _ => {} // ignored (spec.md §4.3: "others are ignored")
        }
    }

    handle.deny_write();
    thread.executable = Some(handle);

    let stack_vpage = USER_STACK - PGSIZE as u64;
    spt.insert(SptEntry::new_anon_stack(stack_vpage))
        .map_err(|_| KernelError::Fatal("elf load: stack page already mapped"))?;

    Ok(header.e_entry)
}

/// Register one `PT_LOAD` segment as a run of page-aligned, lazy
/// file-backed SPT entries (spec.md §4.3): `(file, offset, read-bytes,
/// zero-bytes, writable)` per page.
fn register_segment(
    spt: &mut crate::mm::spt::SupplementalPageTable,
    handle: &Arc<dyn FileHandle>,
    ph: &ProgramHeader,
) -> KernelResult<()> {
    let writable = SegmentFlags::from_bits_truncate(ph.p_flags).contains(SegmentFlags::WRITE);
    let page_vaddr = page_round_down(ph.p_vaddr);
    let leading_pad = ph.p_vaddr - page_vaddr;
    let total_memsz = ph.p_memsz + leading_pad;
    let total_filesz = ph.p_filesz + leading_pad;
    let page_count = (total_memsz + PGSIZE as u64 - 1) / PGSIZE as u64;
    let file_start_offset = ph.p_offset - leading_pad;

    for i in 0..page_count {
        let vpage = page_vaddr + i * PGSIZE as u64;
        let page_file_offset = file_start_offset + i * PGSIZE as u64;
        let consumed = i * PGSIZE as u64;
        let read_bytes = if consumed >= total_filesz {
            0
        } else {
            core::cmp::min(PGSIZE as u64, total_filesz - consumed) as u32
        };
        let zero_bytes = PGSIZE as u32 - read_bytes;

        let page_handle = handle.reopen();
        let init: crate::mm::spt::Initializer = Arc::new(move || {
            PageKind::File(FileBackedPage::new(
                page_handle.clone(),
                page_file_offset,
                read_bytes,
                zero_bytes,
            ))
        });

        if spt.contains(vpage) {
            continue; // segments may legitimately share a page's tail/head
        }
        spt.insert(SptEntry::new_uninit(vpage, writable, init))
            .map_err(|_| KernelError::Fatal("elf load: duplicate segment page"))?;
    }
    Ok(())
}

/// Argv marshalling onto the initial user stack (spec.md §4.3, §6 "User
/// stack image after exec"). Writes directly into the stack page's frame
/// content, forcing it resident first via the ordinary fault path.
/// Returns `(user_sp, argc, argv_ptr)`.
pub fn marshal_argv(thread: &mut Thread, tokens: &[alloc::string::String]) -> KernelResult<(u64, u32, u64)> {
    let vpage = USER_STACK - PGSIZE as u64;
    handle_page_fault(thread, vpage, true, USER_STACK)?;
    let frame_id = thread
        .spt
        .as_ref()
        .unwrap()
        .lookup(vpage)
        .and_then(|e| e.frame)
        .ok_or(KernelError::Fatal("marshal_argv: stack page did not load"))?;

    let mut vm = crate::mm::VM.lock();
    let content = vm.frames.content_mut(frame_id);

    let mut sp = USER_STACK;
    let write = |content: &mut [u8; PGSIZE], sp: &mut u64, bytes: &[u8]| -> KernelResult<()> {
        let new_sp = sp
            .checked_sub(bytes.len() as u64)
            .filter(|&s| s >= vpage)
            .ok_or(KernelError::BadUserPointer { addr: *sp as usize })?;
        let off = (new_sp - vpage) as usize;
        content[off..off + bytes.len()].copy_from_slice(bytes);
        *sp = new_sp;
        Ok(())
    };

    let mut addrs = Vec::with_capacity(tokens.len());
    for tok in tokens.iter().rev() {
        let mut bytes = Vec::with_capacity(tok.len() + 1);
        bytes.extend_from_slice(tok.as_bytes());
        bytes.push(0);
        write(content, &mut sp, &bytes)?;
        addrs.push(sp);
    }
    addrs.reverse();

    while sp % 8 != 0 {
        write(content, &mut sp, &[0u8])?;
    }

    write(content, &mut sp, &0u64.to_le_bytes())?;

    for &addr in addrs.iter().rev() {
        write(content, &mut sp, &addr.to_le_bytes())?;
    }
    let argv_ptr = sp;

    write(content, &mut sp, &0u64.to_le_bytes())?;

    Ok((sp, tokens.len() as u32, argv_ptr))
}
