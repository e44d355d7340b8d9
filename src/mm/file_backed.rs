//! File-backed page payload and its swap-out/swap-in/destroy operations
//! (spec.md §3 "file-backed", §4.5 "File backing").

extern crate alloc;

use alloc::sync::Arc;

use crate::fs::FileHandle;

use super::PGSIZE;

/// Kind-specific payload for a file-backed page (spec.md §3): which file,
/// at what offset, how many bytes come from the file versus are
/// zero-filled. `mmap_page_count` is only `Some` on the first page of an
/// mmap region (spec.md §4.5 mmap), letting munmap unwind the whole run.
pub struct FileBackedPage {
    pub handle: Arc<dyn FileHandle>,
    pub offset: u64,
    pub read_bytes: u32,
    pub zero_bytes: u32,
}

impl FileBackedPage {
    pub fn new(handle: Arc<dyn FileHandle>, offset: u64, read_bytes: u32, zero_bytes: u32) -> Self {
        Self {
            handle,
            offset,
            read_bytes,
            zero_bytes,
        }
    }

    /// A fresh auxiliary payload on an independent handle, used when a
    /// file-backed entry is re-registered in a child process at fork
    /// (spec.md §4.5 SPT copy).
    pub fn reopened(&self) -> Self {
        Self {
            handle: self.handle.reopen(),
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
        }
    }
}

/// Swap-in: reseek the file and read `read_bytes`, zero-fill `zero_bytes`
/// (spec.md §4.5 File backing).
pub fn swap_in(page: &FileBackedPage, content: &mut [u8; PGSIZE]) {
    page.handle.seek(page.offset);
    let want = page.read_bytes as usize;
    let got = page.handle.read(&mut content[..want]);
    for b in content[got..want].iter_mut() {
        *b = 0;
    }
    for b in content[want..].iter_mut() {
        *b = 0;
    }
}

/// Swap-out (and destroy/munmap's write-back step): if the hardware
/// dirty bit is set, write `read_bytes` back to the file at its stored
/// offset (spec.md §4.5: "if the hardware dirty bit is set, write
/// read_bytes from the frame to the file at its stored offset").
pub fn write_back_if_dirty(page: &FileBackedPage, content: &[u8; PGSIZE], dirty: bool) {
    if !dirty {
        return;
    }
    page.handle.seek(page.offset);
    page.handle.write(&content[..page.read_bytes as usize]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFs};

    #[test]
    fn swap_in_reads_file_and_zero_fills_tail() {
        let fs = MemFs::new();
        fs.put("/f", b"hello");
        let handle = fs.open("/f").unwrap();
        let page = FileBackedPage::new(handle, 0, 5, (PGSIZE - 5) as u32);
        let mut content = [0xFFu8; PGSIZE];
        swap_in(&page, &mut content);
        assert_eq!(&content[..5], b"hello");
        assert!(content[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn write_back_skips_when_not_dirty() {
        let fs = MemFs::new();
        fs.put("/f", b"hello");
        let handle = fs.open("/f").unwrap();
        let page = FileBackedPage::new(handle.clone(), 0, 5, 0);
        let mut content = [0u8; PGSIZE];
        content[..5].copy_from_slice(b"WORLD");
        write_back_if_dirty(&page, &content, false);

        let mut buf = [0u8; 5];
        handle.seek(0);
        handle.read(&mut buf);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn write_back_writes_when_dirty() {
        let fs = MemFs::new();
        fs.put("/f", b"hello");
        let handle = fs.open("/f").unwrap();
        let page = FileBackedPage::new(handle.clone(), 0, 5, 0);
        let mut content = [0u8; PGSIZE];
        content[..5].copy_from_slice(b"WORLD");
        write_back_if_dirty(&page, &content, true);

        let mut buf = [0u8; 5];
        handle.seek(0);
        handle.read(&mut buf);
        assert_eq!(&buf, b"WORLD");
    }
}
