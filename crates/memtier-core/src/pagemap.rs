//! Page-map queries
//!
//! Reads per-page attributes of a process's address ranges. The
//! [`PageMap`] trait is the seam; [`ProcPageMap`] reads the Linux
//! `/proc/<pid>/pagemap` interface, one 64-bit entry per virtual page.
//!
//! Entry layout (see the kernel's `admin-guide/mm/pagemap.rst`):
//! - Bits 0-54: page frame number when present
//! - Bit 55: soft-dirty
//! - Bit 56: exclusively mapped
//! - Bit 61: file-page or shared-anon
//! - Bit 62: swapped
//! - Bit 63: present

use crate::addr_range::{AddrRange, PAGE_SIZE};
use crate::error::PageMapError;
use crate::Pid;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::debug;

pub const PM_PFN_MASK: u64 = (1 << 55) - 1;
pub const PM_SOFT_DIRTY: u64 = 1 << 55;
pub const PM_EXCLUSIVE: u64 = 1 << 56;
pub const PM_FILE: u64 = 1 << 61;
pub const PM_SWAPPED: u64 = 1 << 62;
pub const PM_PRESENT: u64 = 1 << 63;

/// Size of one page-map entry in bytes
const ENTRY_SIZE: u64 = 8;

/// Entries read per syscall
const READ_CHUNK_ENTRIES: u64 = 512;

/// Source of per-page attributes for a process
pub trait PageMap {
    /// Return the pages of `ranges` whose entries have every bit of
    /// `attributes` set. An `attributes` of zero matches every page.
    fn query(
        &self,
        pid: Pid,
        ranges: &[AddrRange],
        attributes: u64,
    ) -> Result<Vec<Page>, PageMapError>;
}

/// One virtual page and its page-map entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    addr: u64,
    entry: u64,
}

impl Page {
    pub fn new(addr: u64, entry: u64) -> Self {
        Self { addr, entry }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Raw page-map entry
    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn is_present(&self) -> bool {
        self.entry & PM_PRESENT != 0
    }

    pub fn is_swapped(&self) -> bool {
        self.entry & PM_SWAPPED != 0
    }

    pub fn is_file(&self) -> bool {
        self.entry & PM_FILE != 0
    }

    pub fn is_exclusive(&self) -> bool {
        self.entry & PM_EXCLUSIVE != 0
    }

    pub fn is_soft_dirty(&self) -> bool {
        self.entry & PM_SOFT_DIRTY != 0
    }

    /// Page frame number, if the page is present and the caller may see it
    pub fn pfn(&self) -> Option<u64> {
        let pfn = self.entry & PM_PFN_MASK;
        (self.is_present() && pfn != 0).then_some(pfn)
    }
}

/// Pages of one process
#[derive(Debug, Clone, Default)]
pub struct Pages {
    pid: Pid,
    pages: Vec<Page>,
}

impl Pages {
    pub fn new(pid: Pid, pages: Vec<Page>) -> Self {
        Self { pid, pages }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Page map backed by `/proc/<pid>/pagemap`
#[derive(Debug, Clone)]
pub struct ProcPageMap {
    proc_root: PathBuf,
}

impl ProcPageMap {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }

    fn process_exists(pid: Pid) -> bool {
        let mut system = System::new_with_specifics(RefreshKind::nothing());
        let pid = sysinfo::Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(pid).is_some()
    }

    fn read_range(
        file: &mut File,
        pid: Pid,
        range: &AddrRange,
        attributes: u64,
        pages: &mut Vec<Page>,
    ) -> Result<(), PageMapError> {
        let access = |source: io::Error| PageMapError::Access { pid, source };

        file.seek(SeekFrom::Start(range.addr() / PAGE_SIZE * ENTRY_SIZE))
            .map_err(access)?;

        let mut buf = vec![0u8; (READ_CHUNK_ENTRIES * ENTRY_SIZE) as usize];
        let mut addr = range.addr();
        let mut remaining = range.length();
        while remaining > 0 {
            let count = remaining.min(READ_CHUNK_ENTRIES);
            let chunk = &mut buf[..(count * ENTRY_SIZE) as usize];
            file.read_exact(chunk).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => PageMapError::Truncated { pid, addr },
                _ => access(e),
            })?;

            for raw in chunk.chunks_exact(ENTRY_SIZE as usize) {
                let mut bytes = [0u8; ENTRY_SIZE as usize];
                bytes.copy_from_slice(raw);
                let entry = u64::from_le_bytes(bytes);
                if entry & attributes == attributes {
                    pages.push(Page::new(addr, entry));
                }
                addr = addr.wrapping_add(PAGE_SIZE);
            }
            remaining -= count;
        }
        Ok(())
    }
}

impl Default for ProcPageMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMap for ProcPageMap {
    fn query(
        &self,
        pid: Pid,
        ranges: &[AddrRange],
        attributes: u64,
    ) -> Result<Vec<Page>, PageMapError> {
        if !Self::process_exists(pid) {
            return Err(PageMapError::ProcessNotFound(pid));
        }

        let path = self.proc_root.join(pid.to_string()).join("pagemap");
        let mut file = File::open(&path).map_err(|source| PageMapError::Access { pid, source })?;

        let mut pages = Vec::new();
        for range in ranges {
            Self::read_range(&mut file, pid, range, attributes, &mut pages)?;
        }

        debug!(
            pid = pid,
            ranges = ranges.len(),
            matched = pages.len(),
            "Read page map"
        );
        Ok(pages)
    }
}
