use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::storage::page::{FILLER, NO_PAGE, PAGE_SIZE, PageBuf};

pub const STATUS_INCONSISTENT: u8 = b'0';
pub const STATUS_CONSISTENT: u8 = b'1';

/// How a database file is opened. Read-only refuses to create or repair
/// anything; read-write claims the file by flipping its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

// ┌──────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                    │
// │────────┼────────┼────────────────────────────────────────────────│
// │   0    │   1    │ STATUS ('0' = inconsistent, '1' = consistent)  │
// │   1    │   4    │ ROOT page number (i32, -1 = no root yet)       │
// │   5    │   4    │ NEXT free page number (u32)                    │
// │   9    │   4    │ allocated PAGE COUNT (u32)                     │
// │  13    │  ...   │ '$' filler up to PAGE_SIZE                     │
// └──────────────────────────────────────────────────────────────────┘
#[derive(Debug, Clone, Copy)]
pub struct IndexHeader {
    pub status: u8,
    pub root: i32,
    pub next: u32,
    pub page_count: u32,
}

impl IndexHeader {
    /// Header for a freshly created index: no root yet, but the initial
    /// empty leaf page (page 0) already counts as allocated.
    pub fn fresh() -> Self {
        IndexHeader {
            status: STATUS_INCONSISTENT,
            root: NO_PAGE,
            next: 1,
            page_count: 1,
        }
    }
}

/// Pager: reads and writes fixed-size pages of the index file. Page `i`
/// lives at byte offset `(i + 1) * PAGE_SIZE`; the header occupies the
/// first page-sized block. No caching here: the tree layer decides what
/// stays in memory (only the root page does).
pub struct Pager {
    file: File,
    mode: OpenMode,
}

impl Pager {
    pub fn open(path: &Path, mode: OpenMode) -> io::Result<Self> {
        let file = match mode {
            OpenMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };

        Ok(Pager { file, mode })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn writable(&self) -> bool {
        self.mode == OpenMode::ReadWrite
    }

    /// The underlying file, flushed by the caller first. Close hooks run
    /// against this.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn read_page(&mut self, rrn: u32, page: &mut PageBuf) -> io::Result<()> {
        let pos = (rrn as u64 + 1) * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(page)
    }

    pub fn write_page(&mut self, rrn: u32, page: &PageBuf) -> io::Result<()> {
        debug!("write_page: rrn={}", rrn);
        let pos = (rrn as u64 + 1) * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(page)?;
        self.file.flush()
    }

    /// Decode the header page. A short or unrecognizable header yields
    /// `InvalidHeader` so read-only opens can fail cleanly on empty files.
    pub fn read_header(&mut self) -> DbResult<IndexHeader> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        if self.file.read_exact(&mut buf).is_err() {
            return Err(DbError::InvalidHeader);
        }

        let status = buf[0];
        if status != STATUS_CONSISTENT && status != STATUS_INCONSISTENT {
            return Err(DbError::InvalidHeader);
        }

        Ok(IndexHeader {
            status,
            root: i32::from_le_bytes(buf[1..5].try_into().unwrap()),
            next: u32::from_le_bytes(buf[5..9].try_into().unwrap()),
            page_count: u32::from_le_bytes(buf[9..13].try_into().unwrap()),
        })
    }

    pub fn write_header(&mut self, header: &IndexHeader) -> io::Result<()> {
        let mut buf = [FILLER; PAGE_SIZE];
        buf[0] = header.status;
        buf[1..5].copy_from_slice(&header.root.to_le_bytes());
        buf[5..9].copy_from_slice(&header.next.to_le_bytes());
        buf[9..13].copy_from_slice(&header.page_count.to_le_bytes());

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()
    }
}
