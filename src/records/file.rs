use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::{DbError, DbResult};
use crate::records::{REC_LIVE, REC_REMOVED, Record};
use crate::storage::pager::{OpenMode, STATUS_CONSISTENT, STATUS_INCONSISTENT};

// ┌──────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                    │
// │────────┼────────┼────────────────────────────────────────────────│
// │   0    │   1    │ STATUS ('0' = inconsistent, '1' = consistent)  │
// │   1    │   8    │ TOP (i64): head of the removed list, -1 = none │
// │   9    │   8    │ NEXT BYTE OFFSET (u64): EOF, 0 = no records    │
// │  17    │   4    │ VALID record count (u32)                       │
// │  21    │   4    │ REMOVED record count (u32)                     │
// └──────────────────────────────────────────────────────────────────┘
pub const HEADER_SIZE: u64 = 25;

#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub status: u8,
    pub top: i64,
    pub next_byte_offset: u64,
    pub n_valid: u32,
    pub n_removed: u32,
}

impl RecordHeader {
    fn fresh() -> Self {
        RecordHeader {
            status: STATUS_INCONSISTENT,
            top: -1,
            next_byte_offset: 0,
            n_valid: 0,
            n_removed: 0,
        }
    }
}

/// Where an update landed: rewritten in its slot, or relocated because it
/// outgrew it (the caller must upsert the index with the new offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    InPlace,
    Relocated(u64),
}

/// The variable-length record file. Deletion is logical: removed records
/// form a singly linked free list threaded through their slots, reused
/// first-fit on insert. Shares the status-flag open/close protocol with
/// the index file; the header is rewritten only at close.
pub struct RecordFile {
    file: File,
    header: RecordHeader,
    mode: OpenMode,
}

impl RecordFile {
    pub fn open(path: &Path, mode: OpenMode) -> DbResult<RecordFile> {
        let mut file = match mode {
            OpenMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };

        let header = match read_header(&mut file) {
            Ok(header) => {
                if header.status == STATUS_INCONSISTENT {
                    return Err(DbError::Inconsistent);
                }
                header
            }
            Err(DbError::InvalidHeader) if mode == OpenMode::ReadWrite => {
                debug!("record file: no header, initializing");
                RecordHeader::fresh()
            }
            Err(e) => return Err(e),
        };

        let mut this = RecordFile { file, header, mode };
        if mode == OpenMode::ReadWrite {
            this.header.status = STATUS_INCONSISTENT;
            this.write_header()?;
        }
        Ok(this)
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn close(mut self) -> DbResult<()> {
        if self.mode == OpenMode::ReadWrite {
            self.header.status = STATUS_CONSISTENT;
            self.write_header()?;
        }
        Ok(())
    }

    /// Insert a record, reusing the first freed slot big enough for it
    /// (first fit), or appending at the end of the file. Returns the byte
    /// offset the record landed at, which is what the index stores.
    pub fn insert(&mut self, rec: &Record) -> DbResult<u64> {
        if self.mode == OpenMode::ReadOnly {
            return Err(DbError::ReadOnly);
        }

        let needed = rec.payload_size();
        let mut slot_size = needed;
        let mut insert_off = self.header.top;
        let mut prev: i64 = -1;
        let mut next: i64 = -1;

        while insert_off != -1 {
            let at = insert_off as u64;
            let (removed, size, link) = self.read_slot_head(at)?;
            if removed != REC_REMOVED {
                return Err(DbError::CorruptRecord(at, "free list points at live record".into()));
            }
            next = link;
            if size >= needed {
                slot_size = size;
                break;
            }
            prev = insert_off;
            insert_off = link;
        }

        let appended = insert_off == -1;
        let at = if appended {
            if self.header.next_byte_offset == 0 { HEADER_SIZE } else { self.header.next_byte_offset }
        } else {
            insert_off as u64
        };

        let bytes = rec.encode(slot_size, -1);
        self.file.seek(SeekFrom::Start(at))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;

        if appended {
            self.header.next_byte_offset = at + 1 + 4 + slot_size as u64;
        } else {
            // Unlink the reused slot.
            if insert_off == self.header.top {
                self.header.top = next;
            } else {
                self.file.seek(SeekFrom::Start(prev as u64 + 1 + 4))?;
                self.file.write_all(&next.to_le_bytes())?;
            }
            self.header.n_removed -= 1;
        }
        self.header.n_valid += 1;

        debug!("record insert: id={} at={} reused={}", rec.id, at, !appended);
        Ok(at)
    }

    /// Read the live record at `offset`.
    pub fn read_at(&mut self, offset: u64) -> DbResult<Record> {
        let (removed, size, _) = self.read_slot_head(offset)?;
        if removed == REC_REMOVED {
            return Err(DbError::NoRecord(offset));
        }
        if removed != REC_LIVE {
            return Err(DbError::CorruptRecord(offset, "bad removed flag".into()));
        }

        let mut body = vec![0u8; size as usize];
        self.file.seek(SeekFrom::Start(offset + 1 + 4))?;
        self.file.read_exact(&mut body)?;
        let (rec, _) = Record::decode(&body, offset)?;
        Ok(rec)
    }

    /// Logically remove the record at `offset`, pushing its slot on the
    /// free list. The header is only rewritten at close; the status flag
    /// covers the window.
    pub fn remove_at(&mut self, offset: u64) -> DbResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(DbError::ReadOnly);
        }

        let (removed, _, _) = self.read_slot_head(offset)?;
        if removed == REC_REMOVED {
            return Err(DbError::NoRecord(offset));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[REC_REMOVED])?;
        self.file.seek(SeekFrom::Start(offset + 1 + 4))?;
        self.file.write_all(&self.header.top.to_le_bytes())?;
        self.file.flush()?;

        self.header.top = offset as i64;
        self.header.n_valid -= 1;
        self.header.n_removed += 1;

        debug!("record remove: at={}", offset);
        Ok(())
    }

    /// Rewrite the record at `offset`. Fits its slot: updated in place.
    /// Outgrew it: removed and re-inserted elsewhere, with the new offset
    /// reported so the index can be upserted.
    pub fn update_at(&mut self, offset: u64, rec: &Record) -> DbResult<UpdateOutcome> {
        if self.mode == OpenMode::ReadOnly {
            return Err(DbError::ReadOnly);
        }

        let (removed, slot_size, _) = self.read_slot_head(offset)?;
        if removed != REC_LIVE {
            return Err(DbError::NoRecord(offset));
        }

        if rec.payload_size() <= slot_size {
            let bytes = rec.encode(slot_size, -1);
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&bytes)?;
            self.file.flush()?;
            return Ok(UpdateOutcome::InPlace);
        }

        self.remove_at(offset)?;
        let at = self.insert(rec)?;
        Ok(UpdateOutcome::Relocated(at))
    }

    /// Sequential scan of every live record, in file order.
    pub fn scan(&mut self) -> DbResult<Vec<(u64, Record)>> {
        let mut out = Vec::new();
        if self.header.next_byte_offset == 0 {
            return Ok(out);
        }

        let mut at = HEADER_SIZE;
        while at < self.header.next_byte_offset {
            let (removed, size, _) = self.read_slot_head(at)?;
            if removed == REC_LIVE {
                let mut body = vec![0u8; size as usize];
                self.file.seek(SeekFrom::Start(at + 1 + 4))?;
                self.file.read_exact(&mut body)?;
                let (rec, _) = Record::decode(&body, at)?;
                out.push((at, rec));
            }
            at += 1 + 4 + size as u64;
        }
        Ok(out)
    }

    /// (removed flag, slot size, free-list link) of the slot at `offset`.
    fn read_slot_head(&mut self, offset: u64) -> DbResult<(u8, u32, i64)> {
        let mut head = [0u8; 13];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut head)?;
        Ok((
            head[0],
            u32::from_le_bytes(head[1..5].try_into().unwrap()),
            i64::from_le_bytes(head[5..13].try_into().unwrap()),
        ))
    }

    fn write_header(&mut self) -> DbResult<()> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0] = self.header.status;
        buf[1..9].copy_from_slice(&self.header.top.to_le_bytes());
        buf[9..17].copy_from_slice(&self.header.next_byte_offset.to_le_bytes());
        buf[17..21].copy_from_slice(&self.header.n_valid.to_le_bytes());
        buf[21..25].copy_from_slice(&self.header.n_removed.to_le_bytes());

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }
}

fn read_header(file: &mut File) -> DbResult<RecordHeader> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    if file.read_exact(&mut buf).is_err() {
        return Err(DbError::InvalidHeader);
    }

    let status = buf[0];
    if status != STATUS_CONSISTENT && status != STATUS_INCONSISTENT {
        return Err(DbError::InvalidHeader);
    }

    Ok(RecordHeader {
        status,
        top: i64::from_le_bytes(buf[1..9].try_into().unwrap()),
        next_byte_offset: u64::from_le_bytes(buf[9..17].try_into().unwrap()),
        n_valid: u32::from_le_bytes(buf[17..21].try_into().unwrap()),
        n_removed: u32::from_le_bytes(buf[21..25].try_into().unwrap()),
    })
}
