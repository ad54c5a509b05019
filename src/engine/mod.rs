use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::info;

use crate::error::{DbError, DbResult};
use crate::query::Query;
use crate::records::Record;
use crate::records::file::{RecordFile, UpdateOutcome};
use crate::records::ingest;
use crate::storage::btree::{BTree, VisitOutcome, Walk};
use crate::storage::pager::OpenMode;

/// A record file paired with the B-tree index over its id field. All CRUD
/// by id goes through the index; the record file is never scanned unless
/// a query cannot be pinned to one id.
pub struct Database {
    pub records: RecordFile,
    pub index: BTree,
}

impl Database {
    pub fn open(data_path: &Path, index_path: &Path, mode: OpenMode) -> DbResult<Database> {
        let records = RecordFile::open(data_path, mode)?;
        let mut index = BTree::open(index_path, mode)?;

        // Checksum the index file once it is fully flushed at close.
        index.add_close_hook(|file| {
            let mut hasher = crc32fast::Hasher::new();
            let mut buf = [0u8; 4096];
            file.seek(SeekFrom::Start(0))?;
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            info!("index file checksum: {:08x}", hasher.finalize());
            Ok(())
        });

        Ok(Database { records, index })
    }

    pub fn close(self) -> DbResult<()> {
        self.records.close()?;
        self.index.close()
    }

    pub fn load_csv(&mut self, path: &Path) -> DbResult<usize> {
        ingest::load_csv(path, &mut self.records, &mut self.index)
    }

    pub fn insert(&mut self, rec: &Record) -> DbResult<()> {
        if self.index.search(rec.id)?.is_some() {
            return Err(DbError::DuplicateId(rec.id));
        }
        let offset = self.records.insert(rec)?;
        self.index.insert(rec.id, offset)
    }

    pub fn find(&mut self, id: u32) -> DbResult<Option<Record>> {
        match self.index.search(id)? {
            Some(offset) => Ok(Some(self.records.read_at(offset)?)),
            None => Ok(None),
        }
    }

    /// Rewrite the record carrying `rec.id`. When the record outgrows its
    /// slot and relocates, the index entry is repointed in place during an
    /// aborting traversal; id is unique, so one hit is the whole job.
    pub fn update(&mut self, rec: &Record) -> DbResult<bool> {
        let Some(offset) = self.index.search(rec.id)? else {
            return Ok(false);
        };

        if let UpdateOutcome::Relocated(new_offset) = self.records.update_at(offset, rec)? {
            let id = rec.id;
            self.index.traverse(|key, offset| {
                if key == id {
                    *offset = new_offset;
                    VisitOutcome::changed(Walk::Abort)
                } else {
                    VisitOutcome::unchanged(Walk::Continue)
                }
            })?;
        }
        Ok(true)
    }

    pub fn remove(&mut self, id: u32) -> DbResult<bool> {
        let Some(offset) = self.index.search(id)? else {
            return Ok(false);
        };
        self.records.remove_at(offset)?;
        self.index.remove(id)?;
        Ok(true)
    }

    /// Answer an equality query: through the index when it pins an id,
    /// by sequential scan otherwise.
    pub fn select(&mut self, query: &Query) -> DbResult<Vec<Record>> {
        if let Some(id) = query.unique_id() {
            return Ok(self
                .find(id)?
                .filter(|rec| query.matches(rec))
                .into_iter()
                .collect());
        }

        let mut out = Vec::new();
        for (_, rec) in self.records.scan()? {
            if query.matches(&rec) {
                out.push(rec);
            }
        }
        Ok(out)
    }
}
